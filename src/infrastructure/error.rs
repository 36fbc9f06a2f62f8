use thiserror::Error;

/// Failures of the workspace, storage and notification transports.
#[derive(Debug, Error)]
pub enum InfraError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("notification transport error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("notification delivery rejected: {0}")]
    Delivery(String),
    #[error("Invalid config: {0}")]
    InvalidConfig(String),
    #[error("Record not found: {0}")]
    NotFound(String),
}
