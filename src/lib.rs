pub mod application;
pub mod domain;
pub mod error;
pub mod infrastructure;

pub use application::approval::DecisionOutcome;
pub use application::commands::AppState;
pub use domain::grouping::{GroupKey, GroupedRequestView};
pub use domain::models::{Actor, LessonRequest, RequestStatus, ScheduleSlot, ScheduledLesson, Subject};
pub use domain::time_window::{DayOfWeek, TimeWindow, WindowAnchor};
pub use error::ScheduleError;
pub use infrastructure::error::InfraError;

use application::bootstrap::bootstrap_workspace;
use infrastructure::logging::init_logging;
use serde::Serialize;
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;

#[derive(Debug, Serialize)]
pub struct BootstrapResponse {
    pub workspace_root: String,
    pub database_path: String,
    pub timezone: String,
}

/// Prepares the workspace layout without starting the engine.
pub fn bootstrap(root: Option<String>) -> Result<BootstrapResponse, String> {
    let workspace_root = match root {
        Some(path) => PathBuf::from(path),
        None => std::env::current_dir().map_err(|error| error.to_string())?,
    };

    let result = bootstrap_workspace(&workspace_root).map_err(|error| error.to_string())?;
    Ok(BootstrapResponse {
        workspace_root: result.workspace_root.display().to_string(),
        database_path: result.database_path.display().to_string(),
        timezone: result.settings.timezone.name().to_string(),
    })
}

/// Starts the engine rooted at `workspace_root`. Keep the returned guard alive
/// for as long as log lines should reach `logs/commands.log`.
pub fn start(workspace_root: PathBuf) -> Result<(AppState, WorkerGuard), InfraError> {
    let guard = init_logging(&workspace_root.join("logs"))?;
    let state = AppState::new(workspace_root)?;
    state.log_info("start", "tutor schedule engine ready");
    Ok((state, guard))
}
