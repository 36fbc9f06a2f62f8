use crate::infrastructure::error::InfraError;
use serde::Serialize;
use thiserror::Error;

/// A single member of an approve/reject batch that did not complete.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MemberFailure {
    pub request_id: String,
    pub step: FailedStep,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailedStep {
    CreateLesson,
    UpdateStatus,
}

#[derive(Debug, Error)]
pub enum ScheduleError {
    #[error("invalid time window: {0}")]
    InvalidWindow(String),
    #[error("break {start}-{end} is not inside any availability window for {day}")]
    BreakOutsideAvailability {
        day: String,
        start: String,
        end: String,
    },
    #[error("invalid time format: '{0}' (expected HH:MM, H:MM AM/PM or HHMM)")]
    InvalidTimeFormat(String),
    #[error("invalid date '{0}' (expected YYYY-MM-DD)")]
    InvalidDate(String),
    #[error("request {request_id} is {status}; operation requires {required}")]
    InvalidState {
        request_id: String,
        status: String,
        required: String,
    },
    #[error("{} of {} request updates failed", failed.len(), failed.len() + succeeded.len())]
    PartialGroupFailure {
        failed: Vec<MemberFailure>,
        succeeded: Vec<String>,
    },
    #[error("notification to parent {parent_id} via {channel} failed: {message}")]
    NotificationDeliveryFailure {
        parent_id: String,
        channel: String,
        message: String,
    },
    #[error("availability window {availability_id} still contains breaks: {}", break_ids.join(", "))]
    AvailabilityInUse {
        availability_id: String,
        break_ids: Vec<String>,
    },
    #[error("requested time {start}-{end} on {date} is not bookable")]
    SlotUnavailable {
        date: String,
        start: String,
        end: String,
    },
    #[error("request {0} has no preferred time; a lesson cannot be scheduled")]
    MissingPreferredTime(String),
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("validation failed: {0}")]
    Validation(String),
    #[error(transparent)]
    Storage(#[from] InfraError),
}

impl ScheduleError {
    pub(crate) fn invalid_state(request_id: &str, status: impl ToString, required: &str) -> Self {
        Self::InvalidState {
            request_id: request_id.to_string(),
            status: status.to_string(),
            required: required.to_string(),
        }
    }

    /// The request ids that need a retry after a partial batch failure.
    pub fn failed_request_ids(&self) -> Vec<&str> {
        match self {
            Self::PartialGroupFailure { failed, .. } => {
                failed.iter().map(|failure| failure.request_id.as_str()).collect()
            }
            _ => Vec::new(),
        }
    }
}
