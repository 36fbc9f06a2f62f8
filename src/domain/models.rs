use crate::domain::time_window::{MINUTES_PER_DAY, TimeWindow, optional_hhmm};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Tutor,
    Parent,
}

/// The authenticated caller, as reported by the identity provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub user_id: String,
    pub role: Role,
}

impl Actor {
    pub fn tutor(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            role: Role::Tutor,
        }
    }

    pub fn parent(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            role: Role::Parent,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Subject {
    Piano,
    Math,
    Reading,
    Speech,
    English,
}

impl Subject {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Piano => "piano",
            Self::Math => "math",
            Self::Reading => "reading",
            Self::Speech => "speech",
            Self::English => "english",
        }
    }
}

impl FromStr for Subject {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "piano" => Ok(Self::Piano),
            "math" => Ok(Self::Math),
            "reading" => Ok(Self::Reading),
            "speech" => Ok(Self::Speech),
            "english" => Ok(Self::English),
            other => Err(format!("unsupported subject: {other}")),
        }
    }
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An availability window or a break, owned by one tutor.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScheduleSlot {
    pub id: String,
    pub tutor_id: String,
    pub window: TimeWindow,
    pub notes: Option<String>,
}

pub type AvailabilitySlot = ScheduleSlot;
pub type BreakSlot = ScheduleSlot;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Pending,
    Approved,
    Rejected,
    Scheduled,
}

impl RequestStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Scheduled => "scheduled",
        }
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending)
    }

    /// Only `pending` may move, and only into one of the terminal outcomes.
    pub fn can_transition_to(self, next: RequestStatus) -> bool {
        matches!(
            (self, next),
            (
                Self::Pending,
                Self::Approved | Self::Rejected | Self::Scheduled
            )
        )
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RequestStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "approved" => Ok(Self::Approved),
            "rejected" => Ok(Self::Rejected),
            "scheduled" => Ok(Self::Scheduled),
            other => Err(format!("unsupported request status: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "request_type", rename_all = "snake_case")]
pub enum RequestKind {
    Reschedule { original_lesson_id: String },
    #[serde(rename = "dropin")]
    DropIn,
}

impl RequestKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Reschedule { .. } => "reschedule",
            Self::DropIn => "dropin",
        }
    }

    pub fn original_lesson_id(&self) -> Option<&str> {
        match self {
            Self::Reschedule { original_lesson_id } => Some(original_lesson_id),
            Self::DropIn => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LessonRequest {
    pub id: String,
    pub tutor_id: String,
    pub parent_id: String,
    pub student_id: String,
    pub student_name: String,
    pub subject: Subject,
    pub preferred_date: NaiveDate,
    #[serde(with = "optional_hhmm")]
    pub preferred_time: Option<u16>,
    pub preferred_duration_minutes: u32,
    pub notes: Option<String>,
    #[serde(flatten)]
    pub kind: RequestKind,
    pub request_group_id: Option<String>,
    pub status: RequestStatus,
    pub tutor_response: Option<String>,
    pub scheduled_lesson_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Parent-supplied fields of a request before it is stored.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NewLessonRequest {
    pub tutor_id: String,
    pub student_id: String,
    pub student_name: String,
    pub subject: Subject,
    pub preferred_date: NaiveDate,
    #[serde(with = "optional_hhmm")]
    pub preferred_time: Option<u16>,
    pub preferred_duration_minutes: u32,
    pub notes: Option<String>,
    #[serde(flatten)]
    pub kind: RequestKind,
}

impl NewLessonRequest {
    pub fn validate(&self) -> Result<(), String> {
        validate_non_empty(&self.tutor_id, "request.tutor_id")?;
        validate_non_empty(&self.student_id, "request.student_id")?;
        validate_non_empty(&self.student_name, "request.student_name")?;
        if self.preferred_duration_minutes == 0 {
            return Err("request.preferred_duration_minutes must be > 0".to_string());
        }
        if self.preferred_duration_minutes > u32::from(MINUTES_PER_DAY) {
            return Err(format!(
                "request.preferred_duration_minutes must be <= {MINUTES_PER_DAY}"
            ));
        }
        if let RequestKind::Reschedule { original_lesson_id } = &self.kind {
            validate_non_empty(original_lesson_id, "request.original_lesson_id")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScheduledLesson {
    pub id: String,
    pub tutor_id: String,
    pub parent_id: String,
    pub student_id: String,
    pub subject: Subject,
    pub scheduled_at: DateTime<Utc>,
    pub duration_minutes: u32,
    pub session_group_id: Option<String>,
    pub source_request_id: Option<String>,
    pub notes: Option<String>,
}

impl ScheduledLesson {
    pub fn validate(&self) -> Result<(), String> {
        validate_non_empty(&self.id, "lesson.id")?;
        validate_non_empty(&self.tutor_id, "lesson.tutor_id")?;
        validate_non_empty(&self.student_id, "lesson.student_id")?;
        if self.duration_minutes == 0 {
            return Err("lesson.duration_minutes must be > 0".to_string());
        }
        Ok(())
    }
}

pub(crate) fn validate_non_empty(value: &str, field_name: &str) -> Result<(), String> {
    if value.trim().is_empty() {
        return Err(format!("{field_name} must not be empty"));
    }
    Ok(())
}
