use crate::domain::models::Subject;
use crate::domain::time_window::{format_display_time, optional_hhmm};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::storage::connect;
use async_trait::async_trait;
use chrono::{NaiveDate, SecondsFormat, Utc};
use reqwest::Client;
use rusqlite::params;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    LessonApproved,
    LessonRejected,
}

impl NotificationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::LessonApproved => "lesson_approved",
            Self::LessonRejected => "lesson_rejected",
        }
    }
}

/// One message to one parent about the outcome of their request(s).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub kind: NotificationKind,
    pub parent_id: String,
    pub student_names: Vec<String>,
    pub subjects: Vec<Subject>,
    pub date: NaiveDate,
    #[serde(with = "optional_hhmm")]
    pub time: Option<u16>,
    pub response: Option<String>,
}

impl Notification {
    pub fn title(&self) -> &'static str {
        match self.kind {
            NotificationKind::LessonApproved => "Lesson request approved",
            NotificationKind::LessonRejected => "Lesson request declined",
        }
    }

    pub fn message(&self) -> String {
        let subjects = self
            .subjects
            .iter()
            .map(|subject| subject.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        let when = match self.time {
            Some(time) => format!("{} at {}", self.date.format("%Y-%m-%d"), format_display_time(time)),
            None => self.date.format("%Y-%m-%d").to_string(),
        };
        let outcome = match self.kind {
            NotificationKind::LessonApproved => "was approved",
            NotificationKind::LessonRejected => "was declined",
        };
        let mut message = format!(
            "The {subjects} request for {} on {when} {outcome}.",
            self.student_names.join(" & ")
        );
        if let Some(response) = self.response.as_deref().map(str::trim).filter(|value| !value.is_empty()) {
            message.push_str(" Tutor says: ");
            message.push_str(response);
        }
        message
    }
}

#[async_trait]
pub trait NotificationChannel: Send + Sync {
    fn name(&self) -> &str;
    async fn deliver(&self, notification: &Notification) -> Result<(), InfraError>;
}

#[derive(Debug, Serialize)]
struct EmailPayload<'a> {
    template: &'a str,
    recipient_user_id: &'a str,
    subject: &'a str,
    body: String,
    notification: &'a Notification,
}

/// Posts notifications as JSON to an email relay endpoint.
#[derive(Debug, Clone)]
pub struct ReqwestEmailChannel {
    client: Client,
    endpoint: Url,
    api_key: Option<String>,
}

impl ReqwestEmailChannel {
    pub fn new(endpoint: Url, api_key: Option<String>) -> Result<Self, InfraError> {
        if !matches!(endpoint.scheme(), "http" | "https") {
            return Err(InfraError::InvalidConfig(format!(
                "email endpoint must be http(s): {endpoint}"
            )));
        }
        Ok(Self {
            client: Client::new(),
            endpoint,
            api_key: api_key
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty()),
        })
    }

    fn payload(notification: &Notification) -> EmailPayload<'_> {
        EmailPayload {
            template: notification.kind.as_str(),
            recipient_user_id: &notification.parent_id,
            subject: notification.title(),
            body: notification.message(),
            notification,
        }
    }

    fn http_error(status: reqwest::StatusCode, body: &str) -> InfraError {
        let message = if body.trim().is_empty() {
            format!("email relay error: http {}", status.as_u16())
        } else {
            format!("email relay error: http {}; body={body}", status.as_u16())
        };
        InfraError::Delivery(message)
    }
}

#[async_trait]
impl NotificationChannel for ReqwestEmailChannel {
    fn name(&self) -> &str {
        "email"
    }

    async fn deliver(&self, notification: &Notification) -> Result<(), InfraError> {
        let mut request = self
            .client
            .post(self.endpoint.clone())
            .json(&Self::payload(notification));
        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(Self::http_error(status, &body))
    }
}

/// Writes notifications into the in-app inbox table.
#[derive(Debug, Clone)]
pub struct SqliteInAppChannel {
    db_path: PathBuf,
}

impl SqliteInAppChannel {
    pub fn new(db_path: impl AsRef<Path>) -> Self {
        Self {
            db_path: db_path.as_ref().to_path_buf(),
        }
    }
}

#[async_trait]
impl NotificationChannel for SqliteInAppChannel {
    fn name(&self) -> &str {
        "in_app"
    }

    async fn deliver(&self, notification: &Notification) -> Result<(), InfraError> {
        let connection = connect(&self.db_path)?;
        connection.execute(
            "INSERT INTO notifications (user_id, kind, title, message, payload, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                notification.parent_id,
                notification.kind.as_str(),
                notification.title(),
                notification.message(),
                serde_json::to_string(notification)?,
                Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            ],
        )?;
        Ok(())
    }
}

/// Records deliveries in memory; parents listed in `failing_parents` get an error.
#[derive(Debug, Default)]
pub struct InMemoryNotificationChannel {
    delivered: Mutex<Vec<Notification>>,
    failing_parents: Vec<String>,
}

impl InMemoryNotificationChannel {
    pub fn failing_for(parent_ids: &[&str]) -> Self {
        Self {
            delivered: Mutex::default(),
            failing_parents: parent_ids.iter().map(|id| id.to_string()).collect(),
        }
    }

    pub fn delivered(&self) -> Vec<Notification> {
        self.delivered
            .lock()
            .map(|delivered| delivered.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl NotificationChannel for InMemoryNotificationChannel {
    fn name(&self) -> &str {
        "memory"
    }

    async fn deliver(&self, notification: &Notification) -> Result<(), InfraError> {
        if self.failing_parents.contains(&notification.parent_id) {
            return Err(InfraError::Delivery(format!(
                "no mailbox for parent {}",
                notification.parent_id
            )));
        }
        self.delivered
            .lock()
            .map_err(|error| InfraError::InvalidConfig(format!("notification log lock poisoned: {error}")))?
            .push(notification.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::storage::test_support::TempDatabase;

    fn approval() -> Notification {
        Notification {
            kind: NotificationKind::LessonApproved,
            parent_id: "parent-1".to_string(),
            student_names: vec!["Ada".to_string(), "Ben".to_string()],
            subjects: vec![Subject::Piano],
            date: NaiveDate::from_ymd_opt(2024, 3, 11).expect("date"),
            time: Some(855),
            response: Some("  See you then  ".to_string()),
        }
    }

    #[test]
    fn message_mentions_students_time_and_response() {
        assert_eq!(
            approval().message(),
            "The piano request for Ada & Ben on 2024-03-11 at 2:15 PM was approved. Tutor says: See you then"
        );

        let mut rejection = approval();
        rejection.kind = NotificationKind::LessonRejected;
        rejection.time = None;
        rejection.response = None;
        assert_eq!(
            rejection.message(),
            "The piano request for Ada & Ben on 2024-03-11 was declined."
        );
        assert_eq!(rejection.title(), "Lesson request declined");
    }

    #[test]
    fn email_payload_carries_template_and_hhmm_time() {
        let notification = approval();
        let payload = serde_json::to_value(ReqwestEmailChannel::payload(&notification)).expect("json");
        assert_eq!(payload["template"], "lesson_approved");
        assert_eq!(payload["recipient_user_id"], "parent-1");
        assert_eq!(payload["notification"]["time"], "14:15");
        assert_eq!(payload["notification"]["subjects"][0], "piano");
    }

    #[test]
    fn email_channel_rejects_non_http_endpoints() {
        let endpoint = Url::parse("ftp://mail.example.com/send").expect("url");
        assert!(matches!(
            ReqwestEmailChannel::new(endpoint, None),
            Err(InfraError::InvalidConfig(_))
        ));

        let endpoint = Url::parse("https://mail.example.com/send").expect("url");
        let channel = ReqwestEmailChannel::new(endpoint, Some("  ".to_string())).expect("channel");
        assert!(channel.api_key.is_none());
    }

    #[test]
    fn relay_status_errors_are_delivery_failures() {
        let error = ReqwestEmailChannel::http_error(reqwest::StatusCode::BAD_GATEWAY, "upstream down");
        assert!(matches!(error, InfraError::Delivery(ref message) if message.contains("502")));
        assert!(error.to_string().starts_with("notification delivery rejected"));

        let error = ReqwestEmailChannel::http_error(reqwest::StatusCode::TOO_MANY_REQUESTS, "  ");
        assert!(matches!(error, InfraError::Delivery(ref message) if !message.contains("body=")));
    }

    #[tokio::test]
    async fn in_app_channel_writes_inbox_row() {
        let database = TempDatabase::new();
        let channel = SqliteInAppChannel::new(database.path());
        channel.deliver(&approval()).await.expect("deliver");

        let connection = connect(database.path()).expect("connect");
        let (user_id, kind, read): (String, String, i64) = connection
            .query_row(
                "SELECT user_id, kind, read FROM notifications",
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .expect("row");
        assert_eq!(user_id, "parent-1");
        assert_eq!(kind, "lesson_approved");
        assert_eq!(read, 0);
    }

    #[tokio::test]
    async fn in_memory_channel_fails_for_listed_parents() {
        let channel = InMemoryNotificationChannel::failing_for(&["parent-1"]);
        assert!(channel.deliver(&approval()).await.is_err());

        let mut other = approval();
        other.parent_id = "parent-2".to_string();
        channel.deliver(&other).await.expect("deliver");
        assert_eq!(channel.delivered(), vec![other]);
    }
}
