use crate::domain::models::{LessonRequest, RequestKind, RequestStatus, Subject};
use crate::domain::time_window::{format_hhmm, parse_hhmm};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::storage::{connect, corrupt_row};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use rusqlite::{Row, params};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

const TABLE: &str = "lesson_requests";
const COLUMNS: &str = "id, tutor_id, parent_id, student_id, student_name, subject, preferred_date,
    preferred_time, preferred_duration_minutes, notes, request_type, original_lesson_id,
    request_group_id, status, tutor_response, scheduled_lesson_id, created_at";

/// The fields a tutor decision writes back onto one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusUpdate {
    pub request_id: String,
    pub status: RequestStatus,
    pub tutor_response: Option<String>,
    pub scheduled_lesson_id: Option<String>,
}

#[async_trait]
pub trait LessonRequestRepository: Send + Sync {
    async fn insert(&self, request: &LessonRequest) -> Result<(), InfraError>;
    async fn get(&self, request_id: &str) -> Result<Option<LessonRequest>, InfraError>;
    /// Members of a combined session in insertion order.
    async fn list_by_group(&self, group_id: &str) -> Result<Vec<LessonRequest>, InfraError>;
    /// Newest first; ties keep insertion order.
    async fn list_for_tutor(
        &self,
        tutor_id: &str,
        status: Option<RequestStatus>,
    ) -> Result<Vec<LessonRequest>, InfraError>;
    async fn update_status(&self, update: &StatusUpdate) -> Result<(), InfraError>;
    async fn delete(&self, request_id: &str) -> Result<bool, InfraError>;
}

#[derive(Debug, Default)]
struct InMemoryRequests {
    requests: HashMap<String, LessonRequest>,
    order: Vec<String>,
}

#[derive(Debug, Default)]
pub struct InMemoryLessonRequestRepository {
    state: Mutex<InMemoryRequests>,
}

impl InMemoryLessonRequestRepository {
    fn lock(&self) -> Result<std::sync::MutexGuard<'_, InMemoryRequests>, InfraError> {
        self.state
            .lock()
            .map_err(|error| InfraError::InvalidConfig(format!("request store lock poisoned: {error}")))
    }
}

impl InMemoryRequests {
    fn ordered(&self) -> impl Iterator<Item = &LessonRequest> {
        self.order
            .iter()
            .filter_map(|request_id| self.requests.get(request_id))
    }
}

#[async_trait]
impl LessonRequestRepository for InMemoryLessonRequestRepository {
    async fn insert(&self, request: &LessonRequest) -> Result<(), InfraError> {
        let mut state = self.lock()?;
        if state.requests.contains_key(&request.id) {
            return Err(InfraError::InvalidConfig(format!(
                "duplicate lesson request id: {}",
                request.id
            )));
        }
        state.order.push(request.id.clone());
        state.requests.insert(request.id.clone(), request.clone());
        Ok(())
    }

    async fn get(&self, request_id: &str) -> Result<Option<LessonRequest>, InfraError> {
        Ok(self.lock()?.requests.get(request_id).cloned())
    }

    async fn list_by_group(&self, group_id: &str) -> Result<Vec<LessonRequest>, InfraError> {
        let state = self.lock()?;
        Ok(state
            .ordered()
            .filter(|request| request.request_group_id.as_deref() == Some(group_id))
            .cloned()
            .collect())
    }

    async fn list_for_tutor(
        &self,
        tutor_id: &str,
        status: Option<RequestStatus>,
    ) -> Result<Vec<LessonRequest>, InfraError> {
        let state = self.lock()?;
        let mut requests = state
            .ordered()
            .filter(|request| request.tutor_id == tutor_id)
            .filter(|request| status.is_none_or(|status| request.status == status))
            .cloned()
            .collect::<Vec<_>>();
        requests.sort_by(|left, right| right.created_at.cmp(&left.created_at));
        Ok(requests)
    }

    async fn update_status(&self, update: &StatusUpdate) -> Result<(), InfraError> {
        let mut state = self.lock()?;
        let Some(request) = state.requests.get_mut(&update.request_id) else {
            return Err(InfraError::NotFound(format!(
                "lesson request {}",
                update.request_id
            )));
        };
        request.status = update.status;
        request.tutor_response = update.tutor_response.clone();
        request.scheduled_lesson_id = update.scheduled_lesson_id.clone();
        Ok(())
    }

    async fn delete(&self, request_id: &str) -> Result<bool, InfraError> {
        let mut state = self.lock()?;
        if state.requests.remove(request_id).is_none() {
            return Ok(false);
        }
        state.order.retain(|candidate| candidate != request_id);
        Ok(true)
    }
}

#[derive(Debug, Clone)]
pub struct SqliteLessonRequestRepository {
    db_path: PathBuf,
}

impl SqliteLessonRequestRepository {
    pub fn new(db_path: impl AsRef<Path>) -> Self {
        Self {
            db_path: db_path.as_ref().to_path_buf(),
        }
    }

    fn query(&self, filter: &str, values: &[&dyn rusqlite::ToSql]) -> Result<Vec<LessonRequest>, InfraError> {
        let connection = connect(&self.db_path)?;
        let sql = format!("SELECT {COLUMNS} FROM {TABLE} WHERE {filter}");
        let mut statement = connection.prepare(&sql)?;
        let mut rows = statement.query(values)?;
        let mut requests = Vec::new();
        while let Some(row) = rows.next()? {
            requests.push(read_request(row)?);
        }
        Ok(requests)
    }
}

fn read_request(row: &Row<'_>) -> Result<LessonRequest, InfraError> {
    let id: String = row.get(0)?;
    let corrupt = |detail: String| corrupt_row(TABLE, &id, detail);

    let subject: String = row.get(5)?;
    let preferred_date: String = row.get(6)?;
    let preferred_time: Option<String> = row.get(7)?;
    let request_type: String = row.get(10)?;
    let original_lesson_id: Option<String> = row.get(11)?;
    let status: String = row.get(13)?;
    let created_at: String = row.get(16)?;

    let kind = match (request_type.as_str(), original_lesson_id) {
        ("dropin", _) => RequestKind::DropIn,
        ("reschedule", Some(original_lesson_id)) => RequestKind::Reschedule { original_lesson_id },
        (other, _) => return Err(corrupt(format!("unsupported request_type '{other}'"))),
    };

    Ok(LessonRequest {
        tutor_id: row.get(1)?,
        parent_id: row.get(2)?,
        student_id: row.get(3)?,
        student_name: row.get(4)?,
        subject: subject.parse::<Subject>().map_err(corrupt)?,
        preferred_date: NaiveDate::parse_from_str(&preferred_date, "%Y-%m-%d")
            .map_err(|error| corrupt(error.to_string()))?,
        preferred_time: preferred_time
            .map(|raw| parse_hhmm(&raw))
            .transpose()
            .map_err(|error| corrupt(error.to_string()))?,
        preferred_duration_minutes: row.get(8)?,
        notes: row.get(9)?,
        kind,
        request_group_id: row.get(12)?,
        status: status.parse::<RequestStatus>().map_err(corrupt)?,
        tutor_response: row.get(14)?,
        scheduled_lesson_id: row.get(15)?,
        created_at: DateTime::parse_from_rfc3339(&created_at)
            .map_err(|error| corrupt(error.to_string()))?
            .with_timezone(&Utc),
        id,
    })
}

#[async_trait]
impl LessonRequestRepository for SqliteLessonRequestRepository {
    async fn insert(&self, request: &LessonRequest) -> Result<(), InfraError> {
        let connection = connect(&self.db_path)?;
        connection.execute(
            &format!(
                "INSERT INTO {TABLE} ({COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)"
            ),
            params![
                request.id,
                request.tutor_id,
                request.parent_id,
                request.student_id,
                request.student_name,
                request.subject.as_str(),
                request.preferred_date.format("%Y-%m-%d").to_string(),
                request.preferred_time.map(format_hhmm),
                request.preferred_duration_minutes,
                request.notes,
                request.kind.as_str(),
                request.kind.original_lesson_id(),
                request.request_group_id,
                request.status.as_str(),
                request.tutor_response,
                request.scheduled_lesson_id,
                request.created_at.to_rfc3339_opts(SecondsFormat::Nanos, true),
            ],
        )?;
        Ok(())
    }

    async fn get(&self, request_id: &str) -> Result<Option<LessonRequest>, InfraError> {
        Ok(self.query("id = ?1", &[&request_id])?.into_iter().next())
    }

    async fn list_by_group(&self, group_id: &str) -> Result<Vec<LessonRequest>, InfraError> {
        self.query("request_group_id = ?1 ORDER BY rowid", &[&group_id])
    }

    async fn list_for_tutor(
        &self,
        tutor_id: &str,
        status: Option<RequestStatus>,
    ) -> Result<Vec<LessonRequest>, InfraError> {
        match status {
            Some(status) => self.query(
                "tutor_id = ?1 AND status = ?2 ORDER BY created_at DESC, rowid",
                &[&tutor_id, &status.as_str()],
            ),
            None => self.query("tutor_id = ?1 ORDER BY created_at DESC, rowid", &[&tutor_id]),
        }
    }

    async fn update_status(&self, update: &StatusUpdate) -> Result<(), InfraError> {
        let connection = connect(&self.db_path)?;
        let changed = connection.execute(
            &format!(
                "UPDATE {TABLE}
                 SET status = ?2, tutor_response = ?3, scheduled_lesson_id = ?4
                 WHERE id = ?1"
            ),
            params![
                update.request_id,
                update.status.as_str(),
                update.tutor_response,
                update.scheduled_lesson_id,
            ],
        )?;
        if changed == 0 {
            return Err(InfraError::NotFound(format!(
                "lesson request {}",
                update.request_id
            )));
        }
        Ok(())
    }

    async fn delete(&self, request_id: &str) -> Result<bool, InfraError> {
        let connection = connect(&self.db_path)?;
        let removed = connection.execute(&format!("DELETE FROM {TABLE} WHERE id = ?1"), params![request_id])?;
        Ok(removed > 0)
    }
}
