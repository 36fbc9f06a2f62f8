use crate::domain::models::{ScheduledLesson, Subject};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::storage::{connect, corrupt_row};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Row, params};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

#[async_trait]
pub trait LessonRepository: Send + Sync {
    async fn create(&self, lesson: &ScheduledLesson) -> Result<(), InfraError>;
    async fn get(&self, lesson_id: &str) -> Result<Option<ScheduledLesson>, InfraError>;
    async fn delete(&self, lesson_id: &str) -> Result<bool, InfraError>;
    async fn list_for_tutor(&self, tutor_id: &str) -> Result<Vec<ScheduledLesson>, InfraError>;
}

#[derive(Debug, Default)]
pub struct InMemoryLessonRepository {
    lessons: Mutex<HashMap<String, ScheduledLesson>>,
}

impl InMemoryLessonRepository {
    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, ScheduledLesson>>, InfraError> {
        self.lessons
            .lock()
            .map_err(|error| InfraError::InvalidConfig(format!("lesson store lock poisoned: {error}")))
    }
}

#[async_trait]
impl LessonRepository for InMemoryLessonRepository {
    async fn create(&self, lesson: &ScheduledLesson) -> Result<(), InfraError> {
        let mut lessons = self.lock()?;
        if lessons.contains_key(&lesson.id) {
            return Err(InfraError::InvalidConfig(format!(
                "duplicate lesson id: {}",
                lesson.id
            )));
        }
        lessons.insert(lesson.id.clone(), lesson.clone());
        Ok(())
    }

    async fn get(&self, lesson_id: &str) -> Result<Option<ScheduledLesson>, InfraError> {
        Ok(self.lock()?.get(lesson_id).cloned())
    }

    async fn delete(&self, lesson_id: &str) -> Result<bool, InfraError> {
        Ok(self.lock()?.remove(lesson_id).is_some())
    }

    async fn list_for_tutor(&self, tutor_id: &str) -> Result<Vec<ScheduledLesson>, InfraError> {
        let mut lessons = self
            .lock()?
            .values()
            .filter(|lesson| lesson.tutor_id == tutor_id)
            .cloned()
            .collect::<Vec<_>>();
        lessons.sort_by(|left, right| {
            left.scheduled_at
                .cmp(&right.scheduled_at)
                .then_with(|| left.id.cmp(&right.id))
        });
        Ok(lessons)
    }
}

#[derive(Debug, Clone)]
pub struct SqliteLessonRepository {
    db_path: PathBuf,
}

impl SqliteLessonRepository {
    pub fn new(db_path: impl AsRef<Path>) -> Self {
        Self {
            db_path: db_path.as_ref().to_path_buf(),
        }
    }
}

fn read_lesson(row: &Row<'_>) -> Result<ScheduledLesson, InfraError> {
    let id: String = row.get(0)?;
    let subject: String = row.get(4)?;
    let scheduled_at: String = row.get(5)?;

    Ok(ScheduledLesson {
        tutor_id: row.get(1)?,
        parent_id: row.get(2)?,
        student_id: row.get(3)?,
        subject: subject
            .parse::<Subject>()
            .map_err(|error| corrupt_row("scheduled_lessons", &id, error))?,
        scheduled_at: DateTime::parse_from_rfc3339(&scheduled_at)
            .map_err(|error| corrupt_row("scheduled_lessons", &id, error))?
            .with_timezone(&Utc),
        duration_minutes: row.get(6)?,
        session_group_id: row.get(7)?,
        source_request_id: row.get(8)?,
        notes: row.get(9)?,
        id,
    })
}

#[async_trait]
impl LessonRepository for SqliteLessonRepository {
    async fn create(&self, lesson: &ScheduledLesson) -> Result<(), InfraError> {
        let connection = connect(&self.db_path)?;
        connection.execute(
            "INSERT INTO scheduled_lessons
               (id, tutor_id, parent_id, student_id, subject, scheduled_at, duration_minutes,
                session_group_id, source_request_id, notes)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                lesson.id,
                lesson.tutor_id,
                lesson.parent_id,
                lesson.student_id,
                lesson.subject.as_str(),
                lesson.scheduled_at.to_rfc3339_opts(SecondsFormat::Secs, true),
                lesson.duration_minutes,
                lesson.session_group_id,
                lesson.source_request_id,
                lesson.notes,
            ],
        )?;
        Ok(())
    }

    async fn get(&self, lesson_id: &str) -> Result<Option<ScheduledLesson>, InfraError> {
        let connection = connect(&self.db_path)?;
        let mut statement = connection.prepare(
            "SELECT id, tutor_id, parent_id, student_id, subject, scheduled_at, duration_minutes,
                    session_group_id, source_request_id, notes
             FROM scheduled_lessons WHERE id = ?1",
        )?;
        let mut rows = statement.query(params![lesson_id])?;
        let Some(row) = rows.next()? else {
            return Ok(None);
        };
        read_lesson(row).map(Some)
    }

    async fn delete(&self, lesson_id: &str) -> Result<bool, InfraError> {
        let connection = connect(&self.db_path)?;
        let removed = connection.execute(
            "DELETE FROM scheduled_lessons WHERE id = ?1",
            params![lesson_id],
        )?;
        Ok(removed > 0)
    }

    async fn list_for_tutor(&self, tutor_id: &str) -> Result<Vec<ScheduledLesson>, InfraError> {
        let connection = connect(&self.db_path)?;
        let mut statement = connection.prepare(
            "SELECT id, tutor_id, parent_id, student_id, subject, scheduled_at, duration_minutes,
                    session_group_id, source_request_id, notes
             FROM scheduled_lessons WHERE tutor_id = ?1
             ORDER BY scheduled_at, id",
        )?;
        let mut rows = statement.query(params![tutor_id])?;
        let mut lessons = Vec::new();
        while let Some(row) = rows.next()? {
            lessons.push(read_lesson(row)?);
        }
        Ok(lessons)
    }
}
