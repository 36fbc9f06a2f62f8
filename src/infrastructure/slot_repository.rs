use crate::domain::models::ScheduleSlot;
use crate::domain::time_window::{TimeWindow, WindowAnchor, format_hhmm, parse_hhmm};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::storage::{connect, corrupt_row};
use async_trait::async_trait;
use chrono::NaiveDate;
use rusqlite::{Row, params};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Which schedule table a repository instance reads and writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotTable {
    Availability,
    Breaks,
}

impl SlotTable {
    fn table_name(self) -> &'static str {
        match self {
            Self::Availability => "availability_slots",
            Self::Breaks => "break_slots",
        }
    }
}

#[async_trait]
pub trait SlotRepository: Send + Sync {
    async fn get(&self, slot_id: &str) -> Result<Option<ScheduleSlot>, InfraError>;
    async fn upsert(&self, slot: &ScheduleSlot) -> Result<(), InfraError>;
    async fn remove(&self, slot_id: &str) -> Result<bool, InfraError>;
    async fn list_for_tutor(&self, tutor_id: &str) -> Result<Vec<ScheduleSlot>, InfraError>;
}

#[derive(Debug, Default)]
pub struct InMemorySlotRepository {
    slots: Mutex<HashMap<String, ScheduleSlot>>,
}

impl InMemorySlotRepository {
    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, ScheduleSlot>>, InfraError> {
        self.slots
            .lock()
            .map_err(|error| InfraError::InvalidConfig(format!("slot store lock poisoned: {error}")))
    }
}

#[async_trait]
impl SlotRepository for InMemorySlotRepository {
    async fn get(&self, slot_id: &str) -> Result<Option<ScheduleSlot>, InfraError> {
        Ok(self.lock()?.get(slot_id).cloned())
    }

    async fn upsert(&self, slot: &ScheduleSlot) -> Result<(), InfraError> {
        self.lock()?.insert(slot.id.clone(), slot.clone());
        Ok(())
    }

    async fn remove(&self, slot_id: &str) -> Result<bool, InfraError> {
        Ok(self.lock()?.remove(slot_id).is_some())
    }

    async fn list_for_tutor(&self, tutor_id: &str) -> Result<Vec<ScheduleSlot>, InfraError> {
        let mut slots = self
            .lock()?
            .values()
            .filter(|slot| slot.tutor_id == tutor_id)
            .cloned()
            .collect::<Vec<_>>();
        slots.sort_by(|left, right| left.window.cmp(&right.window).then_with(|| left.id.cmp(&right.id)));
        Ok(slots)
    }
}

#[derive(Debug, Clone)]
pub struct SqliteSlotRepository {
    db_path: PathBuf,
    table: SlotTable,
}

impl SqliteSlotRepository {
    pub fn new(db_path: impl AsRef<Path>, table: SlotTable) -> Self {
        Self {
            db_path: db_path.as_ref().to_path_buf(),
            table,
        }
    }

    fn read_row(&self, row: &Row<'_>) -> Result<ScheduleSlot, InfraError> {
        let table = self.table.table_name();
        let id: String = row.get(0)?;
        let tutor_id: String = row.get(1)?;
        let day_of_week: Option<u8> = row.get(2)?;
        let specific_date: Option<String> = row.get(3)?;
        let start_time: String = row.get(4)?;
        let end_time: String = row.get(5)?;
        let notes: Option<String> = row.get(6)?;

        let specific_date = specific_date
            .map(|raw| NaiveDate::parse_from_str(&raw, "%Y-%m-%d"))
            .transpose()
            .map_err(|error| corrupt_row(table, &id, error))?;
        let start = parse_hhmm(&start_time).map_err(|error| corrupt_row(table, &id, error))?;
        let end = parse_hhmm(&end_time).map_err(|error| corrupt_row(table, &id, error))?;
        let window = TimeWindow::from_parts(day_of_week, specific_date, start, end)
            .map_err(|error| corrupt_row(table, &id, error))?;

        Ok(ScheduleSlot {
            id,
            tutor_id,
            window,
            notes,
        })
    }
}

#[async_trait]
impl SlotRepository for SqliteSlotRepository {
    async fn get(&self, slot_id: &str) -> Result<Option<ScheduleSlot>, InfraError> {
        let connection = connect(&self.db_path)?;
        let sql = format!(
            "SELECT id, tutor_id, day_of_week, specific_date, start_time, end_time, notes
             FROM {} WHERE id = ?1",
            self.table.table_name()
        );
        let mut statement = connection.prepare(&sql)?;
        let mut rows = statement.query(params![slot_id])?;
        let Some(row) = rows.next()? else {
            return Ok(None);
        };
        self.read_row(row).map(Some)
    }

    async fn upsert(&self, slot: &ScheduleSlot) -> Result<(), InfraError> {
        let connection = connect(&self.db_path)?;
        let (day_of_week, specific_date) = match slot.window.anchor() {
            WindowAnchor::Weekly(day) => (Some(day.index()), None),
            WindowAnchor::Date(date) => (None, Some(date.format("%Y-%m-%d").to_string())),
        };
        let sql = format!(
            "INSERT INTO {} (id, tutor_id, day_of_week, specific_date, start_time, end_time, notes)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(id) DO UPDATE SET
               tutor_id = excluded.tutor_id,
               day_of_week = excluded.day_of_week,
               specific_date = excluded.specific_date,
               start_time = excluded.start_time,
               end_time = excluded.end_time,
               notes = excluded.notes",
            self.table.table_name()
        );
        connection.execute(
            &sql,
            params![
                slot.id,
                slot.tutor_id,
                day_of_week,
                specific_date,
                format_hhmm(slot.window.start_minute()),
                format_hhmm(slot.window.end_minute()),
                slot.notes,
            ],
        )?;
        Ok(())
    }

    async fn remove(&self, slot_id: &str) -> Result<bool, InfraError> {
        let connection = connect(&self.db_path)?;
        let sql = format!("DELETE FROM {} WHERE id = ?1", self.table.table_name());
        let removed = connection.execute(&sql, params![slot_id])?;
        Ok(removed > 0)
    }

    async fn list_for_tutor(&self, tutor_id: &str) -> Result<Vec<ScheduleSlot>, InfraError> {
        let connection = connect(&self.db_path)?;
        let sql = format!(
            "SELECT id, tutor_id, day_of_week, specific_date, start_time, end_time, notes
             FROM {} WHERE tutor_id = ?1
             ORDER BY day_of_week IS NULL, day_of_week, specific_date, start_time, end_time, id",
            self.table.table_name()
        );
        let mut statement = connection.prepare(&sql)?;
        let mut rows = statement.query(params![tutor_id])?;
        let mut slots = Vec::new();
        while let Some(row) = rows.next()? {
            slots.push(self.read_row(row)?);
        }
        Ok(slots)
    }
}

#[cfg(test)]
fn count_rows(db_path: &Path, table: SlotTable) -> Result<i64, InfraError> {
    let connection = connect(db_path)?;
    let sql = format!("SELECT COUNT(*) FROM {}", table.table_name());
    Ok(connection.query_row(&sql, [], |row| row.get(0))?)
}
