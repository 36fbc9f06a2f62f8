use crate::infrastructure::error::InfraError;
use rusqlite::Connection;
use std::path::Path;

const SCHEMA_SQL: &str = include_str!("../../sql/schema.sql");

pub fn initialize_database(path: &Path) -> Result<(), InfraError> {
    let connection = connect(path)?;
    connection.execute_batch(SCHEMA_SQL)?;
    Ok(())
}

pub fn connect(path: &Path) -> Result<Connection, InfraError> {
    Connection::open(path).map_err(InfraError::from)
}

/// Maps a stored value that no longer parses into a storage error.
pub(crate) fn corrupt_row(table: &str, id: &str, detail: impl std::fmt::Display) -> InfraError {
    InfraError::InvalidConfig(format!("invalid {table} row '{id}': {detail}"))
}


#[cfg(test)]
mod tests {
    use super::test_support::TempDatabase;
    use super::*;

    #[test]
    fn schema_applies_twice() {
        let database = TempDatabase::new();
        initialize_database(database.path()).expect("second init");

        let connection = connect(database.path()).expect("connect");
        let tables: i64 = connection
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name IN
                 ('availability_slots', 'break_slots', 'lesson_requests', 'scheduled_lessons', 'notifications')",
                [],
                |row| row.get(0),
            )
            .expect("count tables");
        assert_eq!(tables, 5);
    }
}
