pub mod attachments;
pub mod chats;
pub mod messages;
pub mod migrations;
pub mod notifications;
pub mod pinned;
pub mod repo;

use std::path::Path;
use std::sync::Mutex;

use rusqlite::{Connection, ErrorCode};
use tracing::info;

use murmur_types::{Error, Result};

pub use repo::{
    AttachmentRepository, ChatRepository, MessageRepository, NotificationRepository,
    PinnedRepository, Repositories,
};

pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        let conn = Connection::open(path)?;

        // WAL mode for concurrent reads
        conn.pragma_update(None, "journal_mode", "WAL")?;
        let db = Self::init(conn)?;

        info!("Database opened at {}", path.display());
        Ok(db)
    }

    /// Private in-memory database, used by tests and throwaway tooling.
    pub fn open_in_memory() -> anyhow::Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> anyhow::Result<Self> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        migrations::run(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> rusqlite::Result<T>,
    {
        let conn = self
            .conn
            .lock()
            .map_err(|e| Error::Internal(format!("DB lock poisoned: {}", e)))?;
        f(&conn).map_err(map_sql_error)
    }

    pub fn with_conn_mut<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> rusqlite::Result<T>,
    {
        let mut conn = self
            .conn
            .lock()
            .map_err(|e| Error::Internal(format!("DB lock poisoned: {}", e)))?;
        f(&mut conn).map_err(map_sql_error)
    }
}

/// Maps SQLite failures onto the shared error taxonomy.
pub fn map_sql_error(e: rusqlite::Error) -> Error {
    match &e {
        rusqlite::Error::QueryReturnedNoRows => Error::NotFound("no rows".into()),
        rusqlite::Error::SqliteFailure(failure, _) => match failure.code {
            ErrorCode::ConstraintViolation => Error::Conflict(e.to_string()),
            ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked => {
                Error::UpstreamTransient(format!("database busy: {}", e))
            }
            _ => Error::Internal(e.to_string()),
        },
        _ => Error::Internal(e.to_string()),
    }
}

/// Converts a TEXT enum column that failed to parse into a rusqlite conversion error.
pub(crate) fn bad_column(idx: usize, value: &str) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        idx,
        rusqlite::types::Type::Text,
        format!("unexpected value '{}'", value).into(),
    )
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_row_maps_to_not_found() {
        let db = Database::open_in_memory().unwrap();
        let r = db.with_conn(|conn| {
            conn.query_row("SELECT id FROM chats WHERE id = 42", [], |row| row.get::<_, i64>(0))
        });
        assert!(matches!(r, Err(Error::NotFound(_))));
    }

    #[test]
    fn foreign_key_violation_maps_to_conflict() {
        let db = Database::open_in_memory().unwrap();
        let r = db.with_conn(|conn| {
            conn.execute("INSERT INTO message_files (message_id, file_id) VALUES (1, 1)", [])
        });
        assert!(matches!(r, Err(Error::Conflict(_))));
    }
}
