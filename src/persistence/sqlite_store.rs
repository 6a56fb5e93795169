//! SQLite implementation of the EventStore trait

use super::{Comparator, EventStore, PersistenceError};
use crate::models::{GeoLocation, StoredLogin};
use rusqlite::{params, Connection, Row};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

const LOGIN_COLUMNS: &str =
    "username, unix_timestamp, event_uuid, ip_address, lat, lon, radius, speed";

/// SQLite-based login event storage
///
/// Holds exactly one connection, so concurrent callers serialize on it.
pub struct SqliteEventStore {
    conn: Mutex<Connection>,
}

impl SqliteEventStore {
    /// Open (or create) a store at the specified path
    ///
    /// Creates the database file and initializes the schema if it doesn't exist.
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self, PersistenceError> {
        let conn = Connection::open(db_path)?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| {
            row.get::<_, String>(0)
        })?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        Self::with_connection(conn)
    }

    /// Create an in-memory SQLite database (useful for testing)
    pub fn in_memory() -> Result<Self, PersistenceError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, PersistenceError> {
        conn.execute_batch(include_str!("schema.sql"))?;
        Ok(SqliteEventStore {
            conn: Mutex::new(conn),
        })
    }

    fn connection(&self) -> Result<MutexGuard<'_, Connection>, PersistenceError> {
        self.conn.lock().map_err(|_| PersistenceError::LockPoisoned)
    }

    fn read_login(row: &Row<'_>) -> rusqlite::Result<StoredLogin> {
        Ok(StoredLogin {
            user: row.get(0)?,
            timestamp: row.get(1)?,
            event_id: row.get(2)?,
            ip: row.get(3)?,
            location: GeoLocation {
                latitude: row.get(4)?,
                longitude: row.get(5)?,
                accuracy_radius: row.get(6)?,
            },
            speed: row.get(7)?,
        })
    }
}

impl EventStore for SqliteEventStore {
    fn query_events(
        &self,
        user: &str,
        comparator: Comparator,
        timestamp: i64,
    ) -> Result<Vec<StoredLogin>, PersistenceError> {
        let conn = self.connection()?;
        let sql = format!(
            "SELECT {} FROM logins WHERE username = ? AND unix_timestamp {} ? ORDER BY id",
            LOGIN_COLUMNS,
            comparator.as_sql()
        );
        let mut stmt = conn.prepare_cached(&sql)?;

        let events = stmt
            .query_map(params![user, timestamp], Self::read_login)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(events)
    }

    fn insert_event(&self, event: &StoredLogin) -> Result<(), PersistenceError> {
        if event.user.is_empty() {
            return Err(PersistenceError::InvalidData(
                "login event without a username".to_string(),
            ));
        }

        let conn = self.connection()?;
        conn.execute(
            "INSERT INTO logins
             (username, unix_timestamp, event_uuid, ip_address, lat, lon, radius, speed)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                event.user,
                event.timestamp,
                event.event_id,
                event.ip,
                event.location.latitude,
                event.location.longitude,
                event.location.accuracy_radius,
                event.speed
            ],
        )?;
        Ok(())
    }

    fn events_for_user(
        &self,
        user: &str,
        limit: usize,
    ) -> Result<Vec<StoredLogin>, PersistenceError> {
        let conn = self.connection()?;
        let sql = format!(
            "SELECT {} FROM logins WHERE username = ?
             ORDER BY unix_timestamp DESC, id DESC LIMIT ?",
            LOGIN_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;

        let events = stmt
            .query_map(params![user, limit], Self::read_login)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(events)
    }

    fn ping(&self) -> Result<(), PersistenceError> {
        let conn = self.connection()?;
        conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?;
        Ok(())
    }
}
