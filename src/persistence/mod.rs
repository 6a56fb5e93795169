//! Persistence module for login events
//!
//! This module provides the event store the detection pipeline reads
//! neighboring logins from and records new logins into.

pub mod sqlite_store;

pub use sqlite_store::SqliteEventStore;

use crate::models::StoredLogin;
use std::fmt;
use thiserror::Error;

/// Errors that can occur during persistence operations
#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Invalid data in database: {0}")]
    InvalidData(String),

    #[error("Database connection lock poisoned")]
    LockPoisoned,

    #[error("Store task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Direction of a timestamp filter, relative to a reference timestamp
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparator {
    /// Strictly before the reference
    Less,
    /// Strictly after the reference
    Greater,
}

impl Comparator {
    pub fn as_sql(self) -> &'static str {
        match self {
            Comparator::Less => "<",
            Comparator::Greater => ">",
        }
    }
}

impl fmt::Display for Comparator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_sql())
    }
}

/// Trait for login event storage backends
///
/// Calls may block; async callers should run them on the blocking pool.
pub trait EventStore: Send + Sync {
    /// All events for `user` whose timestamp compares against `timestamp`
    ///
    /// Events are returned in insertion order.
    fn query_events(
        &self,
        user: &str,
        comparator: Comparator,
        timestamp: i64,
    ) -> Result<Vec<StoredLogin>, PersistenceError>;

    /// Record a login
    fn insert_event(&self, event: &StoredLogin) -> Result<(), PersistenceError>;

    /// Most recent events for `user`, newest first
    fn events_for_user(
        &self,
        user: &str,
        limit: usize,
    ) -> Result<Vec<StoredLogin>, PersistenceError>;

    /// Verify the backend is reachable
    fn ping(&self) -> Result<(), PersistenceError>;
}
