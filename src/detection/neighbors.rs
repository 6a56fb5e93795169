//! Closest preceding and subsequent logins for a user
//!
//! Both sides are queried concurrently and joined; a failure on either side
//! fails the whole search with every collected error attached.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::task::JoinHandle;

use crate::models::StoredLogin;
use crate::persistence::{Comparator, EventStore, PersistenceError};

/// Which neighbor a query looks for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Preceding,
    Subsequent,
}

impl Side {
    fn comparator(self) -> Comparator {
        match self {
            Side::Preceding => Comparator::Less,
            Side::Subsequent => Comparator::Greater,
        }
    }

    /// Pick the candidate closest in time
    ///
    /// Candidates arrive in store order; on equal timestamps the later
    /// candidate wins, so ties go to the most recently stored event.
    fn select(self, candidates: Vec<StoredLogin>) -> Option<StoredLogin> {
        candidates.into_iter().reduce(|best, next| {
            let closer_or_equal = match self {
                Side::Preceding => next.timestamp >= best.timestamp,
                Side::Subsequent => next.timestamp <= best.timestamp,
            };
            if closer_or_equal {
                next
            } else {
                best
            }
        })
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Preceding => f.write_str("preceding"),
            Side::Subsequent => f.write_str("subsequent"),
        }
    }
}

/// A failed query for one side of the search
#[derive(Error, Debug)]
#[error("{side} login query failed: {source}")]
pub struct SideFailure {
    pub side: Side,
    #[source]
    pub source: PersistenceError,
}

/// Every side that failed during one search
#[derive(Debug)]
pub struct NeighborSearchError {
    pub failures: Vec<SideFailure>,
}

impl NeighborSearchError {
    pub fn failed_sides(&self) -> impl Iterator<Item = Side> + '_ {
        self.failures.iter().map(|f| f.side)
    }
}

impl fmt::Display for NeighborSearchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let messages: Vec<String> = self.failures.iter().map(ToString::to_string).collect();
        f.write_str(&messages.join("\n"))
    }
}

impl std::error::Error for NeighborSearchError {}

/// Nearest logins on either side of a timestamp
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Neighbors {
    pub preceding: Option<StoredLogin>,
    pub subsequent: Option<StoredLogin>,
}

/// Finds the nearest stored logins around a new one
#[derive(Clone)]
pub struct NeighborSearch {
    store: Arc<dyn EventStore>,
}

impl NeighborSearch {
    pub fn new(store: Arc<dyn EventStore>) -> Self {
        NeighborSearch { store }
    }

    /// Query both sides concurrently and wait for both
    pub async fn find_neighbors(
        &self,
        user: &str,
        timestamp: i64,
    ) -> Result<Neighbors, NeighborSearchError> {
        let preceding = self.spawn_query(Side::Preceding, user, timestamp);
        let subsequent = self.spawn_query(Side::Subsequent, user, timestamp);
        let (preceding, subsequent) = tokio::join!(preceding, subsequent);

        let mut failures = Vec::new();
        let preceding = Self::collect(Side::Preceding, preceding, &mut failures);
        let subsequent = Self::collect(Side::Subsequent, subsequent, &mut failures);

        if !failures.is_empty() {
            return Err(NeighborSearchError { failures });
        }

        log::debug!(
            "Neighbors for {} at {}: preceding={:?} subsequent={:?}",
            user,
            timestamp,
            preceding.as_ref().map(|e| e.timestamp),
            subsequent.as_ref().map(|e| e.timestamp)
        );

        Ok(Neighbors {
            preceding,
            subsequent,
        })
    }

    fn spawn_query(
        &self,
        side: Side,
        user: &str,
        timestamp: i64,
    ) -> JoinHandle<Result<Option<StoredLogin>, PersistenceError>> {
        let store = Arc::clone(&self.store);
        let user = user.to_string();
        tokio::task::spawn_blocking(move || {
            let candidates = store.query_events(&user, side.comparator(), timestamp)?;
            Ok(side.select(candidates))
        })
    }

    fn collect(
        side: Side,
        joined: Result<Result<Option<StoredLogin>, PersistenceError>, tokio::task::JoinError>,
        failures: &mut Vec<SideFailure>,
    ) -> Option<StoredLogin> {
        match joined.map_err(PersistenceError::from).and_then(|r| r) {
            Ok(found) => found,
            Err(source) => {
                log::warn!("{} login query failed: {}", side, source);
                failures.push(SideFailure { side, source });
                None
            }
        }
    }
}
