//! Pluggable persistence for published events.
//!
//! Stores see the type-erased [`StoredEvent`] so one store can back every
//! broker. They are called synchronously from `publish`, possibly from many
//! threads at once, and must tolerate concurrent `store` calls.

mod memory;
mod sqlite;

pub use memory::{DEFAULT_MEMORY_MAX_EVENTS, MemoryStore};
pub use sqlite::SqliteStore;

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::event::StoredEvent;
use crate::filter::EventFilter;

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Snapshot of what a store currently holds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PersistenceStats {
    pub total_events: u64,
    pub events_by_type: HashMap<String, u64>,
    pub oldest: Option<DateTime<Utc>>,
    pub newest: Option<DateTime<Utc>>,
}

/// Event store trait for persistence.
///
/// `limit == 0` means unlimited. Query results are the most recent `limit`
/// matches, returned oldest-first. The scoped queries are optional; stores
/// that cannot answer them keep the default `Unsupported` implementation.
pub trait PersistenceStore: Send + Sync {
    /// Persist one event. Storing an id twice overwrites the first copy.
    fn store(&self, event: &StoredEvent) -> StoreResult<()>;

    /// Events accepted by `filter`.
    fn retrieve(&self, filter: &EventFilter, limit: usize) -> StoreResult<Vec<StoredEvent>>;

    /// Remove one event by id.
    fn delete(&self, id: &str) -> StoreResult<()>;

    /// Delete events older than `older_than` (retention policy). Returns the
    /// number of events removed.
    fn cleanup(&self, older_than: Duration) -> StoreResult<u64>;

    fn events_for_session(
        &self,
        _session_id: &str,
        _since: DateTime<Utc>,
        _limit: usize,
    ) -> StoreResult<Vec<StoredEvent>> {
        Err(StoreError::Unsupported("session"))
    }

    fn events_for_user(
        &self,
        _user_id: &str,
        _since: DateTime<Utc>,
        _limit: usize,
    ) -> StoreResult<Vec<StoredEvent>> {
        Err(StoreError::Unsupported("user"))
    }

    fn events_by_type(
        &self,
        _event_type: &str,
        _since: DateTime<Utc>,
        _limit: usize,
    ) -> StoreResult<Vec<StoredEvent>> {
        Err(StoreError::Unsupported("type"))
    }

    fn stats(&self) -> StoreResult<PersistenceStats> {
        Err(StoreError::Unsupported("stats"))
    }
}

/// Cutoff instant for a retention window ending now.
pub(crate) fn cutoff(older_than: Duration) -> DateTime<Utc> {
    let window = chrono::Duration::from_std(older_than).unwrap_or(chrono::Duration::MAX);
    Utc::now()
        .checked_sub_signed(window)
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Keep the newest `limit` events (0 = all), oldest-first.
pub(crate) fn most_recent(mut events: Vec<StoredEvent>, limit: usize) -> Vec<StoredEvent> {
    events.sort_by_key(|e| e.timestamp);
    if limit > 0 && events.len() > limit {
        events.drain(..events.len() - limit);
    }
    events
}
