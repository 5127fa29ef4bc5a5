use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use herald_protocol::EventType;
use rusqlite::{Connection, OptionalExtension, Row, params};

use super::{PersistenceStats, PersistenceStore, StoreResult, cutoff, most_recent};
use crate::error::StoreError;
use crate::event::StoredEvent;
use crate::filter::EventFilter;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS events (
    id          TEXT PRIMARY KEY,
    type        TEXT NOT NULL,
    payload     TEXT NOT NULL,
    timestamp   INTEGER NOT NULL,
    session_id  TEXT,
    user_id     TEXT,
    metadata    TEXT,
    created_at  DATETIME DEFAULT CURRENT_TIMESTAMP
);

CREATE INDEX IF NOT EXISTS idx_events_type ON events(type);
CREATE INDEX IF NOT EXISTS idx_events_timestamp ON events(timestamp);
CREATE INDEX IF NOT EXISTS idx_events_session_id ON events(session_id);
CREATE INDEX IF NOT EXISTS idx_events_user_id ON events(user_id);
"#;

const SELECT_COLUMNS: &str =
    "SELECT id, type, payload, timestamp, session_id, user_id, metadata FROM events";

/// Flat row that maps directly to the `events` table.
#[derive(Debug, Clone)]
struct EventRow {
    id: String,
    event_type: String,
    payload: String,
    timestamp: i64,
    session_id: Option<String>,
    user_id: Option<String>,
    metadata: Option<String>,
}

impl EventRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            event_type: row.get(1)?,
            payload: row.get(2)?,
            timestamp: row.get(3)?,
            session_id: row.get(4)?,
            user_id: row.get(5)?,
            metadata: row.get(6)?,
        })
    }

    fn from_event(event: &StoredEvent) -> StoreResult<Self> {
        let metadata = if event.metadata.is_empty() {
            None
        } else {
            Some(serde_json::to_string(&event.metadata)?)
        };
        Ok(Self {
            id: event.id.clone(),
            event_type: event.event_type.to_string(),
            payload: serde_json::to_string(&event.payload)?,
            timestamp: event.timestamp.timestamp(),
            session_id: event.session_id.clone(),
            user_id: event.user_id.clone(),
            metadata,
        })
    }

    fn into_event(self) -> StoreResult<StoredEvent> {
        let metadata = match self.metadata {
            Some(json) => serde_json::from_str(&json)?,
            None => HashMap::new(),
        };
        Ok(StoredEvent {
            id: self.id,
            event_type: EventType::parse(&self.event_type),
            payload: serde_json::from_str(&self.payload)?,
            metadata,
            timestamp: DateTime::from_timestamp(self.timestamp, 0).unwrap_or_default(),
            session_id: self.session_id,
            user_id: self.user_id,
        })
    }
}

/// SQLite-backed store using the durable `events` table format.
///
/// Timestamps are stored as unix seconds, so events read back lose their
/// sub-second precision.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) a database file at `path`, enable WAL mode, and create the schema.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> StoreResult<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> StoreResult<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run a scoped query with the predicate pushed into SQL.
    fn query_scoped(
        &self,
        column: &str,
        value: &str,
        since: DateTime<Utc>,
        limit: usize,
    ) -> StoreResult<Vec<StoredEvent>> {
        let sql = format!(
            "{SELECT_COLUMNS} WHERE {column} = ?1 AND timestamp >= ?2 \
             ORDER BY timestamp DESC, rowid DESC LIMIT ?3"
        );
        let limit = if limit == 0 { -1 } else { limit as i64 };

        let rows = {
            let conn = self.conn();
            let mut stmt = conn.prepare_cached(&sql)?;
            let rows = stmt
                .query_map(params![value, since_secs(since), limit], EventRow::from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        };

        let mut events = rows
            .into_iter()
            .map(EventRow::into_event)
            .collect::<StoreResult<Vec<_>>>()?;
        events.reverse();
        Ok(events)
    }
}

/// Whole-second lower bound for `since`, rounded up.
///
/// Stored timestamps are truncated to seconds, so rounding down would admit
/// events older than `since`.
fn since_secs(since: DateTime<Utc>) -> i64 {
    since.timestamp() + i64::from(since.timestamp_subsec_nanos() > 0)
}

impl PersistenceStore for SqliteStore {
    fn store(&self, event: &StoredEvent) -> StoreResult<()> {
        let row = EventRow::from_event(event)?;
        self.conn().execute(
            "INSERT OR REPLACE INTO events (id, type, payload, timestamp, session_id, user_id, metadata)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                row.id,
                row.event_type,
                row.payload,
                row.timestamp,
                row.session_id,
                row.user_id,
                row.metadata,
            ],
        )?;
        Ok(())
    }

    fn retrieve(&self, filter: &EventFilter, limit: usize) -> StoreResult<Vec<StoredEvent>> {
        let rows = {
            let conn = self.conn();
            let mut stmt =
                conn.prepare_cached(&format!("{SELECT_COLUMNS} ORDER BY timestamp ASC, rowid ASC"))?;
            let rows = stmt
                .query_map([], EventRow::from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        };

        let mut matched = Vec::new();
        for row in rows {
            let event = row.into_event()?;
            if filter.matches(&event) {
                matched.push(event);
            }
        }
        Ok(most_recent(matched, limit))
    }

    fn delete(&self, id: &str) -> StoreResult<()> {
        let deleted = self
            .conn()
            .execute("DELETE FROM events WHERE id = ?1", params![id])?;
        if deleted == 0 {
            return Err(StoreError::NotFound(id.to_string()));
        }
        Ok(())
    }

    fn cleanup(&self, older_than: Duration) -> StoreResult<u64> {
        let cutoff = cutoff(older_than).timestamp();
        let deleted = self
            .conn()
            .execute("DELETE FROM events WHERE timestamp < ?1", params![cutoff])?;
        Ok(deleted as u64)
    }

    fn events_for_session(
        &self,
        session_id: &str,
        since: DateTime<Utc>,
        limit: usize,
    ) -> StoreResult<Vec<StoredEvent>> {
        self.query_scoped("session_id", session_id, since, limit)
    }

    fn events_for_user(
        &self,
        user_id: &str,
        since: DateTime<Utc>,
        limit: usize,
    ) -> StoreResult<Vec<StoredEvent>> {
        self.query_scoped("user_id", user_id, since, limit)
    }

    fn events_by_type(
        &self,
        event_type: &str,
        since: DateTime<Utc>,
        limit: usize,
    ) -> StoreResult<Vec<StoredEvent>> {
        self.query_scoped("type", event_type, since, limit)
    }

    fn stats(&self) -> StoreResult<PersistenceStats> {
        let conn = self.conn();

        let (total, oldest, newest): (i64, Option<i64>, Option<i64>) = conn.query_row(
            "SELECT COUNT(*), MIN(timestamp), MAX(timestamp) FROM events",
            [],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )?;

        let mut stmt = conn.prepare_cached("SELECT type, COUNT(*) FROM events GROUP BY type")?;
        let events_by_type = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as u64)))?
            .collect::<Result<HashMap<_, _>, _>>()?;

        Ok(PersistenceStats {
            total_events: total as u64,
            events_by_type,
            oldest: oldest.and_then(|t| DateTime::from_timestamp(t, 0)),
            newest: newest.and_then(|t| DateTime::from_timestamp(t, 0)),
        })
    }
}

impl SqliteStore {
    /// Fetch a single event by id.
    pub fn get(&self, id: &str) -> StoreResult<Option<StoredEvent>> {
        let row = self
            .conn()
            .query_row(
                &format!("{SELECT_COLUMNS} WHERE id = ?1"),
                params![id],
                EventRow::from_row,
            )
            .optional()?;
        row.map(EventRow::into_event).transpose()
    }
}
