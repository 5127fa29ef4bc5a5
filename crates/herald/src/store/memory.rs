use std::collections::{HashSet, VecDeque};
use std::sync::{PoisonError, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};

use super::{PersistenceStats, PersistenceStore, StoreResult, cutoff, most_recent};
use crate::error::StoreError;
use crate::event::StoredEvent;
use crate::filter::EventFilter;
use crate::options::TTL_METADATA_KEY;

pub const DEFAULT_MEMORY_MAX_EVENTS: usize = 10_000;

/// Bounded in-memory store.
///
/// Oldest events are evicted first once `max_events` is reached. Lookups are
/// linear scans. Events carrying a TTL are hidden after they expire and
/// dropped on the next `cleanup`.
pub struct MemoryStore {
    events: RwLock<Events>,
    max_events: usize,
}

struct Entry {
    /// Insertion order, used to restore FIFO order after a swap delete.
    seq: u64,
    event: StoredEvent,
}

#[derive(Default)]
struct Events {
    entries: VecDeque<Entry>,
    ids: HashSet<String>,
    next_seq: u64,
    /// False once a swap delete has moved an entry out of insertion order.
    disordered: bool,
}

impl Events {
    fn evict_oldest(&mut self) {
        if self.disordered {
            self.entries.make_contiguous().sort_by_key(|e| e.seq);
            self.disordered = false;
        }
        if let Some(evicted) = self.entries.pop_front() {
            self.ids.remove(&evicted.event.id);
        }
    }
}

impl MemoryStore {
    pub fn new(max_events: usize) -> Self {
        let max_events = max_events.max(1);
        Self {
            events: RwLock::new(Events {
                entries: VecDeque::with_capacity(max_events.min(1024)),
                ..Default::default()
            }),
            max_events,
        }
    }

    pub fn len(&self) -> usize {
        self.events
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .entries
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn scan(&self, limit: usize, pred: impl Fn(&StoredEvent) -> bool) -> Vec<StoredEvent> {
        let now = Utc::now();
        let events = self.events.read().unwrap_or_else(PoisonError::into_inner);
        let matched = events
            .entries
            .iter()
            .map(|e| &e.event)
            .filter(|e| !is_expired(e, now) && pred(e))
            .cloned()
            .collect();
        most_recent(matched, limit)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(DEFAULT_MEMORY_MAX_EVENTS)
    }
}

fn is_expired(event: &StoredEvent, now: DateTime<Utc>) -> bool {
    let Some(ttl) = event.metadata.get(TTL_METADATA_KEY).and_then(|v| v.as_i64()) else {
        return false;
    };
    chrono::Duration::try_seconds(ttl)
        .and_then(|ttl| event.timestamp.checked_add_signed(ttl))
        .is_some_and(|expires_at| expires_at <= now)
}

impl PersistenceStore for MemoryStore {
    fn store(&self, event: &StoredEvent) -> StoreResult<()> {
        let mut events = self.events.write().unwrap_or_else(PoisonError::into_inner);

        if events.ids.contains(&event.id) {
            if let Some(existing) = events.entries.iter_mut().find(|e| e.event.id == event.id) {
                existing.event = event.clone();
            }
            return Ok(());
        }

        while events.entries.len() >= self.max_events {
            events.evict_oldest();
        }

        let seq = events.next_seq;
        events.next_seq += 1;
        events.ids.insert(event.id.clone());
        events.entries.push_back(Entry {
            seq,
            event: event.clone(),
        });
        Ok(())
    }

    fn retrieve(&self, filter: &EventFilter, limit: usize) -> StoreResult<Vec<StoredEvent>> {
        Ok(self.scan(limit, |e| filter.matches(e)))
    }

    fn delete(&self, id: &str) -> StoreResult<()> {
        let mut events = self.events.write().unwrap_or_else(PoisonError::into_inner);
        let index = events
            .entries
            .iter()
            .position(|e| e.event.id == id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;

        // Queries sort by timestamp; eviction restores order from `seq`.
        let last = events.entries.len() - 1;
        events.entries.swap_remove_back(index);
        if index != last {
            events.disordered = true;
        }
        events.ids.remove(id);
        Ok(())
    }

    fn cleanup(&self, older_than: Duration) -> StoreResult<u64> {
        let cutoff = cutoff(older_than);
        let now = Utc::now();
        let mut guard = self.events.write().unwrap_or_else(PoisonError::into_inner);
        let Events { entries, ids, .. } = &mut *guard;

        let before = entries.len();
        entries.retain(|e| {
            let keep = e.event.timestamp >= cutoff && !is_expired(&e.event, now);
            if !keep {
                ids.remove(&e.event.id);
            }
            keep
        });
        Ok((before - entries.len()) as u64)
    }

    fn events_for_session(
        &self,
        session_id: &str,
        since: DateTime<Utc>,
        limit: usize,
    ) -> StoreResult<Vec<StoredEvent>> {
        Ok(self.scan(limit, |e| {
            e.timestamp >= since && e.session_id.as_deref() == Some(session_id)
        }))
    }

    fn events_for_user(
        &self,
        user_id: &str,
        since: DateTime<Utc>,
        limit: usize,
    ) -> StoreResult<Vec<StoredEvent>> {
        Ok(self.scan(limit, |e| {
            e.timestamp >= since && e.user_id.as_deref() == Some(user_id)
        }))
    }

    fn events_by_type(
        &self,
        event_type: &str,
        since: DateTime<Utc>,
        limit: usize,
    ) -> StoreResult<Vec<StoredEvent>> {
        Ok(self.scan(limit, |e| {
            e.timestamp >= since && e.event_type.as_str() == event_type
        }))
    }

    fn stats(&self) -> StoreResult<PersistenceStats> {
        let events = self.events.read().unwrap_or_else(PoisonError::into_inner);
        let mut stats = PersistenceStats {
            total_events: events.entries.len() as u64,
            ..Default::default()
        };
        for event in events.entries.iter().map(|e| &e.event) {
            *stats
                .events_by_type
                .entry(event.event_type.to_string())
                .or_default() += 1;
            stats.oldest = Some(stats.oldest.map_or(event.timestamp, |t| t.min(event.timestamp)));
            stats.newest = Some(stats.newest.map_or(event.timestamp, |t| t.max(event.timestamp)));
        }
        Ok(stats)
    }
}
