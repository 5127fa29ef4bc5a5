//! Subscriber filters.
//!
//! Filters only look at the event envelope, so the same value works for
//! every broker regardless of payload type. A subscriber's filter list is
//! ANDed; an empty list accepts everything.

use std::collections::HashSet;

use herald_protocol::{Domain, EventType};
use serde_json::Value;

use crate::event::Event;

#[derive(Debug, Clone, PartialEq)]
pub enum EventFilter {
    /// Accepts every event.
    Always,
    /// Event type is one of the set.
    Types(HashSet<EventType>),
    /// Event type belongs to the domain.
    Domain(Domain),
    SessionId(String),
    UserId(String),
    /// Metadata entry equals the value.
    Metadata(String, Value),
    /// Every inner filter accepts.
    All(Vec<EventFilter>),
    /// At least one inner filter accepts.
    Any(Vec<EventFilter>),
}

impl EventFilter {
    pub fn matches<T>(&self, event: &Event<T>) -> bool {
        match self {
            EventFilter::Always => true,
            EventFilter::Types(types) => types.contains(&event.event_type),
            EventFilter::Domain(domain) => event.event_type.domain() == Some(*domain),
            EventFilter::SessionId(id) => event.session_id.as_deref() == Some(id.as_str()),
            EventFilter::UserId(id) => event.user_id.as_deref() == Some(id.as_str()),
            EventFilter::Metadata(key, value) => event.metadata.get(key) == Some(value),
            EventFilter::All(filters) => filters.iter().all(|f| f.matches(event)),
            EventFilter::Any(filters) => filters.iter().any(|f| f.matches(event)),
        }
    }
}

/// AND over a filter list. Empty accepts everything.
pub fn matches_all<T>(filters: &[EventFilter], event: &Event<T>) -> bool {
    filters.iter().all(|f| f.matches(event))
}

pub fn filter_by_type<I, K>(types: I) -> EventFilter
where
    I: IntoIterator<Item = K>,
    K: Into<EventType>,
{
    EventFilter::Types(types.into_iter().map(Into::into).collect())
}

pub fn filter_by_domain(domain: Domain) -> EventFilter {
    EventFilter::Domain(domain)
}

pub fn filter_by_session_id(session_id: impl Into<String>) -> EventFilter {
    EventFilter::SessionId(session_id.into())
}

pub fn filter_by_user_id(user_id: impl Into<String>) -> EventFilter {
    EventFilter::UserId(user_id.into())
}

pub fn filter_by_metadata(key: impl Into<String>, value: impl Into<Value>) -> EventFilter {
    EventFilter::Metadata(key.into(), value.into())
}

/// Logical AND.
pub fn combine_filters(filters: impl IntoIterator<Item = EventFilter>) -> EventFilter {
    EventFilter::All(filters.into_iter().collect())
}

/// Logical OR. An empty list accepts nothing.
pub fn any_of(filters: impl IntoIterator<Item = EventFilter>) -> EventFilter {
    EventFilter::Any(filters.into_iter().collect())
}
