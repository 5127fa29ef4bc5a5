//! In-process typed publish-subscribe event bus.
//!
//! A [`Broker`] fans events of one payload type out to filtered subscribers
//! over bounded channels, keeps a bounded history for replay, and optionally
//! hands events to a [`PersistenceStore`]. The [`Manager`] owns one broker per
//! [`Domain`] plus a generic broker that mirrors all of them.

pub mod broker;
pub mod config;
pub mod error;
pub mod event;
pub mod filter;
pub mod manager;
pub mod options;
pub mod store;

pub use broker::{Broker, BrokerConfig, BrokerStats, SubscriberInfo};
pub use config::{Backend, Settings};
pub use error::{BusError, Result, StoreError};
pub use event::{Event, StoredEvent};
pub use filter::{
    EventFilter, any_of, combine_filters, filter_by_domain, filter_by_metadata,
    filter_by_session_id, filter_by_type, filter_by_user_id, matches_all,
};
pub use manager::{Manager, ManagerStats};
pub use options::PublishOptions;
pub use store::{MemoryStore, PersistenceStats, PersistenceStore, SqliteStore};

pub use herald_protocol::*;
