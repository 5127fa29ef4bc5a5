use std::collections::HashMap;
use std::time::Duration;

use serde_json::Value;

use crate::event::Event;

/// Metadata key under which a persistence TTL is recorded, in whole seconds.
pub const TTL_METADATA_KEY: &str = "ttl_secs";

/// Per-publish options. Consumed by the publish call, never retained.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PublishOptions {
    pub session_id: Option<String>,
    pub user_id: Option<String>,
    pub metadata: HashMap<String, Value>,
    /// Hand the event to the configured persistence store.
    pub persist: bool,
    /// How long the store should keep the event. `None` means until cleanup.
    pub ttl: Option<Duration>,
}

impl PublishOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Persist the event. A zero TTL is treated as "no expiry".
    pub fn with_persistence(mut self, ttl: impl Into<Option<Duration>>) -> Self {
        self.persist = true;
        self.ttl = ttl.into().filter(|ttl| !ttl.is_zero());
        self
    }

    /// Copy the options onto a freshly built event.
    pub(crate) fn apply<T>(self, event: &mut Event<T>) {
        event.session_id = self.session_id;
        event.user_id = self.user_id;
        event.metadata = self.metadata;
        if let Some(ttl) = self.ttl {
            event
                .metadata
                .insert(TTL_METADATA_KEY.to_string(), Value::from(ttl.as_secs()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use herald_protocol::ChatEventType;

    #[test]
    fn test_apply_sets_envelope_fields() {
        let opts = PublishOptions::new()
            .with_session_id("s1")
            .with_user_id("u1")
            .with_metadata("source", "api")
            .with_persistence(Duration::from_secs(3600));

        assert!(opts.persist);

        let mut event = Event::new(ChatEventType::MessageSent, ());
        opts.apply(&mut event);

        assert_eq!(event.session_id.as_deref(), Some("s1"));
        assert_eq!(event.user_id.as_deref(), Some("u1"));
        assert_eq!(event.metadata["source"], "api");
        assert_eq!(event.metadata[TTL_METADATA_KEY], 3600);
    }

    #[test]
    fn test_persistence_without_ttl() {
        let opts = PublishOptions::new().with_persistence(None::<Duration>);
        assert!(opts.persist);
        assert_eq!(opts.ttl, None);

        let opts = PublishOptions::new().with_persistence(Duration::ZERO);
        assert_eq!(opts.ttl, None);
    }
}
