use std::collections::HashMap;

use chrono::{DateTime, Utc};
use herald_protocol::EventType;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Type-erased event, as handed to persistence stores and the generic broker.
pub type StoredEvent = Event<Value>;

/// Core event structure delivered by a broker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event<T> {
    /// Unique per publish call (UUID v4).
    pub id: String,

    /// Namespaced type, e.g. "chat.message.sent".
    #[serde(rename = "type")]
    pub event_type: EventType,

    pub payload: T,

    #[serde(default)]
    pub metadata: HashMap<String, Value>,

    /// Wall-clock time of the publish call. Not monotonic across producers.
    pub timestamp: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

impl<T> Event<T> {
    /// Create a new event with a fresh id and the current time.
    pub fn new(event_type: impl Into<EventType>, payload: T) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            event_type: event_type.into(),
            payload,
            metadata: HashMap::new(),
            timestamp: Utc::now(),
            session_id: None,
            user_id: None,
        }
    }

    /// Replace the payload, keeping every envelope field.
    pub fn map_payload<U>(self, payload: U) -> Event<U> {
        Event {
            id: self.id,
            event_type: self.event_type,
            payload,
            metadata: self.metadata,
            timestamp: self.timestamp,
            session_id: self.session_id,
            user_id: self.user_id,
        }
    }
}

impl<T: Serialize> Event<T> {
    /// Convert into the type-erased form used by stores and the generic broker.
    pub fn erase(&self) -> Result<StoredEvent, serde_json::Error> {
        let payload = serde_json::to_value(&self.payload)?;
        Ok(Event {
            id: self.id.clone(),
            event_type: self.event_type.clone(),
            payload,
            metadata: self.metadata.clone(),
            timestamp: self.timestamp,
            session_id: self.session_id.clone(),
            user_id: self.user_id.clone(),
        })
    }
}

impl StoredEvent {
    /// Decode the payload back into a concrete type.
    pub fn decode<T: DeserializeOwned>(mut self) -> Result<Event<T>, serde_json::Error> {
        let payload = serde_json::from_value(self.payload.take())?;
        Ok(self.map_payload(payload))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use herald_protocol::{ChatEvent, ChatEventType};

    #[test]
    fn test_new_events_get_distinct_ids() {
        let a = Event::new(ChatEventType::MessageSent, ());
        let b = Event::new(ChatEventType::MessageSent, ());
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_erase_and_decode_keep_envelope() {
        let mut event = Event::new(
            ChatEventType::MessageSent,
            ChatEvent {
                session_id: "s1".to_string(),
                content: "hello".to_string(),
                ..Default::default()
            },
        );
        event.session_id = Some("s1".to_string());
        event.metadata.insert("source".to_string(), Value::from("tui"));

        let stored = event.erase().unwrap();
        assert_eq!(stored.id, event.id);
        assert_eq!(stored.payload["content"], "hello");

        let decoded: Event<ChatEvent> = stored.decode().unwrap();
        assert_eq!(decoded, event);
    }

    #[test]
    fn test_event_json_uses_type_field() {
        let event = Event::new("plugin.custom", Value::Null);
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "plugin.custom");
        assert!(json.get("session_id").is_none());
    }
}
