//! Event type enums.
//!
//! Every domain has a closed enum. Each variant maps to exactly one wire
//! string of the form `<domain>.<subject>.<action>`; those strings are what
//! gets written to the `type` column of the events table and must never
//! change once shipped.

use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::Domain;

macro_rules! event_types {
    (
        $(#[$meta:meta])*
        pub enum $name:ident in $domain:ident {
            $($variant:ident => $wire:literal,)+
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $(
                #[doc = concat!("`", $wire, "`")]
                #[serde(rename = $wire)]
                $variant,
            )+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub const DOMAIN: Domain = Domain::$domain;

            /// Stable wire string.
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $wire,)+
                }
            }

            pub fn from_wire(s: &str) -> Option<Self> {
                match s {
                    $($wire => Some($name::$variant),)+
                    _ => None,
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl From<$name> for EventType {
            fn from(kind: $name) -> Self {
                EventType::$domain(kind)
            }
        }
    };
}

event_types! {
    /// Chat lifecycle, streaming and usage events.
    pub enum ChatEventType in Chat {
        MessageSent => "chat.message.sent",
        MessageReceived => "chat.message.received",
        MessageUpdated => "chat.message.updated",
        MessageDeleted => "chat.message.deleted",
        StreamStarted => "chat.stream.started",
        TextChunk => "chat.text.chunk",
        StreamCompleted => "chat.stream.completed",
        Usage => "chat.usage",
        Error => "chat.error",
        SessionCreated => "chat.session.created",
        SessionDeleted => "chat.session.deleted",
    }
}

event_types! {
    /// Changes to the context window assembled for the model.
    pub enum ContextEventType in Context {
        Updated => "context.updated",
        FileAdded => "context.file.added",
        FileRemoved => "context.file.removed",
        Cleared => "context.cleared",
        Compacted => "context.compacted",
    }
}

event_types! {
    /// Tool permission request/response flow.
    pub enum PermissionEventType in Permission {
        Requested => "permission.requested",
        Granted => "permission.granted",
        Denied => "permission.denied",
        Revoked => "permission.revoked",
    }
}

event_types! {
    /// User-facing notifications, one type per level.
    pub enum NotificationEventType in Notification {
        Info => "notification.info",
        Success => "notification.success",
        Warning => "notification.warning",
        Error => "notification.error",
        Dismissed => "notification.dismissed",
    }
}

event_types! {
    /// Process lifecycle and infrastructure events.
    pub enum SystemEventType in System {
        Started => "system.started",
        ShuttingDown => "system.shutting_down",
        Error => "system.error",
        ConfigChanged => "system.config.changed",
        HealthCheck => "system.health.check",
    }
}

event_types! {
    /// Workspace file watcher events.
    pub enum FileEventType in File {
        Created => "file.created",
        Modified => "file.modified",
        Deleted => "file.deleted",
        Renamed => "file.renamed",
    }
}

event_types! {
    /// Embedding index and semantic search events.
    pub enum VectorEventType in Vector {
        IndexStarted => "vector.index.started",
        IndexProgress => "vector.index.progress",
        IndexCompleted => "vector.index.completed",
        SearchPerformed => "vector.search.performed",
        Error => "vector.error",
    }
}

event_types! {
    /// MCP server connection and tool call events.
    pub enum McpEventType in Mcp {
        ServerConnected => "mcp.server.connected",
        ServerDisconnected => "mcp.server.disconnected",
        ToolCalled => "mcp.tool.called",
        ToolResult => "mcp.tool.result",
        Error => "mcp.error",
    }
}

// ============================================================================
// EventType
// ============================================================================

/// Any event type the bus can carry.
///
/// Serialized as its wire string. Parsing is total: strings that are not a
/// known wire string become [`EventType::Custom`], so rows written by newer
/// producers still load.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EventType {
    Chat(ChatEventType),
    Context(ContextEventType),
    Permission(PermissionEventType),
    Notification(NotificationEventType),
    System(SystemEventType),
    File(FileEventType),
    Vector(VectorEventType),
    Mcp(McpEventType),
    Custom(String),
}

impl EventType {
    pub fn parse(s: &str) -> Self {
        if let Some(kind) = ChatEventType::from_wire(s) {
            return kind.into();
        }
        if let Some(kind) = ContextEventType::from_wire(s) {
            return kind.into();
        }
        if let Some(kind) = PermissionEventType::from_wire(s) {
            return kind.into();
        }
        if let Some(kind) = NotificationEventType::from_wire(s) {
            return kind.into();
        }
        if let Some(kind) = SystemEventType::from_wire(s) {
            return kind.into();
        }
        if let Some(kind) = FileEventType::from_wire(s) {
            return kind.into();
        }
        if let Some(kind) = VectorEventType::from_wire(s) {
            return kind.into();
        }
        if let Some(kind) = McpEventType::from_wire(s) {
            return kind.into();
        }
        EventType::Custom(s.to_string())
    }

    pub fn as_str(&self) -> &str {
        match self {
            EventType::Chat(kind) => kind.as_str(),
            EventType::Context(kind) => kind.as_str(),
            EventType::Permission(kind) => kind.as_str(),
            EventType::Notification(kind) => kind.as_str(),
            EventType::System(kind) => kind.as_str(),
            EventType::File(kind) => kind.as_str(),
            EventType::Vector(kind) => kind.as_str(),
            EventType::Mcp(kind) => kind.as_str(),
            EventType::Custom(s) => s,
        }
    }

    /// Owning domain, `None` for custom types.
    pub fn domain(&self) -> Option<Domain> {
        match self {
            EventType::Chat(_) => Some(Domain::Chat),
            EventType::Context(_) => Some(Domain::Context),
            EventType::Permission(_) => Some(Domain::Permission),
            EventType::Notification(_) => Some(Domain::Notification),
            EventType::System(_) => Some(Domain::System),
            EventType::File(_) => Some(Domain::File),
            EventType::Vector(_) => Some(Domain::Vector),
            EventType::Mcp(_) => Some(Domain::Mcp),
            EventType::Custom(_) => None,
        }
    }
}

impl FromStr for EventType {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(EventType::parse(s))
    }
}

impl From<String> for EventType {
    fn from(s: String) -> Self {
        EventType::parse(&s)
    }
}

impl From<&str> for EventType {
    fn from(s: &str) -> Self {
        EventType::parse(s)
    }
}

impl From<EventType> for String {
    fn from(kind: EventType) -> Self {
        match kind {
            EventType::Custom(s) => s,
            other => other.as_str().to_string(),
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    fn all_wire_strings() -> Vec<&'static str> {
        let mut all = Vec::new();
        all.extend(ChatEventType::ALL.iter().map(|k| k.as_str()));
        all.extend(ContextEventType::ALL.iter().map(|k| k.as_str()));
        all.extend(PermissionEventType::ALL.iter().map(|k| k.as_str()));
        all.extend(NotificationEventType::ALL.iter().map(|k| k.as_str()));
        all.extend(SystemEventType::ALL.iter().map(|k| k.as_str()));
        all.extend(FileEventType::ALL.iter().map(|k| k.as_str()));
        all.extend(VectorEventType::ALL.iter().map(|k| k.as_str()));
        all.extend(McpEventType::ALL.iter().map(|k| k.as_str()));
        all
    }

    #[test]
    fn test_wire_strings_are_unique_and_prefixed() {
        let all = all_wire_strings();
        let unique: HashSet<_> = all.iter().collect();
        assert_eq!(unique.len(), all.len());

        for wire in all {
            let kind = EventType::parse(wire);
            let domain = kind.domain().expect("known wire string has a domain");
            assert!(wire.starts_with(&format!("{}.", domain.as_str())), "{wire}");
            assert_eq!(kind.as_str(), wire);
        }
    }

    #[test]
    fn test_unknown_type_is_custom() {
        let kind = EventType::parse("plugin.thing.happened");
        assert_eq!(kind, EventType::Custom("plugin.thing.happened".to_string()));
        assert_eq!(kind.domain(), None);
        assert_eq!(kind.to_string(), "plugin.thing.happened");
    }

    #[test]
    fn test_event_type_serializes_as_wire_string() {
        let kind: EventType = ChatEventType::MessageSent.into();
        let json = serde_json::to_string(&kind).unwrap();
        assert_eq!(json, r#""chat.message.sent""#);

        let back: EventType = serde_json::from_str(&json).unwrap();
        assert_eq!(back, EventType::Chat(ChatEventType::MessageSent));
    }

    #[test]
    fn test_domain_enum_serializes_as_wire_string() {
        let json = serde_json::to_string(&SystemEventType::ShuttingDown).unwrap();
        assert_eq!(json, r#""system.shutting_down""#);
    }
}
