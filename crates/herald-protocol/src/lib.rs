//! Shared event vocabulary for the herald event bus.
//!
//! Producers and consumers agree on two things here: the closed set of event
//! types per domain (with the stable wire strings used for persistence) and
//! the payload structures each domain carries.

use std::fmt;

use serde::{Deserialize, Serialize};

mod kinds;
mod payload;

pub use kinds::{
    ChatEventType, ContextEventType, EventType, FileEventType, McpEventType,
    NotificationEventType, PermissionEventType, SystemEventType, VectorEventType,
};
pub use payload::{
    ChatEvent, ContextEvent, FileEvent, McpEvent, NotificationEvent, NotificationLevel,
    PermissionEvent, SystemEvent, TokenUsage, VectorEvent,
};

// ============================================================================
// Domain
// ============================================================================

/// The well-known event domains. Each one gets its own broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Domain {
    Chat,
    Context,
    Permission,
    Notification,
    System,
    File,
    Vector,
    Mcp,
}

impl Domain {
    pub const ALL: [Domain; 8] = [
        Domain::Chat,
        Domain::Context,
        Domain::Permission,
        Domain::Notification,
        Domain::System,
        Domain::File,
        Domain::Vector,
        Domain::Mcp,
    ];

    /// Wire prefix of every event type in this domain.
    pub fn as_str(&self) -> &'static str {
        match self {
            Domain::Chat => "chat",
            Domain::Context => "context",
            Domain::Permission => "permission",
            Domain::Notification => "notification",
            Domain::System => "system",
            Domain::File => "file",
            Domain::Vector => "vector",
            Domain::Mcp => "mcp",
        }
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
