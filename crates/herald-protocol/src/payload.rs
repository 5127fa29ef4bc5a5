//! Payload structures carried by each domain broker.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ============================================================================
// Chat
// ============================================================================

/// Token accounting reported by the model provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

/// Data for `chat.*` events.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatEvent {
    /// Chat session the message belongs to.
    pub session_id: String,
    /// Message being sent, streamed or updated.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    /// "user", "assistant", "system" or "tool".
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    /// Full message text, or a single chunk for `chat.text.chunk`.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub content: String,
    /// Model that produced the message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Populated on `chat.usage`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,
    /// Populated on `chat.error`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

// ============================================================================
// Context
// ============================================================================

/// Data for `context.*` events.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContextEvent {
    pub session_id: String,
    /// Files added to or removed from the context.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<String>,
    /// Estimated token count of the context after the change.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_count: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

// ============================================================================
// Permission
// ============================================================================

/// Data for `permission.*` events.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PermissionEvent {
    /// Correlates a request with its grant/deny.
    pub request_id: String,
    pub tool_name: String,
    /// Path or resource the tool wants to touch.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource: Option<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    /// Raw tool arguments.
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub arguments: Value,
    /// Whether the grant applies to the rest of the session.
    #[serde(default)]
    pub remember: bool,
}

// ============================================================================
// Notification
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationLevel {
    Info,
    Success,
    Warning,
    Error,
}

/// Data for `notification.*` events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationEvent {
    pub id: String,
    pub level: NotificationLevel,
    pub title: String,
    pub message: String,
    /// Auto-dismiss delay. `None` keeps the notification until dismissed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    /// Labels of action buttons offered to the user.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub actions: Vec<String>,
}

// ============================================================================
// System
// ============================================================================

/// Data for `system.*` events.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SystemEvent {
    /// Component reporting the event, e.g. "event_manager" or "agent".
    pub component: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub details: HashMap<String, Value>,
}

// ============================================================================
// File
// ============================================================================

/// Data for `file.*` events.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FileEvent {
    pub path: String,
    /// Previous path, only for `file.renamed`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub old_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(default)]
    pub is_dir: bool,
}

// ============================================================================
// Vector
// ============================================================================

/// Data for `vector.*` events.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VectorEvent {
    pub collection: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub documents_indexed: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub documents_total: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_count: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

// ============================================================================
// MCP
// ============================================================================

/// Data for `mcp.*` events.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct McpEvent {
    pub server_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub arguments: Value,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub result: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
