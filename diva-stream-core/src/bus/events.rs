//! Event types for the message bus

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::time::Instant;

/// Who produced a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageOrigin {
    User,
    Agent,
    System,
}

/// Delivery status of a message
///
/// Transitions: `Pending -> Sending -> Sent -> Delivered`, or
/// `Sending -> Failed`. A failed message only goes back to `Pending`
/// through an automatic or manual retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Pending,
    Sending,
    Sent,
    Delivered,
    Failed,
}

/// A single chat message flowing through the bus
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    /// Unique identifier (assigned locally or by the remote side)
    pub id: String,
    /// Producer of the message
    pub origin: MessageOrigin,
    /// Text content
    pub content: String,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Current delivery status
    pub status: MessageStatus,
    /// Number of automatic retries performed so far
    #[serde(default)]
    pub retry_count: u32,
    /// Agent tag, set when `origin` is `Agent`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_type: Option<String>,
    /// Free-form metadata
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl ChatMessage {
    /// Create a message with a fresh id
    pub fn new(origin: MessageOrigin, content: impl Into<String>, status: MessageStatus) -> Self {
        Self::with_id(uuid::Uuid::new_v4().to_string(), origin, content, status)
    }

    /// Create a message with a known id
    pub fn with_id(
        id: impl Into<String>,
        origin: MessageOrigin,
        content: impl Into<String>,
        status: MessageStatus,
    ) -> Self {
        Self {
            id: id.into(),
            origin,
            content: content.into(),
            created_at: Utc::now(),
            status,
            retry_count: 0,
            agent_type: None,
            metadata: HashMap::new(),
        }
    }

    /// Create a locally authored message awaiting dispatch
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(MessageOrigin::User, content, MessageStatus::Pending)
    }

    /// Create an agent message that already reached us
    pub fn agent(content: impl Into<String>, agent_type: Option<String>) -> Self {
        let mut msg = Self::new(MessageOrigin::Agent, content, MessageStatus::Delivered);
        msg.agent_type = agent_type;
        msg
    }

    /// Create a system notice
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(MessageOrigin::System, content, MessageStatus::Delivered)
    }

    /// Return a copy carrying a different status
    pub fn with_status(&self, status: MessageStatus) -> Self {
        let mut next = self.clone();
        next.status = status;
        next
    }

    /// Add metadata to the message
    pub fn with_metadata(
        mut self,
        key: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Merge a metadata bag into the message
    pub fn extend_metadata(mut self, metadata: HashMap<String, serde_json::Value>) -> Self {
        self.metadata.extend(metadata);
        self
    }
}

/// A remote agent currently composing a reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypingIndicator {
    pub agent_id: String,
    pub agent_type: String,
    pub is_typing: bool,
    /// Monotonic time of the last update, used for liveness expiry
    pub observed_at: Instant,
}

/// Health of the realtime transport
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionStatus {
    pub is_connected: bool,
    pub last_heartbeat: DateTime<Utc>,
    pub reconnect_attempts: u32,
    /// Last transport error; only ever set while disconnected
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ConnectionStatus {
    /// Status before any transport event was observed
    pub fn disconnected() -> Self {
        Self {
            is_connected: false,
            last_heartbeat: Utc::now(),
            reconnect_attempts: 0,
            error: None,
        }
    }
}

impl Default for ConnectionStatus {
    fn default() -> Self {
        Self::disconnected()
    }
}

/// Dispatch priority; declaration order is sort order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    Normal,
    Low,
}

impl Default for Priority {
    fn default() -> Self {
        Self::Normal
    }
}

/// A message waiting in the outbound queue
#[derive(Debug, Clone)]
pub struct QueueItem {
    pub message: ChatMessage,
    pub priority: Priority,
    pub enqueued_at: Instant,
}

impl QueueItem {
    /// Wrap a message for the outbound queue
    pub fn new(message: ChatMessage, priority: Priority) -> Self {
        Self {
            message,
            priority,
            enqueued_at: Instant::now(),
        }
    }
}
