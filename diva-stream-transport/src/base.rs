//! Base traits for transport adapters

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::mpsc;

/// Body of `POST {apiEndpoint}/chat/orchestrate`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrchestrateRequest {
    pub message: String,
    pub session_id: String,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

/// Event raised by the realtime connection
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// Connection established
    Connected,
    /// Connection lost or closed
    Disconnected { reason: Option<String> },
    /// Connection-level failure (connect error, protocol error)
    Error { message: String },
    /// Connection or agent status change
    Status {
        status: String,
        message: Option<String>,
        agent_type: Option<String>,
    },
    /// Work-in-progress narration from the orchestrator
    Progress {
        message: String,
        agent_type: Option<String>,
    },
    /// Remote agent started or stopped composing
    Typing {
        is_typing: bool,
        agent_id: Option<String>,
        agent_type: Option<String>,
    },
    /// A message pushed by the remote side
    Message {
        id: Option<String>,
        content: String,
        agent_type: Option<String>,
        metadata: HashMap<String, serde_json::Value>,
    },
}

/// Outbound request/response client
#[async_trait]
pub trait OrchestrateClient: Send + Sync {
    /// Perform a single orchestrate call
    ///
    /// Returns the decoded response body, or `Value::Null` when the body is
    /// empty or not JSON.
    async fn orchestrate(&self, request: &OrchestrateRequest) -> Result<serde_json::Value>;

    /// Additional attempts the caller may make after a failed call
    fn retry_budget(&self) -> u32 {
        0
    }
}

/// Realtime connection handler
#[async_trait]
pub trait ConnectionHandler: Send + Sync {
    /// Get the handler name
    fn name(&self) -> &str;

    /// Check if the handler is running
    fn is_running(&self) -> bool;

    /// Start the handler
    async fn start(&mut self) -> Result<()>;

    /// Stop the handler
    async fn stop(&mut self) -> Result<()>;

    /// Set the sender that receives lifecycle and inbound events
    fn set_event_sender(&mut self, tx: mpsc::Sender<TransportEvent>);
}

/// Transport errors
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Request timed out after {0}ms")]
    Timeout(u64),

    #[error("Transport not running: {0}")]
    NotRunning(String),
}

pub type Result<T> = std::result::Result<T, TransportError>;
