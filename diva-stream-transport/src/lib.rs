//! Transport adapters for diva-stream
//!
//! This crate wraps the two network surfaces the streaming engine talks to:
//! the HTTP orchestration endpoint used for outbound messages, and the
//! WebSocket connection that pushes status, progress, typing and message
//! events back to the client.

pub mod base;
pub mod http;
pub mod websocket;

pub use base::{
    ConnectionHandler, OrchestrateClient, OrchestrateRequest, Result, TransportError,
    TransportEvent,
};
pub use base::Result as TransportResult;
pub use http::HttpOrchestrator;
pub use websocket::{decode_frame, WebSocketTransport};
