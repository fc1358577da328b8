//! Streaming engine for diva-stream
//!
//! This crate wires the message bus, outbound queue, network sender, retry
//! pipeline, history aggregator, typing tracker and connection monitor into
//! a single [`ChatStreamEngine`] per chat session.

pub mod connection;
pub mod engine;
pub mod history;
pub mod queue;
pub mod retry;
pub mod sender;
pub mod typing;

#[cfg(test)]
pub(crate) mod test_support;

pub use connection::{ConnectionChange, ConnectionMonitor};
pub use diva_stream_core::bus::{
    ChatMessage, ConnectionStatus, MessageOrigin, MessageStatus, Priority, Subscription,
    TypingIndicator,
};
pub use engine::{AdapterAction, ChatStreamEngine, DEFAULT_AGENT_ID};
pub use history::{fold_history, HistoryAggregator, HistorySnapshot};
pub use typing::TYPING_TTL;
