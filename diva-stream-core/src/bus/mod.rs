//! Message bus for decoupled communication
//!
//! The message bus distributes three independent streams (messages, typing
//! views, connection status) from the engine's producers to its consumers.

pub mod events;
pub mod hub;

pub use events::{
    ChatMessage, ConnectionStatus, MessageOrigin, MessageStatus, Priority, QueueItem,
    TypingIndicator,
};
pub use hub::{MessageBus, Observer, ObserverId, Subscription, Topic};
