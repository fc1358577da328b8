//! Broadcast hub with bounded replay

use super::events::{ChatMessage, ConnectionStatus, TypingIndicator};
use futures::Stream;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tracing::debug;

/// Callback invoked synchronously on every publish
pub type Observer<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// Handle returned by [`Topic::observe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObserverId(u64);

struct TopicState<T> {
    observers: Vec<(ObserverId, Observer<T>)>,
    next_observer: u64,
    subscribers: Vec<mpsc::UnboundedSender<T>>,
    replay: VecDeque<T>,
    replay_capacity: usize,
    closed: bool,
}

/// A single broadcast stream
///
/// Every published value is delivered to every live subscriber in publish
/// order. Each subscriber owns an unbounded queue, so slow consumers never
/// lose values. New subscribers first receive the last `replay_capacity`
/// values.
///
/// Observers registered with [`Topic::observe`] run inline, under the topic
/// lock, before channel subscribers are fed. They must not publish to the
/// same topic.
pub struct Topic<T> {
    name: &'static str,
    state: Arc<Mutex<TopicState<T>>>,
}

impl<T> Clone for Topic<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name,
            state: Arc::clone(&self.state),
        }
    }
}

impl<T: Clone + Send + 'static> Topic<T> {
    /// Create a topic that replays up to `replay_capacity` values
    pub fn new(name: &'static str, replay_capacity: usize) -> Self {
        Self {
            name,
            state: Arc::new(Mutex::new(TopicState {
                observers: Vec::new(),
                next_observer: 0,
                subscribers: Vec::new(),
                replay: VecDeque::with_capacity(replay_capacity),
                replay_capacity,
                closed: false,
            })),
        }
    }

    /// Publish a value to all subscribers
    ///
    /// Returns `false` once the topic has been closed.
    pub fn publish(&self, value: T) -> bool {
        let mut state = self.state.lock();
        if state.closed {
            debug!("Dropping publish on closed topic {}", self.name);
            return false;
        }

        if state.replay_capacity > 0 {
            if state.replay.len() == state.replay_capacity {
                state.replay.pop_front();
            }
            state.replay.push_back(value.clone());
        }

        for (_, observer) in &state.observers {
            observer(&value);
        }

        // Receivers dropped by their owner are pruned here.
        state
            .subscribers
            .retain(|tx| tx.send(value.clone()).is_ok());
        true
    }

    /// Subscribe to the topic, starting with the replay buffer
    pub fn subscribe(&self) -> Subscription<T> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.state.lock();
        for value in &state.replay {
            let _ = tx.send(value.clone());
        }
        // A closed topic hands out the replay and then ends immediately.
        if !state.closed {
            state.subscribers.push(tx);
        }
        Subscription { rx }
    }

    /// Register a synchronous observer, replaying the buffer to it first
    pub fn observe<F>(&self, observer: F) -> ObserverId
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let mut state = self.state.lock();
        let id = ObserverId(state.next_observer);
        state.next_observer += 1;
        for value in &state.replay {
            observer(value);
        }
        if !state.closed {
            state.observers.push((id, Arc::new(observer)));
        }
        id
    }

    /// Remove an observer; unknown ids are ignored
    pub fn unobserve(&self, id: ObserverId) {
        self.state.lock().observers.retain(|(oid, _)| *oid != id);
    }

    /// Complete the topic; subscribers see end-of-stream after draining
    pub fn close(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        state.observers.clear();
        state.subscribers.clear();
    }

}

/// Receiving half of a topic subscription
pub struct Subscription<T> {
    rx: mpsc::UnboundedReceiver<T>,
}

impl<T> Subscription<T> {
    /// Wait for the next value; `None` once the topic is closed and drained
    pub async fn recv(&mut self) -> Option<T> {
        self.rx.recv().await
    }

    /// Take the next value if one is already queued
    pub fn try_recv(&mut self) -> Option<T> {
        self.rx.try_recv().ok()
    }

    /// Drain every value currently queued
    pub fn drain(&mut self) -> Vec<T> {
        let mut values = Vec::new();
        while let Ok(value) = self.rx.try_recv() {
            values.push(value);
        }
        values
    }
}

impl<T> Stream for Subscription<T> {
    type Item = T;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<T>> {
        self.rx.poll_recv(cx)
    }
}

/// Session-scoped broadcast hub
///
/// Producers (queue processor, retry pipeline, transport adapter) publish
/// here; consumers (history aggregator, external subscribers) subscribe.
/// One instance per engine, torn down with [`MessageBus::close`].
#[derive(Clone)]
pub struct MessageBus {
    messages: Topic<ChatMessage>,
    typing: Topic<Vec<TypingIndicator>>,
    connection: Topic<ConnectionStatus>,
}

impl MessageBus {
    /// Create a bus replaying `buffer_size` messages to late subscribers
    pub fn new(buffer_size: usize) -> Self {
        Self {
            messages: Topic::new("messages", buffer_size),
            typing: Topic::new("typing", 1),
            connection: Topic::new("connection", 1),
        }
    }

    /// Publish a message event
    pub fn publish_message(&self, msg: ChatMessage) -> bool {
        debug!(id = %msg.id, status = ?msg.status, "bus: message");
        self.messages.publish(msg)
    }

    /// Publish a typing view
    pub fn publish_typing(&self, view: Vec<TypingIndicator>) -> bool {
        self.typing.publish(view)
    }

    /// Publish a connection status
    pub fn publish_connection(&self, status: ConnectionStatus) -> bool {
        self.connection.publish(status)
    }

    /// Observe message events synchronously
    pub fn observe_messages<F>(&self, observer: F) -> ObserverId
    where
        F: Fn(&ChatMessage) + Send + Sync + 'static,
    {
        self.messages.observe(observer)
    }

    /// Stop a message observer
    pub fn unobserve_messages(&self, id: ObserverId) {
        self.messages.unobserve(id);
    }

    /// Subscribe to message events
    pub fn subscribe_messages(&self) -> Subscription<ChatMessage> {
        self.messages.subscribe()
    }

    /// Subscribe to typing views
    pub fn subscribe_typing(&self) -> Subscription<Vec<TypingIndicator>> {
        self.typing.subscribe()
    }

    /// Subscribe to connection status updates
    pub fn subscribe_connection(&self) -> Subscription<ConnectionStatus> {
        self.connection.subscribe()
    }

    /// Complete all three streams
    pub fn close(&self) {
        self.messages.close();
        self.typing.close();
        self.connection.close();
        debug!("Message bus closed");
    }
}
