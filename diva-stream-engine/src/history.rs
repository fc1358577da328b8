//! Bounded, deduplicated conversation history

use diva_stream_core::bus::{ChatMessage, MessageBus, MessageOrigin, ObserverId};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::watch;

/// Immutable view of the conversation
pub type HistorySnapshot = Arc<Vec<ChatMessage>>;

/// Fold one message into the history
///
/// A message whose id is already present replaces that entry in place;
/// otherwise it is appended. The oldest entries are then dropped until at
/// most `capacity` remain.
pub fn fold_history(history: &mut Vec<ChatMessage>, msg: ChatMessage, capacity: usize) {
    match history.iter_mut().find(|existing| existing.id == msg.id) {
        Some(existing) => *existing = msg,
        None => history.push(msg),
    }

    if history.len() > capacity {
        let excess = history.len() - capacity;
        history.drain(..excess);
    }
}

struct HistoryState {
    entries: Vec<ChatMessage>,
    capacity: usize,
}

/// Folds the bus message stream into a bounded snapshot
///
/// Runs as a synchronous bus observer, so the snapshot reflects a message
/// as soon as `publish_message` returns.
pub struct HistoryAggregator {
    state: Arc<Mutex<HistoryState>>,
    snapshot: watch::Receiver<HistorySnapshot>,
    snapshot_tx: Arc<watch::Sender<HistorySnapshot>>,
    bus: MessageBus,
    observer: ObserverId,
}

impl HistoryAggregator {
    /// Start folding messages published on `bus`
    pub fn attach(bus: &MessageBus, capacity: usize) -> Self {
        let state = Arc::new(Mutex::new(HistoryState {
            entries: Vec::with_capacity(capacity),
            capacity,
        }));
        let (tx, rx) = watch::channel(Arc::new(Vec::new()));
        let snapshot_tx = Arc::new(tx);

        let fold_state = Arc::clone(&state);
        let fold_tx = Arc::clone(&snapshot_tx);
        let observer = bus.observe_messages(move |msg| {
            let mut state = fold_state.lock();
            let capacity = state.capacity;
            fold_history(&mut state.entries, msg.clone(), capacity);
            fold_tx.send_replace(Arc::new(state.entries.clone()));
        });

        Self {
            state,
            snapshot: rx,
            snapshot_tx,
            bus: bus.clone(),
            observer,
        }
    }

    /// Current snapshot
    pub fn snapshot(&self) -> HistorySnapshot {
        self.snapshot.borrow().clone()
    }

    /// Receiver notified on every change
    pub fn watch(&self) -> watch::Receiver<HistorySnapshot> {
        self.snapshot.clone()
    }

    /// Look up a message by id
    pub fn get(&self, id: &str) -> Option<ChatMessage> {
        self.snapshot.borrow().iter().find(|m| m.id == id).cloned()
    }

    /// Messages produced by `origin`, in history order
    pub fn by_origin(&self, origin: MessageOrigin) -> Vec<ChatMessage> {
        self.snapshot
            .borrow()
            .iter()
            .filter(|m| m.origin == origin)
            .cloned()
            .collect()
    }

    /// Agent messages tagged with `agent_type`, in history order
    pub fn by_agent_type(&self, agent_type: &str) -> Vec<ChatMessage> {
        self.snapshot
            .borrow()
            .iter()
            .filter(|m| m.origin == MessageOrigin::Agent)
            .filter(|m| m.agent_type.as_deref() == Some(agent_type))
            .cloned()
            .collect()
    }

    /// Empty the snapshot; later messages start a fresh history
    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.entries.clear();
        self.snapshot_tx.send_replace(Arc::new(Vec::new()));
    }

    /// Stop folding further messages
    pub fn detach(&self) {
        self.bus.unobserve_messages(self.observer);
    }
}
