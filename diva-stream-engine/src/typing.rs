//! Liveness-bounded typing indicators

use diva_stream_core::bus::{MessageBus, TypingIndicator};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// How long an indicator stays live without a refresh
pub const TYPING_TTL: Duration = Duration::from_millis(5000);

/// Indicators still live at `now`, one per agent, sorted by agent id
pub fn live_view(
    indicators: &HashMap<String, TypingIndicator>,
    now: Instant,
) -> Vec<TypingIndicator> {
    let mut view: Vec<TypingIndicator> = indicators
        .values()
        .filter(|i| now.saturating_duration_since(i.observed_at) < TYPING_TTL)
        .cloned()
        .collect();
    view.sort_by(|a, b| a.agent_id.cmp(&b.agent_id));
    view
}

// Views differing only in `observed_at` are the same to consumers.
fn same_view(a: &[TypingIndicator], b: &[TypingIndicator]) -> bool {
    a.len() == b.len()
        && a.iter().zip(b).all(|(x, y)| {
            x.agent_id == y.agent_id && x.agent_type == y.agent_type && x.is_typing == y.is_typing
        })
}

struct TypingState {
    indicators: HashMap<String, TypingIndicator>,
    last_view: Vec<TypingIndicator>,
}

/// Tracks which remote agents are composing
#[derive(Clone)]
pub struct TypingTracker {
    state: Arc<Mutex<TypingState>>,
    bus: MessageBus,
    wake: Arc<Notify>,
}

impl TypingTracker {
    /// Create a tracker publishing views on `bus`, starting empty
    pub fn new(bus: MessageBus) -> Self {
        bus.publish_typing(Vec::new());
        Self {
            state: Arc::new(Mutex::new(TypingState {
                indicators: HashMap::new(),
                last_view: Vec::new(),
            })),
            bus,
            wake: Arc::new(Notify::new()),
        }
    }

    /// Record that `agent_id` started or stopped typing
    pub fn set_typing(&self, agent_id: &str, agent_type: &str, is_typing: bool) {
        {
            let mut state = self.state.lock();
            if is_typing {
                state.indicators.insert(
                    agent_id.to_string(),
                    TypingIndicator {
                        agent_id: agent_id.to_string(),
                        agent_type: agent_type.to_string(),
                        is_typing: true,
                        observed_at: Instant::now(),
                    },
                );
            } else {
                state.indicators.remove(agent_id);
            }
            self.refresh(&mut state);
        }
        self.wake.notify_one();
    }

    /// Live indicators at this instant
    pub fn current(&self) -> Vec<TypingIndicator> {
        live_view(&self.state.lock().indicators, Instant::now())
    }

    fn refresh(&self, state: &mut TypingState) {
        let now = Instant::now();
        state
            .indicators
            .retain(|_, i| now.saturating_duration_since(i.observed_at) < TYPING_TTL);

        let view = live_view(&state.indicators, now);
        if same_view(&view, &state.last_view) {
            return;
        }
        debug!("Typing view changed: {} agent(s)", view.len());
        state.last_view = view.clone();
        self.bus.publish_typing(view);
    }

    fn next_expiry(&self) -> Option<Instant> {
        self.state
            .lock()
            .indicators
            .values()
            .map(|i| i.observed_at + TYPING_TTL)
            .min()
    }

    /// Spawn the task that drops indicators as they go stale
    pub fn spawn_expiry(&self, cancel: CancellationToken) -> JoinHandle<()> {
        let tracker = self.clone();
        tokio::spawn(async move {
            loop {
                // Far deadline when idle; the notify re-arms it.
                let deadline = tracker
                    .next_expiry()
                    .unwrap_or_else(|| Instant::now() + Duration::from_secs(3600));

                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tracker.wake.notified() => {}
                    _ = tokio::time::sleep_until(deadline) => {
                        let mut state = tracker.state.lock();
                        tracker.refresh(&mut state);
                    }
                }
            }
            debug!("Typing expiry task stopped");
        })
    }
}
