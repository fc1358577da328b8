//! Exponential-backoff redelivery of failed messages

use crate::history::HistorySnapshot;
use crate::queue::OutboundQueue;
use diva_stream_core::bus::{
    ChatMessage, MessageBus, MessageOrigin, MessageStatus, Priority, Subscription,
};
use diva_stream_core::config::ChatStreamConfig;
use futures::StreamExt;
use std::collections::HashMap;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tokio_util::time::{delay_queue, DelayQueue};
use tracing::{debug, info, warn};

/// Metadata keys describing the last failure, dropped on redelivery
pub const ERROR_METADATA_KEYS: [&str; 2] = ["error", "errorMessage"];

/// Prepare a failed message for another attempt
pub fn next_attempt(failed: &ChatMessage, retry_count: u32) -> ChatMessage {
    let mut next = failed.with_status(MessageStatus::Pending);
    next.retry_count = retry_count;
    for key in ERROR_METADATA_KEYS {
        next.metadata.remove(key);
    }
    next
}

/// Requests manual retries from a running [`RetryPipeline`]
#[derive(Clone)]
pub struct RetryHandle {
    tx: mpsc::UnboundedSender<String>,
}

impl RetryHandle {
    /// Ask the pipeline to restart the retry cycle of `id`
    ///
    /// The pipeline re-checks the message when it handles the request, so a
    /// message that left `failed` in the meantime is not sent twice.
    pub fn request(&self, id: &str) -> bool {
        self.tx.send(id.to_string()).is_ok()
    }
}

/// Watches the message stream and reschedules failed user messages
///
/// At most one timer is outstanding per message id. Any non-failed update
/// for a scheduled id cancels its timer. Automatic and manual redelivery
/// both happen on the pipeline task, so each id has a single writer.
pub struct RetryPipeline {
    bus: MessageBus,
    queue: OutboundQueue,
    config: ChatStreamConfig,
    history: watch::Receiver<HistorySnapshot>,
    requests: mpsc::UnboundedReceiver<String>,
    timers: DelayQueue<ChatMessage>,
    scheduled: HashMap<String, delay_queue::Key>,
}

impl RetryPipeline {
    pub fn new(
        bus: MessageBus,
        queue: OutboundQueue,
        config: ChatStreamConfig,
        history: watch::Receiver<HistorySnapshot>,
    ) -> (Self, RetryHandle) {
        let (tx, requests) = mpsc::unbounded_channel();
        let pipeline = Self {
            bus,
            queue,
            config,
            history,
            requests,
            timers: DelayQueue::new(),
            scheduled: HashMap::new(),
        };
        (pipeline, RetryHandle { tx })
    }

    /// Run until cancelled or the message stream ends
    pub async fn run(mut self, mut messages: Subscription<ChatMessage>, cancel: CancellationToken) {
        info!(
            "Retry pipeline started (max_retries={}, retry_delay={}ms)",
            self.config.max_retries, self.config.retry_delay_ms
        );

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                msg = messages.next() => match msg {
                    Some(msg) => self.observe(msg),
                    None => break,
                },
                Some(id) = self.requests.recv() => self.manual_retry(&id),
                Some(expired) = self.timers.next(), if !self.timers.is_empty() => {
                    let failed = expired.into_inner();
                    self.scheduled.remove(&failed.id);
                    self.redeliver(failed);
                }
            }
        }

        info!("Retry pipeline stopped");
    }

    fn observe(&mut self, msg: ChatMessage) {
        if msg.origin != MessageOrigin::User {
            return;
        }

        if msg.status != MessageStatus::Failed {
            self.cancel_timer(&msg.id);
            return;
        }

        if self.scheduled.contains_key(&msg.id) {
            return;
        }
        if msg.retry_count >= self.config.max_retries {
            warn!(
                id = %msg.id,
                "Giving up after {} retries; manual retry required",
                msg.retry_count
            );
            return;
        }

        let delay = self.config.backoff_for(msg.retry_count);
        debug!(
            id = %msg.id,
            retry_count = msg.retry_count,
            "Scheduling retry in {}ms",
            delay.as_millis()
        );
        let id = msg.id.clone();
        let key = self.timers.insert(msg, delay);
        self.scheduled.insert(id, key);
    }

    fn cancel_timer(&mut self, id: &str) {
        if let Some(key) = self.scheduled.remove(id) {
            debug!(id = %id, "Cancelling scheduled retry");
            self.timers.remove(&key);
        }
    }

    fn redeliver(&self, failed: ChatMessage) {
        let next = next_attempt(&failed, failed.retry_count + 1);
        info!(id = %next.id, retry_count = next.retry_count, "Retrying message");
        if self.bus.publish_message(next.clone()) {
            self.queue.enqueue(next, Priority::Normal);
        }
    }

    fn manual_retry(&mut self, id: &str) {
        let current = self
            .history
            .borrow()
            .iter()
            .find(|m| m.id == id)
            .cloned();
        let Some(failed) = current
            .filter(|m| m.origin == MessageOrigin::User && m.status == MessageStatus::Failed)
        else {
            debug!(id = %id, "Manual retry skipped, message is not failed");
            return;
        };

        self.cancel_timer(id);
        let next = next_attempt(&failed, 0);
        info!(id = %next.id, "Manual retry");
        if self.bus.publish_message(next.clone()) {
            self.queue.enqueue(next, Priority::High);
        }
    }
}
