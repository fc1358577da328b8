//! Throttled, priority-ordered outbound queue

use crate::sender::NetworkSender;
use diva_stream_core::bus::{ChatMessage, Priority, QueueItem};
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Producer half of the outbound queue
#[derive(Clone)]
pub struct OutboundQueue {
    tx: mpsc::UnboundedSender<QueueItem>,
}

impl OutboundQueue {
    /// Create the queue and the receiver consumed by [`run_queue_processor`]
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<QueueItem>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Queue a message for dispatch
    ///
    /// Returns `false` when the processor has already stopped.
    pub fn enqueue(&self, message: ChatMessage, priority: Priority) -> bool {
        debug!(id = %message.id, ?priority, "Queueing message");
        self.tx.send(QueueItem::new(message, priority)).is_ok()
    }
}

/// Order a batch by priority, then by submission time
///
/// The sort is stable, so items with equal keys keep arrival order.
pub fn sort_batch(batch: &mut [QueueItem]) {
    batch.sort_by(|a, b| {
        a.priority
            .cmp(&b.priority)
            .then_with(|| a.enqueued_at.cmp(&b.enqueued_at))
    });
}

/// Drain the queue in `throttle`-sized windows
///
/// A window opens when its first item arrives. Every item of a window is
/// dispatched concurrently, and the next window is not collected until the
/// whole batch has settled.
pub async fn run_queue_processor(
    mut rx: mpsc::UnboundedReceiver<QueueItem>,
    sender: Arc<NetworkSender>,
    throttle: Duration,
    cancel: CancellationToken,
) {
    info!("Outbound queue processor started");

    'windows: loop {
        let first = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            item = rx.recv() => match item {
                Some(item) => item,
                None => break,
            },
        };

        let mut batch = vec![first];
        let window = tokio::time::sleep(throttle);
        tokio::pin!(window);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break 'windows,
                _ = &mut window => break,
                item = rx.recv() => match item {
                    Some(item) => batch.push(item),
                    None => break,
                },
            }
        }

        sort_batch(&mut batch);
        debug!("Dispatching batch of {} message(s)", batch.len());

        join_all(
            batch
                .into_iter()
                .map(|item| sender.send(item.message)),
        )
        .await;
    }

    info!("Outbound queue processor stopped");
}
