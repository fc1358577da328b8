//! Transport health reporting

use chrono::{DateTime, Utc};
use diva_stream_core::bus::{ConnectionStatus, MessageBus};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Lifecycle change reported by the transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionChange {
    Connected,
    Disconnected { reason: Option<String> },
    Error { message: String },
}

/// Apply one lifecycle change to a status
pub fn reduce(
    status: &ConnectionStatus,
    change: &ConnectionChange,
    now: DateTime<Utc>,
) -> ConnectionStatus {
    match change {
        ConnectionChange::Connected => ConnectionStatus {
            is_connected: true,
            last_heartbeat: now,
            reconnect_attempts: 0,
            error: None,
        },
        ConnectionChange::Disconnected { .. } => ConnectionStatus {
            is_connected: false,
            last_heartbeat: status.last_heartbeat,
            reconnect_attempts: status.reconnect_attempts.saturating_add(1),
            error: None,
        },
        ConnectionChange::Error { message } => ConnectionStatus {
            is_connected: false,
            last_heartbeat: status.last_heartbeat,
            reconnect_attempts: status.reconnect_attempts.saturating_add(1),
            error: Some(message.clone()),
        },
    }
}

/// Owns the current [`ConnectionStatus`] and publishes every change
#[derive(Clone)]
pub struct ConnectionMonitor {
    status: Arc<Mutex<ConnectionStatus>>,
    bus: MessageBus,
}

impl ConnectionMonitor {
    pub fn new(bus: MessageBus) -> Self {
        let initial = ConnectionStatus::disconnected();
        bus.publish_connection(initial.clone());
        Self {
            status: Arc::new(Mutex::new(initial)),
            bus,
        }
    }

    /// Record a lifecycle change
    pub fn apply(&self, change: ConnectionChange) {
        match &change {
            ConnectionChange::Connected => info!("Transport connected"),
            ConnectionChange::Disconnected { reason } => {
                info!("Transport disconnected: {}", reason.as_deref().unwrap_or("closed"))
            }
            ConnectionChange::Error { message } => warn!("Transport error: {}", message),
        }

        let mut status = self.status.lock();
        *status = reduce(&status, &change, Utc::now());
        self.emit(&status);
    }

    /// Refresh the heartbeat if connected; returns whether it did
    pub fn heartbeat(&self) -> bool {
        let mut status = self.status.lock();
        if !status.is_connected {
            return false;
        }
        status.last_heartbeat = Utc::now();
        debug!("Heartbeat");
        self.emit(&status);
        true
    }

    /// Current status
    pub fn current(&self) -> ConnectionStatus {
        self.status.lock().clone()
    }

    fn emit(&self, status: &ConnectionStatus) {
        self.bus.publish_connection(status.clone());
    }

    /// Spawn the periodic heartbeat
    pub fn spawn_heartbeat(&self, interval: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        let monitor = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        monitor.heartbeat();
                    }
                }
            }
            debug!("Heartbeat task stopped");
        })
    }
}
