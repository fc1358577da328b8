//! WebSocket connection to the orchestration backend
//!
//! Receives JSON frames tagged by `type` (`status`, `progress`, `typing`,
//! `message`, `error`) and forwards them as [`TransportEvent`]s together with
//! connection lifecycle events. Reconnects after a fixed delay until stopped.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage};
use tracing::{debug, error, info, warn};

use diva_stream_core::config::TransportConfig;
use diva_stream_core::utils::truncate;

use crate::base::{ConnectionHandler, Result, TransportError, TransportEvent};

/// Frames pushed by the backend
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum InboundFrame {
    Status {
        #[serde(default)]
        status: String,
        #[serde(default)]
        message: Option<String>,
        #[serde(default, alias = "agentType")]
        agent_type: Option<String>,
    },
    Progress {
        #[serde(default)]
        message: String,
        #[serde(default, alias = "agentType")]
        agent_type: Option<String>,
    },
    Typing {
        #[serde(default, alias = "isTyping")]
        is_typing: bool,
        #[serde(default, alias = "agentId")]
        agent_id: Option<String>,
        #[serde(default, alias = "agentType")]
        agent_type: Option<String>,
    },
    Message {
        #[serde(default)]
        id: Option<String>,
        #[serde(default)]
        content: String,
        #[serde(default, alias = "agentType")]
        agent_type: Option<String>,
        #[serde(default)]
        metadata: HashMap<String, serde_json::Value>,
    },
    Error {
        #[serde(default)]
        error: String,
    },
}

/// Frame sent right after connecting to bind the socket to a session
#[derive(Debug, Clone, Serialize)]
struct JoinCommand {
    #[serde(rename = "type")]
    msg_type: String,
    #[serde(rename = "sessionId")]
    session_id: String,
}

impl JoinCommand {
    fn new(session_id: impl Into<String>) -> Self {
        Self {
            msg_type: "join".to_string(),
            session_id: session_id.into(),
        }
    }
}

/// Decode one text frame; malformed frames are logged and skipped
pub fn decode_frame(raw: &str) -> Option<TransportEvent> {
    let frame: InboundFrame = match serde_json::from_str(raw) {
        Ok(frame) => frame,
        Err(e) => {
            warn!(
                "Invalid frame from backend: {} (raw: {})",
                e,
                truncate(raw, 100)
            );
            return None;
        }
    };

    let event = match frame {
        InboundFrame::Status {
            status,
            message,
            agent_type,
        } => TransportEvent::Status {
            status,
            message,
            agent_type,
        },
        InboundFrame::Progress {
            message,
            agent_type,
        } => TransportEvent::Progress {
            message,
            agent_type,
        },
        InboundFrame::Typing {
            is_typing,
            agent_id,
            agent_type,
        } => TransportEvent::Typing {
            is_typing,
            agent_id,
            agent_type,
        },
        InboundFrame::Message {
            id,
            content,
            agent_type,
            metadata,
        } => TransportEvent::Message {
            id: id.filter(|id| !id.is_empty()),
            content,
            agent_type,
            metadata,
        },
        // Application errors arrive over a healthy socket.
        InboundFrame::Error { error } => TransportEvent::Status {
            status: "error".to_string(),
            message: Some(error),
            agent_type: None,
        },
    };
    Some(event)
}

/// WebSocket connection handler
pub struct WebSocketTransport {
    name: String,
    ws_url: String,
    session_id: String,
    reconnect_delay: Duration,
    running: bool,
    event_tx: Option<mpsc::Sender<TransportEvent>>,
    /// Connection state
    connected: Arc<RwLock<bool>>,
    /// Background task handle
    task_handle: Option<JoinHandle<()>>,
    /// Shutdown signal
    shutdown_tx: Option<mpsc::Sender<()>>,
}

impl WebSocketTransport {
    /// Create a new WebSocket transport
    pub fn new(
        ws_url: impl Into<String>,
        session_id: impl Into<String>,
        config: &TransportConfig,
    ) -> Self {
        Self {
            name: "websocket".to_string(),
            ws_url: ws_url.into(),
            session_id: session_id.into(),
            reconnect_delay: config.reconnect_delay(),
            running: false,
            event_tx: None,
            connected: Arc::new(RwLock::new(false)),
            task_handle: None,
            shutdown_tx: None,
        }
    }

    /// Check whether the socket is currently open
    pub async fn is_connected(&self) -> bool {
        *self.connected.read().await
    }

    async fn emit(events: &mpsc::Sender<TransportEvent>, event: TransportEvent) {
        if events.send(event).await.is_err() {
            debug!("Transport event receiver dropped");
        }
    }

    /// WebSocket connection loop with reconnection
    async fn connection_loop(
        ws_url: String,
        session_id: String,
        reconnect_delay: Duration,
        connected: Arc<RwLock<bool>>,
        events: mpsc::Sender<TransportEvent>,
        mut shutdown_rx: mpsc::Receiver<()>,
    ) {
        loop {
            info!("Connecting to {}...", ws_url);

            let attempt = tokio::select! {
                attempt = connect_async(&ws_url) => attempt,
                _ = shutdown_rx.recv() => break,
            };

            match attempt {
                Ok((ws_stream, _)) => {
                    let (mut write, mut read) = ws_stream.split();

                    let join = match serde_json::to_string(&JoinCommand::new(&session_id)) {
                        Ok(payload) => payload,
                        Err(e) => {
                            error!("Failed to serialize join frame: {}", e);
                            break;
                        }
                    };
                    if let Err(e) = write.send(WsMessage::Text(join)).await {
                        error!("Failed to join session: {}", e);
                        Self::emit(
                            &events,
                            TransportEvent::Error {
                                message: e.to_string(),
                            },
                        )
                        .await;
                    } else {
                        info!("Connected to {}", ws_url);
                        *connected.write().await = true;
                        Self::emit(&events, TransportEvent::Connected).await;

                        let mut reason = None;
                        let mut shutdown = false;
                        loop {
                            tokio::select! {
                                msg = read.next() => {
                                    match msg {
                                        Some(Ok(WsMessage::Text(text))) => {
                                            if let Some(event) = decode_frame(&text) {
                                                Self::emit(&events, event).await;
                                            }
                                        }
                                        Some(Ok(WsMessage::Close(frame))) => {
                                            info!("WebSocket closed by server");
                                            reason = frame.map(|f| f.reason.to_string());
                                            break;
                                        }
                                        Some(Err(e)) => {
                                            error!("WebSocket error: {}", e);
                                            reason = Some(e.to_string());
                                            break;
                                        }
                                        None => break,
                                        _ => {}
                                    }
                                }
                                _ = shutdown_rx.recv() => {
                                    info!("Shutdown signal received");
                                    let _ = write.close().await;
                                    shutdown = true;
                                    break;
                                }
                            }
                        }

                        *connected.write().await = false;
                        Self::emit(&events, TransportEvent::Disconnected { reason }).await;
                        if shutdown {
                            break;
                        }
                    }
                }
                Err(e) => {
                    error!("Failed to connect to {}: {}", ws_url, e);
                    Self::emit(
                        &events,
                        TransportEvent::Error {
                            message: e.to_string(),
                        },
                    )
                    .await;
                }
            }

            info!("Reconnecting in {}ms...", reconnect_delay.as_millis());
            tokio::select! {
                _ = tokio::time::sleep(reconnect_delay) => {}
                _ = shutdown_rx.recv() => break,
            }
        }

        info!("WebSocket connection loop ended");
    }
}

#[async_trait]
impl ConnectionHandler for WebSocketTransport {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_running(&self) -> bool {
        self.running
    }

    async fn start(&mut self) -> Result<()> {
        if self.running {
            return Ok(());
        }

        let events = self.event_tx.clone().ok_or_else(|| {
            TransportError::NotRunning("no event sender configured".to_string())
        })?;

        info!("Starting WebSocket transport for {}", self.ws_url);

        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        self.shutdown_tx = Some(shutdown_tx);

        let handle = tokio::spawn(Self::connection_loop(
            self.ws_url.clone(),
            self.session_id.clone(),
            self.reconnect_delay,
            self.connected.clone(),
            events,
            shutdown_rx,
        ));

        self.task_handle = Some(handle);
        self.running = true;
        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        if !self.running {
            return Ok(());
        }

        info!("Stopping WebSocket transport...");

        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(()).await;
        }

        // Give the loop a moment to close the socket cleanly.
        if let Some(mut handle) = self.task_handle.take() {
            if tokio::time::timeout(Duration::from_secs(1), &mut handle)
                .await
                .is_err()
            {
                handle.abort();
            }
        }

        *self.connected.write().await = false;
        self.running = false;
        info!("WebSocket transport stopped");
        Ok(())
    }

    fn set_event_sender(&mut self, tx: mpsc::Sender<TransportEvent>) {
        self.event_tx = Some(tx);
    }
}
