//! Chat stream engine facade

use crate::connection::{ConnectionChange, ConnectionMonitor};
use crate::history::{HistoryAggregator, HistorySnapshot};
use crate::queue::{run_queue_processor, OutboundQueue};
use crate::retry::{RetryHandle, RetryPipeline};
use crate::sender::NetworkSender;
use crate::typing::TypingTracker;
use diva_stream_core::bus::{
    ChatMessage, ConnectionStatus, MessageBus, MessageOrigin, MessageStatus, Priority,
    Subscription, TypingIndicator,
};
use diva_stream_core::config::{validate_stream_config, ChatStreamConfig};
use diva_stream_transport::{
    ConnectionHandler, OrchestrateClient, TransportError, TransportEvent, TransportResult,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Agent id used for typing events that do not name one
pub const DEFAULT_AGENT_ID: &str = "orchestrator";

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// A structured request for a backend adapter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdapterAction {
    pub adapter: String,
    pub action: String,
    #[serde(default)]
    pub parameters: HashMap<String, Value>,
}

impl AdapterAction {
    pub fn new(adapter: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            adapter: adapter.into(),
            action: action.into(),
            parameters: HashMap::new(),
        }
    }

    /// Add a parameter to the action
    pub fn with_parameter(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    fn into_message(self) -> ChatMessage {
        let content = format!("{}:{}", self.adapter, self.action);
        ChatMessage::user(content)
            .with_metadata("type", "adapter_action")
            .with_metadata("adapter", self.adapter)
            .with_metadata("action", self.action)
            .with_metadata(
                "parameters",
                Value::Object(self.parameters.into_iter().collect()),
            )
    }
}

/// Real-time chat stream for one session
///
/// Merges locally sent messages, their delivery outcomes and inbound
/// transport events into a single ordered, bounded conversation. All
/// operations return immediately; results are observed through the
/// snapshot getters or the subscription streams.
///
/// Must be created inside a tokio runtime. Background tasks stop on
/// [`ChatStreamEngine::destroy`] or when the engine is dropped.
pub struct ChatStreamEngine {
    config: ChatStreamConfig,
    bus: MessageBus,
    history: HistoryAggregator,
    typing: TypingTracker,
    connection: ConnectionMonitor,
    queue: OutboundQueue,
    retry: RetryHandle,
    events_tx: mpsc::Sender<TransportEvent>,
    transport: tokio::sync::Mutex<Option<Box<dyn ConnectionHandler>>>,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    destroyed: AtomicBool,
}

impl ChatStreamEngine {
    /// Validate `config` and start the background pipeline
    pub fn new(
        config: ChatStreamConfig,
        client: Arc<dyn OrchestrateClient>,
    ) -> diva_stream_core::Result<Self> {
        validate_stream_config(&config)?;

        let bus = MessageBus::new(config.buffer_size);
        let history = HistoryAggregator::attach(&bus, config.buffer_size);
        let typing = TypingTracker::new(bus.clone());
        let connection = ConnectionMonitor::new(bus.clone());
        let cancel = CancellationToken::new();

        let (queue, queue_rx) = OutboundQueue::channel();
        let sender = Arc::new(NetworkSender::new(
            client,
            bus.clone(),
            config.session_id.clone(),
            config.message_timeout(),
            cancel.clone(),
        ));
        let (retry_pipeline, retry) =
            RetryPipeline::new(bus.clone(), queue.clone(), config.clone(), history.watch());
        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

        let tasks = vec![
            tokio::spawn(run_queue_processor(
                queue_rx,
                sender,
                config.throttle_time(),
                cancel.clone(),
            )),
            tokio::spawn(retry_pipeline.run(bus.subscribe_messages(), cancel.clone())),
            tokio::spawn(route_inbound(
                events_rx,
                bus.clone(),
                typing.clone(),
                connection.clone(),
                cancel.clone(),
            )),
            typing.spawn_expiry(cancel.clone()),
            connection.spawn_heartbeat(config.heartbeat_interval(), cancel.clone()),
        ];

        info!(session = %config.session_id, "Chat stream engine started");

        Ok(Self {
            config,
            bus,
            history,
            typing,
            connection,
            queue,
            retry,
            events_tx,
            transport: tokio::sync::Mutex::new(None),
            cancel,
            tasks: Mutex::new(tasks),
            destroyed: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &ChatStreamConfig {
        &self.config
    }

    /// Send a user message at normal priority
    pub fn send_message(
        &self,
        content: impl Into<String>,
        metadata: Option<HashMap<String, Value>>,
    ) -> ChatMessage {
        self.send_message_with_priority(content, metadata, Priority::Normal)
    }

    /// Send a user message at an explicit priority
    ///
    /// Returns the message as first published (`pending`). After teardown
    /// the returned message is `failed` and nothing is sent.
    pub fn send_message_with_priority(
        &self,
        content: impl Into<String>,
        metadata: Option<HashMap<String, Value>>,
        priority: Priority,
    ) -> ChatMessage {
        let mut message = ChatMessage::user(content);
        if let Some(metadata) = metadata {
            message = message.extend_metadata(metadata);
        }
        self.submit(message, priority)
    }

    /// Send an adapter action at high priority
    pub fn send_adapter_action(&self, action: AdapterAction) -> ChatMessage {
        self.submit(action.into_message(), Priority::High)
    }

    fn submit(&self, message: ChatMessage, priority: Priority) -> ChatMessage {
        if self.is_destroyed() {
            warn!(id = %message.id, "Send after destroy ignored");
            return message
                .with_status(MessageStatus::Failed)
                .with_metadata("error", true)
                .with_metadata("errorMessage", "engine destroyed");
        }

        debug!(id = %message.id, ?priority, "Submitting message");
        self.bus.publish_message(message.clone());
        self.queue.enqueue(message.clone(), priority);
        message
    }

    /// Manually retry a failed user message
    ///
    /// Starts a fresh bounded retry cycle at high priority. Returns `false`
    /// for unknown ids and for messages that are not currently `failed`.
    pub fn retry_message(&self, id: &str) -> bool {
        if self.is_destroyed() {
            return false;
        }
        let Some(message) = self.history.get(id) else {
            return false;
        };
        if message.origin != MessageOrigin::User || message.status != MessageStatus::Failed {
            return false;
        }

        debug!(id = %id, "Requesting manual retry");
        self.retry.request(id)
    }

    pub fn get_message_by_id(&self, id: &str) -> Option<ChatMessage> {
        self.history.get(id)
    }

    pub fn filter_messages_by_type(&self, origin: MessageOrigin) -> Vec<ChatMessage> {
        self.history.by_origin(origin)
    }

    pub fn get_agent_messages(&self, agent_type: &str) -> Vec<ChatMessage> {
        self.history.by_agent_type(agent_type)
    }

    /// Record a typing change for a remote agent
    pub fn set_typing(&self, agent_id: &str, agent_type: &str, is_typing: bool) {
        self.typing.set_typing(agent_id, agent_type, is_typing);
    }

    /// Raw message stream, starting with the replay buffer
    pub fn messages(&self) -> Subscription<ChatMessage> {
        self.bus.subscribe_messages()
    }

    /// Current conversation snapshot
    pub fn history(&self) -> HistorySnapshot {
        self.history.snapshot()
    }

    pub fn watch_history(&self) -> watch::Receiver<HistorySnapshot> {
        self.history.watch()
    }

    /// Empty the conversation snapshot
    pub fn clear_history(&self) {
        self.history.clear();
    }

    pub fn typing_indicators(&self) -> Vec<TypingIndicator> {
        self.typing.current()
    }

    pub fn typing_updates(&self) -> Subscription<Vec<TypingIndicator>> {
        self.bus.subscribe_typing()
    }

    pub fn connection_status(&self) -> ConnectionStatus {
        self.connection.current()
    }

    pub fn connection_updates(&self) -> Subscription<ConnectionStatus> {
        self.bus.subscribe_connection()
    }

    /// Sender for feeding transport events into the engine
    pub fn event_sender(&self) -> mpsc::Sender<TransportEvent> {
        self.events_tx.clone()
    }

    /// Wire a realtime transport into the engine and start it
    ///
    /// Replaces (and stops) a previously attached transport.
    pub async fn attach_transport(
        &self,
        mut handler: Box<dyn ConnectionHandler>,
    ) -> TransportResult<()> {
        if self.is_destroyed() {
            return Err(TransportError::NotRunning("engine destroyed".to_string()));
        }

        handler.set_event_sender(self.events_tx.clone());
        handler.start().await?;
        info!("Attached transport {}", handler.name());

        let previous = self.transport.lock().await.replace(handler);
        if let Some(mut previous) = previous {
            if let Err(e) = previous.stop().await {
                warn!("Failed to stop transport {}: {}", previous.name(), e);
            }
        }
        Ok(())
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }

    /// Tear down the engine
    ///
    /// Cancels every timer and in-flight call, completes all streams and
    /// stops the attached transport. Calling it again is a no-op.
    pub async fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        info!(session = %self.config.session_id, "Destroying chat stream engine");

        self.cancel.cancel();
        self.history.detach();
        self.bus.close();

        if let Some(mut transport) = self.transport.lock().await.take() {
            if let Err(e) = transport.stop().await {
                warn!("Failed to stop transport {}: {}", transport.name(), e);
            }
        }

        let tasks = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            if let Err(e) = task.await {
                warn!("Engine task ended abnormally: {}", e);
            }
        }
        info!("Chat stream engine destroyed");
    }
}

impl Drop for ChatStreamEngine {
    fn drop(&mut self) {
        if !self.destroyed.swap(true, Ordering::SeqCst) {
            self.cancel.cancel();
            self.bus.close();
        }
    }
}

async fn route_inbound(
    mut events: mpsc::Receiver<TransportEvent>,
    bus: MessageBus,
    typing: TypingTracker,
    connection: ConnectionMonitor,
    cancel: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            event = events.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };
        route_event(event, &bus, &typing, &connection);
    }
    debug!("Inbound router stopped");
}

fn route_event(
    event: TransportEvent,
    bus: &MessageBus,
    typing: &TypingTracker,
    connection: &ConnectionMonitor,
) {
    match event {
        TransportEvent::Connected => connection.apply(ConnectionChange::Connected),
        TransportEvent::Disconnected { reason } => {
            connection.apply(ConnectionChange::Disconnected { reason })
        }
        TransportEvent::Error { message } => connection.apply(ConnectionChange::Error { message }),
        TransportEvent::Status {
            status,
            message,
            agent_type,
        } => match message {
            Some(text) => {
                let mut notice = ChatMessage::system(text)
                    .with_metadata("event", "status")
                    .with_metadata("status", status);
                if let Some(agent_type) = agent_type {
                    notice = notice.with_metadata("agentType", agent_type);
                }
                bus.publish_message(notice);
            }
            None => debug!("Status update without message: {}", status),
        },
        TransportEvent::Progress {
            message,
            agent_type,
        } => {
            let mut notice = ChatMessage::system(message).with_metadata("event", "progress");
            if let Some(agent_type) = agent_type {
                notice = notice.with_metadata("agentType", agent_type);
            }
            bus.publish_message(notice);
        }
        TransportEvent::Typing {
            is_typing,
            agent_id,
            agent_type,
        } => {
            let agent_id = agent_id.unwrap_or_else(|| DEFAULT_AGENT_ID.to_string());
            let agent_type = agent_type.unwrap_or_else(|| agent_id.clone());
            typing.set_typing(&agent_id, &agent_type, is_typing);
        }
        TransportEvent::Message {
            id,
            content,
            agent_type,
            metadata,
        } => {
            let agent_type = agent_type.or_else(|| {
                metadata
                    .get("agentType")
                    .and_then(Value::as_str)
                    .map(str::to_string)
            });
            let mut message = ChatMessage::agent(content, agent_type).extend_metadata(metadata);
            if let Some(id) = id {
                message.id = id;
            }
            bus.publish_message(message);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{unavailable, MockClient};
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::HashSet;
    use std::time::Duration;

    fn config() -> ChatStreamConfig {
        ChatStreamConfig::new("http://localhost:3000/api", "ws://localhost:3000/ws", "session-1")
    }

    fn engine(config: ChatStreamConfig, client: Arc<MockClient>) -> ChatStreamEngine {
        ChatStreamEngine::new(config, client).unwrap()
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_secs(120)).await;
    }

    fn statuses(events: &[ChatMessage], id: &str) -> Vec<MessageStatus> {
        events.iter().filter(|m| m.id == id).map(|m| m.status).collect()
    }

    #[tokio::test]
    async fn test_invalid_config_is_rejected() {
        let client = Arc::new(MockClient::replying(Value::Null));
        let result = ChatStreamEngine::new(ChatStreamConfig::default(), client);
        assert!(result.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_reaches_delivered_with_one_reply() {
        let client = Arc::new(MockClient::replying(
            json!({"message": "Hi there", "agentType": "orchestrator"}),
        ));
        let engine = engine(config(), client.clone());
        let mut sub = engine.messages();

        let sent = engine.send_message("Hello", None);
        assert_eq!(sent.status, MessageStatus::Pending);
        settle().await;

        let events = sub.drain();
        assert_eq!(
            statuses(&events, &sent.id),
            vec![
                MessageStatus::Pending,
                MessageStatus::Sending,
                MessageStatus::Sent,
                MessageStatus::Delivered
            ]
        );

        let replies = engine.filter_messages_by_type(MessageOrigin::Agent);
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].content, "Hi there");
        assert_eq!(engine.get_agent_messages("orchestrator").len(), 1);
        assert_eq!(
            engine.get_message_by_id(&sent.id).unwrap().status,
            MessageStatus::Delivered
        );
        assert_eq!(client.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_history_keeps_send_order() {
        let client = Arc::new(MockClient::replying(Value::Null));
        let engine = engine(config(), client);

        let ids: Vec<String> = (0..5)
            .map(|i| engine.send_message(format!("m{}", i), None).id)
            .collect();
        settle().await;

        let history: Vec<String> = engine
            .filter_messages_by_type(MessageOrigin::User)
            .into_iter()
            .map(|m| m.id)
            .collect();
        assert_eq!(history, ids);
        assert!(engine
            .history()
            .iter()
            .all(|m| m.status == MessageStatus::Sent));
    }

    #[tokio::test(start_paused = true)]
    async fn test_history_is_bounded_and_unique() {
        let client = Arc::new(MockClient::replying(Value::Null));
        let engine = engine(config(), client);

        let ids: Vec<String> = (0..150)
            .map(|i| engine.send_message(format!("m{}", i), None).id)
            .collect();
        settle().await;

        let history = engine.history();
        assert_eq!(history.len(), 100);
        let kept: Vec<&str> = history.iter().map(|m| m.id.as_str()).collect();
        let expected: Vec<&str> = ids[50..].iter().map(String::as_str).collect();
        assert_eq!(kept, expected);
        let unique: HashSet<&str> = kept.iter().copied().collect();
        assert_eq!(unique.len(), kept.len());
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_backoff_doubles() {
        let client = Arc::new(MockClient::failing());
        let engine = engine(config(), client.clone());

        engine.send_message("Hello", None);
        settle().await;

        let times = client.call_times();
        assert_eq!(times.len(), 4);
        for (k, pair) in times.windows(2).enumerate() {
            let gap = pair[1] - pair[0];
            assert!(gap >= Duration::from_millis(1000 << k), "retry {} after {:?}", k + 1, gap);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_cap_limits_failures() {
        let client = Arc::new(MockClient::failing());
        let engine = engine(
            ChatStreamConfig {
                max_retries: 2,
                ..config()
            },
            client.clone(),
        );
        let mut sub = engine.messages();

        let sent = engine.send_message("Hello", None);
        settle().await;

        let failures = statuses(&sub.drain(), &sent.id)
            .into_iter()
            .filter(|s| *s == MessageStatus::Failed)
            .count();
        assert_eq!(failures, 3);
        assert_eq!(client.call_count(), 3);

        let last = engine.get_message_by_id(&sent.id).unwrap();
        assert_eq!(last.status, MessageStatus::Failed);
        assert_eq!(last.retry_count, 2);
        assert_eq!(last.metadata["error"], json!(true));
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_dispatches_by_priority() {
        let client = Arc::new(MockClient::replying(Value::Null));
        let engine = engine(config(), client.clone());

        engine.send_message_with_priority("low", None, Priority::Low);
        engine.send_message_with_priority("high", None, Priority::High);
        engine.send_message_with_priority("normal", None, Priority::Normal);
        settle().await;

        let order: Vec<String> = client.calls().into_iter().map(|r| r.message).collect();
        assert_eq!(order, vec!["high", "normal", "low"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_adapter_action_jumps_the_window() {
        let client = Arc::new(MockClient::replying(Value::Null));
        let engine = engine(config(), client.clone());

        engine.send_message("chat", None);
        let action = engine.send_adapter_action(
            AdapterAction::new("github", "open_pr").with_parameter("repo", "diva"),
        );
        settle().await;

        let calls = client.calls();
        assert_eq!(calls[0].message, "github:open_pr");
        assert_eq!(calls[0].metadata["type"], json!("adapter_action"));
        assert_eq!(calls[0].metadata["parameters"], json!({"repo": "diva"}));
        assert_eq!(calls[1].message, "chat");
        assert_eq!(action.metadata["adapter"], json!("github"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_manual_retry_starts_fresh_cycle() {
        let client = Arc::new(MockClient::scripted(|n, _| {
            if n == 0 {
                Err(unavailable())
            } else {
                Ok(Value::Null)
            }
        }));
        let engine = engine(
            ChatStreamConfig {
                max_retries: 0,
                ..config()
            },
            client.clone(),
        );

        let sent = engine.send_message("Hello", None);
        settle().await;
        assert_eq!(
            engine.get_message_by_id(&sent.id).unwrap().status,
            MessageStatus::Failed
        );

        assert!(!engine.retry_message("missing"));
        assert!(engine.retry_message(&sent.id));
        settle().await;

        let after = engine.get_message_by_id(&sent.id).unwrap();
        assert_eq!(after.status, MessageStatus::Sent);
        assert_eq!(after.retry_count, 0);
        assert!(!after.metadata.contains_key("error"));
        assert!(!engine.retry_message(&sent.id));
        assert_eq!(client.call_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_inbound_events_are_routed() {
        let client = Arc::new(MockClient::replying(Value::Null));
        let engine = engine(config(), client);
        let events = engine.event_sender();

        let mut metadata = HashMap::new();
        metadata.insert("agentType".to_string(), json!("researcher"));
        for event in [
            TransportEvent::Status {
                status: "processing".to_string(),
                message: Some("Routing request".to_string()),
                agent_type: None,
            },
            TransportEvent::Status {
                status: "idle".to_string(),
                message: None,
                agent_type: None,
            },
            TransportEvent::Progress {
                message: "Searching".to_string(),
                agent_type: Some("researcher".to_string()),
            },
            TransportEvent::Typing {
                is_typing: true,
                agent_id: None,
                agent_type: None,
            },
            TransportEvent::Message {
                id: Some("remote-1".to_string()),
                content: "Found it".to_string(),
                agent_type: None,
                metadata,
            },
        ] {
            events.send(event).await.unwrap();
        }
        tokio::time::sleep(Duration::from_millis(10)).await;

        let system = engine.filter_messages_by_type(MessageOrigin::System);
        assert_eq!(system.len(), 2);
        assert_eq!(system[0].metadata["event"], json!("status"));
        assert_eq!(system[1].metadata["event"], json!("progress"));

        let reply = engine.get_message_by_id("remote-1").unwrap();
        assert_eq!(reply.status, MessageStatus::Delivered);
        assert_eq!(reply.agent_type.as_deref(), Some("researcher"));

        let typing = engine.typing_indicators();
        assert_eq!(typing.len(), 1);
        assert_eq!(typing[0].agent_id, DEFAULT_AGENT_ID);
    }

    #[tokio::test(start_paused = true)]
    async fn test_typing_expires_through_engine() {
        let client = Arc::new(MockClient::replying(Value::Null));
        let engine = engine(config(), client);
        let mut updates = engine.typing_updates();

        engine.set_typing("a1", "planner", true);
        tokio::time::sleep(Duration::from_millis(4990)).await;
        assert_eq!(engine.typing_indicators().len(), 1);

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(engine.typing_indicators().is_empty());

        let views: Vec<usize> = updates.drain().iter().map(Vec::len).collect();
        assert_eq!(views, vec![0, 1, 0]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connection_error_never_connected() {
        let client = Arc::new(MockClient::replying(Value::Null));
        let engine = engine(config(), client);
        let mut updates = engine.connection_updates();
        let events = engine.event_sender();

        for event in [
            TransportEvent::Error {
                message: "refused".to_string(),
            },
            TransportEvent::Connected,
            TransportEvent::Disconnected { reason: None },
            TransportEvent::Error {
                message: "refused".to_string(),
            },
            TransportEvent::Connected,
        ] {
            events.send(event).await.unwrap();
        }
        tokio::time::sleep(Duration::from_secs(65)).await;

        let emitted = updates.drain();
        assert!(emitted.len() >= 6);
        for status in &emitted {
            if status.error.is_some() {
                assert!(!status.is_connected);
            }
        }
        let current = engine.connection_status();
        assert!(current.is_connected);
        assert_eq!(current.reconnect_attempts, 0);
    }

    struct ScriptedTransport {
        running: bool,
        events: Option<mpsc::Sender<TransportEvent>>,
        stopped: Arc<AtomicBool>,
    }

    #[async_trait]
    impl ConnectionHandler for ScriptedTransport {
        fn name(&self) -> &str {
            "scripted"
        }

        fn is_running(&self) -> bool {
            self.running
        }

        async fn start(&mut self) -> TransportResult<()> {
            let events = self
                .events
                .as_ref()
                .ok_or_else(|| TransportError::NotRunning("no event sender".to_string()))?;
            let _ = events.send(TransportEvent::Connected).await;
            self.running = true;
            Ok(())
        }

        async fn stop(&mut self) -> TransportResult<()> {
            self.running = false;
            self.stopped.store(true, Ordering::SeqCst);
            Ok(())
        }

        fn set_event_sender(&mut self, tx: mpsc::Sender<TransportEvent>) {
            self.events = Some(tx);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_destroy_tears_everything_down() {
        let client = Arc::new(MockClient::replying(Value::Null));
        let engine = engine(config(), client);
        let stopped = Arc::new(AtomicBool::new(false));
        engine
            .attach_transport(Box::new(ScriptedTransport {
                running: false,
                events: None,
                stopped: stopped.clone(),
            }))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(engine.connection_status().is_connected);

        let mut sub = engine.messages();
        engine.send_message("before", None);
        engine.destroy().await;

        assert!(engine.is_destroyed());
        assert!(stopped.load(Ordering::SeqCst));
        while sub.recv().await.is_some() {}

        let late = engine.send_message("after", None);
        assert_eq!(late.status, MessageStatus::Failed);
        assert_eq!(late.metadata["errorMessage"], json!("engine destroyed"));
        assert!(engine.get_message_by_id(&late.id).is_none());
        assert!(!engine.retry_message(&late.id));

        engine.destroy().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_history_keeps_pipeline_running() {
        let client = Arc::new(MockClient::replying(Value::Null));
        let engine = engine(config(), client);
        engine.send_message("one", None);
        settle().await;
        engine.clear_history();
        assert!(engine.history().is_empty());

        engine.send_message("two", None);
        settle().await;
        assert_eq!(engine.history().len(), 1);
        assert_eq!(engine.history()[0].content, "two");
    }
}
