//! Outbound delivery of a single message

use diva_stream_core::bus::{ChatMessage, MessageBus, MessageStatus};
use diva_stream_transport::{
    OrchestrateClient, OrchestrateRequest, TransportError, TransportResult,
};
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

/// Reply carried by a successful orchestrate response
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplyPayload {
    pub message: String,
    #[serde(default)]
    pub agent_type: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

/// Decode a response body into a reply
///
/// `Ok(None)` when the body carries no reply: `null`, a body without a
/// `message` field (e.g. `{"success": true}`), or an empty message. `Err`
/// when a reply is present but has the wrong shape.
pub fn decode_reply(body: Value) -> serde_json::Result<Option<ReplyPayload>> {
    if body.get("message").map_or(true, Value::is_null) {
        return Ok(None);
    }
    let reply: ReplyPayload = serde_json::from_value(body)?;
    Ok(Some(reply).filter(|r| !r.message.is_empty()))
}

/// Extract the agent reply from a response body, logging malformed replies
pub fn parse_reply(body: Value) -> Option<ReplyPayload> {
    match decode_reply(body) {
        Ok(Some(reply)) => Some(reply),
        Ok(None) => {
            debug!("Orchestrate response carried no reply");
            None
        }
        Err(e) => {
            warn!("Ignoring malformed orchestrate reply: {}", e);
            None
        }
    }
}

/// Translates orchestrate calls into status transitions on the bus
pub struct NetworkSender {
    client: Arc<dyn OrchestrateClient>,
    bus: MessageBus,
    session_id: String,
    message_timeout: Duration,
    cancel: CancellationToken,
}

impl NetworkSender {
    pub fn new(
        client: Arc<dyn OrchestrateClient>,
        bus: MessageBus,
        session_id: impl Into<String>,
        message_timeout: Duration,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            client,
            bus,
            session_id: session_id.into(),
            message_timeout,
            cancel,
        }
    }

    /// Deliver one message
    ///
    /// Never fails: the outcome is published as `sent`/`delivered` or as a
    /// `failed` record carrying the error. A call still in flight when the
    /// engine is torn down is dropped without a status update.
    pub async fn send(&self, message: ChatMessage) {
        let sending = message.with_status(MessageStatus::Sending);
        self.bus.publish_message(sending.clone());

        let request = OrchestrateRequest {
            message: sending.content.clone(),
            session_id: self.session_id.clone(),
            metadata: sending.metadata.clone(),
        };

        let outcome = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                debug!(id = %sending.id, "Dropping in-flight send on teardown");
                return;
            }
            outcome = self.call_with_retry(&request) => outcome,
        };

        match outcome {
            Ok(body) => {
                let sent = sending.with_status(MessageStatus::Sent);
                self.bus.publish_message(sent.clone());

                if let Some(reply) = parse_reply(body) {
                    self.bus
                        .publish_message(sent.with_status(MessageStatus::Delivered));
                    let agent = ChatMessage::agent(reply.message, reply.agent_type)
                        .extend_metadata(reply.metadata)
                        .with_metadata("replyTo", sent.id.clone());
                    debug!(id = %agent.id, reply_to = %sent.id, "Received agent reply");
                    self.bus.publish_message(agent);
                }
            }
            Err(e) => {
                error!(
                    id = %sending.id,
                    retry_count = sending.retry_count,
                    "Message delivery failed: {}",
                    e
                );
                let failed = sending
                    .with_status(MessageStatus::Failed)
                    .with_metadata("error", true)
                    .with_metadata("errorMessage", e.to_string());
                self.bus.publish_message(failed);
            }
        }
    }

    async fn call_with_retry(&self, request: &OrchestrateRequest) -> TransportResult<Value> {
        let budget = self.client.retry_budget();
        let mut attempt = 0;

        loop {
            attempt += 1;
            let err = match tokio::time::timeout(
                self.message_timeout,
                self.client.orchestrate(request),
            )
            .await
            {
                Ok(Ok(body)) => return Ok(body),
                Ok(Err(e)) => e,
                Err(_) => TransportError::Timeout(self.message_timeout.as_millis() as u64),
            };

            if attempt > budget {
                return Err(err);
            }
            warn!(
                "Orchestrate attempt {}/{} failed: {}",
                attempt,
                budget + 1,
                err
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::MockClient;
    use serde_json::json;

    fn sender(client: Arc<MockClient>, bus: &MessageBus) -> NetworkSender {
        NetworkSender::new(
            client,
            bus.clone(),
            "session-1",
            Duration::from_millis(500),
            CancellationToken::new(),
        )
    }

    fn statuses(messages: &[ChatMessage], id: &str) -> Vec<MessageStatus> {
        messages
            .iter()
            .filter(|m| m.id == id)
            .map(|m| m.status)
            .collect()
    }

    #[test]
    fn test_parse_reply_shapes() {
        assert_eq!(parse_reply(Value::Null), None);
        assert_eq!(parse_reply(json!({"message": ""})), None);
        assert_eq!(parse_reply(json!({"status": "ok"})), None);
        assert_eq!(parse_reply(json!({"message": 42})), None);

        assert!(decode_reply(json!({"success": true})).unwrap().is_none());
        assert!(decode_reply(json!({"message": null})).unwrap().is_none());
        assert!(decode_reply(json!([1, 2])).unwrap().is_none());
        assert!(decode_reply(json!({"message": 42})).is_err());
        assert!(decode_reply(json!({"message": "Hi", "metadata": "x"})).is_err());

        let reply = parse_reply(json!({
            "message": "Hi",
            "agentType": "planner",
            "metadata": {"confidence": 0.5}
        }))
        .unwrap();
        assert_eq!(reply.message, "Hi");
        assert_eq!(reply.agent_type.as_deref(), Some("planner"));
        assert_eq!(reply.metadata["confidence"], json!(0.5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_with_reply_is_delivered() {
        let bus = MessageBus::new(10);
        let mut sub = bus.subscribe_messages();
        let client = Arc::new(MockClient::replying(json!({"message": "Hi", "agentType": "chat"})));
        let msg = ChatMessage::user("Hello");

        sender(client.clone(), &bus).send(msg.clone()).await;

        let events = sub.drain();
        assert_eq!(
            statuses(&events, &msg.id),
            vec![
                MessageStatus::Sending,
                MessageStatus::Sent,
                MessageStatus::Delivered
            ]
        );
        let replies: Vec<&ChatMessage> = events.iter().filter(|m| m.id != msg.id).collect();
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].content, "Hi");
        assert_eq!(replies[0].agent_type.as_deref(), Some("chat"));
        assert_eq!(replies[0].metadata["replyTo"], json!(msg.id));
        assert_eq!(client.calls()[0].message, "Hello");
        assert_eq!(client.calls()[0].session_id, "session-1");
    }

    #[tokio::test(start_paused = true)]
    async fn test_acknowledgement_without_reply_stays_sent() {
        let bus = MessageBus::new(10);
        let mut sub = bus.subscribe_messages();
        let client = Arc::new(MockClient::replying(json!({"success": true})));
        let msg = ChatMessage::user("Hello");

        sender(client, &bus).send(msg.clone()).await;

        let events = sub.drain();
        assert_eq!(events.len(), 2);
        assert_eq!(
            statuses(&events, &msg.id),
            vec![MessageStatus::Sending, MessageStatus::Sent]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_reply_stays_sent() {
        let bus = MessageBus::new(10);
        let mut sub = bus.subscribe_messages();
        let client = Arc::new(MockClient::replying(json!({"message": 42})));
        let msg = ChatMessage::user("Hello");

        sender(client, &bus).send(msg.clone()).await;

        let events = sub.drain();
        assert_eq!(events.len(), 2);
        assert_eq!(
            statuses(&events, &msg.id),
            vec![MessageStatus::Sending, MessageStatus::Sent]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_uses_retry_budget_then_fails() {
        let bus = MessageBus::new(10);
        let mut sub = bus.subscribe_messages();
        let client = Arc::new(MockClient::failing().with_budget(2));
        let msg = ChatMessage::user("Hello");

        sender(client.clone(), &bus).send(msg.clone()).await;

        assert_eq!(client.call_count(), 3);
        let events = sub.drain();
        let failed = events.last().unwrap();
        assert_eq!(failed.status, MessageStatus::Failed);
        assert_eq!(failed.metadata["error"], json!(true));
        assert!(failed.metadata["errorMessage"]
            .as_str()
            .unwrap()
            .contains("503"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_a_failed_attempt() {
        let bus = MessageBus::new(10);
        let mut sub = bus.subscribe_messages();
        let client = Arc::new(
            MockClient::replying(Value::Null).with_latency(Duration::from_secs(5)),
        );
        let msg = ChatMessage::user("slow");

        sender(client.clone(), &bus).send(msg.clone()).await;

        let failed = sub.drain().pop().unwrap();
        assert_eq!(failed.status, MessageStatus::Failed);
        assert_eq!(
            failed.metadata["errorMessage"],
            json!("Request timed out after 500ms")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_teardown_drops_in_flight_call() {
        let bus = MessageBus::new(10);
        let mut sub = bus.subscribe_messages();
        let client = Arc::new(
            MockClient::replying(json!({"message": "late"}))
                .with_latency(Duration::from_millis(300)),
        );
        let cancel = CancellationToken::new();
        let sender = NetworkSender::new(
            client,
            bus.clone(),
            "session-1",
            Duration::from_secs(1),
            cancel.clone(),
        );
        let msg = ChatMessage::user("Hello");

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });
        sender.send(msg.clone()).await;

        assert_eq!(
            statuses(&sub.drain(), &msg.id),
            vec![MessageStatus::Sending]
        );
    }
}
