//! Terminal rendering of stream events

use console::style;
use diva_stream_core::bus::{ChatMessage, ConnectionStatus, MessageOrigin, MessageStatus, TypingIndicator};
use diva_stream_core::utils::truncate;

const ID_PREVIEW: usize = 8;

fn short_id(id: &str) -> String {
    id.chars().take(ID_PREVIEW).collect()
}

/// Render a message event as one line
pub fn message_line(msg: &ChatMessage) -> String {
    match msg.origin {
        MessageOrigin::User => {
            let status = match msg.status {
                MessageStatus::Pending => style("pending").dim(),
                MessageStatus::Sending => style("sending").yellow(),
                MessageStatus::Sent => style("sent").cyan(),
                MessageStatus::Delivered => style("delivered").green(),
                MessageStatus::Failed => style("failed").red().bold(),
            };
            let mut line = format!(
                "{} [{}] {} {}",
                style("you").bold(),
                short_id(&msg.id),
                status,
                truncate(&msg.content, 60)
            );
            if msg.retry_count > 0 {
                line.push_str(&format!(" (retry {})", msg.retry_count));
            }
            if let Some(err) = msg.metadata.get("errorMessage").and_then(|v| v.as_str()) {
                line.push_str(&format!(" {}", style(err).red()));
            }
            line
        }
        MessageOrigin::Agent => format!(
            "{} {}",
            style(format!("{}:", msg.agent_type.as_deref().unwrap_or("agent")))
                .green()
                .bold(),
            msg.content
        ),
        MessageOrigin::System => format!("{}", style(format!("* {}", msg.content)).dim()),
    }
}

/// Render the typing view, or `None` when nobody is typing
pub fn typing_line(view: &[TypingIndicator]) -> Option<String> {
    if view.is_empty() {
        return None;
    }
    let agents: Vec<&str> = view.iter().map(|i| i.agent_type.as_str()).collect();
    Some(format!(
        "{}",
        style(format!("{} typing...", agents.join(", "))).italic().dim()
    ))
}

/// Render a connection status change
pub fn connection_line(status: &ConnectionStatus) -> String {
    if status.is_connected {
        return format!("{}", style("connected").green());
    }
    match &status.error {
        Some(err) => format!(
            "{} (attempt {}): {}",
            style("disconnected").red(),
            status.reconnect_attempts,
            err
        ),
        None => format!(
            "{} (attempt {})",
            style("disconnected").yellow(),
            status.reconnect_attempts
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failed_line_shows_error() {
        console::set_colors_enabled(false);
        let msg = ChatMessage::user("Hello")
            .with_status(MessageStatus::Failed)
            .with_metadata("errorMessage", "HTTP 503: busy");
        let line = message_line(&msg);
        assert!(line.contains("failed"));
        assert!(line.contains("HTTP 503: busy"));
    }

    #[test]
    fn test_agent_line_uses_agent_type() {
        console::set_colors_enabled(false);
        let msg = ChatMessage::agent("Hi", Some("planner".to_string()));
        assert_eq!(message_line(&msg), "planner: Hi");
    }

    #[test]
    fn test_empty_typing_view_renders_nothing() {
        assert!(typing_line(&[]).is_none());
    }

    #[test]
    fn test_connection_error_line() {
        console::set_colors_enabled(false);
        let status = ConnectionStatus {
            error: Some("refused".to_string()),
            reconnect_attempts: 2,
            ..ConnectionStatus::disconnected()
        };
        assert_eq!(connection_line(&status), "disconnected (attempt 2): refused");
    }
}
