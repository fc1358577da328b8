//! Configuration validation rules.

use super::schema::{ChatStreamConfig, Config};

/// Validate configuration and return aggregated validation errors.
pub fn validate_config(config: &Config) -> crate::Result<()> {
    let mut errors = stream_errors(&config.stream);

    if config.transport.reconnect_delay_ms == 0 {
        errors.push("transport.reconnect_delay_ms must be > 0".to_string());
    }
    if config.transport.connect_timeout_ms == 0 {
        errors.push("transport.connect_timeout_ms must be > 0".to_string());
    }

    finish(errors)
}

/// Validate only the engine parameters.
pub fn validate_stream_config(config: &ChatStreamConfig) -> crate::Result<()> {
    finish(stream_errors(config))
}

fn stream_errors(config: &ChatStreamConfig) -> Vec<String> {
    let mut errors = Vec::new();

    let api = config.api_endpoint.trim();
    if api.is_empty() {
        errors.push("stream.api_endpoint is required".to_string());
    } else if !(api.starts_with("http://") || api.starts_with("https://")) {
        errors.push("stream.api_endpoint must be an http(s) URL".to_string());
    }

    let ws = config.ws_endpoint.trim();
    if ws.is_empty() {
        errors.push("stream.ws_endpoint is required".to_string());
    } else if !(ws.starts_with("ws://") || ws.starts_with("wss://")) {
        errors.push("stream.ws_endpoint must be a ws(s) URL".to_string());
    }

    if config.session_id.trim().is_empty() {
        errors.push("stream.session_id is required".to_string());
    }
    if config.buffer_size == 0 {
        errors.push("stream.buffer_size must be > 0".to_string());
    }
    if config.retry_delay_ms == 0 {
        errors.push("stream.retry_delay_ms must be > 0".to_string());
    }
    if config.heartbeat_interval_ms == 0 {
        errors.push("stream.heartbeat_interval_ms must be > 0".to_string());
    }
    if config.message_timeout_ms == 0 {
        errors.push("stream.message_timeout_ms must be > 0".to_string());
    }
    if config.throttle_time_ms == 0 {
        errors.push("stream.throttle_time_ms must be > 0".to_string());
    }

    errors
}

fn finish(errors: Vec<String>) -> crate::Result<()> {
    if errors.is_empty() {
        Ok(())
    } else {
        Err(crate::Error::Validation(errors.join("; ")))
    }
}
