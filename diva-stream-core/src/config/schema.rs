//! Configuration schema definitions

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Root configuration for diva-stream
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Streaming engine configuration
    #[serde(default)]
    pub stream: ChatStreamConfig,
    /// Transport adapter configuration
    #[serde(default)]
    pub transport: TransportConfig,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Streaming engine parameters, immutable per engine instance
///
/// Durations are expressed in milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatStreamConfig {
    /// Base URL of the orchestration HTTP API
    #[serde(default, alias = "apiEndpoint")]
    pub api_endpoint: String,
    /// URL of the realtime WebSocket endpoint
    #[serde(default, alias = "wsEndpoint")]
    pub ws_endpoint: String,
    /// Conversation session identifier
    #[serde(default, alias = "sessionId")]
    pub session_id: String,
    /// Automatic redelivery attempts for a failed message
    #[serde(default = "default_max_retries", alias = "maxRetries")]
    pub max_retries: u32,
    /// Backoff base unit
    #[serde(default = "default_retry_delay_ms", alias = "retryDelay")]
    pub retry_delay_ms: u64,
    /// Heartbeat period of the connection monitor
    #[serde(default = "default_heartbeat_interval_ms", alias = "heartbeatInterval")]
    pub heartbeat_interval_ms: u64,
    /// Per-attempt timeout of an outbound call
    #[serde(default = "default_message_timeout_ms", alias = "messageTimeout")]
    pub message_timeout_ms: u64,
    /// History length and message replay size
    #[serde(default = "default_buffer_size", alias = "bufferSize")]
    pub buffer_size: usize,
    /// Outbound batching window
    #[serde(default = "default_throttle_time_ms", alias = "throttleTime")]
    pub throttle_time_ms: u64,
}

/// Upper bound on a single retry backoff
pub const MAX_RETRY_BACKOFF: Duration = Duration::from_secs(24 * 60 * 60);

fn default_max_retries() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    1000
}

fn default_heartbeat_interval_ms() -> u64 {
    30_000
}

fn default_message_timeout_ms() -> u64 {
    30_000
}

fn default_buffer_size() -> usize {
    100
}

fn default_throttle_time_ms() -> u64 {
    100
}

impl ChatStreamConfig {
    /// Create a config with the required fields and default tuning
    pub fn new(
        api_endpoint: impl Into<String>,
        ws_endpoint: impl Into<String>,
        session_id: impl Into<String>,
    ) -> Self {
        Self {
            api_endpoint: api_endpoint.into(),
            ws_endpoint: ws_endpoint.into(),
            session_id: session_id.into(),
            ..Self::default()
        }
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn message_timeout(&self) -> Duration {
        Duration::from_millis(self.message_timeout_ms)
    }

    pub fn throttle_time(&self) -> Duration {
        Duration::from_millis(self.throttle_time_ms)
    }

    /// Backoff before retry number `retry_count + 1`, capped at [`MAX_RETRY_BACKOFF`]
    pub fn backoff_for(&self, retry_count: u32) -> Duration {
        let factor = 2u64.saturating_pow(retry_count);
        Duration::from_millis(self.retry_delay_ms.saturating_mul(factor))
            .min(MAX_RETRY_BACKOFF)
    }
}

impl Default for ChatStreamConfig {
    fn default() -> Self {
        Self {
            api_endpoint: String::new(),
            ws_endpoint: String::new(),
            session_id: String::new(),
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            message_timeout_ms: default_message_timeout_ms(),
            buffer_size: default_buffer_size(),
            throttle_time_ms: default_throttle_time_ms(),
        }
    }
}

/// Transport adapter settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Delay between WebSocket reconnection attempts
    #[serde(default = "default_reconnect_delay_ms", alias = "reconnectDelay")]
    pub reconnect_delay_ms: u64,
    /// Extra attempts the HTTP client makes before giving up on a call
    #[serde(default = "default_request_retries", alias = "requestRetries")]
    pub request_retries: u32,
    /// TCP connect timeout of the HTTP client
    #[serde(default = "default_connect_timeout_ms", alias = "connectTimeout")]
    pub connect_timeout_ms: u64,
}

fn default_reconnect_delay_ms() -> u64 {
    5000
}

fn default_request_retries() -> u32 {
    2
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}

impl TransportConfig {
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            reconnect_delay_ms: default_reconnect_delay_ms(),
            request_retries: default_request_retries(),
            connect_timeout_ms: default_connect_timeout_ms(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Log format (text, json)
    #[serde(default = "default_log_format")]
    pub format: String,
    /// Directory for log files
    #[serde(default = "default_log_dir")]
    pub dir: String,
    /// Module-specific overrides
    #[serde(default)]
    pub overrides: HashMap<String, String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

fn default_log_dir() -> String {
    "logs".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            dir: default_log_dir(),
            overrides: HashMap::new(),
        }
    }
}
