//! HTTP client for the orchestration endpoint

use async_trait::async_trait;
use diva_stream_core::config::TransportConfig;
use diva_stream_core::utils::{join_url, truncate};
use reqwest::Client;
use tracing::debug;

use crate::base::{OrchestrateClient, OrchestrateRequest, Result, TransportError};

const ORCHESTRATE_PATH: &str = "chat/orchestrate";

/// reqwest-backed [`OrchestrateClient`]
pub struct HttpOrchestrator {
    client: Client,
    url: String,
    request_retries: u32,
}

impl HttpOrchestrator {
    /// Create a client for `{api_endpoint}/chat/orchestrate`
    pub fn new(api_endpoint: &str, config: &TransportConfig) -> Self {
        Self {
            client: Client::builder()
                .connect_timeout(config.connect_timeout())
                .build()
                .unwrap_or_else(|_| Client::new()),
            url: join_url(api_endpoint, ORCHESTRATE_PATH),
            request_retries: config.request_retries,
        }
    }

    /// Target URL of the orchestrate call
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl OrchestrateClient for HttpOrchestrator {
    async fn orchestrate(&self, request: &OrchestrateRequest) -> Result<serde_json::Value> {
        debug!("POST {} (session {})", self.url, request.session_id);

        let response = self.client.post(&self.url).json(request).send().await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(TransportError::Status {
                status,
                body: truncate(&body, 200),
            });
        }

        let body = response.text().await?;
        if body.trim().is_empty() {
            return Ok(serde_json::Value::Null);
        }
        match serde_json::from_str(&body) {
            Ok(value) => Ok(value),
            Err(e) => {
                debug!("Orchestrate response is not JSON: {}", e);
                Ok(serde_json::Value::Null)
            }
        }
    }

    fn retry_budget(&self) -> u32 {
        self.request_retries
    }
}
