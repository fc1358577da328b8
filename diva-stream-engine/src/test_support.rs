//! Scripted orchestrate client for unit tests

use async_trait::async_trait;
use diva_stream_transport::{
    OrchestrateClient, OrchestrateRequest, TransportError, TransportResult,
};
use parking_lot::Mutex;
use serde_json::Value;
use std::time::Duration;
use tokio::time::Instant;

type Responder = Box<dyn Fn(usize, &OrchestrateRequest) -> TransportResult<Value> + Send + Sync>;

pub(crate) struct MockClient {
    responder: Responder,
    latency: Duration,
    budget: u32,
    calls: Mutex<Vec<(Instant, OrchestrateRequest)>>,
}

impl MockClient {
    /// Answer call `n` (zero based) with `responder(n, request)`
    pub(crate) fn scripted<F>(responder: F) -> Self
    where
        F: Fn(usize, &OrchestrateRequest) -> TransportResult<Value> + Send + Sync + 'static,
    {
        Self {
            responder: Box::new(responder),
            latency: Duration::ZERO,
            budget: 0,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn replying(body: Value) -> Self {
        Self::scripted(move |_, _| Ok(body.clone()))
    }

    pub(crate) fn failing() -> Self {
        Self::scripted(|_, _| Err(unavailable()))
    }

    pub(crate) fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub(crate) fn with_budget(mut self, budget: u32) -> Self {
        self.budget = budget;
        self
    }

    pub(crate) fn calls(&self) -> Vec<OrchestrateRequest> {
        self.calls.lock().iter().map(|(_, r)| r.clone()).collect()
    }

    pub(crate) fn call_times(&self) -> Vec<Instant> {
        self.calls.lock().iter().map(|(t, _)| *t).collect()
    }

    pub(crate) fn call_count(&self) -> usize {
        self.calls.lock().len()
    }
}

pub(crate) fn unavailable() -> TransportError {
    TransportError::Status {
        status: 503,
        body: "unavailable".to_string(),
    }
}

#[async_trait]
impl OrchestrateClient for MockClient {
    async fn orchestrate(&self, request: &OrchestrateRequest) -> TransportResult<Value> {
        let index = {
            let mut calls = self.calls.lock();
            calls.push((Instant::now(), request.clone()));
            calls.len() - 1
        };
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        (self.responder)(index, request)
    }

    fn retry_budget(&self) -> u32 {
        self.budget
    }
}
