//! Scripted provider adapter for tests and demos.
//!
//! Replays a queue of canned responses, then falls back to a default one.
//! Every call is recorded with the tokio clock so timing properties (spacing,
//! backoff) can be asserted under a paused runtime.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use crate::domain::ErrorKind;
use crate::provider::adapter::{ProviderAdapter, ProviderResponse};
use crate::sync::lock;

/// One recorded call.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub at: Instant,
    pub model: String,
    pub prompt: String,
}

/// Adapter that answers from a script.
pub struct ScriptedAdapter {
    script: Mutex<VecDeque<ProviderResponse>>,
    fallback: ProviderResponse,
    latency: Duration,
    calls: Mutex<Vec<RecordedCall>>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl ScriptedAdapter {
    /// Adapter that always succeeds with "ok".
    pub fn new() -> Self {
        Self::always(ProviderResponse::ok("ok", Duration::ZERO))
    }

    /// Adapter that returns `response` for every call.
    pub fn always(response: ProviderResponse) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback: response,
            latency: Duration::ZERO,
            calls: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
        }
    }

    /// Adapter that always fails with `kind`.
    pub fn failing(kind: ErrorKind) -> Self {
        Self::always(ProviderResponse::err(kind, format!("scripted {} failure", kind), Duration::ZERO))
    }

    /// Queue responses returned (in order) before the fallback.
    pub fn with_script(self, responses: impl IntoIterator<Item = ProviderResponse>) -> Self {
        lock(&self.script).extend(responses);
        self
    }

    /// Simulated network latency per call.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn call_count(&self) -> usize {
        lock(&self.calls).len()
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        lock(&self.calls).clone()
    }

    /// Highest number of concurrent in-flight calls observed.
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }
}

impl Default for ScriptedAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProviderAdapter for ScriptedAdapter {
    async fn send(&self, model: &str, prompt: &str, _timeout: Duration) -> ProviderResponse {
        lock(&self.calls).push(RecordedCall {
            at: Instant::now(),
            model: model.to_string(),
            prompt: prompt.to_string(),
        });

        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(current, Ordering::SeqCst);

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let mut response = lock(&self.script).pop_front().unwrap_or_else(|| self.fallback.clone());
        response.latency = self.latency;
        response
    }
}
