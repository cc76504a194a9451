//! Provider adapter boundary.
//!
//! Everything provider-specific (auth, payload schema, parsing) lives behind
//! [`ProviderAdapter`]. The executor only ever sees a [`ProviderResponse`].

use std::time::Duration;

use async_trait::async_trait;

use crate::domain::{ErrorKind, TaskError};

/// Capability to send one prompt to one provider.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Send `prompt` to `model`, giving up after `timeout`.
    ///
    /// Adapters never return Rust errors: failures are reported in the response
    /// with an [`ErrorKind`] so the executor can decide whether to retry.
    async fn send(&self, model: &str, prompt: &str, timeout: Duration) -> ProviderResponse;
}

/// Uniform reply shape for every provider.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderResponse {
    pub success: bool,
    pub content: Option<String>,
    pub error_message: Option<String>,
    pub error_kind: Option<ErrorKind>,
    pub latency: Duration,
    /// Throttling hint (e.g. a `retry-after` header)
    pub retry_after: Option<Duration>,
}

impl ProviderResponse {
    pub fn ok(content: impl Into<String>, latency: Duration) -> Self {
        Self {
            success: true,
            content: Some(content.into()),
            error_message: None,
            error_kind: None,
            latency,
            retry_after: None,
        }
    }

    pub fn err(kind: ErrorKind, message: impl Into<String>, latency: Duration) -> Self {
        Self {
            success: false,
            content: None,
            error_message: Some(message.into()),
            error_kind: Some(kind),
            latency,
            retry_after: None,
        }
    }

    pub fn with_retry_after(mut self, retry_after: Duration) -> Self {
        self.retry_after = Some(retry_after);
        self
    }

    /// Collapse into the content or a classified error.
    ///
    /// A success without content yields an empty answer; a failure without a
    /// kind is classified `Other`.
    pub fn into_result(self) -> Result<String, TaskError> {
        if self.success {
            return Ok(self.content.unwrap_or_default());
        }
        let kind = self.error_kind.unwrap_or(ErrorKind::Other);
        let message = self.error_message.unwrap_or_else(|| format!("provider call failed ({})", kind));
        Err(TaskError::new(kind, message))
    }
}

/// Adapter that answers every prompt with a canned echo. Used for dry runs.
#[derive(Debug, Clone, Default)]
pub struct EchoAdapter;

#[async_trait]
impl ProviderAdapter for EchoAdapter {
    async fn send(&self, model: &str, prompt: &str, _timeout: Duration) -> ProviderResponse {
        ProviderResponse::ok(format!("[{}] {}", model, prompt), Duration::ZERO)
    }
}
