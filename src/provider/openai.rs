//! OpenAI-compatible chat completions adapter
//!
//! Most answer providers (OpenAI, DeepSeek, Perplexity, gateways) expose the
//! `/chat/completions` shape, so one adapter covers them given a base URL.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::domain::ErrorKind;
use crate::error::{ProbeError, Result};
use crate::provider::adapter::{ProviderAdapter, ProviderResponse};

/// Default retry-after when a 429 carries no usable header
const DEFAULT_RETRY_AFTER_SECS: u64 = 60;

/// Endpoint settings for one provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointConfig {
    /// Base URL, e.g. `https://api.openai.com/v1`
    pub base_url: String,
    /// Environment variable holding the API key
    pub api_key_env: String,
}

impl EndpointConfig {
    pub fn new(base_url: impl Into<String>, api_key_env: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key_env: api_key_env.into(),
        }
    }
}

/// Adapter for any OpenAI-compatible endpoint
pub struct OpenAiCompatAdapter {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
}

impl OpenAiCompatAdapter {
    /// Create an adapter, reading the API key from the configured env var.
    ///
    /// A missing key is not fatal here: calls will come back classified as
    /// `Authentication` failures, which the executor does not retry.
    pub fn new(config: &EndpointConfig) -> Result<Self> {
        let api_key = std::env::var(&config.api_key_env).ok();
        if api_key.is_none() {
            log::warn!("{} not set; calls to {} will fail authentication", config.api_key_env, config.base_url);
        }
        Self::with_api_key(&config.base_url, api_key)
    }

    /// Create an adapter with an explicit API key
    pub fn with_api_key(base_url: &str, api_key: Option<String>) -> Result<Self> {
        let client = Client::builder()
            .build()
            .map_err(|e| ProbeError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", base_url.trim_end_matches('/')),
            api_key,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn build_request(model: &str, prompt: &str) -> Value {
        json!({
            "model": model,
            "messages": [
                { "role": "user", "content": prompt }
            ]
        })
    }

    async fn send_request(&self, model: &str, prompt: &str, timeout: Duration) -> ProviderResponse {
        let started = Instant::now();
        let Some(api_key) = self.api_key.as_deref() else {
            return ProviderResponse::err(ErrorKind::Authentication, "API key not configured", started.elapsed());
        };

        let result = self
            .client
            .post(&self.endpoint)
            .bearer_auth(api_key)
            .timeout(timeout)
            .json(&Self::build_request(model, prompt))
            .send()
            .await;

        let response = match result {
            Ok(response) => response,
            Err(e) => {
                return ProviderResponse::err(classify_transport_error(&e), format!("Request failed: {}", e), started.elapsed());
            }
        };

        let status = response.status();

        // Handle rate limiting
        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|h| h.to_str().ok())
                .and_then(|s| s.parse::<u64>().ok())
                .unwrap_or(DEFAULT_RETRY_AFTER_SECS);
            return ProviderResponse::err(
                ErrorKind::RateLimited,
                format!("Rate limited, retry after {} seconds", retry_after),
                started.elapsed(),
            )
            .with_retry_after(Duration::from_secs(retry_after));
        }

        // Handle other errors
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            return ProviderResponse::err(
                classify_status(status),
                format!("API error {}: {}", status, error_body),
                started.elapsed(),
            );
        }

        match response.json::<Value>().await {
            Ok(body) => match parse_content(&body) {
                Some(content) => ProviderResponse::ok(content, started.elapsed()),
                None => ProviderResponse::err(
                    ErrorKind::InvalidResponse,
                    "Response has no choices[0].message.content",
                    started.elapsed(),
                ),
            },
            Err(e) => ProviderResponse::err(
                classify_transport_error(&e),
                format!("Failed to parse response: {}", e),
                started.elapsed(),
            ),
        }
    }
}

#[async_trait]
impl ProviderAdapter for OpenAiCompatAdapter {
    async fn send(&self, model: &str, prompt: &str, timeout: Duration) -> ProviderResponse {
        self.send_request(model, prompt, timeout).await
    }
}

/// Map a non-success HTTP status to an error kind.
pub fn classify_status(status: StatusCode) -> ErrorKind {
    match status.as_u16() {
        401 | 403 => ErrorKind::Authentication,
        404 => ErrorKind::Configuration,
        400 | 413 | 422 => ErrorKind::InvalidRequest,
        408 => ErrorKind::Timeout,
        429 => ErrorKind::RateLimited,
        500..=599 => ErrorKind::Transport,
        _ => ErrorKind::Other,
    }
}

fn classify_transport_error(e: &reqwest::Error) -> ErrorKind {
    if e.is_timeout() {
        ErrorKind::Timeout
    } else if e.is_connect() {
        ErrorKind::Connection
    } else if e.is_decode() {
        ErrorKind::InvalidResponse
    } else {
        ErrorKind::Transport
    }
}

fn parse_content(body: &Value) -> Option<String> {
    body.get("choices")?
        .get(0)?
        .get("message")?
        .get("content")?
        .as_str()
        .map(str::to_string)
}
