//! Task execution outcome types.
//!
//! An Outcome is produced exactly once per Task per run. Failures carry a
//! classified `TaskError` instead of propagating as a fault.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::task::Task;

/// Classification of a failed provider call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Call exceeded its timeout
    Timeout,
    /// Connection refused or reset
    Connection,
    /// Generic transport/server failure
    Transport,
    /// Provider reported throttling
    RateLimited,
    /// Bad or missing credentials
    Authentication,
    /// Unknown provider/model or missing adapter
    Configuration,
    /// Provider rejected the request payload
    InvalidRequest,
    /// Provider reply could not be parsed
    InvalidResponse,
    /// Synthetic rejection from an open circuit breaker
    BreakerOpen,
    /// Task was never dispatched
    Cancelled,
    /// Anything else
    Other,
}

impl ErrorKind {
    /// Whether another attempt could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            ErrorKind::Timeout
            | ErrorKind::Connection
            | ErrorKind::Transport
            | ErrorKind::RateLimited
            | ErrorKind::BreakerOpen
            | ErrorKind::Other => true,
            ErrorKind::Authentication
            | ErrorKind::Configuration
            | ErrorKind::InvalidRequest
            | ErrorKind::InvalidResponse
            | ErrorKind::Cancelled => false,
        }
    }

    /// Transport-level failures; the default set that trips a circuit breaker.
    pub fn is_transient(&self) -> bool {
        matches!(self, ErrorKind::Timeout | ErrorKind::Connection | ErrorKind::Transport)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Timeout => "timeout",
            ErrorKind::Connection => "connection",
            ErrorKind::Transport => "transport",
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::Authentication => "authentication",
            ErrorKind::Configuration => "configuration",
            ErrorKind::InvalidRequest => "invalid_request",
            ErrorKind::InvalidResponse => "invalid_response",
            ErrorKind::BreakerOpen => "breaker_open",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Other => "other",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Anything that can be classified into an [`ErrorKind`].
pub trait Classified {
    fn kind(&self) -> ErrorKind;
}

impl Classified for ErrorKind {
    fn kind(&self) -> ErrorKind {
        *self
    }
}

/// A classified per-task failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskError {
    pub kind: ErrorKind,
    pub message: String,
}

impl TaskError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl Classified for TaskError {
    fn kind(&self) -> ErrorKind {
        self.kind
    }
}

impl fmt::Display for TaskError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for TaskError {}

/// Result of executing one Task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Outcome {
    pub task_id: String,
    pub subject: String,
    /// Canonical provider key (or the raw identifier if it never resolved)
    pub provider: String,
    /// Canonical model id (empty if the provider never resolved)
    pub model: String,
    pub question: String,
    pub success: bool,
    pub content: Option<String>,
    pub error: Option<TaskError>,
    /// Attempt at which the outcome concluded; 0 if no call was attempted
    pub attempts: u32,
    /// Latency of the successful provider call
    #[serde(rename = "latency_ms", with = "millis_opt")]
    pub latency: Option<Duration>,
    /// Wall time spent executing the task, including waits and backoff
    #[serde(rename = "elapsed_ms", with = "millis")]
    pub elapsed: Duration,
}

impl Outcome {
    fn base(task: &Task, provider: &str, model: &str) -> Self {
        Self {
            task_id: task.id().to_string(),
            subject: task.subject().to_string(),
            provider: provider.to_string(),
            model: model.to_string(),
            question: task.question().to_string(),
            success: false,
            content: None,
            error: None,
            attempts: 0,
            latency: None,
            elapsed: Duration::ZERO,
        }
    }

    pub fn succeeded(task: &Task, provider: &str, model: &str, content: String, attempts: u32, latency: Duration) -> Self {
        Self {
            success: true,
            content: Some(content),
            attempts,
            latency: Some(latency),
            ..Self::base(task, provider, model)
        }
    }

    pub fn failed(task: &Task, provider: &str, model: &str, error: TaskError, attempts: u32) -> Self {
        Self {
            error: Some(error),
            attempts,
            ..Self::base(task, provider, model)
        }
    }

    /// Outcome for a task that was never dispatched.
    pub fn cancelled(task: &Task, reason: &str) -> Self {
        Self::failed(
            task,
            task.provider(),
            "",
            TaskError::new(ErrorKind::Cancelled, reason),
            0,
        )
    }

    pub fn with_elapsed(mut self, elapsed: Duration) -> Self {
        self.elapsed = elapsed;
        self
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.error.as_ref().map(|e| e.kind)
    }
}

pub(crate) mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}

mod millis_opt {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match d {
            Some(d) => s.serialize_some(&(d.as_millis() as u64)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(d)?.map(Duration::from_millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(ErrorKind::Timeout.is_retryable());
        assert!(ErrorKind::RateLimited.is_retryable());
        assert!(ErrorKind::BreakerOpen.is_retryable());
        assert!(!ErrorKind::Authentication.is_retryable());
        assert!(!ErrorKind::Configuration.is_retryable());
        assert!(!ErrorKind::Cancelled.is_retryable());
    }

    #[test]
    fn test_transient_classification() {
        assert!(ErrorKind::Timeout.is_transient());
        assert!(ErrorKind::Connection.is_transient());
        assert!(ErrorKind::Transport.is_transient());
        assert!(!ErrorKind::RateLimited.is_transient());
        assert!(!ErrorKind::Authentication.is_transient());
    }

    #[test]
    fn test_error_kind_serialization() {
        let json = serde_json::to_string(&ErrorKind::RateLimited).unwrap();
        assert_eq!(json, "\"rate_limited\"");
        let kind: ErrorKind = serde_json::from_str("\"breaker_open\"").unwrap();
        assert_eq!(kind, ErrorKind::BreakerOpen);
    }

    #[test]
    fn test_task_error_display() {
        let err = TaskError::new(ErrorKind::Authentication, "invalid api key");
        assert_eq!(err.to_string(), "authentication: invalid api key");
    }

    #[test]
    fn test_succeeded_outcome_echoes_task() {
        let task = Task::new("Acme", "chatgpt", "Best anvils?").with_id("t-1");
        let outcome = Outcome::succeeded(&task, "openai", "gpt-4o", "Acme".into(), 2, Duration::from_millis(120));

        assert!(outcome.success);
        assert_eq!(outcome.task_id, "t-1");
        assert_eq!(outcome.subject, "Acme");
        assert_eq!(outcome.provider, "openai");
        assert_eq!(outcome.question, "Best anvils?");
        assert_eq!(outcome.attempts, 2);
        assert!(outcome.error.is_none());
    }

    #[test]
    fn test_cancelled_outcome() {
        let task = Task::new("Acme", "claude", "q");
        let outcome = Outcome::cancelled(&task, "run cancelled");
        assert!(!outcome.success);
        assert_eq!(outcome.attempts, 0);
        assert_eq!(outcome.error_kind(), Some(ErrorKind::Cancelled));
    }

    #[test]
    fn test_outcome_serializes_millis() {
        let task = Task::new("Acme", "claude", "q");
        let outcome = Outcome::succeeded(&task, "anthropic", "m", "ok".into(), 1, Duration::from_millis(250))
            .with_elapsed(Duration::from_millis(1250));
        let value = serde_json::to_value(&outcome).unwrap();
        assert_eq!(value["latency_ms"], 250);
        assert_eq!(value["elapsed_ms"], 1250);
    }
}
