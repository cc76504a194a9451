//! Retrying single-task executor.
//!
//! The only place adapter I/O meets the resilience primitives. Every attempt
//! runs the same fixed pipeline:
//! 1. Reserve a slot with the FrequencyGovernor and sleep the returned delay
//! 2. Ask the task's CircuitBreaker for admission
//! 3. Send through the adapter, bounded by the task timeout
//! 4. Classify: success returns, non-retryable returns, retryable backs off

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use crate::domain::{Classified, ErrorKind, Outcome, Task, TaskError};
use crate::provider::{ProviderAdapter, ProviderRegistry};
use crate::resilience::{BreakerError, BreakerKey, BreakerRegistry, FrequencyGovernor, RetryPolicy};

/// Failure of one attempt, with the provider's throttling hint if any.
#[derive(Debug)]
struct AttemptError {
    error: TaskError,
    retry_after: Option<Duration>,
}

impl Classified for AttemptError {
    fn kind(&self) -> ErrorKind {
        self.error.kind
    }
}

/// Executes one task at a time; cheap to share behind an `Arc`.
pub struct TaskExecutor {
    registry: ProviderRegistry,
    governor: Arc<FrequencyGovernor>,
    breakers: Arc<BreakerRegistry>,
    retry: RetryPolicy,
}

impl TaskExecutor {
    pub fn new(
        registry: ProviderRegistry,
        governor: Arc<FrequencyGovernor>,
        breakers: Arc<BreakerRegistry>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            registry,
            governor,
            breakers,
            retry,
        }
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    pub fn governor(&self) -> &Arc<FrequencyGovernor> {
        &self.governor
    }

    pub fn breakers(&self) -> &Arc<BreakerRegistry> {
        &self.breakers
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Run `task` to a final outcome. Never fails: every problem becomes a
    /// failed outcome.
    pub async fn execute(&self, task: &Task) -> Outcome {
        let started = Instant::now();

        let (resolved, adapter) = match self.registry.resolve(task.provider()) {
            Ok(found) => found,
            Err(e) => {
                tracing::warn!(task = %task.id(), provider = %task.provider(), error = %e, "Cannot resolve provider");
                let error = TaskError::new(ErrorKind::Configuration, e.to_string());
                return Outcome::failed(task, task.provider(), "", error, 0).with_elapsed(started.elapsed());
            }
        };

        let breaker = self.breakers.get(&BreakerKey::new(&resolved.provider, &resolved.model));
        let prompt = task.prompt();
        let budget = task.attempt_budget();
        let mut attempt = 0;

        loop {
            attempt += 1;

            let delay = self.governor.reserve(&resolved.provider);
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }

            tracing::debug!(task = %task.id(), provider = %resolved, attempt, budget, "Sending prompt");

            let result = breaker
                .call(|| send_once(adapter.as_ref(), &resolved.model, &prompt, task.timeout()))
                .await;

            let (error, retry_after) = match result {
                Ok((content, latency)) => {
                    tracing::info!(
                        task = %task.id(),
                        provider = %resolved,
                        attempt,
                        latency_ms = latency.as_millis() as u64,
                        "Task succeeded"
                    );
                    return Outcome::succeeded(task, &resolved.provider, &resolved.model, content, attempt, latency)
                        .with_elapsed(started.elapsed());
                }
                Err(BreakerError::Open { key }) => (
                    TaskError::new(ErrorKind::BreakerOpen, format!("circuit breaker open for {}", key)),
                    None,
                ),
                Err(BreakerError::Inner(failure)) => (failure.error, failure.retry_after),
            };

            if !error.kind.is_retryable() || attempt >= budget {
                tracing::info!(
                    task = %task.id(),
                    provider = %resolved,
                    attempt,
                    kind = %error.kind,
                    error = %error.message,
                    "Task failed"
                );
                return Outcome::failed(task, &resolved.provider, &resolved.model, error, attempt)
                    .with_elapsed(started.elapsed());
            }

            let wait = self.retry.delay_after(attempt, retry_after);
            tracing::warn!(
                task = %task.id(),
                provider = %resolved,
                attempt,
                kind = %error.kind,
                backoff_ms = wait.as_millis() as u64,
                "Attempt failed, retrying"
            );
            tokio::time::sleep(wait).await;
        }
    }
}

/// One adapter call bounded by `timeout`.
async fn send_once(
    adapter: &dyn ProviderAdapter,
    model: &str,
    prompt: &str,
    timeout: Duration,
) -> Result<(String, Duration), AttemptError> {
    let response = match tokio::time::timeout(timeout, adapter.send(model, prompt, timeout)).await {
        Ok(response) => response,
        Err(_) => {
            return Err(AttemptError {
                error: TaskError::new(
                    ErrorKind::Timeout,
                    format!("no response within {:.1}s", timeout.as_secs_f64()),
                ),
                retry_after: None,
            });
        }
    };

    let latency = response.latency;
    let retry_after = response.retry_after;
    response
        .into_result()
        .map(|content| (content, latency))
        .map_err(|error| AttemptError { error, retry_after })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{ProviderCatalog, ProviderResponse, ScriptedAdapter};
    use crate::resilience::{BreakerConfig, BreakerState, GovernorConfig};

    fn executor_with(adapter: Arc<ScriptedAdapter>, breaker: BreakerConfig, interval: Duration) -> TaskExecutor {
        let mut catalog = ProviderCatalog::empty();
        catalog.add_provider("mock", "m1");
        let registry = ProviderRegistry::new(catalog).with_adapter("mock", adapter);
        TaskExecutor::new(
            registry,
            Arc::new(FrequencyGovernor::new(GovernorConfig::default().with_default_interval(interval))),
            Arc::new(BreakerRegistry::new(breaker)),
            RetryPolicy::new(Duration::from_secs(1), Duration::from_secs(60)),
        )
    }

    fn executor(adapter: Arc<ScriptedAdapter>) -> TaskExecutor {
        executor_with(adapter, BreakerConfig::default(), Duration::ZERO)
    }

    fn task(max_retries: u32) -> Task {
        Task::new("Acme", "mock", "Who makes the best anvils? Is {subject} good?")
            .with_id("t-1")
            .with_max_retries(max_retries)
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_first_attempt() {
        let adapter = Arc::new(ScriptedAdapter::always(ProviderResponse::ok("Acme", Duration::ZERO)));
        let outcome = executor(adapter.clone()).execute(&task(3)).await;

        assert!(outcome.success);
        assert_eq!(outcome.content.as_deref(), Some("Acme"));
        assert_eq!(outcome.attempts, 1);
        assert_eq!(outcome.provider, "mock");
        assert_eq!(outcome.model, "m1");
        assert_eq!(outcome.subject, "Acme");
        assert_eq!(adapter.calls()[0].prompt, "Who makes the best anvils? Is Acme good?");
        assert_eq!(adapter.calls()[0].model, "m1");
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_then_succeeds() {
        let adapter = Arc::new(ScriptedAdapter::new().with_script([
            ProviderResponse::err(ErrorKind::Connection, "reset", Duration::ZERO),
            ProviderResponse::err(ErrorKind::Transport, "502", Duration::ZERO),
        ]));
        let outcome = executor(adapter.clone()).execute(&task(3)).await;

        assert!(outcome.success);
        assert_eq!(outcome.attempts, 3);
        assert_eq!(adapter.call_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retryable_failure_exhausts_budget_with_backoff() {
        let adapter = Arc::new(ScriptedAdapter::failing(ErrorKind::Other));
        let outcome = executor(adapter.clone()).execute(&task(3)).await;

        assert!(!outcome.success);
        assert_eq!(outcome.attempts, 3);
        assert_eq!(outcome.error_kind(), Some(ErrorKind::Other));

        let calls = adapter.calls();
        assert_eq!(calls.len(), 3);
        assert!(calls[1].at - calls[0].at >= Duration::from_secs(1));
        assert!(calls[2].at - calls[1].at >= Duration::from_secs(2));
        // No backoff after the final attempt
        assert_eq!(outcome.elapsed, Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_failure_is_single_attempt() {
        let adapter = Arc::new(ScriptedAdapter::failing(ErrorKind::Authentication));
        let outcome = executor(adapter.clone()).execute(&task(5)).await;

        assert!(!outcome.success);
        assert_eq!(outcome.attempts, 1);
        assert_eq!(outcome.error_kind(), Some(ErrorKind::Authentication));
        assert_eq!(adapter.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_retries_still_attempts_once() {
        let adapter = Arc::new(ScriptedAdapter::new());
        let outcome = executor(adapter.clone()).execute(&task(0)).await;
        assert!(outcome.success);
        assert_eq!(adapter.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_classified() {
        let adapter = Arc::new(ScriptedAdapter::new().with_latency(Duration::from_secs(10)));
        let task = task(1).with_timeout(Duration::from_secs(2));
        let outcome = executor(adapter).execute(&task).await;

        assert!(!outcome.success);
        assert_eq!(outcome.error_kind(), Some(ErrorKind::Timeout));
        assert_eq!(outcome.elapsed, Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_after_hint_extends_backoff() {
        let adapter = Arc::new(ScriptedAdapter::new().with_script([ProviderResponse::err(
            ErrorKind::RateLimited,
            "slow down",
            Duration::ZERO,
        )
        .with_retry_after(Duration::from_secs(20))]));
        let outcome = executor(adapter.clone()).execute(&task(2)).await;

        assert!(outcome.success);
        let calls = adapter.calls();
        assert_eq!(calls[1].at - calls[0].at, Duration::from_secs(20));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_provider_is_configuration_outcome() {
        let adapter = Arc::new(ScriptedAdapter::new());
        let task = Task::new("Acme", "bard", "q").with_id("t-x");
        let outcome = executor(adapter.clone()).execute(&task).await;

        assert!(!outcome.success);
        assert_eq!(outcome.attempts, 0);
        assert_eq!(outcome.error_kind(), Some(ErrorKind::Configuration));
        assert_eq!(outcome.provider, "bard");
        assert_eq!(adapter.call_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_breaker_short_circuits() {
        let adapter = Arc::new(ScriptedAdapter::failing(ErrorKind::Timeout));
        let exec = executor_with(
            adapter.clone(),
            BreakerConfig::new(2, Duration::from_secs(30), 1),
            Duration::ZERO,
        );

        exec.execute(&task(1)).await;
        exec.execute(&task(1)).await;
        let key = BreakerKey::new("mock", "m1");
        assert_eq!(exec.breakers().get(&key).state(), BreakerState::Open);

        let outcome = exec.execute(&task(1)).await;
        assert_eq!(outcome.error_kind(), Some(ErrorKind::BreakerOpen));
        assert_eq!(outcome.attempts, 1);
        assert_eq!(adapter.call_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_governor_spaces_attempts() {
        let adapter = Arc::new(ScriptedAdapter::new());
        let exec = executor_with(adapter.clone(), BreakerConfig::default(), Duration::from_secs(1));

        exec.execute(&task(1)).await;
        exec.execute(&task(1)).await;

        let calls = adapter.calls();
        assert_eq!(calls[1].at - calls[0].at, Duration::from_secs(1));
    }
}
