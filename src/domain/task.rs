//! Task - the immutable unit of dispatch.
//!
//! A Task is one (subject, provider, question) combination. It is built once by
//! the caller, handed to the scheduler by value and never mutated afterwards.

use std::time::Duration;

use serde_json::{Map, Value};

/// Default per-task timeout for a single provider call
pub const DEFAULT_TASK_TIMEOUT: Duration = Duration::from_secs(30);

/// Default attempt budget per task
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Placeholder in question text replaced by the task subject
pub const SUBJECT_PLACEHOLDER: &str = "{subject}";

/// One probe request: ask `provider` the `question` on behalf of `subject`.
#[derive(Debug, Clone, PartialEq)]
pub struct Task {
    id: String,
    subject: String,
    provider: String,
    question: String,
    timeout: Duration,
    max_retries: u32,
    priority: Option<i32>,
    metadata: Map<String, Value>,
}

impl Task {
    /// Create a task with default timeout and retry budget.
    ///
    /// `provider` is the raw identifier as the caller knows it (an alias such as
    /// "ChatGPT", a canonical key, or `provider:model`); it is resolved at
    /// execution time.
    pub fn new(subject: impl Into<String>, provider: impl Into<String>, question: impl Into<String>) -> Self {
        Self {
            id: String::new(),
            subject: subject.into(),
            provider: provider.into(),
            question: question.into(),
            timeout: DEFAULT_TASK_TIMEOUT,
            max_retries: DEFAULT_MAX_RETRIES,
            priority: None,
            metadata: Map::new(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }

    pub fn question(&self) -> &str {
        &self.question
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Number of attempts the executor will make. Never zero.
    pub fn attempt_budget(&self) -> u32 {
        self.max_retries.max(1)
    }

    pub fn priority(&self) -> Option<i32> {
        self.priority
    }

    pub fn metadata(&self) -> &Map<String, Value> {
        &self.metadata
    }

    /// Text sent to the provider: the question with `{subject}` substituted.
    pub fn prompt(&self) -> String {
        self.question.replace(SUBJECT_PLACEHOLDER, &self.subject)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_task_defaults() {
        let task = Task::new("Acme", "chatgpt", "Who makes the best anvils?");
        assert_eq!(task.subject(), "Acme");
        assert_eq!(task.provider(), "chatgpt");
        assert_eq!(task.timeout(), DEFAULT_TASK_TIMEOUT);
        assert_eq!(task.max_retries(), DEFAULT_MAX_RETRIES);
        assert!(task.priority().is_none());
        assert!(task.metadata().is_empty());
        assert_eq!(task.id(), "");
    }

    #[test]
    fn test_task_builders() {
        let task = Task::new("Acme", "openai:gpt-4o", "q")
            .with_id("run-1-0001")
            .with_timeout(Duration::from_secs(5))
            .with_max_retries(7)
            .with_priority(3)
            .with_metadata("campaign", json!("spring"));

        assert_eq!(task.id(), "run-1-0001");
        assert_eq!(task.timeout(), Duration::from_secs(5));
        assert_eq!(task.max_retries(), 7);
        assert_eq!(task.priority(), Some(3));
        assert_eq!(task.metadata().get("campaign"), Some(&json!("spring")));
    }

    #[test]
    fn test_attempt_budget_never_zero() {
        let task = Task::new("s", "p", "q").with_max_retries(0);
        assert_eq!(task.attempt_budget(), 1);
    }

    #[test]
    fn test_prompt_substitutes_subject() {
        let task = Task::new("Acme", "claude", "Is {subject} reliable? Compare {subject} to others.");
        assert_eq!(task.prompt(), "Is Acme reliable? Compare Acme to others.");
    }

    #[test]
    fn test_prompt_without_placeholder() {
        let task = Task::new("Acme", "claude", "Best anvil brands?");
        assert_eq!(task.prompt(), "Best anvil brands?");
    }
}
