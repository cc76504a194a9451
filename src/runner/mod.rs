//! Runner module - drives a single task through the resilience pipeline.
//!
//! - TaskExecutor resolves the provider, then loops governor -> breaker ->
//!   adapter with exponential backoff between retryable failures

mod executor;

pub use executor::TaskExecutor;
