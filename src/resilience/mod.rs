//! Resilience primitives shared by every worker
//!
//! - FrequencyGovernor spaces requests per provider
//! - CircuitBreaker / BreakerRegistry stop calling unhealthy (provider, model) pairs
//! - RetryPolicy computes backoff between attempts

pub mod breaker;
pub mod governor;
pub mod retry;

pub use breaker::{
    BreakerConfig, BreakerError, BreakerKey, BreakerPermit, BreakerRegistry, BreakerSnapshot, BreakerState,
    CircuitBreaker, FailurePredicate,
};
pub use governor::{FrequencyGovernor, FrequencyRecord, GovernorConfig};
pub use retry::RetryPolicy;
