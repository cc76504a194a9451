//! Probefan - fan probe questions out to AI-answer providers
//!
//! Probefan sends one question per (subject, provider, question) task to
//! external answer services, spacing requests per provider, tripping a circuit
//! breaker per (provider, model) and retrying transient failures with backoff.

pub mod domain;
pub mod error;
pub mod id;
pub mod progress;
pub mod provider;
pub mod resilience;
pub mod runner;
pub mod scheduler;
pub(crate) mod sync;

pub use error::{ProbeError, Result};
