//! Domain types for probefan
//!
//! This module contains the core value types:
//! - Task: one (subject, provider, question) unit of dispatch
//! - Outcome: the result of attempting a Task, success or classified failure
//! - ErrorKind / TaskError: failure taxonomy shared by adapters, breaker and executor
//! - Batch: a fan-out document expanded into Tasks

pub mod batch;
pub mod outcome;
pub mod task;

pub use batch::{Batch, ExpandedBatch, TaskDefaults};
pub use outcome::{Classified, ErrorKind, Outcome, TaskError};
pub use task::{DEFAULT_MAX_RETRIES, DEFAULT_TASK_TIMEOUT, Task};
