//! Scheduler module for batch execution.
//!
//! This module provides:
//! - **Strategy**: sequential (input order) or concurrent (bounded worker pool)
//! - **Scheduler**: runs a task list through the executor, invoking a callback
//!   exactly once per task, honoring cancellation and an optional run deadline
//! - **RunSummary**: completed / failed / cancelled counts and wall time
//!
//! # Example
//!
//! ```ignore
//! use probefan::scheduler::{Scheduler, SchedulerConfig};
//!
//! let scheduler = Scheduler::new(executor, SchedulerConfig::concurrent(8));
//! let summary = scheduler.run(tasks, |task, outcome| tracker.record(&run_id, outcome)).await;
//! ```

mod manager;
mod strategy;
mod summary;

pub use manager::{Scheduler, dispatch_order};
pub use strategy::{SchedulerConfig, Strategy};
pub use summary::RunSummary;
