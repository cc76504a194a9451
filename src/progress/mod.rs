//! Progress aggregation for runs
//!
//! - ProgressTracker: thread-safe per-run counters fed by scheduler callbacks
//! - ProgressSnapshot: JSON-serializable view for pollers

mod tracker;

pub use tracker::{ProgressSnapshot, ProgressTracker, RECENT_ERRORS_LIMIT, RunProgress};
