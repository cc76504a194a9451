//! Execution strategy and scheduler configuration.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ProbeError;

/// How the scheduler dispatches tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    /// One task at a time, in input order
    Sequential,
    /// Bounded worker pool, completion order unspecified
    #[default]
    Concurrent,
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Strategy::Sequential => write!(f, "sequential"),
            Strategy::Concurrent => write!(f, "concurrent"),
        }
    }
}

impl FromStr for Strategy {
    type Err = ProbeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "sequential" => Ok(Strategy::Sequential),
            "concurrent" => Ok(Strategy::Concurrent),
            other => Err(ProbeError::Config(format!(
                "Unknown strategy '{}' (expected sequential or concurrent)",
                other
            ))),
        }
    }
}

/// Scheduler configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub strategy: Strategy,
    /// Worker pool size for the concurrent strategy
    pub max_workers: usize,
    /// Bound on total run duration
    pub run_timeout_ms: Option<u64>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            strategy: Strategy::Concurrent,
            max_workers: 4,
            run_timeout_ms: None,
        }
    }
}

impl SchedulerConfig {
    pub fn sequential() -> Self {
        Self {
            strategy: Strategy::Sequential,
            ..Self::default()
        }
    }

    pub fn concurrent(max_workers: usize) -> Self {
        Self {
            strategy: Strategy::Concurrent,
            max_workers,
            ..Self::default()
        }
    }

    pub fn with_run_timeout(mut self, timeout: Duration) -> Self {
        self.run_timeout_ms = Some(timeout.as_millis().try_into().unwrap_or(u64::MAX));
        self
    }

    pub fn run_timeout(&self) -> Option<Duration> {
        self.run_timeout_ms.map(Duration::from_millis)
    }
}
