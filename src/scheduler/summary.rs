//! Aggregate result of one scheduling run.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::{ErrorKind, Outcome};

/// Counts for a finished run.
///
/// `failed` includes cancelled tasks; `cancelled` breaks them out.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
    /// The run deadline cut the run short
    pub timed_out: bool,
    #[serde(rename = "elapsed_ms", with = "crate::domain::outcome::millis")]
    pub elapsed: Duration,
}

impl RunSummary {
    pub fn new(total: usize) -> Self {
        Self {
            total,
            ..Self::default()
        }
    }

    pub fn record(&mut self, outcome: &Outcome) {
        if outcome.success {
            self.completed += 1;
        } else {
            self.failed += 1;
            if outcome.error_kind() == Some(ErrorKind::Cancelled) {
                self.cancelled += 1;
            }
        }
    }

    /// Outcomes delivered so far.
    pub fn delivered(&self) -> usize {
        self.completed + self.failed
    }
}
