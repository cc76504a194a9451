//! Per-run progress counters.
//!
//! The tracker is a passive sink: scheduler callbacks push outcomes in, pollers
//! read snapshots out. Each run has its own lock so concurrent runs never
//! contend, and the outer map lock is only held for lookup.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::domain::{ErrorKind, Outcome, Task, TaskError};
use crate::error::{ProbeError, Result};
use crate::sync::{lock, read, write};

/// How many recent failures a run keeps for display
pub const RECENT_ERRORS_LIMIT: usize = 20;

/// Mutable state of one run.
#[derive(Debug)]
pub struct RunProgress {
    run_id: String,
    total: usize,
    completed: usize,
    failed: usize,
    metadata: Map<String, Value>,
    recent_errors: VecDeque<TaskError>,
    started_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl RunProgress {
    fn new(run_id: &str, total: usize, metadata: Map<String, Value>) -> Self {
        let now = Utc::now();
        Self {
            run_id: run_id.to_string(),
            total,
            completed: 0,
            failed: 0,
            metadata,
            recent_errors: VecDeque::new(),
            started_at: now,
            updated_at: now,
        }
    }

    fn finished(&self) -> usize {
        self.completed + self.failed
    }

    /// Room for one more outcome. Logs and refuses once the run is full.
    fn has_room(&self) -> bool {
        if self.finished() >= self.total {
            tracing::warn!(run_id = %self.run_id, total = self.total, "Ignoring outcome beyond run total");
            return false;
        }
        true
    }

    fn snapshot(&self) -> ProgressSnapshot {
        let finished = self.finished();
        let percentage = if self.total == 0 {
            100.0
        } else {
            // Truncate so an unfinished run never reads 100.0
            let permille = (finished * 1000 / self.total) as u64;
            permille as f64 / 10.0
        };

        ProgressSnapshot {
            run_id: self.run_id.clone(),
            total: self.total,
            completed: self.completed,
            failed: self.failed,
            percentage,
            is_done: finished >= self.total,
            metadata: self.metadata.clone(),
            recent_errors: self.recent_errors.iter().cloned().collect(),
            started_at: self.started_at,
            updated_at: self.updated_at,
        }
    }
}

/// Immutable, serializable view of a run's progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub run_id: String,
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    /// Finished share of the run, truncated to one decimal place
    pub percentage: f64,
    pub is_done: bool,
    pub metadata: Map<String, Value>,
    pub recent_errors: Vec<TaskError>,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Shared handle to every run's progress. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct ProgressTracker {
    runs: Arc<RwLock<HashMap<String, Arc<Mutex<RunProgress>>>>>,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking `run_id`, replacing any earlier run with the same id.
    pub fn create(&self, run_id: &str, total: usize, metadata: Map<String, Value>) -> ProgressSnapshot {
        let progress = RunProgress::new(run_id, total, metadata);
        let snapshot = progress.snapshot();
        if write(&self.runs)
            .insert(run_id.to_string(), Arc::new(Mutex::new(progress)))
            .is_some()
        {
            tracing::warn!(run_id = %run_id, "Replacing existing run progress");
        }
        tracing::debug!(run_id = %run_id, total, "Tracking run");
        snapshot
    }

    pub fn record_success(&self, run_id: &str, outcome: &Outcome) -> Result<()> {
        let run = self.run(run_id)?;
        let mut run = lock(&run);
        if run.has_room() {
            run.completed += 1;
            run.updated_at = Utc::now();
            tracing::debug!(run_id = %run_id, task = %outcome.task_id, completed = run.completed, "Task completed");
        }
        Ok(())
    }

    pub fn record_failure(&self, run_id: &str, error: &TaskError) -> Result<()> {
        let run = self.run(run_id)?;
        let mut run = lock(&run);
        if run.has_room() {
            run.failed += 1;
            run.updated_at = Utc::now();
            run.recent_errors.push_back(error.clone());
            while run.recent_errors.len() > RECENT_ERRORS_LIMIT {
                run.recent_errors.pop_front();
            }
        }
        Ok(())
    }

    /// Record `outcome` as a success or a failure.
    pub fn record(&self, run_id: &str, outcome: &Outcome) -> Result<()> {
        if outcome.success {
            return self.record_success(run_id, outcome);
        }
        match &outcome.error {
            Some(error) => self.record_failure(run_id, error),
            None => self.record_failure(run_id, &TaskError::new(ErrorKind::Other, "failed without error detail")),
        }
    }

    pub fn get(&self, run_id: &str) -> Option<ProgressSnapshot> {
        let run = read(&self.runs).get(run_id).cloned()?;
        let snapshot = lock(&run).snapshot();
        Some(snapshot)
    }

    /// Stop tracking `run_id`, returning its final snapshot.
    pub fn remove(&self, run_id: &str) -> Option<ProgressSnapshot> {
        let run = write(&self.runs).remove(run_id)?;
        let snapshot = lock(&run).snapshot();
        Some(snapshot)
    }

    pub fn run_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = read(&self.runs).keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Scheduler callback that feeds outcomes into `run_id`.
    pub fn callback(&self, run_id: &str) -> impl FnMut(&Task, &Outcome) + Send + 'static {
        let tracker = self.clone();
        let run_id = run_id.to_string();
        move |_task: &Task, outcome: &Outcome| {
            if let Err(e) = tracker.record(&run_id, outcome) {
                tracing::warn!(run_id = %run_id, error = %e, "Failed to record outcome");
            }
        }
    }

    fn run(&self, run_id: &str) -> Result<Arc<Mutex<RunProgress>>> {
        read(&self.runs)
            .get(run_id)
            .cloned()
            .ok_or_else(|| ProbeError::RunNotFound(run_id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn outcome(success: bool) -> Outcome {
        let task = Task::new("Acme", "mock", "q").with_id("t-1");
        if success {
            Outcome::succeeded(&task, "mock", "m1", "ok".into(), 1, Duration::ZERO)
        } else {
            Outcome::failed(&task, "mock", "m1", TaskError::new(ErrorKind::Timeout, "t/o"), 3)
        }
    }

    #[test]
    fn test_create_and_get() {
        let tracker = ProgressTracker::new();
        let snap = tracker.create("run-1", 4, Map::new());
        assert_eq!(snap.total, 4);
        assert_eq!(snap.percentage, 0.0);
        assert!(!snap.is_done);
        assert_eq!(tracker.get("run-1"), Some(snap));
        assert!(tracker.get("run-2").is_none());
    }

    #[test]
    fn test_counts_and_percentage() {
        let tracker = ProgressTracker::new();
        tracker.create("run-1", 3, Map::new());
        tracker.record("run-1", &outcome(true)).unwrap();
        tracker.record("run-1", &outcome(false)).unwrap();

        let snap = tracker.get("run-1").unwrap();
        assert_eq!(snap.completed, 1);
        assert_eq!(snap.failed, 1);
        assert_eq!(snap.percentage, 66.6);
        assert!(!snap.is_done);
        assert_eq!(snap.recent_errors[0].kind, ErrorKind::Timeout);

        tracker.record("run-1", &outcome(true)).unwrap();
        let snap = tracker.get("run-1").unwrap();
        assert!(snap.is_done);
        assert_eq!(snap.percentage, 100.0);
    }

    #[test]
    fn test_unfinished_run_never_reports_full_percentage() {
        let tracker = ProgressTracker::new();
        tracker.create("run-big", 2000, Map::new());
        for _ in 0..1999 {
            tracker.record("run-big", &outcome(true)).unwrap();
        }

        let snap = tracker.get("run-big").unwrap();
        assert!(!snap.is_done);
        assert_eq!(snap.percentage, 99.9);
    }

    #[test]
    fn test_increments_beyond_total_are_ignored() {
        let tracker = ProgressTracker::new();
        tracker.create("run-1", 1, Map::new());
        tracker.record("run-1", &outcome(true)).unwrap();
        tracker.record("run-1", &outcome(false)).unwrap();

        let snap = tracker.get("run-1").unwrap();
        assert_eq!(snap.completed + snap.failed, 1);
        assert!(snap.recent_errors.is_empty());
    }

    #[test]
    fn test_empty_run_is_done() {
        let tracker = ProgressTracker::new();
        let snap = tracker.create("run-0", 0, Map::new());
        assert!(snap.is_done);
        assert_eq!(snap.percentage, 100.0);
    }

    #[test]
    fn test_unknown_run() {
        let tracker = ProgressTracker::new();
        let err = tracker.record("nope", &outcome(true)).unwrap_err();
        assert!(matches!(err, ProbeError::RunNotFound(id) if id == "nope"));
    }

    #[test]
    fn test_recent_errors_bounded() {
        let tracker = ProgressTracker::new();
        tracker.create("run-1", 50, Map::new());
        for i in 0..30 {
            tracker
                .record_failure("run-1", &TaskError::new(ErrorKind::Other, format!("e{}", i)))
                .unwrap();
        }
        let snap = tracker.get("run-1").unwrap();
        assert_eq!(snap.recent_errors.len(), RECENT_ERRORS_LIMIT);
        assert_eq!(snap.recent_errors[0].message, "e10");
    }

    #[test]
    fn test_remove_and_run_ids() {
        let tracker = ProgressTracker::new();
        tracker.create("b", 1, Map::new());
        tracker.create("a", 1, Map::new());
        assert_eq!(tracker.run_ids(), vec!["a".to_string(), "b".to_string()]);
        assert!(tracker.remove("a").is_some());
        assert_eq!(tracker.run_ids(), vec!["b".to_string()]);
    }

    #[test]
    fn test_snapshot_serializes() {
        let tracker = ProgressTracker::new();
        let mut metadata = Map::new();
        metadata.insert("brand".into(), Value::String("Acme".into()));
        tracker.create("run-1", 2, metadata);
        let json = serde_json::to_value(tracker.get("run-1").unwrap()).unwrap();
        assert_eq!(json["total"], 2);
        assert_eq!(json["is_done"], false);
        assert_eq!(json["metadata"]["brand"], "Acme");
    }

    #[test]
    fn test_concurrent_callbacks() {
        let tracker = ProgressTracker::new();
        tracker.create("run-1", 400, Map::new());
        let task = Task::new("Acme", "mock", "q");

        let handles: Vec<_> = (0..4)
            .map(|i| {
                let mut callback = tracker.callback("run-1");
                let task = task.clone();
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        callback(&task, &outcome(i % 2 == 0));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let snap = tracker.get("run-1").unwrap();
        assert_eq!(snap.completed, 200);
        assert_eq!(snap.failed, 200);
        assert!(snap.is_done);
    }
}
