//! Scheduler - drives a batch of tasks through the executor.
//!
//! Sequential runs execute on the calling task in input order. Concurrent runs
//! spawn a bounded pool of workers that pull task indices from a shared queue
//! and report outcomes back over a channel; the coordinator invokes the
//! caller's callback one outcome at a time, so callbacks never race.

use std::any::Any;
use std::collections::VecDeque;
use std::future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};

use futures::FutureExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::domain::{ErrorKind, Outcome, Task, TaskError};
use crate::runner::TaskExecutor;
use crate::scheduler::strategy::{SchedulerConfig, Strategy};
use crate::scheduler::summary::RunSummary;
use crate::sync::lock;

const CANCELLED_REASON: &str = "run cancelled before dispatch";
const DEADLINE_REASON: &str = "run deadline exceeded";
const PANIC_REASON: &str = "worker panicked";

/// Runs task batches with the configured strategy.
pub struct Scheduler {
    executor: Arc<TaskExecutor>,
    config: SchedulerConfig,
}

impl Scheduler {
    pub fn new(executor: Arc<TaskExecutor>, config: SchedulerConfig) -> Self {
        Self { executor, config }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn executor(&self) -> &Arc<TaskExecutor> {
        &self.executor
    }

    /// Run every task to an outcome, calling `on_task_done` once per task.
    pub async fn run<F>(&self, tasks: Vec<Task>, on_task_done: F) -> RunSummary
    where
        F: FnMut(&Task, &Outcome),
    {
        self.run_with_cancel(tasks, CancellationToken::new(), on_task_done).await
    }

    /// Like [`run`](Self::run), stopping dispatch once `cancel` fires.
    ///
    /// Tasks already in flight finish normally; undispatched tasks get a
    /// `Cancelled` outcome without being attempted.
    pub async fn run_with_cancel<F>(&self, tasks: Vec<Task>, cancel: CancellationToken, mut on_task_done: F) -> RunSummary
    where
        F: FnMut(&Task, &Outcome),
    {
        let started = Instant::now();
        let mut summary = RunSummary::new(tasks.len());
        let deadline = self.config.run_timeout().map(|timeout| started + timeout);

        tracing::info!(
            tasks = tasks.len(),
            strategy = %self.config.strategy,
            max_workers = self.config.max_workers,
            "Starting run"
        );

        {
            let mut deliver = |task: &Task, outcome: Outcome| {
                summary.record(&outcome);
                on_task_done(task, &outcome);
            };

            let timed_out = match self.config.strategy {
                Strategy::Sequential => self.run_sequential(tasks, &cancel, deadline, &mut deliver).await,
                Strategy::Concurrent => self.run_concurrent(tasks, &cancel, deadline, &mut deliver).await,
            };
            summary.timed_out = timed_out;
        }

        self.executor.governor().cleanup();
        summary.elapsed = started.elapsed();

        tracing::info!(
            total = summary.total,
            completed = summary.completed,
            failed = summary.failed,
            cancelled = summary.cancelled,
            timed_out = summary.timed_out,
            elapsed_ms = summary.elapsed.as_millis() as u64,
            "Run finished"
        );
        summary
    }

    /// Returns true if the run deadline cut the run short.
    async fn run_sequential<D>(
        &self,
        tasks: Vec<Task>,
        cancel: &CancellationToken,
        deadline: Option<Instant>,
        deliver: &mut D,
    ) -> bool
    where
        D: FnMut(&Task, Outcome),
    {
        let mut pending = tasks.iter();

        while let Some(task) = pending.next() {
            if cancel.is_cancelled() {
                tracing::info!(remaining = pending.len() + 1, "Run cancelled, skipping remaining tasks");
                deliver(task, Outcome::cancelled(task, CANCELLED_REASON));
                pending.for_each(|rest| deliver(rest, Outcome::cancelled(rest, CANCELLED_REASON)));
                return false;
            }

            let outcome = match deadline {
                Some(deadline) if Instant::now() >= deadline => {
                    deliver(task, Outcome::cancelled(task, DEADLINE_REASON));
                    None
                }
                Some(deadline) => tokio::select! {
                    biased;
                    outcome = execute_guarded(&self.executor, task) => Some(outcome),
                    _ = tokio::time::sleep_until(deadline) => {
                        deliver(task, deadline_outcome(task));
                        None
                    }
                },
                None => Some(execute_guarded(&self.executor, task).await),
            };

            match outcome {
                Some(outcome) => deliver(task, outcome),
                None => {
                    tracing::warn!(remaining = pending.len(), "Run deadline exceeded");
                    pending.for_each(|rest| deliver(rest, Outcome::cancelled(rest, DEADLINE_REASON)));
                    return true;
                }
            }
        }
        false
    }

    /// Returns true if the run deadline cut the run short.
    async fn run_concurrent<D>(
        &self,
        tasks: Vec<Task>,
        cancel: &CancellationToken,
        deadline: Option<Instant>,
        deliver: &mut D,
    ) -> bool
    where
        D: FnMut(&Task, Outcome),
    {
        if tasks.is_empty() {
            return false;
        }

        let tasks = Arc::new(tasks);
        let queue = Arc::new(Mutex::new(dispatch_order(&tasks)));
        let mut delivered = vec![false; tasks.len()];
        let (tx, mut rx) = mpsc::unbounded_channel::<(usize, Outcome)>();

        let workers = self.config.max_workers.max(1).min(tasks.len());
        let handles: Vec<JoinHandle<()>> = (0..workers)
            .map(|worker| {
                let executor = self.executor.clone();
                let tasks = tasks.clone();
                let queue = queue.clone();
                let cancel = cancel.clone();
                let tx = tx.clone();
                tokio::spawn(async move {
                    loop {
                        if cancel.is_cancelled() {
                            break;
                        }
                        let Some(idx) = lock(&queue).pop_front() else {
                            break;
                        };
                        let outcome = execute_guarded(&executor, &tasks[idx]).await;
                        if tx.send((idx, outcome)).is_err() {
                            break;
                        }
                    }
                    tracing::debug!(worker, "Worker finished");
                })
            })
            .collect();
        drop(tx);

        let deadline_reached = async {
            match deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => future::pending::<()>().await,
            }
        };
        tokio::pin!(deadline_reached);
        let mut cancel_handled = false;

        loop {
            tokio::select! {
                biased;
                received = rx.recv() => match received {
                    Some((idx, outcome)) => {
                        delivered[idx] = true;
                        deliver(&tasks[idx], outcome);
                    }
                    // Every worker has exited; anything still queued was never dispatched
                    None => {
                        let undispatched: Vec<usize> = lock(&queue).drain(..).collect();
                        for idx in undispatched {
                            deliver(&tasks[idx], Outcome::cancelled(&tasks[idx], CANCELLED_REASON));
                        }
                        return false;
                    }
                },
                _ = cancel.cancelled(), if !cancel_handled => {
                    cancel_handled = true;
                    let undispatched: Vec<usize> = lock(&queue).drain(..).collect();
                    tracing::info!(skipped = undispatched.len(), "Run cancelled, draining queue");
                    for idx in undispatched {
                        delivered[idx] = true;
                        deliver(&tasks[idx], Outcome::cancelled(&tasks[idx], CANCELLED_REASON));
                    }
                }
                _ = &mut deadline_reached => {
                    for handle in &handles {
                        handle.abort();
                    }
                    let undispatched: Vec<usize> = lock(&queue).drain(..).collect();

                    while let Ok((idx, outcome)) = rx.try_recv() {
                        delivered[idx] = true;
                        deliver(&tasks[idx], outcome);
                    }
                    for idx in &undispatched {
                        delivered[*idx] = true;
                        deliver(&tasks[*idx], Outcome::cancelled(&tasks[*idx], DEADLINE_REASON));
                    }

                    let in_flight: Vec<usize> = (0..tasks.len()).filter(|idx| !delivered[*idx]).collect();
                    tracing::warn!(
                        in_flight = in_flight.len(),
                        undispatched = undispatched.len(),
                        "Run deadline exceeded, aborting workers"
                    );
                    for idx in in_flight {
                        deliver(&tasks[idx], deadline_outcome(&tasks[idx]));
                    }
                    return true;
                }
            }
        }
    }
}

/// Indices in dispatch order: higher priority first, input order among equals.
pub fn dispatch_order(tasks: &[Task]) -> VecDeque<usize> {
    let mut order: Vec<usize> = (0..tasks.len()).collect();
    order.sort_by_key(|idx| std::cmp::Reverse(tasks[*idx].priority().unwrap_or(0)));
    order.into()
}

/// Execute `task`, turning a panic inside the executor or adapter into a
/// failed outcome so the task is still delivered exactly once.
async fn execute_guarded(executor: &TaskExecutor, task: &Task) -> Outcome {
    match AssertUnwindSafe(executor.execute(task)).catch_unwind().await {
        Ok(outcome) => outcome,
        Err(payload) => {
            tracing::error!(task = %task.id(), panic = %panic_message(payload.as_ref()), "Task execution panicked");
            Outcome::failed(task, task.provider(), "", TaskError::new(ErrorKind::Other, PANIC_REASON), 0)
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn deadline_outcome(task: &Task) -> Outcome {
    Outcome::failed(
        task,
        task.provider(),
        "",
        TaskError::new(ErrorKind::Timeout, DEADLINE_REASON),
        0,
    )
}
