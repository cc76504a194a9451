//! Circuit breaker keyed per (provider, model).
//!
//! States:
//! - Closed: calls pass through; consecutive counted failures are tallied
//! - Open: calls are rejected with a synthetic breaker-open error until
//!   `recovery_timeout` has passed since the last failure
//! - HalfOpen: up to `half_open_max_calls` trial calls probe recovery
//!
//! The lock is held only for the admission check and the result update, never
//! across the wrapped call.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::domain::{Classified, ErrorKind};
use crate::sync::lock;

/// Predicate deciding whether a failure kind counts toward the threshold.
pub type FailurePredicate = Arc<dyn Fn(ErrorKind) -> bool + Send + Sync>;

/// Breaker configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerConfig {
    /// Consecutive counted failures that open the breaker
    pub failure_threshold: u32,
    /// Time after the last failure before trial calls are admitted
    pub recovery_timeout_ms: u64,
    /// Trial calls admitted while half-open
    pub half_open_max_calls: u32,
    /// Failure kinds that count toward the threshold
    pub trip_on: Vec<ErrorKind>,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout_ms: 30_000,
            half_open_max_calls: 1,
            trip_on: vec![ErrorKind::Timeout, ErrorKind::Connection, ErrorKind::Transport],
        }
    }
}

impl BreakerConfig {
    pub fn new(failure_threshold: u32, recovery_timeout: Duration, half_open_max_calls: u32) -> Self {
        Self {
            failure_threshold,
            recovery_timeout_ms: recovery_timeout.as_millis() as u64,
            half_open_max_calls,
            ..Self::default()
        }
    }

    pub fn recovery_timeout(&self) -> Duration {
        Duration::from_millis(self.recovery_timeout_ms)
    }

    fn predicate(&self) -> FailurePredicate {
        let kinds = self.trip_on.clone();
        Arc::new(move |kind| kinds.contains(&kind))
    }
}

/// Breaker operating mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl fmt::Display for BreakerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BreakerState::Closed => "closed",
            BreakerState::Open => "open",
            BreakerState::HalfOpen => "half_open",
        };
        f.write_str(s)
    }
}

/// Identity of one breaker.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BreakerKey {
    pub provider: String,
    pub model: String,
}

impl BreakerKey {
    pub fn new(provider: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
        }
    }
}

impl fmt::Display for BreakerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.provider, self.model)
    }
}

/// Error returned by [`CircuitBreaker::call`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BreakerError<E> {
    /// Rejected without running the operation
    Open { key: BreakerKey },
    /// The operation ran and failed
    Inner(E),
}

impl<E: fmt::Display> fmt::Display for BreakerError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BreakerError::Open { key } => write!(f, "circuit breaker open for {}", key),
            BreakerError::Inner(e) => e.fmt(f),
        }
    }
}

impl<E: fmt::Debug + fmt::Display> std::error::Error for BreakerError<E> {}

impl<E: Classified> Classified for BreakerError<E> {
    fn kind(&self) -> ErrorKind {
        match self {
            BreakerError::Open { .. } => ErrorKind::BreakerOpen,
            BreakerError::Inner(e) => e.kind(),
        }
    }
}

/// Serializable view of a breaker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakerSnapshot {
    pub key: String,
    pub state: BreakerState,
    pub failure_count: u32,
    pub last_failure_age_ms: Option<u64>,
    pub half_open_calls: u32,
}

#[derive(Debug)]
struct BreakerInner {
    state: BreakerState,
    failure_count: u32,
    last_failure: Option<Instant>,
    /// Trial calls admitted in the current half-open window
    half_open_calls: u32,
    /// Trial calls that finished without a verdict
    half_open_settled: u32,
    /// Bumped on every state transition so stale trial results are ignored
    generation: u64,
}

impl BreakerInner {
    fn new() -> Self {
        Self {
            state: BreakerState::Closed,
            failure_count: 0,
            last_failure: None,
            half_open_calls: 0,
            half_open_settled: 0,
            generation: 0,
        }
    }

    fn transition(&mut self, state: BreakerState) {
        self.state = state;
        self.generation += 1;
        self.half_open_calls = 0;
        self.half_open_settled = 0;
    }
}

/// Admission ticket for one call.
///
/// Dropping a permit without recording a result (e.g. the call future was
/// aborted) settles it as a neutral completion.
pub struct BreakerPermit<'a> {
    breaker: &'a CircuitBreaker,
    trial: bool,
    generation: u64,
    settled: bool,
}

impl BreakerPermit<'_> {
    pub fn is_trial(&self) -> bool {
        self.trial
    }

    pub fn succeed(mut self) {
        self.settled = true;
        self.breaker.on_success(self.trial, self.generation);
    }

    /// Record a failure; `counted` says whether it counts toward the threshold.
    pub fn fail(mut self, counted: bool) {
        self.settled = true;
        if counted {
            self.breaker.on_failure(self.trial, self.generation);
        } else {
            self.breaker.on_neutral(self.trial, self.generation);
        }
    }
}

impl Drop for BreakerPermit<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.breaker.on_neutral(self.trial, self.generation);
        }
    }
}

/// Circuit breaker for one (provider, model) pair.
pub struct CircuitBreaker {
    key: BreakerKey,
    config: BreakerConfig,
    predicate: FailurePredicate,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(key: BreakerKey, config: BreakerConfig) -> Self {
        let predicate = config.predicate();
        Self {
            key,
            config,
            predicate,
            inner: Mutex::new(BreakerInner::new()),
        }
    }

    /// Replace the failure-classification predicate.
    pub fn with_predicate(mut self, predicate: FailurePredicate) -> Self {
        self.predicate = predicate;
        self
    }

    pub fn key(&self) -> &BreakerKey {
        &self.key
    }

    pub fn config(&self) -> &BreakerConfig {
        &self.config
    }

    /// Current mode, without applying the lazy Open -> HalfOpen check.
    pub fn state(&self) -> BreakerState {
        lock(&self.inner).state
    }

    pub fn failure_count(&self) -> u32 {
        lock(&self.inner).failure_count
    }

    /// Whether `kind` counts toward the failure threshold.
    pub fn counts(&self, kind: ErrorKind) -> bool {
        (self.predicate)(kind)
    }

    /// Run `op` through the breaker.
    ///
    /// Rejected calls return [`BreakerError::Open`] without running `op`.
    /// Failures whose kind the predicate does not count pass through without
    /// affecting the failure tally.
    pub async fn call<T, E, F, Fut>(&self, op: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Classified,
    {
        let Some(permit) = self.try_acquire() else {
            return Err(BreakerError::Open { key: self.key.clone() });
        };

        match op().await {
            Ok(value) => {
                permit.succeed();
                Ok(value)
            }
            Err(e) => {
                permit.fail(self.counts(e.kind()));
                Err(BreakerError::Inner(e))
            }
        }
    }

    /// Ask for admission. `None` means the breaker is open.
    pub fn try_acquire(&self) -> Option<BreakerPermit<'_>> {
        let mut inner = lock(&self.inner);

        if inner.state == BreakerState::Open {
            let recovered = inner
                .last_failure
                .map(|at| at.elapsed() >= self.config.recovery_timeout())
                .unwrap_or(true);
            if !recovered {
                return None;
            }
            inner.transition(BreakerState::HalfOpen);
            inner.failure_count = 0;
            tracing::info!(breaker = %self.key, "Circuit breaker entering half-open state");
        }

        match inner.state {
            BreakerState::Closed => Some(BreakerPermit {
                breaker: self,
                trial: false,
                generation: inner.generation,
                settled: false,
            }),
            BreakerState::HalfOpen => {
                if inner.half_open_calls >= self.config.half_open_max_calls.max(1) {
                    return None;
                }
                inner.half_open_calls += 1;
                Some(BreakerPermit {
                    breaker: self,
                    trial: true,
                    generation: inner.generation,
                    settled: false,
                })
            }
            BreakerState::Open => None,
        }
    }

    /// Force the breaker back to Closed with a clean tally.
    pub fn reset(&self) {
        let mut inner = lock(&self.inner);
        inner.transition(BreakerState::Closed);
        inner.failure_count = 0;
        inner.last_failure = None;
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let inner = lock(&self.inner);
        BreakerSnapshot {
            key: self.key.to_string(),
            state: inner.state,
            failure_count: inner.failure_count,
            last_failure_age_ms: inner.last_failure.map(|at| at.elapsed().as_millis() as u64),
            half_open_calls: inner.half_open_calls,
        }
    }

    fn on_success(&self, trial: bool, generation: u64) {
        let mut inner = lock(&self.inner);
        match inner.state {
            BreakerState::Closed if generation == inner.generation => inner.failure_count = 0,
            BreakerState::HalfOpen if trial && generation == inner.generation => {
                inner.transition(BreakerState::Closed);
                inner.failure_count = 0;
                tracing::info!(breaker = %self.key, "Circuit breaker closed after successful trial call");
            }
            _ => {}
        }
    }

    fn on_failure(&self, trial: bool, generation: u64) {
        let mut inner = lock(&self.inner);
        match inner.state {
            // Permits from before the last transition belong to an earlier window
            BreakerState::Closed if generation == inner.generation => {
                inner.failure_count += 1;
                inner.last_failure = Some(Instant::now());
                if inner.failure_count >= self.config.failure_threshold.max(1) {
                    self.open(&mut inner, "failure threshold reached");
                }
            }
            BreakerState::HalfOpen if trial && generation == inner.generation => {
                inner.last_failure = Some(Instant::now());
                self.open(&mut inner, "trial call failed");
            }
            _ => {}
        }
    }

    fn on_neutral(&self, trial: bool, generation: u64) {
        let mut inner = lock(&self.inner);
        if inner.state == BreakerState::HalfOpen && trial && generation == inner.generation {
            inner.half_open_settled += 1;
            if inner.half_open_settled >= self.config.half_open_max_calls.max(1) {
                inner.last_failure = Some(Instant::now());
                self.open(&mut inner, "trial budget exhausted without success");
            }
        }
    }

    fn open(&self, inner: &mut BreakerInner, reason: &str) {
        inner.transition(BreakerState::Open);
        tracing::warn!(
            breaker = %self.key,
            failures = inner.failure_count,
            reason = reason,
            "Circuit breaker opened"
        );
    }
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("key", &self.key)
            .field("config", &self.config)
            .field("inner", &*lock(&self.inner))
            .finish()
    }
}

/// Lazily-populated set of breakers, one per (provider, model).
pub struct BreakerRegistry {
    config: BreakerConfig,
    predicate: Option<FailurePredicate>,
    breakers: Mutex<HashMap<BreakerKey, Arc<CircuitBreaker>>>,
}

impl BreakerRegistry {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            predicate: None,
            breakers: Mutex::new(HashMap::new()),
        }
    }

    /// Use `predicate` for every breaker created from now on.
    pub fn with_predicate(mut self, predicate: FailurePredicate) -> Self {
        self.predicate = Some(predicate);
        self
    }

    pub fn config(&self) -> &BreakerConfig {
        &self.config
    }

    /// Breaker for `key`, created on first use.
    pub fn get(&self, key: &BreakerKey) -> Arc<CircuitBreaker> {
        let mut breakers = lock(&self.breakers);
        if let Some(breaker) = breakers.get(key) {
            return breaker.clone();
        }
        let mut breaker = CircuitBreaker::new(key.clone(), self.config.clone());
        if let Some(predicate) = &self.predicate {
            breaker = breaker.with_predicate(predicate.clone());
        }
        let breaker = Arc::new(breaker);
        breakers.insert(key.clone(), breaker.clone());
        breaker
    }

    /// Reset one breaker. Returns false if it was never created.
    pub fn reset(&self, key: &BreakerKey) -> bool {
        match lock(&self.breakers).get(key) {
            Some(breaker) => {
                breaker.reset();
                true
            }
            None => false,
        }
    }

    /// Drop every breaker; the next call starts from a fresh Closed state.
    pub fn reset_all(&self) {
        lock(&self.breakers).clear();
    }

    pub fn len(&self) -> usize {
        lock(&self.breakers).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshots of every breaker, sorted by key.
    pub fn snapshots(&self) -> Vec<BreakerSnapshot> {
        let breakers: Vec<Arc<CircuitBreaker>> = lock(&self.breakers).values().cloned().collect();
        let mut snapshots: Vec<BreakerSnapshot> = breakers.iter().map(|b| b.snapshot()).collect();
        snapshots.sort_by(|a, b| a.key.cmp(&b.key));
        snapshots
    }
}

impl Default for BreakerRegistry {
    fn default() -> Self {
        Self::new(BreakerConfig::default())
    }
}
