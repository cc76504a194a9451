//! Frequency governor - per-provider minimum spacing between requests.
//!
//! Providers throttle aggressively when hit in bursts, so every call reserves
//! a time slot first. `reserve` never fails: it returns how long the caller
//! must wait before sending, and records the slot so concurrent callers on the
//! same provider line up behind it.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::sync::lock;

/// Built-in minimum intervals (ms) for providers that need more than the default.
const BUILTIN_INTERVALS_MS: &[(&str, u64)] = &[
    ("openai", 1000),
    ("anthropic", 1000),
    ("google", 1500),
    ("perplexity", 2000),
    ("deepseek", 2000),
];

/// Governor configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GovernorConfig {
    /// Spacing for providers without an explicit entry
    pub default_interval_ms: u64,
    /// Per-provider spacing overrides
    pub intervals: HashMap<String, u64>,
    /// How long reservations are kept before pruning
    pub retention_secs: u64,
    /// Hard cap on reservations kept per provider
    pub max_history: usize,
}

impl Default for GovernorConfig {
    fn default() -> Self {
        Self {
            default_interval_ms: 1000,
            intervals: BUILTIN_INTERVALS_MS
                .iter()
                .map(|(p, ms)| (p.to_string(), *ms))
                .collect(),
            retention_secs: 300,
            max_history: 64,
        }
    }
}

impl GovernorConfig {
    /// Set one provider's interval.
    pub fn with_interval(mut self, provider: &str, interval: Duration) -> Self {
        self.intervals.insert(provider.to_string(), interval.as_millis() as u64);
        self
    }

    pub fn with_default_interval(mut self, interval: Duration) -> Self {
        self.default_interval_ms = interval.as_millis() as u64;
        self
    }
}

/// Rolling list of reserved request instants for one provider.
#[derive(Debug, Default)]
pub struct FrequencyRecord {
    slots: VecDeque<Instant>,
}

impl FrequencyRecord {
    /// Latest reserved slot, which may lie in the future.
    pub fn last_slot(&self) -> Option<Instant> {
        self.slots.back().copied()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    fn push(&mut self, slot: Instant, max_history: usize) {
        self.slots.push_back(slot);
        while self.slots.len() > max_history.max(1) {
            self.slots.pop_front();
        }
    }

    /// Drop slots older than `retention`. The newest slot is always kept while
    /// it is still inside the window.
    fn prune(&mut self, now: Instant, retention: Duration) {
        while let Some(front) = self.slots.front() {
            if now.saturating_duration_since(*front) > retention {
                self.slots.pop_front();
            } else {
                break;
            }
        }
    }
}

/// Shared per-provider request spacing.
#[derive(Debug)]
pub struct FrequencyGovernor {
    config: GovernorConfig,
    records: Mutex<HashMap<String, Arc<Mutex<FrequencyRecord>>>>,
}

impl FrequencyGovernor {
    pub fn new(config: GovernorConfig) -> Self {
        Self {
            config,
            records: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &GovernorConfig {
        &self.config
    }

    /// Minimum spacing for `provider`.
    pub fn interval_for(&self, provider: &str) -> Duration {
        let ms = self
            .config
            .intervals
            .get(provider)
            .copied()
            .unwrap_or(self.config.default_interval_ms);
        Duration::from_millis(ms)
    }

    /// Reserve the next slot for `provider` and return the wait before it.
    pub fn reserve(&self, provider: &str) -> Duration {
        let interval = self.interval_for(provider);
        let record = self.record(provider);
        self.reserve_in(&record, provider, interval)
    }

    fn reserve_in(&self, record: &Mutex<FrequencyRecord>, provider: &str, interval: Duration) -> Duration {
        let mut record = lock(record);

        let now = Instant::now();
        record.prune(now, self.retention());

        let slot = match record.last_slot() {
            Some(last) => (last + interval).max(now),
            None => now,
        };
        record.push(slot, self.config.max_history);

        let delay = slot.saturating_duration_since(now);
        if !delay.is_zero() {
            tracing::debug!(
                provider = %provider,
                delay_ms = delay.as_millis() as u64,
                "Spacing request"
            );
        }
        delay
    }

    /// Prune expired reservations for every provider and forget idle ones.
    ///
    /// A record someone else still holds is kept: a `reserve` between map
    /// lookup and record lock would otherwise write into a detached record.
    pub fn cleanup(&self) {
        let now = Instant::now();
        let retention = self.retention();
        let mut records = lock(&self.records);
        records.retain(|_, record| {
            if Arc::strong_count(record) > 1 {
                return true;
            }
            let mut record = lock(record);
            record.prune(now, retention);
            !record.is_empty()
        });
    }

    /// Forget all reservations.
    pub fn reset(&self) {
        lock(&self.records).clear();
    }

    /// Providers with live reservations, sorted.
    pub fn tracked_providers(&self) -> Vec<String> {
        let mut providers: Vec<String> = lock(&self.records).keys().cloned().collect();
        providers.sort();
        providers
    }

    fn retention(&self) -> Duration {
        Duration::from_secs(self.config.retention_secs)
    }

    fn record(&self, provider: &str) -> Arc<Mutex<FrequencyRecord>> {
        lock(&self.records)
            .entry(provider.to_string())
            .or_default()
            .clone()
    }
}

impl Default for FrequencyGovernor {
    fn default() -> Self {
        Self::new(GovernorConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn governor(interval_ms: u64) -> FrequencyGovernor {
        FrequencyGovernor::new(GovernorConfig::default().with_default_interval(Duration::from_millis(interval_ms)))
    }

    #[test]
    fn test_builtin_intervals() {
        let gov = FrequencyGovernor::default();
        assert_eq!(gov.interval_for("openai"), Duration::from_millis(1000));
        assert_eq!(gov.interval_for("perplexity"), Duration::from_millis(2000));
        assert_eq!(gov.interval_for("unknown"), Duration::from_millis(1000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_reservation_is_immediate() {
        let gov = governor(1000);
        assert_eq!(gov.reserve("mock"), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_back_to_back_reservations_are_spaced() {
        let gov = governor(1000);
        assert_eq!(gov.reserve("mock"), Duration::ZERO);
        assert_eq!(gov.reserve("mock"), Duration::from_millis(1000));
        assert_eq!(gov.reserve("mock"), Duration::from_millis(2000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_providers_are_independent() {
        let gov = governor(1000);
        assert_eq!(gov.reserve("a"), Duration::ZERO);
        assert_eq!(gov.reserve("b"), Duration::ZERO);
        assert_eq!(gov.reserve("a"), Duration::from_millis(1000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_elapsed_time_reduces_delay() {
        let gov = governor(1000);
        gov.reserve("mock");
        tokio::time::advance(Duration::from_millis(400)).await;
        assert_eq!(gov.reserve("mock"), Duration::from_millis(600));
        tokio::time::advance(Duration::from_secs(5)).await;
        assert_eq!(gov.reserve("mock"), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_per_provider_override() {
        let gov = FrequencyGovernor::new(GovernorConfig::default().with_interval("slow", Duration::from_secs(3)));
        gov.reserve("slow");
        assert_eq!(gov.reserve("slow"), Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_history_is_bounded() {
        let gov = FrequencyGovernor::new(GovernorConfig {
            default_interval_ms: 0,
            max_history: 4,
            ..GovernorConfig::default()
        });
        for _ in 0..10 {
            gov.reserve("mock");
        }
        let record = gov.record("mock");
        assert_eq!(lock(&record).len(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cleanup_drops_expired_records() {
        let gov = governor(1000);
        gov.reserve("old");
        tokio::time::advance(Duration::from_secs(301)).await;
        gov.reserve("fresh");

        gov.cleanup();

        assert_eq!(gov.tracked_providers(), vec!["fresh".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cleanup_keeps_record_held_by_pending_reservation() {
        let gov = governor(1000);
        gov.reserve("mock");
        tokio::time::advance(Duration::from_secs(301)).await;

        // A reservation has looked up the record but not yet locked it
        let held = gov.record("mock");
        gov.cleanup();
        assert_eq!(gov.tracked_providers(), vec!["mock".to_string()]);

        assert_eq!(gov.reserve_in(&held, "mock", Duration::from_secs(1)), Duration::ZERO);
        drop(held);
        assert_eq!(gov.reserve("mock"), Duration::from_millis(1000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset() {
        let gov = governor(1000);
        gov.reserve("mock");
        gov.reset();
        assert!(gov.tracked_providers().is_empty());
        assert_eq!(gov.reserve("mock"), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_reservations_never_overlap() {
        let gov = Arc::new(governor(1000));
        let mut handles = Vec::new();
        for _ in 0..8 {
            let gov = gov.clone();
            handles.push(tokio::spawn(async move { gov.reserve("mock") }));
        }
        let mut delays = Vec::new();
        for handle in handles {
            delays.push(handle.await.unwrap());
        }
        delays.sort();
        let expected: Vec<Duration> = (0..8).map(|i| Duration::from_secs(i)).collect();
        assert_eq!(delays, expected);
    }
}
