//! # Metrics Aggregator
//!
//! Rolling statistics recomputed on every publish:
//!
//! - `events_per_second`: events in the trailing window / window length
//! - `latency_ms`: measured publish-to-fan-out time of the latest event
//! - `topic_count`: registry size (constant)
//!
//! Consumers only ever receive copies.

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::events::EventType;

/// Width of one throughput bucket. Publishes inside the same bucket are
/// coalesced so the window's memory is bounded by `window / BUCKET`.
const BUCKET: Duration = Duration::from_millis(100);

/// Health of one side of the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    /// Working normally.
    Active,
    /// Running but nothing to do (generator paused, no subscribers).
    Idle,
    /// Broker shut down.
    Stopped,
}

/// Snapshot of broker statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Metrics {
    /// Publish-to-fan-out time of the most recent event.
    pub latency_ms: f64,
    /// Events in the trailing window divided by its length.
    pub events_per_second: f64,
    /// Number of registered topics.
    pub topic_count: usize,
    /// Producer-side health.
    pub producer_status: ComponentStatus,
    /// Consumer-side health.
    pub consumer_status: ComponentStatus,
    /// Events accepted since construction.
    pub total_published: u64,
    /// Events accepted since construction, by type. Types never published
    /// are absent.
    pub published_by_type: BTreeMap<EventType, u64>,
    /// Subscriber callbacks that failed or panicked.
    pub dispatch_failures: u64,
    /// Deliveries dropped because a subscriber queue was full.
    pub dropped_deliveries: u64,
    /// Active subscriptions.
    pub subscriber_count: usize,
    /// Events currently retained.
    pub log_length: usize,
}

impl Metrics {
    /// Metrics for a broker that has not published anything yet.
    #[must_use]
    pub fn initial(topic_count: usize) -> Self {
        Self {
            latency_ms: 0.0,
            events_per_second: 0.0,
            topic_count,
            producer_status: ComponentStatus::Active,
            consumer_status: ComponentStatus::Idle,
            total_published: 0,
            published_by_type: BTreeMap::new(),
            dispatch_failures: 0,
            dropped_deliveries: 0,
            subscriber_count: 0,
            log_length: 0,
        }
    }
}

/// Sliding-window publish counter.
#[derive(Debug)]
pub struct ThroughputWindow {
    window: Duration,
    /// (bucket start, publishes in bucket), oldest first.
    buckets: VecDeque<(Instant, u32)>,
}

impl ThroughputWindow {
    /// Create a window of the given length. Zero is treated as one bucket.
    #[must_use]
    pub fn new(window: Duration) -> Self {
        Self {
            window: window.max(BUCKET),
            buckets: VecDeque::new(),
        }
    }

    /// Count one publish at `now`.
    pub fn record(&mut self, now: Instant) {
        match self.buckets.back_mut() {
            Some((start, count)) if now.saturating_duration_since(*start) < BUCKET => {
                *count = count.saturating_add(1);
            }
            _ => self.buckets.push_back((now, 1)),
        }
        self.evict(now);
    }

    /// Events per second over the trailing window ending at `now`.
    pub fn rate(&mut self, now: Instant) -> f64 {
        self.evict(now);
        let total: u64 = self.buckets.iter().map(|(_, count)| u64::from(*count)).sum();
        total as f64 / self.window.as_secs_f64()
    }

    fn evict(&mut self, now: Instant) {
        while let Some((start, _)) = self.buckets.front() {
            if now.saturating_duration_since(*start) > self.window {
                self.buckets.pop_front();
            } else {
                break;
            }
        }
    }
}

/// Delivery counters updated from subscriber workers and the dispatch path.
#[derive(Debug, Default)]
pub struct DeliveryStats {
    failures: AtomicU64,
    dropped: AtomicU64,
}

impl DeliveryStats {
    /// Count one failed or panicked callback.
    pub fn record_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Count deliveries dropped on full queues.
    pub fn record_dropped(&self, count: u64) {
        if count > 0 {
            self.dropped.fetch_add(count, Ordering::Relaxed);
        }
    }

    /// Callback failures so far.
    #[must_use]
    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    /// Dropped deliveries so far.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}
