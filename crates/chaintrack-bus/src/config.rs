//! Configuration for the broker and the synthetic traffic generator.

use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;
use crate::events::EventType;
use crate::topics::{TopicRegistry, DEFAULT_TOPICS};

/// Broker configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// Maximum events retained in the log (default: 100).
    pub log_capacity: usize,

    /// Topic names, in registry order.
    pub topics: Vec<String>,

    /// Trailing window for the events-per-second rate, in milliseconds.
    pub metrics_window_ms: u64,

    /// Queue depth per subscriber before deliveries are dropped.
    pub subscriber_queue_capacity: usize,

    /// Maximum serialized payload size in bytes.
    pub max_payload_bytes: usize,

    /// Maximum number of payload fields.
    pub max_payload_fields: usize,

    /// Whether the synthetic generator may fire right after construction.
    pub start_active: bool,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            log_capacity: crate::DEFAULT_LOG_CAPACITY,
            topics: DEFAULT_TOPICS.iter().map(|t| (*t).to_string()).collect(),
            metrics_window_ms: 5_000,
            subscriber_queue_capacity: crate::DEFAULT_CHANNEL_CAPACITY,
            max_payload_bytes: 16 * 1024,
            max_payload_fields: 64,
            start_active: true,
        }
    }
}

impl BusConfig {
    /// Validate limits and build the topic registry.
    ///
    /// # Errors
    ///
    /// Any zero limit or an invalid topic list.
    pub fn validate(&self) -> Result<TopicRegistry, ConfigError> {
        let non_zero = [
            ("log_capacity", self.log_capacity as u64),
            ("metrics_window_ms", self.metrics_window_ms),
            (
                "subscriber_queue_capacity",
                self.subscriber_queue_capacity as u64,
            ),
            ("max_payload_bytes", self.max_payload_bytes as u64),
            ("max_payload_fields", self.max_payload_fields as u64),
        ];
        if let Some((field, _)) = non_zero.iter().find(|(_, value)| *value == 0) {
            return Err(ConfigError::ZeroValue { field: *field });
        }
        TopicRegistry::new(self.topics.iter().cloned())
    }

    /// The throughput window as a `Duration`.
    #[must_use]
    pub fn metrics_window(&self) -> Duration {
        Duration::from_millis(self.metrics_window_ms)
    }
}

/// Synthetic traffic generator configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GeneratorConfig {
    /// Lower bound of the randomized fire interval (default: 5s).
    pub min_interval_ms: u64,

    /// Upper bound of the randomized fire interval (default: 15s).
    pub max_interval_ms: u64,

    /// Event types to choose from (default: the background subset).
    pub event_types: Vec<EventType>,

    /// Producer tag stamped on generated events.
    pub source: String,

    /// Seed for reproducible traffic; OS entropy when absent.
    pub seed: Option<u64>,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            min_interval_ms: 5_000,
            max_interval_ms: 15_000,
            event_types: EventType::BACKGROUND.to_vec(),
            source: crate::GENERATOR_SOURCE.to_string(),
            seed: None,
        }
    }
}

impl GeneratorConfig {
    /// Check interval bounds and the event type list.
    ///
    /// # Errors
    ///
    /// Inverted or zero intervals, or no event types.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.min_interval_ms == 0 || self.min_interval_ms > self.max_interval_ms {
            return Err(ConfigError::InvalidInterval {
                min_ms: self.min_interval_ms,
                max_ms: self.max_interval_ms,
            });
        }
        if self.event_types.is_empty() {
            return Err(ConfigError::NoGeneratorEventTypes);
        }
        Ok(())
    }

    /// Longest possible wait between fires.
    #[must_use]
    pub fn max_interval(&self) -> Duration {
        Duration::from_millis(self.max_interval_ms)
    }
}
