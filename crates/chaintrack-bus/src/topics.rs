//! # Topic Registry
//!
//! Static catalog of routing channels, immutable after broker construction,
//! plus the injectable policies that pick a topic when a producer does not.

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::events::EventType;

/// Shipment lifecycle events.
pub const SHIPMENTS: &str = "chaintrack.events.shipments";
/// Label scan events.
pub const QR_SCANS: &str = "chaintrack.events.qr_scans";
/// Prediction and analysis results.
pub const PREDICTIONS: &str = "chaintrack.analytics.predictions";
/// Anomaly alerts.
pub const ANOMALIES: &str = "chaintrack.analytics.anomalies";
/// Ledger status transitions.
pub const STATUS_UPDATES: &str = "chaintrack.events.status_updates";

/// The dashboard's default topics, in registry order.
pub const DEFAULT_TOPICS: [&str; 5] = [SHIPMENTS, QR_SCANS, PREDICTIONS, ANOMALIES, STATUS_UPDATES];

/// Ordered, immutable set of topic names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicRegistry {
    topics: Arc<[String]>,
}

impl TopicRegistry {
    /// Build a registry from a list of names.
    ///
    /// # Errors
    ///
    /// Fails when the list is empty, contains a blank name or a duplicate.
    pub fn new<I, S>(topics: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut names: Vec<String> = Vec::new();
        for topic in topics {
            let topic = topic.into();
            if topic.trim().is_empty() {
                return Err(ConfigError::BlankTopic);
            }
            if names.contains(&topic) {
                return Err(ConfigError::DuplicateTopic(topic));
            }
            names.push(topic);
        }
        if names.is_empty() {
            return Err(ConfigError::NoTopics);
        }
        Ok(Self {
            topics: names.into(),
        })
    }

    /// Number of registered topics.
    #[must_use]
    pub fn len(&self) -> usize {
        self.topics.len()
    }

    /// Always false for a constructed registry; present for API symmetry.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.topics.is_empty()
    }

    /// Whether a topic is registered.
    #[must_use]
    pub fn contains(&self, topic: &str) -> bool {
        self.topics.iter().any(|t| t == topic)
    }

    /// Topic at a registry position.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&str> {
        self.topics.get(index).map(String::as_str)
    }

    /// All topics in registry order.
    #[must_use]
    pub fn as_slice(&self) -> &[String] {
        &self.topics
    }

    /// Iterate over topic names.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.topics.iter().map(String::as_str)
    }
}

impl Default for TopicRegistry {
    fn default() -> Self {
        Self {
            topics: DEFAULT_TOPICS.iter().map(|t| (*t).to_string()).collect(),
        }
    }
}

/// Strategy for choosing a topic when a publish request names none.
pub trait TopicSelector: Send + Sync + fmt::Debug {
    /// Pick a registered topic for an event of the given type.
    fn select(&self, registry: &TopicRegistry, event_type: EventType) -> String;

    /// Check the selector against the registry it will be used with.
    fn validate(&self, _registry: &TopicRegistry) -> Result<(), ConfigError> {
        Ok(())
    }
}

/// Uniform random choice over the registry.
#[derive(Debug)]
pub struct UniformRandom {
    rng: Mutex<StdRng>,
}

impl UniformRandom {
    /// Seeded from OS entropy.
    #[must_use]
    pub fn new() -> Self {
        Self {
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// Deterministic sequence for replay and tests.
    #[must_use]
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }
}

impl Default for UniformRandom {
    fn default() -> Self {
        Self::new()
    }
}

impl TopicSelector for UniformRandom {
    fn select(&self, registry: &TopicRegistry, _event_type: EventType) -> String {
        let index = self.rng.lock().gen_range(0..registry.len());
        registry.as_slice()[index].clone()
    }
}

/// Cycles through the registry in order.
#[derive(Debug, Default)]
pub struct RoundRobin {
    next: AtomicUsize,
}

impl RoundRobin {
    /// Start at the first registered topic.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl TopicSelector for RoundRobin {
    fn select(&self, registry: &TopicRegistry, _event_type: EventType) -> String {
        let index = self.next.fetch_add(1, Ordering::Relaxed) % registry.len();
        registry.as_slice()[index].clone()
    }
}

/// Routes every unaddressed event to one topic.
#[derive(Debug, Clone)]
pub struct FixedTopic(pub String);

impl TopicSelector for FixedTopic {
    fn select(&self, _registry: &TopicRegistry, _event_type: EventType) -> String {
        self.0.clone()
    }

    fn validate(&self, registry: &TopicRegistry) -> Result<(), ConfigError> {
        if registry.contains(&self.0) {
            Ok(())
        } else {
            Err(ConfigError::FixedTopicNotRegistered(self.0.clone()))
        }
    }
}

/// Routes each event type to its natural topic, falling back to the first
/// registered topic when that topic is not in the registry.
#[derive(Debug, Clone, Copy, Default)]
pub struct ByEventType;

impl ByEventType {
    /// The natural topic for an event type.
    #[must_use]
    pub fn natural_topic(event_type: EventType) -> &'static str {
        match event_type {
            EventType::QrScan => QR_SCANS,
            EventType::ShipmentUpdate | EventType::QualityCheck => SHIPMENTS,
            EventType::EtaPrediction | EventType::AiAnalysis => PREDICTIONS,
            EventType::AnomalyDetected => ANOMALIES,
            EventType::StatusChange => STATUS_UPDATES,
        }
    }
}

impl TopicSelector for ByEventType {
    fn select(&self, registry: &TopicRegistry, event_type: EventType) -> String {
        let natural = Self::natural_topic(event_type);
        if registry.contains(natural) {
            natural.to_string()
        } else {
            registry.as_slice()[0].clone()
        }
    }
}

/// Configuration-level name for a topic selection policy.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TopicPolicy {
    /// Uniform random choice.
    #[default]
    UniformRandom,
    /// Registry order, cycling.
    RoundRobin,
    /// Natural topic per event type.
    ByEventType,
    /// Always the named topic.
    Fixed(String),
}

impl TopicPolicy {
    /// Build the selector this policy names.
    #[must_use]
    pub fn into_selector(self, seed: Option<u64>) -> Box<dyn TopicSelector> {
        match self {
            Self::UniformRandom => match seed {
                Some(seed) => Box::new(UniformRandom::seeded(seed)),
                None => Box::new(UniformRandom::new()),
            },
            Self::RoundRobin => Box::new(RoundRobin::new()),
            Self::ByEventType => Box::new(ByEventType),
            Self::Fixed(topic) => Box::new(FixedTopic(topic)),
        }
    }
}

impl FromStr for TopicPolicy {
    type Err = ConfigError;

    /// Accepts `uniform_random`, `round_robin`, `by_event_type` or
    /// `fixed:<topic>`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if let Some(topic) = trimmed.strip_prefix("fixed:") {
            return Ok(Self::Fixed(topic.to_string()));
        }
        match trimmed.to_ascii_lowercase().as_str() {
            "uniform_random" | "random" => Ok(Self::UniformRandom),
            "round_robin" => Ok(Self::RoundRobin),
            "by_event_type" => Ok(Self::ByEventType),
            _ => Err(ConfigError::UnknownTopicPolicy(s.to_string())),
        }
    }
}
