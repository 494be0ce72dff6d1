//! # Runtime Configuration
//!
//! Aggregates the bus, generator and telemetry configuration with the
//! runtime's own switches. Every field has a default; `CT_*` environment
//! variables override them.
//!
//! | Variable | Field |
//! |----------|-------|
//! | `CT_LOG_CAPACITY` | `bus.log_capacity` |
//! | `CT_METRICS_WINDOW_MS` | `bus.metrics_window_ms` |
//! | `CT_SUBSCRIBER_QUEUE` | `bus.subscriber_queue_capacity` |
//! | `CT_GENERATOR_ACTIVE` | `bus.start_active` |
//! | `CT_GENERATOR_MIN_MS` / `CT_GENERATOR_MAX_MS` | generator interval |
//! | `CT_GENERATOR_SEED` | generator and topic selector seed |
//! | `CT_TOPIC_POLICY` | `topic_policy` |
//! | `CT_DEMO_TRAFFIC` / `CT_DEMO_INTERVAL_MS` | demo driver |
//! | `CT_RUN_FOR_SECS` | stop after N seconds |
//! | `CT_CONSOLE_FILTER` | initial console filter |

use std::env;
use std::str::FromStr;
use std::time::Duration;

use chaintrack_bus::{BusConfig, ConfigError, GeneratorConfig, TopicPolicy};
use chaintrack_telemetry::TelemetryConfig;
use serde::Deserialize;
use thiserror::Error;

use crate::consumers::ConsoleFilter;

/// Errors raised while loading runtime configuration.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RuntimeConfigError {
    /// An environment variable held an unparsable value.
    #[error("Invalid value '{value}' for {key}")]
    InvalidValue {
        /// Variable name.
        key: &'static str,
        /// Raw value.
        value: String,
    },

    /// The assembled bus or generator configuration was rejected.
    #[error(transparent)]
    Bus(#[from] ConfigError),
}

/// Complete runtime configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Broker settings.
    pub bus: BusConfig,
    /// Synthetic generator settings.
    pub generator: GeneratorConfig,
    /// Logging and metrics settings.
    pub telemetry: TelemetryConfig,
    /// How the broker picks a topic when a producer does not.
    pub topic_policy: TopicPolicy,
    /// Drive the ledger and label adapters with sample traffic.
    pub demo_traffic: bool,
    /// Pause between demo rounds.
    pub demo_interval_ms: u64,
    /// Stop on its own after this many seconds instead of waiting for Ctrl-C.
    pub run_for_secs: Option<u64>,
    /// Console filter applied at startup.
    pub console_filter: ConsoleFilter,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            bus: BusConfig::default(),
            generator: GeneratorConfig::default(),
            telemetry: TelemetryConfig::default(),
            topic_policy: TopicPolicy::default(),
            demo_traffic: false,
            demo_interval_ms: 3_000,
            run_for_secs: None,
            console_filter: ConsoleFilter::All,
        }
    }
}

impl RuntimeConfig {
    /// Load configuration from the process environment.
    ///
    /// # Errors
    ///
    /// See [`from_lookup`](Self::from_lookup).
    pub fn from_env() -> Result<Self, RuntimeConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through an injectable lookup.
    ///
    /// # Errors
    ///
    /// `InvalidValue` for any unparsable variable, `Bus` if the result does
    /// not validate.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, RuntimeConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self {
            telemetry: TelemetryConfig::from_lookup(&lookup),
            ..Self::default()
        };

        if let Some(capacity) = parse(&lookup, "CT_LOG_CAPACITY")? {
            config.bus.log_capacity = capacity;
        }
        if let Some(window) = parse(&lookup, "CT_METRICS_WINDOW_MS")? {
            config.bus.metrics_window_ms = window;
        }
        if let Some(depth) = parse(&lookup, "CT_SUBSCRIBER_QUEUE")? {
            config.bus.subscriber_queue_capacity = depth;
        }
        if let Some(active) = parse_flag(&lookup, "CT_GENERATOR_ACTIVE")? {
            config.bus.start_active = active;
        }
        if let Some(min) = parse(&lookup, "CT_GENERATOR_MIN_MS")? {
            config.generator.min_interval_ms = min;
        }
        if let Some(max) = parse(&lookup, "CT_GENERATOR_MAX_MS")? {
            config.generator.max_interval_ms = max;
        }
        if let Some(seed) = parse(&lookup, "CT_GENERATOR_SEED")? {
            config.generator.seed = Some(seed);
        }
        if let Some(policy) = parse(&lookup, "CT_TOPIC_POLICY")? {
            config.topic_policy = policy;
        }
        if let Some(demo) = parse_flag(&lookup, "CT_DEMO_TRAFFIC")? {
            config.demo_traffic = demo;
        }
        if let Some(interval) = parse(&lookup, "CT_DEMO_INTERVAL_MS")? {
            config.demo_interval_ms = interval;
        }
        if let Some(secs) = parse(&lookup, "CT_RUN_FOR_SECS")? {
            config.run_for_secs = Some(secs);
        }
        if let Some(filter) = parse(&lookup, "CT_CONSOLE_FILTER")? {
            config.console_filter = filter;
        }

        config.validate()?;
        Ok(config)
    }

    /// Check the nested bus and generator configuration.
    ///
    /// # Errors
    ///
    /// The first `ConfigError` either part reports.
    pub fn validate(&self) -> Result<(), RuntimeConfigError> {
        self.bus.validate()?;
        self.generator.validate()?;
        if self.demo_traffic && self.demo_interval_ms == 0 {
            return Err(ConfigError::ZeroValue {
                field: "demo_interval_ms",
            }
            .into());
        }
        Ok(())
    }

    /// Pause between demo rounds.
    #[must_use]
    pub fn demo_interval(&self) -> Duration {
        Duration::from_millis(self.demo_interval_ms)
    }
}

fn parse<F, T>(lookup: &F, key: &'static str) -> Result<Option<T>, RuntimeConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    lookup(key)
        .map(|value| {
            value
                .trim()
                .parse()
                .map_err(|_| RuntimeConfigError::InvalidValue { key, value })
        })
        .transpose()
}

fn parse_flag<F>(lookup: &F, key: &'static str) -> Result<Option<bool>, RuntimeConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|value| match value.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Ok(true),
            "false" | "0" | "no" | "off" => Ok(false),
            _ => Err(RuntimeConfigError::InvalidValue { key, value }),
        })
        .transpose()
}
