//! # ChainTrack Bus - Real-Time Event Distribution Core
//!
//! In-process publish/subscribe broker behind the ChainTrack dashboard.
//! Producers (ledger adapters, label scans, the synthetic generator) publish
//! domain events; any number of presentation consumers observe them.
//!
//! ```text
//! ┌──────────────┐   publish()   ┌──────────────────────────┐   queue   ┌────────────┐
//! │  Producers   │ ────────────► │        EventBroker       │ ────────► │ Subscriber │
//! │ ledger, scan │               │  log (bounded, newest    │ ────────► │ Subscriber │
//! │ generator    │               │  first) + metrics        │           └────────────┘
//! └──────────────┘               └──────────────────────────┘
//!                                      ▲ snapshot() / metrics()
//!                                      └─────────── dashboards
//! ```
//!
//! ## Guarantees
//!
//! - The log never holds more than `log_capacity` events (default 100).
//! - Every subscriber sees events in log order.
//! - A failing or panicking subscriber never affects publishers, the log or
//!   other subscribers.
//! - After `unsubscribe` returns, the callback is never invoked again.
//! - `set_active(false)` pauses only the synthetic generator.

// Nursery lints that are too strict
#![allow(clippy::missing_const_for_fn)]
// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::panic))]

pub mod broker;
pub mod config;
pub mod error;
pub mod events;
pub mod generator;
pub mod log;
pub mod metrics;
pub mod subscriber;
pub mod topics;

// Re-export main types
pub use broker::{EventBroker, EventPublisher};
pub use config::{BusConfig, GeneratorConfig};
pub use error::{BrokerError, ConfigError, GeneratorError, Result, SubscriberError, ValidationError};
pub use events::{Event, EventFilter, EventId, EventType, Payload, PublishRequest, DEFAULT_SOURCE};
pub use generator::{synthetic_payload, GeneratorHandle, SyntheticTrafficGenerator};
pub use log::EventLog;
pub use metrics::{ComponentStatus, Metrics};
pub use subscriber::{Callback, EventStream, SubscriptionHandle, SubscriptionId};
pub use topics::{
    ByEventType, FixedTopic, RoundRobin, TopicPolicy, TopicRegistry, TopicSelector, UniformRandom,
};

/// Maximum events retained in the log.
pub const DEFAULT_LOG_CAPACITY: usize = 100;

/// Maximum events to buffer per subscriber before deliveries are dropped.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1000;

/// Source tag on events invented by the synthetic generator.
pub const GENERATOR_SOURCE: &str = "background-service";
