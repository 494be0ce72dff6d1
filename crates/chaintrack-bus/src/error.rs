//! # Error Types
//!
//! Error taxonomy for the event broker:
//!
//! | Error | Raised by | Effect |
//! |-------|-----------|--------|
//! | `BrokerError::Closed` | `publish`, `subscribe` after shutdown | fatal to the caller only |
//! | `BrokerError::Validation` | `publish` with a malformed request | request rejected, nothing stored |
//! | `SubscriberError` | subscriber callbacks | logged, dispatch continues |
//! | `GeneratorError::Schedule` | synthetic traffic task | logged, generator reschedules |

use thiserror::Error;

/// Result type alias for broker operations.
pub type Result<T> = std::result::Result<T, BrokerError>;

/// Errors returned by the event broker.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BrokerError {
    /// The broker has been shut down.
    #[error("Event broker closed")]
    Closed,

    /// An explicit topic was given that the registry does not know.
    #[error("Unknown topic '{0}'")]
    UnknownTopic(String),

    /// The publish request was malformed.
    #[error("Invalid publish request: {0}")]
    Validation(#[from] ValidationError),

    /// Subscriber workers need a tokio runtime and none was available.
    #[error("No tokio runtime available for subscriber worker")]
    NoRuntime,
}

/// Producer-side validation failures.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Payload was not a JSON object.
    #[error("payload must be a JSON object")]
    PayloadNotObject,

    /// Source tag was present but blank.
    #[error("source tag must not be empty")]
    EmptySource,

    /// A payload key was blank.
    #[error("payload keys must not be empty")]
    EmptyKey,

    /// Payload carries more fields than allowed.
    #[error("payload has {count} fields (limit: {limit})")]
    TooManyFields {
        /// Number of fields in the payload.
        count: usize,
        /// Configured limit.
        limit: usize,
    },

    /// Serialized payload exceeds the size limit.
    #[error("payload is {size} bytes (limit: {limit})")]
    PayloadTooLarge {
        /// Serialized size in bytes.
        size: usize,
        /// Configured limit.
        limit: usize,
    },

    /// Payload could not be serialized for size accounting.
    #[error("payload could not be serialized: {0}")]
    Unserializable(String),
}

/// Failure reported by (or caught around) a subscriber callback.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SubscriberError {
    /// The callback returned an error.
    #[error("Subscriber callback failed: {0}")]
    Callback(String),

    /// The callback panicked.
    #[error("Subscriber callback panicked: {0}")]
    Panicked(String),
}

impl SubscriberError {
    /// Convenience constructor for callback failures.
    pub fn callback(message: impl std::fmt::Display) -> Self {
        Self::Callback(message.to_string())
    }
}

/// Errors from the synthetic traffic generator.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GeneratorError {
    /// Interval bounds are inverted or zero.
    #[error("Invalid generator interval: min {min_ms}ms, max {max_ms}ms")]
    InvalidInterval {
        /// Lower bound in milliseconds.
        min_ms: u64,
        /// Upper bound in milliseconds.
        max_ms: u64,
    },

    /// No event types to choose from.
    #[error("Generator has no event types configured")]
    NoEventTypes,

    /// A fire could not be scheduled or published.
    #[error("Generator schedule error: {0}")]
    Schedule(String),

    /// The generator task needs a tokio runtime and none was available.
    #[error("No tokio runtime available for generator task")]
    NoRuntime,
}

/// Configuration errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A capacity or limit was zero.
    #[error("Configuration value '{field}' must be greater than zero")]
    ZeroValue {
        /// Offending field name.
        field: &'static str,
    },

    /// The topic registry would be empty.
    #[error("Topic registry must contain at least one topic")]
    NoTopics,

    /// A topic name was blank.
    #[error("Topic names must not be blank")]
    BlankTopic,

    /// The same topic was listed twice.
    #[error("Duplicate topic '{0}'")]
    DuplicateTopic(String),

    /// A fixed topic policy named a topic outside the registry.
    #[error("Fixed topic '{0}' is not in the registry")]
    FixedTopicNotRegistered(String),

    /// An event type name could not be parsed.
    #[error("Unknown event type '{0}'")]
    UnknownEventType(String),

    /// A topic policy name could not be parsed.
    #[error("Unknown topic policy '{0}'")]
    UnknownTopicPolicy(String),

    /// Generator interval bounds are inverted or zero.
    #[error("Invalid generator interval: min {min_ms}ms, max {max_ms}ms")]
    InvalidInterval {
        /// Lower bound in milliseconds.
        min_ms: u64,
        /// Upper bound in milliseconds.
        max_ms: u64,
    },

    /// Generator has no event types.
    #[error("Generator event type list must not be empty")]
    NoGeneratorEventTypes,
}
