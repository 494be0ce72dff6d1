//! # Dashboard Events
//!
//! Defines the event record that flows through the broker, the event
//! categories, publish requests and subscription filters.
//!
//! The serialized `Event` shape (`id`, `timestamp`, `topic`, `eventType`,
//! `payload`, `source`) is what every renderer depends on and must stay stable.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::config::BusConfig;
use crate::error::{ConfigError, ValidationError};

/// Opaque key/value payload carried by an event.
pub type Payload = Map<String, Value>;

/// Source tag used when a producer does not identify itself.
pub const DEFAULT_SOURCE: &str = "event-producer";

/// Monotonic event identifier assigned by the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(pub u64);

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "evt_{:06}", self.0)
    }
}

/// Category of domain occurrence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    /// A product label was scanned.
    QrScan,
    /// A shipment was created or its state refreshed.
    ShipmentUpdate,
    /// An arrival estimate was produced.
    EtaPrediction,
    /// Something unusual was detected along the route.
    AnomalyDetected,
    /// A ledger record changed status.
    StatusChange,
    /// An analysis run completed.
    AiAnalysis,
    /// A batch passed or failed inspection.
    QualityCheck,
}

impl EventType {
    /// Every event type, in declaration order.
    pub const ALL: [EventType; 7] = [
        EventType::QrScan,
        EventType::ShipmentUpdate,
        EventType::EtaPrediction,
        EventType::AnomalyDetected,
        EventType::StatusChange,
        EventType::AiAnalysis,
        EventType::QualityCheck,
    ];

    /// Types the synthetic generator may emit. Scans, predictions, anomalies
    /// and status changes are reserved for explicit producers.
    pub const BACKGROUND: [EventType; 3] = [
        EventType::ShipmentUpdate,
        EventType::AiAnalysis,
        EventType::QualityCheck,
    ];

    /// Wire name of the event type.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::QrScan => "QR_SCAN",
            Self::ShipmentUpdate => "SHIPMENT_UPDATE",
            Self::EtaPrediction => "ETA_PREDICTION",
            Self::AnomalyDetected => "ANOMALY_DETECTED",
            Self::StatusChange => "STATUS_CHANGE",
            Self::AiAnalysis => "AI_ANALYSIS",
            Self::QualityCheck => "QUALITY_CHECK",
        }
    }

    /// Render the human-readable console message for an event of this type.
    ///
    /// Payload values are used when present; otherwise a neutral default is
    /// substituted.
    #[must_use]
    pub fn describe(&self, payload: &Payload) -> String {
        let field = |key: &str| payload_text(payload, key);
        match self {
            Self::QrScan => format!(
                "QR code scanned for Product #{}",
                field("productId").unwrap_or_else(|| "unknown".to_string())
            ),
            Self::ShipmentUpdate => format!(
                "Shipment status updated: {}",
                field("status").unwrap_or_else(|| "IN_TRANSIT".to_string())
            ),
            Self::EtaPrediction => format!(
                "AI predicted ETA: {}",
                field("eta").unwrap_or_else(|| "pending".to_string())
            ),
            Self::AnomalyDetected => format!(
                "Anomaly detected in {}",
                field("location").unwrap_or_else(|| "unknown location".to_string())
            ),
            Self::StatusChange => format!(
                "Product status changed to {}",
                field("newStatus").unwrap_or_else(|| "DELIVERED".to_string())
            ),
            Self::AiAnalysis => match field("confidence") {
                Some(confidence) => {
                    format!("AI analysis completed with {confidence}% confidence")
                }
                None => "AI analysis completed".to_string(),
            },
            Self::QualityCheck => format!(
                "Quality check {} for batch {}",
                field("result").unwrap_or_else(|| "PASSED".to_string()),
                field("batchId").unwrap_or_else(|| "unknown".to_string())
            ),
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_uppercase();
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == wanted)
            .ok_or_else(|| ConfigError::UnknownEventType(s.to_string()))
    }
}

fn payload_text(payload: &Payload, key: &str) -> Option<String> {
    match payload.get(key)? {
        Value::Null => None,
        Value::String(text) => Some(text.clone()),
        other => Some(other.to_string()),
    }
}

/// An immutable, broker-stamped event.
///
/// Shared as `Arc<Event>`; once published it is never mutated, only evicted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    /// Unique, monotonically increasing identifier.
    pub id: EventId,
    /// Creation instant.
    pub timestamp: DateTime<Utc>,
    /// Topic the event was routed through.
    pub topic: String,
    /// Event category.
    pub event_type: EventType,
    /// Type-specific payload.
    pub payload: Payload,
    /// Producer tag.
    pub source: String,
}

impl Event {
    /// Console message for this event.
    #[must_use]
    pub fn message(&self) -> String {
        self.event_type.describe(&self.payload)
    }
}

/// A request to publish an event.
///
/// The broker assigns `id`, `timestamp` and, when no topic is given, the
/// topic via its configured selection policy.
#[derive(Debug, Clone, PartialEq)]
pub struct PublishRequest {
    /// Event category.
    pub event_type: EventType,
    /// Payload fields.
    pub payload: Payload,
    /// Producer tag; `DEFAULT_SOURCE` when absent.
    pub source: Option<String>,
    /// Explicit topic; must be registered.
    pub topic: Option<String>,
}

impl PublishRequest {
    /// Create a request with an empty payload.
    #[must_use]
    pub fn new(event_type: EventType) -> Self {
        Self {
            event_type,
            payload: Payload::new(),
            source: None,
            topic: None,
        }
    }

    /// Create a request from an arbitrary JSON value.
    ///
    /// # Errors
    ///
    /// `ValidationError::PayloadNotObject` unless the value is an object
    /// (`null` is accepted as an empty payload).
    pub fn from_value(event_type: EventType, payload: Value) -> Result<Self, ValidationError> {
        let payload = match payload {
            Value::Object(map) => map,
            Value::Null => Payload::new(),
            _ => return Err(ValidationError::PayloadNotObject),
        };
        Ok(Self {
            payload,
            ..Self::new(event_type)
        })
    }

    /// Add a single payload field.
    #[must_use]
    pub fn field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.payload.insert(key.into(), value.into());
        self
    }

    /// Replace the whole payload.
    #[must_use]
    pub fn with_payload(mut self, payload: Payload) -> Self {
        self.payload = payload;
        self
    }

    /// Set the producer tag.
    #[must_use]
    pub fn source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Route to an explicit topic.
    #[must_use]
    pub fn topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = Some(topic.into());
        self
    }

    /// Check producer-side constraints before anything is stored.
    pub(crate) fn validate(&self, config: &BusConfig) -> Result<(), ValidationError> {
        if let Some(source) = &self.source {
            if source.trim().is_empty() {
                return Err(ValidationError::EmptySource);
            }
        }
        if self.payload.keys().any(|key| key.trim().is_empty()) {
            return Err(ValidationError::EmptyKey);
        }
        if self.payload.len() > config.max_payload_fields {
            return Err(ValidationError::TooManyFields {
                count: self.payload.len(),
                limit: config.max_payload_fields,
            });
        }
        let size = serde_json::to_vec(&self.payload)
            .map_err(|e| ValidationError::Unserializable(e.to_string()))?
            .len();
        if size > config.max_payload_bytes {
            return Err(ValidationError::PayloadTooLarge {
                size,
                limit: config.max_payload_bytes,
            });
        }
        Ok(())
    }
}

/// Filter for subscriptions and snapshots.
///
/// Empty lists match everything along that dimension.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventFilter {
    /// Topics to include.
    pub topics: Vec<String>,
    /// Event types to include.
    pub event_types: Vec<EventType>,
    /// Producer tags to include.
    pub sources: Vec<String>,
}

impl EventFilter {
    /// A filter that accepts all events.
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    /// A filter for specific event types.
    #[must_use]
    pub fn event_types(event_types: Vec<EventType>) -> Self {
        Self {
            event_types,
            ..Self::default()
        }
    }

    /// A filter for specific topics.
    #[must_use]
    pub fn topics<I, S>(topics: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            topics: topics.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Additionally restrict to the given producer tags.
    #[must_use]
    pub fn with_sources<I, S>(mut self, sources: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.sources = sources.into_iter().map(Into::into).collect();
        self
    }

    /// Check if an event matches this filter.
    #[must_use]
    pub fn matches(&self, event: &Event) -> bool {
        let topic_match = self.topics.is_empty() || self.topics.contains(&event.topic);
        let type_match =
            self.event_types.is_empty() || self.event_types.contains(&event.event_type);
        let source_match = self.sources.is_empty() || self.sources.contains(&event.source);

        topic_match && type_match && source_match
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(event_type: EventType, topic: &str) -> Event {
        Event {
            id: EventId(1),
            timestamp: Utc::now(),
            topic: topic.to_string(),
            event_type,
            payload: Payload::new(),
            source: DEFAULT_SOURCE.to_string(),
        }
    }

    #[test]
    fn test_event_type_wire_names() {
        for kind in EventType::ALL {
            let encoded = serde_json::to_value(kind).unwrap();
            assert_eq!(encoded, json!(kind.as_str()));
            assert_eq!(kind.as_str().parse::<EventType>().unwrap(), kind);
        }
        assert_eq!("qr_scan".parse::<EventType>().unwrap(), EventType::QrScan);
        assert!(matches!(
            "SCAN".parse::<EventType>(),
            Err(ConfigError::UnknownEventType(_))
        ));
    }

    #[test]
    fn test_event_serializes_stable_shape() {
        let mut e = event(EventType::StatusChange, "chaintrack.events.status_updates");
        e.payload.insert("newStatus".into(), json!("Delivered"));
        let value = serde_json::to_value(&e).unwrap();
        let object = value.as_object().unwrap();

        let mut keys: Vec<_> = object.keys().cloned().collect();
        keys.sort();
        assert_eq!(
            keys,
            vec!["eventType", "id", "payload", "source", "timestamp", "topic"]
        );
        assert_eq!(object["eventType"], json!("STATUS_CHANGE"));
        assert_eq!(object["id"], json!(1));

        let back: Event = serde_json::from_value(value).unwrap();
        assert_eq!(back, e);
    }

    #[test]
    fn test_event_id_display() {
        assert_eq!(EventId(42).to_string(), "evt_000042");
    }

    #[test]
    fn test_describe_uses_payload_and_defaults() {
        let mut payload = Payload::new();
        assert_eq!(
            EventType::QualityCheck.describe(&payload),
            "Quality check PASSED for batch unknown"
        );
        assert_eq!(
            EventType::AiAnalysis.describe(&payload),
            "AI analysis completed"
        );

        payload.insert("confidence".into(), json!(93));
        payload.insert("productId".into(), json!("P42"));
        assert_eq!(
            EventType::AiAnalysis.describe(&payload),
            "AI analysis completed with 93% confidence"
        );
        assert_eq!(
            EventType::QrScan.describe(&payload),
            "QR code scanned for Product #P42"
        );
    }

    #[test]
    fn test_from_value_rejects_non_objects() {
        assert_eq!(
            PublishRequest::from_value(EventType::QrScan, json!([1, 2])),
            Err(ValidationError::PayloadNotObject)
        );
        let request = PublishRequest::from_value(EventType::QrScan, Value::Null).unwrap();
        assert!(request.payload.is_empty());
    }

    #[test]
    fn test_validate_limits() {
        let config = BusConfig {
            max_payload_fields: 2,
            max_payload_bytes: 64,
            ..BusConfig::default()
        };

        let ok = PublishRequest::new(EventType::QrScan).field("productId", "P1");
        assert!(ok.validate(&config).is_ok());

        let blank_source = PublishRequest::new(EventType::QrScan).source("  ");
        assert_eq!(
            blank_source.validate(&config),
            Err(ValidationError::EmptySource)
        );

        let blank_key = PublishRequest::new(EventType::QrScan).field("", 1);
        assert_eq!(blank_key.validate(&config), Err(ValidationError::EmptyKey));

        let too_many = PublishRequest::new(EventType::QrScan)
            .field("a", 1)
            .field("b", 2)
            .field("c", 3);
        assert!(matches!(
            too_many.validate(&config),
            Err(ValidationError::TooManyFields { count: 3, limit: 2 })
        ));

        let too_big = PublishRequest::new(EventType::QrScan).field("blob", "x".repeat(100));
        assert!(matches!(
            too_big.validate(&config),
            Err(ValidationError::PayloadTooLarge { limit: 64, .. })
        ));
    }

    #[test]
    fn test_filter_dimensions() {
        let scan = event(EventType::QrScan, "chaintrack.events.qr_scans");
        let status = event(EventType::StatusChange, "chaintrack.events.status_updates");

        assert!(EventFilter::all().matches(&scan));

        let by_type = EventFilter::event_types(vec![EventType::QrScan]);
        assert!(by_type.matches(&scan));
        assert!(!by_type.matches(&status));

        let by_topic = EventFilter::topics(["chaintrack.events.status_updates"]);
        assert!(!by_topic.matches(&scan));
        assert!(by_topic.matches(&status));

        let by_source = EventFilter::all().with_sources(["qr-scanner"]);
        assert!(!by_source.matches(&scan));
    }
}
