//! # Label Codec
//!
//! Product labels carry a JSON snapshot of the ledger record. Scanners in
//! the field also produce two older shapes, so decoding accepts:
//!
//! - the full payload `{id, name, origin, status, history}`
//! - the short form `{productId, productName, location}`
//! - the delimited form `product-<id>|<name>|<location>`

use std::fmt;
use std::sync::Arc;

use chaintrack_bus::topics::QR_SCANS;
use chaintrack_bus::{BrokerError, Event, EventPublisher, EventType, PublishRequest};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use super::ledger::{HistoryEntry, Record, RecordStatus};

/// Source tag for scan events.
pub const SCANNER_SOURCE: &str = "qr-scanner";

const DELIMITED_PREFIX: &str = "product-";

/// Label errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LabelError {
    /// Nothing was scanned.
    #[error("Scan data is empty")]
    Empty,

    /// The text looked like JSON but matched no label shape.
    #[error("Malformed label JSON: {0}")]
    Malformed(String),

    /// The text matched no known label format.
    #[error("Unrecognized label format")]
    Unrecognized,

    /// Encoding a label failed.
    #[error("Failed to encode label: {0}")]
    Encode(String),

    /// The scan event could not be published.
    #[error("Failed to publish scan: {0}")]
    Publish(#[from] BrokerError),
}

/// Full label payload, a snapshot of one ledger record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LabelPayload {
    /// Ledger id.
    pub id: u64,
    /// Product name.
    pub name: String,
    /// Place of origin.
    pub origin: String,
    /// Status at print time.
    pub status: RecordStatus,
    /// History at print time.
    pub history: Vec<HistoryEntry>,
}

impl LabelPayload {
    /// Snapshot a record.
    #[must_use]
    pub fn from_record(record: &Record) -> Self {
        Self {
            id: record.id,
            name: record.name.clone(),
            origin: record.origin.clone(),
            status: record.status,
            history: record.history.clone(),
        }
    }

    /// Encode as label text.
    ///
    /// # Errors
    ///
    /// `LabelError::Encode` if serialization fails.
    pub fn encode(&self) -> Result<String, LabelError> {
        serde_json::to_string(self).map_err(|e| LabelError::Encode(e.to_string()))
    }

    /// Decode the full JSON payload.
    ///
    /// # Errors
    ///
    /// `LabelError::Malformed` for anything else.
    pub fn decode(text: &str) -> Result<Self, LabelError> {
        serde_json::from_str(text).map_err(|e| LabelError::Malformed(e.to_string()))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ShortLabel {
    product_id: serde_json::Value,
    product_name: Option<String>,
    location: Option<String>,
}

/// Fields recovered from a scan, whatever its format.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DecodedScan {
    /// Product identifier as printed on the label.
    pub product_id: String,
    /// Product name, when the label carries one.
    pub product_name: Option<String>,
    /// Origin or current location, when present.
    pub location: Option<String>,
    /// Status, full payload only.
    pub status: Option<RecordStatus>,
}

/// Decode label text in any supported format.
///
/// # Errors
///
/// `Empty` for blank input, `Malformed` for JSON matching no label shape,
/// `Unrecognized` otherwise.
pub fn decode_scan(text: &str) -> Result<DecodedScan, LabelError> {
    let text = text.trim();
    if text.is_empty() {
        return Err(LabelError::Empty);
    }

    if text.starts_with('{') {
        if let Ok(label) = LabelPayload::decode(text) {
            return Ok(DecodedScan {
                product_id: label.id.to_string(),
                product_name: Some(label.name),
                location: Some(label.origin),
                status: Some(label.status),
            });
        }
        let short: ShortLabel =
            serde_json::from_str(text).map_err(|e| LabelError::Malformed(e.to_string()))?;
        let product_id = match short.product_id {
            serde_json::Value::String(id) => id,
            serde_json::Value::Number(id) => id.to_string(),
            other => return Err(LabelError::Malformed(format!("productId {other}"))),
        };
        return Ok(DecodedScan {
            product_id,
            product_name: short.product_name,
            location: short.location,
            status: None,
        });
    }

    if let Some(rest) = text.strip_prefix(DELIMITED_PREFIX) {
        let mut parts = rest.split('|').map(str::trim);
        let product_id = parts.next().unwrap_or_default();
        if product_id.is_empty() {
            return Err(LabelError::Unrecognized);
        }
        let mut next = || parts.next().filter(|p| !p.is_empty()).map(str::to_string);
        let product_name = next();
        let location = next();
        return Ok(DecodedScan {
            product_id: product_id.to_string(),
            product_name,
            location,
            status: None,
        });
    }

    Err(LabelError::Unrecognized)
}

/// Outcome of a scan.
#[derive(Debug, Clone)]
pub struct ScanOutcome {
    /// The published `QR_SCAN` event.
    pub event: Arc<Event>,
    /// Decoded fields, when the label format was recognized.
    pub decoded: Option<DecodedScan>,
}

/// Publishes label scans.
#[derive(Clone)]
pub struct ScanPublisher {
    publisher: Arc<dyn EventPublisher>,
}

impl ScanPublisher {
    /// Create a scanner publishing through `publisher`.
    pub fn new(publisher: Arc<dyn EventPublisher>) -> Self {
        Self { publisher }
    }

    /// Publish a `QR_SCAN` for raw label text.
    ///
    /// The raw text always travels as `qrData`. Decoded fields are added when
    /// the format is recognized; unreadable labels are still announced.
    ///
    /// # Errors
    ///
    /// `Empty` for blank input, `Publish` if the broker rejects the event.
    pub fn scan(&self, text: &str) -> Result<ScanOutcome, LabelError> {
        let decoded = match decode_scan(text) {
            Ok(decoded) => Some(decoded),
            Err(LabelError::Empty) => return Err(LabelError::Empty),
            Err(e) => {
                debug!(error = %e, "Scanned label not decodable, publishing raw data");
                None
            }
        };

        let mut request = PublishRequest::new(EventType::QrScan)
            .field("qrData", text.trim())
            .source(SCANNER_SOURCE)
            .topic(QR_SCANS);
        if let Some(scan) = &decoded {
            request = request.field("productId", scan.product_id.as_str());
            if let Some(name) = &scan.product_name {
                request = request.field("productName", name.as_str());
            }
            if let Some(location) = &scan.location {
                request = request.field("location", location.as_str());
            }
            if let Some(status) = scan.status {
                request = request.field("status", status.label());
            }
        }

        let event = self.publisher.publish(request)?;
        info!(event_id = %event.id, decoded = decoded.is_some(), "Label scan published");
        Ok(ScanOutcome { event, decoded })
    }
}

impl fmt::Debug for ScanPublisher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScanPublisher").finish_non_exhaustive()
    }
}
