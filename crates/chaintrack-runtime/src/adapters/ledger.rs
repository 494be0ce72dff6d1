//! # Ledger Adapter
//!
//! The dashboard's product ledger behind a port trait, plus a publishing
//! wrapper that announces every successful ledger call on the broker.
//!
//! ```text
//! caller ──► LedgerPublisher ──► LedgerPort (InMemoryLedger)
//!                  │ after success
//!                  └──────────────► EventPublisher::publish
//! ```
//!
//! Events are emitted only after the ledger accepted the call. A rejected
//! publish is logged and never masks the ledger result.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use chaintrack_bus::topics::{PREDICTIONS, SHIPMENTS, STATUS_UPDATES};
use chaintrack_bus::{EventPublisher, EventType, PublishRequest};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

/// Source tag for record creation.
pub const TRACK_FORM_SOURCE: &str = "track-form";
/// Source tag for the post-creation analysis event.
pub const LEDGER_SOURCE: &str = "blockchain";
/// Source tag for list, history and status operations.
pub const PRODUCT_LIST_SOURCE: &str = "product-list";

/// Lifecycle stage of a tracked product.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum RecordStatus {
    /// Registered on the ledger.
    Created,
    /// Shipped, not yet received.
    InTransit,
    /// Received at destination.
    Delivered,
}

impl RecordStatus {
    /// Display label used in payloads and labels.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Created => "Created",
            Self::InTransit => "In Transit",
            Self::Delivered => "Delivered",
        }
    }

    /// The following stage, if any.
    #[must_use]
    pub fn next(&self) -> Option<Self> {
        match self {
            Self::Created => Some(Self::InTransit),
            Self::InTransit => Some(Self::Delivered),
            Self::Delivered => None,
        }
    }
}

impl fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for RecordStatus {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .map(|c| c.to_ascii_lowercase())
            .collect();
        match normalized.as_str() {
            "created" => Ok(Self::Created),
            "intransit" => Ok(Self::InTransit),
            "delivered" => Ok(Self::Delivered),
            _ => Err(LedgerError::UnknownStatus(s.to_string())),
        }
    }
}

/// One status change in a record's history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// Status entered.
    pub status: RecordStatus,
    /// When it was entered.
    pub timestamp: DateTime<Utc>,
}

/// A tracked product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    /// Ledger-assigned id, starting at 1.
    pub id: u64,
    /// Product name.
    pub name: String,
    /// Place of origin.
    pub origin: String,
    /// Current status.
    pub status: RecordStatus,
    /// Status changes, oldest first. Never empty.
    pub history: Vec<HistoryEntry>,
}

/// Ledger errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// No record with this id.
    #[error("Record {0} not found")]
    RecordNotFound(u64),

    /// A required text field was blank.
    #[error("Field '{0}' must not be empty")]
    EmptyField(&'static str),

    /// Status may only move forward.
    #[error("Invalid status transition: {from} -> {to}")]
    InvalidTransition {
        /// Current status.
        from: RecordStatus,
        /// Requested status.
        to: RecordStatus,
    },

    /// A status name could not be parsed.
    #[error("Unknown status '{0}'")]
    UnknownStatus(String),
}

/// Port for the product ledger.
#[async_trait]
pub trait LedgerPort: Send + Sync {
    /// Register a product.
    async fn create_record(&self, name: &str, origin: &str) -> Result<Record, LedgerError>;

    /// Move a product to a later status.
    async fn update_status(&self, id: u64, status: RecordStatus) -> Result<Record, LedgerError>;

    /// Status history of a product, oldest first.
    async fn query_history(&self, id: u64) -> Result<Vec<HistoryEntry>, LedgerError>;

    /// All products, by id.
    async fn list_records(&self) -> Result<Vec<Record>, LedgerError>;
}

// =============================================================================
// In-Memory Ledger
// =============================================================================

#[derive(Debug, Default)]
struct LedgerState {
    records: BTreeMap<u64, Record>,
    next_id: u64,
}

/// Ledger kept in process memory.
#[derive(Debug, Default)]
pub struct InMemoryLedger {
    state: RwLock<LedgerState>,
}

impl InMemoryLedger {
    /// Create an empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.read().records.len()
    }

    /// Whether the ledger holds no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state.read().records.is_empty()
    }
}

#[async_trait]
impl LedgerPort for InMemoryLedger {
    async fn create_record(&self, name: &str, origin: &str) -> Result<Record, LedgerError> {
        let name = name.trim();
        let origin = origin.trim();
        if name.is_empty() {
            return Err(LedgerError::EmptyField("name"));
        }
        if origin.is_empty() {
            return Err(LedgerError::EmptyField("origin"));
        }

        let mut state = self.state.write();
        state.next_id += 1;
        let record = Record {
            id: state.next_id,
            name: name.to_string(),
            origin: origin.to_string(),
            status: RecordStatus::Created,
            history: vec![HistoryEntry {
                status: RecordStatus::Created,
                timestamp: Utc::now(),
            }],
        };
        state.records.insert(record.id, record.clone());
        Ok(record)
    }

    async fn update_status(&self, id: u64, status: RecordStatus) -> Result<Record, LedgerError> {
        let mut state = self.state.write();
        let record = state
            .records
            .get_mut(&id)
            .ok_or(LedgerError::RecordNotFound(id))?;
        if status <= record.status {
            return Err(LedgerError::InvalidTransition {
                from: record.status,
                to: status,
            });
        }
        record.status = status;
        record.history.push(HistoryEntry {
            status,
            timestamp: Utc::now(),
        });
        Ok(record.clone())
    }

    async fn query_history(&self, id: u64) -> Result<Vec<HistoryEntry>, LedgerError> {
        self.state
            .read()
            .records
            .get(&id)
            .map(|record| record.history.clone())
            .ok_or(LedgerError::RecordNotFound(id))
    }

    async fn list_records(&self) -> Result<Vec<Record>, LedgerError> {
        Ok(self.state.read().records.values().cloned().collect())
    }
}

// =============================================================================
// Publishing Adapter
// =============================================================================

/// Ledger wrapper that publishes an event after every successful call.
#[derive(Clone)]
pub struct LedgerPublisher {
    ledger: Arc<dyn LedgerPort>,
    publisher: Arc<dyn EventPublisher>,
}

impl LedgerPublisher {
    /// Wrap a ledger port.
    pub fn new(ledger: Arc<dyn LedgerPort>, publisher: Arc<dyn EventPublisher>) -> Self {
        Self { ledger, publisher }
    }

    /// Register a product and announce it.
    ///
    /// Publishes `SHIPMENT_UPDATE` (action `CREATE`) on the shipments topic,
    /// then `AI_ANALYSIS` (action `CREATED`) on the predictions topic.
    ///
    /// # Errors
    ///
    /// Ledger errors only.
    pub async fn create_record(&self, name: &str, origin: &str) -> Result<Record, LedgerError> {
        let record = self.ledger.create_record(name, origin).await?;

        self.announce(
            PublishRequest::new(EventType::ShipmentUpdate)
                .field("productId", record.id)
                .field("productName", record.name.as_str())
                .field("origin", record.origin.as_str())
                .field("status", record.status.label())
                .field("action", "CREATE")
                .source(TRACK_FORM_SOURCE)
                .topic(SHIPMENTS),
        );
        self.announce(
            PublishRequest::new(EventType::AiAnalysis)
                .field("productId", record.id)
                .field("productName", record.name.as_str())
                .field("action", "CREATED")
                .source(LEDGER_SOURCE)
                .topic(PREDICTIONS),
        );
        Ok(record)
    }

    /// Advance a product's status and announce the change as
    /// `STATUS_CHANGE` on the status topic.
    ///
    /// # Errors
    ///
    /// Ledger errors only.
    pub async fn update_status(&self, id: u64, status: RecordStatus) -> Result<Record, LedgerError> {
        let record = self.ledger.update_status(id, status).await?;

        self.announce(
            PublishRequest::new(EventType::StatusChange)
                .field("productId", record.id)
                .field("newStatus", record.status.label())
                .source(PRODUCT_LIST_SOURCE)
                .topic(STATUS_UPDATES),
        );
        Ok(record)
    }

    /// Read a product's history and announce the lookup.
    ///
    /// # Errors
    ///
    /// Ledger errors only.
    pub async fn query_history(&self, id: u64) -> Result<Vec<HistoryEntry>, LedgerError> {
        let history = self.ledger.query_history(id).await?;

        let mut request = PublishRequest::new(EventType::ShipmentUpdate)
            .field("productId", id)
            .field("historyLength", history.len())
            .source(PRODUCT_LIST_SOURCE)
            .topic(SHIPMENTS);
        if let Some(latest) = history.last() {
            request = request.field("status", latest.status.label());
        }
        self.announce(request);
        Ok(history)
    }

    /// List all products and announce the count.
    ///
    /// # Errors
    ///
    /// Ledger errors only.
    pub async fn list_records(&self) -> Result<Vec<Record>, LedgerError> {
        let records = self.ledger.list_records().await?;

        self.announce(
            PublishRequest::new(EventType::ShipmentUpdate)
                .field("productsCount", records.len())
                .source(PRODUCT_LIST_SOURCE)
                .topic(SHIPMENTS),
        );
        Ok(records)
    }

    fn announce(&self, request: PublishRequest) {
        let event_type = request.event_type;
        match self.publisher.publish(request) {
            Ok(event) => debug!(event_id = %event.id, %event_type, "Ledger event published"),
            Err(e) => warn!(%event_type, error = %e, "Failed to publish ledger event"),
        }
    }
}

impl fmt::Debug for LedgerPublisher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LedgerPublisher")
            .field("events_published", &self.publisher.events_published())
            .finish_non_exhaustive()
    }
}
