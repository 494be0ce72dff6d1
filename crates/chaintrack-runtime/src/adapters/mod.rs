//! # Producer Adapters
//!
//! Concrete producers that turn dashboard actions into broker events.
//!
//! ```text
//! ┌──────────────────┐     ┌──────────────────┐
//! │ LedgerPublisher  │     │  ScanPublisher   │
//! │ (LedgerPort)     │     │  (label codec)   │
//! └────────┬─────────┘     └────────┬─────────┘
//!          │   Arc<dyn EventPublisher>
//!          └────────────┬───────────┘
//!                       ▼
//!                  EventBroker
//! ```

pub mod label;
pub mod ledger;

pub use label::{decode_scan, DecodedScan, LabelError, LabelPayload, ScanOutcome, ScanPublisher};
pub use ledger::{
    HistoryEntry, InMemoryLedger, LedgerError, LedgerPort, LedgerPublisher, Record, RecordStatus,
};
