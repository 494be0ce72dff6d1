//! # ChainTrack Dashboard Runtime
//!
//! Wires the event broker to the dashboard's producers and consumers.
//!
//! ## Modular Structure
//!
//! - `config` - Runtime configuration from `CT_*` environment variables
//! - `adapters/` - Producers: publishing ledger adapter, label codec and scanner
//! - `consumers/` - Observers: console, toasts, status panel, flow walkthrough
//! - `wiring/` - Runtime lifecycle, metrics bridge, demo traffic
//!
//! ## Startup Sequence
//!
//! 1. Load configuration (from env)
//! 2. Initialize telemetry
//! 3. Build the broker with the configured topic policy
//! 4. Attach consumers, start the metrics bridge and the generator
//! 5. Optionally drive demo traffic
//! 6. Run until Ctrl-C or the configured duration elapses

// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod adapters;
pub mod config;
pub mod consumers;
pub mod error;
pub mod wiring;

pub use config::{RuntimeConfig, RuntimeConfigError};
pub use error::RuntimeError;
pub use wiring::DashboardRuntime;
