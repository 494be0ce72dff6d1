//! Runtime error type.

use chaintrack_bus::{BrokerError, ConfigError, GeneratorError};
use thiserror::Error;

use crate::adapters::{LabelError, LedgerError};
use crate::config::RuntimeConfigError;

/// Errors raised while building or driving the dashboard runtime.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RuntimeError {
    /// Configuration could not be loaded.
    #[error("Configuration error: {0}")]
    Config(#[from] RuntimeConfigError),

    /// The broker rejected its configuration.
    #[error("Bus configuration error: {0}")]
    Bus(#[from] ConfigError),

    /// A broker operation failed.
    #[error("Broker error: {0}")]
    Broker(#[from] BrokerError),

    /// The synthetic generator could not start.
    #[error("Generator error: {0}")]
    Generator(#[from] GeneratorError),

    /// A ledger call failed.
    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    /// A label could not be encoded or published.
    #[error("Label error: {0}")]
    Label(#[from] LabelError),

    /// `start` was called twice.
    #[error("Runtime already started")]
    AlreadyStarted,
}
