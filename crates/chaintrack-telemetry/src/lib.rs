//! # ChainTrack Telemetry
//!
//! Observability for the ChainTrack event core.
//!
//! ## Components
//!
//! - **Logs**: `tracing` with an `EnvFilter` and a pretty or JSON formatter
//! - **Metrics**: Prometheus counters and gauges in a process-wide registry
//!
//! ## Usage
//!
//! ```rust,ignore
//! use chaintrack_telemetry::{init_telemetry, TelemetryConfig};
//!
//! fn main() {
//!     let config = TelemetryConfig::from_env();
//!     let _guard = init_telemetry(&config).expect("Failed to init telemetry");
//!
//!     // Broker logs and metrics are now being collected
//! }
//! ```
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `CT_SERVICE_NAME` | `chaintrack` | Service name in log lines |
//! | `CT_LOG_LEVEL` / `RUST_LOG` | `info` | Log filter |
//! | `CT_CONSOLE_OUTPUT` | `true` | Write logs to stdout |
//! | `CT_JSON_LOGS` | `false` | JSON log lines |

#![cfg_attr(test, allow(clippy::unwrap_used))]

mod config;
mod logging;
pub mod metrics;

pub use config::TelemetryConfig;
pub use logging::{build_filter, init_logging};
pub use metrics::{
    observe_broker, record_dropped, record_published, record_subscriber_failures, register_metrics,
    render_metrics, BrokerGauges,
};

use thiserror::Error;

/// Telemetry initialization errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TelemetryError {
    #[error("Failed to initialize logging: {0}")]
    LoggingInit(String),

    #[error("Failed to initialize Prometheus metrics: {0}")]
    MetricsInit(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

/// Initialize logging and register metrics.
///
/// Returns a guard that should be held for the lifetime of the application.
///
/// # Errors
///
/// Fails if the log filter is invalid, a global subscriber already exists,
/// or metric registration fails.
pub fn init_telemetry(config: &TelemetryConfig) -> Result<TelemetryGuard, TelemetryError> {
    // Metrics first (no logging dependency)
    register_metrics()?;
    init_logging(config)?;

    Ok(TelemetryGuard {
        service_name: config.service_name.clone(),
    })
}

/// Guard that keeps telemetry active. Logs a final line on drop.
#[derive(Debug)]
pub struct TelemetryGuard {
    service_name: String,
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        tracing::info!(service = %self.service_name, "Shutting down telemetry...");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = TelemetryConfig::default();
        assert_eq!(config.service_name, "chaintrack");
    }

    #[test]
    fn test_error_display() {
        let err = TelemetryError::Config("bad filter".to_string());
        assert_eq!(err.to_string(), "Invalid configuration: bad filter");
    }
}
