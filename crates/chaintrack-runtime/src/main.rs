//! # ChainTrack Dashboard
//!
//! Entry point: load configuration, initialize telemetry, run the dashboard
//! runtime until Ctrl-C (or `CT_RUN_FOR_SECS`), then shut down in order.

use std::time::Duration;

use anyhow::{Context, Result};
use chaintrack_runtime::{DashboardRuntime, RuntimeConfig};
use tracing::{debug, info};

#[tokio::main]
async fn main() -> Result<()> {
    let config = RuntimeConfig::from_env().context("Failed to load configuration")?;
    let _telemetry = chaintrack_telemetry::init_telemetry(&config.telemetry)
        .context("Failed to initialize telemetry")?;

    let runtime = DashboardRuntime::new(config.clone()).context("Failed to build runtime")?;
    runtime.start().await.context("Failed to start runtime")?;

    match config.run_for_secs {
        Some(secs) => {
            info!(secs, "Running for a fixed duration. Press Ctrl+C to stop early.");
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs(secs)) => {
                    info!("Run duration elapsed");
                }
                signal = tokio::signal::ctrl_c() => {
                    signal.context("Failed to listen for Ctrl+C")?;
                    info!("Received Ctrl+C");
                }
            }
        }
        None => {
            info!("Dashboard running. Press Ctrl+C to stop.");
            tokio::signal::ctrl_c()
                .await
                .context("Failed to listen for Ctrl+C")?;
            info!("Received Ctrl+C");
        }
    }

    runtime.shutdown().await;

    for line in runtime.console().lines(5) {
        info!(target: "chaintrack::console", "{}", line);
    }
    let exposition =
        chaintrack_telemetry::render_metrics().context("Failed to render metrics")?;
    debug!("Final metrics:\n{}", exposition);

    Ok(())
}
