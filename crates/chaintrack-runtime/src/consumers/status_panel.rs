//! One-line pipeline status, following the broker's metrics channel.

use chaintrack_bus::{ComponentStatus, Metrics};
use tokio::sync::watch;
use tracing::{debug, info};

/// Render the status line.
#[must_use]
pub fn render(metrics: &Metrics) -> String {
    format!(
        "latency {:.2}ms | {:.2} evt/s | {} topics | producer {} | consumer {} | {} published",
        metrics.latency_ms,
        metrics.events_per_second,
        metrics.topic_count,
        status_label(metrics.producer_status),
        status_label(metrics.consumer_status),
        metrics.total_published,
    )
}

fn status_label(status: ComponentStatus) -> &'static str {
    match status {
        ComponentStatus::Active => "active",
        ComponentStatus::Idle => "idle",
        ComponentStatus::Stopped => "stopped",
    }
}

/// Status panel bound to a metrics channel.
#[derive(Debug)]
pub struct StatusPanel {
    metrics: watch::Receiver<Metrics>,
}

impl StatusPanel {
    /// Follow `metrics`.
    pub fn new(metrics: watch::Receiver<Metrics>) -> Self {
        Self { metrics }
    }

    /// Status line for the latest metrics.
    #[must_use]
    pub fn current(&self) -> String {
        render(&self.metrics.borrow())
    }

    /// Log every metrics change until `shutdown` flips or the channel closes.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(status = %self.current(), "Status panel started");
        loop {
            tokio::select! {
                changed = self.metrics.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let line = render(&self.metrics.borrow_and_update());
                    debug!(target: "chaintrack::status", "{}", line);
                }
                _ = shutdown.changed() => break,
            }
        }
        info!(status = %self.current(), "Status panel stopped");
    }
}
