//! Sample traffic through the ledger, label and flow producers.
//!
//! Each round either registers a product and scans its freshly printed
//! label, or advances the oldest undelivered product and reads back its
//! history. Every fifth round runs the flow walkthrough instead.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::adapters::{LabelPayload, LedgerPublisher, ScanPublisher};
use crate::consumers::FlowAnimator;
use crate::error::RuntimeError;

const SAMPLE_PRODUCTS: [(&str, &str); 4] = [
    ("Organic Coffee Beans", "Kenya"),
    ("Assam Tea", "India"),
    ("Cocoa Pods", "Ghana"),
    ("Manuka Honey", "New Zealand"),
];

const FLOW_EVERY: u64 = 5;

/// What one demo round did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DemoAction {
    /// Registered product `id` and scanned its label.
    Created(u64),
    /// Advanced product `id`.
    Advanced(u64),
    /// Ran the flow walkthrough.
    Flow,
}

/// Drives the producers round by round.
#[derive(Debug)]
pub struct DemoDriver {
    ledger: LedgerPublisher,
    scanner: ScanPublisher,
    flow: Arc<FlowAnimator>,
    round: u64,
}

impl DemoDriver {
    /// Create a driver over the runtime's producers.
    pub fn new(ledger: LedgerPublisher, scanner: ScanPublisher, flow: Arc<FlowAnimator>) -> Self {
        Self {
            ledger,
            scanner,
            flow,
            round: 0,
        }
    }

    /// Run one round.
    ///
    /// # Errors
    ///
    /// Ledger, label or broker errors from the round's calls.
    pub async fn step(&mut self) -> Result<DemoAction, RuntimeError> {
        self.round += 1;
        if self.round % FLOW_EVERY == 0 {
            self.flow.trigger().await?;
            return Ok(DemoAction::Flow);
        }

        let records = self.ledger.list_records().await?;
        let pending = records
            .iter()
            .find_map(|record| record.status.next().map(|next| (record.id, next)));

        match pending {
            Some((id, next)) if self.round % 3 != 1 => {
                self.ledger.update_status(id, next).await?;
                self.ledger.query_history(id).await?;
                Ok(DemoAction::Advanced(id))
            }
            _ => {
                let index = usize::try_from(self.round).unwrap_or_default() % SAMPLE_PRODUCTS.len();
                let (name, origin) = SAMPLE_PRODUCTS[index];
                let record = self.ledger.create_record(name, origin).await?;
                let label = LabelPayload::from_record(&record).encode()?;
                self.scanner.scan(&label)?;
                Ok(DemoAction::Created(record.id))
            }
        }
    }

    /// Run a round every `interval` until `shutdown` flips.
    pub async fn run(mut self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(interval_ms = interval.as_millis() as u64, "Demo traffic started");

        loop {
            tokio::select! {
                _ = ticker.tick() => match self.step().await {
                    Ok(action) => debug!(round = self.round, ?action, "Demo round complete"),
                    Err(e) => warn!(round = self.round, error = %e, "Demo round failed"),
                },
                _ = shutdown.changed() => break,
            }
        }
        info!(rounds = self.round, "Demo traffic stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{InMemoryLedger, RecordStatus};
    use chaintrack_bus::{BusConfig, EventBroker, EventType};

    fn driver(broker: &Arc<EventBroker>) -> DemoDriver {
        let ledger = LedgerPublisher::new(Arc::new(InMemoryLedger::new()), broker.clone());
        let scanner = ScanPublisher::new(broker.clone());
        let flow = Arc::new(FlowAnimator::with_step_delay(
            broker.clone(),
            Duration::from_millis(1),
        ));
        DemoDriver::new(ledger, scanner, flow)
    }

    #[tokio::test(start_paused = true)]
    async fn test_rounds_cycle_through_producers() {
        let broker = Arc::new(EventBroker::new(BusConfig::default()).unwrap());
        let mut demo = driver(&broker);

        let actions = [
            demo.step().await.unwrap(),
            demo.step().await.unwrap(),
            demo.step().await.unwrap(),
            demo.step().await.unwrap(),
            demo.step().await.unwrap(),
        ];
        assert_eq!(
            actions,
            [
                DemoAction::Created(1),
                DemoAction::Advanced(1),
                DemoAction::Advanced(1),
                DemoAction::Created(2),
                DemoAction::Flow,
            ]
        );

        let records = demo.ledger.list_records().await.unwrap();
        assert_eq!(records[0].status, RecordStatus::Delivered);

        let types: Vec<EventType> = broker.snapshot().iter().map(|e| e.event_type).collect();
        assert!(types.contains(&EventType::QrScan));
        assert!(types.contains(&EventType::StatusChange));
        assert_eq!(types[0], EventType::AiAnalysis);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_stops_on_shutdown() {
        let broker = Arc::new(EventBroker::new(BusConfig::default()).unwrap());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(driver(&broker).run(Duration::from_secs(1), shutdown_rx));

        tokio::time::sleep(Duration::from_millis(2_500)).await;
        shutdown_tx.send_replace(true);
        task.await.unwrap();

        assert!(!broker.snapshot().is_empty());
    }
}
