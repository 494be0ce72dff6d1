//! Feeds broker statistics into the Prometheus registry.
//!
//! Everything comes from the broker's metrics channel, so the bridge holds no
//! subscription of its own. The broker reports cumulative totals; counters
//! advance by the difference since the last observation.

use std::collections::BTreeMap;
use std::sync::Arc;

use chaintrack_bus::{BrokerError, EventBroker, EventType, Metrics};
use chaintrack_telemetry::{
    observe_broker, record_dropped, record_published, record_subscriber_failures, BrokerGauges,
};
use tokio::sync::watch;
use tracing::{debug, info};

/// Counter increments recorded by one [`MetricsBridge::apply`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Recorded {
    /// Newly accepted events, all types.
    pub published: u64,
    /// New callback failures.
    pub failures: u64,
    /// New dropped deliveries.
    pub dropped: u64,
}

/// Last cumulative totals pushed to the counters.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MetricsBridge {
    published: BTreeMap<EventType, u64>,
    failures: u64,
    dropped: u64,
}

impl MetricsBridge {
    /// Push one metrics snapshot.
    pub fn apply(&mut self, metrics: &Metrics) -> Recorded {
        let mut recorded = Recorded::default();

        for (event_type, total) in &metrics.published_by_type {
            let seen = self.published.entry(*event_type).or_default();
            let delta = total.saturating_sub(*seen);
            if delta > 0 {
                record_published(event_type.as_str(), delta);
                recorded.published += delta;
                *seen = *total;
            }
        }

        recorded.failures = metrics.dispatch_failures.saturating_sub(self.failures);
        recorded.dropped = metrics.dropped_deliveries.saturating_sub(self.dropped);
        if recorded.failures > 0 {
            record_subscriber_failures(recorded.failures);
        }
        if recorded.dropped > 0 {
            record_dropped(recorded.dropped);
        }
        self.failures = self.failures.max(metrics.dispatch_failures);
        self.dropped = self.dropped.max(metrics.dropped_deliveries);

        observe_broker(BrokerGauges {
            events_per_second: metrics.events_per_second,
            latency_ms: metrics.latency_ms,
            subscriptions: metrics.subscriber_count,
            log_length: metrics.log_length,
        });
        recorded
    }
}

/// Run until `shutdown` flips or the broker closes.
///
/// # Errors
///
/// `BrokerError::Closed` if the broker is already shut down.
pub async fn run_metrics_bridge(
    broker: Arc<EventBroker>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), BrokerError> {
    if broker.is_closed() {
        return Err(BrokerError::Closed);
    }
    let mut metrics = broker.watch_metrics();
    let mut bridge = MetricsBridge::default();

    let initial = metrics.borrow_and_update().clone();
    bridge.apply(&initial);
    info!("Metrics bridge started");

    loop {
        tokio::select! {
            changed = metrics.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = metrics.borrow_and_update().clone();
                bridge.apply(&snapshot);
                if broker.is_closed() {
                    break;
                }
            }
            _ = shutdown.changed() => break,
        }
    }

    bridge.apply(&broker.metrics());
    debug!(?bridge, "Metrics bridge stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chaintrack_bus::{BusConfig, ComponentStatus, EventFilter, Payload};

    #[test]
    fn test_apply_records_deltas_only() {
        chaintrack_telemetry::register_metrics().unwrap();
        let mut bridge = MetricsBridge::default();
        let mut metrics = Metrics::initial(5);

        metrics.dispatch_failures = 2;
        metrics.dropped_deliveries = 1;
        metrics.published_by_type.insert(EventType::QrScan, 3);
        assert_eq!(
            bridge.apply(&metrics),
            Recorded {
                published: 3,
                failures: 2,
                dropped: 1
            }
        );
        assert_eq!(bridge.apply(&metrics), Recorded::default());

        metrics.dispatch_failures = 5;
        metrics.published_by_type.insert(EventType::QrScan, 4);
        metrics.published_by_type.insert(EventType::AiAnalysis, 2);
        assert_eq!(
            bridge.apply(&metrics),
            Recorded {
                published: 3,
                failures: 3,
                dropped: 0
            }
        );
    }

    #[tokio::test]
    async fn test_publish_counts_survive_a_slow_subscriber() {
        chaintrack_telemetry::register_metrics().unwrap();
        let config = BusConfig {
            subscriber_queue_capacity: 1,
            ..BusConfig::default()
        };
        let broker = EventBroker::new(config).unwrap();
        let _stalled = broker.subscribe_stream(EventFilter::all()).unwrap();

        for _ in 0..10 {
            broker
                .publish_event(EventType::ShipmentUpdate, Payload::new())
                .unwrap();
        }

        let mut bridge = MetricsBridge::default();
        let recorded = bridge.apply(&broker.metrics());
        assert_eq!(recorded.published, 10);
        assert_eq!(recorded.dropped, 9);
    }

    #[tokio::test]
    async fn test_bridge_holds_no_subscription() {
        let broker = Arc::new(EventBroker::new(BusConfig::default()).unwrap());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(run_metrics_bridge(Arc::clone(&broker), shutdown_rx));
        tokio::task::yield_now().await;

        assert_eq!(broker.subscriber_count(), 0);
        assert_eq!(broker.metrics().consumer_status, ComponentStatus::Idle);

        shutdown_tx.send_replace(true);
        tokio::time::timeout(std::time::Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_bridge_stops_when_broker_closes() {
        let broker = Arc::new(EventBroker::new(BusConfig::default()).unwrap());
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(run_metrics_bridge(Arc::clone(&broker), shutdown_rx));
        tokio::task::yield_now().await;

        broker.shutdown();
        tokio::time::timeout(std::time::Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_bridge_rejects_closed_broker() {
        let broker = Arc::new(EventBroker::new(BusConfig::default()).unwrap());
        broker.shutdown();
        let (_tx, rx) = watch::channel(false);
        assert_eq!(
            run_metrics_bridge(broker, rx).await.unwrap_err(),
            BrokerError::Closed
        );
    }
}
