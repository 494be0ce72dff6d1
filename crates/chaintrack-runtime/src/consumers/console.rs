//! Scrolling event console.
//!
//! Subscribes to everything and renders lines from log snapshots, narrowed
//! by a label filter the operator can change at any time.

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chaintrack_bus::{BrokerError, Event, EventBroker, EventFilter, EventType, Metrics, SubscriptionHandle};
use parking_lot::{Mutex, RwLock};
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info};

/// Unknown console filter label.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("Unknown console filter '{0}'")]
pub struct UnknownFilter(pub String);

/// Console filter labels.
///
/// Each label matches event types whose lowercase name contains it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsoleFilter {
    /// Everything.
    #[default]
    All,
    /// Label scans.
    Qr,
    /// Shipment updates.
    Shipment,
    /// Arrival estimates.
    Prediction,
    /// Anomaly alerts.
    Anomaly,
    /// Analysis results.
    Ai,
}

impl ConsoleFilter {
    /// Every label, in menu order.
    pub const ALL: [ConsoleFilter; 6] = [
        Self::All,
        Self::Qr,
        Self::Shipment,
        Self::Prediction,
        Self::Anomaly,
        Self::Ai,
    ];

    /// Menu label.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::All => "all",
            Self::Qr => "qr",
            Self::Shipment => "shipment",
            Self::Prediction => "prediction",
            Self::Anomaly => "anomaly",
            Self::Ai => "ai",
        }
    }

    /// Whether an event type passes this filter.
    #[must_use]
    pub fn matches(&self, event_type: EventType) -> bool {
        match self {
            Self::All => true,
            label => event_type
                .as_str()
                .to_ascii_lowercase()
                .contains(label.as_str()),
        }
    }
}

impl fmt::Display for ConsoleFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConsoleFilter {
    type Err = UnknownFilter;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let label = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|filter| filter.as_str() == label)
            .ok_or_else(|| UnknownFilter(s.to_string()))
    }
}

/// Render one console line: `[HH:MM:SS] TYPE topic: message`.
#[must_use]
pub fn render_line(event: &Event) -> String {
    format!(
        "[{}] {} {}: {}",
        event.timestamp.format("%H:%M:%S"),
        event.event_type,
        event.topic,
        event.message()
    )
}

/// Console footer: retained count, rate and producer state.
#[must_use]
pub fn render_footer(metrics: &Metrics) -> String {
    format!(
        "{} events | {:.1} evt/s | producer {:?}",
        metrics.log_length, metrics.events_per_second, metrics.producer_status
    )
}

/// The event console.
#[derive(Debug)]
pub struct EventConsole {
    broker: Arc<EventBroker>,
    filter: RwLock<ConsoleFilter>,
    handle: Mutex<Option<SubscriptionHandle>>,
    received: Arc<AtomicU64>,
}

impl EventConsole {
    /// Create a detached console.
    pub fn new(broker: Arc<EventBroker>, filter: ConsoleFilter) -> Self {
        Self {
            broker,
            filter: RwLock::new(filter),
            handle: Mutex::new(None),
            received: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Subscribe to all events. No-op when already attached.
    ///
    /// # Errors
    ///
    /// Broker subscription errors.
    pub fn attach(&self) -> Result<(), BrokerError> {
        let mut handle = self.handle.lock();
        if handle.is_some() {
            return Ok(());
        }
        let received = Arc::clone(&self.received);
        let subscription = self.broker.subscribe(EventFilter::all(), move |event| {
            received.fetch_add(1, Ordering::Relaxed);
            debug!(target: "chaintrack::console", "{}", render_line(event));
            Ok(())
        })?;
        info!(subscription = %subscription.id(), "Event console attached");
        *handle = Some(subscription);
        Ok(())
    }

    /// Unsubscribe. Returns whether the console was attached.
    pub fn detach(&self) -> bool {
        match self.handle.lock().take() {
            Some(handle) => self.broker.unsubscribe(&handle),
            None => false,
        }
    }

    /// Whether the console currently holds a subscription.
    #[must_use]
    pub fn is_attached(&self) -> bool {
        self.handle.lock().is_some()
    }

    /// Change the label filter.
    pub fn set_filter(&self, filter: ConsoleFilter) {
        *self.filter.write() = filter;
    }

    /// Current label filter.
    #[must_use]
    pub fn filter(&self) -> ConsoleFilter {
        *self.filter.read()
    }

    /// Events delivered to this console since construction.
    #[must_use]
    pub fn received(&self) -> u64 {
        self.received.load(Ordering::Relaxed)
    }

    /// Up to `limit` rendered lines, newest first, passing the filter.
    #[must_use]
    pub fn lines(&self, limit: usize) -> Vec<String> {
        let filter = self.filter();
        self.broker
            .snapshot_filtered(|event| filter.matches(event.event_type))
            .iter()
            .take(limit)
            .map(|event| render_line(event))
            .collect()
    }

    /// Footer for the current broker metrics.
    #[must_use]
    pub fn footer(&self) -> String {
        render_footer(&self.broker.metrics())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chaintrack_bus::{BusConfig, Payload};

    #[test]
    fn test_filter_labels_match_by_substring() {
        assert!(ConsoleFilter::Qr.matches(EventType::QrScan));
        assert!(ConsoleFilter::Shipment.matches(EventType::ShipmentUpdate));
        assert!(ConsoleFilter::Prediction.matches(EventType::EtaPrediction));
        assert!(ConsoleFilter::Anomaly.matches(EventType::AnomalyDetected));
        assert!(ConsoleFilter::Ai.matches(EventType::AiAnalysis));
        assert!(!ConsoleFilter::Qr.matches(EventType::StatusChange));
        assert!(EventType::ALL.iter().all(|t| ConsoleFilter::All.matches(*t)));
    }

    #[test]
    fn test_filter_parsing() {
        assert_eq!("QR".parse::<ConsoleFilter>().unwrap(), ConsoleFilter::Qr);
        assert_eq!(" anomaly ".parse::<ConsoleFilter>().unwrap(), ConsoleFilter::Anomaly);
        assert_eq!(
            "scan".parse::<ConsoleFilter>().unwrap_err(),
            UnknownFilter("scan".to_string())
        );
    }

    #[test]
    fn test_lines_follow_filter() {
        let broker = Arc::new(EventBroker::new(BusConfig::default()).unwrap());
        let console = EventConsole::new(Arc::clone(&broker), ConsoleFilter::All);
        for event_type in [EventType::QrScan, EventType::AnomalyDetected, EventType::QrScan] {
            broker.publish_event(event_type, Payload::new()).unwrap();
        }

        assert_eq!(console.lines(10).len(), 3);
        assert_eq!(console.lines(2).len(), 2);

        console.set_filter(ConsoleFilter::Anomaly);
        let lines = console.lines(10);
        assert_eq!(lines.len(), 1);
        assert!(lines[0].contains("ANOMALY_DETECTED"));
        assert!(lines[0].ends_with("Anomaly detected in unknown location"));
        assert!(console.footer().starts_with("3 events"));
    }

    #[tokio::test]
    async fn test_attach_and_detach() {
        let broker = Arc::new(EventBroker::new(BusConfig::default()).unwrap());
        let console = EventConsole::new(Arc::clone(&broker), ConsoleFilter::All);

        console.attach().unwrap();
        console.attach().unwrap();
        assert_eq!(broker.subscriber_count(), 1);
        assert!(console.is_attached());

        assert!(console.detach());
        assert!(!console.detach());
        assert_eq!(broker.subscriber_count(), 0);
    }
}
