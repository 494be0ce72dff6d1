//! Prometheus metrics for the ChainTrack event core.
//!
//! All metrics follow the naming convention: `ct_<component>_<metric>_<unit>`
//!
//! ## Metric Types
//!
//! - **Counter**: Monotonically increasing value (e.g., events_published_total)
//! - **Gauge**: Value that can go up or down (e.g., events_per_second)

use lazy_static::lazy_static;
use prometheus::{Encoder, Gauge, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

use crate::TelemetryError;

lazy_static! {
    /// Global metrics registry
    pub static ref REGISTRY: Registry = Registry::new();

    // =========================================================================
    // BROKER METRICS
    // =========================================================================

    /// Events accepted by the broker, by event type
    pub static ref EVENTS_PUBLISHED: IntCounterVec = IntCounterVec::new(
        Opts::new("ct_bus_events_published_total", "Events accepted by the broker"),
        &["event_type"]
    ).expect("metric creation failed");

    /// Subscriber callbacks that failed or panicked
    pub static ref SUBSCRIBER_FAILURES: IntCounter = IntCounter::new(
        "ct_bus_subscriber_failures_total",
        "Subscriber callbacks that returned an error or panicked"
    ).expect("metric creation failed");

    /// Deliveries dropped on full subscriber queues
    pub static ref DELIVERIES_DROPPED: IntCounter = IntCounter::new(
        "ct_bus_deliveries_dropped_total",
        "Deliveries dropped because a subscriber queue was full"
    ).expect("metric creation failed");

    /// Trailing-window publish rate
    pub static ref EVENTS_PER_SECOND: Gauge = Gauge::new(
        "ct_bus_events_per_second",
        "Events published per second over the trailing window"
    ).expect("metric creation failed");

    /// Publish-to-fan-out time of the latest event
    pub static ref PUBLISH_LATENCY_MS: Gauge = Gauge::new(
        "ct_bus_publish_latency_ms",
        "Publish-to-fan-out time of the most recent event in milliseconds"
    ).expect("metric creation failed");

    /// Active subscriptions
    pub static ref SUBSCRIPTIONS_ACTIVE: IntGauge = IntGauge::new(
        "ct_bus_subscriptions_active",
        "Number of active subscriptions"
    ).expect("metric creation failed");

    /// Events currently retained in the log
    pub static ref LOG_LENGTH: IntGauge = IntGauge::new(
        "ct_bus_log_length",
        "Events currently retained in the bounded log"
    ).expect("metric creation failed");
}

/// Point-in-time broker gauges.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BrokerGauges {
    /// Trailing-window publish rate.
    pub events_per_second: f64,
    /// Latest publish latency in milliseconds.
    pub latency_ms: f64,
    /// Active subscriptions.
    pub subscriptions: usize,
    /// Retained events.
    pub log_length: usize,
}

/// Register all metrics with the global registry.
///
/// Safe to call more than once; already-registered collectors are skipped.
///
/// # Errors
///
/// `TelemetryError::MetricsInit` if a collector is rejected for any other
/// reason.
pub fn register_metrics() -> Result<(), TelemetryError> {
    let metrics: Vec<Box<dyn prometheus::core::Collector>> = vec![
        Box::new(EVENTS_PUBLISHED.clone()),
        Box::new(SUBSCRIBER_FAILURES.clone()),
        Box::new(DELIVERIES_DROPPED.clone()),
        Box::new(EVENTS_PER_SECOND.clone()),
        Box::new(PUBLISH_LATENCY_MS.clone()),
        Box::new(SUBSCRIPTIONS_ACTIVE.clone()),
        Box::new(LOG_LENGTH.clone()),
    ];

    for metric in metrics {
        match REGISTRY.register(metric) {
            Ok(()) | Err(prometheus::Error::AlreadyReg) => {}
            Err(e) => return Err(TelemetryError::MetricsInit(e.to_string())),
        }
    }
    Ok(())
}

/// Add newly accepted events of one type.
pub fn record_published(event_type: &str, delta: u64) {
    EVENTS_PUBLISHED.with_label_values(&[event_type]).inc_by(delta);
}

/// Add newly observed subscriber failures.
pub fn record_subscriber_failures(delta: u64) {
    SUBSCRIBER_FAILURES.inc_by(delta);
}

/// Add newly observed dropped deliveries.
pub fn record_dropped(delta: u64) {
    DELIVERIES_DROPPED.inc_by(delta);
}

/// Update the broker gauges.
pub fn observe_broker(gauges: BrokerGauges) {
    EVENTS_PER_SECOND.set(gauges.events_per_second);
    PUBLISH_LATENCY_MS.set(gauges.latency_ms);
    SUBSCRIPTIONS_ACTIVE.set(i64::try_from(gauges.subscriptions).unwrap_or(i64::MAX));
    LOG_LENGTH.set(i64::try_from(gauges.log_length).unwrap_or(i64::MAX));
}

/// Encode all metrics as Prometheus text format.
///
/// # Errors
///
/// `TelemetryError::MetricsInit` if encoding fails.
pub fn render_metrics() -> Result<String, TelemetryError> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;
    String::from_utf8(buffer).map_err(|e| TelemetryError::MetricsInit(e.to_string()))
}
