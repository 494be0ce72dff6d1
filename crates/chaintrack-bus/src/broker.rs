//! # Event Broker
//!
//! Owns the bounded log, the subscription set and the metrics, and is the
//! only writer to any of them.
//!
//! ## Ordering
//!
//! A single mutex guards the log, the id sequence and the throughput window.
//! Append and enqueue happen inside the same critical section, so the log
//! order is the one total order and every subscriber observes events in it.
//!
//! ## Lifecycle
//!
//! ```text
//! new() ──► publish / subscribe / set_active ──► shutdown()
//!                                                  │
//!                                  publish ──► Err(Closed)
//! ```

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::config::BusConfig;
use crate::error::{BrokerError, ConfigError, Result, SubscriberError};
use crate::events::{Event, EventFilter, EventId, EventType, Payload, PublishRequest, DEFAULT_SOURCE};
use crate::log::EventLog;
use crate::metrics::{ComponentStatus, DeliveryStats, Metrics, ThroughputWindow};
use crate::subscriber::{
    run_worker, EventStream, Gate, SubscriptionEntry, SubscriptionHandle, SubscriptionId,
    SubscriptionRegistry,
};
use crate::topics::{TopicRegistry, TopicSelector, UniformRandom};

/// Trait for publishing events to the broker.
///
/// Producers (ledger adapters, the label scanner, the synthetic generator)
/// depend on this rather than on `EventBroker` directly.
pub trait EventPublisher: Send + Sync {
    /// Publish an event.
    ///
    /// # Returns
    ///
    /// The stored event, with its assigned id, timestamp and topic.
    ///
    /// # Errors
    ///
    /// `BrokerError::Closed` after shutdown, `UnknownTopic` for an
    /// unregistered explicit topic, `Validation` for malformed requests.
    fn publish(&self, request: PublishRequest) -> Result<Arc<Event>>;

    /// Get the total number of events published.
    fn events_published(&self) -> u64;
}

/// Fan-out outcome of a single publish.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct DispatchReport {
    matched: usize,
    enqueued: usize,
    dropped: usize,
}

#[derive(Debug)]
struct BrokerState {
    log: EventLog,
    next_id: u64,
    total_published: u64,
    published_by_type: BTreeMap<EventType, u64>,
    throughput: ThroughputWindow,
}

/// In-process publish/subscribe broker.
///
/// Shared as `Arc<EventBroker>`; every method takes `&self`.
#[derive(Debug)]
pub struct EventBroker {
    config: BusConfig,
    registry: TopicRegistry,
    selector: Box<dyn TopicSelector>,
    state: Mutex<BrokerState>,
    subscriptions: Arc<SubscriptionRegistry>,
    stats: Arc<DeliveryStats>,
    /// Written only while `state` is held.
    closed: AtomicBool,
    active: watch::Sender<bool>,
    shutdown: watch::Sender<bool>,
    metrics: watch::Sender<Metrics>,
}

impl EventBroker {
    /// Create a broker with uniform random topic selection.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the configuration is invalid.
    pub fn new(config: BusConfig) -> std::result::Result<Self, ConfigError> {
        Self::with_selector(config, Box::new(UniformRandom::new()))
    }

    /// Create a broker with an explicit topic selection policy.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the configuration is invalid or the selector
    /// does not fit the topic registry.
    pub fn with_selector(
        config: BusConfig,
        selector: Box<dyn TopicSelector>,
    ) -> std::result::Result<Self, ConfigError> {
        let registry = config.validate()?;
        selector.validate(&registry)?;

        let state = BrokerState {
            log: EventLog::new(config.log_capacity),
            next_id: 0,
            total_published: 0,
            published_by_type: BTreeMap::new(),
            throughput: ThroughputWindow::new(config.metrics_window()),
        };
        let mut initial = Metrics::initial(registry.len());
        if !config.start_active {
            initial.producer_status = ComponentStatus::Idle;
        }

        info!(
            topics = registry.len(),
            log_capacity = config.log_capacity,
            ?selector,
            "Event broker created"
        );

        Ok(Self {
            active: watch::Sender::new(config.start_active),
            shutdown: watch::Sender::new(false),
            metrics: watch::Sender::new(initial),
            config,
            registry,
            selector,
            state: Mutex::new(state),
            subscriptions: Arc::new(SubscriptionRegistry::default()),
            stats: Arc::new(DeliveryStats::default()),
            closed: AtomicBool::new(false),
        })
    }

    /// Publish an event.
    ///
    /// Validates the request, stamps id, timestamp and topic, appends to the
    /// log (evicting the oldest event at capacity), enqueues to matching
    /// subscribers and recomputes metrics.
    ///
    /// # Errors
    ///
    /// See [`EventPublisher::publish`].
    pub fn publish(&self, request: PublishRequest) -> Result<Arc<Event>> {
        let started = Instant::now();
        if self.is_closed() {
            return Err(BrokerError::Closed);
        }
        request.validate(&self.config)?;

        let PublishRequest {
            event_type,
            payload,
            source,
            topic,
        } = request;
        let topic = match topic {
            Some(topic) if self.registry.contains(&topic) => topic,
            Some(topic) => return Err(BrokerError::UnknownTopic(topic)),
            None => self.selector.select(&self.registry, event_type),
        };
        let source = source.unwrap_or_else(|| DEFAULT_SOURCE.to_string());

        let mut state = self.state.lock();
        if self.closed.load(Ordering::Acquire) {
            return Err(BrokerError::Closed);
        }

        state.next_id += 1;
        let event = Arc::new(Event {
            id: EventId(state.next_id),
            timestamp: Utc::now(),
            topic,
            event_type,
            payload,
            source,
        });
        state.log.push(Arc::clone(&event));
        state.total_published += 1;
        *state.published_by_type.entry(event_type).or_default() += 1;

        let report = self.dispatch(&event);

        let now = Instant::now();
        state.throughput.record(now);
        let metrics = self.live_metrics(Metrics {
            latency_ms: now.duration_since(started).as_secs_f64() * 1_000.0,
            events_per_second: state.throughput.rate(now),
            total_published: state.total_published,
            published_by_type: state.published_by_type.clone(),
            log_length: state.log.len(),
            ..Metrics::initial(self.registry.len())
        });
        self.metrics.send_replace(metrics);
        drop(state);

        debug!(
            event_id = %event.id,
            event_type = %event.event_type,
            topic = %event.topic,
            source = %event.source,
            matched = report.matched,
            enqueued = report.enqueued,
            "Event published"
        );
        Ok(event)
    }

    /// Publish with default source and a policy-selected topic.
    ///
    /// # Errors
    ///
    /// See [`EventPublisher::publish`].
    pub fn publish_event(&self, event_type: EventType, payload: Payload) -> Result<Arc<Event>> {
        self.publish(PublishRequest::new(event_type).with_payload(payload))
    }

    /// Enqueue to every matching subscription. Caller holds `state`.
    fn dispatch(&self, event: &Arc<Event>) -> DispatchReport {
        let mut report = DispatchReport::default();
        for entry in self.subscriptions.snapshot().iter() {
            if !entry.filter.matches(event) {
                continue;
            }
            report.matched += 1;
            match entry.queue.try_send(Arc::clone(event)) {
                Ok(()) => report.enqueued += 1,
                Err(TrySendError::Full(_)) => {
                    report.dropped += 1;
                    warn!(
                        subscription = %entry.id,
                        event_id = %event.id,
                        "Subscriber queue full, delivery dropped"
                    );
                }
                Err(TrySendError::Closed(_)) => {
                    debug!(subscription = %entry.id, "Subscriber queue closed, skipping");
                }
            }
        }
        self.stats.record_dropped(report.dropped as u64);
        report
    }

    /// Point-in-time copy of the log, most-recent-first.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Arc<Event>> {
        self.state.lock().log.snapshot()
    }

    /// Point-in-time copy of the events matching `filter`, most-recent-first.
    #[must_use]
    pub fn snapshot_matching(&self, filter: &EventFilter) -> Vec<Arc<Event>> {
        self.state.lock().log.snapshot_where(|event| filter.matches(event))
    }

    /// Point-in-time copy of the events accepted by `predicate`.
    pub fn snapshot_filtered<F>(&self, predicate: F) -> Vec<Arc<Event>>
    where
        F: FnMut(&Event) -> bool,
    {
        self.state.lock().log.snapshot_where(predicate)
    }

    /// Register a callback for events matching `filter`.
    ///
    /// The callback runs on its own tokio task; failures and panics are
    /// logged and counted but never reach the publisher.
    ///
    /// # Errors
    ///
    /// `BrokerError::Closed` after shutdown, `NoRuntime` outside a tokio
    /// runtime.
    pub fn subscribe<F>(&self, filter: EventFilter, callback: F) -> Result<SubscriptionHandle>
    where
        F: Fn(&Event) -> std::result::Result<(), SubscriberError> + Send + Sync + 'static,
    {
        let runtime = Handle::try_current().map_err(|_| BrokerError::NoRuntime)?;
        let (entry, queue) = self.register(filter)?;

        runtime.spawn(run_worker(
            entry.id,
            queue,
            Arc::clone(&entry.gate),
            Arc::new(callback),
            Arc::clone(&self.stats),
        ));

        debug!(subscription = %entry.id, filter = ?entry.filter, "New subscription created");
        Ok(SubscriptionHandle::new(entry.id, entry.filter.clone()))
    }

    /// Subscribe as a pull-based stream. Dropping the stream unsubscribes.
    ///
    /// # Errors
    ///
    /// `BrokerError::Closed` after shutdown.
    pub fn subscribe_stream(&self, filter: EventFilter) -> Result<EventStream> {
        let (entry, queue) = self.register(filter)?;
        debug!(subscription = %entry.id, filter = ?entry.filter, "New event stream created");
        Ok(EventStream::new(
            entry.id,
            entry.filter.clone(),
            Arc::clone(&entry.gate),
            queue,
            Arc::clone(&self.subscriptions),
        ))
    }

    fn register(
        &self,
        filter: EventFilter,
    ) -> Result<(Arc<SubscriptionEntry>, mpsc::Receiver<Arc<Event>>)> {
        let (queue, receiver) = mpsc::channel(self.config.subscriber_queue_capacity);
        let entry = Arc::new(SubscriptionEntry {
            id: SubscriptionId::new(),
            filter,
            queue,
            gate: Arc::new(Gate::new()),
        });
        {
            let _state = self.state.lock();
            if self.closed.load(Ordering::Acquire) {
                return Err(BrokerError::Closed);
            }
            self.subscriptions.insert(Arc::clone(&entry));
        }
        self.refresh_metrics();
        Ok((entry, receiver))
    }

    /// Remove a subscription.
    ///
    /// Waits for an in-flight callback of this subscription to finish; after
    /// this returns the callback is never invoked again. Returns `false` if
    /// the subscription was already gone.
    ///
    /// The wait blocks the calling thread. Async callers should detach from
    /// `spawn_blocking`. Called from inside another subscription's callback
    /// it does not wait: the target's current invocation, if any, may still
    /// be running when this returns.
    pub fn unsubscribe(&self, handle: &SubscriptionHandle) -> bool {
        let Some(entry) = self.subscriptions.remove(handle.id()) else {
            return false;
        };
        entry.gate.close();
        self.refresh_metrics();
        debug!(subscription = %handle.id(), "Subscription removed");
        true
    }

    /// Number of active subscriptions.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscriptions.len()
    }

    /// Enable or pause the synthetic generator. Explicit publishes are never
    /// gated.
    pub fn set_active(&self, active: bool) {
        let changed = self.active.send_if_modified(|current| {
            if *current == active {
                false
            } else {
                *current = active;
                true
            }
        });
        if changed {
            info!(active, "Synthetic traffic toggled");
            self.refresh_metrics();
        }
    }

    /// Whether the synthetic generator may fire.
    #[must_use]
    pub fn is_active(&self) -> bool {
        *self.active.borrow()
    }

    /// Follow the generator flag.
    #[must_use]
    pub fn watch_active(&self) -> watch::Receiver<bool> {
        self.active.subscribe()
    }

    /// Resolves to `true` once the broker shuts down.
    #[must_use]
    pub fn watch_shutdown(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    /// Current metrics. Statuses and counters are live; rate and latency
    /// reflect the most recent publish.
    #[must_use]
    pub fn metrics(&self) -> Metrics {
        let latest = self.metrics.borrow().clone();
        self.live_metrics(latest)
    }

    /// Follow metrics as they are recomputed.
    #[must_use]
    pub fn watch_metrics(&self) -> watch::Receiver<Metrics> {
        self.metrics.subscribe()
    }

    /// The topic registry.
    #[must_use]
    pub fn topics(&self) -> &TopicRegistry {
        &self.registry
    }

    /// The configuration this broker was built with.
    #[must_use]
    pub fn config(&self) -> &BusConfig {
        &self.config
    }

    /// Whether `shutdown` has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Close the broker.
    ///
    /// Later publishes and subscribes fail with `Closed`; all subscriptions
    /// are detached and their workers stop. Idempotent.
    pub fn shutdown(&self) {
        let drained = {
            let _state = self.state.lock();
            if self.closed.swap(true, Ordering::AcqRel) {
                return;
            }
            self.subscriptions.drain()
        };
        for entry in &drained {
            entry.gate.close();
        }

        self.shutdown.send_replace(true);
        self.refresh_metrics();
        info!(detached = drained.len(), "Event broker shut down");
    }

    fn producer_status(&self) -> ComponentStatus {
        if self.is_closed() {
            ComponentStatus::Stopped
        } else if self.is_active() {
            ComponentStatus::Active
        } else {
            ComponentStatus::Idle
        }
    }

    fn consumer_status(&self, subscribers: usize) -> ComponentStatus {
        if self.is_closed() {
            ComponentStatus::Stopped
        } else if subscribers > 0 {
            ComponentStatus::Active
        } else {
            ComponentStatus::Idle
        }
    }

    /// Overlay statuses and counters that change between publishes.
    fn overlay_live(&self, metrics: &mut Metrics) {
        let subscribers = self.subscriptions.len();
        metrics.producer_status = self.producer_status();
        metrics.consumer_status = self.consumer_status(subscribers);
        metrics.subscriber_count = subscribers;
        metrics.dispatch_failures = self.stats.failures();
        metrics.dropped_deliveries = self.stats.dropped();
    }

    fn live_metrics(&self, mut metrics: Metrics) -> Metrics {
        self.overlay_live(&mut metrics);
        metrics
    }

    /// Updated in place so a concurrent publish is never overwritten.
    fn refresh_metrics(&self) {
        self.metrics.send_modify(|metrics| self.overlay_live(metrics));
    }
}

impl EventPublisher for EventBroker {
    fn publish(&self, request: PublishRequest) -> Result<Arc<Event>> {
        EventBroker::publish(self, request)
    }

    fn events_published(&self) -> u64 {
        self.state.lock().total_published
    }
}

impl Drop for EventBroker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ValidationError;
    use crate::topics::{RoundRobin, QR_SCANS, SHIPMENTS};
    use serde_json::json;
    use std::time::Duration;
    use tokio::time::timeout;

    fn broker() -> EventBroker {
        EventBroker::with_selector(BusConfig::default(), Box::new(RoundRobin::new())).unwrap()
    }

    #[test]
    fn test_publish_assigns_ids_and_defaults() {
        let broker = broker();
        let first = broker.publish_event(EventType::QrScan, Payload::new()).unwrap();
        let second = broker
            .publish(
                PublishRequest::new(EventType::StatusChange)
                    .source("product-list")
                    .topic(QR_SCANS),
            )
            .unwrap();

        assert_eq!(first.id, EventId(1));
        assert_eq!(second.id, EventId(2));
        assert_eq!(first.source, DEFAULT_SOURCE);
        assert_eq!(first.topic, SHIPMENTS);
        assert_eq!(second.topic, QR_SCANS);
        assert_eq!(second.source, "product-list");
        assert_eq!(broker.events_published(), 2);
    }

    #[test]
    fn test_rejected_requests_leave_log_untouched() {
        let broker = broker();
        let unknown = broker.publish(PublishRequest::new(EventType::QrScan).topic("nowhere"));
        assert_eq!(unknown, Err(BrokerError::UnknownTopic("nowhere".to_string())));

        let blank = broker.publish(PublishRequest::new(EventType::QrScan).source(""));
        assert_eq!(
            blank,
            Err(BrokerError::Validation(ValidationError::EmptySource))
        );

        assert!(broker.snapshot().is_empty());
        assert_eq!(broker.metrics().total_published, 0);
    }

    #[test]
    fn test_snapshot_matching_and_filtered() {
        let broker = broker();
        for kind in [EventType::QrScan, EventType::StatusChange, EventType::QrScan] {
            broker.publish_event(kind, Payload::new()).unwrap();
        }

        let scans = broker.snapshot_matching(&EventFilter::event_types(vec![EventType::QrScan]));
        let ids: Vec<u64> = scans.iter().map(|e| e.id.0).collect();
        assert_eq!(ids, vec![3, 1]);

        let odd = broker.snapshot_filtered(|e| e.id.0 % 2 == 1);
        assert_eq!(odd.len(), 2);
        assert_eq!(broker.snapshot().len(), 3);
    }

    #[test]
    fn test_metrics_after_publish() {
        let broker = broker();
        broker
            .publish_event(EventType::AiAnalysis, Payload::new())
            .unwrap();
        let metrics = broker.metrics();
        assert_eq!(metrics.topic_count, 5);
        assert_eq!(metrics.total_published, 1);
        assert_eq!(metrics.published_by_type.get(&EventType::AiAnalysis), Some(&1));
        assert_eq!(metrics.log_length, 1);
        assert!(metrics.events_per_second > 0.0);
        assert!(metrics.latency_ms >= 0.0);
        assert_eq!(metrics.producer_status, ComponentStatus::Active);
        assert_eq!(metrics.consumer_status, ComponentStatus::Idle);
    }

    #[test]
    fn test_set_active_only_notifies_on_change() {
        let broker = broker();
        let mut active = broker.watch_active();
        assert!(broker.is_active());

        broker.set_active(true);
        assert!(!active.has_changed().unwrap());

        broker.set_active(false);
        assert!(active.has_changed().unwrap());
        assert!(!*active.borrow_and_update());
        assert_eq!(broker.metrics().producer_status, ComponentStatus::Idle);

        // Explicit publishes are not gated.
        assert!(broker.publish_event(EventType::QrScan, Payload::new()).is_ok());
    }

    #[test]
    fn test_start_inactive() {
        let config = BusConfig {
            start_active: false,
            ..BusConfig::default()
        };
        let broker = EventBroker::new(config).unwrap();
        assert!(!broker.is_active());
        assert_eq!(broker.metrics().producer_status, ComponentStatus::Idle);
    }

    #[test]
    fn test_subscribe_requires_runtime() {
        let broker = broker();
        let result = broker.subscribe(EventFilter::all(), |_| Ok(()));
        assert_eq!(result.unwrap_err(), BrokerError::NoRuntime);
        assert_eq!(broker.subscriber_count(), 0);
    }

    #[test]
    fn test_shutdown_closes_everything() {
        let broker = broker();
        let mut shutdown = broker.watch_shutdown();
        let _stream = broker.subscribe_stream(EventFilter::all()).unwrap();
        assert_eq!(broker.subscriber_count(), 1);

        broker.shutdown();
        broker.shutdown();

        assert!(broker.is_closed());
        assert!(*shutdown.borrow_and_update());
        assert_eq!(broker.subscriber_count(), 0);
        assert_eq!(
            broker.publish_event(EventType::QrScan, Payload::new()),
            Err(BrokerError::Closed)
        );
        assert_eq!(
            broker.subscribe_stream(EventFilter::all()).unwrap_err(),
            BrokerError::Closed
        );

        let metrics = broker.metrics();
        assert_eq!(metrics.producer_status, ComponentStatus::Stopped);
        assert_eq!(metrics.consumer_status, ComponentStatus::Stopped);
    }

    #[tokio::test]
    async fn test_stream_receives_matching_events_in_order() {
        let broker = broker();
        let mut stream = broker
            .subscribe_stream(EventFilter::event_types(vec![EventType::QrScan]))
            .unwrap();

        broker
            .publish(PublishRequest::new(EventType::QrScan).field("productId", "P1"))
            .unwrap();
        broker
            .publish_event(EventType::StatusChange, Payload::new())
            .unwrap();
        broker
            .publish(PublishRequest::new(EventType::QrScan).field("productId", "P2"))
            .unwrap();

        let first = timeout(Duration::from_millis(100), stream.recv())
            .await
            .unwrap()
            .unwrap();
        let second = timeout(Duration::from_millis(100), stream.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first.payload["productId"], json!("P1"));
        assert_eq!(second.payload["productId"], json!("P2"));
        assert!(stream.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_dropping_stream_unsubscribes() {
        let broker = broker();
        let stream = broker.subscribe_stream(EventFilter::all()).unwrap();
        assert_eq!(broker.subscriber_count(), 1);
        assert_eq!(broker.metrics().consumer_status, ComponentStatus::Active);
        drop(stream);
        assert_eq!(broker.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_full_queue_drops_for_that_subscriber_only() {
        let config = BusConfig {
            subscriber_queue_capacity: 2,
            ..BusConfig::default()
        };
        let broker = EventBroker::new(config).unwrap();
        let mut slow = broker.subscribe_stream(EventFilter::all()).unwrap();

        for _ in 0..5 {
            broker
                .publish_event(EventType::ShipmentUpdate, Payload::new())
                .unwrap();
        }

        assert_eq!(broker.snapshot().len(), 5);
        assert_eq!(broker.metrics().dropped_deliveries, 3);
        assert_eq!(slow.try_recv().unwrap().id, EventId(1));
        assert_eq!(slow.try_recv().unwrap().id, EventId(2));
        assert!(slow.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_unsubscribe_unknown_handle() {
        let broker = broker();
        let handle = broker.subscribe(EventFilter::all(), |_| Ok(())).unwrap();
        assert!(broker.unsubscribe(&handle));
        assert!(!broker.unsubscribe(&handle));
    }
}
