//! Transient notifications for the event types worth interrupting for.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chaintrack_bus::{BrokerError, Event, EventBroker, EventFilter, EventId, EventType, SubscriptionHandle};
use parking_lot::Mutex;
use tracing::info;

/// Event types that raise a toast.
pub const TOASTABLE: [EventType; 4] = [
    EventType::QrScan,
    EventType::EtaPrediction,
    EventType::AnomalyDetected,
    EventType::AiAnalysis,
];

/// Toasts shown at once.
pub const MAX_TOASTS: usize = 3;

/// How long a toast stays up.
pub const TOAST_TTL: Duration = Duration::from_millis(4_000);

/// Headline for a toast.
#[must_use]
pub fn headline(event_type: EventType) -> &'static str {
    match event_type {
        EventType::QrScan => "QR scan event published",
        EventType::EtaPrediction => "AI pushed updated ETA prediction",
        EventType::AnomalyDetected => "Anomaly detection alert",
        EventType::AiAnalysis => "AI analysis completed",
        _ => "New event published",
    }
}

/// One visible notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Toast {
    /// Event that raised it.
    pub event_id: EventId,
    /// Its type.
    pub event_type: EventType,
    /// Headline text.
    pub headline: &'static str,
    /// Event message.
    pub detail: String,
    /// When it appeared.
    pub shown_at: Instant,
}

/// Toast stack, newest first.
#[derive(Debug)]
pub struct Toaster {
    broker: Arc<EventBroker>,
    toasts: Arc<Mutex<VecDeque<Toast>>>,
    handle: Mutex<Option<SubscriptionHandle>>,
}

impl Toaster {
    /// Create a detached toaster.
    pub fn new(broker: Arc<EventBroker>) -> Self {
        Self {
            broker,
            toasts: Arc::new(Mutex::new(VecDeque::with_capacity(MAX_TOASTS))),
            handle: Mutex::new(None),
        }
    }

    /// Subscribe to the toastable event types. No-op when already attached.
    ///
    /// # Errors
    ///
    /// Broker subscription errors.
    pub fn attach(&self) -> Result<(), BrokerError> {
        let mut handle = self.handle.lock();
        if handle.is_some() {
            return Ok(());
        }
        let toasts = Arc::clone(&self.toasts);
        let subscription = self
            .broker
            .subscribe(EventFilter::event_types(TOASTABLE.to_vec()), move |event| {
                push_toast(&toasts, event, Instant::now());
                Ok(())
            })?;
        *handle = Some(subscription);
        Ok(())
    }

    /// Unsubscribe. Returns whether the toaster was attached.
    pub fn detach(&self) -> bool {
        match self.handle.lock().take() {
            Some(handle) => self.broker.unsubscribe(&handle),
            None => false,
        }
    }

    /// Raise a toast for `event` as of `now`.
    pub fn push(&self, event: &Event, now: Instant) {
        push_toast(&self.toasts, event, now);
    }

    /// Toasts still up at `now`, newest first. Expired ones are discarded.
    pub fn visible_at(&self, now: Instant) -> Vec<Toast> {
        let mut toasts = self.toasts.lock();
        toasts.retain(|toast| now.saturating_duration_since(toast.shown_at) < TOAST_TTL);
        toasts.iter().cloned().collect()
    }

    /// Toasts up right now.
    pub fn visible(&self) -> Vec<Toast> {
        self.visible_at(Instant::now())
    }

    /// Remove the toast for `event_id`. Returns whether one was up.
    pub fn dismiss(&self, event_id: EventId) -> bool {
        let mut toasts = self.toasts.lock();
        let before = toasts.len();
        toasts.retain(|toast| toast.event_id != event_id);
        toasts.len() != before
    }
}

fn push_toast(toasts: &Mutex<VecDeque<Toast>>, event: &Event, now: Instant) {
    let toast = Toast {
        event_id: event.id,
        event_type: event.event_type,
        headline: headline(event.event_type),
        detail: event.message(),
        shown_at: now,
    };
    info!(event_id = %toast.event_id, headline = toast.headline, "{}", toast.detail);

    let mut toasts = toasts.lock();
    toasts.push_front(toast);
    toasts.truncate(MAX_TOASTS);
}
