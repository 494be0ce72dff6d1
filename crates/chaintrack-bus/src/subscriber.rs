//! # Subscription Manager
//!
//! Tracks active subscriptions and runs their callbacks off the publish path.
//!
//! ## Delivery model
//!
//! Every subscription owns a bounded queue. Dispatch only enqueues; a
//! per-subscription worker task drains the queue and invokes the callback.
//! The subscription list is copy-on-write, so adding or removing a
//! subscription never disturbs a dispatch that is iterating an older copy.
//!
//! ## Detach guarantee
//!
//! Each subscription carries a [`Gate`]. The worker holds the gate for the
//! duration of a callback; `unsubscribe` closes the gate, which waits for an
//! in-flight callback to finish. Once `unsubscribe` returns the callback is
//! never invoked again. The gate is reentrant, so a callback may unsubscribe
//! itself.
//!
//! A callback that closes another subscription's gate does not wait: two
//! callbacks detaching each other would otherwise block forever. The target
//! is marked closed, any invocation it has already begun runs to completion,
//! and no new one starts.

use std::any::Any;
use std::cell::Cell;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use parking_lot::{ReentrantMutex, RwLock};
use tokio::sync::mpsc;
use tokio_stream::Stream;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::SubscriberError;
use crate::events::{Event, EventFilter};
use crate::metrics::DeliveryStats;

/// Subscriber callback. Errors and panics are isolated per subscription.
pub type Callback = Arc<dyn Fn(&Event) -> Result<(), SubscriberError> + Send + Sync>;

/// Unique subscription identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(Uuid);

impl SubscriptionId {
    pub(crate) fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub_{}", self.0.simple())
    }
}

/// Returned by `subscribe`; pass it back to `unsubscribe`.
///
/// Dropping the handle does not unsubscribe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionHandle {
    id: SubscriptionId,
    filter: EventFilter,
}

impl SubscriptionHandle {
    pub(crate) fn new(id: SubscriptionId, filter: EventFilter) -> Self {
        Self { id, filter }
    }

    /// Subscription identifier.
    #[must_use]
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// The filter this subscription was registered with.
    #[must_use]
    pub fn filter(&self) -> &EventFilter {
        &self.filter
    }
}

thread_local! {
    /// Nesting depth of gated callbacks on this thread.
    static INVOKING: Cell<usize> = const { Cell::new(0) };
}

/// Marks the current thread as running a gated callback.
struct InvokeScope;

impl InvokeScope {
    fn enter() -> Self {
        INVOKING.with(|depth| depth.set(depth.get() + 1));
        Self
    }
}

impl Drop for InvokeScope {
    fn drop(&mut self) {
        INVOKING.with(|depth| depth.set(depth.get().saturating_sub(1)));
    }
}

fn inside_callback() -> bool {
    INVOKING.with(|depth| depth.get() > 0)
}

/// Open/closed flag that serializes callbacks against detach.
pub(crate) struct Gate {
    closed: AtomicBool,
    lock: ReentrantMutex<()>,
}

impl Gate {
    pub(crate) fn new() -> Self {
        Self {
            closed: AtomicBool::new(false),
            lock: ReentrantMutex::new(()),
        }
    }

    pub(crate) fn is_open(&self) -> bool {
        !self.closed.load(Ordering::Acquire)
    }

    /// Close the gate.
    ///
    /// Blocks while another thread is inside `invoke`, unless the caller is
    /// itself running a gated callback.
    pub(crate) fn close(&self) {
        self.closed.store(true, Ordering::Release);
        if !inside_callback() {
            drop(self.lock.lock());
        }
    }

    /// Run `f` while holding the gate, or return `None` if it is closed.
    pub(crate) fn invoke<F, R>(&self, f: F) -> Option<R>
    where
        F: FnOnce() -> R,
    {
        let _guard = self.lock.lock();
        if !self.is_open() {
            return None;
        }
        let _scope = InvokeScope::enter();
        Some(f())
    }
}

impl fmt::Debug for Gate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Gate").finish_non_exhaustive()
    }
}

/// One registered subscription as seen by dispatch.
#[derive(Debug)]
pub(crate) struct SubscriptionEntry {
    pub(crate) id: SubscriptionId,
    pub(crate) filter: EventFilter,
    pub(crate) queue: mpsc::Sender<Arc<Event>>,
    pub(crate) gate: Arc<Gate>,
}

/// Copy-on-write list of subscriptions.
#[derive(Debug, Default)]
pub(crate) struct SubscriptionRegistry {
    entries: RwLock<Arc<Vec<Arc<SubscriptionEntry>>>>,
}

impl SubscriptionRegistry {
    pub(crate) fn insert(&self, entry: Arc<SubscriptionEntry>) {
        let mut entries = self.entries.write();
        let mut next = Vec::with_capacity(entries.len() + 1);
        next.extend(entries.iter().cloned());
        next.push(entry);
        *entries = Arc::new(next);
    }

    pub(crate) fn remove(&self, id: SubscriptionId) -> Option<Arc<SubscriptionEntry>> {
        let mut entries = self.entries.write();
        let position = entries.iter().position(|entry| entry.id == id)?;
        let mut next: Vec<_> = entries.iter().cloned().collect();
        let removed = next.remove(position);
        *entries = Arc::new(next);
        Some(removed)
    }

    /// The current list; later inserts and removals do not affect it.
    pub(crate) fn snapshot(&self) -> Arc<Vec<Arc<SubscriptionEntry>>> {
        Arc::clone(&self.entries.read())
    }

    pub(crate) fn drain(&self) -> Vec<Arc<SubscriptionEntry>> {
        let mut entries = self.entries.write();
        let drained = entries.iter().cloned().collect();
        *entries = Arc::new(Vec::new());
        drained
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.read().len()
    }
}

/// Drain a subscription's queue, invoking the callback for each event.
pub(crate) async fn run_worker(
    id: SubscriptionId,
    mut queue: mpsc::Receiver<Arc<Event>>,
    gate: Arc<Gate>,
    callback: Callback,
    stats: Arc<DeliveryStats>,
) {
    while let Some(event) = queue.recv().await {
        let outcome = gate.invoke(|| panic::catch_unwind(AssertUnwindSafe(|| callback(&event))));
        let error = match outcome {
            None => break,
            Some(Ok(Ok(()))) => continue,
            Some(Ok(Err(error))) => error,
            Some(Err(panic)) => SubscriberError::Panicked(panic_message(panic.as_ref())),
        };
        stats.record_failure();
        warn!(
            subscription = %id,
            event_id = %event.id,
            event_type = %event.event_type,
            error = %error,
            "Subscriber callback failed"
        );
    }
    debug!(subscription = %id, "Subscriber worker stopped");
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Pull-based subscription.
///
/// Implements `tokio_stream::Stream`. Dropping the stream unsubscribes it.
pub struct EventStream {
    id: SubscriptionId,
    filter: EventFilter,
    gate: Arc<Gate>,
    queue: mpsc::Receiver<Arc<Event>>,
    registry: Arc<SubscriptionRegistry>,
}

impl EventStream {
    pub(crate) fn new(
        id: SubscriptionId,
        filter: EventFilter,
        gate: Arc<Gate>,
        queue: mpsc::Receiver<Arc<Event>>,
        registry: Arc<SubscriptionRegistry>,
    ) -> Self {
        Self {
            id,
            filter,
            gate,
            queue,
            registry,
        }
    }

    /// Receive the next matching event.
    ///
    /// # Returns
    ///
    /// - `Some(event)` - The next matching event
    /// - `None` - The broker shut down
    pub async fn recv(&mut self) -> Option<Arc<Event>> {
        if !self.gate.is_open() {
            return None;
        }
        self.queue.recv().await
    }

    /// Take the next queued event without waiting.
    pub fn try_recv(&mut self) -> Option<Arc<Event>> {
        if !self.gate.is_open() {
            return None;
        }
        self.queue.try_recv().ok()
    }

    /// Subscription identifier.
    #[must_use]
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Get the filter for this stream.
    #[must_use]
    pub fn filter(&self) -> &EventFilter {
        &self.filter
    }
}

impl Stream for EventStream {
    type Item = Arc<Event>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if !self.gate.is_open() {
            return Poll::Ready(None);
        }
        self.queue.poll_recv(cx)
    }
}

impl Drop for EventStream {
    fn drop(&mut self) {
        self.registry.remove(self.id);
        self.gate.close();
        debug!(subscription = %self.id, "Event stream dropped");
    }
}

impl fmt::Debug for EventStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventStream")
            .field("id", &self.id)
            .field("filter", &self.filter)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{EventId, EventType, Payload};
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn entry(id: SubscriptionId) -> (Arc<SubscriptionEntry>, mpsc::Receiver<Arc<Event>>) {
        let (tx, rx) = mpsc::channel(4);
        let entry = Arc::new(SubscriptionEntry {
            id,
            filter: EventFilter::all(),
            queue: tx,
            gate: Arc::new(Gate::new()),
        });
        (entry, rx)
    }

    fn event(id: u64) -> Arc<Event> {
        Arc::new(Event {
            id: EventId(id),
            timestamp: Utc::now(),
            topic: "t".to_string(),
            event_type: EventType::QrScan,
            payload: Payload::new(),
            source: "test".to_string(),
        })
    }

    #[test]
    fn test_registry_copy_on_write() {
        let registry = SubscriptionRegistry::default();
        let a = SubscriptionId::new();
        let b = SubscriptionId::new();
        let (entry_a, _rx_a) = entry(a);
        let (entry_b, _rx_b) = entry(b);
        registry.insert(entry_a);

        let before = registry.snapshot();
        registry.insert(entry_b);
        assert_eq!(before.len(), 1);
        assert_eq!(registry.len(), 2);

        let during = registry.snapshot();
        assert!(registry.remove(a).is_some());
        assert!(registry.remove(a).is_none());
        assert_eq!(during.len(), 2);
        assert_eq!(registry.len(), 1);

        assert_eq!(registry.drain().len(), 1);
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn test_gate_blocks_after_close() {
        let gate = Gate::new();
        assert_eq!(gate.invoke(|| 1), Some(1));
        gate.close();
        assert!(!gate.is_open());
        assert_eq!(gate.invoke(|| 1), None);
    }

    #[test]
    fn test_gate_close_from_inside_invoke() {
        let gate = Gate::new();
        let result = gate.invoke(|| {
            gate.close();
            "closed"
        });
        assert_eq!(result, Some("closed"));
        assert!(!gate.is_open());
    }

    #[test]
    fn test_close_from_other_callback_does_not_wait() {
        let held = Arc::new(Gate::new());
        let (entered_tx, entered_rx) = std::sync::mpsc::channel();
        let (release_tx, release_rx) = std::sync::mpsc::channel::<()>();

        let worker = {
            let held = Arc::clone(&held);
            std::thread::spawn(move || {
                held.invoke(|| {
                    entered_tx.send(()).unwrap();
                    release_rx.recv().unwrap();
                })
            })
        };
        entered_rx.recv().unwrap();

        // Another callback closes the busy gate and returns immediately.
        let other = Gate::new();
        assert_eq!(other.invoke(|| held.close()), Some(()));
        assert!(!held.is_open());

        release_tx.send(()).unwrap();
        assert_eq!(worker.join().unwrap(), Some(()));
        assert_eq!(held.invoke(|| 1), None);
        assert!(!inside_callback());
    }

    #[test]
    fn test_panic_message() {
        let caught = panic::catch_unwind(|| panic!("boom")).unwrap_err();
        assert_eq!(panic_message(caught.as_ref()), "boom");
    }

    #[tokio::test]
    async fn test_worker_isolates_failures() {
        let (tx, rx) = mpsc::channel(8);
        let gate = Arc::new(Gate::new());
        let stats = Arc::new(DeliveryStats::default());
        let calls = Arc::new(AtomicUsize::new(0));

        let seen = Arc::clone(&calls);
        let callback: Callback = Arc::new(move |event: &Event| {
            seen.fetch_add(1, Ordering::SeqCst);
            match event.id.0 {
                1 => Err(SubscriberError::callback("bad event")),
                2 => panic!("subscriber bug"),
                _ => Ok(()),
            }
        });

        for id in 1..=3 {
            tx.send(event(id)).await.unwrap();
        }
        drop(tx);

        run_worker(SubscriptionId::new(), rx, gate, callback, Arc::clone(&stats)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(stats.failures(), 2);
    }

    #[tokio::test]
    async fn test_worker_stops_when_gate_closed() {
        let (tx, rx) = mpsc::channel(8);
        let gate = Arc::new(Gate::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);
        let callback: Callback = Arc::new(move |_: &Event| {
            seen.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        tx.send(event(1)).await.unwrap();
        gate.close();
        run_worker(
            SubscriptionId::new(),
            rx,
            gate,
            callback,
            Arc::new(DeliveryStats::default()),
        )
        .await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
