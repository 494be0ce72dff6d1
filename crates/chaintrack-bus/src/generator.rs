//! # Synthetic Traffic Generator
//!
//! Background task that invents events for demos and replay. The broker does
//! not know it exists; it publishes through the same path as any producer.
//!
//! ## Scheduling
//!
//! ```text
//!   ┌────────── inactive ◄──── set_active(false) ────┐
//!   │              │                                  │
//!   │      set_active(true)                           │
//!   │              ▼                                  │
//!   │   sample delay in [min, max] ──► sleep ──► fire ┘
//!   │              ▲                           │
//!   │              └───────────────────────────┘
//!   └──► shutdown: task exits
//! ```
//!
//! One task owns one timer. Toggling the flag wakes the task and discards
//! the pending deadline, so reactivation never leaves two timers running.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn};

use crate::broker::EventBroker;
use crate::config::GeneratorConfig;
use crate::error::{BrokerError, ConfigError, GeneratorError};
use crate::events::{EventType, Payload, PublishRequest};

const SHIPMENT_STATES: [&str; 4] = ["IN_TRANSIT", "AT_WAREHOUSE", "OUT_FOR_DELIVERY", "DELIVERED"];
const PRODUCT_STATES: [&str; 3] = ["Created", "In Transit", "Delivered"];

/// Periodic producer of background events.
#[derive(Debug)]
pub struct SyntheticTrafficGenerator {
    broker: Arc<EventBroker>,
    config: GeneratorConfig,
    rng: StdRng,
    fired: Arc<AtomicU64>,
}

impl SyntheticTrafficGenerator {
    /// Create a generator publishing into `broker`.
    ///
    /// # Errors
    ///
    /// `InvalidInterval` or `NoEventTypes` for a bad configuration.
    pub fn new(broker: Arc<EventBroker>, config: GeneratorConfig) -> Result<Self, GeneratorError> {
        config.validate().map_err(|e| match e {
            ConfigError::InvalidInterval { min_ms, max_ms } => {
                GeneratorError::InvalidInterval { min_ms, max_ms }
            }
            _ => GeneratorError::NoEventTypes,
        })?;
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Ok(Self {
            broker,
            config,
            rng,
            fired: Arc::new(AtomicU64::new(0)),
        })
    }

    /// Start the background task on the current tokio runtime.
    ///
    /// # Errors
    ///
    /// `GeneratorError::NoRuntime` outside a tokio runtime.
    pub fn spawn(self) -> Result<GeneratorHandle, GeneratorError> {
        let runtime = Handle::try_current().map_err(|_| GeneratorError::NoRuntime)?;
        let fired = Arc::clone(&self.fired);
        info!(
            min_ms = self.config.min_interval_ms,
            max_ms = self.config.max_interval_ms,
            types = ?self.config.event_types,
            "Synthetic traffic generator started"
        );
        let task = runtime.spawn(self.run());
        Ok(GeneratorHandle { task, fired })
    }

    async fn run(mut self) {
        let mut active = self.broker.watch_active();
        let mut shutdown = self.broker.watch_shutdown();

        loop {
            if *shutdown.borrow_and_update() {
                break;
            }
            if !*active.borrow_and_update() {
                tokio::select! {
                    changed = active.changed() => if changed.is_err() { break },
                    changed = shutdown.changed() => if changed.is_err() { break },
                }
                continue;
            }

            let delay = self.next_delay();
            debug!(delay_ms = delay.as_millis() as u64, "Next synthetic fire scheduled");
            let deadline = Instant::now() + delay;
            tokio::select! {
                () = sleep_until(deadline) => {}
                // Toggled either way: drop this deadline and re-evaluate.
                changed = active.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
            }

            // A toggle can land in the same poll as the timer.
            if !self.broker.is_active() {
                continue;
            }
            match self.fire() {
                Ok(()) => {}
                Err(BrokerError::Closed) => break,
                Err(e) => {
                    let error = GeneratorError::Schedule(e.to_string());
                    warn!(%error, "Synthetic fire failed, rescheduling");
                }
            }
        }
        info!(
            fired = self.fired.load(Ordering::Relaxed),
            "Synthetic traffic generator stopped"
        );
    }

    fn next_delay(&mut self) -> Duration {
        let millis = self
            .rng
            .gen_range(self.config.min_interval_ms..=self.config.max_interval_ms);
        Duration::from_millis(millis)
    }

    fn fire(&mut self) -> Result<(), BrokerError> {
        let event_type = self
            .config
            .event_types
            .choose(&mut self.rng)
            .copied()
            .unwrap_or(EventType::ShipmentUpdate);
        let payload = synthetic_payload(event_type, &mut self.rng);
        let request = PublishRequest::new(event_type)
            .with_payload(payload)
            .source(self.config.source.clone());

        let event = self.broker.publish(request)?;
        self.fired.fetch_add(1, Ordering::Relaxed);
        debug!(event_id = %event.id, event_type = %event.event_type, "Synthetic event fired");
        Ok(())
    }
}

/// Build a plausible payload for a generated event.
pub fn synthetic_payload<R: Rng + ?Sized>(event_type: EventType, rng: &mut R) -> Payload {
    let mut payload = Payload::new();
    let product_id = format!("P{}", rng.gen_range(1..=999u32));
    match event_type {
        EventType::ShipmentUpdate => {
            let status = SHIPMENT_STATES[rng.gen_range(0..SHIPMENT_STATES.len())];
            payload.insert("status".into(), status.into());
            payload.insert("productId".into(), product_id.into());
        }
        EventType::AiAnalysis => {
            payload.insert("confidence".into(), rng.gen_range(80..=99u32).into());
            payload.insert("productId".into(), product_id.into());
        }
        EventType::QualityCheck => {
            let result = if rng.gen_bool(0.9) { "PASSED" } else { "FAILED" };
            payload.insert("result".into(), result.into());
            payload.insert("batchId".into(), format!("B{}", rng.gen_range(100..=999u32)).into());
        }
        EventType::EtaPrediction => {
            let eta = format!("{}h {}m", rng.gen_range(1..=48u32), rng.gen_range(0..60u32));
            payload.insert("eta".into(), eta.into());
            payload.insert("productId".into(), product_id.into());
        }
        EventType::QrScan => {
            payload.insert("productId".into(), product_id.into());
        }
        EventType::AnomalyDetected => {
            let location = format!("Warehouse-{}", rng.gen_range(1..=12u32));
            payload.insert("location".into(), location.into());
        }
        EventType::StatusChange => {
            let status = PRODUCT_STATES[rng.gen_range(0..PRODUCT_STATES.len())];
            payload.insert("productId".into(), product_id.into());
            payload.insert("newStatus".into(), status.into());
        }
    }
    payload
}

/// Handle to a running generator task.
#[derive(Debug)]
pub struct GeneratorHandle {
    task: JoinHandle<()>,
    fired: Arc<AtomicU64>,
}

impl GeneratorHandle {
    /// Events published by this generator so far.
    #[must_use]
    pub fn fired(&self) -> u64 {
        self.fired.load(Ordering::Relaxed)
    }

    /// Whether the task has exited.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Abort the task and wait for it to go away.
    pub async fn stop(self) {
        self.task.abort();
        let _ = self.task.await;
        debug!("Synthetic traffic generator aborted");
    }
}
