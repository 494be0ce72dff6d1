//! # Runtime Wiring
//!
//! Builds the broker and everything attached to it, and owns the background
//! tasks.
//!
//! ```text
//!   LedgerPublisher ─┐                        ┌─► EventConsole
//!   ScanPublisher ───┤                        ├─► Toaster
//!   FlowAnimator ────┼──► EventBroker ────────┼─► metrics bridge ─► Prometheus
//!   Generator ───────┘        │               │
//!                             └─ watch_metrics ─► StatusPanel
//! ```
//!
//! ## Shutdown Sequence
//!
//! 1. Stop the synthetic generator
//! 2. Detach the consumers
//! 3. Signal the background tasks
//! 4. Close the broker
//! 5. Wait for tasks, aborting stragglers

pub mod demo;
pub mod metrics_bridge;

use std::sync::Arc;
use std::time::Duration;

use chaintrack_bus::{EventBroker, EventPublisher, GeneratorHandle, SyntheticTrafficGenerator};
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::adapters::{InMemoryLedger, LedgerPort, LedgerPublisher, ScanPublisher};
use crate::config::RuntimeConfig;
use crate::consumers::{EventConsole, FlowAnimator, StatusPanel, Toaster};
use crate::error::RuntimeError;

pub use demo::{DemoAction, DemoDriver};
pub use metrics_bridge::{run_metrics_bridge, MetricsBridge, Recorded};

/// How long shutdown waits for each background task.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// The dashboard runtime.
pub struct DashboardRuntime {
    config: RuntimeConfig,
    broker: Arc<EventBroker>,
    ledger: LedgerPublisher,
    scanner: ScanPublisher,
    console: Arc<EventConsole>,
    toaster: Arc<Toaster>,
    flow: Arc<FlowAnimator>,
    generator: Mutex<Option<GeneratorHandle>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    started: Mutex<bool>,
    /// Shutdown signal sender.
    shutdown_tx: watch::Sender<bool>,
    /// Shutdown signal receiver.
    shutdown_rx: watch::Receiver<bool>,
}

impl DashboardRuntime {
    /// Build the runtime over an in-memory ledger.
    ///
    /// # Errors
    ///
    /// Invalid configuration.
    pub fn new(config: RuntimeConfig) -> Result<Self, RuntimeError> {
        Self::with_ledger(config, Arc::new(InMemoryLedger::new()))
    }

    /// Build the runtime over a given ledger port.
    ///
    /// # Errors
    ///
    /// Invalid configuration.
    pub fn with_ledger(
        config: RuntimeConfig,
        ledger: Arc<dyn LedgerPort>,
    ) -> Result<Self, RuntimeError> {
        info!("Creating ChainTrack dashboard runtime");
        config.validate()?;

        let selector = config
            .topic_policy
            .clone()
            .into_selector(config.generator.seed);
        let broker = Arc::new(EventBroker::with_selector(config.bus.clone(), selector)?);
        let publisher: Arc<dyn EventPublisher> = broker.clone();

        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        Ok(Self {
            ledger: LedgerPublisher::new(ledger, Arc::clone(&publisher)),
            scanner: ScanPublisher::new(Arc::clone(&publisher)),
            flow: Arc::new(FlowAnimator::new(publisher)),
            console: Arc::new(EventConsole::new(
                Arc::clone(&broker),
                config.console_filter,
            )),
            toaster: Arc::new(Toaster::new(Arc::clone(&broker))),
            generator: Mutex::new(None),
            tasks: Mutex::new(Vec::new()),
            started: Mutex::new(false),
            broker,
            config,
            shutdown_tx,
            shutdown_rx,
        })
    }

    /// Attach consumers and start the background tasks.
    ///
    /// ## Startup Sequence
    ///
    /// 1. Attach the console and the toaster
    /// 2. Start the status panel and the metrics bridge
    /// 3. Start the synthetic generator
    /// 4. Start demo traffic, if enabled
    ///
    /// # Errors
    ///
    /// `AlreadyStarted` on a second call; broker or generator errors.
    pub async fn start(&self) -> Result<(), RuntimeError> {
        {
            let mut started = self.started.lock();
            if *started {
                return Err(RuntimeError::AlreadyStarted);
            }
            *started = true;
        }

        info!("===========================================");
        info!("  ChainTrack Dashboard Runtime v{}", env!("CARGO_PKG_VERSION"));
        info!("===========================================");

        self.console.attach()?;
        self.toaster.attach()?;

        let panel = StatusPanel::new(self.broker.watch_metrics());
        self.spawn(panel.run(self.shutdown_rx.clone()));

        let broker = Arc::clone(&self.broker);
        let shutdown = self.shutdown_rx.clone();
        self.spawn(async move {
            if let Err(e) = run_metrics_bridge(broker, shutdown).await {
                warn!(error = %e, "Metrics bridge did not start");
            }
        });

        let generator =
            SyntheticTrafficGenerator::new(Arc::clone(&self.broker), self.config.generator.clone())?
                .spawn()?;
        *self.generator.lock() = Some(generator);

        if self.config.demo_traffic {
            let driver = DemoDriver::new(
                self.ledger.clone(),
                self.scanner.clone(),
                Arc::clone(&self.flow),
            );
            self.spawn(driver.run(self.config.demo_interval(), self.shutdown_rx.clone()));
        }

        info!(
            topics = self.broker.topics().len(),
            log_capacity = self.config.bus.log_capacity,
            generator_active = self.broker.is_active(),
            demo_traffic = self.config.demo_traffic,
            "Dashboard runtime started"
        );
        Ok(())
    }

    /// Shut down in order. Idempotent.
    pub async fn shutdown(&self) {
        info!("Initiating graceful shutdown...");

        let generator = self.generator.lock().take();
        if let Some(generator) = generator {
            info!(fired = generator.fired(), "Stopping synthetic generator");
            generator.stop().await;
        }

        // Detaching waits out in-flight callbacks on a blocking thread.
        let console = Arc::clone(&self.console);
        let toaster = Arc::clone(&self.toaster);
        let detached = tokio::task::spawn_blocking(move || (console.detach(), toaster.detach()));
        match detached.await {
            Ok((console, toaster)) => info!(console, toaster, "Consumers detached"),
            Err(e) => error!(error = %e, "Detaching consumers failed"),
        }

        if let Err(e) = self.shutdown_tx.send(true) {
            error!("Failed to send shutdown signal: {}", e);
        }
        self.broker.shutdown();

        let tasks = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            let abort = task.abort_handle();
            if tokio::time::timeout(SHUTDOWN_GRACE, task).await.is_err() {
                warn!("Background task did not stop in time, aborting");
                abort.abort();
            }
        }

        let metrics = self.broker.metrics();
        info!(
            total_published = metrics.total_published,
            dispatch_failures = metrics.dispatch_failures,
            dropped_deliveries = metrics.dropped_deliveries,
            "Shutdown complete"
        );
    }

    fn spawn<F>(&self, task: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        self.tasks.lock().push(tokio::spawn(task));
    }

    /// The broker.
    #[must_use]
    pub fn broker(&self) -> Arc<EventBroker> {
        Arc::clone(&self.broker)
    }

    /// Publishing ledger adapter.
    #[must_use]
    pub fn ledger(&self) -> &LedgerPublisher {
        &self.ledger
    }

    /// Label scanner.
    #[must_use]
    pub fn scanner(&self) -> &ScanPublisher {
        &self.scanner
    }

    /// Event console.
    #[must_use]
    pub fn console(&self) -> Arc<EventConsole> {
        Arc::clone(&self.console)
    }

    /// Toast stack.
    #[must_use]
    pub fn toaster(&self) -> Arc<Toaster> {
        Arc::clone(&self.toaster)
    }

    /// Flow walkthrough.
    #[must_use]
    pub fn flow(&self) -> Arc<FlowAnimator> {
        Arc::clone(&self.flow)
    }

    /// Effective configuration.
    #[must_use]
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Whether `shutdown` has been called.
    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        *self.shutdown_rx.borrow()
    }
}

impl std::fmt::Debug for DashboardRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DashboardRuntime")
            .field("broker", &self.broker)
            .field("tasks", &self.tasks.lock().len())
            .finish_non_exhaustive()
    }
}
