//! # Dashboard Runtime Integration Tests
//!
//! Drives the assembled runtime through its producers and checks what the
//! consumers and the log observe.

use std::time::Duration;

use chaintrack_bus::topics::{QR_SCANS, SHIPMENTS};
use chaintrack_bus::{ComponentStatus, EventFilter, EventType, Payload};
use chaintrack_runtime::adapters::{LabelPayload, RecordStatus};
use chaintrack_runtime::consumers::ConsoleFilter;
use chaintrack_runtime::{DashboardRuntime, RuntimeConfig, RuntimeError};

fn quiet_config() -> RuntimeConfig {
    let mut config = RuntimeConfig::default();
    config.bus.start_active = false;
    config.generator.seed = Some(1);
    config
}

async fn wait_until<F: Fn() -> bool>(condition: F) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

#[tokio::test]
async fn test_product_lifecycle_reaches_consumers() {
    let runtime = DashboardRuntime::new(quiet_config()).unwrap();
    runtime.start().await.unwrap();
    let broker = runtime.broker();

    let record = runtime
        .ledger()
        .create_record("Organic Coffee Beans", "Kenya")
        .await
        .unwrap();
    runtime
        .ledger()
        .update_status(record.id, RecordStatus::InTransit)
        .await
        .unwrap();
    let label = LabelPayload::from_record(&record).encode().unwrap();
    let scan = runtime.scanner().scan(&label).unwrap();
    assert_eq!(scan.event.topic, QR_SCANS);

    // SHIPMENT_UPDATE, AI_ANALYSIS, STATUS_CHANGE, QR_SCAN
    assert_eq!(broker.snapshot().len(), 4);
    let shipments = broker.snapshot_matching(&EventFilter::topics([SHIPMENTS]));
    assert_eq!(shipments.len(), 1);

    // The console sees every event; the toaster only QR_SCAN and AI_ANALYSIS.
    let console = runtime.console();
    wait_until(|| console.received() == 4).await;
    let toaster = runtime.toaster();
    wait_until(|| toaster.visible().len() == 2).await;
    let toast_types: Vec<EventType> = toaster.visible().iter().map(|t| t.event_type).collect();
    assert_eq!(toast_types, vec![EventType::QrScan, EventType::AiAnalysis]);

    console.set_filter(ConsoleFilter::Qr);
    let lines = console.lines(10);
    assert_eq!(lines.len(), 1);
    assert!(lines[0].contains(&format!("Product #{}", record.id)));

    let metrics = broker.metrics();
    assert_eq!(metrics.total_published, 4);
    assert_eq!(metrics.producer_status, ComponentStatus::Idle);
    assert_eq!(metrics.consumer_status, ComponentStatus::Active);

    runtime.shutdown().await;
}

#[tokio::test]
async fn test_start_twice_is_rejected() {
    let runtime = DashboardRuntime::new(quiet_config()).unwrap();
    runtime.start().await.unwrap();
    assert_eq!(runtime.start().await.unwrap_err(), RuntimeError::AlreadyStarted);
    runtime.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_stops_everything() {
    let runtime = DashboardRuntime::new(quiet_config()).unwrap();
    runtime.start().await.unwrap();
    let broker = runtime.broker();
    assert!(broker.subscriber_count() >= 2);

    runtime.shutdown().await;
    runtime.shutdown().await;

    assert!(runtime.is_shutting_down());
    assert!(broker.is_closed());
    assert_eq!(broker.subscriber_count(), 0);
    assert_eq!(broker.metrics().producer_status, ComponentStatus::Stopped);

    // Ledger calls still succeed; only the announcement is lost.
    let record = runtime.ledger().create_record("Tea", "Assam").await.unwrap();
    assert_eq!(record.id, 1);
    assert!(broker.snapshot().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_shutdown_under_load_detaches_consumers() {
    let runtime = DashboardRuntime::new(quiet_config()).unwrap();
    runtime.start().await.unwrap();
    let broker = runtime.broker();

    let producer = {
        let broker = broker.clone();
        tokio::spawn(async move {
            while broker
                .publish_event(EventType::ShipmentUpdate, Payload::new())
                .is_ok()
            {
                tokio::task::yield_now().await;
            }
        })
    };
    let console = runtime.console();
    wait_until(|| console.received() > 50).await;

    tokio::time::timeout(Duration::from_secs(5), runtime.shutdown())
        .await
        .expect("shutdown should finish while events are in flight");
    tokio::time::timeout(Duration::from_secs(1), producer)
        .await
        .unwrap()
        .unwrap();

    assert!(!console.is_attached());
    let settled = console.received();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(console.received(), settled);
}

#[tokio::test(start_paused = true)]
async fn test_generator_feeds_runtime_when_active() {
    let mut config = quiet_config();
    config.bus.start_active = true;
    let runtime = DashboardRuntime::new(config).unwrap();
    runtime.start().await.unwrap();

    tokio::time::sleep(Duration::from_secs(16)).await;
    let broker = runtime.broker();
    assert!(!broker.snapshot().is_empty());

    broker.set_active(false);
    runtime.shutdown().await;
}

#[tokio::test]
async fn test_invalid_topic_policy_is_rejected() {
    let config = RuntimeConfig {
        topic_policy: "fixed:nowhere".parse().unwrap(),
        ..quiet_config()
    };
    assert!(matches!(
        DashboardRuntime::new(config),
        Err(RuntimeError::Bus(_))
    ));
}
