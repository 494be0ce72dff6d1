//! Pipeline walkthrough.
//!
//! Steps a cursor through the stages an event passes, then publishes a
//! real `AI_ANALYSIS` event so the walkthrough shows up everywhere else.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chaintrack_bus::topics::PREDICTIONS;
use chaintrack_bus::{BrokerError, Event, EventPublisher, EventType, PublishRequest};
use tokio::sync::watch;
use tracing::{debug, info};

/// Source tag for walkthrough events.
pub const FLOW_SOURCE: &str = "flow-visualizer";

/// Default dwell per stage.
pub const STEP_DELAY: Duration = Duration::from_millis(800);

/// Stage of the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowStep {
    /// The dashboard action that starts it.
    Source,
    /// The publishing adapter.
    Producer,
    /// Topic routing.
    Topic,
    /// Subscriber delivery.
    Consumer,
    /// Presentation.
    Dashboard,
}

impl FlowStep {
    /// Stages in order.
    pub const ALL: [FlowStep; 5] = [
        Self::Source,
        Self::Producer,
        Self::Topic,
        Self::Consumer,
        Self::Dashboard,
    ];

    /// Display label.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Source => "Event Source",
            Self::Producer => "Producer",
            Self::Topic => "Topic",
            Self::Consumer => "Consumer",
            Self::Dashboard => "Dashboard",
        }
    }
}

impl fmt::Display for FlowStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Drives the walkthrough. One run at a time.
pub struct FlowAnimator {
    publisher: Arc<dyn EventPublisher>,
    step_delay: Duration,
    current: watch::Sender<Option<FlowStep>>,
    running: AtomicBool,
}

impl FlowAnimator {
    /// Create an animator with the default dwell.
    pub fn new(publisher: Arc<dyn EventPublisher>) -> Self {
        Self::with_step_delay(publisher, STEP_DELAY)
    }

    /// Create an animator with a custom dwell per stage.
    pub fn with_step_delay(publisher: Arc<dyn EventPublisher>, step_delay: Duration) -> Self {
        Self {
            publisher,
            step_delay,
            current: watch::Sender::new(None),
            running: AtomicBool::new(false),
        }
    }

    /// Stage currently highlighted, `None` between runs.
    #[must_use]
    pub fn current(&self) -> Option<FlowStep> {
        *self.current.borrow()
    }

    /// Follow stage changes.
    #[must_use]
    pub fn watch_steps(&self) -> watch::Receiver<Option<FlowStep>> {
        self.current.subscribe()
    }

    /// Walk every stage, publish the analysis event, then clear the cursor.
    ///
    /// Returns `Ok(None)` if a run is already in progress.
    ///
    /// # Errors
    ///
    /// The broker's publish error. The cursor is cleared either way.
    pub async fn trigger(&self) -> Result<Option<Arc<Event>>, BrokerError> {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("Flow walkthrough already running");
            return Ok(None);
        }
        let run = RunGuard(self);

        for step in FlowStep::ALL {
            self.current.send_replace(Some(step));
            tokio::time::sleep(self.step_delay).await;
        }

        let published = self.publisher.publish(
            PublishRequest::new(EventType::AiAnalysis)
                .field("action", "FLOW_DEMO")
                .field("stages", FlowStep::ALL.len())
                .source(FLOW_SOURCE)
                .topic(PREDICTIONS),
        );
        drop(run);

        let event = published?;
        info!(event_id = %event.id, "Flow walkthrough published analysis event");
        Ok(Some(event))
    }
}

/// Clears the cursor and the running flag, also when a run is cancelled.
struct RunGuard<'a>(&'a FlowAnimator);

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.current.send_replace(None);
        self.0.running.store(false, Ordering::Release);
    }
}

impl fmt::Debug for FlowAnimator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlowAnimator")
            .field("step_delay", &self.step_delay)
            .field("current", &self.current())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chaintrack_bus::{BusConfig, EventBroker};

    #[tokio::test(start_paused = true)]
    async fn test_trigger_walks_all_steps_then_publishes() {
        let broker = Arc::new(EventBroker::new(BusConfig::default()).unwrap());
        let animator = Arc::new(FlowAnimator::new(broker.clone()));
        let mut steps = animator.watch_steps();

        let runner = Arc::clone(&animator);
        let run = tokio::spawn(async move { runner.trigger().await });

        let mut seen = Vec::new();
        while seen.len() < FlowStep::ALL.len() {
            steps.changed().await.unwrap();
            if let Some(step) = *steps.borrow_and_update() {
                seen.push(step);
            }
        }
        assert_eq!(seen, FlowStep::ALL.to_vec());
        assert!(broker.snapshot().is_empty());

        let event = run.await.unwrap().unwrap().unwrap();
        assert_eq!(event.event_type, EventType::AiAnalysis);
        assert_eq!(event.source, FLOW_SOURCE);
        assert_eq!(event.topic, PREDICTIONS);
        assert_eq!(animator.current(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_overlapping_trigger_is_ignored() {
        let broker = Arc::new(EventBroker::new(BusConfig::default()).unwrap());
        let animator = Arc::new(FlowAnimator::with_step_delay(broker.clone(), Duration::from_millis(10)));

        let (first, second) = tokio::join!(animator.trigger(), animator.trigger());
        let published = [first.unwrap(), second.unwrap()]
            .into_iter()
            .flatten()
            .count();
        assert_eq!(published, 1);
        assert_eq!(broker.snapshot().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_closed_broker_clears_cursor() {
        let broker = Arc::new(EventBroker::new(BusConfig::default()).unwrap());
        let animator = FlowAnimator::with_step_delay(broker.clone(), Duration::from_millis(1));
        broker.shutdown();

        assert_eq!(animator.trigger().await.unwrap_err(), BrokerError::Closed);
        assert_eq!(animator.current(), None);
        assert_eq!(animator.trigger().await.unwrap_err(), BrokerError::Closed);
    }
}
