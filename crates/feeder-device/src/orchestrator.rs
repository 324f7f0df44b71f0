//! FeedOrchestrator — runs feeds and accounts for them.
//!
//! A feed turns the actuator for `portions × portion` and then produces
//! exactly one feed-log entry. The entry is sent right away; if that
//! fails it goes to the durable buffer and is flushed on the next
//! connection.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use feeder_core::{Direction, FeedCommand, FeedLogMessage};
use feeder_mqtt::{DeviceHandler, DeviceSession};
use feeder_state::FeedBuffer;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::actuator::Actuator;
use crate::error::DeviceResult;
use crate::flush::{FlushOutcome, flush_backlog};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedState {
    Idle,
    Feeding,
}

/// What happened to a feed's log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedOutcome {
    /// Sent to the backend immediately.
    Delivered,
    /// Stored in the buffer under this id.
    Buffered(u64),
    /// Shutdown cut the feed short; nothing was logged.
    Interrupted,
}

pub struct FeedOrchestrator<A: Actuator> {
    session: DeviceSession,
    buffer: FeedBuffer,
    actuator: A,
    portion: Duration,
    shutdown: watch::Receiver<bool>,
    state: FeedState,
}

impl<A: Actuator> FeedOrchestrator<A> {
    pub fn new(
        session: DeviceSession,
        buffer: FeedBuffer,
        actuator: A,
        portion: Duration,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            session,
            buffer,
            actuator,
            portion,
            shutdown,
            state: FeedState::Idle,
        }
    }

    pub fn state(&self) -> FeedState {
        self.state
    }

    pub fn buffer(&self) -> &FeedBuffer {
        &self.buffer
    }

    pub fn actuator(&self) -> &A {
        &self.actuator
    }

    /// Dispense `portions` portions and log the feed.
    pub async fn feed(&mut self, portions: u32) -> DeviceResult<FeedOutcome> {
        let hold = self.portion.saturating_mul(portions);
        info!(portions, ?hold, "feeding");

        self.state = FeedState::Feeding;
        self.actuator.start_feed(Direction::Clockwise);
        let interrupted = self.hold(hold).await;
        self.actuator.stop();
        self.state = FeedState::Idle;

        if interrupted {
            warn!(portions, "feed interrupted by shutdown, not logged");
            return Ok(FeedOutcome::Interrupted);
        }

        let entry = FeedLogMessage {
            portions,
            timestamp: Utc::now(),
        };
        match self.session.send_feed_log(std::slice::from_ref(&entry)).await {
            Ok(()) => {
                info!(portions, "fed");
                Ok(FeedOutcome::Delivered)
            }
            Err(e) => {
                let id = self.buffer.append(entry.portions, entry.timestamp)?;
                info!(portions, id, error = %e, "fed, feed log buffered");
                Ok(FeedOutcome::Buffered(id))
            }
        }
    }

    /// Sleep for `hold`. Returns true if shutdown cut it short.
    async fn hold(&mut self, hold: Duration) -> bool {
        if *self.shutdown.borrow() {
            return true;
        }
        tokio::select! {
            _ = tokio::time::sleep(hold) => false,
            _ = self.shutdown.changed() => true,
        }
    }

    /// Release everything in order: actuator, buffer, then the session.
    pub async fn shutdown(&mut self) -> DeviceResult<()> {
        self.actuator.stop();
        self.actuator.close();
        self.buffer.close();
        self.session.stop().await?;
        info!("feeder shut down");
        Ok(())
    }
}

#[async_trait]
impl<A: Actuator> DeviceHandler for FeedOrchestrator<A> {
    async fn on_connected(&mut self) {
        match flush_backlog(&self.session, &self.buffer).await {
            Ok(FlushOutcome::Empty) => debug!("no feed log backlog"),
            Ok(_) => {}
            Err(e) => error!(error = %e, "feed log backlog flush failed"),
        }
    }

    async fn on_feed(&mut self, command: FeedCommand) {
        if let Err(e) = self.feed(command.portions).await {
            error!(portions = command.portions, error = %e, "feed could not be accounted for");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use feeder_core::FeedLogBatch;
    use feeder_mqtt::MockTransport;
    use std::sync::Arc;
    use tokio::time::Instant;

    const PORTION: Duration = Duration::from_millis(1500);

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Op {
        Start(Direction),
        Stop,
        Close,
    }

    #[derive(Default)]
    struct RecordingActuator {
        ops: Vec<Op>,
    }

    impl Actuator for RecordingActuator {
        fn start_feed(&mut self, direction: Direction) {
            self.ops.push(Op::Start(direction));
        }

        fn stop(&mut self) {
            self.ops.push(Op::Stop);
        }

        fn close(&mut self) {
            self.ops.push(Op::Close);
        }
    }

    struct Harness {
        mock: Arc<MockTransport>,
        shutdown: watch::Sender<bool>,
        orchestrator: FeedOrchestrator<RecordingActuator>,
    }

    fn harness(connected: bool) -> Harness {
        let mock = Arc::new(MockTransport::new());
        mock.set_connected(connected);
        let session = DeviceSession::new(mock.clone(), "rpi-01", "1.0.0");
        let (shutdown, shutdown_rx) = watch::channel(false);
        let orchestrator = FeedOrchestrator::new(
            session,
            FeedBuffer::open_in_memory().unwrap(),
            RecordingActuator::default(),
            PORTION,
            shutdown_rx,
        );
        Harness {
            mock,
            shutdown,
            orchestrator,
        }
    }

    fn sent_batches(mock: &MockTransport) -> Vec<FeedLogBatch> {
        mock.published_to("feeder/rpi-01/feed_log")
            .iter()
            .map(|p| serde_json::from_slice(&p.payload).unwrap())
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn feed_holds_for_all_portions() {
        let mut h = harness(true);
        let started = Instant::now();
        let outcome = h.orchestrator.feed(3).await.unwrap();

        assert_eq!(outcome, FeedOutcome::Delivered);
        assert!(started.elapsed() >= PORTION * 3);
        assert_eq!(
            h.orchestrator.actuator().ops,
            vec![Op::Start(Direction::Clockwise), Op::Stop]
        );
        assert_eq!(h.orchestrator.state(), FeedState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn delivered_feed_sends_one_entry() {
        let mut h = harness(true);
        h.orchestrator.feed(2).await.unwrap();

        let batches = sent_batches(&h.mock);
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].value.len(), 1);
        assert_eq!(batches[0].value[0].portions, 2);
        assert!(h.orchestrator.buffer().is_empty().unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn undelivered_feed_is_buffered() {
        let mut h = harness(false);
        let outcome = h.orchestrator.feed(2).await.unwrap();

        assert!(matches!(outcome, FeedOutcome::Buffered(_)));
        let buffered = h.orchestrator.buffer().list_all().unwrap();
        assert_eq!(buffered.len(), 1);
        assert_eq!(buffered[0].portions, 2);
        assert!(h.mock.published().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_during_hold_stops_and_skips_log() {
        let mut h = harness(true);
        let shutdown = &h.shutdown;
        let orchestrator = &mut h.orchestrator;
        let (outcome, _) = tokio::join!(orchestrator.feed(10), async {
            tokio::time::sleep(PORTION).await;
            shutdown.send(true).unwrap();
        });

        assert_eq!(outcome.unwrap(), FeedOutcome::Interrupted);
        assert_eq!(
            h.orchestrator.actuator().ops,
            vec![Op::Start(Direction::Clockwise), Op::Stop]
        );
        assert!(h.mock.published().is_empty());
        assert!(h.orchestrator.buffer().is_empty().unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn connect_flushes_backlog() {
        let mut h = harness(false);
        h.orchestrator.on_feed(FeedCommand::new(2)).await;
        h.orchestrator.on_feed(FeedCommand::new(1)).await;
        assert_eq!(h.orchestrator.buffer().len().unwrap(), 2);

        h.mock.set_connected(true);
        h.orchestrator.on_connected().await;

        let batches = sent_batches(&h.mock);
        assert_eq!(batches.len(), 1);
        let portions: Vec<u32> = batches[0].value.iter().map(|m| m.portions).collect();
        assert_eq!(portions, vec![2, 1]);
        assert!(h.orchestrator.buffer().is_empty().unwrap());
    }

    #[tokio::test]
    async fn shutdown_releases_in_order() {
        let mut h = harness(true);
        h.orchestrator.shutdown().await.unwrap();

        assert_eq!(h.orchestrator.actuator().ops, vec![Op::Stop, Op::Close]);
        assert!(h.orchestrator.buffer().is_closed());
        assert_eq!(h.mock.disconnects(), 1);
        let status = h.mock.published_to("feeder/rpi-01/status");
        assert_eq!(status[0].json()["status"], "offline");
    }
}
