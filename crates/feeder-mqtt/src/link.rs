//! MqttLink — rumqttc-backed [`Transport`].
//!
//! The rumqttc event loop runs in a dedicated driver task. The driver
//! turns network traffic into [`LinkEvent`]s and completes the waiters of
//! publishes and subscriptions when the broker acknowledges them.
//!
//! Acknowledgements are matched by packet id. rumqttc assigns the id when
//! the request leaves the client, so waiters are queued in submission
//! order and bound to an id on the matching `Outgoing` event.
//!
//! When a connection drops, rumqttc keeps the unacknowledged requests and
//! replays them after the next CONNACK. Their waiters have already failed,
//! so the driver discards those requests instead. Replayed packets would
//! otherwise consume the waiters of new requests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use feeder_core::MqttConfig;
use rumqttc::{
    AsyncClient, ConnectReturnCode, Event, EventLoop, LastWill, MqttOptions, Outgoing, Packet,
    SubscribeReasonCode,
};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{SessionError, SessionResult};
use crate::transport::{LinkEvent, QoS, Transport, Will};

/// Capacity of the request channel between client handle and event loop.
const REQUEST_CAPACITY: usize = 64;

/// Large enough for a feed-log backlog of several thousand entries.
const MAX_PACKET_SIZE: usize = 1 << 20;

const DRAIN_POLL: Duration = Duration::from_millis(50);

/// How long a disconnect waits for the driver task to wind down.
const DRIVER_EXIT: Duration = Duration::from_secs(2);

type Ack = oneshot::Sender<SessionResult<()>>;

struct PublishWaiter {
    qos: QoS,
    ack: Ack,
}

/// Waiters for broker acknowledgements.
#[derive(Default)]
struct Pending {
    queued_publishes: VecDeque<PublishWaiter>,
    publishes: HashMap<u16, Ack>,
    queued_subscribes: VecDeque<Ack>,
    subscribes: HashMap<u16, Ack>,
}

impl Pending {
    fn bind_publish(&mut self, pkid: u16) {
        let Some(waiter) = self.queued_publishes.pop_front() else {
            debug!(pkid, "outgoing publish without a waiter");
            return;
        };
        if waiter.qos == QoS::AtMostOnce {
            let _ = waiter.ack.send(Ok(()));
        } else if waiter.ack.is_closed() {
            debug!(pkid, "publish sent after its caller gave up");
        } else {
            self.publishes.insert(pkid, waiter.ack);
        }
    }

    fn resolve_publish(&mut self, pkid: u16) {
        if let Some(ack) = self.publishes.remove(&pkid) {
            let _ = ack.send(Ok(()));
        }
    }

    fn bind_subscribe(&mut self, pkid: u16) {
        if let Some(ack) = self.queued_subscribes.pop_front() {
            self.subscribes.insert(pkid, ack);
        }
    }

    fn resolve_subscribe(&mut self, pkid: u16, granted: bool) {
        if let Some(ack) = self.subscribes.remove(&pkid) {
            let result = if granted {
                Ok(())
            } else {
                Err(SessionError::Client(format!(
                    "subscription {pkid} rejected by broker"
                )))
            };
            let _ = ack.send(result);
        }
    }

    /// Fail every waiter; the broker will not acknowledge them on this connection.
    fn fail_all(&mut self) {
        let acks = self
            .queued_publishes
            .drain(..)
            .map(|w| w.ack)
            .chain(self.publishes.drain().map(|(_, ack)| ack))
            .chain(self.queued_subscribes.drain(..))
            .chain(self.subscribes.drain().map(|(_, ack)| ack));
        for ack in acks {
            let _ = ack.send(Err(SessionError::NotConnected));
        }
    }

    /// Publishes whose caller is still waiting for an acknowledgement.
    fn in_flight(&mut self) -> usize {
        self.publishes.retain(|_, ack| !ack.is_closed());
        self.queued_publishes
            .iter()
            .filter(|w| !w.ack.is_closed())
            .count()
            + self.publishes.len()
    }
}

/// State shared between the link handle and its driver task.
#[derive(Default)]
struct Shared {
    connected: AtomicBool,
    closing: AtomicBool,
    pending: Mutex<Pending>,
}

impl Shared {
    fn pending(&self) -> MutexGuard<'_, Pending> {
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Mark the link down and fail all waiters. Returns whether it was up.
    fn mark_down(&self) -> bool {
        let mut pending = self.pending();
        let was_up = self.connected.swap(false, Ordering::SeqCst);
        pending.fail_all();
        was_up
    }

    /// Mark the link down after a connection error and drop every request
    /// rumqttc would replay on reconnect. Returns whether it was up.
    ///
    /// Holds the waiter lock throughout, so no request can be submitted
    /// between failing the waiters and clearing the replay queue.
    fn reset(&self, eventloop: &mut EventLoop) -> bool {
        let mut pending = self.pending();
        let was_up = self.connected.swap(false, Ordering::SeqCst);
        pending.fail_all();
        eventloop.clean();
        let discarded = eventloop.pending.len();
        eventloop.pending.clear();
        if discarded > 0 {
            debug!(discarded, "dropped requests from the lost connection");
        }
        was_up
    }

    fn on_incoming(&self, packet: Packet, events: &mpsc::UnboundedSender<LinkEvent>) {
        match packet {
            Packet::ConnAck(ack) if ack.code == ConnectReturnCode::Success => {
                self.connected.store(true, Ordering::SeqCst);
                info!(session_present = ack.session_present, "connected to broker");
                let _ = events.send(LinkEvent::Connected);
            }
            Packet::Publish(publish) => {
                let _ = events.send(LinkEvent::Message {
                    topic: publish.topic,
                    payload: publish.payload.to_vec(),
                });
            }
            Packet::PubAck(ack) => self.pending().resolve_publish(ack.pkid),
            Packet::PubComp(comp) => self.pending().resolve_publish(comp.pkid),
            Packet::SubAck(ack) => {
                let granted = ack
                    .return_codes
                    .iter()
                    .all(|code| !matches!(code, SubscribeReasonCode::Failure));
                self.pending().resolve_subscribe(ack.pkid, granted);
            }
            _ => {}
        }
    }
}

/// Broker link backed by rumqttc with automatic reconnects.
pub struct MqttLink {
    client: AsyncClient,
    shared: Arc<Shared>,
    publish_timeout: Duration,
    driver: Mutex<Option<JoinHandle<()>>>,
}

impl MqttLink {
    /// Start connecting to the configured broker.
    ///
    /// Returns immediately; the first `LinkEvent::Connected` on the
    /// returned channel signals that the connection is up. Must be
    /// called from within a tokio runtime.
    pub fn connect(
        config: &MqttConfig,
        will: Option<Will>,
    ) -> SessionResult<(Self, mpsc::UnboundedReceiver<LinkEvent>)> {
        let broker = config
            .broker()
            .map_err(|e| SessionError::Client(e.to_string()))?;

        let mut options = MqttOptions::new(config.client_id.clone(), broker.host.clone(), broker.port);
        options.set_keep_alive(config.keep_alive());
        options.set_clean_session(true);
        options.set_max_packet_size(MAX_PACKET_SIZE, MAX_PACKET_SIZE);
        if let Some(username) = &config.username {
            options.set_credentials(username.clone(), config.password.clone().unwrap_or_default());
        }
        if let Some(will) = will {
            options.set_last_will(LastWill::new(
                will.topic,
                will.payload,
                will.qos.into(),
                will.retain,
            ));
        }

        let (client, eventloop) = AsyncClient::new(options, REQUEST_CAPACITY);
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared::default());

        let driver = tokio::spawn(drive(
            eventloop,
            Arc::clone(&shared),
            events_tx,
            config.connect_retry_delay(),
        ));

        info!(
            broker = %broker,
            client_id = %config.client_id,
            keep_alive = ?config.keep_alive(),
            "mqtt link started"
        );

        let link = Self {
            client,
            shared,
            publish_timeout: config.publish_timeout(),
            driver: Mutex::new(Some(driver)),
        };
        Ok((link, events_rx))
    }

    async fn await_ack(&self, rx: oneshot::Receiver<SessionResult<()>>) -> SessionResult<()> {
        match tokio::time::timeout(self.publish_timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(SessionError::NotConnected),
            Err(_) => Err(SessionError::Timeout(self.publish_timeout)),
        }
    }

    fn take_driver(&self) -> Option<JoinHandle<()>> {
        self.driver.lock().unwrap_or_else(|e| e.into_inner()).take()
    }
}

#[async_trait]
impl Transport for MqttLink {
    async fn publish(
        &self,
        topic: &str,
        qos: QoS,
        retain: bool,
        payload: Vec<u8>,
    ) -> SessionResult<()> {
        let rx = {
            // The waiter lock orders waiters like submissions and excludes a reset.
            let mut pending = self.shared.pending();
            if !self.is_connected() {
                return Err(SessionError::NotConnected);
            }
            self.client
                .try_publish(topic, qos.into(), retain, payload)
                .map_err(|e| SessionError::Client(e.to_string()))?;
            let (tx, rx) = oneshot::channel();
            pending.queued_publishes.push_back(PublishWaiter { qos, ack: tx });
            rx
        };
        self.await_ack(rx).await
    }

    async fn subscribe(&self, filter: &str, qos: QoS) -> SessionResult<()> {
        let rx = {
            let mut pending = self.shared.pending();
            if !self.is_connected() {
                return Err(SessionError::NotConnected);
            }
            self.client
                .try_subscribe(filter, qos.into())
                .map_err(|e| SessionError::Client(e.to_string()))?;
            let (tx, rx) = oneshot::channel();
            pending.queued_subscribes.push_back(tx);
            rx
        };
        self.await_ack(rx).await
    }

    async fn disconnect(&self, grace: Duration) -> SessionResult<()> {
        self.shared.closing.store(true, Ordering::SeqCst);

        let drained = tokio::time::timeout(grace, async {
            loop {
                let in_flight = self.shared.pending().in_flight();
                if in_flight == 0 {
                    break;
                }
                tokio::time::sleep(DRAIN_POLL).await;
            }
        })
        .await
        .is_ok();
        if !drained {
            warn!(
                in_flight = self.shared.pending().in_flight(),
                "disconnecting with deliveries still in flight"
            );
        }

        let connected = self.is_connected();
        let result = if connected {
            self.client
                .disconnect()
                .await
                .map_err(|e| SessionError::Client(e.to_string()))
        } else {
            Ok(())
        };

        if let Some(mut driver) = self.take_driver() {
            // A driver that is between reconnect attempts has nothing to flush.
            if !connected || tokio::time::timeout(DRIVER_EXIT, &mut driver).await.is_err() {
                driver.abort();
            }
        }
        self.shared.mark_down();
        info!("mqtt link closed");
        result
    }

    fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }
}

impl Drop for MqttLink {
    fn drop(&mut self) {
        if let Some(driver) = self.take_driver() {
            driver.abort();
        }
    }
}

/// Poll the event loop until the link is closed.
async fn drive(
    mut eventloop: EventLoop,
    shared: Arc<Shared>,
    events: mpsc::UnboundedSender<LinkEvent>,
    retry_delay: Duration,
) {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(packet)) => shared.on_incoming(packet, &events),
            Ok(Event::Outgoing(Outgoing::Publish(pkid))) => shared.pending().bind_publish(pkid),
            Ok(Event::Outgoing(Outgoing::Subscribe(pkid))) => {
                shared.pending().bind_subscribe(pkid)
            }
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                shared.mark_down();
                let _ = events.send(LinkEvent::Disconnected);
                break;
            }
            Ok(Event::Outgoing(_)) => {}
            Err(e) => {
                let was_up = shared.reset(&mut eventloop);
                if shared.closing.load(Ordering::SeqCst) {
                    break;
                }
                if was_up {
                    warn!(error = %e, "broker connection lost");
                    let _ = events.send(LinkEvent::Disconnected);
                } else {
                    debug!(error = %e, retry_in = ?retry_delay, "broker connection attempt failed");
                }
                tokio::time::sleep(retry_delay).await;
            }
        }
    }
    debug!("mqtt driver stopped");
}
