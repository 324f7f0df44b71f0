//! Device session — the feeder's side of the broker conversation.
//!
//! Announces presence, receives feed commands and reports completed
//! feeds. Commands are handed to a [`DeviceHandler`] one at a time from
//! a single dispatch loop, so a handler never runs concurrently with
//! itself.

use std::sync::Arc;

use async_trait::async_trait;
use feeder_core::topics::{feed_log_topic, feed_topic, parse_topic, status_topic};
use feeder_core::{FeedCommand, FeedLogBatch, FeedLogMessage, PresenceMessage, TopicKind};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::STOP_GRACE;
use crate::error::{SessionError, SessionResult};
use crate::transport::{LinkEvent, QoS, Transport, Will};

/// Receives what the dispatch loop decodes for this device.
#[async_trait]
pub trait DeviceHandler: Send {
    /// Called after the session has announced itself on a new connection.
    async fn on_connected(&mut self) {}

    /// A valid feed command addressed to this device.
    async fn on_feed(&mut self, command: FeedCommand);
}

/// Cloneable handle on the device's broker session.
#[derive(Clone)]
pub struct DeviceSession {
    transport: Arc<dyn Transport>,
    client_id: String,
    software_version: String,
}

impl DeviceSession {
    pub fn new(
        transport: Arc<dyn Transport>,
        client_id: impl Into<String>,
        software_version: impl Into<String>,
    ) -> Self {
        Self {
            transport,
            client_id: client_id.into(),
            software_version: software_version.into(),
        }
    }

    /// Last will to register with the broker before connecting.
    pub fn last_will(client_id: &str, software_version: &str) -> SessionResult<Will> {
        let payload = serde_json::to_vec(&PresenceMessage::offline(software_version))
            .map_err(SessionError::Encode)?;
        Ok(Will {
            topic: status_topic(Some(client_id)),
            qos: QoS::AtLeastOnce,
            retain: true,
            payload,
        })
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }

    async fn publish_presence(&self, presence: PresenceMessage) -> SessionResult<()> {
        let payload = serde_json::to_vec(&presence).map_err(SessionError::Encode)?;
        self.transport
            .publish(
                &status_topic(Some(&self.client_id)),
                QoS::AtLeastOnce,
                true,
                payload,
            )
            .await
    }

    /// Announce online and subscribe to commands on a fresh connection.
    ///
    /// Failures are logged; the next reconnect repeats both steps.
    pub async fn on_connected(&self) {
        let client_id = &self.client_id;
        match self
            .publish_presence(PresenceMessage::online(&self.software_version))
            .await
        {
            Ok(()) => info!(%client_id, version = %self.software_version, "announced online"),
            Err(e) => warn!(%client_id, error = %e, "failed to announce online"),
        }

        let filter = feed_topic(Some(client_id));
        match self.transport.subscribe(&filter, QoS::ExactlyOnce).await {
            Ok(()) => debug!(%client_id, %filter, "subscribed to feed commands"),
            Err(e) => warn!(%client_id, %filter, error = %e, "failed to subscribe to feed commands"),
        }
    }

    /// Report completed feeds as one batch.
    pub async fn send_feed_log(&self, entries: &[FeedLogMessage]) -> SessionResult<()> {
        let batch = FeedLogBatch::new(entries.to_vec());
        let payload = serde_json::to_vec(&batch).map_err(SessionError::Encode)?;
        self.transport
            .publish(
                &feed_log_topic(Some(&self.client_id)),
                QoS::ExactlyOnce,
                false,
                payload,
            )
            .await?;
        debug!(client_id = %self.client_id, count = entries.len(), "feed log sent");
        Ok(())
    }

    /// Announce offline if possible, then disconnect.
    pub async fn stop(&self) -> SessionResult<()> {
        if let Err(e) = self
            .publish_presence(PresenceMessage::offline(&self.software_version))
            .await
        {
            debug!(client_id = %self.client_id, error = %e, "offline announcement skipped");
        }
        self.transport.disconnect(STOP_GRACE).await?;
        info!(client_id = %self.client_id, "device session stopped");
        Ok(())
    }

    /// Dispatch link events until shutdown or until the link goes away.
    pub async fn run<H: DeviceHandler>(
        &self,
        events: &mut mpsc::UnboundedReceiver<LinkEvent>,
        handler: &mut H,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!(client_id = %self.client_id, "device dispatch loop started");
        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                event = events.recv() => match event {
                    Some(LinkEvent::Connected) => {
                        self.on_connected().await;
                        handler.on_connected().await;
                    }
                    Some(LinkEvent::Disconnected) => {
                        warn!(client_id = %self.client_id, "broker link down");
                    }
                    Some(LinkEvent::Message { topic, payload }) => {
                        self.dispatch(&topic, &payload, handler).await;
                    }
                    None => break,
                },
            }
        }
        info!(client_id = %self.client_id, "device dispatch loop stopped");
    }

    async fn dispatch<H: DeviceHandler>(&self, topic: &str, payload: &[u8], handler: &mut H) {
        match parse_topic(topic) {
            Ok((client_id, TopicKind::Feed)) if client_id == self.client_id => {}
            _ => {
                debug!(%topic, "ignoring message on unexpected topic");
                return;
            }
        }

        let command: FeedCommand = match serde_json::from_slice(payload) {
            Ok(command) => command,
            Err(e) => {
                warn!(%topic, error = %e, "dropping malformed feed command");
                return;
            }
        };
        if !command.is_valid() {
            warn!(%topic, portions = command.portions, "dropping feed command without portions");
            return;
        }

        debug!(%topic, portions = command.portions, "feed command received");
        handler.on_feed(command).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MockTransport;
    use chrono::{TimeZone, Utc};

    #[derive(Default)]
    struct Recorder {
        connects: usize,
        feeds: Vec<u32>,
    }

    #[async_trait]
    impl DeviceHandler for Recorder {
        async fn on_connected(&mut self) {
            self.connects += 1;
        }

        async fn on_feed(&mut self, command: FeedCommand) {
            self.feeds.push(command.portions);
        }
    }

    fn session(mock: &Arc<MockTransport>) -> DeviceSession {
        DeviceSession::new(mock.clone(), "rpi-01", "1.4.0")
    }

    fn message(topic: &str, body: &str) -> LinkEvent {
        LinkEvent::Message {
            topic: topic.to_string(),
            payload: body.as_bytes().to_vec(),
        }
    }

    /// Feed `events` through a dispatch loop and return the handler.
    async fn drive(session: &DeviceSession, events: Vec<LinkEvent>) -> Recorder {
        let (tx, mut rx) = mpsc::unbounded_channel();
        for event in events {
            tx.send(event).unwrap();
        }
        drop(tx);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut handler = Recorder::default();
        session.run(&mut rx, &mut handler, shutdown_rx).await;
        handler
    }

    #[test]
    fn last_will_is_retained_offline_presence() {
        let will = DeviceSession::last_will("rpi-01", "1.4.0").unwrap();
        assert_eq!(will.topic, "feeder/rpi-01/status");
        assert_eq!(will.qos, QoS::AtLeastOnce);
        assert!(will.retain);
        let body: serde_json::Value = serde_json::from_slice(&will.payload).unwrap();
        assert_eq!(body["status"], "offline");
        assert_eq!(body["softwareVersion"], "1.4.0");
    }

    #[tokio::test]
    async fn connect_announces_online_then_subscribes() {
        let mock = Arc::new(MockTransport::connected());
        let handler = drive(&session(&mock), vec![LinkEvent::Connected]).await;
        assert_eq!(handler.connects, 1);

        let status = mock.published_to("feeder/rpi-01/status");
        assert_eq!(status.len(), 1);
        assert_eq!(status[0].qos, QoS::AtLeastOnce);
        assert!(status[0].retain);
        assert_eq!(status[0].json()["status"], "online");

        assert_eq!(
            mock.subscriptions(),
            vec![("feeder/rpi-01/feed".to_string(), QoS::ExactlyOnce)]
        );
    }

    #[tokio::test]
    async fn subscribe_failure_is_not_retried() {
        let mock = Arc::new(MockTransport::new());
        let handler = drive(&session(&mock), vec![LinkEvent::Connected]).await;
        assert_eq!(handler.connects, 1);
        assert!(mock.subscriptions().is_empty());
        assert!(mock.published().is_empty());
    }

    #[tokio::test]
    async fn commands_dispatch_in_arrival_order() {
        let mock = Arc::new(MockTransport::connected());
        let handler = drive(
            &session(&mock),
            vec![
                message("feeder/rpi-01/feed", r#"{"portions":2}"#),
                message("feeder/rpi-01/feed", r#"{"portions":5}"#),
                message("feeder/rpi-01/feed", r#"{"portions":1}"#),
            ],
        )
        .await;
        assert_eq!(handler.feeds, vec![2, 5, 1]);
    }

    #[tokio::test]
    async fn malformed_and_foreign_commands_are_dropped() {
        let mock = Arc::new(MockTransport::connected());
        let handler = drive(
            &session(&mock),
            vec![
                message("feeder/rpi-01/feed", "not json"),
                message("feeder/rpi-01/feed", r#"{"portions":0}"#),
                message("feeder/rpi-02/feed", r#"{"portions":3}"#),
                message("feeder/rpi-01/status", r#"{"portions":3}"#),
                message("feeder/rpi-01/feed", r#"{"portions":4}"#),
            ],
        )
        .await;
        assert_eq!(handler.feeds, vec![4]);
    }

    #[tokio::test]
    async fn feed_log_is_one_exactly_once_batch() {
        let mock = Arc::new(MockTransport::connected());
        let ts = Utc.with_ymd_and_hms(2024, 6, 1, 7, 0, 0).unwrap();
        let entries = vec![
            FeedLogMessage { portions: 2, timestamp: ts },
            FeedLogMessage { portions: 1, timestamp: ts },
        ];
        session(&mock).send_feed_log(&entries).await.unwrap();

        let sent = mock.published_to("feeder/rpi-01/feed_log");
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].qos, QoS::ExactlyOnce);
        assert!(!sent[0].retain);
        let batch: FeedLogBatch = serde_json::from_slice(&sent[0].payload).unwrap();
        assert_eq!(batch.value, entries);
    }

    #[tokio::test]
    async fn feed_log_fails_when_disconnected() {
        let mock = Arc::new(MockTransport::new());
        let ts = Utc.with_ymd_and_hms(2024, 6, 1, 7, 0, 0).unwrap();
        let result = session(&mock)
            .send_feed_log(&[FeedLogMessage { portions: 1, timestamp: ts }])
            .await;
        assert!(matches!(result, Err(SessionError::NotConnected)));
    }

    #[tokio::test]
    async fn stop_announces_offline_and_disconnects() {
        let mock = Arc::new(MockTransport::connected());
        session(&mock).stop().await.unwrap();
        let status = mock.published_to("feeder/rpi-01/status");
        assert_eq!(status[0].json()["status"], "offline");
        assert_eq!(mock.disconnects(), 1);
    }

    #[tokio::test]
    async fn stop_while_offline_still_disconnects() {
        let mock = Arc::new(MockTransport::new());
        session(&mock).stop().await.unwrap();
        assert!(mock.published().is_empty());
        assert_eq!(mock.disconnects(), 1);
    }

    #[tokio::test]
    async fn run_exits_on_shutdown() {
        let mock = Arc::new(MockTransport::connected());
        let (_tx, mut rx) = mpsc::unbounded_channel::<LinkEvent>();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        shutdown_tx.send(true).unwrap();
        let mut handler = Recorder::default();
        session(&mock).run(&mut rx, &mut handler, shutdown_rx).await;
        assert_eq!(handler.connects, 0);
    }
}
