//! Backend session — listens to every feeder and sends feed commands.

use std::sync::Arc;

use async_trait::async_trait;
use feeder_core::topics::{feed_log_topic, feed_topic, parse_topic, status_topic};
use feeder_core::{FeedCommand, FeedLogBatch, FeedLogPayload, PresenceMessage, TopicKind};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::STOP_GRACE;
use crate::error::{SessionError, SessionResult};
use crate::transport::{LinkEvent, QoS, Transport};

/// Receives decoded messages from all feeders.
#[async_trait]
pub trait BackendHandler: Send + Sync {
    async fn on_presence(&self, client_id: &str, presence: PresenceMessage);

    async fn on_feed_log(&self, client_id: &str, batch: FeedLogBatch);
}

#[derive(Clone)]
pub struct BackendSession {
    transport: Arc<dyn Transport>,
}

impl BackendSession {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    pub fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }

    /// Subscribe to presence and feed logs of every feeder.
    pub async fn on_connected(&self) {
        for (filter, qos) in [
            (status_topic(None), QoS::AtLeastOnce),
            (feed_log_topic(None), QoS::ExactlyOnce),
        ] {
            match self.transport.subscribe(&filter, qos).await {
                Ok(()) => debug!(%filter, ?qos, "subscribed"),
                Err(e) => warn!(%filter, error = %e, "subscription failed"),
            }
        }
    }

    /// Ask one feeder to dispense.
    pub async fn send_feed_command(
        &self,
        client_id: &str,
        command: FeedCommand,
    ) -> SessionResult<()> {
        let payload = serde_json::to_vec(&command).map_err(SessionError::Encode)?;
        self.transport
            .publish(&feed_topic(Some(client_id)), QoS::ExactlyOnce, false, payload)
            .await?;
        info!(%client_id, portions = command.portions, "feed command sent");
        Ok(())
    }

    pub async fn stop(&self) -> SessionResult<()> {
        self.transport.disconnect(STOP_GRACE).await?;
        info!("backend session stopped");
        Ok(())
    }

    /// Dispatch link events until shutdown or until the link goes away.
    pub async fn run<H: BackendHandler>(
        &self,
        events: &mut mpsc::UnboundedReceiver<LinkEvent>,
        handler: &H,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!("backend dispatch loop started");
        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                event = events.recv() => match event {
                    Some(LinkEvent::Connected) => self.on_connected().await,
                    Some(LinkEvent::Disconnected) => warn!("broker link down"),
                    Some(LinkEvent::Message { topic, payload }) => {
                        self.dispatch(&topic, &payload, handler).await;
                    }
                    None => break,
                },
            }
        }
        info!("backend dispatch loop stopped");
    }

    async fn dispatch<H: BackendHandler>(&self, topic: &str, payload: &[u8], handler: &H) {
        let (client_id, kind) = match parse_topic(topic) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!(error = %e, "dropping message on unparseable topic");
                return;
            }
        };

        match kind {
            TopicKind::Status => match serde_json::from_slice::<PresenceMessage>(payload) {
                Ok(presence) => handler.on_presence(client_id, presence).await,
                Err(e) => warn!(%client_id, error = %e, "dropping malformed presence"),
            },
            TopicKind::FeedLog => match serde_json::from_slice::<FeedLogPayload>(payload) {
                Ok(body) => handler.on_feed_log(client_id, body.into_batch()).await,
                Err(e) => warn!(%client_id, error = %e, "dropping malformed feed log"),
            },
            TopicKind::Feed => debug!(%client_id, "ignoring feed command echo"),
        }
    }
}
