//! The seam between sessions and the broker.

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{SessionError, SessionResult};

/// Delivery guarantee of a publish or subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QoS {
    AtMostOnce,
    AtLeastOnce,
    ExactlyOnce,
}

impl From<QoS> for rumqttc::QoS {
    fn from(qos: QoS) -> Self {
        match qos {
            QoS::AtMostOnce => rumqttc::QoS::AtMostOnce,
            QoS::AtLeastOnce => rumqttc::QoS::AtLeastOnce,
            QoS::ExactlyOnce => rumqttc::QoS::ExactlyOnce,
        }
    }
}

/// Message the broker publishes on our behalf when the link drops
/// without an orderly disconnect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Will {
    pub topic: String,
    pub qos: QoS,
    pub retain: bool,
    pub payload: Vec<u8>,
}

/// Events a link emits, in network-arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// A connection (initial or after a reconnect) was accepted.
    Connected,
    /// The connection was lost; reconnects are attempted automatically.
    Disconnected,
    /// An application message on one of our subscriptions.
    Message { topic: String, payload: Vec<u8> },
}

/// A broker connection as seen by a session.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Publish and wait for the broker's acknowledgement.
    ///
    /// Fails immediately with `NotConnected` while the link is down.
    async fn publish(
        &self,
        topic: &str,
        qos: QoS,
        retain: bool,
        payload: Vec<u8>,
    ) -> SessionResult<()>;

    /// Subscribe and wait for the broker to grant it.
    async fn subscribe(&self, filter: &str, qos: QoS) -> SessionResult<()>;

    /// Orderly disconnect, waiting at most `grace` for in-flight deliveries.
    async fn disconnect(&self, grace: Duration) -> SessionResult<()>;

    fn is_connected(&self) -> bool;
}

// ── Mock ───────────────────────────────────────────────────────────

/// One publish recorded by [`MockTransport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Published {
    pub topic: String,
    pub qos: QoS,
    pub retain: bool,
    pub payload: Vec<u8>,
}

impl Published {
    pub fn json(&self) -> serde_json::Value {
        serde_json::from_slice(&self.payload).unwrap_or(serde_json::Value::Null)
    }
}

/// In-memory transport for tests.
///
/// Starts disconnected. Publishes and subscriptions succeed only while
/// connected and are recorded in call order.
#[derive(Debug, Default)]
pub struct MockTransport {
    connected: AtomicBool,
    published: Mutex<Vec<Published>>,
    subscriptions: Mutex<Vec<(String, QoS)>>,
    disconnects: AtomicUsize,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connected() -> Self {
        let mock = Self::default();
        mock.set_connected(true);
        mock
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    pub fn published(&self) -> Vec<Published> {
        self.published
            .lock()
            .map(|p| p.clone())
            .unwrap_or_default()
    }

    /// Publishes to one topic, oldest first.
    pub fn published_to(&self, topic: &str) -> Vec<Published> {
        self.published()
            .into_iter()
            .filter(|p| p.topic == topic)
            .collect()
    }

    pub fn subscriptions(&self) -> Vec<(String, QoS)> {
        self.subscriptions
            .lock()
            .map(|s| s.clone())
            .unwrap_or_default()
    }

    pub fn disconnects(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }

    pub fn clear(&self) {
        if let Ok(mut published) = self.published.lock() {
            published.clear();
        }
        if let Ok(mut subscriptions) = self.subscriptions.lock() {
            subscriptions.clear();
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn publish(
        &self,
        topic: &str,
        qos: QoS,
        retain: bool,
        payload: Vec<u8>,
    ) -> SessionResult<()> {
        if !self.is_connected() {
            return Err(SessionError::NotConnected);
        }
        let mut published = self
            .published
            .lock()
            .map_err(|e| SessionError::Client(e.to_string()))?;
        published.push(Published {
            topic: topic.to_string(),
            qos,
            retain,
            payload,
        });
        Ok(())
    }

    async fn subscribe(&self, filter: &str, qos: QoS) -> SessionResult<()> {
        if !self.is_connected() {
            return Err(SessionError::NotConnected);
        }
        let mut subscriptions = self
            .subscriptions
            .lock()
            .map_err(|e| SessionError::Client(e.to_string()))?;
        subscriptions.push((filter.to_string(), qos));
        Ok(())
    }

    async fn disconnect(&self, _grace: Duration) -> SessionResult<()> {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        self.set_connected(false);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}
