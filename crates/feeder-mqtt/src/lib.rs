//! feeder-mqtt — broker sessions for the feeder pipeline.
//!
//! Devices and the backend never talk to each other directly. Each side
//! holds one broker link and runs one dispatch loop over the events the
//! link emits.
//!
//! # Architecture
//!
//! ```text
//! Backend
//!   └── BackendSession
//!       ├── subscribes feeder/+/status   (QoS 1)
//!       ├── subscribes feeder/+/feed_log (QoS 2)
//!       └── publishes  feeder/{id}/feed  (QoS 2)
//!
//! Device
//!   └── DeviceSession
//!       ├── last will  feeder/{id}/status offline (QoS 1, retained)
//!       ├── publishes  feeder/{id}/status online  (QoS 1, retained)
//!       ├── subscribes feeder/{id}/feed           (QoS 2)
//!       └── publishes  feeder/{id}/feed_log       (QoS 2)
//! ```
//!
//! Both sessions talk to the broker through the [`Transport`] trait.
//! [`MqttLink`] is the production implementation; [`MockTransport`]
//! stands in for a broker in tests.

pub mod backend;
pub mod device;
pub mod error;
pub mod link;
pub mod transport;

pub use backend::{BackendHandler, BackendSession};
pub use device::{DeviceHandler, DeviceSession};
pub use error::{SessionError, SessionResult};
pub use link::MqttLink;
pub use transport::{LinkEvent, MockTransport, Published, QoS, Transport, Will};

use std::time::Duration;

/// Upper bound on waiting for in-flight deliveries when stopping a session.
pub const STOP_GRACE: Duration = Duration::from_secs(20);
