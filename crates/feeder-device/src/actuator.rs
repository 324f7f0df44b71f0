//! Feeding actuator.
//!
//! Actuators are fail-silent: hardware faults are logged by the
//! implementation and never surface to the orchestrator.

use feeder_core::Direction;
use tracing::{debug, info};

pub trait Actuator: Send {
    /// Start turning. Keeps turning until [`Actuator::stop`].
    fn start_feed(&mut self, direction: Direction);

    /// Stop turning. A no-op when already stopped.
    fn stop(&mut self);

    /// Release the hardware. Stops first if still turning.
    fn close(&mut self);
}

/// Actuator for hosts without servo hardware; it only logs.
#[derive(Debug)]
pub struct LoggingActuator {
    pin: u8,
    rotating: Option<Direction>,
    closed: bool,
}

impl LoggingActuator {
    pub fn new(pin: u8) -> Self {
        info!(pin, "servo driver initialised without hardware");
        Self {
            pin,
            rotating: None,
            closed: false,
        }
    }

    pub fn rotating(&self) -> Option<Direction> {
        self.rotating
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl Actuator for LoggingActuator {
    fn start_feed(&mut self, direction: Direction) {
        debug!(pin = self.pin, ?direction, "servo rotating");
        self.rotating = Some(direction);
    }

    fn stop(&mut self) {
        if self.rotating.take().is_some() {
            debug!(pin = self.pin, "servo rotation stopped");
        }
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.stop();
        self.closed = true;
        info!(pin = self.pin, "servo driver closed");
    }
}
