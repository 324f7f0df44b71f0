//! feeder-device — the runtime of a single feeder.
//!
//! [`FeedOrchestrator`] turns feed commands into actuator movement and
//! feed logs. Logs that cannot be delivered are kept in the durable
//! [`FeedBuffer`](feeder_state::FeedBuffer) and sent as one batch by
//! [`flush_backlog`] the next time the broker connection comes up.

pub mod actuator;
pub mod error;
pub mod flush;
pub mod orchestrator;

pub use actuator::{Actuator, LoggingActuator};
pub use error::{DeviceError, DeviceResult};
pub use flush::{FlushOutcome, flush_backlog};
pub use orchestrator::{FeedOrchestrator, FeedOutcome, FeedState};
