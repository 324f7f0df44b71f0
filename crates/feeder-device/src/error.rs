use feeder_mqtt::SessionError;
use feeder_state::StateError;
use thiserror::Error;

pub type DeviceResult<T> = Result<T, DeviceError>;

#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("feed buffer: {0}")]
    State(#[from] StateError),

    #[error("broker session: {0}")]
    Session(#[from] SessionError),
}
