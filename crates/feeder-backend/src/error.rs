use feeder_mqtt::SessionError;
use feeder_state::StateError;
use thiserror::Error;

pub type ReconcileResult<T> = Result<T, ReconcileError>;

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("feeder with client id {0} does not exist")]
    DoesNotExist(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("feeder {0} is not online")]
    NotOnline(String),

    #[error("registry: {0}")]
    State(StateError),

    #[error("broker session: {0}")]
    Session(#[from] SessionError),
}

impl ReconcileError {
    /// Classify a store error raised while working on `client_id`.
    pub(crate) fn from_state(client_id: &str, err: StateError) -> Self {
        match err {
            StateError::NotFound(_) => ReconcileError::DoesNotExist(client_id.to_string()),
            StateError::Validation(msg) => ReconcileError::Validation(msg),
            other => ReconcileError::State(other),
        }
    }
}
