//! Reconnect flush of the feed-log backlog.

use feeder_core::FeedLogMessage;
use feeder_mqtt::DeviceSession;
use feeder_state::FeedBuffer;
use tracing::{info, warn};

use crate::error::DeviceResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    /// Nothing was buffered.
    Empty,
    /// This many entries were delivered and removed from the buffer.
    Flushed(usize),
    /// Delivery failed; this many entries stay buffered for the next attempt.
    Deferred(usize),
}

/// Send every buffered entry as one batch and clear the buffer on success.
///
/// A failed send leaves the buffer untouched and is not an error. Storage
/// failures are.
pub async fn flush_backlog(
    session: &DeviceSession,
    buffer: &FeedBuffer,
) -> DeviceResult<FlushOutcome> {
    let backlog = buffer.list_all()?;
    if backlog.is_empty() {
        return Ok(FlushOutcome::Empty);
    }

    let count = backlog.len();
    let messages: Vec<FeedLogMessage> = backlog.iter().map(FeedLogMessage::from).collect();
    match session.send_feed_log(&messages).await {
        Ok(()) => {
            buffer.clear_all()?;
            info!(count, "feed log backlog flushed");
            Ok(FlushOutcome::Flushed(count))
        }
        Err(e) => {
            warn!(count, error = %e, "feed log backlog kept for next connection");
            Ok(FlushOutcome::Deferred(count))
        }
    }
}
