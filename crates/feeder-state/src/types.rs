//! Persisted domain types.
//!
//! All types are serializable to/from JSON for storage in redb tables.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use feeder_core::Status;
use feeder_core::config::{MAX_CLIENT_ID_LEN, MAX_SOFTWARE_VERSION_LEN};

use crate::error::{StateError, StateResult};

// ── Device buffer ──────────────────────────────────────────────────

/// A completed feed that has not been delivered to the backend yet.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FeedLogEntry {
    /// Local sequence number, unique only on this device.
    pub id: u64,
    pub portions: u32,
    pub timestamp: DateTime<Utc>,
}

impl From<&FeedLogEntry> for feeder_core::FeedLogMessage {
    fn from(entry: &FeedLogEntry) -> Self {
        feeder_core::FeedLogMessage {
            portions: entry.portions,
            timestamp: entry.timestamp,
        }
    }
}

// ── Backend registry ───────────────────────────────────────────────

/// Canonical record of a feeder known to the backend.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FeederRecord {
    pub client_id: String,
    pub software_version: String,
    pub status: Status,
    /// When the feeder was last seen online. Set only while offline.
    pub last_online: Option<DateTime<Utc>>,
}

impl FeederRecord {
    /// Build a record whose `last_online` matches `status`.
    pub fn observed(
        client_id: impl Into<String>,
        software_version: impl Into<String>,
        status: Status,
        observed_at: DateTime<Utc>,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            software_version: software_version.into(),
            status,
            last_online: (status == Status::Offline).then_some(observed_at),
        }
    }

    pub fn validate(&self) -> StateResult<()> {
        validate_client_id(&self.client_id)?;
        if self.software_version.len() > MAX_SOFTWARE_VERSION_LEN {
            return Err(StateError::Validation(format!(
                "software version must be at most {MAX_SOFTWARE_VERSION_LEN} characters"
            )));
        }
        if self.last_online.is_some() != (self.status == Status::Offline) {
            return Err(StateError::Validation(
                "last_online must be set exactly when the feeder is offline".to_string(),
            ));
        }
        Ok(())
    }
}

/// Outcome of a registry upsert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Created,
    Updated,
}

/// One feed stored in the backend history.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FeedHistoryEntry {
    /// Backend-assigned id, unique across all feeders.
    pub id: u64,
    pub client_id: String,
    pub portions: u32,
    pub timestamp: DateTime<Utc>,
}

impl FeedHistoryEntry {
    pub(crate) fn table_key(&self) -> String {
        history_key(&self.client_id, self.id)
    }
}

/// A feed about to be written to history; the store assigns the id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewFeedHistory {
    pub portions: u32,
    pub timestamp: DateTime<Utc>,
}

impl From<&feeder_core::FeedLogMessage> for NewFeedHistory {
    fn from(msg: &feeder_core::FeedLogMessage) -> Self {
        Self {
            portions: msg.portions,
            timestamp: msg.timestamp,
        }
    }
}

pub(crate) fn history_key(client_id: &str, id: u64) -> String {
    format!("{client_id}/{id:020}")
}

pub(crate) fn history_prefix(client_id: &str) -> String {
    format!("{client_id}/")
}

pub(crate) fn validate_client_id(client_id: &str) -> StateResult<()> {
    if client_id.is_empty() {
        return Err(StateError::Validation("client id is required".to_string()));
    }
    if client_id.len() > MAX_CLIENT_ID_LEN {
        return Err(StateError::Validation(format!(
            "client id must be at most {MAX_CLIENT_ID_LEN} characters"
        )));
    }
    if client_id.contains('/') {
        return Err(StateError::Validation(
            "client id must not contain '/'".to_string(),
        ));
    }
    Ok(())
}
