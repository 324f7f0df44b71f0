//! Reconciler — folds feeder reports into the registry.
//!
//! Presence is applied as a single-transaction upsert so concurrent
//! first-sightings of a feeder cannot create two records. Feed-log
//! batches are inserted all-or-nothing and only for known feeders.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use feeder_core::{FeedCommand, FeedLogBatch, PresenceMessage, Status};
use feeder_mqtt::{BackendHandler, BackendSession};
use feeder_state::*;

use crate::error::{ReconcileError, ReconcileResult};

pub struct Reconciler<R> {
    repo: R,
    session: BackendSession,
}

impl<R: FeederRepository + FeedLogRepository> Reconciler<R> {
    pub fn new(repo: R, session: BackendSession) -> Self {
        Self { repo, session }
    }

    pub fn repository(&self) -> &R {
        &self.repo
    }

    // ── Ingest ─────────────────────────────────────────────────────

    /// Apply a presence message received now.
    pub fn apply_presence(
        &self,
        client_id: &str,
        presence: &PresenceMessage,
    ) -> ReconcileResult<UpsertOutcome> {
        self.apply_presence_at(client_id, presence, Utc::now())
    }

    /// Apply a presence message received at `received_at`.
    ///
    /// `last_online` becomes `received_at` when the feeder reports
    /// offline and is cleared when it reports online.
    pub fn apply_presence_at(
        &self,
        client_id: &str,
        presence: &PresenceMessage,
        received_at: DateTime<Utc>,
    ) -> ReconcileResult<UpsertOutcome> {
        let record = FeederRecord::observed(
            client_id,
            presence.software_version.as_str(),
            presence.status,
            received_at,
        );
        let outcome = self
            .repo
            .upsert_feeder(&record)
            .map_err(|e| ReconcileError::from_state(client_id, e))?;

        match outcome {
            UpsertOutcome::Created => info!(
                %client_id,
                status = %presence.status,
                version = %presence.software_version,
                "feeder registered"
            ),
            UpsertOutcome::Updated => debug!(
                %client_id,
                status = %presence.status,
                version = %presence.software_version,
                "feeder presence updated"
            ),
        }
        Ok(outcome)
    }

    /// Store a feed-log batch for an existing feeder.
    pub fn apply_feed_log(
        &self,
        client_id: &str,
        batch: &FeedLogBatch,
    ) -> ReconcileResult<Vec<FeedHistoryEntry>> {
        let entries: Vec<NewFeedHistory> = batch.value.iter().map(NewFeedHistory::from).collect();
        let stored = self
            .repo
            .create_feed_logs(client_id, &entries)
            .map_err(|e| ReconcileError::from_state(client_id, e))?;
        info!(%client_id, count = stored.len(), "feed logs stored");
        Ok(stored)
    }

    // ── Queries ────────────────────────────────────────────────────

    pub fn feeder(&self, client_id: &str) -> ReconcileResult<FeederRecord> {
        self.repo
            .get_feeder(client_id)
            .map_err(|e| ReconcileError::from_state(client_id, e))?
            .ok_or_else(|| ReconcileError::DoesNotExist(client_id.to_string()))
    }

    pub fn feeders(&self) -> ReconcileResult<Vec<FeederRecord>> {
        self.repo.list_feeders().map_err(ReconcileError::State)
    }

    pub fn feed_history(&self, client_id: &str) -> ReconcileResult<Vec<FeedHistoryEntry>> {
        self.repo
            .list_feed_logs(client_id)
            .map_err(|e| ReconcileError::from_state(client_id, e))
    }

    // ── Commands ───────────────────────────────────────────────────

    /// Ask an online feeder to dispense `portions` portions.
    ///
    /// Call this on the reconciler that owns the running session; the
    /// registry store is locked by that process.
    pub async fn request_feed(&self, client_id: &str, portions: u32) -> ReconcileResult<()> {
        let command = FeedCommand::new(portions);
        if !command.is_valid() {
            return Err(ReconcileError::Validation(
                "portions must be greater than zero".to_string(),
            ));
        }
        let feeder = self.feeder(client_id)?;
        if feeder.status != Status::Online {
            return Err(ReconcileError::NotOnline(client_id.to_string()));
        }
        self.session.send_feed_command(client_id, command).await?;
        Ok(())
    }
}

#[async_trait]
impl<R> BackendHandler for Reconciler<R>
where
    R: FeederRepository + FeedLogRepository + Send + Sync,
{
    async fn on_presence(&self, client_id: &str, presence: PresenceMessage) {
        if let Err(e) = self.apply_presence(client_id, &presence) {
            error!(%client_id, error = %e, "presence not applied");
        }
    }

    async fn on_feed_log(&self, client_id: &str, batch: FeedLogBatch) {
        match self.apply_feed_log(client_id, &batch) {
            Ok(_) => {}
            Err(e @ ReconcileError::DoesNotExist(_)) | Err(e @ ReconcileError::Validation(_)) => {
                warn!(%client_id, count = batch.len(), error = %e, "feed log batch rejected");
            }
            Err(e) => error!(%client_id, count = batch.len(), error = %e, "feed log batch not stored"),
        }
    }
}
