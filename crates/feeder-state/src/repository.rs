//! Persistence contracts the backend reconciler is written against.
//!
//! [`RegistryStore`](crate::RegistryStore) is the redb implementation;
//! other backends only need to uphold the per-method atomicity notes.

use crate::error::StateResult;
use crate::types::{FeedHistoryEntry, FeederRecord, NewFeedHistory, UpsertOutcome};

/// Storage of canonical feeder records, one per client id.
pub trait FeederRepository {
    /// Insert a new record. Fails with `AlreadyExists` if the id is taken.
    fn create_feeder(&self, record: &FeederRecord) -> StateResult<()>;

    fn get_feeder(&self, client_id: &str) -> StateResult<Option<FeederRecord>>;

    fn list_feeders(&self) -> StateResult<Vec<FeederRecord>>;

    /// Replace an existing record. Fails with `NotFound` if absent.
    fn update_feeder(&self, record: &FeederRecord) -> StateResult<()>;

    /// Create or replace in a single transaction.
    fn upsert_feeder(&self, record: &FeederRecord) -> StateResult<UpsertOutcome>;
}

/// Storage of delivered feed history.
pub trait FeedLogRepository {
    /// Insert every entry for `client_id` or none of them.
    ///
    /// The owning feeder must exist in the same transaction, and every
    /// entry must carry a positive portion count.
    fn create_feed_logs(
        &self,
        client_id: &str,
        entries: &[NewFeedHistory],
    ) -> StateResult<Vec<FeedHistoryEntry>>;

    /// History of one feeder in insertion order.
    fn list_feed_logs(&self, client_id: &str) -> StateResult<Vec<FeedHistoryEntry>>;
}
