//! RegistryStore — the backend's feeder registry and feed history.
//!
//! Feeder records live in `FEEDERS` keyed by client id. History rows live
//! in `FEED_HISTORY` under `{client_id}/{id:020}` so that one feeder's
//! history is a single ordered key range.

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable};
use tracing::debug;

use crate::error::{StateError, StateResult, map_err};
use crate::repository::{FeedLogRepository, FeederRepository};
use crate::tables::{FEED_HISTORY, FEEDERS, HISTORY_SEQ, SEQUENCES};
use crate::types::*;

/// File name of the registry inside the backend data directory.
pub const REGISTRY_FILE: &str = "registry.redb";

/// Thread-safe registry store backed by redb.
#[derive(Clone)]
pub struct RegistryStore {
    db: Arc<Database>,
}

impl RegistryStore {
    /// Open (or create) a persistent registry at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "registry store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory registry (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory registry store opened");
        Ok(store)
    }

    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        txn.open_table(FEEDERS).map_err(map_err!(Table))?;
        txn.open_table(FEED_HISTORY).map_err(map_err!(Table))?;
        txn.open_table(SEQUENCES).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    fn write_feeder(&self, record: &FeederRecord, mode: WriteMode) -> StateResult<UpsertOutcome> {
        record.validate()?;
        let value = serde_json::to_vec(record).map_err(map_err!(Serialize))?;
        let key = record.client_id.as_str();

        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let outcome;
        {
            let mut table = txn.open_table(FEEDERS).map_err(map_err!(Table))?;
            let exists = table.get(key).map_err(map_err!(Read))?.is_some();
            outcome = match (mode, exists) {
                (WriteMode::Create, true) => {
                    return Err(StateError::AlreadyExists(format!(
                        "feeder with client id {key}"
                    )));
                }
                (WriteMode::Update, false) => return Err(StateError::feeder_not_found(key)),
                (_, true) => UpsertOutcome::Updated,
                (_, false) => UpsertOutcome::Created,
            };
            table
                .insert(key, value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(client_id = %key, status = %record.status, ?outcome, "feeder stored");
        Ok(outcome)
    }
}

#[derive(Debug, Clone, Copy)]
enum WriteMode {
    Create,
    Update,
    Upsert,
}

impl FeederRepository for RegistryStore {
    fn create_feeder(&self, record: &FeederRecord) -> StateResult<()> {
        self.write_feeder(record, WriteMode::Create).map(|_| ())
    }

    fn get_feeder(&self, client_id: &str) -> StateResult<Option<FeederRecord>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(FEEDERS).map_err(map_err!(Table))?;
        match table.get(client_id).map_err(map_err!(Read))? {
            Some(guard) => {
                let record: FeederRecord =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    fn list_feeders(&self) -> StateResult<Vec<FeederRecord>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(FEEDERS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let record: FeederRecord =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push(record);
        }
        Ok(results)
    }

    fn update_feeder(&self, record: &FeederRecord) -> StateResult<()> {
        self.write_feeder(record, WriteMode::Update).map(|_| ())
    }

    fn upsert_feeder(&self, record: &FeederRecord) -> StateResult<UpsertOutcome> {
        self.write_feeder(record, WriteMode::Upsert)
    }
}

impl FeedLogRepository for RegistryStore {
    fn create_feed_logs(
        &self,
        client_id: &str,
        entries: &[NewFeedHistory],
    ) -> StateResult<Vec<FeedHistoryEntry>> {
        validate_client_id(client_id)?;
        if let Some(bad) = entries.iter().find(|e| e.portions == 0) {
            return Err(StateError::Validation(format!(
                "feed log at {} has zero portions",
                bad.timestamp.to_rfc3339()
            )));
        }

        // Dropping the transaction without commit aborts every insert below.
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let mut stored = Vec::with_capacity(entries.len());
        {
            let feeders = txn.open_table(FEEDERS).map_err(map_err!(Table))?;
            if feeders.get(client_id).map_err(map_err!(Read))?.is_none() {
                return Err(StateError::feeder_not_found(client_id));
            }

            let mut seq = txn.open_table(SEQUENCES).map_err(map_err!(Table))?;
            let mut next = seq
                .get(HISTORY_SEQ)
                .map_err(map_err!(Read))?
                .map(|guard| guard.value())
                .unwrap_or(0);

            let mut history = txn.open_table(FEED_HISTORY).map_err(map_err!(Table))?;
            for entry in entries {
                next += 1;
                let row = FeedHistoryEntry {
                    id: next,
                    client_id: client_id.to_string(),
                    portions: entry.portions,
                    timestamp: entry.timestamp,
                };
                let value = serde_json::to_vec(&row).map_err(map_err!(Serialize))?;
                history
                    .insert(row.table_key().as_str(), value.as_slice())
                    .map_err(map_err!(Write))?;
                stored.push(row);
            }
            seq.insert(HISTORY_SEQ, next).map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%client_id, count = stored.len(), "feed logs stored");
        Ok(stored)
    }

    fn list_feed_logs(&self, client_id: &str) -> StateResult<Vec<FeedHistoryEntry>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let feeders = txn.open_table(FEEDERS).map_err(map_err!(Table))?;
        if feeders.get(client_id).map_err(map_err!(Read))?.is_none() {
            return Err(StateError::feeder_not_found(client_id));
        }

        let prefix = history_prefix(client_id);
        let table = txn.open_table(FEED_HISTORY).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.range(prefix.as_str()..).map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            if !key.value().starts_with(&prefix) {
                break;
            }
            let row: FeedHistoryEntry =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push(row);
        }
        Ok(results)
    }
}
