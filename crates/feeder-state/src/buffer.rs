//! FeedBuffer — the device's durable queue of undelivered feed logs.
//!
//! Every mutation runs in its own redb write transaction with immediate
//! durability, so an entry that `append` returned an id for survives a
//! crash or power loss. The buffer is the only component on the device
//! that touches the disk.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use redb::{Database, ReadableDatabase, ReadableTable, ReadableTableMetadata};
use tracing::{debug, info};

use crate::error::{StateError, StateResult, map_err};
use crate::tables::{BUFFER_SEQ, FEED_BUFFER, SEQUENCES};
use crate::types::FeedLogEntry;

/// File name of the buffer inside the device data directory.
pub const BUFFER_FILE: &str = "feeder.redb";

/// Durable local buffer of feed-log entries.
///
/// Single-writer: the owner is expected to serialize appends and flushes.
pub struct FeedBuffer {
    db: Option<Database>,
    path: Option<PathBuf>,
}

impl FeedBuffer {
    /// Open (or create) a buffer file at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let buffer = Self {
            db: Some(db),
            path: Some(path.to_path_buf()),
        };
        buffer.ensure_tables()?;
        debug!(?path, "feed buffer opened");
        Ok(buffer)
    }

    /// Create an ephemeral in-memory buffer (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let buffer = Self {
            db: Some(db),
            path: None,
        };
        buffer.ensure_tables()?;
        debug!("in-memory feed buffer opened");
        Ok(buffer)
    }

    fn db(&self) -> StateResult<&Database> {
        self.db.as_ref().ok_or(StateError::Closed)
    }

    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db()?.begin_write().map_err(map_err!(Transaction))?;
        txn.open_table(FEED_BUFFER).map_err(map_err!(Table))?;
        txn.open_table(SEQUENCES).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Persist a completed feed and return its assigned id.
    pub fn append(&self, portions: u32, timestamp: DateTime<Utc>) -> StateResult<u64> {
        let txn = self.db()?.begin_write().map_err(map_err!(Transaction))?;
        let entry;
        {
            let mut seq = txn.open_table(SEQUENCES).map_err(map_err!(Table))?;
            let last = seq
                .get(BUFFER_SEQ)
                .map_err(map_err!(Read))?
                .map(|guard| guard.value())
                .unwrap_or(0);
            entry = FeedLogEntry {
                id: last + 1,
                portions,
                timestamp,
            };
            seq.insert(BUFFER_SEQ, entry.id).map_err(map_err!(Write))?;

            let value = serde_json::to_vec(&entry).map_err(map_err!(Serialize))?;
            let mut table = txn.open_table(FEED_BUFFER).map_err(map_err!(Table))?;
            table
                .insert(entry.id, value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(id = entry.id, portions, "feed log buffered");
        Ok(entry.id)
    }

    /// Every buffered entry, in ascending id order.
    pub fn list_all(&self) -> StateResult<Vec<FeedLogEntry>> {
        let txn = self.db()?.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(FEED_BUFFER).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let log: FeedLogEntry =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push(log);
        }
        Ok(results)
    }

    /// Number of buffered entries.
    pub fn len(&self) -> StateResult<u64> {
        let txn = self.db()?.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(FEED_BUFFER).map_err(map_err!(Table))?;
        table.len().map_err(map_err!(Read))
    }

    pub fn is_empty(&self) -> StateResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Remove every buffered entry in one transaction.
    ///
    /// The id sequence is kept, so ids are never reused.
    pub fn clear_all(&self) -> StateResult<()> {
        let txn = self.db()?.begin_write().map_err(map_err!(Transaction))?;
        txn.delete_table(FEED_BUFFER).map_err(map_err!(Table))?;
        txn.open_table(FEED_BUFFER).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        debug!("feed buffer cleared");
        Ok(())
    }

    /// Release the underlying file. Calling it again is a no-op.
    pub fn close(&mut self) {
        if self.db.take().is_some() {
            match &self.path {
                Some(path) => info!(?path, "feed buffer closed"),
                None => info!("in-memory feed buffer closed"),
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        self.db.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 7, minute, 0).unwrap()
    }

    #[test]
    fn append_assigns_increasing_ids() {
        let buffer = FeedBuffer::open_in_memory().unwrap();
        let a = buffer.append(1, ts(0)).unwrap();
        let b = buffer.append(3, ts(1)).unwrap();
        let c = buffer.append(2, ts(2)).unwrap();
        assert!(a < b && b < c);
        assert_eq!(buffer.len().unwrap(), 3);
    }

    #[test]
    fn list_all_returns_entries_in_id_order() {
        let buffer = FeedBuffer::open_in_memory().unwrap();
        for (i, portions) in [4u32, 1, 2].into_iter().enumerate() {
            buffer.append(portions, ts(i as u32)).unwrap();
        }

        let entries = buffer.list_all().unwrap();
        let portions: Vec<u32> = entries.iter().map(|e| e.portions).collect();
        assert_eq!(portions, vec![4, 1, 2]);
        assert!(entries.windows(2).all(|w| w[0].id < w[1].id));
        assert_eq!(entries[0].timestamp, ts(0));
    }

    #[test]
    fn ids_sort_numerically_past_nine() {
        let buffer = FeedBuffer::open_in_memory().unwrap();
        for i in 0..12 {
            buffer.append(1, ts(i)).unwrap();
        }
        let ids: Vec<u64> = buffer.list_all().unwrap().iter().map(|e| e.id).collect();
        assert_eq!(ids, (1..=12).collect::<Vec<_>>());
    }

    #[test]
    fn clear_all_empties_buffer_but_keeps_sequence() {
        let buffer = FeedBuffer::open_in_memory().unwrap();
        buffer.append(1, ts(0)).unwrap();
        let last = buffer.append(1, ts(1)).unwrap();

        buffer.clear_all().unwrap();
        assert!(buffer.is_empty().unwrap());
        assert!(buffer.list_all().unwrap().is_empty());

        let next = buffer.append(2, ts(2)).unwrap();
        assert!(next > last);
    }

    #[test]
    fn clear_on_empty_buffer_is_ok() {
        let buffer = FeedBuffer::open_in_memory().unwrap();
        buffer.clear_all().unwrap();
        assert!(buffer.is_empty().unwrap());
    }

    #[test]
    fn close_is_idempotent_and_blocks_use() {
        let mut buffer = FeedBuffer::open_in_memory().unwrap();
        buffer.close();
        buffer.close();
        assert!(buffer.is_closed());
        assert!(matches!(buffer.append(1, ts(0)), Err(StateError::Closed)));
        assert!(matches!(buffer.list_all(), Err(StateError::Closed)));
        assert!(matches!(buffer.clear_all(), Err(StateError::Closed)));
    }

    #[test]
    fn persistence_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(BUFFER_FILE);

        let last = {
            let mut buffer = FeedBuffer::open(&path).unwrap();
            buffer.append(2, ts(0)).unwrap();
            let id = buffer.append(5, ts(1)).unwrap();
            buffer.close();
            id
        };

        let buffer = FeedBuffer::open(&path).unwrap();
        let entries = buffer.list_all().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].portions, 5);

        buffer.clear_all().unwrap();
        assert!(buffer.append(1, ts(2)).unwrap() > last);
    }
}
