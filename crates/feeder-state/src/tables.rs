//! redb table definitions for the feeder stores.

use redb::TableDefinition;

/// Undelivered feed-log entries keyed by their local sequence id.
pub const FEED_BUFFER: TableDefinition<u64, &[u8]> = TableDefinition::new("feed_buffer");

/// Feeder records keyed by `{client_id}`.
pub const FEEDERS: TableDefinition<&str, &[u8]> = TableDefinition::new("feeders");

/// Feed history keyed by `{client_id}/{id:020}`.
pub const FEED_HISTORY: TableDefinition<&str, &[u8]> = TableDefinition::new("feed_history");

/// Named counters (`buffer_seq`, `history_seq`).
pub const SEQUENCES: TableDefinition<&str, u64> = TableDefinition::new("sequences");

pub const BUFFER_SEQ: &str = "buffer_seq";
pub const HISTORY_SEQ: &str = "history_seq";
