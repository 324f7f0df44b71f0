//! feeder-state — embedded stores for the feeder pipeline.
//!
//! Backed by [redb](https://docs.rs/redb), this crate holds the two pieces
//! of durable state in the system:
//!
//! - [`FeedBuffer`]: the device-side queue of feed-log entries that could
//!   not be delivered yet. Ids come from a persisted sequence and are
//!   strictly increasing for the lifetime of the file.
//! - [`RegistryStore`]: the backend's canonical feeder registry and feed
//!   history, exposed through the [`FeederRepository`] and
//!   [`FeedLogRepository`] contracts.
//!
//! # Architecture
//!
//! Domain types are JSON-serialized into redb's `&[u8]` value columns.
//! Feed history uses composite `{client_id}/{id}` keys so a feeder's
//! entries form one contiguous range.

pub mod buffer;
pub mod error;
pub mod registry;
pub mod repository;
pub mod tables;
pub mod types;

pub use buffer::FeedBuffer;
pub use error::{StateError, StateResult};
pub use registry::RegistryStore;
pub use repository::{FeedLogRepository, FeederRepository};
pub use types::*;
