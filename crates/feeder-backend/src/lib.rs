//! feeder-backend — keeps the registry in step with what feeders report.
//!
//! [`Reconciler`] is the backend's [`BackendHandler`](feeder_mqtt::BackendHandler):
//! presence messages upsert feeder records and feed-log batches append to
//! the feed history. It also serves registry reads and sends feed
//! requests to online feeders.
//!
//! Reads and [`Reconciler::request_feed`] are library entry points for
//! whatever embeds the backend, such as an HTTP or scheduling layer.
//! `feederd` itself only runs the ingest loop, and its `registry`
//! subcommand reads the store offline.

pub mod error;
pub mod reconcile;

pub use error::{ReconcileError, ReconcileResult};
pub use reconcile::Reconciler;
