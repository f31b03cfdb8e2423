//! SQLite backend for the MATor descriptor snapshot.
//!
//! Wraps [`tokio_rusqlite`] so all database access runs on a dedicated thread
//! without blocking the async runtime. Writes go through a single
//! [`SnapshotSink`] that commits the whole snapshot in one transaction.

mod encode;
mod schema;
mod sink;
mod store;

pub mod error;

pub use error::{Error, Result};
pub use sink::{RowCounts, SinkHandles, SnapshotSink};
pub use store::{SnapshotStore, StoredDescriptor};

#[cfg(test)]
mod tests;
