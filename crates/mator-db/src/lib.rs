//! Monthly relay-descriptor snapshot builder.
//!
//! Reads the server descriptors of one month (plus the tail of the previous
//! month and, for the current month, the recent files), reconciles them into
//! per-relay timelines, derives mutual-family intervals, enriches every
//! address with AS and geo data and writes the lot to one SQLite snapshot in
//! a single transaction.
//!
//! Entry point: [`Pipeline::run`].

pub mod config;
pub mod enrich;
pub mod error;
pub mod family;
pub mod pipeline;
pub mod reconcile;
pub mod source;

pub use config::BuilderConfig;
pub use error::{Error, Result};
pub use pipeline::{Pipeline, Sources, Summary};
pub use source::{FileSource, locate_sources};
