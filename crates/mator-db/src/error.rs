//! Error type for the snapshot builder.
//!
//! Every variant names the phase that failed. The first error ends the run.

use std::path::PathBuf;

use thiserror::Error;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Error)]
pub enum Error {
  #[error("reading source {name}: {error}")]
  Source {
    name:  String,
    #[source]
    error: BoxError,
  },

  #[error("main archive not found at {}", .0.display())]
  MissingArchive(PathBuf),

  #[error("reconcile phase failed: {0}")]
  Reconcile(String),

  #[error("family phase failed: {0}")]
  Family(String),

  #[error("enrichment phase failed: {0}")]
  Enrichment(#[source] BoxError),

  #[error("persistence phase failed: {0}")]
  Persistence(#[from] mator_store_sqlite::Error),

  #[error("configuration error: {0}")]
  Config(String),

  #[error("sink closed the {0} queue")]
  SinkClosed(&'static str),

  #[error("sink task failed: {0}")]
  SinkTask(String),
}

impl Error {
  pub(crate) fn enrichment(e: impl std::error::Error + Send + Sync + 'static) -> Self {
    Self::Enrichment(Box::new(e))
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
