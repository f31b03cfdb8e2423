//! Error type for `mator-lookup`.

use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("whois i/o error: {0}")]
  Io(#[from] std::io::Error),

  #[error("whois request to {endpoint} timed out after {after:?}")]
  Timeout { endpoint: String, after: Duration },

  #[error("geo database error: {0}")]
  Geo(#[from] maxminddb::MaxMindDBError),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
