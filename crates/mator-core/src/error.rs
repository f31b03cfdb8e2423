//! Error types for `mator-core`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("month {0:?} is not in YYYY-MM format")]
  MalformedMonth(String),

  #[error(
    "cannot build a snapshot for {0}; supported range is 2007-01 up to the current month"
  )]
  MonthOutOfRange(String),

  #[error("invalid fingerprint: {0:?}")]
  InvalidFingerprint(String),

  #[error("unknown exit policy action: {0:?}")]
  UnknownPolicyAction(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
