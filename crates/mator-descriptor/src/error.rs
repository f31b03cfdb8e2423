//! Error types for the server-descriptor codec.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("descriptor has no {0:?} line")]
  MissingKeyword(&'static str),

  #[error("malformed {keyword:?} line: {line:?}")]
  MalformedLine { keyword: &'static str, line: String },

  #[error("descriptor starting at line {0} has no closing signature")]
  Unterminated(usize),

  #[error("core error: {0}")]
  Core(#[from] mator_core::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
