//! Error type for `mator-store-sqlite`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("core error: {0}")]
  Core(#[from] mator_core::Error),

  #[error("database error: {0}")]
  Database(#[from] tokio_rusqlite::Error),

  #[error("io error: {0}")]
  Io(#[from] std::io::Error),

  #[error("date/time parse error: {0}")]
  DateParse(String),

  #[error("address parse error: {0}")]
  AddressParse(#[from] std::net::AddrParseError),

  #[error("stored {column} {value} is out of range")]
  OutOfRange { column: &'static str, value: i64 },

  #[error("snapshot abandoned before commit")]
  Abandoned,
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
