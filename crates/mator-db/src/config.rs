//! Builder configuration.
//!
//! Deserialised by the binary from an optional TOML file and `MATOR_*`
//! environment variables; command-line flags are applied on top.

use std::{
  path::{Path, PathBuf},
  time::Duration,
};

use mator_core::month::TargetMonth;
use serde::Deserialize;

use crate::{Error, Result};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BuilderConfig {
  /// Directory holding the monthly `server-descriptors-YYYY-MM` archives.
  pub data_dir:            PathBuf,
  /// Incremental descriptor files; only read for the current month.
  /// Defaults to `<data_dir>/recent`.
  pub recent_dir:          Option<PathBuf>,
  /// Defaults to `./server-descriptors-YYYY-MM.db`.
  pub output:              Option<PathBuf>,
  pub geo_db:              PathBuf,
  pub whois_endpoint:      String,
  pub whois_batch_size:    usize,
  pub whois_timeout_secs:  u64,
  pub sink_queue_capacity: usize,
  /// Keep an existing output file and skip the run.
  pub no_clobber:          bool,
}

impl Default for BuilderConfig {
  fn default() -> Self {
    Self {
      data_dir:            PathBuf::from("."),
      recent_dir:          None,
      output:              None,
      geo_db:              PathBuf::from("./GeoLite2-City.mmdb"),
      whois_endpoint:      mator_lookup::DEFAULT_ENDPOINT.to_owned(),
      whois_batch_size:    10_000,
      whois_timeout_secs:  300,
      sink_queue_capacity: 1,
      no_clobber:          false,
    }
  }
}

impl BuilderConfig {
  pub fn validate(&self) -> Result<()> {
    if self.whois_batch_size == 0 {
      return Err(Error::Config("whois_batch_size must be at least 1".into()));
    }
    if self.sink_queue_capacity == 0 {
      return Err(Error::Config("sink_queue_capacity must be at least 1".into()));
    }
    if self.whois_timeout_secs == 0 {
      return Err(Error::Config("whois_timeout_secs must be at least 1".into()));
    }
    Ok(())
  }

  pub fn recent_dir(&self) -> PathBuf {
    self
      .recent_dir
      .clone()
      .unwrap_or_else(|| self.data_dir.join("recent"))
  }

  pub fn output_path(&self, month: TargetMonth) -> PathBuf {
    self
      .output
      .clone()
      .unwrap_or_else(|| PathBuf::from(format!("./server-descriptors-{month}.db")))
  }

  /// Archive path without extension; see [`crate::source::FileSource::locate`].
  pub fn archive_base(&self, month: TargetMonth) -> PathBuf {
    archive_base(&self.data_dir, month)
  }

  pub fn whois_timeout(&self) -> Duration { Duration::from_secs(self.whois_timeout_secs) }
}

fn archive_base(data_dir: &Path, month: TargetMonth) -> PathBuf {
  data_dir.join(format!("server-descriptors-{month}"))
}
