//! Conversions between domain records and SQLite column values.
//!
//! Timestamps are stored as `YYYY-MM-DD HH:MM:SS` UTC text so that readers
//! can filter with plain string comparison. Addresses are stored in their
//! canonical textual form. Bandwidths are stored as signed 64-bit integers.

use chrono::{DateTime, NaiveDateTime, Utc};
use mator_core::record::{AddressMetadata, DescriptorRecord, NodeId};

use crate::{Error, Result};

const DT_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

// ─── DateTime<Utc> ───────────────────────────────────────────────────────────

pub fn encode_dt(dt: DateTime<Utc>) -> String { dt.format(DT_FORMAT).to_string() }

pub fn decode_dt(s: &str) -> Result<DateTime<Utc>> {
  NaiveDateTime::parse_from_str(s, DT_FORMAT)
    .map(|dt| dt.and_utc())
    .map_err(|e| Error::DateParse(format!("{s:?}: {e}")))
}

// ─── Integers ────────────────────────────────────────────────────────────────

/// SQLite integers are signed; saturate instead of wrapping.
pub fn encode_u64(v: u64) -> i64 { i64::try_from(v).unwrap_or(i64::MAX) }

// ─── Row types ───────────────────────────────────────────────────────────────

/// Column values for one `descriptors` insert.
pub struct DescriptorRow {
  pub node_id:            NodeId,
  pub nickname:           String,
  pub address:            String,
  pub bandwidth_avg:      i64,
  pub bandwidth_burst:    i64,
  pub bandwidth_observed: i64,
  pub platform:           String,
  pub version:            String,
  pub hibernating:        bool,
  pub exit_policy:        String,
  pub start_time:         String,
  pub end_time:           String,
}

impl From<DescriptorRecord> for DescriptorRow {
  /// Consumes the record: the descriptor's strings move into the row.
  fn from(record: DescriptorRecord) -> Self {
    let d = record.descriptor;
    Self {
      node_id:            record.node_id,
      nickname:           d.nickname,
      address:            d.address.to_string(),
      bandwidth_avg:      encode_u64(d.bandwidth_avg),
      bandwidth_burst:    encode_u64(d.bandwidth_burst),
      bandwidth_observed: encode_u64(d.bandwidth_observed),
      platform:           d.platform,
      version:            d.tor_version,
      hibernating:        d.hibernating,
      exit_policy:        d.exit_policy.to_lines(),
      start_time:         encode_dt(record.valid_from),
      end_time:           encode_dt(record.valid_until),
    }
  }
}

/// Column values for one `geoip` insert.
pub struct GeoRow {
  pub ip:        String,
  pub country:   Option<String>,
  pub lat:       Option<f64>,
  pub long:      Option<f64>,
  pub as_number: i64,
  pub as_name:   String,
}

impl From<AddressMetadata> for GeoRow {
  fn from(meta: AddressMetadata) -> Self {
    Self {
      ip:        meta.address.to_string(),
      country:   meta.country,
      lat:       meta.latitude,
      long:      meta.longitude,
      as_number: i64::from(meta.as_number),
      as_name:   meta.as_name,
    }
  }
}
