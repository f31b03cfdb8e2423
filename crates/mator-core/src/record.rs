//! Rows handed to the snapshot sink.
//!
//! Each type maps onto one table of the persisted snapshot. Records own
//! their data; producers move descriptors into them rather than cloning.

use std::net::IpAddr;

use chrono::{DateTime, Utc};

use crate::descriptor::{Fingerprint, RelayDescriptor};

/// Run-local relay identifier. Positive, assigned in iteration order.
pub type NodeId = i64;

/// `nodes(id, fingerprint)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeRecord {
  pub id:          NodeId,
  pub fingerprint: Fingerprint,
}

/// One validity interval of one descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DescriptorRecord {
  pub node_id:     NodeId,
  pub descriptor:  RelayDescriptor,
  /// The descriptor's effective publish time (backdated for the first
  /// descriptor of a timeline).
  pub valid_from:  DateTime<Utc>,
  pub valid_until: DateTime<Utc>,
}

/// `families(ida, idb, start_time, end_time)`: a maximal interval of mutual
/// family declaration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FamilyEdge {
  pub ida:   NodeId,
  pub idb:   NodeId,
  pub start: DateTime<Utc>,
  pub end:   DateTime<Utc>,
}

/// `geoip(ip, country, lat, long, as_number, as_name)`.
#[derive(Debug, Clone, PartialEq)]
pub struct AddressMetadata {
  pub address:   IpAddr,
  pub as_number: u32,
  pub as_name:   String,
  /// ISO 3166-1 alpha-2 code; `None` when the geo dataset has no entry.
  pub country:   Option<String>,
  pub latitude:  Option<f64>,
  pub longitude: Option<f64>,
}
