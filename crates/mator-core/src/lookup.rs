//! Address enrichment collaborators.
//!
//! Implemented by `mator-lookup` (Team Cymru whois, MaxMind database) and by
//! in-memory fakes in tests. The pipeline depends on these traits only.

use std::{future::Future, net::IpAddr};

/// One line of an AS registry answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AsRecord {
  pub number:  u32,
  pub name:    String,
  pub address: IpAddr,
}

/// Location data for one address.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GeoRecord {
  pub country:   Option<String>,
  pub latitude:  Option<f64>,
  pub longitude: Option<f64>,
}

/// Batched AS-number lookup.
pub trait AsRegistry: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  /// Resolve many addresses in as few requests as the registry allows.
  ///
  /// Addresses the registry has no routing data for are absent from the
  /// answer. Consecutive duplicate addresses in the answer are collapsed.
  fn lookup<'a>(
    &'a self,
    addresses: &'a [IpAddr],
  ) -> impl Future<Output = Result<Vec<AsRecord>, Self::Error>> + Send + 'a;
}

/// Single-address geo lookup against a local dataset.
pub trait GeoLookup: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  /// `Ok(None)` when the dataset has no entry for `address`.
  fn lookup(&self, address: IpAddr) -> Result<Option<GeoRecord>, Self::Error>;
}
