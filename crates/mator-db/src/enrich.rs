//! Address enrichment: AS and geo metadata for every observed address.

use std::{collections::HashSet, net::IpAddr};

use mator_core::{
  lookup::{AsRegistry, GeoLookup},
  record::AddressMetadata,
};
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::{Error, Result};

/// Look up `addresses` and send one [`AddressMetadata`] per address the AS
/// registry knows. Addresses absent from the geo dataset keep empty geo
/// fields. Returns the number of records sent.
pub async fn enrich<R, G>(
  registry: &R,
  geo: &G,
  addresses: &[IpAddr],
  out: &mpsc::Sender<AddressMetadata>,
) -> Result<usize>
where
  R: AsRegistry,
  G: GeoLookup,
{
  if addresses.is_empty() {
    info!("no addresses to enrich");
    return Ok(0);
  }

  let records = registry.lookup(addresses).await.map_err(Error::enrichment)?;
  info!(addresses = addresses.len(), announced = records.len(), "AS lookup done");

  let mut seen = HashSet::with_capacity(records.len());
  let mut sent = 0usize;
  for record in records {
    if !seen.insert(record.address) {
      continue;
    }
    let location = geo.lookup(record.address).map_err(Error::enrichment)?;
    if location.is_none() {
      debug!(address = %record.address, "address not in geo database");
    }
    let location = location.unwrap_or_default();

    out
      .send(AddressMetadata {
        address:   record.address,
        as_number: record.number,
        as_name:   record.name,
        country:   location.country,
        latitude:  location.latitude,
        longitude: location.longitude,
      })
      .await
      .map_err(|_| Error::SinkClosed("geoip"))?;
    sent += 1;
  }
  Ok(sent)
}
