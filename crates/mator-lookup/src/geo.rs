//! MaxMind City database reader.

use std::{net::IpAddr, path::Path};

use mator_core::lookup::{GeoLookup, GeoRecord};
use maxminddb::{MaxMindDBError, Reader};
use serde::Deserialize;
use tracing::info;

use crate::Result;

/// The subset of a City record the snapshot keeps.
#[derive(Debug, Default, Deserialize)]
struct CityRow {
  country:  Option<Country>,
  location: Option<Location>,
}

#[derive(Debug, Deserialize)]
struct Country {
  iso_code: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Location {
  latitude:  Option<f64>,
  longitude: Option<f64>,
}

impl From<CityRow> for GeoRecord {
  fn from(row: CityRow) -> Self {
    let (latitude, longitude) = row
      .location
      .map(|l| (l.latitude, l.longitude))
      .unwrap_or_default();
    Self { country: row.country.and_then(|c| c.iso_code), latitude, longitude }
  }
}

/// A GeoLite2/GeoIP2 City database loaded into memory.
pub struct MaxMindGeo {
  reader: Reader<Vec<u8>>,
}

impl MaxMindGeo {
  pub fn open(path: impl AsRef<Path>) -> Result<Self> {
    let path = path.as_ref();
    let reader = Reader::open_readfile(path)?;
    info!(
      path = %path.display(),
      database = %reader.metadata.database_type,
      "opened geo database"
    );
    Ok(Self { reader })
  }
}

impl GeoLookup for MaxMindGeo {
  type Error = MaxMindDBError;

  fn lookup(&self, address: IpAddr) -> Result<Option<GeoRecord>, MaxMindDBError> {
    match self.reader.lookup::<CityRow>(address) {
      Ok(row) => Ok(Some(row.into())),
      Err(MaxMindDBError::AddressNotFoundError(_)) => Ok(None),
      Err(e) => Err(e),
    }
  }
}
