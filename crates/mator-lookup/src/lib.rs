//! Address enrichment backends for MATor.
//!
//! - [`WhoisRegistry`]: AS numbers and names from the Team Cymru bulk whois
//!   service.
//! - [`MaxMindGeo`]: country and coordinates from a local GeoLite2/GeoIP2
//!   City database.

mod geo;
mod whois;

pub mod error;

pub use error::{Error, Result};
pub use geo::MaxMindGeo;
pub use whois::{DEFAULT_ENDPOINT, WhoisRegistry};
