//! Team Cymru bulk whois client.
//!
//! One TCP exchange per batch: the query is `begin`, one address per line,
//! then `end`. The server answers with a banner line followed by one
//! `AS | IP | AS Name` line per address and closes the connection.

use std::{future::Future, net::IpAddr, time::Duration};

use mator_core::lookup::{AsRecord, AsRegistry};
use tokio::{
  io::{AsyncReadExt, AsyncWriteExt},
  net::TcpStream,
};
use tracing::{debug, info, warn};

use crate::{Error, Result};

pub const DEFAULT_ENDPOINT: &str = "whois.cymru.com:43";

/// Bulk AS lookup client.
///
/// Cheap to clone; every batch opens its own connection.
#[derive(Debug, Clone)]
pub struct WhoisRegistry {
  endpoint:   String,
  batch_size: usize,
  timeout:    Duration,
}

impl WhoisRegistry {
  pub fn new(endpoint: impl Into<String>, batch_size: usize, timeout: Duration) -> Self {
    Self { endpoint: endpoint.into(), batch_size: batch_size.max(1), timeout }
  }

  /// Send one batch and read the raw answer to EOF.
  async fn exchange(&self, batch: &[IpAddr]) -> Result<String> {
    let work = async {
      let mut stream = TcpStream::connect(&self.endpoint).await?;
      stream.write_all(prepare_query(batch).as_bytes()).await?;
      stream.flush().await?;

      let mut response = String::new();
      stream.read_to_string(&mut response).await?;
      Ok::<_, Error>(response)
    };

    tokio::time::timeout(self.timeout, work)
      .await
      .map_err(|_| Error::Timeout { endpoint: self.endpoint.clone(), after: self.timeout })?
  }
}

impl Default for WhoisRegistry {
  fn default() -> Self { Self::new(DEFAULT_ENDPOINT, 10_000, Duration::from_secs(300)) }
}

impl AsRegistry for WhoisRegistry {
  type Error = Error;

  fn lookup<'a>(
    &'a self,
    addresses: &'a [IpAddr],
  ) -> impl Future<Output = Result<Vec<AsRecord>>> + Send + 'a {
    async move {
      let mut records = Vec::with_capacity(addresses.len());
      for (n, batch) in addresses.chunks(self.batch_size).enumerate() {
        debug!(batch = n, addresses = batch.len(), endpoint = %self.endpoint, "querying whois");
        let response = self.exchange(batch).await?;
        records.extend(parse_response(&response));
      }
      // Batches can meet on a repeated address.
      records.dedup_by(|a, b| a.address == b.address);

      info!(queried = addresses.len(), answered = records.len(), "whois lookup finished");
      Ok(records)
    }
  }
}

// ─── Wire format ─────────────────────────────────────────────────────────────

pub(crate) fn prepare_query(addresses: &[IpAddr]) -> String {
  let mut query = String::from("begin\n");
  for address in addresses {
    query.push_str(&address.to_string());
    query.push('\n');
  }
  query.push_str("end\n");
  query
}

/// Parse a bulk answer. The first line is the server banner and the last is
/// whatever follows the final newline; both are discarded.
pub(crate) fn parse_response(raw: &str) -> Vec<AsRecord> {
  let lines: Vec<&str> = raw.split('\n').collect();
  if lines.len() < 2 {
    return Vec::new();
  }

  let mut records: Vec<AsRecord> = Vec::new();
  for line in &lines[1..lines.len() - 1] {
    let columns: Vec<&str> = line.split('|').map(str::trim).collect();
    let [number, address, name] = columns[..] else {
      warn!(columns = columns.len(), line, "unexpected whois line; want 3 columns");
      continue;
    };

    let Ok(address) = address.parse::<IpAddr>() else {
      debug!(line, "whois line without an address");
      continue;
    };
    if records.last().is_some_and(|last| last.address == address) {
      continue;
    }
    let Ok(number) = number.parse::<u32>() else {
      debug!(%address, as_number = number, "no AS announces this address");
      continue;
    };

    records.push(AsRecord { number, name: name.to_owned(), address });
  }
  records
}
