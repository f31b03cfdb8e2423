//! [`SnapshotStore`]: creation and read-back of a snapshot database.

use std::{net::IpAddr, path::Path};

use chrono::{DateTime, Utc};
use mator_core::{
  descriptor::Fingerprint,
  record::{AddressMetadata, FamilyEdge, NodeId, NodeRecord},
};
use tracing::info;

use crate::{
  encode::decode_dt,
  schema::SCHEMA,
  sink::{RowCounts, SinkHandles, SnapshotSink},
  Error, Result,
};

// ─── Store ───────────────────────────────────────────────────────────────────

/// A snapshot backed by a single SQLite file.
///
/// Clones share one connection thread.
#[derive(Clone)]
pub struct SnapshotStore {
  conn: tokio_rusqlite::Connection,
}

/// One `descriptors` row as read back from the database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredDescriptor {
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
  pub start_time:         DateTime<Utc>,
  pub end_time:           DateTime<Utc>,
}

impl SnapshotStore {
  /// Create an empty snapshot at `path`, replacing any existing file.
  pub async fn create(path: impl AsRef<Path>) -> Result<Self> {
    let path = path.as_ref();
    if tokio::fs::try_exists(path).await? {
      info!(path = %path.display(), "removing existing database");
      tokio::fs::remove_file(path).await?;
    }
    let conn = tokio_rusqlite::Connection::open(path).await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  /// Open an existing snapshot for reading back.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path.as_ref()).await?;
    Ok(Self { conn })
  }

  /// Open an empty in-memory snapshot.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  async fn init_schema(&self) -> Result<()> {
    self
      .conn
      .call(|conn| {
        conn.execute_batch(SCHEMA)?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  /// Split the store into producer handles and the sink that serves them.
  ///
  /// `capacity` bounds every queue; producers wait while the sink is busy.
  pub fn sink(&self, capacity: usize) -> (SinkHandles, SnapshotSink) {
    SnapshotSink::new(self.conn.clone(), capacity)
  }

  // ── Reads ─────────────────────────────────────────────────────────────────

  pub async fn row_counts(&self) -> Result<RowCounts> {
    let counts = self
      .conn
      .call(|conn| {
        let count = |table: &str| -> rusqlite::Result<usize> {
          conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |r| {
            r.get::<_, i64>(0)
          })
          .map(|n| n as usize)
        };
        Ok(RowCounts {
          nodes:       count("nodes")?,
          descriptors: count("descriptors")?,
          families:    count("families")?,
          geoip:       count("geoip")?,
        })
      })
      .await?;
    Ok(counts)
  }

  /// All nodes, ordered by id.
  pub async fn nodes(&self) -> Result<Vec<NodeRecord>> {
    let raws: Vec<(i64, String)> = self
      .conn
      .call(|conn| {
        let mut stmt = conn.prepare("SELECT id, fingerprint FROM nodes ORDER BY id")?;
        let rows = stmt
          .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws
      .into_iter()
      .map(|(id, fp)| -> Result<NodeRecord> {
        Ok(NodeRecord { id, fingerprint: Fingerprint::parse(&fp)? })
      })
      .collect()
  }

  /// All descriptor rows, ordered by node and start time.
  pub async fn descriptors(&self) -> Result<Vec<StoredDescriptor>> {
    type Raw = (
      i64, String, String, i64, i64, i64, String, String, bool, String, String,
      String,
    );

    let raws: Vec<Raw> = self
      .conn
      .call(|conn| {
        let mut stmt = conn.prepare(
          "SELECT node_id, nickname, address, bandwidth_avg, bandwidth_burst,
                  bandwidth_observed, platform, version, hibernating,
                  exit_policy, start_time, end_time
           FROM descriptors
           ORDER BY node_id, start_time",
        )?;
        let rows = stmt
          .query_map([], |row| {
            Ok((
              row.get(0)?,
              row.get(1)?,
              row.get(2)?,
              row.get(3)?,
              row.get(4)?,
              row.get(5)?,
              row.get(6)?,
              row.get(7)?,
              row.get(8)?,
              row.get(9)?,
              row.get(10)?,
              row.get(11)?,
            ))
          })?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws
      .into_iter()
      .map(|r| -> Result<StoredDescriptor> {
        Ok(StoredDescriptor {
          node_id:            r.0,
          nickname:           r.1,
          address:            r.2,
          bandwidth_avg:      r.3,
          bandwidth_burst:    r.4,
          bandwidth_observed: r.5,
          platform:           r.6,
          version:            r.7,
          hibernating:        r.8,
          exit_policy:        r.9,
          start_time:         decode_dt(&r.10)?,
          end_time:           decode_dt(&r.11)?,
        })
      })
      .collect()
  }

  /// All family edges, ordered by (ida, idb, start).
  pub async fn families(&self) -> Result<Vec<FamilyEdge>> {
    let raws: Vec<(i64, i64, String, String)> = self
      .conn
      .call(|conn| {
        let mut stmt = conn.prepare(
          "SELECT ida, idb, start_time, end_time FROM families
           ORDER BY ida, idb, start_time",
        )?;
        let rows = stmt
          .query_map([], |row| {
            Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
          })?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws
      .into_iter()
      .map(|(ida, idb, start, end)| -> Result<FamilyEdge> {
        Ok(FamilyEdge { ida, idb, start: decode_dt(&start)?, end: decode_dt(&end)? })
      })
      .collect()
  }

  /// All geoip rows, ordered by address text.
  pub async fn geoip(&self) -> Result<Vec<AddressMetadata>> {
    type Raw = (String, Option<String>, Option<f64>, Option<f64>, i64, String);

    let raws: Vec<Raw> = self
      .conn
      .call(|conn| {
        let mut stmt = conn.prepare(
          "SELECT ip, country, lat, long, as_number, as_name FROM geoip ORDER BY ip",
        )?;
        let rows = stmt
          .query_map([], |row| {
            Ok((
              row.get(0)?,
              row.get(1)?,
              row.get(2)?,
              row.get(3)?,
              row.get(4)?,
              row.get(5)?,
            ))
          })?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws
      .into_iter()
      .map(|(ip, country, latitude, longitude, as_number, as_name)| -> Result<AddressMetadata> {
        Ok(AddressMetadata {
          address: ip.parse::<IpAddr>()?,
          as_number: u32::try_from(as_number)
            .map_err(|_| Error::OutOfRange { column: "as_number", value: as_number })?,
          as_name,
          country,
          latitude,
          longitude,
        })
      })
      .collect()
  }
}
