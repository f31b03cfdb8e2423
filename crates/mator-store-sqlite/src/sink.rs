//! [`SnapshotSink`], the single writer of a snapshot.
//!
//! Producers hold the [`SinkHandles`] senders; the sink owns the receivers
//! and the connection. It writes every record inside one transaction and
//! commits once all four queues have been closed by their producers. A failed
//! write, or a producer abandoning the snapshot, rolls the transaction back
//! and ends the run.

use mator_core::record::{AddressMetadata, DescriptorRecord, FamilyEdge, NodeRecord};
use tokio::sync::{mpsc, oneshot};
use tokio_rusqlite::Connection;
use tracing::{debug, error, info, warn};

use crate::{
  encode::{DescriptorRow, GeoRow, encode_dt},
  schema::{INSERT_DESCRIPTOR, INSERT_FAMILY, INSERT_GEOIP, INSERT_NODE},
  Error, Result,
};

/// Rows written per table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RowCounts {
  pub nodes:       usize,
  pub descriptors: usize,
  pub families:    usize,
  pub geoip:       usize,
}

/// Producer side of the sink. Dropping a sender closes that queue.
///
/// Sending on `abandon` makes the sink roll back instead of committing, as
/// long as some queue is still open. Dropping it unused has no effect.
pub struct SinkHandles {
  pub nodes:       mpsc::Sender<NodeRecord>,
  pub descriptors: mpsc::Sender<DescriptorRecord>,
  pub families:    mpsc::Sender<FamilyEdge>,
  pub geoip:       mpsc::Sender<AddressMetadata>,
  pub abandon:     oneshot::Sender<()>,
}

struct Inbound {
  nodes:       mpsc::Receiver<NodeRecord>,
  descriptors: mpsc::Receiver<DescriptorRecord>,
  families:    mpsc::Receiver<FamilyEdge>,
  geoip:       mpsc::Receiver<AddressMetadata>,
  abandon:     oneshot::Receiver<()>,
}

/// Consumer side; drive it with [`SnapshotSink::run`].
pub struct SnapshotSink {
  conn:    Connection,
  inbound: Inbound,
}

impl SnapshotSink {
  /// Build a sink whose queues hold at most `capacity` records each.
  pub(crate) fn new(conn: Connection, capacity: usize) -> (SinkHandles, Self) {
    let capacity = capacity.max(1);
    let (nodes_tx, nodes) = mpsc::channel(capacity);
    let (descriptors_tx, descriptors) = mpsc::channel(capacity);
    let (families_tx, families) = mpsc::channel(capacity);
    let (geoip_tx, geoip) = mpsc::channel(capacity);
    let (abandon_tx, abandon) = oneshot::channel();

    let handles = SinkHandles {
      nodes:       nodes_tx,
      descriptors: descriptors_tx,
      families:    families_tx,
      geoip:       geoip_tx,
      abandon:     abandon_tx,
    };
    let inbound = Inbound { nodes, descriptors, families, geoip, abandon };
    let sink = Self { conn, inbound };
    (handles, sink)
  }

  /// Drain every queue into one transaction, then commit.
  ///
  /// Returns once all producers have dropped their senders. On the first
  /// failed write the transaction is rolled back and the error returned;
  /// the receivers are dropped with `self`, so blocked producers observe a
  /// closed queue.
  pub async fn run(self) -> Result<RowCounts> {
    let Self { conn, mut inbound } = self;

    conn
      .call(|conn| {
        conn.execute_batch("BEGIN")?;
        Ok(())
      })
      .await?;

    match drain(&conn, &mut inbound).await {
      Ok(counts) => {
        conn
          .call(|conn| {
            conn.execute_batch("COMMIT")?;
            Ok(())
          })
          .await?;
        info!(
          nodes = counts.nodes,
          descriptors = counts.descriptors,
          families = counts.families,
          geoip = counts.geoip,
          "snapshot committed"
        );
        Ok(counts)
      }
      Err(e) => {
        match &e {
          Error::Abandoned => warn!("snapshot abandoned by a producer; rolling back"),
          _ => error!(error = %e, "snapshot write failed; rolling back"),
        }
        let rollback = conn
          .call(|conn| {
            conn.execute_batch("ROLLBACK")?;
            Ok(())
          })
          .await;
        if let Err(rb) = rollback {
          error!(error = %rb, "rollback failed");
        }
        Err(e)
      }
    }
  }
}

/// Await whichever queues are still open until none are.
async fn drain(conn: &Connection, inbound: &mut Inbound) -> Result<RowCounts> {
  let mut counts = RowCounts::default();
  let (mut nodes_open, mut descriptors_open, mut families_open, mut geoip_open) =
    (true, true, true, true);
  let mut open = 4usize;
  let mut abandon_armed = true;

  while open > 0 {
    tokio::select! {
      record = inbound.nodes.recv(), if nodes_open => match record {
        Some(node) => {
          insert_node(conn, node).await?;
          counts.nodes += 1;
        }
        None => {
          debug!("node queue closed");
          nodes_open = false;
          open -= 1;
        }
      },
      record = inbound.descriptors.recv(), if descriptors_open => match record {
        Some(descriptor) => {
          insert_descriptor(conn, descriptor).await?;
          counts.descriptors += 1;
        }
        None => {
          debug!("descriptor queue closed");
          descriptors_open = false;
          open -= 1;
        }
      },
      record = inbound.families.recv(), if families_open => match record {
        Some(edge) => {
          insert_family(conn, edge).await?;
          counts.families += 1;
        }
        None => {
          debug!("family queue closed");
          families_open = false;
          open -= 1;
        }
      },
      record = inbound.geoip.recv(), if geoip_open => match record {
        Some(meta) => {
          insert_geoip(conn, meta).await?;
          counts.geoip += 1;
        }
        None => {
          debug!("geoip queue closed");
          geoip_open = false;
          open -= 1;
        }
      },
      signal = &mut inbound.abandon, if abandon_armed => match signal {
        Ok(()) => return Err(Error::Abandoned),
        Err(_) => abandon_armed = false,
      },
    }
  }

  // The last queue may close while an abandon is already pending.
  if abandon_armed && inbound.abandon.try_recv().is_ok() {
    return Err(Error::Abandoned);
  }
  Ok(counts)
}

// ─── Inserts ─────────────────────────────────────────────────────────────────

async fn insert_node(conn: &Connection, node: NodeRecord) -> Result<()> {
  let fingerprint = String::from(node.fingerprint);
  conn
    .call(move |conn| {
      conn
        .prepare_cached(INSERT_NODE)?
        .execute(rusqlite::params![node.id, fingerprint])?;
      Ok(())
    })
    .await?;
  Ok(())
}

async fn insert_descriptor(conn: &Connection, record: DescriptorRecord) -> Result<()> {
  let row = DescriptorRow::from(record);
  conn
    .call(move |conn| {
      conn.prepare_cached(INSERT_DESCRIPTOR)?.execute(rusqlite::params![
        row.node_id,
        row.nickname,
        row.address,
        row.bandwidth_avg,
        row.bandwidth_burst,
        row.bandwidth_observed,
        row.platform,
        row.version,
        row.hibernating,
        row.exit_policy,
        row.start_time,
        row.end_time,
      ])?;
      Ok(())
    })
    .await?;
  Ok(())
}

async fn insert_family(conn: &Connection, edge: FamilyEdge) -> Result<()> {
  let start = encode_dt(edge.start);
  let end = encode_dt(edge.end);
  conn
    .call(move |conn| {
      conn
        .prepare_cached(INSERT_FAMILY)?
        .execute(rusqlite::params![edge.ida, edge.idb, start, end])?;
      Ok(())
    })
    .await?;
  Ok(())
}

async fn insert_geoip(conn: &Connection, meta: AddressMetadata) -> Result<()> {
  let row = GeoRow::from(meta);
  conn
    .call(move |conn| {
      conn.prepare_cached(INSERT_GEOIP)?.execute(rusqlite::params![
        row.ip,
        row.country,
        row.lat,
        row.long,
        row.as_number,
        row.as_name,
      ])?;
      Ok(())
    })
    .await?;
  Ok(())
}
