//! Integration tests for `SnapshotStore` and its sink against an in-memory
//! database.

use std::{collections::BTreeSet, net::IpAddr};

use chrono::{DateTime, TimeZone, Utc};
use mator_core::{
  descriptor::{ExitAction, ExitPolicy, Fingerprint, RelayDescriptor},
  record::{AddressMetadata, DescriptorRecord, FamilyEdge, NodeRecord},
};

use crate::{Error, RowCounts, SnapshotStore};

async fn store() -> SnapshotStore {
  SnapshotStore::open_in_memory()
    .await
    .expect("in-memory store")
}

fn at(d: u32, h: u32) -> DateTime<Utc> {
  Utc.with_ymd_and_hms(2020, 3, d, h, 0, 0).unwrap()
}

fn fingerprint(n: u8) -> Fingerprint {
  Fingerprint::parse(&format!("{n:02X}").repeat(20)).unwrap()
}

fn descriptor(n: u8, published: DateTime<Utc>) -> RelayDescriptor {
  let mut exit_policy = ExitPolicy::default();
  exit_policy.push(ExitAction::Reject, "*:25");
  exit_policy.push(ExitAction::Accept, "*:*");
  RelayDescriptor {
    fingerprint: fingerprint(n),
    nickname: format!("relay{n}"),
    published,
    address: "1.2.3.4".parse().unwrap(),
    bandwidth_avg: 1000,
    bandwidth_burst: 2000,
    bandwidth_observed: 500,
    platform: "Linux".into(),
    tor_version: "0.4.2.6".into(),
    hibernating: false,
    exit_policy,
    family: BTreeSet::new(),
  }
}

fn geo(address: &str) -> AddressMetadata {
  AddressMetadata {
    address:   address.parse::<IpAddr>().unwrap(),
    as_number: 3,
    as_name:   "MIT-GATEWAYS - Massachusetts Institute of Technology, US".into(),
    country:   Some("US".into()),
    latitude:  Some(42.3626),
    longitude: Some(-71.0843),
  }
}

// ─── Sink ────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn sink_commits_every_record_kind() {
  let s = store().await;
  let (handles, sink) = s.sink(1);
  let task = tokio::spawn(sink.run());

  handles
    .nodes
    .send(NodeRecord { id: 1, fingerprint: fingerprint(1) })
    .await
    .unwrap();
  handles
    .descriptors
    .send(DescriptorRecord {
      node_id:     1,
      descriptor:  descriptor(1, at(2, 0)),
      valid_from:  at(1, 0),
      valid_until: at(5, 0),
    })
    .await
    .unwrap();
  handles
    .families
    .send(FamilyEdge { ida: 1, idb: 2, start: at(3, 0), end: at(4, 0) })
    .await
    .unwrap();
  handles.geoip.send(geo("1.2.3.4")).await.unwrap();
  drop(handles);

  let counts = task.await.unwrap().unwrap();
  assert_eq!(
    counts,
    RowCounts { nodes: 1, descriptors: 1, families: 1, geoip: 1 }
  );
  assert_eq!(s.row_counts().await.unwrap(), counts);

  let nodes = s.nodes().await.unwrap();
  assert_eq!(nodes[0].fingerprint, fingerprint(1));

  let rows = s.descriptors().await.unwrap();
  assert_eq!(rows[0].nickname, "relay1");
  assert_eq!(rows[0].address, "1.2.3.4");
  assert_eq!(rows[0].version, "0.4.2.6");
  assert_eq!(rows[0].exit_policy, "accept *:*\nreject *:25\n");
  assert_eq!(rows[0].start_time, at(1, 0));
  assert_eq!(rows[0].end_time, at(5, 0));

  let families = s.families().await.unwrap();
  assert_eq!(families, vec![FamilyEdge { ida: 1, idb: 2, start: at(3, 0), end: at(4, 0) }]);

  let geoip = s.geoip().await.unwrap();
  assert_eq!(geoip, vec![geo("1.2.3.4")]);
}

#[tokio::test]
async fn sink_with_no_records_commits_empty_snapshot() {
  let s = store().await;
  let (handles, sink) = s.sink(1);
  drop(handles);

  let counts = sink.run().await.unwrap();
  assert_eq!(counts, RowCounts::default());
}

#[tokio::test]
async fn sink_waits_for_every_queue_to_close() {
  let s = store().await;
  let (handles, sink) = s.sink(1);
  let task = tokio::spawn(sink.run());

  let crate::SinkHandles { nodes, descriptors, families, geoip, abandon } = handles;
  drop(descriptors);
  drop(families);
  drop(geoip);
  drop(abandon);

  nodes
    .send(NodeRecord { id: 7, fingerprint: fingerprint(7) })
    .await
    .unwrap();
  tokio::task::yield_now().await;
  assert!(!task.is_finished());

  drop(nodes);
  let counts = task.await.unwrap().unwrap();
  assert_eq!(counts.nodes, 1);
}

#[tokio::test]
async fn failed_write_rolls_back_everything() {
  let s = store().await;
  let (handles, sink) = s.sink(1);
  let task = tokio::spawn(sink.run());

  handles.geoip.send(geo("1.2.3.4")).await.unwrap();
  handles
    .nodes
    .send(NodeRecord { id: 1, fingerprint: fingerprint(1) })
    .await
    .unwrap();
  // Duplicate primary key.
  let _ = handles
    .nodes
    .send(NodeRecord { id: 1, fingerprint: fingerprint(2) })
    .await;

  let result = task.await.unwrap();
  assert!(matches!(result, Err(Error::Database(_))));

  // The sink is gone, so its queues are closed.
  assert!(
    handles
      .nodes
      .send(NodeRecord { id: 3, fingerprint: fingerprint(3) })
      .await
      .is_err()
  );

  assert_eq!(s.row_counts().await.unwrap(), RowCounts::default());
}

#[tokio::test]
async fn abandoned_snapshot_rolls_back() {
  let s = store().await;
  let (handles, sink) = s.sink(1);
  let task = tokio::spawn(sink.run());

  let crate::SinkHandles { nodes, descriptors, families, geoip, abandon } = handles;
  nodes
    .send(NodeRecord { id: 1, fingerprint: fingerprint(1) })
    .await
    .unwrap();
  geoip.send(geo("1.2.3.4")).await.unwrap();
  drop(descriptors);
  drop(families);

  abandon.send(()).unwrap();
  let result = task.await.unwrap();
  assert!(matches!(result, Err(Error::Abandoned)));
  drop(nodes);
  drop(geoip);

  assert_eq!(s.row_counts().await.unwrap(), RowCounts::default());
}

// ─── Store ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn create_replaces_existing_file() {
  let dir = tempfile::tempdir().unwrap();
  let path = dir.path().join("server-descriptors-2020-03.db");
  std::fs::write(&path, b"not a database").unwrap();

  let s = SnapshotStore::create(&path).await.unwrap();
  assert_eq!(s.row_counts().await.unwrap(), RowCounts::default());
}

#[tokio::test]
async fn create_persists_across_reopen() {
  let dir = tempfile::tempdir().unwrap();
  let path = dir.path().join("snapshot.db");

  {
    let s = SnapshotStore::create(&path).await.unwrap();
    let (handles, sink) = s.sink(4);
    handles
      .nodes
      .send(NodeRecord { id: 1, fingerprint: fingerprint(9) })
      .await
      .unwrap();
    drop(handles);
    sink.run().await.unwrap();
  }

  let conn = rusqlite::Connection::open(&path).unwrap();
  let fp: String = conn
    .query_row("SELECT fingerprint FROM nodes WHERE id = 1", [], |r| r.get(0))
    .unwrap();
  assert_eq!(fp, fingerprint(9).as_str());
}

#[tokio::test]
async fn negative_stored_as_number_is_an_error() {
  let dir = tempfile::tempdir().unwrap();
  let path = dir.path().join("snapshot.db");
  drop(SnapshotStore::create(&path).await.unwrap());

  let conn = rusqlite::Connection::open(&path).unwrap();
  conn
    .execute(
      "INSERT INTO geoip (ip, country, lat, long, as_number, as_name)
       VALUES ('1.2.3.4', NULL, NULL, NULL, -1, 'bogus')",
      [],
    )
    .unwrap();
  drop(conn);

  let s = SnapshotStore::open(&path).await.unwrap();
  assert!(matches!(
    s.geoip().await,
    Err(Error::OutOfRange { column: "as_number", value: -1 })
  ));
}
