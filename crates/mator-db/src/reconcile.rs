//! Timeline reconciliation.
//!
//! Source readers feed a shared [`TimelineAccumulator`]. Once every reader
//! is done it is consumed into [`Reconciled`]: one ascending timeline per
//! relay, the frozen [`IdMap`] and the first-seen address list. [`emit`]
//! then moves every timeline into the sink.

use std::{
  collections::{BTreeMap, HashMap, HashSet},
  net::IpAddr,
  sync::Arc,
};

use chrono::{DateTime, Utc};
use mator_core::{
  descriptor::{Fingerprint, RelayDescriptor},
  month::{TargetMonth, backdate_one_day},
  record::{DescriptorRecord, NodeId, NodeRecord},
};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::{Error, Result};

// ─── Accumulator ─────────────────────────────────────────────────────────────

#[derive(Default)]
struct Streams {
  main:          BTreeMap<Fingerprint, Vec<RelayDescriptor>>,
  /// Latest descriptor per relay from the previous month.
  complementary: HashMap<Fingerprint, RelayDescriptor>,
  recent:        BTreeMap<Fingerprint, Vec<RelayDescriptor>>,
}

/// Merge state shared by all source readers.
#[derive(Default)]
pub struct TimelineAccumulator {
  streams: Mutex<Streams>,
}

impl TimelineAccumulator {
  pub fn new() -> Self { Self::default() }

  pub fn push_main(&self, descriptor: RelayDescriptor) {
    let mut streams = self.streams.lock();
    streams
      .main
      .entry(descriptor.fingerprint.clone())
      .or_default()
      .push(descriptor);
  }

  /// Keep `descriptor` only if it is newer than what is held for its relay.
  pub fn offer_complementary(&self, descriptor: RelayDescriptor) {
    let mut streams = self.streams.lock();
    match streams.complementary.get_mut(&descriptor.fingerprint) {
      Some(held) if descriptor.published > held.published => *held = descriptor,
      Some(_) => {}
      None => {
        streams
          .complementary
          .insert(descriptor.fingerprint.clone(), descriptor);
      }
    }
  }

  pub fn push_recent(&self, descriptor: RelayDescriptor) {
    let mut streams = self.streams.lock();
    streams
      .recent
      .entry(descriptor.fingerprint.clone())
      .or_default()
      .push(descriptor);
  }

  /// Merge the streams into sorted timelines and assign ids.
  pub fn into_reconciled(self, month: TargetMonth) -> Reconciled {
    let Streams { main, complementary, recent } = self.streams.into_inner();

    let mut merged = main;
    for (fingerprint, descriptor) in complementary {
      merged.entry(fingerprint).or_default().push(descriptor);
    }
    for (fingerprint, descriptors) in recent {
      merged.entry(fingerprint).or_default().extend(descriptors);
    }

    let mut ids = HashMap::with_capacity(merged.len());
    let mut addresses = Vec::new();
    let mut seen = HashSet::new();
    let mut timelines = Vec::with_capacity(merged.len());

    for (n, (fingerprint, mut descriptors)) in merged.into_iter().enumerate() {
      descriptors.sort_by_key(|d| d.published);
      let id = n as NodeId + 1;
      ids.insert(fingerprint.clone(), id);

      for d in &descriptors {
        if seen.insert(d.address) {
          addresses.push(d.address);
        }
      }
      timelines.push(RelayTimeline { fingerprint, id, descriptors });
    }

    info!(
      relays = timelines.len(),
      descriptors = timelines.iter().map(|t| t.descriptors.len()).sum::<usize>(),
      addresses = addresses.len(),
      "timelines reconciled"
    );
    Reconciled { month, timelines, ids: Arc::new(IdMap { ids }), addresses }
  }
}

// ─── Reconciled state ────────────────────────────────────────────────────────

/// Fingerprint to node id. Frozen once reconciliation is done.
#[derive(Debug, Default)]
pub struct IdMap {
  ids: HashMap<Fingerprint, NodeId>,
}

impl IdMap {
  pub fn get(&self, fingerprint: &Fingerprint) -> Option<NodeId> {
    self.ids.get(fingerprint).copied()
  }

  pub fn len(&self) -> usize { self.ids.len() }

  pub fn is_empty(&self) -> bool { self.ids.is_empty() }
}

/// All descriptors of one relay, ascending by `published`.
#[derive(Debug)]
pub struct RelayTimeline {
  pub fingerprint: Fingerprint,
  pub id:          NodeId,
  pub descriptors: Vec<RelayDescriptor>,
}

impl RelayTimeline {
  /// `[start, end)` for every descriptor.
  ///
  /// The first start is pulled back one day; each end is the next
  /// descriptor's publish time, and the last one ends at `month`'s last
  /// instant.
  pub fn validity(&self, month: TargetMonth) -> Vec<(DateTime<Utc>, DateTime<Utc>)> {
    let publishes = self.descriptors.iter().map(|d| d.published);
    let ends = publishes.clone().skip(1).chain(std::iter::once(month.last_instant()));
    publishes
      .enumerate()
      .map(|(i, at)| if i == 0 { backdate_one_day(at) } else { at })
      .zip(ends)
      .collect()
  }
}

pub struct Reconciled {
  pub month:     TargetMonth,
  pub timelines: Vec<RelayTimeline>,
  pub ids:       Arc<IdMap>,
  /// Every distinct address, in first-seen order.
  pub addresses: Vec<IpAddr>,
}

// ─── Emission ────────────────────────────────────────────────────────────────

/// Send each relay's node record followed by its descriptor records.
///
/// Returns the number of descriptor records sent.
pub async fn emit(
  timelines: Vec<RelayTimeline>,
  month: TargetMonth,
  nodes: mpsc::Sender<NodeRecord>,
  descriptors: mpsc::Sender<DescriptorRecord>,
) -> Result<usize> {
  let mut sent = 0usize;
  for timeline in timelines {
    let intervals = timeline.validity(month);
    let RelayTimeline { fingerprint, id, descriptors: relay_descriptors } = timeline;

    debug!(%fingerprint, id, descriptors = relay_descriptors.len(), "emitting relay");
    nodes
      .send(NodeRecord { id, fingerprint })
      .await
      .map_err(|_| Error::SinkClosed("nodes"))?;

    for (descriptor, (valid_from, valid_until)) in relay_descriptors.into_iter().zip(intervals) {
      descriptors
        .send(DescriptorRecord { node_id: id, descriptor, valid_from, valid_until })
        .await
        .map_err(|_| Error::SinkClosed("descriptors"))?;
      sent += 1;
    }
  }
  Ok(sent)
}
