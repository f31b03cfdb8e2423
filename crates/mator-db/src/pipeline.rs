//! The snapshot build driver.
//!
//! ```text
//!  main ─────────┐
//!  complementary ┼─▶ TimelineAccumulator ──▶ Reconciled
//!  recent ×N ────┘        (barrier)            │
//!                              ┌───────────────┼───────────────┐
//!                              ▼               ▼               ▼
//!                            emit      FamilyTimeline      enrich
//!                        nodes, descr.     families         geoip
//!                              └───────────────┼───────────────┘
//!                                              ▼
//!                                         SnapshotSink
//! ```

use std::{
  ops::ControlFlow,
  sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
  },
};

use mator_core::{
  descriptor::RelayDescriptor,
  lookup::{AsRegistry, GeoLookup},
  month::TargetMonth,
  source::{DescriptorSource, SourceStats},
};
use mator_store_sqlite::{RowCounts, SinkHandles, SnapshotStore};
use tokio::task::{JoinError, JoinSet};
use tracing::{info, warn};

use crate::{
  Error, Result,
  enrich::enrich,
  family::FamilyTimeline,
  reconcile::{Reconciled, TimelineAccumulator, emit},
};

/// The descriptor streams of one run.
#[derive(Debug)]
pub struct Sources<S> {
  pub main:          Option<S>,
  pub complementary: Option<S>,
  pub recent:        Vec<S>,
}

impl<S> Default for Sources<S> {
  fn default() -> Self { Self { main: None, complementary: None, recent: Vec::new() } }
}

/// What a finished run produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Summary {
  pub sources: SourceStats,
  pub relays:  usize,
  pub rows:    RowCounts,
}

pub struct Pipeline<R, G> {
  month:               TargetMonth,
  registry:            Arc<R>,
  geo:                 Arc<G>,
  sink_queue_capacity: usize,
}

impl<R, G> Pipeline<R, G>
where
  R: AsRegistry + 'static,
  G: GeoLookup + 'static,
{
  pub fn new(month: TargetMonth, registry: R, geo: G) -> Self {
    Self { month, registry: Arc::new(registry), geo: Arc::new(geo), sink_queue_capacity: 1 }
  }

  pub fn with_sink_queue_capacity(mut self, capacity: usize) -> Self {
    self.sink_queue_capacity = capacity.max(1);
    self
  }

  /// Read every source, then reconcile, derive and enrich into `store`.
  pub async fn run<S>(self, sources: Sources<S>, store: &SnapshotStore) -> Result<Summary>
  where
    S: DescriptorSource + 'static,
  {
    let (stats, reconciled) = self.read_sources(sources).await?;
    let relays = reconciled.timelines.len();
    let rows = self.write(reconciled, store).await?;

    info!(
      month = %self.month,
      relays,
      nodes = rows.nodes,
      descriptors = rows.descriptors,
      families = rows.families,
      geoip = rows.geoip,
      "snapshot built"
    );
    Ok(Summary { sources: stats, relays, rows })
  }

  // ── Phase 1: read up to the barrier ────────────────────────────────────────

  async fn read_sources<S>(&self, sources: Sources<S>) -> Result<(SourceStats, Reconciled)>
  where
    S: DescriptorSource + 'static,
  {
    let accumulator = Arc::new(TimelineAccumulator::new());
    // Raised on the first failure; readers still running stop at their next
    // descriptor.
    let stop = Arc::new(AtomicBool::new(false));
    let mut readers: JoinSet<Result<SourceStats>> = JoinSet::new();

    if let Some(main) = sources.main {
      let (acc, stop) = (accumulator.clone(), stop.clone());
      readers.spawn_blocking(move || read(main, &stop, |d| acc.push_main(d)));
    } else {
      warn!("no main archive; continuing with an empty main stream");
    }
    if let Some(complementary) = sources.complementary {
      let (acc, stop) = (accumulator.clone(), stop.clone());
      readers.spawn_blocking(move || {
        read(complementary, &stop, |d| acc.offer_complementary(d))
      });
    }
    for recent in sources.recent {
      let (acc, stop) = (accumulator.clone(), stop.clone());
      readers.spawn_blocking(move || read(recent, &stop, |d| acc.push_recent(d)));
    }

    let mut stats = SourceStats::default();
    while let Some(joined) = readers.join_next().await {
      match joined.map_err(reconcile_join).and_then(|r| r) {
        Ok(s) => stats.merge(s),
        Err(e) => {
          stop.store(true, Ordering::Relaxed);
          return Err(e);
        }
      }
    }

    let accumulator = Arc::into_inner(accumulator)
      .ok_or_else(|| Error::Reconcile("accumulator still shared after the barrier".into()))?;
    Ok((stats, accumulator.into_reconciled(self.month)))
  }

  // ── Phase 2: produce into the sink ─────────────────────────────────────────

  async fn write(&self, reconciled: Reconciled, store: &SnapshotStore) -> Result<RowCounts> {
    let Reconciled { month, mut timelines, ids, addresses } = reconciled;
    let families = FamilyTimeline::take_from(&mut timelines, ids, month);

    let (handles, sink) = store.sink(self.sink_queue_capacity);
    let SinkHandles { nodes, descriptors, families: family_tx, geoip, abandon } = handles;
    // Keeps the sink from committing until every producer has been judged.
    let guard = geoip.clone();
    let sink = tokio::spawn(sink.run());

    let emitter = tokio::spawn(emit(timelines, month, nodes, descriptors));
    let deriver = tokio::task::spawn_blocking(move || {
      families.derive(|edge| {
        family_tx
          .blocking_send(edge)
          .map_err(|_| Error::SinkClosed("families"))
      })
    });
    let registry = self.registry.clone();
    let geo = self.geo.clone();
    let enricher =
      tokio::spawn(async move { enrich(&*registry, &*geo, &addresses, &geoip).await });

    // Returns on the first producer failure; the others then see the
    // abandoned sink's closed queues.
    let produced = tokio::try_join!(
      async { emitter.await.map_err(reconcile_join)? },
      async { deriver.await.map_err(|e| Error::Family(e.to_string()))? },
      async { enricher.await.map_err(Error::enrichment)? },
    );
    let failure = produced.err();

    if failure.is_some() {
      // The receiver is gone if the sink already failed.
      let _ = abandon.send(());
    } else {
      drop(abandon);
    }
    drop(guard);

    let written = sink.await.map_err(|e| Error::SinkTask(e.to_string()))?;
    match (failure, written) {
      (None, Ok(rows)) => Ok(rows),
      (None, Err(e)) => Err(e.into()),
      // A closed queue is the sink's failure surfacing in a producer.
      (Some(Error::SinkClosed(_)), Err(e)) if !matches!(e, mator_store_sqlite::Error::Abandoned) => {
        Err(e.into())
      }
      (Some(e), _) => Err(e),
    }
  }
}

fn read<S, F>(mut source: S, stop: &AtomicBool, mut push: F) -> Result<SourceStats>
where
  S: DescriptorSource,
  F: FnMut(RelayDescriptor),
{
  let stats = source
    .process(|d| {
      if stop.load(Ordering::Relaxed) {
        return ControlFlow::Break(());
      }
      push(d);
      ControlFlow::Continue(())
    })
    .map_err(|e| Error::Source { name: source.name().to_owned(), error: Box::new(e) })?;
  info!(
    source = source.name(),
    documents = stats.documents,
    descriptors = stats.descriptors,
    malformed = stats.malformed,
    "source read"
  );
  Ok(stats)
}

fn reconcile_join(e: JoinError) -> Error { Error::Reconcile(e.to_string()) }
