//! Mutual-family interval derivation.
//!
//! A family edge between A and B covers the time during which A's current
//! descriptor lists B and B's current descriptor lists A. Each side's
//! declarations are turned into open/close events; an edge is emitted for
//! every stretch where both sides are open at once.

use std::{
  collections::{BTreeSet, HashMap},
  mem,
  sync::Arc,
};

use chrono::{DateTime, Utc};
use mator_core::{
  descriptor::Fingerprint,
  month::TargetMonth,
  record::{FamilyEdge, NodeId},
};
use tracing::{debug, info};

use crate::{
  Result,
  reconcile::{IdMap, RelayTimeline},
};

/// The declared family of one descriptor, from when it became current.
#[derive(Debug)]
struct Declaration {
  at:     DateTime<Utc>,
  family: BTreeSet<Fingerprint>,
}

#[derive(Debug)]
struct RelayFamilies {
  fingerprint:  Fingerprint,
  id:           NodeId,
  declarations: Vec<Declaration>,
}

/// One open (`true`) or close (`false`) event on a declaration timeline.
type Event = (DateTime<Utc>, bool);

/// Family declarations of every relay, detached from the descriptors.
#[derive(Debug)]
pub struct FamilyTimeline {
  month:  TargetMonth,
  relays: Vec<RelayFamilies>,
  index:  HashMap<Fingerprint, usize>,
  ids:    Arc<IdMap>,
}

impl FamilyTimeline {
  /// Move the family sets out of `timelines`, leaving them empty.
  ///
  /// Declarations take the validity start of their descriptor, so the first
  /// one of each relay is backdated like its descriptor interval.
  pub fn take_from(timelines: &mut [RelayTimeline], ids: Arc<IdMap>, month: TargetMonth) -> Self {
    let mut relays = Vec::with_capacity(timelines.len());
    let mut index = HashMap::with_capacity(timelines.len());

    for timeline in timelines.iter_mut() {
      let starts = timeline.validity(month);
      let declarations = timeline
        .descriptors
        .iter_mut()
        .zip(starts)
        .map(|(d, (at, _))| Declaration { at, family: mem::take(&mut d.family) })
        .collect();

      index.insert(timeline.fingerprint.clone(), relays.len());
      relays.push(RelayFamilies {
        fingerprint: timeline.fingerprint.clone(),
        id: timeline.id,
        declarations,
      });
    }

    Self { month, relays, index, ids }
  }

  /// Derive every edge and hand it to `emit`. Returns the number emitted.
  ///
  /// Each declaration is consumed on both sides when its pair is processed,
  /// so a pair is visited once no matter which relay lists the other first.
  pub fn derive<F>(mut self, mut emit: F) -> Result<usize>
  where
    F: FnMut(FamilyEdge) -> Result<()>,
  {
    let month_end = self.month.last_instant();
    let mut emitted = 0usize;

    for a in 0..self.relays.len() {
      for d in 0..self.relays[a].declarations.len() {
        while let Some(declared) = self.relays[a].declarations[d].family.pop_first() {
          let relay_a = &mut self.relays[a];
          if declared == relay_a.fingerprint {
            continue;
          }
          let declarer = relay_a.fingerprint.clone();
          let ida = relay_a.id;

          let mut events = scan(&mut relay_a.declarations[d..], &declared, month_end, true);

          let (Some(&b), Some(idb)) = (self.index.get(&declared), self.ids.get(&declared))
          else {
            debug!(%declarer, %declared, "family member not in this snapshot");
            continue;
          };
          events.extend(scan(&mut self.relays[b].declarations, &declarer, month_end, false));

          events.sort_by_key(|&(at, _)| at);
          for (start, end) in overlaps(&events) {
            emit(FamilyEdge { ida, idb, start, end })?;
            emitted += 1;
          }
        }
      }
    }

    info!(edges = emitted, "family intervals derived");
    Ok(emitted)
  }
}

/// Walk `declarations`, consuming every mention of `target`, and record when
/// the declaration opens and closes. An interval still open at the end
/// closes at `month_end`.
fn scan(
  declarations: &mut [Declaration],
  target: &Fingerprint,
  month_end: DateTime<Utc>,
  opened_by_first: bool,
) -> Vec<Event> {
  let mut events = Vec::new();
  let mut open = false;

  for (i, declaration) in declarations.iter_mut().enumerate() {
    let declares = declaration.family.remove(target) || (i == 0 && opened_by_first);
    if declares != open {
      events.push((declaration.at, declares));
      open = declares;
    }
  }
  if open {
    events.push((month_end, false));
  }
  events
}

/// Intervals during which two open events are outstanding.
fn overlaps(events: &[Event]) -> Vec<(DateTime<Utc>, DateTime<Utc>)> {
  let mut out = Vec::new();
  let mut counter = 0u32;
  let mut opened_at = None;

  for &(at, opens) in events {
    if opens {
      counter += 1;
      if counter == 2 {
        opened_at = Some(at);
      }
    } else {
      if counter == 2
        && let Some(start) = opened_at.take()
        && start < at
      {
        out.push((start, at));
      }
      counter = counter.saturating_sub(1);
    }
  }
  out
}

#[cfg(test)]
mod tests {
  use chrono::TimeZone;

  use super::*;
  use crate::{
    reconcile::TimelineAccumulator,
    tests::{descriptor, fingerprint},
  };

  fn march() -> TargetMonth { TargetMonth::new(2020, 3).unwrap() }

  fn at(d: u32) -> DateTime<Utc> { Utc.with_ymd_and_hms(2020, 3, d, 0, 0, 0).unwrap() }

  /// `(relay, publish day, declared relays)`
  fn derive(relays: &[(u8, u32, &[u8])]) -> Vec<FamilyEdge> {
    let acc = TimelineAccumulator::new();
    for &(n, day, family) in relays {
      let mut d = descriptor(n, at(day));
      d.family = family.iter().map(|&m| fingerprint(m)).collect();
      acc.push_main(d);
    }
    let mut r = acc.into_reconciled(march());
    let families = FamilyTimeline::take_from(&mut r.timelines, r.ids.clone(), march());

    let mut edges = Vec::new();
    families
      .derive(|edge| {
        edges.push(edge);
        Ok(())
      })
      .unwrap();
    edges
  }

  #[test]
  fn mutual_overlap_yields_one_edge() {
    // A lists B during [3, 10), B lists A during [5, 20).
    let edges = derive(&[
      (1, 2, &[]),
      (1, 3, &[2]),
      (1, 10, &[]),
      (2, 2, &[]),
      (2, 5, &[1]),
      (2, 20, &[]),
    ]);
    assert_eq!(edges, vec![FamilyEdge { ida: 1, idb: 2, start: at(5), end: at(10) }]);
  }

  #[test]
  fn unilateral_declaration_yields_nothing() {
    let edges = derive(&[(1, 3, &[2]), (1, 10, &[2]), (2, 4, &[]), (2, 12, &[3])]);
    assert!(edges.is_empty());
  }

  #[test]
  fn disjoint_declarations_yield_nothing() {
    let edges = derive(&[
      (1, 2, &[]),
      (1, 3, &[2]),
      (1, 5, &[]),
      (2, 2, &[]),
      (2, 6, &[1]),
      (2, 9, &[]),
    ]);
    assert!(edges.is_empty());
  }

  #[test]
  fn back_to_back_handover_is_not_an_edge() {
    // A stops at the instant B starts.
    let edges = derive(&[
      (1, 2, &[]),
      (1, 3, &[2]),
      (1, 6, &[]),
      (2, 2, &[]),
      (2, 6, &[1]),
    ]);
    assert!(edges.is_empty());
  }

  #[test]
  fn open_declarations_close_at_month_end() {
    let edges = derive(&[(1, 2, &[]), (1, 4, &[2]), (2, 2, &[]), (2, 8, &[1])]);
    assert_eq!(edges, vec![FamilyEdge {
      ida:   1,
      idb:   2,
      start: at(8),
      end:   march().last_instant(),
    }]);
  }

  #[test]
  fn first_declaration_starts_backdated() {
    let edges = derive(&[(1, 10, &[2]), (2, 10, &[1])]);
    assert_eq!(edges, vec![FamilyEdge {
      ida:   1,
      idb:   2,
      start: at(9),
      end:   march().last_instant(),
    }]);
  }

  #[test]
  fn pair_is_processed_once() {
    let edges = derive(&[(1, 2, &[]), (1, 4, &[2]), (2, 2, &[]), (2, 4, &[1])]);
    assert_eq!(edges.len(), 1);
    assert_eq!((edges[0].ida, edges[0].idb), (1, 2));
  }

  #[test]
  fn redeclaration_yields_separate_edges() {
    // B lists A all month; A lists B during [3, 6) and again from 10.
    let edges = derive(&[
      (1, 2, &[]),
      (1, 3, &[2]),
      (1, 6, &[]),
      (1, 10, &[2]),
      (2, 1, &[1]),
    ]);
    assert_eq!(edges, vec![
      FamilyEdge { ida: 1, idb: 2, start: at(3), end: at(6) },
      FamilyEdge { ida: 1, idb: 2, start: at(10), end: march().last_instant() },
    ]);
  }

  #[test]
  fn edges_hold_only_while_both_declare() {
    let relays: &[(u8, u32, &[u8])] = &[
      (1, 2, &[]),
      (1, 4, &[2]),
      (1, 12, &[]),
      (1, 15, &[2]),
      (1, 25, &[]),
      (2, 2, &[]),
      (2, 6, &[1]),
      (2, 18, &[]),
      (2, 20, &[1]),
    ];
    let edges = derive(relays);
    assert_eq!(edges.len(), 3);

    let declares = |n: u8, m: u8, t: DateTime<Utc>| {
      relays
        .iter()
        .filter(|&&(r, day, _)| r == n && at(day) <= t)
        .last()
        .is_some_and(|&(_, _, family)| family.contains(&m))
    };
    for edge in &edges {
      assert!(declares(1, 2, edge.start) && declares(2, 1, edge.start));
      assert!(!declares(1, 2, edge.end) || !declares(2, 1, edge.end) || edge.end == march().last_instant());
      let before = edge.start - chrono::TimeDelta::seconds(1);
      assert!(!declares(1, 2, before) || !declares(2, 1, before));
    }
  }

  #[test]
  fn self_and_absent_declarations_are_ignored() {
    let edges = derive(&[(1, 2, &[1, 9]), (1, 5, &[1])]);
    assert!(edges.is_empty());
  }

  #[test]
  fn family_sets_are_moved_out_of_descriptors() {
    let acc = TimelineAccumulator::new();
    let mut d = descriptor(1, at(3));
    d.family.insert(fingerprint(2));
    acc.push_main(d);
    let mut r = acc.into_reconciled(march());

    let _families = FamilyTimeline::take_from(&mut r.timelines, r.ids.clone(), march());
    assert!(r.timelines[0].descriptors[0].family.is_empty());
  }

  #[test]
  fn overlaps_skip_zero_length() {
    let t = at(5);
    assert!(overlaps(&[(t, true), (t, true), (t, false), (t, false)]).is_empty());
  }
}
