//! The descriptor source abstraction.
//!
//! A source reads descriptor documents from wherever they live and hands
//! every well-formed descriptor to a callback. Malformed descriptors are the
//! source's problem: it counts them and moves on, it never surfaces a partial
//! document.

use std::{convert::Infallible, ops::ControlFlow};

use crate::descriptor::RelayDescriptor;

/// Counters from one pass over a source.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SourceStats {
  /// Documents (files) opened.
  pub documents:   usize,
  /// Descriptors handed to the callback.
  pub descriptors: usize,
  /// Descriptors dropped because they failed to parse.
  pub malformed:   usize,
}

impl SourceStats {
  pub fn merge(&mut self, other: SourceStats) {
    self.documents += other.documents;
    self.descriptors += other.descriptors;
    self.malformed += other.malformed;
  }
}

pub trait DescriptorSource: Send {
  type Error: std::error::Error + Send + Sync + 'static;

  /// Human-readable name used in logs.
  fn name(&self) -> &str;

  /// Feed every well-formed descriptor to `handler`, in document order.
  ///
  /// Stops early, returning the counts so far, once `handler` breaks.
  fn process<F>(&mut self, handler: F) -> Result<SourceStats, Self::Error>
  where
    F: FnMut(RelayDescriptor) -> ControlFlow<()>;
}

/// An already-parsed batch, drained on first use.
impl DescriptorSource for Vec<RelayDescriptor> {
  type Error = Infallible;

  fn name(&self) -> &str { "in-memory" }

  fn process<F>(&mut self, mut handler: F) -> Result<SourceStats, Infallible>
  where
    F: FnMut(RelayDescriptor) -> ControlFlow<()>,
  {
    let mut stats = SourceStats { documents: 1, ..Default::default() };
    for descriptor in self.drain(..) {
      stats.descriptors += 1;
      if handler(descriptor).is_break() {
        break;
      }
    }
    Ok(stats)
  }
}
