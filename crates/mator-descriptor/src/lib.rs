//! Relay server-descriptor codec.
//!
//! Turns the text documents published by the directory authorities (and
//! archived by CollecTor) into [`mator_core::descriptor::RelayDescriptor`]
//! values. Pure synchronous; no I/O.
//!
//! # Quick start
//!
//! ```no_run
//! let document = std::fs::read_to_string("2020-03-01-00-05-00-server-descriptors").unwrap();
//! for result in mator_descriptor::parse_many(&document) {
//!   match result {
//!     Ok(descriptor) => println!("{} {}", descriptor.fingerprint, descriptor.published),
//!     Err(e) => eprintln!("skipping: {e}"),
//!   }
//! }
//! ```

pub mod error;
mod parse;

pub use error::{Error, Result};
use mator_core::descriptor::RelayDescriptor;

/// Marker line closing every descriptor.
pub const END_SIGNATURE: &str = "-----END SIGNATURE-----";

/// Parse a single descriptor.
pub fn parse(input: &str) -> Result<RelayDescriptor> { parse::parse_one(input) }

/// Parse every descriptor in a document.
///
/// Each `router … -----END SIGNATURE-----` block is parsed independently; a
/// malformed block yields `Err(…)` in its position without aborting the rest.
/// Text outside blocks (annotations, blank lines) is ignored.
pub fn parse_many(input: &str) -> Vec<Result<RelayDescriptor>> {
  split_descriptors(input)
    .into_iter()
    .map(|block| block.and_then(parse::parse_one))
    .collect()
}

/// Split a document into raw descriptor blocks.
fn split_descriptors(input: &str) -> Vec<Result<&str>> {
  let mut blocks = Vec::new();
  let mut start: Option<(usize, usize)> = None;
  let mut offset = 0usize;

  for (number, raw) in input.split_inclusive('\n').enumerate() {
    let line = raw.trim_end_matches(['\n', '\r']);
    if line.starts_with("router ") {
      // A new block before the closing signature cuts the open one off.
      if let Some((_, opened)) = start {
        blocks.push(Err(Error::Unterminated(opened)));
      }
      start = Some((offset, number + 1));
    }
    offset += raw.len();
    if line == END_SIGNATURE
      && let Some((begin, _)) = start.take()
    {
      blocks.push(Ok(&input[begin..offset]));
    }
  }

  if let Some((_, line)) = start {
    blocks.push(Err(Error::Unterminated(line)));
  }
  blocks
}
