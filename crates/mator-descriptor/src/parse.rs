//! Server-descriptor keyword-line parser.
//!
//! Pipeline:
//!   raw &str
//!     └─ keyword_lines()   → (keyword, arguments), object blocks skipped
//!          └─ apply_line()  → Accumulator
//!               └─ finish() → RelayDescriptor

use std::{collections::BTreeSet, net::IpAddr};

use chrono::{DateTime, NaiveDateTime, Utc};
use mator_core::descriptor::{ExitAction, ExitPolicy, Fingerprint, RelayDescriptor};

use crate::error::{Error, Result};

const PUBLISHED_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

// ─── Line iteration ──────────────────────────────────────────────────────────

/// Yield `(keyword, arguments)` for every keyword line.
///
/// Lines inside `-----BEGIN …-----` / `-----END …-----` objects, annotations
/// (`@…`) and blank lines are skipped. The legacy `opt ` prefix is removed.
fn keyword_lines(input: &str) -> impl Iterator<Item = (&str, &str)> {
  let mut in_object = false;
  input.lines().filter_map(move |raw| {
    let line = raw.trim_end_matches('\r');
    if line.starts_with("-----BEGIN ") {
      in_object = true;
      return None;
    }
    if line.starts_with("-----END ") {
      in_object = false;
      return None;
    }
    if in_object || line.is_empty() || line.starts_with('@') {
      return None;
    }
    let line = line.strip_prefix("opt ").unwrap_or(line);
    Some(line.split_once(' ').unwrap_or((line, "")))
  })
}

// ─── Accumulator ─────────────────────────────────────────────────────────────

#[derive(Default)]
struct Accumulator {
  nickname:    Option<String>,
  address:     Option<IpAddr>,
  published:   Option<DateTime<Utc>>,
  fingerprint: Option<Fingerprint>,
  bandwidth:   (u64, u64, u64),
  platform:    String,
  tor_version: String,
  hibernating: bool,
  exit_policy: ExitPolicy,
  family:      BTreeSet<Fingerprint>,
}

fn malformed(keyword: &'static str, args: &str) -> Error {
  Error::MalformedLine { keyword, line: format!("{keyword} {args}") }
}

impl Accumulator {
  fn apply_line(&mut self, keyword: &str, args: &str) -> Result<()> {
    match keyword {
      "router" => {
        // Only the first router line belongs to this descriptor.
        if self.nickname.is_some() {
          return Ok(());
        }
        let mut parts = args.split_whitespace();
        let nickname = parts.next().ok_or_else(|| malformed("router", args))?;
        let address = parts
          .next()
          .and_then(|a| a.parse::<IpAddr>().ok())
          .ok_or_else(|| malformed("router", args))?;
        self.nickname = Some(nickname.to_owned());
        self.address = Some(address);
      }
      "published" => {
        let at = NaiveDateTime::parse_from_str(args.trim(), PUBLISHED_FORMAT)
          .map_err(|_| malformed("published", args))?;
        self.published = Some(at.and_utc());
      }
      "fingerprint" => {
        self.fingerprint = Some(Fingerprint::parse(args)?);
      }
      "bandwidth" => {
        let values: Vec<u64> = args
          .split_whitespace()
          .map(str::parse)
          .collect::<std::result::Result<_, _>>()
          .map_err(|_| malformed("bandwidth", args))?;
        match values.as_slice() {
          [avg, burst, observed] => self.bandwidth = (*avg, *burst, *observed),
          _ => return Err(malformed("bandwidth", args)),
        }
      }
      "platform" => {
        let (version, os) = split_platform(args);
        self.tor_version = version;
        self.platform = os;
      }
      "hibernating" => {
        self.hibernating = match args.trim() {
          "1" => true,
          "0" => false,
          _ => return Err(malformed("hibernating", args)),
        };
      }
      "family" => {
        self.family.extend(
          args.split_whitespace().filter_map(Fingerprint::from_family_token),
        );
      }
      "accept" | "reject" => {
        let action = ExitAction::from_keyword(keyword)?;
        let pattern = args.trim();
        if pattern.is_empty() {
          return Err(malformed(action.keyword(), args));
        }
        self.exit_policy.push(action, pattern);
      }
      // Every other keyword is irrelevant to the snapshot.
      _ => {}
    }
    Ok(())
  }

  fn finish(self) -> Result<RelayDescriptor> {
    let (bandwidth_avg, bandwidth_burst, bandwidth_observed) = self.bandwidth;
    Ok(RelayDescriptor {
      fingerprint: self.fingerprint.ok_or(Error::MissingKeyword("fingerprint"))?,
      nickname: self.nickname.ok_or(Error::MissingKeyword("router"))?,
      published: self.published.ok_or(Error::MissingKeyword("published"))?,
      address: self.address.ok_or(Error::MissingKeyword("router"))?,
      bandwidth_avg,
      bandwidth_burst,
      bandwidth_observed,
      platform: self.platform,
      tor_version: self.tor_version,
      hibernating: self.hibernating,
      exit_policy: self.exit_policy,
      family: self.family,
    })
  }
}

/// `Tor 0.4.2.6 on Linux` → (`0.4.2.6`, `Linux`).
///
/// Anything that does not follow that shape is kept whole as the platform
/// with an empty version.
fn split_platform(args: &str) -> (String, String) {
  let args = args.trim();
  if let Some(rest) = args.strip_prefix("Tor ")
    && let Some((version, os)) = rest.split_once(" on ")
  {
    return (version.trim().to_owned(), os.trim().to_owned());
  }
  (String::new(), args.to_owned())
}

// ─── Entry point ─────────────────────────────────────────────────────────────

pub(crate) fn parse_one(input: &str) -> Result<RelayDescriptor> {
  let mut acc = Accumulator::default();
  for (keyword, args) in keyword_lines(input) {
    acc.apply_line(keyword, args)?;
  }
  acc.finish()
}
