//! Relay descriptors: one published snapshot of a relay's state.
//!
//! Descriptors are produced by a [`DescriptorSource`](crate::source::DescriptorSource),
//! reconciled into per-relay timelines and finally moved into the snapshot
//! sink. Nothing in this module knows about the text format they come from.

use std::{collections::BTreeSet, fmt, net::IpAddr};

use chrono::{DateTime, Utc};

use crate::{Error, Result};

// ─── Fingerprint ─────────────────────────────────────────────────────────────

/// Stable relay identity: 40 upper-case hexadecimal characters.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Fingerprint(String);

impl Fingerprint {
  pub const HEX_LEN: usize = 40;

  /// Parse a fingerprint, ignoring embedded spaces (the `fingerprint` line
  /// groups the digits in blocks of four) and letter case.
  pub fn parse(raw: &str) -> Result<Self> {
    let hex: String = raw
      .chars()
      .filter(|c| !c.is_whitespace())
      .map(|c| c.to_ascii_uppercase())
      .collect();
    if hex.len() == Self::HEX_LEN && hex.chars().all(|c| c.is_ascii_hexdigit())
    {
      Ok(Self(hex))
    } else {
      Err(Error::InvalidFingerprint(raw.to_owned()))
    }
  }

  /// Interpret one token of a `family` line.
  ///
  /// Accepts `$HEX`, `$HEX=nick` and `$HEX~nick`. Bare nicknames cannot be
  /// matched against an identity and yield `None`.
  pub fn from_family_token(token: &str) -> Option<Self> {
    let hex = token.strip_prefix('$')?;
    let hex = hex.split(['=', '~']).next().unwrap_or(hex);
    Self::parse(hex).ok()
  }

  pub fn as_str(&self) -> &str { &self.0 }
}

impl fmt::Display for Fingerprint {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

impl TryFrom<String> for Fingerprint {
  type Error = Error;

  fn try_from(value: String) -> Result<Self> { Self::parse(&value) }
}

impl From<Fingerprint> for String {
  fn from(value: Fingerprint) -> Self { value.0 }
}

// ─── Exit policy ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitAction {
  Accept,
  Reject,
}

impl ExitAction {
  pub fn keyword(self) -> &'static str {
    match self {
      Self::Accept => "accept",
      Self::Reject => "reject",
    }
  }

  pub fn from_keyword(s: &str) -> Result<Self> {
    match s {
      "accept" => Ok(Self::Accept),
      "reject" => Ok(Self::Reject),
      other => Err(Error::UnknownPolicyAction(other.to_owned())),
    }
  }
}

/// One `accept`/`reject` line, e.g. `reject 10.0.0.0/8:*`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExitRule {
  pub action:  ExitAction,
  /// `address[/mask]:port[-port]`, kept verbatim.
  pub pattern: String,
}

/// Exit rules in declared order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExitPolicy {
  pub rules: Vec<ExitRule>,
}

impl ExitPolicy {
  pub fn push(&mut self, action: ExitAction, pattern: impl Into<String>) {
    self.rules.push(ExitRule { action, pattern: pattern.into() });
  }

  pub fn is_empty(&self) -> bool { self.rules.is_empty() }

  /// Storage form: every accept rule, then every reject rule, each as a
  /// `\n`-terminated line and each group in declared order.
  pub fn to_lines(&self) -> String {
    let mut out = String::new();
    for action in [ExitAction::Accept, ExitAction::Reject] {
      for rule in self.rules.iter().filter(|r| r.action == action) {
        out.push_str(action.keyword());
        out.push(' ');
        out.push_str(&rule.pattern);
        out.push('\n');
      }
    }
    out
  }
}

// ─── Descriptor ──────────────────────────────────────────────────────────────

/// One published snapshot of a relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayDescriptor {
  pub fingerprint:        Fingerprint,
  pub nickname:           String,
  pub published:          DateTime<Utc>,
  pub address:            IpAddr,
  pub bandwidth_avg:      u64,
  pub bandwidth_burst:    u64,
  pub bandwidth_observed: u64,
  /// Operating system part of the `platform` line.
  pub platform:           String,
  /// Tor version part of the `platform` line.
  pub tor_version:        String,
  pub hibernating:        bool,
  pub exit_policy:        ExitPolicy,
  /// Relays this one claims common operatorship with.
  pub family:             BTreeSet<Fingerprint>,
}

impl RelayDescriptor {
  pub fn declares(&self, other: &Fingerprint) -> bool {
    self.family.contains(other)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  const FP: &str = "A9D1E3F5B7C9D1E3F5B7C9D1E3F5B7C9D1E3F5B7";

  #[test]
  fn fingerprint_accepts_grouped_lowercase() {
    let grouped = "a9d1 e3f5 b7c9 d1e3 f5b7 c9d1 e3f5 b7c9 d1e3 f5b7";
    assert_eq!(Fingerprint::parse(grouped).unwrap().as_str(), FP);
  }

  #[test]
  fn fingerprint_rejects_short_or_non_hex() {
    assert!(Fingerprint::parse("ABCD").is_err());
    assert!(Fingerprint::parse(&"Z".repeat(40)).is_err());
  }

  #[test]
  fn family_token_forms() {
    let plain = Fingerprint::from_family_token(&format!("${FP}")).unwrap();
    assert_eq!(plain.as_str(), FP);

    let named = Fingerprint::from_family_token(&format!("${FP}=moria")).unwrap();
    assert_eq!(named, plain);

    let unnamed = Fingerprint::from_family_token(&format!("${FP}~moria")).unwrap();
    assert_eq!(unnamed, plain);

    assert!(Fingerprint::from_family_token("moria1").is_none());
  }

  #[test]
  fn exit_policy_groups_accepts_before_rejects() {
    let mut policy = ExitPolicy::default();
    policy.push(ExitAction::Reject, "0.0.0.0/8:*");
    policy.push(ExitAction::Accept, "*:80");
    policy.push(ExitAction::Reject, "*:*");
    policy.push(ExitAction::Accept, "*:443");

    assert_eq!(
      policy.to_lines(),
      "accept *:80\naccept *:443\nreject 0.0.0.0/8:*\nreject *:*\n"
    );
  }

  #[test]
  fn empty_exit_policy_is_empty_string() {
    assert_eq!(ExitPolicy::default().to_lines(), "");
  }
}
