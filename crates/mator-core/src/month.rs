//! Target-month arithmetic.
//!
//! A snapshot always covers exactly one calendar month in UTC. Descriptor
//! validity intervals and open family intervals are clipped at that month's
//! last second.

use std::{fmt, str::FromStr};

use chrono::{DateTime, Datelike, NaiveDate, TimeDelta, Utc};

use crate::{Error, Result};

/// Earliest month for which CollecTor publishes server descriptors.
pub const FIRST_SUPPORTED: TargetMonth = TargetMonth { year: 2007, month: 1 };

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TargetMonth {
  year:  i32,
  month: u32,
}

impl TargetMonth {
  pub fn new(year: i32, month: u32) -> Result<Self> {
    if (1..=12).contains(&month) {
      Ok(Self { year, month })
    } else {
      Err(Error::MalformedMonth(format!("{year:04}-{month:02}")))
    }
  }

  /// Parse `YYYY-MM`.
  pub fn parse(s: &str) -> Result<Self> {
    let malformed = || Error::MalformedMonth(s.to_owned());
    let (year, month) = s.split_once('-').ok_or_else(malformed)?;
    if year.len() != 4
      || month.len() != 2
      || !year.chars().chain(month.chars()).all(|c| c.is_ascii_digit())
    {
      return Err(malformed());
    }
    let year = year.parse().map_err(|_| malformed())?;
    let month = month.parse().map_err(|_| malformed())?;
    Self::new(year, month).map_err(|_| malformed())
  }

  /// The month containing `instant`.
  pub fn of(instant: DateTime<Utc>) -> Self {
    Self { year: instant.year(), month: instant.month() }
  }

  pub fn year(&self) -> i32 { self.year }

  pub fn month(&self) -> u32 { self.month }

  /// The month whose archive seeds state carried over into this one.
  pub fn previous(&self) -> Self {
    if self.month == 1 {
      Self { year: self.year - 1, month: 12 }
    } else {
      Self { year: self.year, month: self.month - 1 }
    }
  }

  pub fn next(&self) -> Self {
    if self.month == 12 {
      Self { year: self.year + 1, month: 1 }
    } else {
      Self { year: self.year, month: self.month + 1 }
    }
  }

  fn first_day(&self) -> NaiveDate {
    // `new` only admits months 1..=12, so day 1 always exists.
    NaiveDate::from_ymd_opt(self.year, self.month, 1).unwrap_or_default()
  }

  pub fn days(&self) -> u32 {
    let next = self.next().first_day();
    next.signed_duration_since(self.first_day()).num_days() as u32
  }

  /// `YYYY-MM-01 00:00:00` UTC.
  pub fn first_instant(&self) -> DateTime<Utc> {
    self.first_day().and_time(chrono::NaiveTime::MIN).and_utc()
  }

  /// The last second of the month, `YYYY-MM-<last> 23:59:59` UTC.
  pub fn last_instant(&self) -> DateTime<Utc> {
    self.next().first_instant() - TimeDelta::seconds(1)
  }

  pub fn contains(&self, instant: DateTime<Utc>) -> bool {
    Self::of(instant) == *self
  }

  pub fn is_current(&self, now: DateTime<Utc>) -> bool { self.contains(now) }

  /// Reject months before [`FIRST_SUPPORTED`] and months in the future.
  pub fn validate(&self, now: DateTime<Utc>) -> Result<()> {
    if *self < FIRST_SUPPORTED || *self > Self::of(now) {
      return Err(Error::MonthOutOfRange(self.to_string()));
    }
    Ok(())
  }
}

impl fmt::Display for TargetMonth {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{:04}-{:02}", self.year, self.month)
  }
}

impl FromStr for TargetMonth {
  type Err = Error;

  fn from_str(s: &str) -> Result<Self> { Self::parse(s) }
}

/// Move `instant` one calendar day back, keeping its clock fields.
///
/// Applied to the first descriptor of every relay timeline so that a relay
/// first published early in the month also covers the month's start.
pub fn backdate_one_day(instant: DateTime<Utc>) -> DateTime<Utc> {
  instant - TimeDelta::days(1)
}

#[cfg(test)]
mod tests {
  use chrono::TimeZone;

  use super::*;

  fn at(y: i32, m: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, h, mi, s).unwrap()
  }

  #[test]
  fn parse_accepts_canonical_form() {
    let m = TargetMonth::parse("2020-03").unwrap();
    assert_eq!((m.year(), m.month()), (2020, 3));
    assert_eq!(m.to_string(), "2020-03");
  }

  #[test]
  fn parse_rejects_malformed() {
    for bad in ["2020-3", "2020-13", "2020-00", "20-03", "2020/03", "abcd-ef", ""] {
      assert!(
        matches!(TargetMonth::parse(bad), Err(Error::MalformedMonth(_))),
        "{bad:?} should be rejected"
      );
    }
  }

  #[test]
  fn last_instant_of_march() {
    let m = TargetMonth::parse("2020-03").unwrap();
    assert_eq!(m.last_instant(), at(2020, 3, 31, 23, 59, 59));
    assert_eq!(m.first_instant(), at(2020, 3, 1, 0, 0, 0));
  }

  #[test]
  fn last_instant_handles_leap_february_and_december() {
    assert_eq!(
      TargetMonth::parse("2020-02").unwrap().last_instant(),
      at(2020, 2, 29, 23, 59, 59)
    );
    assert_eq!(
      TargetMonth::parse("2019-02").unwrap().last_instant(),
      at(2019, 2, 28, 23, 59, 59)
    );
    assert_eq!(
      TargetMonth::parse("2019-12").unwrap().last_instant(),
      at(2019, 12, 31, 23, 59, 59)
    );
  }

  #[test]
  fn previous_wraps_year() {
    let jan = TargetMonth::parse("2020-01").unwrap();
    assert_eq!(jan.previous().to_string(), "2019-12");
    assert_eq!(jan.days(), 31);
  }

  #[test]
  fn backdate_crosses_month_boundary() {
    assert_eq!(
      backdate_one_day(at(2020, 3, 1, 0, 30, 0)),
      at(2020, 2, 29, 0, 30, 0)
    );
  }

  #[test]
  fn validate_range() {
    let now = at(2020, 5, 14, 12, 0, 0);
    assert!(TargetMonth::parse("2020-05").unwrap().validate(now).is_ok());
    assert!(TargetMonth::parse("2007-01").unwrap().validate(now).is_ok());
    assert!(matches!(
      TargetMonth::parse("2006-12").unwrap().validate(now),
      Err(Error::MonthOutOfRange(_))
    ));
    assert!(matches!(
      TargetMonth::parse("2020-06").unwrap().validate(now),
      Err(Error::MonthOutOfRange(_))
    ));
  }

  #[test]
  fn current_month_detection() {
    let now = at(2020, 5, 14, 12, 0, 0);
    assert!(TargetMonth::parse("2020-05").unwrap().is_current(now));
    assert!(!TargetMonth::parse("2020-04").unwrap().is_current(now));
  }
}
