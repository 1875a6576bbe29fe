//! Time units and interval arithmetic
//!
//! A [`TimeUnit`] is the granularity at which entities are bucketed. Every
//! timestamp maps to the bucket starting at `floor(t, unit)`; buckets are
//! contiguous half-open intervals `[floor(t), floor(t) + 1 unit)`.
//!
//! Fixed-width units (second through day) are measured in UTC, so a day bucket
//! always starts at midnight UTC. Month buckets follow the calendar.

use chrono::{DateTime, Datelike, Months, NaiveDate, NaiveDateTime, TimeDelta, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Granularity of a time bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeUnit {
    Second,
    Minute,
    Hour,
    Day,
    Month,
}

impl TimeUnit {
    /// All units, finest first
    pub fn all() -> &'static [TimeUnit] {
        &[
            TimeUnit::Second,
            TimeUnit::Minute,
            TimeUnit::Hour,
            TimeUnit::Day,
            TimeUnit::Month,
        ]
    }

    /// Identifier appended to a table-name root
    pub fn identifier(&self) -> &'static str {
        match self {
            TimeUnit::Second => "Second",
            TimeUnit::Minute => "Minute",
            TimeUnit::Hour => "Hour",
            TimeUnit::Day => "Day",
            TimeUnit::Month => "Month",
        }
    }

    /// Width of one bucket, for units with a fixed width
    pub fn fixed_width(&self) -> Option<TimeDelta> {
        match self {
            TimeUnit::Second => TimeDelta::try_seconds(1),
            TimeUnit::Minute => TimeDelta::try_minutes(1),
            TimeUnit::Hour => TimeDelta::try_hours(1),
            TimeUnit::Day => TimeDelta::try_days(1),
            TimeUnit::Month => None,
        }
    }

    /// Truncate a timestamp to the start of its bucket
    pub fn floor(&self, ts: DateTime<Utc>) -> DateTime<Utc> {
        let naive = ts.naive_utc();
        let date = naive.date();
        let floored = match self {
            TimeUnit::Second => date.and_hms_opt(naive.hour(), naive.minute(), naive.second()),
            TimeUnit::Minute => date.and_hms_opt(naive.hour(), naive.minute(), 0),
            TimeUnit::Hour => date.and_hms_opt(naive.hour(), 0, 0),
            TimeUnit::Day => date.and_hms_opt(0, 0, 0),
            TimeUnit::Month => {
                NaiveDate::from_ymd_opt(date.year(), date.month(), 1).and_then(|d| d.and_hms_opt(0, 0, 0))
            }
        };
        // Every component above comes from a valid timestamp, truncated towards zero.
        let floored: NaiveDateTime = floored.expect("truncated timestamp components are valid");
        floored.and_utc()
    }

    /// Checked variant of [`TimeUnit::ceiling`]; `None` when the next boundary
    /// is out of chrono's range.
    pub fn checked_ceiling(&self, ts: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let floor = self.floor(ts);
        if floor == ts {
            Some(ts)
        } else {
            self.checked_add(floor, 1)
        }
    }

    /// Round a timestamp up to the next bucket boundary unless it is already aligned
    ///
    /// # Panics
    /// Panics if the boundary is outside chrono's representable range.
    pub fn ceiling(&self, ts: DateTime<Utc>) -> DateTime<Utc> {
        self.checked_ceiling(ts)
            .expect("ceiling out of representable range")
    }

    /// Shift a timestamp by `count` units (negative moves backwards)
    pub fn checked_add(&self, ts: DateTime<Utc>, count: i64) -> Option<DateTime<Utc>> {
        match self {
            TimeUnit::Month => {
                let months = Months::new(u32::try_from(count.unsigned_abs()).ok()?);
                if count >= 0 {
                    ts.checked_add_months(months)
                } else {
                    ts.checked_sub_months(months)
                }
            }
            fixed => {
                let width = fixed.fixed_width()?;
                let seconds = width.num_seconds().checked_mul(count)?;
                ts.checked_add_signed(TimeDelta::try_seconds(seconds)?)
            }
        }
    }

    /// Whether a timestamp sits exactly on a bucket boundary
    pub fn is_aligned(&self, ts: DateTime<Utc>) -> bool {
        self.floor(ts) == ts
    }

    /// Number of whole buckets from the bucket of `begin` to the bucket of `end`
    pub fn buckets_between(&self, begin: DateTime<Utc>, end: DateTime<Utc>) -> i64 {
        let (begin, end) = (self.floor(begin), self.floor(end));
        match self.fixed_width() {
            Some(width) => {
                let span = end.signed_duration_since(begin);
                span.num_seconds() / width.num_seconds()
            }
            None => {
                let months = |d: DateTime<Utc>| d.year() as i64 * 12 + d.month0() as i64;
                months(end) - months(begin)
            }
        }
    }
}

impl std::fmt::Display for TimeUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.identifier())
    }
}

impl FromStr for TimeUnit {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TimeUnit::all()
            .iter()
            .copied()
            .find(|unit| unit.identifier().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown time unit: {}", s))
    }
}

/// A duration expressed as a whole number of time units
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeInterval {
    pub unit: TimeUnit,
    pub length: i64,
}

impl TimeInterval {
    pub fn new(unit: TimeUnit, length: i64) -> Self {
        Self { unit, length }
    }

    /// Interval covering the buckets from `begin`'s bucket up to `end`'s bucket
    pub fn between(unit: TimeUnit, begin: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self::new(unit, unit.buckets_between(begin, end))
    }

    /// Add this interval to a timestamp, returning `None` on overflow
    pub fn checked_add_to(&self, ts: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.unit.checked_add(ts, self.length)
    }
}

impl std::ops::Add<TimeInterval> for DateTime<Utc> {
    type Output = DateTime<Utc>;

    fn add(self, rhs: TimeInterval) -> Self::Output {
        rhs.checked_add_to(self)
            .expect("`DateTime + TimeInterval` overflowed")
    }
}

/// Truncate `ts` to the start of its `unit` bucket
pub fn floor(ts: DateTime<Utc>, unit: TimeUnit) -> DateTime<Utc> {
    unit.floor(ts)
}

/// Round `ts` up to a `unit` boundary
pub fn ceiling(ts: DateTime<Utc>, unit: TimeUnit) -> DateTime<Utc> {
    unit.ceiling(ts)
}
