//! Core value types shared by the storage engines
//!
//! - `Range`: an ordered, half-open interval `[begin, end)`
//! - `TryResult`: the outcome of an operation whose failure is expected
//!   (lookup miss, unresolvable record) and therefore not an error

use crate::storage::error::{StorageError, StorageResult};
use chrono::{DateTime, Utc};

/// Half-open interval `[begin, end)` with `begin <= end`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Range<T> {
    begin: T,
    end: T,
}

impl<T: PartialOrd> Range<T> {
    /// Create a new range, failing if `begin > end`
    pub fn new(begin: T, end: T) -> StorageResult<Self> {
        if begin <= end {
            Ok(Self { begin, end })
        } else {
            Err(StorageError::InvalidRange)
        }
    }

    /// Whether `value` falls within `[begin, end)`
    pub fn contains(&self, value: &T) -> bool {
        *value >= self.begin && *value < self.end
    }

    /// Whether the range holds no values at all
    pub fn is_empty(&self) -> bool {
        self.begin == self.end
    }
}

impl<T> Range<T> {
    pub fn begin(&self) -> &T {
        &self.begin
    }

    pub fn end(&self) -> &T {
        &self.end
    }

    pub fn into_inner(self) -> (T, T) {
        (self.begin, self.end)
    }
}

/// Time interval used for retrievals
pub type TimeRange = Range<DateTime<Utc>>;

impl Range<DateTime<Utc>> {
    /// Range covering the last `duration` up to now
    pub fn last(duration: chrono::TimeDelta) -> StorageResult<Self> {
        Self::ending_at(Utc::now(), duration)
    }

    /// Range covering `duration` up to `end`
    pub fn ending_at(end: DateTime<Utc>, duration: chrono::TimeDelta) -> StorageResult<Self> {
        let begin = end
            .checked_sub_signed(duration)
            .ok_or(StorageError::InvalidRange)?;
        Self::new(begin, end)
    }
}

/// Outcome of an operation that is allowed to fail without an error
#[must_use]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TryResult<T> {
    /// The operation produced a value
    Success(T),
    /// The value was missing, malformed, or rejected
    Failure,
}

impl<T> TryResult<T> {
    pub fn is_success(&self) -> bool {
        matches!(self, TryResult::Success(_))
    }

    /// The payload, if the operation succeeded
    pub fn value(&self) -> Option<&T> {
        match self {
            TryResult::Success(value) => Some(value),
            TryResult::Failure => None,
        }
    }

    pub fn into_option(self) -> Option<T> {
        match self {
            TryResult::Success(value) => Some(value),
            TryResult::Failure => None,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> TryResult<U> {
        match self {
            TryResult::Success(value) => TryResult::Success(f(value)),
            TryResult::Failure => TryResult::Failure,
        }
    }
}

impl<T> From<Option<T>> for TryResult<T> {
    fn from(value: Option<T>) -> Self {
        match value {
            Some(value) => TryResult::Success(value),
            None => TryResult::Failure,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_range_rejects_reversed_bounds() {
        assert!(Range::new(1, 2).is_ok());
        assert!(Range::new(2, 2).is_ok());
        assert!(matches!(Range::new(3, 2), Err(StorageError::InvalidRange)));
    }

    #[test]
    fn test_range_is_half_open() {
        let range = Range::new(1000, 2000).unwrap();

        assert!(!range.contains(&999));
        assert!(range.contains(&1000));
        assert!(range.contains(&1999));
        assert!(!range.contains(&2000));
        assert!(!range.is_empty());
        assert!(Range::new(5, 5).unwrap().is_empty());
    }

    #[test]
    fn test_time_range() {
        let begin = Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2024, 1, 1, 11, 0, 0).unwrap();
        let range: TimeRange = Range::new(begin, end).unwrap();

        assert_eq!(*range.begin(), begin);
        assert_eq!(*range.end(), end);
        assert!(Range::new(end, begin).is_err());

        let recent = TimeRange::last(chrono::TimeDelta::hours(1)).unwrap();
        assert!(recent.begin() < recent.end());
    }

    #[test]
    fn test_last_rejects_unrepresentable_durations() {
        let end = Utc.with_ymd_and_hms(2024, 1, 1, 11, 0, 0).unwrap();
        let hour = TimeRange::ending_at(end, chrono::TimeDelta::hours(1)).unwrap();
        assert_eq!(*hour.begin(), Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap());

        assert!(matches!(
            TimeRange::ending_at(end, chrono::TimeDelta::days(100_000_000)),
            Err(StorageError::InvalidRange)
        ));
        assert!(matches!(
            TimeRange::last(chrono::TimeDelta::days(100_000_000)),
            Err(StorageError::InvalidRange)
        ));
        assert!(matches!(
            TimeRange::last(chrono::TimeDelta::hours(-1)),
            Err(StorageError::InvalidRange)
        ));
    }

    #[test]
    fn test_try_result_conversions() {
        let hit: TryResult<u32> = Some(7).into();
        assert!(hit.is_success());
        assert_eq!(hit.value(), Some(&7));
        assert_eq!(hit.map(|v| v * 2).into_option(), Some(14));

        let miss: TryResult<u32> = None.into();
        assert!(!miss.is_success());
        assert_eq!(miss.into_option(), None);
    }
}
