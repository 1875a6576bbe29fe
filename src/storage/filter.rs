//! Retrieval filter construction
//!
//! A retrieval filter selects the rows whose row key lies in
//! `[format(begin), format(end))`, optionally within a single partition.
//! Filters are typed so the in-memory store can evaluate them directly, and
//! render to the store's textual query syntax through `Display`:
//!
//! ```text
//! PartitionKey eq 'camp1' and (RowKey ge '2024-01-01-10-00' and RowKey lt '2024-01-01-11-00')
//! ```
//!
//! Correctness relies on the row-key format sorting chronologically, which is
//! checked when settings are validated, not here.

use crate::storage::row_key::RowKeyFormat;
use crate::storage::types::TimeRange;
use std::fmt;

/// Row-key range filter, optionally restricted to one partition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableFilter {
    /// Required partition key, if any
    pub partition_key: Option<String>,
    /// Inclusive lower row-key bound
    pub row_key_from: String,
    /// Exclusive upper row-key bound
    pub row_key_to: String,
}

impl TableFilter {
    /// Whether a record with these keys passes the filter
    pub fn matches(&self, partition_key: &str, row_key: &str) -> bool {
        if let Some(ref pk) = self.partition_key {
            if pk != partition_key {
                return false;
            }
        }
        row_key >= self.row_key_from.as_str() && row_key < self.row_key_to.as_str()
    }
}

/// Quote a string literal for the store's filter syntax
fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

impl fmt::Display for TableFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let range = format!(
            "RowKey ge {} and RowKey lt {}",
            quote(&self.row_key_from),
            quote(&self.row_key_to)
        );
        match self.partition_key {
            Some(ref pk) => write!(f, "PartitionKey eq {} and ({})", quote(pk), range),
            None => f.write_str(&range),
        }
    }
}

/// Build the filter for all partitions over `interval`.
///
/// Both bounds are rendered through `format`, which truncates them to its
/// resolution. Bounds aligned to the table's unit select exactly the buckets
/// starting in `[begin, end)`. An unaligned `begin` also selects the bucket
/// containing it; an unaligned `end` drops the bucket containing it. Align
/// with [`TimeUnit::ceiling`](crate::storage::TimeUnit::ceiling) on `end` to
/// keep that bucket.
pub fn create_retrieve_filter(format: &RowKeyFormat, interval: &TimeRange) -> TableFilter {
    TableFilter {
        partition_key: None,
        row_key_from: format.format(interval.begin()),
        row_key_to: format.format(interval.end()),
    }
}

/// Build the filter for one partition over `interval`
pub fn create_partition_filter(
    format: &RowKeyFormat,
    interval: &TimeRange,
    partition_key: &str,
) -> TableFilter {
    TableFilter {
        partition_key: Some(partition_key.to_string()),
        ..create_retrieve_filter(format, interval)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::types::Range;
    use chrono::{TimeZone, Utc};

    fn interval() -> TimeRange {
        Range::new(
            Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2024, 1, 1, 11, 0, 0).unwrap(),
        )
        .unwrap()
    }

    #[test]
    fn test_range_filter_text() {
        let format = RowKeyFormat::parse("yyyy-MM-dd-HH-mm").unwrap();
        let filter = create_retrieve_filter(&format, &interval());

        assert_eq!(
            filter.to_string(),
            "RowKey ge '2024-01-01-10-00' and RowKey lt '2024-01-01-11-00'"
        );
    }

    #[test]
    fn test_partition_filter_text() {
        let format = RowKeyFormat::parse("yyyy-MM-dd-HH").unwrap();
        let filter = create_partition_filter(&format, &interval(), "o'brien");

        assert_eq!(
            filter.to_string(),
            "PartitionKey eq 'o''brien' and (RowKey ge '2024-01-01-10' and RowKey lt '2024-01-01-11')"
        );
    }

    #[test]
    fn test_unaligned_bounds_truncate_to_the_format() {
        let format = RowKeyFormat::parse("yyyy-MM-dd-HH").unwrap();
        let at = |h, m| Utc.with_ymd_and_hms(2024, 1, 1, h, m, 0).unwrap();

        // [10:30, 12:00) keeps the 10:00 bucket containing begin
        let filter = create_retrieve_filter(&format, &Range::new(at(10, 30), at(12, 0)).unwrap());
        assert!(filter.matches("camp1", "2024-01-01-10"));
        assert!(filter.matches("camp1", "2024-01-01-11"));
        assert!(!filter.matches("camp1", "2024-01-01-12"));

        // [10:00, 10:30) drops the 10:00 bucket containing end
        let filter = create_retrieve_filter(&format, &Range::new(at(10, 0), at(10, 30)).unwrap());
        assert_eq!(filter.row_key_from, filter.row_key_to);
        assert!(!filter.matches("camp1", "2024-01-01-10"));

        // Ceiling the end keeps it
        let end = crate::storage::TimeUnit::Hour.ceiling(at(10, 30));
        let filter = create_retrieve_filter(&format, &Range::new(at(10, 0), end).unwrap());
        assert!(filter.matches("camp1", "2024-01-01-10"));
        assert!(!filter.matches("camp1", "2024-01-01-11"));
    }

    #[test]
    fn test_matches_is_half_open() {
        let format = RowKeyFormat::parse("yyyy-MM-dd-HH-mm").unwrap();
        let filter = create_partition_filter(&format, &interval(), "camp1");

        assert!(filter.matches("camp1", "2024-01-01-10-00"));
        assert!(filter.matches("camp1", "2024-01-01-10-59"));
        assert!(!filter.matches("camp1", "2024-01-01-11-00"));
        assert!(!filter.matches("camp1", "2024-01-01-09-59"));
        assert!(!filter.matches("camp2", "2024-01-01-10-30"));

        let any = create_retrieve_filter(&format, &interval());
        assert!(any.matches("camp2", "2024-01-01-10-30"));
    }
}
