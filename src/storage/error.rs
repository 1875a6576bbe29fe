//! Storage layer error types
//!
//! Defines all errors that can occur in the time-bucketed storage layer.
//! Resolution failures (malformed rows, provider rejections) are deliberately
//! absent: they surface as a failed [`TryResult`](super::TryResult) or a
//! skipped record, never as an error.

use crate::storage::time_unit::TimeUnit;
use chrono::{DateTime, Utc};
use thiserror::Error;

/// Errors that can occur in the storage engines
#[derive(Error, Debug)]
pub enum StorageError {
    /// I/O operation failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Settings could not be serialized or deserialized
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Settings are malformed or incomplete
    #[error("Configuration error: {0}")]
    Config(String),

    /// No table is configured for the requested time unit
    #[error("No table configured for time unit {0}")]
    UnknownTimeUnit(TimeUnit),

    /// No store connection is configured for the requested region
    #[error("No connection configured for region {0}")]
    UnknownRegion(String),

    /// A row-key format string cannot be used
    #[error("Invalid row-key format {format:?}: {reason}")]
    InvalidRowKeyFormat { format: String, reason: String },

    /// Range bounds out of order
    #[error("Invalid range: begin must not be after end")]
    InvalidRange,

    /// Timestamp cannot be rendered as a distinct row key
    #[error("Timestamp {0} is outside the row-key year range")]
    TimeOutOfRange(DateTime<Utc>),

    /// The store has no table with this name
    #[error("Table not found: {0}")]
    TableNotFound(String),

    /// The store refused a batch as a whole
    #[error("Batch rejected: {0}")]
    BatchRejected(String),

    /// Point operation targeted a missing entity
    #[error("Entity not found: {partition_key}/{row_key}")]
    EntityNotFound {
        partition_key: String,
        row_key: String,
    },

    /// Insert targeted an entity that already exists
    #[error("Entity already exists: {partition_key}/{row_key}")]
    EntityAlreadyExists {
        partition_key: String,
        row_key: String,
    },

    /// Any other failure reported by the backing store
    #[error("Store error: {0}")]
    Store(String),

    /// Lock acquisition failed
    #[error("Lock error: {0}")]
    Lock(String),

    /// The operation observed its cancellation token
    #[error("Operation cancelled")]
    Cancelled,

    /// One or more concurrent sub-operations failed; all of them ran to completion
    #[error("{operation}: {failed} of {total} operations failed (first: {})", first_message(.errors))]
    Aggregate {
        operation: String,
        failed: usize,
        total: usize,
        errors: Vec<StorageError>,
    },
}

fn first_message(errors: &[StorageError]) -> String {
    errors
        .first()
        .map(|e| e.to_string())
        .unwrap_or_else(|| "none".to_string())
}

impl StorageError {
    /// Whether this error stems from settings or arguments rather than the store
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            StorageError::Config(_)
                | StorageError::UnknownTimeUnit(_)
                | StorageError::UnknownRegion(_)
                | StorageError::InvalidRowKeyFormat { .. }
                | StorageError::InvalidRange
                | StorageError::TimeOutOfRange(_)
        )
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for StorageError {
    fn from(err: toml::de::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}

impl From<toml::ser::Error> for StorageError {
    fn from(err: toml::ser::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}

/// Result type alias for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Fold the settled results of a fan-out into one result.
///
/// Every result has already completed when this is called. If any failed,
/// the failures are reported together as [`StorageError::Aggregate`].
pub fn collect_settled<T>(
    operation: &str,
    results: Vec<StorageResult<T>>,
) -> StorageResult<Vec<T>> {
    let total = results.len();
    let mut values = Vec::with_capacity(total);
    let mut errors = Vec::new();

    for result in results {
        match result {
            Ok(value) => values.push(value),
            Err(e) => errors.push(e),
        }
    }

    if errors.is_empty() {
        return Ok(values);
    }

    tracing::warn!(
        "{}: {} of {} operations failed",
        operation,
        errors.len(),
        total
    );

    Err(StorageError::Aggregate {
        operation: operation.to_string(),
        failed: errors.len(),
        total,
        errors,
    })
}
