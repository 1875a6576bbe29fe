//! Batch planning for grouped writes
//!
//! The store executes batches atomically but only when every operation shares
//! one partition key, the batch holds at most [`MAX_BATCH_OPERATIONS`]
//! operations, its estimated payload stays within [`MAX_BATCH_BYTES`], and no
//! row key appears twice. Records are grouped by partition first, then each
//! group is cut into batches in input order.

use crate::storage::store::{StoredRecord, TableOperation};
use std::collections::{BTreeMap, HashMap};

/// Maximum operations per batch accepted by the store
pub const MAX_BATCH_OPERATIONS: usize = 100;

/// Maximum estimated payload per batch accepted by the store (4 MiB)
pub const MAX_BATCH_BYTES: usize = 4 * 1024 * 1024;

/// Limits applied when cutting batches
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchLimits {
    pub max_operations: usize,
    pub max_bytes: usize,
}

impl Default for BatchLimits {
    fn default() -> Self {
        Self {
            max_operations: MAX_BATCH_OPERATIONS,
            max_bytes: MAX_BATCH_BYTES,
        }
    }
}

/// A batch ready to be sent to the store
#[derive(Debug, Clone)]
pub struct PlannedBatch {
    pub partition_key: String,
    pub operations: Vec<TableOperation>,
    pub estimated_bytes: usize,
}

/// Group records by partition key.
///
/// Within a partition, a later record with the same row key replaces the
/// earlier one, which is what applying the writes one by one would leave.
pub fn group_by_partition(records: Vec<StoredRecord>) -> BTreeMap<String, Vec<StoredRecord>> {
    let mut groups: BTreeMap<String, Vec<StoredRecord>> = BTreeMap::new();
    let mut positions: HashMap<(String, String), usize> = HashMap::new();

    for record in records {
        let key = (record.partition_key.clone(), record.row_key.clone());
        let group = groups.entry(record.partition_key.clone()).or_default();
        match positions.get(&key) {
            Some(&idx) => {
                tracing::debug!(
                    "Collapsing duplicate row {}/{} within one write",
                    key.0,
                    key.1
                );
                group[idx] = record;
            }
            None => {
                positions.insert(key, group.len());
                group.push(record);
            }
        }
    }

    groups
}

/// Cut one partition's records into insert-or-replace batches.
///
/// A batch is closed when adding the next record would push its estimated
/// size past `max_bytes`, or once it holds `max_operations` records. A single
/// record larger than `max_bytes` still travels alone; the store decides
/// whether to accept it.
pub fn plan_batches(
    partition_key: &str,
    records: Vec<StoredRecord>,
    limits: BatchLimits,
) -> Vec<PlannedBatch> {
    let mut batches = Vec::new();
    let mut current = PlannedBatch {
        partition_key: partition_key.to_string(),
        operations: Vec::new(),
        estimated_bytes: 0,
    };

    for record in records {
        debug_assert_eq!(record.partition_key, partition_key);
        let size = record.estimated_size();

        if !current.operations.is_empty() && current.estimated_bytes + size > limits.max_bytes {
            batches.push(std::mem::replace(
                &mut current,
                PlannedBatch {
                    partition_key: partition_key.to_string(),
                    operations: Vec::new(),
                    estimated_bytes: 0,
                },
            ));
        }

        current.estimated_bytes += size;
        current
            .operations
            .push(TableOperation::insert_or_replace(record));

        if current.operations.len() >= limits.max_operations {
            batches.push(std::mem::replace(
                &mut current,
                PlannedBatch {
                    partition_key: partition_key.to_string(),
                    operations: Vec::new(),
                    estimated_bytes: 0,
                },
            ));
        }
    }

    if !current.operations.is_empty() {
        batches.push(current);
    }

    batches
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::property::{PropertyMap, PropertyValue};
    use crate::storage::store::OperationKind;

    fn record(pk: &str, rk: &str, payload: usize) -> StoredRecord {
        let mut props = PropertyMap::new();
        props.insert("Payload".into(), PropertyValue::String("x".repeat(payload)));
        StoredRecord::new(pk, rk, props)
    }

    #[test]
    fn test_count_limit() {
        let records: Vec<_> = (0..250).map(|i| record("p", &format!("{:04}", i), 1)).collect();
        let batches = plan_batches("p", records, BatchLimits::default());

        let sizes: Vec<usize> = batches.iter().map(|b| b.operations.len()).collect();
        assert_eq!(sizes, vec![100, 100, 50]);
        assert!(batches
            .iter()
            .flat_map(|b| &b.operations)
            .all(|op| op.kind == OperationKind::InsertOrReplace));
    }

    #[test]
    fn test_byte_limit_splits_and_preserves_every_record() {
        // ~1 MiB per record: the string alone is 2 bytes per char
        let records: Vec<_> = (0..10)
            .map(|i| record("p", &format!("{:02}", i), 512 * 1024))
            .collect();
        let batches = plan_batches("p", records, BatchLimits::default());

        assert!(batches.len() > 1);
        for batch in &batches {
            assert!(batch.estimated_bytes <= MAX_BATCH_BYTES);
            let recomputed: usize = batch.operations.iter().map(|op| op.record.estimated_size()).sum();
            assert_eq!(recomputed, batch.estimated_bytes);
        }

        let keys: Vec<String> = batches
            .iter()
            .flat_map(|b| b.operations.iter().map(|op| op.record.row_key.clone()))
            .collect();
        let expected: Vec<String> = (0..10).map(|i| format!("{:02}", i)).collect();
        assert_eq!(keys, expected);
    }

    #[test]
    fn test_oversized_record_travels_alone() {
        let limits = BatchLimits {
            max_operations: 10,
            max_bytes: 100,
        };
        let records = vec![record("p", "a", 1), record("p", "b", 200), record("p", "c", 1)];
        let batches = plan_batches("p", records, limits);

        let sizes: Vec<usize> = batches.iter().map(|b| b.operations.len()).collect();
        assert_eq!(sizes, vec![1, 1, 1]);
    }

    #[test]
    fn test_empty_input() {
        assert!(plan_batches("p", Vec::new(), BatchLimits::default()).is_empty());
    }

    #[test]
    fn test_group_by_partition_collapses_duplicates() {
        let mut later = record("a", "1", 1);
        later
            .properties
            .insert("Marker".into(), PropertyValue::Bool(true));

        let groups = group_by_partition(vec![
            record("a", "1", 1),
            record("b", "1", 1),
            record("a", "2", 1),
            later.clone(),
        ]);

        assert_eq!(groups.len(), 2);
        let a = &groups["a"];
        assert_eq!(a.len(), 2);
        assert_eq!(a[0], later);
        assert_eq!(a[1].row_key, "2");
        assert_eq!(groups["b"].len(), 1);
    }
}
