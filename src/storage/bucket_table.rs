//! One time-bucketed table
//!
//! A [`BucketTable`] binds a table handle to the time unit and row-key format
//! it stores. It owns the write and read pipelines shared by the single-region
//! and multi-region engines:
//!
//! ```text
//! Insert:   entities → records → group by partition → batches → store (concurrent)
//! Retrieve: filter → paged scan → parse row key → provider resolve (skip failures)
//! Update:   per entity: point read → provider merge → insert-or-replace (concurrent)
//! ```
//!
//! Concurrency is plain future composition: every independent store call is
//! built up front and driven together with `join_all`. Failures are collected
//! only after every call has settled.

use crate::storage::batch::{group_by_partition, plan_batches, BatchLimits, PlannedBatch};
use crate::storage::error::{collect_settled, StorageError, StorageResult};
use crate::storage::filter::TableFilter;
use crate::storage::provider::EntityProvider;
use crate::storage::row_key::RowKeyFormat;
use crate::storage::store::{StoredRecord, TableHandle, TableOperation, TableStore};
use crate::storage::time_unit::TimeUnit;
use crate::storage::types::TryResult;
use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{Semaphore, SemaphorePermit};
use tokio_util::sync::CancellationToken;

/// Optional cap on concurrently running store calls
#[derive(Debug, Clone, Default)]
pub struct RequestGate {
    permits: Option<Arc<Semaphore>>,
}

impl RequestGate {
    /// Gate allowing `max` concurrent calls, or unbounded for `None`.
    ///
    /// The cap is clamped to `1..=Semaphore::MAX_PERMITS`.
    pub fn new(max: Option<usize>) -> Self {
        Self {
            permits: max.map(|n| Arc::new(Semaphore::new(n.clamp(1, Semaphore::MAX_PERMITS)))),
        }
    }

    /// Slots still free, or `None` when unbounded
    pub fn available(&self) -> Option<usize> {
        self.permits.as_ref().map(|s| s.available_permits())
    }

    pub fn unbounded() -> Self {
        Self::default()
    }

    /// Wait for a slot; the slot is released when the permit drops
    pub async fn enter(&self) -> StorageResult<Option<SemaphorePermit<'_>>> {
        match self.permits {
            Some(ref semaphore) => semaphore
                .acquire()
                .await
                .map(Some)
                .map_err(|e| StorageError::Store(format!("request gate closed: {}", e))),
            None => Ok(None),
        }
    }
}

/// Fail fast once the caller has cancelled
pub(crate) fn ensure_active(cancel: &CancellationToken) -> StorageResult<()> {
    if cancel.is_cancelled() {
        Err(StorageError::Cancelled)
    } else {
        Ok(())
    }
}

/// A table holding one time unit's buckets
pub struct BucketTable<S: TableStore> {
    unit: TimeUnit,
    format: RowKeyFormat,
    handle: TableHandle<S>,
}

impl<S: TableStore> Clone for BucketTable<S> {
    fn clone(&self) -> Self {
        Self {
            unit: self.unit,
            format: self.format.clone(),
            handle: self.handle.clone(),
        }
    }
}

impl<S: TableStore> std::fmt::Debug for BucketTable<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BucketTable")
            .field("unit", &self.unit)
            .field("format", &self.format.pattern())
            .field("table", &self.handle.name())
            .finish()
    }
}

impl<S: TableStore> BucketTable<S> {
    pub fn new(unit: TimeUnit, format: RowKeyFormat, handle: TableHandle<S>) -> Self {
        Self {
            unit,
            format,
            handle,
        }
    }

    pub fn unit(&self) -> TimeUnit {
        self.unit
    }

    pub fn format(&self) -> &RowKeyFormat {
        &self.format
    }

    pub fn table_name(&self) -> &str {
        self.handle.name()
    }

    /// Row key of the bucket containing `time`
    pub fn row_key(&self, time: DateTime<Utc>) -> StorageResult<String> {
        self.format.format_bucket(&self.unit.floor(time))
    }

    /// Convert an entity into the record stored for its bucket
    pub fn to_record<P: EntityProvider>(
        &self,
        provider: &P,
        entity: &P::Entity,
    ) -> StorageResult<StoredRecord> {
        Ok(StoredRecord::new(
            provider.key(entity),
            self.row_key(provider.time(entity))?,
            provider.properties(entity),
        ))
    }

    /// Turn a stored record back into an entity
    pub fn resolve<P: EntityProvider>(
        &self,
        provider: &P,
        record: &StoredRecord,
    ) -> TryResult<P::Entity> {
        match self.format.parse_row_key(&record.row_key) {
            Some(time) => provider.try_resolve(&record.partition_key, time, &record.properties),
            None => TryResult::Failure,
        }
    }

    pub async fn create_if_not_exists(
        &self,
        gate: &RequestGate,
        cancel: &CancellationToken,
    ) -> StorageResult<bool> {
        ensure_active(cancel)?;
        let _permit = gate.enter().await?;
        let created = self.handle.create_if_not_exists().await?;
        if created {
            tracing::info!("Created table {}", self.handle.name());
        } else {
            tracing::debug!("Table {} already exists", self.handle.name());
        }
        Ok(created)
    }

    /// Write entities with insert-or-replace semantics; returns records written
    pub async fn insert<P: EntityProvider>(
        &self,
        provider: &P,
        entities: &[P::Entity],
        limits: BatchLimits,
        gate: &RequestGate,
        cancel: &CancellationToken,
    ) -> StorageResult<usize> {
        ensure_active(cancel)?;
        if entities.is_empty() {
            return Ok(0);
        }

        let records: Vec<StoredRecord> = entities
            .iter()
            .map(|entity| self.to_record(provider, entity))
            .collect::<StorageResult<_>>()?;
        let groups = group_by_partition(records);
        let partitions = groups.len();

        let batches: Vec<PlannedBatch> = groups
            .into_iter()
            .flat_map(|(partition_key, records)| plan_batches(&partition_key, records, limits))
            .collect();
        let written: usize = batches.iter().map(|b| b.operations.len()).sum();

        tracing::debug!(
            "Inserting {} records into {} as {} batches over {} partitions",
            written,
            self.handle.name(),
            batches.len(),
            partitions
        );

        let results = join_all(batches.into_iter().map(|batch| async move {
            ensure_active(cancel)?;
            let _permit = gate.enter().await?;
            self.handle
                .execute_batch(&batch.partition_key, batch.operations)
                .await
        }))
        .await;

        collect_settled(&format!("insert into {}", self.handle.name()), results)?;
        Ok(written)
    }

    /// Scan every page matching `filter`, skipping records that do not resolve
    pub async fn retrieve<P: EntityProvider>(
        &self,
        provider: &P,
        filter: &TableFilter,
        gate: &RequestGate,
        cancel: &CancellationToken,
    ) -> StorageResult<Vec<P::Entity>> {
        let mut entities = Vec::new();
        let mut continuation = None;
        let mut skipped = 0usize;

        loop {
            ensure_active(cancel)?;
            let segment = {
                let _permit = gate.enter().await?;
                self.handle.query_segment(filter, continuation).await?
            };

            tracing::debug!(
                "Read page of {} records from {}",
                segment.records.len(),
                self.handle.name()
            );

            for record in &segment.records {
                match self.resolve(provider, record) {
                    TryResult::Success(entity) => entities.push(entity),
                    TryResult::Failure => skipped += 1,
                }
            }

            continuation = segment.continuation;
            if continuation.is_none() {
                break;
            }
        }

        if skipped > 0 {
            tracing::warn!(
                "Skipped {} unresolvable records in {} for filter {}",
                skipped,
                self.handle.name(),
                filter
            );
        }

        Ok(entities)
    }

    /// Point lookup of the bucket containing `time`
    pub async fn try_retrieve<P: EntityProvider>(
        &self,
        provider: &P,
        partition_key: &str,
        time: DateTime<Utc>,
        gate: &RequestGate,
        cancel: &CancellationToken,
    ) -> StorageResult<TryResult<P::Entity>> {
        ensure_active(cancel)?;
        let row_key = self.row_key(time)?;
        let record = {
            let _permit = gate.enter().await?;
            self.handle.retrieve(partition_key, &row_key).await?
        };

        Ok(match record {
            Some(record) => self.resolve(provider, &record),
            None => TryResult::Failure,
        })
    }

    /// Read-merge-write each entity into its bucket; returns records written.
    ///
    /// Entities are grouped by (key, bucket) but every entity still performs
    /// its own read and write, all concurrently. Two entities for the same
    /// bucket can therefore read the same current value, and the later write
    /// wins. Callers that need exact accumulation must serialize writers per
    /// bucket themselves.
    pub async fn update<P: EntityProvider>(
        &self,
        provider: &P,
        entities: &[P::Entity],
        gate: &RequestGate,
        cancel: &CancellationToken,
    ) -> StorageResult<usize> {
        ensure_active(cancel)?;
        if entities.is_empty() {
            return Ok(0);
        }

        let mut groups: BTreeMap<(String, String), Vec<&P::Entity>> = BTreeMap::new();
        for entity in entities {
            let key = (provider.key(entity), self.row_key(provider.time(entity))?);
            groups.entry(key).or_default().push(entity);
        }

        tracing::debug!(
            "Updating {} entities across {} buckets in {}",
            entities.len(),
            groups.len(),
            self.handle.name()
        );

        let results = join_all(groups.into_iter().flat_map(move |((partition_key, row_key), group)| {
            group.into_iter().map(move |entity| {
                let partition_key = partition_key.clone();
                let row_key = row_key.clone();
                async move {
                    self.merge_one(provider, &partition_key, &row_key, entity, gate, cancel)
                        .await
                }
            })
        }))
        .await;

        let written = collect_settled(&format!("update {}", self.handle.name()), results)?;
        Ok(written.len())
    }

    async fn merge_one<P: EntityProvider>(
        &self,
        provider: &P,
        partition_key: &str,
        row_key: &str,
        incoming: &P::Entity,
        gate: &RequestGate,
        cancel: &CancellationToken,
    ) -> StorageResult<()> {
        ensure_active(cancel)?;
        let current = {
            let _permit = gate.enter().await?;
            self.handle.retrieve(partition_key, row_key).await?
        };

        let merged = current
            .and_then(|record| self.resolve(provider, &record).into_option())
            .and_then(|current| provider.try_update(&current, incoming).into_option());

        let record = match merged {
            Some(ref entity) => self.to_record(provider, entity)?,
            None => {
                tracing::debug!(
                    "No mergeable record at {}/{}, writing incoming entity",
                    partition_key,
                    row_key
                );
                self.to_record(provider, incoming)?
            }
        };

        ensure_active(cancel)?;
        let _permit = gate.enter().await?;
        self.handle
            .execute(TableOperation::insert_or_replace(record))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::counter::{CounterEntity, CounterProvider};
    use crate::storage::memory::InMemoryTableStore;
    use chrono::TimeZone;

    fn minute_table(store: Arc<InMemoryTableStore>) -> BucketTable<InMemoryTableStore> {
        BucketTable::new(
            TimeUnit::Minute,
            RowKeyFormat::parse("yyyy-MM-dd-HH-mm").unwrap(),
            TableHandle::new(store, "statsMinute"),
        )
    }

    #[test]
    fn test_row_key_uses_bucket_start() {
        let table = minute_table(Arc::new(InMemoryTableStore::new()));
        let t = Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 30).unwrap();

        assert_eq!(table.row_key(t).unwrap(), "2024-01-01-10-00");

        let record = table
            .to_record(&CounterProvider, &CounterEntity::new("camp1", t, 2))
            .unwrap();
        assert_eq!(record.partition_key, "camp1");
        assert_eq!(record.row_key, "2024-01-01-10-00");

        let resolved = table.resolve(&CounterProvider, &record).into_option().unwrap();
        assert_eq!(resolved.time, Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap());
        assert_eq!(resolved.count, 2);
    }

    #[tokio::test]
    async fn test_request_gate_limits_permits() {
        let gate = RequestGate::new(Some(2));
        let a = gate.enter().await.unwrap();
        let b = gate.enter().await.unwrap();
        assert!(a.is_some() && b.is_some());

        let third = tokio::time::timeout(std::time::Duration::from_millis(20), gate.enter()).await;
        assert!(third.is_err());

        drop(a);
        assert!(gate.enter().await.unwrap().is_some());
        assert!(RequestGate::unbounded().enter().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_request_gate_clamps_oversized_cap() {
        let gate = RequestGate::new(Some(usize::MAX));
        assert_eq!(gate.available(), Some(Semaphore::MAX_PERMITS));
        assert!(gate.enter().await.unwrap().is_some());

        assert_eq!(RequestGate::new(Some(0)).available(), Some(1));
        assert_eq!(RequestGate::unbounded().available(), None);
    }

    #[tokio::test]
    async fn test_create_respects_cancellation() {
        let store = Arc::new(InMemoryTableStore::new());
        let table = minute_table(Arc::clone(&store));
        let cancel = CancellationToken::new();

        assert!(table.create_if_not_exists(&RequestGate::unbounded(), &cancel).await.unwrap());
        assert!(!table.create_if_not_exists(&RequestGate::unbounded(), &cancel).await.unwrap());

        cancel.cancel();
        assert!(matches!(
            table.create_if_not_exists(&RequestGate::unbounded(), &cancel).await,
            Err(StorageError::Cancelled)
        ));
    }

    #[tokio::test]
    async fn test_writes_reject_times_without_a_row_key() {
        let store = Arc::new(InMemoryTableStore::new());
        let table = minute_table(Arc::clone(&store));
        let gate = RequestGate::unbounded();
        let cancel = CancellationToken::new();
        table.create_if_not_exists(&gate, &cancel).await.unwrap();

        let far = Utc.with_ymd_and_hms(10000, 1, 1, 0, 0, 0).unwrap();
        let entities = [
            CounterEntity::new("camp1", Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(), 1),
            CounterEntity::new("camp1", far, 1),
        ];

        assert!(matches!(
            table.to_record(&CounterProvider, &entities[1]),
            Err(StorageError::TimeOutOfRange(_))
        ));
        assert!(matches!(
            table
                .insert(&CounterProvider, &entities, BatchLimits::default(), &gate, &cancel)
                .await,
            Err(StorageError::TimeOutOfRange(_))
        ));
        assert!(matches!(
            table.update(&CounterProvider, &entities[1..], &gate, &cancel).await,
            Err(StorageError::TimeOutOfRange(_))
        ));
        assert!(matches!(
            table.try_retrieve(&CounterProvider, "camp1", far, &gate, &cancel).await,
            Err(StorageError::TimeOutOfRange(_))
        ));
        assert_eq!(store.stats().batches, 0);
        assert_eq!(store.stats().operations, 0);
    }

    #[tokio::test]
    async fn test_empty_writes_touch_nothing() {
        let store = Arc::new(InMemoryTableStore::new());
        let table = minute_table(Arc::clone(&store));
        let gate = RequestGate::unbounded();
        let cancel = CancellationToken::new();

        let inserted = table
            .insert(&CounterProvider, &[], BatchLimits::default(), &gate, &cancel)
            .await
            .unwrap();
        let updated = table.update(&CounterProvider, &[], &gate, &cancel).await.unwrap();

        assert_eq!((inserted, updated), (0, 0));
        assert_eq!(store.stats(), Default::default());
    }
}
