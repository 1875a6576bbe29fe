//! Single-region storage engine
//!
//! [`TimeSeriesStorage`] owns one [`BucketTable`] per configured time unit,
//! all on the same store account:
//!
//! ```text
//! insert(unit, entities)      → table(unit) → batches → store
//! retrieve(unit, interval)    → table(unit) → filter → paged scan → entities
//! update(unit, entities)      → table(unit) → read-merge-write per entity
//! ```
//!
//! The table map is built once from the settings and never changes, so the
//! engine needs no locks and can be shared freely behind an `Arc`.

use crate::storage::batch::BatchLimits;
use crate::storage::bucket_table::{BucketTable, RequestGate};
use crate::storage::error::{collect_settled, StorageError, StorageResult};
use crate::storage::filter::{create_partition_filter, create_retrieve_filter};
use crate::storage::provider::EntityProvider;
use crate::storage::settings::{SingleRegionSettings, StorageSettingsBase};
use crate::storage::store::{StoreConnector, TableHandle, TableStore};
use crate::storage::time_unit::TimeUnit;
use crate::storage::types::{TimeRange, TryResult};
use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Runtime knobs of an engine, independent of the table layout
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineOptions {
    /// Upper bound on in-flight store calls; unbounded when `None`
    pub max_concurrent_requests: Option<usize>,
    /// Limits used when cutting insert batches
    pub batch_limits: BatchLimits,
}

impl EngineOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn max_concurrent_requests(mut self, max: usize) -> Self {
        self.max_concurrent_requests = Some(max);
        self
    }

    pub fn batch_limits(mut self, limits: BatchLimits) -> Self {
        self.batch_limits = limits;
        self
    }
}

/// Build one bucket table per configured unit on `store`
pub(crate) fn build_tables<S: TableStore>(
    base: &StorageSettingsBase,
    store: &Arc<S>,
) -> StorageResult<BTreeMap<TimeUnit, BucketTable<S>>> {
    base.units()
        .map(|unit| -> StorageResult<(TimeUnit, BucketTable<S>)> {
            let handle = TableHandle::new(Arc::clone(store), base.table_name(unit)?);
            Ok((unit, BucketTable::new(unit, base.row_key_format(unit)?, handle)))
        })
        .collect()
}

/// Time-bucketed storage on a single store account
pub struct TimeSeriesStorage<P: EntityProvider, S: TableStore> {
    settings: SingleRegionSettings,
    provider: Arc<P>,
    tables: BTreeMap<TimeUnit, BucketTable<S>>,
    options: EngineOptions,
    gate: RequestGate,
}

impl<P: EntityProvider, S: TableStore> TimeSeriesStorage<P, S> {
    /// Validate settings, connect to the store and bind every unit's table.
    ///
    /// Tables are not created here; call
    /// [`TimeSeriesStorage::create_tables_if_not_exist`] once at startup.
    pub fn new<C>(
        settings: SingleRegionSettings,
        provider: Arc<P>,
        connector: &C,
        options: EngineOptions,
    ) -> StorageResult<Self>
    where
        C: StoreConnector<Store = S>,
    {
        settings.validate()?;
        let store = connector.connect(&settings.connection_string)?;
        let tables = build_tables(&settings.base, &store)?;

        tracing::info!(
            "Storage engine ready with {} tables under root {}",
            tables.len(),
            settings.base.tables_name_root
        );

        Ok(Self {
            settings,
            provider,
            tables,
            gate: RequestGate::new(options.max_concurrent_requests),
            options,
        })
    }

    pub fn settings(&self) -> &SingleRegionSettings {
        &self.settings
    }

    pub fn provider(&self) -> &Arc<P> {
        &self.provider
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    /// Configured units, finest first
    pub fn units(&self) -> impl Iterator<Item = TimeUnit> + '_ {
        self.tables.keys().copied()
    }

    /// The table storing `unit`
    pub fn table(&self, unit: TimeUnit) -> StorageResult<&BucketTable<S>> {
        self.tables
            .get(&unit)
            .ok_or(StorageError::UnknownTimeUnit(unit))
    }

    /// Create every configured table that does not exist yet.
    ///
    /// All creations run concurrently and all of them finish before any
    /// failure is reported.
    pub async fn create_tables_if_not_exist(&self, cancel: &CancellationToken) -> StorageResult<()> {
        let results = join_all(
            self.tables
                .values()
                .map(|table| table.create_if_not_exists(&self.gate, cancel)),
        )
        .await;

        let created = collect_settled("create tables", results)?;
        tracing::info!(
            "{} of {} tables created",
            created.iter().filter(|c| **c).count(),
            created.len()
        );
        Ok(())
    }

    /// Write entities into their buckets, replacing what is stored there.
    ///
    /// Returns the number of records written after collapsing entities that
    /// share a bucket within this call.
    pub async fn insert(
        &self,
        unit: TimeUnit,
        entities: &[P::Entity],
        cancel: &CancellationToken,
    ) -> StorageResult<usize> {
        self.table(unit)?
            .insert(
                self.provider.as_ref(),
                entities,
                self.options.batch_limits,
                &self.gate,
                cancel,
            )
            .await
    }

    /// All entities of all keys with a bucket in `[begin, end)`
    pub async fn retrieve(
        &self,
        unit: TimeUnit,
        interval: &TimeRange,
        cancel: &CancellationToken,
    ) -> StorageResult<Vec<P::Entity>> {
        let table = self.table(unit)?;
        let filter = create_retrieve_filter(table.format(), interval);
        table
            .retrieve(self.provider.as_ref(), &filter, &self.gate, cancel)
            .await
    }

    /// Entities of one key with a bucket in `[begin, end)`
    pub async fn retrieve_for_key(
        &self,
        unit: TimeUnit,
        interval: &TimeRange,
        key: &str,
        cancel: &CancellationToken,
    ) -> StorageResult<Vec<P::Entity>> {
        let table = self.table(unit)?;
        let filter = create_partition_filter(table.format(), interval, key);
        table
            .retrieve(self.provider.as_ref(), &filter, &self.gate, cancel)
            .await
    }

    /// The entity stored for `key` in the bucket containing `exact_time`
    pub async fn try_retrieve(
        &self,
        unit: TimeUnit,
        key: &str,
        exact_time: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> StorageResult<TryResult<P::Entity>> {
        self.table(unit)?
            .try_retrieve(self.provider.as_ref(), key, exact_time, &self.gate, cancel)
            .await
    }

    /// Merge entities into what their buckets already hold.
    ///
    /// Concurrent updates to the same bucket can lose increments; see
    /// [`BucketTable::update`].
    pub async fn update(
        &self,
        unit: TimeUnit,
        entities: &[P::Entity],
        cancel: &CancellationToken,
    ) -> StorageResult<usize> {
        self.table(unit)?
            .update(self.provider.as_ref(), entities, &self.gate, cancel)
            .await
    }
}

impl<P: EntityProvider, S: TableStore> std::fmt::Debug for TimeSeriesStorage<P, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimeSeriesStorage")
            .field("tables", &self.tables.values().collect::<Vec<_>>())
            .field("options", &self.options)
            .finish()
    }
}
