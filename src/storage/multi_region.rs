//! Multi-region storage engine
//!
//! Each region has its own store account holding a full copy of the table
//! layout. Writes target one region, or every region at once through
//! `insert_all_regions` and `update_all_regions`. Reads fan out to all
//! regions and return results labelled by region, leaving the caller to
//! combine them.
//!
//! ```text
//!                     ┌─ region A: table(unit) ─┐
//! retrieve(unit) ─────┼─ region B: table(unit) ─┼──→ { A: [...], B: [...] }
//!                     └─ region C: table(unit) ─┘
//! ```

use crate::storage::bucket_table::{BucketTable, RequestGate};
use crate::storage::engine::{build_tables, EngineOptions};
use crate::storage::error::{collect_settled, StorageError, StorageResult};
use crate::storage::filter::{create_partition_filter, create_retrieve_filter, TableFilter};
use crate::storage::provider::EntityProvider;
use crate::storage::settings::{MultiRegionSettings, Region};
use crate::storage::store::{StoreConnector, TableStore};
use crate::storage::time_unit::TimeUnit;
use crate::storage::types::{TimeRange, TryResult};
use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Time-bucketed storage replicated over several regions
pub struct MultiRegionStorage<P: EntityProvider, S: TableStore> {
    settings: MultiRegionSettings,
    provider: Arc<P>,
    tables: BTreeMap<(TimeUnit, Region), BucketTable<S>>,
    options: EngineOptions,
    gate: RequestGate,
}

impl<P: EntityProvider, S: TableStore> MultiRegionStorage<P, S> {
    /// Validate settings, connect to every region and bind all tables
    pub fn new<C>(
        settings: MultiRegionSettings,
        provider: Arc<P>,
        connector: &C,
        options: EngineOptions,
    ) -> StorageResult<Self>
    where
        C: StoreConnector<Store = S>,
    {
        settings.validate()?;

        let mut tables = BTreeMap::new();
        for (region, connection_string) in &settings.connection_strings {
            let store = connector.connect(connection_string)?;
            for (unit, table) in build_tables(&settings.base, &store)? {
                tables.insert((unit, region.clone()), table);
            }
        }

        tracing::info!(
            "Multi-region storage ready with {} tables across {} regions",
            tables.len(),
            settings.connection_strings.len()
        );

        Ok(Self {
            settings,
            provider,
            tables,
            gate: RequestGate::new(options.max_concurrent_requests),
            options,
        })
    }

    pub fn settings(&self) -> &MultiRegionSettings {
        &self.settings
    }

    pub fn provider(&self) -> &Arc<P> {
        &self.provider
    }

    pub fn regions(&self) -> impl Iterator<Item = &Region> {
        self.settings.regions()
    }

    /// The table storing `unit` in `region`
    pub fn table(&self, region: &Region, unit: TimeUnit) -> StorageResult<&BucketTable<S>> {
        if !self.settings.connection_strings.contains_key(region) {
            return Err(StorageError::UnknownRegion(region.to_string()));
        }
        self.tables
            .get(&(unit, region.clone()))
            .ok_or(StorageError::UnknownTimeUnit(unit))
    }

    /// Tables storing `unit`, one per region in region order
    fn tables_for(&self, unit: TimeUnit) -> StorageResult<Vec<(&Region, &BucketTable<S>)>> {
        let tables: Vec<_> = self
            .tables
            .iter()
            .filter(|((u, _), _)| *u == unit)
            .map(|((_, region), table)| (region, table))
            .collect();
        if tables.is_empty() {
            return Err(StorageError::UnknownTimeUnit(unit));
        }
        Ok(tables)
    }

    /// Create every (unit, region) table that does not exist yet
    pub async fn create_tables_if_not_exist(&self, cancel: &CancellationToken) -> StorageResult<()> {
        let results = join_all(
            self.tables
                .values()
                .map(|table| table.create_if_not_exists(&self.gate, cancel)),
        )
        .await;

        collect_settled("create tables in all regions", results)?;
        Ok(())
    }

    /// Write entities into one region's buckets
    pub async fn insert(
        &self,
        region: &Region,
        unit: TimeUnit,
        entities: &[P::Entity],
        cancel: &CancellationToken,
    ) -> StorageResult<usize> {
        self.table(region, unit)?
            .insert(
                self.provider.as_ref(),
                entities,
                self.options.batch_limits,
                &self.gate,
                cancel,
            )
            .await
    }

    /// Write the same entities into every region concurrently
    pub async fn insert_all_regions(
        &self,
        unit: TimeUnit,
        entities: &[P::Entity],
        cancel: &CancellationToken,
    ) -> StorageResult<BTreeMap<Region, usize>> {
        let tables = self.tables_for(unit)?;
        let results = join_all(tables.into_iter().map(|(region, table)| async move {
            let written = table
                .insert(
                    self.provider.as_ref(),
                    entities,
                    self.options.batch_limits,
                    &self.gate,
                    cancel,
                )
                .await?;
            Ok::<_, StorageError>((region.clone(), written))
        }))
        .await;

        Ok(collect_settled("insert into all regions", results)?
            .into_iter()
            .collect())
    }

    /// Merge entities into one region's buckets
    pub async fn update(
        &self,
        region: &Region,
        unit: TimeUnit,
        entities: &[P::Entity],
        cancel: &CancellationToken,
    ) -> StorageResult<usize> {
        self.table(region, unit)?
            .update(self.provider.as_ref(), entities, &self.gate, cancel)
            .await
    }

    /// Merge the same entities into every region concurrently
    pub async fn update_all_regions(
        &self,
        unit: TimeUnit,
        entities: &[P::Entity],
        cancel: &CancellationToken,
    ) -> StorageResult<BTreeMap<Region, usize>> {
        let tables = self.tables_for(unit)?;
        let results = join_all(tables.into_iter().map(|(region, table)| async move {
            let written = table
                .update(self.provider.as_ref(), entities, &self.gate, cancel)
                .await?;
            Ok::<_, StorageError>((region.clone(), written))
        }))
        .await;

        Ok(collect_settled("update in all regions", results)?
            .into_iter()
            .collect())
    }

    /// All entities with a bucket in `[begin, end)`, per region
    pub async fn retrieve(
        &self,
        unit: TimeUnit,
        interval: &TimeRange,
        cancel: &CancellationToken,
    ) -> StorageResult<BTreeMap<Region, Vec<P::Entity>>> {
        self.scan_all(unit, cancel, |table| {
            create_retrieve_filter(table.format(), interval)
        })
        .await
    }

    /// Entities of one key with a bucket in `[begin, end)`, per region
    pub async fn retrieve_for_key(
        &self,
        unit: TimeUnit,
        interval: &TimeRange,
        key: &str,
        cancel: &CancellationToken,
    ) -> StorageResult<BTreeMap<Region, Vec<P::Entity>>> {
        self.scan_all(unit, cancel, |table| {
            create_partition_filter(table.format(), interval, key)
        })
        .await
    }

    /// Point lookup in every region; only regions holding a resolvable record appear
    pub async fn try_retrieve(
        &self,
        unit: TimeUnit,
        key: &str,
        exact_time: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> StorageResult<Vec<(Region, P::Entity)>> {
        let tables = self.tables_for(unit)?;
        let results = join_all(tables.into_iter().map(|(region, table)| async move {
            let found = table
                .try_retrieve(self.provider.as_ref(), key, exact_time, &self.gate, cancel)
                .await?;
            Ok::<_, StorageError>((region.clone(), found))
        }))
        .await;

        Ok(collect_settled("point lookup in all regions", results)?
            .into_iter()
            .filter_map(|(region, found)| match found {
                TryResult::Success(entity) => Some((region, entity)),
                TryResult::Failure => None,
            })
            .collect())
    }

    async fn scan_all(
        &self,
        unit: TimeUnit,
        cancel: &CancellationToken,
        make_filter: impl Fn(&BucketTable<S>) -> TableFilter,
    ) -> StorageResult<BTreeMap<Region, Vec<P::Entity>>> {
        let tables = self.tables_for(unit)?;
        let results = join_all(tables.into_iter().map(|(region, table)| {
            let filter = make_filter(table);
            async move {
                let entities = table
                    .retrieve(self.provider.as_ref(), &filter, &self.gate, cancel)
                    .await?;
                Ok::<_, StorageError>((region.clone(), entities))
            }
        }))
        .await;

        Ok(collect_settled("retrieve from all regions", results)?
            .into_iter()
            .collect())
    }
}

impl<P: EntityProvider, S: TableStore> std::fmt::Debug for MultiRegionStorage<P, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MultiRegionStorage")
            .field("regions", &self.settings.regions().collect::<Vec<_>>())
            .field("tables", &self.tables.values().collect::<Vec<_>>())
            .field("options", &self.options)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::counter::{CounterEntity, CounterProvider};
    use crate::storage::memory::{InMemoryConnector, InMemoryTableStore};
    use crate::storage::settings::StorageSettingsBase;
    use crate::storage::types::Range;
    use chrono::TimeZone;

    type Engine = MultiRegionStorage<CounterProvider, InMemoryTableStore>;

    fn at(hour: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, hour, min, 0).unwrap()
    }

    fn whole_day() -> TimeRange {
        Range::new(at(0, 0), Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap()).unwrap()
    }

    fn counter(key: &str, time: DateTime<Utc>, count: i64) -> CounterEntity {
        CounterEntity::new(key, time, count)
    }

    fn east() -> Region {
        Region::new("eastus")
    }

    fn west() -> Region {
        Region::new("westeurope")
    }

    async fn create_test_engine(connector: &InMemoryConnector) -> Engine {
        let settings = MultiRegionSettings::new(StorageSettingsBase::with_default_formats("stats"))
            .region("eastus", "memory://east")
            .region("westeurope", "memory://west");
        let engine = MultiRegionStorage::new(
            settings,
            Arc::new(CounterProvider),
            connector,
            EngineOptions::default(),
        )
        .unwrap();
        engine
            .create_tables_if_not_exist(&CancellationToken::new())
            .await
            .unwrap();
        engine
    }

    #[tokio::test]
    async fn test_tables_created_in_every_region() {
        let connector = InMemoryConnector::new();
        let _engine = create_test_engine(&connector).await;

        for conn in ["memory://east", "memory://west"] {
            let store = connector.store(conn).unwrap();
            assert_eq!(
                store.table_names().unwrap(),
                vec!["statsDay", "statsHour", "statsMinute"]
            );
        }
    }

    #[tokio::test]
    async fn test_point_lookup_reports_only_regions_that_have_it() {
        let connector = InMemoryConnector::new();
        let engine = create_test_engine(&connector).await;
        let cancel = CancellationToken::new();

        engine
            .insert(&east(), TimeUnit::Minute, &[counter("k", at(10, 0), 4)], &cancel)
            .await
            .unwrap();

        let found = engine
            .try_retrieve(TimeUnit::Minute, "k", at(10, 0), &cancel)
            .await
            .unwrap();
        assert_eq!(found, vec![(east(), counter("k", at(10, 0), 4))]);

        let missing = engine
            .try_retrieve(TimeUnit::Minute, "other", at(10, 0), &cancel)
            .await
            .unwrap();
        assert!(missing.is_empty());
    }

    #[tokio::test]
    async fn test_retrieve_labels_results_by_region() {
        let connector = InMemoryConnector::new();
        let engine = create_test_engine(&connector).await;
        let cancel = CancellationToken::new();

        engine
            .insert(&east(), TimeUnit::Hour, &[counter("a", at(9, 30), 1)], &cancel)
            .await
            .unwrap();
        engine
            .insert(
                &west(),
                TimeUnit::Hour,
                &[counter("a", at(9, 10), 2), counter("b", at(11, 0), 5)],
                &cancel,
            )
            .await
            .unwrap();

        let all = engine
            .retrieve(TimeUnit::Hour, &whole_day(), &cancel)
            .await
            .unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[&east()], vec![counter("a", at(9, 0), 1)]);
        assert_eq!(all[&west()].len(), 2);

        let only_b = engine
            .retrieve_for_key(TimeUnit::Hour, &whole_day(), "b", &cancel)
            .await
            .unwrap();
        assert!(only_b[&east()].is_empty());
        assert_eq!(only_b[&west()], vec![counter("b", at(11, 0), 5)]);
    }

    #[tokio::test]
    async fn test_insert_all_regions_replicates() {
        let connector = InMemoryConnector::new();
        let engine = create_test_engine(&connector).await;
        let cancel = CancellationToken::new();

        let written = engine
            .insert_all_regions(TimeUnit::Day, &[counter("a", at(10, 0), 3)], &cancel)
            .await
            .unwrap();
        assert_eq!(written.get(&east()), Some(&1));
        assert_eq!(written.get(&west()), Some(&1));

        let found = engine
            .try_retrieve(TimeUnit::Day, "a", at(18, 0), &cancel)
            .await
            .unwrap();
        assert_eq!(found.len(), 2);
    }

    #[tokio::test]
    async fn test_update_touches_only_its_region() {
        let connector = InMemoryConnector::new();
        let engine = create_test_engine(&connector).await;
        let cancel = CancellationToken::new();

        engine
            .insert_all_regions(TimeUnit::Minute, &[counter("a", at(10, 0), 1)], &cancel)
            .await
            .unwrap();
        engine
            .update(&west(), TimeUnit::Minute, &[counter("a", at(10, 0), 1)], &cancel)
            .await
            .unwrap();

        let found = engine
            .try_retrieve(TimeUnit::Minute, "a", at(10, 0), &cancel)
            .await
            .unwrap();
        assert_eq!(
            found,
            vec![
                (east(), counter("a", at(10, 0), 1)),
                (west(), counter("a", at(10, 0), 2)),
            ]
        );
    }

    #[tokio::test]
    async fn test_update_all_regions_accumulates_everywhere() {
        let connector = InMemoryConnector::new();
        let engine = create_test_engine(&connector).await;
        let cancel = CancellationToken::new();

        // east starts with a count, west has nothing yet
        engine
            .insert(&east(), TimeUnit::Hour, &[counter("a", at(10, 0), 5)], &cancel)
            .await
            .unwrap();

        for _ in 0..2 {
            let written = engine
                .update_all_regions(TimeUnit::Hour, &[counter("a", at(10, 15), 1)], &cancel)
                .await
                .unwrap();
            assert_eq!(written.get(&east()), Some(&1));
            assert_eq!(written.get(&west()), Some(&1));
        }

        let found = engine
            .try_retrieve(TimeUnit::Hour, "a", at(10, 45), &cancel)
            .await
            .unwrap();
        assert_eq!(
            found,
            vec![
                (east(), counter("a", at(10, 0), 7)),
                (west(), counter("a", at(10, 0), 2)),
            ]
        );

        let result = engine
            .update_all_regions(TimeUnit::Month, &[counter("a", at(10, 0), 1)], &cancel)
            .await;
        assert!(matches!(
            result,
            Err(StorageError::UnknownTimeUnit(TimeUnit::Month))
        ));
    }

    #[tokio::test]
    async fn test_unknown_region_and_unit() {
        let connector = InMemoryConnector::new();
        let engine = create_test_engine(&connector).await;
        let cancel = CancellationToken::new();

        let result = engine
            .insert(
                &Region::new("mars"),
                TimeUnit::Minute,
                &[counter("a", at(10, 0), 1)],
                &cancel,
            )
            .await;
        assert!(matches!(result, Err(StorageError::UnknownRegion(r)) if r == "mars"));

        let result = engine.retrieve(TimeUnit::Month, &whole_day(), &cancel).await;
        assert!(matches!(
            result,
            Err(StorageError::UnknownTimeUnit(TimeUnit::Month))
        ));
    }

    #[tokio::test]
    async fn test_failing_region_fails_the_fan_out() {
        let connector = InMemoryConnector::new();
        let engine = create_test_engine(&connector).await;
        let cancel = CancellationToken::new();

        connector
            .store("memory://west")
            .unwrap()
            .fail_table("statsMinute")
            .unwrap();

        match engine.retrieve(TimeUnit::Minute, &whole_day(), &cancel).await {
            Err(StorageError::Aggregate { failed, total, .. }) => {
                assert_eq!(failed, 1);
                assert_eq!(total, 2);
            }
            other => panic!("expected aggregate error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_settings_without_regions_rejected() {
        let settings = MultiRegionSettings::new(StorageSettingsBase::with_default_formats("stats"));
        let result: StorageResult<Engine> = MultiRegionStorage::new(
            settings,
            Arc::new(CounterProvider),
            &InMemoryConnector::new(),
            EngineOptions::default(),
        );
        assert!(matches!(result, Err(StorageError::Config(_))));
    }
}
