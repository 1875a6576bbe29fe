//! In-memory table store
//!
//! A complete [`TableStore`] kept in process memory. It enforces the same
//! rules as the hosted store (batch limits, single-partition batches, unique
//! row keys per batch, paged queries with continuation tokens) so code that
//! works against it behaves the same in production.
//!
//! Tables can be marked as failing to exercise error paths.

use crate::storage::batch::BatchLimits;
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::filter::TableFilter;
use crate::storage::property::PropertyMap;
use crate::storage::store::{
    ContinuationToken, OperationKind, QuerySegment, StoreConnector, StoredRecord, TableOperation,
    TableStore,
};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

/// Default number of records per query page, matching the hosted store
pub const DEFAULT_PAGE_SIZE: usize = 1000;

type Table = BTreeMap<(String, String), PropertyMap>;

/// Counters describing the calls a store has served
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InMemoryStoreStats {
    pub tables_created: u64,
    pub operations: u64,
    pub batches: u64,
    pub query_pages: u64,
    pub point_reads: u64,
    /// Most calls ever in progress at the same time
    pub peak_in_flight: u64,
}

/// Table store held entirely in memory
#[derive(Debug)]
pub struct InMemoryTableStore {
    tables: RwLock<HashMap<String, Table>>,
    failing: RwLock<HashSet<String>>,
    page_size: usize,
    limits: BatchLimits,
    tables_created: AtomicU64,
    operations: AtomicU64,
    batches: AtomicU64,
    query_pages: AtomicU64,
    point_reads: AtomicU64,
    in_flight: AtomicU64,
    peak_in_flight: AtomicU64,
}

/// Marks one store call as in progress until dropped
struct CallGuard<'a> {
    store: &'a InMemoryTableStore,
}

impl Drop for CallGuard<'_> {
    fn drop(&mut self) {
        self.store.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Default for InMemoryTableStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryTableStore {
    pub fn new() -> Self {
        Self::with_page_size(DEFAULT_PAGE_SIZE)
    }

    /// Store returning at most `page_size` records per query page
    pub fn with_page_size(page_size: usize) -> Self {
        Self {
            tables: RwLock::new(HashMap::new()),
            failing: RwLock::new(HashSet::new()),
            page_size: page_size.max(1),
            limits: BatchLimits::default(),
            tables_created: AtomicU64::new(0),
            operations: AtomicU64::new(0),
            batches: AtomicU64::new(0),
            query_pages: AtomicU64::new(0),
            point_reads: AtomicU64::new(0),
            in_flight: AtomicU64::new(0),
            peak_in_flight: AtomicU64::new(0),
        }
    }

    fn begin_call(&self) -> CallGuard<'_> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        CallGuard { store: self }
    }

    /// Make every call against `table` fail with a store error
    pub fn fail_table(&self, table: &str) -> StorageResult<()> {
        self.failing
            .write()
            .map_err(|e| StorageError::Lock(e.to_string()))?
            .insert(table.to_string());
        Ok(())
    }

    /// Undo [`InMemoryTableStore::fail_table`]
    pub fn heal_table(&self, table: &str) -> StorageResult<()> {
        self.failing
            .write()
            .map_err(|e| StorageError::Lock(e.to_string()))?
            .remove(table);
        Ok(())
    }

    /// Names of all existing tables, sorted
    pub fn table_names(&self) -> StorageResult<Vec<String>> {
        let tables = self.read_tables()?;
        let mut names: Vec<String> = tables.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    /// Number of records in a table
    pub fn record_count(&self, table: &str) -> StorageResult<usize> {
        let tables = self.read_tables()?;
        tables
            .get(table)
            .map(|t| t.len())
            .ok_or_else(|| StorageError::TableNotFound(table.to_string()))
    }

    /// All records of a table in key order
    pub fn records(&self, table: &str) -> StorageResult<Vec<StoredRecord>> {
        let tables = self.read_tables()?;
        let t = tables
            .get(table)
            .ok_or_else(|| StorageError::TableNotFound(table.to_string()))?;
        Ok(t.iter().map(|((pk, rk), props)| StoredRecord::new(pk, rk, props.clone())).collect())
    }

    pub fn stats(&self) -> InMemoryStoreStats {
        InMemoryStoreStats {
            tables_created: self.tables_created.load(Ordering::Relaxed),
            operations: self.operations.load(Ordering::Relaxed),
            batches: self.batches.load(Ordering::Relaxed),
            query_pages: self.query_pages.load(Ordering::Relaxed),
            point_reads: self.point_reads.load(Ordering::Relaxed),
            peak_in_flight: self.peak_in_flight.load(Ordering::SeqCst),
        }
    }

    fn read_tables(
        &self,
    ) -> StorageResult<std::sync::RwLockReadGuard<'_, HashMap<String, Table>>> {
        self.tables
            .read()
            .map_err(|e| StorageError::Lock(e.to_string()))
    }

    fn write_tables(
        &self,
    ) -> StorageResult<std::sync::RwLockWriteGuard<'_, HashMap<String, Table>>> {
        self.tables
            .write()
            .map_err(|e| StorageError::Lock(e.to_string()))
    }

    fn check_failing(&self, table: &str) -> StorageResult<()> {
        let failing = self
            .failing
            .read()
            .map_err(|e| StorageError::Lock(e.to_string()))?;
        if failing.contains(table) {
            return Err(StorageError::Store(format!(
                "injected failure on table {}",
                table
            )));
        }
        Ok(())
    }

    fn validate_batch(
        &self,
        partition_key: &str,
        operations: &[TableOperation],
    ) -> StorageResult<()> {
        if operations.is_empty() {
            return Err(StorageError::BatchRejected("batch is empty".into()));
        }
        if operations.len() > self.limits.max_operations {
            return Err(StorageError::BatchRejected(format!(
                "{} operations exceed the limit of {}",
                operations.len(),
                self.limits.max_operations
            )));
        }

        let mut seen = HashSet::new();
        let mut bytes = 0usize;
        for op in operations {
            if op.record.partition_key != partition_key {
                return Err(StorageError::BatchRejected(format!(
                    "partition key {} differs from batch partition {}",
                    op.record.partition_key, partition_key
                )));
            }
            if !seen.insert(op.record.row_key.as_str()) {
                return Err(StorageError::BatchRejected(format!(
                    "row key {} appears more than once",
                    op.record.row_key
                )));
            }
            bytes += op.record.estimated_size();
        }

        if bytes > self.limits.max_bytes {
            return Err(StorageError::BatchRejected(format!(
                "payload of {} bytes exceeds the limit of {}",
                bytes, self.limits.max_bytes
            )));
        }

        Ok(())
    }
}

/// Apply one operation to a table
fn apply(table: &mut Table, operation: TableOperation) -> StorageResult<()> {
    let StoredRecord {
        partition_key,
        row_key,
        properties,
    } = operation.record;
    let key = (partition_key, row_key);
    let not_found = |key: &(String, String)| StorageError::EntityNotFound {
        partition_key: key.0.clone(),
        row_key: key.1.clone(),
    };

    match operation.kind {
        OperationKind::Insert => {
            if table.contains_key(&key) {
                return Err(StorageError::EntityAlreadyExists {
                    partition_key: key.0,
                    row_key: key.1,
                });
            }
            table.insert(key, properties);
        }
        OperationKind::Replace => {
            let existing = table.get_mut(&key).ok_or_else(|| not_found(&key))?;
            *existing = properties;
        }
        OperationKind::Merge => {
            let existing = table.get_mut(&key).ok_or_else(|| not_found(&key))?;
            existing.extend(properties);
        }
        OperationKind::InsertOrReplace => {
            table.insert(key, properties);
        }
        OperationKind::InsertOrMerge => {
            table.entry(key).or_default().extend(properties);
        }
        OperationKind::Delete => {
            table.remove(&key).ok_or_else(|| not_found(&key))?;
        }
    }

    Ok(())
}

#[async_trait]
impl TableStore for InMemoryTableStore {
    async fn create_table_if_not_exists(&self, table: &str) -> StorageResult<bool> {
        let _call = self.begin_call();
        tokio::task::yield_now().await;
        self.check_failing(table)?;

        let mut tables = self.write_tables()?;
        if tables.contains_key(table) {
            return Ok(false);
        }
        tables.insert(table.to_string(), Table::new());
        self.tables_created.fetch_add(1, Ordering::Relaxed);
        Ok(true)
    }

    async fn execute(&self, table: &str, operation: TableOperation) -> StorageResult<()> {
        let _call = self.begin_call();
        tokio::task::yield_now().await;
        self.check_failing(table)?;

        let mut tables = self.write_tables()?;
        let t = tables
            .get_mut(table)
            .ok_or_else(|| StorageError::TableNotFound(table.to_string()))?;
        apply(t, operation)?;
        self.operations.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn execute_batch(
        &self,
        table: &str,
        partition_key: &str,
        operations: Vec<TableOperation>,
    ) -> StorageResult<()> {
        let _call = self.begin_call();
        tokio::task::yield_now().await;
        self.check_failing(table)?;
        self.validate_batch(partition_key, &operations)?;

        let mut tables = self.write_tables()?;
        let t = tables
            .get_mut(table)
            .ok_or_else(|| StorageError::TableNotFound(table.to_string()))?;

        // Stage on a copy so a failing operation leaves the table untouched.
        let mut staged = t.clone();
        for op in operations {
            apply(&mut staged, op).map_err(|e| StorageError::BatchRejected(e.to_string()))?;
        }
        *t = staged;
        self.batches.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn execute_segmented_query(
        &self,
        table: &str,
        filter: &TableFilter,
        continuation: Option<ContinuationToken>,
    ) -> StorageResult<QuerySegment> {
        let _call = self.begin_call();
        tokio::task::yield_now().await;
        self.check_failing(table)?;

        let tables = self.read_tables()?;
        let t = tables
            .get(table)
            .ok_or_else(|| StorageError::TableNotFound(table.to_string()))?;

        let start = continuation
            .map(|c| (c.next_partition_key, c.next_row_key))
            .unwrap_or_default();

        let mut matching = t
            .range(start..)
            .filter(|((pk, rk), _)| filter.matches(pk, rk));

        let records: Vec<StoredRecord> = matching
            .by_ref()
            .take(self.page_size)
            .map(|((pk, rk), props)| StoredRecord::new(pk, rk, props.clone()))
            .collect();

        let continuation = matching.next().map(|((pk, rk), _)| ContinuationToken {
            next_partition_key: pk.clone(),
            next_row_key: rk.clone(),
        });

        self.query_pages.fetch_add(1, Ordering::Relaxed);
        Ok(QuerySegment {
            records,
            continuation,
        })
    }

    async fn retrieve(
        &self,
        table: &str,
        partition_key: &str,
        row_key: &str,
    ) -> StorageResult<Option<StoredRecord>> {
        let _call = self.begin_call();
        tokio::task::yield_now().await;
        self.check_failing(table)?;

        let tables = self.read_tables()?;
        let t = tables
            .get(table)
            .ok_or_else(|| StorageError::TableNotFound(table.to_string()))?;

        self.point_reads.fetch_add(1, Ordering::Relaxed);
        let key = (partition_key.to_string(), row_key.to_string());
        Ok(t.get(&key)
            .map(|props| StoredRecord::new(partition_key, row_key, props.clone())))
    }
}

/// Connector handing out one in-memory store per distinct connection string
#[derive(Debug)]
pub struct InMemoryConnector {
    stores: Mutex<HashMap<String, Arc<InMemoryTableStore>>>,
    page_size: usize,
}

impl Default for InMemoryConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryConnector {
    pub fn new() -> Self {
        Self::with_page_size(DEFAULT_PAGE_SIZE)
    }

    /// Connector whose stores page query results by `page_size`
    pub fn with_page_size(page_size: usize) -> Self {
        Self {
            stores: Mutex::new(HashMap::new()),
            page_size,
        }
    }

    /// The store behind a connection string, if one was opened
    pub fn store(&self, connection_string: &str) -> Option<Arc<InMemoryTableStore>> {
        self.stores
            .lock()
            .ok()
            .and_then(|stores| stores.get(connection_string).cloned())
    }
}

impl StoreConnector for InMemoryConnector {
    type Store = InMemoryTableStore;

    fn connect(&self, connection_string: &str) -> StorageResult<Arc<InMemoryTableStore>> {
        if connection_string.trim().is_empty() {
            return Err(StorageError::Config("connection string is empty".into()));
        }

        let mut stores = self
            .stores
            .lock()
            .map_err(|e| StorageError::Lock(e.to_string()))?;
        let store = stores
            .entry(connection_string.to_string())
            .or_insert_with(|| Arc::new(InMemoryTableStore::with_page_size(self.page_size)));
        Ok(Arc::clone(store))
    }
}
