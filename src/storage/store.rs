//! Table store abstraction
//!
//! The storage engines talk to the backing key-value table store only through
//! [`TableStore`]. A store is reached through a connection string; the
//! [`StoreConnector`] turns one into a client, once per configured connection.
//!
//! Implementations:
//! - `InMemoryTableStore`: enforces the store's batch and paging rules in memory
//!
//! Store calls are the only suspension points of the engines. Implementations
//! must make single-record operations and whole batches atomic.

use crate::storage::error::StorageResult;
use crate::storage::filter::TableFilter;
use crate::storage::property::{estimated_entity_size, PropertyMap};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// A domain-agnostic stored row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRecord {
    pub partition_key: String,
    pub row_key: String,
    pub properties: PropertyMap,
}

impl StoredRecord {
    pub fn new(
        partition_key: impl Into<String>,
        row_key: impl Into<String>,
        properties: PropertyMap,
    ) -> Self {
        Self {
            partition_key: partition_key.into(),
            row_key: row_key.into(),
            properties,
        }
    }

    /// Estimated size as charged by the store against batch limits
    pub fn estimated_size(&self) -> usize {
        estimated_entity_size(&self.partition_key, &self.row_key, &self.properties)
    }
}

/// Write semantics of a single-record operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    /// Fails if the record exists
    Insert,
    /// Fails if the record is missing; replaces all properties
    Replace,
    /// Fails if the record is missing; overwrites only the given properties
    Merge,
    InsertOrReplace,
    InsertOrMerge,
    /// Fails if the record is missing; properties are ignored
    Delete,
}

/// One write against a table
#[derive(Debug, Clone, PartialEq)]
pub struct TableOperation {
    pub kind: OperationKind,
    pub record: StoredRecord,
}

impl TableOperation {
    pub fn new(kind: OperationKind, record: StoredRecord) -> Self {
        Self { kind, record }
    }

    pub fn insert_or_replace(record: StoredRecord) -> Self {
        Self::new(OperationKind::InsertOrReplace, record)
    }
}

/// Resume position of a segmented query
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContinuationToken {
    pub next_partition_key: String,
    pub next_row_key: String,
}

/// One page of query results
#[derive(Debug, Clone, Default)]
pub struct QuerySegment {
    pub records: Vec<StoredRecord>,
    /// Present when more results remain
    pub continuation: Option<ContinuationToken>,
}

/// Client for one store account
#[async_trait]
pub trait TableStore: Send + Sync + 'static {
    /// Create a table unless it exists; returns whether it was created
    async fn create_table_if_not_exists(&self, table: &str) -> StorageResult<bool>;

    /// Execute a single-record operation atomically
    async fn execute(&self, table: &str, operation: TableOperation) -> StorageResult<()>;

    /// Execute operations on one partition as one atomic batch
    async fn execute_batch(
        &self,
        table: &str,
        partition_key: &str,
        operations: Vec<TableOperation>,
    ) -> StorageResult<()>;

    /// Fetch one page of records matching `filter`, starting at `continuation`
    async fn execute_segmented_query(
        &self,
        table: &str,
        filter: &TableFilter,
        continuation: Option<ContinuationToken>,
    ) -> StorageResult<QuerySegment>;

    /// Point lookup by keys
    async fn retrieve(
        &self,
        table: &str,
        partition_key: &str,
        row_key: &str,
    ) -> StorageResult<Option<StoredRecord>>;
}

/// Opens store clients from connection strings
pub trait StoreConnector: Send + Sync {
    type Store: TableStore;

    fn connect(&self, connection_string: &str) -> StorageResult<Arc<Self::Store>>;
}

/// A named table on a specific store client
pub struct TableHandle<S: TableStore> {
    store: Arc<S>,
    name: String,
}

impl<S: TableStore> Clone for TableHandle<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            name: self.name.clone(),
        }
    }
}

impl<S: TableStore> std::fmt::Debug for TableHandle<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TableHandle").field("name", &self.name).finish()
    }
}

impl<S: TableStore> TableHandle<S> {
    pub fn new(store: Arc<S>, name: impl Into<String>) -> Self {
        Self {
            store,
            name: name.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn create_if_not_exists(&self) -> StorageResult<bool> {
        self.store.create_table_if_not_exists(&self.name).await
    }

    pub async fn execute(&self, operation: TableOperation) -> StorageResult<()> {
        self.store.execute(&self.name, operation).await
    }

    pub async fn execute_batch(
        &self,
        partition_key: &str,
        operations: Vec<TableOperation>,
    ) -> StorageResult<()> {
        self.store
            .execute_batch(&self.name, partition_key, operations)
            .await
    }

    pub async fn query_segment(
        &self,
        filter: &TableFilter,
        continuation: Option<ContinuationToken>,
    ) -> StorageResult<QuerySegment> {
        self.store
            .execute_segmented_query(&self.name, filter, continuation)
            .await
    }

    pub async fn retrieve(
        &self,
        partition_key: &str,
        row_key: &str,
    ) -> StorageResult<Option<StoredRecord>> {
        self.store.retrieve(&self.name, partition_key, row_key).await
    }
}
