//! Time-bucketed table storage
//!
//! This module stores domain entities in a key-value table store, one table
//! per time granularity:
//!
//! - **time_unit**: Time units, floor/ceiling, interval arithmetic
//! - **provider**: Entity provider contract (entity ↔ stored record)
//! - **settings**: Table names, row-key formats, connection strings
//! - **row_key**: Row-key format parsing, rendering and validation
//! - **filter**: Row-key range filters
//! - **store**: Table store contract
//! - **memory**: In-memory table store
//! - **engine**: Single-region storage engine
//! - **multi_region**: Multi-region storage engine
//! - **counter**: Ready-made provider for keyed counters
//! - **error**: Error types
//!
//! # Architecture
//!
//! ```text
//! Write Path:
//!   Entity → provider → (partition key, floor(time) as row key, properties)
//!          → group by partition → batches (≤100 ops, ≤4 MiB) → store
//!
//! Read Path:
//!   Interval → row-key range filter → paged scan → provider resolve → Entities
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use chronotable::storage::*;
//! use chrono::Utc;
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let settings = SingleRegionSettings::new(
//!         StorageSettingsBase::with_default_formats("campaignstats"),
//!         "memory://local",
//!     );
//!     let connector = InMemoryConnector::new();
//!     let storage = TimeSeriesStorage::new(
//!         settings,
//!         Arc::new(CounterProvider),
//!         &connector,
//!         EngineOptions::default(),
//!     )?;
//!
//!     let cancel = CancellationToken::new();
//!     storage.create_tables_if_not_exist(&cancel).await?;
//!
//!     let now = Utc::now();
//!     storage
//!         .update(TimeUnit::Minute, &[CounterEntity::new("camp1", now, 1)], &cancel)
//!         .await?;
//!
//!     let range = TimeRange::last(chrono::TimeDelta::hours(1))?;
//!     let counters = storage.retrieve(TimeUnit::Minute, &range, &cancel).await?;
//!     println!("{} counters in the last hour", counters.len());
//!
//!     Ok(())
//! }
//! ```

pub mod batch;
pub mod bucket_table;
pub mod counter;
pub mod engine;
pub mod error;
pub mod filter;
pub mod memory;
pub mod multi_region;
pub mod property;
pub mod provider;
pub mod row_key;
pub mod settings;
pub mod store;
pub mod time_unit;
pub mod types;

// Re-export commonly used types
pub use batch::{BatchLimits, MAX_BATCH_BYTES, MAX_BATCH_OPERATIONS};
pub use bucket_table::{BucketTable, RequestGate};
pub use counter::{CounterEntity, CounterProvider};
pub use engine::{EngineOptions, TimeSeriesStorage};
pub use error::{StorageError, StorageResult};
pub use filter::{create_partition_filter, create_retrieve_filter, TableFilter};
pub use memory::{InMemoryConnector, InMemoryStoreStats, InMemoryTableStore};
pub use multi_region::MultiRegionStorage;
pub use property::{PropertyMap, PropertyValue};
pub use provider::EntityProvider;
pub use row_key::{RowKeyFormat, ROW_KEY_YEARS};
pub use settings::{MultiRegionSettings, Region, SingleRegionSettings, StorageSettingsBase};
pub use store::{
    ContinuationToken, OperationKind, QuerySegment, StoreConnector, StoredRecord, TableOperation,
    TableStore,
};
pub use time_unit::{ceiling, floor, TimeInterval, TimeUnit};
pub use types::{Range, TimeRange, TryResult};
