//! # chronotable
//!
//! Time-bucketed storage of domain entities in a key-value table store.
//! Each configured time unit gets its own table; an entity lands in the row
//! for its key and the start of its time bucket, so every key has at most one
//! row per bucket.
//!
//! ## Features
//!
//! - **Pluggable entities**: an [`EntityProvider`](storage::EntityProvider) maps
//!   any entity type to keyed property bags and merges entities per bucket
//! - **Sortable row keys**: row-key formats are validated to sort by time, so
//!   interval queries are plain row-key range scans
//! - **Batched writes**: writes are grouped by partition and cut into batches
//!   the store accepts
//! - **Multi-region reads**: one store account per region, reads fan out to all
//!
//! ## Modules
//!
//! - [`storage`]: Time units, settings, providers and the storage engines
//! - [`config`]: TOML configuration with environment overrides
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use chronotable::storage::*;
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let settings = SingleRegionSettings::new(
//!         StorageSettingsBase::new("campaignstats").unit(TimeUnit::Minute, "yyyy-MM-dd-HH-mm"),
//!         "memory://local",
//!     );
//!     let storage = TimeSeriesStorage::new(
//!         settings,
//!         Arc::new(CounterProvider),
//!         &InMemoryConnector::new(),
//!         EngineOptions::default(),
//!     )?;
//!
//!     let cancel = CancellationToken::new();
//!     storage.create_tables_if_not_exist(&cancel).await?;
//!
//!     let now = chrono::Utc::now();
//!     storage
//!         .insert(TimeUnit::Minute, &[CounterEntity::new("camp1", now, 1)], &cancel)
//!         .await?;
//!
//!     let found = storage
//!         .try_retrieve(TimeUnit::Minute, "camp1", now, &cancel)
//!         .await?;
//!     println!("stored: {:?}", found.into_option());
//!
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod storage;

// Re-export top-level types for convenience
pub use storage::{
    EngineOptions, EntityProvider, MultiRegionSettings, MultiRegionStorage, Range, Region,
    SingleRegionSettings, StorageError, StorageResult, StorageSettingsBase, TimeInterval,
    TimeRange, TimeSeriesStorage, TimeUnit, TryResult,
};

pub use config::{Config, ConfigError, ConfiguredSettings, EngineConfig, LoggingConfig};
