//! Entity provider contract
//!
//! An [`EntityProvider`] adapts one domain entity type to the table store. The
//! storage engines never look inside entities; they only ask the provider for
//! a partition key, a bucketing timestamp and a property bag, and hand stored
//! records back to it for resolution.
//!
//! All methods must be deterministic. Resolution and merging report expected
//! failures through [`TryResult::Failure`] instead of panicking.

use crate::storage::property::PropertyMap;
use crate::storage::types::TryResult;
use chrono::{DateTime, Utc};

/// Adapter between a domain entity type and store-native records
pub trait EntityProvider: Send + Sync {
    /// The domain entity this provider handles
    type Entity: Clone + Send + Sync;

    /// Partition key; identical for logically identical entities
    fn key(&self, entity: &Self::Entity) -> String;

    /// Timestamp used to choose the entity's time bucket
    fn time(&self, entity: &Self::Entity) -> DateTime<Utc>;

    /// Serialize the entity's payload into store-native properties
    fn properties(&self, entity: &Self::Entity) -> PropertyMap;

    /// Rebuild an entity from a stored record.
    ///
    /// `time` is the start of the record's bucket, not the original timestamp.
    fn try_resolve(
        &self,
        key: &str,
        time: DateTime<Utc>,
        properties: &PropertyMap,
    ) -> TryResult<Self::Entity>;

    /// Merge an incoming entity into the current one for the same key and bucket
    fn try_update(&self, current: &Self::Entity, incoming: &Self::Entity)
        -> TryResult<Self::Entity>;
}
