//! Keyed counters
//!
//! A ready-made [`EntityProvider`] for the most common time-bucketed workload:
//! counting events per key. Merging two counters for the same key adds their
//! counts; the stored record carries a single `Count` property.

use crate::storage::property::{PropertyMap, PropertyValue};
use crate::storage::provider::EntityProvider;
use crate::storage::types::TryResult;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Name of the stored count property
pub const COUNT_PROPERTY: &str = "Count";

/// A count of events for one key at one point in time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterEntity {
    pub key: String,
    pub time: DateTime<Utc>,
    pub count: i64,
}

impl CounterEntity {
    pub fn new(key: impl Into<String>, time: DateTime<Utc>, count: i64) -> Self {
        Self {
            key: key.into(),
            time,
            count,
        }
    }
}

/// Provider for [`CounterEntity`]
#[derive(Debug, Clone, Copy, Default)]
pub struct CounterProvider;

impl EntityProvider for CounterProvider {
    type Entity = CounterEntity;

    fn key(&self, entity: &CounterEntity) -> String {
        entity.key.clone()
    }

    fn time(&self, entity: &CounterEntity) -> DateTime<Utc> {
        entity.time
    }

    fn properties(&self, entity: &CounterEntity) -> PropertyMap {
        let mut properties = PropertyMap::new();
        properties.insert(COUNT_PROPERTY.to_string(), PropertyValue::Int64(entity.count));
        properties
    }

    fn try_resolve(
        &self,
        key: &str,
        time: DateTime<Utc>,
        properties: &PropertyMap,
    ) -> TryResult<CounterEntity> {
        properties
            .get(COUNT_PROPERTY)
            .and_then(PropertyValue::as_i64)
            .map(|count| CounterEntity::new(key, time, count))
            .into()
    }

    fn try_update(&self, current: &CounterEntity, incoming: &CounterEntity) -> TryResult<CounterEntity> {
        if current.key != incoming.key {
            return TryResult::Failure;
        }
        match current.count.checked_add(incoming.count) {
            Some(count) => TryResult::Success(CounterEntity::new(&current.key, current.time, count)),
            None => TryResult::Failure,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(min: u32, sec: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 10, min, sec).unwrap()
    }

    #[test]
    fn test_properties_resolve_back() {
        let provider = CounterProvider;
        let entity = CounterEntity::new("camp1", at(0, 0), 7);

        let props = provider.properties(&entity);
        let resolved = provider.try_resolve("camp1", at(0, 0), &props);
        assert_eq!(resolved, TryResult::Success(entity));
    }

    #[test]
    fn test_resolve_rejects_missing_or_mistyped_count() {
        let provider = CounterProvider;
        assert!(!provider.try_resolve("k", at(0, 0), &PropertyMap::new()).is_success());

        let mut props = PropertyMap::new();
        props.insert(COUNT_PROPERTY.into(), PropertyValue::from("seven"));
        assert!(!provider.try_resolve("k", at(0, 0), &props).is_success());
    }

    #[test]
    fn test_resolve_accepts_int32_count() {
        let mut props = PropertyMap::new();
        props.insert(COUNT_PROPERTY.into(), PropertyValue::Int32(3));
        let resolved = CounterProvider.try_resolve("k", at(0, 0), &props);
        assert_eq!(resolved.into_option().map(|e| e.count), Some(3));
    }

    #[test]
    fn test_update_sums_counts() {
        let provider = CounterProvider;
        let current = CounterEntity::new("camp1", at(0, 0), 2);
        let incoming = CounterEntity::new("camp1", at(0, 45), 1);

        let merged = provider.try_update(&current, &incoming).into_option().unwrap();
        assert_eq!(merged.count, 3);
        assert_eq!(merged.time, at(0, 0));
    }

    #[test]
    fn test_update_rejects_other_key_and_overflow() {
        let provider = CounterProvider;
        let a = CounterEntity::new("a", at(0, 0), 1);
        let b = CounterEntity::new("b", at(0, 0), 1);
        assert!(!provider.try_update(&a, &b).is_success());

        let big = CounterEntity::new("a", at(0, 0), i64::MAX);
        assert!(!provider.try_update(&big, &a).is_success());
    }
}
