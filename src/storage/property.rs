//! Store-native property values
//!
//! The backing table store supports a closed set of scalar types. Entity
//! providers serialize their entities into a [`PropertyMap`] of these values.
//!
//! Size accounting follows the store's documented rules:
//!
//! ```text
//! entity   = 4 + 2 * (len(PartitionKey) + len(RowKey)) + Σ property
//! property = 8 + 2 * len(name) + value
//! value    = string: 4 + 2 * len   binary: 4 + bytes
//!            bool: 1   int32: 4   int64/double/datetime: 8   guid: 16
//! ```
//!
//! Lengths are counted in UTF-16 code units, as the store counts them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Properties of one stored entity, keyed by property name
pub type PropertyMap = BTreeMap<String, PropertyValue>;

/// A single store-native value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum PropertyValue {
    String(String),
    Binary(Vec<u8>),
    Bool(bool),
    DateTime(DateTime<Utc>),
    Double(f64),
    Int32(i32),
    Int64(i64),
    Guid(Uuid),
}

/// Bytes charged per entity regardless of content
pub const ENTITY_OVERHEAD_BYTES: usize = 4;

/// Bytes charged per property regardless of name or value
pub const PROPERTY_OVERHEAD_BYTES: usize = 8;

/// Length of a string in UTF-16 code units
pub fn utf16_len(s: &str) -> usize {
    s.encode_utf16().count()
}

impl PropertyValue {
    /// Name of the store type, as used in the store's type annotations
    pub fn type_name(&self) -> &'static str {
        match self {
            PropertyValue::String(_) => "Edm.String",
            PropertyValue::Binary(_) => "Edm.Binary",
            PropertyValue::Bool(_) => "Edm.Boolean",
            PropertyValue::DateTime(_) => "Edm.DateTime",
            PropertyValue::Double(_) => "Edm.Double",
            PropertyValue::Int32(_) => "Edm.Int32",
            PropertyValue::Int64(_) => "Edm.Int64",
            PropertyValue::Guid(_) => "Edm.Guid",
        }
    }

    /// Estimated stored size of the value alone
    pub fn estimated_size(&self) -> usize {
        match self {
            PropertyValue::String(s) => 4 + utf16_len(s) * 2,
            PropertyValue::Binary(b) => 4 + b.len(),
            PropertyValue::Bool(_) => 1,
            PropertyValue::DateTime(_) => 8,
            PropertyValue::Double(_) => 8,
            PropertyValue::Int32(_) => 4,
            PropertyValue::Int64(_) => 8,
            PropertyValue::Guid(_) => 16,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            PropertyValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            PropertyValue::Binary(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            PropertyValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_datetime(&self) -> Option<DateTime<Utc>> {
        match self {
            PropertyValue::DateTime(dt) => Some(*dt),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            PropertyValue::Double(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_i32(&self) -> Option<i32> {
        match self {
            PropertyValue::Int32(v) => Some(*v),
            _ => None,
        }
    }

    /// Integer value, widening `Int32`
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            PropertyValue::Int32(v) => Some(i64::from(*v)),
            PropertyValue::Int64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_guid(&self) -> Option<Uuid> {
        match self {
            PropertyValue::Guid(g) => Some(*g),
            _ => None,
        }
    }
}

/// Estimated stored size of one named property
pub fn estimated_property_size(name: &str, value: &PropertyValue) -> usize {
    PROPERTY_OVERHEAD_BYTES + utf16_len(name) * 2 + value.estimated_size()
}

/// Estimated stored size of an entity with the given keys and properties
pub fn estimated_entity_size(partition_key: &str, row_key: &str, properties: &PropertyMap) -> usize {
    let keys = (utf16_len(partition_key) + utf16_len(row_key)) * 2;
    let props: usize = properties
        .iter()
        .map(|(name, value)| estimated_property_size(name, value))
        .sum();
    ENTITY_OVERHEAD_BYTES + keys + props
}

impl From<String> for PropertyValue {
    fn from(v: String) -> Self {
        PropertyValue::String(v)
    }
}

impl From<&str> for PropertyValue {
    fn from(v: &str) -> Self {
        PropertyValue::String(v.to_string())
    }
}

impl From<Vec<u8>> for PropertyValue {
    fn from(v: Vec<u8>) -> Self {
        PropertyValue::Binary(v)
    }
}

impl From<&[u8]> for PropertyValue {
    fn from(v: &[u8]) -> Self {
        PropertyValue::Binary(v.to_vec())
    }
}

impl From<bool> for PropertyValue {
    fn from(v: bool) -> Self {
        PropertyValue::Bool(v)
    }
}

impl From<DateTime<Utc>> for PropertyValue {
    fn from(v: DateTime<Utc>) -> Self {
        PropertyValue::DateTime(v)
    }
}

impl From<f64> for PropertyValue {
    fn from(v: f64) -> Self {
        PropertyValue::Double(v)
    }
}

impl From<f32> for PropertyValue {
    fn from(v: f32) -> Self {
        PropertyValue::Double(f64::from(v))
    }
}

impl From<i32> for PropertyValue {
    fn from(v: i32) -> Self {
        PropertyValue::Int32(v)
    }
}

impl From<i64> for PropertyValue {
    fn from(v: i64) -> Self {
        PropertyValue::Int64(v)
    }
}

impl From<u32> for PropertyValue {
    fn from(v: u32) -> Self {
        PropertyValue::Int64(i64::from(v))
    }
}

impl From<Uuid> for PropertyValue {
    fn from(v: Uuid) -> Self {
        PropertyValue::Guid(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_sizes() {
        assert_eq!(PropertyValue::from("abc").estimated_size(), 4 + 6);
        assert_eq!(PropertyValue::from(vec![0u8; 10]).estimated_size(), 14);
        assert_eq!(PropertyValue::from(true).estimated_size(), 1);
        assert_eq!(PropertyValue::from(1i32).estimated_size(), 4);
        assert_eq!(PropertyValue::from(1i64).estimated_size(), 8);
        assert_eq!(PropertyValue::from(1.5f64).estimated_size(), 8);
        assert_eq!(PropertyValue::from(Utc::now()).estimated_size(), 8);
        assert_eq!(PropertyValue::from(Uuid::new_v4()).estimated_size(), 16);
    }

    #[test]
    fn test_strings_count_utf16_units() {
        // U+1F600 needs a surrogate pair, 'é' a single unit
        assert_eq!(utf16_len("é"), 1);
        assert_eq!(utf16_len("😀"), 2);
        assert_eq!(PropertyValue::from("😀").estimated_size(), 4 + 4);
    }

    #[test]
    fn test_entity_size() {
        let mut props = PropertyMap::new();
        props.insert("Count".into(), PropertyValue::Int64(1));

        // 4 + (5 + 16) * 2 + (8 + 5 * 2 + 8)
        let size = estimated_entity_size("camp1", "2024-01-01-10-00", &props);
        assert_eq!(size, 4 + 42 + 26);
    }

    #[test]
    fn test_accessors() {
        assert_eq!(PropertyValue::from("x").as_str(), Some("x"));
        assert_eq!(PropertyValue::from(3i32).as_i64(), Some(3));
        assert_eq!(PropertyValue::from(3i64).as_i32(), None);
        assert_eq!(PropertyValue::from(2.0f64).as_f64(), Some(2.0));
        assert_eq!(PropertyValue::from(false).as_bool(), Some(false));
        assert!(PropertyValue::from("x").as_guid().is_none());
    }

    #[test]
    fn test_type_names() {
        assert_eq!(PropertyValue::from(1i64).type_name(), "Edm.Int64");
        assert_eq!(PropertyValue::from(vec![1u8]).type_name(), "Edm.Binary");
    }
}
