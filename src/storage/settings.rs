//! Storage settings
//!
//! Settings declare, per time unit, the row-key format and (through a shared
//! root) the table name, plus the connection string(s) of the backing store.
//! They are built once before an engine starts and not changed afterwards.
//!
//! Table names are `root + unit identifier`, e.g. `campaignstatsMinute`.
//!
//! Settings serialize to TOML or JSON:
//!
//! ```toml
//! tables_name_root = "campaignstats"
//! connection_string = "DefaultEndpointsProtocol=https;AccountName=..."
//!
//! [row_key_formats]
//! minute = "yyyy-MM-dd-HH-mm"
//! hour = "yyyy-MM-dd-HH"
//! ```

use crate::storage::error::{StorageError, StorageResult};
use crate::storage::filter::{create_partition_filter, create_retrieve_filter, TableFilter};
use crate::storage::row_key::RowKeyFormat;
use crate::storage::time_unit::TimeUnit;
use crate::storage::types::TimeRange;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Longest table name the store accepts
pub const MAX_TABLE_NAME_LEN: usize = 63;

/// Shortest table name the store accepts
pub const MIN_TABLE_NAME_LEN: usize = 3;

/// Check a table name against the store's naming rules
pub fn validate_table_name(name: &str) -> StorageResult<()> {
    let len = name.chars().count();
    if !(MIN_TABLE_NAME_LEN..=MAX_TABLE_NAME_LEN).contains(&len) {
        return Err(StorageError::Config(format!(
            "table name {:?} must be {}-{} characters long",
            name, MIN_TABLE_NAME_LEN, MAX_TABLE_NAME_LEN
        )));
    }
    if !name.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(StorageError::Config(format!(
            "table name {:?} may only contain ASCII letters and digits",
            name
        )));
    }
    if !name.starts_with(|c: char| c.is_ascii_alphabetic()) {
        return Err(StorageError::Config(format!(
            "table name {:?} must start with a letter",
            name
        )));
    }
    Ok(())
}

/// Settings shared by single- and multi-region deployments
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageSettingsBase {
    /// Prefix of every table name
    pub tables_name_root: String,
    /// Row-key format per configured time unit
    #[serde(default)]
    pub row_key_formats: BTreeMap<TimeUnit, String>,
}

impl StorageSettingsBase {
    /// Settings with no time units configured yet
    pub fn new(tables_name_root: impl Into<String>) -> Self {
        Self {
            tables_name_root: tables_name_root.into(),
            row_key_formats: BTreeMap::new(),
        }
    }

    /// Minute, hour and day tables with dash-separated row keys
    pub fn with_default_formats(tables_name_root: impl Into<String>) -> Self {
        Self::new(tables_name_root)
            .unit(TimeUnit::Minute, "yyyy-MM-dd-HH-mm")
            .unit(TimeUnit::Hour, "yyyy-MM-dd-HH")
            .unit(TimeUnit::Day, "yyyy-MM-dd")
    }

    /// Builder: configure a time unit with its row-key format
    pub fn unit(mut self, unit: TimeUnit, row_key_format: impl Into<String>) -> Self {
        self.row_key_formats.insert(unit, row_key_format.into());
        self
    }

    /// Configured units, finest first
    pub fn units(&self) -> impl Iterator<Item = TimeUnit> + '_ {
        self.row_key_formats.keys().copied()
    }

    /// Table name for `unit`
    pub fn table_name(&self, unit: TimeUnit) -> StorageResult<String> {
        if !self.row_key_formats.contains_key(&unit) {
            return Err(StorageError::UnknownTimeUnit(unit));
        }
        Ok(format!("{}{}", self.tables_name_root, unit.identifier()))
    }

    /// Parsed row-key format for `unit`
    pub fn row_key_format(&self, unit: TimeUnit) -> StorageResult<RowKeyFormat> {
        let pattern = self
            .row_key_formats
            .get(&unit)
            .ok_or(StorageError::UnknownTimeUnit(unit))?;
        RowKeyFormat::parse(pattern)
    }

    /// Check every unit's table name and row-key format
    pub fn validate(&self) -> StorageResult<()> {
        if self.row_key_formats.is_empty() {
            return Err(StorageError::Config(
                "at least one time unit must be configured".into(),
            ));
        }
        for unit in self.units() {
            validate_table_name(&self.table_name(unit)?)?;
            self.row_key_format(unit)?.validate_for(unit)?;
        }
        Ok(())
    }

    /// Filter selecting `interval` across all partitions, or one partition
    pub fn create_retrieve_filter(
        &self,
        unit: TimeUnit,
        interval: &TimeRange,
        partition_key: Option<&str>,
    ) -> StorageResult<TableFilter> {
        let format = self.row_key_format(unit)?;
        Ok(match partition_key {
            Some(pk) => create_partition_filter(&format, interval, pk),
            None => create_retrieve_filter(&format, interval),
        })
    }
}

/// Identifier of a deployment region
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Region(String);

impl Region {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Region {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for Region {
    fn from(name: String) -> Self {
        Self(name)
    }
}

/// Hide credentials in debug output
struct Redacted<'a>(&'a str);

impl fmt::Debug for Redacted<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<redacted {} chars>", self.0.len())
    }
}

fn ensure_connection(label: &str, connection_string: &str) -> StorageResult<()> {
    if connection_string.trim().is_empty() {
        return Err(StorageError::Config(format!(
            "connection string for {} is empty",
            label
        )));
    }
    Ok(())
}

/// Settings for a deployment backed by one store account
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SingleRegionSettings {
    pub connection_string: String,
    #[serde(flatten)]
    pub base: StorageSettingsBase,
}

impl SingleRegionSettings {
    pub fn new(base: StorageSettingsBase, connection_string: impl Into<String>) -> Self {
        Self {
            connection_string: connection_string.into(),
            base,
        }
    }

    pub fn validate(&self) -> StorageResult<()> {
        ensure_connection("the store", &self.connection_string)?;
        self.base.validate()
    }

    pub fn from_toml_str(s: &str) -> StorageResult<Self> {
        Ok(toml::from_str(s)?)
    }

    pub fn to_toml_string(&self) -> StorageResult<String> {
        Ok(toml::to_string(self)?)
    }

    pub fn from_json_str(s: &str) -> StorageResult<Self> {
        Ok(serde_json::from_str(s)?)
    }

    pub fn to_json_string(&self) -> StorageResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

impl fmt::Debug for SingleRegionSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SingleRegionSettings")
            .field("connection_string", &Redacted(&self.connection_string))
            .field("base", &self.base)
            .finish()
    }
}

/// Settings for a deployment with one store account per region
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultiRegionSettings {
    #[serde(flatten)]
    pub base: StorageSettingsBase,
    #[serde(default)]
    pub connection_strings: BTreeMap<Region, String>,
}

impl MultiRegionSettings {
    pub fn new(base: StorageSettingsBase) -> Self {
        Self {
            base,
            connection_strings: BTreeMap::new(),
        }
    }

    /// Builder: add a region and its connection string
    pub fn region(mut self, region: impl Into<Region>, connection_string: impl Into<String>) -> Self {
        self.connection_strings
            .insert(region.into(), connection_string.into());
        self
    }

    pub fn regions(&self) -> impl Iterator<Item = &Region> {
        self.connection_strings.keys()
    }

    pub fn validate(&self) -> StorageResult<()> {
        if self.connection_strings.is_empty() {
            return Err(StorageError::Config(
                "at least one region must be configured".into(),
            ));
        }
        for (region, connection_string) in &self.connection_strings {
            if region.as_str().trim().is_empty() {
                return Err(StorageError::Config("region name is empty".into()));
            }
            ensure_connection(&format!("region {}", region), connection_string)?;
        }
        self.base.validate()
    }

    pub fn from_toml_str(s: &str) -> StorageResult<Self> {
        Ok(toml::from_str(s)?)
    }

    pub fn to_toml_string(&self) -> StorageResult<String> {
        Ok(toml::to_string(self)?)
    }

    pub fn from_json_str(s: &str) -> StorageResult<Self> {
        Ok(serde_json::from_str(s)?)
    }

    pub fn to_json_string(&self) -> StorageResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

impl fmt::Debug for MultiRegionSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let regions: BTreeMap<&Region, Redacted<'_>> = self
            .connection_strings
            .iter()
            .map(|(region, conn)| (region, Redacted(conn)))
            .collect();
        f.debug_struct("MultiRegionSettings")
            .field("base", &self.base)
            .field("connection_strings", &regions)
            .finish()
    }
}
