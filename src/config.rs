//! Configuration System
//!
//! Handles loading configuration from files and environment variables.
//! Supports TOML config files and environment variable overrides.
//!
//! A configuration with a `[settings.regions]` table describes a
//! multi-region deployment; otherwise `settings.connection_string` names the
//! single store account.

use crate::storage::{
    BatchLimits, EngineOptions, MultiRegionSettings, Region, SingleRegionSettings, StorageError,
    StorageSettingsBase, TimeUnit, MAX_BATCH_BYTES, MAX_BATCH_OPERATIONS,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Prefix of every environment override
pub const ENV_PREFIX: &str = "CHRONOTABLE_";

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub settings: ConfiguredSettings,

    #[serde(default)]
    pub engine: EngineConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Table layout and store credentials
#[derive(Clone, Serialize, Deserialize)]
pub struct ConfiguredSettings {
    #[serde(default = "default_tables_name_root")]
    pub tables_name_root: String,

    /// Connection string of a single-region deployment
    #[serde(default)]
    pub connection_string: Option<String>,

    #[serde(default = "default_row_key_formats")]
    pub row_key_formats: BTreeMap<TimeUnit, String>,

    /// Region name to connection string, for multi-region deployments
    #[serde(default)]
    pub regions: BTreeMap<String, String>,
}

fn default_tables_name_root() -> String {
    "chronotable".to_string()
}

fn default_row_key_formats() -> BTreeMap<TimeUnit, String> {
    StorageSettingsBase::with_default_formats(default_tables_name_root()).row_key_formats
}

impl Default for ConfiguredSettings {
    fn default() -> Self {
        Self {
            tables_name_root: default_tables_name_root(),
            connection_string: None,
            row_key_formats: default_row_key_formats(),
            regions: BTreeMap::new(),
        }
    }
}

impl std::fmt::Debug for ConfiguredSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfiguredSettings")
            .field("tables_name_root", &self.tables_name_root)
            .field("connection_string", &self.connection_string.as_ref().map(|_| "<redacted>"))
            .field("row_key_formats", &self.row_key_formats)
            .field("regions", &self.regions.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ConfiguredSettings {
    pub fn is_multi_region(&self) -> bool {
        !self.regions.is_empty()
    }

    /// Whether a connection string is set but unused because regions are configured
    pub fn ignores_connection_string(&self) -> bool {
        self.is_multi_region() && self.connection_string.is_some()
    }

    pub fn base(&self) -> StorageSettingsBase {
        StorageSettingsBase {
            tables_name_root: self.tables_name_root.clone(),
            row_key_formats: self.row_key_formats.clone(),
        }
    }

    /// Settings for the single-region engine
    pub fn single_region(&self) -> Result<SingleRegionSettings, ConfigError> {
        if self.is_multi_region() {
            return Err(ConfigError::Invalid(StorageError::Config(
                "regions are configured; use the multi-region settings".into(),
            )));
        }
        let connection_string = self.connection_string.clone().ok_or_else(|| {
            ConfigError::Invalid(StorageError::Config(
                "settings.connection_string is not set".into(),
            ))
        })?;
        let settings = SingleRegionSettings::new(self.base(), connection_string);
        settings.validate()?;
        Ok(settings)
    }

    /// Settings for the multi-region engine
    pub fn multi_region(&self) -> Result<MultiRegionSettings, ConfigError> {
        let settings = self
            .regions
            .iter()
            .fold(MultiRegionSettings::new(self.base()), |settings, (region, conn)| {
                settings.region(Region::new(region.as_str()), conn.as_str())
            });
        settings.validate()?;
        Ok(settings)
    }

    /// Table names the configuration would use, in unit order
    pub fn table_names(&self) -> Result<Vec<String>, ConfigError> {
        let base = self.base();
        base.units()
            .map(|unit| base.table_name(unit).map_err(ConfigError::from))
            .collect()
    }
}

/// Engine runtime configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Cap on concurrent store calls; unbounded when absent
    #[serde(default)]
    pub max_concurrent_requests: Option<usize>,

    #[serde(default = "default_max_batch_operations")]
    pub max_batch_operations: usize,

    #[serde(default = "default_max_batch_bytes")]
    pub max_batch_bytes: usize,
}

fn default_max_batch_operations() -> usize {
    MAX_BATCH_OPERATIONS
}

fn default_max_batch_bytes() -> usize {
    MAX_BATCH_BYTES
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_requests: None,
            max_batch_operations: default_max_batch_operations(),
            max_batch_bytes: default_max_batch_bytes(),
        }
    }
}

impl EngineConfig {
    /// Engine options, with batch limits clamped to what the store accepts
    pub fn options(&self) -> EngineOptions {
        EngineOptions {
            max_concurrent_requests: self.max_concurrent_requests,
            batch_limits: BatchLimits {
                max_operations: self.max_batch_operations.clamp(1, MAX_BATCH_OPERATIONS),
                max_bytes: self.max_batch_bytes.clamp(1, MAX_BATCH_BYTES),
            },
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Config {
    /// Load and validate configuration from a file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let config = Self::parse_file(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration with environment variable overrides
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::parse_file(path)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from environment variables only
    pub fn from_env() -> Self {
        let mut config = Config::default();
        config.apply_env_overrides();
        config
    }

    /// First default location holding a config file
    pub fn find_default() -> Option<PathBuf> {
        Self::default_paths().into_iter().find(|path| path.exists())
    }

    /// Config file locations, in search order
    pub fn default_paths() -> Vec<PathBuf> {
        [
            dirs::config_dir().map(|p| p.join("chronotable").join("config.toml")),
            Some(PathBuf::from("/etc/chronotable/config.toml")),
            Some(PathBuf::from("./config.toml")),
        ]
        .into_iter()
        .flatten()
        .collect()
    }

    /// Check the storage settings this configuration describes
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.settings.is_multi_region() {
            if self.settings.ignores_connection_string() {
                tracing::warn!(
                    "settings.connection_string is ignored because {} regions are configured",
                    self.settings.regions.len()
                );
            }
            self.settings.multi_region()?;
        } else {
            self.settings.single_region()?;
        }
        match self.logging.format.as_str() {
            "pretty" | "json" => Ok(()),
            other => Err(ConfigError::Invalid(StorageError::Config(format!(
                "unknown log format {:?}, expected pretty or json",
                other
            )))),
        }
    }

    fn parse_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            error: e.to_string(),
        })
    }

    /// Apply environment variable overrides to an existing config
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(std::env::vars());
    }

    /// Apply `CHRONOTABLE_*` overrides from the given variables
    pub fn apply_overrides<I>(&mut self, vars: I)
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (name, value) in vars {
            let Some(key) = name.strip_prefix(ENV_PREFIX) else {
                continue;
            };

            match key {
                "CONNECTION_STRING" => self.settings.connection_string = Some(value),
                "TABLES_ROOT" => self.settings.tables_name_root = value,
                "LOG_LEVEL" => self.logging.level = value,
                "LOG_FORMAT" => self.logging.format = value,
                "MAX_CONCURRENCY" => match value.parse() {
                    Ok(n) => self.engine.max_concurrent_requests = Some(n),
                    Err(_) => tracing::warn!("Ignoring {}={:?}: not a number", name, value),
                },
                _ => {
                    if let Some(region) = key.strip_prefix("CONNECTION_STRING_") {
                        self.settings
                            .regions
                            .insert(region.to_lowercase(), value);
                    }
                }
            }
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path:?}: {error}")]
    Io { path: PathBuf, error: String },

    #[error("Failed to parse config file {path:?}: {error}")]
    Parse { path: PathBuf, error: String },

    #[error("Invalid configuration: {0}")]
    Invalid(#[from] StorageError),
}

/// Generate a default config file content
pub fn generate_default_config() -> String {
    r#"# chronotable configuration
#
# Environment variables override these settings:
# - CHRONOTABLE_CONNECTION_STRING
# - CHRONOTABLE_CONNECTION_STRING_<REGION>  (adds or replaces a region)
# - CHRONOTABLE_TABLES_ROOT
# - CHRONOTABLE_MAX_CONCURRENCY
# - CHRONOTABLE_LOG_LEVEL
# - CHRONOTABLE_LOG_FORMAT

[settings]
# Table names are this root followed by the time unit, e.g. chronotableMinute
tables_name_root = "chronotable"

# Store account of a single-region deployment
connection_string = "memory://local"

# Row-key format per time unit. Tokens: yyyy MM dd HH mm ss.
# Fields must run from the year downwards so row keys sort by time.
[settings.row_key_formats]
minute = "yyyy-MM-dd-HH-mm"
hour = "yyyy-MM-dd-HH"
day = "yyyy-MM-dd"

# For a multi-region deployment, list one store account per region
# and remove connection_string above.
# [settings.regions]
# westeurope = "memory://westeurope"
# eastus = "memory://eastus"

[engine]
# Maximum concurrent store calls (unbounded when unset)
# max_concurrent_requests = 64

# Batch limits, at most 100 operations and 4194304 bytes
max_batch_operations = 100
max_batch_bytes = 4194304

[logging]
# Log level: trace, debug, info, warn, error
level = "info"

# Log format: pretty (for development) or json (for production)
format = "pretty"
"#
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{CounterProvider, InMemoryConnector, TimeSeriesStorage};
    use std::io::Write;
    use std::sync::Arc;
    use tempfile::NamedTempFile;
    use tokio_util::sync::CancellationToken;

    fn write_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_default_config_template_is_valid() {
        let file = write_config(&generate_default_config());
        let config = Config::load(file.path()).unwrap();

        assert!(!config.settings.is_multi_region());
        assert_eq!(config.settings.tables_name_root, "chronotable");
        assert_eq!(
            config.settings.table_names().unwrap(),
            vec!["chronotableMinute", "chronotableHour", "chronotableDay"]
        );
        assert_eq!(config.engine.options(), EngineOptions::default());
        assert_eq!(config.logging.format, "pretty");
    }

    #[test]
    fn test_multi_region_config() {
        let file = write_config(
            r#"
            [settings]
            tables_name_root = "clicks"

            [settings.row_key_formats]
            hour = "yyyyMMddHH"

            [settings.regions]
            westeurope = "memory://weu"
            eastus = "memory://eus"
            "#,
        );
        let config = Config::load(file.path()).unwrap();

        let settings = config.settings.multi_region().unwrap();
        assert_eq!(settings.connection_strings.len(), 2);
        assert_eq!(settings.base.table_name(TimeUnit::Hour).unwrap(), "clicksHour");
        assert!(config.settings.single_region().is_err());
    }

    #[test]
    fn test_missing_connection_string_fails_validation() {
        let file = write_config("[logging]\nlevel = \"debug\"\n");
        assert!(matches!(
            Config::load(file.path()),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_bad_row_key_format_fails_validation() {
        let file = write_config(
            r#"
            [settings]
            connection_string = "memory://local"

            [settings.row_key_formats]
            minute = "HH:mm dd/MM/yyyy"
            "#,
        );
        let err = Config::load(file.path()).unwrap_err();
        assert!(err.to_string().contains("Invalid configuration"));
    }

    #[test]
    fn test_parse_and_io_errors() {
        let file = write_config("[settings\n");
        assert!(matches!(Config::load(file.path()), Err(ConfigError::Parse { .. })));

        let missing = Path::new("/nonexistent/chronotable/config.toml");
        assert!(matches!(Config::load(missing), Err(ConfigError::Io { .. })));
    }

    #[test]
    fn test_overrides() {
        let mut config = Config::default();
        config.apply_overrides(vars(&[
            ("CHRONOTABLE_CONNECTION_STRING", "memory://env"),
            ("CHRONOTABLE_TABLES_ROOT", "envstats"),
            ("CHRONOTABLE_LOG_LEVEL", "debug"),
            ("CHRONOTABLE_LOG_FORMAT", "json"),
            ("CHRONOTABLE_MAX_CONCURRENCY", "8"),
            ("UNRELATED", "ignored"),
        ]));

        assert_eq!(config.settings.connection_string.as_deref(), Some("memory://env"));
        assert_eq!(config.settings.tables_name_root, "envstats");
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.logging.format, "json");
        assert_eq!(config.engine.max_concurrent_requests, Some(8));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_region_overrides() {
        let mut config = Config::default();
        config.apply_overrides(vars(&[
            ("CHRONOTABLE_CONNECTION_STRING_WESTEUROPE", "memory://weu"),
            ("CHRONOTABLE_MAX_CONCURRENCY", "lots"),
        ]));

        assert!(config.settings.is_multi_region());
        assert_eq!(config.settings.regions["westeurope"], "memory://weu");
        assert_eq!(config.engine.max_concurrent_requests, None);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_regions_shadow_connection_string() {
        let mut config = Config::default();
        config.apply_overrides(vars(&[("CHRONOTABLE_CONNECTION_STRING", "memory://single")]));
        assert!(!config.settings.ignores_connection_string());

        config.apply_overrides(vars(&[("CHRONOTABLE_CONNECTION_STRING_EASTUS", "memory://eus")]));
        assert!(config.settings.ignores_connection_string());
        assert!(config.validate().is_ok());

        let settings = config.settings.multi_region().unwrap();
        assert_eq!(settings.regions().collect::<Vec<_>>(), vec![&Region::new("eastus")]);
    }

    #[tokio::test]
    async fn test_huge_concurrency_override_builds_an_engine() {
        let mut config = Config::default();
        config.apply_overrides(vars(&[
            ("CHRONOTABLE_CONNECTION_STRING", "memory://env"),
            ("CHRONOTABLE_MAX_CONCURRENCY", usize::MAX.to_string().as_str()),
        ]));
        assert_eq!(config.engine.max_concurrent_requests, Some(usize::MAX));
        config.validate().unwrap();

        let storage = TimeSeriesStorage::new(
            config.settings.single_region().unwrap(),
            Arc::new(CounterProvider),
            &InMemoryConnector::new(),
            config.engine.options(),
        )
        .unwrap();
        storage
            .create_tables_if_not_exist(&CancellationToken::new())
            .await
            .unwrap();
    }

    #[test]
    fn test_batch_limits_are_clamped() {
        let engine = EngineConfig {
            max_concurrent_requests: Some(4),
            max_batch_operations: 1000,
            max_batch_bytes: 0,
        };
        let options = engine.options();
        assert_eq!(options.batch_limits.max_operations, MAX_BATCH_OPERATIONS);
        assert_eq!(options.batch_limits.max_bytes, 1);
        assert_eq!(options.max_concurrent_requests, Some(4));
    }

    #[test]
    fn test_debug_hides_connection_string() {
        let mut config = Config::default();
        config.settings.connection_string = Some("AccountKey=hunter2".into());
        assert!(!format!("{:?}", config).contains("hunter2"));
    }
}
