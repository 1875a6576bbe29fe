//! chronotable CLI
//!
//! Operator tool for chronotable deployments:
//! - Print a configuration template
//! - Validate a configuration file and list the tables it implies
//! - Run an end-to-end demo against the in-memory store

use anyhow::{bail, Context};
use chrono::{TimeDelta, TimeZone, Utc};
use chronotable::config::{generate_default_config, Config, LoggingConfig};
use chronotable::storage::*;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "chronotable")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Time-bucketed table storage")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Config file (default: search the standard locations)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Generate default config file
    Config {
        /// Output path (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Validate a config file and list its tables
    Validate,

    /// Write and read counters through the in-memory store
    Demo {
        /// Number of counter events to write
        #[arg(short, long, default_value = "100")]
        events: u32,
        /// Time unit to bucket by
        #[arg(short, long, default_value = "minute")]
        unit: TimeUnit,
    },
}

fn init_logging(logging: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    let registry = tracing_subscriber::registry().with(filter);

    if logging.format == "json" {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// Load the explicit or first default config file; falls back to the environment
fn load_config(path: Option<&PathBuf>) -> anyhow::Result<(Config, Option<PathBuf>)> {
    match path.cloned().or_else(Config::find_default) {
        Some(path) => {
            let config = Config::load_with_env(&path)
                .with_context(|| format!("loading configuration from {:?}", path))?;
            Ok((config, Some(path)))
        }
        None => Ok((Config::from_env(), None)),
    }
}

fn log_config_source(source: Option<&PathBuf>) {
    match source {
        Some(path) => tracing::info!("Loaded config from {:?}", path),
        None => tracing::info!("Using default config with environment overrides"),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Config { output } => {
            let config = generate_default_config();

            match output {
                Some(path) => {
                    if let Some(parent) = path.parent() {
                        std::fs::create_dir_all(parent)?;
                    }
                    std::fs::write(&path, &config)?;
                    println!("Config written to {:?}", path);
                }
                None => {
                    print!("{}", config);
                }
            }
        }

        Commands::Validate => {
            let (config, source) = load_config(cli.config.as_ref())?;
            init_logging(&config.logging);
            log_config_source(source.as_ref());
            config.validate()?;

            if config.settings.is_multi_region() {
                let settings = config.settings.multi_region()?;
                println!("Multi-region configuration is valid");
                for region in settings.regions() {
                    println!("  region {}", region);
                }
            } else {
                config.settings.single_region()?;
                println!("Single-region configuration is valid");
            }

            let base = config.settings.base();
            for unit in base.units() {
                println!(
                    "  {:<8} table {:<32} row key {}",
                    unit.to_string(),
                    base.table_name(unit)?,
                    base.row_key_formats[&unit]
                );
            }
        }

        Commands::Demo { events, unit } => {
            let (mut config, source) = match cli.config.as_ref() {
                Some(_) => load_config(cli.config.as_ref())?,
                None => (Config::from_env(), None),
            };
            if config.settings.connection_string.is_none() && !config.settings.is_multi_region() {
                config.settings.connection_string = Some("memory://demo".into());
            }
            init_logging(&config.logging);
            log_config_source(source.as_ref());
            run_demo(&config, unit, events).await?;
        }
    }

    Ok(())
}

async fn run_demo(config: &Config, unit: TimeUnit, events: u32) -> anyhow::Result<()> {
    let settings = config.settings.single_region()?;
    if !settings.base.row_key_formats.contains_key(&unit) {
        bail!("time unit {} is not configured", unit);
    }

    tracing::info!("chronotable demo v{}", env!("CARGO_PKG_VERSION"));

    let connector = InMemoryConnector::new();
    let storage = TimeSeriesStorage::new(
        settings,
        Arc::new(CounterProvider),
        &connector,
        config.engine.options(),
    )?;

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            shutdown.cancel();
        }
    });

    storage.create_tables_if_not_exist(&cancel).await?;

    // Two inserts within the same minute share one bucket
    let start = Utc
        .with_ymd_and_hms(2024, 1, 1, 10, 0, 0)
        .single()
        .context("demo start time")?;
    let first = CounterEntity::new("camp1", start + TimeDelta::seconds(30), 1);
    let second = CounterEntity::new("camp1", start + TimeDelta::seconds(45), 1);
    storage.insert(unit, &[first], &cancel).await?;
    storage.insert(unit, &[second], &cancel).await?;

    let row_key = storage.table(unit)?.row_key(start + TimeDelta::seconds(30))?;
    println!("Inserted two events for camp1 into bucket {}", row_key);

    // Spread events over three campaigns, one per second
    let updates: Vec<CounterEntity> = (0..events)
        .map(|i| {
            CounterEntity::new(
                format!("camp{}", i % 3 + 1),
                start + TimeDelta::seconds(i64::from(i)),
                1,
            )
        })
        .collect();
    // One event per call: concurrent merges into the same bucket can lose counts
    for entity in &updates {
        storage
            .update(unit, std::slice::from_ref(entity), &cancel)
            .await?;
    }
    println!("Merged {} events", events);

    let end = unit
        .checked_add(unit.ceiling(start + TimeDelta::seconds(i64::from(events))), 1)
        .context("demo range overflows")?;
    let range = Range::new(unit.floor(start), end)?;
    let counters = storage.retrieve(unit, &range, &cancel).await?;

    println!("{} buckets between {} and {}:", counters.len(), range.begin(), range.end());
    for counter in &counters {
        println!(
            "  {:<8} {}  count={}",
            counter.key,
            counter.time.format("%Y-%m-%d %H:%M:%S"),
            counter.count
        );
    }

    let stats = connector
        .store(&storage.settings().connection_string)
        .map(|store| store.stats())
        .unwrap_or_default();
    tracing::info!(
        "Store served {} batches, {} single operations, {} query pages, {} point reads",
        stats.batches,
        stats.operations,
        stats.query_pages,
        stats.point_reads
    );

    Ok(())
}
