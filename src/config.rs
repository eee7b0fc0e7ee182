//! Loader configuration.
//!
//! Configuration is an explicit value: it is read once (usually from an XML
//! file), validated, and then handed to the decoder and the [`Loader`]. Nothing
//! is stored in process-wide state, so several configurations can coexist in
//! one process (the tests rely on this).
//!
//! ```xml
//! <LoaderConfig>
//!   <backend>postgres</backend>
//!   <source_dir>/data/nyc-taxi</source_dir>
//!   <load>
//!     <batch_size>5000</batch_size>
//!     <workers>8</workers>
//!     <record_limit>0</record_limit>
//!   </load>
//!   <postgres>
//!     <url>host=localhost user=loader password=secret dbname=taxi</url>
//!     <table>public.trips</table>
//!   </postgres>
//! </LoaderConfig>
//! ```
//!
//! [`Loader`]: crate::orchestrator::Loader

use crate::error::{LoadError, Result};
use crate::record::is_whole_cents;
use crate::retry::RetryPolicy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Which writer backend sessions are opened against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    Postgres,
    Jsonl,
    Memory,
}

impl BackendKind {
    #[must_use]
    pub const fn display_name(self) -> &'static str {
        match self {
            Self::Postgres => "PostgreSQL",
            Self::Jsonl => "JSON lines",
            Self::Memory => "in-memory",
        }
    }
}

/// Top-level configuration document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    pub backend: BackendKind,
    /// Directory scanned recursively for `*.parquet` inputs.
    pub source_dir: PathBuf,
    pub load: LoadOptions,
    pub limits: SchemaLimits,
    pub postgres: Option<PostgresConfig>,
    pub jsonl: Option<JsonlConfig>,
}

/// Batching, parallelism and timing knobs for one load.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoadOptions {
    /// Records per backend round-trip.
    pub batch_size: usize,
    /// Parallel writer sessions (and pool threads).
    pub workers: usize,
    /// Maximum records decoded per file; `0` means unbounded.
    pub record_limit: usize,
    /// Sessions log their running total every time it crosses a multiple of this.
    pub log_interval: u64,
    /// The decoder logs every this many rows.
    pub progress_interval: usize,
    /// Attempts per batch before a worker gives up; `1` disables retry.
    pub batch_attempts: u32,
    pub retry_delay_ms: u64,
    /// Deadline for all workers of one file; unset waits indefinitely.
    pub load_timeout_secs: Option<u64>,
    /// How long to wait for in-flight workers once the deadline has passed.
    pub shutdown_grace_secs: u64,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            batch_size: 1_000,
            workers: num_cpus::get().max(1),
            record_limit: 0,
            log_interval: 100_000,
            progress_interval: 100_000,
            batch_attempts: 1,
            retry_delay_ms: 100,
            load_timeout_secs: None,
            shutdown_grace_secs: 60,
        }
    }
}

impl LoadOptions {
    #[must_use]
    pub fn load_timeout(&self) -> Option<Duration> {
        self.load_timeout_secs.map(Duration::from_secs)
    }

    #[must_use]
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }

    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.batch_attempts.max(1),
            initial_delay: Duration::from_millis(self.retry_delay_ms),
            ..RetryPolicy::default()
        }
    }
}

/// Upper bounds of the destination decimal columns.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchemaLimits {
    /// `DECIMAL(9,2)`
    pub trip_distance_max: f64,
    /// `DECIMAL(12,2)`
    pub fare_amount_max: f64,
    /// `DECIMAL(10,2)`, shared by every other money column.
    pub money_max: f64,
}

impl Default for SchemaLimits {
    fn default() -> Self {
        Self {
            trip_distance_max: 9_999_999.99,
            fare_amount_max: 9_999_999_999.99,
            money_max: 99_999_999.99,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostgresConfig {
    /// libpq-style connection string or `postgresql://` URL.
    pub url: String,
    pub table: String,
    /// Session statements applied after connecting; failures are only logged.
    #[serde(rename = "setting", default = "default_pg_settings")]
    pub settings: Vec<String>,
}

fn default_pg_settings() -> Vec<String> {
    [
        "SET work_mem = '256MB'",
        "SET maintenance_work_mem = '512MB'",
        "SET synchronous_commit = OFF",
        "SET statement_timeout = '300s'",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonlConfig {
    pub output_dir: PathBuf,
    #[serde(default = "default_collection")]
    pub collection: String,
}

fn default_collection() -> String {
    "trips".to_string()
}

impl LoaderConfig {
    /// Read and validate an XML configuration file.
    ///
    /// # Errors
    ///
    /// Returns [`LoadError::Config`] if the file is missing, is not valid XML
    /// for this schema, or fails [`validate`](Self::validate).
    pub fn from_xml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            LoadError::Config(format!("cannot read config file {}: {e}", path.display()))
        })?;
        let cfg = Self::from_xml_str(&text)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Parse an XML document without validating it.
    ///
    /// # Errors
    ///
    /// Returns [`LoadError::Config`] on malformed XML or mistyped values.
    pub fn from_xml_str(text: &str) -> Result<Self> {
        quick_xml::de::from_str(text).map_err(|e| LoadError::Config(format!("invalid config: {e}")))
    }

    /// Check the settings the selected backend and the pipeline depend on.
    ///
    /// # Errors
    ///
    /// Returns [`LoadError::Config`] describing the first problem found.
    pub fn validate(&self) -> Result<()> {
        if self.load.batch_size == 0 {
            return Err(LoadError::Config("batch_size must be at least 1".into()));
        }
        if self.load.workers == 0 {
            return Err(LoadError::Config("workers must be at least 1".into()));
        }
        for (name, max) in [
            ("trip_distance_max", self.limits.trip_distance_max),
            ("fare_amount_max", self.limits.fare_amount_max),
            ("money_max", self.limits.money_max),
        ] {
            if !max.is_finite() || max < 0.0 {
                return Err(LoadError::Config(format!("{name} must be a non-negative number")));
            }
            if !is_whole_cents(max) {
                return Err(LoadError::Config(format!(
                    "{name} must have at most two decimal places, got {max}"
                )));
            }
        }
        match self.backend {
            BackendKind::Postgres => {
                let pg = self.postgres.as_ref().ok_or_else(|| {
                    LoadError::Config("backend is postgres but <postgres> is missing".into())
                })?;
                if pg.url.trim().is_empty() {
                    return Err(LoadError::Config("postgres url is empty".into()));
                }
                validate_table_name(&pg.table)?;
            }
            BackendKind::Jsonl => {
                let j = self.jsonl.as_ref().ok_or_else(|| {
                    LoadError::Config("backend is jsonl but <jsonl> is missing".into())
                })?;
                if j.output_dir.as_os_str().is_empty() {
                    return Err(LoadError::Config("jsonl output_dir is empty".into()));
                }
                if j.collection.is_empty() || j.collection.contains(['/', '\\']) {
                    return Err(LoadError::Config(format!(
                        "invalid jsonl collection name: {:?}",
                        j.collection
                    )));
                }
            }
            BackendKind::Memory => {}
        }
        Ok(())
    }

    /// Log the effective configuration, without secrets.
    pub fn log_summary(&self) {
        tracing::info!(
            backend = self.backend.display_name(),
            source_dir = %self.source_dir.display(),
            batch_size = self.load.batch_size,
            workers = self.load.workers,
            record_limit = self.load.record_limit,
            log_interval = self.load.log_interval,
            "effective configuration"
        );
        if let Some(pg) = &self.postgres {
            tracing::info!(table = %pg.table, "postgres target");
        }
        if let Some(j) = &self.jsonl {
            tracing::info!(output_dir = %j.output_dir.display(), collection = %j.collection, "jsonl target");
        }
    }
}

/// Accept `name` or `schema.name`, each an unquoted SQL identifier.
///
/// # Errors
///
/// Returns [`LoadError::Config`] when the name would need quoting.
pub fn validate_table_name(name: &str) -> Result<()> {
    let re = Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*(\.[A-Za-z_][A-Za-z0-9_]*)?$")
        .map_err(|e| LoadError::Config(e.to_string()))?;
    if re.is_match(name) {
        Ok(())
    } else {
        Err(LoadError::Config(format!("invalid table name: {name:?}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_document() {
        let xml = r"
            <LoaderConfig>
              <backend>postgres</backend>
              <source_dir>/data/taxi</source_dir>
              <load>
                <batch_size>5000</batch_size>
                <workers>8</workers>
                <record_limit>250</record_limit>
                <load_timeout_secs>600</load_timeout_secs>
              </load>
              <limits><money_max>999.99</money_max></limits>
              <postgres>
                <url>host=localhost user=loader dbname=taxi</url>
                <table>public.trips</table>
                <setting>SET work_mem = '64MB'</setting>
              </postgres>
            </LoaderConfig>";
        let cfg = LoaderConfig::from_xml_str(xml).unwrap();
        cfg.validate().unwrap();
        assert_eq!(cfg.backend, BackendKind::Postgres);
        assert_eq!(cfg.source_dir, PathBuf::from("/data/taxi"));
        assert_eq!(cfg.load.batch_size, 5000);
        assert_eq!(cfg.load.workers, 8);
        assert_eq!(cfg.load.record_limit, 250);
        assert_eq!(cfg.load.load_timeout(), Some(Duration::from_secs(600)));
        assert_eq!(cfg.load.shutdown_grace(), Duration::from_secs(60));
        assert_eq!(cfg.limits.money_max, 999.99);
        assert_eq!(cfg.limits.fare_amount_max, 9_999_999_999.99);
        let pg = cfg.postgres.unwrap();
        assert_eq!(pg.table, "public.trips");
        assert_eq!(pg.settings, vec!["SET work_mem = '64MB'".to_string()]);
    }

    #[test]
    fn defaults_fill_missing_sections() {
        let cfg = LoaderConfig::from_xml_str(
            "<LoaderConfig><backend>memory</backend></LoaderConfig>",
        )
        .unwrap();
        cfg.validate().unwrap();
        assert_eq!(cfg.load.batch_size, 1_000);
        assert_eq!(cfg.load.batch_attempts, 1);
        assert!(cfg.load.workers >= 1);
        assert_eq!(cfg.limits, SchemaLimits::default());
    }

    #[test]
    fn rejects_bad_values() {
        let mut cfg = LoaderConfig {
            backend: BackendKind::Memory,
            ..LoaderConfig::default()
        };
        cfg.load.batch_size = 0;
        assert!(matches!(cfg.validate(), Err(LoadError::Config(_))));

        let cfg = LoaderConfig::from_xml_str(
            "<LoaderConfig><backend>postgres</backend></LoaderConfig>",
        )
        .unwrap();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_limits_with_fractional_cents() {
        let mut cfg = LoaderConfig {
            backend: BackendKind::Memory,
            ..LoaderConfig::default()
        };
        cfg.limits.money_max = 999.999;
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("money_max"), "got {err}");

        cfg.limits.money_max = 999.99;
        cfg.validate().unwrap();
    }

    #[test]
    fn table_names() {
        assert!(validate_table_name("trips").is_ok());
        assert!(validate_table_name("public.yellow_2024").is_ok());
        assert!(validate_table_name("trips; DROP TABLE x").is_err());
        assert!(validate_table_name("1trips").is_err());
    }
}
