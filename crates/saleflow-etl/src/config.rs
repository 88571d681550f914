//! Configuration management
//!
//! Everything is read once from the process environment (after loading a
//! `.env` file if one exists) into an [`EtlConfig`] that is passed by
//! reference into each component.

use saleflow_common::env;
use serde::Serialize;
use tracing::warn;

use crate::crypto::EncryptionMode;
use crate::db::DbConfig;
use crate::error::{EtlError, EtlResult};
use crate::storage::config::StorageConfig;

// ============================================================================
// Defaults
// ============================================================================

/// Default rows per sink insert statement.
pub const DEFAULT_SUB_BATCH_SIZE: usize = 1000;

/// Upper bound keeping one insert under the Postgres bind parameter limit.
pub const MAX_SUB_BATCH_SIZE: usize = 5000;

/// Default destination table.
pub const DEFAULT_SINK_TABLE: &str = "sales";

/// Where chunk sizing comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    /// Fixed `CHUNK_SIZE`
    Local,
    /// Derived from available memory
    Managed,
}

impl ExecutionMode {
    pub fn from_environment_name(name: &str) -> Self {
        if name.trim().eq_ignore_ascii_case("local") {
            ExecutionMode::Local
        } else {
            ExecutionMode::Managed
        }
    }
}

/// Inputs to the chunk size estimator.
///
/// Values that are missing or unparseable stay `None`; the estimator falls
/// back instead of refusing to start.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChunkingConfig {
    pub mode: ExecutionMode,
    pub local_chunk_size: Option<usize>,
    pub desired_fraction: Option<f64>,
    pub avg_row_size_bytes: Option<u64>,
}

impl ChunkingConfig {
    pub fn from_env() -> Self {
        Self {
            mode: ExecutionMode::from_environment_name(&env::var_or("ENVIRONMENT", "managed")),
            local_chunk_size: lenient("CHUNK_SIZE"),
            desired_fraction: lenient("DESIRED_CHUNK_FRACTION"),
            avg_row_size_bytes: lenient("AVG_ROW_SIZE_BYTES"),
        }
    }
}

fn lenient<T>(name: &str) -> Option<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    env::parse(name).unwrap_or_else(|e| {
        warn!(error = %e, "Ignoring chunking setting");
        None
    })
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoaderConfig {
    pub table: String,
    pub sub_batch_size: usize,
    pub concurrency: usize,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            table: DEFAULT_SINK_TABLE.to_string(),
            sub_batch_size: DEFAULT_SUB_BATCH_SIZE,
            concurrency: default_concurrency(),
        }
    }
}

impl LoaderConfig {
    pub fn from_env() -> EtlResult<Self> {
        Ok(Self {
            table: env::var_or("SINK_TABLE", DEFAULT_SINK_TABLE),
            sub_batch_size: env::parse_or("LOAD_SUB_BATCH_SIZE", DEFAULT_SUB_BATCH_SIZE)?,
            concurrency: env::parse_or("LOAD_CONCURRENCY", default_concurrency())?,
        })
    }
}

/// One writer per available core
pub fn default_concurrency() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

/// ETL configuration
#[derive(Debug, Clone)]
pub struct EtlConfig {
    pub chunking: ChunkingConfig,
    pub loader: LoaderConfig,
    pub database: DbConfig,
    pub storage: StorageConfig,
    /// Base64 AES-256 key; `None` stores flagged columns as plaintext
    pub encryption_key: Option<String>,
    pub run_migrations: bool,
}

impl EtlConfig {
    /// Load configuration from `.env` and the environment, then validate it
    pub fn load() -> EtlResult<Self> {
        dotenvy::dotenv().ok();

        let config = Self::from_env()?;
        config.validate()?;

        Ok(config)
    }

    pub fn from_env() -> EtlResult<Self> {
        Ok(Self {
            chunking: ChunkingConfig::from_env(),
            loader: LoaderConfig::from_env()?,
            database: DbConfig::from_env()?,
            storage: StorageConfig::from_env()?,
            encryption_key: env::var("ENCRYPTION_KEY"),
            run_migrations: env::flag("ETL_RUN_MIGRATIONS", false)?,
        })
    }

    /// Validate configuration
    pub fn validate(&self) -> EtlResult<()> {
        self.database.validate()?;

        if self.storage.bucket.is_empty() {
            return Err(EtlError::config("S3_BUCKET must be set"));
        }

        if self.loader.sub_batch_size == 0 {
            return Err(EtlError::config("LOAD_SUB_BATCH_SIZE must be greater than 0"));
        }

        if self.loader.sub_batch_size > MAX_SUB_BATCH_SIZE {
            return Err(EtlError::config(format!(
                "LOAD_SUB_BATCH_SIZE must not exceed {MAX_SUB_BATCH_SIZE}"
            )));
        }

        if self.loader.concurrency == 0 {
            return Err(EtlError::config("LOAD_CONCURRENCY must be greater than 0"));
        }

        if !is_valid_table_name(&self.loader.table) {
            return Err(EtlError::config(format!(
                "SINK_TABLE {:?} is not a valid table name",
                self.loader.table
            )));
        }

        self.encryption()?;

        Ok(())
    }

    pub fn encryption(&self) -> EtlResult<EncryptionMode> {
        EncryptionMode::from_key(self.encryption_key.as_deref())
    }
}

/// `table` or `schema.table`, each part an unquoted SQL identifier
pub fn is_valid_table_name(name: &str) -> bool {
    let parts: Vec<&str> = name.split('.').collect();
    parts.len() <= 2
        && parts.iter().all(|part| {
            let mut chars = part.chars();
            matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        })
}
