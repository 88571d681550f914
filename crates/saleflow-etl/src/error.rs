//! Error types for the ETL pipeline
//!
//! Errors split into two scopes. Anything returned out of the chunk loop ends
//! the job: opening the artifact, reading it and preparing the sink. Errors
//! from transforming or loading a chunk fail only that chunk and are recorded
//! in its `ChunkResult`.

use std::any::Any;
use thiserror::Error;

pub type EtlResult<T> = Result<T, EtlError>;

/// Structural validation failures raised by the transformer
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("required source columns missing: {0:?}")]
    MissingRequired(Vec<String>),

    #[error("required sink columns missing after transformation: {0:?}")]
    MissingSinkColumns(Vec<String>),

    #[error("row {row}: column {column} has invalid value {value:?}: {reason}")]
    InvalidValue {
        row: usize,
        column: String,
        value: String,
        reason: String,
    },
}

impl ValidationError {
    pub fn invalid_value(
        row: usize,
        column: impl Into<String>,
        value: impl Into<String>,
        reason: impl ToString,
    ) -> Self {
        Self::InvalidValue {
            row,
            column: column.into(),
            value: value.into(),
            reason: reason.to_string(),
        }
    }
}

#[derive(Error, Debug)]
pub enum EtlError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Extraction failed: {0}")]
    Extraction(String),

    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("Load failed: {0}")]
    Load(String),

    #[error("Encryption failed: {0}")]
    Encryption(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error(transparent)]
    Common(#[from] saleflow_common::CommonError),
}

impl EtlError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    pub fn extraction(message: impl ToString) -> Self {
        Self::Extraction(message.to_string())
    }

    pub fn storage(message: impl ToString) -> Self {
        Self::Storage(message.to_string())
    }
}

/// Text of a caught panic payload
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}
