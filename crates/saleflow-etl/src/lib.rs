//! Saleflow ETL
//!
//! Moves sales records from an object-storage CSV artifact into Postgres in
//! bounded-memory chunks:
//!
//! - [`extract`] streams the artifact and cuts it into row batches
//! - [`transform`] validates, maps, encrypts, normalizes and filters a batch
//! - [`load`] writes a batch as concurrent sub-batch inserts
//! - [`finalize`] moves the artifact under `processed/success/` or
//!   `processed/fail/`
//! - [`orchestrator`] drives one job per artifact and always finalizes
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use saleflow_etl::{db, EtlConfig, PgSinkWriter, Pipeline, PipelineOptions, Storage};
//!
//! # async fn run() -> saleflow_etl::EtlResult<()> {
//! let config = EtlConfig::load()?;
//! let store = Arc::new(Storage::new(config.storage.clone()).await?);
//! let pool = db::create_pool(&config.database)?;
//!
//! let pipeline = Pipeline::new(
//!     store,
//!     Arc::new(PgSinkWriter::new(pool).with_migrations(config.run_migrations)),
//!     PipelineOptions::from_config(&config)?,
//! )?;
//! let report = pipeline.run("incoming/sales.csv").await;
//! println!("{}", report.summary.status.as_str());
//! # Ok(())
//! # }
//! ```

#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]

pub mod chunking;
pub mod config;
pub mod crypto;
pub mod db;
pub mod error;
pub mod extract;
pub mod finalize;
pub mod load;
pub mod mapping;
pub mod models;
pub mod orchestrator;
pub mod schema;
pub mod storage;
pub mod transform;

pub use config::EtlConfig;
pub use error::{EtlError, EtlResult, ValidationError};
pub use load::{Loader, PgSinkWriter, SinkWriter};
pub use models::{ChunkResult, JobOutcome, JobStatus, JobSummary};
pub use orchestrator::{JobReport, Pipeline, PipelineOptions};
pub use storage::{ArtifactStore, MemoryStore, Storage};
