//! Loading transformed batches into the sink
//!
//! A batch is cut into sub-batches of `sub_batch_size` rows, and each one is
//! written as its own multi-row insert. Up to `concurrency` writes run at a
//! time. Every sub-batch is attempted even after a sibling fails, and the
//! batch only counts as loaded when all of them succeeded.

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use futures::FutureExt;
use serde::Serialize;
use sqlx::{PgPool, Postgres, QueryBuilder};
use std::ops::Range;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

use crate::db;
use crate::error::{panic_message, EtlError, EtlResult};
use crate::models::{SinkRow, SinkValue, TransformedBatch};

/// Writes one sub-batch to the sink
#[async_trait]
pub trait SinkWriter: Send + Sync {
    /// Get the sink ready for writes. Called once per job before the artifact
    /// is read; an error here fails the job.
    async fn prepare(&self) -> EtlResult<()> {
        Ok(())
    }

    /// Insert `rows` into `table`; returns the number of rows written.
    async fn write(&self, table: &str, columns: &[&'static str], rows: &[SinkRow]) -> EtlResult<u64>;
}

/// Postgres sink using one `INSERT ... VALUES` statement per sub-batch
#[derive(Clone)]
pub struct PgSinkWriter {
    pool: PgPool,
    run_migrations: bool,
}

impl PgSinkWriter {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            run_migrations: false,
        }
    }

    /// Apply the bundled migrations when the job prepares the sink
    pub fn with_migrations(mut self, run_migrations: bool) -> Self {
        self.run_migrations = run_migrations;
        self
    }
}

#[async_trait]
impl SinkWriter for PgSinkWriter {
    async fn prepare(&self) -> EtlResult<()> {
        if self.run_migrations {
            db::run_migrations(&self.pool).await?;
        }
        Ok(())
    }

    async fn write(&self, table: &str, columns: &[&'static str], rows: &[SinkRow]) -> EtlResult<u64> {
        if rows.is_empty() {
            return Ok(0);
        }

        let column_list = columns
            .iter()
            .map(|c| quote_ident(c))
            .collect::<Vec<_>>()
            .join(", ");

        let mut query_builder: QueryBuilder<Postgres> = QueryBuilder::new(format!(
            "INSERT INTO {} ({}) ",
            quote_table(table),
            column_list
        ));

        query_builder.push_values(rows, |mut b, row| {
            for value in row {
                match value {
                    SinkValue::Text(v) => b.push_bind(v.clone()),
                    SinkValue::Integer(v) => b.push_bind(*v),
                    SinkValue::Decimal(v) => b.push_bind(*v),
                    SinkValue::Date(v) => b.push_bind(*v),
                    SinkValue::Time(v) => b.push_bind(*v),
                };
            }
        });

        let result = query_builder.build().execute(&self.pool).await?;
        Ok(result.rows_affected())
    }
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn quote_table(table: &str) -> String {
    table.split('.').map(quote_ident).collect::<Vec<_>>().join(".")
}

/// Outcome of one sub-batch write
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubBatchOutcome {
    /// 1-based position within the batch
    pub index: usize,
    /// Row positions within the batch, 0-based and half-open
    pub rows: Range<usize>,
    pub rows_written: u64,
    pub error: Option<String>,
}

impl SubBatchOutcome {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoadReport {
    pub chunk_index: usize,
    pub table: String,
    /// Ordered by sub-batch index
    pub sub_batches: Vec<SubBatchOutcome>,
}

impl LoadReport {
    /// True only if there was something to write and every write succeeded
    pub fn success(&self) -> bool {
        !self.sub_batches.is_empty() && self.sub_batches.iter().all(SubBatchOutcome::succeeded)
    }

    pub fn rows_written(&self) -> u64 {
        self.sub_batches.iter().map(|s| s.rows_written).sum()
    }

    pub fn failures(&self) -> impl Iterator<Item = &SubBatchOutcome> {
        self.sub_batches.iter().filter(|s| !s.succeeded())
    }

    /// Chunk-level error describing every failed sub-batch
    pub fn error(&self) -> Option<EtlError> {
        if self.sub_batches.is_empty() {
            return Some(EtlError::Load("nothing to load".into()));
        }
        let failed: Vec<String> = self
            .failures()
            .map(|s| format!("sub-batch {} (rows {}..{})", s.index, s.rows.start, s.rows.end))
            .collect();
        if failed.is_empty() {
            None
        } else {
            Some(EtlError::Load(format!(
                "{} of {} sub-batches failed: {}",
                failed.len(),
                self.sub_batches.len(),
                failed.join(", ")
            )))
        }
    }
}

/// One unit of concurrent work: an immutable slice of the batch
struct SubBatchTask<'a> {
    index: usize,
    rows: Range<usize>,
    data: &'a [SinkRow],
}

impl SubBatchTask<'_> {
    async fn run(
        self,
        writer: &dyn SinkWriter,
        table: &str,
        columns: &[&'static str],
        chunk_index: usize,
    ) -> SubBatchOutcome {
        let written = AssertUnwindSafe(writer.write(table, columns, self.data))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| {
                Err(EtlError::Load(format!(
                    "writer panicked: {}",
                    panic_message(panic.as_ref())
                )))
            });

        match written {
            Ok(rows_written) => {
                debug!(
                    chunk = chunk_index,
                    sub_batch = self.index,
                    rows_written,
                    "Sub-batch written"
                );
                SubBatchOutcome {
                    index: self.index,
                    rows: self.rows,
                    rows_written,
                    error: None,
                }
            }
            Err(e) => {
                error!(
                    chunk = chunk_index,
                    sub_batch = self.index,
                    first_row = self.rows.start,
                    last_row = self.rows.end.saturating_sub(1),
                    row_count = self.data.len(),
                    error = %e,
                    "Sub-batch write failed, rows not loaded"
                );
                SubBatchOutcome {
                    index: self.index,
                    rows: self.rows,
                    rows_written: 0,
                    error: Some(e.to_string()),
                }
            }
        }
    }
}

pub struct Loader {
    writer: Arc<dyn SinkWriter>,
    sub_batch_size: usize,
    concurrency: usize,
}

impl Loader {
    pub fn new(writer: Arc<dyn SinkWriter>, sub_batch_size: usize, concurrency: usize) -> Self {
        Self {
            writer,
            sub_batch_size: sub_batch_size.max(1),
            concurrency: concurrency.max(1),
        }
    }

    /// Write `batch` into `table` and wait for every sub-batch to finish
    pub async fn load(&self, batch: &TransformedBatch, table: &str) -> LoadReport {
        let mut report = LoadReport {
            chunk_index: batch.chunk_index,
            table: table.to_string(),
            sub_batches: Vec::new(),
        };

        if batch.is_empty() {
            warn!(chunk = batch.chunk_index, "No data to load");
            return report;
        }

        let start = Instant::now();
        let tasks = batch
            .rows
            .chunks(self.sub_batch_size)
            .enumerate()
            .map(|(i, data)| {
                let first = i * self.sub_batch_size;
                SubBatchTask {
                    index: i + 1,
                    rows: first..first + data.len(),
                    data,
                }
            });

        let writer = self.writer.as_ref();
        let columns = batch.columns.as_slice();
        report.sub_batches = stream::iter(tasks)
            .map(|task| task.run(writer, table, columns, batch.chunk_index))
            .buffer_unordered(self.concurrency)
            .collect()
            .await;
        report.sub_batches.sort_by_key(|s| s.index);

        if report.success() {
            info!(
                chunk = batch.chunk_index,
                table,
                rows = report.rows_written(),
                sub_batches = report.sub_batches.len(),
                duration_ms = start.elapsed().as_millis() as u64,
                "Chunk loaded"
            );
        } else {
            error!(
                chunk = batch.chunk_index,
                table,
                failed = report.failures().count(),
                sub_batches = report.sub_batches.len(),
                "Chunk load incomplete"
            );
        }

        report
    }
}
