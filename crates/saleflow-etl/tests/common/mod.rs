//! Shared fixtures for saleflow-etl integration tests
//!
//! - [`ScriptedWriter`]: in-memory sink that can be told to fail or panic on
//!   specific transaction ids
//! - [`SalesCsv`]: builder for sales artifacts
//! - [`TestPostgres`]: Docker-backed Postgres with migrations applied

#![allow(dead_code)]

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use saleflow_etl::models::{SinkRow, SinkValue};
use saleflow_etl::{EtlError, EtlResult, SinkWriter};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::collections::HashSet;
use std::sync::Mutex;
use std::time::Duration;
use testcontainers::{core::IntoContainerPort, runners::AsyncRunner, ContainerAsync, ImageExt};
use testcontainers_modules::postgres::Postgres;

pub const ARTIFACT: &str = "sales.csv";

pub const HEADER: &str = "transaction_id,customer_id,product_id,store_id,quantity,unit_price,discount,total_amount,payment_method,timestamp";

/// Fixed completion time used by every pipeline under test
pub fn noon() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 1, 1, 12, 0, 0).unwrap()
}

// ============================================================================
// Sink
// ============================================================================

#[derive(Debug, Clone)]
pub struct WrittenBatch {
    pub table: String,
    pub columns: Vec<&'static str>,
    pub rows: Vec<SinkRow>,
}

#[derive(Default)]
pub struct ScriptedWriter {
    fail_ids: HashSet<String>,
    panic_ids: HashSet<String>,
    unavailable: bool,
    written: Mutex<Vec<WrittenBatch>>,
}

impl ScriptedWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject any sub-batch containing `transaction_id`
    pub fn failing_on(mut self, transaction_id: &str) -> Self {
        self.fail_ids.insert(transaction_id.to_lowercase());
        self
    }

    /// Panic on any sub-batch containing `transaction_id`
    pub fn panicking_on(mut self, transaction_id: &str) -> Self {
        self.panic_ids.insert(transaction_id.to_lowercase());
        self
    }

    /// Fail the job's sink preparation
    pub fn unavailable(mut self) -> Self {
        self.unavailable = true;
        self
    }

    pub fn batches(&self) -> Vec<WrittenBatch> {
        self.written.lock().unwrap().clone()
    }

    /// Every written value of `column`, sorted
    pub fn column_values(&self, column: &str) -> Vec<SinkValue> {
        let mut values: Vec<SinkValue> = self
            .batches()
            .iter()
            .flat_map(|b| {
                let idx = b.columns.iter().position(|c| *c == column).unwrap();
                b.rows.iter().map(move |r| r[idx].clone()).collect::<Vec<_>>()
            })
            .collect();
        values.sort_by_key(|v| format!("{v:?}"));
        values
    }

    pub fn transaction_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .column_values("transaction_id")
            .iter()
            .filter_map(|v| v.as_text().map(str::to_string))
            .collect();
        ids.sort();
        ids
    }
}

#[async_trait]
impl SinkWriter for ScriptedWriter {
    async fn prepare(&self) -> EtlResult<()> {
        if self.unavailable {
            return Err(EtlError::Load("sink unavailable".into()));
        }
        Ok(())
    }

    async fn write(&self, table: &str, columns: &[&'static str], rows: &[SinkRow]) -> EtlResult<u64> {
        let id_idx = columns
            .iter()
            .position(|c| *c == "transaction_id")
            .ok_or_else(|| EtlError::Load("no transaction_id column".into()))?;
        let ids: Vec<&str> = rows.iter().filter_map(|r| r[id_idx].as_text()).collect();

        if ids.iter().any(|id| self.panic_ids.contains(*id)) {
            panic!("sink exploded");
        }
        if ids.iter().any(|id| self.fail_ids.contains(*id)) {
            return Err(EtlError::Load("duplicate key value".into()));
        }

        tokio::task::yield_now().await;
        self.written.lock().unwrap().push(WrittenBatch {
            table: table.to_string(),
            columns: columns.to_vec(),
            rows: rows.to_vec(),
        });
        Ok(rows.len() as u64)
    }
}

// ============================================================================
// Artifacts
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct SalesCsv {
    lines: Vec<String>,
}

impl SalesCsv {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `n` valid rows with ids `T{start}..`
    pub fn valid_rows(mut self, start: usize, n: usize) -> Self {
        for i in start..start + n {
            self.lines.push(format!(
                "T{i},Cust-{i},P-{},S-{},2,10.00,0.1,,Card,2025-03-14 09:26:53",
                i % 7,
                i % 3
            ));
        }
        self
    }

    pub fn line(mut self, line: &str) -> Self {
        self.lines.push(line.to_string());
        self
    }

    pub fn build(&self) -> String {
        let mut out = format!("{HEADER}\n");
        for line in &self.lines {
            out.push_str(line);
            out.push('\n');
        }
        out
    }
}

// ============================================================================
// PostgreSQL Test Container
// ============================================================================

pub struct TestPostgres {
    _container: ContainerAsync<Postgres>,
    pool: PgPool,
}

impl TestPostgres {
    /// Start a PostgreSQL container and apply the sink migrations
    pub async fn start() -> Result<Self> {
        let container = Postgres::default()
            .with_tag("16-alpine")
            .start()
            .await
            .context("Failed to start PostgreSQL container")?;

        let host = container
            .get_host()
            .await
            .context("Failed to get container host")?;
        let port = container
            .get_host_port_ipv4(5432.tcp())
            .await
            .context("Failed to get container port")?;

        let connection_string = format!("postgresql://postgres:postgres@{host}:{port}/postgres");

        let pool = PgPoolOptions::new()
            .max_connections(8)
            .acquire_timeout(Duration::from_secs(30))
            .connect(&connection_string)
            .await
            .context("Failed to connect to PostgreSQL")?;

        saleflow_etl::db::run_migrations(&pool)
            .await
            .context("Failed to run migrations")?;

        Ok(Self {
            _container: container,
            pool,
        })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}
