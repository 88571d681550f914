//! Batch and outcome types passed between pipeline stages

use chrono::{NaiveDate, NaiveTime};
use serde::Serialize;
use std::collections::HashMap;

/// One CSV record keyed by header name. Empty cells are left out.
pub type Row = HashMap<String, String>;

/// A chunk of parsed CSV records, as produced by the extractor
#[derive(Debug, Clone, PartialEq)]
pub struct RawRowBatch {
    /// 1-based, gapless within a job
    pub chunk_index: usize,
    /// Header columns in artifact order
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
}

impl RawRowBatch {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// A typed sink value
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum SinkValue {
    Text(String),
    Integer(i64),
    Decimal(f64),
    Date(NaiveDate),
    Time(NaiveTime),
}

impl SinkValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            SinkValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

/// Values in the same order as [`TransformedBatch::columns`]
pub type SinkRow = Vec<SinkValue>;

/// Rows ready for the sink: projected, typed and filtered
#[derive(Debug, Clone, PartialEq)]
pub struct TransformedBatch {
    pub chunk_index: usize,
    pub columns: Vec<&'static str>,
    pub rows: Vec<SinkRow>,
}

impl TransformedBatch {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Look up `column` in row `row`
    pub fn value(&self, row: usize, column: &str) -> Option<&SinkValue> {
        let idx = self.columns.iter().position(|c| *c == column)?;
        self.rows.get(row).and_then(|r| r.get(idx))
    }
}

/// What the transformer hands to the orchestrator
#[derive(Debug, Clone, PartialEq)]
pub enum TransformOutcome {
    Rows(TransformedBatch),
    /// Every row was filtered out; nothing to load
    Empty,
}

/// Per-chunk bookkeeping, appended once and never changed
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChunkResult {
    pub chunk_index: usize,
    pub success: bool,
    pub rows_extracted: usize,
    pub rows_loaded: usize,
    pub error: Option<String>,
}

impl ChunkResult {
    pub fn succeeded(chunk_index: usize, rows_extracted: usize, rows_loaded: usize) -> Self {
        Self {
            chunk_index,
            success: true,
            rows_extracted,
            rows_loaded,
            error: None,
        }
    }

    pub fn failed(chunk_index: usize, rows_extracted: usize, error: impl ToString) -> Self {
        Self {
            chunk_index,
            success: false,
            rows_extracted,
            rows_loaded: 0,
            error: Some(error.to_string()),
        }
    }
}

/// Aggregate of one job
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct JobOutcome {
    pub chunks: Vec<ChunkResult>,
    /// Job-scoped error that stopped the chunk loop
    pub fatal_error: Option<String>,
}

impl JobOutcome {
    pub fn success(&self) -> bool {
        self.fatal_error.is_none() && self.chunks.iter().all(|c| c.success)
    }

    pub fn summary(&self) -> JobSummary {
        let succeeded = self.chunks.iter().filter(|c| c.success).count();
        JobSummary {
            total_chunks: self.chunks.len(),
            succeeded_chunks: succeeded,
            failed_chunks: self.chunks.len() - succeeded,
            rows_extracted: self.chunks.iter().map(|c| c.rows_extracted).sum(),
            rows_loaded: self.chunks.iter().map(|c| c.rows_loaded).sum(),
            status: if self.success() {
                JobStatus::Success
            } else {
                JobStatus::Failure
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum JobStatus {
    Success,
    Failure,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Success => "SUCCESS",
            JobStatus::Failure => "FAILURE",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct JobSummary {
    pub total_chunks: usize,
    pub succeeded_chunks: usize,
    pub failed_chunks: usize,
    pub rows_extracted: usize,
    pub rows_loaded: usize,
    pub status: JobStatus,
}
