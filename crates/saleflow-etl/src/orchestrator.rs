//! Per-artifact job orchestration
//!
//! A job walks `Started → Extracting → (Transforming → Loading)* →
//! Finalizing → Done`. Chunks run strictly one after another. A chunk that
//! fails to transform or load is recorded and the job moves on to the next
//! one. A sink that cannot be prepared or an extraction error ends the
//! loop. Finalization runs on every path out of the loop, panics included.

use futures::FutureExt;
use serde::Serialize;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, info_span, Instrument};

use chrono::{DateTime, Utc};

use crate::chunking::ChunkSizeEstimator;
use crate::config::EtlConfig;
use crate::crypto::EncryptionMode;
use crate::error::{panic_message, EtlError, EtlResult};
use crate::extract::StreamingExtractor;
use crate::finalize::{ArtifactStateManager, Relocation};
use crate::load::{Loader, SinkWriter};
use crate::mapping::ColumnMapper;
use crate::models::{ChunkResult, JobOutcome, JobSummary, RawRowBatch, TransformOutcome};
use crate::schema::SchemaRegistry;
use crate::storage::ArtifactStore;
use crate::transform::Transformer;

/// Entity whose schemas drive the pipeline
pub const SALES_ENTITY: &str = "sales";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JobState {
    Started,
    Extracting,
    Transforming,
    Loading,
    Finalizing,
    Done,
}

impl JobState {
    fn as_str(self) -> &'static str {
        match self {
            JobState::Started => "started",
            JobState::Extracting => "extracting",
            JobState::Transforming => "transforming",
            JobState::Loading => "loading",
            JobState::Finalizing => "finalizing",
            JobState::Done => "done",
        }
    }
}

fn enter(state: JobState) {
    debug!(state = state.as_str(), "Job state");
}

/// Knobs for one pipeline, usually derived from [`EtlConfig`]
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub chunk_size: usize,
    pub table: String,
    pub sub_batch_size: usize,
    pub concurrency: usize,
    pub encryption: EncryptionMode,
}

impl PipelineOptions {
    pub fn from_config(config: &EtlConfig) -> EtlResult<Self> {
        Ok(Self {
            chunk_size: ChunkSizeEstimator::new(&config.chunking).estimate(),
            table: config.loader.table.clone(),
            sub_batch_size: config.loader.sub_batch_size,
            concurrency: config.loader.concurrency,
            encryption: config.encryption()?,
        })
    }
}

/// Everything a finished job reports back
#[derive(Debug, Clone)]
pub struct JobReport {
    pub artifact_id: String,
    pub outcome: JobOutcome,
    pub summary: JobSummary,
    pub relocation: Relocation,
}

impl JobReport {
    pub fn success(&self) -> bool {
        self.outcome.success()
    }
}

/// Machine-readable form of a [`JobReport`]
#[derive(Debug, Serialize)]
pub struct JobReportView<'a> {
    pub artifact: &'a str,
    #[serde(flatten)]
    pub summary: &'a JobSummary,
    pub destination: &'a str,
    pub relocated: bool,
    pub fatal_error: Option<&'a str>,
}

impl JobReport {
    pub fn view(&self) -> JobReportView<'_> {
        JobReportView {
            artifact: &self.artifact_id,
            summary: &self.summary,
            destination: &self.relocation.destination,
            relocated: self.relocation.relocated(),
            fatal_error: self.outcome.fatal_error.as_deref(),
        }
    }
}

pub struct Pipeline {
    store: Arc<dyn ArtifactStore>,
    sink: Arc<dyn SinkWriter>,
    transformer: Transformer,
    loader: Loader,
    finalizer: ArtifactStateManager,
    chunk_size: usize,
    table: String,
}

impl Pipeline {
    pub fn new(
        store: Arc<dyn ArtifactStore>,
        writer: Arc<dyn SinkWriter>,
        options: PipelineOptions,
    ) -> EtlResult<Self> {
        let registry = SchemaRegistry::builtin();
        let source = registry
            .source(SALES_ENTITY)
            .ok_or_else(|| EtlError::config(format!("no source schema for {SALES_ENTITY}")))?;
        let sink = registry
            .sink(SALES_ENTITY)
            .ok_or_else(|| EtlError::config(format!("no sink schema for {SALES_ENTITY}")))?;

        info!(
            chunk_size = options.chunk_size,
            table = %options.table,
            sub_batch_size = options.sub_batch_size,
            concurrency = options.concurrency,
            encryption = options.encryption.is_enabled(),
            "Pipeline configured"
        );

        Ok(Self {
            finalizer: ArtifactStateManager::new(store.clone()),
            store,
            transformer: Transformer::new(source, sink, ColumnMapper::sales(), options.encryption),
            loader: Loader::new(writer.clone(), options.sub_batch_size, options.concurrency),
            sink: writer,
            chunk_size: options.chunk_size.max(1),
            table: options.table,
        })
    }

    /// Replace the clock that stamps relocated artifacts
    pub fn with_clock(
        mut self,
        clock: impl Fn() -> DateTime<Utc> + Send + Sync + 'static,
    ) -> Self {
        self.finalizer = self.finalizer.with_clock(clock);
        self
    }

    /// Run one job to completion. Always finalizes the artifact.
    pub async fn run(&self, artifact_id: &str) -> JobReport {
        let span = info_span!("job", artifact = artifact_id);
        self.run_job(artifact_id).instrument(span).await
    }

    async fn run_job(&self, artifact_id: &str) -> JobReport {
        let start = Instant::now();
        enter(JobState::Started);
        info!(chunk_size = self.chunk_size, "Job started");

        let mut outcome = JobOutcome::default();
        let result = AssertUnwindSafe(self.process_artifact(artifact_id, &mut outcome))
            .catch_unwind()
            .await;

        match result {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                error!(error = %e, chunks_done = outcome.chunks.len(), "Job aborted");
                outcome.fatal_error = Some(e.to_string());
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                error!(panic = %message, chunks_done = outcome.chunks.len(), "Job panicked");
                outcome.fatal_error = Some(format!("job panicked: {message}"));
            }
        }

        enter(JobState::Finalizing);
        let relocation = self.finalizer.finalize(artifact_id, &outcome).await;

        let summary = outcome.summary();
        info!(
            total_chunks = summary.total_chunks,
            succeeded = summary.succeeded_chunks,
            failed = summary.failed_chunks,
            rows_extracted = summary.rows_extracted,
            rows_loaded = summary.rows_loaded,
            status = summary.status.as_str(),
            destination = %relocation.destination,
            duration_ms = start.elapsed().as_millis() as u64,
            "Job summary"
        );
        enter(JobState::Done);

        JobReport {
            artifact_id: artifact_id.to_string(),
            outcome,
            summary,
            relocation,
        }
    }

    async fn process_artifact(&self, artifact_id: &str, outcome: &mut JobOutcome) -> EtlResult<()> {
        self.sink.prepare().await?;

        enter(JobState::Extracting);
        let stream = self.store.open(artifact_id).await?;
        let mut extractor = StreamingExtractor::new(stream, self.chunk_size);

        while let Some(batch) = extractor.next_batch().await? {
            let span = info_span!("chunk", index = batch.chunk_index);
            let result = self.process_chunk(batch).instrument(span).await;
            outcome.chunks.push(result);
        }

        Ok(())
    }

    async fn process_chunk(&self, batch: RawRowBatch) -> ChunkResult {
        let chunk_index = batch.chunk_index;
        let rows_extracted = batch.len();

        enter(JobState::Transforming);
        let transformed =
            std::panic::catch_unwind(AssertUnwindSafe(|| self.transformer.transform(batch)));

        let batch = match transformed {
            Ok(Ok(TransformOutcome::Rows(batch))) => batch,
            Ok(Ok(TransformOutcome::Empty)) => {
                info!(rows_extracted, "Chunk has no rows to load");
                return ChunkResult::succeeded(chunk_index, rows_extracted, 0);
            }
            Ok(Err(e)) => {
                error!(error = %e, "Chunk transform failed");
                return ChunkResult::failed(chunk_index, rows_extracted, e);
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                error!(panic = %message, "Chunk transform panicked");
                return ChunkResult::failed(
                    chunk_index,
                    rows_extracted,
                    format!("transform panicked: {message}"),
                );
            }
        };

        enter(JobState::Loading);
        let report = self.loader.load(&batch, &self.table).await;
        match report.error() {
            None => ChunkResult::succeeded(chunk_index, rows_extracted, report.rows_written() as usize),
            Some(e) => ChunkResult {
                rows_loaded: report.rows_written() as usize,
                ..ChunkResult::failed(chunk_index, rows_extracted, e)
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_names() {
        assert_eq!(JobState::Finalizing.as_str(), "finalizing");
        assert_eq!(JobState::Done.as_str(), "done");
    }
}
