//! Chunk size estimation
//!
//! Picks how many CSV rows make up one chunk. In local mode the size is fixed
//! by configuration; otherwise it is derived from the memory currently
//! available to the process. Estimation never fails a job: any problem falls
//! back to [`FALLBACK_CHUNK_SIZE`].

use sysinfo::System;
use tracing::{error, info};

use crate::config::{ChunkingConfig, ExecutionMode};

pub const FALLBACK_CHUNK_SIZE: usize = 10_000;
pub const MIN_CHUNK_SIZE: usize = 1_000;

/// Source of the "available memory" figure
pub trait MemoryProbe: Send + Sync {
    fn available_bytes(&self) -> Option<u64>;
}

/// Memory the OS reports as available to new allocations
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemMemory;

impl MemoryProbe for SystemMemory {
    fn available_bytes(&self) -> Option<u64> {
        let mut sys = System::new();
        sys.refresh_memory();
        // sysinfo reports 0 where the figure is unsupported
        Some(sys.available_memory()).filter(|bytes| *bytes > 0)
    }
}

/// Fixed memory figure, for tests and capped containers
#[derive(Debug, Clone, Copy)]
pub struct FixedMemory(pub u64);

impl MemoryProbe for FixedMemory {
    fn available_bytes(&self) -> Option<u64> {
        Some(self.0)
    }
}

pub struct ChunkSizeEstimator<'a, P = SystemMemory> {
    config: &'a ChunkingConfig,
    probe: P,
}

impl<'a> ChunkSizeEstimator<'a, SystemMemory> {
    pub fn new(config: &'a ChunkingConfig) -> Self {
        Self::with_probe(config, SystemMemory)
    }
}

impl<'a, P: MemoryProbe> ChunkSizeEstimator<'a, P> {
    pub fn with_probe(config: &'a ChunkingConfig, probe: P) -> Self {
        Self { config, probe }
    }

    /// Rows per chunk; always positive.
    pub fn estimate(&self) -> usize {
        match self.try_estimate() {
            Ok(size) => size,
            Err(reason) => {
                error!(
                    reason = %reason,
                    fallback = FALLBACK_CHUNK_SIZE,
                    "Error estimating chunk size, using fallback"
                );
                FALLBACK_CHUNK_SIZE
            }
        }
    }

    fn try_estimate(&self) -> Result<usize, String> {
        match self.config.mode {
            ExecutionMode::Local => {
                let size = self
                    .config
                    .local_chunk_size
                    .ok_or("CHUNK_SIZE is not set for local mode")?;
                if size == 0 {
                    return Err("CHUNK_SIZE must be positive".into());
                }
                info!(chunk_size = size, "Chunk size from local configuration");
                Ok(size)
            }
            ExecutionMode::Managed => {
                let fraction = self
                    .config
                    .desired_fraction
                    .ok_or("DESIRED_CHUNK_FRACTION is not set")?;
                let row_size = self
                    .config
                    .avg_row_size_bytes
                    .ok_or("AVG_ROW_SIZE_BYTES is not set")?;
                if !(fraction.is_finite() && fraction > 0.0) {
                    return Err(format!("DESIRED_CHUNK_FRACTION must be positive, got {fraction}"));
                }
                if row_size == 0 {
                    return Err("AVG_ROW_SIZE_BYTES must be positive".into());
                }
                let available = self
                    .probe
                    .available_bytes()
                    .ok_or("available memory could not be determined")?;

                let chunk_mem = (available as f64 * fraction) as u64;
                let size = usize::try_from(chunk_mem / row_size)
                    .map_err(|e| e.to_string())?
                    .max(MIN_CHUNK_SIZE);

                info!(
                    chunk_size = size,
                    chunk_mem_mb = chunk_mem / 1024 / 1024,
                    "Chunk size estimated from available memory"
                );
                Ok(size)
            }
        }
    }
}
