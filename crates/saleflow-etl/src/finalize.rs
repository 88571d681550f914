//! Artifact relocation once a job is done
//!
//! Pending artifacts are any key outside `processed/`. A finished job moves
//! its artifact under `processed/success/` or `processed/fail/`, renamed to
//! `{base}_{YYYYmmddHHMMSS}{ext}`. The move is a copy followed by a delete;
//! a crash between the two leaves the artifact in both places.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::error::{EtlError, EtlResult};
use crate::models::JobOutcome;
use crate::storage::ArtifactStore;

pub const PROCESSED_PREFIX: &str = "processed/";
pub const SUCCESS_PREFIX: &str = "processed/success/";
pub const FAIL_PREFIX: &str = "processed/fail/";
pub const COMPLETION_TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S";

/// Rejects artifact ids that are empty or already processed
pub fn validate_artifact_id(artifact_id: &str) -> EtlResult<()> {
    let trimmed = artifact_id.trim();
    if trimmed.is_empty() || trimmed.ends_with('/') {
        return Err(EtlError::config(format!(
            "artifact id {artifact_id:?} does not name an object"
        )));
    }
    if trimmed.starts_with(PROCESSED_PREFIX) {
        return Err(EtlError::config(format!(
            "artifact {artifact_id:?} is already under {PROCESSED_PREFIX}"
        )));
    }
    Ok(())
}

/// Destination key for `artifact_id` given the job result
pub fn destination_key(artifact_id: &str, success: bool, completed_at: DateTime<Utc>) -> String {
    let prefix = if success { SUCCESS_PREFIX } else { FAIL_PREFIX };
    let file_name = artifact_id.rsplit('/').next().unwrap_or(artifact_id);

    // A leading dot is part of the name, not an extension
    let (base, extension) = match file_name.rfind('.') {
        Some(dot) if dot > 0 => file_name.split_at(dot),
        _ => (file_name, ""),
    };

    format!(
        "{prefix}{base}_{}{extension}",
        completed_at.format(COMPLETION_TIMESTAMP_FORMAT)
    )
}

/// Where finalization tried to put the artifact and whether it got there
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relocation {
    pub destination: String,
    pub error: Option<String>,
}

impl Relocation {
    pub fn relocated(&self) -> bool {
        self.error.is_none()
    }
}

type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

pub struct ArtifactStateManager {
    store: Arc<dyn ArtifactStore>,
    clock: Clock,
}

impl ArtifactStateManager {
    pub fn new(store: Arc<dyn ArtifactStore>) -> Self {
        Self {
            store,
            clock: Arc::new(Utc::now),
        }
    }

    /// Replace the completion time source
    pub fn with_clock(mut self, clock: impl Fn() -> DateTime<Utc> + Send + Sync + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Move the artifact to its success or fail location.
    ///
    /// Never fails: relocation errors are logged and reported back in the
    /// returned [`Relocation`], and the job outcome stays as it was.
    pub async fn finalize(&self, artifact_id: &str, outcome: &JobOutcome) -> Relocation {
        let success = outcome.success();
        let destination = destination_key(artifact_id, success, (self.clock)());

        if let Err(e) = self.store.copy(artifact_id, &destination).await {
            error!(
                artifact = artifact_id,
                destination = %destination,
                error = %e,
                "Failed to copy artifact, leaving it in place"
            );
            return Relocation {
                destination,
                error: Some(e.to_string()),
            };
        }

        if let Err(e) = self.store.delete(artifact_id).await {
            warn!(
                artifact = artifact_id,
                destination = %destination,
                error = %e,
                "Artifact copied but source not deleted; it now exists in both locations"
            );
            return Relocation {
                destination,
                error: Some(e.to_string()),
            };
        }

        info!(
            artifact = artifact_id,
            destination = %destination,
            success,
            "Artifact relocated"
        );

        Relocation {
            destination,
            error: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ChunkResult;
    use crate::storage::MemoryStore;
    use chrono::TimeZone;

    fn noon() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_destination_key() {
        assert_eq!(
            destination_key("sales.csv", false, noon()),
            "processed/fail/sales_20250101120000.csv"
        );
        assert_eq!(
            destination_key("incoming/2025/sales.tar.gz", true, noon()),
            "processed/success/sales.tar_20250101120000.gz"
        );
        assert_eq!(
            destination_key("sales", true, noon()),
            "processed/success/sales_20250101120000"
        );
        assert_eq!(
            destination_key(".hidden", true, noon()),
            "processed/success/.hidden_20250101120000"
        );
    }

    #[test]
    fn test_validate_artifact_id() {
        assert!(validate_artifact_id("sales.csv").is_ok());
        assert!(validate_artifact_id("incoming/sales.csv").is_ok());
        assert!(validate_artifact_id("processed/fail/sales_20250101120000.csv").is_err());
        assert!(validate_artifact_id("  ").is_err());
        assert!(validate_artifact_id("incoming/").is_err());
    }

    #[tokio::test]
    async fn test_finalize_moves_by_outcome() {
        let store = MemoryStore::new();
        store.put("sales.csv", "a\n");
        let manager = ArtifactStateManager::new(Arc::new(store.clone())).with_clock(noon);

        let outcome = JobOutcome {
            chunks: vec![ChunkResult::succeeded(1, 1, 1)],
            fatal_error: None,
        };
        let relocation = manager.finalize("sales.csv", &outcome).await;

        assert!(relocation.relocated());
        assert_eq!(store.keys(), vec!["processed/success/sales_20250101120000.csv"]);
    }

    #[tokio::test]
    async fn test_copy_failure_leaves_artifact() {
        let store = MemoryStore::new();
        store.put("sales.csv", "a\n");
        store.fail_copies(true);
        let manager = ArtifactStateManager::new(Arc::new(store.clone())).with_clock(noon);

        let outcome = JobOutcome {
            chunks: vec![ChunkResult::failed(1, 1, "boom")],
            fatal_error: None,
        };
        let relocation = manager.finalize("sales.csv", &outcome).await;

        assert!(!relocation.relocated());
        assert_eq!(relocation.destination, "processed/fail/sales_20250101120000.csv");
        assert_eq!(store.keys(), vec!["sales.csv"]);
        assert!(!outcome.success());
    }
}
