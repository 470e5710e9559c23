use std::sync::Arc;

use tracing::{debug, warn};

use batchflow_core::error::{BatchflowError, Result};
use batchflow_core::traits::ArtifactStore;

/// Checks that a produced artifact belongs to the owner of the job that
/// received it, so a file-ready event routed to the wrong batch is ignored.
///
/// Fail-closed: an unknown artifact or a failed lookup is treated as a
/// mismatch.
pub struct FileOwnershipGuard {
    artifacts: Arc<dyn ArtifactStore>,
}

impl FileOwnershipGuard {
    pub fn new(artifacts: Arc<dyn ArtifactStore>) -> Self {
        Self { artifacts }
    }

    pub async fn validate_ownership(&self, artifact_ref: &str, expected_owner: &str) -> bool {
        match self.ensure_owner(artifact_ref, expected_owner).await {
            Ok(()) => true,
            Err(e) => {
                warn!(artifact_ref, expected_owner, error = %e, "Artifact ownership rejected");
                false
            }
        }
    }

    /// Like [`validate_ownership`](Self::validate_ownership), but says why.
    pub async fn ensure_owner(&self, artifact_ref: &str, expected_owner: &str) -> Result<()> {
        let mismatch = || BatchflowError::OwnershipMismatch {
            artifact: artifact_ref.to_string(),
            owner: expected_owner.to_string(),
        };
        match self.artifacts.owner_of(artifact_ref).await {
            Ok(Some(owner)) if owner == expected_owner => Ok(()),
            Ok(Some(owner)) => {
                debug!(artifact_ref, owner = %owner, "Artifact owned by another user");
                Err(mismatch())
            }
            Ok(None) => {
                debug!(artifact_ref, "Artifact has no recorded owner");
                Err(mismatch())
            }
            Err(e) => {
                debug!(artifact_ref, error = %e, "Artifact owner lookup failed");
                Err(mismatch())
            }
        }
    }
}
