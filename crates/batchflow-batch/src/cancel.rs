//! Two-tier cooperative cancellation.
//!
//! The local tier is a `CancellationToken` per id, visible only inside this
//! process. The shared tier is an expiring flag in a [`CancelFlagStore`], so a
//! viewer in another process can stop a worker. Workers check between
//! documents; an in-flight run is never interrupted.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use batchflow_core::error::Result;
use batchflow_core::traits::CancelFlagStore;

pub struct CancellationSignal {
    local: Mutex<HashMap<String, CancellationToken>>,
    shared: Option<Arc<dyn CancelFlagStore>>,
    ttl: Duration,
}

impl CancellationSignal {
    pub fn new(shared: Arc<dyn CancelFlagStore>, ttl: Duration) -> Self {
        Self {
            local: Mutex::new(HashMap::new()),
            shared: Some(shared),
            ttl,
        }
    }

    /// In-process only; nothing is visible to other processes.
    pub fn local_only() -> Self {
        Self {
            local: Mutex::new(HashMap::new()),
            shared: None,
            ttl: Duration::ZERO,
        }
    }

    fn tokens(&self) -> MutexGuard<'_, HashMap<String, CancellationToken>> {
        self.local.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn flag_key(id: &str) -> String {
        format!("cancel:{}", id)
    }

    /// The local token for `id`, created on first use.
    pub fn token(&self, id: &str) -> CancellationToken {
        self.tokens().entry(id.to_string()).or_default().clone()
    }

    /// Raise both tiers for `id`.
    pub async fn cancel(&self, id: &str) -> Result<()> {
        self.token(id).cancel();
        if let Some(shared) = &self.shared {
            shared.set_flag(&Self::flag_key(id), self.ttl).await?;
        }
        debug!(id, "Cancellation requested");
        Ok(())
    }

    pub fn is_cancelled_locally(&self, id: &str) -> bool {
        self.tokens().get(id).is_some_and(|t| t.is_cancelled())
    }

    /// True if either tier has been raised for `id`.
    ///
    /// A failed shared lookup counts as not cancelled; the check runs again
    /// before the next document.
    pub async fn check_cancel(&self, id: &str) -> bool {
        if self.is_cancelled_locally(id) {
            return true;
        }
        let Some(shared) = &self.shared else {
            return false;
        };
        match shared.is_flagged(&Self::flag_key(id)).await {
            Ok(flagged) => flagged,
            Err(e) => {
                warn!(id, error = %e, "Shared cancel flag lookup failed");
                false
            }
        }
    }

    /// Reset both tiers once the job they guarded has exited.
    pub async fn clear(&self, id: &str) {
        self.tokens().remove(id);
        if let Some(shared) = &self.shared {
            if let Err(e) = shared.clear_flag(&Self::flag_key(id)).await {
                warn!(id, error = %e, "Failed to clear shared cancel flag");
            }
        }
    }
}

impl Default for CancellationSignal {
    fn default() -> Self {
        Self::local_only()
    }
}
