use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;

use crate::capability::CapabilitySpec;
use crate::error::Result;
use crate::types::*;

/// Tool: a named, described unit the controller may invoke.
pub trait Tool: Send + Sync + 'static {
    /// Tool name (used in controller tool calls).
    fn name(&self) -> &str;

    /// Human-readable description.
    fn description(&self) -> &str;

    /// JSON Schema for tool input.
    fn input_schema(&self) -> serde_json::Value;

    /// Execute the tool with given input and context.
    fn execute(
        &self,
        input: serde_json::Value,
        ctx: ToolContext,
    ) -> BoxFuture<'_, Result<ToolResult>>;

    /// Timeout in seconds for this tool.
    fn timeout_secs(&self) -> u64 {
        300
    }
}

/// Specialist: the executable unit bound to one graph node.
pub trait Specialist: Send + Sync + 'static {
    /// Agent id this specialist was resolved for.
    fn agent_id(&self) -> &str;

    fn run(
        &self,
        input: serde_json::Value,
        ctx: ToolContext,
    ) -> BoxFuture<'_, Result<ToolResult>>;
}

/// Builds specialist instances for capability ids.
pub trait SpecialistResolver: Send + Sync + 'static {
    fn resolve(
        &self,
        spec: &CapabilitySpec,
        ctx: &RuntimeContext,
    ) -> Result<Arc<dyn Specialist>>;
}

/// Batch store: durable source of truth for jobs and their tasks.
///
/// Every mutation is conditional on the persisted row's current state so a
/// stale caller can never move a job or task backwards.
pub trait BatchStore: Send + Sync + 'static {
    /// Insert a job and all of its tasks atomically.
    fn create_batch(
        &self,
        job: &BatchJob,
        tasks: &[BatchDocumentTask],
    ) -> BoxFuture<'_, Result<()>>;

    fn get_batch(&self, batch_id: &str) -> BoxFuture<'_, Result<Option<BatchJob>>>;

    fn list_batches(&self, owner: &str) -> BoxFuture<'_, Result<Vec<BatchJob>>>;

    /// Tasks of a batch in position order.
    fn list_tasks(&self, batch_id: &str) -> BoxFuture<'_, Result<Vec<BatchDocumentTask>>>;

    fn get_task(&self, task_id: &str) -> BoxFuture<'_, Result<Option<BatchDocumentTask>>>;

    /// Move a Pending job to Running (stamping `started_at`). A Running job is
    /// returned unchanged so a restarted worker can resume it.
    fn claim_batch(&self, batch_id: &str) -> BoxFuture<'_, Result<Option<BatchJob>>>;

    /// Pending/Running -> Cancelled. Returns false when the job was already terminal.
    fn cancel_batch(&self, batch_id: &str) -> BoxFuture<'_, Result<bool>>;

    /// Stamp the final status and `completed_at` once the worker loop exits.
    fn finish_batch(&self, batch_id: &str, status: BatchStatus) -> BoxFuture<'_, Result<bool>>;

    /// Pending -> Processing. Returns false if the task was not Pending.
    fn start_task(&self, task_id: &str) -> BoxFuture<'_, Result<bool>>;

    /// Processing -> Completed/Failed and bump the matching job counter in
    /// one transaction. Returns false if the task was not Processing.
    fn finish_task(&self, task_id: &str, outcome: TaskOutcome) -> BoxFuture<'_, Result<bool>>;
}

/// Artifact store: owner lookup for generated files.
pub trait ArtifactStore: Send + Sync + 'static {
    fn register_artifact(&self, artifact_ref: &str, owner: &str) -> BoxFuture<'_, Result<()>>;

    fn owner_of(&self, artifact_ref: &str) -> BoxFuture<'_, Result<Option<String>>>;
}

/// Shared, expiring cancellation flags visible across processes.
pub trait CancelFlagStore: Send + Sync + 'static {
    fn set_flag(&self, key: &str, ttl: Duration) -> BoxFuture<'_, Result<()>>;

    /// True if an unexpired flag exists for `key`.
    fn is_flagged(&self, key: &str) -> BoxFuture<'_, Result<bool>>;

    fn clear_flag(&self, key: &str) -> BoxFuture<'_, Result<()>>;

    /// Remove expired flags, returning how many were removed.
    fn purge_expired(&self) -> BoxFuture<'_, Result<usize>>;
}
