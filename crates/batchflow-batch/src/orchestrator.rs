//! The batch worker.
//!
//! One worker drives one job to completion, strictly one document at a time
//! in position order. Every task transition is persisted before the next
//! document starts, so a restarted worker resumes at the first Pending task.
//! A document's failure is recorded on its task and never stops the batch.

use std::sync::Arc;
use std::time::Instant;

use futures::StreamExt;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use batchflow_core::config::BatchConfig;
use batchflow_core::error::{BatchflowError, Result};
use batchflow_core::traits::{ArtifactStore, BatchStore};
use batchflow_core::types::{
    event_types, BatchDocumentTask, BatchEvent, BatchJob, BatchStatus, DocumentRef, RunEvent,
    RunEventKind, RuntimeContext, SessionId, TaskOutcome, TaskStatus,
};
use batchflow_flow::{FlowDefinition, FlowSource, FlowSupervisorBuilder, RunStreamFactory};

use crate::broadcaster::EventBroadcaster;
use crate::cancel::CancellationSignal;
use crate::ownership::FileOwnershipGuard;

const INTERRUPTED_ERROR: &str = "interrupted before completion";

/// Shortens error text for persistence, marking the cut.
pub fn truncate_error(error: &str, max_chars: usize) -> String {
    if error.chars().count() <= max_chars {
        return error.to_string();
    }
    let mut truncated: String = error.chars().take(max_chars).collect();
    truncated.push_str("...");
    truncated
}

pub struct BatchOrchestrator {
    store: Arc<dyn BatchStore>,
    flows: Arc<dyn FlowSource>,
    builder: Arc<FlowSupervisorBuilder>,
    streams: Arc<dyn RunStreamFactory>,
    broadcaster: Arc<EventBroadcaster>,
    cancel: Arc<CancellationSignal>,
    ownership: FileOwnershipGuard,
    policy_filters: Vec<String>,
    max_error_chars: usize,
}

impl BatchOrchestrator {
    pub fn new(
        store: Arc<dyn BatchStore>,
        flows: Arc<dyn FlowSource>,
        builder: Arc<FlowSupervisorBuilder>,
        streams: Arc<dyn RunStreamFactory>,
        broadcaster: Arc<EventBroadcaster>,
        cancel: Arc<CancellationSignal>,
        artifacts: Arc<dyn ArtifactStore>,
    ) -> Self {
        Self {
            store,
            flows,
            builder,
            streams,
            broadcaster,
            cancel,
            ownership: FileOwnershipGuard::new(artifacts),
            policy_filters: vec![],
            max_error_chars: 500,
        }
    }

    pub fn with_policy_filters(mut self, filters: Vec<String>) -> Self {
        self.policy_filters = filters;
        self
    }

    pub fn with_max_error_chars(mut self, max_error_chars: usize) -> Self {
        self.max_error_chars = max_error_chars;
        self
    }

    /// Apply the `[batch]` section of the config.
    pub fn with_config(self, config: &BatchConfig) -> Self {
        self.with_policy_filters(config.policy_filters.clone())
            .with_max_error_chars(config.max_error_chars)
    }

    /// Run `start` on a background task.
    ///
    /// A job-level error is logged and the job is marked Cancelled with its
    /// completion time stamped; the worker itself never panics out.
    pub fn spawn(self: &Arc<Self>, batch_id: &str) -> JoinHandle<()> {
        let this = Arc::clone(self);
        let batch_id = batch_id.to_string();
        tokio::spawn(async move {
            if let Err(e) = this.start(&batch_id).await {
                error!(batch_id = %batch_id, error = %e, "Batch job aborted");
                this.abort(&batch_id, &e).await;
            }
        })
    }

    /// Claim the job and process its Pending documents in order.
    ///
    /// Returns the job as persisted after the loop exits. A job that is
    /// already terminal is returned unchanged after releasing its viewers.
    pub async fn start(&self, batch_id: &str) -> Result<BatchJob> {
        let job = self
            .store
            .get_batch(batch_id)
            .await?
            .ok_or_else(|| BatchflowError::FatalJob(format!("batch {} not found", batch_id)))?;
        if job.status.is_terminal() {
            debug!(batch_id, status = %job.status, "Batch already finished");
            // Cancelled before any worker claimed it: close out late viewers
            // and the flags the cancel left behind.
            self.broadcaster.publish_completion(batch_id);
            self.cancel.clear(batch_id).await;
            return Ok(job);
        }

        let flow = self
            .flows
            .get_flow(&job.flow_id)
            .await?
            .ok_or_else(|| BatchflowError::FatalJob(format!("flow {} not found", job.flow_id)))?;
        if job.owner.is_empty() || flow.owner != job.owner {
            return Err(BatchflowError::FatalJob(format!(
                "flow {} does not belong to the batch owner",
                flow.id
            )));
        }

        let Some(job) = self.store.claim_batch(batch_id).await? else {
            // Cancelled between the read and the claim.
            return self.finish(batch_id, true).await;
        };

        info!(
            batch_id,
            flow_id = %job.flow_id,
            total = job.total_documents,
            "Batch started"
        );
        self.publish_lifecycle(
            event_types::BATCH_STARTED,
            batch_id,
            None,
            serde_json::json!({
                "flow_id": job.flow_id,
                "total_documents": job.total_documents,
            }),
        );

        let tasks = self.store.list_tasks(batch_id).await?;
        self.recover_interrupted(&tasks).await?;

        let mut cancelled = false;
        for task in tasks.iter().filter(|t| t.status == TaskStatus::Pending) {
            if self.is_cancelled(batch_id).await? {
                cancelled = true;
                break;
            }
            self.process_task(&job, &flow, task).await?;
        }

        self.finish(batch_id, cancelled).await
    }

    /// Mark tasks left in Processing by a crashed worker as Failed.
    async fn recover_interrupted(&self, tasks: &[BatchDocumentTask]) -> Result<()> {
        for task in tasks.iter().filter(|t| t.status == TaskStatus::Processing) {
            warn!(
                batch_id = %task.batch_id,
                task_id = %task.id,
                document_id = %task.document_id,
                "Recovering interrupted document"
            );
            self.store
                .finish_task(
                    &task.id,
                    TaskOutcome::Failed {
                        error: INTERRUPTED_ERROR.to_string(),
                        duration_ms: 0,
                    },
                )
                .await?;
        }
        Ok(())
    }

    /// Re-read persisted status, then the cancellation tiers.
    async fn is_cancelled(&self, batch_id: &str) -> Result<bool> {
        let status = self
            .store
            .get_batch(batch_id)
            .await?
            .map(|job| job.status)
            .ok_or_else(|| BatchflowError::FatalJob(format!("batch {} disappeared", batch_id)))?;
        if status == BatchStatus::Cancelled {
            return Ok(true);
        }
        if self.cancel.check_cancel(batch_id).await {
            self.store.cancel_batch(batch_id).await?;
            return Ok(true);
        }
        Ok(false)
    }

    async fn process_task(
        &self,
        job: &BatchJob,
        flow: &FlowDefinition,
        task: &BatchDocumentTask,
    ) -> Result<()> {
        if !self.store.start_task(&task.id).await? {
            debug!(task_id = %task.id, "Task no longer pending, skipping");
            return Ok(());
        }
        self.publish_lifecycle(
            event_types::DOCUMENT_STARTED,
            &job.id,
            Some(&task.document_id),
            serde_json::json!({ "position": task.position }),
        );

        let started = Instant::now();
        let result = self.run_document(job, flow, task).await;
        let duration_ms = started.elapsed().as_millis() as u64;

        let outcome = match result {
            Ok(result_ref) => TaskOutcome::Completed {
                result_ref,
                duration_ms,
            },
            Err(e) => {
                let error = truncate_error(&e.to_string(), self.max_error_chars);
                warn!(
                    batch_id = %job.id,
                    document_id = %task.document_id,
                    error = %error,
                    "Document failed"
                );
                TaskOutcome::Failed { error, duration_ms }
            }
        };

        // The staged artifact is only persisted here; re-read so a task
        // moved on by someone else is left alone.
        let current = self.store.get_task(&task.id).await?;
        if current.map(|t| t.status) != Some(TaskStatus::Processing) {
            warn!(task_id = %task.id, "Task changed while processing, outcome discarded");
            return Ok(());
        }
        self.store.finish_task(&task.id, outcome.clone()).await?;

        let (event_type, payload) = match &outcome {
            TaskOutcome::Completed {
                result_ref,
                duration_ms,
            } => (
                event_types::DOCUMENT_COMPLETED,
                serde_json::json!({
                    "position": task.position,
                    "result_ref": result_ref,
                    "duration_ms": duration_ms,
                }),
            ),
            TaskOutcome::Failed { error, duration_ms } => (
                event_types::DOCUMENT_FAILED,
                serde_json::json!({
                    "position": task.position,
                    "error": error,
                    "duration_ms": duration_ms,
                }),
            ),
        };
        self.publish_lifecycle(event_type, &job.id, Some(&task.document_id), payload);
        Ok(())
    }

    /// Drive one flow execution and return the accepted artifact reference.
    async fn run_document(
        &self,
        job: &BatchJob,
        flow: &FlowDefinition,
        task: &BatchDocumentTask,
    ) -> Result<String> {
        let ctx = RuntimeContext::for_document(DocumentRef::new(&task.document_id))
            .with_policy_filters(self.policy_filters.clone());
        let supervisor = Arc::new(self.builder.build(flow, &ctx)?);
        let max_steps = supervisor.max_steps;
        let session_id = SessionId::new();

        let mut stream = self
            .streams
            .open(supervisor, &task.document_id, &session_id)
            .await?;

        let mut steps = 0usize;
        while let Some(item) = stream.next().await {
            let event = item?;

            match &event.kind {
                RunEventKind::FileReady { artifact_ref, .. } => {
                    if let Err(e) = self.ownership.ensure_owner(artifact_ref, &job.owner).await {
                        warn!(
                            batch_id = %job.id,
                            document_id = %task.document_id,
                            error = %e,
                            "Discarding artifact"
                        );
                        continue;
                    }
                    self.forward(job, task, &session_id, &event);
                    return Ok(artifact_ref.clone());
                }
                RunEventKind::RunError { error } => {
                    self.forward(job, task, &session_id, &event);
                    return Err(BatchflowError::TransientRun(error.clone()));
                }
                RunEventKind::ToolStart { .. } => {
                    steps += 1;
                    self.forward(job, task, &session_id, &event);
                    if steps > max_steps {
                        return Err(BatchflowError::TransientRun(format!(
                            "flow exceeded {} steps",
                            max_steps
                        )));
                    }
                }
                _ if event.is_terminal_output() => {
                    self.forward(job, task, &session_id, &event);
                    return Err(BatchflowError::TransientRun(
                        "flow finished with a chat response instead of a file".to_string(),
                    ));
                }
                _ => self.forward(job, task, &session_id, &event),
            }
        }

        Err(BatchflowError::TransientRun(
            "flow finished without producing a file".to_string(),
        ))
    }

    fn forward(
        &self,
        job: &BatchJob,
        task: &BatchDocumentTask,
        session_id: &SessionId,
        event: &RunEvent,
    ) {
        self.broadcaster.publish(
            &job.id,
            BatchEvent::from_run_event(&job.id, &task.document_id, session_id, event),
        );
    }

    /// Stamp the final status, notify viewers and reset the cancel tiers.
    async fn finish(&self, batch_id: &str, cancelled: bool) -> Result<BatchJob> {
        let status = if cancelled {
            BatchStatus::Cancelled
        } else {
            BatchStatus::Completed
        };
        self.store.finish_batch(batch_id, status).await?;

        let job = self
            .store
            .get_batch(batch_id)
            .await?
            .ok_or_else(|| BatchflowError::FatalJob(format!("batch {} disappeared", batch_id)))?;

        let event_type = match job.status {
            BatchStatus::Cancelled => event_types::BATCH_CANCELLED,
            _ => event_types::BATCH_COMPLETED,
        };
        self.publish_lifecycle(
            event_type,
            batch_id,
            None,
            serde_json::json!({
                "status": job.status,
                "completed_documents": job.completed_documents,
                "failed_documents": job.failed_documents,
                "total_documents": job.total_documents,
            }),
        );
        self.broadcaster.publish_completion(batch_id);
        self.cancel.clear(batch_id).await;

        info!(
            batch_id,
            status = %job.status,
            completed = job.completed_documents,
            failed = job.failed_documents,
            "Batch finished"
        );
        Ok(job)
    }

    async fn abort(&self, batch_id: &str, cause: &BatchflowError) {
        let stamped = async {
            self.store.cancel_batch(batch_id).await?;
            self.store.finish_batch(batch_id, BatchStatus::Cancelled).await
        };
        if let Err(e) = stamped.await {
            error!(batch_id, error = %e, "Failed to mark aborted batch");
        }

        self.publish_lifecycle(
            event_types::BATCH_CANCELLED,
            batch_id,
            None,
            serde_json::json!({
                "status": BatchStatus::Cancelled,
                "error": truncate_error(&cause.to_string(), self.max_error_chars),
            }),
        );
        self.broadcaster.publish_completion(batch_id);
        self.cancel.clear(batch_id).await;
    }

    fn publish_lifecycle(
        &self,
        event_type: &str,
        batch_id: &str,
        document_id: Option<&str>,
        payload: serde_json::Value,
    ) {
        self.broadcaster.publish(
            batch_id,
            BatchEvent::lifecycle(event_type, batch_id, document_id, payload),
        );
    }
}
