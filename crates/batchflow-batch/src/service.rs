use std::collections::HashSet;
use std::sync::Arc;

use serde::Serialize;
use tracing::info;

use batchflow_core::capability::CapabilityRegistry;
use batchflow_core::error::{BatchflowError, Result};
use batchflow_core::traits::BatchStore;
use batchflow_core::types::{event_types, BatchDocumentTask, BatchEvent, BatchJob, BatchStatus};
use batchflow_flow::{validate_for_batch, FlowDefinition};

use crate::broadcaster::EventBroadcaster;
use crate::cancel::CancellationSignal;

/// Counter summary of a batch job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchProgress {
    pub batch_id: String,
    pub status: BatchStatus,
    pub total: u32,
    pub completed: u32,
    pub failed: u32,
    pub pending: u32,
    pub percent: u8,
}

impl From<&BatchJob> for BatchProgress {
    fn from(job: &BatchJob) -> Self {
        Self {
            batch_id: job.id.clone(),
            status: job.status,
            total: job.total_documents,
            completed: job.completed_documents,
            failed: job.failed_documents,
            pending: job.remaining_documents(),
            percent: job.progress_pct(),
        }
    }
}

/// Creation, cancellation and status queries for batch jobs.
pub struct BatchService {
    store: Arc<dyn BatchStore>,
    registry: Arc<CapabilityRegistry>,
    cancel: Arc<CancellationSignal>,
    broadcaster: Option<Arc<EventBroadcaster>>,
}

impl BatchService {
    pub fn new(
        store: Arc<dyn BatchStore>,
        registry: Arc<CapabilityRegistry>,
        cancel: Arc<CancellationSignal>,
    ) -> Self {
        Self {
            store,
            registry,
            cancel,
            broadcaster: None,
        }
    }

    /// Notify in-process viewers when a job is cancelled before it starts.
    pub fn with_broadcaster(mut self, broadcaster: Arc<EventBroadcaster>) -> Self {
        self.broadcaster = Some(broadcaster);
        self
    }

    /// Validate `flow` and create a Pending job with one task per document.
    ///
    /// Duplicate document ids are dropped, keeping first occurrence order.
    /// Nothing is persisted unless validation passes.
    pub async fn create_batch(
        &self,
        owner: &str,
        flow: &FlowDefinition,
        documents: &[String],
    ) -> Result<BatchJob> {
        if flow.owner != owner {
            return Err(BatchflowError::not_found("flow", &flow.id));
        }
        validate_for_batch(flow, &self.registry).into_result()?;

        let mut seen = HashSet::new();
        let documents: Vec<&String> = documents.iter().filter(|d| seen.insert(*d)).collect();
        if documents.is_empty() {
            return Err(BatchflowError::Validation(vec![
                "A batch needs at least one document".to_string(),
            ]));
        }

        let job = BatchJob::new(owner, &flow.id, documents.len() as u32);
        let tasks: Vec<BatchDocumentTask> = documents
            .iter()
            .enumerate()
            .map(|(i, doc)| BatchDocumentTask::new(&job.id, doc.as_str(), i as u32))
            .collect();

        self.store.create_batch(&job, &tasks).await?;
        info!(batch_id = %job.id, flow_id = %flow.id, documents = tasks.len(), "Batch created");
        Ok(job)
    }

    pub async fn get_batch(&self, batch_id: &str) -> Result<BatchJob> {
        self.store
            .get_batch(batch_id)
            .await?
            .ok_or_else(|| BatchflowError::not_found("batch", batch_id))
    }

    /// Like [`get_batch`](Self::get_batch), but another owner's job is NotFound.
    pub async fn get_batch_for_owner(&self, batch_id: &str, owner: &str) -> Result<BatchJob> {
        let job = self.get_batch(batch_id).await?;
        if job.owner != owner {
            return Err(BatchflowError::not_found("batch", batch_id));
        }
        Ok(job)
    }

    pub async fn list_batches(&self, owner: &str) -> Result<Vec<BatchJob>> {
        self.store.list_batches(owner).await
    }

    pub async fn list_tasks(&self, batch_id: &str) -> Result<Vec<BatchDocumentTask>> {
        self.get_batch(batch_id).await?;
        self.store.list_tasks(batch_id).await
    }

    pub async fn progress(&self, batch_id: &str) -> Result<BatchProgress> {
        Ok(BatchProgress::from(&self.get_batch(batch_id).await?))
    }

    /// Cancel a Pending or Running job and raise both cancellation tiers.
    ///
    /// Returns false (and changes nothing) if the job had already finished.
    pub async fn cancel(&self, batch_id: &str) -> Result<bool> {
        let before = self.get_batch(batch_id).await?;
        if !self.store.cancel_batch(batch_id).await? {
            return Ok(false);
        }
        self.cancel.cancel(batch_id).await?;
        info!(batch_id, "Batch cancelled");

        // A running worker announces its own end; a pending job has no worker yet.
        if before.status == BatchStatus::Pending {
            if let Some(broadcaster) = &self.broadcaster {
                broadcaster.publish(
                    batch_id,
                    BatchEvent::lifecycle(
                        event_types::BATCH_CANCELLED,
                        batch_id,
                        None,
                        serde_json::json!({
                            "status": BatchStatus::Cancelled,
                            "completed_documents": 0,
                            "failed_documents": 0,
                            "total_documents": before.total_documents,
                        }),
                    ),
                );
                broadcaster.publish_completion(batch_id);
            }
        }
        Ok(true)
    }
}
