//! Viewer-side merge of live events and persisted job state.
//!
//! Two independent producers feed one consumer: an optional broadcaster
//! subscription (only when the worker runs in this process) and a timed poll
//! of the stored job. Either one can end the watch.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{interval, Interval, MissedTickBehavior};

use batchflow_core::error::{BatchflowError, Result};
use batchflow_core::traits::BatchStore;
use batchflow_core::types::BatchEvent;

use crate::broadcaster::{BroadcastMessage, Subscription};
use crate::service::BatchProgress;

#[derive(Debug, Clone, PartialEq)]
pub enum WatchUpdate {
    Event(BatchEvent),
    Progress(BatchProgress),
}

pub struct BatchWatcher {
    store: Arc<dyn BatchStore>,
    batch_id: String,
    subscription: Option<Subscription>,
    ticker: Interval,
    last: Option<BatchProgress>,
    done: bool,
}

impl BatchWatcher {
    pub fn new(store: Arc<dyn BatchStore>, batch_id: &str, poll_interval: Duration) -> Self {
        let mut ticker = interval(poll_interval.max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self {
            store,
            batch_id: batch_id.to_string(),
            subscription: None,
            ticker,
            last: None,
            done: false,
        }
    }

    pub fn with_subscription(mut self, subscription: Subscription) -> Self {
        self.subscription = Some(subscription);
        self
    }

    /// Next update, or `None` once the batch has finished.
    ///
    /// Progress is only reported when it changed since the last poll; the
    /// final update is always the terminal progress.
    pub async fn next(&mut self) -> Result<Option<WatchUpdate>> {
        if self.done {
            return Ok(None);
        }

        loop {
            tokio::select! {
                message = recv_live(&mut self.subscription) => match message {
                    Some(BroadcastMessage::Event(event)) => {
                        return Ok(Some(WatchUpdate::Event(event)));
                    }
                    Some(BroadcastMessage::Complete) | None => {
                        self.subscription = None;
                        self.done = true;
                        let progress = self.poll().await?;
                        return Ok(Some(WatchUpdate::Progress(progress)));
                    }
                },
                _ = self.ticker.tick() => {
                    let progress = self.poll().await?;
                    if progress.status.is_terminal() {
                        self.done = true;
                        return Ok(Some(WatchUpdate::Progress(progress)));
                    }
                    if self.last.as_ref() != Some(&progress) {
                        self.last = Some(progress.clone());
                        return Ok(Some(WatchUpdate::Progress(progress)));
                    }
                }
            }
        }
    }

    async fn poll(&self) -> Result<BatchProgress> {
        let job = self
            .store
            .get_batch(&self.batch_id)
            .await?
            .ok_or_else(|| BatchflowError::not_found("batch", &self.batch_id))?;
        Ok(BatchProgress::from(&job))
    }
}

async fn recv_live(subscription: &mut Option<Subscription>) -> Option<BroadcastMessage> {
    match subscription {
        Some(sub) => sub.recv().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadcaster::EventBroadcaster;
    use crate::store::SqliteBatchStore;
    use batchflow_core::types::{BatchDocumentTask, BatchJob, BatchStatus};

    async fn seeded() -> (Arc<SqliteBatchStore>, BatchJob) {
        let store = Arc::new(SqliteBatchStore::in_memory().unwrap());
        let job = BatchJob::new("alice", "flow-1", 1);
        let task = BatchDocumentTask::new(&job.id, "d1", 0);
        store.create_batch(&job, &[task]).await.unwrap();
        (store, job)
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_only_ends_on_terminal_status() {
        let (store, job) = seeded().await;
        let mut watcher = BatchWatcher::new(store.clone(), &job.id, Duration::from_secs(1));

        let first = watcher.next().await.unwrap().unwrap();
        assert!(matches!(first, WatchUpdate::Progress(ref p) if p.status == BatchStatus::Pending));

        store.cancel_batch(&job.id).await.unwrap();
        let last = watcher.next().await.unwrap().unwrap();
        assert!(matches!(last, WatchUpdate::Progress(ref p) if p.status == BatchStatus::Cancelled));
        assert!(watcher.next().await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_live_events_then_sentinel() {
        let (store, job) = seeded().await;
        let hub = EventBroadcaster::new(8);
        let sub = hub.subscribe(&job.id);
        let mut watcher =
            BatchWatcher::new(store, &job.id, Duration::from_secs(3600)).with_subscription(sub);

        // First tick fires immediately; consume it.
        assert!(matches!(
            watcher.next().await.unwrap(),
            Some(WatchUpdate::Progress(_))
        ));

        hub.publish(
            &job.id,
            BatchEvent::lifecycle("document_started", &job.id, Some("d1"), serde_json::json!({})),
        );
        hub.publish_completion(&job.id);

        match watcher.next().await.unwrap() {
            Some(WatchUpdate::Event(event)) => assert_eq!(event.event_type, "document_started"),
            other => panic!("unexpected update: {other:?}"),
        }
        assert!(matches!(
            watcher.next().await.unwrap(),
            Some(WatchUpdate::Progress(_))
        ));
        assert!(watcher.next().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_missing_batch_is_not_found() {
        let store = Arc::new(SqliteBatchStore::in_memory().unwrap());
        let mut watcher = BatchWatcher::new(store, "ghost", Duration::from_millis(10));
        assert!(matches!(
            watcher.next().await,
            Err(BatchflowError::NotFound { .. })
        ));
    }
}
