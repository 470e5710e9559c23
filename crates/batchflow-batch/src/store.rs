use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::debug;

use batchflow_core::error::{BatchflowError, Result};
use batchflow_core::traits::{ArtifactStore, BatchStore, CancelFlagStore};
use batchflow_core::types::{BatchDocumentTask, BatchJob, BatchStatus, TaskOutcome, TaskStatus};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS batches (
    id TEXT PRIMARY KEY,
    owner TEXT NOT NULL,
    flow_id TEXT NOT NULL,
    status TEXT NOT NULL,
    total INTEGER NOT NULL,
    completed INTEGER NOT NULL DEFAULT 0,
    failed INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    started_at TEXT,
    completed_at TEXT
);

CREATE INDEX IF NOT EXISTS idx_batches_owner ON batches(owner, created_at);

CREATE TABLE IF NOT EXISTS batch_documents (
    id TEXT PRIMARY KEY,
    batch_id TEXT NOT NULL REFERENCES batches(id),
    document_id TEXT NOT NULL,
    position INTEGER NOT NULL,
    status TEXT NOT NULL,
    result_ref TEXT,
    error TEXT,
    duration_ms INTEGER,
    processed_at TEXT,
    UNIQUE(batch_id, document_id)
);

CREATE INDEX IF NOT EXISTS idx_batch_documents_position
    ON batch_documents(batch_id, position);

CREATE TABLE IF NOT EXISTS artifacts (
    artifact_ref TEXT PRIMARY KEY,
    owner TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS cancel_flags (
    key TEXT PRIMARY KEY,
    expires_at INTEGER NOT NULL
);";

const JOB_COLUMNS: &str =
    "id, owner, flow_id, status, total, completed, failed, created_at, started_at, completed_at";

const TASK_COLUMNS: &str =
    "id, batch_id, document_id, position, status, result_ref, error, duration_ms, processed_at";

/// SQLite-backed store for batch jobs, artifact owners and cancel flags.
///
/// Workers and viewers in different processes share one database file; the
/// rows are the source of truth for every status check.
pub struct SqliteBatchStore {
    conn: Mutex<Connection>,
}

impl SqliteBatchStore {
    /// Open or create a SQLite database at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                BatchflowError::Database(format!("Failed to create db directory: {}", e))
            })?;
        }

        let conn = Connection::open(path).map_err(db_err)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .map_err(db_err)?;
        conn.execute_batch(SCHEMA).map_err(db_err)?;

        debug!(path = %path.display(), "Batch store opened");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory database (for testing).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(db_err)?;
        conn.execute_batch(SCHEMA).map_err(db_err)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|e| BatchflowError::Database(e.to_string()))
    }
}

fn db_err(e: rusqlite::Error) -> BatchflowError {
    BatchflowError::Database(e.to_string())
}

fn conversion_err(column: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        column,
        rusqlite::types::Type::Text,
        message.into(),
    )
}

fn parse_ts(value: Option<String>) -> Option<DateTime<Utc>> {
    value
        .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

fn job_from_row(row: &Row<'_>) -> rusqlite::Result<BatchJob> {
    let status: String = row.get(3)?;
    let status = BatchStatus::parse(&status)
        .ok_or_else(|| conversion_err(3, format!("unknown batch status '{}'", status)))?;
    Ok(BatchJob {
        id: row.get(0)?,
        owner: row.get(1)?,
        flow_id: row.get(2)?,
        status,
        total_documents: row.get(4)?,
        completed_documents: row.get(5)?,
        failed_documents: row.get(6)?,
        created_at: parse_ts(row.get(7)?).unwrap_or_else(Utc::now),
        started_at: parse_ts(row.get(8)?),
        completed_at: parse_ts(row.get(9)?),
    })
}

fn task_from_row(row: &Row<'_>) -> rusqlite::Result<BatchDocumentTask> {
    let status: String = row.get(4)?;
    let status = TaskStatus::parse(&status)
        .ok_or_else(|| conversion_err(4, format!("unknown task status '{}'", status)))?;
    Ok(BatchDocumentTask {
        id: row.get(0)?,
        batch_id: row.get(1)?,
        document_id: row.get(2)?,
        position: row.get(3)?,
        status,
        result_ref: row.get(5)?,
        error: row.get(6)?,
        duration_ms: row.get::<_, Option<i64>>(7)?.map(|d| d.max(0) as u64),
        processed_at: parse_ts(row.get(8)?),
    })
}

fn read_job(conn: &Connection, batch_id: &str) -> Result<Option<BatchJob>> {
    conn.query_row(
        &format!("SELECT {} FROM batches WHERE id = ?1", JOB_COLUMNS),
        params![batch_id],
        job_from_row,
    )
    .optional()
    .map_err(db_err)
}

impl BatchStore for SqliteBatchStore {
    fn create_batch(
        &self,
        job: &BatchJob,
        tasks: &[BatchDocumentTask],
    ) -> BoxFuture<'_, Result<()>> {
        let job = job.clone();
        let tasks = tasks.to_vec();

        Box::pin(async move {
            let mut conn = self.lock()?;
            let tx = conn.transaction().map_err(db_err)?;

            tx.execute(
                "INSERT INTO batches (id, owner, flow_id, status, total, completed, failed, created_at, started_at, completed_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    job.id,
                    job.owner,
                    job.flow_id,
                    job.status.as_str(),
                    job.total_documents,
                    job.completed_documents,
                    job.failed_documents,
                    job.created_at.to_rfc3339(),
                    job.started_at.map(|t| t.to_rfc3339()),
                    job.completed_at.map(|t| t.to_rfc3339()),
                ],
            )
            .map_err(db_err)?;

            for task in &tasks {
                tx.execute(
                    "INSERT INTO batch_documents (id, batch_id, document_id, position, status)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![
                        task.id,
                        task.batch_id,
                        task.document_id,
                        task.position,
                        task.status.as_str(),
                    ],
                )
                .map_err(db_err)?;
            }

            tx.commit().map_err(db_err)?;
            debug!(batch_id = %job.id, tasks = tasks.len(), "Batch created");
            Ok(())
        })
    }

    fn get_batch(&self, batch_id: &str) -> BoxFuture<'_, Result<Option<BatchJob>>> {
        let batch_id = batch_id.to_string();
        Box::pin(async move {
            let conn = self.lock()?;
            read_job(&conn, &batch_id)
        })
    }

    fn list_batches(&self, owner: &str) -> BoxFuture<'_, Result<Vec<BatchJob>>> {
        let owner = owner.to_string();
        Box::pin(async move {
            let conn = self.lock()?;
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT {} FROM batches WHERE owner = ?1 ORDER BY created_at DESC",
                    JOB_COLUMNS
                ))
                .map_err(db_err)?;
            let rows = stmt.query_map(params![owner], job_from_row).map_err(db_err)?;
            rows.collect::<rusqlite::Result<Vec<_>>>().map_err(db_err)
        })
    }

    fn list_tasks(&self, batch_id: &str) -> BoxFuture<'_, Result<Vec<BatchDocumentTask>>> {
        let batch_id = batch_id.to_string();
        Box::pin(async move {
            let conn = self.lock()?;
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT {} FROM batch_documents WHERE batch_id = ?1 ORDER BY position ASC",
                    TASK_COLUMNS
                ))
                .map_err(db_err)?;
            let rows = stmt
                .query_map(params![batch_id], task_from_row)
                .map_err(db_err)?;
            rows.collect::<rusqlite::Result<Vec<_>>>().map_err(db_err)
        })
    }

    fn get_task(&self, task_id: &str) -> BoxFuture<'_, Result<Option<BatchDocumentTask>>> {
        let task_id = task_id.to_string();
        Box::pin(async move {
            let conn = self.lock()?;
            conn.query_row(
                &format!("SELECT {} FROM batch_documents WHERE id = ?1", TASK_COLUMNS),
                params![task_id],
                task_from_row,
            )
            .optional()
            .map_err(db_err)
        })
    }

    fn claim_batch(&self, batch_id: &str) -> BoxFuture<'_, Result<Option<BatchJob>>> {
        let batch_id = batch_id.to_string();
        Box::pin(async move {
            let conn = self.lock()?;
            conn.execute(
                "UPDATE batches SET status = 'running', started_at = ?2
                 WHERE id = ?1 AND status = 'pending'",
                params![batch_id, Utc::now().to_rfc3339()],
            )
            .map_err(db_err)?;

            Ok(read_job(&conn, &batch_id)?.filter(|job| job.status == BatchStatus::Running))
        })
    }

    fn cancel_batch(&self, batch_id: &str) -> BoxFuture<'_, Result<bool>> {
        let batch_id = batch_id.to_string();
        Box::pin(async move {
            let conn = self.lock()?;
            let changed = conn
                .execute(
                    "UPDATE batches SET status = 'cancelled', completed_at = ?2
                     WHERE id = ?1 AND status IN ('pending', 'running')",
                    params![batch_id, Utc::now().to_rfc3339()],
                )
                .map_err(db_err)?;
            Ok(changed > 0)
        })
    }

    fn finish_batch(&self, batch_id: &str, status: BatchStatus) -> BoxFuture<'_, Result<bool>> {
        let batch_id = batch_id.to_string();
        Box::pin(async move {
            if !status.is_terminal() {
                return Err(BatchflowError::Database(format!(
                    "cannot finish batch with non-terminal status '{}'",
                    status
                )));
            }
            let conn = self.lock()?;
            // A job cancelled elsewhere keeps its status; only a missing
            // completion time is filled in.
            let changed = conn
                .execute(
                    "UPDATE batches SET status = ?2, completed_at = COALESCE(completed_at, ?3)
                     WHERE id = ?1
                       AND (status IN ('pending', 'running')
                            OR (status = ?2 AND completed_at IS NULL))",
                    params![batch_id, status.as_str(), Utc::now().to_rfc3339()],
                )
                .map_err(db_err)?;
            Ok(changed > 0)
        })
    }

    fn start_task(&self, task_id: &str) -> BoxFuture<'_, Result<bool>> {
        let task_id = task_id.to_string();
        Box::pin(async move {
            let conn = self.lock()?;
            let changed = conn
                .execute(
                    "UPDATE batch_documents SET status = 'processing'
                     WHERE id = ?1 AND status = 'pending'",
                    params![task_id],
                )
                .map_err(db_err)?;
            Ok(changed > 0)
        })
    }

    fn finish_task(&self, task_id: &str, outcome: TaskOutcome) -> BoxFuture<'_, Result<bool>> {
        let task_id = task_id.to_string();
        Box::pin(async move {
            let mut conn = self.lock()?;
            let tx = conn.transaction().map_err(db_err)?;

            let batch_id: Option<String> = tx
                .query_row(
                    "SELECT batch_id FROM batch_documents WHERE id = ?1 AND status = 'processing'",
                    params![task_id],
                    |row| row.get(0),
                )
                .optional()
                .map_err(db_err)?;
            let Some(batch_id) = batch_id else {
                return Ok(false);
            };

            let processed_at = Utc::now().to_rfc3339();
            let counter = match &outcome {
                TaskOutcome::Completed {
                    result_ref,
                    duration_ms,
                } => {
                    tx.execute(
                        "UPDATE batch_documents
                         SET status = 'completed', result_ref = ?2, error = NULL,
                             duration_ms = ?3, processed_at = ?4
                         WHERE id = ?1",
                        params![task_id, result_ref, *duration_ms as i64, processed_at],
                    )
                    .map_err(db_err)?;
                    "completed"
                }
                TaskOutcome::Failed { error, duration_ms } => {
                    tx.execute(
                        "UPDATE batch_documents
                         SET status = 'failed', result_ref = NULL, error = ?2,
                             duration_ms = ?3, processed_at = ?4
                         WHERE id = ?1",
                        params![task_id, error, *duration_ms as i64, processed_at],
                    )
                    .map_err(db_err)?;
                    "failed"
                }
            };

            tx.execute(
                &format!(
                    "UPDATE batches SET {col} = {col} + 1
                     WHERE id = ?1 AND completed + failed < total",
                    col = counter
                ),
                params![batch_id],
            )
            .map_err(db_err)?;

            tx.commit().map_err(db_err)?;
            Ok(true)
        })
    }
}

impl ArtifactStore for SqliteBatchStore {
    /// The first registration of a reference fixes its owner.
    fn register_artifact(&self, artifact_ref: &str, owner: &str) -> BoxFuture<'_, Result<()>> {
        let artifact_ref = artifact_ref.to_string();
        let owner = owner.to_string();
        Box::pin(async move {
            let conn = self.lock()?;
            conn.execute(
                "INSERT OR IGNORE INTO artifacts (artifact_ref, owner, created_at) VALUES (?1, ?2, ?3)",
                params![artifact_ref, owner, Utc::now().to_rfc3339()],
            )
            .map_err(db_err)?;
            Ok(())
        })
    }

    fn owner_of(&self, artifact_ref: &str) -> BoxFuture<'_, Result<Option<String>>> {
        let artifact_ref = artifact_ref.to_string();
        Box::pin(async move {
            let conn = self.lock()?;
            conn.query_row(
                "SELECT owner FROM artifacts WHERE artifact_ref = ?1",
                params![artifact_ref],
                |row| row.get(0),
            )
            .optional()
            .map_err(db_err)
        })
    }
}

impl CancelFlagStore for SqliteBatchStore {
    fn set_flag(&self, key: &str, ttl: Duration) -> BoxFuture<'_, Result<()>> {
        let key = key.to_string();
        let expires_at = now_millis().saturating_add(ttl.as_millis().min(i64::MAX as u128) as i64);
        Box::pin(async move {
            let conn = self.lock()?;
            conn.execute(
                "INSERT OR REPLACE INTO cancel_flags (key, expires_at) VALUES (?1, ?2)",
                params![key, expires_at],
            )
            .map_err(db_err)?;
            Ok(())
        })
    }

    fn is_flagged(&self, key: &str) -> BoxFuture<'_, Result<bool>> {
        let key = key.to_string();
        Box::pin(async move {
            let conn = self.lock()?;
            let found: Option<i64> = conn
                .query_row(
                    "SELECT 1 FROM cancel_flags WHERE key = ?1 AND expires_at > ?2",
                    params![key, now_millis()],
                    |row| row.get(0),
                )
                .optional()
                .map_err(db_err)?;
            Ok(found.is_some())
        })
    }

    fn clear_flag(&self, key: &str) -> BoxFuture<'_, Result<()>> {
        let key = key.to_string();
        Box::pin(async move {
            let conn = self.lock()?;
            conn.execute("DELETE FROM cancel_flags WHERE key = ?1", params![key])
                .map_err(db_err)?;
            Ok(())
        })
    }

    fn purge_expired(&self) -> BoxFuture<'_, Result<usize>> {
        Box::pin(async move {
            let conn = self.lock()?;
            let removed = conn
                .execute(
                    "DELETE FROM cancel_flags WHERE expires_at <= ?1",
                    params![now_millis()],
                )
                .map_err(db_err)?;
            if removed > 0 {
                debug!(removed, "Purged expired cancel flags");
            }
            Ok(removed)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job_with_tasks(docs: &[&str]) -> (BatchJob, Vec<BatchDocumentTask>) {
        let job = BatchJob::new("alice", "flow-1", docs.len() as u32);
        let tasks = docs
            .iter()
            .enumerate()
            .map(|(i, d)| BatchDocumentTask::new(&job.id, *d, i as u32))
            .collect();
        (job, tasks)
    }

    #[tokio::test]
    async fn test_create_and_list_in_position_order() {
        let store = SqliteBatchStore::in_memory().unwrap();
        let (job, tasks) = job_with_tasks(&["c", "a", "b"]);
        store.create_batch(&job, &tasks).await.unwrap();

        let loaded = store.get_batch(&job.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, BatchStatus::Pending);
        assert_eq!(loaded.total_documents, 3);

        let docs: Vec<_> = store
            .list_tasks(&job.id)
            .await
            .unwrap()
            .into_iter()
            .map(|t| t.document_id)
            .collect();
        assert_eq!(docs, vec!["c", "a", "b"]);

        assert_eq!(store.list_batches("alice").await.unwrap().len(), 1);
        assert!(store.list_batches("bob").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_document_rolls_back_whole_batch() {
        let store = SqliteBatchStore::in_memory().unwrap();
        let job = BatchJob::new("alice", "flow-1", 2);
        let tasks = vec![
            BatchDocumentTask::new(&job.id, "doc", 0),
            BatchDocumentTask::new(&job.id, "doc", 1),
        ];

        assert!(store.create_batch(&job, &tasks).await.is_err());
        assert!(store.get_batch(&job.id).await.unwrap().is_none());
        assert!(store.list_tasks(&job.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_claim_is_idempotent_and_skips_terminal() {
        let store = SqliteBatchStore::in_memory().unwrap();
        let (job, tasks) = job_with_tasks(&["a"]);
        store.create_batch(&job, &tasks).await.unwrap();

        let first = store.claim_batch(&job.id).await.unwrap().unwrap();
        assert_eq!(first.status, BatchStatus::Running);
        let started = first.started_at;
        assert!(started.is_some());

        let again = store.claim_batch(&job.id).await.unwrap().unwrap();
        assert_eq!(again.started_at, started);

        assert!(store.cancel_batch(&job.id).await.unwrap());
        assert!(store.claim_batch(&job.id).await.unwrap().is_none());
        assert!(store.claim_batch("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_task_transitions_never_regress() {
        let store = SqliteBatchStore::in_memory().unwrap();
        let (job, tasks) = job_with_tasks(&["a"]);
        store.create_batch(&job, &tasks).await.unwrap();
        let task_id = &tasks[0].id;

        let done = TaskOutcome::Completed {
            result_ref: "art-1".into(),
            duration_ms: 12,
        };
        // Pending cannot jump straight to Completed.
        assert!(!store.finish_task(task_id, done.clone()).await.unwrap());

        assert!(store.start_task(task_id).await.unwrap());
        assert!(!store.start_task(task_id).await.unwrap());
        assert!(store.finish_task(task_id, done.clone()).await.unwrap());
        assert!(!store.finish_task(task_id, done).await.unwrap());

        let task = store.get_task(task_id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.result_ref.as_deref(), Some("art-1"));
        assert_eq!(task.duration_ms, Some(12));
        assert!(task.processed_at.is_some());

        let job = store.get_batch(&job.id).await.unwrap().unwrap();
        assert_eq!(job.completed_documents, 1);
        assert_eq!(job.failed_documents, 0);
    }

    #[tokio::test]
    async fn test_failed_task_counts_and_clears_result() {
        let store = SqliteBatchStore::in_memory().unwrap();
        let (job, tasks) = job_with_tasks(&["a", "b"]);
        store.create_batch(&job, &tasks).await.unwrap();

        store.start_task(&tasks[1].id).await.unwrap();
        store
            .finish_task(
                &tasks[1].id,
                TaskOutcome::Failed {
                    error: "boom".into(),
                    duration_ms: 3,
                },
            )
            .await
            .unwrap();

        let task = store.get_task(&tasks[1].id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.error.as_deref(), Some("boom"));
        assert!(task.result_ref.is_none());

        let job = store.get_batch(&job.id).await.unwrap().unwrap();
        assert_eq!((job.completed_documents, job.failed_documents), (0, 1));
    }

    #[tokio::test]
    async fn test_counters_never_exceed_total() {
        let store = SqliteBatchStore::in_memory().unwrap();
        let (job, tasks) = job_with_tasks(&["a"]);
        store.create_batch(&job, &tasks).await.unwrap();

        {
            let conn = store.lock().unwrap();
            conn.execute(
                "UPDATE batches SET completed = 1 WHERE id = ?1",
                params![job.id],
            )
            .unwrap();
        }

        store.start_task(&tasks[0].id).await.unwrap();
        store
            .finish_task(
                &tasks[0].id,
                TaskOutcome::Completed {
                    result_ref: "x".into(),
                    duration_ms: 1,
                },
            )
            .await
            .unwrap();

        let job = store.get_batch(&job.id).await.unwrap().unwrap();
        assert!(job.completed_documents + job.failed_documents <= job.total_documents);
    }

    #[tokio::test]
    async fn test_finish_batch_keeps_cancelled() {
        let store = SqliteBatchStore::in_memory().unwrap();
        let (job, tasks) = job_with_tasks(&["a"]);
        store.create_batch(&job, &tasks).await.unwrap();
        store.claim_batch(&job.id).await.unwrap();

        assert!(store.cancel_batch(&job.id).await.unwrap());
        assert!(!store.cancel_batch(&job.id).await.unwrap());
        assert!(!store
            .finish_batch(&job.id, BatchStatus::Completed)
            .await
            .unwrap());

        let job = store.get_batch(&job.id).await.unwrap().unwrap();
        assert_eq!(job.status, BatchStatus::Cancelled);
        assert!(job.completed_at.is_some());
    }

    #[tokio::test]
    async fn test_finish_batch_rejects_non_terminal() {
        let store = SqliteBatchStore::in_memory().unwrap();
        assert!(store
            .finish_batch("any", BatchStatus::Running)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_artifact_owner_lookup() {
        let store = SqliteBatchStore::in_memory().unwrap();
        store.register_artifact("art-1", "alice").await.unwrap();
        store.register_artifact("art-1", "mallory").await.unwrap();

        assert_eq!(
            store.owner_of("art-1").await.unwrap().as_deref(),
            Some("alice")
        );
        assert!(store.owner_of("art-2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_cancel_flags_expire() {
        let store = SqliteBatchStore::in_memory().unwrap();
        store
            .set_flag("live", Duration::from_secs(60))
            .await
            .unwrap();
        store.set_flag("stale", Duration::ZERO).await.unwrap();

        assert!(store.is_flagged("live").await.unwrap());
        assert!(!store.is_flagged("stale").await.unwrap());
        assert!(!store.is_flagged("absent").await.unwrap());

        assert_eq!(store.purge_expired().await.unwrap(), 1);
        store.clear_flag("live").await.unwrap();
        assert!(!store.is_flagged("live").await.unwrap());
    }

    #[tokio::test]
    async fn test_reopen_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("batchflow.db");
        let (job, tasks) = job_with_tasks(&["a", "b"]);

        {
            let store = SqliteBatchStore::open(&path).unwrap();
            store.create_batch(&job, &tasks).await.unwrap();
            store.claim_batch(&job.id).await.unwrap();
        }

        let store = SqliteBatchStore::open(&path).unwrap();
        let loaded = store.get_batch(&job.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, BatchStatus::Running);
        assert_eq!(store.list_tasks(&job.id).await.unwrap().len(), 2);
    }
}
