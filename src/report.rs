//! Plain-text rendering for CLI output.

use batchflow_batch::BatchProgress;
use batchflow_core::types::{BatchDocumentTask, BatchEvent, BatchJob};

pub fn progress_line(progress: &BatchProgress) -> String {
    format!(
        "{} [{}] {}% ({}/{} done, {} failed, {} pending)",
        progress.batch_id,
        progress.status,
        progress.percent,
        progress.completed,
        progress.total,
        progress.failed,
        progress.pending
    )
}

pub fn job_line(job: &BatchJob) -> String {
    format!(
        "{}  {:<10} flow={}  {}/{}  created {}",
        job.id,
        job.status.as_str(),
        job.flow_id,
        job.resolved_documents(),
        job.total_documents,
        job.created_at.format("%Y-%m-%d %H:%M")
    )
}

pub fn task_line(task: &BatchDocumentTask) -> String {
    let detail = match (&task.result_ref, &task.error) {
        (Some(result), _) => format!("-> {}", result),
        (None, Some(error)) => format!("error: {}", truncate(error, 80)),
        (None, None) => String::new(),
    };
    let duration = task
        .duration_ms
        .map(|ms| format!(" ({} ms)", ms))
        .unwrap_or_default();
    format!(
        "  #{:<3} {:<24} {:<10}{} {}",
        task.position,
        task.document_id,
        task.status.as_str(),
        duration,
        detail
    )
    .trim_end()
    .to_string()
}

pub fn event_line(event: &BatchEvent) -> String {
    match &event.document_id {
        Some(doc) => format!("  {} [{}] {}", event.event_type, doc, event.payload),
        None => format!("  {} {}", event.event_type, event.payload),
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use batchflow_core::types::{BatchStatus, TaskStatus};

    #[test]
    fn test_progress_line() {
        let mut job = BatchJob::new("alice", "flow-1", 4);
        job.status = BatchStatus::Running;
        job.completed_documents = 1;
        job.failed_documents = 1;
        let line = progress_line(&BatchProgress::from(&job));
        assert!(line.contains("[running] 50% (1/4 done, 1 failed, 2 pending)"));
    }

    #[test]
    fn test_task_line_shows_error() {
        let mut task = BatchDocumentTask::new("b1", "report.pdf", 2);
        task.status = TaskStatus::Failed;
        task.error = Some("x".repeat(200));
        let line = task_line(&task);
        assert!(line.contains("#2"));
        assert!(line.contains("failed"));
        assert!(line.len() < 200);
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate("héllo", 2), "hé");
        assert_eq!(truncate("hi", 5), "hi");
    }
}
