use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique session identifier for one flow execution.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn from_string(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle of a batch job.
///
/// `Pending -> Running -> {Completed, Cancelled}`. A job with failed
/// documents still ends `Completed`; only the counters carry the degree of
/// success.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchStatus {
    Pending,
    Running,
    Completed,
    Cancelled,
}

impl BatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }
}

impl std::fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of one document inside a batch. Transitions never regress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "processing" => Some(Self::Processing),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    pub fn is_resolved(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Whether `self -> next` is a forward transition.
    pub fn can_advance_to(&self, next: TaskStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Processing)
                | (Self::Processing, Self::Completed)
                | (Self::Processing, Self::Failed)
        )
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A request to run one flow against many documents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchJob {
    pub id: String,
    pub owner: String,
    pub flow_id: String,
    pub status: BatchStatus,
    pub total_documents: u32,
    pub completed_documents: u32,
    pub failed_documents: u32,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl BatchJob {
    pub fn new(owner: impl Into<String>, flow_id: impl Into<String>, total_documents: u32) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            owner: owner.into(),
            flow_id: flow_id.into(),
            status: BatchStatus::Pending,
            total_documents,
            completed_documents: 0,
            failed_documents: 0,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    /// Documents that have reached Completed or Failed.
    pub fn resolved_documents(&self) -> u32 {
        self.completed_documents + self.failed_documents
    }

    pub fn remaining_documents(&self) -> u32 {
        self.total_documents.saturating_sub(self.resolved_documents())
    }

    /// Percentage of documents resolved, 0..=100.
    pub fn progress_pct(&self) -> u8 {
        if self.total_documents == 0 {
            return 100;
        }
        ((self.resolved_documents() as u64 * 100) / self.total_documents as u64).min(100) as u8
    }
}

/// Per-document unit of work within a batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchDocumentTask {
    pub id: String,
    pub batch_id: String,
    pub document_id: String,
    pub position: u32,
    pub status: TaskStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_ref: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processed_at: Option<DateTime<Utc>>,
}

impl BatchDocumentTask {
    pub fn new(batch_id: impl Into<String>, document_id: impl Into<String>, position: u32) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            batch_id: batch_id.into(),
            document_id: document_id.into(),
            position,
            status: TaskStatus::Pending,
            result_ref: None,
            error: None,
            duration_ms: None,
            processed_at: None,
        }
    }
}

/// Final state recorded for a task once its document has been processed.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskOutcome {
    Completed { result_ref: String, duration_ms: u64 },
    Failed { error: String, duration_ms: u64 },
}

impl TaskOutcome {
    pub fn status(&self) -> TaskStatus {
        match self {
            Self::Completed { .. } => TaskStatus::Completed,
            Self::Failed { .. } => TaskStatus::Failed,
        }
    }
}

/// A document handed to a flow run.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DocumentRef {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub summary: Option<String>,
}

impl DocumentRef {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
            summary: None,
        }
    }

    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = Some(summary.into());
        self
    }
}

/// Runtime inputs for compiling a flow into a controller.
#[derive(Debug, Clone, Default)]
pub struct RuntimeContext {
    pub document: Option<DocumentRef>,
    pub policy_filters: Vec<String>,
}

impl RuntimeContext {
    pub fn for_document(document: DocumentRef) -> Self {
        Self {
            document: Some(document),
            policy_filters: vec![],
        }
    }

    pub fn with_policy_filters(mut self, filters: Vec<String>) -> Self {
        self.policy_filters = filters;
        self
    }
}

/// Result of a tool execution.
#[derive(Debug, Clone)]
pub struct ToolResult {
    pub content: String,
    pub is_error: bool,
}

impl ToolResult {
    pub fn success(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: false,
        }
    }

    pub fn error(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: true,
        }
    }
}

/// Tool definition exposed to the controller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

/// Context passed to tools during execution.
#[derive(Debug, Clone)]
pub struct ToolContext {
    pub session_id: SessionId,
    pub document: Option<DocumentRef>,
    pub policy_filters: Vec<String>,
}

/// Payload of one event produced while executing a compiled flow.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunEventKind {
    RunStarted {
        session_id: String,
    },
    ToolStart {
        tool: String,
        #[serde(default)]
        input: serde_json::Value,
    },
    ToolComplete {
        tool: String,
        #[serde(default)]
        output: String,
    },
    /// A file artifact was produced.
    FileReady {
        artifact_ref: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        filename: Option<String>,
    },
    /// A chat response was finalized.
    ChatOutputReady {
        content: String,
    },
    RunFinished,
    RunError {
        error: String,
    },
}

/// A typed run event with an optional timestamp.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunEvent {
    #[serde(flatten)]
    pub kind: RunEventKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl RunEvent {
    pub fn new(kind: RunEventKind) -> Self {
        Self {
            kind,
            timestamp: Some(Utc::now()),
        }
    }

    pub fn untimed(kind: RunEventKind) -> Self {
        Self {
            kind,
            timestamp: None,
        }
    }

    pub fn type_tag(&self) -> &'static str {
        match self.kind {
            RunEventKind::RunStarted { .. } => "run_started",
            RunEventKind::ToolStart { .. } => "tool_start",
            RunEventKind::ToolComplete { .. } => "tool_complete",
            RunEventKind::FileReady { .. } => "file_ready",
            RunEventKind::ChatOutputReady { .. } => "chat_output_ready",
            RunEventKind::RunFinished => "run_finished",
            RunEventKind::RunError { .. } => "run_error",
        }
    }

    /// An artifact was produced or a response finalized; the run is logically done.
    pub fn is_terminal_output(&self) -> bool {
        matches!(
            self.kind,
            RunEventKind::FileReady { .. } | RunEventKind::ChatOutputReady { .. }
        )
    }

    /// The event body without its type tag.
    pub fn payload(&self) -> serde_json::Value {
        match serde_json::to_value(&self.kind) {
            Ok(serde_json::Value::Object(mut map)) => {
                map.remove("type");
                serde_json::Value::Object(map)
            }
            _ => serde_json::Value::Null,
        }
    }
}

/// Event type tags for batch lifecycle records.
pub mod event_types {
    pub const BATCH_STARTED: &str = "batch_started";
    pub const DOCUMENT_STARTED: &str = "document_started";
    pub const DOCUMENT_COMPLETED: &str = "document_completed";
    pub const DOCUMENT_FAILED: &str = "document_failed";
    pub const BATCH_COMPLETED: &str = "batch_completed";
    pub const BATCH_CANCELLED: &str = "batch_cancelled";
}

/// Relayed wire record, append-only per batch.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BatchEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    pub batch_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_id: Option<String>,
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    pub payload: serde_json::Value,
}

impl BatchEvent {
    /// Enrich a run event with the batch and document it belongs to.
    pub fn from_run_event(
        batch_id: &str,
        document_id: &str,
        session_id: &SessionId,
        event: &RunEvent,
    ) -> Self {
        Self {
            event_type: event.type_tag().to_string(),
            batch_id: batch_id.to_string(),
            document_id: Some(document_id.to_string()),
            session_id: session_id.0.clone(),
            timestamp: event.timestamp.or_else(|| Some(Utc::now())),
            payload: event.payload(),
        }
    }

    /// A batch lifecycle record (not produced by a run).
    pub fn lifecycle(
        event_type: &str,
        batch_id: &str,
        document_id: Option<&str>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            event_type: event_type.to_string(),
            batch_id: batch_id.to_string(),
            document_id: document_id.map(str::to_string),
            session_id: batch_id.to_string(),
            timestamp: Some(Utc::now()),
            payload,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_transitions_are_monotonic() {
        assert!(TaskStatus::Pending.can_advance_to(TaskStatus::Processing));
        assert!(TaskStatus::Processing.can_advance_to(TaskStatus::Completed));
        assert!(TaskStatus::Processing.can_advance_to(TaskStatus::Failed));
        assert!(!TaskStatus::Pending.can_advance_to(TaskStatus::Completed));
        assert!(!TaskStatus::Completed.can_advance_to(TaskStatus::Processing));
        assert!(!TaskStatus::Failed.can_advance_to(TaskStatus::Pending));
        assert!(!TaskStatus::Processing.can_advance_to(TaskStatus::Pending));
    }

    #[test]
    fn test_status_string_roundtrip() {
        for s in [
            BatchStatus::Pending,
            BatchStatus::Running,
            BatchStatus::Completed,
            BatchStatus::Cancelled,
        ] {
            assert_eq!(BatchStatus::parse(s.as_str()), Some(s));
        }
        assert_eq!(TaskStatus::parse("processing"), Some(TaskStatus::Processing));
        assert_eq!(TaskStatus::parse("bogus"), None);
    }

    #[test]
    fn test_progress_pct() {
        let mut job = BatchJob::new("alice", "flow-1", 4);
        assert_eq!(job.progress_pct(), 0);
        job.completed_documents = 2;
        job.failed_documents = 1;
        assert_eq!(job.resolved_documents(), 3);
        assert_eq!(job.remaining_documents(), 1);
        assert_eq!(job.progress_pct(), 75);

        let empty = BatchJob::new("alice", "flow-1", 0);
        assert_eq!(empty.progress_pct(), 100);
    }

    #[test]
    fn test_run_event_serialization_uses_type_tag() {
        let event = RunEvent::untimed(RunEventKind::FileReady {
            artifact_ref: "art-1".into(),
            filename: Some("out.xlsx".into()),
        });
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "file_ready");
        assert_eq!(json["artifact_ref"], "art-1");
        assert!(json.get("timestamp").is_none());

        let parsed: RunEvent =
            serde_json::from_str(r#"{"type":"run_finished","timestamp":"2024-01-01T00:00:00Z"}"#)
                .unwrap();
        assert_eq!(parsed.kind, RunEventKind::RunFinished);
        assert!(parsed.timestamp.is_some());
    }

    #[test]
    fn test_terminal_output_events() {
        assert!(RunEvent::new(RunEventKind::ChatOutputReady {
            content: "done".into()
        })
        .is_terminal_output());
        assert!(!RunEvent::new(RunEventKind::RunFinished).is_terminal_output());
        assert!(!RunEvent::new(RunEventKind::ToolStart {
            tool: "extract".into(),
            input: serde_json::json!({}),
        })
        .is_terminal_output());
    }

    #[test]
    fn test_batch_event_enrichment() {
        let session = SessionId::from_string("s-1");
        let event = RunEvent::untimed(RunEventKind::ToolComplete {
            tool: "extract".into(),
            output: "ok".into(),
        });
        let record = BatchEvent::from_run_event("b-1", "doc-1", &session, &event);

        assert_eq!(record.event_type, "tool_complete");
        assert_eq!(record.batch_id, "b-1");
        assert_eq!(record.document_id.as_deref(), Some("doc-1"));
        assert_eq!(record.session_id, "s-1");
        assert!(record.timestamp.is_some());
        assert_eq!(record.payload["tool"], "extract");
        assert!(record.payload.get("type").is_none());

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["type"], "tool_complete");
    }
}
