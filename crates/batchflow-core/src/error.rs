use thiserror::Error;

#[derive(Debug, Error)]
pub enum BatchflowError {
    // Surfaced before a job exists
    #[error("Flow is not batch-compatible: {}", .0.join("; "))]
    Validation(Vec<String>),

    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    // One document's run failed; recorded on the task, the batch continues
    #[error("Document run failed: {0}")]
    TransientRun(String),

    // Aborts the whole job
    #[error("Batch job cannot run: {0}")]
    FatalJob(String),

    #[error("Artifact {artifact} is not owned by {owner}")]
    OwnershipMismatch { artifact: String, owner: String },

    #[error("Specialist not available: {0}")]
    SpecialistUnavailable(String),

    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Tool timeout after {timeout_secs}s: {tool}")]
    ToolTimeout { tool: String, timeout_secs: u64 },

    // Config errors
    #[error("Config error: {0}")]
    Config(String),

    #[error("Config file not found: {0}")]
    ConfigNotFound(String),

    // Storage errors
    #[error("Database error: {0}")]
    Database(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl BatchflowError {
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, BatchflowError>;
