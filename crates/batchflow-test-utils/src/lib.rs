//! Mocks and fixtures shared by batchflow integration tests.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::BoxFuture;
use futures::StreamExt;
use tempfile::TempDir;

use batchflow_batch::{
    BatchOrchestrator, BatchService, CancellationSignal, EventBroadcaster, SqliteBatchStore,
};
use batchflow_core::capability::{Capability, CapabilityRegistry, CapabilitySpec};
use batchflow_core::config::AppConfig;
use batchflow_core::error::{BatchflowError, Result};
use batchflow_core::traits::{ArtifactStore, Specialist, SpecialistResolver};
use batchflow_core::types::{
    RunEvent, RunEventKind, RuntimeContext, SessionId, ToolContext, ToolResult,
};
use batchflow_flow::{
    FlowCatalog, FlowDefinition, FlowNode, FlowSupervisorBuilder, RunEventStream,
    RunStreamFactory, Supervisor, TASK_INPUT_AGENT,
};

// ---------------------------------------------------------------------------
// Specialists
// ---------------------------------------------------------------------------

/// Specialist that answers with a fixed string.
pub struct MockSpecialist {
    agent_id: String,
    reply: String,
}

impl MockSpecialist {
    pub fn new(agent_id: &str, reply: &str) -> Self {
        Self {
            agent_id: agent_id.to_string(),
            reply: reply.to_string(),
        }
    }
}

impl Specialist for MockSpecialist {
    fn agent_id(&self) -> &str {
        &self.agent_id
    }

    fn run(&self, _input: serde_json::Value, _ctx: ToolContext) -> BoxFuture<'_, Result<ToolResult>> {
        let reply = self.reply.clone();
        Box::pin(async move { Ok(ToolResult::success(reply)) })
    }
}

/// Resolver handing out [`MockSpecialist`]s and remembering what it resolved.
#[derive(Default)]
pub struct MockResolver {
    resolved: Mutex<Vec<String>>,
}

impl MockResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn resolved(&self) -> Vec<String> {
        self.resolved.lock().unwrap().clone()
    }
}

impl SpecialistResolver for MockResolver {
    fn resolve(&self, spec: &CapabilitySpec, _ctx: &RuntimeContext) -> Result<Arc<dyn Specialist>> {
        self.resolved.lock().unwrap().push(spec.id.clone());
        Ok(Arc::new(MockSpecialist::new(&spec.id, &format!("{} done", spec.name))))
    }
}

// ---------------------------------------------------------------------------
// Run event streams
// ---------------------------------------------------------------------------

/// One item a scripted stream yields.
#[derive(Debug, Clone)]
pub enum ScriptStep {
    Event(RunEventKind),
    /// The stream yields an error at this point.
    Fail(String),
}

pub fn file_ready(artifact_ref: &str) -> ScriptStep {
    ScriptStep::Event(RunEventKind::FileReady {
        artifact_ref: artifact_ref.to_string(),
        filename: Some(format!("{}.xlsx", artifact_ref)),
    })
}

pub fn tool_start(tool: &str) -> ScriptStep {
    ScriptStep::Event(RunEventKind::ToolStart {
        tool: tool.to_string(),
        input: serde_json::json!({ "instructions": "run" }),
    })
}

pub fn tool_complete(tool: &str) -> ScriptStep {
    ScriptStep::Event(RunEventKind::ToolComplete {
        tool: tool.to_string(),
        output: "ok".to_string(),
    })
}

type OpenHook = Arc<dyn Fn(&str) + Send + Sync>;

/// Stream factory that replays a fixed script per document.
///
/// A document with no script produces a run that ends without output.
#[derive(Default)]
pub struct ScriptedStreamFactory {
    scripts: Mutex<HashMap<String, Vec<ScriptStep>>>,
    open_failures: Mutex<HashMap<String, String>>,
    hooks: Mutex<HashMap<String, OpenHook>>,
    opened: Mutex<Vec<String>>,
}

impl ScriptedStreamFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(&self, document_id: &str, steps: Vec<ScriptStep>) -> &Self {
        self.scripts
            .lock()
            .unwrap()
            .insert(document_id.to_string(), steps);
        self
    }

    /// Make `open` itself fail for this document.
    pub fn fail_open(&self, document_id: &str, error: &str) -> &Self {
        self.open_failures
            .lock()
            .unwrap()
            .insert(document_id.to_string(), error.to_string());
        self
    }

    /// Run `hook` synchronously when this document's stream is opened.
    pub fn on_open(&self, document_id: &str, hook: impl Fn(&str) + Send + Sync + 'static) -> &Self {
        self.hooks
            .lock()
            .unwrap()
            .insert(document_id.to_string(), Arc::new(hook));
        self
    }

    /// Documents opened so far, in order.
    pub fn opened(&self) -> Vec<String> {
        self.opened.lock().unwrap().clone()
    }
}

impl RunStreamFactory for ScriptedStreamFactory {
    fn open(
        &self,
        _supervisor: Arc<Supervisor>,
        document_id: &str,
        session_id: &SessionId,
    ) -> BoxFuture<'_, Result<RunEventStream>> {
        self.opened.lock().unwrap().push(document_id.to_string());
        let hook = self.hooks.lock().unwrap().get(document_id).cloned();
        if let Some(hook) = hook {
            hook(document_id);
        }

        let failure = self.open_failures.lock().unwrap().get(document_id).cloned();
        let steps = self
            .scripts
            .lock()
            .unwrap()
            .get(document_id)
            .cloned()
            .unwrap_or_else(|| vec![ScriptStep::Event(RunEventKind::RunFinished)]);
        let session = session_id.0.clone();

        Box::pin(async move {
            if let Some(error) = failure {
                return Err(BatchflowError::TransientRun(error));
            }
            let mut items = vec![Ok(RunEvent::new(RunEventKind::RunStarted { session_id: session }))];
            items.extend(steps.into_iter().map(|step| match step {
                ScriptStep::Event(kind) => Ok(RunEvent::new(kind)),
                ScriptStep::Fail(error) => Err(BatchflowError::TransientRun(error)),
            }));
            Ok(futures::stream::iter(items).boxed())
        })
    }
}

// ---------------------------------------------------------------------------
// Flows and registry
// ---------------------------------------------------------------------------

pub fn fixture_registry() -> CapabilityRegistry {
    CapabilityRegistry::from_specs(vec![
        CapabilitySpec::new("extractor", "Extractor")
            .with_description("Extracts structured content from the document")
            .with_capabilities(vec![Capability::DocumentExtraction])
            .requiring_document(),
        CapabilitySpec::new("exporter", "Exporter")
            .with_description("Writes the results to a spreadsheet")
            .with_capabilities(vec![Capability::FileOutput]),
        CapabilitySpec::new("chat", "Chat").with_capabilities(vec![Capability::ChatOutput]),
        CapabilitySpec::new("analyst", "Analyst").with_capabilities(vec![Capability::Analysis]),
    ])
}

/// task input -> extract -> export.
pub fn extract_export_flow(id: &str, owner: &str) -> FlowDefinition {
    FlowDefinition::new(id, owner, "Extract and export")
        .with_node(FlowNode::new("input", TASK_INPUT_AGENT).with_goal("Pull every table."))
        .with_node(
            FlowNode::new("extract", "extractor")
                .with_goal("Extract the tables")
                .with_display_name("Extract"),
        )
        .with_node(
            FlowNode::new("export", "exporter")
                .with_goal("Write a spreadsheet")
                .with_display_name("Export"),
        )
        .with_edge("input", "extract")
        .with_edge("extract", "export")
}

/// extract -> chat: not batch-compatible.
pub fn chat_exit_flow(id: &str, owner: &str) -> FlowDefinition {
    FlowDefinition::new(id, owner, "Extract and chat")
        .with_node(FlowNode::new("extract", "extractor"))
        .with_node(FlowNode::new("reply", "chat").with_display_name("Reply"))
        .with_edge("extract", "reply")
}

pub fn docs(ids: &[&str]) -> Vec<String> {
    ids.iter().map(|s| s.to_string()).collect()
}

// ---------------------------------------------------------------------------
// Full wiring
// ---------------------------------------------------------------------------

/// Temporary on-disk database path. Keep the `TempDir` alive while in use.
pub fn temp_db() -> (TempDir, PathBuf) {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("batchflow.db");
    (dir, path)
}

/// Everything a batch worker needs, wired against one store.
pub struct Harness {
    pub store: Arc<SqliteBatchStore>,
    pub catalog: Arc<FlowCatalog>,
    pub registry: Arc<CapabilityRegistry>,
    pub streams: Arc<ScriptedStreamFactory>,
    pub resolver: Arc<MockResolver>,
    pub broadcaster: Arc<EventBroadcaster>,
    pub cancel: Arc<CancellationSignal>,
    pub service: BatchService,
    pub orchestrator: Arc<BatchOrchestrator>,
}

impl Harness {
    pub fn new(store: Arc<SqliteBatchStore>) -> Self {
        Self::with_capacity(store, 64)
    }

    pub fn with_capacity(store: Arc<SqliteBatchStore>, queue_capacity: usize) -> Self {
        let registry = Arc::new(fixture_registry());
        let catalog = Arc::new(FlowCatalog::new());
        let streams = Arc::new(ScriptedStreamFactory::new());
        let resolver = Arc::new(MockResolver::new());
        let broadcaster = Arc::new(EventBroadcaster::new(queue_capacity));
        let cancel = Arc::new(CancellationSignal::new(store.clone(), Duration::from_secs(60)));
        let config = AppConfig::default();
        let builder = Arc::new(
            FlowSupervisorBuilder::new(registry.clone(), resolver.clone())
                .with_max_steps(config.supervisor.max_steps),
        );
        let service = BatchService::new(store.clone(), registry.clone(), cancel.clone())
            .with_broadcaster(broadcaster.clone());
        let orchestrator = Arc::new(
            BatchOrchestrator::new(
                store.clone(),
                catalog.clone(),
                builder,
                streams.clone(),
                broadcaster.clone(),
                cancel.clone(),
                store.clone(),
            )
            .with_config(&config.batch),
        );

        Self {
            store,
            catalog,
            registry,
            streams,
            resolver,
            broadcaster,
            cancel,
            service,
            orchestrator,
        }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(SqliteBatchStore::in_memory().unwrap()))
    }

    /// Add `flow` to the catalog and register `art-<doc>` artifacts for the
    /// flow's owner, one per document.
    pub async fn prepare(&self, flow: &FlowDefinition, documents: &[&str]) {
        self.catalog.insert(flow.clone()).unwrap();
        for doc in documents {
            self.store
                .register_artifact(&format!("art-{}", doc), &flow.owner)
                .await
                .unwrap();
        }
    }
}
