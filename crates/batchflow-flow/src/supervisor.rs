//! Compiles a flow into a tool-restricted controller.
//!
//! Each distinct specialist used by the flow becomes one named tool; the
//! controller may call nothing else. The rendered instructions list the steps
//! in order, tell the controller to use a loaded document without asking for
//! one, and to stop once a terminal output has been produced.

use std::collections::HashSet;
use std::fmt::Write as _;
use std::sync::Arc;

use futures::future::BoxFuture;
use tracing::{debug, warn};

use batchflow_core::capability::CapabilityRegistry;
use batchflow_core::error::{BatchflowError, Result};
use batchflow_core::traits::{Specialist, SpecialistResolver, Tool};
use batchflow_core::types::{
    RuntimeContext, SessionId, ToolContext, ToolDefinition, ToolResult,
};

use crate::graph::{FlowDefinition, FlowNode};
use crate::registry::ToolRegistry;

/// A specialist exposed to the controller as a named, described tool.
pub struct SpecialistTool {
    name: String,
    description: String,
    specialist: Arc<dyn Specialist>,
}

impl SpecialistTool {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        specialist: Arc<dyn Specialist>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            specialist,
        }
    }
}

impl Tool for SpecialistTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "instructions": {
                    "type": "string",
                    "description": "What this specialist should do for the current step"
                }
            },
            "required": ["instructions"]
        })
    }

    fn execute(
        &self,
        input: serde_json::Value,
        ctx: ToolContext,
    ) -> BoxFuture<'_, Result<ToolResult>> {
        self.specialist.run(input, ctx)
    }
}

/// A compiled flow: restricted tools plus rendered instructions.
#[derive(Debug)]
pub struct Supervisor {
    pub flow_id: String,
    pub flow_name: String,
    pub tools: ToolRegistry,
    pub system_prompt: String,
    pub initial_prompt: String,
    pub max_steps: usize,
    /// Labels of the steps the controller will walk, in order.
    pub steps: Vec<String>,
    /// Non-fatal problems found while compiling (e.g. skipped steps).
    pub warnings: Vec<String>,
    pub context: RuntimeContext,
}

impl Supervisor {
    pub fn tool_definitions(&self) -> Vec<ToolDefinition> {
        self.tools.definitions()
    }

    pub fn tool_context(&self, session_id: &SessionId) -> ToolContext {
        ToolContext {
            session_id: session_id.clone(),
            document: self.context.document.clone(),
            policy_filters: self.context.policy_filters.clone(),
        }
    }

    /// Invoke one of the flow's tools. Undeclared tools are rejected.
    pub async fn call_tool(
        &self,
        name: &str,
        input: serde_json::Value,
        session_id: &SessionId,
    ) -> Result<ToolResult> {
        self.tools
            .execute(name, input, self.tool_context(session_id))
            .await
    }
}

/// Builds [`Supervisor`]s from flows using injected registry and resolver.
pub struct FlowSupervisorBuilder {
    registry: Arc<CapabilityRegistry>,
    resolver: Arc<dyn SpecialistResolver>,
    max_steps: usize,
}

impl FlowSupervisorBuilder {
    pub fn new(registry: Arc<CapabilityRegistry>, resolver: Arc<dyn SpecialistResolver>) -> Self {
        Self {
            registry,
            resolver,
            max_steps: 25,
        }
    }

    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps;
        self
    }

    /// Distinct agent ids used by the flow, in step order, without task input.
    pub fn capability_ids(flow: &FlowDefinition) -> Vec<String> {
        let mut seen = HashSet::new();
        flow.ordered_nodes()
            .into_iter()
            .filter(|n| !n.is_task_input())
            .filter(|n| seen.insert(n.agent_id.clone()))
            .map(|n| n.agent_id.clone())
            .collect()
    }

    /// Compile `flow` for one run.
    pub fn build(&self, flow: &FlowDefinition, ctx: &RuntimeContext) -> Result<Supervisor> {
        let mut tools = ToolRegistry::new();
        let mut skipped: HashSet<String> = HashSet::new();
        let mut warnings = Vec::new();

        for agent_id in Self::capability_ids(flow) {
            let spec = self
                .registry
                .get(&agent_id)
                .ok_or_else(|| BatchflowError::SpecialistUnavailable(agent_id.clone()))?;

            if spec.requires_document && ctx.document.is_none() {
                let message = format!("Skipping '{}': it needs a document and none is loaded", spec.name);
                warn!(flow_id = %flow.id, agent_id = %agent_id, "{}", message);
                warnings.push(message);
                skipped.insert(agent_id);
                continue;
            }

            let specialist = self.resolver.resolve(spec, ctx)?;
            let description = if spec.description.is_empty() {
                spec.name.clone()
            } else {
                format!("{}: {}", spec.name, spec.description)
            };
            tools.register(SpecialistTool::new(agent_id, description, specialist));
        }

        let steps: Vec<&FlowNode> = flow
            .ordered_nodes()
            .into_iter()
            .filter(|n| !n.is_task_input() && !skipped.contains(&n.agent_id))
            .collect();

        let system_prompt = render_system_prompt(flow, &steps, ctx);
        let initial_prompt = render_initial_prompt(flow, &steps);

        debug!(
            flow_id = %flow.id,
            tools = tools.len(),
            steps = steps.len(),
            "Supervisor compiled"
        );

        Ok(Supervisor {
            flow_id: flow.id.clone(),
            flow_name: flow.name.clone(),
            tools,
            system_prompt,
            initial_prompt,
            max_steps: self.max_steps,
            steps: steps.iter().map(|n| n.label().to_string()).collect(),
            warnings,
            context: ctx.clone(),
        })
    }
}

fn render_system_prompt(flow: &FlowDefinition, steps: &[&FlowNode], ctx: &RuntimeContext) -> String {
    let mut prompt = String::new();
    let _ = writeln!(
        prompt,
        "You supervise the \"{}\" flow. You coordinate specialist tools and never do their work yourself.",
        flow.name
    );

    prompt.push_str("\n## Steps\n\nRun these steps in order:\n");
    for (i, node) in steps.iter().enumerate() {
        let _ = write!(prompt, "{}. {} (tool `{}`)", i + 1, node.label(), node.agent_id);
        if !node.step_goal.is_empty() {
            let _ = write!(prompt, ": {}", node.step_goal);
        }
        prompt.push('\n');
    }

    prompt.push_str("\n## Document\n\n");
    match &ctx.document {
        Some(doc) => {
            let _ = writeln!(
                prompt,
                "A document is loaded: \"{}\" (id {}).",
                doc.name.as_deref().unwrap_or(&doc.id),
                doc.id
            );
            if let Some(summary) = &doc.summary {
                let _ = writeln!(prompt, "Summary: {}", summary);
            }
            prompt.push_str(
                "Use the loaded document directly. Never ask the user to provide or upload a document.\n",
            );
        }
        None => prompt.push_str("No document is loaded.\n"),
    }

    if !ctx.policy_filters.is_empty() {
        prompt.push_str("\n## Active policy filters\n\n");
        for filter in &ctx.policy_filters {
            let _ = writeln!(prompt, "- {}", filter);
        }
    }

    prompt.push_str(
        "\n## Finishing\n\nOnly call the tools listed above. As soon as a file has been produced \
         or a final response delivered, stop. Do not start the steps again.\n",
    );
    prompt
}

fn render_initial_prompt(flow: &FlowDefinition, steps: &[&FlowNode]) -> String {
    let instructions: Vec<&str> = flow
        .nodes
        .iter()
        .filter(|n| n.is_task_input())
        .map(|n| n.step_goal.trim())
        .filter(|g| !g.is_empty())
        .collect();

    let mut prompt = if instructions.is_empty() {
        "Run the flow on the loaded document.".to_string()
    } else {
        instructions.join("\n\n")
    };

    let goals: Vec<_> = steps.iter().filter(|n| !n.step_goal.is_empty()).collect();
    if !goals.is_empty() {
        prompt.push_str("\n\nStep goals:\n");
        for node in goals {
            let _ = writeln!(prompt, "- {}: {}", node.label(), node.step_goal);
        }
    }
    prompt
}
