//! Batch-compatibility validation.
//!
//! A flow can run unattended only if it extracts from the document and every
//! exit step writes a file. Validation is pure and can be called any number
//! of times; a batch job is only created for a flow that passed it.

use std::fmt;

use batchflow_core::capability::{Capability, CapabilityRegistry};
use batchflow_core::error::{BatchflowError, Result};

use crate::graph::FlowDefinition;

/// One reason a flow cannot run in batch mode. Messages are stable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationIssue {
    EmptyFlow,
    MissingExtraction,
    UnknownAgent { node: String, agent_id: String },
    DanglingEdge { source: String, target: String },
    /// Exit step only produces an interactive chat response.
    ExitChatOnly { node: String },
    /// Exit step produces neither a file nor a chat response.
    ExitWithoutOutput { node: String },
    /// Every step has a successor, so the run never reaches a final step.
    NoExitStep,
}

impl ValidationIssue {
    /// Machine-readable code for API consumers.
    pub fn code(&self) -> &'static str {
        match self {
            Self::EmptyFlow => "empty_flow",
            Self::MissingExtraction => "missing_extraction",
            Self::UnknownAgent { .. } => "unknown_agent",
            Self::DanglingEdge { .. } => "dangling_edge",
            Self::ExitChatOnly { .. } => "exit_chat_only",
            Self::ExitWithoutOutput { .. } => "exit_without_output",
            Self::NoExitStep => "no_exit_step",
        }
    }
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyFlow => write!(f, "Flow has no steps"),
            Self::MissingExtraction => write!(
                f,
                "Batch flows need at least one document-extraction step"
            ),
            Self::UnknownAgent { node, agent_id } => {
                write!(f, "Step '{}' uses unknown agent '{}'", node, agent_id)
            }
            Self::DanglingEdge { source, target } => write!(
                f,
                "Edge {} -> {} references a step that does not exist",
                source, target
            ),
            Self::ExitChatOnly { node } => write!(
                f,
                "Final step '{}' only produces chat output; batch runs need a file-output step",
                node
            ),
            Self::ExitWithoutOutput { node } => write!(
                f,
                "Final step '{}' produces no output; batch runs need a file-output step",
                node
            ),
            Self::NoExitStep => write!(
                f,
                "Flow has no final step; batch runs need a file-output step that ends the flow"
            ),
        }
    }
}

/// Outcome of [`validate_for_batch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationReport {
    pub valid: bool,
    pub errors: Vec<ValidationIssue>,
}

impl ValidationReport {
    pub fn messages(&self) -> Vec<String> {
        self.errors.iter().map(|e| e.to_string()).collect()
    }

    pub fn into_result(self) -> Result<()> {
        if self.valid {
            Ok(())
        } else {
            Err(BatchflowError::Validation(self.messages()))
        }
    }
}

/// Check that `flow` can run unattended over many documents.
///
/// Reports every problem found, not only the first.
pub fn validate_for_batch(flow: &FlowDefinition, registry: &CapabilityRegistry) -> ValidationReport {
    let mut errors = Vec::new();

    let steps: Vec<_> = flow.nodes.iter().filter(|n| !n.is_task_input()).collect();
    if steps.is_empty() {
        errors.push(ValidationIssue::EmptyFlow);
    }

    for edge in flow.dangling_edges() {
        errors.push(ValidationIssue::DanglingEdge {
            source: edge.source.clone(),
            target: edge.target.clone(),
        });
    }

    for node in &steps {
        if !registry.contains(&node.agent_id) {
            errors.push(ValidationIssue::UnknownAgent {
                node: node.label().to_string(),
                agent_id: node.agent_id.clone(),
            });
        }
    }

    let extracts = steps
        .iter()
        .any(|n| registry.provides(&n.agent_id, Capability::DocumentExtraction));
    if !extracts {
        errors.push(ValidationIssue::MissingExtraction);
    }

    let exits: Vec<_> = flow
        .exit_nodes()
        .into_iter()
        .filter(|n| !n.is_task_input())
        .collect();
    if exits.is_empty() && !steps.is_empty() {
        errors.push(ValidationIssue::NoExitStep);
    }

    for node in exits {
        let caps = registry.capabilities_of(&node.agent_id);
        if caps.contains(&Capability::FileOutput) {
            continue;
        }
        let node = node.label().to_string();
        if caps.contains(&Capability::ChatOutput) {
            errors.push(ValidationIssue::ExitChatOnly { node });
        } else {
            errors.push(ValidationIssue::ExitWithoutOutput { node });
        }
    }

    ValidationReport {
        valid: errors.is_empty(),
        errors,
    }
}
