use serde::{Deserialize, Serialize};

/// Agent id of the pseudo node that only carries free-text run instructions.
pub const TASK_INPUT_AGENT: &str = "task_input";

/// A step in a flow, bound to one specialist by `agent_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowNode {
    /// Unique identifier within the flow.
    pub id: String,
    /// Capability id of the specialist that runs this step.
    pub agent_id: String,
    /// What this step should achieve; for the task-input node, the run instructions.
    #[serde(default)]
    pub step_goal: String,
    #[serde(default)]
    pub display_name: Option<String>,
}

impl FlowNode {
    pub fn new(id: impl Into<String>, agent_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            agent_id: agent_id.into(),
            step_goal: String::new(),
            display_name: None,
        }
    }

    pub fn with_goal(mut self, goal: impl Into<String>) -> Self {
        self.step_goal = goal.into();
        self
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    /// Display name, falling back to the node id.
    pub fn label(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.id)
    }

    pub fn is_task_input(&self) -> bool {
        self.agent_id == TASK_INPUT_AGENT
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_builder() {
        let node = FlowNode::new("n1", "extractor")
            .with_goal("Pull every table")
            .with_display_name("Extract");

        assert_eq!(node.id, "n1");
        assert_eq!(node.agent_id, "extractor");
        assert_eq!(node.step_goal, "Pull every table");
        assert_eq!(node.label(), "Extract");
        assert!(!node.is_task_input());
    }

    #[test]
    fn test_label_falls_back_to_id() {
        let node = FlowNode::new("input", TASK_INPUT_AGENT);
        assert_eq!(node.label(), "input");
        assert!(node.is_task_input());
    }
}
