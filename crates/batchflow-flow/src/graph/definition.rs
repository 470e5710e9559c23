use std::collections::{HashMap, HashSet, VecDeque};
use std::path::Path;

use serde::{Deserialize, Serialize};

use batchflow_core::error::{BatchflowError, Result};

use super::edge::FlowEdge;
use super::node::FlowNode;

/// A saved flow: nodes plus the edges that order them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowDefinition {
    pub id: String,
    pub owner: String,
    pub name: String,
    #[serde(default)]
    pub nodes: Vec<FlowNode>,
    #[serde(default)]
    pub edges: Vec<FlowEdge>,
}

impl FlowDefinition {
    pub fn new(id: impl Into<String>, owner: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            owner: owner.into(),
            name: name.into(),
            nodes: vec![],
            edges: vec![],
        }
    }

    pub fn with_node(mut self, node: FlowNode) -> Self {
        self.nodes.push(node);
        self
    }

    pub fn with_edge(mut self, source: impl Into<String>, target: impl Into<String>) -> Self {
        self.edges.push(FlowEdge::new(source, target));
        self
    }

    /// Parse a flow from TOML.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| BatchflowError::Config(format!("invalid flow: {}", e)))
    }

    /// Load a flow from a `.toml` or `.json` file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Ok(serde_json::from_str(&content)?),
            _ => Self::from_toml_str(&content),
        }
    }

    pub fn node(&self, id: &str) -> Option<&FlowNode> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Nodes with no incoming edge, in declaration order.
    pub fn entry_nodes(&self) -> Vec<&FlowNode> {
        let targets: HashSet<&str> = self.edges.iter().map(|e| e.target.as_str()).collect();
        self.nodes
            .iter()
            .filter(|n| !targets.contains(n.id.as_str()))
            .collect()
    }

    /// Nodes with no outgoing edge, in declaration order.
    pub fn exit_nodes(&self) -> Vec<&FlowNode> {
        let sources: HashSet<&str> = self.edges.iter().map(|e| e.source.as_str()).collect();
        self.nodes
            .iter()
            .filter(|n| !sources.contains(n.id.as_str()))
            .collect()
    }

    /// Edges whose endpoints are not both declared nodes.
    pub fn dangling_edges(&self) -> Vec<&FlowEdge> {
        let ids: HashSet<&str> = self.nodes.iter().map(|n| n.id.as_str()).collect();
        self.edges
            .iter()
            .filter(|e| !ids.contains(e.source.as_str()) || !ids.contains(e.target.as_str()))
            .collect()
    }

    /// All nodes in execution order.
    ///
    /// Topological from the entry nodes, ties broken by declaration order.
    /// Nodes left over because they sit on a cycle are appended in
    /// declaration order so the result always covers every node.
    pub fn ordered_nodes(&self) -> Vec<&FlowNode> {
        let index: HashMap<&str, usize> = self
            .nodes
            .iter()
            .enumerate()
            .map(|(i, n)| (n.id.as_str(), i))
            .collect();

        let mut in_degree = vec![0usize; self.nodes.len()];
        let mut successors: Vec<Vec<usize>> = vec![vec![]; self.nodes.len()];
        for edge in &self.edges {
            if let (Some(&s), Some(&t)) = (
                index.get(edge.source.as_str()),
                index.get(edge.target.as_str()),
            ) {
                successors[s].push(t);
                in_degree[t] += 1;
            }
        }
        for succ in &mut successors {
            succ.sort_unstable();
        }

        let mut queue: VecDeque<usize> = (0..self.nodes.len()).filter(|&i| in_degree[i] == 0).collect();
        let mut placed = vec![false; self.nodes.len()];
        let mut order = Vec::with_capacity(self.nodes.len());

        while let Some(i) = queue.pop_front() {
            placed[i] = true;
            order.push(i);
            for &t in &successors[i] {
                in_degree[t] -= 1;
                if in_degree[t] == 0 {
                    queue.push_back(t);
                }
            }
        }

        order.extend((0..self.nodes.len()).filter(|&i| !placed[i]));
        order.into_iter().map(|i| &self.nodes[i]).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn linear_flow() -> FlowDefinition {
        FlowDefinition::new("f1", "alice", "Extract and export")
            .with_node(FlowNode::new("input", "task_input"))
            .with_node(FlowNode::new("extract", "extractor"))
            .with_node(FlowNode::new("export", "exporter"))
            .with_edge("input", "extract")
            .with_edge("extract", "export")
    }

    fn ids(nodes: Vec<&FlowNode>) -> Vec<&str> {
        nodes.into_iter().map(|n| n.id.as_str()).collect()
    }

    #[test]
    fn test_entry_and_exit_nodes() {
        let flow = linear_flow();
        assert_eq!(ids(flow.entry_nodes()), vec!["input"]);
        assert_eq!(ids(flow.exit_nodes()), vec!["export"]);
    }

    #[test]
    fn test_ordered_nodes_follow_edges_not_declaration() {
        let flow = FlowDefinition::new("f", "o", "n")
            .with_node(FlowNode::new("export", "exporter"))
            .with_node(FlowNode::new("summarize", "summarizer"))
            .with_node(FlowNode::new("extract", "extractor"))
            .with_edge("extract", "summarize")
            .with_edge("summarize", "export");

        assert_eq!(
            ids(flow.ordered_nodes()),
            vec!["extract", "summarize", "export"]
        );
    }

    #[test]
    fn test_ordered_nodes_with_branches() {
        let flow = FlowDefinition::new("f", "o", "n")
            .with_node(FlowNode::new("a", "x"))
            .with_node(FlowNode::new("b", "x"))
            .with_node(FlowNode::new("c", "x"))
            .with_node(FlowNode::new("d", "x"))
            .with_edge("a", "c")
            .with_edge("b", "c")
            .with_edge("c", "d");

        assert_eq!(ids(flow.ordered_nodes()), vec!["a", "b", "c", "d"]);
    }

    #[test]
    fn test_ordered_nodes_include_cycles() {
        let flow = FlowDefinition::new("f", "o", "n")
            .with_node(FlowNode::new("start", "x"))
            .with_node(FlowNode::new("loop_a", "x"))
            .with_node(FlowNode::new("loop_b", "x"))
            .with_edge("start", "loop_a")
            .with_edge("loop_a", "loop_b")
            .with_edge("loop_b", "loop_a");

        assert_eq!(ids(flow.ordered_nodes()), vec!["start", "loop_a", "loop_b"]);
    }

    #[test]
    fn test_dangling_edges() {
        let flow = linear_flow().with_edge("export", "ghost");
        let dangling = flow.dangling_edges();
        assert_eq!(dangling.len(), 1);
        assert_eq!(dangling[0].target, "ghost");
    }

    #[test]
    fn test_from_toml() {
        let flow = FlowDefinition::from_toml_str(
            r#"
id = "flow-1"
owner = "alice"
name = "Curate"

[[nodes]]
id = "extract"
agent_id = "extractor"
step_goal = "Extract the tables"
display_name = "Extract"

[[nodes]]
id = "export"
agent_id = "exporter"

[[edges]]
source = "extract"
target = "export"
"#,
        )
        .unwrap();

        assert_eq!(flow.nodes.len(), 2);
        assert_eq!(flow.node("extract").unwrap().label(), "Extract");
        assert_eq!(flow.node("export").unwrap().step_goal, "");
        assert_eq!(flow.edges, vec![FlowEdge::new("extract", "export")]);
    }

    #[test]
    fn test_from_toml_invalid() {
        let err = FlowDefinition::from_toml_str("id = 3").unwrap_err();
        assert!(matches!(err, BatchflowError::Config(_)));
    }
}
