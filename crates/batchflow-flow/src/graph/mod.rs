//! Flow graphs: an ordered, directed graph of specialist steps.
//!
//! A flow is authored elsewhere and consumed read-only. Entry nodes are the
//! nodes with no incoming edge; exit nodes have no outgoing edge.

pub mod definition;
pub mod edge;
pub mod node;

pub use definition::FlowDefinition;
pub use edge::FlowEdge;
pub use node::{FlowNode, TASK_INPUT_AGENT};
