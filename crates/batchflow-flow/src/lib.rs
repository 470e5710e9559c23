pub mod catalog;
pub mod graph;
pub mod registry;
pub mod stream;
pub mod supervisor;
pub mod validator;

pub use catalog::{FlowCatalog, FlowSource};
pub use graph::{FlowDefinition, FlowEdge, FlowNode, TASK_INPUT_AGENT};
pub use registry::ToolRegistry;
pub use stream::{RunEventStream, RunStreamFactory};
pub use supervisor::{FlowSupervisorBuilder, SpecialistTool, Supervisor};
pub use validator::{validate_for_batch, ValidationIssue, ValidationReport};
