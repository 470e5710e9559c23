use std::collections::HashMap;
use std::path::Path;
use std::sync::RwLock;

use futures::future::BoxFuture;
use tracing::debug;

use batchflow_core::error::{BatchflowError, Result};

use crate::graph::FlowDefinition;

/// Read-only access to authored flows.
pub trait FlowSource: Send + Sync + 'static {
    fn get_flow(&self, flow_id: &str) -> BoxFuture<'_, Result<Option<FlowDefinition>>>;
}

/// In-memory flow catalog.
#[derive(Debug, Default)]
pub struct FlowCatalog {
    flows: RwLock<HashMap<String, FlowDefinition>>,
}

impl FlowCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, flow: FlowDefinition) -> Result<()> {
        let mut flows = self
            .flows
            .write()
            .map_err(|e| BatchflowError::Config(e.to_string()))?;
        flows.insert(flow.id.clone(), flow);
        Ok(())
    }

    /// Load a flow file and add it to the catalog, returning its id.
    pub fn load_file(&self, path: &Path) -> Result<String> {
        let flow = FlowDefinition::load(path)?;
        let id = flow.id.clone();
        debug!(flow_id = %id, path = %path.display(), "Flow loaded");
        self.insert(flow)?;
        Ok(id)
    }

    pub fn len(&self) -> usize {
        self.flows.read().map(|f| f.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl FlowSource for FlowCatalog {
    fn get_flow(&self, flow_id: &str) -> BoxFuture<'_, Result<Option<FlowDefinition>>> {
        let flow_id = flow_id.to_string();
        Box::pin(async move {
            let flows = self
                .flows
                .read()
                .map_err(|e| BatchflowError::Config(e.to_string()))?;
            Ok(flows.get(&flow_id).cloned())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn test_insert_and_get() {
        let catalog = FlowCatalog::new();
        catalog
            .insert(FlowDefinition::new("f1", "alice", "First"))
            .unwrap();

        let flow = catalog.get_flow("f1").await.unwrap().unwrap();
        assert_eq!(flow.owner, "alice");
        assert!(catalog.get_flow("missing").await.unwrap().is_none());
        assert_eq!(catalog.len(), 1);
    }

    #[tokio::test]
    async fn test_load_file() {
        let mut tmp = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        tmp.write_all(b"id = \"f2\"\nowner = \"bob\"\nname = \"From disk\"\n")
            .unwrap();

        let catalog = FlowCatalog::new();
        let id = catalog.load_file(tmp.path()).unwrap();
        assert_eq!(id, "f2");
        assert_eq!(catalog.get_flow("f2").await.unwrap().unwrap().name, "From disk");
    }
}
