use std::collections::BTreeMap;
use std::sync::Arc;

use batchflow_core::error::{BatchflowError, Result};
use batchflow_core::traits::Tool;
use batchflow_core::types::{ToolContext, ToolDefinition, ToolResult};

/// The tools a controller is allowed to call. Anything else is `ToolNotFound`.
#[derive(Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: BTreeMap::new(),
        }
    }

    /// Register a tool.
    pub fn register(&mut self, tool: impl Tool) {
        self.register_arc(Arc::new(tool));
    }

    pub fn register_arc(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        self.tools.insert(name, tool);
    }

    /// Get a tool by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Tool names, sorted.
    pub fn list(&self) -> Vec<&str> {
        self.tools.keys().map(|s| s.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Get tool definitions for the controller.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools
            .values()
            .map(|t| ToolDefinition {
                name: t.name().to_string(),
                description: t.description().to_string(),
                input_schema: t.input_schema(),
            })
            .collect()
    }

    /// Execute a tool by name.
    pub async fn execute(
        &self,
        name: &str,
        input: serde_json::Value,
        ctx: ToolContext,
    ) -> Result<ToolResult> {
        let tool = self
            .get(name)
            .ok_or_else(|| BatchflowError::ToolNotFound(name.to_string()))?;

        let timeout = std::time::Duration::from_secs(tool.timeout_secs());

        match tokio::time::timeout(timeout, tool.execute(input, ctx)).await {
            Ok(result) => result,
            Err(_) => Err(BatchflowError::ToolTimeout {
                tool: name.to_string(),
                timeout_secs: tool.timeout_secs(),
            }),
        }
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.list())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use batchflow_core::types::SessionId;
    use futures::future::BoxFuture;

    struct EchoTool;

    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }

        fn description(&self) -> &str {
            "Echo the input back"
        }

        fn input_schema(&self) -> serde_json::Value {
            serde_json::json!({"type": "object"})
        }

        fn execute(
            &self,
            input: serde_json::Value,
            _ctx: ToolContext,
        ) -> BoxFuture<'_, Result<ToolResult>> {
            Box::pin(async move { Ok(ToolResult::success(input.to_string())) })
        }
    }

    struct SlowTool;

    impl Tool for SlowTool {
        fn name(&self) -> &str {
            "slow"
        }

        fn description(&self) -> &str {
            "Never finishes in time"
        }

        fn input_schema(&self) -> serde_json::Value {
            serde_json::json!({"type": "object"})
        }

        fn execute(
            &self,
            _input: serde_json::Value,
            _ctx: ToolContext,
        ) -> BoxFuture<'_, Result<ToolResult>> {
            Box::pin(async {
                tokio::time::sleep(std::time::Duration::from_secs(10)).await;
                Ok(ToolResult::success("late"))
            })
        }

        fn timeout_secs(&self) -> u64 {
            1
        }
    }

    fn ctx() -> ToolContext {
        ToolContext {
            session_id: SessionId::new(),
            document: None,
            policy_filters: vec![],
        }
    }

    #[tokio::test]
    async fn test_execute_registered_tool() {
        let mut registry = ToolRegistry::new();
        registry.register(EchoTool);

        let result = registry
            .execute("echo", serde_json::json!({"a": 1}), ctx())
            .await
            .unwrap();
        assert!(!result.is_error);
        assert!(result.content.contains("\"a\""));
        assert_eq!(registry.definitions().len(), 1);
    }

    #[tokio::test]
    async fn test_undeclared_tool_rejected() {
        let registry = ToolRegistry::new();
        let err = registry
            .execute("bash", serde_json::json!({}), ctx())
            .await
            .unwrap_err();
        assert!(matches!(err, BatchflowError::ToolNotFound(name) if name == "bash"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_tool_timeout() {
        let mut registry = ToolRegistry::new();
        registry.register(SlowTool);

        let err = registry
            .execute("slow", serde_json::json!({}), ctx())
            .await
            .unwrap_err();
        assert!(matches!(err, BatchflowError::ToolTimeout { timeout_secs: 1, .. }));
    }
}
