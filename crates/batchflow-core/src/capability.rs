use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// What a specialist can do for a flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    /// Reads and extracts content from the loaded document.
    DocumentExtraction,
    /// Produces a downloadable file artifact.
    FileOutput,
    /// Produces an interactive chat response only.
    ChatOutput,
    Analysis,
}

/// Static description of a specialist, keyed by agent id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapabilitySpec {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub provides: Vec<Capability>,
    /// The specialist cannot run without a loaded document.
    #[serde(default)]
    pub requires_document: bool,
}

impl CapabilitySpec {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            provides: vec![],
            requires_document: false,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_capabilities(mut self, provides: Vec<Capability>) -> Self {
        self.provides = provides;
        self
    }

    pub fn requiring_document(mut self) -> Self {
        self.requires_document = true;
        self
    }

    pub fn has(&self, capability: Capability) -> bool {
        self.provides.contains(&capability)
    }
}

/// Registry of specialist descriptions.
///
/// Built once from configuration and passed explicitly to the validator,
/// the supervisor builder and the batch worker.
#[derive(Debug, Clone, Default)]
pub struct CapabilityRegistry {
    specs: HashMap<String, CapabilitySpec>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_specs(specs: impl IntoIterator<Item = CapabilitySpec>) -> Self {
        let mut registry = Self::new();
        for spec in specs {
            registry.register(spec);
        }
        registry
    }

    /// Register a spec, replacing any previous one with the same id.
    pub fn register(&mut self, spec: CapabilitySpec) {
        self.specs.insert(spec.id.clone(), spec);
    }

    pub fn get(&self, agent_id: &str) -> Option<&CapabilitySpec> {
        self.specs.get(agent_id)
    }

    pub fn contains(&self, agent_id: &str) -> bool {
        self.specs.contains_key(agent_id)
    }

    /// Capabilities of an agent; empty for unknown ids.
    pub fn capabilities_of(&self, agent_id: &str) -> &[Capability] {
        self.specs
            .get(agent_id)
            .map(|s| s.provides.as_slice())
            .unwrap_or(&[])
    }

    pub fn provides(&self, agent_id: &str, capability: Capability) -> bool {
        self.capabilities_of(agent_id).contains(&capability)
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_lookup() {
        let registry = CapabilityRegistry::from_specs(vec![
            CapabilitySpec::new("extractor", "Extractor")
                .with_capabilities(vec![Capability::DocumentExtraction])
                .requiring_document(),
            CapabilitySpec::new("exporter", "Exporter")
                .with_capabilities(vec![Capability::FileOutput]),
        ]);

        assert_eq!(registry.len(), 2);
        assert!(registry.provides("extractor", Capability::DocumentExtraction));
        assert!(!registry.provides("extractor", Capability::FileOutput));
        assert!(registry.get("extractor").unwrap().requires_document);
        assert!(registry.capabilities_of("missing").is_empty());
        assert!(!registry.contains("missing"));
    }

    #[test]
    fn test_capability_serde_names() {
        let spec: CapabilitySpec = toml::from_str(
            r#"
id = "chat"
name = "Chat"
provides = ["chat_output", "analysis"]
"#,
        )
        .unwrap();
        assert!(spec.has(Capability::ChatOutput));
        assert!(spec.has(Capability::Analysis));
        assert!(!spec.requires_document);
    }
}
