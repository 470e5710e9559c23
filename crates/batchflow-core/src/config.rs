use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::capability::{CapabilityRegistry, CapabilitySpec};
use crate::error::{BatchflowError, Result};

/// Top-level batchflow configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub batch: BatchConfig,
    #[serde(default)]
    pub supervisor: SupervisorConfig,
    /// Static specialist registry.
    #[serde(default)]
    pub capabilities: Vec<CapabilitySpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// SQLite database shared by workers and viewers.
    #[serde(default = "default_database")]
    pub database: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database: default_database(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Bounded queue size per live subscriber.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Error text persisted on a failed task is truncated to this many chars.
    #[serde(default = "default_max_error_chars")]
    pub max_error_chars: usize,
    /// How often viewers poll persisted job state.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Lifetime of a cross-process cancellation flag.
    #[serde(default = "default_cancel_ttl_secs")]
    pub cancel_ttl_secs: u64,
    /// Policy filters applied to every batch run.
    #[serde(default)]
    pub policy_filters: Vec<String>,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            max_error_chars: default_max_error_chars(),
            poll_interval_ms: default_poll_interval_ms(),
            cancel_ttl_secs: default_cancel_ttl_secs(),
            policy_filters: vec![],
        }
    }
}

impl BatchConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn cancel_ttl(&self) -> Duration {
        Duration::from_secs(self.cancel_ttl_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupervisorConfig {
    /// Upper bound on controller steps for one flow execution.
    #[serde(default = "default_max_steps")]
    pub max_steps: usize,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            max_steps: default_max_steps(),
        }
    }
}

fn default_database() -> String { "~/.batchflow/batchflow.db".to_string() }
fn default_queue_capacity() -> usize { 64 }
fn default_max_error_chars() -> usize { 500 }
fn default_poll_interval_ms() -> u64 { 1000 }
fn default_cancel_ttl_secs() -> u64 { 3600 }
fn default_max_steps() -> usize { 25 }

impl AppConfig {
    /// Load config from a TOML file, expanding `${ENV_VAR}` references.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|_| BatchflowError::ConfigNotFound(path.display().to_string()))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        let expanded = expand_env_vars(content);
        toml::from_str(&expanded).map_err(|e| BatchflowError::Config(e.to_string()))
    }

    /// Resolve the database path (expand ~).
    pub fn database_path(&self) -> PathBuf {
        let db = &self.storage.database;
        if let Some(rest) = db.strip_prefix("~/") {
            if let Some(home) = dirs_home() {
                return home.join(rest);
            }
        }
        PathBuf::from(db)
    }

    /// Build the capability registry declared in this config.
    pub fn registry(&self) -> CapabilityRegistry {
        CapabilityRegistry::from_specs(self.capabilities.iter().cloned())
    }
}

/// Expand `${ENV_VAR}` patterns in a string.
fn expand_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '$' && chars.peek() == Some(&'{') {
            chars.next();
            let mut var_name = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                var_name.push(c);
            }
            match std::env::var(&var_name) {
                Ok(val) => result.push_str(&val),
                // Keep the reference if the variable is not set
                Err(_) => result.push_str(&format!("${{{}}}", var_name)),
            }
        } else {
            result.push(c);
        }
    }
    result
}

fn dirs_home() -> Option<PathBuf> {
    std::env::var("HOME").ok().map(PathBuf::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::Capability;

    #[test]
    fn test_expand_env_vars() {
        std::env::set_var("TEST_BATCHFLOW_VAR", "hello");
        let result = expand_env_vars("key = \"${TEST_BATCHFLOW_VAR}\"");
        assert_eq!(result, "key = \"hello\"");
        std::env::remove_var("TEST_BATCHFLOW_VAR");
    }

    #[test]
    fn test_expand_env_vars_missing() {
        let result = expand_env_vars("key = \"${NONEXISTENT_BATCHFLOW_VAR}\"");
        assert_eq!(result, "key = \"${NONEXISTENT_BATCHFLOW_VAR}\"");
    }

    #[test]
    fn test_defaults_from_empty_toml() {
        let config = AppConfig::parse("").unwrap();
        assert_eq!(config.batch.queue_capacity, 64);
        assert_eq!(config.batch.max_error_chars, 500);
        assert_eq!(config.batch.poll_interval(), Duration::from_millis(1000));
        assert_eq!(config.batch.cancel_ttl(), Duration::from_secs(3600));
        assert_eq!(config.supervisor.max_steps, 25);
        assert!(config.capabilities.is_empty());
    }

    #[test]
    fn test_capabilities_build_registry() {
        let config = AppConfig::parse(
            r#"
[[capabilities]]
id = "extractor"
name = "Extractor"
provides = ["document_extraction"]
requires_document = true

[[capabilities]]
id = "exporter"
name = "Exporter"
provides = ["file_output"]
"#,
        )
        .unwrap();

        let registry = config.registry();
        assert_eq!(registry.len(), 2);
        assert!(registry.provides("extractor", Capability::DocumentExtraction));
        assert!(registry.provides("exporter", Capability::FileOutput));
    }

    #[test]
    fn test_database_path_plain() {
        let mut config = AppConfig::default();
        config.storage.database = "/tmp/bf.db".into();
        assert_eq!(config.database_path(), PathBuf::from("/tmp/bf.db"));
    }

    #[test]
    fn test_invalid_toml_is_config_error() {
        let err = AppConfig::parse("[batch\nqueue_capacity = 1").unwrap_err();
        assert!(matches!(err, BatchflowError::Config(_)));
    }
}
