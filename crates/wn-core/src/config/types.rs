//! Root configuration types.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::llm::ProviderConfig;
use crate::tools::McpServerConfig;

/// The root configuration record, read from `config.json` in a resource
/// directory. Every field has a default; a missing file yields
/// `RootConfig::default()`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RootConfig {
    pub default_provider: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_model: Option<String>,
    pub default_persona: String,
    pub providers: HashMap<String, ProviderConfig>,
    pub mcp: McpSection,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct McpSection {
    #[serde(default)]
    pub servers: Vec<McpServerConfig>,
}

impl Default for RootConfig {
    fn default() -> Self {
        Self {
            default_provider: "claude".to_string(),
            default_model: None,
            default_persona: "default".to_string(),
            providers: HashMap::new(),
            mcp: McpSection::default(),
        }
    }
}

impl RootConfig {
    /// The provider entry for a name, if configured.
    pub fn provider_config(&self, name: &str) -> Option<&ProviderConfig> {
        self.providers.get(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RootConfig::default();
        assert_eq!(config.default_provider, "claude");
        assert_eq!(config.default_persona, "default");
        assert!(config.default_model.is_none());
        assert!(config.providers.is_empty());
        assert!(config.mcp.servers.is_empty());
    }

    #[test]
    fn test_camel_case_keys() {
        let config: RootConfig = serde_json::from_str(
            r#"{
                "defaultProvider": "openai",
                "defaultModel": "gpt-4.1-mini",
                "providers": {"openai": {"apiKey": "k"}},
                "mcp": {"servers": [{"name": "fs", "command": "uvx", "args": ["mcp-server-filesystem"]}]}
            }"#,
        )
        .unwrap();
        assert_eq!(config.default_provider, "openai");
        assert_eq!(config.default_model.as_deref(), Some("gpt-4.1-mini"));
        assert_eq!(
            config.providers["openai"].api_key.as_deref(),
            Some("k")
        );
        assert_eq!(config.mcp.servers[0].name, "fs");
    }
}
