//! Language model provider abstractions and integrations.
//!
//! Defines the core [`Provider`] trait and implementations for the four
//! supported back-ends: Anthropic Claude, OpenAI, Google Gemini, and a local
//! Ollama endpoint. Each adapter owns the translation between the canonical
//! message/tool types and its vendor's wire format, for both one-shot
//! completions and incremental streams.

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core_types::{CompletionResponse, Message, StreamChunk};
use crate::errors::AgentError;

pub mod providers;
pub mod stream;

pub use providers::{create_provider, default_model};

/// A tool definition as advertised to the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolMetadata {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

/// Credentials and endpoint overrides for constructing a provider.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
}

/// Streamed provider output. Errors surface as stream items at the
/// consumer's iteration point rather than failing the call that opened
/// the stream.
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<StreamChunk, AgentError>> + Send>>;

#[async_trait]
pub trait Provider: Send + Sync {
    /// One LLM round-trip over the full message history.
    async fn complete(
        &self,
        messages: Vec<Message>,
        tools: Option<Vec<ToolMetadata>>,
    ) -> Result<CompletionResponse, AgentError>;

    /// Same semantics as [`Provider::complete`], incrementally.
    ///
    /// The returned stream yields text deltas one-to-one, one `tool_call`
    /// chunk per logical call with fully reassembled arguments, and exactly
    /// one terminal `done` chunk.
    async fn stream(
        &self,
        messages: Vec<Message>,
        tools: Option<Vec<ToolMetadata>>,
    ) -> Result<ChunkStream, AgentError>;
}

/// Resolve a credential from the config record or an environment fallback.
pub(crate) fn resolve_api_key(
    config: &ProviderConfig,
    env_var: &str,
    provider: &str,
) -> Result<String, AgentError> {
    config
        .api_key
        .clone()
        .or_else(|| config.auth_token.clone())
        .or_else(|| std::env::var(env_var).ok())
        .ok_or_else(|| {
            AgentError::Config(format!(
                "No API key found for {}. Set apiKey in the providers table or export {}",
                provider, env_var
            ))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_api_key_prefers_config() {
        let config = ProviderConfig {
            api_key: Some("from-config".into()),
            auth_token: None,
            base_url: None,
        };
        let key = resolve_api_key(&config, "WN_TEST_KEY_UNSET", "test").unwrap();
        assert_eq!(key, "from-config");
    }

    #[test]
    fn test_resolve_api_key_falls_back_to_auth_token() {
        let config = ProviderConfig {
            api_key: None,
            auth_token: Some("token".into()),
            base_url: None,
        };
        let key = resolve_api_key(&config, "WN_TEST_KEY_UNSET", "test").unwrap();
        assert_eq!(key, "token");
    }

    #[test]
    fn test_resolve_api_key_missing_is_descriptive() {
        let err = resolve_api_key(&ProviderConfig::default(), "WN_TEST_KEY_UNSET", "claude")
            .unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("claude"));
        assert!(msg.contains("WN_TEST_KEY_UNSET"));
    }
}
