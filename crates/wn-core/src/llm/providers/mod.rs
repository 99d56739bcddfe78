//! Provider implementations for the supported LLM back-ends.
//!
//! Each adapter implements the common [`Provider`] trait while owning its
//! vendor's protocol, authentication, and streaming quirks.

use std::sync::Arc;

use crate::errors::AgentError;
use crate::llm::{Provider, ProviderConfig};

pub mod anthropic;
pub mod gemini;
pub mod ollama;
pub mod openai;

/// Construct a provider by name.
///
/// Fails fast with a descriptive error when required credentials are absent.
pub fn create_provider(
    name: &str,
    config: &ProviderConfig,
    model: &str,
) -> Result<Arc<dyn Provider>, AgentError> {
    let model = if model.is_empty() {
        default_model(name).to_string()
    } else {
        model.to_string()
    };

    match name {
        "claude" => anthropic::create(config, model),
        "openai" => openai::create(config, model),
        "gemini" => gemini::create(config, model),
        "ollama" => ollama::create(config, model),
        other => Err(AgentError::Config(format!(
            "Unknown provider: {}",
            other
        ))),
    }
}

/// The default model used when the configuration names none.
pub fn default_model(provider: &str) -> &'static str {
    match provider {
        "claude" => "claude-sonnet-4-20250514",
        "openai" => "gpt-4.1-mini",
        "gemini" => "gemini-2.0-flash",
        "ollama" => "llama3.2",
        _ => "claude-sonnet-4-20250514",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_provider_is_an_error() {
        let err = match create_provider("mystery", &ProviderConfig::default(), "m") {
            Err(e) => e,
            Ok(_) => panic!("expected an error"),
        };
        assert!(err.to_string().contains("mystery"));
    }

    #[test]
    fn test_ollama_needs_no_credentials() {
        let provider = create_provider("ollama", &ProviderConfig::default(), "");
        assert!(provider.is_ok());
    }

    #[test]
    fn test_empty_model_uses_default() {
        assert_eq!(default_model("gemini"), "gemini-2.0-flash");
        let config = ProviderConfig {
            api_key: Some("k".into()),
            ..Default::default()
        };
        assert!(create_provider("openai", &config, "").is_ok());
    }
}
