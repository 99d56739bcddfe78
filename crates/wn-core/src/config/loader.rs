//! Configuration loading and environment resolution.
//!
//! `${VAR}` references in any string, at any depth, are substituted from the
//! process environment; unresolved references stay literal so the raw text
//! survives for debugging.

use std::path::Path;

use regex::Regex;
use serde_json::Value;

use crate::config::types::RootConfig;
use crate::errors::AgentError;

const CONFIG_FILE: &str = "config.json";

/// Load the root configuration from a resource directory.
///
/// A missing file yields the defaults; a present-but-broken file is fatal.
pub async fn load_config(dir: &Path) -> Result<RootConfig, AgentError> {
    let path = dir.join(CONFIG_FILE);
    let content = match tokio::fs::read_to_string(&path).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            log::debug!("No config at {}, using defaults", path.display());
            return Ok(RootConfig::default());
        }
        Err(e) => {
            return Err(AgentError::Config(format!(
                "Failed to read {}: {}",
                path.display(),
                e
            )))
        }
    };

    parse_config(&content)
        .map_err(|e| AgentError::Config(format!("Failed to parse {}: {}", path.display(), e)))
}

pub fn parse_config(content: &str) -> Result<RootConfig, AgentError> {
    let mut value: Value = serde_json::from_str(content)
        .map_err(|e| AgentError::Config(format!("invalid JSON: {}", e)))?;
    substitute_env(&mut value, &|name| std::env::var(name).ok());
    serde_json::from_value(value).map_err(|e| AgentError::Config(format!("invalid config: {}", e)))
}

/// Replace `${VAR}` in every string of the value tree.
pub fn substitute_env(value: &mut Value, lookup: &dyn Fn(&str) -> Option<String>) {
    match value {
        Value::String(s) => {
            *s = substitute_str(s, lookup);
        }
        Value::Array(items) => {
            for item in items {
                substitute_env(item, lookup);
            }
        }
        Value::Object(map) => {
            for (_, item) in map.iter_mut() {
                substitute_env(item, lookup);
            }
        }
        _ => {}
    }
}

fn substitute_str(input: &str, lookup: &dyn Fn(&str) -> Option<String>) -> String {
    // Compiled per call; config loading happens once at startup.
    let pattern = Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("static pattern");
    pattern
        .replace_all(input, |caps: &regex::Captures<'_>| {
            match lookup(&caps[1]) {
                Some(value) => value,
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn lookup(name: &str) -> Option<String> {
        match name {
            "HOME_KEY" => Some("secret".to_string()),
            "PORT" => Some("8080".to_string()),
            _ => None,
        }
    }

    #[test]
    fn test_substitution_at_any_depth() {
        let mut value = json!({
            "providers": {
                "claude": {"apiKey": "${HOME_KEY}"}
            },
            "mcp": {"servers": [{"name": "s", "command": "run", "args": ["--port=${PORT}"]}]}
        });
        substitute_env(&mut value, &lookup);
        assert_eq!(value["providers"]["claude"]["apiKey"], "secret");
        assert_eq!(value["mcp"]["servers"][0]["args"][0], "--port=8080");
    }

    #[test]
    fn test_unresolved_references_stay_literal() {
        let mut value = json!({"key": "${NOT_SET} and ${HOME_KEY}"});
        substitute_env(&mut value, &lookup);
        assert_eq!(value["key"], "${NOT_SET} and secret");
    }

    #[test]
    fn test_parse_error_is_fatal() {
        let err = parse_config("{nope").unwrap_err();
        assert!(matches!(err, AgentError::Config(_)));
    }

    #[tokio::test]
    async fn test_missing_file_yields_defaults() {
        let dir = std::env::temp_dir().join(format!("wn-config-{}", uuid::Uuid::new_v4()));
        tokio::fs::create_dir_all(&dir).await.unwrap();
        let config = load_config(&dir).await.unwrap();
        assert_eq!(config.default_provider, "claude");
        let _ = tokio::fs::remove_dir_all(dir).await;
    }

    #[tokio::test]
    async fn test_file_parse_error_is_fatal() {
        let dir = std::env::temp_dir().join(format!("wn-config-{}", uuid::Uuid::new_v4()));
        tokio::fs::create_dir_all(&dir).await.unwrap();
        tokio::fs::write(dir.join("config.json"), "not json")
            .await
            .unwrap();
        assert!(load_config(&dir).await.is_err());
        let _ = tokio::fs::remove_dir_all(dir).await;
    }
}
