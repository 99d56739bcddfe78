//! Local Ollama provider.
//!
//! Pure HTTP against a local `/api/chat` endpoint: no credentials, system
//! messages stay inline, tool calls arrive whole (ids are synthesized), and
//! streaming is NDJSON with a terminal `done: true` object carrying the
//! eval counts.

use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde_json::{json, Value};

use crate::core_types::{CompletionResponse, Message, Role, StreamChunk, TokenUsage, ToolCall};
use crate::errors::AgentError;
use crate::llm::stream::{ndjson_value, response_lines};
use crate::llm::{ChunkStream, Provider, ProviderConfig, ToolMetadata};

const OLLAMA_API_BASE: &str = "http://localhost:11434";

#[derive(Debug, Clone)]
pub struct OllamaProvider {
    client: Client,
    base_url: String,
    model: String,
}

impl OllamaProvider {
    pub fn new(model: String, base_url: Option<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url
                .map(|b| b.trim_end_matches('/').to_string())
                .unwrap_or_else(|| OLLAMA_API_BASE.to_string()),
            model,
        }
    }

    fn format_messages(&self, messages: &[Message]) -> Vec<Value> {
        messages
            .iter()
            .map(|msg| {
                if let Some(_call_id) = &msg.tool_call_id {
                    let mut message = json!({
                        "role": "tool",
                        "content": msg.content,
                    });
                    if let Some(name) = &msg.name {
                        message["tool_name"] = json!(name);
                    }
                    return message;
                }

                let role = match msg.role {
                    Role::System => "system",
                    Role::User => "user",
                    Role::Assistant => "assistant",
                };
                let mut message = json!({"role": role, "content": msg.content});

                if msg.role == Role::Assistant {
                    if let Some(tool_calls) = &msg.tool_calls {
                        if !tool_calls.is_empty() {
                            let formatted: Vec<Value> = tool_calls
                                .iter()
                                .map(|tc| {
                                    json!({"function": {"name": tc.name, "arguments": tc.arguments}})
                                })
                                .collect();
                            message["tool_calls"] = json!(formatted);
                        }
                    }
                }

                message
            })
            .collect()
    }

    fn build_request_body(
        &self,
        messages: &[Message],
        tools: Option<&[ToolMetadata]>,
        stream: bool,
    ) -> Value {
        let mut body = json!({
            "model": self.model,
            "messages": self.format_messages(messages),
            "stream": stream,
        });

        if let Some(tools) = tools {
            if !tools.is_empty() {
                let formatted: Vec<Value> = tools
                    .iter()
                    .map(|tool| {
                        json!({
                            "type": "function",
                            "function": {
                                "name": tool.name,
                                "description": tool.description,
                                "parameters": tool.input_schema,
                            }
                        })
                    })
                    .collect();
                body["tools"] = formatted.into();
            }
        }

        body
    }

    async fn send(&self, body: &Value) -> Result<reqwest::Response, AgentError> {
        let url = format!("{}/api/chat", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| AgentError::Provider(format!("HTTP request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(AgentError::Provider(format!(
                "Ollama API error ({}): {}",
                status, error_text
            )));
        }

        Ok(response)
    }
}

fn parse_message(message: &Value) -> (String, Vec<ToolCall>) {
    let content = message["content"].as_str().unwrap_or_default().to_string();
    let mut tool_calls = Vec::new();
    if let Some(calls) = message["tool_calls"].as_array() {
        for call in calls {
            let Some(name) = call["function"]["name"].as_str() else {
                continue;
            };
            tool_calls.push(ToolCall {
                id: uuid::Uuid::new_v4().to_string(),
                name: name.to_string(),
                arguments: call["function"]["arguments"].clone(),
            });
        }
    }
    (content, tool_calls)
}

fn parse_usage(event: &Value) -> Option<TokenUsage> {
    let input = event.get("prompt_eval_count").and_then(Value::as_u64)?;
    let output = event.get("eval_count").and_then(Value::as_u64).unwrap_or(0);
    Some(TokenUsage {
        input_tokens: input as u32,
        output_tokens: output as u32,
    })
}

#[async_trait]
impl Provider for OllamaProvider {
    async fn complete(
        &self,
        messages: Vec<Message>,
        tools: Option<Vec<ToolMetadata>>,
    ) -> Result<CompletionResponse, AgentError> {
        let body = self.build_request_body(&messages, tools.as_deref(), false);
        let response = self.send(&body).await?;
        let response_json: Value = response
            .json()
            .await
            .map_err(|e| AgentError::Parsing(format!("Invalid JSON response: {}", e)))?;

        let (content, tool_calls) = parse_message(&response_json["message"]);
        Ok(CompletionResponse {
            content,
            tool_calls,
            usage: parse_usage(&response_json),
        })
    }

    async fn stream(
        &self,
        messages: Vec<Message>,
        tools: Option<Vec<ToolMetadata>>,
    ) -> Result<ChunkStream, AgentError> {
        let body = self.build_request_body(&messages, tools.as_deref(), true);
        let response = self.send(&body).await?;

        let lines = response_lines(response);
        let chunks = futures::stream::unfold(
            (Box::pin(lines), Vec::new(), false),
            |(mut lines, mut pending, mut finished)| async move {
                loop {
                    if let Some(chunk) = pending.pop() {
                        return Some((Ok(chunk), (lines, pending, finished)));
                    }
                    if finished {
                        return None;
                    }
                    match lines.next().await {
                        Some(Ok(line)) => {
                            let Some(parsed) = ndjson_value(&line) else {
                                continue;
                            };
                            let event = match parsed {
                                Ok(event) => event,
                                Err(_) => continue,
                            };

                            let mut produced = Vec::new();
                            let (content, tool_calls) = parse_message(&event["message"]);
                            if !content.is_empty() {
                                produced.push(StreamChunk::Delta { content });
                            }
                            for tool_call in tool_calls {
                                produced.push(StreamChunk::ToolCall { tool_call });
                            }
                            if event["done"].as_bool() == Some(true) {
                                finished = true;
                                produced.push(StreamChunk::Done {
                                    usage: parse_usage(&event),
                                });
                            }
                            produced.reverse();
                            pending = produced;
                        }
                        Some(Err(e)) => {
                            finished = true;
                            return Some((Err(e), (lines, pending, finished)));
                        }
                        None => {
                            finished = true;
                            return Some((
                                Ok(StreamChunk::Done { usage: None }),
                                (lines, pending, finished),
                            ));
                        }
                    }
                }
            },
        );

        Ok(Box::pin(chunks))
    }
}

/// Create an Ollama provider. No credentials are required; `baseUrl`
/// overrides the local default.
pub fn create(config: &ProviderConfig, model: String) -> Result<Arc<dyn Provider>, AgentError> {
    Ok(Arc::new(OllamaProvider::new(model, config.base_url.clone())))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_provider() -> OllamaProvider {
        OllamaProvider::new("llama3.2".into(), None)
    }

    #[test]
    fn test_system_messages_stay_inline() {
        let provider = test_provider();
        let formatted =
            provider.format_messages(&[Message::system("sys"), Message::user("hi")]);
        assert_eq!(formatted[0]["role"], "system");
        assert_eq!(formatted[1]["role"], "user");
    }

    #[test]
    fn test_tool_result_re_tags_to_tool_role() {
        let provider = test_provider();
        let formatted = provider.format_messages(&[Message::tool_result("X", "f", "OK")]);
        assert_eq!(formatted[0]["role"], "tool");
        assert_eq!(formatted[0]["content"], "OK");
        assert_eq!(formatted[0]["tool_name"], "f");
    }

    #[test]
    fn test_parse_message_synthesizes_ids() {
        let (content, calls) = parse_message(&json!({
            "content": "",
            "tool_calls": [{"function": {"name": "f", "arguments": {"k": 1}}}]
        }));
        assert!(content.is_empty());
        assert_eq!(calls.len(), 1);
        assert!(uuid::Uuid::parse_str(&calls[0].id).is_ok());
        assert_eq!(calls[0].arguments, json!({"k": 1}));
    }

    #[test]
    fn test_parse_usage_maps_eval_counts() {
        let usage = parse_usage(&json!({
            "prompt_eval_count": 11,
            "eval_count": 22
        }))
        .unwrap();
        assert_eq!(usage.input_tokens, 11);
        assert_eq!(usage.output_tokens, 22);
        assert!(parse_usage(&json!({})).is_none());
    }

    #[test]
    fn test_default_base_url_is_local() {
        let provider = test_provider();
        assert_eq!(provider.base_url, "http://localhost:11434");
    }
}
