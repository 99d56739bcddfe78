//! OpenAI Chat Completions provider.
//!
//! Keeps the role list unified (system messages stay inline), re-encodes
//! tool-call arguments as JSON strings, and reassembles streamed tool-call
//! fragments keyed by their `index`.

use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde_json::{json, Value};

use crate::core_types::{CompletionResponse, Message, Role, StreamChunk, TokenUsage, ToolCall};
use crate::errors::AgentError;
use crate::llm::stream::{response_lines, sse_data};
use crate::llm::{resolve_api_key, ChunkStream, Provider, ProviderConfig, ToolMetadata};

const OPENAI_API_BASE: &str = "https://api.openai.com/v1";

#[derive(Debug, Clone)]
pub struct OpenAiProvider {
    client: Client,
    api_key: String,
    api_base: String,
    model: String,
}

impl OpenAiProvider {
    pub fn new(api_key: String, model: String, api_base: Option<String>) -> Self {
        Self {
            client: Client::new(),
            api_key,
            api_base: api_base
                .map(|b| b.trim_end_matches('/').to_string())
                .unwrap_or_else(|| OPENAI_API_BASE.to_string()),
            model,
        }
    }

    fn format_role(role: &Role) -> &'static str {
        match role {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }

    fn format_messages(&self, messages: &[Message]) -> Vec<Value> {
        messages
            .iter()
            .map(|msg| {
                // Tool results are re-tagged to the vendor's tool role.
                if let Some(tool_call_id) = &msg.tool_call_id {
                    let mut message = json!({
                        "role": "tool",
                        "tool_call_id": tool_call_id,
                        "content": msg.content,
                    });
                    if let Some(name) = &msg.name {
                        message["name"] = json!(name);
                    }
                    return message;
                }

                let mut message = json!({
                    "role": Self::format_role(&msg.role),
                    "content": msg.content,
                });

                if msg.role == Role::Assistant {
                    if let Some(tool_calls) = &msg.tool_calls {
                        if !tool_calls.is_empty() {
                            let formatted: Vec<Value> = tool_calls
                                .iter()
                                .map(|tc| {
                                    json!({
                                        "id": tc.id,
                                        "type": "function",
                                        "function": {
                                            "name": tc.name,
                                            "arguments": tc.arguments.to_string(),
                                        }
                                    })
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

    fn format_tools(tools: &[ToolMetadata]) -> Vec<Value> {
        tools
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
        });

        if let Some(tools) = tools {
            if !tools.is_empty() {
                body["tools"] = Self::format_tools(tools).into();
                body["tool_choice"] = "auto".into();
            }
        }

        if stream {
            body["stream"] = true.into();
            body["stream_options"] = json!({"include_usage": true});
        }

        body
    }

    async fn send(&self, body: &Value) -> Result<reqwest::Response, AgentError> {
        let url = format!("{}/chat/completions", self.api_base);
        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
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
                "API request failed with status {}: {}",
                status, error_text
            )));
        }

        Ok(response)
    }

    fn parse_response(&self, response: Value) -> Result<CompletionResponse, AgentError> {
        let message = response["choices"]
            .as_array()
            .and_then(|c| c.first())
            .map(|choice| &choice["message"])
            .ok_or_else(|| AgentError::Parsing("No choices in response".to_string()))?;

        let content = message["content"].as_str().unwrap_or_default().to_string();

        let mut tool_calls = Vec::new();
        if let Some(calls) = message["tool_calls"].as_array() {
            for call in calls {
                let Some(name) = call["function"]["name"].as_str() else {
                    continue;
                };
                let arguments_str = call["function"]["arguments"].as_str().unwrap_or("{}");
                let arguments: Value = serde_json::from_str(arguments_str)
                    .unwrap_or_else(|_| Value::Object(Default::default()));
                tool_calls.push(ToolCall {
                    id: call["id"]
                        .as_str()
                        .map(str::to_string)
                        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
                    name: name.to_string(),
                    arguments,
                });
            }
        }

        Ok(CompletionResponse {
            content,
            tool_calls,
            usage: parse_usage(&response["usage"]),
        })
    }
}

fn parse_usage(usage: &Value) -> Option<TokenUsage> {
    let obj = usage.as_object()?;
    Some(TokenUsage {
        input_tokens: obj.get("prompt_tokens").and_then(Value::as_u64).unwrap_or(0) as u32,
        output_tokens: obj
            .get("completion_tokens")
            .and_then(Value::as_u64)
            .unwrap_or(0) as u32,
    })
}

/// Accumulates streamed `tool_calls[i]` fragments keyed by their `index`.
#[derive(Default)]
struct StreamAssembler {
    calls: std::collections::BTreeMap<u64, PendingCall>,
    usage: Option<TokenUsage>,
}

#[derive(Default)]
struct PendingCall {
    id: Option<String>,
    name: String,
    arguments: String,
}

impl StreamAssembler {
    fn handle_event(&mut self, event: &Value) -> Vec<StreamChunk> {
        let mut out = Vec::new();

        if let Some(usage) = parse_usage(&event["usage"]) {
            self.usage = Some(usage);
        }

        let Some(choice) = event["choices"].as_array().and_then(|c| c.first()) else {
            return out;
        };
        let delta = &choice["delta"];

        if let Some(text) = delta["content"].as_str() {
            if !text.is_empty() {
                out.push(StreamChunk::Delta {
                    content: text.to_string(),
                });
            }
        }

        if let Some(fragments) = delta["tool_calls"].as_array() {
            for fragment in fragments {
                let index = fragment["index"].as_u64().unwrap_or(0);
                let pending = self.calls.entry(index).or_default();
                if let Some(id) = fragment["id"].as_str() {
                    pending.id = Some(id.to_string());
                }
                if let Some(name) = fragment["function"]["name"].as_str() {
                    pending.name.push_str(name);
                }
                if let Some(args) = fragment["function"]["arguments"].as_str() {
                    pending.arguments.push_str(args);
                }
            }
        }

        out
    }

    /// Flush every accumulated call; the vendor signals completion only via
    /// the terminating `[DONE]` line, so all flushing happens there.
    fn finish(&mut self) -> Vec<StreamChunk> {
        let calls = std::mem::take(&mut self.calls);
        calls
            .into_values()
            .filter(|c| !c.name.is_empty())
            .map(|c| {
                let arguments = serde_json::from_str(&c.arguments)
                    .unwrap_or_else(|_| Value::Object(Default::default()));
                StreamChunk::ToolCall {
                    tool_call: ToolCall {
                        id: c.id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
                        name: c.name,
                        arguments,
                    },
                }
            })
            .collect()
    }
}

#[async_trait]
impl Provider for OpenAiProvider {
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
        self.parse_response(response_json)
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
            (Box::pin(lines), StreamAssembler::default(), Vec::new(), false),
            |(mut lines, mut assembler, mut pending, mut finished)| async move {
                loop {
                    if let Some(chunk) = pending.pop() {
                        return Some((Ok(chunk), (lines, assembler, pending, finished)));
                    }
                    if finished {
                        return None;
                    }
                    match lines.next().await {
                        Some(Ok(line)) => {
                            let Some(data) = sse_data(&line) else {
                                continue;
                            };
                            if data == "[DONE]" {
                                finished = true;
                                let mut produced = assembler.finish();
                                produced.push(StreamChunk::Done {
                                    usage: assembler.usage,
                                });
                                produced.reverse();
                                pending = produced;
                                continue;
                            }
                            let Ok(event) = serde_json::from_str::<Value>(data) else {
                                continue;
                            };
                            let mut produced = assembler.handle_event(&event);
                            produced.reverse();
                            pending = produced;
                        }
                        Some(Err(e)) => {
                            finished = true;
                            return Some((Err(e), (lines, assembler, pending, finished)));
                        }
                        None => {
                            finished = true;
                            let mut produced = assembler.finish();
                            produced.push(StreamChunk::Done {
                                usage: assembler.usage,
                            });
                            produced.reverse();
                            pending = produced;
                        }
                    }
                }
            },
        );

        Ok(Box::pin(chunks))
    }
}

/// Create an OpenAI provider from the configuration record.
pub fn create(config: &ProviderConfig, model: String) -> Result<Arc<dyn Provider>, AgentError> {
    let api_key = resolve_api_key(config, "OPENAI_API_KEY", "OpenAI")?;
    Ok(Arc::new(OpenAiProvider::new(
        api_key,
        model,
        config.base_url.clone(),
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn test_provider() -> OpenAiProvider {
        OpenAiProvider::new("test-key".into(), "gpt-4.1-mini".into(), None)
    }

    #[test]
    fn test_system_messages_stay_inline() {
        let provider = test_provider();
        let messages = vec![
            Message::system("A"),
            Message::system("B"),
            Message::user("hi"),
        ];
        let formatted = provider.format_messages(&messages);
        assert_eq!(formatted.len(), 3);
        assert_eq!(formatted[0]["role"], "system");
        assert_eq!(formatted[0]["content"], "A");
        assert_eq!(formatted[1]["role"], "system");
        assert_eq!(formatted[2]["role"], "user");
    }

    #[test]
    fn test_tool_calls_become_parallel_array_with_string_args() {
        let provider = test_provider();
        let mut assistant = Message::assistant("");
        assistant.tool_calls = Some(vec![ToolCall {
            id: "X".into(),
            name: "f".into(),
            arguments: json!({"k": 1}),
        }]);
        let messages = vec![assistant, Message::tool_result("X", "f", "OK")];

        let formatted = provider.format_messages(&messages);
        let calls = formatted[0]["tool_calls"].as_array().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0]["id"], "X");
        assert_eq!(calls[0]["type"], "function");
        assert_eq!(calls[0]["function"]["name"], "f");
        // Arguments are re-encoded as a JSON string.
        let args: Value =
            serde_json::from_str(calls[0]["function"]["arguments"].as_str().unwrap()).unwrap();
        assert_eq!(args, json!({"k": 1}));

        assert_eq!(formatted[1]["role"], "tool");
        assert_eq!(formatted[1]["tool_call_id"], "X");
        assert_eq!(formatted[1]["content"], "OK");
    }

    #[test]
    fn test_tool_schema_translation() {
        let tools = vec![ToolMetadata {
            name: "read_file".into(),
            description: "Read a file".into(),
            input_schema: json!({"type": "object"}),
        }];
        let formatted = OpenAiProvider::format_tools(&tools);
        assert_eq!(formatted[0]["type"], "function");
        assert_eq!(formatted[0]["function"]["name"], "read_file");
        assert_eq!(formatted[0]["function"]["parameters"], json!({"type": "object"}));
    }

    #[test]
    fn test_parse_response_with_tool_calls() {
        let provider = test_provider();
        let response = json!({
            "choices": [{
                "message": {
                    "content": null,
                    "tool_calls": [{
                        "id": "call_1",
                        "type": "function",
                        "function": {"name": "f", "arguments": "{\"k\":1}"}
                    }]
                }
            }],
            "usage": {"prompt_tokens": 3, "completion_tokens": 9}
        });
        let parsed = provider.parse_response(response).unwrap();
        assert_eq!(parsed.content, "");
        assert_eq!(parsed.tool_calls[0].id, "call_1");
        assert_eq!(parsed.tool_calls[0].arguments, json!({"k": 1}));
        let usage = parsed.usage.unwrap();
        assert_eq!(usage.input_tokens, 3);
        assert_eq!(usage.output_tokens, 9);
    }

    #[test]
    fn test_parse_response_text_only_round_trip() {
        let provider = test_provider();
        let response = json!({
            "choices": [{"message": {"content": "done"}}]
        });
        let parsed = provider.parse_response(response).unwrap();
        assert_eq!(parsed.content, "done");
        assert!(parsed.tool_calls.is_empty());
        assert!(parsed.usage.is_none());
    }

    #[test]
    fn test_stream_fragments_reassemble_by_index() {
        let mut assembler = StreamAssembler::default();
        assembler.handle_event(&json!({
            "choices": [{"delta": {"tool_calls": [
                {"index": 0, "id": "call_9", "function": {"name": "weather", "arguments": ""}}
            ]}}]
        }));
        assembler.handle_event(&json!({
            "choices": [{"delta": {"tool_calls": [
                {"index": 0, "function": {"arguments": "{\"city\":"}}
            ]}}]
        }));
        assembler.handle_event(&json!({
            "choices": [{"delta": {"tool_calls": [
                {"index": 0, "function": {"arguments": "\"Tokyo\"}"}}
            ]}}]
        }));

        let chunks = assembler.finish();
        assert_eq!(chunks.len(), 1);
        match &chunks[0] {
            StreamChunk::ToolCall { tool_call } => {
                assert_eq!(tool_call.id, "call_9");
                assert_eq!(tool_call.name, "weather");
                assert_eq!(tool_call.arguments, json!({"city": "Tokyo"}));
            }
            other => panic!("expected tool_call, got {:?}", other),
        }
    }

    #[test]
    fn test_stream_invalid_argument_json_falls_back() {
        let mut assembler = StreamAssembler::default();
        assembler.handle_event(&json!({
            "choices": [{"delta": {"tool_calls": [
                {"index": 0, "id": "c", "function": {"name": "f", "arguments": "{oops"}}
            ]}}]
        }));
        let chunks = assembler.finish();
        match &chunks[0] {
            StreamChunk::ToolCall { tool_call } => assert_eq!(tool_call.arguments, json!({})),
            other => panic!("expected tool_call, got {:?}", other),
        }
    }

    #[test]
    fn test_stream_usage_from_trailing_event() {
        let mut assembler = StreamAssembler::default();
        assembler.handle_event(&json!({
            "choices": [],
            "usage": {"prompt_tokens": 5, "completion_tokens": 7}
        }));
        let usage = assembler.usage.unwrap();
        assert_eq!(usage.input_tokens, 5);
        assert_eq!(usage.output_tokens, 7);
    }

    #[test]
    fn test_missing_id_synthesizes_uuid() {
        let provider = test_provider();
        let response = json!({
            "choices": [{
                "message": {
                    "tool_calls": [{"function": {"name": "f", "arguments": "{}"}}]
                }
            }]
        });
        let parsed = provider.parse_response(response).unwrap();
        assert!(uuid::Uuid::parse_str(&parsed.tool_calls[0].id).is_ok());
    }
}
