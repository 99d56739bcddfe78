//! Google Gemini provider.
//!
//! Talks to the Generative Language API directly. System messages become the
//! `systemInstruction`, the assistant role is renamed to `model`, and tool
//! traffic travels as `functionCall`/`functionResponse` parts. The vendor
//! reports no tool-call ids, so the adapter synthesizes UUIDs on decode.

use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::core_types::{CompletionResponse, Message, Role, StreamChunk, TokenUsage, ToolCall};
use crate::errors::AgentError;
use crate::llm::stream::{response_lines, sse_data};
use crate::llm::{resolve_api_key, ChunkStream, Provider, ProviderConfig, ToolMetadata};

const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

pub struct GeminiProvider {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
}

#[derive(Debug, Serialize)]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
    #[serde(rename = "systemInstruction", skip_serializing_if = "Option::is_none")]
    system_instruction: Option<GeminiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<GeminiTool>>,
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiContent {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
enum GeminiPart {
    Text {
        text: String,
    },
    FunctionCall {
        #[serde(rename = "functionCall")]
        function_call: GeminiFunctionCall,
    },
    FunctionResponse {
        #[serde(rename = "functionResponse")]
        function_response: GeminiFunctionResponse,
    },
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiFunctionCall {
    name: String,
    args: Value,
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiFunctionResponse {
    name: String,
    response: Value,
}

#[derive(Debug, Serialize)]
struct GeminiTool {
    #[serde(rename = "functionDeclarations")]
    function_declarations: Vec<GeminiFunctionDeclaration>,
}

#[derive(Debug, Serialize)]
struct GeminiFunctionDeclaration {
    name: String,
    description: String,
    parameters: Value,
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
    #[serde(rename = "usageMetadata", default)]
    usage_metadata: Option<GeminiUsage>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    content: Option<GeminiContent>,
}

#[derive(Debug, Deserialize, Clone, Copy)]
struct GeminiUsage {
    #[serde(rename = "promptTokenCount", default)]
    prompt_token_count: u32,
    #[serde(rename = "candidatesTokenCount", default)]
    candidates_token_count: u32,
}

impl GeminiProvider {
    pub fn new(api_key: String, model: String, base_url: Option<String>) -> Self {
        Self {
            client: Client::new(),
            api_key,
            base_url: base_url.unwrap_or_else(|| GEMINI_API_BASE.to_string()),
            model,
        }
    }

    fn convert_messages(&self, messages: Vec<Message>) -> (Option<GeminiContent>, Vec<GeminiContent>) {
        let mut system_parts: Vec<String> = Vec::new();
        let mut contents = Vec::new();

        for message in messages {
            match message.role {
                Role::System => system_parts.push(message.content),
                Role::User => {
                    if message.tool_call_id.is_some() {
                        contents.push(GeminiContent {
                            role: Some("user".to_string()),
                            parts: vec![GeminiPart::FunctionResponse {
                                function_response: GeminiFunctionResponse {
                                    name: message.name.unwrap_or_default(),
                                    response: json!({"content": message.content}),
                                },
                            }],
                        });
                    } else {
                        contents.push(GeminiContent {
                            role: Some("user".to_string()),
                            parts: vec![GeminiPart::Text {
                                text: message.content,
                            }],
                        });
                    }
                }
                Role::Assistant => {
                    let mut parts = Vec::new();
                    if !message.content.is_empty() {
                        parts.push(GeminiPart::Text {
                            text: message.content,
                        });
                    }
                    if let Some(tool_calls) = message.tool_calls {
                        for tool_call in tool_calls {
                            parts.push(GeminiPart::FunctionCall {
                                function_call: GeminiFunctionCall {
                                    name: tool_call.name,
                                    args: tool_call.arguments,
                                },
                            });
                        }
                    }
                    contents.push(GeminiContent {
                        role: Some("model".to_string()),
                        parts,
                    });
                }
            }
        }

        let system_instruction = if system_parts.is_empty() {
            None
        } else {
            Some(GeminiContent {
                role: None,
                parts: vec![GeminiPart::Text {
                    text: system_parts.join("\n"),
                }],
            })
        };

        (system_instruction, contents)
    }

    fn convert_tools(&self, tools: Option<Vec<ToolMetadata>>) -> Option<Vec<GeminiTool>> {
        let tools = tools?;
        if tools.is_empty() {
            return None;
        }
        Some(vec![GeminiTool {
            function_declarations: tools
                .into_iter()
                .map(|tool| GeminiFunctionDeclaration {
                    name: tool.name,
                    description: tool.description,
                    parameters: tool.input_schema,
                })
                .collect(),
        }])
    }

    fn build_request(
        &self,
        messages: Vec<Message>,
        tools: Option<Vec<ToolMetadata>>,
    ) -> GeminiRequest {
        let (system_instruction, contents) = self.convert_messages(messages);
        GeminiRequest {
            contents,
            system_instruction,
            tools: self.convert_tools(tools),
        }
    }

    fn convert_response(&self, response: GeminiResponse) -> CompletionResponse {
        let mut content = String::new();
        let mut tool_calls = Vec::new();

        if let Some(candidate_content) = response
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
        {
            for part in candidate_content.parts {
                match part {
                    GeminiPart::Text { text } => content.push_str(&text),
                    GeminiPart::FunctionCall { function_call } => {
                        tool_calls.push(ToolCall {
                            id: uuid::Uuid::new_v4().to_string(),
                            name: function_call.name,
                            arguments: function_call.args,
                        });
                    }
                    GeminiPart::FunctionResponse { .. } => {}
                }
            }
        }

        CompletionResponse {
            content,
            tool_calls,
            usage: response.usage_metadata.map(|u| TokenUsage {
                input_tokens: u.prompt_token_count,
                output_tokens: u.candidates_token_count,
            }),
        }
    }

    async fn send(&self, stream: bool, request: &GeminiRequest) -> Result<reqwest::Response, AgentError> {
        let url = if stream {
            format!(
                "{}/models/{}:streamGenerateContent?alt=sse&key={}",
                self.base_url, self.model, self.api_key
            )
        } else {
            format!(
                "{}/models/{}:generateContent?key={}",
                self.base_url, self.model, self.api_key
            )
        };
        let response = self
            .client
            .post(&url)
            .header("content-type", "application/json")
            .json(request)
            .send()
            .await
            .map_err(|e| AgentError::Provider(format!("Request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(AgentError::Provider(format!(
                "Gemini API error ({}): {}",
                status, error_text
            )));
        }

        Ok(response)
    }
}

#[async_trait]
impl Provider for GeminiProvider {
    async fn complete(
        &self,
        messages: Vec<Message>,
        tools: Option<Vec<ToolMetadata>>,
    ) -> Result<CompletionResponse, AgentError> {
        let request = self.build_request(messages, tools);
        let response = self.send(false, &request).await?;
        let gemini_response: GeminiResponse = response
            .json()
            .await
            .map_err(|e| AgentError::Provider(format!("Failed to parse response: {}", e)))?;
        Ok(self.convert_response(gemini_response))
    }

    async fn stream(
        &self,
        messages: Vec<Message>,
        tools: Option<Vec<ToolMetadata>>,
    ) -> Result<ChunkStream, AgentError> {
        let request = self.build_request(messages, tools);
        let response = self.send(true, &request).await?;

        // Each SSE event is a whole GenerateContentResponse: text parts map
        // to deltas, functionCall parts arrive complete, and the last event's
        // usageMetadata rides out on the final done chunk.
        let lines = response_lines(response);
        let chunks = futures::stream::unfold(
            (Box::pin(lines), None::<TokenUsage>, Vec::new(), false),
            |(mut lines, mut usage, mut pending, mut finished)| async move {
                loop {
                    if let Some(chunk) = pending.pop() {
                        return Some((Ok(chunk), (lines, usage, pending, finished)));
                    }
                    if finished {
                        return None;
                    }
                    match lines.next().await {
                        Some(Ok(line)) => {
                            let Some(data) = sse_data(&line) else {
                                continue;
                            };
                            let Ok(event) = serde_json::from_str::<GeminiResponse>(data) else {
                                continue;
                            };
                            if let Some(u) = event.usage_metadata {
                                usage = Some(TokenUsage {
                                    input_tokens: u.prompt_token_count,
                                    output_tokens: u.candidates_token_count,
                                });
                            }
                            let mut produced = Vec::new();
                            if let Some(content) = event
                                .candidates
                                .into_iter()
                                .next()
                                .and_then(|c| c.content)
                            {
                                for part in content.parts {
                                    match part {
                                        GeminiPart::Text { text } => {
                                            produced.push(StreamChunk::Delta { content: text });
                                        }
                                        GeminiPart::FunctionCall { function_call } => {
                                            produced.push(StreamChunk::ToolCall {
                                                tool_call: ToolCall {
                                                    id: uuid::Uuid::new_v4().to_string(),
                                                    name: function_call.name,
                                                    arguments: function_call.args,
                                                },
                                            });
                                        }
                                        GeminiPart::FunctionResponse { .. } => {}
                                    }
                                }
                            }
                            produced.reverse();
                            pending = produced;
                        }
                        Some(Err(e)) => {
                            finished = true;
                            return Some((Err(e), (lines, usage, pending, finished)));
                        }
                        None => {
                            finished = true;
                            return Some((
                                Ok(StreamChunk::Done { usage }),
                                (lines, usage, pending, finished),
                            ));
                        }
                    }
                }
            },
        );

        Ok(Box::pin(chunks))
    }
}

/// Create a Gemini provider from the configuration record.
pub fn create(config: &ProviderConfig, model: String) -> Result<Arc<dyn Provider>, AgentError> {
    let api_key = resolve_api_key(config, "GEMINI_API_KEY", "Gemini")?;
    Ok(Arc::new(GeminiProvider::new(
        api_key,
        model,
        config.base_url.clone(),
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_provider() -> GeminiProvider {
        GeminiProvider::new("test-key".into(), "gemini-2.0-flash".into(), None)
    }

    #[test]
    fn test_system_becomes_instruction_and_assistant_becomes_model() {
        let provider = test_provider();
        let messages = vec![
            Message::system("A"),
            Message::system("B"),
            Message::user("hi"),
            Message::assistant("hello"),
        ];
        let (system, contents) = provider.convert_messages(messages);

        let system = system.unwrap();
        match &system.parts[0] {
            GeminiPart::Text { text } => assert_eq!(text, "A\nB"),
            other => panic!("expected text part, got {:?}", other),
        }
        assert_eq!(contents.len(), 2);
        assert_eq!(contents[0].role.as_deref(), Some("user"));
        assert_eq!(contents[1].role.as_deref(), Some("model"));
    }

    #[test]
    fn test_tool_traffic_becomes_function_parts() {
        let provider = test_provider();
        let mut assistant = Message::assistant("on it");
        assistant.tool_calls = Some(vec![ToolCall {
            id: "X".into(),
            name: "f".into(),
            arguments: json!({"k": 1}),
        }]);
        let messages = vec![assistant, Message::tool_result("X", "f", "OK")];
        let (_, contents) = provider.convert_messages(messages);

        assert_eq!(contents[0].parts.len(), 2);
        match &contents[0].parts[1] {
            GeminiPart::FunctionCall { function_call } => {
                assert_eq!(function_call.name, "f");
                assert_eq!(function_call.args, json!({"k": 1}));
            }
            other => panic!("expected functionCall, got {:?}", other),
        }
        match &contents[1].parts[0] {
            GeminiPart::FunctionResponse { function_response } => {
                assert_eq!(function_response.name, "f");
                assert_eq!(function_response.response, json!({"content": "OK"}));
            }
            other => panic!("expected functionResponse, got {:?}", other),
        }
    }

    #[test]
    fn test_tool_schema_translation() {
        let provider = test_provider();
        let tools = provider
            .convert_tools(Some(vec![ToolMetadata {
                name: "f".into(),
                description: "d".into(),
                input_schema: json!({"type": "object"}),
            }]))
            .unwrap();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].function_declarations[0].name, "f");
    }

    #[test]
    fn test_response_conversion_synthesizes_uuid_ids() {
        let provider = test_provider();
        let response: GeminiResponse = serde_json::from_value(json!({
            "candidates": [{
                "content": {
                    "role": "model",
                    "parts": [
                        {"text": "checking"},
                        {"functionCall": {"name": "f", "args": {"k": 1}}}
                    ]
                }
            }],
            "usageMetadata": {"promptTokenCount": 4, "candidatesTokenCount": 6}
        }))
        .unwrap();

        let converted = provider.convert_response(response);
        assert_eq!(converted.content, "checking");
        assert_eq!(converted.tool_calls.len(), 1);
        assert!(uuid::Uuid::parse_str(&converted.tool_calls[0].id).is_ok());
        let usage = converted.usage.unwrap();
        assert_eq!(usage.input_tokens, 4);
        assert_eq!(usage.output_tokens, 6);
    }

    #[test]
    fn test_response_without_usage_omits_it() {
        let provider = test_provider();
        let response: GeminiResponse =
            serde_json::from_value(json!({"candidates": []})).unwrap();
        let converted = provider.convert_response(response);
        assert!(converted.usage.is_none());
        assert!(converted.content.is_empty());
    }
}
