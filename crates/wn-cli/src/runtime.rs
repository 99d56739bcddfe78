//! Runtime wiring: the RPC handler that owns the agent loop, the
//! notification bridge, and startup construction.

use std::path::PathBuf;
use std::sync::{Arc, Mutex as StdMutex};

use serde_json::{json, Value};
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

use wn_core::agent::{AgentHandler, AgentLoop, AgentLoopConfig, AgentState};
use wn_core::config::{load_config, RootConfig};
use wn_core::errors::AgentError;
use wn_core::llm::{create_provider, Provider};
use wn_core::resources::{ResourceSet, RESOURCE_DIR_NAME};
use wn_core::rpc::RpcHandler;
use wn_core::subagent::SubAgentRunner;
use wn_core::subagent::worker::standard_tools;
use wn_core::tools::subagent_tools::register_subagent_tools;
use wn_core::tools::{McpManager, ToolRegistry};
use wn_core::core_types::{TokenUsage, ToolResult};

/// Bridges agent loop callbacks to outbound RPC notifications.
pub struct NotifyingHandler {
    out: mpsc::UnboundedSender<String>,
}

impl NotifyingHandler {
    pub fn new(out: mpsc::UnboundedSender<String>) -> Self {
        Self { out }
    }

    fn notify(&self, method: &str, params: Value) {
        let line = wn_core::rpc::protocol::encode_notification(method, Some(&params));
        let _ = self.out.send(line);
    }
}

impl AgentHandler for NotifyingHandler {
    fn on_state(&self, state: AgentState) {
        // waiting_input is internal; the wire knows idle/thinking/tool_running.
        if state == AgentState::WaitingInput {
            return;
        }
        self.notify("stateChange", json!({"state": state.as_str()}));
    }

    fn on_response(&self, content: &str) {
        self.notify("response", json!({"content": content}));
    }

    fn on_tool_start(&self, name: &str, arguments: &Value) {
        self.notify(
            "toolExec",
            json!({"event": "start", "name": name, "args": arguments}),
        );
    }

    fn on_tool_end(&self, name: &str, result: &ToolResult) {
        self.notify(
            "toolExec",
            json!({"event": "end", "name": name, "result": result}),
        );
    }

    fn on_error(&self, message: &str) {
        self.notify("log", json!({"level": "error", "message": message}));
    }

    fn on_usage(&self, usage: &TokenUsage) {
        self.notify(
            "log",
            json!({
                "level": "info",
                "message": format!(
                    "usage: {} in / {} out",
                    usage.input_tokens, usage.output_tokens
                ),
            }),
        );
    }
}

struct LoopState {
    agent: AgentLoop,
    provider_name: String,
    model: String,
    persona: String,
}

/// The serve-mode RPC handler. The agent loop lives behind an async mutex;
/// `input` and `configUpdate` serialize on it, while `abort` only touches
/// the shared cancellation token so it can land mid-turn.
pub struct Runtime {
    config: RootConfig,
    resources: Arc<ResourceSet>,
    registry: Arc<ToolRegistry>,
    handler: Arc<NotifyingHandler>,
    state: Mutex<LoopState>,
    current_turn: StdMutex<CancellationToken>,
}

impl Runtime {
    pub fn new(
        config: RootConfig,
        resources: Arc<ResourceSet>,
        registry: Arc<ToolRegistry>,
        handler: Arc<NotifyingHandler>,
        provider: Arc<dyn Provider>,
        provider_name: String,
        model: String,
        persona: String,
    ) -> Self {
        let agent = build_loop(
            provider,
            registry.clone(),
            handler.clone(),
            &resources,
            &persona,
        );
        Self {
            config,
            resources,
            registry,
            handler,
            state: Mutex::new(LoopState {
                agent,
                provider_name,
                model,
                persona,
            }),
            current_turn: StdMutex::new(CancellationToken::new()),
        }
    }

    /// Cancel whatever turn is in flight and arm a fresh token for the next.
    pub fn abort(&self) {
        let mut guard = self.current_turn.lock().unwrap();
        guard.cancel();
        *guard = CancellationToken::new();
    }

    async fn handle_input(&self, params: Option<Value>) -> Result<Value, AgentError> {
        let text = params
            .as_ref()
            .and_then(|p| p.get("text"))
            .and_then(Value::as_str)
            .ok_or_else(|| AgentError::InvalidParams("input requires a 'text' string".to_string()))?
            .to_string();

        let mut state = self.state.lock().await;
        let token = self.current_turn.lock().unwrap().clone();
        state.agent.reset_cancel_token(token);

        let accepted = match state.agent.step(text).await {
            Ok(_) => true,
            Err(e) => {
                log::warn!("Turn failed: {}", e);
                false
            }
        };
        Ok(json!({"accepted": accepted}))
    }

    async fn handle_config_update(&self, params: Option<Value>) -> Result<Value, AgentError> {
        let params = params.unwrap_or_else(|| json!({}));
        let persona = params.get("persona").and_then(Value::as_str);
        let provider = params.get("provider").and_then(Value::as_str);
        let model = params.get("model").and_then(Value::as_str);

        if persona.is_none() && provider.is_none() && model.is_none() {
            return Ok(json!({"applied": false}));
        }

        // Waits for any in-flight turn, which therefore finishes on the
        // provider it started with.
        let mut state = self.state.lock().await;

        let provider_name = provider.unwrap_or(&state.provider_name).to_string();
        let model_name = model.unwrap_or(&state.model).to_string();
        let persona_name = persona.unwrap_or(&state.persona).to_string();

        let Some(provider_config) = self.config.provider_config(&provider_name).cloned() else {
            log::warn!("configUpdate: no providers entry for '{}'", provider_name);
            return Ok(json!({"applied": false}));
        };
        if persona.is_some() && !self.resources.personas.contains_key(&persona_name) {
            log::warn!("configUpdate: persona '{}' not found", persona_name);
            return Ok(json!({"applied": false}));
        }

        let new_provider = match create_provider(&provider_name, &provider_config, &model_name) {
            Ok(provider) => provider,
            Err(e) => {
                log::warn!("configUpdate: {}", e);
                return Ok(json!({"applied": false}));
            }
        };

        state.agent = build_loop(
            new_provider,
            self.registry.clone(),
            self.handler.clone(),
            &self.resources,
            &persona_name,
        );
        state.provider_name = provider_name;
        state.model = model_name;
        state.persona = persona_name;

        Ok(json!({"applied": true}))
    }
}

#[async_trait::async_trait]
impl RpcHandler for Runtime {
    async fn handle(&self, method: &str, params: Option<Value>) -> Result<Value, AgentError> {
        match method {
            "input" => self.handle_input(params).await,
            "abort" => {
                self.abort();
                Ok(json!({"aborted": true}))
            }
            "configUpdate" => self.handle_config_update(params).await,
            other => Err(AgentError::MethodNotFound(other.to_string())),
        }
    }
}

fn build_loop(
    provider: Arc<dyn Provider>,
    registry: Arc<ToolRegistry>,
    handler: Arc<NotifyingHandler>,
    resources: &ResourceSet,
    persona: &str,
) -> AgentLoop {
    let agent = AgentLoop::new(
        provider,
        registry,
        handler,
        AgentLoopConfig::default(),
        CancellationToken::new(),
    );
    match resources.personas.get(persona) {
        Some(persona) => agent.with_system_message(persona.content.clone()),
        None => agent,
    }
}

/// Everything `serve` needs, constructed or dead.
pub struct Startup {
    pub runtime: Arc<Runtime>,
    pub mcp: Option<McpManager>,
}

/// Load config and resources, build the provider, registry and tool
/// connections. Errors here are fatal to `serve`.
pub async fn start(
    provider_flag: Option<String>,
    model_flag: Option<String>,
    persona_flag: Option<String>,
    out: mpsc::UnboundedSender<String>,
) -> Result<Startup, AgentError> {
    let mut config = load_root_config().await?;
    if let Some(provider) = provider_flag {
        config.default_provider = provider;
    }
    if let Some(model) = model_flag {
        config.default_model = Some(model);
    }
    if let Some(persona) = persona_flag {
        config.default_persona = persona;
    }

    let resources = Arc::new(ResourceSet::load().await?);

    let provider_name = config.default_provider.clone();
    let provider_config = config
        .provider_config(&provider_name)
        .cloned()
        .unwrap_or_default();
    let model = config
        .default_model
        .clone()
        .unwrap_or_else(|| wn_core::llm::default_model(&provider_name).to_string());
    let provider = create_provider(&provider_name, &provider_config, &model)?;

    let runner = Arc::new(SubAgentRunner::new(config.clone(), resources.clone()));
    let mut registry = ToolRegistry::new();
    standard_tools(&mut registry)?;
    register_subagent_tools(&mut registry, runner)?;

    let mcp = match McpManager::connect_all(&config.mcp.servers).await {
        Ok(startup) => {
            for warning in &startup.warnings {
                log::warn!("tool server: {}", warning);
            }
            for tool in startup.tools {
                if let Err(e) = registry.register_external(tool) {
                    log::warn!("{}", e);
                }
            }
            Some(startup.manager)
        }
        Err(e) => {
            log::error!("{}", e);
            None
        }
    };

    let persona = config.default_persona.clone();
    if !resources.personas.contains_key(&persona) {
        log::warn!("Persona '{}' not found; serving without one", persona);
    }

    let handler = Arc::new(NotifyingHandler::new(out));
    let runtime = Arc::new(Runtime::new(
        config,
        resources,
        Arc::new(registry),
        handler,
        provider,
        provider_name,
        model,
        persona,
    ));

    Ok(Startup { runtime, mcp })
}

/// Project-local `.wn/config.json` wins over the global `~/.wn/` one.
async fn load_root_config() -> Result<RootConfig, AgentError> {
    let local = PathBuf::from(RESOURCE_DIR_NAME);
    if local.join("config.json").is_file() {
        return load_config(&local).await;
    }
    if let Some(home) = dirs::home_dir() {
        return load_config(&home.join(RESOURCE_DIR_NAME)).await;
    }
    Ok(RootConfig::default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use wn_core::core_types::{CompletionResponse, Message, StreamChunk};
    use wn_core::llm::{ChunkStream, ToolMetadata};
    use wn_core::resources::Persona;

    struct StubProvider {
        content: String,
    }

    #[async_trait]
    impl Provider for StubProvider {
        async fn complete(
            &self,
            _messages: Vec<Message>,
            _tools: Option<Vec<ToolMetadata>>,
        ) -> Result<CompletionResponse, AgentError> {
            Ok(CompletionResponse {
                content: self.content.clone(),
                tool_calls: vec![],
                usage: None,
            })
        }

        async fn stream(
            &self,
            _messages: Vec<Message>,
            _tools: Option<Vec<ToolMetadata>>,
        ) -> Result<ChunkStream, AgentError> {
            Ok(Box::pin(futures::stream::iter(vec![Ok(
                StreamChunk::Done { usage: None },
            )])))
        }
    }

    fn test_runtime(out: mpsc::UnboundedSender<String>) -> Arc<Runtime> {
        let mut config = RootConfig::default();
        config.providers.insert(
            "claude".to_string(),
            wn_core::llm::ProviderConfig {
                api_key: Some("test-key".to_string()),
                ..Default::default()
            },
        );
        let mut resources = ResourceSet::default();
        resources.personas.insert(
            "default".to_string(),
            Persona {
                name: "default".to_string(),
                content: "helpful".to_string(),
            },
        );
        let handler = Arc::new(NotifyingHandler::new(out));
        Arc::new(Runtime::new(
            config,
            Arc::new(resources),
            Arc::new(ToolRegistry::new()),
            handler,
            Arc::new(StubProvider {
                content: "hello".to_string(),
            }),
            "claude".to_string(),
            "m".to_string(),
            "default".to_string(),
        ))
    }

    #[tokio::test]
    async fn test_input_accepted_and_notifications_flow() {
        let (out_tx, mut out_rx) = mpsc::unbounded_channel();
        let runtime = test_runtime(out_tx);

        let result = runtime
            .handle("input", Some(json!({"text": "hi"})))
            .await
            .unwrap();
        assert_eq!(result, json!({"accepted": true}));

        let mut methods = Vec::new();
        while let Ok(line) = out_rx.try_recv() {
            let value: Value = serde_json::from_str(&line).unwrap();
            methods.push((
                value["method"].as_str().unwrap().to_string(),
                value["params"].clone(),
            ));
        }
        assert_eq!(
            methods[0],
            ("stateChange".to_string(), json!({"state": "thinking"}))
        );
        assert_eq!(
            methods[1],
            ("response".to_string(), json!({"content": "hello"}))
        );
        assert_eq!(
            methods[2],
            ("stateChange".to_string(), json!({"state": "idle"}))
        );
    }

    #[tokio::test]
    async fn test_abort_returns_true_and_cancels_next_token() {
        let (out_tx, _out_rx) = mpsc::unbounded_channel();
        let runtime = test_runtime(out_tx);
        let result = runtime.handle("abort", None).await.unwrap();
        assert_eq!(result, json!({"aborted": true}));
        // The replacement token is fresh, so the next input still runs.
        let result = runtime
            .handle("input", Some(json!({"text": "hi"})))
            .await
            .unwrap();
        assert_eq!(result, json!({"accepted": true}));
    }

    #[tokio::test]
    async fn test_config_update_unknown_provider_keeps_loop() {
        let (out_tx, _out_rx) = mpsc::unbounded_channel();
        let runtime = test_runtime(out_tx);

        let result = runtime
            .handle("configUpdate", Some(json!({"provider": "unknown"})))
            .await
            .unwrap();
        assert_eq!(result, json!({"applied": false}));

        // Previous loop is preserved: input still answers from the stub.
        let result = runtime
            .handle("input", Some(json!({"text": "hi"})))
            .await
            .unwrap();
        assert_eq!(result, json!({"accepted": true}));
    }

    #[tokio::test]
    async fn test_config_update_valid_provider_applies() {
        let (out_tx, _out_rx) = mpsc::unbounded_channel();
        let runtime = test_runtime(out_tx);

        // ollama builds without credentials, so the swap succeeds.
        let mut_config_result = runtime
            .handle("configUpdate", Some(json!({"provider": "ollama", "model": "m"})))
            .await;
        // Without an "ollama" providers-table entry this is applied: false.
        assert_eq!(mut_config_result.unwrap(), json!({"applied": false}));

        let result = runtime
            .handle("configUpdate", Some(json!({"model": "claude-x"})))
            .await
            .unwrap();
        assert_eq!(result, json!({"applied": true}));
        assert_eq!(runtime.state.lock().await.model, "claude-x");
    }

    #[tokio::test]
    async fn test_config_update_empty_params_touches_nothing() {
        let (out_tx, _out_rx) = mpsc::unbounded_channel();
        let runtime = test_runtime(out_tx);
        let result = runtime.handle("configUpdate", Some(json!({}))).await.unwrap();
        assert_eq!(result, json!({"applied": false}));
        assert_eq!(runtime.state.lock().await.model, "m");
    }

    #[tokio::test]
    async fn test_input_without_text_is_invalid_params() {
        let (out_tx, _out_rx) = mpsc::unbounded_channel();
        let runtime = test_runtime(out_tx);
        let err = runtime
            .handle("input", Some(json!({})))
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::InvalidParams(_)));
    }

    #[tokio::test]
    async fn test_unknown_method_is_method_not_found() {
        let (out_tx, _out_rx) = mpsc::unbounded_channel();
        let runtime = test_runtime(out_tx);
        let err = runtime.handle("nope", None).await.unwrap_err();
        assert!(matches!(err, AgentError::MethodNotFound(_)));
    }
}
