//! The conversational state machine.
//!
//! An [`AgentLoop`] drives one conversation: each user input triggers one or
//! more provider round-trips, executing tool calls between them, until the
//! model emits a terminal text-only answer. Configuration (provider, tools,
//! handler, round bound, cancellation token) is fixed at construction; only
//! the message log and the state word ever mutate.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::core_types::{Message, TokenUsage, ToolResult};
use crate::errors::AgentError;
use crate::llm::Provider;
use crate::tools::ToolRegistry;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentState {
    Idle,
    WaitingInput,
    Thinking,
    ToolRunning,
}

impl AgentState {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentState::Idle => "idle",
            AgentState::WaitingInput => "waiting_input",
            AgentState::Thinking => "thinking",
            AgentState::ToolRunning => "tool_running",
        }
    }
}

/// Observer callbacks for loop progress. All methods default to no-ops, so a
/// handler implements only what it cares about.
pub trait AgentHandler: Send + Sync {
    fn on_state(&self, _state: AgentState) {}
    fn on_response(&self, _content: &str) {}
    fn on_tool_start(&self, _name: &str, _arguments: &Value) {}
    fn on_tool_end(&self, _name: &str, _result: &ToolResult) {}
    fn on_error(&self, _message: &str) {}
    fn on_usage(&self, _usage: &TokenUsage) {}
}

/// Handler with every callback left as a no-op.
pub struct NoopHandler;

impl AgentHandler for NoopHandler {}

#[derive(Debug, Clone, Default)]
pub struct AgentLoopConfig {
    /// Upper bound on tool rounds per input; `None` is unbounded.
    pub max_tool_rounds: Option<usize>,
}

pub struct AgentLoop {
    provider: Arc<dyn Provider>,
    registry: Arc<ToolRegistry>,
    handler: Arc<dyn AgentHandler>,
    config: AgentLoopConfig,
    cancel: CancellationToken,
    messages: Vec<Message>,
    state: AgentState,
}

impl AgentLoop {
    pub fn new(
        provider: Arc<dyn Provider>,
        registry: Arc<ToolRegistry>,
        handler: Arc<dyn AgentHandler>,
        config: AgentLoopConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            provider,
            registry,
            handler,
            config,
            cancel,
            messages: Vec::new(),
            state: AgentState::Idle,
        }
    }

    /// Seed the log with a leading system message.
    pub fn with_system_message(mut self, system: impl Into<String>) -> Self {
        self.messages.push(Message::system(system));
        self
    }

    pub fn state(&self) -> AgentState {
        self.state
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Replace the cancellation token (after an abort consumed the old one).
    pub fn reset_cancel_token(&mut self, token: CancellationToken) {
        self.cancel = token;
    }

    fn set_state(&mut self, state: AgentState) {
        self.state = state;
        self.handler.on_state(state);
    }

    /// Drive one user input to its terminal assistant text.
    pub async fn step(&mut self, input: impl Into<String>) -> Result<String, AgentError> {
        if self.cancel.is_cancelled() {
            return Err(AgentError::Aborted);
        }

        self.messages.push(Message::user(input.into()));

        let mut rounds = 0usize;
        loop {
            if self.cancel.is_cancelled() {
                return Err(AgentError::Aborted);
            }

            self.set_state(AgentState::Thinking);

            let tools = {
                let list = self.registry.list();
                if list.is_empty() {
                    None
                } else {
                    Some(list)
                }
            };

            // Abort interrupts the round-trip itself, not just the gaps
            // between calls; the log keeps the user message either way.
            let cancel = self.cancel.clone();
            let completion = tokio::select! {
                _ = cancel.cancelled() => return Err(AgentError::Aborted),
                completion = self.provider.complete(self.messages.clone(), tools) => completion,
            };
            let response = match completion {
                Ok(response) => response,
                Err(e) => {
                    let message = e.to_string();
                    log::error!("Provider call failed: {}", message);
                    self.handler.on_error(&message);
                    self.set_state(AgentState::Idle);
                    return Err(e);
                }
            };

            if let Some(usage) = &response.usage {
                self.handler.on_usage(usage);
            }

            if response.tool_calls.is_empty() {
                self.messages.push(Message::assistant(response.content.clone()));
                self.handler.on_response(&response.content);
                self.set_state(AgentState::Idle);
                return Ok(response.content);
            }

            // One assistant message carries both the (possibly empty) text
            // and the calls; intermediate text still surfaces.
            let mut assistant = Message::assistant(response.content.clone());
            assistant.tool_calls = Some(response.tool_calls.clone());
            self.messages.push(assistant);
            if !response.content.is_empty() {
                self.handler.on_response(&response.content);
            }

            for tool_call in &response.tool_calls {
                if self.cancel.is_cancelled() {
                    return Err(AgentError::Aborted);
                }

                let Some(tool) = self.registry.get(&tool_call.name) else {
                    let output = format!("Tool not found: {}", tool_call.name);
                    log::warn!("{}", output);
                    self.messages.push(Message::tool_result(
                        tool_call.id.clone(),
                        tool_call.name.clone(),
                        output,
                    ));
                    continue;
                };

                self.set_state(AgentState::ToolRunning);
                self.handler
                    .on_tool_start(&tool_call.name, &tool_call.arguments);

                let result = tool.execute(tool_call.arguments.clone()).await;
                self.messages.push(Message::tool_result(
                    tool_call.id.clone(),
                    tool_call.name.clone(),
                    result.model_text(),
                ));
                self.handler.on_tool_end(&tool_call.name, &result);
            }

            rounds += 1;
            if let Some(max) = self.config.max_tool_rounds {
                if rounds >= max {
                    let err = AgentError::MaxToolRounds(max);
                    self.handler.on_error(&err.to_string());
                    self.set_state(AgentState::Idle);
                    return Err(err);
                }
            }
        }
    }

    /// Drain an input source, stepping each item.
    ///
    /// A failed turn does not end the run; cancellation does, with
    /// `Err(Aborted)`. The optional hook runs after every turn and stops the
    /// run cleanly when it returns `true`.
    pub async fn run<F, Fut>(
        &mut self,
        mut inputs: mpsc::Receiver<String>,
        mut loop_hook: Option<F>,
    ) -> Result<(), AgentError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = bool>,
    {
        loop {
            self.set_state(AgentState::WaitingInput);
            let cancel = self.cancel.clone();
            let input = tokio::select! {
                _ = cancel.cancelled() => return Err(AgentError::Aborted),
                input = inputs.recv() => input,
            };
            let Some(input) = input else {
                self.set_state(AgentState::Idle);
                return Ok(());
            };

            if let Err(e) = self.step(input).await {
                if matches!(e, AgentError::Aborted) {
                    return Err(e);
                }
                log::warn!("Turn failed: {}", e);
            }

            if let Some(hook) = loop_hook.as_mut() {
                if hook().await {
                    self.set_state(AgentState::Idle);
                    return Ok(());
                }
            }
        }
    }
}
