//! Sub-agent runner: resolve a sub-agent's configuration, start an isolated
//! worker process, and track its handle.
//!
//! Workers are full OS processes running this binary's hidden `worker`
//! subcommand; the only traffic across the boundary is the JSON payload line
//! on the worker's stdin and NDJSON status messages on its stdout. Resolution
//! failures (unknown persona, skill, or provider) are terminal before any
//! process is created.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use crate::config::RootConfig;
use crate::errors::AgentError;
use crate::llm::ProviderConfig;
use crate::resources::ResourceSet;
use crate::tools::McpServerConfig;

pub mod worker;

/// The caller's request: which persona, skills, provider, and task.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubAgentSpec {
    pub persona: Option<String>,
    #[serde(default)]
    pub skills: Vec<String>,
    pub provider: Option<String>,
    pub model: Option<String>,
    pub task: String,
}

/// Everything a worker needs, as plain data. No live resources cross the
/// process boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerPayload {
    pub id: String,
    pub task: String,
    pub system_message: String,
    pub provider_name: String,
    pub provider_config: ProviderConfig,
    pub model: String,
    pub tool_servers: Vec<McpServerConfig>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubAgentStatus {
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct SubAgentHandle {
    pub id: String,
    pub status: SubAgentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
}

/// One status line from a worker. Unrecognized shapes are ignored for
/// forward compatibility.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum WorkerMessage {
    Result { data: String },
    Error { error: String },
    Log { level: String, message: String },
}

type HandleMap = Arc<Mutex<HashMap<String, SubAgentHandle>>>;

pub struct SubAgentRunner {
    config: RootConfig,
    resources: Arc<ResourceSet>,
    handles: HandleMap,
    kill_tokens: Mutex<HashMap<String, CancellationToken>>,
}

impl SubAgentRunner {
    pub fn new(config: RootConfig, resources: Arc<ResourceSet>) -> Self {
        Self {
            config,
            resources,
            handles: Arc::new(Mutex::new(HashMap::new())),
            kill_tokens: Mutex::new(HashMap::new()),
        }
    }

    /// Resolve a spec against the providers table, persona table, and skill
    /// table. `Err` carries the terminal failure text verbatim.
    pub fn resolve_payload(&self, id: &str, spec: &SubAgentSpec) -> Result<WorkerPayload, String> {
        let persona_name = spec
            .persona
            .clone()
            .unwrap_or_else(|| self.config.default_persona.clone());
        let persona = self
            .resources
            .personas
            .get(&persona_name)
            .ok_or_else(|| format!("Persona not found: {}", persona_name))?;

        let mut skill_bodies = Vec::new();
        for skill_name in &spec.skills {
            let skill = self
                .resources
                .skills
                .get(skill_name)
                .ok_or_else(|| format!("Skill not found: {}", skill_name))?;
            skill_bodies.push(skill.body.clone());
        }

        let provider_name = spec
            .provider
            .clone()
            .unwrap_or_else(|| self.config.default_provider.clone());
        let provider_config = self
            .config
            .provider_config(&provider_name)
            .cloned()
            .ok_or_else(|| format!("Provider not found: {}", provider_name))?;

        let model = spec
            .model
            .clone()
            .or_else(|| self.config.default_model.clone())
            .unwrap_or_else(|| crate::llm::default_model(&provider_name).to_string());

        let system_message = if skill_bodies.is_empty() {
            persona.content.clone()
        } else {
            format!("{}\n\n{}", persona.content, skill_bodies.join("\n\n"))
        };

        Ok(WorkerPayload {
            id: id.to_string(),
            task: spec.task.clone(),
            system_message,
            provider_name,
            provider_config,
            model,
            tool_servers: self.config.mcp.servers.clone(),
        })
    }

    /// Fill a spec's unset fields from a named agent definition.
    pub fn apply_agent_defaults(
        &self,
        spec: &mut SubAgentSpec,
        agent_name: &str,
    ) -> Result<(), String> {
        let def = self
            .resources
            .agents
            .get(agent_name)
            .ok_or_else(|| format!("Agent not found: {}", agent_name))?;
        if spec.persona.is_none() {
            spec.persona = def.persona.clone();
        }
        if spec.provider.is_none() {
            spec.provider = def.provider.clone();
        }
        if spec.model.is_none() {
            spec.model = def.model.clone();
        }
        if spec.skills.is_empty() {
            spec.skills = def.skills.clone();
        }
        Ok(())
    }

    /// Resolve and start a worker; on resolution failure return a terminal
    /// `failed` handle without creating a process.
    pub async fn spawn(&self, spec: SubAgentSpec) -> SubAgentHandle {
        let id = uuid::Uuid::new_v4().to_string();

        let payload = match self.resolve_payload(&id, &spec) {
            Ok(payload) => payload,
            Err(message) => {
                let handle = SubAgentHandle {
                    id: id.clone(),
                    status: SubAgentStatus::Failed,
                    result: Some(message),
                };
                self.handles.lock().unwrap().insert(id, handle.clone());
                return handle;
            }
        };

        match self.start_worker(payload).await {
            Ok(handle) => handle,
            Err(e) => {
                let handle = SubAgentHandle {
                    id: id.clone(),
                    status: SubAgentStatus::Failed,
                    result: Some(format!("Failed to start worker: {}", e)),
                };
                self.handles.lock().unwrap().insert(id, handle.clone());
                handle
            }
        }
    }

    async fn start_worker(&self, payload: WorkerPayload) -> Result<SubAgentHandle, AgentError> {
        let exe = std::env::current_exe()
            .map_err(|e| AgentError::Io(format!("cannot locate executable: {}", e)))?;
        let payload_line = serde_json::to_string(&payload)?;
        let id = payload.id.clone();

        let mut child = Command::new(exe)
            .arg("worker")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| AgentError::Io(format!("spawn failed: {}", e)))?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| AgentError::Io("worker stdin unavailable".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| AgentError::Io("worker stdout unavailable".to_string()))?;

        stdin.write_all(payload_line.as_bytes()).await?;
        stdin.write_all(b"\n").await?;
        drop(stdin);

        let handle = SubAgentHandle {
            id: id.clone(),
            status: SubAgentStatus::Running,
            result: None,
        };
        self.handles
            .lock()
            .unwrap()
            .insert(id.clone(), handle.clone());

        let kill_token = CancellationToken::new();
        self.kill_tokens
            .lock()
            .unwrap()
            .insert(id.clone(), kill_token.clone());

        // Reader task: one terminal message decides the handle; exit status
        // is only consulted when no message arrived.
        let handles = self.handles.clone();
        let reader_handles = handles.clone();
        let reader_id = id.clone();
        let reader = tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if let Ok(value) = serde_json::from_str::<Value>(&line) {
                    handle_worker_message(&reader_handles, &reader_id, &value);
                }
            }
        });

        let monitor_id = id.clone();
        tokio::spawn(async move {
            let status = tokio::select! {
                status = child.wait() => status,
                _ = kill_token.cancelled() => {
                    let _ = child.kill().await;
                    child.wait().await
                }
            };
            let _ = reader.await;

            let mut handles = handles.lock().unwrap();
            if let Some(handle) = handles.get_mut(&monitor_id) {
                match status {
                    Ok(status) if status.success() => {
                        // The worker's own message is authoritative.
                    }
                    Ok(status) => {
                        if handle.status == SubAgentStatus::Running {
                            handle.status = SubAgentStatus::Failed;
                            handle.result =
                                Some(format!("Worker exited with {}", status));
                        }
                    }
                    Err(e) => {
                        if handle.status == SubAgentStatus::Running {
                            handle.status = SubAgentStatus::Failed;
                            handle.result = Some(format!("Worker error: {}", e));
                        }
                    }
                }
            }
        });

        Ok(handle)
    }

    /// Terminate a worker forcibly; unknown ids are no-ops.
    pub fn stop(&self, id: &str) {
        let token = self.kill_tokens.lock().unwrap().get(id).cloned();
        let Some(token) = token else {
            return;
        };
        token.cancel();
        let mut handles = self.handles.lock().unwrap();
        if let Some(handle) = handles.get_mut(id) {
            handle.status = SubAgentStatus::Failed;
            handle.result.get_or_insert_with(|| "Stopped".to_string());
        }
    }

    /// Snapshot of every handle, running and terminal.
    pub fn list(&self) -> Vec<SubAgentHandle> {
        let mut handles: Vec<_> = self.handles.lock().unwrap().values().cloned().collect();
        handles.sort_by(|a, b| a.id.cmp(&b.id));
        handles
    }

    pub fn get(&self, id: &str) -> Option<SubAgentHandle> {
        self.handles.lock().unwrap().get(id).cloned()
    }
}

/// Apply one worker message to its handle.
fn handle_worker_message(handles: &HandleMap, id: &str, value: &Value) {
    match value["type"].as_str() {
        Some("result") => {
            let data = value["data"].as_str().unwrap_or_default().to_string();
            let mut handles = handles.lock().unwrap();
            if let Some(handle) = handles.get_mut(id) {
                handle.status = SubAgentStatus::Completed;
                handle.result = Some(data);
            }
        }
        Some("error") => {
            let error = value["error"].as_str().unwrap_or_default().to_string();
            let mut handles = handles.lock().unwrap();
            if let Some(handle) = handles.get_mut(id) {
                handle.status = SubAgentStatus::Failed;
                handle.result = Some(error);
            }
        }
        Some("log") => {
            let message = value["message"].as_str().unwrap_or_default();
            match value["level"].as_str() {
                Some("error") => log::error!("[sub-agent {}] {}", id, message),
                Some("warn") => log::warn!("[sub-agent {}] {}", id, message),
                _ => log::info!("[sub-agent {}] {}", id, message),
            }
        }
        _ => {
            // Unknown shapes are ignored for forward compatibility.
        }
    }
}
