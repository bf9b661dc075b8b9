use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::BoxFuture;

use weft_core::error::{Result, WeftError};
use weft_core::traits::{AgentStore, CredentialResolver, Tool};
use weft_core::types::*;
use weft_core::workflow::Agent;

/// Returns its input serialized as JSON.
pub struct EchoTool {
    name: String,
}

impl EchoTool {
    pub fn named(name: &str) -> Self {
        Self { name: name.to_string() }
    }
}

impl Default for EchoTool {
    fn default() -> Self {
        Self::named("echo")
    }
}

impl Tool for EchoTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "Echo the input back."
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({"type": "object"})
    }

    fn execute(&self, input: serde_json::Value, _ctx: ToolContext) -> BoxFuture<'_, Result<ToolResult>> {
        Box::pin(async move { Ok(ToolResult::success(input.to_string())) })
    }
}

/// Always returns an error result.
pub struct FailingTool {
    name: String,
}

impl FailingTool {
    pub fn named(name: &str) -> Self {
        Self { name: name.to_string() }
    }
}

impl Tool for FailingTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "Always fails."
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({"type": "object"})
    }

    fn execute(&self, _input: serde_json::Value, _ctx: ToolContext) -> BoxFuture<'_, Result<ToolResult>> {
        Box::pin(async { Ok(ToolResult::error("upstream returned 500")) })
    }
}

/// Sleeps before answering.
pub struct SlowTool {
    name: String,
    delay: Duration,
}

impl SlowTool {
    pub fn new(name: &str, delay: Duration) -> Self {
        Self {
            name: name.to_string(),
            delay,
        }
    }
}

impl Tool for SlowTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "Sleeps, then succeeds."
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({"type": "object"})
    }

    fn execute(&self, _input: serde_json::Value, _ctx: ToolContext) -> BoxFuture<'_, Result<ToolResult>> {
        Box::pin(async move {
            tokio::time::sleep(self.delay).await;
            Ok(ToolResult::success("done"))
        })
    }

    fn timeout_secs(&self) -> u64 {
        3600
    }
}

/// One call seen by [`RecordingTool`].
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub input: serde_json::Value,
    pub ctx: ToolContext,
}

/// Records every call and answers with a fixed response.
#[derive(Clone)]
pub struct RecordingTool {
    name: String,
    response: String,
    integration: Option<String>,
    calls: Arc<Mutex<Vec<RecordedCall>>>,
}

impl RecordingTool {
    pub fn new(name: &str, response: &str) -> Self {
        Self {
            name: name.to_string(),
            response: response.to_string(),
            integration: None,
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn with_integration(mut self, integration: &str) -> Self {
        self.integration = Some(integration.to_string());
        self
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }
}

impl Tool for RecordingTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "Records calls."
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({"type": "object", "properties": {"body": {"type": "string"}}})
    }

    fn execute(&self, input: serde_json::Value, ctx: ToolContext) -> BoxFuture<'_, Result<ToolResult>> {
        self.calls.lock().unwrap().push(RecordedCall { input, ctx });
        let response = self.response.clone();
        Box::pin(async move { Ok(ToolResult::success(response)) })
    }

    fn integration(&self) -> Option<&str> {
        self.integration.as_deref()
    }
}

/// Fixed credentials keyed by (user, integration).
#[derive(Default)]
pub struct StaticCredentials {
    entries: HashMap<(String, String), Credential>,
    fail: bool,
}

impl StaticCredentials {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, user_id: &str, integration: &str, data: serde_json::Value) -> Self {
        let data = match data {
            serde_json::Value::Object(map) => map,
            _ => serde_json::Map::new(),
        };
        self.entries.insert(
            (user_id.to_string(), integration.to_string()),
            Credential {
                integration_type: integration.to_string(),
                name: format!("{} credential", integration),
                data,
            },
        );
        self
    }

    /// Every lookup errors, as if the secret store were unreachable.
    pub fn unavailable() -> Self {
        Self {
            entries: HashMap::new(),
            fail: true,
        }
    }
}

impl CredentialResolver for StaticCredentials {
    fn resolve<'a>(&'a self, user_id: &'a str, integration_type: &'a str) -> BoxFuture<'a, Result<Option<Credential>>> {
        Box::pin(async move {
            if self.fail {
                return Err(WeftError::Database("credential store unavailable".into()));
            }
            Ok(self
                .entries
                .get(&(user_id.to_string(), integration_type.to_string()))
                .cloned())
        })
    }
}

/// In-memory agent store.
#[derive(Default, Clone)]
pub struct MemoryAgentStore {
    agents: Arc<Mutex<HashMap<String, Agent>>>,
}

impl MemoryAgentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_agent(self, agent: Agent) -> Self {
        self.agents.lock().unwrap().insert(agent.id.clone(), agent);
        self
    }
}

impl AgentStore for MemoryAgentStore {
    fn get_agent<'a>(&'a self, agent_id: &'a str, user_id: &'a str) -> BoxFuture<'a, Result<Agent>> {
        Box::pin(async move {
            self.agents
                .lock()
                .unwrap()
                .get(agent_id)
                .filter(|a| a.user_id == user_id)
                .cloned()
                .ok_or_else(|| WeftError::AgentNotFound(agent_id.to_string()))
        })
    }

    fn save_agent(&self, agent: Agent) -> BoxFuture<'_, Result<Agent>> {
        Box::pin(async move {
            self.agents.lock().unwrap().insert(agent.id.clone(), agent.clone());
            Ok(agent)
        })
    }
}
