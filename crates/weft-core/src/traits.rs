use futures::future::BoxFuture;
use futures::stream::BoxStream;
use serde_json::{Map, Value};

use crate::config::ModelConfig;
use crate::error::Result;
use crate::execution::{ExecutionApiResponse, ExecutionRecord};
use crate::types::*;
use crate::workflow::Agent;

/// LLM client: streaming chat completions.
pub trait LlmClient: Send + Sync + 'static {
    /// Send a chat request and receive a stream of deltas.
    fn chat_stream(
        &self,
        config: &ModelConfig,
        messages: Vec<ChatMessage>,
        tools: &[ToolDefinition],
        format: ResponseFormat,
    ) -> BoxFuture<'_, Result<BoxStream<'_, Result<StreamDelta>>>>;
}

/// Tool: extensible tool execution.
pub trait Tool: Send + Sync + 'static {
    /// Tool name (used in LLM tool calls and `code_block` configs).
    fn name(&self) -> &str;

    /// Human-readable description.
    fn description(&self) -> &str;

    /// JSON Schema for tool input.
    fn input_schema(&self) -> serde_json::Value;

    /// Execute the tool with given input and context.
    fn execute(
        &self,
        input: serde_json::Value,
        ctx: ToolContext,
    ) -> BoxFuture<'_, Result<ToolResult>>;

    /// Timeout in seconds for this tool.
    fn timeout_secs(&self) -> u64 {
        30
    }

    /// Integration whose credential this tool needs, overriding the name-based mapping.
    fn integration(&self) -> Option<&str> {
        None
    }
}

/// Credential lookup keyed by user and integration type.
pub trait CredentialResolver: Send + Sync + 'static {
    /// `Ok(None)` when the user has no credential for the integration.
    fn resolve<'a>(
        &'a self,
        user_id: &'a str,
        integration_type: &'a str,
    ) -> BoxFuture<'a, Result<Option<Credential>>>;
}

/// Agent and workflow lookup.
pub trait AgentStore: Send + Sync + 'static {
    /// Fails with `AgentNotFound` when the agent does not exist or belongs to another user.
    fn get_agent<'a>(&'a self, agent_id: &'a str, user_id: &'a str) -> BoxFuture<'a, Result<Agent>>;

    /// Insert or replace an agent, bumping its workflow version on structural change.
    fn save_agent(&self, agent: Agent) -> BoxFuture<'_, Result<Agent>>;
}

/// Optional execution history persistence.
pub trait ExecutionStore: Send + Sync + 'static {
    fn create_execution<'a>(
        &'a self,
        agent_id: &'a str,
        user_id: &'a str,
        input: &'a Map<String, Value>,
    ) -> BoxFuture<'a, Result<ExecutionRecord>>;

    fn complete_execution<'a>(
        &'a self,
        execution_id: &'a str,
        response: &'a ExecutionApiResponse,
    ) -> BoxFuture<'a, Result<()>>;

    fn get_execution<'a>(&'a self, execution_id: &'a str) -> BoxFuture<'a, Result<Option<ExecutionRecord>>>;
}

/// Per-user daily execution quota.
pub trait ExecutionLimiter: Send + Sync + 'static {
    /// Remaining runs for today; -1 means unlimited.
    fn remaining<'a>(&'a self, user_id: &'a str) -> BoxFuture<'a, Result<i64>>;

    fn increment<'a>(&'a self, user_id: &'a str) -> BoxFuture<'a, Result<()>>;
}
