//! Run lifecycle shared by the websocket and REST transports.
//!
//! [`prepare`] performs every check that can reject a run before it starts
//! (daily limit, agent lookup, workflow presence and shape) and reserves an
//! execution id. [`execute`] then drives the engine to a terminal state and
//! assembles the client-facing response; it never fails.

use std::collections::BTreeMap;
use std::time::Instant;

use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use weft_core::error::{Result, WeftError};
use weft_core::execution::{
    ExecutionApiResponse, ExecutionOptions, ExecutionResult, ExecutionStatus, ExecutionUpdate,
};
use weft_core::types::TokenUsage;
use weft_core::workflow::Workflow;

use crate::state::AppState;

/// What a client asked to run.
#[derive(Debug, Clone, Default)]
pub struct RunRequest {
    pub agent_id: String,
    pub user_id: String,
    pub input: Map<String, Value>,
    pub enable_block_checker: bool,
    pub checker_model_id: Option<String>,
}

/// A run that passed every pre-start check.
#[derive(Debug, Clone)]
pub struct PreparedRun {
    pub execution_id: String,
    pub agent_id: String,
    pub user_id: String,
    pub workflow: Workflow,
    input: Map<String, Value>,
    options: ExecutionOptions,
}

/// Terminal outcome handed back to the transport.
#[derive(Debug, Clone)]
pub struct Completion {
    pub execution_id: String,
    pub status: ExecutionStatus,
    pub final_output: Map<String, Value>,
    pub duration_ms: u64,
    pub api_response: ExecutionApiResponse,
    pub error: Option<String>,
}

pub async fn prepare(state: &AppState, request: RunRequest) -> Result<PreparedRun> {
    match state.limiter.remaining(&request.user_id).await {
        Ok(0) => return Err(WeftError::Limiter("daily execution limit reached".to_string())),
        Ok(_) => {}
        Err(e) => warn!(user_id = %request.user_id, error = %e, "Limiter unavailable, allowing run"),
    }

    let agent = state.agents.get_agent(&request.agent_id, &request.user_id).await?;
    let workflow = agent.workflow.ok_or(WeftError::NoWorkflow)?;
    state.engine.validate(&workflow)?;

    let execution_id = match &state.executions {
        Some(store) => match store
            .create_execution(&request.agent_id, &request.user_id, &request.input)
            .await
        {
            Ok(record) => record.id,
            Err(e) => {
                warn!(agent_id = %request.agent_id, error = %e, "Failed to record execution start");
                uuid::Uuid::new_v4().to_string()
            }
        },
        None => uuid::Uuid::new_v4().to_string(),
    };

    if let Err(e) = state.limiter.increment(&request.user_id).await {
        warn!(user_id = %request.user_id, error = %e, "Failed to count execution");
    }

    Ok(PreparedRun {
        options: ExecutionOptions {
            execution_id: Some(execution_id.clone()),
            workflow_goal: Some(agent.description).filter(|d| !d.trim().is_empty()),
            enable_block_checker: request.enable_block_checker,
            checker_model_id: request.checker_model_id,
        },
        execution_id,
        agent_id: request.agent_id,
        user_id: request.user_id,
        workflow,
        input: request.input,
    })
}

/// Run a prepared workflow to completion, streaming block updates into `updates`.
pub async fn execute(
    state: &AppState,
    run: PreparedRun,
    updates: mpsc::Sender<ExecutionUpdate>,
    cancel: CancellationToken,
) -> Completion {
    let PreparedRun {
        execution_id,
        agent_id,
        user_id,
        workflow,
        mut input,
        options,
    } = run;
    input.insert(weft_core::USER_ID_KEY.to_string(), Value::String(user_id));

    info!(
        %execution_id,
        %agent_id,
        blocks = workflow.blocks.len(),
        has_goal = options.workflow_goal.is_some(),
        "Execution started"
    );

    let started = Instant::now();
    let result = match state
        .engine
        .execute(&workflow, input, updates, options, cancel)
        .await
    {
        Ok(result) => result,
        Err(e) => rejected_result(&execution_id, &e),
    };
    let duration_ms = started.elapsed().as_millis() as u64;

    let mut api_response = state
        .engine
        .build_api_response(&result, &workflow, &execution_id, duration_ms);
    api_response.metadata.agent_id = Some(agent_id);

    if let Some(store) = &state.executions {
        if let Err(e) = store.complete_execution(&execution_id, &api_response).await {
            warn!(%execution_id, error = %e, "Failed to record execution result");
        }
    }

    info!(%execution_id, status = %result.status, duration_ms, "Execution finished");

    Completion {
        execution_id,
        status: result.status,
        final_output: result.output,
        duration_ms,
        error: api_response.error.clone(),
        api_response,
    }
}

/// Terminal result for a run the engine refused to start.
fn rejected_result(execution_id: &str, err: &WeftError) -> ExecutionResult {
    let now = chrono::Utc::now();
    ExecutionResult {
        execution_id: execution_id.to_string(),
        status: ExecutionStatus::Failed,
        output: Map::new(),
        block_states: BTreeMap::new(),
        error: Some(err.to_string()),
        error_kind: Some(err.kind()),
        usage: TokenUsage::default(),
        started_at: now,
        completed_at: now,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use futures::future::BoxFuture;
    use weft_core::config::{EngineConfig, GatewayConfig};
    use weft_core::error::ErrorKind;
    use weft_core::traits::ExecutionLimiter;
    use weft_engine::{ExecutorRegistry, WorkflowEngine};
    use weft_test_utils::{agent, model_config, variable_read, workflow, MemoryAgentStore, ScriptedLlm};
    use weft_tools::{ToolInvoker, ToolRegistry};

    use crate::limiter::DailyLimiter;

    struct BrokenLimiter;

    impl ExecutionLimiter for BrokenLimiter {
        fn remaining<'a>(&'a self, _user_id: &'a str) -> BoxFuture<'a, Result<i64>> {
            Box::pin(async { Err(WeftError::Limiter("redis down".into())) })
        }

        fn increment<'a>(&'a self, _user_id: &'a str) -> BoxFuture<'a, Result<()>> {
            Box::pin(async { Err(WeftError::Limiter("redis down".into())) })
        }
    }

    fn state(agents: MemoryAgentStore, limiter: Arc<dyn ExecutionLimiter>) -> AppState {
        let config = EngineConfig::default();
        let invoker = ToolInvoker::new(Arc::new(ToolRegistry::new()));
        let registry =
            ExecutorRegistry::with_defaults(Arc::new(ScriptedLlm::new()), invoker, model_config("gpt-4o"), &config);
        AppState {
            config: GatewayConfig::default(),
            engine: Arc::new(WorkflowEngine::new(Arc::new(registry), config)),
            agents: Arc::new(agents),
            executions: None,
            limiter,
        }
    }

    fn request(agent_id: &str) -> RunRequest {
        RunRequest {
            agent_id: agent_id.into(),
            user_id: "u1".into(),
            input: serde_json::json!({"text": "hello"}).as_object().cloned().unwrap(),
            ..RunRequest::default()
        }
    }

    fn echo_agent() -> MemoryAgentStore {
        MemoryAgentStore::new().with_agent(agent("a1", "u1", Some(workflow(vec![variable_read("start", "text")], vec![]))))
    }

    #[tokio::test]
    async fn runs_and_builds_response() {
        let state = state(echo_agent(), Arc::new(DailyLimiter::unlimited()));
        let run = prepare(&state, request("a1")).await.unwrap();
        let id = run.execution_id.clone();

        let (tx, mut rx) = mpsc::channel(16);
        let done = execute(&state, run, tx, CancellationToken::new()).await;
        let mut seen = Vec::new();
        while let Some(update) = rx.recv().await {
            seen.push(update.status);
        }

        assert_eq!(done.execution_id, id);
        assert_eq!(done.status, ExecutionStatus::Completed);
        assert_eq!(done.api_response.result, "hello");
        assert_eq!(done.api_response.metadata.agent_id.as_deref(), Some("a1"));
        assert_eq!(done.final_output["start"], serde_json::json!({"text": "hello"}));
        assert!(done.error.is_none());
        assert_eq!(seen.len(), 2);
    }

    #[tokio::test]
    async fn limit_reached_rejects_before_start() {
        let state = state(echo_agent(), Arc::new(DailyLimiter::new(1)));
        prepare(&state, request("a1")).await.unwrap();
        let err = prepare(&state, request("a1")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Limiter);
    }

    #[tokio::test]
    async fn limiter_errors_fail_open() {
        let state = state(echo_agent(), Arc::new(BrokenLimiter));
        assert!(prepare(&state, request("a1")).await.is_ok());
    }

    #[tokio::test]
    async fn missing_agent_or_workflow() {
        let agents = echo_agent().with_agent(agent("empty", "u1", None));
        let state = state(agents, Arc::new(DailyLimiter::unlimited()));

        let err = prepare(&state, request("ghost")).await.unwrap_err();
        assert!(matches!(err, WeftError::AgentNotFound(_)));
        let err = prepare(&state, request("empty")).await.unwrap_err();
        assert!(matches!(err, WeftError::NoWorkflow));
    }
}
