use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::FutureExt;
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use weft_core::config::EngineConfig;
use weft_core::error::{ErrorKind, Result, WeftError};
use weft_core::execution::*;
use weft_core::types::TokenUsage;
use weft_core::workflow::{Block, BlockType, Workflow};

use crate::checker::{BlockChecker, CheckRequest, Verdict};
use crate::executor::{BlockContext, BlockExecutor, BlockOutput};
use crate::graph::ExecutionPlan;
use crate::registry::ExecutorRegistry;
use crate::response::build_api_response;

/// Runs workflows: validates the graph, schedules blocks as their upstream
/// completes, and streams per-block progress.
pub struct WorkflowEngine {
    registry: Arc<ExecutorRegistry>,
    checker: Option<Arc<BlockChecker>>,
    config: EngineConfig,
}

impl WorkflowEngine {
    pub fn new(registry: Arc<ExecutorRegistry>, config: EngineConfig) -> Self {
        Self {
            registry,
            checker: None,
            config,
        }
    }

    /// Enable the optional block checker (still off per run unless requested).
    pub fn with_checker(mut self, checker: BlockChecker) -> Self {
        self.checker = Some(Arc::new(checker));
        self
    }

    pub fn registry(&self) -> &Arc<ExecutorRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Reject malformed workflows without running anything.
    pub fn validate(&self, workflow: &Workflow) -> Result<ExecutionPlan> {
        ExecutionPlan::validate(workflow, &self.registry)
    }

    /// Execute `workflow` against a trigger input.
    ///
    /// Progress events are pushed onto `updates`, which is closed (dropped)
    /// when this returns, on every path. Structural problems are returned as
    /// errors before any block state exists; block failures are recorded in
    /// the result instead.
    pub async fn execute(
        &self,
        workflow: &Workflow,
        input: Map<String, Value>,
        updates: mpsc::Sender<ExecutionUpdate>,
        options: ExecutionOptions,
        cancel: CancellationToken,
    ) -> Result<ExecutionResult> {
        let plan = self.validate(workflow)?;
        let execution_id = options
            .execution_id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        let run = Run::new(self, workflow, plan, execution_id, input, options, updates, cancel);
        Ok(run.drive().await)
    }

    /// Standardized response for a finished run, using the configured result policy.
    pub fn build_api_response(
        &self,
        result: &ExecutionResult,
        workflow: &Workflow,
        execution_id: &str,
        duration_ms: u64,
    ) -> ExecutionApiResponse {
        build_api_response(result, workflow, execution_id, duration_ms, self.config.result_policy)
    }
}

/// Work handed to a spawned block task.
struct BlockJob {
    index: usize,
    block: Block,
    inputs: Map<String, Value>,
    executor: Arc<dyn BlockExecutor>,
    ctx: BlockContext,
    timeout_secs: u64,
    check: Option<CheckJob>,
}

struct CheckJob {
    checker: Arc<BlockChecker>,
    goal: Option<String>,
    model_id: Option<String>,
}

struct BlockFinished {
    index: usize,
    result: Result<BlockOutput>,
    verdict: Option<Verdict>,
    check_usage: TokenUsage,
}

async fn run_block(job: BlockJob) -> BlockFinished {
    let BlockJob {
        index,
        block,
        inputs,
        executor,
        ctx,
        timeout_secs,
        check,
    } = job;
    let cancel = ctx.cancel.clone();

    let work = AssertUnwindSafe(executor.execute(&block, &inputs, &ctx)).catch_unwind();
    let result = tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(WeftError::Cancelled),
        outcome = tokio::time::timeout(Duration::from_secs(timeout_secs), work) => match outcome {
            Ok(Ok(result)) => result,
            Ok(Err(panic)) => Err(WeftError::Internal(format!("executor panicked: {}", panic_message(&*panic)))),
            Err(_) => Err(WeftError::BlockTimeout {
                block_id: block.id.clone(),
                timeout_secs,
            }),
        },
    };

    let mut finished = BlockFinished {
        index,
        result,
        verdict: None,
        check_usage: TokenUsage::default(),
    };

    if let (Ok(output), Some(job)) = (&finished.result, check) {
        let outputs = weft_core::strip_reserved(&output.outputs);
        let outcome = job
            .checker
            .check(CheckRequest {
                block: &block,
                inputs: &inputs,
                outputs: &outputs,
                goal: job.goal.as_deref(),
                model_id: job.model_id.as_deref(),
                cancel: &cancel,
            })
            .await;
        finished.verdict = outcome.verdict;
        finished.check_usage = outcome.usage;
    }

    // A block is not done until its check is, so a cancel during the check still cancels it.
    if finished.result.is_ok() && cancel.is_cancelled() {
        finished.result = Err(WeftError::Cancelled);
        finished.verdict = None;
    }

    finished
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Mutable state of one execution.
struct Run<'a> {
    engine: &'a WorkflowEngine,
    workflow: &'a Workflow,
    plan: ExecutionPlan,
    index: HashMap<&'a str, usize>,
    execution_id: String,
    user_id: Option<String>,
    trigger: Map<String, Value>,
    options: ExecutionOptions,
    updates: mpsc::Sender<ExecutionUpdate>,
    cancel: CancellationToken,
    states: Vec<BlockExecutionState>,
    outputs: Vec<Option<Map<String, Value>>>,
    /// Upstream blocks of each block that have not completed yet.
    waiting: Vec<usize>,
    usage: TokenUsage,
    tasks: JoinSet<BlockFinished>,
    started_at: chrono::DateTime<chrono::Utc>,
    receiver_gone: bool,
    /// Set when cancellation fired before every block task drained.
    cancelled: bool,
}

impl<'a> Run<'a> {
    #[allow(clippy::too_many_arguments)]
    fn new(
        engine: &'a WorkflowEngine,
        workflow: &'a Workflow,
        plan: ExecutionPlan,
        execution_id: String,
        input: Map<String, Value>,
        options: ExecutionOptions,
        updates: mpsc::Sender<ExecutionUpdate>,
        cancel: CancellationToken,
    ) -> Self {
        let user_id = input
            .get(weft_core::USER_ID_KEY)
            .and_then(Value::as_str)
            .map(str::to_string);
        let trigger = weft_core::strip_reserved(&input);
        let n = workflow.blocks.len();
        let waiting = plan.upstream.iter().map(Vec::len).collect();

        Self {
            engine,
            workflow,
            index: workflow
                .blocks
                .iter()
                .enumerate()
                .map(|(i, b)| (b.id.as_str(), i))
                .collect(),
            plan,
            execution_id,
            user_id,
            trigger,
            options,
            updates,
            cancel,
            states: vec![BlockExecutionState::default(); n],
            outputs: vec![None; n],
            waiting,
            usage: TokenUsage::default(),
            tasks: JoinSet::new(),
            started_at: chrono::Utc::now(),
            receiver_gone: false,
            cancelled: false,
        }
    }

    async fn drive(mut self) -> ExecutionResult {
        let clock = Instant::now();
        info!(
            execution_id = %self.execution_id,
            workflow_id = %self.workflow.id,
            blocks = self.workflow.blocks.len(),
            "Executing workflow"
        );

        for index in self.plan.entries() {
            self.start(index).await;
        }

        while let Some(joined) = self.tasks.join_next().await {
            match joined {
                Ok(finished) => self.finish(finished).await,
                Err(e) => error!(execution_id = %self.execution_id, error = %e, "Block task aborted"),
            }
        }
        self.cancelled = self.cancel.is_cancelled();

        // Anything left over was cut off by cancellation or a lost task.
        for index in self.plan.order.clone() {
            match self.states[index].status {
                BlockStatus::Running => {
                    self.fail(index, WeftError::Internal("block task ended without a result".into()))
                        .await
                }
                BlockStatus::Pending => self.skip(index).await,
                _ => {}
            }
        }

        let result = self.into_result();
        info!(
            execution_id = %result.execution_id,
            status = %result.status,
            completed = result.count(BlockStatus::Completed),
            failed = result.count(BlockStatus::Failed),
            skipped = result.count(BlockStatus::Skipped),
            duration_ms = clock.elapsed().as_millis() as u64,
            "Workflow finished"
        );
        result
    }

    /// Inputs for a block: the trigger input for entry blocks, otherwise the
    /// values delivered on each incoming connection plus every upstream
    /// block's full output under its normalized id.
    fn block_inputs(&self, index: usize) -> Map<String, Value> {
        if self.plan.upstream[index].is_empty() {
            let mut inputs = self.trigger.clone();
            inputs
                .entry("input")
                .or_insert_with(|| Value::Object(self.trigger.clone()));
            return inputs;
        }

        let mut inputs = Map::new();
        for &up in &self.plan.upstream[index] {
            let output = self.outputs[up].clone().unwrap_or_default();
            inputs.insert(self.workflow.blocks[up].normalized_id.clone(), Value::Object(output));
        }
        for conn in self.workflow.incoming(&self.workflow.blocks[index].id) {
            let Some(output) = self
                .index
                .get(conn.source_block_id.as_str())
                .and_then(|&src| self.outputs[src].as_ref())
            else {
                continue;
            };
            inputs.insert(conn.target_input.clone(), port_value(output, &conn.source_output));
        }
        inputs
    }

    async fn start(&mut self, index: usize) {
        let block = self.workflow.blocks[index].clone();
        let inputs = self.block_inputs(index);

        let state = &mut self.states[index];
        state.status = BlockStatus::Running;
        state.started_at = Some(chrono::Utc::now());
        state.inputs = inputs.clone();

        self.emit(ExecutionUpdate {
            block_id: block.id.clone(),
            status: BlockStatus::Running,
            inputs: Some(inputs.clone()),
            output: None,
            error: None,
            error_kind: None,
        })
        .await;

        let executor = match self.engine.registry.get(block.block_type()) {
            Ok(executor) => executor,
            Err(e) => {
                self.fail(index, e).await;
                return;
            }
        };

        let config = &self.engine.config;
        let timeout_secs = block.timeout_secs(config.default_block_timeout_secs, config.max_block_timeout_secs);
        let check = self.check_job(&block);

        info!(
            execution_id = %self.execution_id,
            block_id = %block.id,
            block_type = %block.block_type(),
            timeout_secs,
            "Executing block"
        );

        let ctx = BlockContext {
            execution_id: self.execution_id.clone(),
            block_id: block.id.clone(),
            user_id: self.user_id.clone(),
            cancel: self.cancel.child_token(),
        };
        self.tasks.spawn(run_block(BlockJob {
            index,
            block,
            inputs,
            executor,
            ctx,
            timeout_secs,
            check,
        }));
    }

    fn check_job(&self, block: &Block) -> Option<CheckJob> {
        if !self.options.enable_block_checker {
            return None;
        }
        if !matches!(block.block_type(), BlockType::LlmInference | BlockType::CodeBlock) {
            return None;
        }
        let checker = self.engine.checker.clone()?;
        Some(CheckJob {
            checker,
            goal: self.options.workflow_goal.clone(),
            model_id: self.options.checker_model_id.clone(),
        })
    }

    async fn finish(&mut self, finished: BlockFinished) {
        let BlockFinished {
            index,
            result,
            verdict,
            check_usage,
        } = finished;
        self.usage.add(check_usage);

        let output = match result {
            Ok(output) => output,
            Err(e) => {
                self.fail(index, e).await;
                return;
            }
        };
        self.usage.add(output.usage);
        let outputs = weft_core::strip_reserved(&output.outputs);

        if let Some(verdict) = verdict.filter(|v| !v.passed) {
            let reason = if verdict.reason.is_empty() {
                "block checker rejected the output".to_string()
            } else {
                verdict.reason
            };
            let block_id = &self.workflow.blocks[index].id;
            if self.engine.config.checker.authoritative {
                warn!(block_id = %block_id, reason = %reason, "Block rejected by checker");
                self.states[index].outputs = outputs;
                self.fail(index, WeftError::CheckFailed(reason)).await;
                return;
            }
            debug!(block_id = %block_id, reason = %reason, "Block checker raised a warning");
            self.states[index].warning = Some(reason);
        }

        self.complete(index, outputs).await;
    }

    async fn complete(&mut self, index: usize, outputs: Map<String, Value>) {
        let state = &mut self.states[index];
        state.status = BlockStatus::Completed;
        state.completed_at = Some(chrono::Utc::now());
        state.outputs = outputs.clone();
        self.outputs[index] = Some(outputs.clone());

        self.emit(ExecutionUpdate {
            block_id: self.workflow.blocks[index].id.clone(),
            status: BlockStatus::Completed,
            inputs: None,
            output: Some(outputs),
            error: None,
            error_kind: None,
        })
        .await;

        for next in self.plan.downstream[index].clone() {
            self.waiting[next] = self.waiting[next].saturating_sub(1);
            if self.waiting[next] == 0
                && self.states[next].status == BlockStatus::Pending
                && !self.cancel.is_cancelled()
            {
                self.start(next).await;
            }
        }
    }

    /// Mark a block failed and skip everything downstream of it.
    async fn fail(&mut self, index: usize, err: WeftError) {
        let block_id = self.workflow.blocks[index].id.clone();
        let kind = err.kind();
        let message = err.to_string();
        if kind == ErrorKind::Cancelled {
            info!(block_id = %block_id, "Block cancelled");
        } else {
            warn!(block_id = %block_id, kind = %kind, error = %message, "Block failed");
        }

        let state = &mut self.states[index];
        state.status = BlockStatus::Failed;
        state.completed_at = Some(chrono::Utc::now());
        state.error = Some(message.clone());
        state.error_kind = Some(kind);

        self.emit(ExecutionUpdate {
            block_id,
            status: BlockStatus::Failed,
            inputs: None,
            output: None,
            error: Some(message),
            error_kind: Some(kind),
        })
        .await;

        for dependent in self.plan.descendants(index) {
            if self.states[dependent].status == BlockStatus::Pending {
                self.skip(dependent).await;
            }
        }
    }

    async fn skip(&mut self, index: usize) {
        self.states[index].status = BlockStatus::Skipped;
        self.emit(ExecutionUpdate {
            block_id: self.workflow.blocks[index].id.clone(),
            status: BlockStatus::Skipped,
            inputs: None,
            output: None,
            error: None,
            error_kind: None,
        })
        .await;
    }

    async fn emit(&mut self, update: ExecutionUpdate) {
        if self.receiver_gone {
            return;
        }
        if self.updates.send(update).await.is_err() {
            debug!(execution_id = %self.execution_id, "Update receiver dropped");
            self.receiver_gone = true;
        }
    }

    fn into_result(self) -> ExecutionResult {
        let total = self.states.len();
        let completed = self
            .states
            .iter()
            .filter(|s| s.status == BlockStatus::Completed)
            .count();
        let cancelled = self.cancelled;

        let status = if cancelled {
            ExecutionStatus::Failed
        } else if completed == total {
            ExecutionStatus::Completed
        } else if completed == 0 {
            ExecutionStatus::Failed
        } else {
            ExecutionStatus::PartialFailure
        };

        let (error, error_kind) = match status {
            ExecutionStatus::Failed if cancelled => {
                (Some(WeftError::Cancelled.to_string()), Some(ErrorKind::Cancelled))
            }
            ExecutionStatus::Failed => self
                .plan
                .order
                .iter()
                .find(|&&i| self.states[i].status == BlockStatus::Failed)
                .map(|&i| {
                    let state = &self.states[i];
                    (
                        Some(format!(
                            "block {} failed: {}",
                            self.workflow.blocks[i].id,
                            state.error.as_deref().unwrap_or("unknown error")
                        )),
                        state.error_kind,
                    )
                })
                .unwrap_or((None, None)),
            _ => (None, None),
        };

        let mut output = Map::new();
        for &i in &self.plan.order {
            if let Some(out) = &self.outputs[i] {
                output.insert(self.workflow.blocks[i].normalized_id.clone(), Value::Object(out.clone()));
            }
        }

        let block_states = self
            .workflow
            .blocks
            .iter()
            .map(|b| b.id.clone())
            .zip(self.states)
            .collect();

        ExecutionResult {
            execution_id: self.execution_id,
            status,
            output,
            block_states,
            error,
            error_kind,
            usage: self.usage,
            started_at: self.started_at,
            completed_at: chrono::Utc::now(),
        }
    }
}

/// Value delivered on a connection port: the named output, or the whole
/// output object for the default `output` port.
fn port_value(output: &Map<String, Value>, port: &str) -> Value {
    match output.get(port) {
        Some(value) => value.clone(),
        None if port == "output" => Value::Object(output.clone()),
        None => Value::Null,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::future::BoxFuture;
    use serde_json::json;
    use weft_core::workflow::Connection;
    use weft_test_utils::{
        llm_block, model_config, tool_block, variable_read, variable_set, workflow, RecordingTool, ScriptedLlm,
        StaticCredentials,
    };
    use weft_tools::{ToolInvoker, ToolRegistry};

    struct PanickingExecutor;

    impl BlockExecutor for PanickingExecutor {
        fn execute<'a>(
            &'a self,
            _block: &'a Block,
            _inputs: &'a Map<String, Value>,
            _ctx: &'a BlockContext,
        ) -> BoxFuture<'a, Result<BlockOutput>> {
            Box::pin(async { panic!("bad executor") })
        }
    }

    fn registry(llm: &ScriptedLlm, tools: Vec<RecordingTool>, config: &EngineConfig) -> ExecutorRegistry {
        let mut registry = ToolRegistry::new();
        for tool in tools {
            registry.register(tool);
        }
        let invoker = ToolInvoker::new(Arc::new(registry)).with_credentials(Arc::new(
            StaticCredentials::new().with("u1", "custom_webhook", json!({"webhook_url": "https://hooks.test"})),
        ));
        ExecutorRegistry::with_defaults(Arc::new(llm.clone()), invoker, model_config("gpt-4o"), config)
    }

    fn engine(llm: &ScriptedLlm, tools: Vec<RecordingTool>, config: EngineConfig) -> WorkflowEngine {
        let checker = BlockChecker::new(Arc::new(llm.clone()), &model_config("gpt-4o"), &config.checker);
        WorkflowEngine::new(Arc::new(registry(llm, tools, &config)), config).with_checker(checker)
    }

    async fn run(
        engine: &WorkflowEngine,
        wf: &Workflow,
        input: Value,
        options: ExecutionOptions,
    ) -> (Result<ExecutionResult>, Vec<ExecutionUpdate>) {
        let (tx, mut rx) = mpsc::channel(100);
        let collector = tokio::spawn(async move {
            let mut seen = Vec::new();
            while let Some(update) = rx.recv().await {
                seen.push(update);
            }
            seen
        });
        let input = input.as_object().cloned().unwrap_or_default();
        let result = engine.execute(wf, input, tx, options, CancellationToken::new()).await;
        (result, collector.await.unwrap())
    }

    fn events_for(updates: &[ExecutionUpdate], block_id: &str) -> Vec<BlockStatus> {
        updates
            .iter()
            .filter(|u| u.block_id == block_id)
            .map(|u| u.status)
            .collect()
    }

    fn summarize_then_notify() -> Workflow {
        workflow(
            vec![
                variable_read("Start", "text"),
                llm_block("Summarize", "Summarize: {{Start.text}}"),
                tool_block("Notify", "send_webhook", json!({"body": "{{Summarize.response}}"})),
            ],
            vec![Connection::new("Start", "Summarize"), Connection::new("Summarize", "Notify")],
        )
    }

    #[tokio::test]
    async fn one_running_and_one_terminal_event_per_block() {
        let llm = ScriptedLlm::new().then_text("A greeting.");
        let engine = engine(&llm, vec![RecordingTool::new("send_webhook", "HTTP 200")], EngineConfig::default());
        let (result, updates) = run(
            &engine,
            &summarize_then_notify(),
            json!({"text": "hello", "__user_id__": "u1"}),
            ExecutionOptions::default(),
        )
        .await;
        let result = result.unwrap();

        assert_eq!(result.status, ExecutionStatus::Completed);
        for id in ["Start", "Summarize", "Notify"] {
            assert_eq!(events_for(&updates, id), vec![BlockStatus::Running, BlockStatus::Completed]);
        }
        let first = &updates[0];
        assert_eq!(first.block_id, "Start");
        assert_eq!(first.inputs.as_ref().unwrap()["input"], json!({"text": "hello"}));
        assert!(!first.inputs.as_ref().unwrap().contains_key("__user_id__"));
        assert_eq!(result.usage.total(), 15);
        assert_eq!(result.output["Summarize"], json!({"response": "A greeting."}));
    }

    #[tokio::test]
    async fn ports_deliver_named_outputs() {
        let wf = workflow(
            vec![
                variable_read("Start", "text"),
                variable_set("Greet", "greeting", "Hi {{topic}} / {{Start.text}} / {{input.text}}"),
            ],
            vec![
                Connection::new("Start", "Greet").ports("text", "topic"),
                Connection::new("Start", "Greet"),
            ],
        );
        let engine = engine(&ScriptedLlm::new(), vec![], EngineConfig::default());
        let (result, _) = run(&engine, &wf, json!({"text": "hello"}), ExecutionOptions::default()).await;
        let result = result.unwrap();
        assert_eq!(result.output["Greet"]["greeting"], "Hi hello / hello / hello");
        let inputs = &result.block_states["Greet"].inputs;
        assert_eq!(inputs["topic"], "hello");
        assert_eq!(inputs["input"], json!({"text": "hello"}));
    }

    #[tokio::test]
    async fn validation_errors_close_the_sink_without_events() {
        let wf = workflow(
            vec![variable_read("a", "x"), variable_read("b", "x")],
            vec![Connection::new("a", "b"), Connection::new("b", "a")],
        );
        let engine = engine(&ScriptedLlm::new(), vec![], EngineConfig::default());
        let (result, updates) = run(&engine, &wf, json!({}), ExecutionOptions::default()).await;
        assert_eq!(result.unwrap_err().kind(), ErrorKind::Validation);
        assert!(updates.is_empty());
    }

    #[tokio::test]
    async fn advisory_checker_records_a_warning() {
        let llm = ScriptedLlm::new()
            .then_text("Something unrelated.")
            .then_text(r#"{"passed": false, "reason": "does not summarize the input"}"#);
        let engine = engine(&llm, vec![], EngineConfig::default());
        let wf = workflow(
            vec![variable_read("Start", "text"), llm_block("Summarize", "Summarize {{Start.text}}")],
            vec![Connection::new("Start", "Summarize")],
        );
        let options = ExecutionOptions {
            enable_block_checker: true,
            workflow_goal: Some("Summarize incoming text".into()),
            ..ExecutionOptions::default()
        };
        let (result, _) = run(&engine, &wf, json!({"text": "hello"}), options).await;
        let result = result.unwrap();

        assert_eq!(result.status, ExecutionStatus::Completed);
        let state = &result.block_states["Summarize"];
        assert_eq!(state.status, BlockStatus::Completed);
        assert_eq!(state.warning.as_deref(), Some("does not summarize the input"));
        assert_eq!(result.usage.total(), 30);
        // Variable blocks are never checked.
        assert_eq!(llm.call_count(), 2);
    }

    #[tokio::test]
    async fn authoritative_checker_fails_the_block() {
        let llm = ScriptedLlm::new()
            .then_text("Something unrelated.")
            .then_text(r#"{"passed": false, "reason": "off topic"}"#);
        let mut config = EngineConfig::default();
        config.checker.authoritative = true;
        let engine = engine(&llm, vec![RecordingTool::new("send_webhook", "HTTP 200")], config);
        let options = ExecutionOptions {
            enable_block_checker: true,
            ..ExecutionOptions::default()
        };
        let (result, updates) = run(
            &engine,
            &summarize_then_notify(),
            json!({"text": "hello", "__user_id__": "u1"}),
            options,
        )
        .await;
        let result = result.unwrap();

        assert_eq!(result.status, ExecutionStatus::PartialFailure);
        let state = &result.block_states["Summarize"];
        assert_eq!(state.status, BlockStatus::Failed);
        assert_eq!(state.error_kind, Some(ErrorKind::Validation));
        assert!(state.error.as_deref().unwrap().contains("off topic"));
        assert_eq!(events_for(&updates, "Notify"), vec![BlockStatus::Skipped]);
    }

    #[tokio::test]
    async fn checker_disabled_per_run() {
        let llm = ScriptedLlm::new().then_text("A greeting.");
        let engine = engine(&llm, vec![], EngineConfig::default());
        let wf = workflow(vec![llm_block("Summarize", "hi")], vec![]);
        let (result, _) = run(&engine, &wf, json!({}), ExecutionOptions::default()).await;
        assert_eq!(result.unwrap().status, ExecutionStatus::Completed);
        assert_eq!(llm.call_count(), 1);
    }

    #[tokio::test]
    async fn panicking_executor_fails_only_its_block() {
        let llm = ScriptedLlm::new().then_text("fine");
        let config = EngineConfig::default();
        let registry = registry(&llm, vec![], &config);
        registry.register(BlockType::Variable, Arc::new(PanickingExecutor));
        let engine = WorkflowEngine::new(Arc::new(registry), config);

        let wf = workflow(vec![variable_read("Broken", "x"), llm_block("Fine", "hi")], vec![]);
        let (result, _) = run(&engine, &wf, json!({}), ExecutionOptions::default()).await;
        let result = result.unwrap();
        assert_eq!(result.status, ExecutionStatus::PartialFailure);
        let broken = &result.block_states["Broken"];
        assert_eq!(broken.error_kind, Some(ErrorKind::Internal));
        assert!(broken.error.as_deref().unwrap().contains("bad executor"));
    }

    #[tokio::test]
    async fn execution_id_from_options() {
        let engine = engine(&ScriptedLlm::new(), vec![], EngineConfig::default());
        let wf = workflow(vec![variable_read("Start", "text")], vec![]);
        let options = ExecutionOptions {
            execution_id: Some("exec-42".into()),
            ..ExecutionOptions::default()
        };
        let (result, _) = run(&engine, &wf, json!({"text": "x"}), options).await;
        assert_eq!(result.unwrap().execution_id, "exec-42");

        let (result, _) = run(&engine, &wf, json!({"text": "x"}), ExecutionOptions::default()).await;
        assert_eq!(result.unwrap().execution_id.len(), 36);
    }
}
