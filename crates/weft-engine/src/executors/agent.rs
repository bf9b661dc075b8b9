use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use weft_core::config::ModelConfig;
use weft_core::error::{Result, WeftError};
use weft_core::traits::LlmClient;
use weft_core::types::{ChatMessage, ResponseFormat, TokenUsage, ToolDefinition};
use weft_core::workflow::{Block, BlockConfig, LlmBlockConfig};
use weft_llm::collect_turn;
use weft_tools::{InvocationContext, ToolInvoker};

use crate::executor::{BlockContext, BlockExecutor, BlockOutput};
use crate::{schema, template};

const DEFAULT_MAX_TOOL_ROUNDS: usize = 5;

/// Runs an `llm_inference` block: renders its prompts, lets the model call
/// the block's enabled tools, and returns the final answer.
pub struct AgentExecutor {
    llm: Arc<dyn LlmClient>,
    invoker: ToolInvoker,
    model: ModelConfig,
    max_tool_rounds: usize,
}

/// Mutable state of one block's conversation.
struct Conversation {
    model: ModelConfig,
    messages: Vec<ChatMessage>,
    tools: Vec<ToolDefinition>,
    format: ResponseFormat,
    max_rounds: usize,
    /// Tool rounds used so far, shared by the correction retry.
    rounds: usize,
    invocation: InvocationContext,
    usage: TokenUsage,
    tools_used: Vec<String>,
}

impl AgentExecutor {
    pub fn new(llm: Arc<dyn LlmClient>, invoker: ToolInvoker, model: ModelConfig) -> Self {
        Self {
            llm,
            invoker,
            model,
            max_tool_rounds: DEFAULT_MAX_TOOL_ROUNDS,
        }
    }

    pub fn with_max_tool_rounds(mut self, rounds: usize) -> Self {
        self.max_tool_rounds = rounds;
        self
    }

    fn model_for(&self, config: &LlmBlockConfig) -> ModelConfig {
        let mut model = match config.model.as_deref() {
            Some(id) if !id.is_empty() => self.model.with_model(id),
            _ => self.model.clone(),
        };
        if let Some(temperature) = config.temperature {
            model.temperature = temperature;
        }
        model
    }

    /// Ask the model until it stops requesting tools, executing each request
    /// through the shared invoker.
    async fn converse(&self, conv: &mut Conversation, ctx: &BlockContext) -> Result<String> {
        loop {
            if ctx.cancel.is_cancelled() {
                return Err(WeftError::Cancelled);
            }

            let stream = self
                .llm
                .chat_stream(&conv.model, conv.messages.clone(), &conv.tools, conv.format)
                .await?;
            let turn = collect_turn(stream).await?;
            conv.usage.add(turn.usage);

            if !turn.wants_tools() {
                return Ok(turn.text);
            }
            if conv.rounds >= conv.max_rounds {
                warn!(block_id = %ctx.block_id, rounds = conv.rounds, "Tool loop limit reached");
                return Err(WeftError::ToolLoopExceeded(conv.max_rounds));
            }
            conv.rounds += 1;

            conv.messages.push(turn.to_message());
            for call in &turn.tool_calls {
                let (content, is_error) = if !conv.tools.iter().any(|t| t.name == call.name) {
                    (format!("Tool '{}' is not enabled for this block", call.name), true)
                } else {
                    debug!(block_id = %ctx.block_id, tool = %call.name, "Model requested tool");
                    match self.invoker.invoke(&call.name, call.input.clone(), &conv.invocation).await {
                        Ok(out) => (out, false),
                        Err(WeftError::Cancelled) => return Err(WeftError::Cancelled),
                        Err(e) => {
                            warn!(block_id = %ctx.block_id, tool = %call.name, error = %e, "Tool call failed");
                            (e.to_string(), true)
                        }
                    }
                };
                if !conv.tools_used.contains(&call.name) {
                    conv.tools_used.push(call.name.clone());
                }
                conv.messages.push(ChatMessage::tool_result(call.id.clone(), content, is_error));
            }
        }
    }
}

fn system_prompt(config: &LlmBlockConfig, inputs: &Map<String, Value>) -> Option<String> {
    let mut prompt = config
        .system_prompt
        .as_deref()
        .map(|t| template::render(t, inputs))
        .unwrap_or_default();

    if config.output_format == ResponseFormat::Json {
        if !prompt.is_empty() {
            prompt.push_str("\n\n");
        }
        prompt.push_str("Respond with ONLY a valid JSON object, no markdown or commentary.");
        if let Some(schema) = &config.output_schema {
            prompt.push_str("\nThe object must match this JSON schema:\n");
            prompt.push_str(&serde_json::to_string_pretty(schema).unwrap_or_default());
        }
    }

    (!prompt.is_empty()).then_some(prompt)
}

/// The rendered user prompt, or the block input itself when no prompt is set.
fn user_prompt(config: &LlmBlockConfig, inputs: &Map<String, Value>) -> String {
    if !config.user_prompt.trim().is_empty() {
        return template::render(&config.user_prompt, inputs);
    }
    match inputs.get("input") {
        Some(value) => template::value_to_text(value),
        None => Value::Object(weft_core::strip_reserved(inputs)).to_string(),
    }
}

fn correction_prompt(issues: &[String]) -> String {
    format!(
        "Your previous reply did not satisfy the required output format:\n- {}\n\nReply again with ONLY the corrected JSON object.",
        issues.join("\n- ")
    )
}

impl BlockExecutor for AgentExecutor {
    fn execute<'a>(
        &'a self,
        block: &'a Block,
        inputs: &'a Map<String, Value>,
        ctx: &'a BlockContext,
    ) -> BoxFuture<'a, Result<BlockOutput>> {
        Box::pin(async move {
            let BlockConfig::LlmInference(config) = &block.config else {
                return Err(WeftError::InvalidInput(format!("block {} is not an LLM block", block.id)));
            };

            let mut messages = Vec::new();
            if let Some(system) = system_prompt(config, inputs) {
                messages.push(ChatMessage::system(system));
            }
            messages.push(ChatMessage::user(user_prompt(config, inputs)));

            let mut conv = Conversation {
                model: self.model_for(config),
                messages,
                tools: self.invoker.definitions_for(&config.enabled_tools),
                format: config.output_format,
                max_rounds: config.max_tool_rounds.unwrap_or(self.max_tool_rounds),
                rounds: 0,
                invocation: InvocationContext {
                    execution_id: ctx.execution_id.clone(),
                    block_id: block.id.clone(),
                    user_id: ctx.user_id.clone(),
                },
                usage: TokenUsage::default(),
                tools_used: Vec::new(),
            };

            info!(
                block_id = %block.id,
                model = %conv.model.model_id,
                tools = conv.tools.len(),
                "Running LLM block"
            );

            let mut text = self.converse(&mut conv, ctx).await?;
            let mut outputs = Map::new();

            if config.output_format == ResponseFormat::Json {
                let schema = config.output_schema.as_ref();
                let data = match schema::parse_structured(&text, schema) {
                    Ok(data) => data,
                    Err(issues) => {
                        debug!(block_id = %block.id, ?issues, "Structured output invalid, asking for a correction");
                        conv.messages.push(ChatMessage::assistant_text(text.clone()));
                        conv.messages.push(ChatMessage::user(correction_prompt(&issues)));
                        text = self.converse(&mut conv, ctx).await?;
                        schema::parse_structured(&text, schema)
                            .map_err(|issues| WeftError::StructuredOutputInvalid(issues.join("; ")))?
                    }
                };
                outputs.insert("data".into(), data);
            }

            outputs.insert("response".into(), Value::String(text));
            if !conv.tools_used.is_empty() {
                outputs.insert(
                    "toolsUsed".into(),
                    Value::Array(conv.tools_used.into_iter().map(Value::String).collect()),
                );
            }
            Ok(BlockOutput::new(outputs).with_usage(conv.usage))
        })
    }
}
