use futures::future::BoxFuture;
use serde_json::{Map, Value};
use tracing::debug;

use weft_core::error::{Result, WeftError};
use weft_core::workflow::{Block, BlockConfig};
use weft_tools::{InvocationContext, ToolInvoker};

use crate::executor::{BlockContext, BlockExecutor, BlockOutput};
use crate::template;

/// Calls one tool directly with arguments mapped from the block inputs.
pub struct ToolExecutor {
    invoker: ToolInvoker,
}

impl ToolExecutor {
    pub fn new(invoker: ToolInvoker) -> Self {
        Self { invoker }
    }
}

impl BlockExecutor for ToolExecutor {
    fn execute<'a>(
        &'a self,
        block: &'a Block,
        inputs: &'a Map<String, Value>,
        ctx: &'a BlockContext,
    ) -> BoxFuture<'a, Result<BlockOutput>> {
        Box::pin(async move {
            let BlockConfig::CodeBlock(config) = &block.config else {
                return Err(WeftError::InvalidInput(format!("block {} is not a code block", block.id)));
            };
            if config.tool_name.is_empty() {
                return Err(WeftError::InvalidInput(format!("block {} has no toolName", block.id)));
            }

            let args = if config.argument_mapping.is_empty() {
                default_arguments(inputs)
            } else {
                template::resolve_value(&Value::Object(config.argument_mapping.clone()), inputs)
            };
            debug!(block_id = %block.id, tool = %config.tool_name, "Calling tool");

            let invocation = InvocationContext {
                execution_id: ctx.execution_id.clone(),
                block_id: block.id.clone(),
                user_id: ctx.user_id.clone(),
            };
            let result = self.invoker.invoke(&config.tool_name, args, &invocation).await?;

            let mut outputs = Map::new();
            if let Ok(data @ (Value::Object(_) | Value::Array(_))) = serde_json::from_str::<Value>(&result) {
                outputs.insert("data".into(), data);
            }
            outputs.insert("result".into(), Value::String(result));
            Ok(BlockOutput::new(outputs))
        })
    }
}

/// Without a mapping the tool receives the `input` object, or every
/// non-reserved input when there is none.
fn default_arguments(inputs: &Map<String, Value>) -> Value {
    match inputs.get("input") {
        Some(Value::Object(obj)) => Value::Object(weft_core::strip_reserved(obj)),
        _ => Value::Object(weft_core::strip_reserved(inputs)),
    }
}
