use futures::future::BoxFuture;
use serde_json::{Map, Value};

use weft_core::error::{Result, WeftError};
use weft_core::workflow::{Block, BlockConfig, VariableConfig, VariableInputType, VariableOperation};

use crate::executor::{BlockContext, BlockExecutor, BlockOutput};
use crate::template;

/// Emits or passes through a named value. Makes no external calls.
pub struct VariableExecutor;

impl BlockExecutor for VariableExecutor {
    fn execute<'a>(
        &'a self,
        block: &'a Block,
        inputs: &'a Map<String, Value>,
        _ctx: &'a BlockContext,
    ) -> BoxFuture<'a, Result<BlockOutput>> {
        Box::pin(async move {
            let BlockConfig::Variable(config) = &block.config else {
                return Err(WeftError::InvalidInput(format!(
                    "block {} is not a variable block",
                    block.id
                )));
            };
            let value = match config.operation {
                VariableOperation::Set => set_value(config, inputs),
                VariableOperation::Read => read_value(config, inputs)?,
            };
            let value = coerce(config, value)?;

            let mut outputs = Map::new();
            outputs.insert(config.variable_name.clone(), value);
            Ok(BlockOutput::new(outputs))
        })
    }
}

fn set_value(config: &VariableConfig, inputs: &Map<String, Value>) -> Value {
    match &config.value {
        Some(template) => template::resolve(template, inputs),
        None => config.default_value.clone().unwrap_or(Value::Null),
    }
}

fn read_value(config: &VariableConfig, inputs: &Map<String, Value>) -> Result<Value> {
    let found = template::lookup(inputs, &config.variable_name).filter(|v| !v.is_null());
    match (found, &config.default_value) {
        (Some(value), _) => Ok(value.clone()),
        (None, Some(default)) => Ok(default.clone()),
        (None, None) if config.required => Err(WeftError::InvalidInput(format!(
            "required value '{}' missing from input",
            config.variable_name
        ))),
        (None, None) => Ok(Value::Null),
    }
}

/// Shape the value to the declared input type.
fn coerce(config: &VariableConfig, value: Value) -> Result<Value> {
    match (config.input_type, value) {
        (_, Value::Null) => Ok(Value::Null),
        (VariableInputType::Text, Value::String(s)) => Ok(Value::String(s)),
        (VariableInputType::Text, other) => Ok(Value::String(template::value_to_text(&other))),
        (VariableInputType::Json, Value::String(s)) => serde_json::from_str(&s).map_err(|e| {
            WeftError::InvalidInput(format!("'{}' is not valid JSON: {}", config.variable_name, e))
        }),
        (VariableInputType::Json, other) => Ok(other),
        (VariableInputType::File, value) if is_file_ref(&value) => Ok(value),
        (VariableInputType::File, _) => Err(WeftError::InvalidInput(format!(
            "'{}' is not a file reference",
            config.variable_name
        ))),
    }
}

/// A file id string, or an object carrying `file_id`/`fileId`.
fn is_file_ref(value: &Value) -> bool {
    match value {
        Value::String(s) => !s.is_empty(),
        Value::Object(obj) => obj.contains_key("file_id") || obj.contains_key("fileId"),
        _ => false,
    }
}
