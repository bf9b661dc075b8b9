use serde_json::Value;

use weft_core::config::ModelConfig;
use weft_core::types::ResponseFormat;
use weft_core::workflow::*;

pub fn model_config(model_id: &str) -> ModelConfig {
    ModelConfig {
        provider: "openai".into(),
        model_id: model_id.into(),
        api_key: None,
        base_url: None,
        max_tokens: 1024,
        temperature: 0.0,
        retry: None,
    }
}

fn block(id: &str, config: BlockConfig) -> Block {
    Block {
        id: id.into(),
        normalized_id: id.into(),
        name: id.into(),
        description: String::new(),
        config,
        timeout: 0,
        position: None,
        is_output: false,
    }
}

/// `variable` block reading `variable_name` from its inputs as text.
pub fn variable_read(id: &str, variable_name: &str) -> Block {
    block(
        id,
        BlockConfig::Variable(VariableConfig {
            variable_name: variable_name.into(),
            ..VariableConfig::default()
        }),
    )
}

/// `variable` block emitting a templated value.
pub fn variable_set(id: &str, variable_name: &str, template: &str) -> Block {
    block(
        id,
        BlockConfig::Variable(VariableConfig {
            operation: VariableOperation::Set,
            variable_name: variable_name.into(),
            value: Some(template.into()),
            ..VariableConfig::default()
        }),
    )
}

pub fn llm_block(id: &str, user_prompt: &str) -> Block {
    block(
        id,
        BlockConfig::LlmInference(LlmBlockConfig {
            user_prompt: user_prompt.into(),
            output_format: ResponseFormat::Text,
            ..LlmBlockConfig::default()
        }),
    )
}

pub fn tool_block(id: &str, tool_name: &str, mapping: Value) -> Block {
    let argument_mapping = match mapping {
        Value::Object(map) => map,
        _ => serde_json::Map::new(),
    };
    block(
        id,
        BlockConfig::CodeBlock(ToolBlockConfig {
            tool_name: tool_name.into(),
            argument_mapping,
        }),
    )
}

pub fn workflow(blocks: Vec<Block>, connections: Vec<Connection>) -> Workflow {
    Workflow {
        id: "wf-test".into(),
        blocks,
        connections,
        variables: vec![],
        version: 1,
    }
}

pub fn agent(id: &str, user_id: &str, workflow: Option<Workflow>) -> Agent {
    Agent {
        id: id.into(),
        user_id: user_id.into(),
        name: format!("{} agent", id),
        description: "Summarize the incoming text and notify the team".into(),
        workflow,
    }
}
