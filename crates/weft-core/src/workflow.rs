use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Result, WeftError};

/// Block type tags understood by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockType {
    Variable,
    LlmInference,
    CodeBlock,
}

impl BlockType {
    pub const ALL: [BlockType; 3] = [Self::Variable, Self::LlmInference, Self::CodeBlock];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Variable => "variable",
            Self::LlmInference => "llm_inference",
            Self::CodeBlock => "code_block",
        }
    }

    pub fn parse(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == tag)
    }
}

impl std::fmt::Display for BlockType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VariableOperation {
    Set,
    #[default]
    Read,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VariableInputType {
    #[default]
    Text,
    File,
    Json,
}

/// Configuration of a `variable` block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VariableConfig {
    #[serde(default)]
    pub operation: VariableOperation,
    #[serde(default = "default_variable_name")]
    pub variable_name: String,
    #[serde(default)]
    pub input_type: VariableInputType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<Value>,
    /// Template rendered against the block inputs for `set`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default)]
    pub required: bool,
}

fn default_variable_name() -> String {
    "input".to_string()
}

impl Default for VariableConfig {
    fn default() -> Self {
        Self {
            operation: VariableOperation::Read,
            variable_name: default_variable_name(),
            input_type: VariableInputType::Text,
            default_value: None,
            value: None,
            required: false,
        }
    }
}

/// Configuration of an `llm_inference` block.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LlmBlockConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    #[serde(default)]
    pub user_prompt: String,
    #[serde(default)]
    pub enabled_tools: Vec<String>,
    #[serde(default)]
    pub output_format: crate::types::ResponseFormat,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_schema: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tool_rounds: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
}

/// Configuration of a `code_block` (direct tool call) block.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolBlockConfig {
    pub tool_name: String,
    #[serde(default)]
    pub argument_mapping: Map<String, Value>,
}

/// Type-specific block configuration.
#[derive(Debug, Clone, PartialEq)]
pub enum BlockConfig {
    Variable(VariableConfig),
    LlmInference(LlmBlockConfig),
    CodeBlock(ToolBlockConfig),
}

impl BlockConfig {
    pub fn block_type(&self) -> BlockType {
        match self {
            Self::Variable(_) => BlockType::Variable,
            Self::LlmInference(_) => BlockType::LlmInference,
            Self::CodeBlock(_) => BlockType::CodeBlock,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

/// A node in the workflow graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawBlock", into = "RawBlock")]
pub struct Block {
    pub id: String,
    /// Name used to reference this block's outputs from templates.
    pub normalized_id: String,
    pub name: String,
    pub description: String,
    pub config: BlockConfig,
    /// Declared timeout in seconds; 0 means the engine default.
    pub timeout: u64,
    pub position: Option<Position>,
    /// Marks the block whose output becomes the run's `result`.
    pub is_output: bool,
}

impl Block {
    pub fn block_type(&self) -> BlockType {
        self.config.block_type()
    }

    /// Effective timeout: the declared value, or `default` when unset, capped at `max`.
    pub fn timeout_secs(&self, default: u64, max: u64) -> u64 {
        let declared = if self.timeout == 0 { default } else { self.timeout };
        declared.min(max)
    }

    /// Human-facing intent used by the block checker.
    pub fn intent(&self) -> &str {
        if self.description.is_empty() {
            &self.name
        } else {
            &self.description
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawBlock {
    id: String,
    #[serde(default)]
    normalized_id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    description: String,
    #[serde(rename = "type")]
    block_type: String,
    #[serde(default)]
    config: Value,
    #[serde(default)]
    timeout: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    position: Option<Position>,
    #[serde(default)]
    is_output: bool,
}

impl TryFrom<RawBlock> for Block {
    type Error = String;

    fn try_from(raw: RawBlock) -> std::result::Result<Self, Self::Error> {
        let config = if raw.config.is_null() {
            Value::Object(Map::new())
        } else {
            raw.config
        };
        let config = match BlockType::parse(&raw.block_type) {
            Some(BlockType::Variable) => serde_json::from_value(config).map(BlockConfig::Variable),
            Some(BlockType::LlmInference) => serde_json::from_value(config).map(BlockConfig::LlmInference),
            Some(BlockType::CodeBlock) => serde_json::from_value(config).map(BlockConfig::CodeBlock),
            None => return Err(format!("block {}: unknown block type '{}'", raw.id, raw.block_type)),
        }
        .map_err(|e| format!("block {}: invalid {} config: {}", raw.id, raw.block_type, e))?;

        let normalized_id = if raw.normalized_id.is_empty() {
            raw.id.clone()
        } else {
            raw.normalized_id
        };

        Ok(Block {
            id: raw.id,
            normalized_id,
            name: raw.name,
            description: raw.description,
            config,
            timeout: raw.timeout,
            position: raw.position,
            is_output: raw.is_output,
        })
    }
}

impl From<Block> for RawBlock {
    fn from(block: Block) -> Self {
        let block_type = block.block_type().as_str().to_string();
        let config = match &block.config {
            BlockConfig::Variable(c) => serde_json::to_value(c),
            BlockConfig::LlmInference(c) => serde_json::to_value(c),
            BlockConfig::CodeBlock(c) => serde_json::to_value(c),
        }
        .unwrap_or(Value::Null);

        RawBlock {
            id: block.id,
            normalized_id: block.normalized_id,
            name: block.name,
            description: block.description,
            block_type,
            config,
            timeout: block.timeout,
            position: block.position,
            is_output: block.is_output,
        }
    }
}

/// A directed edge between two named block ports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Connection {
    #[serde(default)]
    pub id: String,
    pub source_block_id: String,
    #[serde(default = "default_source_output")]
    pub source_output: String,
    pub target_block_id: String,
    #[serde(default = "default_target_input")]
    pub target_input: String,
}

fn default_source_output() -> String {
    "output".to_string()
}

fn default_target_input() -> String {
    "input".to_string()
}

impl Connection {
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        let source_block_id = source.into();
        let target_block_id = target.into();
        Self {
            id: format!("{}->{}", source_block_id, target_block_id),
            source_block_id,
            source_output: default_source_output(),
            target_block_id,
            target_input: default_target_input(),
        }
    }

    pub fn ports(mut self, source_output: impl Into<String>, target_input: impl Into<String>) -> Self {
        self.source_output = source_output.into();
        self.target_input = target_input.into();
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VariableType {
    String,
    Number,
    Boolean,
    Array,
    Object,
    File,
}

/// A typed, named value in the execution-scoped namespace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowVariable {
    pub name: String,
    #[serde(rename = "type")]
    pub var_type: VariableType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<Value>,
}

/// The block graph owned by one agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Workflow {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub blocks: Vec<Block>,
    #[serde(default)]
    pub connections: Vec<Connection>,
    #[serde(default)]
    pub variables: Vec<WorkflowVariable>,
    #[serde(default = "default_version")]
    pub version: u64,
}

fn default_version() -> u64 {
    1
}

impl Workflow {
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| WeftError::Validation(e.to_string()))
    }

    pub fn block(&self, id: &str) -> Option<&Block> {
        self.blocks.iter().find(|b| b.id == id)
    }

    /// Connections whose target is `block_id`.
    pub fn incoming<'a>(&'a self, block_id: &'a str) -> impl Iterator<Item = &'a Connection> + 'a {
        self.connections.iter().filter(move |c| c.target_block_id == block_id)
    }

    /// Connections whose source is `block_id`.
    pub fn outgoing<'a>(&'a self, block_id: &'a str) -> impl Iterator<Item = &'a Connection> + 'a {
        self.connections.iter().filter(move |c| c.source_block_id == block_id)
    }

    /// Whether blocks, connections, or variables differ from `other`.
    pub fn structure_differs(&self, other: &Workflow) -> bool {
        self.blocks != other.blocks || self.connections != other.connections || self.variables != other.variables
    }
}

/// A user-owned agent; its description doubles as the workflow goal.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Agent {
    pub id: String,
    pub user_id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub workflow: Option<Workflow>,
}
