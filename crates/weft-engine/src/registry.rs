use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use weft_core::config::{EngineConfig, ModelConfig};
use weft_core::error::{Result, WeftError};
use weft_core::traits::LlmClient;
use weft_core::workflow::BlockType;
use weft_tools::ToolInvoker;

use crate::executor::BlockExecutor;
use crate::executors::{AgentExecutor, ToolExecutor, VariableExecutor};

/// Block type to executor dispatch table.
///
/// Registration may happen while runs are in flight, so the map sits behind
/// a read-write lock.
pub struct ExecutorRegistry {
    executors: RwLock<HashMap<BlockType, Arc<dyn BlockExecutor>>>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self {
            executors: RwLock::new(HashMap::new()),
        }
    }

    /// Registry with the variable, tool, and LLM executors wired up.
    pub fn with_defaults(
        llm: Arc<dyn LlmClient>,
        invoker: ToolInvoker,
        model: ModelConfig,
        engine: &EngineConfig,
    ) -> Self {
        let registry = Self::new();
        registry.register(BlockType::Variable, Arc::new(VariableExecutor));
        registry.register(BlockType::CodeBlock, Arc::new(ToolExecutor::new(invoker.clone())));
        registry.register(
            BlockType::LlmInference,
            Arc::new(AgentExecutor::new(llm, invoker, model).with_max_tool_rounds(engine.max_tool_rounds)),
        );
        registry
    }

    /// Register (or replace) the executor for a block type.
    pub fn register(&self, block_type: BlockType, executor: Arc<dyn BlockExecutor>) {
        let mut executors = self.executors.write().unwrap_or_else(|e| e.into_inner());
        executors.insert(block_type, executor);
    }

    pub fn get(&self, block_type: BlockType) -> Result<Arc<dyn BlockExecutor>> {
        let executors = self.executors.read().unwrap_or_else(|e| e.into_inner());
        executors
            .get(&block_type)
            .cloned()
            .ok_or_else(|| WeftError::UnknownBlockType(block_type.to_string()))
    }

    pub fn contains(&self, block_type: BlockType) -> bool {
        let executors = self.executors.read().unwrap_or_else(|e| e.into_inner());
        executors.contains_key(&block_type)
    }

    /// Registered block types, sorted.
    pub fn block_types(&self) -> Vec<BlockType> {
        let executors = self.executors.read().unwrap_or_else(|e| e.into_inner());
        let mut types: Vec<_> = executors.keys().copied().collect();
        types.sort();
        types
    }
}

impl Default for ExecutorRegistry {
    fn default() -> Self {
        Self::new()
    }
}
