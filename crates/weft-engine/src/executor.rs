use futures::future::BoxFuture;
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

use weft_core::error::Result;
use weft_core::types::TokenUsage;
use weft_core::workflow::Block;

/// Per-run facts an executor may need beyond the block and its inputs.
#[derive(Debug, Clone)]
pub struct BlockContext {
    pub execution_id: String,
    pub block_id: String,
    /// Owner of the run, used for credential lookups. Never shown to a model.
    pub user_id: Option<String>,
    pub cancel: CancellationToken,
}

impl BlockContext {
    pub fn new(execution_id: impl Into<String>, block_id: impl Into<String>) -> Self {
        Self {
            execution_id: execution_id.into(),
            block_id: block_id.into(),
            user_id: None,
            cancel: CancellationToken::new(),
        }
    }
}

/// What a block produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BlockOutput {
    pub outputs: Map<String, Value>,
    pub usage: TokenUsage,
}

impl BlockOutput {
    pub fn new(outputs: Map<String, Value>) -> Self {
        Self {
            outputs,
            usage: TokenUsage::default(),
        }
    }

    pub fn with_usage(mut self, usage: TokenUsage) -> Self {
        self.usage = usage;
        self
    }
}

/// Runs one block type. Implementations are shared across concurrent runs.
pub trait BlockExecutor: Send + Sync + 'static {
    fn execute<'a>(
        &'a self,
        block: &'a Block,
        inputs: &'a Map<String, Value>,
        ctx: &'a BlockContext,
    ) -> BoxFuture<'a, Result<BlockOutput>>;
}
