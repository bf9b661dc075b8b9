use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WeftError {
    // Workflow shape errors
    #[error("Invalid workflow: {0}")]
    Validation(String),

    #[error("Workflow contains a cycle through block {0}")]
    CycleDetected(String),

    #[error("No executor registered for block type: {0}")]
    UnknownBlockType(String),

    #[error("Agent not found: {0}")]
    AgentNotFound(String),

    #[error("Agent has no workflow defined")]
    NoWorkflow,

    // Block errors
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Block check failed: {0}")]
    CheckFailed(String),

    #[error("Block {block_id} timed out after {timeout_secs}s")]
    BlockTimeout { block_id: String, timeout_secs: u64 },

    #[error("Execution cancelled")]
    Cancelled,

    // LLM errors
    #[error("LLM request failed: {0}")]
    LlmRequest(String),

    #[error("LLM streaming error: {0}")]
    LlmStream(String),

    #[error("LLM provider not supported: {0}")]
    UnsupportedProvider(String),

    #[error("LLM response parse error: {0}")]
    LlmParse(String),

    #[error("Structured output invalid: {0}")]
    StructuredOutputInvalid(String),

    #[error("Tool loop exceeded {0} rounds")]
    ToolLoopExceeded(usize),

    // Tool errors
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Missing credential for tool {tool} (integration: {integration})")]
    CredentialMissing { tool: String, integration: String },

    #[error("Tool execution failed: {tool}: {message}")]
    ToolExecution { tool: String, message: String },

    #[error("Tool timeout after {timeout_secs}s: {tool}")]
    ToolTimeout { tool: String, timeout_secs: u64 },

    #[error("Tool input validation failed: {0}")]
    ToolValidation(String),

    // Limiter errors
    #[error("Execution limiter error: {0}")]
    Limiter(String),

    // Storage errors
    #[error("Database error: {0}")]
    Database(String),

    // Config errors
    #[error("Config error: {0}")]
    Config(String),

    #[error("Config file not found: {0}")]
    ConfigNotFound(String),

    // Gateway errors
    #[error("Gateway error: {0}")]
    Gateway(String),

    #[error("Internal error: {0}")]
    Internal(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, WeftError>;

/// Coarse error category reported to clients alongside the message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    UnknownBlockType,
    InvalidInput,
    ToolNotFound,
    CredentialMissing,
    ToolExecutionError,
    ToolLoopExceeded,
    StructuredOutputInvalid,
    Timeout,
    Cancelled,
    LlmError,
    Limiter,
    Storage,
    Config,
    Internal,
}

impl ErrorKind {
    /// Errors that reject a run before any block state is created.
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation | Self::UnknownBlockType)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::UnknownBlockType => "unknown_block_type",
            Self::InvalidInput => "invalid_input",
            Self::ToolNotFound => "tool_not_found",
            Self::CredentialMissing => "credential_missing",
            Self::ToolExecutionError => "tool_execution_error",
            Self::ToolLoopExceeded => "tool_loop_exceeded",
            Self::StructuredOutputInvalid => "structured_output_invalid",
            Self::Timeout => "timeout",
            Self::Cancelled => "cancelled",
            Self::LlmError => "llm_error",
            Self::Limiter => "limiter",
            Self::Storage => "storage",
            Self::Config => "config",
            Self::Internal => "internal",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl WeftError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_)
            | Self::CycleDetected(_)
            | Self::AgentNotFound(_)
            | Self::NoWorkflow
            | Self::CheckFailed(_) => ErrorKind::Validation,
            Self::UnknownBlockType(_) => ErrorKind::UnknownBlockType,
            Self::InvalidInput(_) | Self::ToolValidation(_) => ErrorKind::InvalidInput,
            Self::BlockTimeout { .. } | Self::ToolTimeout { .. } => ErrorKind::Timeout,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::LlmRequest(_)
            | Self::LlmStream(_)
            | Self::UnsupportedProvider(_)
            | Self::LlmParse(_) => ErrorKind::LlmError,
            Self::StructuredOutputInvalid(_) => ErrorKind::StructuredOutputInvalid,
            Self::ToolLoopExceeded(_) => ErrorKind::ToolLoopExceeded,
            Self::ToolNotFound(_) => ErrorKind::ToolNotFound,
            Self::CredentialMissing { .. } => ErrorKind::CredentialMissing,
            Self::ToolExecution { .. } => ErrorKind::ToolExecutionError,
            Self::Limiter(_) => ErrorKind::Limiter,
            Self::Database(_) => ErrorKind::Storage,
            Self::Config(_) | Self::ConfigNotFound(_) => ErrorKind::Config,
            Self::Gateway(_) | Self::Internal(_) | Self::Io(_) | Self::Json(_) => ErrorKind::Internal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeouts_share_a_kind() {
        let block = WeftError::BlockTimeout {
            block_id: "b1".into(),
            timeout_secs: 1,
        };
        let tool = WeftError::ToolTimeout {
            tool: "send_webhook".into(),
            timeout_secs: 30,
        };
        assert_eq!(block.kind(), ErrorKind::Timeout);
        assert_eq!(tool.kind(), ErrorKind::Timeout);
    }

    #[test]
    fn shape_errors_are_validation() {
        assert!(WeftError::CycleDetected("a".into()).kind().is_validation());
        assert!(WeftError::UnknownBlockType("x".into()).kind().is_validation());
        assert!(!WeftError::Cancelled.kind().is_validation());
        assert!(!WeftError::ToolNotFound("t".into()).kind().is_validation());
    }

    #[test]
    fn kind_serializes_snake_case() {
        let json = serde_json::to_string(&ErrorKind::ToolExecutionError).unwrap();
        assert_eq!(json, "\"tool_execution_error\"");
        assert_eq!(ErrorKind::UnknownBlockType.to_string(), "unknown_block_type");
    }
}
