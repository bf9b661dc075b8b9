use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use weft_core::error::ErrorKind;
use weft_core::execution::{BlockStatus, ExecutionApiResponse, ExecutionStatus, ExecutionUpdate};

/// A frame sent from the client.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    ExecuteWorkflow {
        agent_id: String,
        #[serde(default)]
        input: Map<String, Value>,
        #[serde(default)]
        enable_block_checker: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        checker_model_id: Option<String>,
    },
    CancelExecution,
}

/// A frame pushed to the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Connected,
    ExecutionStarted {
        execution_id: String,
    },
    ExecutionUpdate {
        execution_id: String,
        block_id: String,
        status: BlockStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        inputs: Option<Map<String, Value>>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        output: Option<Map<String, Value>>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error_kind: Option<ErrorKind>,
    },
    ExecutionComplete {
        execution_id: String,
        status: ExecutionStatus,
        final_output: Map<String, Value>,
        duration_ms: u64,
        api_response: Box<ExecutionApiResponse>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    Error {
        error: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        kind: Option<ErrorKind>,
    },
}

impl ServerMessage {
    pub fn update(execution_id: &str, update: ExecutionUpdate) -> Self {
        Self::ExecutionUpdate {
            execution_id: execution_id.to_string(),
            block_id: update.block_id,
            status: update.status,
            inputs: update.inputs,
            output: update.output,
            error: update.error,
            error_kind: update.error_kind,
        }
    }

    pub fn error(error: impl Into<String>) -> Self {
        Self::Error {
            error: error.into(),
            kind: None,
        }
    }

    pub fn from_error(err: &weft_core::WeftError) -> Self {
        Self::Error {
            error: err.to_string(),
            kind: Some(err.kind()),
        }
    }
}
