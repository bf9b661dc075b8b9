use std::sync::Arc;

use weft_core::config::GatewayConfig;
use weft_core::traits::{AgentStore, ExecutionLimiter, ExecutionStore};
use weft_engine::WorkflowEngine;

/// Shared application state for axum handlers and websocket connections.
pub struct AppState {
    pub config: GatewayConfig,
    pub engine: Arc<WorkflowEngine>,
    pub agents: Arc<dyn AgentStore>,
    pub executions: Option<Arc<dyn ExecutionStore>>,
    pub limiter: Arc<dyn ExecutionLimiter>,
}
