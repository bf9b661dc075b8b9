use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tracing::info;

use weft_core::config::GatewayConfig;
use weft_core::traits::{AgentStore, ExecutionLimiter, ExecutionStore};
use weft_engine::WorkflowEngine;

use crate::limiter::DailyLimiter;
use crate::routes;
use crate::state::AppState;

/// WebSocket + HTTP execution transport built on axum.
pub struct GatewayServer {
    config: GatewayConfig,
    engine: Arc<WorkflowEngine>,
    agents: Arc<dyn AgentStore>,
    executions: Option<Arc<dyn ExecutionStore>>,
    limiter: Arc<dyn ExecutionLimiter>,
}

impl GatewayServer {
    pub fn new(config: GatewayConfig, engine: Arc<WorkflowEngine>, agents: Arc<dyn AgentStore>) -> Self {
        Self {
            config,
            engine,
            agents,
            executions: None,
            limiter: Arc::new(DailyLimiter::unlimited()),
        }
    }

    pub fn with_executions(mut self, executions: Arc<dyn ExecutionStore>) -> Self {
        self.executions = Some(executions);
        self
    }

    pub fn with_limiter(mut self, limiter: Arc<dyn ExecutionLimiter>) -> Self {
        self.limiter = limiter;
        self
    }

    pub fn router(&self) -> Router {
        let state = Arc::new(AppState {
            config: self.config.clone(),
            engine: self.engine.clone(),
            agents: self.agents.clone(),
            executions: self.executions.clone(),
            limiter: self.limiter.clone(),
        });

        Router::new()
            // WebSocket
            .route("/ws/workflow", get(routes::ws_handler))
            // REST API
            .route("/api/health", get(routes::health))
            .route("/api/agents/{id}/execute", post(routes::execute_agent))
            .layer(CorsLayer::permissive())
            .with_state(state)
    }

    /// Bind the configured address and serve until `shutdown` fires.
    pub async fn run(&self, shutdown: CancellationToken) -> anyhow::Result<()> {
        let listener = TcpListener::bind(&self.config.bind).await?;
        self.serve(listener, shutdown).await
    }

    /// Serve on an already-bound listener until `shutdown` fires.
    pub async fn serve(&self, listener: TcpListener, shutdown: CancellationToken) -> anyhow::Result<()> {
        info!(bind = %listener.local_addr()?, "Gateway listening");

        axum::serve(listener, self.router())
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await?;

        info!("Gateway shut down");
        Ok(())
    }
}
