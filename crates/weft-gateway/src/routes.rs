use std::sync::Arc;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use weft_core::error::{ErrorKind, WeftError};
use weft_core::execution::{ExecutionApiResponse, ExecutionUpdate};

use crate::connection;
use crate::driver::{self, RunRequest};
use crate::middleware::Authenticated;
use crate::state::AppState;

// GET /ws/workflow
pub async fn ws_handler(
    Authenticated(identity): Authenticated,
    State(state): State<Arc<AppState>>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| connection::handle_connection(socket, state, identity))
}

// GET /api/health (no auth)
pub async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

#[derive(Debug, Deserialize)]
pub struct ExecuteBody {
    #[serde(default)]
    pub input: Map<String, Value>,
    #[serde(default)]
    pub enable_block_checker: bool,
    #[serde(default)]
    pub checker_model_id: Option<String>,
}

type ApiError = (StatusCode, Json<Value>);

fn api_error(err: &WeftError) -> ApiError {
    let status = match err.kind() {
        ErrorKind::Validation if matches!(err, WeftError::AgentNotFound(_)) => StatusCode::NOT_FOUND,
        ErrorKind::Validation | ErrorKind::UnknownBlockType => StatusCode::UNPROCESSABLE_ENTITY,
        ErrorKind::Limiter => StatusCode::TOO_MANY_REQUESTS,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (
        status,
        Json(serde_json::json!({
            "error": err.to_string(),
            "kind": err.kind(),
        })),
    )
}

// POST /api/agents/{id}/execute
pub async fn execute_agent(
    Authenticated(identity): Authenticated,
    State(state): State<Arc<AppState>>,
    Path(agent_id): Path<String>,
    Json(body): Json<ExecuteBody>,
) -> Result<Json<ExecutionApiResponse>, ApiError> {
    let request = RunRequest {
        agent_id,
        user_id: identity.user_id,
        input: body.input,
        enable_block_checker: body.enable_block_checker,
        checker_model_id: body.checker_model_id,
    };

    let prepared = driver::prepare(&state, request).await.map_err(|e| {
        warn!(error = %e, kind = %e.kind(), "REST execution rejected");
        api_error(&e)
    })?;

    let (tx, mut rx) = mpsc::channel::<ExecutionUpdate>(state.engine.config().update_buffer.max(1));
    let drain = async {
        while let Some(update) = rx.recv().await {
            debug!(block_id = %update.block_id, status = ?update.status, "Block update");
        }
    };
    let (done, ()) = tokio::join!(driver::execute(&state, prepared, tx, CancellationToken::new()), drain);

    Ok(Json(done.api_response))
}
