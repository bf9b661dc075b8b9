use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::auth::Identity;
use crate::driver::{self, RunRequest};
use crate::protocol::{ClientMessage, ServerMessage};
use crate::state::AppState;

const OUTBOUND_BUFFER: usize = 256;

/// The run currently owned by a connection.
struct ActiveRun {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl ActiveRun {
    fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }
}

/// Handle a single `/ws/workflow` connection.
///
/// One writer task owns the socket sink; the read loop keeps going while a
/// run is in flight so `cancel_execution` can reach it.
pub async fn handle_connection(ws: WebSocket, state: Arc<AppState>, identity: Identity) {
    let (mut ws_tx, mut ws_rx) = ws.split();
    let (out_tx, mut out_rx) = mpsc::channel::<ServerMessage>(OUTBOUND_BUFFER);

    let writer = tokio::spawn(async move {
        while let Some(msg) = out_rx.recv().await {
            let json = match serde_json::to_string(&msg) {
                Ok(json) => json,
                Err(e) => {
                    warn!(error = %e, "Failed to encode frame");
                    continue;
                }
            };
            if ws_tx.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
    });

    debug!(user_id = %identity.user_id, key = %identity.key_name, "Workflow connection opened");
    let _ = out_tx.send(ServerMessage::Connected).await;

    let mut active: Option<ActiveRun> = None;

    while let Some(msg) = ws_rx.next().await {
        let msg = match msg {
            Ok(m) => m,
            Err(e) => {
                debug!(error = %e, "WebSocket read error");
                break;
            }
        };

        let text = match msg {
            Message::Text(text) => text,
            Message::Close(_) => break,
            _ => continue,
        };

        let frame: ClientMessage = match serde_json::from_str(&text) {
            Ok(f) => f,
            Err(e) => {
                let _ = out_tx.send(ServerMessage::error(format!("Malformed message: {}", e))).await;
                continue;
            }
        };

        match frame {
            ClientMessage::ExecuteWorkflow {
                agent_id,
                input,
                enable_block_checker,
                checker_model_id,
            } => {
                if active.as_ref().is_some_and(ActiveRun::is_running) {
                    let _ = out_tx
                        .send(ServerMessage::error("An execution is already running on this connection"))
                        .await;
                    continue;
                }
                let request = RunRequest {
                    agent_id,
                    user_id: identity.user_id.clone(),
                    input,
                    enable_block_checker,
                    checker_model_id,
                };
                let cancel = CancellationToken::new();
                let handle = tokio::spawn(run_execution(state.clone(), request, out_tx.clone(), cancel.clone()));
                active = Some(ActiveRun { cancel, handle });
            }
            ClientMessage::CancelExecution => match &active {
                Some(run) if run.is_running() => {
                    info!(user_id = %identity.user_id, "Cancellation requested");
                    run.cancel.cancel();
                }
                _ => debug!("Cancel with no active execution"),
            },
        }
    }

    // Nobody is left to read the result.
    if let Some(run) = active {
        run.cancel.cancel();
    }
    drop(out_tx);
    let _ = writer.await;
    debug!("Workflow connection closed");
}

/// One run from request to `execution_complete`.
async fn run_execution(
    state: Arc<AppState>,
    request: RunRequest,
    out: mpsc::Sender<ServerMessage>,
    cancel: CancellationToken,
) {
    let agent_id = request.agent_id.clone();
    let prepared = match driver::prepare(&state, request).await {
        Ok(prepared) => prepared,
        Err(e) => {
            warn!(%agent_id, error = %e, kind = %e.kind(), "Execution rejected");
            let _ = out.send(ServerMessage::from_error(&e)).await;
            return;
        }
    };

    let execution_id = prepared.execution_id.clone();
    let _ = out
        .send(ServerMessage::ExecutionStarted {
            execution_id: execution_id.clone(),
        })
        .await;

    let (updates_tx, mut updates_rx) = mpsc::channel(state.engine.config().update_buffer.max(1));
    let forward = async {
        while let Some(update) = updates_rx.recv().await {
            // Keep draining after the socket goes away so the engine never blocks.
            let _ = out.send(ServerMessage::update(&execution_id, update)).await;
        }
    };

    // The engine drops `updates_tx` when it returns, which ends `forward`, so
    // every update is queued before the completion frame.
    let (done, ()) = tokio::join!(driver::execute(&state, prepared, updates_tx, cancel), forward);

    let _ = out
        .send(ServerMessage::ExecutionComplete {
            execution_id: done.execution_id,
            status: done.status,
            final_output: done.final_output,
            duration_ms: done.duration_ms,
            api_response: Box::new(done.api_response),
            error: done.error,
        })
        .await;
}
