use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::Response,
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::metrics::ResultSample;
use crate::protocol::{ClientMessage, Logged, ServerMessage, Welcome};
use crate::AppState;

// ─── Request types ───────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct ConnectParams {
    /// Existing session to resume; a fresh id is minted when absent
    pub session: Option<String>,
    /// Display name, only used if the session is new
    pub name: Option<String>,
}

// ─── GET /ws ─────────────────────────────────────────────────────

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Query(params): Query<ConnectParams>,
) -> Response {
    let session_id = params
        .session
        .filter(|s| !s.is_empty())
        .unwrap_or_else(new_session_id);

    ws.on_upgrade(move |socket| handle_socket(socket, state, session_id, params.name))
}

fn new_session_id() -> String {
    format!("sess_{}", &uuid::Uuid::new_v4().simple().to_string()[..8])
}

// ─── Connection loop ─────────────────────────────────────────────

async fn handle_socket(
    mut socket: WebSocket,
    state: Arc<AppState>,
    session_id: String,
    name: Option<String>,
) {
    let record = state.registry.get_or_create(&session_id, name.as_deref());
    state.metrics.connection_opened();
    info!(session_id = %record.id, user = %record.user, "client connected");

    let welcome = ServerMessage::Welcome(Welcome {
        session_id: record.id,
        user: record.user,
    });

    if send(&mut socket, &welcome).await.is_ok() {
        while let Some(msg) = socket.recv().await {
            match msg {
                Ok(Message::Text(text)) => {
                    let reply = handle_frame(&state, &session_id, &text);
                    if send(&mut socket, &reply).await.is_err() {
                        break;
                    }
                }
                Ok(Message::Close(_)) => break,
                Ok(_) => {} // ping/pong control frames are answered by axum
                Err(e) => {
                    debug!(session_id = %session_id, "receive error: {e}");
                    break;
                }
            }
        }
    }

    state.metrics.connection_closed();
    info!(session_id = %session_id, "client disconnected");
}

async fn send(socket: &mut WebSocket, msg: &ServerMessage) -> Result<(), axum::Error> {
    let json = serde_json::to_string(msg).map_err(axum::Error::new)?;
    socket.send(Message::Text(json)).await
}

/// Turns one inbound text frame into its reply.
///
/// Malformed frames and rejected results produce an `error` event; the
/// connection stays open either way.
pub fn handle_frame(state: &AppState, session_id: &str, text: &str) -> ServerMessage {
    let msg = match serde_json::from_str::<ClientMessage>(text) {
        Ok(msg) => msg,
        Err(e) => {
            warn!(session_id, "malformed frame: {e}");
            return ServerMessage::error(format!("malformed frame: {e}"));
        }
    };

    match msg {
        ClientMessage::Ping(probe) => {
            state.metrics.record_ping();
            ServerMessage::Pong(probe)
        }
        ClientMessage::LogResults(report) => match state.registry.log_result(session_id, report.avg) {
            Ok(record) => {
                state.metrics.record_result(ResultSample {
                    session_id: record.id,
                    user: record.user.clone(),
                    avg_ms: report.avg,
                });
                ServerMessage::Logged(Logged {
                    user: record.user,
                    avg: report.avg,
                })
            }
            Err(e) => {
                state.metrics.record_rejected();
                warn!(session_id, "rejected result: {e}");
                ServerMessage::error(e.to_string())
            }
        },
    }
}
