//! WebSocket terminal gateway.
//!
//! `GET /ws/session/:prefix/terminal/:terminal?token=...` upgrades to a
//! byte pipe into the matching lab container. The token goes in the query
//! string because browser WebSocket clients cannot set headers.

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::response::Response;
use examlab_terminal_bridge::TerminalBridge;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Deserialize)]
pub struct AttachQuery {
    pub token: String,
}

pub async fn attach(
    State(state): State<Arc<AppState>>,
    Path((prefix, terminal)): Path<(String, String)>,
    Query(q): Query<AttachQuery>,
    ws: WebSocketUpgrade,
) -> ApiResult<Response> {
    if state.auth.lookup(&q.token).is_none() {
        return Err(ApiError::Unauthorized("login required".to_string()));
    }
    // Resolution fails unless the session exists and is Active.
    let container = state.sessions.resolve_terminal(&prefix, &terminal)?;
    let transcript = state
        .sessions
        .session(&prefix)
        .map(|r| r.state_dir.join("terminal-logs").join(format!("{terminal}.log")));

    info!(prefix = %prefix, terminal = %terminal, container = %container, "terminal attach");
    Ok(ws.on_upgrade(move |socket| pump(socket, container, transcript)))
}

async fn pump(socket: WebSocket, container: String, transcript: Option<PathBuf>) {
    let mut bridge = match TerminalBridge::attach_container(&container, transcript.as_deref()) {
        Ok(bridge) => bridge,
        Err(e) => {
            warn!(container = %container, error = %e, "terminal spawn failed");
            let _ = socket.close().await;
            return;
        }
    };

    let (mut sink, mut stream) = socket.split();
    loop {
        tokio::select! {
            msg = stream.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    if !bridge.send(text.into_bytes()).await {
                        break;
                    }
                }
                Some(Ok(Message::Binary(bytes))) => {
                    if !bridge.send(bytes).await {
                        break;
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!(container = %container, error = %e, "websocket read failed");
                    break;
                }
            },
            chunk = bridge.recv() => match chunk {
                Some(bytes) => {
                    if sink.send(Message::Binary(bytes)).await.is_err() {
                        break;
                    }
                }
                None => break,
            },
        }
    }
    bridge.shutdown().await;
    info!(container = %container, "terminal detached");
}
