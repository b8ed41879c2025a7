//! WebSocket endpoint for trip chat.
//!
//! Each connection runs two tasks: a writer that drains the connection's
//! bounded outbox and sends heartbeat pings, and the reader loop below that
//! feeds frames into a [`ChatSession`], fires typing deadlines and reaps the
//! connection once it has been silent for longer than the idle timeout.

use crate::session::ChatSession;
use crate::{with_conn, AppState};
use axum::{
    body::Bytes,
    extract::{
        ws::{Message as AxumMessage, WebSocket},
        ConnectInfo, Extension, Query, WebSocketUpgrade,
    },
    http::StatusCode,
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use std::{net::SocketAddr, sync::Arc};
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use wayfare_chat::{get_user, ChatError};
use wayfare_types::{UserId, UserSummary};

/// Query parameters for the WebSocket connection.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WsConnectParams {
    pub user_id: Option<String>,
}

/// WebSocket handler: `GET /ws?userId=...`.
///
/// The user must exist; display name and avatar come from the user record.
pub async fn ws_handler(
    Extension(state): Extension<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    ws: WebSocketUpgrade,
    Query(params): Query<WsConnectParams>,
) -> impl IntoResponse {
    let Some(user_id) = params
        .user_id
        .as_deref()
        .and_then(|raw| raw.trim().parse::<UserId>().ok())
    else {
        tracing::warn!(remote_addr = %addr, "websocket connect missing or invalid userId");
        return StatusCode::UNAUTHORIZED.into_response();
    };

    match with_conn(&state.pool, move |conn| get_user(conn, user_id)).await {
        Ok(user) => {
            tracing::info!(user_id, remote_addr = %addr, "websocket auth success");
            ws.on_upgrade(move |socket| handle_socket(socket, state, user))
        }
        Err(ChatError::NotFound(_)) => {
            tracing::warn!(user_id, remote_addr = %addr, "websocket auth failed: unknown user");
            StatusCode::UNAUTHORIZED.into_response()
        }
        Err(e) => {
            tracing::error!(user_id, remote_addr = %addr, "websocket auth internal error: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// Handles the WebSocket connection.
async fn handle_socket(socket: WebSocket, state: Arc<AppState>, user: UserSummary) {
    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::channel::<String>(state.chat.outbound_buffer.max(1));

    let heartbeat = state.chat.heartbeat_interval();
    let idle_timeout = state.chat.idle_timeout();

    let send_task = tokio::spawn(async move {
        let mut ping = tokio::time::interval_at(Instant::now() + heartbeat, heartbeat);
        ping.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                frame = rx.recv() => {
                    let Some(text) = frame else { break };
                    if sender.send(AxumMessage::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                _ = ping.tick() => {
                    if sender.send(AxumMessage::Ping(Bytes::new())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    let mut session = ChatSession::new(state, user, tx);
    let connection_id = session.connection_id();
    let user_id = session.user().id;
    tracing::debug!(connection_id = %connection_id, user_id, "websocket session started");

    let mut last_seen = Instant::now();
    loop {
        let typing_deadline = session.typing_deadline();
        let idle_deadline = last_seen + idle_timeout;

        tokio::select! {
            incoming = receiver.next() => {
                let msg = match incoming {
                    Some(Ok(msg)) => msg,
                    Some(Err(e)) => {
                        tracing::debug!(connection_id = %connection_id, "websocket read error: {}", e);
                        break;
                    }
                    None => break,
                };
                last_seen = Instant::now();
                match msg {
                    AxumMessage::Text(text) => session.handle_frame(text.as_str()).await,
                    AxumMessage::Binary(_) => session.reject(&ChatError::Protocol(
                        "binary frames are not supported".to_string(),
                    )),
                    AxumMessage::Ping(_) | AxumMessage::Pong(_) => {}
                    AxumMessage::Close(_) => break,
                }
            }
            () = tokio::time::sleep_until(typing_deadline.unwrap_or(idle_deadline)), if typing_deadline.is_some() => {
                session.expire_typing();
            }
            () = tokio::time::sleep_until(idle_deadline) => {
                tracing::info!(
                    connection_id = %connection_id,
                    user_id,
                    idle_secs = idle_timeout.as_secs(),
                    "closing silent websocket connection"
                );
                break;
            }
        }
    }

    // Releases the room membership before the writer goes away.
    drop(session);
    send_task.abort();
    tracing::debug!(connection_id = %connection_id, user_id, "websocket session ended");
}
