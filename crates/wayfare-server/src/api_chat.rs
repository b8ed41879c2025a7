//! HTTP endpoints for chat history, read markers, unread counts and the
//! member list of a trip chat.

use crate::middleware::UserContext;
use crate::{with_conn, AppState};
use axum::{
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use wayfare_chat::{
    check_access, list_authorized_members, list_recent_messages, mark_read, unread_counts,
    ChatError, ChatMessage, TripUnread,
};
use wayfare_types::{TripId, TripRole, UserSummary};

/// Maps a [`ChatError`] to the HTTP status code, logging storage failures.
pub fn chat_err_to_status(e: ChatError) -> StatusCode {
    match e {
        ChatError::NotFound(_) => StatusCode::NOT_FOUND,
        ChatError::AccessDenied { .. } => StatusCode::FORBIDDEN,
        ChatError::Validation(_) | ChatError::Protocol(_) => StatusCode::BAD_REQUEST,
        ChatError::Storage(ref detail) => {
            tracing::error!(error = %detail, "chat storage operation failed");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct HistoryParams {
    pub limit: Option<u32>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryResponse {
    pub trip_id: TripId,
    pub messages: Vec<ChatMessage>,
}

/// `GET /api/trips/{tripId}/messages?limit=N`: most recent messages, oldest
/// first. Marks the chat read for the caller.
pub async fn history_handler(
    Extension(state): Extension<Arc<AppState>>,
    Extension(UserContext(user)): Extension<UserContext>,
    Path(trip_id): Path<TripId>,
    Query(params): Query<HistoryParams>,
) -> Result<Json<HistoryResponse>, StatusCode> {
    let limit = params.limit.map(|l| l.min(state.chat.history_limit_max));
    let user_id = user.id;

    let messages = with_conn(&state.pool, move |conn| {
        check_access(conn, user_id, trip_id)?.into_result(trip_id)?;
        let messages = list_recent_messages(conn, trip_id, limit)?;
        if let Err(e) = mark_read(conn, trip_id, user_id, Utc::now()) {
            tracing::warn!(trip_id, user_id, "failed to mark chat read on history fetch: {}", e);
        }
        Ok(messages)
    })
    .await
    .map_err(chat_err_to_status)?;

    Ok(Json(HistoryResponse { trip_id, messages }))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkReadResponse {
    pub trip_id: TripId,
    pub last_read_at: DateTime<Utc>,
}

/// `POST /api/trips/{tripId}/read`: advances the caller's read marker to now.
pub async fn mark_read_handler(
    Extension(state): Extension<Arc<AppState>>,
    Extension(UserContext(user)): Extension<UserContext>,
    Path(trip_id): Path<TripId>,
) -> Result<Json<MarkReadResponse>, StatusCode> {
    let user_id = user.id;
    let last_read_at = with_conn(&state.pool, move |conn| {
        check_access(conn, user_id, trip_id)?.into_result(trip_id)?;
        mark_read(conn, trip_id, user_id, Utc::now())
    })
    .await
    .map_err(chat_err_to_status)?;

    Ok(Json(MarkReadResponse {
        trip_id,
        last_read_at,
    }))
}

#[derive(Debug, Serialize)]
pub struct UnreadResponse {
    pub total: u64,
    pub trips: Vec<TripUnread>,
}

/// `GET /api/chat/unread`: unread counts over every trip the caller may
/// chat in.
pub async fn unread_handler(
    Extension(state): Extension<Arc<AppState>>,
    Extension(UserContext(user)): Extension<UserContext>,
) -> Result<Json<UnreadResponse>, StatusCode> {
    let user_id = user.id;
    let trips = with_conn(&state.pool, move |conn| unread_counts(conn, user_id))
        .await
        .map_err(chat_err_to_status)?;

    let total = trips.iter().map(|t| t.unread).sum();
    Ok(Json(UnreadResponse { total, trips }))
}

#[derive(Debug, Serialize)]
pub struct ChatMemberView {
    pub user: UserSummary,
    pub role: TripRole,
    pub online: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMembersResponse {
    pub trip_id: TripId,
    pub members: Vec<ChatMemberView>,
}

/// `GET /api/trips/{tripId}/chat-members`: everyone allowed into the chat,
/// each flagged with whether they currently hold a live connection in it.
pub async fn chat_members_handler(
    Extension(state): Extension<Arc<AppState>>,
    Extension(UserContext(user)): Extension<UserContext>,
    Path(trip_id): Path<TripId>,
) -> Result<Json<ChatMembersResponse>, StatusCode> {
    let user_id = user.id;
    let authorized = with_conn(&state.pool, move |conn| {
        check_access(conn, user_id, trip_id)?.into_result(trip_id)?;
        list_authorized_members(conn, trip_id)
    })
    .await
    .map_err(chat_err_to_status)?;

    let members = authorized
        .into_iter()
        .map(|m| ChatMemberView {
            online: state.registry.is_online(trip_id, m.user.id),
            user: m.user,
            role: m.role,
        })
        .collect();

    Ok(Json(ChatMembersResponse { trip_id, members }))
}
