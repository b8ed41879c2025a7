//! Chat message validation, persistence and history.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};
use serde::Serialize;
use wayfare_types::{TripId, UserId, UserSummary};

use crate::{access::check_access, millis_column, to_millis, users::get_user, ChatError};

/// Maximum message length in characters, measured after trimming.
pub const MAX_MESSAGE_CHARS: usize = 1000;

/// History page size when the caller does not ask for one.
pub const DEFAULT_HISTORY_LIMIT: u32 = 50;

/// Upper bound on a single history page.
pub const MAX_HISTORY_LIMIT: u32 = 100;

/// A persisted chat message joined with its author's display fields.
///
/// Serializes to the `message` wire payload, so the broadcaster never has to
/// look the sender up again.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: i64,
    pub trip_id: TripId,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub user: UserSummary,
}

/// Trims `raw` and enforces the 1..=1000 character bound.
pub fn normalize_content(raw: &str) -> Result<String, ChatError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ChatError::Validation("message content is empty".to_string()));
    }
    let chars = trimmed.chars().count();
    if chars > MAX_MESSAGE_CHARS {
        return Err(ChatError::Validation(format!(
            "message content is {chars} characters, maximum is {MAX_MESSAGE_CHARS}"
        )));
    }
    Ok(trimmed.to_string())
}

/// Validates, authorizes and persists a message from `user_id`.
///
/// Validation runs before the access check so that a malformed message never
/// costs a lookup; both run before anything is written.
pub fn post_message(
    conn: &Connection,
    trip_id: TripId,
    user_id: UserId,
    raw_content: &str,
) -> Result<ChatMessage, ChatError> {
    let content = normalize_content(raw_content)?;
    check_access(conn, user_id, trip_id)?.into_result(trip_id)?;
    insert_message(conn, trip_id, user_id, &content, Utc::now())
}

/// Inserts an already-validated message and returns the enriched record.
pub fn insert_message(
    conn: &Connection,
    trip_id: TripId,
    user_id: UserId,
    content: &str,
    created_at: DateTime<Utc>,
) -> Result<ChatMessage, ChatError> {
    let user = get_user(conn, user_id)?;

    let id: i64 = conn.query_row(
        "INSERT INTO chat_messages (trip_id, user_id, content, created_at)
         VALUES (?1, ?2, ?3, ?4)
         RETURNING id",
        params![trip_id, user_id, content, to_millis(created_at)],
        |row| row.get(0),
    )?;

    tracing::debug!(message_id = id, trip_id, user_id, "persisted chat message");

    Ok(ChatMessage {
        id,
        trip_id,
        content: content.to_string(),
        // Round-trip through millis so the returned value equals what a
        // history read will produce.
        created_at: millis_column(3, to_millis(created_at))?,
        user,
    })
}

/// Returns the most recent messages of a trip, oldest first.
///
/// `limit` defaults to [`DEFAULT_HISTORY_LIMIT`] and is capped at
/// [`MAX_HISTORY_LIMIT`].
pub fn list_recent_messages(
    conn: &Connection,
    trip_id: TripId,
    limit: Option<u32>,
) -> Result<Vec<ChatMessage>, ChatError> {
    let limit = limit
        .unwrap_or(DEFAULT_HISTORY_LIMIT)
        .clamp(1, MAX_HISTORY_LIMIT);

    let mut stmt = conn.prepare(
        "SELECT m.id, m.trip_id, m.content, m.created_at, u.id, u.name, u.avatar_url
         FROM chat_messages m JOIN users u ON u.id = m.user_id
         WHERE m.trip_id = ?1
         ORDER BY m.created_at DESC, m.id DESC
         LIMIT ?2",
    )?;

    let rows = stmt.query_map(params![trip_id, limit], map_row_to_message)?;
    let mut messages = Vec::new();
    for row in rows {
        messages.push(row?);
    }
    messages.reverse();
    Ok(messages)
}

fn map_row_to_message(row: &Row) -> rusqlite::Result<ChatMessage> {
    Ok(ChatMessage {
        id: row.get(0)?,
        trip_id: row.get(1)?,
        content: row.get(2)?,
        created_at: millis_column(3, row.get(3)?)?,
        user: UserSummary {
            id: row.get(4)?,
            name: row.get(5)?,
            avatar_url: row.get(6)?,
        },
    })
}
