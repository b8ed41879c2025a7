//! Read watermarks and unread accounting.
//!
//! One row per (trip, user) holds the newest timestamp the user has read up
//! to, plus the newest message id that existed at that moment. Writes are
//! upserts that keep the larger pair, so a late or replayed mark never moves
//! the watermark backward. A message counts as unread for a user when someone
//! else wrote it after the watermark. Timestamps have millisecond precision,
//! so a message stamped in the same millisecond as the mark is unread only if
//! its id is above the recorded one.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use wayfare_types::{AttendeeStatus, TripId, UserId};

use crate::{millis_column, to_millis, ChatError};

/// Advances the read watermark of `user_id` on `trip_id` to `at`, unless it
/// is already later. Returns the effective watermark.
pub fn mark_read(
    conn: &Connection,
    trip_id: TripId,
    user_id: UserId,
    at: DateTime<Utc>,
) -> Result<DateTime<Utc>, ChatError> {
    let effective: i64 = conn.query_row(
        "INSERT INTO chat_read_markers (trip_id, user_id, last_read_at, last_read_message_id)
         VALUES (?1, ?2, ?3,
                 (SELECT COALESCE(MAX(id), 0) FROM chat_messages
                  WHERE trip_id = ?1 AND created_at <= ?3))
         ON CONFLICT(trip_id, user_id)
         DO UPDATE SET
             last_read_message_id = CASE
                 WHEN excluded.last_read_at > chat_read_markers.last_read_at
                     THEN excluded.last_read_message_id
                 WHEN excluded.last_read_at = chat_read_markers.last_read_at
                     THEN MAX(chat_read_markers.last_read_message_id, excluded.last_read_message_id)
                 ELSE chat_read_markers.last_read_message_id
             END,
             last_read_at = MAX(chat_read_markers.last_read_at, excluded.last_read_at)
         RETURNING last_read_at",
        params![trip_id, user_id, to_millis(at)],
        |row| row.get(0),
    )?;
    Ok(millis_column(0, effective)?)
}

/// Returns the current watermark, or `None` if the user never read the chat.
pub fn last_read_at(
    conn: &Connection,
    trip_id: TripId,
    user_id: UserId,
) -> Result<Option<DateTime<Utc>>, ChatError> {
    let millis: Option<i64> = conn
        .query_row(
            "SELECT last_read_at FROM chat_read_markers WHERE trip_id = ?1 AND user_id = ?2",
            params![trip_id, user_id],
            |row| row.get(0),
        )
        .optional()?;
    Ok(millis.map(|m| millis_column(0, m)).transpose()?)
}

/// Counts messages in `trip_id` written by others after the user's watermark.
pub fn unread_count(conn: &Connection, trip_id: TripId, user_id: UserId) -> Result<u64, ChatError> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM chat_messages m
         LEFT JOIN chat_read_markers r
                ON r.trip_id = m.trip_id AND r.user_id = ?2
         WHERE m.trip_id = ?1
           AND m.user_id != ?2
           AND (r.last_read_at IS NULL
                OR m.created_at > r.last_read_at
                OR (m.created_at = r.last_read_at AND m.id > r.last_read_message_id))",
        params![trip_id, user_id],
        |row| row.get(0),
    )?;
    Ok(count.max(0) as u64)
}

/// Unread count for one trip.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TripUnread {
    pub trip_id: TripId,
    pub unread: u64,
}

/// Unread counts for every trip whose chat the user may access, ordered by
/// trip id.
pub fn unread_counts(conn: &Connection, user_id: UserId) -> Result<Vec<TripUnread>, ChatError> {
    let mut stmt = conn.prepare(
        "SELECT t.id,
                (SELECT COUNT(*) FROM chat_messages m
                 LEFT JOIN chat_read_markers r
                        ON r.trip_id = m.trip_id AND r.user_id = ?1
                 WHERE m.trip_id = t.id
                   AND m.user_id != ?1
                   AND (r.last_read_at IS NULL
                        OR m.created_at > r.last_read_at
                        OR (m.created_at = r.last_read_at
                            AND m.id > r.last_read_message_id)))
         FROM trips t
         WHERE t.owner_id = ?1
            OR EXISTS(SELECT 1 FROM trip_attendees a
                      WHERE a.trip_id = t.id AND a.user_id = ?1 AND a.status = ?2)
         ORDER BY t.id ASC",
    )?;

    let rows = stmt.query_map(params![user_id, AttendeeStatus::Approved.as_str()], |row| {
        let unread: i64 = row.get(1)?;
        Ok(TripUnread {
            trip_id: row.get(0)?,
            unread: unread.max(0) as u64,
        })
    })?;

    let mut counts = Vec::new();
    for row in rows {
        counts.push(row?);
    }
    Ok(counts)
}
