//! Persistent side of Wayfare trip chat.
//!
//! - [`access`]: who may read and write a trip's chat (owner or approved
//!   attendee), re-evaluated on every call.
//! - [`messages`]: content validation, persistence and history queries.
//! - [`read_markers`]: per-user read watermarks and unread counts.
//! - [`users`]: display-field lookup for handshake and payload enrichment.
//!
//! All functions take a borrowed [`rusqlite::Connection`] and are blocking;
//! async callers run them on `spawn_blocking` with a pooled connection.

pub mod access;
pub mod error;
pub mod messages;
pub mod read_markers;
pub mod users;

pub use access::{check_access, list_authorized_members, AccessDecision, AuthorizedMember};
pub use error::ChatError;
pub use messages::{
    insert_message, list_recent_messages, normalize_content, post_message, ChatMessage,
    DEFAULT_HISTORY_LIMIT, MAX_HISTORY_LIMIT, MAX_MESSAGE_CHARS,
};
pub use read_markers::{last_read_at, mark_read, unread_count, unread_counts, TripUnread};
pub use users::get_user;

use chrono::{DateTime, Utc};

/// Converts a timestamp to the epoch-millisecond form stored in SQLite.
pub(crate) fn to_millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

/// Reads an epoch-millisecond column back into a timestamp.
pub(crate) fn millis_column(idx: usize, millis: i64) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp_millis(millis).ok_or_else(|| {
        rusqlite::Error::IntegralValueOutOfRange(idx, millis)
    })
}
