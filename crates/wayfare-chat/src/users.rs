//! Read-only lookup of user display fields.

use rusqlite::{Connection, OptionalExtension};
use wayfare_types::{UserId, UserSummary};

use crate::ChatError;

/// Retrieves the display record for a user.
pub fn get_user(conn: &Connection, user_id: UserId) -> Result<UserSummary, ChatError> {
    conn.query_row(
        "SELECT id, name, avatar_url FROM users WHERE id = ?1",
        [user_id],
        |row| {
            Ok(UserSummary {
                id: row.get(0)?,
                name: row.get(1)?,
                avatar_url: row.get(2)?,
            })
        },
    )
    .optional()?
    .ok_or_else(|| ChatError::NotFound(format!("user {user_id}")))
}
