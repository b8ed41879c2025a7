//! Trip chat authorization.
//!
//! A user may use a trip's chat iff they own the trip or hold an attendee
//! row with status `approved`. Approval can be revoked at any time, so the
//! check is never cached: joins, sends, history reads and read-marker
//! updates each call [`check_access`] again.

use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use wayfare_types::{AttendeeStatus, TripId, TripRole, UserId, UserSummary};

use crate::ChatError;

/// Outcome of an access check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessDecision {
    /// The user may read and write the chat.
    Granted(TripRole),
    /// The trip exists but the user is not authorized.
    Denied,
    /// The trip does not exist (deleted or never created).
    TripNotFound,
}

impl AccessDecision {
    pub fn is_allowed(self) -> bool {
        matches!(self, Self::Granted(_))
    }

    /// Collapses the decision into the error taxonomy.
    pub fn into_result(self, trip_id: TripId) -> Result<TripRole, ChatError> {
        match self {
            Self::Granted(role) => Ok(role),
            Self::Denied => Err(ChatError::AccessDenied { trip_id }),
            Self::TripNotFound => Err(ChatError::trip_not_found(trip_id)),
        }
    }
}

/// Decides whether `user_id` may access the chat of `trip_id`.
pub fn check_access(
    conn: &Connection,
    user_id: UserId,
    trip_id: TripId,
) -> Result<AccessDecision, ChatError> {
    let row: Option<(UserId, bool)> = conn
        .query_row(
            "SELECT t.owner_id,
                    EXISTS(SELECT 1 FROM trip_attendees a
                           WHERE a.trip_id = t.id AND a.user_id = ?2 AND a.status = ?3)
             FROM trips t WHERE t.id = ?1",
            params![trip_id, user_id, AttendeeStatus::Approved.as_str()],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;

    let decision = match row {
        None => AccessDecision::TripNotFound,
        Some((owner_id, _)) if owner_id == user_id => AccessDecision::Granted(TripRole::Owner),
        Some((_, true)) => AccessDecision::Granted(TripRole::Attendee),
        Some((_, false)) => AccessDecision::Denied,
    };

    tracing::trace!(user_id, trip_id, ?decision, "chat access check");
    Ok(decision)
}

/// A user authorized for a trip's chat, regardless of whether they are
/// currently connected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizedMember {
    pub user: UserSummary,
    pub role: TripRole,
}

/// Lists the owner followed by approved attendees in approval order.
pub fn list_authorized_members(
    conn: &Connection,
    trip_id: TripId,
) -> Result<Vec<AuthorizedMember>, ChatError> {
    let owner: Option<UserSummary> = conn
        .query_row(
            "SELECT u.id, u.name, u.avatar_url
             FROM trips t JOIN users u ON u.id = t.owner_id
             WHERE t.id = ?1",
            [trip_id],
            |row| {
                Ok(UserSummary {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    avatar_url: row.get(2)?,
                })
            },
        )
        .optional()?;

    let Some(owner) = owner else {
        return Err(ChatError::trip_not_found(trip_id));
    };

    let mut members = vec![AuthorizedMember {
        user: owner,
        role: TripRole::Owner,
    }];

    let mut stmt = conn.prepare(
        "SELECT u.id, u.name, u.avatar_url
         FROM trip_attendees a JOIN users u ON u.id = a.user_id
         WHERE a.trip_id = ?1 AND a.status = ?2
         ORDER BY a.id ASC",
    )?;
    let rows = stmt.query_map(params![trip_id, AttendeeStatus::Approved.as_str()], |row| {
        Ok(UserSummary {
            id: row.get(0)?,
            name: row.get(1)?,
            avatar_url: row.get(2)?,
        })
    })?;
    for row in rows {
        let user = row?;
        // An owner who also filed a join request is listed once.
        if user.id != members[0].user.id {
            members.push(AuthorizedMember {
                user,
                role: TripRole::Attendee,
            });
        }
    }

    Ok(members)
}
