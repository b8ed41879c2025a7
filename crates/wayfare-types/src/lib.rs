//! Shared types for the Wayfare trip chat.
//!
//! Identifiers, attendee status codes and the user display records that
//! travel between the persistence crates and the realtime server. Nothing in
//! here touches the database or the network.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Primary key of a trip in the relational store.
pub type TripId = i64;

/// Primary key of a user in the relational store.
pub type UserId = i64;

/// Identity of one physical connection.
///
/// Independent of the user: a user with two open tabs holds two
/// connection ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    /// Allocates a fresh random connection id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Status of a join request on a trip.
///
/// Only `Approved` grants chat access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttendeeStatus {
    /// Request submitted, waiting for the owner.
    Pending,
    /// Owner accepted the request.
    Approved,
    /// Owner declined the request.
    Rejected,
}

impl AttendeeStatus {
    /// Returns the label stored in the `trip_attendees.status` column.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }

    /// Parses a stored status label.
    ///
    /// Returns `None` for unrecognized labels.
    pub fn from_label(label: &str) -> Option<Self> {
        match label {
            "pending" => Some(Self::Pending),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            _ => None,
        }
    }
}

/// Why a user is allowed into a trip's chat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TripRole {
    /// The user created the trip.
    Owner,
    /// The user's join request was approved.
    Attendee,
}

/// Display fields of a user, as embedded in outgoing chat payloads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSummary {
    pub id: UserId,
    pub name: String,
    pub avatar_url: Option<String>,
}

/// One entry of a room's `onlineUsers` list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OnlineUser {
    pub user_id: UserId,
    pub user_name: String,
    pub avatar_url: Option<String>,
}

impl From<&UserSummary> for OnlineUser {
    fn from(user: &UserSummary) -> Self {
        Self {
            user_id: user.id,
            user_name: user.name.clone(),
            avatar_url: user.avatar_url.clone(),
        }
    }
}
