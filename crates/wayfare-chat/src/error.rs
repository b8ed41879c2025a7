//! Error taxonomy shared by the persistent and realtime chat layers.

use wayfare_types::TripId;

/// Errors surfaced by chat operations.
///
/// Every variant is recoverable for the connection that caused it. Only
/// [`ChatError::Storage`] is worth retrying.
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    /// The trip (or user) no longer exists.
    #[error("{0} not found")]
    NotFound(String),

    /// The user is neither the owner nor an approved attendee.
    #[error("access denied to chat for trip {trip_id}")]
    AccessDenied { trip_id: TripId },

    /// Message content failed validation.
    #[error("invalid message: {0}")]
    Validation(String),

    /// The backing store failed.
    #[error("storage error: {0}")]
    Storage(String),

    /// A client frame was malformed or not valid in the current state.
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl ChatError {
    /// Stable machine-readable code sent alongside error frames.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::AccessDenied { .. } => "access_denied",
            Self::Validation(_) => "validation",
            Self::Storage(_) => "storage",
            Self::Protocol(_) => "protocol",
        }
    }

    /// Whether the client may retry the same request unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Storage(_))
    }

    pub(crate) fn trip_not_found(trip_id: TripId) -> Self {
        Self::NotFound(format!("trip {trip_id}"))
    }
}

impl From<rusqlite::Error> for ChatError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Storage(err.to_string())
    }
}

impl From<r2d2::Error> for ChatError {
    fn from(err: r2d2::Error) -> Self {
        Self::Storage(format!("pool error: {err}"))
    }
}
