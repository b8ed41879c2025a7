//! WebSocket wire protocol.
//!
//! Every frame is a JSON object `{"type": <event>, "payload": {...}}` with
//! kebab-case event names and camelCase payload fields. Client frames are a
//! closed set; anything that does not parse into [`ClientEvent`] is a
//! protocol error.

use serde::{Deserialize, Serialize};
use wayfare_chat::{ChatError, ChatMessage};
use wayfare_types::{OnlineUser, TripId, UserId};

/// Frames accepted from clients.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "kebab-case")]
pub enum ClientEvent {
    JoinTripChat(TripRef),
    LeaveTripChat(TripRef),
    SendMessage(SendMessage),
    Typing(Typing),
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TripRef {
    pub trip_id: TripId,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessage {
    pub trip_id: TripId,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Typing {
    pub trip_id: TripId,
    pub is_typing: bool,
}

impl ClientEvent {
    /// Parses a text frame.
    pub fn parse(text: &str) -> Result<Self, ChatError> {
        serde_json::from_str(text)
            .map_err(|e| ChatError::Protocol(format!("invalid message format: {e}")))
    }
}

/// Frames sent to clients.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "payload", rename_all = "kebab-case")]
pub enum ServerEvent {
    /// Acknowledges a join to the joining connection only.
    JoinedTripChat(RoomSnapshot),
    UserJoined(PresenceChange),
    UserLeft(PresenceChange),
    UserTyping(TypingChange),
    Message(ChatMessage),
    Error(ErrorPayload),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomSnapshot {
    pub trip_id: TripId,
    pub online_users: Vec<OnlineUser>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceChange {
    pub trip_id: TripId,
    pub user_id: UserId,
    pub user_name: String,
    pub online_users: Vec<OnlineUser>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingChange {
    pub trip_id: TripId,
    pub user_id: UserId,
    pub user_name: String,
    pub is_typing: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorPayload {
    pub message: String,
    pub code: &'static str,
    pub retryable: bool,
}

impl From<&ChatError> for ErrorPayload {
    fn from(err: &ChatError) -> Self {
        let message = match err {
            // Storage details stay in the server log.
            ChatError::Storage(_) => "internal storage error, please retry".to_string(),
            other => other.to_string(),
        };
        Self {
            message,
            code: err.code(),
            retryable: err.is_retryable(),
        }
    }
}

impl ServerEvent {
    /// Serializes the event into a text frame.
    ///
    /// Serialization of these types cannot fail in practice; if it ever does
    /// the frame is dropped and the failure logged.
    pub fn to_frame(&self) -> Option<String> {
        match serde_json::to_string(self) {
            Ok(json) => Some(json),
            Err(e) => {
                tracing::error!("failed to serialize outgoing websocket event: {}", e);
                None
            }
        }
    }
}
