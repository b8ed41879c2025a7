//! Per-connection chat session.
//!
//! A session binds one WebSocket connection to at most one trip chat room
//! and owns the connection's typing state. All room changes go through the
//! [`PresenceBroadcaster`] so they are announced to the rest of the room.
//!
//! Errors caused by the client (access, validation, protocol) are answered
//! on this connection only. Storage failures are logged, reported as
//! retryable, and never broadcast.
//!
//! A message is persisted before the room lock is taken for delivery, so two
//! concurrent sends may reach the room in a different order than their ids.
//! History is ordered by the stored timestamp.

use chrono::Utc;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::Instant;
use wayfare_chat::{check_access, mark_read, post_message, ChatError};
use wayfare_types::{ConnectionId, TripId, UserSummary};

use crate::presence::{deliver, PresenceBroadcaster};
use crate::protocol::{ClientEvent, ErrorPayload, ServerEvent};
use crate::registry::Membership;
use crate::{with_conn, AppState};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct TypingState {
    trip_id: TripId,
    deadline: Instant,
}

/// Chat state of one authenticated connection.
pub struct ChatSession {
    state: Arc<AppState>,
    presence: PresenceBroadcaster,
    connection_id: ConnectionId,
    user: UserSummary,
    outbox: mpsc::Sender<String>,
    current_room: Option<TripId>,
    typing: Option<TypingState>,
    disconnected: bool,
}

impl ChatSession {
    pub fn new(state: Arc<AppState>, user: UserSummary, outbox: mpsc::Sender<String>) -> Self {
        let presence = state.presence();
        Self {
            state,
            presence,
            connection_id: ConnectionId::new(),
            user,
            outbox,
            current_room: None,
            typing: None,
            disconnected: false,
        }
    }

    pub fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }

    pub fn user(&self) -> &UserSummary {
        &self.user
    }

    /// The trip whose room this connection is in, if any.
    pub fn current_room(&self) -> Option<TripId> {
        self.current_room
    }

    pub fn is_typing(&self) -> bool {
        self.typing.is_some()
    }

    /// When the current typing state stops on its own.
    pub fn typing_deadline(&self) -> Option<Instant> {
        self.typing.map(|t| t.deadline)
    }

    /// Parses and dispatches one text frame. Failures are reported back to
    /// this connection as `error` frames.
    pub async fn handle_frame(&mut self, text: &str) {
        let result = match ClientEvent::parse(text) {
            Ok(event) => self.dispatch(event).await,
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            self.reject(&e);
        }
    }

    async fn dispatch(&mut self, event: ClientEvent) -> Result<(), ChatError> {
        match event {
            ClientEvent::JoinTripChat(r) => self.join(r.trip_id).await,
            ClientEvent::LeaveTripChat(r) => {
                self.leave(r.trip_id);
                Ok(())
            }
            ClientEvent::SendMessage(m) => self.send_message(m.trip_id, m.content).await,
            ClientEvent::Typing(t) => self.set_typing(t.trip_id, t.is_typing),
        }
    }

    /// Sends an `error` frame to this connection only.
    pub fn reject(&self, err: &ChatError) {
        match err {
            ChatError::Storage(detail) => tracing::error!(
                connection_id = %self.connection_id,
                user_id = self.user.id,
                "chat storage failure: {}",
                detail
            ),
            other => tracing::debug!(
                connection_id = %self.connection_id,
                user_id = self.user.id,
                code = other.code(),
                "rejected chat request: {}",
                other
            ),
        }
        if let Some(frame) = ServerEvent::Error(ErrorPayload::from(err)).to_frame() {
            deliver(&self.outbox, self.connection_id, frame);
        }
    }

    /// Joins the chat of `trip_id`, leaving any other room first.
    ///
    /// A denied join leaves the session where it was.
    pub async fn join(&mut self, trip_id: TripId) -> Result<(), ChatError> {
        let user_id = self.user.id;
        with_conn(&self.state.pool, move |conn| {
            check_access(conn, user_id, trip_id)?.into_result(trip_id)?;
            if let Err(e) = mark_read(conn, trip_id, user_id, Utc::now()) {
                tracing::warn!(trip_id, user_id, "failed to mark chat read on join: {}", e);
            }
            Ok(())
        })
        .await?;

        if let Some(previous) = self.current_room.filter(|&t| t != trip_id) {
            self.leave(previous);
        }

        let membership = Membership::new(self.connection_id, self.user.clone(), self.outbox.clone());
        let online = self.presence.announce_join(trip_id, membership);
        self.current_room = Some(trip_id);

        tracing::info!(
            trip_id,
            user_id,
            connection_id = %self.connection_id,
            online = online.len(),
            "joined trip chat"
        );
        Ok(())
    }

    /// Leaves the chat of `trip_id`. A no-op unless this connection is in
    /// that room.
    pub fn leave(&mut self, trip_id: TripId) {
        if self.current_room != Some(trip_id) {
            return;
        }
        self.stop_typing();
        self.current_room = None;
        if self
            .presence
            .announce_leave(trip_id, self.connection_id)
            .is_some()
        {
            tracing::info!(
                trip_id,
                user_id = self.user.id,
                connection_id = %self.connection_id,
                "left trip chat"
            );
        }
    }

    /// Validates, authorizes and persists a message, then delivers it to
    /// everyone in the trip's room. The sender's read marker moves to the
    /// message timestamp.
    pub async fn send_message(&mut self, trip_id: TripId, content: String) -> Result<(), ChatError> {
        let user_id = self.user.id;
        let message = with_conn(&self.state.pool, move |conn| {
            let message = post_message(conn, trip_id, user_id, &content)?;
            if let Err(e) = mark_read(conn, trip_id, user_id, message.created_at) {
                tracing::warn!(trip_id, user_id, "failed to mark chat read on send: {}", e);
            }
            Ok(message)
        })
        .await?;

        if self.typing.is_some_and(|t| t.trip_id == trip_id) {
            self.stop_typing();
        }

        let delivered = self.presence.message(&message);
        tracing::debug!(
            trip_id,
            user_id,
            message_id = message.id,
            delivered,
            "chat message broadcast"
        );
        Ok(())
    }

    /// Starts or stops the typing indicator for `trip_id`.
    ///
    /// Only transitions are broadcast; a repeated `true` just pushes the
    /// deadline out.
    pub fn set_typing(&mut self, trip_id: TripId, is_typing: bool) -> Result<(), ChatError> {
        if self.current_room != Some(trip_id) {
            return Err(ChatError::Protocol(format!(
                "not in the chat of trip {trip_id}"
            )));
        }

        if !is_typing {
            self.stop_typing();
            return Ok(());
        }

        let deadline = Instant::now() + self.state.chat.typing_timeout();
        let was_typing = self.typing.replace(TypingState { trip_id, deadline }).is_some();
        if !was_typing {
            self.presence
                .typing(trip_id, self.connection_id, &self.user, true);
        }
        Ok(())
    }

    /// Stops typing if the deadline has passed.
    pub fn expire_typing(&mut self) {
        if self
            .typing
            .is_some_and(|t| t.deadline <= Instant::now())
        {
            self.stop_typing();
        }
    }

    fn stop_typing(&mut self) {
        if let Some(typing) = self.typing.take() {
            self.presence
                .typing(typing.trip_id, self.connection_id, &self.user, false);
        }
    }

    /// Releases the room membership. Safe to call more than once; also runs
    /// on drop.
    pub fn disconnect(&mut self) {
        if self.disconnected {
            return;
        }
        self.disconnected = true;
        if let Some(trip_id) = self.current_room {
            self.leave(trip_id);
        }
        tracing::debug!(
            connection_id = %self.connection_id,
            user_id = self.user.id,
            "chat session closed"
        );
    }
}

impl Drop for ChatSession {
    fn drop(&mut self) {
        self.disconnect();
    }
}
