//! Fan-out of chat events to the connections of a room.
//!
//! Every fan-out happens inside a registry callback, under the room lock,
//! so all members observe one order of events per room. Delivery is a
//! non-blocking `try_send` into each connection's bounded outbox: a full
//! queue drops the frame for that connection only.

use tokio::sync::mpsc;
use wayfare_chat::ChatMessage;
use wayfare_types::{ConnectionId, OnlineUser, TripId, UserSummary};

use crate::protocol::{PresenceChange, RoomSnapshot, ServerEvent, TypingChange};
use crate::registry::{Membership, Room, RoomRegistry};

/// Publishes membership, typing and message events through the registry.
#[derive(Clone)]
pub struct PresenceBroadcaster {
    registry: RoomRegistry,
}

impl PresenceBroadcaster {
    pub fn new(registry: RoomRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &RoomRegistry {
        &self.registry
    }

    /// Adds the membership, acknowledges the joining connection with
    /// `joined-trip-chat` and, if the membership is new, tells the rest of
    /// the room with `user-joined`.
    pub fn announce_join(&self, trip_id: TripId, membership: Membership) -> Vec<OnlineUser> {
        let user = membership.user().clone();
        self.registry
            .join(trip_id, membership, |room, connection_id, inserted| {
                let online_users = room.online_users();

                let ack = ServerEvent::JoinedTripChat(RoomSnapshot {
                    trip_id,
                    online_users: online_users.clone(),
                });
                if let Some(frame) = ack.to_frame() {
                    if let Some(own) = room.members().find(|m| m.connection_id() == connection_id) {
                        deliver(own.outbox(), own.connection_id(), frame);
                    }
                }

                if inserted {
                    let joined = ServerEvent::UserJoined(PresenceChange {
                        trip_id,
                        user_id: user.id,
                        user_name: user.name.clone(),
                        online_users,
                    });
                    fan_out(room, &joined, Some(connection_id));
                }
            })
            .online_users
    }

    /// Removes the membership and tells the remaining connections with
    /// `user-left`. Returns `None` if the connection was not in the room.
    pub fn announce_leave(
        &self,
        trip_id: TripId,
        connection_id: ConnectionId,
    ) -> Option<Vec<OnlineUser>> {
        self.registry.leave(trip_id, connection_id, |room, removed| {
            let left = ServerEvent::UserLeft(PresenceChange {
                trip_id,
                user_id: removed.user().id,
                user_name: removed.user().name.clone(),
                online_users: room.online_users(),
            });
            fan_out(room, &left, None);
        })
    }

    /// Sends `user-typing` to everyone in the room except the typist.
    pub fn typing(&self, trip_id: TripId, from: ConnectionId, user: &UserSummary, is_typing: bool) {
        let event = ServerEvent::UserTyping(TypingChange {
            trip_id,
            user_id: user.id,
            user_name: user.name.clone(),
            is_typing,
        });
        self.registry
            .with_room(trip_id, |room| fan_out(room, &event, Some(from)));
    }

    /// Sends a persisted message to the whole room, sender included.
    ///
    /// Returns the number of connections the frame was queued for.
    pub fn message(&self, message: &ChatMessage) -> usize {
        let event = ServerEvent::Message(message.clone());
        self.registry
            .with_room(message.trip_id, |room| fan_out(room, &event, None))
            .unwrap_or(0)
    }
}

/// Queues `event` for every member of `room` except `except`.
///
/// Returns the number of connections the frame was queued for.
pub(crate) fn fan_out(room: &Room, event: &ServerEvent, except: Option<ConnectionId>) -> usize {
    let Some(frame) = event.to_frame() else {
        return 0;
    };
    let mut delivered = 0;
    for member in room.members() {
        if Some(member.connection_id()) == except {
            continue;
        }
        if deliver(member.outbox(), member.connection_id(), frame.clone()) {
            delivered += 1;
        }
    }
    delivered
}

/// Queues one frame without waiting. Returns `false` if it was dropped.
pub(crate) fn deliver(outbox: &mpsc::Sender<String>, connection_id: ConnectionId, frame: String) -> bool {
    match outbox.try_send(frame) {
        Ok(()) => true,
        Err(mpsc::error::TrySendError::Full(_)) => {
            tracing::warn!(
                connection_id = %connection_id,
                "dropping chat frame for slow consumer"
            );
            false
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {
            tracing::debug!(connection_id = %connection_id, "outbox closed, frame discarded");
            false
        }
    }
}
