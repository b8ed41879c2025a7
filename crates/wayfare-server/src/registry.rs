//! In-memory room registry.
//!
//! Maps each trip to the live connections currently in its chat. Each room
//! sits behind its own mutex so traffic in one trip never waits on another;
//! the outer index lock is only held long enough to look up, insert or
//! remove a room handle.
//!
//! Lock ordering: room -> index. A joiner never holds the index lock while
//! waiting for a room lock, so the leaver that removes an empty room (room
//! lock held, then index lock) cannot deadlock with it. A room removed from
//! the index is flagged `closed`; a joiner that raced the removal and locked
//! the stale handle retries against a fresh one.
//!
//! Neither lock is ever held across an `.await`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::mpsc;
use wayfare_types::{ConnectionId, OnlineUser, TripId, UserId, UserSummary};

/// One live connection inside a room.
#[derive(Debug, Clone)]
pub struct Membership {
    connection_id: ConnectionId,
    user: UserSummary,
    outbox: mpsc::Sender<String>,
}

impl Membership {
    pub fn new(connection_id: ConnectionId, user: UserSummary, outbox: mpsc::Sender<String>) -> Self {
        Self {
            connection_id,
            user,
            outbox,
        }
    }

    pub fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }

    pub fn user(&self) -> &UserSummary {
        &self.user
    }

    /// Queue of serialized frames drained by the connection's writer task.
    pub(crate) fn outbox(&self) -> &mpsc::Sender<String> {
        &self.outbox
    }
}

/// Live memberships of one trip chat, in join order.
#[derive(Debug)]
pub struct Room {
    trip_id: TripId,
    members: Vec<Membership>,
    closed: bool,
}

impl Room {
    fn new(trip_id: TripId) -> Self {
        Self {
            trip_id,
            members: Vec::new(),
            closed: false,
        }
    }

    pub fn trip_id(&self) -> TripId {
        self.trip_id
    }

    /// One entry per distinct user, in order of their first live membership.
    pub fn online_users(&self) -> Vec<OnlineUser> {
        let mut users: Vec<OnlineUser> = Vec::new();
        for member in &self.members {
            if !users.iter().any(|u| u.user_id == member.user.id) {
                users.push(OnlineUser::from(&member.user));
            }
        }
        users
    }

    pub fn connection_count(&self) -> usize {
        self.members.len()
    }

    pub fn contains(&self, connection_id: ConnectionId) -> bool {
        self.members
            .iter()
            .any(|m| m.connection_id == connection_id)
    }

    pub fn is_user_online(&self, user_id: UserId) -> bool {
        self.members.iter().any(|m| m.user.id == user_id)
    }

    pub(crate) fn members(&self) -> impl Iterator<Item = &Membership> {
        self.members.iter()
    }
}

type RoomHandle = Arc<Mutex<Room>>;

/// Result of [`RoomRegistry::join`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinOutcome {
    /// Online users after the join.
    pub online_users: Vec<OnlineUser>,
    /// `false` when the connection was already in the room.
    pub inserted: bool,
}

/// Shared registry of trip chat rooms.
#[derive(Clone, Default)]
pub struct RoomRegistry {
    rooms: Arc<RwLock<HashMap<TripId, RoomHandle>>>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `membership` to the room of `trip_id`, creating the room if
    /// needed.
    ///
    /// `on_joined` runs while the room lock is held, after the membership is
    /// in place, so anything it sends is ordered against every other event
    /// of the room. It receives `false` when the connection was already a
    /// member, in which case nothing was inserted.
    pub fn join<F>(&self, trip_id: TripId, membership: Membership, on_joined: F) -> JoinOutcome
    where
        F: FnOnce(&Room, ConnectionId, bool),
    {
        let connection_id = membership.connection_id;
        let mut pending = Some(membership);
        loop {
            let handle = self.room_handle(trip_id);
            let mut room = lock_room(&handle);
            if room.closed {
                continue;
            }

            let inserted = !room.contains(connection_id);
            if let Some(membership) = pending.take().filter(|_| inserted) {
                room.members.push(membership);
            }
            on_joined(&*room, connection_id, inserted);

            tracing::debug!(
                trip_id,
                connection_id = %connection_id,
                connections = room.connection_count(),
                inserted,
                "connection joined trip chat room"
            );

            return JoinOutcome {
                online_users: room.online_users(),
                inserted,
            };
        }
    }

    /// Removes `connection_id` from the room of `trip_id`.
    ///
    /// `on_left` runs under the room lock with the room already updated and
    /// the removed membership. An empty room is dropped from the index
    /// before the lock is released. Returns `None` when the connection was
    /// not in the room.
    pub fn leave<F>(
        &self,
        trip_id: TripId,
        connection_id: ConnectionId,
        on_left: F,
    ) -> Option<Vec<OnlineUser>>
    where
        F: FnOnce(&Room, &Membership),
    {
        let handle = self.read_rooms().get(&trip_id).cloned()?;
        let mut room = lock_room(&handle);

        let index = room
            .members
            .iter()
            .position(|m| m.connection_id == connection_id)?;
        let removed = room.members.remove(index);
        on_left(&*room, &removed);
        let online_users = room.online_users();

        if room.members.is_empty() {
            room.closed = true;
            let mut rooms = self.write_rooms();
            if rooms
                .get(&trip_id)
                .is_some_and(|current| Arc::ptr_eq(current, &handle))
            {
                rooms.remove(&trip_id);
                tracing::debug!(trip_id, "removed empty trip chat room");
            }
        }

        Some(online_users)
    }

    /// Snapshot of the users online in `trip_id`. Empty when no room exists.
    pub fn list_online(&self, trip_id: TripId) -> Vec<OnlineUser> {
        self.with_room(trip_id, Room::online_users)
            .unwrap_or_default()
    }

    /// Runs `f` against the room of `trip_id` under its lock.
    pub fn with_room<T, F>(&self, trip_id: TripId, f: F) -> Option<T>
    where
        F: FnOnce(&Room) -> T,
    {
        let handle = self.read_rooms().get(&trip_id).cloned()?;
        let room = lock_room(&handle);
        if room.closed {
            return None;
        }
        Some(f(&*room))
    }

    pub fn is_online(&self, trip_id: TripId, user_id: UserId) -> bool {
        self.with_room(trip_id, |room| room.is_user_online(user_id))
            .unwrap_or(false)
    }

    pub fn room_count(&self) -> usize {
        self.read_rooms().len()
    }

    /// Total live memberships across all rooms.
    pub fn connection_count(&self) -> usize {
        let handles: Vec<RoomHandle> = self.read_rooms().values().cloned().collect();
        handles
            .iter()
            .map(|handle| lock_room(handle).connection_count())
            .sum()
    }

    fn room_handle(&self, trip_id: TripId) -> RoomHandle {
        if let Some(handle) = self.read_rooms().get(&trip_id) {
            return handle.clone();
        }
        self.write_rooms()
            .entry(trip_id)
            .or_insert_with(|| Arc::new(Mutex::new(Room::new(trip_id))))
            .clone()
    }

    fn read_rooms(&self) -> RwLockReadGuard<'_, HashMap<TripId, RoomHandle>> {
        match self.rooms.read() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::error!("room index lock poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    fn write_rooms(&self) -> RwLockWriteGuard<'_, HashMap<TripId, RoomHandle>> {
        match self.rooms.write() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::error!("room index lock poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }
}

fn lock_room(handle: &RoomHandle) -> MutexGuard<'_, Room> {
    match handle.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            tracing::error!("room lock poisoned, recovering");
            poisoned.into_inner()
        }
    }
}
