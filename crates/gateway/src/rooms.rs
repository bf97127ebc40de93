use std::collections::{HashMap, HashSet};

use {tokio::sync::RwLock, tracing::debug};

/// Ephemeral room subscriptions: which live identities asked to receive a
/// chat's messages. Memory only; empty rooms are dropped immediately.
#[derive(Debug, Default)]
pub struct RoomMembership {
    rooms: RwLock<HashMap<i64, HashSet<i64>>>,
}

impl RoomMembership {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe `identity_id` to `room_id`. Returns false if already joined.
    pub async fn join(&self, room_id: i64, identity_id: i64) -> bool {
        self.rooms
            .write()
            .await
            .entry(room_id)
            .or_default()
            .insert(identity_id)
    }

    /// Unsubscribe. Returns false if `identity_id` wasn't in the room.
    pub async fn leave(&self, room_id: i64, identity_id: i64) -> bool {
        let mut rooms = self.rooms.write().await;
        let Some(members) = rooms.get_mut(&room_id) else {
            return false;
        };
        let removed = members.remove(&identity_id);
        if members.is_empty() {
            rooms.remove(&room_id);
        }
        removed
    }

    pub async fn members_of(&self, room_id: i64) -> HashSet<i64> {
        self.rooms
            .read()
            .await
            .get(&room_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Remove `identity_id` from every room. Walks all live rooms. Returns
    /// how many rooms it was removed from.
    pub async fn on_disconnect(&self, identity_id: i64) -> usize {
        let mut rooms = self.rooms.write().await;
        let mut left = 0;
        rooms.retain(|_, members| {
            if members.remove(&identity_id) {
                left += 1;
            }
            !members.is_empty()
        });
        if left > 0 {
            debug!(user_id = identity_id, rooms = left, "swept room subscriptions");
        }
        left
    }

    /// Drop a room and every subscription in it. Returns how many
    /// identities were subscribed.
    pub async fn close_room(&self, room_id: i64) -> usize {
        let dropped = self
            .rooms
            .write()
            .await
            .remove(&room_id)
            .map_or(0, |members| members.len());
        if dropped > 0 {
            debug!(room_id, subscribers = dropped, "closed room");
        }
        dropped
    }

    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }
}
