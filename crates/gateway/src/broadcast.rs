use std::sync::Arc;

use {
    chatrelay_protocol::{ChatSummary, OutboundFrame},
    chatrelay_store::ChatStore,
    tracing::{debug, error, warn},
};

use crate::{
    registry::{ConnectionRegistry, SendOutcome},
    rooms::RoomMembership,
};

/// What happened to one publish.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublishReport {
    /// Recipients came from persisted membership because nobody was
    /// subscribed.
    pub used_fallback: bool,
    pub delivered: Vec<i64>,
    /// Recipients without a live connection.
    pub offline: Vec<i64>,
    /// Recipients whose write failed; their handles were dropped.
    pub pruned: Vec<i64>,
}

impl PublishReport {
    pub fn recipients(&self) -> usize {
        self.delivered.len() + self.offline.len() + self.pruned.len()
    }
}

/// Fans frames out to the live connections of a room.
pub struct BroadcastRelay {
    registry: Arc<ConnectionRegistry>,
    rooms: Arc<RoomMembership>,
    store: Arc<dyn ChatStore>,
}

impl BroadcastRelay {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        rooms: Arc<RoomMembership>,
        store: Arc<dyn ChatStore>,
    ) -> Self {
        Self {
            registry,
            rooms,
            store,
        }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub fn rooms(&self) -> &Arc<RoomMembership> {
        &self.rooms
    }

    pub fn store(&self) -> &Arc<dyn ChatStore> {
        &self.store
    }

    /// Deliver `frame` to the room's live subscribers, or to every persisted
    /// member of the chat when nobody is subscribed. Best effort: offline
    /// recipients are skipped and nothing is queued.
    pub async fn publish(&self, room_id: i64, frame: &OutboundFrame) -> PublishReport {
        let mut recipients: Vec<i64> = self.rooms.members_of(room_id).await.into_iter().collect();
        let used_fallback = recipients.is_empty();
        if used_fallback {
            recipients = match self.store.list_members(room_id).await {
                Ok(members) => members,
                Err(e) => {
                    error!(chat_id = room_id, error = %e, "failed to load chat members for fanout");
                    return PublishReport::default();
                },
            };
        }
        recipients.sort_unstable();
        recipients.dedup();

        let mut report = self.fanout(&recipients, frame).await;
        report.used_fallback = used_fallback;
        debug!(
            chat_id = room_id,
            fallback = used_fallback,
            delivered = report.delivered.len(),
            offline = report.offline.len(),
            pruned = report.pruned.len(),
            "published frame"
        );
        report
    }

    /// Publish a system notice to a room.
    pub async fn system(&self, room_id: i64, text: impl Into<String>) -> PublishReport {
        self.publish(room_id, &OutboundFrame::system(room_id, text))
            .await
    }

    /// Tell the listed identities about a chat they were added to.
    pub async fn notify_new_chat(&self, user_ids: &[i64], chat: &ChatSummary) -> PublishReport {
        self.fanout(user_ids, &OutboundFrame::NewChat(chat.clone()))
            .await
    }

    async fn fanout(&self, recipients: &[i64], frame: &OutboundFrame) -> PublishReport {
        let mut report = PublishReport::default();
        let text = match serde_json::to_string(frame) {
            Ok(text) => text,
            Err(e) => {
                error!(error = %e, "failed to serialize outbound frame");
                return report;
            },
        };
        for &user_id in recipients {
            match self.registry.send(user_id, &text).await {
                SendOutcome::Delivered => report.delivered.push(user_id),
                SendOutcome::NotConnected => report.offline.push(user_id),
                SendOutcome::Dead => {
                    warn!(user_id, "pruned dead recipient");
                    report.pruned.push(user_id);
                },
            }
        }
        report
    }
}
