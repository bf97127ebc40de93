use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex,
        atomic::{AtomicI64, Ordering},
    },
};

use {
    async_trait::async_trait,
    chatrelay_store::{ChatStore, MessageRecord, Result, StoreError, now_ms},
    tokio::sync::mpsc,
};

use crate::registry::{ClientHandle, ConnectionRegistry};

/// In-memory [`ChatStore`] with fixed memberships.
#[derive(Default)]
pub struct MockStore {
    members: HashMap<i64, Vec<i64>>,
    fail: bool,
    next_id: AtomicI64,
    pub messages: Mutex<Vec<MessageRecord>>,
}

impl MockStore {
    pub fn with_members(mut self, chat_id: i64, members: &[i64]) -> Self {
        self.members.insert(chat_id, members.to_vec());
        self
    }

    /// Every call fails.
    pub fn failing(mut self) -> Self {
        self.fail = true;
        self
    }

    fn check(&self) -> Result<()> {
        if self.fail {
            return Err(StoreError::NotFound("chat"));
        }
        Ok(())
    }
}

#[async_trait]
impl ChatStore for MockStore {
    async fn check_membership(&self, chat_id: i64, user_id: i64) -> Result<bool> {
        self.check()?;
        Ok(self
            .members
            .get(&chat_id)
            .is_some_and(|m| m.contains(&user_id)))
    }

    async fn create_message(
        &self,
        chat_id: i64,
        user_id: i64,
        content: &str,
    ) -> Result<MessageRecord> {
        self.check()?;
        let now = now_ms();
        let record = MessageRecord {
            id: self.next_id.fetch_add(1, Ordering::Relaxed) + 1,
            chat_id,
            sender_id: user_id,
            content: content.to_string(),
            is_edited: false,
            created_at: now,
            updated_at: now,
        };
        self.messages.lock().unwrap().push(record.clone());
        Ok(record)
    }

    async fn list_members(&self, chat_id: i64) -> Result<Vec<i64>> {
        self.check()?;
        Ok(self.members.get(&chat_id).cloned().unwrap_or_default())
    }
}

/// Register a fresh handle for `identity_id` and return it with its outbox.
pub async fn connect(
    registry: &Arc<ConnectionRegistry>,
    identity_id: i64,
) -> (ClientHandle, mpsc::UnboundedReceiver<String>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let handle = ClientHandle::new(tx);
    registry.register(identity_id, handle.clone()).await;
    (handle, rx)
}
