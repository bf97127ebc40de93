use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Instant,
};

use {
    tokio::sync::{RwLock, mpsc},
    tokio_util::sync::CancellationToken,
    tracing::{debug, info, warn},
};

use crate::rooms::RoomMembership;

// ── Client handle ────────────────────────────────────────────────────────────

/// Write side of one live connection.
///
/// Frames go through an unbounded channel to the connection's single writer
/// task. Clones share the close flag and cancellation token.
#[derive(Debug, Clone)]
pub struct ClientHandle {
    conn_id: String,
    sender: mpsc::UnboundedSender<String>,
    cancel: CancellationToken,
    closed: Arc<AtomicBool>,
    pub connected_at: Instant,
}

impl ClientHandle {
    pub fn new(sender: mpsc::UnboundedSender<String>) -> Self {
        Self {
            conn_id: uuid::Uuid::new_v4().to_string(),
            sender,
            cancel: CancellationToken::new(),
            closed: Arc::new(AtomicBool::new(false)),
            connected_at: Instant::now(),
        }
    }

    pub fn conn_id(&self) -> &str {
        &self.conn_id
    }

    /// Queue a serialized frame. Returns false if the connection is closed or
    /// its writer is gone.
    pub fn send(&self, frame: &str) -> bool {
        if self.is_closed() {
            return false;
        }
        self.sender.send(frame.to_string()).is_ok()
    }

    /// Close the connection. Only the first call has any effect and returns
    /// true.
    pub fn close(&self) -> bool {
        let first = !self.closed.swap(true, Ordering::AcqRel);
        if first {
            self.cancel.cancel();
        }
        first
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Token cancelled when this connection is closed.
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn same_connection(&self, other: &Self) -> bool {
        self.conn_id == other.conn_id
    }
}

// ── Registry ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Delivered,
    NotConnected,
    /// The write failed; the handle was closed and unregistered.
    Dead,
}

/// Live connections keyed by identity, at most one per identity.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    clients: RwLock<HashMap<i64, ClientHandle>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install `handle` for `identity_id`. A prior live handle is closed
    /// before it is replaced and returned.
    pub async fn register(&self, identity_id: i64, handle: ClientHandle) -> Option<ClientHandle> {
        let conn_id = handle.conn_id.clone();
        let mut clients = self.clients.write().await;
        let prior = clients.remove(&identity_id);
        if let Some(prior) = &prior
            && !prior.same_connection(&handle)
            && prior.close()
        {
            info!(
                user_id = identity_id,
                old_conn_id = %prior.conn_id,
                new_conn_id = %conn_id,
                "superseded existing connection"
            );
        }
        clients.insert(identity_id, handle);
        debug!(user_id = identity_id, conn_id = %conn_id, "registered connection");
        prior
    }

    /// Remove the entry for `identity_id` if it is still `handle`'s
    /// connection. Returns whether anything was removed.
    pub async fn unregister(&self, identity_id: i64, handle: &ClientHandle) -> bool {
        let mut clients = self.clients.write().await;
        match clients.get(&identity_id) {
            Some(current) if current.same_connection(handle) => {
                clients.remove(&identity_id);
                debug!(user_id = identity_id, conn_id = %handle.conn_id, "unregistered connection");
                true
            },
            _ => false,
        }
    }

    /// Unregister `handle` and, if no connection for `identity_id` remains,
    /// drop its room subscriptions. Both happen under the registry write
    /// lock, so a newer connection cannot register and join in between.
    /// Returns how many rooms were swept.
    ///
    /// Lock order is registry then rooms; nothing takes them the other way.
    pub async fn release(
        &self,
        identity_id: i64,
        handle: &ClientHandle,
        rooms: &RoomMembership,
    ) -> usize {
        let mut clients = self.clients.write().await;
        if clients
            .get(&identity_id)
            .is_some_and(|current| current.same_connection(handle))
        {
            clients.remove(&identity_id);
            debug!(user_id = identity_id, conn_id = %handle.conn_id, "unregistered connection");
        }
        if clients.contains_key(&identity_id) {
            return 0;
        }
        rooms.on_disconnect(identity_id).await
    }

    pub async fn lookup(&self, identity_id: i64) -> Option<ClientHandle> {
        self.clients.read().await.get(&identity_id).cloned()
    }

    /// Write a frame to `identity_id`'s connection. The write happens after
    /// the lock is released.
    pub async fn send(&self, identity_id: i64, frame: &str) -> SendOutcome {
        let Some(handle) = self.lookup(identity_id).await else {
            return SendOutcome::NotConnected;
        };
        if handle.send(frame) {
            return SendOutcome::Delivered;
        }
        warn!(user_id = identity_id, conn_id = %handle.conn_id, "write failed, dropping connection");
        handle.close();
        self.unregister(identity_id, &handle).await;
        SendOutcome::Dead
    }

    /// Close and remove every connection. Returns how many were closed.
    pub async fn close_all(&self) -> usize {
        let drained: Vec<ClientHandle> = self.clients.write().await.drain().map(|(_, h)| h).collect();
        drained.iter().filter(|h| h.close()).count()
    }

    pub async fn count(&self) -> usize {
        self.clients.read().await.len()
    }
}
