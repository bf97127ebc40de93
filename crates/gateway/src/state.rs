use std::{sync::Arc, time::Instant};

use {
    chatrelay_auth::{CredentialService, TokenService},
    chatrelay_protocol::RelayStats,
    chatrelay_store::{ChatStore, SqliteStore},
};

use crate::{broadcast::BroadcastRelay, registry::ConnectionRegistry, rooms::RoomMembership};

/// Shared gateway runtime state, wrapped in Arc for use across async tasks.
pub struct GatewayState {
    /// Server version string.
    pub version: String,
    pub hostname: String,
    pub tokens: TokenService,
    pub credentials: CredentialService,
    pub store: Arc<SqliteStore>,
    /// Live connections, one per identity.
    pub registry: Arc<ConnectionRegistry>,
    /// Ephemeral room subscriptions.
    pub rooms: Arc<RoomMembership>,
    pub relay: Arc<BroadcastRelay>,
    pub started_at: Instant,
}

impl GatewayState {
    pub fn new(tokens: TokenService, store: SqliteStore) -> Arc<Self> {
        let hostname = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "unknown".into());

        let store = Arc::new(store);
        let registry = Arc::new(ConnectionRegistry::new());
        let rooms = Arc::new(RoomMembership::new());
        let relay = Arc::new(BroadcastRelay::new(
            Arc::clone(&registry),
            Arc::clone(&rooms),
            Arc::clone(&store) as Arc<dyn ChatStore>,
        ));

        Arc::new(Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            hostname,
            tokens,
            credentials: CredentialService::new(),
            store,
            registry,
            rooms,
            relay,
            started_at: Instant::now(),
        })
    }

    pub async fn stats(&self) -> RelayStats {
        RelayStats {
            connected_identities: self.registry.count().await,
            active_rooms: self.rooms.room_count().await,
        }
    }
}
