//! Gateway: HTTP API and realtime relay.
//!
//! Lifecycle:
//! 1. Load config, open the store
//! 2. Build the token service and shared state
//! 3. Start the HTTP server (health, REST API, stats)
//! 4. Attach the WebSocket upgrade handler, which authenticates before
//!    upgrading
//!
//! Each connection runs a [`session::Session`] that talks to the shared
//! [`registry::ConnectionRegistry`], [`rooms::RoomMembership`] and
//! [`broadcast::BroadcastRelay`].

pub mod api;
pub mod auth;
pub mod broadcast;
pub mod registry;
pub mod rooms;
pub mod server;
pub mod session;
pub mod state;
pub mod ws;

#[cfg(test)]
mod test_support;

pub use {
    broadcast::{BroadcastRelay, PublishReport},
    registry::{ClientHandle, ConnectionRegistry, SendOutcome},
    rooms::RoomMembership,
    server::{build_gateway_app, start_gateway, token_service},
    session::{DispatchOutcome, Session, SessionError, SessionState},
    state::GatewayState,
};
