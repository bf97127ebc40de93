//! Per-connection session state machine.
//!
//! `Connecting → Authenticated → Active → Closed`. A session authenticates
//! before the upgrade completes, registers its handle when the socket is up,
//! then handles one decoded [`Event`] per text frame until it is closed.

use std::sync::Arc;

use {
    chatrelay_auth::{Identity, TokenError, TokenService},
    chatrelay_protocol::{Event, OutboundFrame},
    tracing::{debug, error, info, warn},
};

use crate::{
    auth::verify_token,
    broadcast::{BroadcastRelay, PublishReport},
    registry::ClientHandle,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Authenticated,
    Active,
    Closed,
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("no session token supplied")]
    MissingToken,
    #[error(transparent)]
    Token(#[from] TokenError),
    #[error("operation not allowed in state {0:?}")]
    InvalidState(SessionState),
}

/// Result of handling one inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Published(PublishReport),
    Joined(i64),
    Left(i64),
    /// The sender isn't a member of the chat.
    Rejected(i64),
    /// Store failure; nothing was sent.
    Failed,
    /// Malformed, unrecognized, or the session isn't active.
    Ignored,
}

pub struct Session {
    state: SessionState,
    identity: Option<Identity>,
    handle: Option<ClientHandle>,
    relay: Arc<BroadcastRelay>,
}

impl Session {
    pub fn new(relay: Arc<BroadcastRelay>) -> Self {
        Self {
            state: SessionState::Connecting,
            identity: None,
            handle: None,
            relay,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn identity(&self) -> Option<&Identity> {
        self.identity.as_ref()
    }

    /// `Connecting → Authenticated`. On failure the session stays in
    /// `Connecting` and nothing is registered.
    pub fn authenticate(
        &mut self,
        tokens: &TokenService,
        token: Option<&str>,
    ) -> Result<&Identity, SessionError> {
        if self.state != SessionState::Connecting {
            return Err(SessionError::InvalidState(self.state));
        }
        let Some(token) = token.filter(|t| !t.is_empty()) else {
            debug!(reason = "token_missing", "rejected realtime connection");
            return Err(SessionError::MissingToken);
        };
        let identity = verify_token(tokens, token)?;
        self.state = SessionState::Authenticated;
        Ok(self.identity.insert(identity))
    }

    /// `Authenticated → Active`: install `handle` in the registry, superseding
    /// any earlier connection for the same identity.
    pub async fn activate(&mut self, handle: ClientHandle) -> Result<(), SessionError> {
        let (SessionState::Authenticated, Some(identity)) = (self.state, self.identity.as_ref())
        else {
            return Err(SessionError::InvalidState(self.state));
        };
        self.relay
            .registry()
            .register(identity.id, handle.clone())
            .await;
        info!(user_id = identity.id, conn_id = %handle.conn_id(), "session active");
        self.handle = Some(handle);
        self.state = SessionState::Active;
        Ok(())
    }

    /// Handle one text frame.
    pub async fn dispatch(&self, text: &str) -> DispatchOutcome {
        let (SessionState::Active, Some(identity)) = (self.state, self.identity.as_ref()) else {
            return DispatchOutcome::Ignored;
        };
        let user_id = identity.id;

        let event = match Event::decode(text) {
            Ok(event) => event,
            Err(e) => {
                warn!(user_id, error = %e, "dropping malformed frame");
                return DispatchOutcome::Ignored;
            },
        };

        match event {
            Event::Chat { chat_id, content } => {
                if let Err(outcome) = self.require_membership(chat_id, user_id).await {
                    return outcome;
                }
                let record = match self
                    .relay
                    .store()
                    .create_message(chat_id, user_id, &content)
                    .await
                {
                    Ok(record) => record,
                    Err(e) => {
                        error!(user_id, chat_id, error = %e, "failed to persist message");
                        return DispatchOutcome::Failed;
                    },
                };
                let frame = OutboundFrame::Message(record.to_chat_message(&identity.display_name));
                DispatchOutcome::Published(self.relay.publish(chat_id, &frame).await)
            },
            Event::Join { chat_id } => {
                if let Err(outcome) = self.require_membership(chat_id, user_id).await {
                    return outcome;
                }
                self.relay.rooms().join(chat_id, user_id).await;
                debug!(user_id, chat_id, "joined room");
                DispatchOutcome::Joined(chat_id)
            },
            Event::Leave { chat_id } => {
                if let Err(outcome) = self.require_membership(chat_id, user_id).await {
                    return outcome;
                }
                self.relay.rooms().leave(chat_id, user_id).await;
                debug!(user_id, chat_id, "left room");
                DispatchOutcome::Left(chat_id)
            },
            Event::Unrecognized { kind } => {
                debug!(user_id, kind = %kind, "ignoring unrecognized frame type");
                DispatchOutcome::Ignored
            },
        }
    }

    async fn require_membership(&self, chat_id: i64, user_id: i64) -> Result<(), DispatchOutcome> {
        match self
            .relay
            .store()
            .check_membership(chat_id, user_id)
            .await
        {
            Ok(true) => Ok(()),
            Ok(false) => {
                warn!(user_id, chat_id, "not a member of chat");
                Err(DispatchOutcome::Rejected(chat_id))
            },
            Err(e) => {
                error!(user_id, chat_id, error = %e, "membership check failed");
                Err(DispatchOutcome::Failed)
            },
        }
    }

    /// Move to `Closed`. Unregisters the handle and, unless a newer connection
    /// for the same identity is live, drops the identity's room
    /// subscriptions. Returns false if already closed.
    pub async fn close(&mut self) -> bool {
        if self.state == SessionState::Closed {
            return false;
        }
        self.state = SessionState::Closed;

        let (Some(identity), Some(handle)) = (self.identity.as_ref(), self.handle.take()) else {
            return true;
        };
        handle.close();
        self.relay
            .registry()
            .release(identity.id, &handle, self.relay.rooms())
            .await;
        info!(
            user_id = identity.id,
            conn_id = %handle.conn_id(),
            connected_secs = handle.connected_at.elapsed().as_secs(),
            "session closed"
        );
        true
    }
}
