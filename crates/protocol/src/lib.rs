//! Realtime frames and REST payloads shared by the gateway, the store and
//! clients.
//!
//! Realtime frames are JSON objects of the form `{"type": ..., "payload": ...}`.
//! Inbound frames are decoded exactly once into [`Event`]; outbound frames are
//! built as [`OutboundFrame`] and serialized once per broadcast.

pub mod api;
pub mod frames;

pub use {
    api::{
        AddMembersRequest, AuthResponse, ChatDetail, ChatMemberInfo, ChatSummary,
        CreateChatRequest, ErrorResponse, LoginRequest, MessageResponse, RegisterRequest,
        RelayStats, SendMessageRequest, UpdateChatRequest, UpdateMessageRequest,
        UpdateUserRequest, UserProfile,
    },
    frames::{ChatMessage, Event, OutboundFrame, SystemNotice},
};

/// Path of the realtime endpoint.
pub const WS_PATH: &str = "/ws";

/// Query parameter carrying the session token on the realtime endpoint.
pub const TOKEN_QUERY_PARAM: &str = "token";

/// Inbound frame type names.
pub mod frame_types {
    pub const MESSAGE: &str = "message";
    pub const JOIN_CHAT: &str = "join_chat";
    pub const LEAVE_CHAT: &str = "leave_chat";
}
