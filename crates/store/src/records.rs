use {
    chatrelay_protocol::{ChatMemberInfo, ChatMessage, ChatSummary, MessageResponse, UserProfile},
    chrono::{DateTime, Utc},
    std::time::{SystemTime, UNIX_EPOCH},
};

pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

/// Stored unix milliseconds to a UTC timestamp (epoch if out of range).
pub fn to_datetime(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct UserRecord {
    pub id: i64,
    pub username: String,
    pub password_hash: String,
    pub display_name: String,
    pub created_at: i64,
    pub last_seen: Option<i64>,
}

impl From<&UserRecord> for UserProfile {
    fn from(u: &UserRecord) -> Self {
        Self {
            id: u.id,
            username: u.username.clone(),
            display_name: u.display_name.clone(),
            created_at: to_datetime(u.created_at),
            last_seen: u.last_seen.map(to_datetime),
        }
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ChatRecord {
    pub id: i64,
    pub name: String,
    pub is_group: bool,
    pub creator_id: i64,
    pub created_at: i64,
    pub updated_at: i64,
}

impl From<&ChatRecord> for ChatSummary {
    fn from(c: &ChatRecord) -> Self {
        Self {
            id: c.id,
            name: c.name.clone(),
            is_group: c.is_group,
            creator_id: c.creator_id,
            created_at: to_datetime(c.created_at),
            updated_at: to_datetime(c.updated_at),
        }
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct MemberRecord {
    pub user_id: i64,
    pub username: String,
    pub is_admin: bool,
    pub joined_at: i64,
}

impl From<&MemberRecord> for ChatMemberInfo {
    fn from(m: &MemberRecord) -> Self {
        Self {
            user_id: m.user_id,
            username: m.username.clone(),
            is_admin: m.is_admin,
            joined_at: to_datetime(m.joined_at),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct MessageRecord {
    pub id: i64,
    pub chat_id: i64,
    pub sender_id: i64,
    pub content: String,
    pub is_edited: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

impl MessageRecord {
    /// Realtime payload for this message.
    pub fn to_chat_message(&self, sender_name: &str) -> ChatMessage {
        ChatMessage {
            message_id: self.id,
            content: self.content.clone(),
            sender_id: self.sender_id,
            sender_name: sender_name.to_string(),
            chat_id: self.chat_id,
            timestamp: to_datetime(self.created_at),
        }
    }
}

impl From<&MessageRecord> for MessageResponse {
    fn from(m: &MessageRecord) -> Self {
        Self {
            id: m.id,
            content: m.content.clone(),
            sender_id: m.sender_id,
            chat_id: m.chat_id,
            is_edited: m.is_edited,
            created_at: to_datetime(m.created_at),
            updated_at: to_datetime(m.updated_at),
        }
    }
}
