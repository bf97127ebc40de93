//! REST handlers for accounts, chats and messages.

use std::sync::Arc;

use {
    axum::{
        Json, Router,
        extract::{Path, State},
        http::StatusCode,
        response::{IntoResponse, Response},
        routing::{delete, get, post},
    },
    chatrelay_auth::{HashError, TokenError},
    chatrelay_protocol::{
        AddMembersRequest, AuthResponse, ChatDetail, ChatMemberInfo, ChatSummary,
        CreateChatRequest, ErrorResponse, LoginRequest, MessageResponse, OutboundFrame,
        RegisterRequest, RelayStats, SendMessageRequest, UpdateChatRequest,
        UpdateMessageRequest, UpdateUserRequest, UserProfile,
    },
    chatrelay_store::{ChatStore, StoreError},
    tracing::{error, info, warn},
};

use crate::{auth::AuthUser, state::GatewayState};

const USERNAME_LEN: std::ops::RangeInclusive<usize> = 3..=50;
const MIN_PASSWORD_LEN: usize = 6;

// ── Errors ───────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(&'static str),
    #[error("{0}")]
    Unauthorized(&'static str),
    #[error("{0}")]
    Forbidden(&'static str),
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("{0} already exists")]
    Conflict(&'static str),
    #[error("internal server error")]
    Internal(String),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if let Self::Internal(detail) = &self {
            error!(error = %detail, "request failed");
        }
        (self.status(), Json(ErrorResponse::new(self.to_string()))).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(what) => Self::NotFound(what),
            StoreError::Conflict(what) => Self::Conflict(what),
            StoreError::Database(e) => Self::Internal(e.to_string()),
        }
    }
}

impl From<HashError> for ApiError {
    fn from(e: HashError) -> Self {
        Self::Internal(e.to_string())
    }
}

impl From<TokenError> for ApiError {
    fn from(e: TokenError) -> Self {
        Self::Internal(e.to_string())
    }
}

type ApiResult<T> = Result<T, ApiError>;

// ── Routes ───────────────────────────────────────────────────────────────────

/// Routes mounted under `/api`.
pub fn routes() -> Router<Arc<GatewayState>> {
    Router::new()
        .route("/auth/register", post(register))
        .route("/auth/login", post(login))
        .route("/auth/me", get(me))
        .route("/users", get(list_users))
        .route("/users/last-seen", post(update_last_seen))
        .route("/users/{id}", get(get_user).put(update_user).delete(delete_user))
        .route("/chats", post(create_chat).get(list_chats))
        .route("/chats/{id}", get(get_chat).put(update_chat).delete(delete_chat))
        .route("/chats/{id}/members", post(add_members))
        .route("/chats/{id}/members/{member_id}", delete(remove_member))
        .route("/chats/{id}/messages", get(list_messages))
        .route("/messages", post(send_message))
        .route(
            "/messages/{id}",
            get(get_message).delete(delete_message).patch(update_message),
        )
}

pub async fn ws_stats(State(state): State<Arc<GatewayState>>) -> Json<RelayStats> {
    Json(state.stats().await)
}

// ── Auth ─────────────────────────────────────────────────────────────────────

async fn register(
    State(state): State<Arc<GatewayState>>,
    Json(req): Json<RegisterRequest>,
) -> ApiResult<(StatusCode, Json<AuthResponse>)> {
    let username = req.username.trim().to_string();
    if !USERNAME_LEN.contains(&username.chars().count()) {
        return Err(ApiError::BadRequest("username must be 3-50 characters"));
    }
    if req.password.chars().count() < MIN_PASSWORD_LEN {
        return Err(ApiError::BadRequest("password must be at least 6 characters"));
    }
    let display_name = req
        .display_name
        .map(|d| d.trim().to_string())
        .filter(|d| !d.is_empty())
        .unwrap_or_else(|| username.clone());

    let credentials = state.credentials.clone();
    let password = req.password;
    let digest = tokio::task::spawn_blocking(move || credentials.hash(&password))
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))??;

    let user = state
        .store
        .create_user(&username, &digest, &display_name)
        .await?;
    let token = state.tokens.issue(user.id, &user.display_name)?;
    info!(user_id = user.id, username = %user.username, "registered user");

    Ok((
        StatusCode::CREATED,
        Json(AuthResponse {
            token,
            user: UserProfile::from(&user),
        }),
    ))
}

async fn login(
    State(state): State<Arc<GatewayState>>,
    Json(req): Json<LoginRequest>,
) -> ApiResult<Json<AuthResponse>> {
    const INVALID: ApiError = ApiError::Unauthorized("invalid credentials");

    let Some(mut user) = state
        .store
        .find_user_by_username(req.username.trim())
        .await?
    else {
        return Err(INVALID);
    };

    let credentials = state.credentials.clone();
    let digest = user.password_hash.clone();
    let password = req.password;
    let verified = tokio::task::spawn_blocking(move || credentials.verify(&digest, &password))
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    match verified {
        Ok(true) => {},
        Ok(false) => return Err(INVALID),
        Err(e) => {
            warn!(user_id = user.id, error = %e, "stored password digest is unusable");
            return Err(INVALID);
        },
    }

    state.store.touch_last_seen(user.id).await?;
    user.last_seen = Some(chatrelay_store::now_ms());
    let token = state.tokens.issue(user.id, &user.display_name)?;
    info!(user_id = user.id, "user logged in");

    Ok(Json(AuthResponse {
        token,
        user: UserProfile::from(&user),
    }))
}

async fn me(
    AuthUser(identity): AuthUser,
    State(state): State<Arc<GatewayState>>,
) -> ApiResult<Json<UserProfile>> {
    let user = state
        .store
        .get_user(identity.id)
        .await?
        .ok_or(ApiError::NotFound("user"))?;
    Ok(Json(UserProfile::from(&user)))
}

// ── Users ────────────────────────────────────────────────────────────────────

async fn list_users(
    AuthUser(_): AuthUser,
    State(state): State<Arc<GatewayState>>,
) -> ApiResult<Json<Vec<UserProfile>>> {
    let users = state.store.list_users().await?;
    Ok(Json(users.iter().map(UserProfile::from).collect()))
}

async fn get_user(
    AuthUser(_): AuthUser,
    State(state): State<Arc<GatewayState>>,
    Path(user_id): Path<i64>,
) -> ApiResult<Json<UserProfile>> {
    let user = state
        .store
        .get_user(user_id)
        .await?
        .ok_or(ApiError::NotFound("user"))?;
    Ok(Json(UserProfile::from(&user)))
}

async fn update_user(
    AuthUser(identity): AuthUser,
    State(state): State<Arc<GatewayState>>,
    Path(user_id): Path<i64>,
    Json(req): Json<UpdateUserRequest>,
) -> ApiResult<Json<UserProfile>> {
    if user_id != identity.id {
        return Err(ApiError::Forbidden("you can only update your own profile"));
    }
    let display_name = req
        .display_name
        .map(|d| d.trim().to_string())
        .filter(|d| !d.is_empty());

    let digest = match req.password.filter(|p| !p.is_empty()) {
        Some(password) => {
            if password.chars().count() < MIN_PASSWORD_LEN {
                return Err(ApiError::BadRequest("password must be at least 6 characters"));
            }
            let credentials = state.credentials.clone();
            let digest = tokio::task::spawn_blocking(move || credentials.hash(&password))
                .await
                .map_err(|e| ApiError::Internal(e.to_string()))??;
            Some(digest)
        },
        None => None,
    };

    let user = state
        .store
        .update_user(user_id, display_name.as_deref(), digest.as_deref())
        .await?;
    info!(
        user_id,
        display_name = display_name.is_some(),
        password = digest.is_some(),
        "updated profile"
    );
    Ok(Json(UserProfile::from(&user)))
}

async fn delete_user(
    AuthUser(identity): AuthUser,
    State(state): State<Arc<GatewayState>>,
    Path(user_id): Path<i64>,
) -> ApiResult<StatusCode> {
    if user_id != identity.id {
        return Err(ApiError::Forbidden("you can only delete your own profile"));
    }
    if !state.store.delete_user(user_id).await? {
        return Err(ApiError::NotFound("user"));
    }
    // The read loop sees the cancellation and tears the session down.
    if let Some(handle) = state.registry.lookup(user_id).await {
        handle.close();
    }
    info!(user_id, "deleted user");
    Ok(StatusCode::NO_CONTENT)
}

async fn update_last_seen(
    AuthUser(identity): AuthUser,
    State(state): State<Arc<GatewayState>>,
) -> ApiResult<StatusCode> {
    state.store.touch_last_seen(identity.id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ── Chats ────────────────────────────────────────────────────────────────────

async fn create_chat(
    AuthUser(identity): AuthUser,
    State(state): State<Arc<GatewayState>>,
    Json(req): Json<CreateChatRequest>,
) -> ApiResult<(StatusCode, Json<ChatDetail>)> {
    let name = req.name.trim();
    if name.is_empty() {
        return Err(ApiError::BadRequest("chat name is required"));
    }
    if req.member_ids.is_empty() {
        return Err(ApiError::BadRequest("at least one member is required"));
    }

    let (chat, members) = state
        .store
        .create_chat(name, req.is_group, identity.id, &req.member_ids)
        .await?;
    let summary = ChatSummary::from(&chat);
    info!(chat_id = chat.id, creator_id = identity.id, members = members.len(), "created chat");

    state.relay.notify_new_chat(&members, &summary).await;

    Ok((
        StatusCode::CREATED,
        Json(ChatDetail {
            chat: summary,
            members: member_infos(&state, chat.id).await?,
        }),
    ))
}

async fn list_chats(
    AuthUser(identity): AuthUser,
    State(state): State<Arc<GatewayState>>,
) -> ApiResult<Json<Vec<ChatSummary>>> {
    let chats = state.store.list_chats_for_user(identity.id).await?;
    Ok(Json(chats.iter().map(ChatSummary::from).collect()))
}

async fn get_chat(
    AuthUser(identity): AuthUser,
    State(state): State<Arc<GatewayState>>,
    Path(chat_id): Path<i64>,
) -> ApiResult<Json<ChatDetail>> {
    let chat = state
        .store
        .get_chat(chat_id)
        .await?
        .ok_or(ApiError::NotFound("chat"))?;
    require_member(&state, chat_id, identity.id).await?;

    Ok(Json(ChatDetail {
        chat: ChatSummary::from(&chat),
        members: member_infos(&state, chat_id).await?,
    }))
}

async fn update_chat(
    AuthUser(identity): AuthUser,
    State(state): State<Arc<GatewayState>>,
    Path(chat_id): Path<i64>,
    Json(req): Json<UpdateChatRequest>,
) -> ApiResult<Json<ChatSummary>> {
    match state.store.member_role(chat_id, identity.id).await? {
        Some(true) => {},
        Some(false) => return Err(ApiError::Forbidden("only chat admins can update the chat")),
        None => return Err(ApiError::Forbidden("not a member of this chat")),
    }
    let name = req.name.trim();
    if name.is_empty() {
        return Err(ApiError::BadRequest("chat name is required"));
    }

    let chat = state.store.rename_chat(chat_id, name).await?;
    info!(chat_id, by = identity.id, "renamed chat");
    state
        .relay
        .system(chat_id, format!("{} renamed the chat to {name}", identity.display_name))
        .await;
    Ok(Json(ChatSummary::from(&chat)))
}

async fn delete_chat(
    AuthUser(identity): AuthUser,
    State(state): State<Arc<GatewayState>>,
    Path(chat_id): Path<i64>,
) -> ApiResult<StatusCode> {
    let chat = state
        .store
        .get_chat(chat_id)
        .await?
        .ok_or(ApiError::NotFound("chat"))?;
    if chat.creator_id != identity.id {
        return Err(ApiError::Forbidden("only the creator can delete the chat"));
    }

    // Tell members while the membership rows still exist.
    state
        .relay
        .system(chat_id, format!("{} deleted the chat", identity.display_name))
        .await;
    state.store.delete_chat(chat_id).await?;
    let subscribers = state.rooms.close_room(chat_id).await;
    info!(chat_id, by = identity.id, subscribers, "deleted chat");
    Ok(StatusCode::NO_CONTENT)
}

async fn add_members(
    AuthUser(identity): AuthUser,
    State(state): State<Arc<GatewayState>>,
    Path(chat_id): Path<i64>,
    Json(req): Json<AddMembersRequest>,
) -> ApiResult<StatusCode> {
    let chat = state
        .store
        .get_chat(chat_id)
        .await?
        .ok_or(ApiError::NotFound("chat"))?;
    if state.store.member_role(chat_id, identity.id).await? != Some(true) {
        return Err(ApiError::Forbidden("only chat admins can add members"));
    }

    let mut added = Vec::new();
    for &user_id in &req.member_ids {
        if state.store.add_member(chat_id, user_id).await? {
            added.push(user_id);
        }
    }
    if !added.is_empty() {
        info!(chat_id, added = ?added, "added chat members");
        state
            .relay
            .system(chat_id, format!("{} added {} member(s)", identity.display_name, added.len()))
            .await;
        state
            .relay
            .notify_new_chat(&added, &ChatSummary::from(&chat))
            .await;
    }
    Ok(StatusCode::NO_CONTENT)
}

async fn remove_member(
    AuthUser(identity): AuthUser,
    State(state): State<Arc<GatewayState>>,
    Path((chat_id, member_id)): Path<(i64, i64)>,
) -> ApiResult<StatusCode> {
    let role = state.store.member_role(chat_id, identity.id).await?;
    let allowed = role == Some(true) || (role.is_some() && member_id == identity.id);
    if !allowed {
        return Err(ApiError::Forbidden("only chat admins can remove other members"));
    }
    if !state.store.remove_member(chat_id, member_id).await? {
        return Err(ApiError::NotFound("member"));
    }

    // Drop the live subscription so the removed member stops receiving.
    state.rooms.leave(chat_id, member_id).await;
    info!(chat_id, member_id, by = identity.id, "removed chat member");
    let text = if member_id == identity.id {
        format!("{} left the chat", identity.display_name)
    } else {
        format!("{} removed a member", identity.display_name)
    };
    state.relay.system(chat_id, text).await;
    Ok(StatusCode::NO_CONTENT)
}

// ── Messages ─────────────────────────────────────────────────────────────────

async fn send_message(
    AuthUser(identity): AuthUser,
    State(state): State<Arc<GatewayState>>,
    Json(req): Json<SendMessageRequest>,
) -> ApiResult<(StatusCode, Json<MessageResponse>)> {
    if req.content.trim().is_empty() {
        return Err(ApiError::BadRequest("message content is required"));
    }
    require_member(&state, req.chat_id, identity.id).await?;

    let record = state
        .store
        .create_message(req.chat_id, identity.id, &req.content)
        .await?;
    let frame = OutboundFrame::Message(record.to_chat_message(&identity.display_name));
    state.relay.publish(req.chat_id, &frame).await;

    Ok((StatusCode::CREATED, Json(MessageResponse::from(&record))))
}

async fn get_message(
    AuthUser(identity): AuthUser,
    State(state): State<Arc<GatewayState>>,
    Path(message_id): Path<i64>,
) -> ApiResult<Json<MessageResponse>> {
    let message = state
        .store
        .get_message(message_id)
        .await?
        .ok_or(ApiError::NotFound("message"))?;
    require_member(&state, message.chat_id, identity.id).await?;
    Ok(Json(MessageResponse::from(&message)))
}

async fn list_messages(
    AuthUser(identity): AuthUser,
    State(state): State<Arc<GatewayState>>,
    Path(chat_id): Path<i64>,
) -> ApiResult<Json<Vec<MessageResponse>>> {
    require_member(&state, chat_id, identity.id).await?;
    let messages = state.store.list_messages(chat_id).await?;
    Ok(Json(messages.iter().map(MessageResponse::from).collect()))
}

async fn update_message(
    AuthUser(identity): AuthUser,
    State(state): State<Arc<GatewayState>>,
    Path(message_id): Path<i64>,
    Json(req): Json<UpdateMessageRequest>,
) -> ApiResult<Json<MessageResponse>> {
    if req.content.trim().is_empty() {
        return Err(ApiError::BadRequest("message content is required"));
    }
    require_sender(&state, message_id, identity.id).await?;
    let record = state.store.update_message(message_id, &req.content).await?;
    Ok(Json(MessageResponse::from(&record)))
}

async fn delete_message(
    AuthUser(identity): AuthUser,
    State(state): State<Arc<GatewayState>>,
    Path(message_id): Path<i64>,
) -> ApiResult<StatusCode> {
    require_sender(&state, message_id, identity.id).await?;
    state.store.delete_message(message_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ── Helpers ──────────────────────────────────────────────────────────────────

async fn require_member(state: &GatewayState, chat_id: i64, user_id: i64) -> ApiResult<()> {
    if state.store.check_membership(chat_id, user_id).await? {
        Ok(())
    } else {
        Err(ApiError::Forbidden("not a member of this chat"))
    }
}

async fn require_sender(state: &GatewayState, message_id: i64, user_id: i64) -> ApiResult<()> {
    let message = state
        .store
        .get_message(message_id)
        .await?
        .ok_or(ApiError::NotFound("message"))?;
    if message.sender_id != user_id {
        return Err(ApiError::Forbidden("only the sender can change this message"));
    }
    Ok(())
}

async fn member_infos(state: &GatewayState, chat_id: i64) -> ApiResult<Vec<ChatMemberInfo>> {
    let members = state.store.chat_members(chat_id).await?;
    Ok(members.iter().map(ChatMemberInfo::from).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_status_codes() {
        assert_eq!(ApiError::BadRequest("x").status(), StatusCode::BAD_REQUEST);
        assert_eq!(ApiError::Forbidden("x").status(), StatusCode::FORBIDDEN);
        assert_eq!(
            ApiError::from(StoreError::Conflict("username")).status(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ApiError::from(StoreError::NotFound("chat")).to_string(),
            "chat not found"
        );
        assert_eq!(
            ApiError::Internal("disk on fire".into()).to_string(),
            "internal server error"
        );
    }
}
