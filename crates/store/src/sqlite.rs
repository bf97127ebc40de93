use std::str::FromStr;

use {
    async_trait::async_trait,
    sqlx::{
        SqlitePool,
        sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    },
    tracing::debug,
};

use crate::{
    ChatStore, Result, StoreError,
    records::{ChatRecord, MemberRecord, MessageRecord, UserRecord, now_ms},
};

const SCHEMA: &[&str] = &[
    r#"CREATE TABLE IF NOT EXISTS users (
        id            INTEGER PRIMARY KEY AUTOINCREMENT,
        username      TEXT NOT NULL UNIQUE,
        password_hash TEXT NOT NULL,
        display_name  TEXT NOT NULL,
        created_at    INTEGER NOT NULL,
        last_seen     INTEGER
    )"#,
    r#"CREATE TABLE IF NOT EXISTS chats (
        id         INTEGER PRIMARY KEY AUTOINCREMENT,
        name       TEXT NOT NULL,
        is_group   INTEGER NOT NULL DEFAULT 0,
        creator_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL
    )"#,
    r#"CREATE TABLE IF NOT EXISTS chat_members (
        chat_id   INTEGER NOT NULL REFERENCES chats(id) ON DELETE CASCADE,
        user_id   INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
        is_admin  INTEGER NOT NULL DEFAULT 0,
        joined_at INTEGER NOT NULL,
        PRIMARY KEY (chat_id, user_id)
    )"#,
    r#"CREATE TABLE IF NOT EXISTS messages (
        id         INTEGER PRIMARY KEY AUTOINCREMENT,
        chat_id    INTEGER NOT NULL REFERENCES chats(id) ON DELETE CASCADE,
        sender_id  INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
        content    TEXT NOT NULL,
        is_edited  INTEGER NOT NULL DEFAULT 0,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL
    )"#,
    "CREATE INDEX IF NOT EXISTS idx_chat_members_user ON chat_members(user_id)",
    "CREATE INDEX IF NOT EXISTS idx_messages_chat ON messages(chat_id, created_at)",
];

const USER_COLUMNS: &str = "id, username, password_hash, display_name, created_at, last_seen";
const CHAT_COLUMNS: &str = "id, name, is_group, creator_id, created_at, updated_at";
const MESSAGE_COLUMNS: &str =
    "id, chat_id, sender_id, content, is_edited, created_at, updated_at";

/// SQLite-backed store for users, chats, memberships and messages.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open (creating if needed) the database at `url` and ensure the schema.
    pub async fn connect(url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new().connect_with(options).await?;
        Self::init(&pool).await?;
        debug!(url, "store ready");
        Ok(Self::new(pool))
    }

    /// A private in-memory database. One connection, never recycled, so every
    /// query sees the same database.
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;
        Self::init(&pool).await?;
        Ok(Self::new(pool))
    }

    /// Create tables and indexes if they don't exist.
    pub async fn init(pool: &SqlitePool) -> Result<()> {
        for statement in SCHEMA {
            sqlx::query(*statement).execute(pool).await?;
        }
        Ok(())
    }

    // ── Users ────────────────────────────────────────────────────────────────

    pub async fn create_user(
        &self,
        username: &str,
        password_hash: &str,
        display_name: &str,
    ) -> Result<UserRecord> {
        let now = now_ms();
        let id = sqlx::query(
            "INSERT INTO users (username, password_hash, display_name, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(username)
        .bind(password_hash)
        .bind(display_name)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                StoreError::Conflict("username")
            },
            other => other.into(),
        })?
        .last_insert_rowid();

        Ok(UserRecord {
            id,
            username: username.to_string(),
            password_hash: password_hash.to_string(),
            display_name: display_name.to_string(),
            created_at: now,
            last_seen: None,
        })
    }

    pub async fn get_user(&self, user_id: i64) -> Result<Option<UserRecord>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?");
        Ok(sqlx::query_as::<_, UserRecord>(&sql)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?)
    }

    pub async fn find_user_by_username(&self, username: &str) -> Result<Option<UserRecord>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE username = ?");
        Ok(sqlx::query_as::<_, UserRecord>(&sql)
            .bind(username)
            .fetch_optional(&self.pool)
            .await?)
    }

    /// All users, alphabetical by username.
    pub async fn list_users(&self) -> Result<Vec<UserRecord>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users ORDER BY username ASC");
        Ok(sqlx::query_as::<_, UserRecord>(&sql)
            .fetch_all(&self.pool)
            .await?)
    }

    /// Change the display name and/or password hash. `None` leaves a field as is.
    pub async fn update_user(
        &self,
        user_id: i64,
        display_name: Option<&str>,
        password_hash: Option<&str>,
    ) -> Result<UserRecord> {
        let result = sqlx::query(
            r#"UPDATE users
               SET display_name  = COALESCE(?, display_name),
                   password_hash = COALESCE(?, password_hash)
               WHERE id = ?"#,
        )
        .bind(display_name)
        .bind(password_hash)
        .bind(user_id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound("user"));
        }
        self.get_user(user_id)
            .await?
            .ok_or(StoreError::NotFound("user"))
    }

    /// Delete a user. Their memberships, messages and created chats go with them.
    pub async fn delete_user(&self, user_id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM users WHERE id = ?")
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn touch_last_seen(&self, user_id: i64) -> Result<()> {
        sqlx::query("UPDATE users SET last_seen = ? WHERE id = ?")
            .bind(now_ms())
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn user_exists<'e, E>(executor: E, user_id: i64) -> Result<bool>
    where
        E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
    {
        Ok(
            sqlx::query_scalar::<_, bool>("SELECT EXISTS(SELECT 1 FROM users WHERE id = ?)")
                .bind(user_id)
                .fetch_one(executor)
                .await?,
        )
    }

    // ── Chats ────────────────────────────────────────────────────────────────

    /// Create a chat with `creator_id` as admin. Listed members that don't
    /// exist are skipped. Returns the chat and the ids actually added,
    /// creator first.
    pub async fn create_chat(
        &self,
        name: &str,
        is_group: bool,
        creator_id: i64,
        member_ids: &[i64],
    ) -> Result<(ChatRecord, Vec<i64>)> {
        let now = now_ms();
        let mut tx = self.pool.begin().await?;

        let chat_id = sqlx::query(
            "INSERT INTO chats (name, is_group, creator_id, created_at, updated_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(name)
        .bind(is_group)
        .bind(creator_id)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await?
        .last_insert_rowid();

        sqlx::query(
            "INSERT INTO chat_members (chat_id, user_id, is_admin, joined_at) VALUES (?, ?, 1, ?)",
        )
        .bind(chat_id)
        .bind(creator_id)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        let mut members = vec![creator_id];
        for &user_id in member_ids {
            if members.contains(&user_id) {
                continue;
            }
            if !Self::user_exists(&mut *tx, user_id).await? {
                debug!(chat_id, user_id, "skipping unknown member");
                continue;
            }
            sqlx::query(
                "INSERT INTO chat_members (chat_id, user_id, is_admin, joined_at) VALUES (?, ?, 0, ?)",
            )
            .bind(chat_id)
            .bind(user_id)
            .bind(now)
            .execute(&mut *tx)
            .await?;
            members.push(user_id);
        }

        tx.commit().await?;

        let chat = ChatRecord {
            id: chat_id,
            name: name.to_string(),
            is_group,
            creator_id,
            created_at: now,
            updated_at: now,
        };
        Ok((chat, members))
    }

    pub async fn get_chat(&self, chat_id: i64) -> Result<Option<ChatRecord>> {
        let sql = format!("SELECT {CHAT_COLUMNS} FROM chats WHERE id = ?");
        Ok(sqlx::query_as::<_, ChatRecord>(&sql)
            .bind(chat_id)
            .fetch_optional(&self.pool)
            .await?)
    }

    pub async fn rename_chat(&self, chat_id: i64, name: &str) -> Result<ChatRecord> {
        let result = sqlx::query("UPDATE chats SET name = ?, updated_at = ? WHERE id = ?")
            .bind(name)
            .bind(now_ms())
            .bind(chat_id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound("chat"));
        }
        self.get_chat(chat_id)
            .await?
            .ok_or(StoreError::NotFound("chat"))
    }

    /// Delete a chat along with its memberships and messages.
    pub async fn delete_chat(&self, chat_id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM chats WHERE id = ?")
            .bind(chat_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Chats `user_id` belongs to, most recently active first.
    pub async fn list_chats_for_user(&self, user_id: i64) -> Result<Vec<ChatRecord>> {
        Ok(sqlx::query_as::<_, ChatRecord>(
            r#"SELECT c.id, c.name, c.is_group, c.creator_id, c.created_at, c.updated_at
               FROM chats c
               JOIN chat_members m ON m.chat_id = c.id
               WHERE m.user_id = ?
               ORDER BY c.updated_at DESC, c.id DESC"#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?)
    }

    pub async fn chat_members(&self, chat_id: i64) -> Result<Vec<MemberRecord>> {
        Ok(sqlx::query_as::<_, MemberRecord>(
            r#"SELECT m.user_id, u.username, m.is_admin, m.joined_at
               FROM chat_members m
               JOIN users u ON u.id = m.user_id
               WHERE m.chat_id = ?
               ORDER BY m.joined_at ASC, m.user_id ASC"#,
        )
        .bind(chat_id)
        .fetch_all(&self.pool)
        .await?)
    }

    /// `Some(is_admin)` when `user_id` is a member of `chat_id`.
    pub async fn member_role(&self, chat_id: i64, user_id: i64) -> Result<Option<bool>> {
        Ok(sqlx::query_scalar::<_, bool>(
            "SELECT is_admin FROM chat_members WHERE chat_id = ? AND user_id = ?",
        )
        .bind(chat_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?)
    }

    /// Add a non-admin member. Returns false if already a member or the user
    /// doesn't exist.
    pub async fn add_member(&self, chat_id: i64, user_id: i64) -> Result<bool> {
        if !Self::user_exists(&self.pool, user_id).await? {
            return Ok(false);
        }
        let result = sqlx::query(
            "INSERT OR IGNORE INTO chat_members (chat_id, user_id, is_admin, joined_at) VALUES (?, ?, 0, ?)",
        )
        .bind(chat_id)
        .bind(user_id)
        .bind(now_ms())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn remove_member(&self, chat_id: i64, user_id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM chat_members WHERE chat_id = ? AND user_id = ?")
            .bind(chat_id)
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    // ── Messages ─────────────────────────────────────────────────────────────

    pub async fn list_messages(&self, chat_id: i64) -> Result<Vec<MessageRecord>> {
        let sql = format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages WHERE chat_id = ? ORDER BY created_at ASC, id ASC"
        );
        Ok(sqlx::query_as::<_, MessageRecord>(&sql)
            .bind(chat_id)
            .fetch_all(&self.pool)
            .await?)
    }

    pub async fn get_message(&self, message_id: i64) -> Result<Option<MessageRecord>> {
        let sql = format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?");
        Ok(sqlx::query_as::<_, MessageRecord>(&sql)
            .bind(message_id)
            .fetch_optional(&self.pool)
            .await?)
    }

    pub async fn update_message(&self, message_id: i64, content: &str) -> Result<MessageRecord> {
        let result =
            sqlx::query("UPDATE messages SET content = ?, is_edited = 1, updated_at = ? WHERE id = ?")
                .bind(content)
                .bind(now_ms())
                .bind(message_id)
                .execute(&self.pool)
                .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound("message"));
        }
        self.get_message(message_id)
            .await?
            .ok_or(StoreError::NotFound("message"))
    }

    pub async fn delete_message(&self, message_id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM messages WHERE id = ?")
            .bind(message_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl ChatStore for SqliteStore {
    async fn check_membership(&self, chat_id: i64, user_id: i64) -> Result<bool> {
        Ok(self.member_role(chat_id, user_id).await?.is_some())
    }

    async fn create_message(
        &self,
        chat_id: i64,
        user_id: i64,
        content: &str,
    ) -> Result<MessageRecord> {
        let now = now_ms();
        let mut tx = self.pool.begin().await?;
        let id = sqlx::query(
            "INSERT INTO messages (chat_id, sender_id, content, created_at, updated_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(chat_id)
        .bind(user_id)
        .bind(content)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await?
        .last_insert_rowid();
        sqlx::query("UPDATE chats SET updated_at = ? WHERE id = ?")
            .bind(now)
            .bind(chat_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        Ok(MessageRecord {
            id,
            chat_id,
            sender_id: user_id,
            content: content.to_string(),
            is_edited: false,
            created_at: now,
            updated_at: now,
        })
    }

    async fn list_members(&self, chat_id: i64) -> Result<Vec<i64>> {
        Ok(sqlx::query_scalar::<_, i64>(
            "SELECT user_id FROM chat_members WHERE chat_id = ? ORDER BY user_id ASC",
        )
        .bind(chat_id)
        .fetch_all(&self.pool)
        .await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn store_with_users(names: &[&str]) -> (SqliteStore, Vec<i64>) {
        let store = SqliteStore::in_memory().await.unwrap();
        let mut ids = Vec::new();
        for name in names {
            let user = store.create_user(name, "hash", name).await.unwrap();
            ids.push(user.id);
        }
        (store, ids)
    }

    #[tokio::test]
    async fn duplicate_username_conflicts() {
        let (store, _) = store_with_users(&["alice"]).await;
        let err = store.create_user("alice", "h", "Alice").await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict("username")));
    }

    #[tokio::test]
    async fn find_and_touch_user() {
        let (store, ids) = store_with_users(&["alice"]).await;
        let found = store.find_user_by_username("alice").await.unwrap().unwrap();
        assert_eq!(found.id, ids[0]);
        assert!(found.last_seen.is_none());

        store.touch_last_seen(ids[0]).await.unwrap();
        assert!(store.get_user(ids[0]).await.unwrap().unwrap().last_seen.is_some());
        assert!(store.find_user_by_username("nobody").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn create_chat_skips_unknown_members() {
        let (store, ids) = store_with_users(&["alice", "bob"]).await;
        let (chat, members) = store
            .create_chat("pair", false, ids[0], &[ids[1], 9_999, ids[0], ids[1]])
            .await
            .unwrap();
        assert_eq!(members, vec![ids[0], ids[1]]);
        assert_eq!(store.list_members(chat.id).await.unwrap(), vec![ids[0], ids[1]]);
        assert_eq!(store.member_role(chat.id, ids[0]).await.unwrap(), Some(true));
        assert_eq!(store.member_role(chat.id, ids[1]).await.unwrap(), Some(false));
        assert_eq!(store.member_role(chat.id, 9_999).await.unwrap(), None);
    }

    #[tokio::test]
    async fn membership_add_remove() {
        let (store, ids) = store_with_users(&["alice", "bob", "carol"]).await;
        let (chat, _) = store.create_chat("g", true, ids[0], &[ids[1]]).await.unwrap();

        assert!(!store.check_membership(chat.id, ids[2]).await.unwrap());
        assert!(store.add_member(chat.id, ids[2]).await.unwrap());
        assert!(!store.add_member(chat.id, ids[2]).await.unwrap());
        assert!(!store.add_member(chat.id, 4_242).await.unwrap());
        assert!(store.check_membership(chat.id, ids[2]).await.unwrap());

        assert!(store.remove_member(chat.id, ids[1]).await.unwrap());
        assert!(!store.remove_member(chat.id, ids[1]).await.unwrap());

        let names: Vec<String> = store
            .chat_members(chat.id)
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.username)
            .collect();
        assert_eq!(names, vec!["alice", "carol"]);

        let chats = store.list_chats_for_user(ids[2]).await.unwrap();
        assert_eq!(chats.len(), 1);
        assert_eq!(chats[0].name, "g");
        assert!(chats[0].is_group);
    }

    #[tokio::test]
    async fn message_lifecycle() {
        let (store, ids) = store_with_users(&["alice", "bob"]).await;
        let (chat, _) = store.create_chat("c", false, ids[0], &[ids[1]]).await.unwrap();

        let first = store.create_message(chat.id, ids[0], "one").await.unwrap();
        let second = store.create_message(chat.id, ids[1], "two").await.unwrap();
        assert!(!first.is_edited);

        let listed = store.list_messages(chat.id).await.unwrap();
        assert_eq!(listed, vec![first.clone(), second.clone()]);

        let edited = store.update_message(first.id, "uno").await.unwrap();
        assert!(edited.is_edited);
        assert_eq!(edited.content, "uno");

        assert!(store.delete_message(second.id).await.unwrap());
        assert!(store.get_message(second.id).await.unwrap().is_none());
        assert!(matches!(
            store.update_message(second.id, "x").await,
            Err(StoreError::NotFound("message"))
        ));
    }

    #[tokio::test]
    async fn users_list_update_delete() {
        let (store, ids) = store_with_users(&["carol", "alice", "bob"]).await;
        let names: Vec<String> = store
            .list_users()
            .await
            .unwrap()
            .into_iter()
            .map(|u| u.username)
            .collect();
        assert_eq!(names, vec!["alice", "bob", "carol"]);

        let renamed = store.update_user(ids[1], Some("Alice A."), None).await.unwrap();
        assert_eq!(renamed.display_name, "Alice A.");
        assert_eq!(renamed.password_hash, "hash");

        let rehashed = store.update_user(ids[1], None, Some("new-hash")).await.unwrap();
        assert_eq!(rehashed.display_name, "Alice A.");
        assert_eq!(rehashed.password_hash, "new-hash");

        assert!(matches!(
            store.update_user(9_999, Some("x"), None).await,
            Err(StoreError::NotFound("user"))
        ));

        let (chat, _) = store.create_chat("c", false, ids[0], &[ids[2]]).await.unwrap();
        store.create_message(chat.id, ids[2], "hi").await.unwrap();
        assert!(store.delete_user(ids[0]).await.unwrap());
        assert!(!store.delete_user(ids[0]).await.unwrap());
        assert!(store.get_user(ids[0]).await.unwrap().is_none());
        assert!(store.get_chat(chat.id).await.unwrap().is_none());
        assert!(store.list_chats_for_user(ids[2]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn rename_and_delete_chat() {
        let (store, ids) = store_with_users(&["alice", "bob"]).await;
        let (chat, _) = store.create_chat("old", true, ids[0], &[ids[1]]).await.unwrap();
        let message = store.create_message(chat.id, ids[1], "hi").await.unwrap();

        let renamed = store.rename_chat(chat.id, "new").await.unwrap();
        assert_eq!(renamed.name, "new");
        assert!(renamed.updated_at >= chat.updated_at);
        assert!(matches!(
            store.rename_chat(9_999, "x").await,
            Err(StoreError::NotFound("chat"))
        ));

        assert!(store.delete_chat(chat.id).await.unwrap());
        assert!(!store.delete_chat(chat.id).await.unwrap());
        assert!(store.list_members(chat.id).await.unwrap().is_empty());
        assert!(store.get_message(message.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn chat_message_payload_carries_sender_name() {
        let (store, ids) = store_with_users(&["alice"]).await;
        let (chat, _) = store.create_chat("solo", false, ids[0], &[ids[0]]).await.unwrap();
        let record = store.create_message(chat.id, ids[0], "hey").await.unwrap();
        let payload = record.to_chat_message("Alice");
        assert_eq!(payload.message_id, record.id);
        assert_eq!(payload.sender_name, "Alice");
        assert_eq!(payload.chat_id, chat.id);
        assert_eq!(payload.timestamp.timestamp_millis(), record.created_at);
    }
}
