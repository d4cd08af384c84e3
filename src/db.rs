use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use sqlx::any::AnyRow;
use sqlx::{AnyPool, Row};
use std::borrow::Cow;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DbKind {
    Sqlite,
    Postgres,
}

pub fn db_kind_from_url(url: &str) -> DbKind {
    let lower = url.to_lowercase();
    if lower.starts_with("postgres://") || lower.starts_with("postgresql://") {
        DbKind::Postgres
    } else {
        DbKind::Sqlite
    }
}

pub fn rewrite_sql<'a>(sql: &'a str, kind: DbKind) -> Cow<'a, str> {
    match kind {
        DbKind::Sqlite => Cow::Borrowed(sql),
        DbKind::Postgres => {
            let mut out = String::with_capacity(sql.len() + 8);
            let mut idx = 1;
            for ch in sql.chars() {
                if ch == '?' {
                    out.push('$');
                    out.push_str(&idx.to_string());
                    idx += 1;
                } else {
                    out.push(ch);
                }
            }
            Cow::Owned(out)
        }
    }
}

pub fn new_id(prefix: &str) -> String {
    format!("{}_{}", prefix, Uuid::new_v4().simple())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatbotConfig {
    pub id: String,
    pub owner_account_id: String,
    pub welcome_message: String,
    pub media_url: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatbotOption {
    pub id: String,
    pub chatbot_id: String,
    pub option_key: String,
    pub label: String,
    pub answer: String,
    pub media_url: Option<String>,
    pub media_type: Option<String>,
    pub sort_order: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationState {
    pub id: String,
    pub owner_account_id: String,
    pub chat_id: String,
    pub last_message_time: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// Persistence for chatbot configuration and per-chat conversation state.
#[async_trait]
pub trait ChatbotStore: Send + Sync {
    async fn find_chatbot(&self, owner_account_id: &str) -> Result<Option<ChatbotConfig>>;

    /// Inserts, or updates the owner's existing chatbot in place.
    async fn save_chatbot(&self, config: &ChatbotConfig) -> Result<()>;

    /// Removes the chatbot and its options. Returns false if there was none.
    async fn delete_chatbot(&self, owner_account_id: &str) -> Result<bool>;

    /// Options in display order.
    async fn list_options(&self, chatbot_id: &str) -> Result<Vec<ChatbotOption>>;

    /// Inserts, or updates the option with the same key in place.
    async fn save_option(&self, option: &ChatbotOption) -> Result<()>;

    async fn delete_option(&self, chatbot_id: &str, option_key: &str) -> Result<bool>;

    async fn find_conversation(
        &self,
        owner_account_id: &str,
        chat_id: &str,
    ) -> Result<Option<ConversationState>>;

    /// Creates the (owner, chat) row or bumps its last message time.
    async fn touch_conversation(
        &self,
        owner_account_id: &str,
        chat_id: &str,
        at: DateTime<Utc>,
    ) -> Result<()>;
}

pub(crate) fn i64_to_datetime(ts: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(ts, 0).single().unwrap_or_else(Utc::now)
}

pub(crate) fn datetime_to_i64(dt: DateTime<Utc>) -> i64 {
    dt.timestamp()
}

pub async fn init_db(pool: &AnyPool, kind: DbKind) -> Result<()> {
    let stmts = vec![
        r#"CREATE TABLE IF NOT EXISTS chatbots (
            id TEXT PRIMARY KEY,
            owner_account_id TEXT NOT NULL UNIQUE,
            welcome_message TEXT NOT NULL,
            media_url TEXT,
            is_active INTEGER NOT NULL,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )"#,
        r#"CREATE TABLE IF NOT EXISTS chatbot_options (
            id TEXT PRIMARY KEY,
            chatbot_id TEXT NOT NULL,
            option_key TEXT NOT NULL,
            label TEXT NOT NULL,
            answer TEXT NOT NULL,
            media_url TEXT,
            media_type TEXT,
            sort_order INTEGER NOT NULL,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            UNIQUE (chatbot_id, option_key)
        )"#,
        r#"CREATE INDEX IF NOT EXISTS idx_options_chatbot ON chatbot_options(chatbot_id, sort_order)"#,
        r#"CREATE TABLE IF NOT EXISTS conversation_states (
            id TEXT PRIMARY KEY,
            owner_account_id TEXT NOT NULL,
            chat_id TEXT NOT NULL,
            last_message_time INTEGER NOT NULL,
            created_at INTEGER NOT NULL,
            UNIQUE (owner_account_id, chat_id)
        )"#,
    ];

    for stmt in stmts {
        let sql = rewrite_sql(stmt, kind);
        sqlx::query(sql.as_ref()).execute(pool).await?;
    }

    Ok(())
}

#[derive(Clone)]
pub struct SqlChatbotStore {
    pool: AnyPool,
    kind: DbKind,
}

impl SqlChatbotStore {
    pub fn new(pool: AnyPool, kind: DbKind) -> Self {
        Self { pool, kind }
    }

    /// Connects and creates the schema if needed.
    pub async fn connect(url: &str) -> Result<Self> {
        sqlx::any::install_default_drivers();
        let kind = db_kind_from_url(url);
        let pool = AnyPool::connect(url).await?;
        init_db(&pool, kind).await?;
        Ok(Self { pool, kind })
    }

    pub fn pool(&self) -> &AnyPool {
        &self.pool
    }

    pub fn kind(&self) -> DbKind {
        self.kind
    }
}

fn chatbot_from_row(row: &AnyRow) -> Result<ChatbotConfig> {
    let is_active: i64 = row.try_get("is_active")?;
    let created_at: i64 = row.try_get("created_at")?;
    let updated_at: i64 = row.try_get("updated_at")?;
    Ok(ChatbotConfig {
        id: row.try_get("id")?,
        owner_account_id: row.try_get("owner_account_id")?,
        welcome_message: row.try_get("welcome_message")?,
        media_url: row.try_get("media_url")?,
        is_active: is_active != 0,
        created_at: i64_to_datetime(created_at),
        updated_at: i64_to_datetime(updated_at),
    })
}

fn option_from_row(row: &AnyRow) -> Result<ChatbotOption> {
    let created_at: i64 = row.try_get("created_at")?;
    let updated_at: i64 = row.try_get("updated_at")?;
    Ok(ChatbotOption {
        id: row.try_get("id")?,
        chatbot_id: row.try_get("chatbot_id")?,
        option_key: row.try_get("option_key")?,
        label: row.try_get("label")?,
        answer: row.try_get("answer")?,
        media_url: row.try_get("media_url")?,
        media_type: row.try_get("media_type")?,
        sort_order: row.try_get("sort_order")?,
        created_at: i64_to_datetime(created_at),
        updated_at: i64_to_datetime(updated_at),
    })
}

fn conversation_from_row(row: &AnyRow) -> Result<ConversationState> {
    let last_message_time: i64 = row.try_get("last_message_time")?;
    let created_at: i64 = row.try_get("created_at")?;
    Ok(ConversationState {
        id: row.try_get("id")?,
        owner_account_id: row.try_get("owner_account_id")?,
        chat_id: row.try_get("chat_id")?,
        last_message_time: i64_to_datetime(last_message_time),
        created_at: i64_to_datetime(created_at),
    })
}

#[async_trait]
impl ChatbotStore for SqlChatbotStore {
    async fn find_chatbot(&self, owner_account_id: &str) -> Result<Option<ChatbotConfig>> {
        let sql = rewrite_sql(
            r#"SELECT id, owner_account_id, welcome_message, media_url, is_active, created_at, updated_at
               FROM chatbots WHERE owner_account_id = ?"#,
            self.kind,
        );
        let row = sqlx::query(sql.as_ref())
            .bind(owner_account_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(chatbot_from_row).transpose()
    }

    async fn save_chatbot(&self, config: &ChatbotConfig) -> Result<()> {
        let sql = rewrite_sql(
            r#"INSERT INTO chatbots (
                id, owner_account_id, welcome_message, media_url, is_active, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(owner_account_id) DO UPDATE SET
                welcome_message=excluded.welcome_message,
                media_url=excluded.media_url,
                is_active=excluded.is_active,
                updated_at=excluded.updated_at"#,
            self.kind,
        );
        sqlx::query(sql.as_ref())
            .bind(&config.id)
            .bind(&config.owner_account_id)
            .bind(&config.welcome_message)
            .bind(config.media_url.as_deref())
            .bind(config.is_active as i64)
            .bind(datetime_to_i64(config.created_at))
            .bind(datetime_to_i64(config.updated_at))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn delete_chatbot(&self, owner_account_id: &str) -> Result<bool> {
        let Some(config) = self.find_chatbot(owner_account_id).await? else {
            return Ok(false);
        };
        let mut tx = self.pool.begin().await?;
        let sql = rewrite_sql("DELETE FROM chatbot_options WHERE chatbot_id = ?", self.kind);
        sqlx::query(sql.as_ref())
            .bind(&config.id)
            .execute(&mut *tx)
            .await?;
        let sql = rewrite_sql("DELETE FROM chatbots WHERE id = ?", self.kind);
        sqlx::query(sql.as_ref())
            .bind(&config.id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(true)
    }

    async fn list_options(&self, chatbot_id: &str) -> Result<Vec<ChatbotOption>> {
        let sql = rewrite_sql(
            r#"SELECT id, chatbot_id, option_key, label, answer, media_url, media_type, sort_order, created_at, updated_at
               FROM chatbot_options WHERE chatbot_id = ? ORDER BY sort_order ASC, option_key ASC"#,
            self.kind,
        );
        let rows = sqlx::query(sql.as_ref())
            .bind(chatbot_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(option_from_row).collect()
    }

    async fn save_option(&self, option: &ChatbotOption) -> Result<()> {
        let sql = rewrite_sql(
            r#"INSERT INTO chatbot_options (
                id, chatbot_id, option_key, label, answer, media_url, media_type, sort_order, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(chatbot_id, option_key) DO UPDATE SET
                label=excluded.label,
                answer=excluded.answer,
                media_url=excluded.media_url,
                media_type=excluded.media_type,
                sort_order=excluded.sort_order,
                updated_at=excluded.updated_at"#,
            self.kind,
        );
        sqlx::query(sql.as_ref())
            .bind(&option.id)
            .bind(&option.chatbot_id)
            .bind(&option.option_key)
            .bind(&option.label)
            .bind(&option.answer)
            .bind(option.media_url.as_deref())
            .bind(option.media_type.as_deref())
            .bind(option.sort_order)
            .bind(datetime_to_i64(option.created_at))
            .bind(datetime_to_i64(option.updated_at))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn delete_option(&self, chatbot_id: &str, option_key: &str) -> Result<bool> {
        let sql = rewrite_sql(
            "DELETE FROM chatbot_options WHERE chatbot_id = ? AND option_key = ?",
            self.kind,
        );
        let done = sqlx::query(sql.as_ref())
            .bind(chatbot_id)
            .bind(option_key)
            .execute(&self.pool)
            .await?;
        Ok(done.rows_affected() > 0)
    }

    async fn find_conversation(
        &self,
        owner_account_id: &str,
        chat_id: &str,
    ) -> Result<Option<ConversationState>> {
        let sql = rewrite_sql(
            r#"SELECT id, owner_account_id, chat_id, last_message_time, created_at
               FROM conversation_states WHERE owner_account_id = ? AND chat_id = ?"#,
            self.kind,
        );
        let row = sqlx::query(sql.as_ref())
            .bind(owner_account_id)
            .bind(chat_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(conversation_from_row).transpose()
    }

    async fn touch_conversation(
        &self,
        owner_account_id: &str,
        chat_id: &str,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let ts = datetime_to_i64(at);
        let sql = rewrite_sql(
            r#"INSERT INTO conversation_states (id, owner_account_id, chat_id, last_message_time, created_at)
               VALUES (?, ?, ?, ?, ?)
               ON CONFLICT(owner_account_id, chat_id) DO UPDATE SET
                   last_message_time=excluded.last_message_time"#,
            self.kind,
        );
        sqlx::query(sql.as_ref())
            .bind(new_id("conv"))
            .bind(owner_account_id)
            .bind(chat_id)
            .bind(ts)
            .bind(ts)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
