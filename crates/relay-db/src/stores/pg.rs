//! PostgreSQL implementation of MessageStore

use async_trait::async_trait;
use sqlx::PgPool;
use tracing::{debug, instrument};

use relay_core::{ChannelId, Message, MessageId, MessageStore, NewMessage, StoreError, StoreResult};

use crate::models::MessageModel;

use super::error::{is_unique_violation, map_db_error};
use super::DEFAULT_PAGE_SIZE;

const SCHEMA: [&str; 3] = [
    r#"
    CREATE TABLE IF NOT EXISTS messages (
        id BIGSERIAL PRIMARY KEY,
        previous_id BIGINT NOT NULL DEFAULT 0,
        idempotency_token TEXT NOT NULL UNIQUE,
        sender TEXT NOT NULL,
        content TEXT NOT NULL,
        channel_id TEXT NOT NULL,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    r#"
    ALTER TABLE messages ADD COLUMN IF NOT EXISTS previous_id BIGINT NOT NULL DEFAULT 0
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS messages_channel_id_idx ON messages (channel_id, id)
    "#,
];

/// PostgreSQL implementation of MessageStore
///
/// A `BIGSERIAL` alone hands out ids in `nextval` order, which is not commit
/// order. Appends to one channel therefore run under a transaction-scoped
/// advisory lock on the channel: the id is drawn and committed before the next
/// append to that channel can draw its own, so within a channel ids become
/// visible in ascending order and `read_since` never skips one. Each row also
/// records the id of its predecessor in the channel. The unique constraint on
/// `idempotency_token` arbitrates concurrent appends of the same token.
#[derive(Clone)]
pub struct PgMessageStore {
    pool: PgPool,
    page_size: usize,
}

impl PgMessageStore {
    /// Create a new PgMessageStore
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    /// Cap the number of rows a single `read_since` returns
    #[must_use]
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Create the `messages` table and its index if they do not exist
    #[instrument(skip(self))]
    pub async fn ensure_schema(&self) -> StoreResult<()> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(map_db_error)?;
        }
        Ok(())
    }

    async fn existing_id(&self, token: &str) -> StoreResult<MessageId> {
        let id = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT id FROM messages WHERE idempotency_token = $1
            "#,
        )
        .bind(token)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_db_error)?;

        id.map(MessageId::new).ok_or_else(|| {
            StoreError::Unavailable(format!("conflicting row for token {token} not visible"))
        })
    }
}

#[async_trait]
impl MessageStore for PgMessageStore {
    #[instrument(skip(self, message), fields(channel_id = %message.channel_id, token = %message.idempotency_token))]
    async fn append(&self, message: NewMessage) -> StoreResult<Message> {
        message.check()?;

        let mut tx = self.pool.begin().await.map_err(map_db_error)?;

        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
            .bind(message.channel_id.as_str())
            .execute(&mut *tx)
            .await
            .map_err(map_db_error)?;

        let previous_id = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COALESCE(MAX(id), 0) FROM messages WHERE channel_id = $1
            "#,
        )
        .bind(message.channel_id.as_str())
        .fetch_one(&mut *tx)
        .await
        .map_err(map_db_error)?;

        let inserted = sqlx::query_as::<_, MessageModel>(
            r#"
            INSERT INTO messages (idempotency_token, sender, content, channel_id, previous_id)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (idempotency_token) DO NOTHING
            RETURNING id, previous_id, idempotency_token, sender, content, channel_id, created_at
            "#,
        )
        .bind(&message.idempotency_token)
        .bind(&message.sender)
        .bind(&message.content)
        .bind(message.channel_id.as_str())
        .bind(previous_id)
        .fetch_optional(&mut *tx)
        .await;

        match inserted {
            Ok(Some(model)) => {
                tx.commit().await.map_err(map_db_error)?;
                Message::try_from(model)
            }
            Ok(None) => {
                tx.rollback().await.map_err(map_db_error)?;
                let existing_id = self.existing_id(&message.idempotency_token).await?;
                debug!(%existing_id, "Duplicate append ignored");
                Err(StoreError::Duplicate { existing_id })
            }
            Err(e) if is_unique_violation(&e) => {
                drop(tx);
                let existing_id = self.existing_id(&message.idempotency_token).await?;
                Err(StoreError::Duplicate { existing_id })
            }
            Err(e) => Err(map_db_error(e)),
        }
    }

    #[instrument(skip(self))]
    async fn read_since(&self, channel_id: &ChannelId, after: MessageId) -> StoreResult<Vec<Message>> {
        let limit = i64::try_from(self.page_size).unwrap_or(i64::MAX);

        let rows = sqlx::query_as::<_, MessageModel>(
            r#"
            SELECT id, previous_id, idempotency_token, sender, content, channel_id, created_at
            FROM messages
            WHERE channel_id = $1 AND id > $2
            ORDER BY id ASC
            LIMIT $3
            "#,
        )
        .bind(channel_id.as_str())
        .bind(after.into_inner())
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(map_db_error)?;

        rows.into_iter().map(Message::try_from).collect()
    }

    #[instrument(skip(self))]
    async fn last_id(&self, channel_id: &ChannelId) -> StoreResult<MessageId> {
        let id = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COALESCE(MAX(id), 0) FROM messages WHERE channel_id = $1
            "#,
        )
        .bind(channel_id.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(map_db_error)?;

        Ok(MessageId::new(id))
    }
}

impl std::fmt::Debug for PgMessageStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgMessageStore")
            .field("page_size", &self.page_size)
            .finish_non_exhaustive()
    }
}
