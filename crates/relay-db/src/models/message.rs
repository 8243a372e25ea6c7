//! Message database model

use chrono::{DateTime, Utc};
use relay_core::{ChannelId, Message, MessageId, StoreError};
use sqlx::FromRow;

/// Database model for the `messages` table
#[derive(Debug, Clone, FromRow)]
pub struct MessageModel {
    pub id: i64,
    pub previous_id: i64,
    pub idempotency_token: String,
    pub sender: String,
    pub content: String,
    pub channel_id: String,
    pub created_at: DateTime<Utc>,
}

/// Convert a row into a `Message` entity
///
/// Fails only if a row carries a channel id the domain would not accept.
impl TryFrom<MessageModel> for Message {
    type Error = StoreError;

    fn try_from(model: MessageModel) -> Result<Self, Self::Error> {
        Ok(Message {
            id: MessageId::new(model.id),
            previous_id: MessageId::new(model.previous_id),
            channel_id: ChannelId::parse(&model.channel_id)?,
            sender: model.sender,
            content: model.content,
            idempotency_token: model.idempotency_token,
            created_at: model.created_at,
        })
    }
}
