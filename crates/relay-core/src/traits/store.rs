//! Message store port

use async_trait::async_trait;

use crate::entities::{Message, NewMessage};
use crate::error::StoreError;
use crate::value_objects::{ChannelId, MessageId};

/// Result type for message store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Durable, append-only message log
///
/// The store is the single ordering authority: ids are strictly increasing per
/// store instance, and at most one message exists per idempotency token.
/// Within a channel, ids become visible to `read_since` in ascending order, and
/// every message carries the id of its predecessor in the channel.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Append a message.
    ///
    /// Returns `StoreError::Duplicate` carrying the existing id when the token
    /// was already stored, `StoreError::Unavailable` on I/O failure (the write
    /// may or may not have happened).
    async fn append(&self, message: NewMessage) -> StoreResult<Message>;

    /// Messages in `channel_id` with id greater than `after`, ascending by id.
    ///
    /// Implementations may return a bounded page; call again from the last id
    /// for more.
    async fn read_since(&self, channel_id: &ChannelId, after: MessageId)
        -> StoreResult<Vec<Message>>;

    /// Highest id stored in the channel, zero when empty
    async fn last_id(&self, channel_id: &ChannelId) -> StoreResult<MessageId>;
}
