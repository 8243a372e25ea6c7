//! Message entity - represents a stored chat message

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::error::DomainError;
use crate::value_objects::{ChannelId, MessageId};

/// Maximum message content length in characters
pub const MAX_CONTENT_LENGTH: usize = 2000;

/// Maximum idempotency token length in characters
pub const MAX_TOKEN_LENGTH: usize = 128;

/// Message entity
///
/// Immutable once written. The idempotency token is unique across the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    /// Id of the message before this one in the same channel, zero for the first
    #[serde(default)]
    pub previous_id: MessageId,
    pub channel_id: ChannelId,
    pub sender: String,
    pub content: String,
    pub idempotency_token: String,
    pub created_at: DateTime<Utc>,
}

impl Message {
    /// Build the stored message from an accepted append request
    pub fn from_new(id: MessageId, new: NewMessage, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            previous_id: MessageId::ZERO,
            channel_id: new.channel_id,
            sender: new.sender,
            content: new.content,
            idempotency_token: new.idempotency_token,
            created_at,
        }
    }

    /// Chain this message after `previous_id` in its channel
    #[must_use]
    pub fn following(mut self, previous_id: MessageId) -> Self {
        self.previous_id = previous_id;
        self
    }
}

/// An append request for the message store
#[derive(Debug, Clone, PartialEq, Eq, Validate)]
pub struct NewMessage {
    pub channel_id: ChannelId,

    #[validate(length(min = 1, max = 64, message = "Sender must be 1-64 characters"))]
    pub sender: String,

    #[validate(length(min = 1, max = 2000, message = "Content must be 1-2000 characters"))]
    pub content: String,

    #[validate(length(
        min = 1,
        max = 128,
        message = "Idempotency token must be 1-128 characters"
    ))]
    pub idempotency_token: String,
}

impl NewMessage {
    /// Create a new append request
    pub fn new(
        channel_id: ChannelId,
        sender: impl Into<String>,
        content: impl Into<String>,
        idempotency_token: impl Into<String>,
    ) -> Self {
        Self {
            channel_id,
            sender: sender.into(),
            content: content.into(),
            idempotency_token: idempotency_token.into(),
        }
    }

    /// Validate field lengths
    pub fn check(&self) -> Result<(), DomainError> {
        if self.content.chars().count() > MAX_CONTENT_LENGTH {
            return Err(DomainError::ContentTooLong {
                max: MAX_CONTENT_LENGTH,
            });
        }
        self.validate().map_err(DomainError::from)
    }
}
