//! Errors surfaced through the ports (store, bus, identity provider)

use thiserror::Error;

use super::DomainError;
use crate::value_objects::MessageId;

/// Message store errors
///
/// `Duplicate` is an expected outcome of a client retry, not a failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("Duplicate idempotency token (existing message {existing_id})")]
    Duplicate { existing_id: MessageId },

    #[error("Message store unavailable: {0}")]
    Unavailable(String),

    #[error("Invalid message: {0}")]
    Invalid(#[from] DomainError),
}

impl StoreError {
    /// Check if this is a duplicate-token outcome
    #[must_use]
    pub fn is_duplicate(&self) -> bool {
        matches!(self, Self::Duplicate { .. })
    }

    /// Check if the caller should withhold its acknowledgment and let the client retry
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

/// Fan-out bus errors
#[derive(Debug, Error)]
pub enum BusError {
    #[error("Publish failed: {0}")]
    Publish(String),

    #[error("Subscribe failed: {0}")]
    Subscribe(String),

    #[error("Bus closed")]
    Closed,

    #[error("Failed to encode event: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Identity provider errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("Missing credentials")]
    MissingCredentials,

    #[error("Invalid token: {0}")]
    InvalidToken(String),

    #[error("Token expired")]
    TokenExpired,
}
