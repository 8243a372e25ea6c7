//! Handler error types

use crate::protocol::{AckPayload, CloseCode};
use relay_core::{ChannelId, DomainError};
use thiserror::Error;

/// Handler error type
#[derive(Debug, Error)]
pub enum HandlerError {
    /// Payload did not match the operation
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    /// Payload decoded but failed validation
    #[error("{0}")]
    Domain(#[from] DomainError),

    /// Leave for a channel the connection is not in
    #[error("Not a member of channel {0}")]
    NotMember(ChannelId),

    /// The connection's outbound channel is gone
    #[error("Connection closed")]
    ConnectionClosed,
}

impl HandlerError {
    /// Error ack answering the failed request, if the request gets one
    pub fn to_ack(&self) -> Option<AckPayload> {
        match self {
            Self::InvalidPayload(reason) => Some(AckPayload::error(format!("invalid: {reason}"))),
            Self::Domain(e) => Some(AckPayload::error(format!("invalid: {e}"))),
            Self::NotMember(_) => Some(AckPayload::error(self.to_string())),
            Self::ConnectionClosed => None,
        }
    }

    /// Convert to a close code (if applicable)
    pub fn to_close_code(&self) -> Option<CloseCode> {
        match self {
            Self::ConnectionClosed => Some(CloseCode::UnknownError),
            Self::InvalidPayload(_) | Self::Domain(_) | Self::NotMember(_) => None,
        }
    }
}

impl From<serde_json::Error> for HandlerError {
    fn from(err: serde_json::Error) -> Self {
        Self::InvalidPayload(err.to_string())
    }
}

/// Handler result type
pub type HandlerResult<T> = Result<T, HandlerError>;
