//! Payload definitions for gateway operations

use relay_core::{ChannelId, DomainError};
use serde::{Deserialize, Serialize};

/// Payload for op 10 (Hello)
///
/// Sent by the server immediately after the upgrade.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HelloPayload {
    /// Heartbeat interval in milliseconds
    pub heartbeat_interval: u64,
    /// Session id assigned to this connection
    pub session_id: String,
    /// Name the identity provider resolved for this connection
    pub display_name: String,
}

impl HelloPayload {
    /// Default heartbeat interval (45 seconds)
    pub const DEFAULT_HEARTBEAT_INTERVAL: u64 = 45_000;

    #[must_use]
    pub fn new(session_id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            heartbeat_interval: Self::DEFAULT_HEARTBEAT_INTERVAL,
            session_id: session_id.into(),
            display_name: display_name.into(),
        }
    }

    /// Override the advertised heartbeat interval
    #[must_use]
    pub fn with_interval(mut self, heartbeat_interval: u64) -> Self {
        self.heartbeat_interval = heartbeat_interval;
        self
    }
}

/// Channel id as sent by clients
///
/// Clients may send either a string or a number; validation happens in the
/// handler so a bad id is answered with an error ack instead of a decode error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ChannelRef {
    Name(String),
    Number(i64),
}

impl ChannelRef {
    /// Validate into a [`ChannelId`]
    pub fn parse(&self) -> Result<ChannelId, DomainError> {
        match self {
            Self::Name(name) => ChannelId::parse(name),
            Self::Number(n) => ChannelId::parse(&n.to_string()),
        }
    }
}

impl From<&str> for ChannelRef {
    fn from(name: &str) -> Self {
        Self::Name(name.to_string())
    }
}

/// Payload for op 2 (Join Channel)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinChannelPayload {
    pub channel_id: ChannelRef,

    /// Name to show in this channel; defaults to the identity's name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

/// Payload for op 3 (Send Message)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendMessagePayload {
    pub content: String,
    /// Client-generated token; resending with the same token never duplicates
    pub idempotency_token: String,
    pub channel_id: ChannelRef,
}

/// Payload for op 4 (Leave Channel)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaveChannelPayload {
    pub channel_id: ChannelRef,
}

/// Payload for op 6 (Ack)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AckPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confirmation: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AckPayload {
    /// Plain success
    #[must_use]
    pub fn ok() -> Self {
        Self::default()
    }

    /// Success with a confirmation text
    #[must_use]
    pub fn confirmed(confirmation: impl Into<String>) -> Self {
        Self {
            confirmation: Some(confirmation.into()),
            error: None,
        }
    }

    /// Failure with a reason
    #[must_use]
    pub fn error(error: impl Into<String>) -> Self {
        Self {
            confirmation: None,
            error: Some(error.into()),
        }
    }

    #[must_use]
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}
