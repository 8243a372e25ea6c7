//! Gateway event types
//!
//! Event names sent in the `t` field of dispatch messages.

use relay_core::ChannelEvent;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GatewayEventType {
    /// A chat message, live or replayed
    ChatMessage,
    /// Someone joined a channel
    UserJoined,
    /// Someone left a channel
    UserLeft,
}

impl GatewayEventType {
    /// Get the string representation of the event type
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ChatMessage => "CHAT_MESSAGE",
            Self::UserJoined => "USER_JOINED",
            Self::UserLeft => "USER_LEFT",
        }
    }

    /// Parse from the wire name
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "CHAT_MESSAGE" => Some(Self::ChatMessage),
            "USER_JOINED" => Some(Self::UserJoined),
            "USER_LEFT" => Some(Self::UserLeft),
            _ => None,
        }
    }
}

impl From<&ChannelEvent> for GatewayEventType {
    fn from(event: &ChannelEvent) -> Self {
        match event {
            ChannelEvent::ChatMessage(_) => Self::ChatMessage,
            ChannelEvent::UserJoined(_) => Self::UserJoined,
            ChannelEvent::UserLeft(_) => Self::UserLeft,
        }
    }
}

impl fmt::Display for GatewayEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
