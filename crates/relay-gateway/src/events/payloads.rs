//! Event payload definitions
//!
//! Wire shapes for each dispatch event. Channel events arrive from the bus as
//! [`relay_core::ChannelEvent`]s and are converted here before reaching a client.

use relay_core::{ChannelId, ChatMessageEvent, Message, MessageId, UserJoinedEvent, UserLeftEvent};
use serde::{Deserialize, Serialize};

use super::GatewayEventType;
use crate::protocol::GatewayMessage;

/// CHAT_MESSAGE event payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessagePayload {
    pub id: MessageId,
    pub channel_id: ChannelId,
    pub content: String,
    pub sender: String,
    /// True when delivered by recovery rather than live fan-out
    pub historical: bool,
}

impl ChatMessagePayload {
    /// A live delivery
    #[must_use]
    pub fn live(event: &ChatMessageEvent) -> Self {
        Self {
            id: event.id,
            channel_id: event.channel_id.clone(),
            content: event.content.clone(),
            sender: event.sender.clone(),
            historical: false,
        }
    }

    /// A replayed delivery
    #[must_use]
    pub fn historical(message: &Message) -> Self {
        Self {
            id: message.id,
            channel_id: message.channel_id.clone(),
            content: message.content.clone(),
            sender: message.sender.clone(),
            historical: true,
        }
    }

    #[must_use]
    pub fn into_dispatch(self) -> GatewayMessage {
        to_dispatch(GatewayEventType::ChatMessage, &self)
    }
}

/// USER_JOINED event payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserJoinedPayload {
    pub channel_id: ChannelId,
    pub display_name: String,
    pub members: Vec<String>,
}

impl UserJoinedPayload {
    #[must_use]
    pub fn into_dispatch(self) -> GatewayMessage {
        to_dispatch(GatewayEventType::UserJoined, &self)
    }
}

impl From<&UserJoinedEvent> for UserJoinedPayload {
    fn from(event: &UserJoinedEvent) -> Self {
        Self {
            channel_id: event.channel_id.clone(),
            display_name: event.display_name.clone(),
            members: event.members.clone(),
        }
    }
}

/// USER_LEFT event payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserLeftPayload {
    pub channel_id: ChannelId,
    pub display_name: String,
}

impl UserLeftPayload {
    #[must_use]
    pub fn into_dispatch(self) -> GatewayMessage {
        to_dispatch(GatewayEventType::UserLeft, &self)
    }
}

impl From<&UserLeftEvent> for UserLeftPayload {
    fn from(event: &UserLeftEvent) -> Self {
        Self {
            channel_id: event.channel_id.clone(),
            display_name: event.display_name.clone(),
        }
    }
}

fn to_dispatch<T: Serialize>(event_type: GatewayEventType, payload: &T) -> GatewayMessage {
    GatewayMessage::dispatch(
        event_type.as_str(),
        serde_json::to_value(payload).unwrap_or_default(),
    )
}
