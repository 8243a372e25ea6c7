//! Channel events
//!
//! Every "emit to channel" goes out as one of these on the channel's topic and is
//! delivered by each worker to its local members of that channel.

use serde::{Deserialize, Serialize};

use crate::entities::Message;
use crate::value_objects::{ChannelId, MessageId};

/// All events published to a channel topic
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChannelEvent {
    ChatMessage(ChatMessageEvent),
    UserJoined(UserJoinedEvent),
    UserLeft(UserLeftEvent),
}

impl ChannelEvent {
    /// Channel this event belongs to
    pub fn channel_id(&self) -> &ChannelId {
        match self {
            Self::ChatMessage(e) => &e.channel_id,
            Self::UserJoined(e) => &e.channel_id,
            Self::UserLeft(e) => &e.channel_id,
        }
    }

    /// Wire name of the event
    pub const fn event_type(&self) -> &'static str {
        match self {
            Self::ChatMessage(_) => "CHAT_MESSAGE",
            Self::UserJoined(_) => "USER_JOINED",
            Self::UserLeft(_) => "USER_LEFT",
        }
    }
}

/// A stored message being fanned out
///
/// `previous_id` lets a receiver tell whether it is missing the message
/// before this one in the channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessageEvent {
    pub id: MessageId,
    #[serde(default)]
    pub previous_id: MessageId,
    pub channel_id: ChannelId,
    pub sender: String,
    pub content: String,
}

impl From<&Message> for ChatMessageEvent {
    fn from(message: &Message) -> Self {
        Self {
            id: message.id,
            previous_id: message.previous_id,
            channel_id: message.channel_id.clone(),
            sender: message.sender.clone(),
            content: message.content.clone(),
        }
    }
}

/// A member joined a channel on some worker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserJoinedEvent {
    pub channel_id: ChannelId,
    pub display_name: String,
    /// Sorted member names as seen by the publishing worker
    pub members: Vec<String>,
}

/// A member left a channel on some worker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserLeftEvent {
    pub channel_id: ChannelId,
    pub display_name: String,
}
