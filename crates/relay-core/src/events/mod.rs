//! Channel events - what travels on the fan-out bus

mod channel_event;

pub use channel_event::{ChannelEvent, ChatMessageEvent, UserJoinedEvent, UserLeftEvent};
