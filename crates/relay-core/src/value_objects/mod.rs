//! Value objects - immutable types that represent domain concepts

mod channel_id;
mod message_id;

pub use channel_id::{ChannelId, MAX_CHANNEL_ID_LENGTH};
pub use message_id::MessageId;
