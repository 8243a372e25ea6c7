//! # relay-core
//!
//! Domain layer containing value objects, entities, channel events, and the ports
//! (message store, fan-out bus, identity provider) the gateway is written against.
//! This crate has no dependencies on infrastructure (database, broker, web framework).

pub mod entities;
pub mod error;
pub mod events;
pub mod traits;
pub mod value_objects;

// Re-export commonly used types at crate root
pub use entities::{Identity, Message, NewMessage, MAX_CONTENT_LENGTH, MAX_TOKEN_LENGTH};
pub use error::{AuthError, BusError, DomainError, StoreError};
pub use events::{ChannelEvent, ChatMessageEvent, UserJoinedEvent, UserLeftEvent};
pub use traits::{
    BusMessage, BusResult, Credentials, FanoutBus, IdentityProvider, MessageStore, StoreResult,
    Topic, CHANNEL_TOPIC_PREFIX,
};
pub use value_objects::{ChannelId, MessageId};
