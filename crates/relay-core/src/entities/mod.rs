//! Domain entities - core business objects

mod identity;
mod message;

pub use identity::Identity;
pub use message::{Message, NewMessage, MAX_CONTENT_LENGTH, MAX_TOKEN_LENGTH};
