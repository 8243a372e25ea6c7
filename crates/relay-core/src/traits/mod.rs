//! Ports - the interfaces the gateway is written against
//!
//! The domain layer defines what it needs, and the infrastructure crates
//! (`relay-db`, `relay-bus`, `relay-common`) provide the implementations.

mod fanout;
mod identity;
mod store;

pub use fanout::{BusMessage, BusResult, FanoutBus, Topic, CHANNEL_TOPIC_PREFIX};
pub use identity::{Credentials, IdentityProvider};
pub use store::{MessageStore, StoreResult};
