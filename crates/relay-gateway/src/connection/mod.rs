//! Connection management
//!
//! Manages WebSocket connections and their per-channel delivery state.

mod connection;
mod cursor;
mod manager;

pub use connection::{Connection, ConnectionState, Delivery, Outbound};
pub use cursor::{ChannelCursor, Offer, HELD_LIMIT};
pub use manager::{ConnectionManager, GOING_AWAY};
