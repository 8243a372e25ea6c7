//! # relay-gateway
//!
//! WebSocket gateway for real-time channel chat: connection handling,
//! per-worker channel membership, live fan-out and history recovery.

pub mod broadcast;
pub mod connection;
pub mod events;
pub mod handlers;
pub mod protocol;
pub mod recovery;
pub mod registry;
pub mod server;

#[cfg(test)]
mod test_support;

pub use server::{build_state, create_app, spawn_worker, start_worker, GatewayState, Worker};
