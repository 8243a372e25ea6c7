//! Event broadcasting
//!
//! Handles distribution of events from the fan-out bus to WebSocket connections.

mod dispatcher;

pub use dispatcher::EventDispatcher;
