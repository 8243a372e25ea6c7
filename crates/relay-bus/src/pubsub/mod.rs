//! Fan-out bus implementations.

mod local;
mod redis_bus;

pub use local::{LocalBroker, LocalFanoutBus};
pub use redis_bus::{RedisBusConfig, RedisFanoutBus};

/// Capacity of the per-worker broadcast channel feeding the dispatcher
pub const DEFAULT_BROADCAST_BUFFER: usize = 1024;
