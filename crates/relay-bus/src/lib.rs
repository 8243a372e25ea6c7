//! # relay-bus
//!
//! Fan-out bus implementations for the `FanoutBus` port defined in `relay-core`.
//!
//! ## Features
//!
//! - **Connection Pool**: Managed Redis connection pool with deadpool, used for publishing
//! - **Redis Pub/Sub**: Cross-process distribution of channel events between workers
//! - **Local Broker**: In-process multicast for single-worker deployments and tests
//!
//! ## Example
//!
//! ```ignore
//! use relay_bus::{LocalBroker, RedisBusConfig, RedisFanoutBus};
//! use relay_core::{FanoutBus, Topic};
//!
//! // Across processes
//! let bus = RedisFanoutBus::connect(RedisBusConfig::new("redis://127.0.0.1:6379"))?;
//!
//! // Inside one process
//! let broker = LocalBroker::new_shared();
//! let bus = broker.attach();
//!
//! bus.subscribe(&Topic::channel(&channel_id)).await?;
//! ```

pub mod pool;
pub mod pubsub;

// Re-export pool types
pub use pool::{RedisPool, RedisPoolConfig, RedisPoolError, RedisResult};

// Re-export bus implementations
pub use pubsub::{LocalBroker, LocalFanoutBus, RedisBusConfig, RedisFanoutBus, DEFAULT_BROADCAST_BUFFER};
