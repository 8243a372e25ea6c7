//! # relay-db
//!
//! Message store implementations for the `MessageStore` port defined in `relay-core`.
//!
//! ## Overview
//!
//! - Connection pool management for PostgreSQL
//! - `PgMessageStore`: durable store backed by the `messages` table
//! - `MemoryMessageStore`: process-local store for tests and single-node development
//!
//! ## Usage
//!
//! ```rust,ignore
//! use relay_db::{create_pool, PgMessageStore, PoolConfig};
//!
//! async fn example(url: &str) -> Result<(), Box<dyn std::error::Error>> {
//!     let pool = create_pool(&PoolConfig::new(url)).await?;
//!     let store = PgMessageStore::new(pool);
//!     store.ensure_schema().await?;
//!     Ok(())
//! }
//! ```

pub mod models;
pub mod pool;
pub mod stores;

// Re-export commonly used types
pub use pool::{create_pool, PgPool, PoolConfig};
pub use stores::{MemoryMessageStore, PgMessageStore, DEFAULT_PAGE_SIZE};
