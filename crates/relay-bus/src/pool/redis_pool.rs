//! Publishing connections
//!
//! `PUBLISH` borrows a pooled connection per call. Subscriptions never go
//! through here; they hold a dedicated pub/sub connection in the listener.

use std::time::Duration;

use deadpool_redis::{Config, Pool, Runtime, Timeouts};
use redis::AsyncCommands;

#[derive(Debug, Clone)]
pub struct RedisPoolConfig {
    pub url: String,
    pub max_connections: usize,
    /// How long `publish` waits for a free connection before failing
    pub wait_timeout: Duration,
}

impl RedisPoolConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            max_connections: 16,
            wait_timeout: Duration::from_secs(2),
        }
    }
}

impl Default for RedisPoolConfig {
    fn default() -> Self {
        Self::new("redis://127.0.0.1:6379")
    }
}

impl From<&relay_common::RedisConfig> for RedisPoolConfig {
    fn from(config: &relay_common::RedisConfig) -> Self {
        Self {
            max_connections: config.max_connections as usize,
            ..Self::new(config.url.clone())
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RedisPoolError {
    #[error("Invalid Redis pool settings: {0}")]
    CreatePool(String),

    #[error("No Redis connection available: {0}")]
    GetConnection(#[from] deadpool_redis::PoolError),

    #[error("Redis command failed: {0}")]
    Redis(#[from] redis::RedisError),
}

pub type RedisResult<T> = Result<T, RedisPoolError>;

/// Lazily connecting pool; nothing touches the network until the first call
#[derive(Clone)]
pub struct RedisPool {
    pool: Pool,
}

impl RedisPool {
    pub fn new(config: &RedisPoolConfig) -> RedisResult<Self> {
        let timeouts = Timeouts {
            wait: Some(config.wait_timeout),
            ..Timeouts::default()
        };
        let pool = Config::from_url(&config.url)
            .builder()
            .map(|builder| {
                builder
                    .max_size(config.max_connections)
                    .timeouts(timeouts)
                    .runtime(Runtime::Tokio1)
            })
            .map_err(|e| RedisPoolError::CreatePool(e.to_string()))?
            .build()
            .map_err(|e| RedisPoolError::CreatePool(e.to_string()))?;

        tracing::debug!(
            url = %redact_url(&config.url),
            max_connections = config.max_connections,
            "Redis publish pool ready"
        );
        Ok(Self { pool })
    }

    /// `PUBLISH` `payload` to `channel`, returning how many subscribers got it
    pub async fn publish(&self, channel: &str, payload: &str) -> RedisResult<u32> {
        let mut conn = self.pool.get().await?;
        let receivers: u32 = conn.publish(channel, payload).await?;
        Ok(receivers)
    }

    pub async fn ping(&self) -> RedisResult<()> {
        let mut conn = self.pool.get().await?;
        redis::cmd("PING").query_async::<String>(&mut conn).await?;
        Ok(())
    }

    /// Connections currently open
    #[must_use]
    pub fn open_connections(&self) -> usize {
        self.pool.status().size
    }
}

impl std::fmt::Debug for RedisPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let status = self.pool.status();
        f.debug_struct("RedisPool")
            .field("size", &status.size)
            .field("available", &status.available)
            .field("max_size", &status.max_size)
            .finish()
    }
}

/// Host part of a Redis URL, without credentials
pub(crate) fn redact_url(url: &str) -> &str {
    url.rsplit_once('@').map_or(url, |(_, host)| host)
}
