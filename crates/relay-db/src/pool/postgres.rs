//! PostgreSQL pool

use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;

/// Pool sizing and timeouts for the message store
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    /// An append waiting longer than this fails as `Unavailable`
    pub acquire_timeout: Duration,
    pub idle_timeout: Duration,
    pub max_lifetime: Duration,
}

impl PoolConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            max_connections: 10,
            min_connections: 1,
            acquire_timeout: Duration::from_secs(5),
            idle_timeout: Duration::from_secs(300),
            max_lifetime: Duration::from_secs(1800),
        }
    }

    fn options(&self) -> PgPoolOptions {
        PgPoolOptions::new()
            .max_connections(self.max_connections)
            .min_connections(self.min_connections.min(self.max_connections))
            .acquire_timeout(self.acquire_timeout)
            .idle_timeout(Some(self.idle_timeout))
            .max_lifetime(Some(self.max_lifetime))
            .test_before_acquire(true)
    }
}

impl From<&relay_common::DatabaseConfig> for PoolConfig {
    fn from(settings: &relay_common::DatabaseConfig) -> Self {
        let mut config = Self::new(settings.url.clone());
        config.max_connections = settings.max_connections;
        config.min_connections = settings.min_connections.min(settings.max_connections);
        config
    }
}

/// Connect, opening `min_connections` up front
pub async fn create_pool(config: &PoolConfig) -> Result<PgPool, sqlx::Error> {
    let pool = config.options().connect(&config.url).await?;
    tracing::debug!(
        max_connections = config.max_connections,
        open = pool.size(),
        "PostgreSQL pool connected"
    );
    Ok(pool)
}
