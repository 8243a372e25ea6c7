//! # relay-common
//!
//! Shared utilities including configuration, error handling, identity, and telemetry.

pub mod auth;
pub mod config;
pub mod error;
pub mod telemetry;

// Re-export commonly used types at crate root
pub use auth::{identity_provider, Claims, GuestIdentityProvider, JwtIdentityProvider};
pub use config::{
    AppConfig, AppSettings, AuthConfig, ConfigError, DatabaseConfig, Environment, GatewayConfig,
    RedisConfig, ServerConfig,
};
pub use error::{AppError, AppResult, ErrorResponse};
pub use telemetry::{
    try_init_tracing_with_config, LogFormat, TracingConfig, TracingError,
};
