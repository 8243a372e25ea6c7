//! JWT identity provider
//!
//! Verifies HS256 tokens issued by the external session service using the
//! `jsonwebtoken` crate and turns them into an [`Identity`].

use std::sync::Arc;

use jsonwebtoken::{decode, errors::ErrorKind, DecodingKey, Validation};
use relay_core::{AuthError, Credentials, Identity, IdentityProvider};
use serde::{Deserialize, Serialize};

use crate::config::AuthConfig;

/// JWT claims structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (user ID)
    pub sub: String,
    /// Display name; falls back to the subject when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Issued at (Unix timestamp)
    #[serde(default)]
    pub iat: i64,
    /// Expiration time (Unix timestamp)
    pub exp: i64,
}

impl Claims {
    /// Convert verified claims into a connection identity
    #[must_use]
    pub fn into_identity(self) -> Identity {
        let display_name = self
            .name
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| self.sub.clone());
        Identity::user(self.sub, display_name)
    }
}

/// Identity provider backed by HS256 JWT verification
#[derive(Clone)]
pub struct JwtIdentityProvider {
    decoding_key: DecodingKey,
    allow_guests: bool,
}

impl JwtIdentityProvider {
    #[must_use]
    pub fn new(secret: &str, allow_guests: bool) -> Self {
        Self {
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            allow_guests,
        }
    }

    /// Decode and validate a token
    ///
    /// # Errors
    /// Returns an error if the token is malformed, badly signed, or expired
    pub fn decode_token(&self, token: &str) -> Result<Claims, AuthError> {
        let validation = Validation::default();

        decode::<Claims>(token, &self.decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => AuthError::TokenExpired,
                _ => AuthError::InvalidToken(e.to_string()),
            })
    }
}

impl IdentityProvider for JwtIdentityProvider {
    fn authenticate(&self, credentials: &Credentials) -> Result<Identity, AuthError> {
        match credentials {
            Credentials::Bearer(token) => self.decode_token(token).map(Claims::into_identity),
            Credentials::Anonymous if self.allow_guests => Ok(Identity::guest()),
            Credentials::Anonymous => Err(AuthError::MissingCredentials),
        }
    }
}

impl std::fmt::Debug for JwtIdentityProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtIdentityProvider")
            .field("allow_guests", &self.allow_guests)
            .finish_non_exhaustive()
    }
}

/// Identity provider used when no signing secret is configured
///
/// Every connection gets a guest identity; presented tokens cannot be verified
/// and are rejected.
#[derive(Debug, Clone, Copy, Default)]
pub struct GuestIdentityProvider;

impl IdentityProvider for GuestIdentityProvider {
    fn authenticate(&self, credentials: &Credentials) -> Result<Identity, AuthError> {
        match credentials {
            Credentials::Anonymous => Ok(Identity::guest()),
            Credentials::Bearer(_) => Err(AuthError::InvalidToken(
                "token verification is not configured".to_string(),
            )),
        }
    }
}

/// Pick the identity provider matching the auth configuration
#[must_use]
pub fn identity_provider(config: &AuthConfig) -> Arc<dyn IdentityProvider> {
    match config.jwt_secret.as_deref() {
        Some(secret) => Arc::new(JwtIdentityProvider::new(secret, config.allow_guests)),
        None => {
            if !config.allow_guests {
                tracing::warn!("JWT_SECRET is unset; accepting guest connections only");
            }
            Arc::new(GuestIdentityProvider)
        }
    }
}
