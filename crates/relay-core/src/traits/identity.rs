//! Identity provider port

use crate::entities::Identity;
use crate::error::AuthError;

/// Credentials presented during the connection handshake
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credentials {
    /// No credentials supplied
    Anonymous,
    /// Bearer token issued by the external session service
    Bearer(String),
}

impl Credentials {
    /// Build from an optional raw token, stripping a `Bearer ` prefix
    #[must_use]
    pub fn from_token(token: Option<&str>) -> Self {
        match token.map(str::trim).filter(|t| !t.is_empty()) {
            Some(t) => Self::Bearer(t.strip_prefix("Bearer ").unwrap_or(t).to_string()),
            None => Self::Anonymous,
        }
    }
}

/// Turns handshake credentials into an identity.
///
/// Credential verification lives behind this trait; the core never sees a
/// password or hash.
pub trait IdentityProvider: Send + Sync {
    fn authenticate(&self, credentials: &Credentials) -> Result<Identity, AuthError>;
}
