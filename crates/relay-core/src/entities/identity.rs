//! Identity - who is behind a connection

use serde::{Deserialize, Serialize};

/// Identity attached to a connection by the identity provider.
///
/// Opaque to the core: it is never validated here, only displayed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// Stable user id (None for guests)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// Name shown to other members
    pub display_name: String,
}

impl Identity {
    /// Identity of an authenticated user
    pub fn user(user_id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            user_id: Some(user_id.into()),
            display_name: display_name.into(),
        }
    }

    /// A fresh guest identity with a generated name
    pub fn guest() -> Self {
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        Self {
            user_id: None,
            display_name: format!("guest-{}", &suffix[..8]),
        }
    }

    /// Check if this is a guest identity
    #[inline]
    pub fn is_guest(&self) -> bool {
        self.user_id.is_none()
    }
}
