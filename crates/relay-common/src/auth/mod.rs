//! Identity providers
//!
//! Tokens are issued by an external session service; this module only checks them.

mod jwt;

pub use jwt::{identity_provider, Claims, GuestIdentityProvider, JwtIdentityProvider};
