//! Domain and port error types

mod domain_error;
mod port_errors;

pub use domain_error::DomainError;
pub use port_errors::{AuthError, BusError, StoreError};
