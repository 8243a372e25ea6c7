//! Error handling utilities for stores

use relay_core::StoreError;
use sqlx::Error as SqlxError;

/// Convert SQLx error to StoreError
pub fn map_db_error(e: SqlxError) -> StoreError {
    StoreError::Unavailable(e.to_string())
}

/// Check whether the error is a unique-constraint violation
pub fn is_unique_violation(e: &SqlxError) -> bool {
    e.as_database_error()
        .is_some_and(|db_err| db_err.is_unique_violation())
}
