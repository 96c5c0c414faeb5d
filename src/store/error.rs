//! Store error types
//!
//! Defines all errors that can occur in the store layer.

use thiserror::Error;

/// Errors that can occur while reading or writing the school store
#[derive(Error, Debug)]
pub enum StoreError {
    /// SQLite operation failed
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// I/O operation failed (creating the data directory)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Requested row does not exist
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// Input rejected before touching the database
    #[error("Validation error: {0}")]
    Validation(String),

    /// Sender cannot cover the amount
    #[error("Insufficient balance: needed {needed}, available {available}")]
    InsufficientBalance { needed: i64, available: i64 },

    /// Marketplace item cannot cover the quantity
    #[error("Insufficient stock: requested {requested}, available {available}")]
    InsufficientStock { requested: i64, available: i64 },

    /// Minting would push the school past its max supply
    #[error("Supply exceeded: minting {amount} would exceed max supply {max_supply}")]
    SupplyExceeded { amount: i64, max_supply: i64 },

    /// Uniqueness or state conflict (duplicate email, closed listing, ...)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Password hashing failed
    #[error("Password hash error")]
    PasswordHash,

    /// Lock acquisition failed
    #[error("Lock error: {0}")]
    Lock(String),
}

impl StoreError {
    /// Shorthand for a missing row
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        StoreError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Map a SQLite constraint violation to `Conflict`, leave anything else alone
    pub fn from_constraint(err: rusqlite::Error, message: impl Into<String>) -> Self {
        match err {
            rusqlite::Error::SqliteFailure(e, _)
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                StoreError::Conflict(message.into())
            }
            other => StoreError::Database(other),
        }
    }
}

/// Result type alias for store operations
pub type StoreResult<T> = Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = StoreError::not_found("Profile", 42);
        assert_eq!(err.to_string(), "Profile not found: 42");

        let err = StoreError::InsufficientBalance {
            needed: 10,
            available: 3,
        };
        assert_eq!(
            err.to_string(),
            "Insufficient balance: needed 10, available 3"
        );
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let store_err: StoreError = io_err.into();
        assert!(matches!(store_err, StoreError::Io(_)));
    }

    #[test]
    fn test_non_constraint_error_passes_through() {
        let err = StoreError::from_constraint(rusqlite::Error::QueryReturnedNoRows, "dup");
        assert!(matches!(err, StoreError::Database(_)));
    }
}
