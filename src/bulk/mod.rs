//! Bulk Operations
//!
//! CSV in and out of the store:
//! - user import (`name,email,role[,password]`)
//! - transaction and balance export
//! - time bound parsing for export ranges (`now-7d`, RFC 3339, `YYYY-MM-DD`)

mod export;
mod import;

pub use export::{
    export_balances, export_transactions, parse_time_bound, write_balances, write_transactions,
};
pub use import::{import_users, parse_users, ImportReport, ImportedUser, ParsedUser, ParsedUsers, UserImporter};

use crate::store::StoreError;

/// Maximum number of row errors reported by an import
pub const MAX_REPORTED_ERRORS: usize = 100;

/// Errors that can occur during bulk operations
#[derive(Debug, thiserror::Error)]
pub enum BulkError {
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Invalid header: {0}")]
    InvalidHeader(String),

    #[error("Invalid time: {0}")]
    InvalidTime(String),
}

/// Keep the first [`MAX_REPORTED_ERRORS`] messages and summarize the rest
pub(crate) fn truncate_errors(errors: &mut Vec<String>) {
    if errors.len() > MAX_REPORTED_ERRORS {
        let total = errors.len();
        errors.truncate(MAX_REPORTED_ERRORS);
        errors.push(format!("... and {} more errors", total - MAX_REPORTED_ERRORS));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_errors() {
        let mut errors: Vec<String> = (0..150).map(|i| format!("Line {}: bad", i)).collect();
        truncate_errors(&mut errors);
        assert_eq!(errors.len(), MAX_REPORTED_ERRORS + 1);
        assert_eq!(errors.last().unwrap(), "... and 50 more errors");

        let mut few = vec!["Line 2: bad".to_string()];
        truncate_errors(&mut few);
        assert_eq!(few.len(), 1);
    }
}
