//! Database Error Types
//!
//! This module defines the error taxonomy shared by every provider. Native
//! driver errors (MongoDB, PostgreSQL, HTTP) are translated into these
//! variants at the provider boundary; nothing driver-specific leaks out.
//!
//! Business-level outcomes (not found, duplicate, validation) are normally
//! reported through `DatabaseResult { success: false }` rather than as
//! errors. [`DatabaseError::into_outcome`] performs that conversion so each
//! provider applies the same policy.

use crate::models::{DatabaseResult, TransactionFailure};
use thiserror::Error;

/// Database operation errors
#[derive(Error, Debug, Clone)]
pub enum DatabaseError {
    /// Backend unreachable, authentication refused, or call timed out
    #[error("Connection error ({provider}): {message}")]
    Connection { provider: String, message: String },

    /// Payload fails schema-level constraints
    #[error("Validation failed for '{table}': {message}")]
    Validation { table: String, message: String },

    /// Record or table absent
    #[error("Not found in '{table}': {id}")]
    NotFound { table: String, id: String },

    /// Unique-constraint violation
    #[error("Duplicate in '{table}': {message}")]
    Duplicate { table: String, message: String },

    /// An operation inside a transaction failed
    #[error("Transaction failed at step {}: {}", .0.failed_step, .0.reason)]
    Transaction(TransactionFailure),
}

impl DatabaseError {
    /// Create a connection error
    pub fn connection(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Connection {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Create a validation error
    pub fn validation(table: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            table: table.into(),
            message: message.into(),
        }
    }

    /// Create a record-not-found error
    pub fn not_found(table: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            table: table.into(),
            id: id.into(),
        }
    }

    /// Create a table-not-found error
    pub fn table_not_found(table: impl Into<String>) -> Self {
        let table = table.into();
        Self::NotFound {
            id: format!("table '{table}' does not exist"),
            table,
        }
    }

    /// Create a duplicate error
    pub fn duplicate(table: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Duplicate {
            table: table.into(),
            message: message.into(),
        }
    }

    /// Create a transaction error
    pub fn transaction(failure: TransactionFailure) -> Self {
        Self::Transaction(failure)
    }

    /// True for outcomes callers branch on (not found, duplicate, validation).
    pub fn is_business(&self) -> bool {
        matches!(
            self,
            Self::Validation { .. } | Self::NotFound { .. } | Self::Duplicate { .. }
        )
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self, Self::Duplicate { .. })
    }

    /// Convert business-level errors into a failed [`DatabaseResult`];
    /// connection and transaction errors stay errors.
    pub fn into_outcome<T>(self) -> Result<DatabaseResult<T>, DatabaseError> {
        if self.is_business() {
            let kind = match &self {
                Self::NotFound { .. } => "not_found",
                Self::Duplicate { .. } => "duplicate",
                _ => "validation",
            };
            Ok(DatabaseResult::failure(self.to_string()).with_metadata("error_kind", kind))
        } else {
            Err(self)
        }
    }
}

/// Return type of every `DataStore` operation.
pub type ServiceResult<T> = Result<DatabaseResult<T>, DatabaseError>;

/// Collapse an internal `Result` into the contract's two-channel result.
pub(crate) fn outcome<T>(result: Result<T, DatabaseError>) -> ServiceResult<T> {
    match result {
        Ok(data) => Ok(DatabaseResult::ok(data)),
        Err(err) => err.into_outcome(),
    }
}
