//! Transaction operation and report types
//!
//! `execute_transaction` accepts an ordered list of [`TransactionOperation`]s.
//! What a provider can promise about them differs, and the types keep that
//! difference visible: relational and document providers report
//! [`TransactionGuarantee::Atomic`], the REST provider only ever reports
//! [`TransactionGuarantee::BestEffort`].

use crate::models::record::Record;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One step of a transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TransactionOperation {
    Create { table: String, data: Record },
    Update { table: String, id: String, data: Record },
    Delete { table: String, id: String },
}

impl TransactionOperation {
    pub fn create(table: impl Into<String>, data: Record) -> Self {
        Self::Create {
            table: table.into(),
            data,
        }
    }

    pub fn update(table: impl Into<String>, id: impl Into<String>, data: Record) -> Self {
        Self::Update {
            table: table.into(),
            id: id.into(),
            data,
        }
    }

    pub fn delete(table: impl Into<String>, id: impl Into<String>) -> Self {
        Self::Delete {
            table: table.into(),
            id: id.into(),
        }
    }

    pub fn table(&self) -> &str {
        match self {
            Self::Create { table, .. } | Self::Update { table, .. } | Self::Delete { table, .. } => {
                table
            }
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Create { .. } => "create",
            Self::Update { .. } => "update",
            Self::Delete { .. } => "delete",
        }
    }
}

/// What the provider guarantees about a committed transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionGuarantee {
    /// All steps were applied atomically by the engine.
    Atomic,
    /// Steps were applied one by one without isolation; a failure would only
    /// have been compensated on a best-effort basis.
    BestEffort,
}

/// Result of a successful `execute_transaction`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionReport {
    pub guarantee: TransactionGuarantee,
    /// One entry per operation, in order: the created/updated record, or
    /// `{"id": ..., "deleted": true}` for deletes.
    pub results: Vec<Value>,
}

impl TransactionReport {
    pub fn atomic(results: Vec<Value>) -> Self {
        Self {
            guarantee: TransactionGuarantee::Atomic,
            results,
        }
    }

    pub fn best_effort(results: Vec<Value>) -> Self {
        Self {
            guarantee: TransactionGuarantee::BestEffort,
            results,
        }
    }
}

/// A step that had been applied before a transaction failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppliedStep {
    pub index: usize,
    pub kind: String,
    pub table: String,
    pub id: String,
}

/// Outcome of best-effort compensation after a non-atomic transaction failed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompensationReport {
    /// Creates that were undone by deleting the created record.
    pub reverted: Vec<AppliedStep>,
    /// Updates and deletes that stay applied (prior values are not retained).
    pub irreversible: Vec<AppliedStep>,
    /// Compensating deletes that themselves failed.
    pub errors: Vec<String>,
}

/// How the provider rolled back a failed transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Rollback {
    /// The engine discarded every write of the transaction.
    Native,
    /// Compensating actions were attempted; see the report for what remains applied.
    BestEffort(CompensationReport),
}

/// Details carried by `DatabaseError::Transaction`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionFailure {
    /// Index of the operation that failed.
    pub failed_step: usize,
    pub reason: String,
    pub rollback: Rollback,
}
