//! Data Models
//!
//! This module contains the provider-neutral data structures used throughout
//! OmniStore:
//!
//! - `QueryFilter` / `QueryOptions` - Filter algebra and query shaping
//! - `DatabaseResult` - Uniform result envelope
//! - `Record` - Generic key-value entity plus lifecycle helpers
//! - `TableSchema` / `FieldDefinition` / `SchemaRegistry` - Declarative schema catalog
//! - `TransactionOperation` / `TransactionReport` - Transaction vocabulary
//!
//! None of these types know which storage engine is active.

pub mod core_schemas;
pub mod query;
pub mod record;
pub mod result;
pub mod schema;
pub mod transaction;

pub use query::{FilterOperation, QueryFilter, QueryOptions};
pub use record::Record;
pub use result::DatabaseResult;
pub use schema::{
    FieldDefinition, FieldType, IndexDefinition, SchemaRegistry, TableSchema, ValidationMode,
};
pub use transaction::{
    AppliedStep, CompensationReport, Rollback, TransactionFailure, TransactionGuarantee,
    TransactionOperation, TransactionReport,
};
