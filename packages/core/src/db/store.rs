//! DataStore Trait - Service Contract
//!
//! This module defines the `DataStore` trait: the single operation set every
//! provider (document, relational, REST) implements identically, so
//! application code never needs to know which engine is active.
//!
//! # Error Policy
//!
//! Every operation returns [`ServiceResult<T>`]:
//!
//! - `Ok(DatabaseResult { success: true, .. })` on success
//! - `Ok(DatabaseResult { success: false, error, .. })` for expected outcomes:
//!   record not found, duplicate key, validation failure
//! - `Err(DatabaseError::Connection)` when the backend cannot be reached or
//!   the call exceeds the configured timeout
//! - `Err(DatabaseError::Transaction)` when `execute_transaction` fails
//!
//! Callers must handle the two channels separately.
//!
//! # Cross-provider helpers
//!
//! [`DataStoreExt`] adds `upsert_record`, `get_records_by_field` and
//! `soft_delete_record`. It has a blanket implementation for every
//! `DataStore`, so providers cannot override it; the helpers are written
//! purely against the contract and behave identically everywhere.
//!
//! # Examples
//!
//! ```rust,no_run
//! use omnistore_core::db::{DataStore, DataStoreExt};
//! use omnistore_core::models::{QueryFilter, QueryOptions};
//! use serde_json::json;
//!
//! async fn example(store: &dyn DataStore) -> anyhow::Result<()> {
//!     let data = json!({"name": "Acme", "organization_code": "ACME"});
//!     let created = store
//!         .create_record("companies", data.as_object().unwrap().clone())
//!         .await?;
//!     assert!(created.success);
//!
//!     let active = store
//!         .find_records(
//!             "companies",
//!             &[QueryFilter::eq("is_active", true)],
//!             &QueryOptions::new().with_limit(20),
//!         )
//!         .await?;
//!     println!("{} active companies", active.data.map_or(0, |rows| rows.len()));
//!     Ok(())
//! }
//! ```

use crate::db::config::ProviderKind;
use crate::db::error::{DatabaseError, ServiceResult};
use crate::models::record::{self, Record};
use crate::models::{
    DatabaseResult, IndexDefinition, QueryFilter, QueryOptions, TableSchema, TransactionOperation,
    TransactionReport,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::future::Future;
use std::time::Duration;

/// Overall health of a provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    Healthy,
    Unhealthy,
}

/// Health-check response: `{status, provider, ...metrics, error?}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: HealthState,
    pub provider: ProviderKind,
    #[serde(flatten)]
    pub details: Map<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl HealthStatus {
    pub fn healthy(provider: ProviderKind) -> Self {
        Self {
            status: HealthState::Healthy,
            provider,
            details: Map::new(),
            error: None,
        }
    }

    pub fn unhealthy(provider: ProviderKind, error: impl Into<String>) -> Self {
        Self {
            status: HealthState::Unhealthy,
            provider,
            details: Map::new(),
            error: Some(error.into()),
        }
    }

    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }

    pub fn is_healthy(&self) -> bool {
        self.status == HealthState::Healthy
    }
}

/// Abstraction over the three storage engines.
///
/// Implementations must be `Send + Sync`; a single instance is shared by all
/// concurrent callers through `Arc<dyn DataStore>`.
#[async_trait]
pub trait DataStore: Send + Sync {
    /// Which engine backs this store.
    fn provider(&self) -> ProviderKind;

    //
    // LIFECYCLE
    //

    /// Connect and verify liveness. Returns `Ok(true)` once the store is usable.
    async fn initialize(&self) -> Result<bool, DatabaseError>;

    /// Check the backend; never fails, reports problems in the status.
    async fn health_check(&self) -> HealthStatus;

    /// Release the underlying connection resources.
    async fn close(&self) -> Result<(), DatabaseError>;

    //
    // SINGLE-RECORD CRUD
    //

    /// Insert a record. `id`, `created_at` and `updated_at` are generated
    /// when absent; the stored record is returned.
    async fn create_record(&self, table: &str, data: Record) -> ServiceResult<Record>;

    /// Fetch a record by id; not-found is a failed result.
    async fn get_record(&self, table: &str, id: &str) -> ServiceResult<Record>;

    /// Apply a partial update (always refreshing `updated_at`) and return the
    /// full updated record; not-found is a failed result.
    async fn update_record(&self, table: &str, id: &str, data: Record) -> ServiceResult<Record>;

    /// Hard-delete a record; not-found is a failed result.
    async fn delete_record(&self, table: &str, id: &str) -> ServiceResult<bool>;

    //
    // QUERYING
    //

    /// List records using the filters, ordering and pagination in `options`.
    async fn list_records(&self, table: &str, options: &QueryOptions) -> ServiceResult<Vec<Record>>;

    /// Count records matching `filters` (all records when empty).
    async fn count_records(&self, table: &str, filters: &[QueryFilter]) -> ServiceResult<u64>;

    async fn record_exists(&self, table: &str, id: &str) -> ServiceResult<bool>;

    /// Records matching `filters` AND any filters already in `options`.
    async fn find_records(
        &self,
        table: &str,
        filters: &[QueryFilter],
        options: &QueryOptions,
    ) -> ServiceResult<Vec<Record>>;

    /// First matching record. A successful result with `data = None` means
    /// nothing matched.
    async fn find_one_record(&self, table: &str, filters: &[QueryFilter]) -> ServiceResult<Record>;

    //
    // BATCH OPERATIONS
    //

    async fn batch_create(&self, table: &str, records: Vec<Record>) -> ServiceResult<Vec<Record>>;

    /// Each record must carry its `id`; remaining fields are the changes.
    async fn batch_update(&self, table: &str, records: Vec<Record>) -> ServiceResult<Vec<Record>>;

    /// Delete the given ids; unknown ids are skipped. Data is the number deleted.
    async fn batch_delete(&self, table: &str, ids: &[String]) -> ServiceResult<u64>;

    //
    // TRANSACTIONS
    //

    /// Apply `operations` in order. Failure is always
    /// `Err(DatabaseError::Transaction)`; its `rollback` tells whether the
    /// engine discarded everything or only best-effort compensation ran.
    async fn execute_transaction(
        &self,
        operations: Vec<TransactionOperation>,
    ) -> ServiceResult<TransactionReport>;

    //
    // SCHEMA MANAGEMENT
    //

    async fn create_table(&self, schema: &TableSchema) -> ServiceResult<()>;

    async fn table_exists(&self, table: &str) -> ServiceResult<bool>;

    async fn get_table_schema(&self, table: &str) -> ServiceResult<TableSchema>;

    /// Create an index; the data is its deterministic name.
    async fn create_index(&self, table: &str, index: &IndexDefinition) -> ServiceResult<String>;

    async fn drop_index(&self, table: &str, index_name: &str) -> ServiceResult<()>;
}

/// Helpers expressed only in terms of [`DataStore`].
#[async_trait]
pub trait DataStoreExt: DataStore {
    /// Find a record matching `data` on `unique_fields`; update it with
    /// `data` when found, otherwise create it.
    async fn upsert_record(
        &self,
        table: &str,
        data: Record,
        unique_fields: &[&str],
    ) -> ServiceResult<Record> {
        let mut filters = Vec::with_capacity(unique_fields.len());
        for field in unique_fields {
            match data.get(*field) {
                Some(value) if !value.is_null() => filters.push(QueryFilter::eq(*field, value.clone())),
                _ => {
                    return Ok(DatabaseResult::failure(format!(
                        "upsert on '{table}' requires a value for unique field '{field}'"
                    )))
                }
            }
        }
        if filters.is_empty() {
            return self.create_record(table, data).await;
        }

        let existing = self.find_one_record(table, &filters).await?;
        if !existing.success {
            return Ok(existing);
        }
        match existing.data.as_ref().and_then(record::record_id) {
            Some(id) => {
                let result = self.update_record(table, &id, data).await?;
                Ok(result.with_metadata("upserted", "updated"))
            }
            None => {
                let result = self.create_record(table, data).await?;
                Ok(result.with_metadata("upserted", "created"))
            }
        }
    }

    /// Records whose `field` equals `value`, with extra shaping from `options`.
    async fn get_records_by_field(
        &self,
        table: &str,
        field: &str,
        value: Value,
        options: &QueryOptions,
    ) -> ServiceResult<Vec<Record>> {
        self.find_records(table, &[QueryFilter::eq(field, value)], options)
            .await
    }

    /// Logical delete: set `is_deleted`, `deleted_at` and `deleted_by`.
    async fn soft_delete_record(
        &self,
        table: &str,
        id: &str,
        deleted_by: Option<&str>,
    ) -> ServiceResult<Record> {
        self.update_record(table, id, record::soft_delete_changes(deleted_by))
            .await
    }
}

impl<T: DataStore + ?Sized> DataStoreExt for T {}

/// Run `future` under `timeout`, mapping expiry to a connection error.
pub(crate) async fn with_timeout<T, F>(
    provider: ProviderKind,
    timeout: Duration,
    future: F,
) -> Result<T, DatabaseError>
where
    F: Future<Output = Result<T, DatabaseError>>,
{
    match tokio::time::timeout(timeout, future).await {
        Ok(result) => result,
        Err(_) => Err(DatabaseError::connection(
            provider.as_str(),
            format!("operation timed out after {}s", timeout.as_secs_f64()),
        )),
    }
}
