//! In-memory `DataStore` used to exercise the services and the manager
//! without a live backend.

use async_trait::async_trait;
use omnistore_core::db::{DataStore, DatabaseError, HealthStatus, ProviderKind, ServiceResult};
use omnistore_core::models::query::value_to_text;
use omnistore_core::models::record::{self, Record, ID_FIELD};
use omnistore_core::models::{
    DatabaseResult, FilterOperation, IndexDefinition, QueryFilter, QueryOptions, Rollback,
    SchemaRegistry, TableSchema, TransactionFailure, TransactionOperation, TransactionReport,
    ValidationMode,
};
use serde_json::{json, Value};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex, MutexGuard};

fn is_blank(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.is_empty(),
        _ => false,
    }
}

fn compare(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

/// Reference semantics of the filter algebra.
pub fn matches(record: &Record, filter: &QueryFilter) -> bool {
    let actual = record.get(&filter.field).filter(|v| !v.is_null());
    let equals = |target: &Value| {
        actual.map_or(false, |a| compare(a, target) == Some(Ordering::Equal))
    };
    let ordering = || actual.and_then(|a| compare(a, &filter.value));
    let text = || {
        actual
            .and_then(value_to_text)
            .map(|t| t.to_lowercase())
    };
    let needle = filter.value_text().to_lowercase();

    match filter.operation {
        FilterOperation::Equals if filter.value.is_null() => actual.is_none(),
        FilterOperation::NotEquals if filter.value.is_null() => actual.is_some(),
        FilterOperation::Equals => equals(&filter.value),
        FilterOperation::NotEquals => !equals(&filter.value),
        FilterOperation::Gt => ordering() == Some(Ordering::Greater),
        FilterOperation::Gte => matches!(ordering(), Some(Ordering::Greater | Ordering::Equal)),
        FilterOperation::Lt => ordering() == Some(Ordering::Less),
        FilterOperation::Lte => matches!(ordering(), Some(Ordering::Less | Ordering::Equal)),
        FilterOperation::In => filter.values().iter().any(equals),
        FilterOperation::NotIn => !filter.values().iter().any(equals),
        FilterOperation::Contains => text().map_or(false, |t| t.contains(&needle)),
        FilterOperation::StartsWith => text().map_or(false, |t| t.starts_with(&needle)),
        FilterOperation::EndsWith => text().map_or(false, |t| t.ends_with(&needle)),
        FilterOperation::IsNull => is_blank(record.get(&filter.field)),
        FilterOperation::IsNotNull => !is_blank(record.get(&filter.field)),
    }
}

#[derive(Debug, Clone, Default)]
struct Tables {
    rows: BTreeMap<String, Vec<Record>>,
    declared: BTreeSet<String>,
    indexes: BTreeMap<String, BTreeSet<String>>,
}

impl Tables {
    fn insert(
        &mut self,
        registry: &SchemaRegistry,
        table: &str,
        data: Record,
    ) -> Result<Record, DatabaseError> {
        let mut row = record::prepare_for_insert(data);
        registry.prepare(table, &mut row, ValidationMode::Create)?;

        let mut keys = vec![ID_FIELD.to_string()];
        if let Some(schema) = registry.get(table) {
            keys.extend(schema.unique_fields().into_iter().map(str::to_string));
        }
        let rows = self.rows.entry(table.to_string()).or_default();
        for key in keys {
            let Some(value) = row.get(&key).filter(|v| !v.is_null()) else {
                continue;
            };
            if rows.iter().any(|existing| existing.get(&key) == Some(value)) {
                return Err(DatabaseError::duplicate(
                    table,
                    format!("{key} '{}' already exists", value_to_text(value).unwrap_or_default()),
                ));
            }
        }
        rows.push(row.clone());
        Ok(row)
    }

    fn update(
        &mut self,
        registry: &SchemaRegistry,
        table: &str,
        id: &str,
        data: Record,
    ) -> Result<Record, DatabaseError> {
        let mut changes = record::prepare_for_update(data);
        registry.prepare(table, &mut changes, ValidationMode::Update)?;
        let row = self
            .rows
            .get_mut(table)
            .and_then(|rows| {
                rows.iter_mut()
                    .find(|r| record::record_id(r).as_deref() == Some(id))
            })
            .ok_or_else(|| DatabaseError::not_found(table, id))?;
        row.extend(changes);
        Ok(row.clone())
    }

    fn delete(&mut self, table: &str, id: &str) -> Result<(), DatabaseError> {
        let rows = self
            .rows
            .get_mut(table)
            .ok_or_else(|| DatabaseError::not_found(table, id))?;
        let before = rows.len();
        rows.retain(|r| record::record_id(r).as_deref() != Some(id));
        if rows.len() == before {
            return Err(DatabaseError::not_found(table, id));
        }
        Ok(())
    }

    fn select(&self, table: &str, filters: &[QueryFilter], options: &QueryOptions) -> Vec<Record> {
        let mut rows: Vec<Record> = self
            .rows
            .get(table)
            .map(|rows| {
                rows.iter()
                    .filter(|r| filters.iter().all(|f| matches(r, f)))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        if let Some(field) = &options.sort_by {
            rows.sort_by(|a, b| match (a.get(field), b.get(field)) {
                (Some(x), Some(y)) => compare(x, y).unwrap_or(Ordering::Equal),
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => Ordering::Equal,
            });
            if options.sort_desc {
                rows.reverse();
            }
        }
        let offset = options.offset.unwrap_or(0) as usize;
        let limit = options.limit.map_or(usize::MAX, |l| l as usize);
        rows.into_iter().skip(offset).take(limit).collect()
    }
}

fn respond<T>(result: Result<T, DatabaseError>) -> ServiceResult<T> {
    match result {
        Ok(data) => Ok(DatabaseResult::ok(data)),
        Err(e) => e.into_outcome(),
    }
}

/// `DataStore` over process memory. Transactions roll back natively by
/// restoring a snapshot.
pub struct MemoryStore {
    registry: Arc<SchemaRegistry>,
    tables: Mutex<Tables>,
    refused: HashSet<String>,
    initialize_calls: AtomicUsize,
    close_calls: AtomicUsize,
}

impl MemoryStore {
    pub fn new(registry: Arc<SchemaRegistry>) -> Self {
        Self {
            registry,
            tables: Mutex::new(Tables::default()),
            refused: HashSet::new(),
            initialize_calls: AtomicUsize::new(0),
            close_calls: AtomicUsize::new(0),
        }
    }

    pub fn core() -> Self {
        Self::new(Arc::new(SchemaRegistry::core()))
    }

    /// Make `create_table` fail for `table`.
    pub fn refusing(mut self, table: &str) -> Self {
        self.refused.insert(table.to_string());
        self
    }

    /// Mark `table` as already existing.
    pub fn declare(&self, table: &str) {
        self.lock().declared.insert(table.to_string());
    }

    pub fn rows(&self, table: &str) -> Vec<Record> {
        self.lock().rows.get(table).cloned().unwrap_or_default()
    }

    pub fn indexes(&self, table: &str) -> Vec<String> {
        self.lock()
            .indexes
            .get(table)
            .map(|names| names.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn initialize_calls(&self) -> usize {
        self.initialize_calls.load(AtomicOrdering::SeqCst)
    }

    pub fn close_calls(&self) -> usize {
        self.close_calls.load(AtomicOrdering::SeqCst)
    }

    fn lock(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().expect("memory store lock poisoned")
    }
}

#[async_trait]
impl DataStore for MemoryStore {
    fn provider(&self) -> ProviderKind {
        ProviderKind::Document
    }

    async fn initialize(&self) -> Result<bool, DatabaseError> {
        self.initialize_calls.fetch_add(1, AtomicOrdering::SeqCst);
        Ok(true)
    }

    async fn health_check(&self) -> HealthStatus {
        HealthStatus::healthy(self.provider()).with_detail("tables", self.lock().rows.len() as u64)
    }

    async fn close(&self) -> Result<(), DatabaseError> {
        self.close_calls.fetch_add(1, AtomicOrdering::SeqCst);
        Ok(())
    }

    async fn create_record(&self, table: &str, data: Record) -> ServiceResult<Record> {
        respond(self.lock().insert(&self.registry, table, data))
    }

    async fn get_record(&self, table: &str, id: &str) -> ServiceResult<Record> {
        let found = self
            .lock()
            .select(table, &[QueryFilter::eq(ID_FIELD, id)], &QueryOptions::new())
            .into_iter()
            .next()
            .ok_or_else(|| DatabaseError::not_found(table, id));
        respond(found)
    }

    async fn update_record(&self, table: &str, id: &str, data: Record) -> ServiceResult<Record> {
        respond(self.lock().update(&self.registry, table, id, data))
    }

    async fn delete_record(&self, table: &str, id: &str) -> ServiceResult<bool> {
        respond(self.lock().delete(table, id).map(|_| true))
    }

    async fn list_records(&self, table: &str, options: &QueryOptions) -> ServiceResult<Vec<Record>> {
        self.find_records(table, &[], options).await
    }

    async fn count_records(&self, table: &str, filters: &[QueryFilter]) -> ServiceResult<u64> {
        if let Err(e) = self.registry.check_filters(table, filters) {
            return e.into_outcome();
        }
        let total = self.lock().select(table, filters, &QueryOptions::new()).len() as u64;
        Ok(DatabaseResult::ok_with_count(total, total))
    }

    async fn record_exists(&self, table: &str, id: &str) -> ServiceResult<bool> {
        let found = !self
            .lock()
            .select(table, &[QueryFilter::eq(ID_FIELD, id)], &QueryOptions::new())
            .is_empty();
        Ok(DatabaseResult::ok(found))
    }

    async fn find_records(
        &self,
        table: &str,
        filters: &[QueryFilter],
        options: &QueryOptions,
    ) -> ServiceResult<Vec<Record>> {
        let filters = options.merged_filters(filters);
        if let Err(e) = self.registry.check_filters(table, &filters) {
            return e.into_outcome();
        }
        let rows = self.lock().select(table, &filters, options);
        let count = rows.len() as u64;
        Ok(DatabaseResult::ok_with_count(rows, count))
    }

    async fn find_one_record(&self, table: &str, filters: &[QueryFilter]) -> ServiceResult<Record> {
        if let Err(e) = self.registry.check_filters(table, filters) {
            return e.into_outcome();
        }
        let first = self
            .lock()
            .select(table, filters, &QueryOptions::new().with_limit(1))
            .into_iter()
            .next();
        Ok(first.map_or_else(DatabaseResult::empty, DatabaseResult::ok))
    }

    async fn batch_create(&self, table: &str, records: Vec<Record>) -> ServiceResult<Vec<Record>> {
        let mut tables = self.lock();
        let mut staged = tables.clone();
        let mut created = Vec::with_capacity(records.len());
        for data in records {
            match staged.insert(&self.registry, table, data) {
                Ok(row) => created.push(row),
                Err(e) => return e.into_outcome(),
            }
        }
        *tables = staged;
        let count = created.len() as u64;
        Ok(DatabaseResult::ok_with_count(created, count))
    }

    async fn batch_update(&self, table: &str, records: Vec<Record>) -> ServiceResult<Vec<Record>> {
        let mut tables = self.lock();
        let mut updated = Vec::new();
        let mut missing = Vec::new();
        for mut data in records {
            let Some(id) = record::record_id(&data) else {
                return Ok(DatabaseResult::failure("every record needs an id"));
            };
            data.remove(ID_FIELD);
            match tables.update(&self.registry, table, &id, data) {
                Ok(row) => updated.push(row),
                Err(DatabaseError::NotFound { .. }) => missing.push(id),
                Err(e) => return e.into_outcome(),
            }
        }
        let count = updated.len() as u64;
        let mut result = DatabaseResult::ok_with_count(updated, count);
        if !missing.is_empty() {
            result = result.with_metadata("missing_ids", json!(missing));
        }
        Ok(result)
    }

    async fn batch_delete(&self, table: &str, ids: &[String]) -> ServiceResult<u64> {
        let mut tables = self.lock();
        let deleted = ids.iter().filter(|id| tables.delete(table, id).is_ok()).count() as u64;
        Ok(DatabaseResult::ok_with_count(deleted, deleted))
    }

    async fn execute_transaction(
        &self,
        operations: Vec<TransactionOperation>,
    ) -> ServiceResult<TransactionReport> {
        let mut tables = self.lock();
        let mut staged = tables.clone();
        let mut results = Vec::with_capacity(operations.len());
        for (index, operation) in operations.into_iter().enumerate() {
            let applied = match operation {
                TransactionOperation::Create { table, data } => {
                    staged.insert(&self.registry, &table, data).map(Value::Object)
                }
                TransactionOperation::Update { table, id, data } => {
                    staged.update(&self.registry, &table, &id, data).map(Value::Object)
                }
                TransactionOperation::Delete { table, id } => staged
                    .delete(&table, &id)
                    .map(|_| json!({ "id": id, "deleted": true })),
            };
            match applied {
                Ok(value) => results.push(value),
                Err(e) => {
                    return Err(DatabaseError::transaction(TransactionFailure {
                        failed_step: index,
                        reason: e.to_string(),
                        rollback: Rollback::Native,
                    }))
                }
            }
        }
        *tables = staged;
        Ok(DatabaseResult::ok(TransactionReport::atomic(results)))
    }

    async fn create_table(&self, schema: &TableSchema) -> ServiceResult<()> {
        if self.refused.contains(&schema.name) {
            return Ok(DatabaseResult::failure(format!(
                "provider refused to create '{}'",
                schema.name
            )));
        }
        let mut tables = self.lock();
        tables.declared.insert(schema.name.clone());
        tables.rows.entry(schema.name.clone()).or_default();
        Ok(DatabaseResult::ok(()))
    }

    async fn table_exists(&self, table: &str) -> ServiceResult<bool> {
        Ok(DatabaseResult::ok(self.lock().declared.contains(table)))
    }

    async fn get_table_schema(&self, table: &str) -> ServiceResult<TableSchema> {
        let schema = self
            .registry
            .get(table)
            .cloned()
            .ok_or_else(|| DatabaseError::table_not_found(table));
        respond(schema)
    }

    async fn create_index(&self, table: &str, index: &IndexDefinition) -> ServiceResult<String> {
        let name = index.name(table);
        self.lock()
            .indexes
            .entry(table.to_string())
            .or_default()
            .insert(name.clone());
        Ok(DatabaseResult::ok(name))
    }

    async fn drop_index(&self, table: &str, index_name: &str) -> ServiceResult<()> {
        let removed = self
            .lock()
            .indexes
            .get_mut(table)
            .map_or(false, |names| names.remove(index_name));
        if removed {
            Ok(DatabaseResult::ok(()))
        } else {
            DatabaseError::not_found(table, index_name).into_outcome()
        }
    }
}
