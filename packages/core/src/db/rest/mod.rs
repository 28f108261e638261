//! RestStore - DataStore Implementation for a PostgREST Gateway
//!
//! Talks to a hosted Postgres through its auto-generated REST API
//! (`{project_url}/rest/v1/{table}`), authenticating with a service key.
//!
//! # Limitations
//!
//! - DDL is not reachable over the gateway: `create_table`, `create_index`
//!   and `drop_index` return failed results
//! - `execute_transaction` applies operations one request at a time. On
//!   failure, records created by earlier steps are deleted again; earlier
//!   updates and deletes cannot be undone and are listed as irreversible in
//!   the [`CompensationReport`]
//!
//! # Examples
//!
//! ```rust,no_run
//! use omnistore_core::db::{DataStore, RestConfig, RestStore};
//! use omnistore_core::models::{QueryFilter, SchemaRegistry};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = RestConfig::new("https://abc.supabase.co", "service-role-key");
//!     let store = RestStore::new(config, Arc::new(SchemaRegistry::core()));
//!     store.initialize().await?;
//!     let admins = store
//!         .count_records("user_roles", &[QueryFilter::eq("role", "admin")])
//!         .await?;
//!     println!("{:?} admins", admins.data);
//!     Ok(())
//! }
//! ```

mod query;

use crate::db::config::{ProviderKind, RestConfig};
use crate::db::error::{outcome, DatabaseError, ServiceResult};
use crate::db::store::{DataStore, HealthStatus};
use crate::models::record::{self, Record, ID_FIELD};
use crate::models::{
    AppliedStep, CompensationReport, DatabaseResult, IndexDefinition, QueryFilter, QueryOptions,
    Rollback, SchemaRegistry, TableSchema, TransactionFailure, TransactionOperation,
    TransactionReport, ValidationMode,
};
use async_trait::async_trait;
use query::{filter_params, id_params, parse_content_range, quote_value, select_params, QueryParams};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_RANGE, CONTENT_TYPE};
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;

const PROVIDER: ProviderKind = ProviderKind::Rest;
const PREFER: HeaderName = HeaderName::from_static("prefer");
const APIKEY: HeaderName = HeaderName::from_static("apikey");

impl From<reqwest::Error> for DatabaseError {
    fn from(error: reqwest::Error) -> Self {
        let message = if error.is_timeout() {
            format!("request timed out: {error}")
        } else {
            error.to_string()
        };
        DatabaseError::connection(PROVIDER.as_str(), message)
    }
}

/// Error body returned by PostgREST.
#[derive(Debug, Default, Deserialize)]
struct GatewayError {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    details: Option<String>,
}

fn status_error(table: &str, status: StatusCode, body: &str) -> DatabaseError {
    let parsed: GatewayError = serde_json::from_str(body).unwrap_or_default();
    let mut message = parsed.message.unwrap_or_else(|| body.trim().to_string());
    if let Some(details) = parsed.details.filter(|d| !d.is_empty()) {
        message = format!("{message} ({details})");
    }
    if message.is_empty() {
        message = status.to_string();
    }

    match status.as_u16() {
        409 if parsed.code.as_deref() == Some("23503") => DatabaseError::validation(table, message),
        409 => DatabaseError::duplicate(table, message),
        400 | 422 => DatabaseError::validation(table, message),
        404 => DatabaseError::table_not_found(table),
        401 | 403 => DatabaseError::connection(
            PROVIDER.as_str(),
            format!("request rejected with {status}: {message}"),
        ),
        _ => DatabaseError::connection(PROVIDER.as_str(), format!("{status}: {message}")),
    }
}

/// PostgREST-backed store.
pub struct RestStore {
    config: RestConfig,
    registry: Arc<SchemaRegistry>,
    client: RwLock<Option<Client>>,
}

impl RestStore {
    pub fn new(config: RestConfig, registry: Arc<SchemaRegistry>) -> Self {
        Self {
            config,
            registry,
            client: RwLock::new(None),
        }
    }

    pub fn config(&self) -> &RestConfig {
        &self.config
    }

    fn build_client(&self) -> Result<Client, DatabaseError> {
        let invalid_key =
            |_| DatabaseError::connection(PROVIDER.as_str(), "service key is not a valid header value");
        let mut headers = HeaderMap::new();
        headers.insert(APIKEY, HeaderValue::from_str(&self.config.service_key).map_err(invalid_key)?);
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", self.config.service_key)).map_err(invalid_key)?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(PREFER, HeaderValue::from_static("return=representation"));

        Ok(Client::builder()
            .default_headers(headers)
            .timeout(self.config.timeout())
            .build()?)
    }

    async fn client(&self) -> Result<Client, DatabaseError> {
        self.client
            .read()
            .await
            .clone()
            .ok_or_else(|| DatabaseError::connection(PROVIDER.as_str(), "store is not initialized"))
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/{}", self.config.rest_base(), table)
    }

    async fn request(&self, method: Method, table: &str) -> Result<RequestBuilder, DatabaseError> {
        Ok(self.client().await?.request(method, self.table_url(table)))
    }

    /// Send and turn non-2xx statuses into errors.
    async fn send(&self, table: &str, request: RequestBuilder) -> Result<Response, DatabaseError> {
        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        tracing::debug!("REST request on {} failed with {}: {}", table, status, body);
        Err(status_error(table, status, &body))
    }

    async fn rows(&self, table: &str, request: RequestBuilder) -> Result<Vec<Record>, DatabaseError> {
        let response = self.send(table, request).await?;
        let rows = response.json::<Vec<Record>>().await?;
        Ok(rows)
    }

    async fn select(&self, table: &str, params: &QueryParams) -> Result<Vec<Record>, DatabaseError> {
        let request = self.request(Method::GET, table).await?.query(params);
        self.rows(table, request).await
    }

    async fn insert_one(&self, table: &str, data: Record) -> Result<Record, DatabaseError> {
        let mut prepared = record::prepare_for_insert(data);
        self.registry
            .prepare(table, &mut prepared, ValidationMode::Create)?;
        let request = self.request(Method::POST, table).await?.json(&prepared);
        let created = self.rows(table, request).await?;
        Ok(created.into_iter().next().unwrap_or(prepared))
    }

    async fn patch_one(&self, table: &str, id: &str, data: Record) -> Result<Record, DatabaseError> {
        let mut changes = record::prepare_for_update(data);
        self.registry
            .prepare(table, &mut changes, ValidationMode::Update)?;
        let request = self
            .request(Method::PATCH, table)
            .await?
            .query(&id_params(id))
            .json(&changes);
        self.rows(table, request)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| DatabaseError::not_found(table, id))
    }

    async fn remove_one(&self, table: &str, id: &str) -> Result<(), DatabaseError> {
        let request = self
            .request(Method::DELETE, table)
            .await?
            .query(&id_params(id));
        if self.rows(table, request).await?.is_empty() {
            return Err(DatabaseError::not_found(table, id));
        }
        Ok(())
    }

    async fn apply_operation(&self, operation: &TransactionOperation) -> Result<(Value, String), DatabaseError> {
        match operation {
            TransactionOperation::Create { table, data } => {
                let created = self.insert_one(table, data.clone()).await?;
                let id = record::record_id(&created).unwrap_or_default();
                Ok((Value::Object(created), id))
            }
            TransactionOperation::Update { table, id, data } => {
                let updated = self.patch_one(table, id, data.clone()).await?;
                Ok((Value::Object(updated), id.clone()))
            }
            TransactionOperation::Delete { table, id } => {
                self.remove_one(table, id).await?;
                Ok((json!({ "id": id, "deleted": true }), id.clone()))
            }
        }
    }

    /// Undo applied creates in reverse order; updates and deletes stay.
    async fn compensate(&self, applied: Vec<AppliedStep>) -> CompensationReport {
        let mut report = CompensationReport::default();
        for step in applied.into_iter().rev() {
            if step.kind != "create" {
                report.irreversible.push(step);
                continue;
            }
            match self.remove_one(&step.table, &step.id).await {
                Ok(()) => report.reverted.push(step),
                Err(e) => {
                    tracing::warn!(
                        "Compensating delete of {}/{} failed: {}",
                        step.table,
                        step.id,
                        e
                    );
                    report
                        .errors
                        .push(format!("{}/{}: {}", step.table, step.id, e));
                }
            }
        }
        report
    }

    fn unsupported<T>(operation: &str) -> ServiceResult<T> {
        Ok(DatabaseResult::failure(format!(
            "{operation} is not supported by the REST provider; manage the schema with database migrations"
        ))
        .with_metadata("error_kind", "unsupported"))
    }
}

#[async_trait]
impl DataStore for RestStore {
    fn provider(&self) -> ProviderKind {
        PROVIDER
    }

    async fn initialize(&self) -> Result<bool, DatabaseError> {
        let client = self.build_client()?;
        let root = format!("{}/", self.config.rest_base());
        let response = client.get(&root).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(DatabaseError::connection(
                PROVIDER.as_str(),
                format!("gateway root returned {status}: {}", body.trim()),
            ));
        }
        tracing::info!("REST store connected to {}", self.config.rest_base());
        *self.client.write().await = Some(client);
        Ok(true)
    }

    async fn health_check(&self) -> HealthStatus {
        let client = match self.client().await {
            Ok(client) => client,
            Err(e) => return HealthStatus::unhealthy(PROVIDER, e.to_string()),
        };
        let started = Instant::now();
        match client.get(format!("{}/", self.config.rest_base())).send().await {
            Ok(response) if response.status().is_success() => HealthStatus::healthy(PROVIDER)
                .with_detail("endpoint", self.config.rest_base())
                .with_detail("latency_ms", started.elapsed().as_millis() as u64),
            Ok(response) => HealthStatus::unhealthy(
                PROVIDER,
                format!("gateway returned {}", response.status()),
            ),
            Err(e) => HealthStatus::unhealthy(PROVIDER, DatabaseError::from(e).to_string()),
        }
    }

    async fn close(&self) -> Result<(), DatabaseError> {
        if self.client.write().await.take().is_some() {
            tracing::info!("REST store closed");
        }
        Ok(())
    }

    async fn create_record(&self, table: &str, data: Record) -> ServiceResult<Record> {
        outcome(self.insert_one(table, data).await)
    }

    async fn get_record(&self, table: &str, id: &str) -> ServiceResult<Record> {
        let mut params = id_params(id);
        params.push(("select".to_string(), "*".to_string()));
        params.push(("limit".to_string(), "1".to_string()));
        let result = self.select(table, &params).await.and_then(|rows| {
            rows.into_iter()
                .next()
                .ok_or_else(|| DatabaseError::not_found(table, id))
        });
        outcome(result)
    }

    async fn update_record(&self, table: &str, id: &str, data: Record) -> ServiceResult<Record> {
        outcome(self.patch_one(table, id, data).await)
    }

    async fn delete_record(&self, table: &str, id: &str) -> ServiceResult<bool> {
        outcome(self.remove_one(table, id).await.map(|_| true))
    }

    async fn list_records(&self, table: &str, options: &QueryOptions) -> ServiceResult<Vec<Record>> {
        self.find_records(table, &[], options).await
    }

    async fn count_records(&self, table: &str, filters: &[QueryFilter]) -> ServiceResult<u64> {
        let counted = async {
            self.registry.check_filters(table, filters)?;
            let request = self
                .request(Method::HEAD, table)
                .await?
                .header(PREFER, "count=exact")
                .query(&filter_params(self.registry.get(table), filters));
            let response = self.send(table, request).await?;
            response
                .headers()
                .get(CONTENT_RANGE)
                .and_then(|value| value.to_str().ok())
                .and_then(parse_content_range)
                .ok_or_else(|| {
                    DatabaseError::connection(PROVIDER.as_str(), "response carried no exact count")
                })
        };
        match counted.await {
            Ok(total) => Ok(DatabaseResult::ok_with_count(total, total)),
            Err(e) => e.into_outcome(),
        }
    }

    async fn record_exists(&self, table: &str, id: &str) -> ServiceResult<bool> {
        let mut params = id_params(id);
        params.push(("select".to_string(), ID_FIELD.to_string()));
        params.push(("limit".to_string(), "1".to_string()));
        outcome(self.select(table, &params).await.map(|rows| !rows.is_empty()))
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
        let params = select_params(self.registry.get(table), &filters, options);
        match self.select(table, &params).await {
            Ok(rows) => {
                let count = rows.len() as u64;
                Ok(DatabaseResult::ok_with_count(rows, count))
            }
            Err(e) => e.into_outcome(),
        }
    }

    async fn find_one_record(&self, table: &str, filters: &[QueryFilter]) -> ServiceResult<Record> {
        if let Err(e) = self.registry.check_filters(table, filters) {
            return e.into_outcome();
        }
        let params = select_params(
            self.registry.get(table),
            filters,
            &QueryOptions::new().with_limit(1),
        );
        match self.select(table, &params).await {
            Ok(rows) => Ok(match rows.into_iter().next() {
                Some(row) => DatabaseResult::ok(row),
                None => DatabaseResult::empty(),
            }),
            Err(e) => e.into_outcome(),
        }
    }

    async fn batch_create(&self, table: &str, records: Vec<Record>) -> ServiceResult<Vec<Record>> {
        if records.is_empty() {
            return Ok(DatabaseResult::ok_with_count(Vec::new(), 0));
        }
        let created = async {
            let mut prepared = Vec::with_capacity(records.len());
            for data in records {
                let mut row = record::prepare_for_insert(data);
                self.registry
                    .prepare(table, &mut row, ValidationMode::Create)?;
                prepared.push(row);
            }
            let request = self.request(Method::POST, table).await?.json(&prepared);
            self.rows(table, request).await
        };
        match created.await {
            Ok(rows) => {
                let count = rows.len() as u64;
                Ok(DatabaseResult::ok_with_count(rows, count))
            }
            Err(e) => e.into_outcome(),
        }
    }

    async fn batch_update(&self, table: &str, records: Vec<Record>) -> ServiceResult<Vec<Record>> {
        let mut pending = Vec::with_capacity(records.len());
        for mut data in records {
            let Some(id) = record::record_id(&data) else {
                return Ok(DatabaseResult::failure(format!(
                    "batch update on '{table}' requires an id on every record"
                )));
            };
            data.remove(ID_FIELD);
            pending.push((id, data));
        }

        let mut updated = Vec::with_capacity(pending.len());
        let mut missing = Vec::new();
        for (id, data) in pending {
            match self.patch_one(table, &id, data).await {
                Ok(row) => updated.push(row),
                Err(DatabaseError::NotFound { .. }) => missing.push(id),
                Err(e) => return e.into_outcome(),
            }
        }
        let count = updated.len() as u64;
        let mut response = DatabaseResult::ok_with_count(updated, count);
        if !missing.is_empty() {
            response = response.with_metadata("missing_ids", json!(missing));
        }
        Ok(response)
    }

    async fn batch_delete(&self, table: &str, ids: &[String]) -> ServiceResult<u64> {
        if ids.is_empty() {
            return Ok(DatabaseResult::ok_with_count(0, 0));
        }
        let list: Vec<String> = ids.iter().map(|id| quote_value(id)).collect();
        let deleted = async {
            let request = self
                .request(Method::DELETE, table)
                .await?
                .query(&[(ID_FIELD, format!("in.({})", list.join(",")))]);
            self.rows(table, request).await
        };
        match deleted.await {
            Ok(rows) => {
                let count = rows.len() as u64;
                Ok(DatabaseResult::ok_with_count(count, count))
            }
            Err(e) => e.into_outcome(),
        }
    }

    async fn execute_transaction(
        &self,
        operations: Vec<TransactionOperation>,
    ) -> ServiceResult<TransactionReport> {
        let mut applied: Vec<AppliedStep> = Vec::with_capacity(operations.len());
        let mut results = Vec::with_capacity(operations.len());

        for (index, operation) in operations.iter().enumerate() {
            match self.apply_operation(operation).await {
                Ok((value, id)) => {
                    results.push(value);
                    applied.push(AppliedStep {
                        index,
                        kind: operation.kind().to_string(),
                        table: operation.table().to_string(),
                        id,
                    });
                }
                Err(e) => {
                    tracing::warn!(
                        "REST transaction failed at step {} ({} on {}): {}",
                        index,
                        operation.kind(),
                        operation.table(),
                        e
                    );
                    let report = self.compensate(applied).await;
                    if !report.irreversible.is_empty() || !report.errors.is_empty() {
                        tracing::warn!(
                            "REST transaction left {} irreversible step(s) and {} failed compensation(s)",
                            report.irreversible.len(),
                            report.errors.len()
                        );
                    }
                    return Err(DatabaseError::transaction(TransactionFailure {
                        failed_step: index,
                        reason: e.to_string(),
                        rollback: Rollback::BestEffort(report),
                    }));
                }
            }
        }
        Ok(DatabaseResult::ok(TransactionReport::best_effort(results)))
    }

    async fn create_table(&self, _schema: &TableSchema) -> ServiceResult<()> {
        Self::unsupported("create_table")
    }

    async fn table_exists(&self, table: &str) -> ServiceResult<bool> {
        let params: QueryParams = vec![
            ("select".to_string(), "*".to_string()),
            ("limit".to_string(), "0".to_string()),
        ];
        match self.select(table, &params).await {
            Ok(_) => Ok(DatabaseResult::ok(true)),
            Err(DatabaseError::NotFound { .. }) => Ok(DatabaseResult::ok(false)),
            Err(e) => e.into_outcome(),
        }
    }

    async fn get_table_schema(&self, table: &str) -> ServiceResult<TableSchema> {
        let params: QueryParams = vec![
            ("select".to_string(), "*".to_string()),
            ("limit".to_string(), "1".to_string()),
        ];
        let result = self.select(table, &params).await.map(|rows| {
            match self.registry.get(table) {
                Some(schema) => schema.clone(),
                None => TableSchema::infer_from_sample(table, &rows.into_iter().next().unwrap_or_default()),
            }
        });
        outcome(result)
    }

    async fn create_index(&self, _table: &str, _index: &IndexDefinition) -> ServiceResult<String> {
        Self::unsupported("create_index")
    }

    async fn drop_index(&self, _table: &str, _index_name: &str) -> ServiceResult<()> {
        Self::unsupported("drop_index")
    }
}
