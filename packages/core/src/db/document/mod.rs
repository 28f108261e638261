//! DocumentStore - DataStore Implementation for MongoDB
//!
//! Each table maps to a collection of the configured database. Records keep
//! their `id` in the native `_id` key; generated ids are `ObjectId` hex
//! strings, caller-supplied ids are stored as given.
//!
//! # Behavior
//!
//! - Validation against the [`SchemaRegistry`] runs before every write
//! - Registry indexes are requested in the background during `initialize`;
//!   a failed index build is logged and never blocks startup
//! - `batch_create` is unordered: rejected documents are reported in the
//!   result metadata while the rest are inserted
//! - `execute_transaction` runs inside a client session transaction, which
//!   requires a replica set or sharded deployment
//!
//! # Examples
//!
//! ```rust,no_run
//! use omnistore_core::db::{DataStore, DocumentConfig, DocumentStore};
//! use omnistore_core::models::SchemaRegistry;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = DocumentConfig::new("mongodb://localhost:27017").with_database("app");
//!     let store = DocumentStore::new(config, Arc::new(SchemaRegistry::core()));
//!     store.initialize().await?;
//!
//!     let health = store.health_check().await;
//!     println!("{health:?}");
//!     Ok(())
//! }
//! ```

mod query;

use crate::db::config::{redact, DocumentConfig, ProviderKind};
use crate::db::error::{outcome, DatabaseError, ServiceResult};
use crate::db::store::{with_timeout, DataStore, HealthStatus};
use crate::models::record::{self, Record};
use crate::models::{
    DatabaseResult, IndexDefinition, QueryFilter, QueryOptions, Rollback, SchemaRegistry,
    TableSchema, TransactionFailure, TransactionOperation, TransactionReport, ValidationMode,
};
use async_trait::async_trait;
use bson::{doc, Bson, Document};
use futures::TryStreamExt;
use mongodb::options::{ClientOptions, FindOptions, IndexOptions, ReturnDocument};
use mongodb::{Client, ClientSession, Collection, Database, IndexModel};
use query::{
    compile_filters, document_to_record, failed_insert_indexes, id_filter, id_to_bson, index_keys,
    record_to_document, sort_document, translate_error,
};
use serde_json::{json, Value};
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;

const DEFAULT_DATABASE: &str = "omnistore";
const PROVIDER: ProviderKind = ProviderKind::Document;

#[derive(Clone)]
struct Connection {
    client: Client,
    database: Database,
}

/// MongoDB-backed store.
pub struct DocumentStore {
    config: DocumentConfig,
    registry: Arc<SchemaRegistry>,
    connection: RwLock<Option<Connection>>,
}

impl DocumentStore {
    pub fn new(config: DocumentConfig, registry: Arc<SchemaRegistry>) -> Self {
        Self {
            config,
            registry,
            connection: RwLock::new(None),
        }
    }

    pub fn config(&self) -> &DocumentConfig {
        &self.config
    }

    async fn connection(&self) -> Result<Connection, DatabaseError> {
        self.connection
            .read()
            .await
            .clone()
            .ok_or_else(|| DatabaseError::connection(PROVIDER.as_str(), "store is not initialized"))
    }

    async fn collection(&self, table: &str) -> Result<Collection<Document>, DatabaseError> {
        Ok(self.connection().await?.database.collection(table))
    }

    async fn run<T, F>(&self, future: F) -> Result<T, DatabaseError>
    where
        F: Future<Output = Result<T, DatabaseError>>,
    {
        with_timeout(PROVIDER, self.config.timeout(), future).await
    }

    fn prepare_insert(&self, table: &str, data: Record) -> Result<Record, DatabaseError> {
        let mut prepared = record::prepare_for_insert_with(data, query::generate_object_id);
        self.registry
            .prepare(table, &mut prepared, ValidationMode::Create)?;
        Ok(prepared)
    }

    fn prepare_update(&self, table: &str, data: Record) -> Result<Document, DatabaseError> {
        let mut changes = record::prepare_for_update(data);
        self.registry
            .prepare(table, &mut changes, ValidationMode::Update)?;
        let set = record_to_document(table, changes)?;
        Ok(doc! { "$set": set })
    }

    fn compile(&self, table: &str, filters: &[QueryFilter]) -> Result<Document, DatabaseError> {
        self.registry.check_filters(table, filters)?;
        compile_filters(table, filters)
    }

    async fn collection_names(&self, database: &Database) -> Result<Vec<String>, DatabaseError> {
        database
            .list_collection_names()
            .await
            .map_err(|e| translate_error("", e))
    }

    async fn existing_index_names(collection: &Collection<Document>) -> Vec<String> {
        match collection.list_index_names().await {
            Ok(names) => names,
            Err(e) => {
                tracing::debug!("Listing indexes on {} failed: {}", collection.name(), e);
                Vec::new()
            }
        }
    }

    fn index_model(table: &str, index: &IndexDefinition) -> (String, IndexModel) {
        let name = index.name(table);
        let options = IndexOptions::builder()
            .name(name.clone())
            .unique(index.unique)
            .build();
        let model = IndexModel::builder()
            .keys(index_keys(&index.fields))
            .options(options)
            .build();
        (name, model)
    }

    /// Request every registry index without waiting for the builds.
    fn spawn_registry_indexes(&self, database: &Database) {
        for schema in self.registry.tables() {
            for index in schema.all_indexes() {
                let collection: Collection<Document> = database.collection(&schema.name);
                let (name, model) = Self::index_model(&schema.name, &index);
                tokio::spawn(async move {
                    if let Err(e) = collection.create_index(model).await {
                        tracing::warn!("Index {} could not be created: {}", name, e);
                    }
                });
            }
        }
    }

    async fn apply_operation(
        &self,
        database: &Database,
        session: &mut ClientSession,
        operation: TransactionOperation,
    ) -> Result<Value, DatabaseError> {
        match operation {
            TransactionOperation::Create { table, data } => {
                let prepared = self.prepare_insert(&table, data)?;
                let document = record_to_document(&table, prepared.clone())?;
                database
                    .collection::<Document>(&table)
                    .insert_one(document)
                    .session(&mut *session)
                    .await
                    .map_err(|e| translate_error(&table, e))?;
                Ok(Value::Object(prepared))
            }
            TransactionOperation::Update { table, id, data } => {
                let update = self.prepare_update(&table, data)?;
                let updated = database
                    .collection::<Document>(&table)
                    .find_one_and_update(id_filter(&id), update)
                    .return_document(ReturnDocument::After)
                    .session(&mut *session)
                    .await
                    .map_err(|e| translate_error(&table, e))?
                    .ok_or_else(|| DatabaseError::not_found(&table, &id))?;
                Ok(Value::Object(document_to_record(updated)))
            }
            TransactionOperation::Delete { table, id } => {
                let deleted = database
                    .collection::<Document>(&table)
                    .delete_one(id_filter(&id))
                    .session(&mut *session)
                    .await
                    .map_err(|e| translate_error(&table, e))?;
                if deleted.deleted_count == 0 {
                    return Err(DatabaseError::not_found(&table, &id));
                }
                Ok(json!({ "id": id, "deleted": true }))
            }
        }
    }
}

#[async_trait]
impl DataStore for DocumentStore {
    fn provider(&self) -> ProviderKind {
        PROVIDER
    }

    async fn initialize(&self) -> Result<bool, DatabaseError> {
        let connect = async {
            let mut options = ClientOptions::parse(&self.config.connection_string)
                .await
                .map_err(|e| DatabaseError::connection(PROVIDER.as_str(), e.to_string()))?;
            options.max_pool_size = Some(self.config.pool_size);
            options.server_selection_timeout = Some(self.config.timeout());
            options.connect_timeout = Some(self.config.timeout());
            options.app_name = Some("omnistore".to_string());

            let database_name = self
                .config
                .database_name
                .clone()
                .or_else(|| options.default_database.clone())
                .unwrap_or_else(|| DEFAULT_DATABASE.to_string());

            let client = Client::with_options(options)
                .map_err(|e| DatabaseError::connection(PROVIDER.as_str(), e.to_string()))?;
            let database = client.database(&database_name);
            database
                .run_command(doc! { "ping": 1 })
                .await
                .map_err(|e| DatabaseError::connection(PROVIDER.as_str(), e.to_string()))?;
            Ok(Connection { client, database })
        };
        let connection = self.run(connect).await?;

        tracing::info!(
            "Document store connected to {} (database {})",
            redact(&self.config.connection_string),
            connection.database.name()
        );
        self.spawn_registry_indexes(&connection.database);

        let previous = self.connection.write().await.replace(connection);
        if let Some(previous) = previous {
            previous.client.shutdown().await;
        }
        Ok(true)
    }

    async fn health_check(&self) -> HealthStatus {
        let connection = match self.connection().await {
            Ok(connection) => connection,
            Err(e) => return HealthStatus::unhealthy(PROVIDER, e.to_string()),
        };
        let started = Instant::now();
        let ping = self
            .run(async {
                connection
                    .database
                    .run_command(doc! { "ping": 1 })
                    .await
                    .map_err(|e| DatabaseError::connection(PROVIDER.as_str(), e.to_string()))
            })
            .await;
        match ping {
            Ok(_) => HealthStatus::healthy(PROVIDER)
                .with_detail("database", connection.database.name())
                .with_detail("latency_ms", started.elapsed().as_millis() as u64)
                .with_detail("pool_size", self.config.pool_size),
            Err(e) => HealthStatus::unhealthy(PROVIDER, e.to_string()),
        }
    }

    async fn close(&self) -> Result<(), DatabaseError> {
        if let Some(connection) = self.connection.write().await.take() {
            connection.client.shutdown().await;
            tracing::info!("Document store closed");
        }
        Ok(())
    }

    async fn create_record(&self, table: &str, data: Record) -> ServiceResult<Record> {
        let result = self
            .run(async {
                let prepared = self.prepare_insert(table, data)?;
                let document = record_to_document(table, prepared.clone())?;
                self.collection(table)
                    .await?
                    .insert_one(document)
                    .await
                    .map_err(|e| translate_error(table, e))?;
                Ok(prepared)
            })
            .await;
        outcome(result)
    }

    async fn get_record(&self, table: &str, id: &str) -> ServiceResult<Record> {
        let result = self
            .run(async {
                let found = self
                    .collection(table)
                    .await?
                    .find_one(id_filter(id))
                    .await
                    .map_err(|e| translate_error(table, e))?;
                found
                    .map(document_to_record)
                    .ok_or_else(|| DatabaseError::not_found(table, id))
            })
            .await;
        outcome(result)
    }

    async fn update_record(&self, table: &str, id: &str, data: Record) -> ServiceResult<Record> {
        let result = self
            .run(async {
                let update = self.prepare_update(table, data)?;
                let updated = self
                    .collection(table)
                    .await?
                    .find_one_and_update(id_filter(id), update)
                    .return_document(ReturnDocument::After)
                    .await
                    .map_err(|e| translate_error(table, e))?;
                updated
                    .map(document_to_record)
                    .ok_or_else(|| DatabaseError::not_found(table, id))
            })
            .await;
        outcome(result)
    }

    async fn delete_record(&self, table: &str, id: &str) -> ServiceResult<bool> {
        let result = self
            .run(async {
                let deleted = self
                    .collection(table)
                    .await?
                    .delete_one(id_filter(id))
                    .await
                    .map_err(|e| translate_error(table, e))?;
                if deleted.deleted_count == 0 {
                    return Err(DatabaseError::not_found(table, id));
                }
                Ok(true)
            })
            .await;
        outcome(result)
    }

    async fn list_records(&self, table: &str, options: &QueryOptions) -> ServiceResult<Vec<Record>> {
        self.find_records(table, &[], options).await
    }

    async fn count_records(&self, table: &str, filters: &[QueryFilter]) -> ServiceResult<u64> {
        let result = self
            .run(async {
                let filter = self.compile(table, filters)?;
                self.collection(table)
                    .await?
                    .count_documents(filter)
                    .await
                    .map_err(|e| translate_error(table, e))
            })
            .await;
        match result {
            Ok(count) => Ok(DatabaseResult::ok_with_count(count, count)),
            Err(e) => e.into_outcome(),
        }
    }

    async fn record_exists(&self, table: &str, id: &str) -> ServiceResult<bool> {
        let result = self
            .run(async {
                let found = self
                    .collection(table)
                    .await?
                    .find_one(id_filter(id))
                    .projection(doc! { "_id": 1 })
                    .await
                    .map_err(|e| translate_error(table, e))?;
                Ok(found.is_some())
            })
            .await;
        outcome(result)
    }

    async fn find_records(
        &self,
        table: &str,
        filters: &[QueryFilter],
        options: &QueryOptions,
    ) -> ServiceResult<Vec<Record>> {
        let result = self
            .run(async {
                let filter = self.compile(table, &options.merged_filters(filters))?;
                let mut find_options = FindOptions::default();
                find_options.sort = sort_document(options);
                find_options.skip = options.offset;
                find_options.limit = options.limit.map(|limit| limit as i64);

                let cursor = self
                    .collection(table)
                    .await?
                    .find(filter)
                    .with_options(find_options)
                    .await
                    .map_err(|e| translate_error(table, e))?;
                let documents: Vec<Document> = cursor
                    .try_collect()
                    .await
                    .map_err(|e| translate_error(table, e))?;
                Ok(documents.into_iter().map(document_to_record).collect::<Vec<_>>())
            })
            .await;
        match result {
            Ok(records) => {
                let count = records.len() as u64;
                Ok(DatabaseResult::ok_with_count(records, count))
            }
            Err(e) => e.into_outcome(),
        }
    }

    async fn find_one_record(&self, table: &str, filters: &[QueryFilter]) -> ServiceResult<Record> {
        let result = self
            .run(async {
                let filter = self.compile(table, filters)?;
                self.collection(table)
                    .await?
                    .find_one(filter)
                    .await
                    .map_err(|e| translate_error(table, e))
            })
            .await;
        match result {
            Ok(Some(document)) => Ok(DatabaseResult::ok(document_to_record(document))),
            Ok(None) => Ok(DatabaseResult::empty()),
            Err(e) => e.into_outcome(),
        }
    }

    async fn batch_create(&self, table: &str, records: Vec<Record>) -> ServiceResult<Vec<Record>> {
        if records.is_empty() {
            return Ok(DatabaseResult::ok_with_count(Vec::new(), 0));
        }
        let result = self
            .run(async {
                let prepared = records
                    .into_iter()
                    .map(|r| self.prepare_insert(table, r))
                    .collect::<Result<Vec<_>, _>>()?;
                let documents = prepared
                    .iter()
                    .map(|r| record_to_document(table, r.clone()))
                    .collect::<Result<Vec<_>, _>>()?;

                let collection = self.collection(table).await?;
                match collection.insert_many(documents).ordered(false).await {
                    Ok(_) => Ok((prepared, Vec::new())),
                    Err(e) => {
                        let Some(failed) = failed_insert_indexes(&e) else {
                            return Err(translate_error(table, e));
                        };
                        tracing::warn!(
                            "Batch insert into {}: {} of {} documents rejected",
                            table,
                            failed.len(),
                            prepared.len()
                        );
                        let inserted = prepared
                            .into_iter()
                            .enumerate()
                            .filter(|(i, _)| !failed.contains(i))
                            .map(|(_, r)| r)
                            .collect();
                        Ok((inserted, failed))
                    }
                }
            })
            .await;
        match result {
            Ok((inserted, failed)) => {
                let count = inserted.len() as u64;
                let mut response = DatabaseResult::ok_with_count(inserted, count);
                if !failed.is_empty() {
                    response = response
                        .with_metadata("failed_count", failed.len() as u64)
                        .with_metadata("failed_indexes", json!(failed));
                }
                Ok(response)
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
            data.remove(record::ID_FIELD);
            pending.push((id, data));
        }

        let result = self
            .run(async {
                let collection = self.collection(table).await?;
                let mut updated = Vec::with_capacity(pending.len());
                let mut missing = Vec::new();
                for (id, data) in pending {
                    let update = self.prepare_update(table, data)?;
                    let document = collection
                        .find_one_and_update(id_filter(&id), update)
                        .return_document(ReturnDocument::After)
                        .await
                        .map_err(|e| translate_error(table, e))?;
                    match document {
                        Some(document) => updated.push(document_to_record(document)),
                        None => missing.push(id),
                    }
                }
                Ok((updated, missing))
            })
            .await;
        match result {
            Ok((updated, missing)) => {
                let count = updated.len() as u64;
                let mut response = DatabaseResult::ok_with_count(updated, count);
                if !missing.is_empty() {
                    response = response.with_metadata("missing_ids", json!(missing));
                }
                Ok(response)
            }
            Err(e) => e.into_outcome(),
        }
    }

    async fn batch_delete(&self, table: &str, ids: &[String]) -> ServiceResult<u64> {
        if ids.is_empty() {
            return Ok(DatabaseResult::ok_with_count(0, 0));
        }
        let result = self
            .run(async {
                let native: Vec<Bson> = ids.iter().map(|id| id_to_bson(id)).collect();
                let deleted = self
                    .collection(table)
                    .await?
                    .delete_many(doc! { "_id": { "$in": native } })
                    .await
                    .map_err(|e| translate_error(table, e))?;
                Ok(deleted.deleted_count)
            })
            .await;
        match result {
            Ok(deleted) => Ok(DatabaseResult::ok_with_count(deleted, deleted)),
            Err(e) => e.into_outcome(),
        }
    }

    async fn execute_transaction(
        &self,
        operations: Vec<TransactionOperation>,
    ) -> ServiceResult<TransactionReport> {
        let connection = self.connection().await?;
        let total = operations.len();
        let failure = |step: usize, reason: String| {
            DatabaseError::transaction(TransactionFailure {
                failed_step: step,
                reason,
                rollback: Rollback::Native,
            })
        };

        let transaction = async {
            let mut session = connection
                .client
                .start_session()
                .await
                .map_err(|e| failure(0, e.to_string()))?;
            session
                .start_transaction()
                .await
                .map_err(|e| failure(0, e.to_string()))?;

            let mut results = Vec::with_capacity(total);
            for (step, operation) in operations.into_iter().enumerate() {
                match self
                    .apply_operation(&connection.database, &mut session, operation)
                    .await
                {
                    Ok(value) => results.push(value),
                    Err(e) => {
                        if let Err(abort) = session.abort_transaction().await {
                            tracing::warn!("Aborting document transaction failed: {}", abort);
                        }
                        tracing::warn!("Document transaction rolled back at step {}: {}", step, e);
                        return Err(failure(step, e.to_string()));
                    }
                }
            }
            session
                .commit_transaction()
                .await
                .map_err(|e| failure(total, e.to_string()))?;
            Ok(results)
        };

        let results = self.run(transaction).await?;
        tracing::debug!("Document transaction committed {} operations", total);
        Ok(DatabaseResult::ok(TransactionReport::atomic(results)))
    }

    async fn create_table(&self, schema: &TableSchema) -> ServiceResult<()> {
        let result = self
            .run(async {
                let connection = self.connection().await?;
                let exists = self
                    .collection_names(&connection.database)
                    .await?
                    .contains(&schema.name);
                if !exists {
                    connection
                        .database
                        .create_collection(&schema.name)
                        .await
                        .map_err(|e| translate_error(&schema.name, e))?;
                    tracing::info!("Created collection {}", schema.name);
                }

                let collection: Collection<Document> = connection.database.collection(&schema.name);
                for index in schema.all_indexes() {
                    let (name, model) = Self::index_model(&schema.name, &index);
                    if let Err(e) = collection.create_index(model).await {
                        tracing::warn!("Index {} could not be created: {}", name, e);
                    }
                }
                Ok(exists)
            })
            .await;
        match result {
            Ok(existed) => Ok(DatabaseResult::ok(()).with_metadata("already_exists", existed)),
            Err(e) => e.into_outcome(),
        }
    }

    async fn table_exists(&self, table: &str) -> ServiceResult<bool> {
        let result = self
            .run(async {
                let connection = self.connection().await?;
                let names = self.collection_names(&connection.database).await?;
                Ok(names.iter().any(|name| name == table))
            })
            .await;
        outcome(result)
    }

    async fn get_table_schema(&self, table: &str) -> ServiceResult<TableSchema> {
        let result = self
            .run(async {
                let connection = self.connection().await?;
                let names = self.collection_names(&connection.database).await?;
                if !names.iter().any(|name| name == table) {
                    return Err(DatabaseError::table_not_found(table));
                }
                if let Some(schema) = self.registry.get(table) {
                    return Ok(schema.clone());
                }
                let sample = connection
                    .database
                    .collection::<Document>(table)
                    .find_one(doc! {})
                    .await
                    .map_err(|e| translate_error(table, e))?
                    .map(document_to_record)
                    .unwrap_or_default();
                Ok(TableSchema::infer_from_sample(table, &sample))
            })
            .await;
        outcome(result)
    }

    async fn create_index(&self, table: &str, index: &IndexDefinition) -> ServiceResult<String> {
        let result = self
            .run(async {
                let collection = self.collection(table).await?;
                let (name, model) = Self::index_model(table, index);
                if Self::existing_index_names(&collection).await.contains(&name) {
                    return Ok((name, true));
                }
                collection
                    .create_index(model)
                    .await
                    .map_err(|e| translate_error(table, e))?;
                tracing::debug!("Created index {} on {}", name, table);
                Ok((name, false))
            })
            .await;
        match result {
            Ok((name, existed)) => Ok(DatabaseResult::ok(name).with_metadata("already_exists", existed)),
            Err(e) => e.into_outcome(),
        }
    }

    async fn drop_index(&self, table: &str, index_name: &str) -> ServiceResult<()> {
        let result = self
            .run(async {
                self.collection(table)
                    .await?
                    .drop_index(index_name)
                    .await
                    .map_err(|e| translate_error(table, e))
            })
            .await;
        outcome(result)
    }
}
