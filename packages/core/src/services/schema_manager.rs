//! Schema Manager
//!
//! Provisions every registered table through the active [`DataStore`], in
//! dependency order, then seeds the permission templates the RBAC layer
//! needs at bootstrap.
//!
//! ## Ordering
//!
//! Tables are ordered with Kahn's algorithm, one round at a time, keeping
//! registry order inside each round. Tables with no dependencies come
//! first. If a round cannot place anything (a cycle, or a dependency on a
//! table that is not being created) the remaining tables are appended in
//! registry order and a warning is logged.
//!
//! ## Idempotence
//!
//! Existing tables are skipped and templates are inserted only when their
//! role is absent, so running `initialize_schema` twice is a no-op the
//! second time.

use crate::db::{DataStore, DatabaseError};
use crate::models::core_schemas::{COMPANIES, CONTENT_ITEMS, DEVICES, PERMISSION_TEMPLATES, USERS, USER_ROLES};
use crate::models::SchemaRegistry;
use crate::services::seed_manager::SeedManager;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Dependencies between the core tables: table -> tables it references.
const DEFAULT_DEPENDENCIES: &[(&str, &[&str])] = &[
    (USERS, &[COMPANIES]),
    (USER_ROLES, &[USERS, COMPANIES]),
    (DEVICES, &[COMPANIES]),
    (CONTENT_ITEMS, &[COMPANIES, USERS]),
];

pub type DependencyMap = HashMap<String, Vec<String>>;

/// The fixed dependency map of the core tables.
pub fn default_dependencies() -> DependencyMap {
    DEFAULT_DEPENDENCIES
        .iter()
        .map(|(table, deps)| {
            (
                table.to_string(),
                deps.iter().map(|d| d.to_string()).collect(),
            )
        })
        .collect()
}

/// Default dependencies plus the foreign keys declared in `registry`.
pub fn dependency_map(registry: &SchemaRegistry) -> DependencyMap {
    let mut dependencies = default_dependencies();
    for schema in registry.tables() {
        let entry = dependencies.entry(schema.name.clone()).or_default();
        for referenced in schema.referenced_tables() {
            if !entry.iter().any(|d| d == referenced) {
                entry.push(referenced.to_string());
            }
        }
    }
    dependencies
}

/// Order `tables` so every table follows the tables it depends on.
pub fn creation_order(tables: &[String], dependencies: &DependencyMap) -> Vec<String> {
    let mut order: Vec<String> = Vec::with_capacity(tables.len());
    let mut placed: HashSet<&str> = HashSet::new();
    let mut remaining: Vec<&String> = tables.iter().collect();

    while !remaining.is_empty() {
        let ready: Vec<&String> = remaining
            .iter()
            .copied()
            .filter(|table| {
                dependencies
                    .get(table.as_str())
                    .map_or(true, |deps| deps.iter().all(|d| placed.contains(d.as_str())))
            })
            .collect();

        if ready.is_empty() {
            let rest: Vec<&str> = remaining.iter().map(|t| t.as_str()).collect();
            tracing::warn!(
                "Unresolvable table dependencies (cycle or unknown table) among {:?}; using registry order",
                rest
            );
            order.extend(remaining.into_iter().cloned());
            break;
        }

        for table in &ready {
            placed.insert(table.as_str());
            order.push((*table).clone());
        }
        remaining.retain(|table| !ready.contains(table));
    }
    order
}

/// A table the provider refused to create.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SchemaFailure {
    pub table: String,
    pub error: String,
}

/// Outcome of [`SchemaManager::initialize_schema`].
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SchemaReport {
    pub order: Vec<String>,
    pub created: Vec<String>,
    pub skipped: Vec<String>,
    pub failed: Vec<SchemaFailure>,
    pub indexes_created: Vec<String>,
    pub templates_seeded: u64,
}

impl SchemaReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Creates the registered tables and their indexes on the active store.
pub struct SchemaManager {
    store: Arc<dyn DataStore>,
    registry: Arc<SchemaRegistry>,
    dependencies: DependencyMap,
}

impl SchemaManager {
    pub fn new(store: Arc<dyn DataStore>, registry: Arc<SchemaRegistry>) -> Self {
        let dependencies = dependency_map(&registry);
        Self {
            store,
            registry,
            dependencies,
        }
    }

    /// Replace the dependency map.
    pub fn with_dependencies(mut self, dependencies: DependencyMap) -> Self {
        self.dependencies = dependencies;
        self
    }

    pub fn creation_order(&self) -> Vec<String> {
        creation_order(&self.registry.table_names(), &self.dependencies)
    }

    /// Create missing tables and indexes, then seed permission templates.
    ///
    /// Provider refusals are collected in the report; only connection
    /// problems abort the run.
    pub async fn initialize_schema(&self) -> Result<SchemaReport, DatabaseError> {
        let mut report = SchemaReport {
            order: self.creation_order(),
            ..SchemaReport::default()
        };

        for name in report.order.clone() {
            let Some(schema) = self.registry.get(&name) else {
                continue;
            };

            let exists = self.store.table_exists(&name).await?;
            if exists.success && exists.data == Some(true) {
                tracing::debug!("Table {} already exists, skipping", name);
                report.skipped.push(name);
                continue;
            }

            let created = self.store.create_table(schema).await?;
            if !created.success {
                tracing::warn!("Table {} was not created: {}", name, created.error_message());
                report.failed.push(SchemaFailure {
                    table: name,
                    error: created.error_message().to_string(),
                });
                continue;
            }
            tracing::info!("Created table {}", name);

            for index in schema.all_indexes() {
                let result = self.store.create_index(&name, &index).await?;
                match result.into_data() {
                    Some(index_name) => report.indexes_created.push(index_name),
                    None => tracing::warn!("Index on {}({:?}) was not created", name, index.fields),
                }
            }
            report.created.push(name);
        }

        let templates_available = self.registry.contains(PERMISSION_TEMPLATES)
            && !report.failed.iter().any(|f| f.table == PERMISSION_TEMPLATES);
        if templates_available {
            let mut seeder = SeedManager::new(Arc::clone(&self.store));
            let seeded = seeder.seed_permission_templates().await?;
            report.templates_seeded = seeded.created_in(PERMISSION_TEMPLATES);
        }

        tracing::info!(
            "Schema initialized: {} created, {} skipped, {} failed, {} templates seeded",
            report.created.len(),
            report.skipped.len(),
            report.failed.len(),
            report.templates_seeded
        );
        Ok(report)
    }
}
