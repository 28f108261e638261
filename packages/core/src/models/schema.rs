//! Schema Registry Types
//!
//! Declarative, engine-independent description of every entity: its fields,
//! types, constraints, foreign keys and indexes. The same [`TableSchema`]
//! drives relational DDL, document-store index creation, and the
//! application-level validation every provider runs before writing.
//!
//! ## Example
//!
//! ```rust
//! use omnistore_core::models::{FieldDefinition, FieldType, IndexDefinition, TableSchema};
//!
//! let companies = TableSchema::new("companies", "Tenant organizations")
//!     .field(FieldDefinition::new("name", FieldType::String).required().max_length(200))
//!     .field(FieldDefinition::new("organization_code", FieldType::String).required().unique())
//!     .index(IndexDefinition::unique(["organization_code"]))
//!     .with_soft_delete();
//!
//! assert!(companies.has_field("id"));
//! assert!(companies.has_field("is_deleted"));
//! ```

use crate::db::DatabaseError;
use crate::models::query::QueryFilter;
use crate::models::record::{
    Record, CREATED_AT_FIELD, DELETED_AT_FIELD, DELETED_BY_FIELD, ID_FIELD, IS_DELETED_FIELD,
    UPDATED_AT_FIELD,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;

/// Storage-neutral field types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    Text,
    Integer,
    Float,
    Boolean,
    Datetime,
    Json,
    Uuid,
    Email,
    Url,
    Enum,
}

impl FieldType {
    pub fn as_str(self) -> &'static str {
        match self {
            FieldType::String => "string",
            FieldType::Text => "text",
            FieldType::Integer => "integer",
            FieldType::Float => "float",
            FieldType::Boolean => "boolean",
            FieldType::Datetime => "datetime",
            FieldType::Json => "json",
            FieldType::Uuid => "uuid",
            FieldType::Email => "email",
            FieldType::Url => "url",
            FieldType::Enum => "enum",
        }
    }

    /// Types every provider stores as the exact text it was given, so
    /// pattern operators match the same rows everywhere. Datetimes are
    /// excluded: their text form differs between engines.
    pub fn is_textual(self) -> bool {
        matches!(
            self,
            FieldType::String
                | FieldType::Text
                | FieldType::Email
                | FieldType::Url
                | FieldType::Enum
                | FieldType::Uuid
        )
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Definition of a single field in a table schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDefinition {
    pub name: String,

    #[serde(rename = "type")]
    pub field_type: FieldType,

    #[serde(default)]
    pub required: bool,

    #[serde(default)]
    pub unique: bool,

    #[serde(default)]
    pub indexed: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<usize>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enum_values: Option<Vec<String>>,

    /// Reference in `"table.field"` form.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub foreign_key: Option<String>,

    #[serde(default)]
    pub description: String,
}

impl FieldDefinition {
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            required: false,
            unique: false,
            indexed: false,
            default_value: None,
            max_length: None,
            enum_values: None,
            foreign_key: None,
            description: String::new(),
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn indexed(mut self) -> Self {
        self.indexed = true;
        self
    }

    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.default_value = Some(value.into());
        self
    }

    pub fn max_length(mut self, max_length: usize) -> Self {
        self.max_length = Some(max_length);
        self
    }

    pub fn enum_values<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.enum_values = Some(values.into_iter().map(Into::into).collect());
        self
    }

    pub fn references(mut self, target: impl Into<String>) -> Self {
        self.foreign_key = Some(target.into());
        self
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// `(table, field)` parsed from `foreign_key`.
    pub fn foreign_key_target(&self) -> Option<(&str, &str)> {
        self.foreign_key
            .as_deref()
            .and_then(|target| target.split_once('.'))
    }

    fn check_value(&self, table: &str, value: &Value) -> Result<(), DatabaseError> {
        if value.is_null() {
            return Ok(());
        }
        let invalid = |reason: String| {
            Err(DatabaseError::validation(
                table,
                format!("field '{}' {}", self.name, reason),
            ))
        };

        match self.field_type {
            FieldType::Integer => {
                if !(value.is_i64() || value.is_u64()) {
                    return invalid(format!("expects an integer, got {value}"));
                }
            }
            FieldType::Float => {
                if !value.is_number() {
                    return invalid(format!("expects a number, got {value}"));
                }
            }
            FieldType::Boolean => {
                if !value.is_boolean() {
                    return invalid(format!("expects a boolean, got {value}"));
                }
            }
            FieldType::Json => {}
            textual => {
                let Some(text) = value.as_str() else {
                    return invalid(format!("expects a {textual} string, got {value}"));
                };
                self.check_text(text).or_else(invalid)?;
            }
        }
        Ok(())
    }

    fn check_text(&self, text: &str) -> Result<(), String> {
        if let Some(max) = self.max_length {
            if text.chars().count() > max {
                return Err(format!("exceeds max length {max}"));
            }
        }
        match self.field_type {
            FieldType::Email => {
                let valid = text
                    .split_once('@')
                    .is_some_and(|(local, domain)| {
                        !local.is_empty() && domain.contains('.') && !text.contains(char::is_whitespace)
                    });
                if !valid {
                    return Err(format!("is not a valid email address: '{text}'"));
                }
            }
            FieldType::Url => {
                let valid = url::Url::parse(text)
                    .map(|u| matches!(u.scheme(), "http" | "https"))
                    .unwrap_or(false);
                if !valid {
                    return Err(format!("is not a valid http(s) URL: '{text}'"));
                }
            }
            FieldType::Uuid => {
                if uuid::Uuid::parse_str(text).is_err() {
                    return Err(format!("is not a valid UUID: '{text}'"));
                }
            }
            FieldType::Datetime => {
                if chrono::DateTime::parse_from_rfc3339(text).is_err() {
                    return Err(format!("is not an RFC 3339 timestamp: '{text}'"));
                }
            }
            FieldType::Enum => {
                if let Some(allowed) = &self.enum_values {
                    if !allowed.iter().any(|candidate| candidate == text) {
                        return Err(format!("must be one of {allowed:?}, got '{text}'"));
                    }
                }
            }
            _ => {}
        }
        Ok(())
    }
}

/// A declared (possibly composite) index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexDefinition {
    pub fields: Vec<String>,
    #[serde(default)]
    pub unique: bool,
}

impl IndexDefinition {
    pub fn new<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            fields: fields.into_iter().map(Into::into).collect(),
            unique: false,
        }
    }

    pub fn unique<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            unique: true,
            ..Self::new(fields)
        }
    }

    /// Deterministic index name: `idx_<table>_<f1>_<f2>…` or `uniq_<table>_…`.
    pub fn name(&self, table: &str) -> String {
        let prefix = if self.unique { "uniq" } else { "idx" };
        format!("{}_{}_{}", prefix, table, self.fields.join("_"))
    }
}

/// Whether validation runs for a full insert or a partial update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationMode {
    Create,
    Update,
}

/// Declarative description of one table / collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableSchema {
    pub name: String,
    pub fields: Vec<FieldDefinition>,
    #[serde(default)]
    pub indexes: Vec<IndexDefinition>,
    #[serde(default)]
    pub description: String,
}

impl TableSchema {
    /// New schema with the mandatory `id`, `created_at` and `updated_at` fields.
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: vec![
                FieldDefinition::new(ID_FIELD, FieldType::String)
                    .required()
                    .unique()
                    .max_length(64)
                    .describe("Primary identifier"),
                FieldDefinition::new(CREATED_AT_FIELD, FieldType::Datetime)
                    .required()
                    .describe("Creation timestamp"),
                FieldDefinition::new(UPDATED_AT_FIELD, FieldType::Datetime)
                    .required()
                    .describe("Last modification timestamp"),
            ],
            indexes: Vec::new(),
            description: description.into(),
        }
    }

    /// Add or replace a field.
    pub fn field(mut self, field: FieldDefinition) -> Self {
        match self.fields.iter_mut().find(|f| f.name == field.name) {
            Some(existing) => *existing = field,
            None => self.fields.push(field),
        }
        self
    }

    pub fn index(mut self, index: IndexDefinition) -> Self {
        if !self.indexes.contains(&index) {
            self.indexes.push(index);
        }
        self
    }

    /// Add the logical-delete fields (`is_deleted`, `deleted_at`, `deleted_by`).
    pub fn with_soft_delete(self) -> Self {
        self.field(
            FieldDefinition::new(IS_DELETED_FIELD, FieldType::Boolean)
                .default_value(false)
                .indexed(),
        )
        .field(FieldDefinition::new(DELETED_AT_FIELD, FieldType::Datetime))
        .field(FieldDefinition::new(DELETED_BY_FIELD, FieldType::String).max_length(64))
    }

    pub fn get_field(&self, name: &str) -> Option<&FieldDefinition> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.get_field(name).is_some()
    }

    pub fn supports_soft_delete(&self) -> bool {
        self.has_field(IS_DELETED_FIELD) && self.has_field(DELETED_AT_FIELD)
    }

    /// Unique fields other than `id`.
    pub fn unique_fields(&self) -> Vec<&str> {
        self.fields
            .iter()
            .filter(|f| f.unique && f.name != ID_FIELD)
            .map(|f| f.name.as_str())
            .collect()
    }

    /// Tables this schema references through foreign keys.
    pub fn referenced_tables(&self) -> Vec<&str> {
        let mut tables: Vec<&str> = Vec::new();
        for (table, _) in self.fields.iter().filter_map(|f| f.foreign_key_target()) {
            if table != self.name && !tables.contains(&table) {
                tables.push(table);
            }
        }
        tables
    }

    /// Declared indexes plus one single-field index per `indexed` field not
    /// already covered. Field-level `unique` constraints are left to the
    /// column definition.
    pub fn all_indexes(&self) -> Vec<IndexDefinition> {
        let mut indexes = self.indexes.clone();
        for field in self.fields.iter().filter(|f| f.indexed) {
            let covered = indexes
                .iter()
                .any(|idx| idx.fields.first().is_some_and(|first| first == &field.name));
            if !covered {
                indexes.push(IndexDefinition::new([field.name.clone()]));
            }
        }
        indexes
    }

    /// Fill in declared default values for absent fields.
    pub fn apply_defaults(&self, record: &mut Record) {
        for field in &self.fields {
            if let Some(default) = &field.default_value {
                record
                    .entry(field.name.clone())
                    .or_insert_with(|| default.clone());
            }
        }
    }

    /// Check a payload against the schema's constraints.
    ///
    /// Unknown fields, wrong value shapes, enum violations, over-long strings
    /// and (on create) missing required fields all produce
    /// [`DatabaseError::Validation`].
    pub fn validate_record(&self, record: &Record, mode: ValidationMode) -> Result<(), DatabaseError> {
        for (key, value) in record {
            let Some(field) = self.get_field(key) else {
                return Err(DatabaseError::validation(
                    &self.name,
                    format!("unknown field '{key}'"),
                ));
            };
            if field.required && value.is_null() {
                return Err(DatabaseError::validation(
                    &self.name,
                    format!("field '{key}' is required"),
                ));
            }
            field.check_value(&self.name, value)?;
        }

        if mode == ValidationMode::Create {
            let missing: Vec<&str> = self
                .fields
                .iter()
                .filter(|f| f.required && f.default_value.is_none())
                .filter(|f| !matches!(f.name.as_str(), ID_FIELD | CREATED_AT_FIELD | UPDATED_AT_FIELD))
                .filter(|f| !record.contains_key(&f.name))
                .map(|f| f.name.as_str())
                .collect();
            if !missing.is_empty() {
                return Err(DatabaseError::validation(
                    &self.name,
                    format!("missing required fields: {}", missing.join(", ")),
                ));
            }
        }
        Ok(())
    }

    /// Reject filters whose meaning depends on the provider.
    ///
    /// Pattern operators (`CONTAINS`, `STARTS_WITH`, `ENDS_WITH`) are only
    /// accepted on textual fields. Fields the schema does not declare are
    /// passed through.
    pub fn validate_filters(&self, filters: &[QueryFilter]) -> Result<(), DatabaseError> {
        for filter in filters {
            let Some(field) = self.get_field(&filter.field) else {
                continue;
            };
            if filter.operation.is_pattern() && !field.field_type.is_textual() {
                return Err(DatabaseError::validation(
                    &self.name,
                    format!(
                        "{} needs a text field, but '{}' is {}",
                        filter.operation,
                        field.name,
                        field.field_type.as_str()
                    ),
                ));
            }
        }
        Ok(())
    }

    /// Best-effort schema for an unregistered table, inferred from one
    /// stored record. Engines without a catalog use this for introspection.
    pub fn infer_from_sample(name: impl Into<String>, sample: &Record) -> Self {
        let mut schema = Self::new(name, "inferred from stored data");
        for (key, value) in sample {
            if schema.has_field(key) {
                continue;
            }
            let field_type = match value {
                Value::Bool(_) => FieldType::Boolean,
                Value::Number(n) if n.is_f64() => FieldType::Float,
                Value::Number(_) => FieldType::Integer,
                Value::String(s) if chrono::DateTime::parse_from_rfc3339(s).is_ok() => {
                    FieldType::Datetime
                }
                Value::Array(_) | Value::Object(_) => FieldType::Json,
                _ => FieldType::String,
            };
            schema = schema.field(FieldDefinition::new(key.clone(), field_type));
        }
        schema
    }
}

/// Ordered catalog of table schemas.
///
/// Registration order is preserved and used as the tie-breaker for
/// topological creation order.
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    tables: Vec<TableSchema>,
    positions: HashMap<String, usize>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a schema, replacing any previous schema with the same name
    /// (its position is kept).
    pub fn register(&mut self, schema: TableSchema) -> &mut Self {
        match self.positions.get(&schema.name) {
            Some(&pos) => self.tables[pos] = schema,
            None => {
                self.positions.insert(schema.name.clone(), self.tables.len());
                self.tables.push(schema);
            }
        }
        self
    }

    pub fn with(mut self, schema: TableSchema) -> Self {
        self.register(schema);
        self
    }

    pub fn get(&self, name: &str) -> Option<&TableSchema> {
        self.positions.get(name).map(|&pos| &self.tables[pos])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.positions.contains_key(name)
    }

    pub fn tables(&self) -> &[TableSchema] {
        &self.tables
    }

    pub fn table_names(&self) -> Vec<String> {
        self.tables.iter().map(|t| t.name.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// [`TableSchema::validate_filters`] for a registered table.
    ///
    /// Unregistered tables pass through.
    pub fn check_filters(&self, table: &str, filters: &[QueryFilter]) -> Result<(), DatabaseError> {
        match self.get(table) {
            Some(schema) => schema.validate_filters(filters),
            None => Ok(()),
        }
    }

    /// Apply defaults and validate a payload for a registered table.
    ///
    /// Unregistered tables pass through unchanged.
    pub fn prepare(
        &self,
        table: &str,
        record: &mut Record,
        mode: ValidationMode,
    ) -> Result<(), DatabaseError> {
        let Some(schema) = self.get(table) else {
            return Ok(());
        };
        if mode == ValidationMode::Create {
            schema.apply_defaults(record);
        }
        schema.validate_record(record, mode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::FilterOperation;
    use serde_json::json;

    fn users() -> TableSchema {
        TableSchema::new("users", "Accounts")
            .field(FieldDefinition::new("email", FieldType::Email).required().unique())
            .field(
                FieldDefinition::new("status", FieldType::Enum)
                    .enum_values(["active", "suspended"])
                    .default_value("active"),
            )
            .field(FieldDefinition::new("name", FieldType::String).max_length(5))
            .field(FieldDefinition::new("age", FieldType::Integer))
            .field(FieldDefinition::new("company_id", FieldType::String).references("companies.id"))
            .index(IndexDefinition::new(["company_id", "status"]))
    }

    fn record(value: Value) -> Record {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_index_names_are_deterministic() {
        assert_eq!(
            IndexDefinition::new(["company_id", "status"]).name("users"),
            "idx_users_company_id_status"
        );
        assert_eq!(IndexDefinition::unique(["email"]).name("users"), "uniq_users_email");
    }

    #[test]
    fn test_new_schema_has_mandatory_fields() {
        let schema = TableSchema::new("things", "");
        assert!(schema.has_field("id"));
        assert!(schema.get_field("id").unwrap().unique);
        assert!(schema.has_field("created_at"));
        assert!(schema.has_field("updated_at"));
        assert!(!schema.supports_soft_delete());
        assert!(schema.with_soft_delete().supports_soft_delete());
    }

    #[test]
    fn test_validate_create_requires_fields() {
        let err = users()
            .validate_record(&record(json!({"name": "Al"})), ValidationMode::Create)
            .unwrap_err();
        assert!(err.to_string().contains("email"));

        // Updates may omit required fields
        assert!(users()
            .validate_record(&record(json!({"name": "Al"})), ValidationMode::Update)
            .is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_shapes() {
        let schema = users();
        let cases = [
            json!({"email": "not-an-email"}),
            json!({"email": "a@b.co", "status": "deleted"}),
            json!({"email": "a@b.co", "name": "way too long"}),
            json!({"email": "a@b.co", "age": "ten"}),
            json!({"email": "a@b.co", "unknown": 1}),
            json!({"email": null}),
        ];
        for case in cases {
            assert!(
                schema.validate_record(&record(case.clone()), ValidationMode::Create).is_err(),
                "expected rejection for {case}"
            );
        }
    }

    #[test]
    fn test_registry_prepare_applies_defaults() {
        let registry = SchemaRegistry::new().with(users());
        let mut payload = record(json!({"email": "a@b.co"}));
        registry
            .prepare("users", &mut payload, ValidationMode::Create)
            .unwrap();
        assert_eq!(payload["status"], json!("active"));

        // Unregistered tables pass through untouched
        let mut other = record(json!({"anything": true}));
        registry
            .prepare("misc", &mut other, ValidationMode::Create)
            .unwrap();
        assert_eq!(other.len(), 1);
    }

    #[test]
    fn test_referenced_tables_and_all_indexes() {
        let schema = users();
        assert_eq!(schema.referenced_tables(), vec!["companies"]);

        let with_flag = schema.field(FieldDefinition::new("region", FieldType::String).indexed());
        let names: Vec<String> = with_flag
            .all_indexes()
            .iter()
            .map(|idx| idx.name("users"))
            .collect();
        assert!(names.contains(&"idx_users_company_id_status".to_string()));
        assert!(names.contains(&"idx_users_region".to_string()));
    }

    #[test]
    fn test_registry_preserves_order_on_replace() {
        let mut registry = SchemaRegistry::new();
        registry
            .register(TableSchema::new("a", ""))
            .register(TableSchema::new("b", ""))
            .register(TableSchema::new("a", "replaced"));
        assert_eq!(registry.table_names(), vec!["a", "b"]);
        assert_eq!(registry.get("a").unwrap().description, "replaced");
    }

    #[test]
    fn test_pattern_filters_need_text_fields() {
        let schema = users();
        assert!(schema
            .validate_filters(&[
                QueryFilter::contains("name", "Al"),
                QueryFilter::new("email", FilterOperation::EndsWith, "@b.co"),
                QueryFilter::new("age", FilterOperation::Gt, 3),
            ])
            .is_ok());

        let err = schema
            .validate_filters(&[QueryFilter::contains("age", "4")])
            .unwrap_err();
        assert!(matches!(err, DatabaseError::Validation { .. }));
        assert!(err.to_string().contains("age"));

        let created = TableSchema::new("things", "");
        assert!(created
            .validate_filters(&[QueryFilter::new("created_at", FilterOperation::StartsWith, "2024")])
            .is_err());

        // Undeclared fields and unregistered tables are left to the provider
        assert!(schema.validate_filters(&[QueryFilter::contains("nickname", "x")]).is_ok());
        let registry = SchemaRegistry::new().with(users());
        assert!(registry.check_filters("users", &[QueryFilter::contains("age", "4")]).is_err());
        assert!(registry.check_filters("misc", &[QueryFilter::contains("age", "4")]).is_ok());
    }
}
