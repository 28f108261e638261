//! BSON mapping and filter compilation for the document provider
//!
//! Records travel as JSON objects with an `id` field; documents store the
//! identifier in `_id`. Ids that parse as an `ObjectId` are stored natively,
//! anything else (caller-supplied UUIDs, natural keys) is stored as a string.

use crate::db::DatabaseError;
use crate::models::record::{Record, ID_FIELD};
use crate::models::{FilterOperation, QueryFilter, QueryOptions};
use bson::oid::ObjectId;
use bson::{doc, Bson, Document};
use mongodb::error::{Error as MongoError, ErrorKind, WriteFailure};
use serde_json::Value;

pub(crate) const NATIVE_ID: &str = "_id";

const DUPLICATE_KEY: i32 = 11000;
const DOCUMENT_VALIDATION_FAILURE: i32 = 121;
const NAMESPACE_NOT_FOUND: i32 = 26;
const INDEX_NOT_FOUND: i32 = 27;

/// Fresh native identifier in hex form.
pub(crate) fn generate_object_id() -> String {
    ObjectId::new().to_hex()
}

pub(crate) fn id_to_bson(id: &str) -> Bson {
    match ObjectId::parse_str(id) {
        Ok(oid) => Bson::ObjectId(oid),
        Err(_) => Bson::String(id.to_string()),
    }
}

fn bson_to_id(value: Bson) -> Value {
    match value {
        Bson::ObjectId(oid) => Value::String(oid.to_hex()),
        Bson::String(s) => Value::String(s),
        other => other.into_relaxed_extjson(),
    }
}

pub(crate) fn id_filter(id: &str) -> Document {
    doc! { NATIVE_ID: id_to_bson(id) }
}

fn native_field(field: &str) -> &str {
    if field == ID_FIELD {
        NATIVE_ID
    } else {
        field
    }
}

fn json_to_bson(table: &str, value: &Value) -> Result<Bson, DatabaseError> {
    bson::to_bson(value).map_err(|e| DatabaseError::validation(table, e.to_string()))
}

/// Convert a record into a document, moving `id` to `_id`.
pub(crate) fn record_to_document(table: &str, mut record: Record) -> Result<Document, DatabaseError> {
    let mut document = Document::new();
    if let Some(id) = record.remove(ID_FIELD) {
        let native = match &id {
            Value::String(s) => id_to_bson(s),
            other => json_to_bson(table, other)?,
        };
        document.insert(NATIVE_ID, native);
    }
    for (key, value) in &record {
        document.insert(key.clone(), json_to_bson(table, value)?);
    }
    Ok(document)
}

/// Convert a stored document back into a record, moving `_id` to `id`.
pub(crate) fn document_to_record(document: Document) -> Record {
    let mut record = Record::new();
    for (key, value) in document {
        if key == NATIVE_ID {
            record.insert(ID_FIELD.to_string(), bson_to_id(value));
        } else {
            record.insert(key, value.into_relaxed_extjson());
        }
    }
    record
}

fn filter_value(table: &str, field: &str, value: &Value) -> Result<Bson, DatabaseError> {
    match value {
        Value::String(s) if field == ID_FIELD => Ok(id_to_bson(s)),
        other => json_to_bson(table, other),
    }
}

fn pattern(filter: &QueryFilter) -> String {
    let escaped = regex::escape(&filter.value_text());
    match filter.operation {
        FilterOperation::StartsWith => format!("^{escaped}"),
        FilterOperation::EndsWith => format!("{escaped}$"),
        _ => escaped,
    }
}

fn compile_one(table: &str, filter: &QueryFilter) -> Result<Document, DatabaseError> {
    let field = native_field(&filter.field);
    let list = || -> Result<Vec<Bson>, DatabaseError> {
        filter
            .values()
            .iter()
            .map(|v| filter_value(table, &filter.field, v))
            .collect()
    };
    let scalar = || filter_value(table, &filter.field, &filter.value);

    let clause = match filter.operation {
        FilterOperation::Equals => doc! { field: scalar()? },
        FilterOperation::NotEquals => doc! { field: { "$ne": scalar()? } },
        FilterOperation::Gt => doc! { field: { "$gt": scalar()? } },
        FilterOperation::Gte => doc! { field: { "$gte": scalar()? } },
        FilterOperation::Lt => doc! { field: { "$lt": scalar()? } },
        FilterOperation::Lte => doc! { field: { "$lte": scalar()? } },
        FilterOperation::In => doc! { field: { "$in": list()? } },
        FilterOperation::NotIn => doc! { field: { "$nin": list()? } },
        FilterOperation::Contains | FilterOperation::StartsWith | FilterOperation::EndsWith => {
            doc! { field: { "$regex": pattern(filter), "$options": "i" } }
        }
        FilterOperation::IsNull => doc! { field: { "$in": [Bson::Null, ""] } },
        FilterOperation::IsNotNull => doc! { field: { "$nin": [Bson::Null, ""] } },
    };
    Ok(clause)
}

/// AND-combine filters into a single query document.
pub(crate) fn compile_filters(table: &str, filters: &[QueryFilter]) -> Result<Document, DatabaseError> {
    let mut clauses = filters
        .iter()
        .map(|f| compile_one(table, f))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(match clauses.len() {
        0 => Document::new(),
        1 => clauses.remove(0),
        _ => doc! { "$and": clauses },
    })
}

pub(crate) fn sort_document(options: &QueryOptions) -> Option<Document> {
    options.sort_by.as_deref().map(|field| {
        let direction = if options.sort_desc { -1 } else { 1 };
        doc! { native_field(field): direction }
    })
}

pub(crate) fn index_keys(fields: &[String]) -> Document {
    let mut keys = Document::new();
    for field in fields {
        keys.insert(native_field(field), 1);
    }
    keys
}

/// Server error code carried by a driver error, if any.
pub(crate) fn error_code(err: &MongoError) -> Option<i32> {
    match err.kind.as_ref() {
        ErrorKind::Command(command) => Some(command.code),
        ErrorKind::Write(WriteFailure::WriteError(write)) => Some(write.code),
        ErrorKind::InsertMany(insert) => insert
            .write_errors
            .as_ref()
            .and_then(|errors| errors.first())
            .map(|e| e.code),
        _ => None,
    }
}

/// Indexes of the documents rejected by an unordered `insert_many`.
pub(crate) fn failed_insert_indexes(err: &MongoError) -> Option<Vec<usize>> {
    match err.kind.as_ref() {
        ErrorKind::InsertMany(insert) if insert.write_concern_error.is_none() => Some(
            insert
                .write_errors
                .as_ref()
                .map(|errors| errors.iter().map(|e| e.index).collect())
                .unwrap_or_default(),
        ),
        _ => None,
    }
}

/// Map a driver error onto the shared taxonomy.
pub(crate) fn translate_error(table: &str, err: MongoError) -> DatabaseError {
    match error_code(&err) {
        Some(DUPLICATE_KEY) => return DatabaseError::duplicate(table, err.to_string()),
        Some(DOCUMENT_VALIDATION_FAILURE) => return DatabaseError::validation(table, err.to_string()),
        Some(NAMESPACE_NOT_FOUND) => return DatabaseError::table_not_found(table),
        Some(INDEX_NOT_FOUND) => return DatabaseError::not_found(table, err.to_string()),
        _ => {}
    }
    match err.kind.as_ref() {
        ErrorKind::BsonSerialization(_)
        | ErrorKind::BsonDeserialization(_)
        | ErrorKind::InvalidArgument { .. } => DatabaseError::validation(table, err.to_string()),
        _ => DatabaseError::connection("document", err.to_string()),
    }
}
