//! Generic persisted records
//!
//! Records are plain JSON objects keyed by the field names declared in their
//! table schema. The helpers here implement the lifecycle rules shared by all
//! providers: generated ids and timestamps on insert, `updated_at` refresh on
//! every update, and the soft-delete field set.

use chrono::{SecondsFormat, Utc};
use serde_json::{Map, Value};

/// A generic persisted entity.
pub type Record = Map<String, Value>;

pub const ID_FIELD: &str = "id";
pub const CREATED_AT_FIELD: &str = "created_at";
pub const UPDATED_AT_FIELD: &str = "updated_at";
pub const IS_DELETED_FIELD: &str = "is_deleted";
pub const DELETED_AT_FIELD: &str = "deleted_at";
pub const DELETED_BY_FIELD: &str = "deleted_by";

/// Current UTC time as an RFC 3339 string with microsecond precision.
pub fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Fresh random identifier (UUID v4).
pub fn generate_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// The record's `id` as a string, if present and non-empty.
pub fn record_id(record: &Record) -> Option<String> {
    match record.get(ID_FIELD) {
        Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    }
}

fn is_blank(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.is_empty(),
        _ => false,
    }
}

/// Fill in `id`, `created_at` and `updated_at` when the caller did not supply them.
///
/// `id_generator` lets providers with native identifiers choose the id format.
pub fn prepare_for_insert_with(mut record: Record, id_generator: impl FnOnce() -> String) -> Record {
    if is_blank(record.get(ID_FIELD)) {
        record.insert(ID_FIELD.to_string(), Value::String(id_generator()));
    }
    let now = now_timestamp();
    if is_blank(record.get(CREATED_AT_FIELD)) {
        record.insert(CREATED_AT_FIELD.to_string(), Value::String(now.clone()));
    }
    if is_blank(record.get(UPDATED_AT_FIELD)) {
        record.insert(UPDATED_AT_FIELD.to_string(), Value::String(now));
    }
    record
}

/// [`prepare_for_insert_with`] using UUID v4 ids.
pub fn prepare_for_insert(record: Record) -> Record {
    prepare_for_insert_with(record, generate_id)
}

/// Refresh `updated_at`.
pub fn touch(record: &mut Record) {
    record.insert(UPDATED_AT_FIELD.to_string(), Value::String(now_timestamp()));
}

/// Prepare a partial update: strip immutable fields and refresh `updated_at`.
pub fn prepare_for_update(mut changes: Record) -> Record {
    changes.remove(ID_FIELD);
    changes.remove(CREATED_AT_FIELD);
    touch(&mut changes);
    changes
}

/// Field set applied by a logical (soft) delete.
pub fn soft_delete_changes(deleted_by: Option<&str>) -> Record {
    let mut changes = Record::new();
    changes.insert(IS_DELETED_FIELD.to_string(), Value::Bool(true));
    changes.insert(DELETED_AT_FIELD.to_string(), Value::String(now_timestamp()));
    changes.insert(
        DELETED_BY_FIELD.to_string(),
        deleted_by.map_or(Value::Null, |who| Value::String(who.to_string())),
    );
    changes
}

/// Build a record from a JSON value, rejecting non-objects.
pub fn record_from_value(value: Value) -> Option<Record> {
    match value {
        Value::Object(map) => Some(map),
        _ => None,
    }
}
