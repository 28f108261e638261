//! PostgREST query-string construction
//!
//! Operators map onto PostgREST's `column=op.value` syntax. Negative
//! operators also match NULL, which needs an `or=(...)` group; when several
//! groups are required they are folded into one `and=(or(...),or(...))`
//! parameter because PostgREST only honors a single `or` key.

use crate::models::query::value_to_text;
use crate::models::{FieldType, FilterOperation, QueryFilter, QueryOptions, TableSchema};
use serde_json::Value;

pub(crate) type QueryParams = Vec<(String, String)>;

/// Whether `""` is a storable value for the field, so null checks must
/// also treat it as empty. Unknown fields are assumed to be text.
fn holds_text(schema: Option<&TableSchema>, field: &str) -> bool {
    match schema.and_then(|s| s.get_field(field)) {
        Some(definition) => matches!(
            definition.field_type,
            FieldType::String | FieldType::Text | FieldType::Email | FieldType::Url | FieldType::Enum
        ),
        None => true,
    }
}

/// Quote a value for use inside `in.(...)` lists and `or=(...)` groups.
pub(crate) fn quote_value(text: &str) -> String {
    let reserved = text.is_empty()
        || text
            .chars()
            .any(|c| matches!(c, ',' | '.' | ':' | '(' | ')' | '"' | '\\') || c.is_whitespace());
    if reserved {
        format!("\"{}\"", text.replace('\\', "\\\\").replace('"', "\\\""))
    } else {
        text.to_string()
    }
}

fn scalar(value: &Value) -> String {
    value_to_text(value).unwrap_or_else(|| "null".to_string())
}

fn list(filter: &QueryFilter) -> String {
    let items: Vec<String> = filter
        .values()
        .iter()
        .map(|v| quote_value(&scalar(v)))
        .collect();
    format!("({})", items.join(","))
}

fn like_pattern(filter: &QueryFilter) -> String {
    let text = filter.value_text();
    match filter.operation {
        FilterOperation::StartsWith => format!("{text}*"),
        FilterOperation::EndsWith => format!("*{text}"),
        _ => format!("*{text}*"),
    }
}

/// Translate filters into query parameters.
pub(crate) fn filter_params(schema: Option<&TableSchema>, filters: &[QueryFilter]) -> QueryParams {
    let mut params = QueryParams::new();
    let mut groups: Vec<String> = Vec::new();

    for filter in filters {
        let field = filter.field.as_str();
        let mut direct = |op: String| params.push((field.to_string(), op));
        match filter.operation {
            FilterOperation::Equals if filter.value.is_null() => direct("is.null".to_string()),
            FilterOperation::NotEquals if filter.value.is_null() => direct("not.is.null".to_string()),
            FilterOperation::Equals => direct(format!("eq.{}", scalar(&filter.value))),
            FilterOperation::NotEquals => groups.push(format!(
                "{field}.neq.{},{field}.is.null",
                quote_value(&scalar(&filter.value))
            )),
            FilterOperation::Gt => direct(format!("gt.{}", scalar(&filter.value))),
            FilterOperation::Gte => direct(format!("gte.{}", scalar(&filter.value))),
            FilterOperation::Lt => direct(format!("lt.{}", scalar(&filter.value))),
            FilterOperation::Lte => direct(format!("lte.{}", scalar(&filter.value))),
            FilterOperation::In => direct(format!("in.{}", list(filter))),
            FilterOperation::NotIn => {
                if !filter.values().is_empty() {
                    groups.push(format!("{field}.not.in.{},{field}.is.null", list(filter)));
                }
            }
            FilterOperation::Contains | FilterOperation::StartsWith | FilterOperation::EndsWith => {
                direct(format!("ilike.{}", like_pattern(filter)))
            }
            FilterOperation::IsNull => {
                if holds_text(schema, field) {
                    groups.push(format!("{field}.is.null,{field}.eq.\"\""));
                } else {
                    direct("is.null".to_string());
                }
            }
            FilterOperation::IsNotNull => {
                direct("not.is.null".to_string());
                if holds_text(schema, field) {
                    direct("neq.\"\"".to_string());
                }
            }
        }
    }

    match groups.len() {
        0 => {}
        1 => params.push(("or".to_string(), format!("({})", groups[0]))),
        _ => {
            let folded: Vec<String> = groups.iter().map(|g| format!("or({g})")).collect();
            params.push(("and".to_string(), format!("({})", folded.join(","))));
        }
    }
    params
}

/// Filters plus `select`, `order`, `limit` and `offset`.
pub(crate) fn select_params(
    schema: Option<&TableSchema>,
    filters: &[QueryFilter],
    options: &QueryOptions,
) -> QueryParams {
    let mut params = vec![("select".to_string(), "*".to_string())];
    params.extend(filter_params(schema, filters));
    if let Some(sort_by) = &options.sort_by {
        let direction = if options.sort_desc { "desc" } else { "asc" };
        params.push(("order".to_string(), format!("{sort_by}.{direction}")));
    }
    if let Some(limit) = options.limit {
        params.push(("limit".to_string(), limit.to_string()));
    }
    if let Some(offset) = options.offset {
        params.push(("offset".to_string(), offset.to_string()));
    }
    params
}

/// `id=eq.<id>` selector for single-record endpoints.
pub(crate) fn id_params(id: &str) -> QueryParams {
    vec![("id".to_string(), format!("eq.{id}"))]
}

/// Total from a `Content-Range` header such as `0-24/3573` or `*/0`.
pub(crate) fn parse_content_range(header: &str) -> Option<u64> {
    header.rsplit_once('/')?.1.trim().parse().ok()
}
