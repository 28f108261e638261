//! SQL generation for the relational provider
//!
//! Identifiers are validated and double-quoted; values are always bound as
//! parameters. Filter values travel as text and are cast to the column type
//! declared in the schema registry, which lets one code path serve every
//! column type without per-type bind logic.

use crate::db::DatabaseError;
use crate::models::query::value_to_text;
use crate::models::record::{Record, ID_FIELD};
use crate::models::{
    FieldDefinition, FieldType, FilterOperation, IndexDefinition, QueryFilter, QueryOptions,
    TableSchema,
};
use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;

const IDENTIFIER_PATTERN: &str = r"^[A-Za-z_][A-Za-z0-9_]{0,62}$";

/// Reject anything that is not a plain SQL identifier.
pub(crate) fn check_identifier(table: &str, name: &str) -> Result<(), DatabaseError> {
    static IDENTIFIER_REGEX: OnceLock<Regex> = OnceLock::new();
    let identifier_regex = IDENTIFIER_REGEX.get_or_init(|| Regex::new(IDENTIFIER_PATTERN).unwrap());
    if identifier_regex.is_match(name) {
        Ok(())
    } else {
        Err(DatabaseError::validation(
            table,
            format!("'{name}' is not a valid identifier"),
        ))
    }
}

pub(crate) fn quote(name: &str) -> String {
    format!("\"{name}\"")
}

/// SQL statement plus its text parameters, numbered from `$1`.
#[derive(Debug, Default, PartialEq)]
pub(crate) struct Statement {
    pub sql: String,
    pub params: Vec<Option<String>>,
}

/// Column type used when binding filter values against `field`.
fn cast_for(field_type: FieldType) -> Option<&'static str> {
    match field_type {
        FieldType::Integer => Some("BIGINT"),
        FieldType::Float => Some("DOUBLE PRECISION"),
        FieldType::Boolean => Some("BOOLEAN"),
        FieldType::Datetime => Some("TIMESTAMPTZ"),
        FieldType::Json => Some("JSONB"),
        FieldType::Uuid => Some("UUID"),
        _ => None,
    }
}

struct WhereBuilder<'a> {
    schema: Option<&'a TableSchema>,
    params: Vec<Option<String>>,
}

impl<'a> WhereBuilder<'a> {
    fn placeholder(&mut self, value: &Value, cast: Option<&str>) -> String {
        self.params.push(value_to_text(value));
        match cast {
            Some(cast) => format!("${}::{}", self.params.len(), cast),
            None => format!("${}", self.params.len()),
        }
    }

    /// Left-hand column expression and the cast applied to its parameters.
    fn operand(&self, field: &str, sample: Option<&Value>) -> (String, Option<&'static str>) {
        let column = quote(field);
        match self.schema.and_then(|s| s.get_field(field)) {
            Some(definition) => (column, cast_for(definition.field_type)),
            None => match sample {
                Some(Value::Number(_)) => (column, Some("NUMERIC")),
                Some(Value::Bool(_)) => (column, Some("BOOLEAN")),
                _ => (format!("{column}::text"), None),
            },
        }
    }

    fn condition(&mut self, table: &str, filter: &QueryFilter) -> Result<String, DatabaseError> {
        check_identifier(table, &filter.field)?;
        let column = quote(&filter.field);

        let sql = match filter.operation {
            FilterOperation::Equals if filter.value.is_null() => format!("{column} IS NULL"),
            FilterOperation::NotEquals if filter.value.is_null() => format!("{column} IS NOT NULL"),
            FilterOperation::Equals
            | FilterOperation::NotEquals
            | FilterOperation::Gt
            | FilterOperation::Gte
            | FilterOperation::Lt
            | FilterOperation::Lte => {
                let (lhs, cast) = self.operand(&filter.field, Some(&filter.value));
                let operator = match filter.operation {
                    FilterOperation::Equals => "=",
                    FilterOperation::NotEquals => "IS DISTINCT FROM",
                    FilterOperation::Gt => ">",
                    FilterOperation::Gte => ">=",
                    FilterOperation::Lt => "<",
                    _ => "<=",
                };
                let rhs = self.placeholder(&filter.value, cast);
                format!("{lhs} {operator} {rhs}")
            }
            FilterOperation::In | FilterOperation::NotIn => {
                let values = filter.values();
                let negate = filter.operation == FilterOperation::NotIn;
                if values.is_empty() {
                    return Ok(if negate { "TRUE" } else { "FALSE" }.to_string());
                }
                let (lhs, cast) = self.operand(&filter.field, values.first());
                let items: Vec<String> = values
                    .iter()
                    .map(|value| self.placeholder(value, cast))
                    .collect();
                let array = format!("ARRAY[{}]", items.join(", "));
                if negate {
                    format!("({column} IS NULL OR {lhs} <> ALL({array}))")
                } else {
                    format!("{lhs} = ANY({array})")
                }
            }
            FilterOperation::Contains | FilterOperation::StartsWith | FilterOperation::EndsWith => {
                let escaped = escape_like(&filter.value_text());
                let pattern = match filter.operation {
                    FilterOperation::StartsWith => format!("{escaped}%"),
                    FilterOperation::EndsWith => format!("%{escaped}"),
                    _ => format!("%{escaped}%"),
                };
                let rhs = self.placeholder(&Value::String(pattern), None);
                format!("{column}::text ILIKE {rhs}")
            }
            FilterOperation::IsNull => format!("({column} IS NULL OR {column}::text = '')"),
            FilterOperation::IsNotNull => {
                format!("({column} IS NOT NULL AND {column}::text <> '')")
            }
        };
        Ok(sql)
    }
}

fn escape_like(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// ` WHERE a AND b` (empty when there are no filters).
pub(crate) fn where_clause(
    table: &str,
    schema: Option<&TableSchema>,
    filters: &[QueryFilter],
) -> Result<Statement, DatabaseError> {
    let mut builder = WhereBuilder {
        schema,
        params: Vec::new(),
    };
    let conditions = filters
        .iter()
        .map(|filter| builder.condition(table, filter))
        .collect::<Result<Vec<_>, _>>()?;
    let sql = if conditions.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", conditions.join(" AND "))
    };
    Ok(Statement {
        sql,
        params: builder.params,
    })
}

pub(crate) fn select(
    table: &str,
    schema: Option<&TableSchema>,
    filters: &[QueryFilter],
    options: &QueryOptions,
) -> Result<Statement, DatabaseError> {
    check_identifier(table, table)?;
    let clause = where_clause(table, schema, filters)?;
    let mut sql = format!("SELECT to_jsonb(r) FROM {} AS r{}", quote(table), clause.sql);
    if let Some(sort_by) = &options.sort_by {
        check_identifier(table, sort_by)?;
        let direction = if options.sort_desc { "DESC" } else { "ASC" };
        sql.push_str(&format!(" ORDER BY {} {}", quote(sort_by), direction));
    }
    if let Some(limit) = options.limit {
        sql.push_str(&format!(" LIMIT {limit}"));
    }
    if let Some(offset) = options.offset {
        sql.push_str(&format!(" OFFSET {offset}"));
    }
    Ok(Statement {
        sql,
        params: clause.params,
    })
}

pub(crate) fn count(
    table: &str,
    schema: Option<&TableSchema>,
    filters: &[QueryFilter],
) -> Result<Statement, DatabaseError> {
    check_identifier(table, table)?;
    let clause = where_clause(table, schema, filters)?;
    Ok(Statement {
        sql: format!("SELECT COUNT(*) FROM {}{}", quote(table), clause.sql),
        params: clause.params,
    })
}

fn column_list<'a>(
    table: &str,
    columns: impl IntoIterator<Item = &'a String>,
) -> Result<String, DatabaseError> {
    let quoted = columns
        .into_iter()
        .map(|c| check_identifier(table, c).map(|_| quote(c)))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(quoted.join(", "))
}

/// Insert of one JSON object bound as `$1`.
pub(crate) fn insert<'a>(
    table: &str,
    columns: impl IntoIterator<Item = &'a String>,
) -> Result<String, DatabaseError> {
    check_identifier(table, table)?;
    let columns = column_list(table, columns)?;
    Ok(format!(
        "INSERT INTO {t} AS r ({columns}) SELECT {columns} FROM jsonb_populate_record(NULL::{t}, $1) RETURNING to_jsonb(r)",
        t = quote(table)
    ))
}

/// Insert of a JSON array of objects bound as `$1`, in one statement.
pub(crate) fn insert_many<'a>(
    table: &str,
    columns: impl IntoIterator<Item = &'a String>,
) -> Result<String, DatabaseError> {
    check_identifier(table, table)?;
    let columns = column_list(table, columns)?;
    Ok(format!(
        "INSERT INTO {t} AS r ({columns}) SELECT {columns} FROM jsonb_populate_recordset(NULL::{t}, $1) RETURNING to_jsonb(r)",
        t = quote(table)
    ))
}

/// Split rows into consecutive runs sharing one key set, keeping their order.
pub(crate) fn runs_by_columns(rows: Vec<Record>) -> Vec<Vec<Record>> {
    let mut runs: Vec<Vec<Record>> = Vec::new();
    for row in rows {
        match runs.last_mut() {
            Some(run) if run[0].len() == row.len() && row.keys().all(|k| run[0].contains_key(k)) => {
                run.push(row)
            }
            _ => runs.push(vec![row]),
        }
    }
    runs
}

/// Partial update: changes bound as a JSON object in `$1`, id in `$2`.
pub(crate) fn update<'a>(
    table: &str,
    columns: impl IntoIterator<Item = &'a String>,
) -> Result<String, DatabaseError> {
    check_identifier(table, table)?;
    let assignments = columns
        .into_iter()
        .map(|c| check_identifier(table, c).map(|_| format!("{0} = p.{0}", quote(c))))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(format!(
        "UPDATE {t} AS r SET {assignments} FROM jsonb_populate_record(NULL::{t}, $1) AS p WHERE r.{id} = $2 RETURNING to_jsonb(r)",
        t = quote(table),
        assignments = assignments.join(", "),
        id = quote(ID_FIELD)
    ))
}

pub(crate) fn column_type(field: &FieldDefinition) -> String {
    match field.field_type {
        FieldType::String => format!("VARCHAR({})", field.max_length.unwrap_or(255)),
        FieldType::Text => "TEXT".to_string(),
        FieldType::Integer => "BIGINT".to_string(),
        FieldType::Float => "DOUBLE PRECISION".to_string(),
        FieldType::Boolean => "BOOLEAN".to_string(),
        FieldType::Datetime => "TIMESTAMPTZ".to_string(),
        FieldType::Json => "JSONB".to_string(),
        FieldType::Uuid => "UUID".to_string(),
        FieldType::Email => format!("VARCHAR({})", field.max_length.unwrap_or(255)),
        FieldType::Url => format!("VARCHAR({})", field.max_length.unwrap_or(2048)),
        FieldType::Enum => format!("VARCHAR({})", field.max_length.unwrap_or(50)),
    }
}

fn literal(value: &Value, field_type: FieldType) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Bool(b) => if *b { "TRUE" } else { "FALSE" }.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) if field_type != FieldType::Json => format!("'{}'", s.replace('\'', "''")),
        other => format!("'{}'::jsonb", other.to_string().replace('\'', "''")),
    }
}

fn column_definition(table: &str, field: &FieldDefinition) -> Result<String, DatabaseError> {
    check_identifier(table, &field.name)?;
    let mut sql = format!("{} {}", quote(&field.name), column_type(field));
    if field.name == ID_FIELD {
        sql.push_str(" PRIMARY KEY");
        return Ok(sql);
    }
    if field.required {
        sql.push_str(" NOT NULL");
    }
    if field.unique {
        sql.push_str(" UNIQUE");
    }
    if let Some(default) = &field.default_value {
        sql.push_str(" DEFAULT ");
        sql.push_str(&literal(default, field.field_type));
    }
    if let Some((target_table, target_field)) = field.foreign_key_target() {
        check_identifier(table, target_table)?;
        check_identifier(table, target_field)?;
        sql.push_str(&format!(
            " REFERENCES {}({})",
            quote(target_table),
            quote(target_field)
        ));
    }
    Ok(sql)
}

pub(crate) fn create_table(schema: &TableSchema) -> Result<String, DatabaseError> {
    check_identifier(&schema.name, &schema.name)?;
    let columns = schema
        .fields
        .iter()
        .map(|field| column_definition(&schema.name, field))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(format!(
        "CREATE TABLE IF NOT EXISTS {} (\n    {}\n)",
        quote(&schema.name),
        columns.join(",\n    ")
    ))
}

pub(crate) fn create_index(table: &str, index: &IndexDefinition) -> Result<(String, String), DatabaseError> {
    check_identifier(table, table)?;
    let name = index.name(table);
    check_identifier(table, &name)?;
    let columns = column_list(table, &index.fields)?;
    let unique = if index.unique { "UNIQUE " } else { "" };
    let sql = format!(
        "CREATE {unique}INDEX IF NOT EXISTS {} ON {} ({columns})",
        quote(&name),
        quote(table)
    );
    Ok((name, sql))
}

/// Map an `information_schema` data type back to a field type.
pub(crate) fn field_type_from_catalog(data_type: &str) -> FieldType {
    match data_type {
        "text" => FieldType::Text,
        "smallint" | "integer" | "bigint" => FieldType::Integer,
        "real" | "double precision" | "numeric" => FieldType::Float,
        "boolean" => FieldType::Boolean,
        "json" | "jsonb" => FieldType::Json,
        "uuid" => FieldType::Uuid,
        t if t.starts_with("timestamp") || t == "date" => FieldType::Datetime,
        _ => FieldType::String,
    }
}
