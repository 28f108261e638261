//! A small PostgREST look-alike for exercising `RestStore` over real HTTP.
//!
//! Supports the subset of the query grammar the REST provider emits:
//! `eq/neq/gt/gte/lt/lte/in/is/ilike`, `not.` prefixes, `or=(...)` and
//! `and=(or(...),...)` groups, `order`, `limit`, `offset`, plus
//! `Content-Range` totals. Unknown tables answer 404.

use axum::{
    extract::{Path, RawQuery, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use omnistore_core::models::Record;
use serde_json::{json, Value};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

#[derive(Debug, Default)]
struct GatewayState {
    tables: BTreeMap<String, Vec<Record>>,
    unique: BTreeMap<String, Vec<String>>,
    requests: Vec<String>,
}

type Shared = Arc<Mutex<GatewayState>>;

/// Handle to a running fake gateway.
pub struct FakeGateway {
    pub url: String,
    state: Shared,
}

impl FakeGateway {
    /// Serve the given tables on an ephemeral local port.
    pub async fn start(tables: &[&str]) -> Self {
        let mut state = GatewayState::default();
        for table in tables {
            state.tables.insert(table.to_string(), Vec::new());
            state.unique.insert(table.to_string(), vec!["id".to_string()]);
        }
        let state: Shared = Arc::new(Mutex::new(state));

        let app = Router::new()
            .route("/rest/v1/", get(root))
            .route(
                "/rest/v1/:table",
                get(select).post(insert).patch(update).delete(remove),
            )
            .with_state(Arc::clone(&state));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind fake gateway");
        let addr = listener.local_addr().expect("local addr");
        tokio::spawn(async move {
            axum::serve(listener, app).await.expect("fake gateway crashed");
        });

        Self {
            url: format!("http://{addr}"),
            state,
        }
    }

    /// Enforce uniqueness of `field` in `table` (409 / 23505 on conflict).
    pub fn unique(&self, table: &str, field: &str) {
        self.state
            .lock()
            .unwrap()
            .unique
            .entry(table.to_string())
            .or_default()
            .push(field.to_string());
    }

    pub fn rows(&self, table: &str) -> Vec<Record> {
        self.state
            .lock()
            .unwrap()
            .tables
            .get(table)
            .cloned()
            .unwrap_or_default()
    }

    /// `METHOD table?query` for every table request received.
    pub fn requests(&self) -> Vec<String> {
        self.state.lock().unwrap().requests.clone()
    }
}

// ============================================================================
// Handlers
// ============================================================================

fn authorized(headers: &HeaderMap) -> bool {
    headers.contains_key("apikey")
        && headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .map_or(false, |v| v.starts_with("Bearer "))
}

fn gateway_error(status: StatusCode, code: &str, message: &str) -> Response {
    (status, Json(json!({ "code": code, "message": message }))).into_response()
}

fn unauthorized() -> Response {
    gateway_error(StatusCode::UNAUTHORIZED, "PGRST301", "missing credentials")
}

fn unknown_table(table: &str) -> Response {
    gateway_error(
        StatusCode::NOT_FOUND,
        "42P01",
        &format!("relation \"public.{table}\" does not exist"),
    )
}

async fn root(headers: HeaderMap) -> Response {
    if !authorized(&headers) {
        return unauthorized();
    }
    Json(json!({ "swagger": "2.0" })).into_response()
}

async fn select(
    State(state): State<Shared>,
    Path(table): Path<String>,
    headers: HeaderMap,
    RawQuery(query): RawQuery,
) -> Response {
    if !authorized(&headers) {
        return unauthorized();
    }
    let query = Query::parse(query.as_deref().unwrap_or(""));
    let mut state = state.lock().unwrap();
    state.requests.push(format!("GET {table}?{}", query.raw));
    let Some(rows) = state.tables.get(&table) else {
        return unknown_table(&table);
    };

    let mut matched: Vec<Record> = rows.iter().filter(|r| query.matches(r)).cloned().collect();
    let total = matched.len();
    if let Some((field, descending)) = &query.order {
        matched.sort_by(|a, b| {
            let ordering = compare_values(a.get(field), b.get(field));
            if *descending {
                ordering.reverse()
            } else {
                ordering
            }
        });
    }
    let page: Vec<Record> = matched
        .into_iter()
        .skip(query.offset)
        .take(query.limit.unwrap_or(usize::MAX))
        .collect();

    let range = if page.is_empty() {
        format!("*/{total}")
    } else {
        format!("{}-{}/{total}", query.offset, query.offset + page.len() - 1)
    };
    (StatusCode::OK, [(header::CONTENT_RANGE, range)], Json(page)).into_response()
}

async fn insert(
    State(state): State<Shared>,
    Path(table): Path<String>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    if !authorized(&headers) {
        return unauthorized();
    }
    let mut state = state.lock().unwrap();
    state.requests.push(format!("POST {table}"));
    if !state.tables.contains_key(&table) {
        return unknown_table(&table);
    }

    let incoming: Vec<Record> = match body {
        Value::Array(items) => items.into_iter().filter_map(|v| v.as_object().cloned()).collect(),
        Value::Object(map) => vec![map],
        _ => return gateway_error(StatusCode::BAD_REQUEST, "PGRST102", "invalid body"),
    };

    let unique = state.unique.get(&table).cloned().unwrap_or_default();
    let rows = state.tables.get_mut(&table).expect("checked above");
    let mut staged = rows.clone();
    for row in &incoming {
        for field in &unique {
            let Some(value) = row.get(field).filter(|v| !v.is_null()) else {
                continue;
            };
            if staged.iter().any(|r| r.get(field) == Some(value)) {
                return gateway_error(
                    StatusCode::CONFLICT,
                    "23505",
                    &format!("duplicate key value violates unique constraint \"{table}_{field}_key\""),
                );
            }
        }
        staged.push(row.clone());
    }
    *rows = staged;
    (StatusCode::CREATED, Json(incoming)).into_response()
}

async fn update(
    State(state): State<Shared>,
    Path(table): Path<String>,
    headers: HeaderMap,
    RawQuery(query): RawQuery,
    Json(body): Json<Value>,
) -> Response {
    if !authorized(&headers) {
        return unauthorized();
    }
    let query = Query::parse(query.as_deref().unwrap_or(""));
    let mut state = state.lock().unwrap();
    state.requests.push(format!("PATCH {table}?{}", query.raw));
    let Some(rows) = state.tables.get_mut(&table) else {
        return unknown_table(&table);
    };
    let Some(changes) = body.as_object() else {
        return gateway_error(StatusCode::BAD_REQUEST, "PGRST102", "invalid body");
    };

    let mut updated = Vec::new();
    for row in rows.iter_mut().filter(|r| query.matches(r)) {
        row.extend(changes.clone());
        updated.push(row.clone());
    }
    Json(updated).into_response()
}

async fn remove(
    State(state): State<Shared>,
    Path(table): Path<String>,
    headers: HeaderMap,
    RawQuery(query): RawQuery,
) -> Response {
    if !authorized(&headers) {
        return unauthorized();
    }
    let query = Query::parse(query.as_deref().unwrap_or(""));
    let mut state = state.lock().unwrap();
    state.requests.push(format!("DELETE {table}?{}", query.raw));
    let Some(rows) = state.tables.get_mut(&table) else {
        return unknown_table(&table);
    };
    let (removed, kept): (Vec<Record>, Vec<Record>) =
        rows.drain(..).partition(|r| query.matches(r));
    *rows = kept;
    Json(removed).into_response()
}

// ============================================================================
// Query grammar
// ============================================================================

#[derive(Debug)]
enum Condition {
    Field { field: String, expr: String },
    Or(Vec<Condition>),
    And(Vec<Condition>),
}

#[derive(Debug, Default)]
struct Query {
    raw: String,
    conditions: Vec<Condition>,
    order: Option<(String, bool)>,
    limit: Option<usize>,
    offset: usize,
}

impl Query {
    fn parse(raw: &str) -> Self {
        let mut query = Query {
            raw: raw.to_string(),
            ..Query::default()
        };
        for (key, value) in url::form_urlencoded::parse(raw.as_bytes()) {
            match key.as_ref() {
                "select" | "columns" => {}
                "order" => {
                    let (field, direction) = value.split_once('.').unwrap_or((value.as_ref(), "asc"));
                    query.order = Some((field.to_string(), direction == "desc"));
                }
                "limit" => query.limit = value.parse().ok(),
                "offset" => query.offset = value.parse().unwrap_or(0),
                "or" => query.conditions.push(Condition::Or(parse_group(&value))),
                "and" => query.conditions.push(Condition::And(parse_group(&value))),
                field => query.conditions.push(Condition::Field {
                    field: field.to_string(),
                    expr: value.to_string(),
                }),
            }
        }
        query
    }

    fn matches(&self, row: &Record) -> bool {
        self.conditions.iter().all(|c| evaluate(c, row))
    }
}

/// Split on commas that are outside parentheses and quotes.
fn split_top(text: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut depth = 0usize;
    let mut quoted = false;
    let mut escaped = false;
    for c in text.chars() {
        if escaped {
            current.push(c);
            escaped = false;
            continue;
        }
        match c {
            '\\' if quoted => {
                current.push(c);
                escaped = true;
            }
            '"' => {
                quoted = !quoted;
                current.push(c);
            }
            '(' if !quoted => {
                depth += 1;
                current.push(c);
            }
            ')' if !quoted => {
                depth = depth.saturating_sub(1);
                current.push(c);
            }
            ',' if !quoted && depth == 0 => parts.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    if !current.is_empty() || !parts.is_empty() {
        parts.push(current);
    }
    parts
}

fn strip_parens(text: &str) -> &str {
    text.strip_prefix('(')
        .and_then(|t| t.strip_suffix(')'))
        .unwrap_or(text)
}

fn parse_group(text: &str) -> Vec<Condition> {
    split_top(strip_parens(text))
        .into_iter()
        .map(|item| {
            if let Some(inner) = item.strip_prefix("or(") {
                Condition::Or(parse_group(&format!("({inner}")))
            } else if let Some(inner) = item.strip_prefix("and(") {
                Condition::And(parse_group(&format!("({inner}")))
            } else {
                let (field, expr) = item.split_once('.').unwrap_or((item.as_str(), ""));
                Condition::Field {
                    field: field.to_string(),
                    expr: expr.to_string(),
                }
            }
        })
        .collect()
}

fn unquote(text: &str) -> String {
    match text.strip_prefix('"').and_then(|t| t.strip_suffix('"')) {
        Some(inner) => inner.replace("\\\"", "\"").replace("\\\\", "\\"),
        None => text.to_string(),
    }
}

fn as_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

fn compare_text(actual: &Value, expected: &str) -> Option<Ordering> {
    match actual {
        Value::Null => None,
        Value::Number(n) => {
            let expected: f64 = expected.parse().ok()?;
            n.as_f64()?.partial_cmp(&expected)
        }
        other => Some(as_text(other)?.as_str().cmp(expected)),
    }
}

fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (Some(Value::Number(x)), Some(Value::Number(y))) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Some(x), Some(y)) => as_text(x).cmp(&as_text(y)),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

fn glob_matches(text: &str, pattern: &str) -> bool {
    let text = text.to_lowercase();
    let pattern = pattern.to_lowercase();
    let pieces: Vec<&str> = pattern.split('*').collect();
    let mut position = 0;
    for (i, piece) in pieces.iter().enumerate() {
        if piece.is_empty() {
            continue;
        }
        if i == 0 {
            if !text.starts_with(piece) {
                return false;
            }
            position = piece.len();
        } else if i == pieces.len() - 1 {
            return text.len() >= position + piece.len() && text[position..].ends_with(piece);
        } else {
            match text[position..].find(piece) {
                Some(found) => position += found + piece.len(),
                None => return false,
            }
        }
    }
    pieces.len() > 1 || text == pattern
}

fn evaluate(condition: &Condition, row: &Record) -> bool {
    match condition {
        Condition::Or(items) => items.iter().any(|c| evaluate(c, row)),
        Condition::And(items) => items.iter().all(|c| evaluate(c, row)),
        Condition::Field { field, expr } => {
            let actual = row.get(field).cloned().unwrap_or(Value::Null);
            match expr.strip_prefix("not.") {
                Some(inner) => {
                    // SQL semantics: NOT on a NULL comparison is still not true
                    if actual.is_null() && !inner.starts_with("is.") {
                        false
                    } else {
                        !evaluate_expr(&actual, inner)
                    }
                }
                None => evaluate_expr(&actual, expr),
            }
        }
    }
}

fn evaluate_expr(actual: &Value, expr: &str) -> bool {
    let (op, operand) = expr.split_once('.').unwrap_or((expr, ""));
    let list = || -> Vec<String> {
        split_top(strip_parens(operand))
            .iter()
            .map(|item| unquote(item))
            .collect()
    };
    let ordering = || compare_text(actual, &unquote(operand));
    match op {
        "is" => match operand {
            "null" => actual.is_null(),
            "true" => actual == &Value::Bool(true),
            "false" => actual == &Value::Bool(false),
            _ => false,
        },
        "eq" => ordering() == Some(Ordering::Equal),
        "neq" => matches!(ordering(), Some(o) if o != Ordering::Equal),
        "gt" => ordering() == Some(Ordering::Greater),
        "gte" => matches!(ordering(), Some(Ordering::Greater | Ordering::Equal)),
        "lt" => ordering() == Some(Ordering::Less),
        "lte" => matches!(ordering(), Some(Ordering::Less | Ordering::Equal)),
        "in" => list()
            .iter()
            .any(|item| compare_text(actual, item) == Some(Ordering::Equal)),
        "ilike" | "like" => as_text(actual).map_or(false, |t| glob_matches(&t, &unquote(operand))),
        _ => false,
    }
}
