//! Filter Algebra
//!
//! Provider-neutral predicate and query-shaping vocabulary. Every provider
//! compiles the same [`QueryFilter`] list into its native query language and
//! must give each operator identical semantics:
//!
//! - `CONTAINS` / `STARTS_WITH` / `ENDS_WITH` are case-insensitive substring matches
//! - `IS_NULL` matches null, missing, **and** empty-string values
//! - `IN` / `NOT_IN` accept a scalar or a list (see [`QueryFilter::values`])
//! - `NOT_EQUALS` and `NOT_IN` also match null/missing values, so an operator
//!   and its [`FilterOperation::complement`] always partition a dataset
//!
//! Filters in one list combine with implicit AND.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// The 13 comparison operators understood by every provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FilterOperation {
    Equals,
    NotEquals,
    Gt,
    Gte,
    Lt,
    Lte,
    In,
    NotIn,
    Contains,
    StartsWith,
    EndsWith,
    IsNull,
    IsNotNull,
}

impl FilterOperation {
    /// All operators, in declaration order.
    pub const ALL: [FilterOperation; 13] = [
        FilterOperation::Equals,
        FilterOperation::NotEquals,
        FilterOperation::Gt,
        FilterOperation::Gte,
        FilterOperation::Lt,
        FilterOperation::Lte,
        FilterOperation::In,
        FilterOperation::NotIn,
        FilterOperation::Contains,
        FilterOperation::StartsWith,
        FilterOperation::EndsWith,
        FilterOperation::IsNull,
        FilterOperation::IsNotNull,
    ];

    /// Logical complement of the operator, if it has one.
    ///
    /// Ordering operators only partition the non-null part of a dataset.
    /// The pattern operators have no complement in the algebra.
    pub fn complement(self) -> Option<FilterOperation> {
        use FilterOperation::*;
        match self {
            Equals => Some(NotEquals),
            NotEquals => Some(Equals),
            Gt => Some(Lte),
            Lte => Some(Gt),
            Gte => Some(Lt),
            Lt => Some(Gte),
            In => Some(NotIn),
            NotIn => Some(In),
            IsNull => Some(IsNotNull),
            IsNotNull => Some(IsNull),
            Contains | StartsWith | EndsWith => None,
        }
    }

    /// True for operators that ignore the filter value.
    pub fn is_unary(self) -> bool {
        matches!(self, FilterOperation::IsNull | FilterOperation::IsNotNull)
    }

    /// True for the case-insensitive pattern operators.
    pub fn is_pattern(self) -> bool {
        matches!(
            self,
            FilterOperation::Contains | FilterOperation::StartsWith | FilterOperation::EndsWith
        )
    }

    pub fn as_str(self) -> &'static str {
        use FilterOperation::*;
        match self {
            Equals => "EQUALS",
            NotEquals => "NOT_EQUALS",
            Gt => "GT",
            Gte => "GTE",
            Lt => "LT",
            Lte => "LTE",
            In => "IN",
            NotIn => "NOT_IN",
            Contains => "CONTAINS",
            StartsWith => "STARTS_WITH",
            EndsWith => "ENDS_WITH",
            IsNull => "IS_NULL",
            IsNotNull => "IS_NOT_NULL",
        }
    }
}

impl fmt::Display for FilterOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single predicate: `field <operation> value`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryFilter {
    pub field: String,
    pub operation: FilterOperation,
    #[serde(default)]
    pub value: Value,
}

impl QueryFilter {
    pub fn new(field: impl Into<String>, operation: FilterOperation, value: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            operation,
            value: value.into(),
        }
    }

    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(field, FilterOperation::Equals, value)
    }

    pub fn ne(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(field, FilterOperation::NotEquals, value)
    }

    pub fn is_in(field: impl Into<String>, values: impl Into<Value>) -> Self {
        Self::new(field, FilterOperation::In, values)
    }

    pub fn contains(field: impl Into<String>, needle: impl Into<String>) -> Self {
        Self::new(field, FilterOperation::Contains, Value::String(needle.into()))
    }

    pub fn is_null(field: impl Into<String>) -> Self {
        Self::new(field, FilterOperation::IsNull, Value::Null)
    }

    pub fn is_not_null(field: impl Into<String>) -> Self {
        Self::new(field, FilterOperation::IsNotNull, Value::Null)
    }

    /// The same filter with the complementary operator.
    pub fn negated(&self) -> Option<QueryFilter> {
        self.operation.complement().map(|operation| QueryFilter {
            field: self.field.clone(),
            operation,
            value: self.value.clone(),
        })
    }

    /// Filter value normalized to a list (scalars become one-element lists).
    pub fn values(&self) -> Vec<Value> {
        match &self.value {
            Value::Array(items) => items.clone(),
            Value::Null => Vec::new(),
            other => vec![other.clone()],
        }
    }

    /// Filter value rendered as text, used for pattern operators.
    pub fn value_text(&self) -> String {
        value_to_text(&self.value).unwrap_or_default()
    }
}

/// Render a scalar JSON value as plain text (`None` for null).
///
/// Strings are returned without quotes; arrays and objects use their JSON form.
pub fn value_to_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        other => Some(other.to_string()),
    }
}

/// Query shaping: pagination, ordering, and filters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryOptions {
    pub limit: Option<u64>,
    pub offset: Option<u64>,
    pub sort_by: Option<String>,
    pub sort_desc: bool,
    pub filters: Vec<QueryFilter>,
    pub include_related: Vec<String>,
}

impl QueryOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn sorted_by(mut self, field: impl Into<String>, descending: bool) -> Self {
        self.sort_by = Some(field.into());
        self.sort_desc = descending;
        self
    }

    pub fn with_filter(mut self, filter: QueryFilter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn with_filters(mut self, filters: impl IntoIterator<Item = QueryFilter>) -> Self {
        self.filters.extend(filters);
        self
    }

    pub fn including(mut self, relation: impl Into<String>) -> Self {
        self.include_related.push(relation.into());
        self
    }

    /// Filters from these options followed by `extra`, AND-combined.
    pub fn merged_filters(&self, extra: &[QueryFilter]) -> Vec<QueryFilter> {
        let mut all = self.filters.clone();
        all.extend_from_slice(extra);
        all
    }
}
