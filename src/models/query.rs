//! Query-related data models.
//!
//! This module defines bind values, row maps and the per-call options the
//! model layer accepts.

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;

/// A row returned to callers: column name → JSON value.
pub type Record = serde_json::Map<String, JsonValue>;

/// A value bound to a statement placeholder.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    /// NULL value
    Null,
    /// Boolean value
    Bool(bool),
    /// Integer value (stored as i64 for maximum range)
    Int(i64),
    /// Floating point value
    Float(f64),
    /// String value
    String(String),
    /// Timestamp bound with its native driver type
    Timestamp(DateTime<Utc>),
    /// JSON document (arrays and objects)
    Json(JsonValue),
}

impl SqlValue {
    /// Check if this parameter is null.
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Get the type name of this parameter for debugging.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::String(_) => "string",
            Self::Timestamp(_) => "timestamp",
            Self::Json(_) => "json",
        }
    }

    pub fn to_json(&self) -> JsonValue {
        match self {
            Self::Null => JsonValue::Null,
            Self::Bool(v) => JsonValue::Bool(*v),
            Self::Int(v) => JsonValue::from(*v),
            Self::Float(v) => serde_json::Number::from_f64(*v)
                .map(JsonValue::Number)
                .unwrap_or(JsonValue::Null),
            Self::String(v) => JsonValue::String(v.clone()),
            Self::Timestamp(v) => JsonValue::String(v.to_rfc3339()),
            Self::Json(v) => v.clone(),
        }
    }
}

impl From<bool> for SqlValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i32> for SqlValue {
    fn from(v: i32) -> Self {
        Self::Int(v.into())
    }
}

impl From<i64> for SqlValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<u32> for SqlValue {
    fn from(v: u32) -> Self {
        Self::Int(v.into())
    }
}

impl From<f64> for SqlValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<DateTime<Utc>> for SqlValue {
    fn from(v: DateTime<Utc>) -> Self {
        Self::Timestamp(v)
    }
}

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Self::Null)
    }
}

impl From<JsonValue> for SqlValue {
    fn from(v: JsonValue) -> Self {
        match v {
            JsonValue::Null => Self::Null,
            JsonValue::Bool(b) => Self::Bool(b),
            JsonValue::Number(n) => match n.as_i64() {
                Some(i) => Self::Int(i),
                None => Self::Float(n.as_f64().unwrap_or_default()),
            },
            JsonValue::String(s) => Self::String(s),
            other => Self::Json(other),
        }
    }
}

impl From<&JsonValue> for SqlValue {
    fn from(v: &JsonValue) -> Self {
        v.clone().into()
    }
}

/// Column values for inserts and updates, ordered by column name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Values(BTreeMap<String, SqlValue>);

impl Values {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn set(mut self, column: impl Into<String>, value: impl Into<SqlValue>) -> Self {
        self.0.insert(column.into(), value.into());
        self
    }

    pub fn insert(&mut self, column: impl Into<String>, value: impl Into<SqlValue>) {
        self.0.insert(column.into(), value.into());
    }

    pub fn remove(&mut self, column: &str) -> Option<SqlValue> {
        self.0.remove(column)
    }

    pub fn get(&self, column: &str) -> Option<&SqlValue> {
        self.0.get(column)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &SqlValue)> {
        self.0.iter()
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.0.keys()
    }

    /// Drop every key equal to `column` ignoring ASCII case.
    pub fn remove_ignore_case(&mut self, column: &str) {
        self.0.retain(|k, _| !k.eq_ignore_ascii_case(column));
    }
}

impl<K: Into<String>, V: Into<SqlValue>> FromIterator<(K, V)> for Values {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

impl IntoIterator for Values {
    type Item = (String, SqlValue);
    type IntoIter = std::collections::btree_map::IntoIter<String, SqlValue>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl From<Record> for Values {
    fn from(record: Record) -> Self {
        record.into_iter().collect()
    }
}

/// One JOIN descriptor. `on` is a trusted SQL predicate.
#[derive(Debug, Clone, PartialEq)]
pub struct JoinSpec {
    pub table: String,
    /// Defaults to LEFT JOIN
    pub kind: Option<String>,
    pub on: String,
}

impl JoinSpec {
    pub fn new(table: impl Into<String>, on: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            kind: None,
            on: on.into(),
        }
    }

    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = Some(kind.into());
        self
    }
}

/// Row window for SELECT.
#[derive(Debug, Clone, PartialEq)]
pub enum Limit {
    /// Raw `LIMIT` body, e.g. "10" or "10 OFFSET 20"
    Raw(String),
    /// 1-based page number and page size
    Page { page: u64, page_size: u64 },
}

/// Options for `Model::select` and friends.
///
/// `fields`, `order` and join predicates are SQL fragments supplied by the
/// application, not by end users.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SelectOptions {
    /// Select list (default `main.*`); for aggregates, replaces the aggregate expression
    pub fields: Option<String>,
    pub joins: Vec<JoinSpec>,
    /// Overrides the model's default ordering; `Some("")` clears it
    pub order: Option<String>,
    pub limit: Option<Limit>,
    /// Append `FOR UPDATE` (ignored on SQLite)
    pub for_update: bool,
}

impl SelectOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fields(mut self, fields: impl Into<String>) -> Self {
        self.fields = Some(fields.into());
        self
    }

    pub fn join(mut self, join: JoinSpec) -> Self {
        self.joins.push(join);
        self
    }

    pub fn order_by(mut self, order: impl Into<String>) -> Self {
        self.order = Some(order.into());
        self
    }

    pub fn limit(mut self, limit: impl Into<String>) -> Self {
        self.limit = Some(Limit::Raw(limit.into()));
        self
    }

    pub fn page(mut self, page: u64, page_size: u64) -> Self {
        self.limit = Some(Limit::Page { page, page_size });
        self
    }

    pub fn for_update(mut self) -> Self {
        self.for_update = true;
        self
    }
}

/// Outcome of a write statement.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecResult {
    pub rows_affected: u64,
    /// Generated key, when the driver reports one
    pub last_insert_id: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_sql_value_types() {
        assert!(SqlValue::Null.is_null());
        assert!(!SqlValue::Bool(true).is_null());
        assert_eq!(SqlValue::from(42).type_name(), "int");
        assert_eq!(SqlValue::from("hello").type_name(), "string");
        assert_eq!(SqlValue::from(None::<i64>), SqlValue::Null);
    }

    #[test]
    fn test_sql_value_from_json() {
        assert_eq!(SqlValue::from(json!(7)), SqlValue::Int(7));
        assert_eq!(SqlValue::from(json!(1.5)), SqlValue::Float(1.5));
        assert_eq!(SqlValue::from(json!("x")), SqlValue::String("x".to_string()));
        assert_eq!(SqlValue::from(json!(null)), SqlValue::Null);
        assert_eq!(
            SqlValue::from(json!({"a": 1})),
            SqlValue::Json(json!({"a": 1}))
        );
    }

    #[test]
    fn test_values_are_sorted_by_column() {
        let values = Values::new().set("name", "ann").set("age", 3).set("email", "a@b.c");
        let keys: Vec<_> = values.keys().cloned().collect();
        assert_eq!(keys, vec!["age", "email", "name"]);
    }

    #[test]
    fn test_values_remove_ignore_case() {
        let mut values = Values::new().set("Version", 3).set("version", 4).set("name", "x");
        values.remove_ignore_case("VERSION");
        assert_eq!(values.len(), 1);
        assert!(values.get("name").is_some());
    }

    #[test]
    fn test_select_options_builder() {
        let opts = SelectOptions::new()
            .fields("main.id")
            .order_by("main.id DESC")
            .page(2, 20)
            .for_update();
        assert_eq!(opts.fields.as_deref(), Some("main.id"));
        assert_eq!(opts.limit, Some(Limit::Page { page: 2, page_size: 20 }));
        assert!(opts.for_update);
    }
}
