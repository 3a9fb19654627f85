//! Schema-related data models.
//!
//! These types are both the in-memory table definition and the persisted
//! snapshot format (one JSON document per table).

use super::query::Record;
use crate::schema::naming::canonical_column_key;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Name of the column that drives optimistic locking.
pub const VERSION_COLUMN: &str = "version";

/// A column in a table definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnDefinition {
    pub name: String,
    /// Logical SQL type; mapped per dialect at DDL time
    #[serde(rename = "type")]
    pub sql_type: String,
    #[serde(default)]
    pub not_null: bool,
    #[serde(default)]
    pub primary: bool,
    #[serde(default)]
    pub auto_increment: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<String>,
    /// Emit the default verbatim instead of as a quoted literal
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub default_is_raw: bool,
}

impl ColumnDefinition {
    /// Create a new column definition.
    pub fn new(name: impl Into<String>, sql_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sql_type: sql_type.into(),
            not_null: false,
            primary: false,
            auto_increment: false,
            default_value: None,
            default_is_raw: false,
        }
    }

    pub fn not_null(mut self) -> Self {
        self.not_null = true;
        self
    }

    pub fn primary(mut self) -> Self {
        self.primary = true;
        self
    }

    pub fn auto_increment(mut self) -> Self {
        self.auto_increment = true;
        self
    }

    pub fn with_default(mut self, value: impl Into<String>, raw: bool) -> Self {
        self.default_value = Some(value.into());
        self.default_is_raw = raw;
        self
    }
}

/// A secondary index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexDefinition {
    pub name: String,
    pub columns: Vec<String>,
    #[serde(default)]
    pub unique: bool,
}

impl IndexDefinition {
    pub fn new(name: impl Into<String>, columns: Vec<String>, unique: bool) -> Self {
        Self {
            name: name.into(),
            columns,
            unique,
        }
    }
}

/// A table definition together with its seed rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableSchema {
    /// Filled from the snapshot file name when absent
    #[serde(default)]
    pub table: String,
    pub columns: Vec<ColumnDefinition>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub indexes: Vec<IndexDefinition>,
    /// Rows inserted only when the table is created
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub seeds: Vec<Record>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

impl TableSchema {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            columns: Vec::new(),
            indexes: Vec::new(),
            seeds: Vec::new(),
            updated_at: Utc::now(),
        }
    }

    /// Look up a column by name, ignoring ASCII case.
    pub fn column(&self, name: &str) -> Option<&ColumnDefinition> {
        self.columns
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(name))
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column(name).is_some()
    }

    /// Resolve a caller-supplied key to the stored column name.
    ///
    /// Tries an exact match, then a case-insensitive match, then the
    /// canonical key (lowercase, underscores removed).
    pub fn resolve_column(&self, key: &str) -> Option<&str> {
        if let Some(col) = self.columns.iter().find(|c| c.name == key) {
            return Some(&col.name);
        }
        if let Some(col) = self.column(key) {
            return Some(&col.name);
        }
        let canonical = canonical_column_key(key);
        self.columns
            .iter()
            .find(|c| canonical_column_key(&c.name) == canonical)
            .map(|c| c.name.as_str())
    }

    pub fn primary_key(&self) -> Option<&ColumnDefinition> {
        self.columns.iter().find(|c| c.primary)
    }

    pub fn has_version_column(&self) -> bool {
        self.has_column(VERSION_COLUMN)
    }

    /// Structural equality ignoring `updated_at`.
    pub fn same_definition(&self, other: &TableSchema) -> bool {
        self.table == other.table
            && self.columns == other.columns
            && self.indexes == other.indexes
            && self.seeds == other.seeds
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn users() -> TableSchema {
        let mut schema = TableSchema::new("users");
        schema.columns = vec![
            ColumnDefinition::new("id", "BIGINT")
                .not_null()
                .primary()
                .auto_increment(),
            ColumnDefinition::new("user_name", "VARCHAR(255)").not_null(),
            ColumnDefinition::new("created_at", "TIMESTAMP").with_default("CURRENT_TIMESTAMP", true),
        ];
        schema
    }

    #[test]
    fn test_resolve_column_variants() {
        let schema = users();
        assert_eq!(schema.resolve_column("user_name"), Some("user_name"));
        assert_eq!(schema.resolve_column("USER_NAME"), Some("user_name"));
        assert_eq!(schema.resolve_column("UserName"), Some("user_name"));
        assert_eq!(schema.resolve_column("username"), Some("user_name"));
        assert_eq!(schema.resolve_column("email"), None);
    }

    #[test]
    fn test_primary_key_lookup() {
        let schema = users();
        assert_eq!(schema.primary_key().map(|c| c.name.as_str()), Some("id"));
        assert!(!schema.has_version_column());
    }

    #[test]
    fn test_snapshot_json_shape() {
        let schema = users();
        let value = serde_json::to_value(&schema).unwrap();
        assert_eq!(value["table"], "users");
        assert_eq!(value["columns"][0]["type"], "BIGINT");
        assert_eq!(value["columns"][0]["autoIncrement"], true);
        assert_eq!(value["columns"][2]["defaultValue"], "CURRENT_TIMESTAMP");
        assert_eq!(value["columns"][2]["defaultIsRaw"], true);
        assert!(value["columns"][1].get("defaultValue").is_none());
        assert!(value.get("indexes").is_none());
        assert!(value.get("updatedAt").is_some());
    }

    #[test]
    fn test_snapshot_accepts_missing_optional_fields() {
        let schema: TableSchema = serde_json::from_value(json!({
            "table": "tags",
            "columns": [{"name": "id", "type": "BIGINT"}],
            "updatedAt": "2024-01-01T00:00:00Z"
        }))
        .unwrap();
        assert_eq!(schema.columns[0].name, "id");
        assert!(!schema.columns[0].not_null);
        assert!(schema.indexes.is_empty());
        assert!(schema.seeds.is_empty());
    }

    #[test]
    fn test_same_definition_ignores_timestamp() {
        let a = users();
        let mut b = a.clone();
        b.updated_at = a.updated_at + chrono::Duration::seconds(30);
        assert!(a.same_definition(&b));
        b.columns.pop();
        assert!(!a.same_definition(&b));
    }
}
