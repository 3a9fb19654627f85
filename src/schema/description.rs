//! Declarative schema descriptions.
//!
//! A [`SchemaDescription`] lists an entity's fields with their host kind and
//! constraint options; [`SchemaDescription::build`] turns it into a
//! [`TableSchema`]. Options can be set with builder methods or with a tag
//! string using the `key[:value];...` grammar:
//!
//! ```text
//! column:user_name;size:64;not null;uniqueindex:uidx_users_name
//! ```
//!
//! Recognized keys: `column`, `type`, `size`, `default`, `not null` /
//! `notnull`, `null`, `primarykey`, `autoincrement`, `index[:name]`,
//! `uniqueindex[:name]`, `unique` and `-` (skip the field).

use crate::db::dialect::ensure_identifier;
use crate::error::{DbError, DbResult};
use crate::models::{ColumnDefinition, IndexDefinition, Record, TableSchema};
use crate::schema::naming::{
    default_index_name, normalize_default_value, normalize_index_name, to_snake,
};
use std::collections::{BTreeMap, HashMap};

/// Host-side kind of a field; decides the logical column type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Int,
    Float,
    Bool,
    String,
    Timestamp,
}

impl FieldKind {
    /// Parse a host type name such as `i64`, `uint32`, `string` or `datetime`.
    pub fn from_type_name(name: &str) -> DbResult<Self> {
        let lower = name.trim().to_lowercase();
        let s = lower.as_str();
        let kind = match s {
            "bool" | "boolean" => Self::Bool,
            "string" | "str" | "&str" | "text" => Self::String,
            "time" | "datetime" | "timestamp" | "datetime<utc>" | "naivedatetime" => {
                Self::Timestamp
            }
            "isize" | "usize" => Self::Int,
            _ if sized(s, "int") || sized(s, "uint") || sized(s, "i") || sized(s, "u") => {
                Self::Int
            }
            _ if sized(s, "float") || sized(s, "f") => Self::Float,
            _ => return Err(DbError::unsupported_argument(name, "schema field type")),
        };
        Ok(kind)
    }

    fn logical_type(self, size: Option<&str>) -> String {
        match self {
            Self::Int => "BIGINT".to_string(),
            Self::Float => "DOUBLE".to_string(),
            Self::Bool => "BOOLEAN".to_string(),
            Self::Timestamp => "TIMESTAMP".to_string(),
            Self::String => format!("VARCHAR({})", size.unwrap_or("255")),
        }
    }
}

/// `prefix` followed by an optional bit width, e.g. `int`, `int64`, `u8`.
fn sized(name: &str, prefix: &str) -> bool {
    name.strip_prefix(prefix).is_some_and(|rest| {
        rest.chars().all(|c| c.is_ascii_digit()) && (!rest.is_empty() || prefix.len() > 1)
    })
}

/// Parsed tag options: lowercase key → every value given for it.
type TagOptions = BTreeMap<String, Vec<String>>;

fn parse_tag(tag: &str, options: &mut TagOptions) {
    for part in tag.split(';').map(str::trim).filter(|p| !p.is_empty()) {
        let (key, value) = match part.split_once(':') {
            Some((k, v)) => (k, v.trim()),
            None => (part, ""),
        };
        options
            .entry(key.trim().to_lowercase())
            .or_default()
            .push(value.to_string());
    }
}

fn first_non_empty(options: &TagOptions, key: &str) -> Option<String> {
    options
        .get(key)?
        .iter()
        .map(|v| v.trim())
        .find(|v| !v.is_empty())
        .map(String::from)
}

/// One field of an entity.
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    name: String,
    kind: FieldKind,
    optional: bool,
    options: TagOptions,
}

impl Field {
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
            optional: false,
            options: TagOptions::new(),
        }
    }

    /// Build from a host type name; `Option<T>` and `*T` mark the field optional.
    pub fn parse(name: impl Into<String>, host_type: &str) -> DbResult<Self> {
        let trimmed = host_type.trim();
        let (inner, optional) = if let Some(rest) = trimmed
            .strip_prefix("Option<")
            .and_then(|r| r.strip_suffix('>'))
        {
            (rest, true)
        } else if let Some(rest) = trimmed.strip_prefix('*') {
            (rest, true)
        } else {
            (trimmed, false)
        };
        let mut field = Self::new(name, FieldKind::from_type_name(inner)?);
        field.optional = optional;
        Ok(field)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> FieldKind {
        self.kind
    }

    /// Mark the host value as optional, making the column nullable.
    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    /// Merge options from a `key[:value];...` tag string.
    pub fn tag(mut self, tag: &str) -> Self {
        parse_tag(tag, &mut self.options);
        self
    }

    fn set(mut self, key: &str, value: impl Into<String>) -> Self {
        self.options
            .entry(key.to_string())
            .or_default()
            .push(value.into());
        self
    }

    pub fn column(self, name: impl Into<String>) -> Self {
        self.set("column", name)
    }

    /// Explicit SQL type; implies NOT NULL unless [`Field::nullable`] is set.
    pub fn sql_type(self, sql_type: impl Into<String>) -> Self {
        self.set("type", sql_type)
    }

    pub fn size(self, size: u32) -> Self {
        self.set("size", size.to_string())
    }

    pub fn default_value(self, value: impl Into<String>) -> Self {
        self.set("default", value)
    }

    pub fn not_null(self) -> Self {
        self.set("not null", "")
    }

    pub fn nullable(self) -> Self {
        self.set("null", "")
    }

    pub fn primary_key(self) -> Self {
        self.set("primarykey", "")
    }

    pub fn auto_increment(self) -> Self {
        self.set("autoincrement", "")
    }

    /// Single-column index, named by default unless `name` is given.
    pub fn index(self, name: Option<&str>) -> Self {
        self.set("index", name.unwrap_or_default())
    }

    pub fn unique_index(self, name: Option<&str>) -> Self {
        self.set("uniqueindex", name.unwrap_or_default())
    }

    pub fn unique(self) -> Self {
        self.set("unique", "")
    }

    /// Leave the field out of the table.
    pub fn skip(self) -> Self {
        self.set("-", "")
    }

    fn has(&self, key: &str) -> bool {
        self.options.contains_key(key)
    }

    fn is_skipped(&self) -> bool {
        self.has("-")
    }

    fn to_column(&self) -> DbResult<ColumnDefinition> {
        let name = first_non_empty(&self.options, "column").unwrap_or_else(|| to_snake(&self.name));
        ensure_identifier(&name)?;

        let (sql_type, nullable) = match first_non_empty(&self.options, "type") {
            Some(custom) => (custom.to_uppercase(), false),
            None => {
                let size = first_non_empty(&self.options, "size");
                if let Some(size) = &size {
                    if size.parse::<u32>().map_or(true, |n| n == 0) {
                        return Err(DbError::unsupported_argument(
                            format!("size:{}", size),
                            format!("field '{}'", self.name),
                        ));
                    }
                }
                (self.kind.logical_type(size.as_deref()), self.optional)
            }
        };

        let mut column = ColumnDefinition::new(name, sql_type);
        column.not_null = !nullable;
        column.primary = self.has("primarykey");
        column.auto_increment = self.has("autoincrement");
        if self.has("not null") || self.has("notnull") {
            column.not_null = true;
        }
        if self.has("null") {
            column.not_null = false;
        }
        if let Some(default) = first_non_empty(&self.options, "default") {
            let (value, raw) = normalize_default_value(&default);
            column = column.with_default(value, raw);
        }
        Ok(column)
    }

    fn indexes(&self, table: &str, column: &str) -> Vec<IndexDefinition> {
        let named = |value: &str, unique: bool| {
            let value = value.trim();
            if value.is_empty() {
                default_index_name(table, column, unique)
            } else {
                normalize_index_name(value.split(',').next().unwrap_or_default())
            }
        };

        let mut result = Vec::new();
        for value in self.options.get("index").into_iter().flatten() {
            result.push(IndexDefinition::new(named(value.as_str(), false), vec![column.to_string()], false));
        }
        for value in self.options.get("uniqueindex").into_iter().flatten() {
            result.push(IndexDefinition::new(named(value.as_str(), true), vec![column.to_string()], true));
        }
        if self.has("unique") {
            result.push(IndexDefinition::new(
                default_index_name(table, column, true),
                vec![column.to_string()],
                true,
            ));
        }
        result
    }
}

/// One composite-index declaration inside an [`IndexModel`].
///
/// `index` and `unique` take comma-separated column references that are
/// resolved against the table's columns by exact lowercase name, then by
/// snake_case form.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IndexField {
    name: String,
    index: Option<String>,
    unique: Option<String>,
    name_override: Option<String>,
}

impl IndexField {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn index(mut self, columns: impl Into<String>) -> Self {
        self.index = Some(columns.into());
        self
    }

    pub fn unique(mut self, columns: impl Into<String>) -> Self {
        self.unique = Some(columns.into());
        self
    }

    /// Use `name` instead of the derived `idx_<table>_<field>`.
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name_override = Some(name.into());
        self
    }

    fn index_name(&self, table: &str, unique: bool) -> String {
        if let Some(name) = self
            .name_override
            .as_deref()
            .map(normalize_index_name)
            .filter(|n| !n.is_empty())
        {
            return name;
        }
        let mut base = normalize_index_name(&self.name);
        if base.is_empty() {
            base = "idx".to_string();
        }
        let prefix = if unique { "uidx" } else { "idx" };
        format!("{}_{}_{}", prefix, to_snake(table), base)
    }
}

/// A group of composite-index declarations.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IndexModel {
    fields: Vec<IndexField>,
}

impl IndexModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field(mut self, field: IndexField) -> Self {
        self.fields.push(field);
        self
    }

    fn indexes(&self, table: &str, columns: &HashMap<String, String>) -> Vec<IndexDefinition> {
        let mut result = Vec::new();
        for field in &self.fields {
            if normalize_index_name(&field.name).is_empty() {
                continue;
            }
            for (spec, unique) in [(&field.index, false), (&field.unique, true)] {
                let resolved = spec
                    .as_deref()
                    .map(|s| resolve_index_columns(s, columns))
                    .unwrap_or_default();
                if !resolved.is_empty() {
                    result.push(IndexDefinition::new(
                        field.index_name(table, unique),
                        resolved,
                        unique,
                    ));
                }
            }
        }
        result
    }
}

fn resolve_index_columns(spec: &str, columns: &HashMap<String, String>) -> Vec<String> {
    let mut resolved: Vec<String> = Vec::new();
    for part in spec.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let found = columns
            .get(&part.to_lowercase())
            .or_else(|| columns.get(&to_snake(part).to_lowercase()));
        if let Some(column) = found {
            if !resolved.iter().any(|c| c.eq_ignore_ascii_case(column)) {
                resolved.push(column.clone());
            }
        }
    }
    resolved
}

/// Everything needed to derive one table's schema.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SchemaDescription {
    fields: Vec<Field>,
    index_models: Vec<IndexModel>,
    seeds: Vec<Record>,
}

impl SchemaDescription {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field(mut self, field: Field) -> Self {
        self.fields.push(field);
        self
    }

    pub fn index_model(mut self, model: IndexModel) -> Self {
        self.index_models.push(model);
        self
    }

    /// Row inserted when the table is first created.
    pub fn seed(mut self, row: Record) -> Self {
        self.seeds.push(row);
        self
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    /// Derive the table schema.
    ///
    /// Indexes sharing a name are merged: their columns are appended without
    /// duplicates and the result is unique if any declaration was. When no
    /// column is flagged primary, a column named `id` becomes the primary key
    /// (auto-increment when its type is an integer).
    pub fn build(&self, table: &str) -> DbResult<TableSchema> {
        let table = table.trim();
        ensure_identifier(table)?;

        let mut columns: Vec<ColumnDefinition> = Vec::with_capacity(self.fields.len());
        let mut indexes: Vec<IndexDefinition> = Vec::new();
        for field in self.fields.iter().filter(|f| !f.is_skipped()) {
            let column = field.to_column()?;
            if columns.iter().any(|c| c.name.eq_ignore_ascii_case(&column.name)) {
                return Err(DbError::schema(
                    format!("duplicate column '{}'", column.name),
                    table,
                ));
            }
            for index in field.indexes(table, &column.name) {
                merge_index(&mut indexes, index);
            }
            columns.push(column);
        }

        let primaries = columns.iter().filter(|c| c.primary).count();
        if primaries > 1 {
            return Err(DbError::schema(
                "more than one column is flagged as primary key",
                table,
            ));
        }
        if primaries == 0 {
            if let Some(id) = columns.iter_mut().find(|c| c.name.eq_ignore_ascii_case("id")) {
                id.primary = true;
                if id.sql_type.to_uppercase().contains("INT") {
                    id.auto_increment = true;
                }
            }
        }

        let by_lower: HashMap<String, String> = columns
            .iter()
            .map(|c| (c.name.to_lowercase(), c.name.clone()))
            .collect();
        for model in &self.index_models {
            for index in model.indexes(table, &by_lower) {
                merge_index(&mut indexes, index);
            }
        }
        for index in &indexes {
            ensure_identifier(&index.name)?;
        }
        indexes.sort_by_key(|i| i.name.to_lowercase());

        let mut schema = TableSchema::new(table);
        schema.columns = columns;
        schema.indexes = indexes;
        schema.seeds = self.seeds.clone();
        Ok(schema)
    }
}

fn merge_index(indexes: &mut Vec<IndexDefinition>, index: IndexDefinition) {
    match indexes.iter_mut().find(|i| i.name == index.name) {
        Some(existing) => {
            for column in index.columns {
                if !existing.columns.contains(&column) {
                    existing.columns.push(column);
                }
            }
            existing.unique |= index.unique;
        }
        None => indexes.push(index),
    }
}
