//! Table-level CRUD surface.
//!
//! A [`Model`] binds a table name to its registered schema and a named
//! database. Column keys in filters and values are resolved against the
//! schema, so callers may pass `UserName`, `username` or `user_name`.
//! Every operation runs inside the transaction carried by its
//! [`ExecContext`], if any.

use crate::db::context::ExecContext;
use crate::db::dialect::{ensure_identifier, quote_identifier};
use crate::db::executor::{self, Route};
use crate::db::pool::{ConnectionManager, DbPool};
use crate::error::{DbError, DbResult};
use crate::models::{
    DatabaseType, Record, SelectOptions, SqlValue, TableSchema, VERSION_COLUMN, Values,
};
use crate::query::clause::{build_joins, build_limit, resolve_order};
use crate::query::{CompiledClause, Filter, compile};
use crate::schema::naming::to_snake;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::debug;

pub struct Model {
    table: String,
    database: String,
    schema: Arc<TableSchema>,
    default_order: String,
    connections: Arc<ConnectionManager>,
    pool: OnceCell<DbPool>,
}

impl std::fmt::Debug for Model {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Model")
            .field("table", &self.table)
            .field("database", &self.database)
            .field("default_order", &self.default_order)
            .field("resolved", &self.pool.initialized())
            .finish()
    }
}

impl Model {
    pub(crate) fn new(
        schema: Arc<TableSchema>,
        database: impl Into<String>,
        default_order: impl Into<String>,
        connections: Arc<ConnectionManager>,
    ) -> Self {
        Self {
            table: schema.table.clone(),
            database: database.into(),
            schema,
            default_order: default_order.into().trim().to_string(),
            connections,
            pool: OnceCell::new(),
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    pub fn schema(&self) -> &Arc<TableSchema> {
        &self.schema
    }

    pub fn default_order(&self) -> &str {
        &self.default_order
    }

    /// The model's pool, looked up on first use and kept for its lifetime.
    pub(crate) async fn pool(&self) -> DbResult<&DbPool> {
        self.pool
            .get_or_try_init(|| self.connections.get(Some(&self.database)))
            .await
    }

    async fn route<'a>(&'a self, ctx: &'a ExecContext) -> DbResult<Route<'a>> {
        let pool = self.pool().await?;
        Route::resolve(ctx, pool, &self.database)
    }

    /// Rows matching `filter`.
    ///
    /// Builds `SELECT <fields> FROM <table> AS main [joins] [WHERE] [ORDER BY]
    /// [LIMIT] [FOR UPDATE]`. Returned rows carry snake_case aliases for
    /// differently spelled columns.
    pub async fn select(
        &self,
        ctx: &ExecContext,
        filter: &Filter,
        options: &SelectOptions,
    ) -> DbResult<Vec<Record>> {
        let route = self.route(ctx).await?;
        let dialect = route.db_type();
        let fields = options
            .fields
            .as_deref()
            .map(str::trim)
            .filter(|f| !f.is_empty())
            .map(|f| self.normalize_fields(dialect, f))
            .unwrap_or_else(|| "main.*".to_string());

        let (mut sql, args) = self.select_base(dialect, &fields, filter, options)?;
        if let Some(order) = resolve_order(&self.default_order, options.order.as_deref()) {
            sql.push_str(" ORDER BY ");
            sql.push_str(order);
        }
        if let Some(limit) = build_limit(options.limit.as_ref())? {
            sql.push(' ');
            sql.push_str(&limit);
        }
        if options.for_update && dialect != DatabaseType::SQLite {
            sql.push_str(" FOR UPDATE");
        }

        let mut rows = executor::fetch_all(ctx, route, &sql, &args).await?;
        rows.iter_mut().for_each(normalize_record);
        Ok(rows)
    }

    /// [`select`](Self::select) deserialized into `T`.
    pub async fn select_as<T: DeserializeOwned>(
        &self,
        ctx: &ExecContext,
        filter: &Filter,
        options: &SelectOptions,
    ) -> DbResult<Vec<T>> {
        self.select(ctx, filter, options)
            .await?
            .into_iter()
            .map(|row| serde_json::from_value(JsonValue::Object(row)).map_err(DbError::from))
            .collect()
    }

    /// First matching row, or an empty record when nothing matches.
    pub async fn find(
        &self,
        ctx: &ExecContext,
        filter: &Filter,
        options: &SelectOptions,
    ) -> DbResult<Record> {
        let mut options = options.clone();
        options.limit = Some(crate::models::Limit::Raw("1".to_string()));
        Ok(self
            .select(ctx, filter, &options)
            .await?
            .into_iter()
            .next()
            .unwrap_or_default())
    }

    pub async fn find_as<T: DeserializeOwned>(
        &self,
        ctx: &ExecContext,
        filter: &Filter,
        options: &SelectOptions,
    ) -> DbResult<Option<T>> {
        let row = self.find(ctx, filter, options).await?;
        if row.is_empty() {
            return Ok(None);
        }
        Ok(Some(serde_json::from_value(JsonValue::Object(row))?))
    }

    /// Insert one row and return the generated key, or 0 when the driver
    /// reports none.
    pub async fn insert(&self, ctx: &ExecContext, values: Values) -> DbResult<i64> {
        let values = self.normalize_values(values)?;
        if values.is_empty() {
            return Err(DbError::invalid_input(format!(
                "insert into '{}' requires at least one column",
                self.table
            )));
        }

        let route = self.route(ctx).await?;
        let dialect = route.db_type();
        let mut columns = Vec::with_capacity(values.len());
        let mut placeholders = Vec::with_capacity(values.len());
        let mut args = Vec::with_capacity(values.len());
        for (column, value) in values {
            columns.push(quote_identifier(dialect, &column));
            push_value(&mut placeholders, &mut args, value);
        }
        let mut sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            quote_identifier(dialect, &self.table),
            columns.join(", "),
            placeholders.join(", ")
        );

        let generated = self
            .schema
            .primary_key()
            .filter(|pk| pk.auto_increment);
        if let (DatabaseType::PostgreSQL, Some(pk)) = (dialect, generated) {
            sql.push_str(&format!(" RETURNING {}", quote_identifier(dialect, &pk.name)));
            let rows = executor::fetch_all(ctx, route, &sql, &args).await?;
            let id = rows
                .first()
                .and_then(|r| r.get(&pk.name))
                .and_then(json_i64)
                .unwrap_or(0);
            return Ok(id);
        }

        let result = executor::execute(ctx, route, &sql, &args).await?;
        Ok(result.last_insert_id.unwrap_or(0))
    }

    /// Update matching rows and return the affected count.
    ///
    /// An empty filter is refused with [`DbError::MissingFilter`].
    pub async fn update(&self, ctx: &ExecContext, filter: &Filter, values: Values) -> DbResult<u64> {
        self.update_inner(ctx, filter, values, false).await
    }

    /// Update with optimistic locking.
    ///
    /// Requires a `version` column. Any caller-supplied version value is
    /// dropped and `version = version + 1` is appended; `values` may be empty
    /// to bump the version only. Matching no row is a
    /// [`DbError::VersionConflict`].
    pub async fn update_with_version(
        &self,
        ctx: &ExecContext,
        filter: &Filter,
        values: Values,
    ) -> DbResult<u64> {
        self.update_inner(ctx, filter, values, true).await
    }

    async fn update_inner(
        &self,
        ctx: &ExecContext,
        filter: &Filter,
        values: Values,
        optimistic: bool,
    ) -> DbResult<u64> {
        let route = self.route(ctx).await?;
        let dialect = route.db_type();
        let clause = self.where_clause(dialect, filter)?;
        if clause.is_empty() {
            return Err(DbError::missing_filter("update", &self.table));
        }

        let mut values = self.normalize_values(values)?;
        if optimistic {
            if !self.schema.has_version_column() {
                return Err(DbError::schema(
                    "optimistic update requires a 'version' column",
                    &self.table,
                ));
            }
            values.remove_ignore_case(VERSION_COLUMN);
        } else if values.is_empty() {
            return Err(DbError::invalid_input(format!(
                "update of '{}' requires at least one column",
                self.table
            )));
        }

        let mut assignments = Vec::with_capacity(values.len() + 1);
        let mut args = Vec::with_capacity(values.len() + clause.args.len());
        for (column, value) in values {
            let mut placeholder = Vec::with_capacity(1);
            push_value(&mut placeholder, &mut args, value);
            assignments.push(format!(
                "{} = {}",
                quote_identifier(dialect, &column),
                placeholder.concat()
            ));
        }
        if optimistic {
            let version = quote_identifier(dialect, VERSION_COLUMN);
            assignments.push(format!("{} = {} + 1", version, version));
        }
        args.extend(clause.args);

        let sql = format!(
            "UPDATE {} SET {} WHERE {}",
            quote_identifier(dialect, &self.table),
            assignments.join(", "),
            clause.sql
        );
        let affected = executor::execute(ctx, route, &sql, &args).await?.rows_affected;
        if optimistic && affected == 0 {
            return Err(DbError::version_conflict(&self.table));
        }
        Ok(affected)
    }

    /// Delete matching rows. An empty filter is refused.
    pub async fn delete(&self, ctx: &ExecContext, filter: &Filter) -> DbResult<u64> {
        let route = self.route(ctx).await?;
        let dialect = route.db_type();
        let clause = self.where_clause(dialect, filter)?;
        if clause.is_empty() {
            return Err(DbError::missing_filter("delete", &self.table));
        }
        let sql = format!(
            "DELETE FROM {} WHERE {}",
            quote_identifier(dialect, &self.table),
            clause.sql
        );
        Ok(executor::execute(ctx, route, &sql, &clause.args)
            .await?
            .rows_affected)
    }

    /// `COUNT(*)` of matching rows; `options.fields` replaces the expression.
    pub async fn count(
        &self,
        ctx: &ExecContext,
        filter: &Filter,
        options: &SelectOptions,
    ) -> DbResult<i64> {
        let value = self.aggregate(ctx, "COUNT(*)".to_string(), filter, options).await?;
        Ok(json_i64(&value)
            .or_else(|| json_f64(&value).map(|v| v as i64))
            .unwrap_or(0))
    }

    /// `SUM(column)` over matching rows; zero when nothing matches.
    pub async fn sum(
        &self,
        ctx: &ExecContext,
        column: &str,
        filter: &Filter,
        options: &SelectOptions,
    ) -> DbResult<f64> {
        let column = column.trim();
        if column.is_empty() {
            return Err(DbError::invalid_input("sum requires a column"));
        }
        let dialect = self.pool().await?.db_type();
        let expr = format!("SUM({})", self.normalize_fields(dialect, column));
        let value = self.aggregate(ctx, expr, filter, options).await?;
        Ok(json_f64(&value).unwrap_or(0.0))
    }

    async fn aggregate(
        &self,
        ctx: &ExecContext,
        expr: String,
        filter: &Filter,
        options: &SelectOptions,
    ) -> DbResult<JsonValue> {
        let route = self.route(ctx).await?;
        let dialect = route.db_type();
        let expr = options
            .fields
            .as_deref()
            .map(str::trim)
            .filter(|f| !f.is_empty())
            .map(String::from)
            .unwrap_or(expr);

        let fields = format!("COALESCE({}, 0) AS aggregate", expr);
        let (sql, args) = self.select_base(dialect, &fields, filter, options)?;
        let rows = executor::fetch_all(ctx, route, &sql, &args).await?;
        Ok(rows
            .into_iter()
            .next()
            .and_then(|mut row| row.remove("aggregate"))
            .unwrap_or(JsonValue::Null))
    }

    /// `SELECT fields FROM table AS main [joins] [WHERE ...]`
    fn select_base(
        &self,
        dialect: DatabaseType,
        fields: &str,
        filter: &Filter,
        options: &SelectOptions,
    ) -> DbResult<(String, Vec<SqlValue>)> {
        let mut sql = format!(
            "SELECT {} FROM {} AS main",
            fields,
            quote_identifier(dialect, &self.table)
        );
        let joins = build_joins(dialect, &options.joins)?;
        if !joins.is_empty() {
            sql.push(' ');
            sql.push_str(&joins);
        }
        let clause = self.where_clause(dialect, filter)?;
        if !clause.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clause.sql);
        }
        Ok((sql, clause.args))
    }

    fn where_clause(&self, dialect: DatabaseType, filter: &Filter) -> DbResult<CompiledClause> {
        let normalized = filter.clone().map_fields(&|field: &str| {
            if field.contains('.') {
                return field.to_string();
            }
            self.schema
                .resolve_column(field.trim())
                .map(String::from)
                .unwrap_or_else(|| field.to_string())
        });
        let clause = compile(&normalized, dialect)?;
        debug!(table = %self.table, clause = %clause.sql, args = clause.args.len(), "Compiled filter");
        Ok(clause)
    }

    /// Resolve plain column names in a select list and quote them; anything
    /// else (expressions, qualified names, `*`) passes through.
    fn normalize_fields(&self, dialect: DatabaseType, fields: &str) -> String {
        fields
            .split(',')
            .map(str::trim)
            .map(|field| match self.schema.resolve_column(field) {
                Some(column) if ensure_identifier(field).is_ok() => quote_identifier(dialect, column),
                _ => field.to_string(),
            })
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn normalize_values(&self, values: Values) -> DbResult<Values> {
        let mut normalized = Values::new();
        for (key, value) in values {
            let column = self
                .schema
                .resolve_column(key.trim())
                .map(String::from)
                .unwrap_or_else(|| key.trim().to_string());
            ensure_identifier(&column)?;
            normalized.insert(column, value);
        }
        Ok(normalized)
    }
}

/// NULL is written inline so typed columns never see an untyped bind.
fn push_value(placeholders: &mut Vec<String>, args: &mut Vec<SqlValue>, value: SqlValue) {
    if value.is_null() {
        placeholders.push("NULL".to_string());
    } else {
        placeholders.push("?".to_string());
        args.push(value);
    }
}

fn json_i64(value: &JsonValue) -> Option<i64> {
    match value {
        JsonValue::Number(n) => n.as_i64(),
        JsonValue::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn json_f64(value: &JsonValue) -> Option<f64> {
    match value {
        JsonValue::Number(n) => n.as_f64(),
        JsonValue::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Add a snake_case alias for every differently spelled key.
pub fn normalize_record(record: &mut Record) {
    let keys: Vec<String> = record.keys().cloned().collect();
    for key in keys {
        let snake = to_snake(&key);
        if snake.is_empty() || snake == key || record.contains_key(&snake) {
            continue;
        }
        if let Some(value) = record.get(&key).cloned() {
            record.insert(snake, value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_normalize_record_adds_aliases() {
        let mut record = Record::new();
        record.insert("UserName".into(), json!("ann"));
        record.insert("id".into(), json!(1));
        record.insert("createdAt".into(), json!("2024"));
        record.insert("created_at".into(), json!("kept"));
        normalize_record(&mut record);
        assert_eq!(record["user_name"], json!("ann"));
        assert_eq!(record["UserName"], json!("ann"));
        assert_eq!(record["created_at"], json!("kept"));
        assert_eq!(record.len(), 5);
    }

    #[test]
    fn test_push_value_inlines_null() {
        let mut placeholders = Vec::new();
        let mut args = Vec::new();
        push_value(&mut placeholders, &mut args, SqlValue::Null);
        push_value(&mut placeholders, &mut args, SqlValue::Int(3));
        assert_eq!(placeholders, vec!["NULL", "?"]);
        assert_eq!(args, vec![SqlValue::Int(3)]);
    }

    #[test]
    fn test_json_numbers() {
        assert_eq!(json_i64(&json!(5)), Some(5));
        assert_eq!(json_i64(&json!("7")), Some(7));
        assert_eq!(json_f64(&json!("2.5")), Some(2.5));
        assert_eq!(json_f64(&JsonValue::Null), None);
    }
}
