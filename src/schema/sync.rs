//! Reconcile a desired table schema with the live database.
//!
//! A missing table is created and seeded. An existing table goes through
//! three column passes (rename, add, drop), each reading the live columns
//! afresh. Indexes are reconciled in both cases. Every pass is idempotent:
//! syncing an unchanged schema executes nothing.
//!
//! Statements run one by one and are not rolled back on failure; the error
//! carries the statements that were applied before it.

use crate::db::context::ExecContext;
use crate::db::dialect::ensure_identifier;
use crate::db::executor::{Route, execute};
use crate::db::introspect::{self, LiveIndex};
use crate::db::pool::DbPool;
use crate::error::{DbError, DbResult};
use crate::models::{DatabaseType, IndexDefinition, SqlValue, TableSchema};
use crate::schema::ddl;
use crate::schema::migration_log::MigrationLog;
use crate::schema::naming::{canonical_column_key, default_index_name, normalize_index_name};
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::{debug, info, warn};

/// Applies table schemas to a database, optionally recording what ran.
#[derive(Debug, Clone, Default)]
pub struct SchemaSynchronizer {
    log: Option<MigrationLog>,
}

impl SchemaSynchronizer {
    pub fn new(log: Option<MigrationLog>) -> Self {
        Self { log }
    }

    /// Bring `schema`'s table on `database` up to date.
    ///
    /// Returns the executed statements, trimmed and deduplicated in
    /// first-occurrence order. An empty list means nothing changed.
    pub async fn sync_table(
        &self,
        ctx: &ExecContext,
        pool: &DbPool,
        database: &str,
        schema: &TableSchema,
    ) -> DbResult<Vec<String>> {
        validate(schema)?;
        let route = Route::resolve(ctx, pool, database)?;

        let mut run = SyncRun::new(ctx, route, schema);
        let outcome = run.reconcile().await;
        let applied = unique_statements(run.applied);

        if let Some(log) = &self.log {
            if let Err(e) = log.record(database, &schema.table, &applied).await {
                warn!(table = %schema.table, error = %e, "Failed to write migration record");
            }
        }

        match outcome {
            Ok(()) => {
                if applied.is_empty() {
                    debug!(database = %database, table = %schema.table, "Schema up to date");
                } else {
                    info!(
                        database = %database,
                        table = %schema.table,
                        statements = applied.len(),
                        "Schema synchronized"
                    );
                }
                Ok(applied)
            }
            Err(e) => Err(DbError::schema_sync(&schema.table, applied, e)),
        }
    }

    /// Sync each schema in order, stopping at the first failure.
    ///
    /// The failure carries every statement applied so far across tables.
    pub async fn sync_all(
        &self,
        ctx: &ExecContext,
        pool: &DbPool,
        database: &str,
        schemas: &[TableSchema],
    ) -> DbResult<Vec<String>> {
        let mut statements = Vec::new();
        for schema in schemas {
            match self.sync_table(ctx, pool, database, schema).await {
                Ok(applied) => statements.extend(applied),
                Err(DbError::SchemaSync {
                    table,
                    applied,
                    source,
                }) => {
                    statements.extend(applied);
                    return Err(DbError::SchemaSync {
                        table,
                        applied: unique_statements(statements),
                        source,
                    });
                }
                Err(e) => return Err(e),
            }
        }
        Ok(unique_statements(statements))
    }
}

/// Reject bad identifiers before any statement runs.
fn validate(schema: &TableSchema) -> DbResult<()> {
    ensure_identifier(&schema.table)?;
    if schema.columns.is_empty() {
        return Err(DbError::schema("schema has no columns", &schema.table));
    }
    for column in &schema.columns {
        ensure_identifier(&column.name)?;
    }
    for index in &schema.indexes {
        for column in &index.columns {
            ensure_identifier(column.trim())?;
        }
    }
    Ok(())
}

struct SyncRun<'a> {
    ctx: &'a ExecContext,
    route: Route<'a>,
    dialect: DatabaseType,
    schema: &'a TableSchema,
    /// Canonical keys shared by more than one desired column
    ambiguous: HashSet<String>,
    applied: Vec<String>,
}

impl<'a> SyncRun<'a> {
    fn new(ctx: &'a ExecContext, route: Route<'a>, schema: &'a TableSchema) -> Self {
        let mut counts: HashMap<String, usize> = HashMap::new();
        for column in &schema.columns {
            *counts.entry(canonical_column_key(&column.name)).or_default() += 1;
        }
        let ambiguous = counts
            .into_iter()
            .filter(|(_, n)| *n > 1)
            .map(|(key, _)| key)
            .collect();

        Self {
            ctx,
            route,
            dialect: route.db_type(),
            schema,
            ambiguous,
            applied: Vec::new(),
        }
    }

    fn table(&self) -> &'a str {
        &self.schema.table
    }

    async fn exec(&mut self, sql: String) -> DbResult<()> {
        execute(self.ctx, self.route, &sql, &[]).await?;
        self.applied.push(sql);
        Ok(())
    }

    async fn reconcile(&mut self) -> DbResult<()> {
        if introspect::table_exists(self.ctx, self.route, self.table()).await? {
            self.rename_columns().await?;
            self.add_columns().await?;
            // SQLite refuses to drop a column that is still indexed.
            self.drop_stale_indexes().await?;
            self.drop_columns().await?;
        } else {
            self.exec(ddl::create_table_sql(self.dialect, self.schema))
                .await?;
            self.insert_seeds().await?;
        }
        self.reconcile_indexes().await
    }

    async fn live_columns(&self) -> DbResult<BTreeMap<String, String>> {
        introspect::existing_columns(self.ctx, self.route, self.table()).await
    }

    /// Live spelling of the column matching `name`: exact lowercase match
    /// first, then canonical key unless that key is ambiguous.
    fn find_live(&self, live: &BTreeMap<String, String>, name: &str) -> Option<String> {
        if let Some(actual) = live.get(&name.to_lowercase()) {
            return Some(actual.clone());
        }
        let key = canonical_column_key(name);
        if self.ambiguous.contains(&key) {
            return None;
        }
        live.iter()
            .find(|(lower, _)| canonical_column_key(lower) == key)
            .map(|(_, actual)| actual.clone())
    }

    async fn insert_seeds(&mut self) -> DbResult<()> {
        let schema = self.schema;
        for row in schema.seeds.iter().filter(|r| !r.is_empty()) {
            let Some((sql, args)) = ddl::seed_insert(self.dialect, schema, row) else {
                warn!(table = %self.table(), "Seed row matches no column, skipped");
                continue;
            };
            execute(self.ctx, self.route, &sql, &args).await?;
            self.applied.push(ddl::inline_params(&sql, &args));
        }
        Ok(())
    }

    async fn rename_columns(&mut self) -> DbResult<()> {
        let mut live = self.live_columns().await?;
        let mut warned = HashSet::new();

        let schema = self.schema;
        for column in &schema.columns {
            let key = canonical_column_key(&column.name);
            if self.ambiguous.contains(&key) {
                if warned.insert(key.clone()) {
                    warn!(
                        table = %self.table(),
                        key = %key,
                        "Several columns share a canonical name, rename skipped"
                    );
                }
                continue;
            }
            let Some(actual) = self.find_live(&live, &column.name) else {
                continue;
            };
            if !needs_rename(self.dialect, &actual, &column.name) {
                continue;
            }
            match ddl::rename_column_sql(self.dialect, self.table(), &actual, &column.name) {
                Some(sql) => {
                    self.exec(sql).await?;
                    live.remove(&actual.to_lowercase());
                    live.insert(column.name.to_lowercase(), column.name.clone());
                }
                None => debug!(
                    table = %self.table(),
                    from = %actual,
                    to = %column.name,
                    "Column rename not supported by dialect"
                ),
            }
        }
        Ok(())
    }

    async fn add_columns(&mut self) -> DbResult<()> {
        let live = self.live_columns().await?;
        let schema = self.schema;
        for column in &schema.columns {
            if self.find_live(&live, &column.name).is_some() {
                continue;
            }
            self.exec(ddl::add_column_sql(self.dialect, self.table(), column))
                .await?;
        }
        Ok(())
    }

    async fn drop_columns(&mut self) -> DbResult<()> {
        let live = self.live_columns().await?;
        let mut desired = HashSet::new();
        for column in &self.schema.columns {
            desired.insert(column.name.to_lowercase());
            desired.insert(canonical_column_key(&column.name));
        }
        for (lower, actual) in &live {
            if desired.contains(lower) || desired.contains(&canonical_column_key(lower)) {
                continue;
            }
            self.exec(ddl::drop_column_sql(self.dialect, self.table(), actual))
                .await?;
        }
        Ok(())
    }

    async fn drop_stale_indexes(&mut self) -> DbResult<()> {
        let desired = desired_indexes(self.table(), &self.schema.indexes);
        let live = introspect::existing_indexes(self.ctx, self.route, self.table()).await?;
        for (key, index) in &live {
            if !desired.contains_key(key) {
                self.exec(ddl::drop_index_sql(self.dialect, self.table(), &index.name))
                    .await?;
            }
        }
        Ok(())
    }

    async fn reconcile_indexes(&mut self) -> DbResult<()> {
        self.drop_stale_indexes().await?;
        let desired = desired_indexes(self.table(), &self.schema.indexes);
        let live = introspect::existing_indexes(self.ctx, self.route, self.table()).await?;
        for (key, index) in &desired {
            if let Some(existing) = live.get(key) {
                if same_index(existing, index) {
                    continue;
                }
                self.exec(ddl::drop_index_sql(self.dialect, self.table(), &existing.name))
                    .await?;
            }
            self.exec(ddl::create_index_sql(self.dialect, self.table(), index))
                .await?;
        }
        Ok(())
    }
}

/// Desired indexes keyed by lowercase name, iterated in that order.
///
/// Blank or invalid names fall back to the default name of the first column;
/// columns are trimmed and deduplicated case-insensitively.
fn desired_indexes(table: &str, indexes: &[IndexDefinition]) -> BTreeMap<String, IndexDefinition> {
    let mut desired = BTreeMap::new();
    for index in indexes {
        let mut columns: Vec<String> = Vec::with_capacity(index.columns.len());
        for column in index.columns.iter().map(|c| c.trim()).filter(|c| !c.is_empty()) {
            if !columns.iter().any(|c| c.eq_ignore_ascii_case(column)) {
                columns.push(column.to_string());
            }
        }
        let Some(first) = columns.first() else {
            continue;
        };

        let mut name = normalize_index_name(&index.name);
        if name.is_empty() || ensure_identifier(&name).is_err() {
            name = default_index_name(table, first, index.unique);
        }
        desired.insert(
            name.to_lowercase(),
            IndexDefinition::new(name, columns, index.unique),
        );
    }
    desired
}

fn same_index(live: &LiveIndex, desired: &IndexDefinition) -> bool {
    live.unique == desired.unique
        && live.columns.len() == desired.columns.len()
        && live
            .columns
            .iter()
            .zip(&desired.columns)
            .all(|(a, b)| a.eq_ignore_ascii_case(b))
}

/// Trim, drop blanks and keep the first occurrence of each statement.
pub fn unique_statements(statements: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    statements
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty() && seen.insert(s.clone()))
        .collect()
}

/// Quoted identifiers are case-sensitive on PostgreSQL, so a case-only
/// difference still renames there.
fn needs_rename(dialect: DatabaseType, actual: &str, desired: &str) -> bool {
    match dialect {
        DatabaseType::PostgreSQL => actual != desired,
        DatabaseType::MySQL | DatabaseType::SQLite => !actual.eq_ignore_ascii_case(desired),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unique_statements() {
        let statements = vec![
            " A ".to_string(),
            "B".to_string(),
            "A".to_string(),
            "".to_string(),
        ];
        assert_eq!(unique_statements(statements), vec!["A", "B"]);
    }

    #[test]
    fn test_desired_indexes_normalization() {
        let indexes = vec![
            IndexDefinition::new("by email", vec![" email ".into(), "EMAIL".into()], true),
            IndexDefinition::new("bad;name", vec!["tenant_id".into()], false),
            IndexDefinition::new("", vec!["status".into()], false),
            IndexDefinition::new("empty", vec![], false),
        ];
        let desired = desired_indexes("Users", &indexes);
        let names: Vec<_> = desired.values().map(|i| i.name.as_str()).collect();
        assert_eq!(names, vec!["by_email", "idx_users_status", "idx_users_tenant_id"]);
        assert_eq!(desired["by_email"].columns, vec!["email"]);
    }

    #[test]
    fn test_same_index() {
        let live = LiveIndex {
            name: "idx".into(),
            columns: vec!["Email".into(), "tenant".into()],
            unique: false,
        };
        let desired = IndexDefinition::new("idx", vec!["email".into(), "TENANT".into()], false);
        assert!(same_index(&live, &desired));
        let reordered = IndexDefinition::new("idx", vec!["tenant".into(), "email".into()], false);
        assert!(!same_index(&live, &reordered));
        let unique = IndexDefinition::new("idx", vec!["email".into(), "tenant".into()], true);
        assert!(!same_index(&live, &unique));
    }

    #[test]
    fn test_validate_rejects_bad_names() {
        let mut schema = TableSchema::new("users");
        assert!(matches!(validate(&schema), Err(DbError::Schema { .. })));
        schema.columns.push(crate::models::ColumnDefinition::new("bad name", "BIGINT"));
        assert!(matches!(validate(&schema), Err(DbError::InvalidIdentifier { .. })));
    }

    #[test]
    fn test_needs_rename() {
        assert!(needs_rename(DatabaseType::PostgreSQL, "Email", "email"));
        assert!(!needs_rename(DatabaseType::PostgreSQL, "email", "email"));
        assert!(!needs_rename(DatabaseType::SQLite, "Email", "email"));
        assert!(!needs_rename(DatabaseType::MySQL, "EMAIL", "email"));
        assert!(needs_rename(DatabaseType::SQLite, "user_name", "UserName"));
    }
}
