//! Live schema introspection.
//!
//! This module reads table, column and index metadata back from SQLite,
//! PostgreSQL and MySQL so the synchronizer can diff it against a desired
//! schema.
//!
//! # Architecture
//!
//! SQL queries are organized in the `queries` submodule with constants for each
//! database type. Results come back through the executor as JSON rows, so the
//! same code works on a pool and inside a transaction.

use crate::db::context::ExecContext;
use crate::db::dialect::{ensure_identifier, quote_identifier};
use crate::db::executor::{Route, fetch_all};
use crate::error::DbResult;
use crate::models::{DatabaseType, Record, SqlValue};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use tracing::debug;

/// An index as it exists in the database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveIndex {
    pub name: String,
    pub columns: Vec<String>,
    pub unique: bool,
}

// =============================================================================
// SQL Query Templates
// =============================================================================

mod queries {
    pub mod postgres {
        pub const TABLE_EXISTS: &str = "SELECT COUNT(*) AS n FROM information_schema.tables \
             WHERE table_schema = current_schema() AND table_name = ?";
        pub const COLUMNS: &str = "SELECT column_name AS name FROM information_schema.columns \
             WHERE table_schema = current_schema() AND table_name = ? ORDER BY ordinal_position";
        pub const INDEXES: &str = "SELECT indexname AS name, indexdef AS def FROM pg_indexes \
             WHERE schemaname = current_schema() AND tablename = ?";
    }

    pub mod mysql {
        pub const TABLE_EXISTS: &str = "SELECT COUNT(*) AS n FROM information_schema.tables \
             WHERE table_schema = DATABASE() AND table_name = ?";
        pub const COLUMNS: &str = "SELECT column_name AS name FROM information_schema.columns \
             WHERE table_schema = DATABASE() AND table_name = ? ORDER BY ordinal_position";
        pub const INDEXES: &str = "SELECT index_name AS name, non_unique AS non_unique, \
             column_name AS column_name, seq_in_index AS seq FROM information_schema.statistics \
             WHERE table_schema = DATABASE() AND table_name = ? ORDER BY index_name, seq_in_index";
    }

    pub mod sqlite {
        pub const TABLE_EXISTS: &str =
            "SELECT COUNT(*) AS n FROM sqlite_master WHERE type = 'table' AND name = ?";
    }
}

/// Whether `table` exists in the current schema.
pub async fn table_exists(ctx: &ExecContext, route: Route<'_>, table: &str) -> DbResult<bool> {
    ensure_identifier(table)?;
    let query = match route.db_type() {
        DatabaseType::PostgreSQL => queries::postgres::TABLE_EXISTS,
        DatabaseType::MySQL => queries::mysql::TABLE_EXISTS,
        DatabaseType::SQLite => queries::sqlite::TABLE_EXISTS,
    };
    let rows = fetch_all(ctx, route, query, &[SqlValue::from(table)]).await?;
    let count = rows.first().map(|r| int_field(r, "n")).unwrap_or(0);
    Ok(count > 0)
}

/// Live columns keyed by lowercase name, mapped to their exact spelling.
pub async fn existing_columns(
    ctx: &ExecContext,
    route: Route<'_>,
    table: &str,
) -> DbResult<BTreeMap<String, String>> {
    ensure_identifier(table)?;
    let dialect = route.db_type();
    let rows = match dialect {
        DatabaseType::PostgreSQL => {
            fetch_all(ctx, route, queries::postgres::COLUMNS, &[table.into()]).await?
        }
        DatabaseType::MySQL => {
            fetch_all(ctx, route, queries::mysql::COLUMNS, &[table.into()]).await?
        }
        DatabaseType::SQLite => {
            let sql = format!("PRAGMA table_info({})", quote_identifier(dialect, table));
            fetch_all(ctx, route, &sql, &[]).await?
        }
    };

    Ok(rows
        .iter()
        .filter_map(|r| str_field(r, "name"))
        .map(|name| (name.to_lowercase(), name))
        .collect())
}

/// Secondary indexes keyed by lowercase name. Primary-key indexes are left out.
pub async fn existing_indexes(
    ctx: &ExecContext,
    route: Route<'_>,
    table: &str,
) -> DbResult<BTreeMap<String, LiveIndex>> {
    ensure_identifier(table)?;
    let indexes = match route.db_type() {
        DatabaseType::PostgreSQL => postgres_indexes(ctx, route, table).await?,
        DatabaseType::MySQL => mysql_indexes(ctx, route, table).await?,
        DatabaseType::SQLite => sqlite_indexes(ctx, route, table).await?,
    };
    debug!(table = %table, count = indexes.len(), "Loaded live indexes");
    Ok(indexes)
}

async fn postgres_indexes(
    ctx: &ExecContext,
    route: Route<'_>,
    table: &str,
) -> DbResult<BTreeMap<String, LiveIndex>> {
    let rows = fetch_all(ctx, route, queries::postgres::INDEXES, &[table.into()]).await?;
    let mut result = BTreeMap::new();
    for row in &rows {
        let (Some(name), Some(def)) = (str_field(row, "name"), str_field(row, "def")) else {
            continue;
        };
        let lower = name.to_lowercase();
        if lower == "primary" || lower.ends_with("_pkey") {
            continue;
        }
        let (columns, unique) = parse_postgres_index_def(&def);
        result.insert(
            lower,
            LiveIndex {
                name,
                columns,
                unique,
            },
        );
    }
    Ok(result)
}

async fn mysql_indexes(
    ctx: &ExecContext,
    route: Route<'_>,
    table: &str,
) -> DbResult<BTreeMap<String, LiveIndex>> {
    let rows = fetch_all(ctx, route, queries::mysql::INDEXES, &[table.into()]).await?;
    let mut result: BTreeMap<String, LiveIndex> = BTreeMap::new();
    for row in &rows {
        let Some(name) = str_field(row, "name").filter(|n| !n.trim().is_empty()) else {
            continue;
        };
        if name.eq_ignore_ascii_case("primary") {
            continue;
        }
        let Some(column) = str_field(row, "column_name") else {
            continue;
        };
        let unique = int_field(row, "non_unique") == 0;
        let entry = result
            .entry(name.to_lowercase())
            .or_insert_with(|| LiveIndex {
                name: name.clone(),
                columns: Vec::new(),
                unique,
            });
        entry.unique = unique;
        entry.columns.push(column);
    }
    Ok(result)
}

async fn sqlite_indexes(
    ctx: &ExecContext,
    route: Route<'_>,
    table: &str,
) -> DbResult<BTreeMap<String, LiveIndex>> {
    let dialect = DatabaseType::SQLite;
    let sql = format!("PRAGMA index_list({})", quote_identifier(dialect, table));
    let rows = fetch_all(ctx, route, &sql, &[]).await?;

    let mut result = BTreeMap::new();
    for row in &rows {
        let Some(name) = str_field(row, "name") else {
            continue;
        };
        // Constraint-backed indexes cannot be dropped on their own.
        let origin = str_field(row, "origin").unwrap_or_default();
        if origin == "pk" || name.starts_with("sqlite_autoindex_") {
            continue;
        }
        let unique = int_field(row, "unique") == 1;

        let info_sql = format!("PRAGMA index_info({})", quote_identifier(dialect, &name));
        let mut info = fetch_all(ctx, route, &info_sql, &[]).await?;
        info.sort_by_key(|r| int_field(r, "seqno"));
        let columns = info.iter().filter_map(|r| str_field(r, "name")).collect();

        result.insert(
            name.to_lowercase(),
            LiveIndex {
                name,
                columns,
                unique,
            },
        );
    }
    Ok(result)
}

/// Pull the column list and uniqueness out of a `pg_indexes.indexdef` string.
pub fn parse_postgres_index_def(definition: &str) -> (Vec<String>, bool) {
    let unique = definition
        .trim_start()
        .get(..19)
        .is_some_and(|prefix| prefix.eq_ignore_ascii_case("CREATE UNIQUE INDEX"));
    let (Some(start), Some(end)) = (definition.find('('), definition.rfind(')')) else {
        return (Vec::new(), unique);
    };
    if end <= start {
        return (Vec::new(), unique);
    }
    let columns = definition[start + 1..end]
        .split(',')
        .filter_map(|part| part.split_whitespace().next())
        .map(|name| name.trim_matches('"').to_string())
        .filter(|name| !name.is_empty())
        .collect();
    (columns, unique)
}

fn str_field(row: &Record, key: &str) -> Option<String> {
    lookup(row, key).and_then(|v| match v {
        JsonValue::String(s) => Some(s.clone()),
        JsonValue::Null => None,
        other => Some(other.to_string()),
    })
}

fn int_field(row: &Record, key: &str) -> i64 {
    match lookup(row, key) {
        Some(JsonValue::Number(n)) => n.as_i64().unwrap_or_default(),
        Some(JsonValue::Bool(b)) => i64::from(*b),
        Some(JsonValue::String(s)) => s.trim().parse().unwrap_or_default(),
        _ => 0,
    }
}

/// MySQL may report information_schema aliases in upper case.
fn lookup<'a>(row: &'a Record, key: &str) -> Option<&'a JsonValue> {
    row.get(key).or_else(|| {
        row.iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::executor::execute;
    use crate::db::pool::DbPool;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn memory_pool() -> DbPool {
        DbPool::SQLite(
            SqlitePoolOptions::new()
                .max_connections(1)
                .connect("sqlite::memory:")
                .await
                .unwrap(),
        )
    }

    #[test]
    fn test_parse_postgres_index_def() {
        let (cols, unique) = parse_postgres_index_def(
            "CREATE UNIQUE INDEX uidx_users_email ON public.users USING btree (email)",
        );
        assert_eq!(cols, vec!["email"]);
        assert!(unique);

        let (cols, unique) = parse_postgres_index_def(
            "CREATE INDEX idx_orders ON public.orders USING btree (\"userId\", created_at DESC)",
        );
        assert_eq!(cols, vec!["userId", "created_at"]);
        assert!(!unique);

        let (cols, unique) = parse_postgres_index_def(
            "CREATE INDEX idx_t_unique_code ON public.t USING btree (unique_code)",
        );
        assert_eq!(cols, vec!["unique_code"]);
        assert!(!unique);

        let (_, unique) =
            parse_postgres_index_def("  create unique index \"Uniq\" ON public.t USING btree (a)");
        assert!(unique);

        assert_eq!(parse_postgres_index_def("garbage"), (Vec::new(), false));
    }

    #[tokio::test]
    async fn test_sqlite_introspection() {
        let pool = memory_pool().await;
        let ctx = ExecContext::new();
        let route = Route::Pool(&pool);

        assert!(!table_exists(&ctx, route, "users").await.unwrap());

        execute(
            &ctx,
            route,
            "CREATE TABLE \"users\" (\"id\" INTEGER PRIMARY KEY AUTOINCREMENT, \"UserName\" TEXT, \"email\" TEXT)",
            &[],
        )
        .await
        .unwrap();
        execute(
            &ctx,
            route,
            "CREATE UNIQUE INDEX \"uidx_users_email\" ON \"users\" (\"email\", \"UserName\")",
            &[],
        )
        .await
        .unwrap();

        assert!(table_exists(&ctx, route, "users").await.unwrap());

        let columns = existing_columns(&ctx, route, "users").await.unwrap();
        assert_eq!(columns.get("username").map(String::as_str), Some("UserName"));
        assert_eq!(columns.len(), 3);

        let indexes = existing_indexes(&ctx, route, "users").await.unwrap();
        let index = indexes.get("uidx_users_email").unwrap();
        assert!(index.unique);
        assert_eq!(index.columns, vec!["email", "UserName"]);
    }

    #[tokio::test]
    async fn test_invalid_table_name_rejected() {
        let pool = memory_pool().await;
        let ctx = ExecContext::new();
        let result = table_exists(&ctx, Route::Pool(&pool), "users; DROP").await;
        assert!(matches!(
            result,
            Err(crate::error::DbError::InvalidIdentifier { .. })
        ));
    }
}
