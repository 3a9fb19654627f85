//! Statement execution.
//!
//! Statements are routed either through a pool or through the transaction
//! attached to the caller's context. Every call is bounded by the context's
//! cancellation token and deadline.
//!
//! # Architecture
//!
//! The executor uses database-specific implementations organized in submodules:
//! - `mysql`: MySQL-specific query and write operations
//! - `postgres`: PostgreSQL-specific query and write operations
//! - `sqlite`: SQLite-specific query and write operations
//!
//! Each submodule works on a bare connection, so the same code serves pooled
//! connections and open transactions.

use crate::db::context::ExecContext;
use crate::db::dialect::rebind;
use crate::db::pool::DbPool;
use crate::db::transaction::{DbTransaction, TxHandle};
use crate::db::types::RowToJson;
use crate::error::{DbError, DbResult};
use crate::models::{DatabaseType, ExecResult, Record, SqlValue};
use tracing::debug;

/// Where a statement runs.
#[derive(Debug, Clone, Copy)]
pub enum Route<'a> {
    Pool(&'a DbPool),
    Tx(&'a TxHandle),
}

impl<'a> Route<'a> {
    /// Use the context's transaction when present, otherwise `pool`.
    ///
    /// A transaction begun on another database is an error rather than a
    /// silent fallback to the pool.
    pub fn resolve(ctx: &'a ExecContext, pool: &'a DbPool, database: &str) -> DbResult<Self> {
        match ctx.transaction() {
            Some(tx) if tx.database() == database => Ok(Route::Tx(tx)),
            Some(tx) => Err(DbError::transaction(
                format!(
                    "Statement for database '{}' issued inside a transaction on '{}'",
                    database,
                    tx.database()
                ),
                tx.id(),
            )),
            None => Ok(Route::Pool(pool)),
        }
    }

    pub fn db_type(&self) -> DatabaseType {
        match self {
            Route::Pool(pool) => pool.db_type(),
            Route::Tx(tx) => tx.db_type(),
        }
    }
}

/// Run a query and decode every row.
pub async fn fetch_all(
    ctx: &ExecContext,
    route: Route<'_>,
    sql: &str,
    params: &[SqlValue],
) -> DbResult<Vec<Record>> {
    let sql = rebind(route.db_type(), sql);
    debug!(statement = %sql, params = params.len(), "Executing query");

    ctx.run("query execution", async {
        match route {
            Route::Pool(DbPool::MySql(p)) => {
                let mut conn = p.acquire().await?;
                mysql::fetch_all(&mut conn, &sql, params).await
            }
            Route::Pool(DbPool::Postgres(p)) => {
                let mut conn = p.acquire().await?;
                postgres::fetch_all(&mut conn, &sql, params).await
            }
            Route::Pool(DbPool::SQLite(p)) => {
                let mut conn = p.acquire().await?;
                sqlite::fetch_all(&mut conn, &sql, params).await
            }
            Route::Tx(handle) => {
                let mut guard = handle.lock().await?;
                match guard.as_mut() {
                    Some(DbTransaction::MySql(tx)) => mysql::fetch_all(&mut **tx, &sql, params).await,
                    Some(DbTransaction::Postgres(tx)) => {
                        postgres::fetch_all(&mut **tx, &sql, params).await
                    }
                    Some(DbTransaction::SQLite(tx)) => {
                        sqlite::fetch_all(&mut **tx, &sql, params).await
                    }
                    None => Err(handle.inactive()),
                }
            }
        }
    })
    .await
}

/// Run a statement that returns no rows.
///
/// Without parameters the text is sent unprepared, which DDL on some
/// servers requires.
pub async fn execute(
    ctx: &ExecContext,
    route: Route<'_>,
    sql: &str,
    params: &[SqlValue],
) -> DbResult<ExecResult> {
    let sql = rebind(route.db_type(), sql);
    debug!(statement = %sql, params = params.len(), "Executing statement");

    ctx.run("statement execution", async {
        match route {
            Route::Pool(DbPool::MySql(p)) => {
                let mut conn = p.acquire().await?;
                mysql::execute(&mut conn, &sql, params).await
            }
            Route::Pool(DbPool::Postgres(p)) => {
                let mut conn = p.acquire().await?;
                postgres::execute(&mut conn, &sql, params).await
            }
            Route::Pool(DbPool::SQLite(p)) => {
                let mut conn = p.acquire().await?;
                sqlite::execute(&mut conn, &sql, params).await
            }
            Route::Tx(handle) => {
                let mut guard = handle.lock().await?;
                match guard.as_mut() {
                    Some(DbTransaction::MySql(tx)) => mysql::execute(&mut **tx, &sql, params).await,
                    Some(DbTransaction::Postgres(tx)) => {
                        postgres::execute(&mut **tx, &sql, params).await
                    }
                    Some(DbTransaction::SQLite(tx)) => {
                        sqlite::execute(&mut **tx, &sql, params).await
                    }
                    None => Err(handle.inactive()),
                }
            }
        }
    })
    .await
}

// =============================================================================
// Database-Specific Implementations
// =============================================================================
//
// Each module below provides the same interface adapted to its database type.
// The code structure is intentionally parallel to make differences obvious.

mod mysql {
    use super::*;
    use crate::db::params::bind_mysql_param;
    use sqlx::{Executor, MySqlConnection};

    pub async fn fetch_all(
        conn: &mut MySqlConnection,
        sql: &str,
        params: &[SqlValue],
    ) -> DbResult<Vec<Record>> {
        let mut query = sqlx::query(sql);
        for param in params {
            query = bind_mysql_param(query, param);
        }
        let rows = query.fetch_all(&mut *conn).await?;
        Ok(rows.iter().map(RowToJson::to_json_map).collect())
    }

    pub async fn execute(
        conn: &mut MySqlConnection,
        sql: &str,
        params: &[SqlValue],
    ) -> DbResult<ExecResult> {
        let result = if params.is_empty() {
            (&mut *conn).execute(sql).await?
        } else {
            let mut query = sqlx::query(sql);
            for param in params {
                query = bind_mysql_param(query, param);
            }
            query.execute(&mut *conn).await?
        };
        Ok(ExecResult {
            rows_affected: result.rows_affected(),
            last_insert_id: i64::try_from(result.last_insert_id())
                .ok()
                .filter(|id| *id > 0),
        })
    }
}

mod postgres {
    use super::*;
    use crate::db::params::bind_postgres_param;
    use sqlx::{Executor, PgConnection};

    pub async fn fetch_all(
        conn: &mut PgConnection,
        sql: &str,
        params: &[SqlValue],
    ) -> DbResult<Vec<Record>> {
        let mut query = sqlx::query(sql);
        for param in params {
            query = bind_postgres_param(query, param);
        }
        let rows = query.fetch_all(&mut *conn).await?;
        Ok(rows.iter().map(RowToJson::to_json_map).collect())
    }

    /// PostgreSQL reports no generated key; inserts use `RETURNING` instead.
    pub async fn execute(
        conn: &mut PgConnection,
        sql: &str,
        params: &[SqlValue],
    ) -> DbResult<ExecResult> {
        let result = if params.is_empty() {
            (&mut *conn).execute(sql).await?
        } else {
            let mut query = sqlx::query(sql);
            for param in params {
                query = bind_postgres_param(query, param);
            }
            query.execute(&mut *conn).await?
        };
        Ok(ExecResult {
            rows_affected: result.rows_affected(),
            last_insert_id: None,
        })
    }
}

mod sqlite {
    use super::*;
    use crate::db::params::bind_sqlite_param;
    use sqlx::{Executor, SqliteConnection};

    pub async fn fetch_all(
        conn: &mut SqliteConnection,
        sql: &str,
        params: &[SqlValue],
    ) -> DbResult<Vec<Record>> {
        let mut query = sqlx::query(sql);
        for param in params {
            query = bind_sqlite_param(query, param);
        }
        let rows = query.fetch_all(&mut *conn).await?;
        Ok(rows.iter().map(RowToJson::to_json_map).collect())
    }

    pub async fn execute(
        conn: &mut SqliteConnection,
        sql: &str,
        params: &[SqlValue],
    ) -> DbResult<ExecResult> {
        let result = if params.is_empty() {
            (&mut *conn).execute(sql).await?
        } else {
            let mut query = sqlx::query(sql);
            for param in params {
                query = bind_sqlite_param(query, param);
            }
            query.execute(&mut *conn).await?
        };
        Ok(ExecResult {
            rows_affected: result.rows_affected(),
            last_insert_id: Some(result.last_insert_rowid()).filter(|id| *id > 0),
        })
    }
}
