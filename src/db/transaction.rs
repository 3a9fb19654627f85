//! Transaction coordination.
//!
//! A transaction is begun on a named pool, wrapped in a [`TxHandle`] and
//! attached to a child [`ExecContext`]. Every statement issued with that
//! context runs on the transaction's connection. A context that already
//! carries a handle reuses it instead of nesting.

use crate::db::context::ExecContext;
use crate::db::pool::ConnectionManager;
use crate::error::{DbError, DbResult};
use crate::models::DatabaseType;
use futures_util::FutureExt;
use sqlx::{MySql, Postgres, Sqlite, Transaction};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, error, info};

/// Database-specific transaction wrapper.
pub enum DbTransaction {
    MySql(Transaction<'static, MySql>),
    Postgres(Transaction<'static, Postgres>),
    SQLite(Transaction<'static, Sqlite>),
}

impl DbTransaction {
    /// Get the database type for this transaction.
    pub fn db_type(&self) -> DatabaseType {
        match self {
            DbTransaction::MySql(_) => DatabaseType::MySQL,
            DbTransaction::Postgres(_) => DatabaseType::PostgreSQL,
            DbTransaction::SQLite(_) => DatabaseType::SQLite,
        }
    }

    /// Commit the transaction.
    pub async fn commit(self) -> DbResult<()> {
        match self {
            DbTransaction::MySql(tx) => tx.commit().await.map_err(DbError::from),
            DbTransaction::Postgres(tx) => tx.commit().await.map_err(DbError::from),
            DbTransaction::SQLite(tx) => tx.commit().await.map_err(DbError::from),
        }
    }

    /// Rollback the transaction.
    pub async fn rollback(self) -> DbResult<()> {
        match self {
            DbTransaction::MySql(tx) => tx.rollback().await.map_err(DbError::from),
            DbTransaction::Postgres(tx) => tx.rollback().await.map_err(DbError::from),
            DbTransaction::SQLite(tx) => tx.rollback().await.map_err(DbError::from),
        }
    }
}

/// Shared handle to an open transaction.
///
/// The inner transaction is taken out on commit or rollback; afterwards the
/// handle reports itself inactive and statements routed through it fail.
#[derive(Clone)]
pub struct TxHandle {
    id: String,
    database: String,
    db_type: DatabaseType,
    inner: Arc<Mutex<Option<DbTransaction>>>,
}

impl TxHandle {
    pub(crate) fn new(database: impl Into<String>, tx: DbTransaction) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            database: database.into(),
            db_type: tx.db_type(),
            inner: Arc::new(Mutex::new(Some(tx))),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Name of the database the transaction was begun on.
    pub fn database(&self) -> &str {
        &self.database
    }

    pub fn db_type(&self) -> DatabaseType {
        self.db_type
    }

    pub async fn is_active(&self) -> bool {
        self.inner.lock().await.is_some()
    }

    /// Lock the transaction for one statement.
    pub(crate) async fn lock(&self) -> DbResult<MutexGuard<'_, Option<DbTransaction>>> {
        let guard = self.inner.lock().await;
        if guard.is_none() {
            return Err(self.inactive());
        }
        Ok(guard)
    }

    async fn take(&self) -> DbResult<DbTransaction> {
        self.inner.lock().await.take().ok_or_else(|| self.inactive())
    }

    pub(crate) async fn commit(&self) -> DbResult<()> {
        self.take().await?.commit().await
    }

    pub(crate) async fn rollback(&self) -> DbResult<()> {
        self.take().await?.rollback().await
    }

    pub(crate) fn inactive(&self) -> DbError {
        DbError::transaction("Transaction is no longer active", self.id.clone())
    }
}

impl std::fmt::Debug for TxHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TxHandle")
            .field("id", &self.id)
            .field("database", &self.database)
            .field("db_type", &self.db_type)
            .finish_non_exhaustive()
    }
}

/// Run `body` inside a transaction on `database` (or the default database).
///
/// When `ctx` already carries a transaction the body runs on it directly.
/// Otherwise a transaction is begun, the body receives a child context bound
/// to it, and the transaction is committed when the body returns `Ok`. An
/// `Err` or a panic rolls it back; the panic is resumed afterwards.
pub async fn run_in_transaction<F, Fut, T, E>(
    manager: &ConnectionManager,
    ctx: &ExecContext,
    database: Option<&str>,
    body: F,
) -> Result<T, E>
where
    F: FnOnce(ExecContext) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: From<DbError>,
{
    if let Some(active) = ctx.transaction() {
        if database.is_some_and(|name| !name.trim().is_empty()) {
            let requested = manager.resolve_name(database).await;
            if requested != active.database() {
                return Err(DbError::transaction(
                    format!(
                        "Cannot start a transaction on '{}' inside a transaction on '{}'",
                        requested,
                        active.database()
                    ),
                    active.id(),
                )
                .into());
            }
        }
        debug!(transaction_id = %active.id(), "Reusing active transaction");
        return body(ctx.clone()).await;
    }

    let name = manager.resolve_name(database).await;
    let pool = manager.get(Some(&name)).await?;
    let tx = ctx.run("begin transaction", pool.begin()).await?;
    let handle = TxHandle::new(name.as_str(), tx);
    debug!(
        transaction_id = %handle.id(),
        database = %name,
        "Transaction started"
    );

    let scoped = ctx.child().with_transaction(handle.clone());
    match AssertUnwindSafe(body(scoped)).catch_unwind().await {
        Ok(Ok(value)) => {
            handle.commit().await?;
            debug!(transaction_id = %handle.id(), "Transaction committed");
            Ok(value)
        }
        Ok(Err(e)) => {
            rollback_logged(&handle).await;
            Err(e)
        }
        Err(panic) => {
            rollback_logged(&handle).await;
            std::panic::resume_unwind(panic)
        }
    }
}

async fn rollback_logged(handle: &TxHandle) {
    match handle.rollback().await {
        Ok(()) => info!(transaction_id = %handle.id(), "Transaction rolled back"),
        Err(e) => error!(
            transaction_id = %handle.id(),
            error = %e,
            "Failed to roll back transaction"
        ),
    }
}
