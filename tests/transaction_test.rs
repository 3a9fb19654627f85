//! Integration tests for scoped transactions.
//!
//! Tests verify that:
//! - A body returning Ok commits its writes
//! - A body returning Err or panicking rolls back
//! - Nested scopes reuse the outer transaction
//! - Statements for another database are refused inside a transaction

mod common;

use common::sqlite_orm;
use db_schema_orm::{
    ConnectionConfig, DbError, ExecContext, Field, FieldKind, Filter, Model, ModelSpec, Orm,
    OrmOptions, SchemaDescription, SelectOptions, Values,
};
use futures_util::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tempfile::TempDir;

fn ledger() -> SchemaDescription {
    SchemaDescription::new()
        .field(Field::new("ID", FieldKind::Int))
        .field(Field::new("Memo", FieldKind::String))
}

async fn setup() -> (Orm, Arc<Model>, TempDir) {
    let (orm, dir) = sqlite_orm(OrmOptions::default().with_auto_migrate(true)).await;
    let model = orm
        .model(&ExecContext::new(), "ledger", ModelSpec::new().description(ledger()))
        .await
        .unwrap();
    (orm, model, dir)
}

async fn rows(model: &Model) -> i64 {
    model
        .count(&ExecContext::new(), &Filter::none(), &SelectOptions::new())
        .await
        .unwrap()
}

#[tokio::test]
async fn test_commit_on_success() {
    let (orm, model, _dir) = setup().await;
    let ctx = ExecContext::new();

    let m = model.clone();
    let id = orm
        .transaction(&ctx, None, |tx| async move {
            assert!(tx.transaction().is_some());
            let id = m.insert(&tx, Values::new().set("memo", "first")).await?;
            m.update(&tx, &Filter::eq("id", id), Values::new().set("memo", "edited"))
                .await?;
            Ok::<_, DbError>(id)
        })
        .await
        .unwrap();

    assert_eq!(id, 1);
    assert_eq!(rows(&model).await, 1);
    let row = model
        .find(&ctx, &Filter::eq("id", 1), &SelectOptions::new())
        .await
        .unwrap();
    assert_eq!(row["memo"], "edited");
}

#[tokio::test]
async fn test_rollback_on_error() {
    let (orm, model, _dir) = setup().await;
    let ctx = ExecContext::new();

    let m = model.clone();
    let result: Result<(), DbError> = orm
        .transaction(&ctx, None, |tx| async move {
            m.insert(&tx, Values::new().set("memo", "lost")).await?;
            Err(DbError::invalid_input("abort"))
        })
        .await;

    assert!(matches!(result, Err(DbError::InvalidInput { .. })));
    assert_eq!(rows(&model).await, 0);
}

#[tokio::test]
async fn test_rollback_on_panic() {
    let (orm, model, _dir) = setup().await;
    let ctx = ExecContext::new();

    let m = model.clone();
    let outcome = AssertUnwindSafe(orm.transaction(&ctx, None, |tx| async move {
        m.insert(&tx, Values::new().set("memo", "lost")).await?;
        if m.table() == "ledger" {
            panic!("boom");
        }
        Ok::<_, DbError>(())
    }))
    .catch_unwind()
    .await;

    assert!(outcome.is_err());
    assert_eq!(rows(&model).await, 0);
}

#[tokio::test]
async fn test_nested_scope_reuses_transaction() {
    let (orm, model, _dir) = setup().await;
    let ctx = ExecContext::new();
    let orm_ref = &orm;

    let m = model.clone();
    let result: Result<(), DbError> = orm
        .transaction(&ctx, None, |outer| async move {
            let outer_id = outer.transaction().map(|t| t.id().to_string());
            let inner_model = m.clone();
            orm_ref
                .transaction(&outer, Some("default"), |inner| async move {
                    assert_eq!(inner.transaction().map(|t| t.id().to_string()), outer_id);
                    inner_model
                        .insert(&inner, Values::new().set("memo", "inner"))
                        .await?;
                    Ok::<_, DbError>(())
                })
                .await?;
            m.insert(&outer, Values::new().set("memo", "outer")).await?;
            Err(DbError::invalid_input("undo both"))
        })
        .await;

    assert!(result.is_err());
    assert_eq!(rows(&model).await, 0);
}

#[tokio::test]
async fn test_other_database_refused_inside_transaction() {
    let (orm, _model, dir) = setup().await;
    let ctx = ExecContext::new();
    orm.connect(
        &ctx,
        "archive",
        ConnectionConfig::sqlite(dir.path().join("archive.db").to_string_lossy()),
    )
    .await
    .unwrap();
    let archive = orm
        .model(&ctx, "ledger", ModelSpec::new().database("archive"))
        .await
        .unwrap();

    let result: Result<(), DbError> = orm
        .transaction(&ctx, None, |tx| async move {
            archive.insert(&tx, Values::new().set("memo", "x")).await?;
            Ok(())
        })
        .await;
    assert!(matches!(result, Err(DbError::Transaction { .. })));

    let nested: Result<(), DbError> = orm
        .transaction(&ctx, None, |tx| {
            let orm = &orm;
            async move { orm.transaction(&tx, Some("archive"), |_| async { Ok(()) }).await }
        })
        .await;
    assert!(matches!(nested, Err(DbError::Transaction { .. })));
}

#[tokio::test]
async fn test_cancelled_context_aborts_operations() {
    let (_orm, model, _dir) = setup().await;
    let ctx = ExecContext::new();
    ctx.cancel();
    let result = model
        .select(&ctx, &Filter::none(), &SelectOptions::new())
        .await;
    assert!(matches!(result, Err(DbError::Cancelled { .. })));
}
