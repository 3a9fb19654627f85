//! Integration tests for schema reconciliation against SQLite.
//!
//! Tests verify that:
//! - Syncing an unchanged schema is idempotent
//! - Seed rows are inserted only when the table is created
//! - New fields become ADD COLUMN statements
//! - Differently spelled columns are renamed, not dropped and recreated
//! - Recorded snapshots are applied in bulk
//! - Index names containing SQL keywords reconcile cleanly

mod common;

use common::sqlite_orm;
use db_schema_orm::db::executor::{Route, execute, fetch_all};
use db_schema_orm::models::Record;
use db_schema_orm::{
    ConnectionConfig, DbError, ExecContext, Field, FieldKind, ModelSpec, Orm, OrmOptions,
    SchemaDescription,
};
use serde_json::json;

fn users() -> SchemaDescription {
    SchemaDescription::new()
        .field(Field::new("ID", FieldKind::Int).primary_key().auto_increment())
        .field(Field::new("Email", FieldKind::String).size(255).not_null().unique())
}

fn seed(pairs: &[(&str, serde_json::Value)]) -> Record {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

#[tokio::test]
async fn test_sync_is_idempotent_and_adds_new_fields() {
    let (orm, _dir) = sqlite_orm(OrmOptions::default()).await;
    let ctx = ExecContext::new();

    let model = orm
        .model(&ctx, "users", ModelSpec::new().description(users()))
        .await
        .unwrap();
    let first = orm.sync_model(&ctx, &model).await.unwrap();
    assert_eq!(
        first,
        vec![
            "CREATE TABLE IF NOT EXISTS \"users\" (\"id\" INTEGER PRIMARY KEY AUTOINCREMENT, \"email\" TEXT NOT NULL)",
            "CREATE UNIQUE INDEX IF NOT EXISTS \"uidx_users_email\" ON \"users\" (\"email\")",
        ]
    );
    assert!(orm.sync_model(&ctx, &model).await.unwrap().is_empty());

    // Re-register with an extra nullable field and sync the new definition.
    let extended = users().field(Field::parse("Nickname", "Option<String>").unwrap());
    let schema = orm.registry().register("users", &extended).await.unwrap();
    let pool = orm.connections().get(None).await.unwrap();
    let applied = orm
        .synchronizer()
        .sync_table(&ctx, &pool, "default", &schema)
        .await
        .unwrap();
    assert_eq!(
        applied,
        vec!["ALTER TABLE \"users\" ADD COLUMN \"nickname\" TEXT"]
    );
}

#[tokio::test]
async fn test_seed_rows_inserted_once() {
    let (orm, _dir) = sqlite_orm(OrmOptions::default()).await;
    let ctx = ExecContext::new();

    let description = SchemaDescription::new()
        .field(Field::new("ID", FieldKind::Int))
        .field(Field::new("Code", FieldKind::String))
        .seed(seed(&[("id", json!(1)), ("Code", json!("admin"))]))
        .seed(seed(&[("id", json!(2)), ("code", json!("guest")), ("unknown", json!(9))]));
    let model = orm
        .model(&ctx, "roles", ModelSpec::new().description(description))
        .await
        .unwrap();

    let first = orm.sync_model(&ctx, &model).await.unwrap();
    assert_eq!(first.len(), 3);
    assert!(first[1].contains("'admin'"));
    assert!(first[2].contains("'guest'"));

    assert!(orm.sync_model(&ctx, &model).await.unwrap().is_empty());
    let count = model
        .count(&ctx, &Default::default(), &Default::default())
        .await
        .unwrap();
    assert_eq!(count, 2);
}

#[tokio::test]
async fn test_differently_spelled_column_is_renamed() {
    let (orm, _dir) = sqlite_orm(OrmOptions::default()).await;
    let ctx = ExecContext::new();
    let pool = orm.connections().get(None).await.unwrap();

    execute(
        &ctx,
        Route::Pool(&pool),
        "CREATE TABLE \"members\" (\"id\" INTEGER PRIMARY KEY AUTOINCREMENT, \"user_name\" TEXT)",
        &[],
    )
    .await
    .unwrap();
    execute(
        &ctx,
        Route::Pool(&pool),
        "INSERT INTO \"members\" (\"user_name\") VALUES ('ann')",
        &[],
    )
    .await
    .unwrap();

    let description = SchemaDescription::new()
        .field(Field::new("ID", FieldKind::Int))
        .field(Field::new("UserName", FieldKind::String).column("username").nullable());
    let schema = orm.registry().register("members", &description).await.unwrap();

    let applied = orm
        .synchronizer()
        .sync_table(&ctx, &pool, "default", &schema)
        .await
        .unwrap();
    assert_eq!(
        applied,
        vec!["ALTER TABLE \"members\" RENAME COLUMN \"user_name\" TO \"username\""]
    );

    let rows = fetch_all(&ctx, Route::Pool(&pool), "SELECT username FROM members", &[])
        .await
        .unwrap();
    assert_eq!(rows[0]["username"], "ann");
}

#[tokio::test]
async fn test_canonical_collision_adds_without_renaming() {
    let (orm, _dir) = sqlite_orm(OrmOptions::default()).await;
    let ctx = ExecContext::new();
    let pool = orm.connections().get(None).await.unwrap();

    execute(
        &ctx,
        Route::Pool(&pool),
        "CREATE TABLE \"accounts\" (\"id\" INTEGER PRIMARY KEY AUTOINCREMENT, \"user_name\" TEXT)",
        &[],
    )
    .await
    .unwrap();

    let description = SchemaDescription::new()
        .field(Field::new("ID", FieldKind::Int))
        .field(Field::new("UserName", FieldKind::String).nullable())
        .field(Field::new("Login", FieldKind::String).column("username").nullable());
    let schema = orm.registry().register("accounts", &description).await.unwrap();

    let applied = orm
        .synchronizer()
        .sync_table(&ctx, &pool, "default", &schema)
        .await
        .unwrap();
    assert_eq!(
        applied,
        vec!["ALTER TABLE \"accounts\" ADD COLUMN \"username\" TEXT"]
    );
    assert!(orm
        .synchronizer()
        .sync_table(&ctx, &pool, "default", &schema)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_removed_field_and_index_are_dropped() {
    let (orm, _dir) = sqlite_orm(OrmOptions::default()).await;
    let ctx = ExecContext::new();
    let pool = orm.connections().get(None).await.unwrap();

    let before = users().field(Field::parse("Legacy", "Option<String>").unwrap().index(None));
    let schema = orm.registry().register("users", &before).await.unwrap();
    orm.synchronizer()
        .sync_table(&ctx, &pool, "default", &schema)
        .await
        .unwrap();

    let schema = orm.registry().register("users", &users()).await.unwrap();
    let applied = orm
        .synchronizer()
        .sync_table(&ctx, &pool, "default", &schema)
        .await
        .unwrap();
    assert_eq!(
        applied,
        vec![
            "DROP INDEX IF EXISTS \"idx_users_legacy\"",
            "ALTER TABLE \"users\" DROP COLUMN \"legacy\"",
        ]
    );
}

#[tokio::test]
async fn test_apply_recorded_schemas() {
    let (orm, dir) = sqlite_orm(OrmOptions::default()).await;
    let ctx = ExecContext::new();

    orm.registry().register("users", &users()).await.unwrap();
    assert!(dir.path().join("data").join("table").join("users.json").exists());

    let applied = orm.apply_recorded_schemas(&ctx, None).await.unwrap();
    assert_eq!(applied.len(), 2);
    assert!(applied[0].starts_with("CREATE TABLE IF NOT EXISTS \"users\""));

    assert!(orm.apply_recorded_schemas(&ctx, None).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_migration_log_written() {
    let (orm, dir) = sqlite_orm(OrmOptions::default().with_migration_log(true)).await;
    let ctx = ExecContext::new();

    let model = orm
        .model(&ctx, "users", ModelSpec::new().description(users()))
        .await
        .unwrap();
    orm.sync_model(&ctx, &model).await.unwrap();

    let log_dir = dir.path().join("data").join("migrations").join("default");
    let entries: Vec<_> = std::fs::read_dir(&log_dir).unwrap().collect();
    assert_eq!(entries.len(), 1);
    let path = entries[0].as_ref().unwrap().path();
    assert!(path.to_string_lossy().ends_with("_users.sql"));
    let content = std::fs::read_to_string(path).unwrap();
    assert!(content.contains("CREATE TABLE IF NOT EXISTS \"users\""));
}

#[tokio::test]
async fn test_invalid_identifier_rejected_before_execution() {
    let (orm, _dir) = sqlite_orm(OrmOptions::default()).await;
    let ctx = ExecContext::new();
    let pool = orm.connections().get(None).await.unwrap();

    let mut schema = users().build("users").unwrap();
    schema.columns[1].name = "email; DROP TABLE users".to_string();
    let result = orm
        .synchronizer()
        .sync_table(&ctx, &pool, "default", &schema)
        .await;
    assert!(matches!(result, Err(DbError::InvalidIdentifier { .. })));
}

#[tokio::test]
async fn test_keyword_named_index_is_stable() {
    let (orm, _dir) = sqlite_orm(OrmOptions::default()).await;
    let ctx = ExecContext::new();

    let description = SchemaDescription::new()
        .field(Field::new("ID", FieldKind::Int).primary_key().auto_increment())
        .field(Field::new("UniqueCode", FieldKind::String).index(None))
        .field(Field::new("Code", FieldKind::String).unique());
    let model = orm
        .model(&ctx, "coupons", ModelSpec::new().description(description))
        .await
        .unwrap();

    let first = orm.sync_model(&ctx, &model).await.unwrap();
    assert!(first.contains(
        &"CREATE INDEX IF NOT EXISTS \"idx_coupons_unique_code\" ON \"coupons\" (\"unique_code\")"
            .to_string()
    ));
    assert!(first.contains(
        &"CREATE UNIQUE INDEX IF NOT EXISTS \"uidx_coupons_code\" ON \"coupons\" (\"code\")"
            .to_string()
    ));
    assert!(orm.sync_model(&ctx, &model).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_snapshots_sharing_a_suffix_reload_separately() {
    let (orm, dir) = sqlite_orm(OrmOptions::default()).await;
    let ctx = ExecContext::new();

    let items = SchemaDescription::new()
        .field(Field::new("ID", FieldKind::Int).primary_key().auto_increment())
        .field(Field::new("Name", FieldKind::String));
    let order_items = SchemaDescription::new()
        .field(Field::new("ID", FieldKind::Int).primary_key().auto_increment())
        .field(Field::new("OrderID", FieldKind::Int));
    orm.registry().register("items", &items).await.unwrap();
    orm.registry().register("order_items", &order_items).await.unwrap();
    orm.close().await.unwrap();

    let fresh = Orm::new(OrmOptions::default().with_data_dir(dir.path().join("data")));
    fresh
        .connect(
            &ctx,
            "default",
            ConnectionConfig::sqlite(dir.path().join("test.db").to_string_lossy()),
        )
        .await
        .unwrap();

    let loaded = fresh.registry().load("items").await.unwrap().unwrap();
    assert_eq!(loaded.table, "items");
    assert!(loaded.columns.iter().any(|c| c.name == "name"));
    let loaded = fresh.registry().load("order_items").await.unwrap().unwrap();
    assert_eq!(loaded.table, "order_items");
    assert!(loaded.columns.iter().any(|c| c.name == "order_id"));

    let applied = fresh.apply_recorded_schemas(&ctx, None).await.unwrap();
    assert_eq!(applied.len(), 2);
    assert!(applied[0].starts_with("CREATE TABLE IF NOT EXISTS \"items\""));
    assert!(applied[1].starts_with("CREATE TABLE IF NOT EXISTS \"order_items\""));
}
