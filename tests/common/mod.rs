//! Shared setup for integration tests.

#![allow(dead_code)]

use db_schema_orm::{ConnectionConfig, ExecContext, Orm, OrmOptions};
use tempfile::TempDir;

/// An engine on a fresh SQLite file; the directory also holds snapshots.
pub async fn sqlite_orm(options: OrmOptions) -> (Orm, TempDir) {
    let dir = TempDir::new().unwrap();
    let options = options.with_data_dir(dir.path().join("data"));
    let orm = Orm::new(options);
    let db_path = dir.path().join("test.db");
    orm.connect(
        &ExecContext::new(),
        "default",
        ConnectionConfig::sqlite(db_path.to_string_lossy()),
    )
    .await
    .unwrap();
    (orm, dir)
}
