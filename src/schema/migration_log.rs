//! Dated records of executed DDL.

use crate::error::{DbError, DbResult};
use chrono::Local;
use std::path::{Path, PathBuf};
use tracing::info;

/// Writes `<root>/<database>/<YYYYmmddHHMMSS>_<table>.sql` files.
#[derive(Debug, Clone)]
pub struct MigrationLog {
    root: PathBuf,
}

impl MigrationLog {
    /// Records go under `<data_dir>/migrations`.
    pub fn new(data_dir: impl AsRef<Path>) -> Self {
        Self {
            root: data_dir.as_ref().join("migrations"),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Write one record for `statements`. Nothing is written for an empty list.
    pub async fn record(
        &self,
        database: &str,
        table: &str,
        statements: &[String],
    ) -> DbResult<Option<PathBuf>> {
        if statements.is_empty() {
            return Ok(None);
        }
        let dir = self.root.join(database);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| DbError::io(&dir, e))?;

        let path = dir.join(format!(
            "{}_{}.sql",
            Local::now().format("%Y%m%d%H%M%S"),
            table
        ));
        tokio::fs::write(&path, render(database, table, statements))
            .await
            .map_err(|e| DbError::io(&path, e))?;
        info!(database = %database, table = %table, path = %path.display(), "Migration recorded");
        Ok(Some(path))
    }
}

/// Record body: a two-line header, then one `;`-terminated statement per line.
pub fn render(database: &str, table: &str, statements: &[String]) -> String {
    let mut content = format!(
        "-- Generated by db-schema-orm auto-migrate\n-- Table: {}, Database: {}\n\n",
        table, database
    );
    let body: Vec<String> = statements
        .iter()
        .map(|s| {
            if s.ends_with(';') {
                s.clone()
            } else {
                format!("{};", s)
            }
        })
        .collect();
    content.push_str(&body.join("\n"));
    content.push('\n');
    content
}
