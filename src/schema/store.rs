//! Schema snapshot files.
//!
//! One pretty-printed JSON document per table under the data directory.
//! Reads check a few historical locations; writes go to the first candidate
//! that already records the same table, or `<root>/table/<table>.json`.

use crate::error::{DbError, DbResult};
use crate::models::TableSchema;
use std::collections::HashSet;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const TABLE_DIR: &str = "table";

#[derive(Debug, Clone)]
pub struct SchemaStore {
    root: PathBuf,
}

impl SchemaStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Snapshot locations searched for `table`, in priority order.
    pub fn candidates(&self, table: &str) -> Vec<PathBuf> {
        let lower = table.trim().to_lowercase();
        if lower.is_empty() {
            return Vec::new();
        }
        let table_dir = self.root.join(TABLE_DIR);
        let mut paths = vec![self.root.join(format!("{}.json", lower))];
        if let Some(singular) = lower.strip_suffix('s').filter(|s| !s.is_empty()) {
            paths.push(self.root.join(format!("{}.json", singular)));
        }
        paths.push(table_dir.join(format!("{}.json", lower)));
        if let Some(last) = lower.rsplit('_').next().filter(|s| !s.is_empty()) {
            paths.push(table_dir.join(format!("{}.json", last)));
        }

        let mut seen = HashSet::new();
        paths.retain(|p| seen.insert(p.clone()));
        paths
    }

    /// Where a snapshot for `table` is written.
    ///
    /// An existing candidate is reused only when it records this table;
    /// files belonging to other tables are never overwritten.
    pub async fn preferred_path(&self, table: &str) -> PathBuf {
        for path in self.candidates(table) {
            if let Ok(Some(_)) = self.read_owned(&path, table).await {
                return path;
            }
        }
        self.default_path(table)
    }

    fn default_path(&self, table: &str) -> PathBuf {
        self.root
            .join(TABLE_DIR)
            .join(format!("{}.json", table.trim().to_lowercase()))
    }

    /// The snapshot at `path` if it belongs to `table`.
    ///
    /// A snapshot without a table name belongs to the table its file is
    /// named after.
    async fn read_owned(&self, path: &Path, table: &str) -> DbResult<Option<TableSchema>> {
        let data = match tokio::fs::read_to_string(path).await {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(DbError::io(path, e)),
        };
        let mut schema: TableSchema = serde_json::from_str(&data)?;
        let table = table.trim();
        let recorded = schema.table.trim();
        if recorded.is_empty() {
            let stem = path
                .file_stem()
                .map(|s| s.to_string_lossy().to_lowercase())
                .unwrap_or_default();
            if stem != table.to_lowercase() {
                return Ok(None);
            }
            schema.table = table.to_string();
        } else if !recorded.eq_ignore_ascii_case(table) {
            debug!(
                table = %table,
                recorded = %recorded,
                path = %path.display(),
                "Snapshot belongs to another table, skipped"
            );
            return Ok(None);
        }
        Ok(Some(schema))
    }

    /// Write `schema` unless the stored snapshot already matches it.
    ///
    /// Returns whether the file was written.
    pub async fn persist(&self, schema: &TableSchema) -> DbResult<bool> {
        let path = self.preferred_path(&schema.table).await;
        let content = serde_json::to_string_pretty(schema)?;

        match tokio::fs::read_to_string(&path).await {
            Ok(existing) => {
                if existing.trim() == content.trim() {
                    return Ok(false);
                }
                if let Ok(stored) = serde_json::from_str::<TableSchema>(&existing) {
                    if stored.same_definition(schema) {
                        debug!(table = %schema.table, path = %path.display(), "Snapshot unchanged");
                        return Ok(false);
                    }
                }
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(DbError::io(&path, e)),
        }

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| DbError::io(parent, e))?;
        }
        tokio::fs::write(&path, content)
            .await
            .map_err(|e| DbError::io(&path, e))?;
        info!(table = %schema.table, path = %path.display(), "Schema snapshot written");
        Ok(true)
    }

    /// Read the first existing snapshot recorded for `table`.
    pub async fn load(&self, table: &str) -> DbResult<Option<TableSchema>> {
        for path in self.candidates(table) {
            if let Some(schema) = self.read_owned(&path, table).await? {
                debug!(table = %schema.table, path = %path.display(), "Loaded schema snapshot");
                return Ok(Some(schema));
            }
        }
        Ok(None)
    }

    /// Every recorded snapshot, one per table (case-insensitive), sorted by table.
    pub async fn list_recorded(&self) -> DbResult<Vec<TableSchema>> {
        let mut schemas = Vec::new();
        let mut seen = HashSet::new();
        for dir in [self.root.clone(), self.root.join(TABLE_DIR)] {
            for path in json_files(&dir).await? {
                let data = tokio::fs::read_to_string(&path)
                    .await
                    .map_err(|e| DbError::io(&path, e))?;
                let mut schema: TableSchema = serde_json::from_str(&data)?;
                schema.table = schema.table.trim().to_string();
                if schema.table.is_empty() {
                    schema.table = path
                        .file_stem()
                        .map(|s| s.to_string_lossy().to_lowercase())
                        .unwrap_or_default();
                }
                if seen.insert(schema.table.to_lowercase()) {
                    schemas.push(schema);
                }
            }
        }
        schemas.sort_by_cached_key(|s| s.table.to_lowercase());
        Ok(schemas)
    }
}

/// `*.json` files directly inside `dir`, sorted by name. A missing directory is empty.
async fn json_files(dir: &Path) -> DbResult<Vec<PathBuf>> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(DbError::io(dir, e)),
    };
    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await.map_err(|e| DbError::io(dir, e))? {
        let path = entry.path();
        let is_file = entry.file_type().await.map(|t| t.is_file()).unwrap_or(false);
        if is_file && path.extension().is_some_and(|ext| ext == "json") {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ColumnDefinition;
    use tempfile::TempDir;

    fn schema(table: &str) -> TableSchema {
        let mut schema = TableSchema::new(table);
        schema.columns = vec![ColumnDefinition::new("id", "BIGINT").primary()];
        schema
    }

    #[test]
    fn test_candidates_order() {
        let store = SchemaStore::new("data");
        let paths = store.candidates("Order_Items");
        assert_eq!(
            paths,
            vec![
                PathBuf::from("data/order_items.json"),
                PathBuf::from("data/order_item.json"),
                PathBuf::from("data/table/order_items.json"),
                PathBuf::from("data/table/items.json"),
            ]
        );
        assert!(store.candidates("  ").is_empty());
    }

    #[tokio::test]
    async fn test_persist_then_load() {
        let dir = TempDir::new().unwrap();
        let store = SchemaStore::new(dir.path());
        let original = schema("users");

        assert!(store.persist(&original).await.unwrap());
        assert!(dir.path().join("table/users.json").exists());

        let loaded = store.load("USERS").await.unwrap().unwrap();
        assert!(loaded.same_definition(&original));
    }

    #[tokio::test]
    async fn test_persist_skips_unchanged_content() {
        let dir = TempDir::new().unwrap();
        let store = SchemaStore::new(dir.path());
        let first = schema("users");
        assert!(store.persist(&first).await.unwrap());

        let mut later = first.clone();
        later.updated_at = first.updated_at + chrono::Duration::seconds(60);
        assert!(!store.persist(&later).await.unwrap());

        later.columns.push(ColumnDefinition::new("email", "VARCHAR(255)"));
        assert!(store.persist(&later).await.unwrap());
    }

    #[tokio::test]
    async fn test_persist_reuses_existing_candidate() {
        let dir = TempDir::new().unwrap();
        let store = SchemaStore::new(dir.path());
        let legacy = dir.path().join("user.json");
        std::fs::write(&legacy, serde_json::to_string(&schema("users")).unwrap()).unwrap();

        assert_eq!(store.preferred_path("users").await, legacy);
        let loaded = store.load("users").await.unwrap().unwrap();
        assert_eq!(loaded.table, "users");
    }

    #[tokio::test]
    async fn test_load_missing_table() {
        let dir = TempDir::new().unwrap();
        let store = SchemaStore::new(dir.path());
        assert!(store.load("ghost").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_recorded_dedupes_and_sorts() {
        let dir = TempDir::new().unwrap();
        let store = SchemaStore::new(dir.path());
        store.persist(&schema("users")).await.unwrap();
        store.persist(&schema("accounts")).await.unwrap();
        std::fs::write(
            dir.path().join("USERS.json"),
            serde_json::to_string(&schema("Users")).unwrap(),
        )
        .unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let tables: Vec<_> = store
            .list_recorded()
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.table)
            .collect();
        assert_eq!(tables, vec!["accounts", "Users"]);
    }

    #[tokio::test]
    async fn test_list_recorded_fills_missing_table_name() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("table")).unwrap();
        std::fs::write(
            dir.path().join("table/tags.json"),
            r#"{"columns": [{"name": "id", "type": "BIGINT"}]}"#,
        )
        .unwrap();
        let recorded = SchemaStore::new(dir.path()).list_recorded().await.unwrap();
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0].table, "tags");
    }

    #[tokio::test]
    async fn test_tables_sharing_a_suffix_keep_separate_snapshots() {
        let dir = TempDir::new().unwrap();
        let store = SchemaStore::new(dir.path());
        let items = schema("items");
        let mut order_items = schema("order_items");
        order_items.columns.push(ColumnDefinition::new("order_id", "BIGINT"));

        assert!(store.persist(&items).await.unwrap());
        assert!(store.persist(&order_items).await.unwrap());
        assert!(dir.path().join("table/items.json").exists());
        assert!(dir.path().join("table/order_items.json").exists());

        let fresh = SchemaStore::new(dir.path());
        let loaded = fresh.load("items").await.unwrap().unwrap();
        assert_eq!(loaded.table, "items");
        assert!(loaded.same_definition(&items));
        let loaded = fresh.load("order_items").await.unwrap().unwrap();
        assert!(loaded.same_definition(&order_items));
    }

    #[tokio::test]
    async fn test_foreign_snapshot_is_not_loaded() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("table")).unwrap();
        std::fs::write(
            dir.path().join("table/items.json"),
            serde_json::to_string(&schema("line_items")).unwrap(),
        )
        .unwrap();
        let store = SchemaStore::new(dir.path());
        assert!(store.load("order_items").await.unwrap().is_none());
        assert_eq!(
            store.preferred_path("order_items").await,
            dir.path().join("table/order_items.json")
        );
    }
}
