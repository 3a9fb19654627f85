//! In-memory registry of table schemas.
//!
//! Schemas are keyed by lowercase table name. Lookups take a read lock;
//! registration takes the write lock only to swap the entry in.
//! [`SchemaRegistry::register_once`] additionally runs the derivation at most
//! once per table, so concurrent first users wait on a single build.

use crate::error::{DbError, DbResult};
use crate::models::TableSchema;
use crate::schema::description::SchemaDescription;
use crate::schema::store::SchemaStore;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OnceCell, RwLock};
use tracing::{debug, info};

type Guard = Arc<OnceCell<Arc<TableSchema>>>;

#[derive(Debug)]
pub struct SchemaRegistry {
    schemas: RwLock<HashMap<String, Arc<TableSchema>>>,
    guards: Mutex<HashMap<String, Guard>>,
    store: SchemaStore,
    persist: bool,
}

impl SchemaRegistry {
    /// Create a registry backed by `store`; snapshots are written only when
    /// `persist` is set.
    pub fn new(store: SchemaStore, persist: bool) -> Self {
        Self {
            schemas: RwLock::new(HashMap::new()),
            guards: Mutex::new(HashMap::new()),
            store,
            persist,
        }
    }

    pub fn store(&self) -> &SchemaStore {
        &self.store
    }

    /// Derive the schema for `table`, store it and persist its snapshot.
    ///
    /// Replaces any schema previously registered under the same name.
    pub async fn register(
        &self,
        table: &str,
        description: &SchemaDescription,
    ) -> DbResult<Arc<TableSchema>> {
        let key = registry_key(table)?;
        let schema = Arc::new(description.build(table)?);

        self.schemas.write().await.insert(key, schema.clone());
        info!(
            table = %schema.table,
            columns = schema.columns.len(),
            indexes = schema.indexes.len(),
            "Schema registered"
        );

        if self.persist {
            self.store.persist(&schema).await.map_err(|e| {
                DbError::schema(format!("persisting snapshot failed: {}", e), &schema.table)
            })?;
        }
        Ok(schema)
    }

    /// [`register`](Self::register) at most once per table.
    ///
    /// A failed derivation leaves the guard unset, so the next caller retries.
    pub async fn register_once(
        &self,
        table: &str,
        description: &SchemaDescription,
    ) -> DbResult<Arc<TableSchema>> {
        let key = registry_key(table)?;
        let guard = {
            let mut guards = self.guards.lock().await;
            guards.entry(key).or_default().clone()
        };
        guard
            .get_or_try_init(|| self.register(table, description))
            .await
            .cloned()
    }

    /// Put an already built schema in the registry without persisting it.
    pub async fn insert(&self, schema: TableSchema) -> DbResult<Arc<TableSchema>> {
        let key = registry_key(&schema.table)?;
        let schema = Arc::new(schema);
        self.schemas.write().await.insert(key, schema.clone());
        Ok(schema)
    }

    /// Registered schema for `table`, without touching the snapshot store.
    pub async fn get(&self, table: &str) -> Option<Arc<TableSchema>> {
        let key = table.trim().to_lowercase();
        self.schemas.read().await.get(&key).cloned()
    }

    /// Registered schema for `table`, falling back to its recorded snapshot.
    pub async fn load(&self, table: &str) -> DbResult<Option<Arc<TableSchema>>> {
        if let Some(schema) = self.get(table).await {
            return Ok(Some(schema));
        }
        let key = table.trim().to_lowercase();
        if key.is_empty() {
            return Ok(None);
        }
        let Some(loaded) = self.store.load(table).await? else {
            debug!(table = %table, "No schema snapshot found");
            return Ok(None);
        };

        let mut schemas = self.schemas.write().await;
        // Another caller may have registered while the file was read.
        let schema = schemas.entry(key).or_insert_with(|| Arc::new(loaded)).clone();
        Ok(Some(schema))
    }

    /// Every registered schema, sorted by table name.
    pub async fn registered(&self) -> Vec<Arc<TableSchema>> {
        let mut schemas: Vec<_> = self.schemas.read().await.values().cloned().collect();
        schemas.sort_by(|a, b| a.table.cmp(&b.table));
        schemas
    }

    /// Every snapshot recorded on disk, sorted by table name.
    pub async fn list_recorded(&self) -> DbResult<Vec<TableSchema>> {
        self.store.list_recorded().await
    }
}

fn registry_key(table: &str) -> DbResult<String> {
    let key = table.trim().to_lowercase();
    if key.is_empty() {
        return Err(DbError::invalid_identifier(table, "table name required for registration"));
    }
    Ok(key)
}
