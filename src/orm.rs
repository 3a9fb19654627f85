//! Engine entry point.
//!
//! [`Orm`] owns the connection manager, the schema registry and the model
//! cache. Construct one per process and share it behind an `Arc`.

use crate::config::OrmOptions;
use crate::db::context::ExecContext;
use crate::db::pool::ConnectionManager;
use crate::db::transaction::run_in_transaction;
use crate::error::{DbError, DbResult};
use crate::model::Model;
use crate::models::{ConnectionConfig, TableSchema};
use crate::schema::{MigrationLog, SchemaDescription, SchemaRegistry, SchemaStore, SchemaSynchronizer};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// How to build a [`Model`].
#[derive(Debug, Clone, Default)]
pub struct ModelSpec {
    /// Named database; `None` uses the default database
    pub database: Option<String>,
    /// Schema source. Without one the model loads a registered or recorded schema.
    pub description: Option<SchemaDescription>,
    pub default_order: String,
}

impl ModelSpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn database(mut self, name: impl Into<String>) -> Self {
        self.database = Some(name.into());
        self
    }

    pub fn description(mut self, description: SchemaDescription) -> Self {
        self.description = Some(description);
        self
    }

    pub fn order_by(mut self, order: impl Into<String>) -> Self {
        self.default_order = order.into();
        self
    }
}

/// (lowercase table, database, default order)
type ModelKey = (String, String, String);

#[derive(Debug)]
pub struct Orm {
    options: OrmOptions,
    connections: Arc<ConnectionManager>,
    registry: Arc<SchemaRegistry>,
    synchronizer: SchemaSynchronizer,
    models: RwLock<HashMap<ModelKey, Arc<Model>>>,
}

impl Orm {
    pub fn new(options: OrmOptions) -> Self {
        let connections = Arc::new(ConnectionManager::with_default_database(
            options.default_database.clone(),
        ));
        Self::with_connections(options, connections)
    }

    /// Build on an existing connection manager.
    pub fn with_connections(options: OrmOptions, connections: Arc<ConnectionManager>) -> Self {
        let store = SchemaStore::new(options.data_dir.clone());
        let registry = Arc::new(SchemaRegistry::new(store, options.schema_persistence));
        let log = options
            .migration_log
            .then(|| MigrationLog::new(&options.data_dir));
        Self {
            synchronizer: SchemaSynchronizer::new(log),
            options,
            connections,
            registry,
            models: RwLock::new(HashMap::new()),
        }
    }

    pub fn options(&self) -> &OrmOptions {
        &self.options
    }

    pub fn connections(&self) -> &Arc<ConnectionManager> {
        &self.connections
    }

    pub fn registry(&self) -> &Arc<SchemaRegistry> {
        &self.registry
    }

    pub fn synchronizer(&self) -> &SchemaSynchronizer {
        &self.synchronizer
    }

    /// Open and register a named database.
    pub async fn connect(
        &self,
        ctx: &ExecContext,
        name: &str,
        config: ConnectionConfig,
    ) -> DbResult<()> {
        self.connections.init(ctx, name, config).await.map(|_| ())
    }

    /// The model for `table`, built on first request and cached.
    ///
    /// With `auto_migrate` on, the table is synchronized when the model is
    /// first built.
    pub async fn model(
        &self,
        ctx: &ExecContext,
        table: &str,
        spec: ModelSpec,
    ) -> DbResult<Arc<Model>> {
        let table = table.trim();
        let database = self.connections.resolve_name(spec.database.as_deref()).await;
        let order = spec.default_order.trim().to_string();
        let key = (table.to_lowercase(), database.clone(), order.clone());

        if let Some(model) = self.models.read().await.get(&key) {
            return Ok(model.clone());
        }

        let schema = self.schema_for(table, spec.description.as_ref()).await?;
        let model = Model::new(schema, database, order, self.connections.clone());
        if self.options.auto_migrate {
            self.sync_model(ctx, &model).await?;
        }

        let mut models = self.models.write().await;
        let model = models.entry(key).or_insert_with(|| Arc::new(model)).clone();
        debug!(table = %model.table(), database = %model.database(), "Model ready");
        Ok(model)
    }

    async fn schema_for(
        &self,
        table: &str,
        description: Option<&SchemaDescription>,
    ) -> DbResult<Arc<TableSchema>> {
        if let Some(description) = description {
            return self.registry.register_once(table, description).await;
        }
        self.registry
            .load(table)
            .await?
            .ok_or_else(|| DbError::schema("no schema registered or recorded", table))
    }

    /// Reconcile one model's table with its schema.
    pub async fn sync_model(&self, ctx: &ExecContext, model: &Model) -> DbResult<Vec<String>> {
        let pool = model.pool().await?;
        self.synchronizer
            .sync_table(ctx, pool, model.database(), model.schema())
            .await
    }

    /// Synchronize every registered schema against the default database.
    pub async fn ensure_cached_schemas(&self, ctx: &ExecContext) -> DbResult<Vec<String>> {
        let database = self.connections.default_database().await;
        let schemas: Vec<TableSchema> = self
            .registry
            .registered()
            .await
            .iter()
            .map(|schema| TableSchema::clone(schema))
            .collect();
        self.sync_schemas(ctx, &database, &schemas).await
    }

    /// Synchronize every recorded snapshot against `database`.
    ///
    /// Tables are processed in name order. An empty result means the
    /// database was already up to date.
    pub async fn apply_recorded_schemas(
        &self,
        ctx: &ExecContext,
        database: Option<&str>,
    ) -> DbResult<Vec<String>> {
        let database = self.connections.resolve_name(database).await;
        let schemas = self.registry.list_recorded().await?;
        info!(database = %database, tables = schemas.len(), "Applying recorded schemas");
        self.sync_schemas(ctx, &database, &schemas).await
    }

    async fn sync_schemas(
        &self,
        ctx: &ExecContext,
        database: &str,
        schemas: &[TableSchema],
    ) -> DbResult<Vec<String>> {
        if schemas.is_empty() {
            return Ok(Vec::new());
        }
        let pool = self.connections.get(Some(database)).await?;
        self.synchronizer
            .sync_all(ctx, &pool, database, schemas)
            .await
    }

    /// Run `body` as one unit of work on `database` (or the default).
    ///
    /// A transaction already attached to `ctx` is reused instead of nesting.
    pub async fn transaction<F, Fut, T, E>(
        &self,
        ctx: &ExecContext,
        database: Option<&str>,
        body: F,
    ) -> Result<T, E>
    where
        F: FnOnce(ExecContext) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<DbError>,
    {
        run_in_transaction(&self.connections, ctx, database, body).await
    }

    /// Close every database and drop cached models.
    pub async fn close(&self) -> DbResult<()> {
        self.models.write().await.clear();
        self.connections.close_all().await
    }
}
