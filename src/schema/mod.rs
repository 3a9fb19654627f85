//! Schema derivation, storage and synchronization.

pub mod ddl;
pub mod description;
pub mod migration_log;
pub mod naming;
pub mod registry;
pub mod store;
pub mod sync;

pub use description::{Field, FieldKind, IndexField, IndexModel, SchemaDescription};
pub use migration_log::MigrationLog;
pub use registry::SchemaRegistry;
pub use store::SchemaStore;
pub use sync::SchemaSynchronizer;
