//! Schema-driven ORM over SQLite, PostgreSQL and MySQL.
//!
//! Tables are described with [`SchemaDescription`], registered once per
//! process, reconciled against the live database by the synchronizer and
//! queried through [`Model`]. [`Orm`] ties the pieces together.

pub mod config;
pub mod db;
pub mod error;
pub mod model;
pub mod models;
pub mod orm;
pub mod query;
pub mod schema;

pub use config::{Config, OrmOptions};
pub use db::{ConnectionManager, ExecContext};
pub use error::{DbError, DbResult};
pub use model::Model;
pub use models::{ConnectionConfig, DatabaseType, Record, SelectOptions, SqlValue, Values};
pub use orm::{ModelSpec, Orm};
pub use query::Filter;
pub use schema::{Field, FieldKind, IndexField, IndexModel, SchemaDescription};
