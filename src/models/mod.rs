//! Data models.
//!
//! This module re-exports all model types used throughout the crate.

pub mod connection;
pub mod query;
pub mod schema;

// Re-export commonly used types
pub use connection::{ConnectionConfig, DatabaseType};
pub use query::{ExecResult, JoinSpec, Limit, Record, SelectOptions, SqlValue, Values};
pub use schema::{ColumnDefinition, IndexDefinition, TableSchema, VERSION_COLUMN};
