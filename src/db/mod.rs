//! Database abstraction layer.
//!
//! This module provides database access functionality:
//! - Named connection pool management
//! - Execution contexts with cancellation and deadlines
//! - Transaction coordination
//! - Statement execution and parameter binding
//! - Live schema introspection
//! - Dialect-specific SQL helpers and type mappings
//! - Database dispatch macros for reducing code duplication

pub mod context;
pub mod dialect;
pub mod executor;
pub mod introspect;
#[macro_use]
pub mod macros;
pub mod params;
pub mod pool;
pub mod transaction;
pub mod types;

pub use context::ExecContext;
pub use executor::Route;
pub use pool::{ConnectionManager, DbPool};
pub use transaction::{DbTransaction, TxHandle, run_in_transaction};
