//! Error types for the persistence engine.
//!
//! Every fallible operation returns [`DbResult`]. Configuration, identifier
//! and filter errors are raised before any statement reaches the database;
//! driver failures are normalized through `From<sqlx::Error>`.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Invalid identifier '{identifier}': {reason}")]
    InvalidIdentifier { identifier: String, reason: String },

    #[error("{operation} on '{table}' requires filter conditions")]
    MissingFilter { operation: String, table: String },

    #[error("No rows found")]
    NotFound,

    #[error("Version conflict on '{table}': the row was modified concurrently")]
    VersionConflict { table: String },

    #[error("Unsupported database driver: {driver}")]
    UnsupportedDialect { driver: String },

    #[error("{dialect} connection requires '{field}'")]
    MissingDsnField { dialect: String, field: String },

    #[error("Unsupported argument type for {context}: {argument}")]
    UnsupportedArgumentType { argument: String, context: String },

    #[error("Database '{name}' not initialized")]
    NotInitialized { name: String },

    #[error("Connection failed: {message}")]
    Connection { message: String, suggestion: String },

    #[error("Database error: {message}")]
    Database {
        message: String,
        /// e.g., "42P01" for undefined table
        sql_state: Option<String>,
        suggestion: String,
    },

    #[error("Schema error: {message} (object: {object})")]
    Schema { message: String, object: String },

    #[error("Schema sync of '{table}' failed after {} statement(s): {source}", applied.len())]
    SchemaSync {
        table: String,
        /// Statements that were executed before the failure.
        applied: Vec<String>,
        #[source]
        source: Box<DbError>,
    },

    #[error("Transaction error: {message} (transaction: {transaction_id})")]
    Transaction {
        message: String,
        transaction_id: String,
    },

    #[error("Timeout: {operation} exceeded {elapsed_secs}s")]
    Timeout {
        operation: String,
        elapsed_secs: u32,
    },

    #[error("Operation cancelled: {operation}")]
    Cancelled { operation: String },

    #[error("Deadline exceeded: {operation}")]
    DeadlineExceeded { operation: String },

    #[error("Failed to close {} database(s): {}", failures.len(), failures.join("; "))]
    CloseFailed { failures: Vec<String> },

    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    #[error("I/O error on {path}: {message}")]
    Io { path: String, message: String },

    #[error("Serialization error: {message}")]
    Serialization { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl DbError {
    /// Create an invalid identifier error.
    pub fn invalid_identifier(identifier: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidIdentifier {
            identifier: identifier.into(),
            reason: reason.into(),
        }
    }

    pub fn missing_filter(operation: impl Into<String>, table: impl Into<String>) -> Self {
        Self::MissingFilter {
            operation: operation.into(),
            table: table.into(),
        }
    }

    pub fn version_conflict(table: impl Into<String>) -> Self {
        Self::VersionConflict {
            table: table.into(),
        }
    }

    pub fn unsupported_dialect(driver: impl Into<String>) -> Self {
        Self::UnsupportedDialect {
            driver: driver.into(),
        }
    }

    pub fn missing_dsn_field(dialect: impl Into<String>, field: impl Into<String>) -> Self {
        Self::MissingDsnField {
            dialect: dialect.into(),
            field: field.into(),
        }
    }

    pub fn unsupported_argument(argument: impl Into<String>, context: impl Into<String>) -> Self {
        Self::UnsupportedArgumentType {
            argument: argument.into(),
            context: context.into(),
        }
    }

    pub fn not_initialized(name: impl Into<String>) -> Self {
        Self::NotInitialized { name: name.into() }
    }

    /// Create a connection error with a helpful suggestion.
    pub fn connection(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Create a database error with optional SQL state.
    pub fn database(
        message: impl Into<String>,
        sql_state: Option<String>,
        suggestion: impl Into<String>,
    ) -> Self {
        Self::Database {
            message: message.into(),
            sql_state,
            suggestion: suggestion.into(),
        }
    }

    /// Create a schema error.
    pub fn schema(message: impl Into<String>, object: impl Into<String>) -> Self {
        Self::Schema {
            message: message.into(),
            object: object.into(),
        }
    }

    /// Wrap a failure raised midway through a table synchronization.
    pub fn schema_sync(table: impl Into<String>, applied: Vec<String>, source: DbError) -> Self {
        Self::SchemaSync {
            table: table.into(),
            applied,
            source: Box::new(source),
        }
    }

    /// Create a transaction error.
    pub fn transaction(message: impl Into<String>, transaction_id: impl Into<String>) -> Self {
        Self::Transaction {
            message: message.into(),
            transaction_id: transaction_id.into(),
        }
    }

    /// Create a timeout error.
    pub fn timeout(operation: impl Into<String>, elapsed_secs: u32) -> Self {
        Self::Timeout {
            operation: operation.into(),
            elapsed_secs,
        }
    }

    pub fn cancelled(operation: impl Into<String>) -> Self {
        Self::Cancelled {
            operation: operation.into(),
        }
    }

    pub fn deadline_exceeded(operation: impl Into<String>) -> Self {
        Self::DeadlineExceeded {
            operation: operation.into(),
        }
    }

    /// Create an invalid input error.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    pub fn io(path: impl AsRef<std::path::Path>, err: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().display().to_string(),
            message: err.to_string(),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Get the suggestion for this error, if available.
    pub fn suggestion(&self) -> Option<&str> {
        match self {
            Self::Connection { suggestion, .. } => Some(suggestion),
            Self::Database { suggestion, .. } => Some(suggestion),
            Self::MissingFilter { .. } => {
                Some("Pass at least one filter condition; whole-table writes are refused")
            }
            Self::VersionConflict { .. } => Some("Reload the row and retry with its current version"),
            Self::NotInitialized { .. } => Some("Call ConnectionManager::init for this database first"),
            Self::SchemaSync { source, .. } => source.suggestion(),
            _ => None,
        }
    }

    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Connection { .. } | Self::Timeout { .. } | Self::VersionConflict { .. }
        )
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound)
    }

    pub fn is_version_conflict(&self) -> bool {
        matches!(self, Self::VersionConflict { .. })
    }
}

/// Convert sqlx errors to DbError.
impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Configuration(msg) => DbError::connection(
                msg.to_string(),
                "Check the connection string format and credentials",
            ),
            sqlx::Error::Database(db_err) => {
                let code = db_err.code().map(|c| c.to_string());
                DbError::database(
                    db_err.message(),
                    code,
                    "Check the SQL syntax and referenced objects",
                )
            }
            sqlx::Error::RowNotFound => DbError::NotFound,
            sqlx::Error::PoolTimedOut => DbError::timeout("connection pool acquire", 30),
            sqlx::Error::PoolClosed => {
                DbError::connection("Connection pool is closed", "Reinitialize the database")
            }
            sqlx::Error::Io(io_err) => DbError::connection(
                format!("I/O error: {}", io_err),
                "Check network connectivity and database server status",
            ),
            sqlx::Error::Tls(tls_err) => DbError::connection(
                format!("TLS error: {}", tls_err),
                "Verify TLS configuration and certificates",
            ),
            sqlx::Error::Protocol(msg) => DbError::connection(
                format!("Protocol error: {}", msg),
                "Check database server compatibility",
            ),
            sqlx::Error::TypeNotFound { type_name } => DbError::schema(
                format!("Type not found: {}", type_name),
                type_name.to_string(),
            ),
            sqlx::Error::ColumnNotFound(col) => {
                DbError::schema(format!("Column not found: {}", col), col.to_string())
            }
            sqlx::Error::ColumnIndexOutOfBounds { index, len } => DbError::internal(format!(
                "Column index {} out of bounds (len: {})",
                index, len
            )),
            sqlx::Error::ColumnDecode { index, source } => {
                DbError::internal(format!("Failed to decode column {}: {}", index, source))
            }
            sqlx::Error::Decode(source) => DbError::internal(format!("Decode error: {}", source)),
            sqlx::Error::AnyDriverError(err) => DbError::connection(
                format!("Driver error: {}", err),
                "Check database driver configuration",
            ),
            sqlx::Error::WorkerCrashed => DbError::internal("Database worker crashed"),
            _ => DbError::internal(format!("Unknown database error: {}", err)),
        }
    }
}

impl From<serde_json::Error> for DbError {
    fn from(err: serde_json::Error) -> Self {
        DbError::Serialization {
            message: err.to_string(),
        }
    }
}

/// Result type alias for database operations.
pub type DbResult<T> = Result<T, DbError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DbError::connection("Failed to connect", "Check credentials");
        assert!(err.to_string().contains("Connection failed"));

        let err = DbError::not_initialized("analytics");
        assert_eq!(err.to_string(), "Database 'analytics' not initialized");
    }

    #[test]
    fn test_error_suggestion() {
        let err = DbError::database(
            "Syntax error",
            Some("42601".to_string()),
            "Check SQL syntax",
        );
        assert_eq!(err.suggestion(), Some("Check SQL syntax"));
        assert!(DbError::missing_filter("delete", "users").suggestion().is_some());
    }

    #[test]
    fn test_error_retryable() {
        assert!(DbError::timeout("query", 30).is_retryable());
        assert!(DbError::connection("err", "sugg").is_retryable());
        assert!(DbError::version_conflict("users").is_retryable());
        assert!(!DbError::missing_filter("update", "users").is_retryable());
    }

    #[test]
    fn test_row_not_found_is_normalized() {
        let err: DbError = sqlx::Error::RowNotFound.into();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_schema_sync_keeps_applied_statements() {
        let err = DbError::schema_sync(
            "users",
            vec!["ALTER TABLE \"users\" ADD COLUMN \"age\" BIGINT".to_string()],
            DbError::database("duplicate column", None, "check schema"),
        );
        assert!(err.to_string().contains("after 1 statement(s)"));
        match err {
            DbError::SchemaSync { applied, .. } => assert_eq!(applied.len(), 1),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_close_failed_lists_every_failure() {
        let err = DbError::CloseFailed {
            failures: vec!["a: timeout".to_string(), "b: timeout".to_string()],
        };
        let msg = err.to_string();
        assert!(msg.contains("2 database(s)"));
        assert!(msg.contains("a: timeout; b: timeout"));
    }
}
