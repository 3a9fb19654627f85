//! Connection-related data models.
//!
//! This module defines the dialect enum and the resolved connection
//! configuration the connection manager consumes.

use crate::config::PoolOptions;
use crate::error::{DbError, DbResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use url::Url;

/// Supported database types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseType {
    PostgreSQL,
    /// Includes MariaDB
    MySQL,
    SQLite,
}

impl DatabaseType {
    /// Resolve a configured driver name. A blank name means MySQL.
    pub fn from_driver_name(driver: &str) -> Option<Self> {
        match driver.trim().to_ascii_lowercase().as_str() {
            "" | "mysql" | "mariadb" => Some(Self::MySQL),
            "postgres" | "postgresql" | "pgsql" | "pgx" => Some(Self::PostgreSQL),
            "sqlite" | "sqlite3" => Some(Self::SQLite),
            _ => None,
        }
    }

    /// Parse database type from a connection string.
    pub fn from_connection_string(connection_string: &str) -> Option<Self> {
        let lower = connection_string.to_lowercase();
        if lower.starts_with("postgres://") || lower.starts_with("postgresql://") {
            Some(Self::PostgreSQL)
        } else if lower.starts_with("mysql://") || lower.starts_with("mariadb://") {
            Some(Self::MySQL)
        } else if lower.starts_with("sqlite://") || lower.starts_with("sqlite:") {
            Some(Self::SQLite)
        } else {
            None
        }
    }

    /// Get the display name for this database type.
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::PostgreSQL => "PostgreSQL",
            Self::MySQL => "MySQL",
            Self::SQLite => "SQLite",
        }
    }

    /// Get the default port for this database type.
    pub fn default_port(&self) -> Option<u16> {
        match self {
            Self::PostgreSQL => Some(5432),
            Self::MySQL => Some(3306),
            Self::SQLite => None,
        }
    }

    pub fn is_file_based(&self) -> bool {
        matches!(self, Self::SQLite)
    }
}

impl std::fmt::Display for DatabaseType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

/// Resolved configuration for one named database.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Driver name: mysql (default), mariadb, postgres, postgresql, pgsql, sqlite, sqlite3
    #[serde(default)]
    pub driver: String,
    /// "host" or "host:port"
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub user: Option<String>,
    /// Contains sensitive data - never log
    #[serde(default, skip_serializing)]
    pub password: Option<String>,
    #[serde(default)]
    pub dbname: Option<String>,
    /// SQLite database file
    #[serde(default)]
    pub path: Option<String>,
    /// Extra driver parameters appended to the DSN query string
    #[serde(default)]
    pub params: BTreeMap<String, String>,
    /// Raw connection string overriding every other field. Never logged.
    #[serde(default, skip_serializing)]
    pub dsn: Option<String>,
    #[serde(default)]
    pub pool: PoolOptions,
}

impl ConnectionConfig {
    pub fn sqlite(path: impl Into<String>) -> Self {
        Self {
            driver: "sqlite".to_string(),
            path: Some(path.into()),
            ..Default::default()
        }
    }

    pub fn mysql(host: impl Into<String>, user: impl Into<String>, dbname: impl Into<String>) -> Self {
        Self {
            driver: "mysql".to_string(),
            host: Some(host.into()),
            user: Some(user.into()),
            dbname: Some(dbname.into()),
            ..Default::default()
        }
    }

    pub fn postgres(
        host: impl Into<String>,
        user: impl Into<String>,
        dbname: impl Into<String>,
    ) -> Self {
        Self {
            driver: "postgres".to_string(),
            host: Some(host.into()),
            user: Some(user.into()),
            dbname: Some(dbname.into()),
            ..Default::default()
        }
    }

    /// Use a raw connection string; the dialect is inferred from its scheme.
    pub fn from_dsn(dsn: impl Into<String>) -> Self {
        Self {
            dsn: Some(dsn.into()),
            ..Default::default()
        }
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn with_pool(mut self, pool: PoolOptions) -> Self {
        self.pool = pool;
        self
    }

    /// Decompose a connection URL into configuration fields.
    pub fn from_url(url: &Url) -> DbResult<Self> {
        let scheme = url.scheme().to_ascii_lowercase();
        let dialect = DatabaseType::from_driver_name(&scheme)
            .or_else(|| DatabaseType::from_connection_string(url.as_str()))
            .ok_or_else(|| DbError::unsupported_dialect(scheme.clone()))?;

        let params = url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();

        if dialect == DatabaseType::SQLite {
            let raw = url.as_str();
            let rest = raw
                .strip_prefix("sqlite://")
                .or_else(|| raw.strip_prefix("sqlite:"))
                .unwrap_or(raw);
            let path = percent_decode(rest.split('?').next().unwrap_or_default());
            if path.is_empty() {
                return Err(DbError::missing_dsn_field(dialect.display_name(), "path"));
            }
            let dbname = std::path::Path::new(&path)
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned());
            return Ok(Self {
                driver: scheme,
                path: Some(path),
                dbname,
                params,
                ..Default::default()
            });
        }

        let host = url.host_str().map(|h| match url.port() {
            Some(port) => format!("{h}:{port}"),
            None => h.to_string(),
        });
        let user = Some(percent_decode(url.username())).filter(|u| !u.is_empty());
        let password = url.password().map(percent_decode);
        let dbname = url
            .path()
            .trim_start_matches('/')
            .split('/')
            .next()
            .map(percent_decode)
            .filter(|d| !d.is_empty());

        Ok(Self {
            driver: scheme,
            host,
            user,
            password,
            dbname,
            params,
            ..Default::default()
        })
    }

    /// Resolve the dialect from the driver name, or from the raw DSN when no
    /// driver is configured.
    pub fn dialect(&self) -> DbResult<DatabaseType> {
        if self.driver.trim().is_empty() {
            if let Some(dsn) = self.raw_dsn() {
                return DatabaseType::from_connection_string(dsn)
                    .ok_or_else(|| DbError::unsupported_dialect("<dsn>"));
            }
        }
        DatabaseType::from_driver_name(&self.driver)
            .ok_or_else(|| DbError::unsupported_dialect(self.driver.clone()))
    }

    pub fn raw_dsn(&self) -> Option<&str> {
        self.dsn.as_deref().map(str::trim).filter(|d| !d.is_empty())
    }

    pub fn database_name(&self) -> Option<&str> {
        self.dbname.as_deref().map(str::trim).filter(|d| !d.is_empty())
    }

    /// Build the connection string for the target database.
    pub fn build_dsn(&self) -> DbResult<String> {
        self.build_dsn_with_database(true)
    }

    /// Build the administrative connection string used to create the database.
    pub fn build_admin_dsn(&self) -> DbResult<String> {
        self.build_dsn_with_database(false)
    }

    fn build_dsn_with_database(&self, include_database: bool) -> DbResult<String> {
        if let Some(dsn) = self.raw_dsn() {
            return Ok(dsn.to_string());
        }

        let dialect = self.dialect()?;
        match dialect {
            DatabaseType::MySQL => {
                let mut url = self.network_url("mysql", dialect)?;
                let db = if include_database {
                    self.database_name().unwrap_or_default()
                } else {
                    ""
                };
                url.set_path(&format!("/{db}"));
                let mut params = self.params.clone();
                params
                    .entry("charset".to_string())
                    .or_insert_with(|| "utf8mb4".to_string());
                append_params(&mut url, &params);
                Ok(url.to_string())
            }
            DatabaseType::PostgreSQL => {
                let mut url = self.network_url("postgres", dialect)?;
                let db = self
                    .database_name()
                    .filter(|_| include_database)
                    .unwrap_or("postgres");
                url.set_path(&format!("/{db}"));
                append_params(&mut url, &self.params);
                Ok(url.to_string())
            }
            DatabaseType::SQLite => {
                let path = self.sqlite_path()?;
                let mut dsn = format!("sqlite://{}", path.display());
                if !self.params.is_empty() {
                    let query = url::form_urlencoded::Serializer::new(String::new())
                        .extend_pairs(self.params.iter())
                        .finish();
                    dsn.push('?');
                    dsn.push_str(&query);
                }
                Ok(dsn)
            }
        }
    }

    fn network_url(&self, scheme: &str, dialect: DatabaseType) -> DbResult<Url> {
        let host = non_blank(&self.host)
            .ok_or_else(|| DbError::missing_dsn_field(dialect.display_name(), "host"))?;
        let user = non_blank(&self.user)
            .ok_or_else(|| DbError::missing_dsn_field(dialect.display_name(), "user"))?;

        let mut url = Url::parse(&format!("{scheme}://{host}/"))
            .map_err(|e| DbError::invalid_input(format!("Invalid host '{host}': {e}")))?;
        url.set_username(user)
            .map_err(|_| DbError::invalid_input(format!("Invalid user '{user}'")))?;
        if let Some(password) = self.password.as_deref().filter(|p| !p.is_empty()) {
            url.set_password(Some(password))
                .map_err(|_| DbError::invalid_input("Invalid password"))?;
        }
        Ok(url)
    }

    /// File path for SQLite: `path`, else `host`, else `dbname`.
    pub fn sqlite_path(&self) -> DbResult<PathBuf> {
        if let Some(dsn) = self.raw_dsn() {
            let rest = dsn
                .strip_prefix("sqlite://")
                .or_else(|| dsn.strip_prefix("sqlite:"))
                .unwrap_or(dsn);
            let path = rest.split('?').next().unwrap_or_default();
            if !path.is_empty() {
                return Ok(PathBuf::from(path));
            }
        }
        non_blank(&self.path)
            .or_else(|| non_blank(&self.host))
            .or_else(|| non_blank(&self.dbname))
            .map(PathBuf::from)
            .ok_or_else(|| DbError::missing_dsn_field(DatabaseType::SQLite.display_name(), "path"))
    }

    /// Get a display-safe version of the connection string (credentials masked).
    pub fn masked_dsn(&self) -> String {
        let dsn = match self.build_dsn() {
            Ok(dsn) => dsn,
            Err(_) => return "<invalid>".to_string(),
        };
        if let Some(at_pos) = dsn.find('@') {
            if let Some(colon_pos) = dsn[..at_pos].rfind(':') {
                if dsn[colon_pos + 1..].starts_with("//") {
                    return dsn;
                }
                return format!("{}****{}", &dsn[..colon_pos + 1], &dsn[at_pos..]);
            }
        }
        dsn
    }
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

fn append_params(url: &mut Url, params: &BTreeMap<String, String>) {
    if params.is_empty() {
        return;
    }
    url.query_pairs_mut()
        .extend_pairs(params.iter().map(|(k, v)| (k.trim(), v.as_str())));
}

fn percent_decode(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).ok();
            if let Some(byte) = hex.and_then(|h| u8::from_str_radix(h, 16).ok()) {
                out.push(byte);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}
