//! Dialect-specific SQL text helpers.
//!
//! Identifier validation and quoting, logical → physical type mapping and
//! placeholder rebinding. Everything here is pure string work.

use crate::error::{DbError, DbResult};
use crate::models::DatabaseType;

/// Validate a bare identifier: ASCII letters, digits and underscores, not
/// starting with a digit.
pub fn ensure_identifier(name: &str) -> DbResult<()> {
    let Some(first) = name.chars().next() else {
        return Err(DbError::invalid_identifier(name, "identifier is empty"));
    };
    if first.is_ascii_digit() {
        return Err(DbError::invalid_identifier(
            name,
            "identifier cannot start with a digit",
        ));
    }
    if let Some(bad) = name
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || *c == '_'))
    {
        return Err(DbError::invalid_identifier(
            name,
            format!("character '{}' is not allowed", bad),
        ));
    }
    Ok(())
}

/// Validate a dot-separated identifier such as `main.user_id`.
pub fn ensure_qualified_identifier(name: &str) -> DbResult<()> {
    if name.is_empty() {
        return Err(DbError::invalid_identifier(name, "identifier is empty"));
    }
    for segment in name.split('.') {
        ensure_identifier(segment).map_err(|_| {
            DbError::invalid_identifier(name, format!("invalid segment '{}'", segment))
        })?;
    }
    Ok(())
}

/// Quote one identifier for `dialect`, doubling embedded quote characters.
pub fn quote_identifier(dialect: DatabaseType, name: &str) -> String {
    match dialect {
        DatabaseType::MySQL => format!("`{}`", name.replace('`', "``")),
        DatabaseType::PostgreSQL | DatabaseType::SQLite => {
            format!("\"{}\"", name.replace('"', "\"\""))
        }
    }
}

/// Quote each segment of a dot-separated identifier.
pub fn quote_qualified(dialect: DatabaseType, name: &str) -> String {
    name.split('.')
        .map(|segment| quote_identifier(dialect, segment))
        .collect::<Vec<_>>()
        .join(".")
}

/// Map a logical column type to the physical type for `dialect`.
pub fn sql_type_for(dialect: DatabaseType, logical: &str, auto_increment: bool) -> String {
    let base = logical.trim().to_uppercase();
    match dialect {
        DatabaseType::PostgreSQL => {
            if auto_increment {
                return "BIGINT GENERATED BY DEFAULT AS IDENTITY".to_string();
            }
            match base.as_str() {
                "TIMESTAMP" => "TIMESTAMPTZ".to_string(),
                "DOUBLE" => "DOUBLE PRECISION".to_string(),
                _ => base,
            }
        }
        DatabaseType::MySQL => match base.as_str() {
            "BOOLEAN" => "TINYINT(1)".to_string(),
            _ => base,
        },
        DatabaseType::SQLite => match base.as_str() {
            "TIMESTAMP" => "DATETIME".to_string(),
            "BOOLEAN" => "INTEGER".to_string(),
            "DOUBLE" => "REAL".to_string(),
            "VARCHAR(255)" => "TEXT".to_string(),
            "BIGINT" => "INTEGER".to_string(),
            _ => base,
        },
    }
}

/// Rewrite `?` placeholders to `$1..$n` for PostgreSQL.
///
/// Question marks inside single-quoted literals or double-quoted identifiers
/// are left alone. Other dialects get the text back unchanged.
pub fn rebind(dialect: DatabaseType, sql: &str) -> String {
    if dialect != DatabaseType::PostgreSQL || !sql.contains('?') {
        return sql.to_string();
    }

    let mut out = String::with_capacity(sql.len() + 8);
    let mut n = 0;
    let mut quote: Option<char> = None;
    for c in sql.chars() {
        match quote {
            Some(q) => {
                // A doubled quote closes and reopens, which toggles back.
                if c == q {
                    quote = None;
                }
                out.push(c);
            }
            None => match c {
                '\'' | '"' => {
                    quote = Some(c);
                    out.push(c);
                }
                '?' => {
                    n += 1;
                    out.push('$');
                    out.push_str(&n.to_string());
                }
                _ => out.push(c),
            },
        }
    }
    out
}
