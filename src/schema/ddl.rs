//! DDL text per dialect.
//!
//! Pure string generation; callers validate identifiers before rendering.

use crate::db::dialect::{quote_identifier, sql_type_for};
use crate::models::{ColumnDefinition, DatabaseType, IndexDefinition, Record, SqlValue, TableSchema};

/// Render a default clause value: raw expressions verbatim, anything else
/// as a single-quoted literal.
pub fn format_default_value(value: &str, raw: bool) -> String {
    if raw {
        value.to_string()
    } else {
        format!("'{}'", value.replace('\'', "''"))
    }
}

fn default_clause(column: &ColumnDefinition) -> Option<String> {
    column
        .default_value
        .as_deref()
        .map(|v| format!("DEFAULT {}", format_default_value(v, column.default_is_raw)))
}

/// `CREATE TABLE IF NOT EXISTS` for `schema`.
///
/// SQLite declares the primary key inline (with `AUTOINCREMENT` when
/// requested); the other dialects use a table-level constraint.
pub fn create_table_sql(dialect: DatabaseType, schema: &TableSchema) -> String {
    let mut definitions = Vec::with_capacity(schema.columns.len() + 1);
    let mut primary = None;

    for column in &schema.columns {
        let mut parts = vec![
            quote_identifier(dialect, &column.name),
            sql_type_for(dialect, &column.sql_type, column.auto_increment),
        ];
        if dialect == DatabaseType::MySQL && column.auto_increment {
            parts.push("AUTO_INCREMENT".to_string());
        }
        let inline_primary = dialect == DatabaseType::SQLite && column.primary;
        if inline_primary {
            parts.push("PRIMARY KEY".to_string());
            if column.auto_increment {
                parts.push("AUTOINCREMENT".to_string());
            }
        }
        if column.not_null && !inline_primary {
            parts.push("NOT NULL".to_string());
        }
        if let Some(default) = default_clause(column) {
            parts.push(default);
        }
        if column.primary && !inline_primary {
            primary = Some(quote_identifier(dialect, &column.name));
        }
        definitions.push(parts.join(" "));
    }

    if let Some(pk) = primary {
        definitions.push(format!("PRIMARY KEY ({})", pk));
    }

    format!(
        "CREATE TABLE IF NOT EXISTS {} ({})",
        quote_identifier(dialect, &schema.table),
        definitions.join(", ")
    )
}

pub fn add_column_sql(dialect: DatabaseType, table: &str, column: &ColumnDefinition) -> String {
    let mut sql = format!(
        "ALTER TABLE {} ADD COLUMN {} {}",
        quote_identifier(dialect, table),
        quote_identifier(dialect, &column.name),
        sql_type_for(dialect, &column.sql_type, column.auto_increment)
    );
    if column.not_null {
        sql.push_str(" NOT NULL");
    }
    if let Some(default) = default_clause(column) {
        sql.push(' ');
        sql.push_str(&default);
    }
    if dialect == DatabaseType::MySQL && column.auto_increment {
        sql.push_str(" AUTO_INCREMENT");
    }
    sql
}

pub fn drop_column_sql(dialect: DatabaseType, table: &str, column: &str) -> String {
    let keyword = match dialect {
        DatabaseType::PostgreSQL => "DROP COLUMN IF EXISTS",
        DatabaseType::MySQL | DatabaseType::SQLite => "DROP COLUMN",
    };
    format!(
        "ALTER TABLE {} {} {}",
        quote_identifier(dialect, table),
        keyword,
        quote_identifier(dialect, column)
    )
}

/// `None` where the dialect cannot rename in place (MySQL).
pub fn rename_column_sql(dialect: DatabaseType, table: &str, from: &str, to: &str) -> Option<String> {
    match dialect {
        DatabaseType::PostgreSQL | DatabaseType::SQLite => Some(format!(
            "ALTER TABLE {} RENAME COLUMN {} TO {}",
            quote_identifier(dialect, table),
            quote_identifier(dialect, from),
            quote_identifier(dialect, to)
        )),
        DatabaseType::MySQL => None,
    }
}

pub fn create_index_sql(dialect: DatabaseType, table: &str, index: &IndexDefinition) -> String {
    let unique = if index.unique { "UNIQUE " } else { "" };
    let if_not_exists = match dialect {
        DatabaseType::MySQL => "",
        DatabaseType::PostgreSQL | DatabaseType::SQLite => "IF NOT EXISTS ",
    };
    let columns: Vec<String> = index
        .columns
        .iter()
        .map(|c| quote_identifier(dialect, c))
        .collect();
    format!(
        "CREATE {}INDEX {}{} ON {} ({})",
        unique,
        if_not_exists,
        quote_identifier(dialect, &index.name),
        quote_identifier(dialect, table),
        columns.join(", ")
    )
}

pub fn drop_index_sql(dialect: DatabaseType, table: &str, index: &str) -> String {
    match dialect {
        DatabaseType::MySQL => format!(
            "DROP INDEX {} ON {}",
            quote_identifier(dialect, index),
            quote_identifier(dialect, table)
        ),
        DatabaseType::PostgreSQL | DatabaseType::SQLite => {
            format!("DROP INDEX IF EXISTS {}", quote_identifier(dialect, index))
        }
    }
}

/// Parameterized insert for one seed row.
///
/// Keys are resolved against the schema's columns; unknown keys are dropped.
/// Returns `None` when no key matches a column.
pub fn seed_insert(dialect: DatabaseType, schema: &TableSchema, row: &Record) -> Option<(String, Vec<SqlValue>)> {
    let mut columns = Vec::with_capacity(row.len());
    let mut args = Vec::with_capacity(row.len());
    let mut keys: Vec<&String> = row.keys().collect();
    keys.sort();
    for key in keys {
        let Some(column) = schema.resolve_column(key) else {
            continue;
        };
        if columns.iter().any(|c: &String| c.eq_ignore_ascii_case(column)) {
            continue;
        }
        columns.push(column.to_string());
        args.push(SqlValue::from(&row[key]));
    }
    if columns.is_empty() {
        return None;
    }

    let quoted: Vec<String> = columns.iter().map(|c| quote_identifier(dialect, c)).collect();
    let placeholders = vec!["?"; columns.len()].join(", ");
    let sql = format!(
        "INSERT INTO {} ({}) VALUES ({})",
        quote_identifier(dialect, &schema.table),
        quoted.join(", "),
        placeholders
    );
    Some((sql, args))
}

/// Readable form of a parameterized statement for migration records.
pub fn inline_params(sql: &str, args: &[SqlValue]) -> String {
    let mut out = String::with_capacity(sql.len() + args.len() * 8);
    let mut args = args.iter();
    for c in sql.chars() {
        if c == '?' {
            match args.next() {
                Some(value) => out.push_str(&literal(value)),
                None => out.push(c),
            }
        } else {
            out.push(c);
        }
    }
    out
}

fn literal(value: &SqlValue) -> String {
    match value {
        SqlValue::Null => "NULL".to_string(),
        SqlValue::Bool(v) => if *v { "TRUE" } else { "FALSE" }.to_string(),
        SqlValue::Int(v) => v.to_string(),
        SqlValue::Float(v) => v.to_string(),
        SqlValue::String(v) => format_default_value(v, false),
        SqlValue::Timestamp(v) => format_default_value(&v.format("%Y-%m-%d %H:%M:%S").to_string(), false),
        SqlValue::Json(v) => format_default_value(&v.to_string(), false),
    }
}
