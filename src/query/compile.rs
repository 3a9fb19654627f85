//! WHERE-clause compilation.
//!
//! Identifiers are validated and quoted for the target dialect; every value
//! except `IS` literals becomes a `?` placeholder with its argument appended
//! in textual order.

use crate::db::dialect::{ensure_qualified_identifier, quote_qualified};
use crate::error::DbResult;
use crate::models::{DatabaseType, SqlValue};
use crate::query::filter::{Condition, Filter, Operator, Predicate};

/// Compiled condition text and its bind arguments.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompiledClause {
    pub sql: String,
    pub args: Vec<SqlValue>,
}

impl CompiledClause {
    pub fn is_empty(&self) -> bool {
        self.sql.trim().is_empty()
    }
}

/// Compile `filter` for `dialect`.
///
/// Nested groups are parenthesized; the outermost group is not. Empty
/// groups and empty `IN` lists contribute nothing.
pub fn compile(filter: &Filter, dialect: DatabaseType) -> DbResult<CompiledClause> {
    let mut args = Vec::new();
    let sql = compile_node(filter, dialect, &mut args, true)?;
    Ok(CompiledClause { sql, args })
}

fn compile_node(
    filter: &Filter,
    dialect: DatabaseType,
    args: &mut Vec<SqlValue>,
    top: bool,
) -> DbResult<String> {
    let (items, glue) = match filter {
        Filter::Predicate(predicate) => return compile_predicate(predicate, dialect, args),
        Filter::And(items) => (items, " AND "),
        Filter::Or(items) => (items, " OR "),
    };

    let mut clauses = Vec::with_capacity(items.len());
    for item in items {
        let clause = compile_node(item, dialect, args, false)?;
        if !clause.is_empty() {
            clauses.push(clause);
        }
    }
    if clauses.is_empty() {
        return Ok(String::new());
    }
    let joined = clauses.join(glue);
    Ok(if top { joined } else { format!("({})", joined) })
}

fn compile_predicate(
    predicate: &Predicate,
    dialect: DatabaseType,
    args: &mut Vec<SqlValue>,
) -> DbResult<String> {
    let field = predicate.field.trim();
    ensure_qualified_identifier(field)?;
    let quoted = quote_qualified(dialect, field);

    let sql = match &predicate.condition {
        Condition::Compare(Operator::Eq, SqlValue::Null) => format!("{} IS NULL", quoted),
        Condition::Compare(Operator::Ne, SqlValue::Null) => format!("{} IS NOT NULL", quoted),
        Condition::Compare(op, value) => {
            args.push(value.clone());
            format!("{} {} ?", quoted, op.as_sql())
        }
        Condition::In { values, .. } if values.is_empty() => String::new(),
        Condition::In { negated, values } => {
            args.extend(values.iter().cloned());
            let op = if *negated { "NOT IN" } else { "IN" };
            format!("{} {} ({})", quoted, op, vec!["?"; values.len()].join(", "))
        }
        Condition::Between(low, high) => {
            args.push(low.clone());
            args.push(high.clone());
            format!("{} BETWEEN ? AND ?", quoted)
        }
        Condition::Is { negated, literal } => {
            let op = if *negated { "IS NOT" } else { "IS" };
            format!("{} {} {}", quoted, op, literal.as_sql())
        }
    };
    Ok(sql)
}
