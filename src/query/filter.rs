//! Filter expressions.
//!
//! A [`Filter`] is a tree of field predicates combined with AND / OR. Build
//! one with the constructors (`Filter::eq`, `Filter::in_list`, ...) and the
//! `and` / `or` combinators, or parse the untyped JSON grammar with
//! [`Filter::from_json`]:
//!
//! ```text
//! {"status": "active", "age": {">=": 18, "<": 65}, "id": [1, 2, 3],
//!  "or": {"role": "admin", "owner_id": 7}}
//! ```

use crate::db::dialect::ensure_qualified_identifier;
use crate::error::{DbError, DbResult};
use crate::models::SqlValue;
use serde_json::Value as JsonValue;

/// Comparison operator of a predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
    Like,
    NotLike,
    In,
    NotIn,
    Between,
    Is,
    IsNot,
}

impl Operator {
    /// Parse an operator token. A blank token means `=`; `!=` is `<>`.
    pub fn parse(token: &str) -> DbResult<Self> {
        let upper = token.split_whitespace().collect::<Vec<_>>().join(" ").to_uppercase();
        let op = match upper.as_str() {
            "" | "=" | "==" => Self::Eq,
            "<>" | "!=" => Self::Ne,
            ">" => Self::Gt,
            ">=" => Self::Ge,
            "<" => Self::Lt,
            "<=" => Self::Le,
            "LIKE" => Self::Like,
            "NOT LIKE" => Self::NotLike,
            "IN" => Self::In,
            "NOT IN" => Self::NotIn,
            "BETWEEN" => Self::Between,
            "IS" => Self::Is,
            "IS NOT" => Self::IsNot,
            _ => {
                return Err(DbError::invalid_input(format!(
                    "unsupported filter operator '{}'",
                    token.trim()
                )));
            }
        };
        Ok(op)
    }

    pub fn as_sql(self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Ne => "<>",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Like => "LIKE",
            Self::NotLike => "NOT LIKE",
            Self::In => "IN",
            Self::NotIn => "NOT IN",
            Self::Between => "BETWEEN",
            Self::Is => "IS",
            Self::IsNot => "IS NOT",
        }
    }
}

/// Literal accepted on the right of `IS` / `IS NOT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsLiteral {
    Null,
    True,
    False,
    Unknown,
}

impl IsLiteral {
    pub fn parse(value: &str) -> DbResult<Self> {
        match value.trim().to_uppercase().as_str() {
            "NULL" => Ok(Self::Null),
            "TRUE" => Ok(Self::True),
            "FALSE" => Ok(Self::False),
            "UNKNOWN" => Ok(Self::Unknown),
            _ => Err(DbError::invalid_input(format!(
                "IS accepts NULL, TRUE, FALSE or UNKNOWN, got '{}'",
                value.trim()
            ))),
        }
    }

    pub fn as_sql(self) -> &'static str {
        match self {
            Self::Null => "NULL",
            Self::True => "TRUE",
            Self::False => "FALSE",
            Self::Unknown => "UNKNOWN",
        }
    }
}

/// Right-hand side of a predicate.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    /// `=`, `<>`, `>`, `>=`, `<`, `<=`, `LIKE`, `NOT LIKE` against one bound value
    Compare(Operator, SqlValue),
    /// `IN` / `NOT IN`; an empty list produces no clause
    In { negated: bool, values: Vec<SqlValue> },
    Between(SqlValue, SqlValue),
    /// Rendered as a literal, never bound
    Is { negated: bool, literal: IsLiteral },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Predicate {
    /// Column or `alias.column`
    pub field: String,
    pub condition: Condition,
}

/// A filter expression tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Predicate(Predicate),
    And(Vec<Filter>),
    Or(Vec<Filter>),
}

impl Default for Filter {
    fn default() -> Self {
        Self::And(Vec::new())
    }
}

impl Filter {
    /// Matches every row.
    pub fn none() -> Self {
        Self::default()
    }

    fn predicate(field: impl Into<String>, condition: Condition) -> Self {
        Self::Predicate(Predicate {
            field: field.into(),
            condition,
        })
    }

    /// `field = value`; a NULL value becomes `IS NULL`.
    pub fn eq(field: impl Into<String>, value: impl Into<SqlValue>) -> Self {
        Self::predicate(field, Condition::Compare(Operator::Eq, value.into()))
    }

    /// `field <> value`; a NULL value becomes `IS NOT NULL`.
    pub fn ne(field: impl Into<String>, value: impl Into<SqlValue>) -> Self {
        Self::predicate(field, Condition::Compare(Operator::Ne, value.into()))
    }

    pub fn gt(field: impl Into<String>, value: impl Into<SqlValue>) -> Self {
        Self::predicate(field, Condition::Compare(Operator::Gt, value.into()))
    }

    pub fn ge(field: impl Into<String>, value: impl Into<SqlValue>) -> Self {
        Self::predicate(field, Condition::Compare(Operator::Ge, value.into()))
    }

    pub fn lt(field: impl Into<String>, value: impl Into<SqlValue>) -> Self {
        Self::predicate(field, Condition::Compare(Operator::Lt, value.into()))
    }

    pub fn le(field: impl Into<String>, value: impl Into<SqlValue>) -> Self {
        Self::predicate(field, Condition::Compare(Operator::Le, value.into()))
    }

    pub fn like(field: impl Into<String>, pattern: impl Into<SqlValue>) -> Self {
        Self::predicate(field, Condition::Compare(Operator::Like, pattern.into()))
    }

    pub fn not_like(field: impl Into<String>, pattern: impl Into<SqlValue>) -> Self {
        Self::predicate(field, Condition::Compare(Operator::NotLike, pattern.into()))
    }

    pub fn in_list<V: Into<SqlValue>>(field: impl Into<String>, values: impl IntoIterator<Item = V>) -> Self {
        Self::predicate(
            field,
            Condition::In {
                negated: false,
                values: values.into_iter().map(Into::into).collect(),
            },
        )
    }

    pub fn not_in<V: Into<SqlValue>>(field: impl Into<String>, values: impl IntoIterator<Item = V>) -> Self {
        Self::predicate(
            field,
            Condition::In {
                negated: true,
                values: values.into_iter().map(Into::into).collect(),
            },
        )
    }

    pub fn between(
        field: impl Into<String>,
        low: impl Into<SqlValue>,
        high: impl Into<SqlValue>,
    ) -> Self {
        Self::predicate(field, Condition::Between(low.into(), high.into()))
    }

    pub fn is(field: impl Into<String>, literal: IsLiteral) -> Self {
        Self::predicate(
            field,
            Condition::Is {
                negated: false,
                literal,
            },
        )
    }

    pub fn is_not(field: impl Into<String>, literal: IsLiteral) -> Self {
        Self::predicate(
            field,
            Condition::Is {
                negated: true,
                literal,
            },
        )
    }

    pub fn is_null(field: impl Into<String>) -> Self {
        Self::is(field, IsLiteral::Null)
    }

    pub fn is_not_null(field: impl Into<String>) -> Self {
        Self::is_not(field, IsLiteral::Null)
    }

    /// Every filter must hold.
    pub fn all(filters: impl IntoIterator<Item = Filter>) -> Self {
        Self::And(filters.into_iter().collect())
    }

    /// At least one filter must hold.
    pub fn any(filters: impl IntoIterator<Item = Filter>) -> Self {
        Self::Or(filters.into_iter().collect())
    }

    /// Combine with AND, extending an existing AND group.
    pub fn and(self, other: Filter) -> Self {
        match self {
            Self::And(mut items) => {
                items.push(other);
                Self::And(items)
            }
            other_self => Self::And(vec![other_self, other]),
        }
    }

    /// Combine with OR, extending an existing OR group.
    pub fn or(self, other: Filter) -> Self {
        match self {
            Self::Or(mut items) => {
                items.push(other);
                Self::Or(items)
            }
            other_self => Self::Or(vec![other_self, other]),
        }
    }

    /// Whether the filter would compile to no condition at all.
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Predicate(p) => matches!(&p.condition, Condition::In { values, .. } if values.is_empty()),
            Self::And(items) | Self::Or(items) => items.iter().all(Filter::is_empty),
        }
    }

    /// Rewrite every predicate field through `f`.
    pub fn map_fields<F: Fn(&str) -> String>(self, f: &F) -> Self {
        match self {
            Self::Predicate(p) => Self::Predicate(Predicate {
                field: f(&p.field),
                condition: p.condition,
            }),
            Self::And(items) => Self::And(items.into_iter().map(|i| i.map_fields(f)).collect()),
            Self::Or(items) => Self::Or(items.into_iter().map(|i| i.map_fields(f)).collect()),
        }
    }

    /// Parse the untyped grammar.
    ///
    /// - an object is a group: keys are visited in sorted order and joined
    ///   with the enclosing glue (AND at the top)
    /// - keys `and` / `&&` and `or` / `||` open a nested group with that glue
    /// - any other key is a field; a scalar value means `=`, an array means
    ///   `IN`, an object maps operators to values (several are ANDed)
    /// - an array is a group of its elements under the enclosing glue
    /// - `null` matches everything
    pub fn from_json(value: &JsonValue) -> DbResult<Self> {
        match value {
            JsonValue::Null => Ok(Self::none()),
            JsonValue::Object(_) | JsonValue::Array(_) => parse_group(value, Glue::And),
            other => Err(DbError::invalid_input(format!(
                "filter must be an object or array, got {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Glue {
    And,
    Or,
}

impl Glue {
    fn wrap(self, items: Vec<Filter>) -> Filter {
        match self {
            Glue::And => Filter::And(items),
            Glue::Or => Filter::Or(items),
        }
    }
}

fn parse_group(value: &JsonValue, glue: Glue) -> DbResult<Filter> {
    match value {
        JsonValue::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut items = Vec::with_capacity(keys.len());
            for key in keys {
                let value = &map[key.as_str()];
                match key.trim().to_lowercase().as_str() {
                    "and" | "&&" => items.push(parse_group(value, Glue::And)?),
                    "or" | "||" => items.push(parse_group(value, Glue::Or)?),
                    _ => {
                        if let Some(item) = parse_field(key.trim(), value)? {
                            items.push(item);
                        }
                    }
                }
            }
            Ok(glue.wrap(items))
        }
        JsonValue::Array(elements) => {
            let mut items = Vec::with_capacity(elements.len());
            for element in elements {
                items.push(parse_group(element, glue)?);
            }
            Ok(glue.wrap(items))
        }
        JsonValue::Null => Ok(glue.wrap(Vec::new())),
        other => Err(DbError::invalid_input(format!(
            "filter group must be an object or array, got {}",
            other
        ))),
    }
}

fn parse_field(field: &str, value: &JsonValue) -> DbResult<Option<Filter>> {
    ensure_qualified_identifier(field)?;
    match value {
        JsonValue::Object(ops) => {
            let mut tokens: Vec<&String> = ops.keys().collect();
            tokens.sort();
            let mut items = Vec::with_capacity(tokens.len());
            for token in tokens {
                items.push(parse_operator(field, token, &ops[token.as_str()])?);
            }
            Ok(match items.len() {
                0 => None,
                1 => items.pop(),
                _ => Some(Filter::And(items)),
            })
        }
        JsonValue::Array(values) => Ok(Some(Filter::in_list(field, values.iter().map(SqlValue::from)))),
        scalar => Ok(Some(Filter::eq(field, scalar))),
    }
}

fn parse_operator(field: &str, token: &str, value: &JsonValue) -> DbResult<Filter> {
    let op = Operator::parse(token)?;
    let filter = match op {
        Operator::In | Operator::NotIn => {
            let JsonValue::Array(values) = value else {
                return Err(DbError::invalid_input(format!(
                    "{} on '{}' requires an array",
                    op.as_sql(),
                    field
                )));
            };
            let values = values.iter().map(SqlValue::from);
            if op == Operator::In {
                Filter::in_list(field, values)
            } else {
                Filter::not_in(field, values)
            }
        }
        Operator::Between => match value {
            JsonValue::Array(bounds) if bounds.len() == 2 => {
                Filter::between(field, &bounds[0], &bounds[1])
            }
            _ => {
                return Err(DbError::invalid_input(format!(
                    "BETWEEN on '{}' requires exactly two values",
                    field
                )));
            }
        },
        Operator::Is | Operator::IsNot => {
            let literal = match value {
                JsonValue::Null => IsLiteral::Null,
                JsonValue::Bool(true) => IsLiteral::True,
                JsonValue::Bool(false) => IsLiteral::False,
                JsonValue::String(s) => IsLiteral::parse(s)?,
                other => return Err(DbError::invalid_input(format!(
                    "IS on '{}' cannot compare against {}",
                    field, other
                ))),
            };
            if op == Operator::Is {
                Filter::is(field, literal)
            } else {
                Filter::is_not(field, literal)
            }
        }
        _ => Filter::predicate(field, Condition::Compare(op, SqlValue::from(value))),
    };
    Ok(filter)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_operator_parse() {
        assert_eq!(Operator::parse("").unwrap(), Operator::Eq);
        assert_eq!(Operator::parse("!=").unwrap(), Operator::Ne);
        assert_eq!(Operator::parse(" not   like ").unwrap(), Operator::NotLike);
        assert_eq!(Operator::parse("is not").unwrap(), Operator::IsNot);
        assert!(matches!(
            Operator::parse("; DROP TABLE x"),
            Err(DbError::InvalidInput { .. })
        ));
    }

    #[test]
    fn test_combinators_flatten() {
        let filter = Filter::eq("a", 1).and(Filter::eq("b", 2)).and(Filter::eq("c", 3));
        match filter {
            Filter::And(items) => assert_eq!(items.len(), 3),
            other => panic!("unexpected filter: {other:?}"),
        }
    }

    #[test]
    fn test_is_empty() {
        assert!(Filter::none().is_empty());
        assert!(Filter::in_list("id", Vec::<i64>::new()).is_empty());
        assert!(Filter::all([Filter::any([]), Filter::none()]).is_empty());
        assert!(!Filter::all([Filter::none(), Filter::eq("a", 1)]).is_empty());
    }

    #[test]
    fn test_from_json_shapes() {
        let filter = Filter::from_json(&json!({
            "status": "active",
            "id": [1, 2],
            "age": {">=": 18, "<": 65},
            "or": {"role": "admin", "owner_id": 7}
        }))
        .unwrap();

        let Filter::And(items) = filter else {
            panic!("top level must be AND");
        };
        assert_eq!(items.len(), 4);
        assert!(matches!(&items[0], Filter::And(ops) if ops.len() == 2));
        assert!(matches!(
            &items[1],
            Filter::Predicate(Predicate { condition: Condition::In { negated: false, .. }, .. })
        ));
        assert!(matches!(&items[2], Filter::Or(fields) if fields.len() == 2));
        assert_eq!(items[3], Filter::eq("status", "active"));
    }

    #[test]
    fn test_from_json_rejections() {
        assert!(matches!(
            Filter::from_json(&json!({"bad field": 1})),
            Err(DbError::InvalidIdentifier { .. })
        ));
        assert!(matches!(
            Filter::from_json(&json!({"a": {"~": 1}})),
            Err(DbError::InvalidInput { .. })
        ));
        assert!(matches!(
            Filter::from_json(&json!({"a": {"between": [1]}})),
            Err(DbError::InvalidInput { .. })
        ));
        assert!(matches!(
            Filter::from_json(&json!({"a": {"is": "1; DROP TABLE t"}})),
            Err(DbError::InvalidInput { .. })
        ));
        assert!(matches!(
            Filter::from_json(&json!(42)),
            Err(DbError::InvalidInput { .. })
        ));
    }

    #[test]
    fn test_map_fields() {
        let filter = Filter::eq("UserName", "x")
            .or(Filter::gt("main.Age", 3))
            .map_fields(&|f: &str| f.to_lowercase());
        assert_eq!(
            filter,
            Filter::Or(vec![Filter::eq("username", "x"), Filter::gt("main.age", 3)])
        );
    }
}
