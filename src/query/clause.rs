//! JOIN, ORDER BY and LIMIT assembly for SELECT statements.

use crate::db::dialect::{ensure_identifier, quote_identifier};
use crate::error::{DbError, DbResult};
use crate::models::{DatabaseType, JoinSpec, Limit};

const JOIN_WORDS: &[&str] = &["LEFT", "RIGHT", "INNER", "OUTER", "FULL", "CROSS", "NATURAL", "JOIN"];

/// Render joins as `KIND JOIN table AS t<i> ON predicate`, where `i` is the
/// join's position in `joins`.
pub fn build_joins(dialect: DatabaseType, joins: &[JoinSpec]) -> DbResult<String> {
    let mut parts = Vec::with_capacity(joins.len());
    for (idx, join) in joins.iter().enumerate() {
        let table = join.table.trim();
        ensure_identifier(table)?;

        let on = join.on.trim();
        if on.is_empty() {
            return Err(DbError::invalid_input(format!(
                "join on '{}' requires an ON predicate",
                table
            )));
        }

        parts.push(format!(
            "{} {} AS t{} ON {}",
            join_kind(join.kind.as_deref())?,
            quote_identifier(dialect, table),
            idx,
            on
        ));
    }
    Ok(parts.join(" "))
}

fn join_kind(kind: Option<&str>) -> DbResult<String> {
    let kind = kind.map(str::trim).unwrap_or_default().to_uppercase();
    if kind.is_empty() {
        return Ok("LEFT JOIN".to_string());
    }
    let words: Vec<&str> = kind.split_whitespace().collect();
    if let Some(bad) = words.iter().find(|w| !JOIN_WORDS.contains(w)) {
        return Err(DbError::invalid_input(format!("unsupported join type '{}'", bad)));
    }
    let mut rendered = words.join(" ");
    if !words.contains(&"JOIN") {
        rendered.push_str(" JOIN");
    }
    Ok(rendered)
}

/// Render the `LIMIT` clause body, or `None` when there is nothing to limit.
///
/// A raw limit may only contain digits, commas, whitespace and `OFFSET`.
/// Page numbers are 1-based; non-positive page or size disables paging.
pub fn build_limit(limit: Option<&Limit>) -> DbResult<Option<String>> {
    match limit {
        None => Ok(None),
        Some(Limit::Raw(raw)) => {
            let raw = raw.trim();
            if raw.is_empty() {
                return Ok(None);
            }
            let valid = raw.split(|c: char| c.is_whitespace() || c == ',').all(|token| {
                token.is_empty()
                    || token.chars().all(|c| c.is_ascii_digit())
                    || token.eq_ignore_ascii_case("OFFSET")
            });
            if !valid {
                return Err(DbError::invalid_input(format!("invalid limit '{}'", raw)));
            }
            Ok(Some(format!("LIMIT {}", raw)))
        }
        Some(Limit::Page { page, page_size }) => {
            if *page == 0 || *page_size == 0 {
                return Ok(None);
            }
            let offset = (page - 1).saturating_mul(*page_size);
            Ok(Some(format!("LIMIT {} OFFSET {}", page_size, offset)))
        }
    }
}

/// The ordering to use: an explicit override wins (blank clears it),
/// otherwise the model default.
pub fn resolve_order<'a>(default: &'a str, requested: Option<&'a str>) -> Option<&'a str> {
    let order = match requested {
        Some(order) => order.trim(),
        None => default.trim(),
    };
    (!order.is_empty()).then_some(order)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_joins() {
        let joins = vec![
            JoinSpec::new("profiles", "t0.user_id = main.id"),
            JoinSpec::new("teams", "t1.id = main.team_id").with_kind("inner"),
            JoinSpec::new("roles", "t2.id = main.role_id").with_kind("left outer join"),
        ];
        assert_eq!(
            build_joins(DatabaseType::SQLite, &joins).unwrap(),
            "LEFT JOIN \"profiles\" AS t0 ON t0.user_id = main.id \
             INNER JOIN \"teams\" AS t1 ON t1.id = main.team_id \
             LEFT OUTER JOIN \"roles\" AS t2 ON t2.id = main.role_id"
        );
        assert_eq!(build_joins(DatabaseType::SQLite, &[]).unwrap(), "");
    }

    #[test]
    fn test_build_joins_rejects_bad_input() {
        let bad_table = [JoinSpec::new("x y", "1 = 1")];
        assert!(matches!(
            build_joins(DatabaseType::MySQL, &bad_table),
            Err(DbError::InvalidIdentifier { .. })
        ));
        let missing_on = [JoinSpec::new("x", " ")];
        assert!(build_joins(DatabaseType::MySQL, &missing_on).is_err());
        let bad_kind = [JoinSpec::new("x", "1 = 1").with_kind("left; drop")];
        assert!(build_joins(DatabaseType::MySQL, &bad_kind).is_err());
    }

    #[test]
    fn test_build_limit() {
        assert_eq!(build_limit(None).unwrap(), None);
        assert_eq!(
            build_limit(Some(&Limit::Raw("10 offset 20".into()))).unwrap().as_deref(),
            Some("LIMIT 10 offset 20")
        );
        assert_eq!(
            build_limit(Some(&Limit::Raw("5, 10".into()))).unwrap().as_deref(),
            Some("LIMIT 5, 10")
        );
        assert!(build_limit(Some(&Limit::Raw("1; DELETE".into()))).is_err());
        assert_eq!(
            build_limit(Some(&Limit::Page { page: 3, page_size: 20 }))
                .unwrap()
                .as_deref(),
            Some("LIMIT 20 OFFSET 40")
        );
        assert_eq!(build_limit(Some(&Limit::Page { page: 0, page_size: 20 })).unwrap(), None);
    }

    #[test]
    fn test_resolve_order() {
        assert_eq!(resolve_order("id DESC", None), Some("id DESC"));
        assert_eq!(resolve_order("id DESC", Some("name")), Some("name"));
        assert_eq!(resolve_order("id DESC", Some(" ")), None);
        assert_eq!(resolve_order("", None), None);
    }
}
