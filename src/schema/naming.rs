//! Name conversions shared by schema derivation, synchronization and the
//! model layer.

/// Convert a field name to snake_case.
///
/// Acronyms stay together (`HTTPServer` → `http_server`) and digits are split
/// from preceding letters (`Address2` → `address_2`).
pub fn to_snake(name: &str) -> String {
    let chars: Vec<char> = name.chars().collect();
    let mut out = String::with_capacity(chars.len() * 2);
    for (i, &c) in chars.iter().enumerate() {
        if c.is_uppercase() {
            if i > 0 {
                let prev = chars[i - 1];
                let next_is_lower = chars.get(i + 1).is_some_and(|n| n.is_lowercase());
                if prev.is_lowercase() || prev.is_ascii_digit() || (prev.is_uppercase() && next_is_lower)
                {
                    out.push('_');
                }
            }
            out.extend(c.to_lowercase());
            continue;
        }
        if i > 0 && c.is_ascii_digit() && chars[i - 1].is_alphabetic() {
            out.push('_');
        }
        out.push(c);
    }
    out
}

/// Key under which loosely spelled column names compare equal:
/// lowercase with underscores removed.
pub fn canonical_column_key(name: &str) -> String {
    name.to_lowercase().replace('_', "")
}

/// Trim an index name and replace spaces and dashes with underscores.
pub fn normalize_index_name(name: &str) -> String {
    name.trim().replace([' ', '-'], "_")
}

/// `idx_<table>_<column>`, or `uidx_...` for unique indexes.
pub fn default_index_name(table: &str, column: &str, unique: bool) -> String {
    let prefix = if unique { "uidx" } else { "idx" };
    format!("{}_{}_{}", prefix, to_snake(table), column)
}

/// Normalize a declared default. Returns the value and whether it is emitted
/// verbatim (functions, numbers, booleans) rather than as a quoted literal.
pub fn normalize_default_value(value: &str) -> (String, bool) {
    let value = value.trim();
    if value.is_empty() {
        return (String::new(), false);
    }
    let upper = value.to_uppercase();
    if matches!(
        upper.as_str(),
        "CURRENT_TIMESTAMP" | "CURRENT_DATE" | "CURRENT_TIME" | "NOW()"
    ) {
        return (upper, true);
    }
    if is_numeric_literal(value) {
        return (value.to_string(), true);
    }
    if value.eq_ignore_ascii_case("true") || value.eq_ignore_ascii_case("false") {
        return (value.to_lowercase(), true);
    }
    (value.to_string(), false)
}

/// A finite number written with digits; `inf` and `NaN` stay quoted.
fn is_numeric_literal(value: &str) -> bool {
    value
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_digit() || matches!(c, '-' | '+' | '.'))
        && value.parse::<f64>().is_ok_and(f64::is_finite)
}
