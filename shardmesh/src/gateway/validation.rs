//! SQL validation and query-hint parsing (spec §4.7 steps 2-3).

use serde_json::Value;

use crate::error::{Error, Result};

const MIN_LEN: usize = 3;
const MAX_LEN: usize = 10_000;

const INJECTION_SIGNATURES: &[&str] = &[
    "union select",
    "; drop ",
    "; delete ",
    "xp_cmdshell",
    "waitfor delay",
    "or 1=1",
    "' or '1'='1",
];

/// Rejects multi-statement text, unbalanced quotes/parens, length
/// violations, and known injection signatures. Returns the SQL unchanged
/// on success; callers still pass it through parameter binding only.
pub fn validate_sql(sql: &str) -> Result<()> {
    let trimmed = sql.trim();
    if trimmed.len() < MIN_LEN || trimmed.len() > MAX_LEN {
        return Err(Error::InvalidQuery(format!(
            "sql length must be between {MIN_LEN} and {MAX_LEN} characters"
        )));
    }

    if has_multiple_statements(trimmed) {
        return Err(Error::InvalidQuery("multi-statement text is not allowed".into()));
    }

    if !quotes_and_parens_balanced(trimmed) {
        return Err(Error::SqlSyntaxError("unbalanced quotes or parentheses".into()));
    }

    let lowered = trimmed.to_lowercase();
    for signature in INJECTION_SIGNATURES {
        if lowered.contains(signature) {
            return Err(Error::InvalidQuery(format!("rejected: matches known injection signature `{signature}`")));
        }
    }

    Ok(())
}

/// A lone trailing `;` is tolerated; anything beyond it, or a `;` embedded
/// mid-statement outside a string literal, counts as multi-statement.
fn has_multiple_statements(sql: &str) -> bool {
    let mut in_single = false;
    let mut in_double = false;
    let mut seen_semicolon_at = None;

    for (i, c) in sql.char_indices() {
        match c {
            '\'' if !in_double => in_single = !in_single,
            '"' if !in_single => in_double = !in_double,
            ';' if !in_single && !in_double => {
                if seen_semicolon_at.is_some() {
                    return true;
                }
                seen_semicolon_at = Some(i);
            }
            _ => {}
        }
    }

    match seen_semicolon_at {
        Some(at) => sql[at + 1..].trim() != "",
        None => false,
    }
}

fn quotes_and_parens_balanced(sql: &str) -> bool {
    let mut in_single = false;
    let mut in_double = false;
    let mut depth: i32 = 0;

    for c in sql.chars() {
        match c {
            '\'' if !in_double => in_single = !in_single,
            '"' if !in_single => in_double = !in_double,
            '(' if !in_single && !in_double => depth += 1,
            ')' if !in_single && !in_double => {
                depth -= 1;
                if depth < 0 {
                    return false;
                }
            }
            _ => {}
        }
    }

    !in_single && !in_double && depth == 0
}

const TABLE_PATTERNS: &[&str] = &[
    "insert into ",
    "delete from ",
    "create table if not exists ",
    "create table ",
    "alter table ",
    "drop table if exists ",
    "drop table ",
    "update ",
    "from ",
];

/// Best-effort table-name extraction used for routing, not execution. Scans
/// for the first keyword in [`TABLE_PATTERNS`] that occurs in `sql`.
pub fn extract_table(sql: &str) -> Option<String> {
    let lower = sql.to_lowercase();
    for pattern in TABLE_PATTERNS {
        if let Some(idx) = lower.find(pattern) {
            let rest = sql[idx + pattern.len()..].trim_start();
            let end = rest
                .find(|c: char| c.is_whitespace() || c == '(' || c == ',')
                .unwrap_or(rest.len());
            let name = rest[..end].trim_matches(|c| c == '`' || c == '"').to_string();
            if !name.is_empty() {
                return Some(name);
            }
        }
    }
    None
}

/// `true` if `sql` references any of `columns` as a bare identifier.
/// Used to force always-strong reads for columns the table policy marks
/// as never cacheable (spec §4.6), regardless of hint or cache mode.
pub fn touches_any_column(sql: &str, columns: &std::collections::BTreeSet<String>) -> bool {
    if columns.is_empty() {
        return false;
    }
    let mut word = String::new();
    for c in sql.chars() {
        if c.is_alphanumeric() || c == '_' {
            word.push(c);
        } else if !word.is_empty() {
            if columns.contains(&word) {
                return true;
            }
            word.clear();
        }
    }
    !word.is_empty() && columns.contains(&word)
}

/// Binds `params` to `sql`. A JSON array passes through positionally
/// unchanged; a JSON object is matched against `:name` placeholders, which
/// are rewritten to sequential `?1, ?2, ...` in declaration order so the
/// storage layer only ever sees positional binding (spec §6).
pub fn bind_params(sql: &str, params: &Value) -> Result<(String, Vec<Value>)> {
    match params {
        Value::Array(items) => Ok((sql.to_string(), items.clone())),
        Value::Null => Ok((sql.to_string(), Vec::new())),
        Value::Object(map) => {
            let chars: Vec<char> = sql.chars().collect();
            let mut rewritten = String::with_capacity(sql.len());
            let mut bound = Vec::new();
            let mut in_single = false;
            let mut in_double = false;
            let mut i = 0;
            let mut ordinal = 0usize;
            while i < chars.len() {
                let c = chars[i];
                let starts_name = !in_single
                    && !in_double
                    && c == ':'
                    && chars.get(i + 1).is_some_and(|n| n.is_alphabetic() || *n == '_');
                match c {
                    '\'' if !in_double => {
                        in_single = !in_single;
                        rewritten.push(c);
                        i += 1;
                    }
                    '"' if !in_single => {
                        in_double = !in_double;
                        rewritten.push(c);
                        i += 1;
                    }
                    ':' if starts_name => {
                        let start = i + 1;
                        let mut end = start;
                        while end < chars.len() && (chars[end].is_alphanumeric() || chars[end] == '_') {
                            end += 1;
                        }
                        let name: String = chars[start..end].iter().collect();
                        let value = map
                            .get(&name)
                            .cloned()
                            .ok_or_else(|| Error::InvalidQuery(format!("missing value for named parameter `:{name}`")))?;
                        ordinal += 1;
                        rewritten.push_str(&format!("?{ordinal}"));
                        bound.push(value);
                        i = end;
                    }
                    _ => {
                        rewritten.push(c);
                        i += 1;
                    }
                }
            }
            Ok((rewritten, bound))
        }
        other => Err(Error::InvalidQuery(format!("params must be a JSON array or object, got {other}"))),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryHint {
    Strong,
    Bounded(u64),
    Weak,
}

#[derive(Debug, Clone, Default)]
pub struct ParsedHints {
    pub consistency: Option<QueryHint>,
    pub shard_key: Option<(String, String)>,
}

/// Strips every `/*+ ... */` block from `sql` and returns the parsed hints
/// alongside the cleaned statement. Unknown hint bodies are ignored rather
/// than rejected, matching the teacher's lenient-parser idiom for
/// forward-compatible comment directives.
pub fn parse_hints(sql: &str) -> (String, ParsedHints) {
    let mut hints = ParsedHints::default();
    let mut out = String::with_capacity(sql.len());
    let mut rest = sql;

    while let Some(start) = rest.find("/*+") {
        out.push_str(&rest[..start]);
        let Some(end_rel) = rest[start..].find("*/") else {
            out.push_str(&rest[start..]);
            rest = "";
            break;
        };
        let body = &rest[start + 3..start + end_rel];
        apply_hint_body(body.trim(), &mut hints);
        rest = &rest[start + end_rel + 2..];
    }
    out.push_str(rest);

    (out.trim().to_string(), hints)
}

fn apply_hint_body(body: &str, hints: &mut ParsedHints) {
    let body = body.trim();
    if body.eq_ignore_ascii_case("strong") {
        hints.consistency = Some(QueryHint::Strong);
    } else if body.eq_ignore_ascii_case("weak") {
        hints.consistency = Some(QueryHint::Weak);
    } else if let Some(ms) = body.strip_prefix("bounded=").or_else(|| body.strip_prefix("bounded =")) {
        if let Ok(ms) = ms.trim().parse::<u64>() {
            hints.consistency = Some(QueryHint::Bounded(ms));
        }
    } else if let Some(rest) = body.strip_prefix("shard:") {
        if let Some((key, value)) = rest.split_once('=') {
            hints.shard_key = Some((key.trim().to_string(), value.trim().to_string()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_too_short_and_too_long() {
        assert!(validate_sql("ab").is_err());
        let long = "SELECT ".to_string() + &"x".repeat(10_000);
        assert!(validate_sql(&long).is_err());
    }

    #[test]
    fn rejects_multi_statement_text() {
        let err = validate_sql("SELECT 1; DROP TABLE users").unwrap_err();
        assert_eq!(err.code(), crate::error::ErrorCode::InvalidQuery);
    }

    #[test]
    fn allows_single_trailing_semicolon() {
        assert!(validate_sql("SELECT * FROM users WHERE id = ?").is_ok());
        assert!(validate_sql("SELECT * FROM users;").is_ok());
    }

    #[test]
    fn semicolon_inside_string_literal_is_not_multi_statement() {
        assert!(validate_sql("SELECT * FROM notes WHERE body = 'a; b'").is_ok());
    }

    #[test]
    fn rejects_unbalanced_parens() {
        let err = validate_sql("SELECT * FROM t WHERE (a = 1").unwrap_err();
        assert_eq!(err.code(), crate::error::ErrorCode::SqlSyntaxError);
    }

    #[test]
    fn rejects_known_injection_signature() {
        assert!(validate_sql("SELECT * FROM t WHERE x = 1 OR 1=1").is_err());
    }

    #[test]
    fn parses_strong_hint_and_strips_comment() {
        let (sql, hints) = parse_hints("/*+ strong */ SELECT * FROM accounts");
        assert_eq!(sql, "SELECT * FROM accounts");
        assert_eq!(hints.consistency, Some(QueryHint::Strong));
    }

    #[test]
    fn parses_bounded_hint_with_ms_value() {
        let (_, hints) = parse_hints("SELECT 1 /*+ bounded=1500 */");
        assert_eq!(hints.consistency, Some(QueryHint::Bounded(1500)));
    }

    #[test]
    fn extracts_table_from_select_and_insert() {
        assert_eq!(extract_table("SELECT * FROM accounts WHERE id = ?").as_deref(), Some("accounts"));
        assert_eq!(
            extract_table("INSERT INTO accounts (id) VALUES (?)").as_deref(),
            Some("accounts")
        );
    }

    #[test]
    fn parses_shard_hint() {
        let (_, hints) = parse_hints("/*+ shard:tenant_id=acme */ SELECT 1");
        assert_eq!(hints.shard_key, Some(("tenant_id".to_string(), "acme".to_string())));
    }

    #[test]
    fn touches_any_column_matches_whole_identifiers_only() {
        let mut columns = std::collections::BTreeSet::new();
        columns.insert("ssn".to_string());
        assert!(touches_any_column("SELECT ssn FROM people WHERE id = ?", &columns));
        assert!(!touches_any_column("SELECT ssn_hash FROM people", &columns));
        assert!(!touches_any_column("SELECT id FROM people", &columns));
    }

    #[test]
    fn bind_params_passes_positional_arrays_through() {
        let (sql, params) = bind_params("SELECT * FROM t WHERE id = ?1", &serde_json::json!([1])).unwrap();
        assert_eq!(sql, "SELECT * FROM t WHERE id = ?1");
        assert_eq!(params, vec![Value::from(1)]);
    }

    #[test]
    fn bind_params_rewrites_named_placeholders_in_declaration_order() {
        let (sql, params) = bind_params(
            "UPDATE accounts SET balance = :balance WHERE id = :id",
            &serde_json::json!({"id": 7, "balance": 100}),
        )
        .unwrap();
        assert_eq!(sql, "UPDATE accounts SET balance = ?1 WHERE id = ?2");
        assert_eq!(params, vec![Value::from(100), Value::from(7)]);
    }

    #[test]
    fn bind_params_rejects_missing_named_value() {
        let err = bind_params("SELECT * FROM t WHERE id = :id", &serde_json::json!({})).unwrap_err();
        assert_eq!(err.code(), crate::error::ErrorCode::InvalidQuery);
    }
}
