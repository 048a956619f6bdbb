//! Identifier and filter-predicate grammar (spec §4.7).
//!
//! Every metric name, dimension name, column name, table name, and alias
//! that reaches the backend driver is validated here first. Nothing here
//! ever concatenates raw SQL from user input — callers get back a typed
//! `Predicate` whose literal is a bind parameter, never interpolated text.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::utils::AppError;

static IDENTIFIER_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap());

static PREDICATE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^(?P<ident>[A-Za-z_][A-Za-z0-9_]*)\s*(?P<op>=|!=|>=|<=|>|<)\s*(?P<lit>.+)$",
    )
    .unwrap()
});

static NUMBER_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[+-]?[0-9]+(\.[0-9]+)?$").unwrap());

/// Characters/sequences that mark an anomalous, rejected input regardless of
/// where else it matched the grammar (spec §4.7: semicolons, comments,
/// backticks, null bytes, non-standard escapes).
const FORBIDDEN_SUBSTRINGS: &[&str] = &[";", "--", "/*", "*/", "`", "\0"];

fn has_forbidden_content(s: &str) -> bool {
    FORBIDDEN_SUBSTRINGS.iter().any(|bad| s.contains(bad))
}

/// Validates an identifier (metric/dimension/column/table/alias name).
pub fn validate_identifier(value: &str) -> Result<(), AppError> {
    if value.is_empty() || value.len() > 64 {
        return Err(AppError::invalid_input("identifier length must be 1-64", value));
    }
    if has_forbidden_content(value) || !IDENTIFIER_RE.is_match(value) {
        return Err(AppError::invalid_input(
            "identifiers must match ^[A-Za-z_][A-Za-z0-9_]*$",
            value,
        ));
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Number(f64),
    Text(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Predicate {
    pub identifier: String,
    pub op: String,
    pub literal: Literal,
    /// Original predicate text, used for deterministic fingerprinting.
    pub raw: String,
}

/// Parses and validates a single filter predicate string against the
/// restricted grammar: `<identifier> <op> <literal>`.
pub fn parse_predicate(raw: &str) -> Result<Predicate, AppError> {
    if raw.is_empty() || raw.len() > 256 {
        return Err(AppError::invalid_input("predicate length out of bounds", raw));
    }
    if has_forbidden_content(raw) {
        return Err(AppError::invalid_input("predicate contains a disallowed token", raw));
    }

    let caps = PREDICATE_RE
        .captures(raw)
        .ok_or_else(|| AppError::invalid_input("predicate does not match <ident> <op> <literal>", raw))?;

    let identifier = caps["ident"].to_string();
    validate_identifier(&identifier)?;
    let op = caps["op"].to_string();
    let lit_text = caps["lit"].trim();

    let literal = parse_literal(lit_text).ok_or_else(|| {
        AppError::invalid_input("literal must be a signed number or a single-quoted string", raw)
    })?;

    Ok(Predicate { identifier, op, literal, raw: raw.to_string() })
}

fn parse_literal(text: &str) -> Option<Literal> {
    if NUMBER_RE.is_match(text) {
        return text.parse::<f64>().ok().map(Literal::Number);
    }
    if text.len() >= 2 && text.starts_with('\'') && text.ends_with('\'') {
        let inner = &text[1..text.len() - 1];
        // Standard single-quote doubling ('') is the only escape accepted.
        if inner.contains('\'') && !inner.replace("''", "").chars().all(|c| c != '\'') {
            return None;
        }
        return Some(Literal::Text(inner.replace("''", "'")));
    }
    None
}

/// Parses a list of raw predicate strings, rejecting the whole request if
/// any one is invalid (no silent drops, spec §4.4).
pub fn parse_predicates(raw: &[String]) -> Result<Vec<Predicate>, AppError> {
    raw.iter().map(|p| parse_predicate(p)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_valid_identifier() {
        assert!(validate_identifier("total_mrr").is_ok());
        assert!(validate_identifier("_private").is_ok());
    }

    #[test]
    fn rejects_bad_identifiers() {
        assert!(validate_identifier("1abc").is_err());
        assert!(validate_identifier("a-b").is_err());
        assert!(validate_identifier("").is_err());
        assert!(validate_identifier(&"a".repeat(65)).is_err());
    }

    #[test]
    fn parses_numeric_predicate() {
        let p = parse_predicate("active_customers >= 10").unwrap();
        assert_eq!(p.identifier, "active_customers");
        assert_eq!(p.op, ">=");
        assert_eq!(p.literal, Literal::Number(10.0));
    }

    #[test]
    fn parses_string_predicate() {
        let p = parse_predicate("subscription_status = 'active'").unwrap();
        assert_eq!(p.literal, Literal::Text("active".to_string()));
    }

    #[test]
    fn rejects_sql_injection_attempt() {
        let err = parse_predicate("name = 'test'; DROP TABLE users; --").unwrap_err();
        assert!(matches!(err, AppError::InvalidInput { .. }));
    }

    #[test]
    fn rejects_comment_marker() {
        assert!(parse_predicate("name = 'x' /* comment */").is_err());
    }
}
