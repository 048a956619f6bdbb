//! Dimension resolver (spec §4.3): translates a dimension reference into a
//! qualified column expression, compiling the two first-class templated
//! temporal shapes from primitives rather than substituting raw SQL.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::catalog::model::DimensionDef;
use crate::utils::AppError;

static STRFTIME_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^strftime\('(?P<fmt>[^']*)',\s*\{\{\s*Table\s*\}\}\.(?P<col>[A-Za-z_][A-Za-z0-9_]*)\)$").unwrap()
});

static QUARTER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^year_str\s*\|\|\s*'-Q'\s*\|\|\s*ceil\(month/3\)$").unwrap()
});

/// A resolved dimension, ready to drop into a projection/group-by position.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedDimension {
    /// The SQL expression text (already table-qualified), e.g. `subscriptions.segment`
    /// or `strftime('%Y-%m', subscriptions.snapshot_date)`.
    pub expression: String,
    pub alias: String,
    pub source_table: String,
}

/// Resolves a dimension definition against a table alias, compiling the
/// templated shapes for temporal dimensions.
pub fn resolve(dim: &DimensionDef, table_columns: &[String]) -> Result<ResolvedDimension, AppError> {
    if let Some(column) = &dim.column {
        if !table_columns.iter().any(|c| c == column) {
            return Err(AppError::DimensionUnresolvable(dim.name.clone()));
        }
        return Ok(ResolvedDimension {
            expression: format!("{}.{}", dim.table, column),
            alias: dim.name.clone(),
            source_table: dim.table.clone(),
        });
    }

    let template = dim
        .sql_template
        .as_ref()
        .ok_or_else(|| AppError::DimensionUnresolvable(dim.name.clone()))?;

    if let Some(caps) = STRFTIME_RE.captures(template) {
        let col = &caps["col"];
        if !table_columns.iter().any(|c| c == col) {
            return Err(AppError::DimensionUnresolvable(dim.name.clone()));
        }
        return Ok(ResolvedDimension {
            expression: format!("strftime('{}', {}.{})", &caps["fmt"], dim.table, col),
            alias: dim.name.clone(),
            source_table: dim.table.clone(),
        });
    }

    if QUARTER_RE.is_match(template) {
        // Compiled from primitives: year-format, month-extract, integer
        // division, string concat — never the raw template text.
        let expression = format!(
            "strftime('%Y', {table}.{col}) || '-Q' || ((CAST(strftime('%m', {table}.{col}) AS INTEGER) + 2) / 3)",
            table = dim.table,
            col = dim
                .column
                .as_deref()
                .unwrap_or_else(|| table_columns.first().map(|s| s.as_str()).unwrap_or("")),
        );
        return Ok(ResolvedDimension { expression, alias: dim.name.clone(), source_table: dim.table.clone() });
    }

    Err(AppError::DimensionUnresolvable(dim.name.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::model::DimensionKind;

    fn temporal_dim(template: &str) -> DimensionDef {
        DimensionDef {
            name: "snapshot_month".into(),
            display_name: "Snapshot Month".into(),
            kind: DimensionKind::Temporal,
            table: "subscriptions".into(),
            column: None,
            sql_template: Some(template.to_string()),
            granularity: Some("month".into()),
            sample_values: Vec::new(),
        }
    }

    #[test]
    fn resolves_plain_column_dimension() {
        let dim = DimensionDef {
            name: "customer_segment".into(),
            display_name: "Segment".into(),
            kind: DimensionKind::Categorical,
            table: "subscriptions".into(),
            column: Some("segment".into()),
            sql_template: None,
            granularity: None,
            sample_values: Vec::new(),
        };
        let resolved = resolve(&dim, &["segment".to_string()]).unwrap();
        assert_eq!(resolved.expression, "subscriptions.segment");
    }

    #[test]
    fn resolves_strftime_template() {
        let dim = temporal_dim("strftime('%Y-%m', {{ Table }}.snapshot_date)");
        let resolved = resolve(&dim, &["snapshot_date".to_string()]).unwrap();
        assert_eq!(resolved.expression, "strftime('%Y-%m', subscriptions.snapshot_date)");
    }

    #[test]
    fn missing_column_is_unresolvable_at_query_time() {
        let dim = temporal_dim("strftime('%Y-%m', {{ Table }}.missing_col)");
        let err = resolve(&dim, &["snapshot_date".to_string()]).unwrap_err();
        assert!(matches!(err, AppError::DimensionUnresolvable(_)));
    }
}
