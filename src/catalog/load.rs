//! Catalog loading and validation (spec §3, §4.1).
//!
//! Parses the semantic-model YAML, checks every load-time invariant, and
//! produces an immutable `Catalog`. Nothing here is allowed to leave a
//! partially-built catalog reachable by a reader — `load_from_str` either
//! returns a fully validated `Catalog` or an `AppError::CatalogInvalid`.

use std::collections::HashMap;

use petgraph::algo::is_cyclic_directed;
use petgraph::graph::DiGraph;

use crate::catalog::model::{Catalog, CatalogFile, MetricKind, SemanticModel};
use crate::utils::identifier::{parse_predicate, validate_identifier};
use crate::utils::{unique_ordered, AppError, AppResult, StringExt};

static ENV_MAX_LEN: usize = 4 * 1024;

pub fn load_from_str(yaml: &str) -> AppResult<Catalog> {
    let file: CatalogFile = serde_yaml::from_str(yaml)
        .map_err(|e| AppError::CatalogInvalid(format!("YAML parse error: {e}")))?;
    build_catalog(file.semantic_model)
}

pub async fn load_from_path(path: &std::path::Path) -> AppResult<Catalog> {
    let contents = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| AppError::CatalogInvalid(format!("cannot read catalog file {}: {e}", path.display())))?;
    load_from_str(&contents)
}

fn build_catalog(model: SemanticModel) -> AppResult<Catalog> {
    let mut metrics = HashMap::new();
    let mut metric_order = Vec::new();
    for metric in model.metrics {
        validate_identifier(&metric.name)
            .map_err(|e| AppError::CatalogInvalid(format!("metric '{}': {e}", metric.name)))?;
        if let MetricKind::Simple { table, column, filters, .. } = &metric.kind {
            validate_identifier(table)
                .map_err(|e| AppError::CatalogInvalid(format!("metric '{}' table: {e}", metric.name)))?;
            validate_identifier(column)
                .map_err(|e| AppError::CatalogInvalid(format!("metric '{}' column: {e}", metric.name)))?;
            for filter in filters {
                parse_predicate(filter)
                    .map_err(|e| AppError::CatalogInvalid(format!("metric '{}' filter '{filter}': {e}", metric.name)))?;
            }
        }
        if metrics.insert(metric.name.clone(), metric.clone()).is_some() {
            return Err(AppError::CatalogInvalid(format!("duplicate metric name '{}'", metric.name)));
        }
        metric_order.push(metric.name);
    }

    let mut dimensions = HashMap::new();
    let mut dimension_order = Vec::new();
    for mut dim in model.dimensions {
        dim.sample_values = unique_ordered(dim.sample_values);
        validate_identifier(&dim.name)
            .map_err(|e| AppError::CatalogInvalid(format!("dimension '{}': {e}", dim.name)))?;
        validate_identifier(&dim.table)
            .map_err(|e| AppError::CatalogInvalid(format!("dimension '{}' table: {e}", dim.name)))?;
        if let Some(col) = &dim.column {
            validate_identifier(col)
                .map_err(|e| AppError::CatalogInvalid(format!("dimension '{}' column: {e}", dim.name)))?;
        }
        if dim.column.is_none() && dim.sql_template.is_none() {
            return Err(AppError::CatalogInvalid(format!(
                "dimension '{}' must declare column or sql_template",
                dim.name
            )));
        }
        if dimensions.insert(dim.name.clone(), dim.clone()).is_some() {
            return Err(AppError::CatalogInvalid(format!("duplicate dimension name '{}'", dim.name)));
        }
        dimension_order.push(dim.name);
    }

    validate_derived_metric_closure(&metrics)?;

    let mut datasets = HashMap::new();
    for dataset in model.canonical_datasets {
        for metric_name in &dataset.metrics {
            if !metrics.contains_key(metric_name) {
                return Err(AppError::CatalogInvalid(format!(
                    "canonical dataset '{}' references unknown metric '{}'",
                    dataset.name, metric_name
                )));
            }
        }
        for dim_name in &dataset.dimensions {
            if !dimensions.contains_key(dim_name) {
                return Err(AppError::CatalogInvalid(format!(
                    "canonical dataset '{}' references unknown dimension '{}'",
                    dataset.name, dim_name
                )));
            }
        }
        if let Some(time_dim) = &dataset.time_dimension
            && !dimensions.contains_key(time_dim) {
                return Err(AppError::CatalogInvalid(format!(
                    "canonical dataset '{}' references unknown time dimension '{}'",
                    dataset.name, time_dim
                )));
            }
        datasets.insert(dataset.name.clone(), dataset);
    }

    let connection = interpolate_connection(model.connection)?;

    Ok(Catalog { metrics, dimensions, datasets, metric_order, dimension_order, connection })
}

/// Every derived-metric formula parses and references only existing metric
/// names, and the dependency graph over derived metrics is acyclic (spec
/// §3 invariant, testable property 1).
fn validate_derived_metric_closure(metrics: &HashMap<String, crate::catalog::model::MetricDef>) -> AppResult<()> {
    let mut graph = DiGraph::<&str, ()>::new();
    let mut node_of = HashMap::new();
    for name in metrics.keys() {
        node_of.insert(name.as_str(), graph.add_node(name.as_str()));
    }

    for metric in metrics.values() {
        if let MetricKind::Derived { formula } = &metric.kind {
            let refs = crate::semantic::expression::referenced_identifiers(formula)
                .map_err(|e| AppError::CatalogInvalid(format!("metric '{}' formula: {e}", metric.name)))?;
            for r in &refs {
                if !metrics.contains_key(r) {
                    return Err(AppError::CatalogInvalid(format!(
                        "derived metric '{}' formula references unknown metric '{}'",
                        metric.name, r
                    )));
                }
                graph.add_edge(node_of[metric.name.as_str()], node_of[r.as_str()], ());
            }
        }
    }

    if is_cyclic_directed(&graph) {
        return Err(AppError::CatalogInvalid("derived-metric dependency graph has a cycle".into()));
    }
    Ok(())
}

/// Substitutes `${VAR}` references in connection fields from the process
/// environment. Unresolved variables are a load error.
fn interpolate_connection(
    mut connection: crate::catalog::model::ConnectionDef,
) -> AppResult<crate::catalog::model::ConnectionDef> {
    let mut resolved = HashMap::new();
    for (key, value) in connection.fields.drain() {
        resolved.insert(key, interpolate_value(&value)?);
    }
    connection.fields = resolved;
    Ok(connection)
}

fn interpolate_value(value: &str) -> AppResult<String> {
    let mut out = String::with_capacity(value.len());
    let mut rest = value;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let end = after
            .find('}')
            .ok_or_else(|| AppError::CatalogInvalid(format!("unterminated ${{VAR}} in '{value}'")))?;
        let var_name = &after[..end];
        let resolved = std::env::var(var_name)
            .map_err(|_| AppError::CatalogInvalid(format!("unresolved environment variable '{var_name}'")))?;
        let resolved = resolved
            .clean()
            .ok_or_else(|| AppError::CatalogInvalid(format!("environment variable '{var_name}' is blank")))?;
        if resolved.contains('\0') || resolved.len() > ENV_MAX_LEN {
            return Err(AppError::CatalogInvalid(format!("environment variable '{var_name}' is invalid")));
        }
        out.push_str(&resolved);
        rest = &after[end + 1..];
    }
    out.push_str(rest);
    Ok(out)
}

/// Computes the closest-name suggestions used in `AppError::CatalogMiss`.
pub fn suggest(name: &str, candidates: &[String]) -> Vec<String> {
    let mut scored: Vec<(usize, &String)> =
        candidates.iter().map(|c| (edit_distance(name, c), c)).collect();
    scored.sort_by_key(|(dist, _)| *dist);
    scored.into_iter().take(3).map(|(_, c)| c.clone()).collect()
}

fn edit_distance(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let mut dp = vec![vec![0usize; b.len() + 1]; a.len() + 1];
    for (i, row) in dp.iter_mut().enumerate() {
        row[0] = i;
    }
    for j in 0..=b.len() {
        dp[0][j] = j;
    }
    for i in 1..=a.len() {
        for j in 1..=b.len() {
            let cost = if a[i - 1] == b[j - 1] { 0 } else { 1 };
            dp[i][j] = (dp[i - 1][j] + 1).min(dp[i][j - 1] + 1).min(dp[i - 1][j - 1] + cost);
        }
    }
    dp[a.len()][b.len()]
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
semantic_model:
  metrics:
    - name: total_mrr
      display_name: Total MRR
      kind: simple
      table: subscriptions
      aggregation: sum
      column: subscription_amount
      filters:
        - "subscription_status = 'active'"
    - name: active_customers
      display_name: Active Customers
      kind: simple
      table: subscriptions
      aggregation: count_distinct
      column: customer_id
    - name: arpu
      display_name: ARPU
      kind: derived
      formula: "total_mrr / active_customers"
  dimensions:
    - name: customer_segment
      display_name: Customer Segment
      kind: categorical
      table: subscriptions
      column: segment
      sample_values: [Enterprise, Enterprise, Mid-Market, SMB]
  canonical_datasets:
    - name: revenue
      display_name: Revenue
      metrics: [total_mrr, arpu]
      dimensions: [customer_segment]
  connection:
    backend: embedded-olap
    path: "./data/analytics.db"
"#;

    #[test]
    fn loads_a_valid_catalog() {
        let catalog = load_from_str(SAMPLE).unwrap();
        assert_eq!(catalog.metrics.len(), 3);
        assert_eq!(catalog.dimensions.len(), 1);
        assert_eq!(catalog.datasets.len(), 1);
    }

    #[test]
    fn rejects_derived_metric_cycle() {
        let yaml = r#"
semantic_model:
  metrics:
    - name: a
      display_name: A
      kind: derived
      formula: "b + 1"
    - name: b
      display_name: B
      kind: derived
      formula: "a + 1"
  connection:
    backend: embedded-olap
    path: "./data/analytics.db"
"#;
        let err = load_from_str(yaml).unwrap_err();
        assert!(matches!(err, AppError::CatalogInvalid(_)));
    }

    #[test]
    fn rejects_unknown_formula_reference() {
        let yaml = r#"
semantic_model:
  metrics:
    - name: a
      display_name: A
      kind: derived
      formula: "missing_metric + 1"
  connection:
    backend: embedded-olap
    path: "./data/analytics.db"
"#;
        assert!(load_from_str(yaml).is_err());
    }

    #[test]
    fn rejects_bad_filter_grammar() {
        let yaml = r#"
semantic_model:
  metrics:
    - name: a
      display_name: A
      kind: simple
      table: t
      aggregation: sum
      column: c
      filters:
        - "c = 'x'; DROP TABLE t; --"
  connection:
    backend: embedded-olap
    path: "./data/analytics.db"
"#;
        assert!(load_from_str(yaml).is_err());
    }

    #[test]
    fn rejects_blank_interpolated_connection_value() {
        unsafe { std::env::set_var("ANALYST_TEST_BLANK_VAR", "   ") };
        let yaml = r#"
semantic_model:
  connection:
    backend: embedded-olap
    path: "${ANALYST_TEST_BLANK_VAR}"
"#;
        let err = load_from_str(yaml).unwrap_err();
        assert!(matches!(err, AppError::CatalogInvalid(_)));
        unsafe { std::env::remove_var("ANALYST_TEST_BLANK_VAR") };
    }

    #[test]
    fn trims_interpolated_connection_value() {
        unsafe { std::env::set_var("ANALYST_TEST_PATH_VAR", "  ./data/analytics.db  ") };
        let yaml = r#"
semantic_model:
  connection:
    backend: embedded-olap
    path: "${ANALYST_TEST_PATH_VAR}"
"#;
        let catalog = load_from_str(yaml).unwrap();
        assert_eq!(catalog.connection.fields.get("path").unwrap(), "./data/analytics.db");
        unsafe { std::env::remove_var("ANALYST_TEST_PATH_VAR") };
    }

    #[test]
    fn dedupes_dimension_sample_values_preserving_order() {
        let catalog = load_from_str(SAMPLE).unwrap();
        let dim = &catalog.dimensions["customer_segment"];
        assert_eq!(dim.sample_values, vec!["Enterprise", "Mid-Market", "SMB"]);
    }

    #[test]
    fn suggests_closest_metric_names() {
        let candidates = vec!["total_mrr".to_string(), "active_customers".to_string()];
        let suggestions = suggest("total_mr", &candidates);
        assert_eq!(suggestions[0], "total_mrr");
    }
}
