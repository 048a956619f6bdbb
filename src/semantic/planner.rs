//! Query planner (spec §4.4): assembles a logical query (or, for a derived
//! metric, a set of sub-plans) from a metric + dimensions + filters request.

use std::collections::HashMap;

use crate::catalog::model::{Catalog, MetricKind};
use crate::semantic::dimension::{self, ResolvedDimension};
use crate::semantic::query::{AggregateProjection, JoinStep, LogicalQuery, OrderDirection, Projection};
use crate::utils::identifier::{parse_predicates, Predicate};
use crate::utils::{unique_ordered, AppError, AppResult};

pub const DEFAULT_LIMIT: u32 = 1_000;
pub const MAX_LIMIT: u32 = 100_000;

#[derive(Debug, Clone)]
pub struct PlanRequest {
    pub metric: String,
    pub dimensions: Vec<String>,
    pub filters: Vec<String>,
    pub order_by: Option<(String, OrderDirection)>,
    pub limit: Option<u32>,
}

/// A simple metric becomes one logical query; a derived metric becomes a
/// formula plus one sub-plan per referenced base metric, row-aligned by the
/// dimension tuple at execution time (spec §4.4, §9 design note).
#[derive(Debug, Clone)]
pub enum Plan {
    Simple(LogicalQuery),
    Derived { formula: String, sub_plans: Vec<(String, LogicalQuery)> },
}

/// Table-column metadata the planner needs to resolve dimensions and infer
/// joins. Populated once per table by the backend driver's schema
/// introspection and refreshed alongside catalog reloads.
pub type TableColumns = HashMap<String, Vec<String>>;

pub fn plan(catalog: &Catalog, columns: &TableColumns, request: &PlanRequest) -> AppResult<Plan> {
    let limit = resolve_limit(request.limit)?;
    let metric = catalog.metrics.get(&request.metric).ok_or_else(|| {
        AppError::catalog_miss("metric", request.metric.clone(), catalog.metric_order.clone())
    })?;

    match &metric.kind {
        MetricKind::Simple { table, aggregation, column, filters } => {
            let mut all_filters = filters.clone();
            all_filters.extend(request.filters.clone());
            let logical = plan_simple(
                catalog,
                columns,
                table,
                *aggregation,
                column,
                &all_filters,
                &request.dimensions,
                request.order_by.clone(),
                limit,
            )?;
            Ok(Plan::Simple(logical))
        },
        MetricKind::Derived { formula } => {
            let refs = crate::semantic::expression::referenced_identifiers(formula)?;
            let mut sub_plans = Vec::with_capacity(refs.len());
            for base_name in refs {
                let base_metric = catalog.metrics.get(&base_name).ok_or_else(|| {
                    AppError::catalog_miss("metric", base_name.clone(), catalog.metric_order.clone())
                })?;
                let MetricKind::Simple { table, aggregation, column, filters } = &base_metric.kind else {
                    return Err(AppError::CatalogInvalid(format!(
                        "derived metric '{}' references another derived metric '{}', which is unsupported",
                        request.metric, base_name
                    )));
                };
                let mut all_filters = filters.clone();
                all_filters.extend(request.filters.clone());
                let logical = plan_simple(
                    catalog,
                    columns,
                    table,
                    *aggregation,
                    column,
                    &all_filters,
                    &request.dimensions,
                    request.order_by.clone(),
                    limit,
                )?;
                sub_plans.push((base_name, logical));
            }
            Ok(Plan::Derived { formula: formula.clone(), sub_plans })
        },
    }
}

#[allow(clippy::too_many_arguments)]
fn plan_simple(
    catalog: &Catalog,
    columns: &TableColumns,
    source_table: &str,
    aggregation: crate::catalog::model::Aggregation,
    agg_column: &str,
    filter_strings: &[String],
    dimension_names: &[String],
    order_by: Option<(String, OrderDirection)>,
    limit: u32,
) -> AppResult<LogicalQuery> {
    let mut joins = Vec::new();
    let mut dimension_projections = Vec::new();
    let mut resolved_dims: Vec<ResolvedDimension> = Vec::new();

    // A caller may request the same dimension twice (e.g. a tool invocation
    // with a duplicated `dimensions` entry); dedupe so the GROUP BY/ORDER BY
    // ordinal positions line up with a single projection per dimension.
    let dimension_names = unique_ordered(dimension_names.to_vec());

    for dim_name in &dimension_names {
        let dim = catalog.dimensions.get(dim_name).ok_or_else(|| {
            AppError::catalog_miss("dimension", dim_name.clone(), catalog.dimension_order.clone())
        })?;
        let table_cols = columns.get(&dim.table).cloned().unwrap_or_default();
        let resolved = dimension::resolve(dim, &table_cols)?;

        if dim.table != source_table && !joins.iter().any(|j: &JoinStep| j.right_table == dim.table) {
            let join_key = common_column(columns, source_table, &dim.table)
                .ok_or_else(|| AppError::JoinUnresolvable { left: source_table.to_string(), right: dim.table.clone() })?;
            joins.push(JoinStep {
                left_table: source_table.to_string(),
                right_table: dim.table.clone(),
                join_key,
                left_only: true,
            });
        }

        dimension_projections.push(Projection { expression: resolved.expression.clone(), alias: resolved.alias.clone() });
        resolved_dims.push(resolved);
    }

    let predicates: Vec<Predicate> = parse_predicates(filter_strings)?;

    let group_by_positions: Vec<usize> = (1..=dimension_projections.len()).collect();

    let order_by = order_by.or_else(|| default_order(catalog, &dimension_names, agg_column));

    Ok(LogicalQuery {
        source_table: source_table.to_string(),
        joins,
        dimension_projections,
        aggregate: AggregateProjection { aggregation, column: agg_column.to_string(), alias: "value".to_string() },
        where_predicates: predicates,
        group_by_positions,
        order_by,
        limit,
    })
}

/// Ordering defaults to ascending by the temporal dimension when one is
/// present among the requested dimensions (spec §4.4, §8 property 8).
fn default_order(
    catalog: &Catalog,
    dimension_names: &[String],
    _metric_alias: &str,
) -> Option<(String, OrderDirection)> {
    for name in dimension_names {
        if let Some(dim) = catalog.dimensions.get(name)
            && dim.kind == crate::catalog::model::DimensionKind::Temporal {
                return Some((name.clone(), OrderDirection::Asc));
            }
    }
    None
}

fn resolve_limit(requested: Option<u32>) -> AppResult<u32> {
    match requested {
        None => Ok(DEFAULT_LIMIT),
        Some(0) => Err(AppError::invalid_input("limit must be a positive integer", "0")),
        Some(n) if n > MAX_LIMIT => {
            Err(AppError::invalid_input(format!("limit exceeds hard ceiling of {MAX_LIMIT}"), n.to_string()))
        },
        Some(n) => Ok(n),
    }
}

/// First column name common to both tables (spec §4.4's conservative default).
fn common_column(columns: &TableColumns, left: &str, right: &str) -> Option<String> {
    let left_cols = columns.get(left)?;
    let right_cols = columns.get(right)?;
    left_cols.iter().find(|c| right_cols.contains(c)).cloned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::load::load_from_str;

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
      table: customers
      column: segment
    - name: snapshot_month
      display_name: Snapshot Month
      kind: temporal
      table: subscriptions
      sql_template: "strftime('%Y-%m', {{ Table }}.snapshot_date)"
      granularity: month
  connection:
    backend: embedded-olap
    path: "./data/analytics.db"
"#;

    fn columns() -> TableColumns {
        let mut m = HashMap::new();
        m.insert(
            "subscriptions".to_string(),
            vec!["customer_id".into(), "subscription_amount".into(), "subscription_status".into(), "snapshot_date".into()],
        );
        m.insert("customers".to_string(), vec!["customer_id".into(), "segment".into()]);
        m
    }

    #[test]
    fn plans_simple_metric_with_default_limit() {
        let catalog = load_from_str(SAMPLE).unwrap();
        let request = PlanRequest {
            metric: "total_mrr".into(),
            dimensions: vec![],
            filters: vec![],
            order_by: None,
            limit: None,
        };
        let Plan::Simple(logical) = plan(&catalog, &columns(), &request).unwrap() else { panic!() };
        assert_eq!(logical.limit, DEFAULT_LIMIT);
        assert_eq!(logical.where_predicates.len(), 1);
    }

    #[test]
    fn infers_join_on_common_column() {
        let catalog = load_from_str(SAMPLE).unwrap();
        let request = PlanRequest {
            metric: "total_mrr".into(),
            dimensions: vec!["customer_segment".into()],
            filters: vec![],
            order_by: None,
            limit: None,
        };
        let Plan::Simple(logical) = plan(&catalog, &columns(), &request).unwrap() else { panic!() };
        assert_eq!(logical.joins.len(), 1);
        assert_eq!(logical.joins[0].join_key, "customer_id");
    }

    #[test]
    fn defaults_to_ascending_temporal_order() {
        let catalog = load_from_str(SAMPLE).unwrap();
        let request = PlanRequest {
            metric: "total_mrr".into(),
            dimensions: vec!["snapshot_month".into()],
            filters: vec![],
            order_by: None,
            limit: None,
        };
        let Plan::Simple(logical) = plan(&catalog, &columns(), &request).unwrap() else { panic!() };
        assert_eq!(logical.order_by, Some(("snapshot_month".to_string(), OrderDirection::Asc)));
    }

    #[test]
    fn derived_metric_produces_sub_plans() {
        let catalog = load_from_str(SAMPLE).unwrap();
        let request =
            PlanRequest { metric: "arpu".into(), dimensions: vec![], filters: vec![], order_by: None, limit: None };
        let Plan::Derived { sub_plans, .. } = plan(&catalog, &columns(), &request).unwrap() else { panic!() };
        assert_eq!(sub_plans.len(), 2);
    }

    #[test]
    fn dedupes_duplicate_requested_dimension() {
        let catalog = load_from_str(SAMPLE).unwrap();
        let request = PlanRequest {
            metric: "total_mrr".into(),
            dimensions: vec!["customer_segment".into(), "customer_segment".into()],
            filters: vec![],
            order_by: None,
            limit: None,
        };
        let Plan::Simple(logical) = plan(&catalog, &columns(), &request).unwrap() else { panic!() };
        assert_eq!(logical.dimension_projections.len(), 1);
        assert_eq!(logical.joins.len(), 1);
    }

    #[test]
    fn rejects_limit_over_hard_ceiling() {
        let catalog = load_from_str(SAMPLE).unwrap();
        let request = PlanRequest {
            metric: "total_mrr".into(),
            dimensions: vec![],
            filters: vec![],
            order_by: None,
            limit: Some(200_000),
        };
        assert!(plan(&catalog, &columns(), &request).is_err());
    }
}
