//! Retriever (spec §4.9): scores and selects catalog entries relevant to
//! the classified request.

use crate::catalog::model::{Catalog, DimensionKind};
use crate::nlp::intent::{Intent, Understanding};

#[derive(Debug, Clone)]
pub struct Retrieval {
    pub metric: String,
    pub dimensions: Vec<String>,
    pub dataset: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct RecencyContext<'a> {
    pub last_metrics: &'a [String],
    pub last_dimensions: &'a [String],
}

/// Ranks candidate metrics and returns the top pick plus compatible
/// dimensions. Ties are broken by catalog declaration order (spec §4.9).
pub fn retrieve(
    catalog: &Catalog,
    understanding: &Understanding,
    recency: &RecencyContext<'_>,
) -> Option<Retrieval> {
    let metric_name = pick_metric(catalog, understanding, recency)?;

    let mut dimensions = understanding.candidate_dimensions.clone();
    if dimensions.is_empty() && matches!(understanding.intent, Intent::TrendAnalysis)
        && let Some(temporal) = compatible_temporal_dimension(catalog, &metric_name) {
            dimensions.push(temporal);
        }
    if dimensions.is_empty() && !recency.last_dimensions.is_empty() {
        dimensions = recency.last_dimensions.to_vec();
    }

    let dataset = catalog
        .datasets
        .values()
        .find(|d| d.metrics.contains(&metric_name))
        .map(|d| d.name.clone());

    Some(Retrieval { metric: metric_name, dimensions, dataset })
}

fn pick_metric(catalog: &Catalog, understanding: &Understanding, recency: &RecencyContext<'_>) -> Option<String> {
    if let Some(exact) = understanding
        .candidate_metrics
        .iter()
        .find(|name| catalog.metric_order.contains(name))
    {
        return Some(exact.clone());
    }

    // Pronoun-like follow-up ("show the trend", "now by segment"): reuse
    // the session's last metrics (spec §4.12 step 2).
    if let Some(last) = recency.last_metrics.first() {
        return Some(last.clone());
    }

    // Stable declaration-order fallback for dataset membership overlap.
    for dataset in catalog.datasets.values() {
        if dataset.metrics.iter().any(|m| understanding.candidate_metrics.contains(m))
            && let Some(first) = dataset.metrics.first() {
                return Some(first.clone());
            }
    }

    None
}

fn compatible_temporal_dimension(catalog: &Catalog, metric_name: &str) -> Option<String> {
    let metric_table = match &catalog.metrics.get(metric_name)?.kind {
        crate::catalog::model::MetricKind::Simple { table, .. } => Some(table.clone()),
        crate::catalog::model::MetricKind::Derived { .. } => None,
    }?;

    catalog
        .dimension_order
        .iter()
        .filter_map(|name| catalog.dimensions.get(name))
        .find(|d| d.kind == DimensionKind::Temporal && d.table == metric_table)
        .map(|d| d.name.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::load::load_from_str;
    use crate::nlp::intent::classify;

    const SAMPLE: &str = r#"
semantic_model:
  metrics:
    - name: monthly_customer_count
      display_name: Monthly Customer Count
      kind: simple
      table: subscriptions
      aggregation: count_distinct
      column: customer_id
  dimensions:
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

    #[test]
    fn trend_intent_picks_compatible_temporal_dimension() {
        let catalog = load_from_str(SAMPLE).unwrap();
        let understanding = classify("How is my active customer count changing over time?", &catalog);
        let retrieval = retrieve(&catalog, &understanding, &RecencyContext::default()).unwrap();
        assert_eq!(retrieval.metric, "monthly_customer_count");
        assert_eq!(retrieval.dimensions, vec!["snapshot_month".to_string()]);
    }

    #[test]
    fn follow_up_reuses_recency_context() {
        let catalog = load_from_str(SAMPLE).unwrap();
        let understanding = classify("now show the trend", &catalog);
        let recency = RecencyContext {
            last_metrics: &["monthly_customer_count".to_string()],
            last_dimensions: &[],
        };
        let retrieval = retrieve(&catalog, &understanding, &recency).unwrap();
        assert_eq!(retrieval.metric, "monthly_customer_count");
    }
}
