//! Plan synthesizer (spec §4.10): turns (intent, retrieval) into a concrete
//! planner request.

use crate::catalog::model::Catalog;
use crate::nlp::intent::{Intent, Understanding};
use crate::nlp::retriever::Retrieval;
use crate::semantic::planner::PlanRequest;
use crate::semantic::query::OrderDirection;

pub fn synthesize(catalog: &Catalog, understanding: &Understanding, retrieval: &Retrieval) -> PlanRequest {
    let filters = understanding
        .candidate_filters
        .iter()
        .filter_map(|(dim_name, value)| categorical_filter_predicate(catalog, dim_name, value))
        .collect::<Vec<_>>();

    match understanding.intent {
        Intent::MetricQuery => PlanRequest {
            metric: retrieval.metric.clone(),
            dimensions: if understanding.candidate_dimensions.is_empty() {
                Vec::new()
            } else {
                retrieval.dimensions.clone()
            },
            filters,
            order_by: None,
            limit: None,
        },
        Intent::TrendAnalysis => PlanRequest {
            metric: retrieval.metric.clone(),
            dimensions: retrieval.dimensions.clone(),
            filters,
            order_by: retrieval.dimensions.first().map(|d| (d.clone(), OrderDirection::Asc)),
            limit: None,
        },
        Intent::Comparison => PlanRequest {
            metric: retrieval.metric.clone(),
            dimensions: retrieval.dimensions.clone(),
            filters,
            order_by: Some(("value".to_string(), OrderDirection::Desc)),
            limit: Some(100),
        },
        Intent::CohortAnalysis => PlanRequest {
            metric: retrieval.metric.clone(),
            dimensions: retrieval.dimensions.clone(),
            filters,
            order_by: retrieval.dimensions.first().map(|d| (d.clone(), OrderDirection::Desc)),
            limit: Some(50),
        },
        Intent::TopN => PlanRequest {
            metric: retrieval.metric.clone(),
            dimensions: retrieval.dimensions.clone(),
            filters,
            order_by: None,
            limit: Some(understanding.top_n.unwrap_or(10)),
        },
        Intent::Filtering => PlanRequest {
            metric: retrieval.metric.clone(),
            dimensions: retrieval.dimensions.clone(),
            filters,
            order_by: None,
            limit: None,
        },
        Intent::Unknown => PlanRequest {
            metric: retrieval.metric.clone(),
            dimensions: retrieval.dimensions.clone(),
            filters,
            order_by: None,
            limit: None,
        },
    }
}

/// Builds a `<column> = '<value>'` predicate (spec §4.7 grammar) for a
/// categorical dimension and value the classifier matched in the question.
/// A dimension resolved only via `sql_template` (no direct column) has no
/// identifier the grammar can filter on, so it is skipped.
fn categorical_filter_predicate(catalog: &Catalog, dim_name: &str, value: &str) -> Option<String> {
    let dim = catalog.dimensions.get(dim_name)?;
    let column = dim.column.as_deref()?;
    let escaped = value.replace('\'', "''");
    Some(format!("{column} = '{escaped}'"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::load::load_from_str;
    use crate::nlp::intent::classify;
    use crate::nlp::retriever::{retrieve, RecencyContext};

    const SAMPLE: &str = r#"
semantic_model:
  metrics:
    - name: monthly_mrr
      display_name: Monthly MRR
      kind: simple
      table: subscriptions
      aggregation: sum
      column: subscription_amount
  dimensions:
    - name: customer_segment
      display_name: Customer Segment
      kind: categorical
      table: subscriptions
      column: segment
      sample_values: [Enterprise, Mid-Market, SMB]
  connection:
    backend: embedded-olap
    path: "./data/analytics.db"
"#;

    #[test]
    fn filtering_intent_attaches_extracted_categorical_filter() {
        let catalog = load_from_str(SAMPLE).unwrap();
        let understanding = classify("What is MRR where segment is Enterprise?", &catalog);
        let retrieval = retrieve(&catalog, &understanding, &RecencyContext::default()).unwrap();
        let request = synthesize(&catalog, &understanding, &retrieval);
        assert_eq!(request.filters, vec!["segment = 'Enterprise'".to_string()]);
    }

    #[test]
    fn comparison_defaults_limit_100() {
        let catalog = load_from_str(SAMPLE).unwrap();
        let understanding = classify("Compare MRR by customer segment.", &catalog);
        let retrieval = retrieve(&catalog, &understanding, &RecencyContext::default()).unwrap();
        let request = synthesize(&catalog, &understanding, &retrieval);
        assert_eq!(request.limit, Some(100));
    }

    #[test]
    fn top_n_uses_extracted_digit() {
        let catalog = load_from_str(SAMPLE).unwrap();
        let understanding = classify("show me the top 7 by mrr", &catalog);
        let retrieval = retrieve(&catalog, &understanding, &RecencyContext::default()).unwrap();
        let request = synthesize(&catalog, &understanding, &retrieval);
        assert_eq!(request.limit, Some(7));
    }
}
