//! Interpreter (spec §4.11): turns a row set into narrative, insights, and
//! follow-up suggestions. No data is inferred beyond arithmetic on the
//! returned rows.

use serde::Serialize;
use serde_json::Value;

use crate::nlp::intent::Intent;

const MAX_DISPLAYED_ROWS: usize = 50;

#[derive(Debug, Clone, Serialize)]
pub struct Interpretation {
    pub narrative: String,
    pub insights: Vec<String>,
    pub follow_ups: Vec<String>,
    pub markdown_table: String,
}

pub fn interpret(
    intent: Intent,
    metric_display_name: &str,
    dimension_names: &[String],
    columns: &[String],
    rows: &[Vec<Value>],
) -> Interpretation {
    let narrative = build_narrative(metric_display_name, dimension_names, rows.len());
    let insights = build_insights(intent, metric_display_name, dimension_names, columns, rows);
    let follow_ups = build_follow_ups(intent, metric_display_name, dimension_names);
    let markdown_table = build_markdown_table(columns, rows);

    Interpretation { narrative, insights, follow_ups, markdown_table }
}

fn build_narrative(metric: &str, dimensions: &[String], row_count: usize) -> String {
    if dimensions.is_empty() {
        format!("{metric} returned a single aggregated value.")
    } else {
        format!("{metric} partitioned by {} across {row_count} rows.", dimensions.join(", "))
    }
}

fn value_column_index(columns: &[String]) -> usize {
    columns.iter().position(|c| c == "value").unwrap_or_else(|| columns.len().saturating_sub(1))
}

fn as_f64(value: &Value) -> f64 {
    value.as_f64().unwrap_or_else(|| value.as_i64().map(|i| i as f64).unwrap_or(0.0))
}

fn build_insights(
    intent: Intent,
    metric: &str,
    dimensions: &[String],
    columns: &[String],
    rows: &[Vec<Value>],
) -> Vec<String> {
    if rows.is_empty() {
        return vec!["No rows returned.".to_string()];
    }
    let value_idx = value_column_index(columns);
    let values: Vec<f64> = rows.iter().map(|r| r.get(value_idx).map(as_f64).unwrap_or(0.0)).collect();

    match intent {
        Intent::TrendAnalysis => {
            let first = *values.first().unwrap_or(&0.0);
            let last = *values.last().unwrap_or(&0.0);
            let delta = last - first;
            let pct = if first != 0.0 { delta / first * 100.0 } else { 0.0 };
            vec![format!("First-vs-last delta for {metric}: {delta:+.1} ({pct:+.1}%)")]
        },
        Intent::Comparison if !dimensions.is_empty() => {
            let total: f64 = values.iter().sum();
            let max_idx = values
                .iter()
                .enumerate()
                .max_by(|(_, a), (_, b)| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal))
                .map(|(i, _)| i);
            let mut insights = Vec::new();
            if let Some(idx) = max_idx {
                let label = rows[idx].first().and_then(|v| v.as_str()).unwrap_or("leader").to_string();
                let share = if total != 0.0 { values[idx] / total * 100.0 } else { 0.0 };
                insights.push(format!("{label} leads with {share:.1}% of total {metric}"));
            }
            let min = values.iter().cloned().fold(f64::INFINITY, f64::min);
            let max = values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
            insights.push(format!("Range: {min:.1}\u{2013}{max:.1} (span {:.1})", max - min));
            insights
        },
        _ => {
            let min = values.iter().cloned().fold(f64::INFINITY, f64::min);
            let max = values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
            vec![format!("{metric} ranges from {min:.1} to {max:.1} across {} rows.", rows.len())]
        },
    }
}

fn build_follow_ups(intent: Intent, metric: &str, dimensions: &[String]) -> Vec<String> {
    let mut suggestions = match intent {
        Intent::MetricQuery => vec![
            format!("Show the trend of {metric} over time"),
            format!("Compare {metric} by segment"),
        ],
        Intent::TrendAnalysis => vec![
            format!("Compare {metric} by customer segment"),
            "Narrow the time range with a filter".to_string(),
        ],
        Intent::Comparison => vec![
            format!("Show {metric} as a trend over time"),
            "Filter to a single segment for detail".to_string(),
        ],
        Intent::CohortAnalysis => vec!["Compare cohorts by a categorical dimension".to_string()],
        Intent::TopN => vec!["Widen the limit to see more rows".to_string()],
        Intent::Filtering => vec!["Remove a filter to broaden the result".to_string()],
        Intent::Unknown => vec!["Try naming a specific metric from list_metrics".to_string()],
    };
    if !dimensions.is_empty() {
        suggestions.push(format!("Drop the {} dimension for a single aggregate", dimensions.join(", ")));
    }
    suggestions.push("Save this as a dashboard with save_as".to_string());
    suggestions.truncate(5);
    suggestions
}

fn build_markdown_table(columns: &[String], rows: &[Vec<Value>]) -> String {
    let mut out = String::new();
    out.push_str("| ");
    out.push_str(&columns.join(" | "));
    out.push_str(" |\n|");
    out.push_str(&"---|".repeat(columns.len()));
    out.push('\n');
    for row in rows.iter().take(MAX_DISPLAYED_ROWS) {
        out.push_str("| ");
        let cells: Vec<String> = row.iter().map(render_cell).collect();
        out.push_str(&cells.join(" | "));
        out.push_str(" |\n");
    }
    if rows.len() > MAX_DISPLAYED_ROWS {
        out.push_str(&format!("\n_{} more rows not shown._\n", rows.len() - MAX_DISPLAYED_ROWS));
    }
    out
}

fn render_cell(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn trend_insight_computes_first_vs_last_delta() {
        let columns = vec!["snapshot_month".to_string(), "value".to_string()];
        let rows = vec![vec![json!("2024-11"), json!(100)], vec![json!("2025-11"), json!(100)]];
        let result = interpret(Intent::TrendAnalysis, "monthly_customer_count", &["snapshot_month".into()], &columns, &rows);
        assert!(result.insights[0].contains("0"));
    }

    #[test]
    fn comparison_insight_reports_leader_share() {
        let columns = vec!["customer_segment".to_string(), "value".to_string()];
        let rows = vec![vec![json!("Enterprise"), json!(600.0)], vec![json!("SMB"), json!(400.0)]];
        let result =
            interpret(Intent::Comparison, "monthly_mrr", &["customer_segment".into()], &columns, &rows);
        assert!(result.insights[0].contains("Enterprise leads"));
    }

    #[test]
    fn markdown_table_caps_at_fifty_rows() {
        let columns = vec!["value".to_string()];
        let rows: Vec<Vec<Value>> = (0..60).map(|i| vec![json!(i)]).collect();
        let result = interpret(Intent::MetricQuery, "x", &[], &columns, &rows);
        assert!(result.markdown_table.contains("10 more rows not shown"));
    }
}
