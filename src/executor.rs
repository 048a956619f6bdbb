//! Executes a `Plan` against the embedded backend driver (spec §4.4, §4.5):
//! a simple metric becomes one driver call, a derived metric becomes one
//! call per referenced base metric whose rows are row-aligned by their
//! shared dimension tuple and combined through the expression evaluator.

use std::collections::HashMap;
use std::time::Duration;

use serde_json::Value;

use crate::backend::{EmbeddedOlapDriver, RowSet};
use crate::semantic::expression;
use crate::semantic::planner::Plan;
use crate::utils::AppResult;

pub async fn execute_plan(driver: &EmbeddedOlapDriver, plan: &Plan) -> AppResult<RowSet> {
    match plan {
        Plan::Simple(query) => driver.execute(query).await,
        Plan::Derived { formula, sub_plans } => execute_derived(driver, formula, sub_plans).await,
    }
}

async fn execute_derived(
    driver: &EmbeddedOlapDriver,
    formula: &str,
    sub_plans: &[(String, crate::semantic::query::LogicalQuery)],
) -> AppResult<RowSet> {
    let dims_len = sub_plans.first().map(|(_, q)| q.dimension_projections.len()).unwrap_or(0);

    let mut columns: Vec<String> = Vec::new();
    let mut bindings_by_key: HashMap<String, HashMap<String, f64>> = HashMap::new();
    let mut dim_values_by_key: HashMap<String, Vec<Value>> = HashMap::new();
    let mut key_order: Vec<String> = Vec::new();
    let mut dialect_texts = Vec::with_capacity(sub_plans.len());
    let mut elapsed_total = Duration::default();

    for (name, query) in sub_plans {
        let rowset = driver.execute(query).await?;
        dialect_texts.push(rowset.dialect_text.clone());
        elapsed_total += rowset.elapsed;
        if columns.is_empty() {
            columns = rowset.columns.iter().take(dims_len).cloned().collect();
        }
        let value_idx = rowset.columns.iter().position(|c| c == "value").unwrap_or(rowset.columns.len().saturating_sub(1));

        for row in &rowset.rows {
            let dim_values: Vec<Value> = row.iter().take(dims_len).cloned().collect();
            let key = dim_values.iter().map(cell_key).collect::<Vec<_>>().join("\u{1}");
            dim_values_by_key.entry(key.clone()).or_insert_with(|| {
                key_order.push(key.clone());
                dim_values
            });
            let value = row.get(value_idx).map(as_f64).unwrap_or(0.0);
            bindings_by_key.entry(key).or_default().insert(name.clone(), value);
        }
    }

    let mut rows = Vec::with_capacity(key_order.len());
    for key in &key_order {
        let bindings = bindings_by_key.get(key).cloned().unwrap_or_default();
        let value = expression::evaluate(formula, &bindings)?;
        let mut row = dim_values_by_key.get(key).cloned().unwrap_or_default();
        row.push(Value::from(value));
        rows.push(row);
    }

    columns.push("value".to_string());
    Ok(RowSet { columns, rows, dialect_text: dialect_texts.join(";\n"), elapsed: elapsed_total })
}

fn cell_key(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn as_f64(value: &Value) -> f64 {
    value.as_f64().unwrap_or_else(|| value.as_i64().map(|i| i as f64).unwrap_or(0.0))
}
