//! Compiles a logical query into SQLite dialect text + bind parameters
//! (spec §4.5). Every identifier that reaches the text has already passed
//! `validate_identifier`/`parse_predicate`; every literal value travels as a
//! bind parameter, never interpolated.

use sqlx::sqlite::SqliteArguments;
use sqlx::Arguments;

use crate::semantic::query::{LogicalQuery, OrderDirection};
use crate::utils::identifier::Literal;

pub struct CompiledQuery {
    pub text: String,
    pub arguments: SqliteArguments<'static>,
}

pub fn compile(query: &LogicalQuery) -> CompiledQuery {
    let mut sql = String::new();
    sql.push_str("SELECT ");

    let mut select_parts: Vec<String> = query
        .dimension_projections
        .iter()
        .map(|p| format!("{} AS {}", p.expression, p.alias))
        .collect();

    let agg_sql = query.aggregate.aggregation.as_sql();
    let agg_expr = if agg_sql.contains('(') {
        format!("{} {}.{}) AS {}", agg_sql, query.source_table, query.aggregate.column, query.aggregate.alias)
    } else {
        format!("{}({}.{}) AS {}", agg_sql, query.source_table, query.aggregate.column, query.aggregate.alias)
    };
    select_parts.push(agg_expr);
    sql.push_str(&select_parts.join(", "));

    sql.push_str(&format!(" FROM {}", query.source_table));

    for join in &query.joins {
        sql.push_str(&format!(
            " LEFT JOIN {right} ON {left}.{key} = {right}.{key}",
            right = join.right_table,
            left = join.left_table,
            key = join.join_key,
        ));
    }

    let mut arguments = SqliteArguments::default();
    if !query.where_predicates.is_empty() {
        let mut clauses = Vec::with_capacity(query.where_predicates.len());
        for predicate in &query.where_predicates {
            clauses.push(format!("{} {} ?", predicate.identifier, predicate.op));
            match &predicate.literal {
                Literal::Number(n) => arguments.add(*n),
                Literal::Text(s) => arguments.add(s.clone()),
            }
        }
        sql.push_str(" WHERE ");
        sql.push_str(&clauses.join(" AND "));
    }

    if !query.group_by_positions.is_empty() {
        let positions: Vec<String> = query.group_by_positions.iter().map(|p| p.to_string()).collect();
        sql.push_str(&format!(" GROUP BY {}", positions.join(", ")));
    }

    if let Some((alias, direction)) = &query.order_by {
        let dir = match direction {
            OrderDirection::Asc => "ASC",
            OrderDirection::Desc => "DESC",
        };
        sql.push_str(&format!(" ORDER BY {alias} {dir}"));
    }

    sql.push_str(&format!(" LIMIT {}", query.limit));

    CompiledQuery { text: sql, arguments }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::model::Aggregation;
    use crate::semantic::query::{AggregateProjection, Projection};
    use crate::utils::identifier::parse_predicate;

    #[test]
    fn compiles_simple_aggregate_with_filter() {
        let query = LogicalQuery {
            source_table: "subscriptions".into(),
            joins: vec![],
            dimension_projections: vec![],
            aggregate: AggregateProjection {
                aggregation: Aggregation::Sum,
                column: "subscription_amount".into(),
                alias: "value".into(),
            },
            where_predicates: vec![parse_predicate("subscription_status = 'active'").unwrap()],
            group_by_positions: vec![],
            order_by: None,
            limit: 1000,
        };
        let compiled = compile(&query);
        assert!(compiled.text.contains("SUM(subscriptions.subscription_amount)"));
        assert!(compiled.text.contains("WHERE subscription_status = ?"));
        assert!(!compiled.text.contains(';'));
    }

    #[test]
    fn compiles_group_by_and_order() {
        let query = LogicalQuery {
            source_table: "subscriptions".into(),
            joins: vec![],
            dimension_projections: vec![Projection {
                expression: "strftime('%Y-%m', subscriptions.snapshot_date)".into(),
                alias: "snapshot_month".into(),
            }],
            aggregate: AggregateProjection {
                aggregation: Aggregation::CountDistinct,
                column: "customer_id".into(),
                alias: "value".into(),
            },
            where_predicates: vec![],
            group_by_positions: vec![1],
            order_by: Some(("snapshot_month".to_string(), OrderDirection::Asc)),
            limit: 1000,
        };
        let compiled = compile(&query);
        assert!(compiled.text.contains("GROUP BY 1"));
        assert!(compiled.text.contains("ORDER BY snapshot_month ASC"));
        assert!(compiled.text.contains("COUNT(DISTINCT subscriptions.customer_id)"));
    }
}
