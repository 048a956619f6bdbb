//! Logical query model (spec §3): the planner's output, opaque to clients.

use crate::catalog::model::Aggregation;
use crate::utils::identifier::Predicate;

#[derive(Debug, Clone, PartialEq)]
pub struct JoinStep {
    pub left_table: String,
    pub right_table: String,
    pub join_key: String,
    pub left_only: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Projection {
    pub expression: String,
    pub alias: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AggregateProjection {
    pub aggregation: Aggregation,
    pub column: String,
    pub alias: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderDirection {
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LogicalQuery {
    pub source_table: String,
    pub joins: Vec<JoinStep>,
    pub dimension_projections: Vec<Projection>,
    pub aggregate: AggregateProjection,
    pub where_predicates: Vec<Predicate>,
    pub group_by_positions: Vec<usize>,
    pub order_by: Option<(String, OrderDirection)>,
    pub limit: u32,
}
