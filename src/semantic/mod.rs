//! Semantic layer: expression evaluation, dimension resolution, query
//! planning, and fingerprinting (spec §4.2–§4.4, §3).

pub mod dimension;
pub mod expression;
pub mod fingerprint;
pub mod planner;
pub mod query;

pub use fingerprint::{compute as fingerprint, FingerprintInput};
pub use planner::{Plan, PlanRequest, TableColumns};
pub use query::{AggregateProjection, JoinStep, LogicalQuery, OrderDirection, Projection};
