//! Catalog data model (spec §3): metrics, dimensions, canonical datasets,
//! and the connection block parsed from the semantic model YAML.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Aggregation {
    Sum,
    Count,
    CountDistinct,
    Avg,
    Min,
    Max,
}

impl Aggregation {
    pub fn as_sql(&self) -> &'static str {
        match self {
            Self::Sum => "SUM",
            Self::Count => "COUNT",
            Self::CountDistinct => "COUNT(DISTINCT",
            Self::Avg => "AVG",
            Self::Min => "MIN",
            Self::Max => "MAX",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MetricKind {
    Simple {
        table: String,
        aggregation: Aggregation,
        column: String,
        #[serde(default)]
        filters: Vec<String>,
    },
    Derived {
        formula: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricDef {
    pub name: String,
    pub display_name: String,
    #[serde(default)]
    pub description: String,
    #[serde(flatten)]
    pub kind: MetricKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DimensionKind {
    Categorical,
    Temporal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DimensionDef {
    pub name: String,
    pub display_name: String,
    pub kind: DimensionKind,
    pub table: String,
    pub column: Option<String>,
    pub sql_template: Option<String>,
    /// Temporal granularity label (month/quarter/year/...); ignored for categorical dimensions.
    pub granularity: Option<String>,
    /// Known values for a categorical dimension, used by the intent classifier
    /// to recognize a filter value mentioned in free text (spec §4.8).
    #[serde(default)]
    pub sample_values: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CanonicalDataset {
    pub name: String,
    pub display_name: String,
    #[serde(default)]
    pub metrics: Vec<String>,
    #[serde(default)]
    pub dimensions: Vec<String>,
    pub time_dimension: Option<String>,
    #[serde(default)]
    pub refresh_hint: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackendKind {
    EmbeddedOlap,
    ColumnarCloud,
    Lakehouse,
    Relational,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConnectionDef {
    pub backend: BackendKind,
    #[serde(flatten)]
    pub fields: HashMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SemanticModel {
    #[serde(default)]
    pub metrics: Vec<MetricDef>,
    #[serde(default)]
    pub dimensions: Vec<DimensionDef>,
    #[serde(default)]
    pub canonical_datasets: Vec<CanonicalDataset>,
    pub connection: ConnectionDef,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CatalogFile {
    pub semantic_model: SemanticModel,
}

/// The loaded, validated representation of the YAML semantic model.
///
/// Immutable after load; `Catalog::reload` builds a brand new instance and
/// the caller swaps the shared pointer atomically (see `catalog::store`).
#[derive(Debug, Clone)]
pub struct Catalog {
    pub metrics: HashMap<String, MetricDef>,
    pub dimensions: HashMap<String, DimensionDef>,
    pub datasets: HashMap<String, CanonicalDataset>,
    /// Declaration order, used to break retriever ties stably (spec §4.9).
    pub metric_order: Vec<String>,
    pub dimension_order: Vec<String>,
    pub connection: ConnectionDef,
}
