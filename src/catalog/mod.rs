//! Catalog store: loading, validation, and lookup of the YAML semantic model.

pub mod load;
pub mod model;
pub mod store;

pub use model::{
    Aggregation, BackendKind, CanonicalDataset, Catalog, ConnectionDef, DimensionDef, DimensionKind,
    MetricDef, MetricKind,
};
pub use store::CatalogStore;
