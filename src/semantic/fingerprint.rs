//! Query fingerprint (spec §3): a deterministic hash over the fields that
//! fully determine a query's result, used as the cache key and single-flight
//! key. Byte-identical inputs always fingerprint identically (spec §8,
//! testable property 3).

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

#[derive(Debug, Clone)]
pub struct FingerprintInput<'a> {
    pub backend: &'a str,
    pub metric: &'a str,
    pub dimensions: &'a [String],
    pub filters: &'a [String],
    pub order_by: Option<&'a str>,
    pub limit: u32,
}

/// Returns a lowercase hex-encoded fingerprint. Dimensions and filters are
/// sorted before hashing so caller-supplied ordering never changes the key.
pub fn compute(input: &FingerprintInput<'_>) -> String {
    let mut dims: Vec<&String> = input.dimensions.iter().collect();
    dims.sort();
    let mut filters: Vec<&String> = input.filters.iter().collect();
    filters.sort();

    let mut hasher = DefaultHasher::new();
    input.backend.hash(&mut hasher);
    input.metric.hash(&mut hasher);
    dims.hash(&mut hasher);
    filters.hash(&mut hasher);
    input.order_by.hash(&mut hasher);
    input.limit.hash(&mut hasher);
    format!("{:016x}", hasher.finish())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_inputs_fingerprint_identically() {
        let a = FingerprintInput {
            backend: "embedded-olap",
            metric: "total_mrr",
            dimensions: &["customer_segment".to_string(), "snapshot_month".to_string()],
            filters: &[],
            order_by: None,
            limit: 1000,
        };
        let b = FingerprintInput {
            backend: "embedded-olap",
            metric: "total_mrr",
            dimensions: &["snapshot_month".to_string(), "customer_segment".to_string()],
            filters: &[],
            order_by: None,
            limit: 1000,
        };
        assert_eq!(compute(&a), compute(&b));
    }

    #[test]
    fn different_limit_changes_fingerprint() {
        let base = FingerprintInput {
            backend: "embedded-olap",
            metric: "total_mrr",
            dimensions: &[],
            filters: &[],
            order_by: None,
            limit: 1000,
        };
        let mut other = base.clone();
        other.limit = 10;
        assert_ne!(compute(&base), compute(&other));
    }
}
