//! Small collection helpers: `group_by` renders catalog dimensions by table
//! (`tools::list_dimensions`); `unique_ordered` dedupes catalog sample
//! values (`catalog::load`) and a planner request's requested dimensions
//! (`semantic::planner`).

use std::collections::HashSet;
use std::hash::Hash;

/// Groups items by a derived key, preserving insertion order within each group.
#[inline]
pub fn group_by<T, K, F>(items: Vec<T>, key_fn: F) -> std::collections::HashMap<K, Vec<T>>
where
    K: Eq + Hash,
    F: Fn(&T) -> K,
{
    let mut map: std::collections::HashMap<K, Vec<T>> = std::collections::HashMap::new();
    for item in items {
        map.entry(key_fn(&item)).or_default().push(item);
    }
    map
}

/// Deduplicates while preserving first-seen order.
#[inline]
pub fn unique_ordered<T: Eq + Hash + Clone>(items: Vec<T>) -> Vec<T> {
    let mut seen = HashSet::new();
    items.into_iter().filter(|item| seen.insert(item.clone())).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unique_ordered_keeps_first_occurrence_order() {
        assert_eq!(unique_ordered(vec![1, 2, 1, 3, 2]), vec![1, 2, 3]);
    }
}
