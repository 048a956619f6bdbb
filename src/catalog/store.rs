//! Catalog store (spec §4.1): lookup and atomic reload.
//!
//! `reload()` builds the replacement catalog fully before swapping the
//! shared pointer, so a reader observes either the old catalog or the new
//! one in full — never a partial one (spec §5, shared-resource policy).

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::RwLock;

use crate::catalog::load::{load_from_path, suggest};
use crate::catalog::model::{Catalog, CanonicalDataset, DimensionDef, MetricDef};
use crate::utils::{AppError, AppResult};

pub struct CatalogStore {
    path: PathBuf,
    current: RwLock<Arc<Catalog>>,
}

impl CatalogStore {
    pub async fn load(path: PathBuf) -> AppResult<Self> {
        let catalog = load_from_path(&path).await?;
        Ok(Self { path, current: RwLock::new(Arc::new(catalog)) })
    }

    pub fn snapshot(&self) -> Arc<Catalog> {
        self.current.read().expect("catalog lock poisoned").clone()
    }

    /// Atomic swap: the new catalog is fully built and validated before
    /// replacing the current one.
    pub async fn reload(&self) -> AppResult<()> {
        let fresh = load_from_path(&self.path).await?;
        *self.current.write().expect("catalog lock poisoned") = Arc::new(fresh);
        Ok(())
    }

    pub fn metrics(&self) -> Vec<MetricDef> {
        let snapshot = self.snapshot();
        snapshot.metric_order.iter().filter_map(|n| snapshot.metrics.get(n).cloned()).collect()
    }

    pub fn dimensions(&self) -> Vec<DimensionDef> {
        let snapshot = self.snapshot();
        snapshot.dimension_order.iter().filter_map(|n| snapshot.dimensions.get(n).cloned()).collect()
    }

    pub fn datasets(&self) -> Vec<CanonicalDataset> {
        self.snapshot().datasets.values().cloned().collect()
    }

    pub fn metric(&self, name: &str) -> AppResult<MetricDef> {
        let snapshot = self.snapshot();
        snapshot.metrics.get(name).cloned().ok_or_else(|| {
            let candidates: Vec<String> = snapshot.metric_order.clone();
            AppError::catalog_miss("metric", name, suggest(name, &candidates))
        })
    }

    pub fn dimension(&self, name: &str) -> AppResult<DimensionDef> {
        let snapshot = self.snapshot();
        snapshot.dimensions.get(name).cloned().ok_or_else(|| {
            let candidates: Vec<String> = snapshot.dimension_order.clone();
            AppError::catalog_miss("dimension", name, suggest(name, &candidates))
        })
    }

    pub fn dataset(&self, name: &str) -> AppResult<CanonicalDataset> {
        let snapshot = self.snapshot();
        snapshot.datasets.get(name).cloned().ok_or_else(|| {
            let candidates: Vec<String> = snapshot.datasets.keys().cloned().collect();
            AppError::catalog_miss("canonical dataset", name, suggest(name, &candidates))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    async fn write_sample() -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
semantic_model:
  metrics:
    - name: total_mrr
      display_name: Total MRR
      kind: simple
      table: subscriptions
      aggregation: sum
      column: subscription_amount
  connection:
    backend: embedded-olap
    path: "./data/analytics.db"
"#
        )
        .unwrap();
        file
    }

    #[tokio::test]
    async fn looks_up_and_reports_miss_with_suggestions() {
        let file = write_sample().await;
        let store = CatalogStore::load(file.path().to_path_buf()).await.unwrap();
        assert!(store.metric("total_mrr").is_ok());
        let err = store.metric("total_mr").unwrap_err();
        match err {
            AppError::CatalogMiss { suggestions, .. } => assert_eq!(suggestions[0], "total_mrr"),
            _ => panic!("expected CatalogMiss"),
        }
    }

    #[tokio::test]
    async fn reload_is_atomic_and_visible() {
        let file = write_sample().await;
        let store = CatalogStore::load(file.path().to_path_buf()).await.unwrap();
        store.reload().await.unwrap();
        assert!(store.metric("total_mrr").is_ok());
    }
}
