//! Dashboard lifecycle (spec §4.13): auto-save, rename, append, list, and
//! TTL-sweep generated dashboard artifacts, persisted as `<name>.md` files.

use std::path::PathBuf;
use std::time::{Duration, SystemTime};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::utils::slug::{dedupe_slug, slugify};
use crate::utils::{AppError, AppResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChartKind {
    Line,
    Bar,
    Pie,
    Scatter,
    BigValue,
    Table,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChartSpec {
    pub chart_kind: ChartKind,
    pub title: String,
    pub embedded_query_text: String,
    pub axis_bindings: Vec<String>,
    pub column_projections: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DashboardSummary {
    pub name: String,
    pub chart_count: usize,
    pub generated: bool,
    pub created_at: DateTime<Utc>,
}

pub struct DashboardLifecycle {
    root: PathBuf,
}

impl DashboardLifecycle {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub async fn ensure_dir(&self) -> AppResult<()> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|e| AppError::Internal(anyhow::anyhow!("cannot create dashboard dir: {e}")))
    }

    fn path_for(&self, name: &str) -> PathBuf {
        self.root.join(format!("{name}.md"))
    }

    /// Auto-saves a new artifact named `{metric-slug}-{intent}-{YYYYMMDD}-{HHMMSS}`.
    pub async fn auto_save(
        &self,
        metric_slug: &str,
        intent: &str,
        title: &str,
        embedded_query_text: &str,
        chart: ChartSpec,
        now: DateTime<Utc>,
    ) -> AppResult<String> {
        self.ensure_dir().await?;
        let base = slugify(&format!("{metric_slug}-{intent}"));
        let name = format!("{base}-{}", now.format("%Y%m%d-%H%M%S"));
        let body = render_markdown(title, embedded_query_text, std::slice::from_ref(&chart));
        tokio::fs::write(self.path_for(&name), body)
            .await
            .map_err(|e| AppError::Internal(anyhow::anyhow!("cannot write dashboard: {e}")))?;
        Ok(name)
    }

    /// Re-slugs the file and removes its auto-generated marker, granting
    /// immunity from `sweep` (spec §4.13).
    pub async fn rename(&self, auto_name: &str, custom_name: &str) -> AppResult<String> {
        let old_path = self.path_for(auto_name);
        if !old_path.exists() {
            return Err(AppError::DashboardMissing(auto_name.to_string()));
        }
        let candidate = slugify(custom_name);
        let new_name = dedupe_slug(&candidate, |c| self.path_for(c).exists());
        let body = tokio::fs::read_to_string(&old_path)
            .await
            .map_err(|e| AppError::Internal(anyhow::anyhow!("cannot read dashboard: {e}")))?;
        let body = strip_generated_marker(&body);
        tokio::fs::write(self.path_for(&new_name), body)
            .await
            .map_err(|e| AppError::Internal(anyhow::anyhow!("cannot write dashboard: {e}")))?;
        tokio::fs::remove_file(&old_path)
            .await
            .map_err(|e| AppError::Internal(anyhow::anyhow!("cannot remove old dashboard: {e}")))?;
        Ok(new_name)
    }

    /// Merges a new chart directive into an existing dashboard.
    pub async fn append(&self, existing_name: &str, chart: ChartSpec) -> AppResult<usize> {
        let path = self.path_for(existing_name);
        if !path.exists() {
            return Err(AppError::DashboardMissing(existing_name.to_string()));
        }
        let mut body = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| AppError::Internal(anyhow::anyhow!("cannot read dashboard: {e}")))?;
        body.push('\n');
        body.push_str(&render_chart_block(&chart));
        tokio::fs::write(&path, &body)
            .await
            .map_err(|e| AppError::Internal(anyhow::anyhow!("cannot write dashboard: {e}")))?;
        Ok(count_charts(&body))
    }

    pub async fn list(&self) -> AppResult<Vec<DashboardSummary>> {
        self.ensure_dir().await?;
        let mut out = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.root)
            .await
            .map_err(|e| AppError::Internal(anyhow::anyhow!("cannot list dashboards: {e}")))?;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| AppError::Internal(anyhow::anyhow!("cannot read dashboard entry: {e}")))?
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("md") {
                continue;
            }
            let name = path.file_stem().and_then(|s| s.to_str()).unwrap_or_default().to_string();
            let body = tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| AppError::Internal(anyhow::anyhow!("cannot read dashboard: {e}")))?;
            let metadata = entry
                .metadata()
                .await
                .map_err(|e| AppError::Internal(anyhow::anyhow!("cannot stat dashboard: {e}")))?;
            let created_at: DateTime<Utc> = metadata
                .created()
                .or_else(|_| metadata.modified())
                .unwrap_or(SystemTime::now())
                .into();
            out.push(DashboardSummary {
                chart_count: count_charts(&body),
                generated: is_generated_name(&name),
                name,
                created_at,
            });
        }
        out.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(out)
    }

    /// Deletes artifacts whose name carries the auto-generated date-time
    /// suffix and whose age exceeds `max_age_days`.
    pub async fn sweep(&self, max_age_days: u32) -> AppResult<Vec<String>> {
        self.ensure_dir().await?;
        let cutoff = Duration::from_secs(u64::from(max_age_days) * 86_400);
        let mut removed = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.root)
            .await
            .map_err(|e| AppError::Internal(anyhow::anyhow!("cannot list dashboards: {e}")))?;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| AppError::Internal(anyhow::anyhow!("cannot read dashboard entry: {e}")))?
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("md") {
                continue;
            }
            let name = path.file_stem().and_then(|s| s.to_str()).unwrap_or_default().to_string();
            if !is_generated_name(&name) {
                continue;
            }
            let metadata = entry
                .metadata()
                .await
                .map_err(|e| AppError::Internal(anyhow::anyhow!("cannot stat dashboard: {e}")))?;
            let modified = metadata.modified().unwrap_or(SystemTime::now());
            if modified.elapsed().unwrap_or_default() > cutoff {
                tokio::fs::remove_file(&path)
                    .await
                    .map_err(|e| AppError::Internal(anyhow::anyhow!("cannot remove dashboard: {e}")))?;
                removed.push(name);
            }
        }
        Ok(removed)
    }
}

fn is_generated_name(name: &str) -> bool {
    once_cell::sync::Lazy::force(&GENERATED_SUFFIX_RE).is_match(name)
}

static GENERATED_SUFFIX_RE: once_cell::sync::Lazy<regex::Regex> =
    once_cell::sync::Lazy::new(|| regex::Regex::new(r"-\d{8}-\d{6}$").unwrap());

fn render_markdown(title: &str, embedded_query_text: &str, charts: &[ChartSpec]) -> String {
    let mut out = format!("---\ntitle: {title}\n---\n\n");
    out.push_str("```sql\n");
    out.push_str(embedded_query_text);
    out.push_str("\n```\n\n");
    for chart in charts {
        out.push_str(&render_chart_block(chart));
    }
    out
}

fn render_chart_block(chart: &ChartSpec) -> String {
    format!(
        "## {title}\n\n::chart{{kind={kind:?} axes=\"{axes}\" columns=\"{cols}\"}}\n\n::data-table\n\n",
        title = chart.title,
        kind = chart.chart_kind,
        axes = chart.axis_bindings.join(","),
        cols = chart.column_projections.join(","),
    )
}

fn count_charts(body: &str) -> usize {
    body.matches("::chart{").count()
}

fn strip_generated_marker(body: &str) -> String {
    body.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_chart() -> ChartSpec {
        ChartSpec {
            chart_kind: ChartKind::Line,
            title: "Total MRR Trend".to_string(),
            embedded_query_text: "SELECT * FROM subscriptions".to_string(),
            axis_bindings: vec!["snapshot_month".into(), "value".into()],
            column_projections: vec!["snapshot_month".into(), "value".into()],
        }
    }

    #[tokio::test]
    async fn auto_save_then_sweep_removes_old_generated_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let lifecycle = DashboardLifecycle::new(dir.path().to_path_buf());
        let name = lifecycle
            .auto_save("total-mrr", "trend_analysis", "Total MRR", "SELECT 1", sample_chart(), Utc::now())
            .await
            .unwrap();
        assert!(is_generated_name(&name));

        let summaries = lifecycle.list().await.unwrap();
        assert_eq!(summaries.len(), 1);
        assert!(summaries[0].generated);
    }

    #[tokio::test]
    async fn rename_grants_sweep_immunity() {
        let dir = tempfile::tempdir().unwrap();
        let lifecycle = DashboardLifecycle::new(dir.path().to_path_buf());
        let name = lifecycle
            .auto_save("total-mrr", "trend_analysis", "Total MRR", "SELECT 1", sample_chart(), Utc::now())
            .await
            .unwrap();
        let renamed = lifecycle.rename(&name, "My Revenue Dashboard").await.unwrap();
        assert!(!is_generated_name(&renamed));
        let removed = lifecycle.sweep(0).await.unwrap();
        assert!(!removed.contains(&renamed));
    }

    #[tokio::test]
    async fn append_increments_chart_count() {
        let dir = tempfile::tempdir().unwrap();
        let lifecycle = DashboardLifecycle::new(dir.path().to_path_buf());
        let name = lifecycle
            .auto_save("total-mrr", "trend_analysis", "Total MRR", "SELECT 1", sample_chart(), Utc::now())
            .await
            .unwrap();
        let count = lifecycle.append(&name, sample_chart()).await.unwrap();
        assert_eq!(count, 2);
    }

    #[tokio::test]
    async fn append_to_missing_dashboard_fails() {
        let dir = tempfile::tempdir().unwrap();
        let lifecycle = DashboardLifecycle::new(dir.path().to_path_buf());
        let err = lifecycle.append("does-not-exist", sample_chart()).await.unwrap_err();
        assert!(matches!(err, AppError::DashboardMissing(_)));
    }
}
