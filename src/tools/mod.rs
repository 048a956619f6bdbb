//! Tool-protocol adapter (spec §4.14, §6): exposes the semantic layer's
//! operations as named tools to a host AI runtime over a message-framed
//! transport, using the `rmcp` server macros. Stateless except for the
//! orchestrator reference it dispatches through.

use std::sync::Arc;

use rmcp::handler::server::router::tool::ToolRouter;
use rmcp::handler::server::wrapper::Parameters;
use rmcp::model::{ServerCapabilities, ServerInfo};
use rmcp::{tool, tool_handler, tool_router, ServerHandler};
use schemars::JsonSchema;
use serde::Deserialize;

use crate::orchestrator::Orchestrator;
use crate::semantic::planner::PlanRequest;
use crate::semantic::query::OrderDirection;
use crate::utils::AppError;

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ExplainMetricRequest {
    pub name: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct QueryMetricRequest {
    pub name: String,
    #[serde(default)]
    pub dimensions: Vec<String>,
    #[serde(default)]
    pub filters: Vec<String>,
    pub order_by: Option<String>,
    pub order_direction: Option<String>,
    pub limit: Option<u32>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct DimensionValuesRequest {
    pub name: String,
    pub limit: Option<u32>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct CanonicalDatasetRequest {
    pub name: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ClearCacheRequest {
    pub pattern: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct AskAiAnalystRequest {
    pub question: String,
    pub session_id: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct SaveAsRequest {
    pub custom_name: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct AddToDashboardRequest {
    pub existing_name: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct CleanupDashboardsRequest {
    pub max_age_days: Option<u32>,
}

#[derive(Clone)]
pub struct AnalystTools {
    orchestrator: Arc<Orchestrator>,
    tool_router: ToolRouter<Self>,
}

impl AnalystTools {
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self { orchestrator, tool_router: Self::tool_router() }
    }
}

#[tool_router(router = tool_router)]
impl AnalystTools {
    #[tool(description = "Enumerate catalog metrics with name, display name, and description.")]
    async fn list_metrics(&self) -> Result<String, String> {
        let metrics = self.orchestrator.catalog().metrics();
        if metrics.is_empty() {
            return Ok("No metrics defined in the catalog.".to_string());
        }
        let mut out = String::from("| name | display_name | description |\n|---|---|---|\n");
        for metric in metrics {
            out.push_str(&format!("| {} | {} | {} |\n", metric.name, metric.display_name, metric.description));
        }
        Ok(out)
    }

    #[tool(description = "Enumerate dimensions with kind and source table, grouped by table.")]
    async fn list_dimensions(&self) -> Result<String, String> {
        let dimensions = self.orchestrator.catalog().dimensions();
        if dimensions.is_empty() {
            return Ok("No dimensions defined in the catalog.".to_string());
        }
        let mut by_table = crate::utils::group_by(dimensions, |d| d.table.clone());
        let mut tables: Vec<String> = by_table.keys().cloned().collect();
        tables.sort();
        let mut out = String::new();
        for table in tables {
            out.push_str(&format!("### {table}\n\n| name | kind |\n|---|---|\n"));
            for dim in by_table.remove(&table).unwrap_or_default() {
                out.push_str(&format!("| {} | {:?} |\n", dim.name, dim.kind));
            }
            out.push('\n');
        }
        Ok(out)
    }

    #[tool(description = "Render a metric's definition (simple aggregation or derived formula) and dependencies.")]
    async fn explain_metric(&self, Parameters(req): Parameters<ExplainMetricRequest>) -> Result<String, String> {
        let metric = self.orchestrator.catalog().metric(&req.name).map_err(render)?;
        let body = match &metric.kind {
            crate::catalog::model::MetricKind::Simple { table, aggregation, column, filters } => format!(
                "**{}** ({})\n\n{:?}({}.{}){}",
                metric.display_name,
                metric.name,
                aggregation,
                table,
                column,
                if filters.is_empty() { String::new() } else { format!("\n\nFilters: {}", filters.join(", ")) }
            ),
            crate::catalog::model::MetricKind::Derived { formula } => {
                format!("**{}** ({})\n\nDerived: `{}`", metric.display_name, metric.name, formula)
            },
        };
        Ok(body)
    }

    #[tool(description = "Execute the planner path directly for a metric; return rows, dialect text, and timing.")]
    async fn query_metric(&self, Parameters(req): Parameters<QueryMetricRequest>) -> Result<String, String> {
        let catalog = self.orchestrator.catalog().snapshot();
        let order_by = match (req.order_by, req.order_direction.as_deref()) {
            (Some(alias), Some("desc")) => Some((alias, OrderDirection::Desc)),
            (Some(alias), _) => Some((alias, OrderDirection::Asc)),
            (None, _) => None,
        };
        let request = PlanRequest { metric: req.name, dimensions: req.dimensions, filters: req.filters, order_by, limit: req.limit };
        let (rows, hit, dialect_text) = self.orchestrator.plan_and_execute(&catalog, &request).await.map_err(render)?;
        Ok(render_rows(&rows.columns, &rows.rows, &dialect_text, hit))
    }

    #[tool(description = "Return distinct values of a categorical dimension.")]
    async fn get_dimension_values(&self, Parameters(req): Parameters<DimensionValuesRequest>) -> Result<String, String> {
        let dim = self.orchestrator.catalog().dimension(&req.name).map_err(render)?;
        if dim.kind != crate::catalog::model::DimensionKind::Categorical {
            return Err(format!("dimension '{}' is not categorical", req.name));
        }
        let catalog = self.orchestrator.catalog().snapshot();
        let request = PlanRequest {
            metric: catalog.metric_order.first().cloned().ok_or_else(|| "catalog has no metrics".to_string())?,
            dimensions: vec![req.name.clone()],
            filters: vec![],
            order_by: None,
            limit: req.limit.or(Some(1000)),
        };
        let (rows, _, _) = self.orchestrator.plan_and_execute(&catalog, &request).await.map_err(render)?;
        let values: Vec<String> = rows.rows.iter().filter_map(|r| r.first().and_then(|v| v.as_str()).map(String::from)).collect();
        Ok(values.join(", "))
    }

    #[tool(description = "Enumerate canonical dataset bundles.")]
    async fn list_canonical_datasets(&self) -> Result<String, String> {
        let datasets = self.orchestrator.catalog().datasets();
        if datasets.is_empty() {
            return Ok("No canonical datasets defined.".to_string());
        }
        let mut out = String::new();
        for dataset in datasets {
            out.push_str(&format!("**{}**: metrics=[{}] dimensions=[{}]\n", dataset.display_name, dataset.metrics.join(", "), dataset.dimensions.join(", ")));
        }
        Ok(out)
    }

    #[tool(description = "Execute each bundled metric over a canonical dataset's dimensions.")]
    async fn query_canonical_dataset(&self, Parameters(req): Parameters<CanonicalDatasetRequest>) -> Result<String, String> {
        let dataset = self.orchestrator.catalog().dataset(&req.name).map_err(render)?;
        let catalog = self.orchestrator.catalog().snapshot();
        let mut out = String::new();
        for metric in &dataset.metrics {
            let request = PlanRequest {
                metric: metric.clone(),
                dimensions: dataset.dimensions.clone(),
                filters: vec![],
                order_by: None,
                limit: None,
            };
            let (rows, _, dialect_text) = self.orchestrator.plan_and_execute(&catalog, &request).await.map_err(render)?;
            out.push_str(&format!("## {metric}\n\n{}\n", render_rows(&rows.columns, &rows.rows, &dialect_text, false)));
        }
        Ok(out)
    }

    #[tool(description = "Return current cache counters.")]
    async fn cache_stats(&self) -> Result<String, String> {
        let stats = self.orchestrator.cache().stats();
        Ok(format!(
            "hits={} misses={} size={}/{} ttl_seconds={}",
            stats.hits, stats.misses, stats.size, stats.max_entries, stats.ttl_seconds
        ))
    }

    #[tool(description = "Invalidate the query cache (admin). Optional pattern matches the fingerprint's hex prefix.")]
    async fn clear_cache(&self, Parameters(req): Parameters<ClearCacheRequest>) -> Result<String, String> {
        let removed = self.orchestrator.cache().invalidate(req.pattern.as_deref());
        Ok(format!("invalidated {removed} cache entries"))
    }

    #[tool(description = "Full conversational pipeline over a natural-language question; auto-saves a dashboard on success.")]
    async fn ask_ai_analyst(&self, Parameters(req): Parameters<AskAiAnalystRequest>) -> Result<String, String> {
        let response = self.orchestrator.ask(&req.question, req.session_id).await.map_err(render)?;
        let mut out = format!("{}\n\n", response.narrative);
        for insight in &response.insights {
            out.push_str(&format!("- {insight}\n"));
        }
        out.push('\n');
        out.push_str(&response.markdown_table);
        if let Some(name) = &response.dashboard_name {
            out.push_str(&format!("\n\nSaved as dashboard `{name}`.\n"));
        }
        out.push_str("\nFollow-ups:\n");
        for suggestion in &response.follow_ups {
            out.push_str(&format!("- {suggestion}\n"));
        }
        Ok(out)
    }

    #[tool(description = "Rename the last auto-generated dashboard, granting it immunity from the TTL sweep.")]
    async fn save_as(&self, Parameters(req): Parameters<SaveAsRequest>) -> Result<String, String> {
        let Some((auto_name, _)) = self.orchestrator.last_dashboard().await else {
            return Err(AppError::DashboardMissing("no dashboard has been auto-generated yet".into()).render_markdown());
        };
        let renamed = self.orchestrator.dashboards().rename(&auto_name, &req.custom_name).await.map_err(render)?;
        Ok(format!("Renamed `{auto_name}` to `{renamed}`."))
    }

    #[tool(description = "Append the last chart to a named dashboard.")]
    async fn add_to_dashboard(&self, Parameters(req): Parameters<AddToDashboardRequest>) -> Result<String, String> {
        let Some((_, chart)) = self.orchestrator.last_dashboard().await else {
            return Err(AppError::DashboardMissing("no chart is available to append".into()).render_markdown());
        };
        let count = self.orchestrator.dashboards().append(&req.existing_name, chart).await.map_err(render)?;
        Ok(format!("Dashboard `{}` now has {count} chart(s).", req.existing_name))
    }

    #[tool(description = "Enumerate dashboard artifacts.")]
    async fn list_dashboards(&self) -> Result<String, String> {
        let dashboards = self.orchestrator.dashboards().list().await.map_err(render)?;
        if dashboards.is_empty() {
            return Ok("No dashboards saved yet.".to_string());
        }
        let mut out = String::from("| name | charts | generated | created_at |\n|---|---|---|---|\n");
        for d in dashboards {
            out.push_str(&format!("| {} | {} | {} | {} |\n", d.name, d.chart_count, d.generated, d.created_at));
        }
        Ok(out)
    }

    #[tool(description = "Sweep old auto-generated dashboards (admin).")]
    async fn cleanup_dashboards(&self, Parameters(req): Parameters<CleanupDashboardsRequest>) -> Result<String, String> {
        let removed = self.orchestrator.dashboards().sweep(req.max_age_days.unwrap_or(7)).await.map_err(render)?;
        Ok(format!("removed {} dashboard(s): {}", removed.len(), removed.join(", ")))
    }
}

#[tool_handler(router = self.tool_router)]
impl ServerHandler for AnalystTools {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            instructions: Some(
                "Conversational analytics semantic layer: query metrics, explore dimensions, and ask free-form questions via ask_ai_analyst."
                    .into(),
            ),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }
}

fn render(err: AppError) -> String {
    err.render_markdown()
}

fn render_rows(columns: &[String], rows: &[Vec<serde_json::Value>], dialect_text: &str, cache_hit: bool) -> String {
    let mut out = format!("```sql\n{dialect_text}\n```\n\ncache_hit: {cache_hit}\n\n");
    out.push_str("| ");
    out.push_str(&columns.join(" | "));
    out.push_str(" |\n|");
    out.push_str(&"---|".repeat(columns.len()));
    out.push('\n');
    for row in rows.iter().take(50) {
        out.push_str("| ");
        let cells: Vec<String> = row.iter().map(|v| v.to_string()).collect();
        out.push_str(&cells.join(" | "));
        out.push_str(" |\n");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::embedded::EmbeddedOlapDriver;
    use crate::cache::QueryCache;
    use crate::catalog::store::CatalogStore;
    use crate::dashboard::DashboardLifecycle;
    use crate::orchestrator::CachedRows;
    use crate::session::SessionStore;
    use std::io::Write;
    use std::time::Duration;

    async fn sample_tools() -> (AnalystTools, tempfile::TempDir) {
        let mut catalog_file = tempfile::NamedTempFile::new().unwrap();
        write!(
            catalog_file,
            r#"
semantic_model:
  metrics:
    - name: total_mrr
      display_name: Total MRR
      kind: simple
      table: subscriptions
      aggregation: sum
      column: subscription_amount
  dimensions:
    - name: customer_segment
      display_name: Customer Segment
      kind: categorical
      table: customers
      column: segment
    - name: snapshot_month
      display_name: Snapshot Month
      kind: temporal
      table: subscriptions
      sql_template: "strftime('%Y-%m', {{{{ Table }}}}.snapshot_date)"
      granularity: month
  connection:
    backend: embedded-olap
    path: "./data/analytics.db"
"#
        )
        .unwrap();

        let catalog = Arc::new(CatalogStore::load(catalog_file.path().to_path_buf()).await.unwrap());
        let driver = Arc::new(EmbeddedOlapDriver::connect(":memory:").await.unwrap());
        driver.seed_sample_data().await.unwrap();
        let columns =
            driver.introspect_columns(&["subscriptions".to_string(), "customers".to_string()]).await.unwrap();
        let cache: Arc<QueryCache<CachedRows>> = Arc::new(QueryCache::new(Duration::from_secs(60), 100));
        let sessions = Arc::new(SessionStore::new(Duration::from_secs(3600), 10));
        let dashboard_dir = tempfile::tempdir().unwrap();
        let dashboards = Arc::new(DashboardLifecycle::new(dashboard_dir.path().to_path_buf()));
        let orchestrator = Arc::new(Orchestrator::new(
            catalog,
            driver,
            columns,
            cache,
            sessions,
            dashboards,
            "embedded-olap",
            Duration::from_secs(15),
        ));
        (AnalystTools::new(orchestrator), dashboard_dir)
    }

    #[tokio::test]
    async fn list_dimensions_groups_by_source_table() {
        let (tools, _dir) = sample_tools().await;
        let out = tools.list_dimensions().await.unwrap();
        assert!(out.find("### customers").unwrap() < out.find("customer_segment").unwrap());
        assert!(out.find("### subscriptions").unwrap() < out.find("snapshot_month").unwrap());
    }
}
