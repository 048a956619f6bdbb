//! Conversation orchestrator (spec §4.12): drives the six-stage pipeline
//! (session acquire → classify → retrieve → synthesize → plan → cache-aware
//! execute → interpret) for a single natural-language turn, with a
//! per-call wall-clock budget and dashboard auto-save on success.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use uuid::Uuid;

use crate::backend::{EmbeddedOlapDriver, RowSet};
use crate::cache::QueryCache;
use crate::catalog::store::CatalogStore;
use crate::dashboard::{ChartKind, ChartSpec, DashboardLifecycle};
use crate::nlp::{self, Intent, RecencyContext};
use crate::semantic::fingerprint::{self, FingerprintInput};
use crate::semantic::planner::{self, Plan, PlanRequest, TableColumns};
use crate::session::{ResultSnapshot, SessionStore, TurnRecord};
use crate::utils::slug::slugify;
use crate::utils::{AppError, AppResult};

/// A cloneable snapshot of a driver result, suitable for the query cache
/// (`QueryCache<V>` requires `V: Clone`; `backend::RowSet` itself is not,
/// since it borrows nothing but is built fresh per execution).
#[derive(Debug, Clone)]
pub struct CachedRows {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<serde_json::Value>>,
    pub dialect_text: String,
    pub elapsed_ms: u128,
}

impl From<RowSet> for CachedRows {
    fn from(rows: RowSet) -> Self {
        Self { columns: rows.columns, rows: rows.rows, dialect_text: rows.dialect_text, elapsed_ms: rows.elapsed.as_millis() }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AskResponse {
    pub session_id: String,
    pub intent: String,
    pub metric: Option<String>,
    pub dimensions: Vec<String>,
    pub narrative: String,
    pub insights: Vec<String>,
    pub follow_ups: Vec<String>,
    pub markdown_table: String,
    pub dialect_text: Option<String>,
    pub cache_hit: bool,
    pub dashboard_name: Option<String>,
}

pub struct Orchestrator {
    catalog: Arc<CatalogStore>,
    driver: Arc<EmbeddedOlapDriver>,
    columns: TableColumns,
    cache: Arc<QueryCache<CachedRows>>,
    sessions: Arc<SessionStore>,
    dashboards: Arc<DashboardLifecycle>,
    backend_name: String,
    call_timeout: Duration,
    /// The most recently auto-saved dashboard name and the chart that went
    /// into it, used by the `save_as`/`add_to_dashboard` tools (spec §6).
    last_dashboard: tokio::sync::Mutex<Option<(String, ChartSpec)>>,
}

impl Orchestrator {
    pub fn new(
        catalog: Arc<CatalogStore>,
        driver: Arc<EmbeddedOlapDriver>,
        columns: TableColumns,
        cache: Arc<QueryCache<CachedRows>>,
        sessions: Arc<SessionStore>,
        dashboards: Arc<DashboardLifecycle>,
        backend_name: impl Into<String>,
        call_timeout: Duration,
    ) -> Self {
        Self {
            catalog,
            driver,
            columns,
            cache,
            sessions,
            dashboards,
            backend_name: backend_name.into(),
            call_timeout,
            last_dashboard: tokio::sync::Mutex::new(None),
        }
    }

    /// The most recently auto-saved dashboard name and chart, if any.
    pub async fn last_dashboard(&self) -> Option<(String, ChartSpec)> {
        self.last_dashboard.lock().await.clone()
    }

    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    pub fn dashboards(&self) -> &Arc<DashboardLifecycle> {
        &self.dashboards
    }

    pub fn cache(&self) -> &Arc<QueryCache<CachedRows>> {
        &self.cache
    }

    pub fn catalog(&self) -> &Arc<CatalogStore> {
        &self.catalog
    }

    /// Runs one conversational turn end-to-end (spec §4.12). `session_id`
    /// is created on first use if absent.
    #[tracing::instrument(skip(self, question), fields(session_id = %session_id.clone().unwrap_or_default()))]
    pub async fn ask(&self, question: &str, session_id: Option<String>) -> AppResult<AskResponse> {
        let session_id = session_id.unwrap_or_else(|| Uuid::new_v4().to_string());
        let budget = self.call_timeout;
        match tokio::time::timeout(budget, self.ask_inner(question, &session_id)).await {
            Ok(result) => result,
            Err(_) => Err(AppError::Timeout(budget)),
        }
    }

    async fn ask_inner(&self, question: &str, session_id: &str) -> AppResult<AskResponse> {
        let (last_metrics, last_dimensions) =
            self.sessions.with_session(session_id, |s| (s.last_metrics.clone(), s.last_dimensions.clone())).await;
        let recency = RecencyContext { last_metrics: &last_metrics, last_dimensions: &last_dimensions };

        let catalog = self.catalog.snapshot();
        let mut understanding = nlp::classify(question, &catalog);

        // Merge session context into the classifier input (spec §4.12 step
        // 2): a short pronoun-like follow-up ("show the trend") legitimately
        // falls below the confidence threshold on length alone, but if it
        // matched some pattern before that gate and the session has a metric
        // to carry forward, treat it as a continuation rather than unknown.
        if understanding.intent == Intent::Unknown
            && understanding.raw_intent != Intent::Unknown
            && understanding.candidate_metrics.is_empty()
            && !last_metrics.is_empty()
        {
            understanding.intent = understanding.raw_intent;
        }

        if understanding.intent == Intent::Unknown {
            return Ok(AskResponse {
                session_id: session_id.to_string(),
                intent: understanding.intent.as_str().to_string(),
                metric: None,
                dimensions: vec![],
                narrative: "I could not confidently match this to a known metric. Try naming a metric directly, e.g. \"what is total_mrr\".".to_string(),
                insights: vec![],
                follow_ups: vec!["Call list_metrics to see available metrics".to_string()],
                markdown_table: String::new(),
                dialect_text: None,
                cache_hit: false,
                dashboard_name: None,
            });
        }

        let Some(retrieval) = nlp::retrieve(&catalog, &understanding, &recency) else {
            return Ok(AskResponse {
                session_id: session_id.to_string(),
                intent: understanding.intent.as_str().to_string(),
                metric: None,
                dimensions: vec![],
                narrative: "I recognized the intent but could not match a metric. Try naming one from list_metrics.".to_string(),
                insights: vec![],
                follow_ups: vec!["Call list_metrics to see available metrics".to_string()],
                markdown_table: String::new(),
                dialect_text: None,
                cache_hit: false,
                dashboard_name: None,
            });
        };

        let request = nlp::synthesize(&catalog, &understanding, &retrieval);
        let metric_def = self.catalog.metric(&retrieval.metric)?;

        let (cached, cache_hit, dialect_text) = self.plan_and_execute(&catalog, &request).await?;

        let interpretation = nlp::interpret(
            understanding.intent,
            &metric_def.display_name,
            &request.dimensions,
            &cached.columns,
            &cached.rows,
        );

        let snapshot = ResultSnapshot {
            metric: Some(retrieval.metric.clone()),
            dimensions: request.dimensions.clone(),
            narrative: Some(interpretation.narrative.clone()),
        };
        let turn = TurnRecord {
            question: question.to_string(),
            understanding: format!("{:?}", understanding.intent),
            plan: format!("metric={} dimensions={:?}", retrieval.metric, request.dimensions),
            result_summary: interpretation.narrative.clone(),
            timestamp: chrono::Utc::now(),
        };
        self.sessions
            .with_session(session_id, |s| {
                s.record_turn(
                    self.sessions.history_len(),
                    turn,
                    vec![retrieval.metric.clone()],
                    request.dimensions.clone(),
                    understanding.intent.as_str().to_string(),
                    snapshot,
                )
            })
            .await;

        let dashboard_name = self
            .auto_save_dashboard(&metric_def.display_name, understanding.intent, &dialect_text, &request)
            .await
            .ok();

        Ok(AskResponse {
            session_id: session_id.to_string(),
            intent: understanding.intent.as_str().to_string(),
            metric: Some(retrieval.metric),
            dimensions: request.dimensions,
            narrative: interpretation.narrative,
            insights: interpretation.insights,
            follow_ups: interpretation.follow_ups,
            markdown_table: interpretation.markdown_table,
            dialect_text: Some(dialect_text),
            cache_hit,
            dashboard_name,
        })
    }

    /// Plans, fingerprints, and executes (cache-aware) a synthesized
    /// request — shared by the conversational path and the `query_metric`
    /// tool, which executes the planner path directly (spec §6).
    pub async fn plan_and_execute(
        &self,
        catalog: &crate::catalog::model::Catalog,
        request: &PlanRequest,
    ) -> AppResult<(CachedRows, bool, String)> {
        let built = planner::plan(catalog, &self.columns, request)?;
        let limit = plan_limit(&built);
        let order_alias = request.order_by.as_ref().map(|(a, _)| a.as_str());

        let input = FingerprintInput {
            backend: &self.backend_name,
            metric: &request.metric,
            dimensions: &request.dimensions,
            filters: &request.filters,
            order_by: order_alias,
            limit,
        };
        let key = fingerprint::compute(&input);

        let driver = Arc::clone(&self.driver);
        let plan_for_exec = built;
        let (cached, hit) = self
            .cache
            .get_or_compute(&key, || async move {
                crate::executor::execute_plan(&driver, &plan_for_exec).await.map(CachedRows::from)
            })
            .await?;
        let dialect_text = cached.dialect_text.clone();
        Ok((cached, hit, dialect_text))
    }

    async fn auto_save_dashboard(
        &self,
        metric_display_name: &str,
        intent: Intent,
        dialect_text: &str,
        request: &PlanRequest,
    ) -> AppResult<String> {
        let chart_kind = match intent {
            Intent::TrendAnalysis => ChartKind::Line,
            Intent::Comparison | Intent::CohortAnalysis | Intent::TopN => ChartKind::Bar,
            _ if request.dimensions.is_empty() => ChartKind::BigValue,
            _ => ChartKind::Table,
        };
        let mut axis_bindings = request.dimensions.clone();
        axis_bindings.push("value".to_string());
        let chart = ChartSpec {
            chart_kind,
            title: metric_display_name.to_string(),
            embedded_query_text: dialect_text.to_string(),
            axis_bindings: axis_bindings.clone(),
            column_projections: axis_bindings,
        };
        let name = self
            .dashboards
            .auto_save(&slugify(metric_display_name), intent.as_str(), metric_display_name, dialect_text, chart.clone(), chrono::Utc::now())
            .await?;
        *self.last_dashboard.lock().await = Some((name.clone(), chart));
        Ok(name)
    }
}

fn plan_limit(plan: &Plan) -> u32 {
    match plan {
        Plan::Simple(q) => q.limit,
        Plan::Derived { sub_plans, .. } => sub_plans.first().map(|(_, q)| q.limit).unwrap_or(planner::DEFAULT_LIMIT),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    async fn sample_orchestrator() -> (Orchestrator, tempfile::TempDir) {
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
      filters:
        - "subscription_status = 'active'"
  dimensions:
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
        let cache = Arc::new(QueryCache::new(Duration::from_secs(60), 100));
        let sessions = Arc::new(SessionStore::new(Duration::from_secs(3600), 10));
        let dashboard_dir = tempfile::tempdir().unwrap();
        let dashboards = Arc::new(DashboardLifecycle::new(dashboard_dir.path().to_path_buf()));

        let orchestrator = Orchestrator::new(
            catalog,
            driver,
            columns,
            cache,
            sessions,
            dashboards,
            "embedded-olap",
            Duration::from_secs(15),
        );
        (orchestrator, dashboard_dir)
    }

    #[tokio::test]
    async fn trend_question_resolves_metric_and_saves_dashboard() {
        let (orchestrator, _dir) = sample_orchestrator().await;
        let response = orchestrator.ask("How is total_mrr changing over time?", None).await.unwrap();
        assert_eq!(response.metric.as_deref(), Some("total_mrr"));
        assert!(response.dashboard_name.is_some());
        assert!(!response.markdown_table.is_empty());
    }

    #[tokio::test]
    async fn follow_up_question_reuses_session_metric() {
        let (orchestrator, _dir) = sample_orchestrator().await;
        let session_id = "s1".to_string();
        orchestrator.ask("what is total_mrr", Some(session_id.clone())).await.unwrap();
        let follow_up = orchestrator.ask("now show the trend", Some(session_id)).await.unwrap();
        assert_eq!(follow_up.metric.as_deref(), Some("total_mrr"));
    }

    #[tokio::test]
    async fn low_confidence_question_returns_guidance_without_error() {
        let (orchestrator, _dir) = sample_orchestrator().await;
        let response = orchestrator.ask("hi", None).await.unwrap();
        assert_eq!(response.intent, "unknown");
        assert!(response.metric.is_none());
    }
}
