use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use rmcp::transport::io::stdio;
use rmcp::ServiceExt;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use semantic_layer::backend::EmbeddedOlapDriver;
use semantic_layer::cache::QueryCache;
use semantic_layer::catalog::store::CatalogStore;
use semantic_layer::config::Config;
use semantic_layer::dashboard::DashboardLifecycle;
use semantic_layer::session::SessionStore;
use semantic_layer::tools::AnalystTools;
use semantic_layer::utils::{ScheduledExecutor, ScheduledTask};
use semantic_layer::Orchestrator;

struct SessionSweepTask {
    sessions: Arc<SessionStore>,
}

impl ScheduledTask for SessionSweepTask {
    fn run(&self) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<(), anyhow::Error>> + Send + '_>> {
        Box::pin(async move {
            self.sessions.sweep_expired();
            Ok(())
        })
    }
}

struct DashboardSweepTask {
    dashboards: Arc<DashboardLifecycle>,
    max_age_days: u32,
}

impl ScheduledTask for DashboardSweepTask {
    fn run(&self) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<(), anyhow::Error>> + Send + '_>> {
        Box::pin(async move {
            self.dashboards.sweep(self.max_age_days).await?;
            Ok(())
        })
    }
}

fn init_logging(config: &Config) {
    let log_filter = tracing_subscriber::EnvFilter::new(&config.logging.level);
    let registry = tracing_subscriber::registry().with(log_filter);

    if let Some(log_file) = &config.logging.file {
        let log_path = std::path::Path::new(log_file);
        if let Some(parent) = log_path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let log_dir = log_path.parent().and_then(|p| p.to_str()).unwrap_or("logs");
        let file_name = log_path.file_name().and_then(|n| n.to_str()).unwrap_or("analyst.log");
        let file_prefix = file_name.strip_suffix(".log").unwrap_or(file_name);

        let file_appender = tracing_appender::rolling::daily(log_dir, file_prefix);
        let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);
        // leaked so the non-blocking writer survives for the process lifetime
        std::mem::forget(_guard);
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(non_blocking))
            .with(tracing_subscriber::fmt::layer())
            .init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

#[tokio::main]
async fn main() {
    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("invalid configuration: {e}");
            std::process::exit(4);
        },
    };

    init_logging(&config);
    tracing::info!("semantic layer starting up");

    let catalog = match CatalogStore::load(PathBuf::from(&config.catalog.path)).await {
        Ok(store) => Arc::new(store),
        Err(e) => {
            tracing::error!(error = %e, "failed to load catalog");
            std::process::exit(1);
        },
    };
    tracing::info!(path = %config.catalog.path, "catalog loaded");

    let snapshot = catalog.snapshot();
    let db_path = snapshot.connection.fields.get("path").cloned().unwrap_or_else(|| "./data/analytics.db".to_string());
    let driver = match EmbeddedOlapDriver::connect(&db_path).await {
        Ok(driver) => Arc::new(driver),
        Err(e) => {
            tracing::error!(error = %e, "embedded backend unreachable");
            std::process::exit(2);
        },
    };
    if let Err(e) = driver.seed_sample_data().await {
        tracing::error!(error = %e, "embedded backend locked or unwritable");
        std::process::exit(3);
    }

    let mut tables: Vec<String> = snapshot.metrics.values().filter_map(metric_table).collect();
    tables.extend(snapshot.dimensions.values().map(|d| d.table.clone()));
    tables.sort();
    tables.dedup();
    let columns = match driver.introspect_columns(&tables).await {
        Ok(columns) => columns,
        Err(e) => {
            tracing::error!(error = %e, "failed to introspect backend schema");
            std::process::exit(2);
        },
    };

    let cache = Arc::new(QueryCache::new(Duration::from_secs(config.cache.ttl_seconds), config.cache.max_entries));
    let sessions = Arc::new(SessionStore::new(Duration::from_secs(config.session.ttl_seconds), config.session.history_len));
    let dashboards = Arc::new(DashboardLifecycle::new(PathBuf::from(&config.dashboard.path)));
    if let Err(e) = dashboards.ensure_dir().await {
        tracing::error!(error = %e, "cannot create dashboard directory");
        std::process::exit(4);
    }

    let orchestrator = Arc::new(Orchestrator::new(
        Arc::clone(&catalog),
        Arc::clone(&driver),
        columns,
        Arc::clone(&cache),
        Arc::clone(&sessions),
        Arc::clone(&dashboards),
        "embedded-olap",
        Duration::from_secs(config.orchestrator.call_timeout_seconds),
    ));

    let session_sweeper = ScheduledExecutor::new("session-sweep".to_string(), Duration::from_secs(300));
    let session_sweep_task = SessionSweepTask { sessions: Arc::clone(&sessions) };
    tokio::spawn(async move { session_sweeper.start(session_sweep_task).await });

    let dashboard_sweeper = ScheduledExecutor::new("dashboard-sweep".to_string(), Duration::from_secs(3600));
    let dashboard_sweep_task = DashboardSweepTask { dashboards: Arc::clone(&dashboards), max_age_days: config.dashboard.sweep_days };
    tokio::spawn(async move { dashboard_sweeper.start(dashboard_sweep_task).await });

    if config.server.http_enabled {
        let http_orchestrator = Arc::clone(&orchestrator);
        let addr = format!("{}:{}", config.server.host, config.server.port);
        tokio::spawn(async move {
            if let Err(e) = semantic_layer::http::serve(http_orchestrator, &addr).await {
                tracing::error!(error = %e, "HTTP surface exited");
            }
        });
        tracing::info!(addr = %format!("{}:{}", config.server.host, config.server.port), "HTTP surface enabled");
    }

    tracing::info!("tool-protocol surface ready, listening on stdio");
    let tools = AnalystTools::new(orchestrator);
    let service = match tools.serve(stdio()).await {
        Ok(service) => service,
        Err(e) => {
            tracing::error!(error = %e, "failed to start tool-protocol server");
            std::process::exit(2);
        },
    };

    tokio::select! {
        result = service.waiting() => {
            if let Err(e) = result {
                tracing::error!(error = %e, "tool-protocol server exited with error");
            }
        }
        _ = shutdown_signal() => {
            tracing::info!("shutdown signal received");
        }
    }

    tracing::info!("semantic layer shutting down");
}

fn metric_table(metric: &semantic_layer::catalog::model::MetricDef) -> Option<String> {
    match &metric.kind {
        semantic_layer::catalog::model::MetricKind::Simple { table, .. } => Some(table.clone()),
        semantic_layer::catalog::model::MetricKind::Derived { .. } => None,
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
