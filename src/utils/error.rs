//! Application error taxonomy.
//!
//! Every error a caller can see is one of the typed variants below (spec
//! error taxonomy, §7). Each carries enough context to render a concise
//! title, the offending value, and an actionable suggestion without the
//! caller having to inspect the source chain.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde_json::json;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("catalog is invalid: {0}")]
    CatalogInvalid(String),

    #[error("unknown {kind} '{name}'")]
    CatalogMiss { kind: &'static str, name: String, suggestions: Vec<String> },

    #[error("invalid input: {reason} (offending token: '{token}')")]
    InvalidInput { reason: String, token: String },

    #[error("unsafe expression: {0}")]
    UnsafeExpression(String),

    #[error("cannot join '{left}' to '{right}': no common column")]
    JoinUnresolvable { left: String, right: String },

    #[error("dimension '{0}' references a column that does not exist")]
    DimensionUnresolvable(String),

    #[error("backend error: {message}")]
    BackendError { message: String, dialect_text: Option<String> },

    #[error("operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("unknown tool '{0}'")]
    ToolUnknown(String),

    #[error("dashboard '{0}' does not exist")]
    DashboardMissing(String),

    #[error("rate limited")]
    RateLimited,

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    pub fn catalog_miss(kind: &'static str, name: impl Into<String>, suggestions: Vec<String>) -> Self {
        Self::CatalogMiss { kind, name: name.into(), suggestions }
    }

    pub fn invalid_input(reason: impl Into<String>, token: impl Into<String>) -> Self {
        Self::InvalidInput { reason: reason.into(), token: token.into() }
    }

    pub fn backend_error(message: impl Into<String>, dialect_text: Option<String>) -> Self {
        Self::BackendError { message: message.into(), dialect_text }
    }

    /// Title used by both the HTTP surface and the tool-protocol adapter.
    pub fn title(&self) -> &'static str {
        match self {
            Self::CatalogInvalid(_) => "Catalog invalid",
            Self::CatalogMiss { .. } => "Not found",
            Self::InvalidInput { .. } => "Filter rejected",
            Self::UnsafeExpression(_) => "Unsafe expression",
            Self::JoinUnresolvable { .. } => "No join path",
            Self::DimensionUnresolvable(_) => "Dimension unresolvable",
            Self::BackendError { .. } => "Backend error",
            Self::Timeout(_) => "Timed out",
            Self::ToolUnknown(_) => "Unknown tool",
            Self::DashboardMissing(_) => "Dashboard missing",
            Self::RateLimited => "Rate limited",
            Self::Unauthorized(_) => "Unauthorized",
            Self::Internal(_) => "Internal error",
        }
    }

    /// One actionable suggestion, matching §7's user-visible failure contract.
    pub fn suggestion(&self) -> String {
        match self {
            Self::CatalogInvalid(_) => "Fix the catalog YAML and reload.".into(),
            Self::CatalogMiss { suggestions, .. } if !suggestions.is_empty() => {
                format!("Did you mean: {}?", suggestions.join(", "))
            },
            Self::CatalogMiss { .. } => "List available metrics/dimensions and retry.".into(),
            Self::InvalidInput { .. } => {
                "Use `<identifier> <op> <literal>` with op in = != > >= < <=.".into()
            },
            Self::UnsafeExpression(_) => {
                "Formulas may only use + - * / (), numeric literals, and metric names.".into()
            },
            Self::JoinUnresolvable { .. } => {
                "Pick a dimension sharing a column with the metric's table.".into()
            },
            Self::DimensionUnresolvable(_) => "Check the dimension's column against the table schema.".into(),
            Self::BackendError { .. } => "Inspect the emitted dialect text for diagnostics.".into(),
            Self::Timeout(_) => "Retry with fewer dimensions or a smaller limit.".into(),
            Self::ToolUnknown(_) => "Call list_metrics or list_dimensions to discover valid tools.".into(),
            Self::DashboardMissing(_) => "Call list_dashboards to see available artifacts.".into(),
            Self::RateLimited => "Slow down and retry shortly.".into(),
            Self::Unauthorized(_) => "Check the API key's role.".into(),
            Self::Internal(_) => "This is a bug; please report it.".into(),
        }
    }

    /// Render as the markdown the tool-protocol adapter streams back (§4.14, §7).
    pub fn render_markdown(&self) -> String {
        let mut out = format!("**{}**: {}\n\n_Suggestion_: {}", self.title(), self, self.suggestion());
        if let Self::CatalogMiss { suggestions, .. } = self
            && !suggestions.is_empty() {
                out.push_str("\n\nAlternatives: ");
                out.push_str(&suggestions.join(", "));
            }
        out
    }

    fn status_code(&self) -> StatusCode {
        match self {
            Self::CatalogMiss { .. } | Self::DashboardMissing(_) => StatusCode::NOT_FOUND,
            Self::InvalidInput { .. } | Self::UnsafeExpression(_) | Self::JoinUnresolvable { .. } => {
                StatusCode::BAD_REQUEST
            },
            Self::DimensionUnresolvable(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::CatalogInvalid(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::BackendError { .. } => StatusCode::BAD_GATEWAY,
            Self::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            Self::ToolUnknown(_) => StatusCode::NOT_FOUND,
            Self::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        tracing::warn!(error = %self, status = %status, "request failed");
        let body = Json(json!({
            "error": self.title(),
            "message": self.to_string(),
            "suggestion": self.suggestion(),
        }));
        (status, body).into_response()
    }
}
