// THEORY:
// The dashboard is a read-only window onto the defect log. It never writes the
// log and never talks to the rig. Every request rereads the file from disk and
// aggregates it from scratch, so what the browser sees is whatever the rig has
// appended up to that moment.
//
// Key architectural principles:
// 1. **Blocking work off the reactor:** reading and parsing the log is plain
//    synchronous file I/O, so it runs on tokio's blocking pool.
// 2. **One contract:** `/api/summary` returns the library's `Aggregation`
//    unchanged. Charts and tables are a client concern.
// 3. **Injectable clock:** "now" comes from the state, so windows are testable.

use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use chrono::NaiveDateTime;
use pack_inspector::{Aggregation, LogEntry, LogSnapshot, MAX_WINDOW_DAYS, ReportConfig, aggregate, local_now};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1:5000";

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: String,
    pub log_path: PathBuf,
    pub report: ReportConfig,
}

type Clock = Arc<dyn Fn() -> NaiveDateTime + Send + Sync>;

#[derive(Clone)]
pub struct DashboardState {
    log_path: Arc<PathBuf>,
    report: ReportConfig,
    clock: Clock,
}

impl DashboardState {
    pub fn new(log_path: PathBuf, report: ReportConfig) -> Self {
        Self {
            log_path: Arc::new(log_path),
            report,
            clock: Arc::new(local_now),
        }
    }

    pub fn with_clock(mut self, clock: impl Fn() -> NaiveDateTime + Send + Sync + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    async fn snapshot(&self) -> Result<LogSnapshot, ApiError> {
        let path = Arc::clone(&self.log_path);
        tokio::task::spawn_blocking(move || LogSnapshot::read(&path))
            .await
            .map_err(|err| ApiError::internal(format!("log reader task failed: {err}")))?
            .map_err(|err| ApiError::internal(err.to_string()))
    }
}

#[derive(Debug, Deserialize)]
pub struct SummaryQuery {
    pub days: Option<u32>,
}

/// Every parsed entry, newest first.
#[derive(Debug, Serialize, Deserialize)]
pub struct LogListing {
    pub entries: Vec<LogEntry>,
    pub parse_skips: usize,
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            error!(message = %self.message, "request failed");
        }
        (self.status, Json(serde_json::json!({ "error": self.message }))).into_response()
    }
}

async fn summary(
    State(state): State<DashboardState>,
    Query(query): Query<SummaryQuery>,
) -> Result<Json<Aggregation>, ApiError> {
    let days = query.days.unwrap_or(state.report.window_days);
    if !(1..=MAX_WINDOW_DAYS).contains(&days) {
        return Err(ApiError::bad_request(format!("days must lie in 1..={MAX_WINDOW_DAYS}")));
    }
    let snapshot = state.snapshot().await?;
    Ok(Json(aggregate(&snapshot, days, (state.clock)(), state.report.recent_limit)))
}

async fn log(State(state): State<DashboardState>) -> Result<Json<LogListing>, ApiError> {
    let snapshot = state.snapshot().await?;
    let mut entries = snapshot.entries;
    entries.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    Ok(Json(LogListing {
        entries,
        parse_skips: snapshot.parse_skips,
    }))
}

pub fn build_router(state: DashboardState) -> Router {
    Router::new()
        .route("/healthz", get(|| async { "ok" }))
        .route("/api/summary", get(summary))
        .route("/api/log", get(log))
        .with_state(state)
}

/// Binds the listener and serves in the background.
pub async fn start_server(cfg: ServerConfig) -> anyhow::Result<tokio::task::JoinHandle<()>> {
    let listener = tokio::net::TcpListener::bind(&cfg.bind_addr).await?;
    info!(
        addr = %listener.local_addr()?,
        log = %cfg.log_path.display(),
        window_days = cfg.report.window_days,
        "dashboard listening"
    );
    let app = build_router(DashboardState::new(cfg.log_path, cfg.report));

    Ok(tokio::spawn(async move {
        if let Err(err) = axum::serve(listener, app).await {
            error!(%err, "dashboard server stopped");
        }
    }))
}
