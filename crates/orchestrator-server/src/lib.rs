//! `orchestrator-server` binds C7 (Session Runner) and C8 (Event Stream) to an
//! `axum::Router`, following the teacher's `api-server` route-module-per-concern
//! layout (`fn xxx_routes() -> Router<AppState>`). `AppState`/`ApiResponse<T>`/
//! `AppError` are reconstructed from call-site usage across the teacher's route
//! modules, since the teacher's own `lib.rs` defining them was not in the retrieval
//! pack.

pub mod admin_routes;
pub mod event_stream;
pub mod repository;
pub mod request_id;
pub mod security_headers;
pub mod session_routes;
pub mod session_runner;

use std::sync::Arc;

use axum::error_handling::HandleErrorLayer;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{middleware, BoxError, Json, Router};
use market_data::PolygonMarketDataProvider;
use model_gateway::{ModelGateway, UsageAggregator};
use serde::Serialize;
use sqlx::sqlite::SqlitePoolOptions;
use std::time::Duration;
use tower::timeout::TimeoutLayer;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use crate::repository::{
    PromptRepository, SessionRepository, SqlitePredictionRepository, SqlitePromptRepository,
    SqliteSessionRepository,
};
use crate::session_runner::SessionRunner;

/// Shared application state, cloned per request (cheap: every field is an `Arc`),
/// matching teacher's `AppState { orchestrator: Arc<...>, ... }` convention.
#[derive(Clone)]
pub struct AppState {
    pub runner: Arc<SessionRunner>,
    pub gateway: Arc<ModelGateway>,
    pub prompts: Arc<dyn PromptRepository>,
    pub encryption_key: [u8; 32],
}

/// Uniform response envelope. Inferred from every handler's
/// `Ok(Json(ApiResponse::success(data)))` call site in the teacher's route modules.
#[derive(Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self { success: true, data: Some(data), error: None }
    }
}

/// Uniform error type every handler returns via `Result<_, AppError>`, reconstructed
/// from teacher's `AppError::with_status(StatusCode, anyhow::Error)` call sites
/// (e.g. `ml_routes.rs`'s `ml_err`).
pub struct AppError {
    status: StatusCode,
    message: String,
}

impl AppError {
    pub fn with_status(status: StatusCode, err: impl Into<anyhow::Error>) -> Self {
        Self { status, message: err.into().to_string() }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self { status: StatusCode::NOT_FOUND, message: message.into() }
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self { status: StatusCode::INTERNAL_SERVER_ERROR, message: err.into().to_string() }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ApiResponse::<()> { success: false, data: None, error: Some(self.message) };
        (self.status, Json(body)).into_response()
    }
}

/// Builds the full router: session routes, admin routes, plus the teacher's
/// request-id, security-header, tracing, and request-timeout middleware layered over
/// everything (§2.1 ambient stack). All handlers here return as soon as a response
/// (or the start of a streaming body) is ready, so the timeout layer never cuts off
/// an in-flight NDJSON event stream — it only bounds route-handler latency.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(session_routes::session_routes())
        .merge(admin_routes::admin_routes())
        .layer(
            ServiceBuilder::new()
                .layer(HandleErrorLayer::new(handle_timeout_error))
                .layer(TraceLayer::new_for_http())
                .layer(TimeoutLayer::new(Duration::from_secs(30))),
        )
        .layer(middleware::from_fn(security_headers::security_headers_middleware))
        .layer(middleware::from_fn(request_id::request_id_middleware))
        .with_state(state)
}

async fn handle_timeout_error(err: BoxError) -> AppError {
    if err.is::<tower::timeout::error::Elapsed>() {
        AppError { status: StatusCode::REQUEST_TIMEOUT, message: "request timed out".to_string() }
    } else {
        AppError { status: StatusCode::INTERNAL_SERVER_ERROR, message: err.to_string() }
    }
}

/// Reads the mandatory `.env`-or-environment configuration and assembles `AppState`,
/// then serves the router (§2.1 Configuration: `dotenvy` + `std::env::var`, matching
/// teacher's binaries; §6 "Environment contract": the encryption key's absence is a
/// hard refusal to start, not a panic on first use).
pub async fn run_server() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt::init();

    let encryption_key_hex = std::env::var("ORCHESTRATOR_ENCRYPTION_KEY")
        .map_err(|_| anyhow::anyhow!("ORCHESTRATOR_ENCRYPTION_KEY must be set (64 hex chars / 32 bytes)"))?;
    let encryption_key = model_gateway::parse_encryption_key(&encryption_key_hex)
        .ok_or_else(|| anyhow::anyhow!("ORCHESTRATOR_ENCRYPTION_KEY must be exactly 64 hex characters"))?;

    let database_url = std::env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite://orchestrator.db".to_string());
    let pool = SqlitePoolOptions::new().max_connections(8).connect(&database_url).await?;

    SqliteSessionRepository::init_schema(&pool).await?;
    SqlitePredictionRepository::init_schema(&pool).await?;
    SqlitePromptRepository::init_schema(&pool).await?;

    let sessions: Arc<dyn SessionRepository> = Arc::new(SqliteSessionRepository::new(pool.clone()));
    let predictions = Arc::new(SqlitePredictionRepository::new(pool.clone()));
    let prompts: Arc<dyn PromptRepository> = Arc::new(SqlitePromptRepository::new(pool.clone()));

    let usage = Arc::new(UsageAggregator::new());
    let gateway = Arc::new(ModelGateway::new(encryption_key, usage));

    let polygon_api_key = std::env::var("POLYGON_API_KEY").unwrap_or_default();
    let market_data = Arc::new(PolygonMarketDataProvider::new(polygon_api_key));

    let events = event_stream::EventStreamRegistry::new();
    let runner = Arc::new(SessionRunner::new(gateway.clone(), market_data, events, sessions, predictions));

    let state = AppState { runner, gateway, prompts, encryption_key };
    let app = build_router(state);

    let bind_addr = std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string());
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!(addr = %bind_addr, "orchestrator-server listening");
    axum::serve(listener, app).await?;
    Ok(())
}
