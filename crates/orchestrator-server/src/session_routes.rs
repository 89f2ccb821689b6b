//! §6.1 session routes: start, stream, result fetch, cancel. Grounded on the
//! teacher's `symbol_routes.rs`/`ml_routes.rs` `fn xxx_routes() -> Router<AppState>`
//! module shape and `ws_routes.rs`'s "send cached snapshot, then subscribe" pattern
//! for the event stream.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::NaiveDate;
use orchestrator_core::{AnalysisLevel, AnalystKind, Market};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::session_runner::StartSessionRequest;
use crate::{ApiResponse, AppError, AppState};

pub fn session_routes() -> Router<AppState> {
    Router::new()
        .route("/api/sessions", post(start_session))
        .route("/api/sessions/:id/stream", get(stream_session))
        .route("/api/sessions/:id", get(get_session))
        .route("/api/sessions/:id/cancel", post(cancel_session))
}

#[derive(Debug, Deserialize)]
pub struct StartSessionBody {
    pub symbol: String,
    pub trade_date: NaiveDate,
    #[serde(default)]
    pub market: Option<Market>,
    #[serde(default)]
    pub selected_analysts: Option<Vec<AnalystKind>>,
    #[serde(default)]
    pub exclude_analysts: Option<Vec<AnalystKind>>,
    #[serde(default = "default_level")]
    pub analysis_level: AnalysisLevel,
    #[serde(default = "default_true")]
    pub use_planner: bool,
    #[serde(default = "default_debate_rounds")]
    pub max_debate_rounds: u32,
    #[serde(default = "default_risk_rounds")]
    pub max_risk_rounds: u32,
}

fn default_level() -> AnalysisLevel {
    AnalysisLevel::L2
}
fn default_true() -> bool {
    true
}
fn default_debate_rounds() -> u32 {
    1
}
fn default_risk_rounds() -> u32 {
    1
}

#[derive(Debug, Serialize)]
pub struct StartSessionResponseBody {
    pub session_id: Uuid,
    pub symbol: String,
    pub analysts: Vec<AnalystKind>,
}

async fn start_session(
    State(state): State<AppState>,
    Json(body): Json<StartSessionBody>,
) -> Result<Json<ApiResponse<StartSessionResponseBody>>, AppError> {
    let request = StartSessionRequest {
        symbol: body.symbol,
        trade_date: body.trade_date,
        market: body.market,
        selected_analysts: body.selected_analysts,
        exclude_analysts: body.exclude_analysts,
        analysis_level: body.analysis_level,
        use_planner: body.use_planner,
        max_debate_rounds: body.max_debate_rounds,
        max_risk_rounds: body.max_risk_rounds,
    };

    let response = state.runner.start(request).await?;
    Ok(Json(ApiResponse::success(StartSessionResponseBody {
        session_id: response.session_id,
        symbol: response.symbol,
        analysts: response.analysts,
    })))
}

#[derive(Debug, Deserialize)]
pub struct StreamQuery {
    #[serde(default)]
    pub last_sequence_no: u64,
}

/// `GET /api/sessions/:id/stream`: newline-delimited JSON, one `Event` per line,
/// replaying anything after `last_sequence_no` before tailing live events. axum's
/// `Sse` type assumes an `text/event-stream` framing; here plain NDJSON over a
/// chunked body is used instead, matching §6.1's explicit "newline-delimited JSON
/// event stream" contract rather than SSE framing.
async fn stream_session(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(query): Query<StreamQuery>,
) -> impl IntoResponse {
    use futures_util::stream::{self, StreamExt};
    use tokio::sync::broadcast::error::RecvError;

    let (replay, receiver) = state.runner.events().subscribe(id, query.last_sequence_no).await;

    let replay_stream =
        stream::iter(replay.into_iter().map(|event| Ok::<_, std::convert::Infallible>(encode_event(&event))));

    let live_stream = stream::unfold(receiver, |mut receiver| async move {
        loop {
            match receiver.recv().await {
                Ok(event) => return Some((Ok::<_, std::convert::Infallible>(encode_event(&event)), receiver)),
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => return None,
            }
        }
    });

    let body = axum::body::Body::from_stream(replay_stream.chain(live_stream));

    axum::http::Response::builder()
        .status(StatusCode::OK)
        .header("content-type", "application/x-ndjson")
        .body(body)
        .unwrap()
}

fn encode_event(event: &orchestrator_core::Event) -> String {
    let mut line = serde_json::to_string(event).unwrap_or_default();
    line.push('\n');
    line
}

#[derive(Debug, Serialize)]
pub struct SessionResultBody {
    pub session_id: Uuid,
    pub symbol: String,
    pub status: &'static str,
    pub elapsed_seconds: i64,
    pub analysts_used: Vec<AnalystKind>,
    pub task_fingerprint: String,
    pub result: Option<orchestrator_core::Verdict>,
    pub diagnostic: Option<String>,
}

/// `GET /api/sessions/:id` — §6 "Result fetch": returns the typed verdict plus
/// `{elapsed_seconds, analysts_used, task_fingerprint}` once complete, or the
/// partial descriptor with `status = "running"` beforehand.
async fn get_session(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<SessionResultBody>>, AppError> {
    let descriptor = state
        .runner
        .sessions()
        .get(id)
        .await
        .map_err(|_| AppError::not_found(format!("session {id} not found")))?;

    let status = match descriptor.status {
        orchestrator_core::SessionStatus::Running => "running",
        orchestrator_core::SessionStatus::Completed => "completed",
        orchestrator_core::SessionStatus::Failed => "failed",
        orchestrator_core::SessionStatus::Canceled => "canceled",
    };

    Ok(Json(ApiResponse::success(SessionResultBody {
        session_id: descriptor.session_id,
        symbol: descriptor.symbol,
        status,
        elapsed_seconds: descriptor.elapsed_seconds(),
        analysts_used: descriptor.selected_analysts,
        task_fingerprint: descriptor.fingerprint,
        result: descriptor.result,
        diagnostic: descriptor.diagnostic,
    })))
}

#[derive(Debug, Serialize)]
pub struct CancelResponseBody {
    pub canceled: bool,
}

async fn cancel_session(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<CancelResponseBody>>, AppError> {
    let canceled = state.runner.cancel(id).await?;
    Ok(Json(ApiResponse::success(CancelResponseBody { canceled })))
}
