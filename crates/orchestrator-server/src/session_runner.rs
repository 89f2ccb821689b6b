//! C7: Session Runner (§4.7). Accepts a start request, instantiates the graph,
//! streams progress through C8, enforces at-most-one concurrent execution per
//! fingerprint, and persists the final result.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use dashmap::DashMap;
use market_data::PolygonMarketDataProvider;
use model_gateway::ModelGateway;
use orchestrator_core::{
    AnalysisLevel, AnalysisState, AnalystKind, EventKind, Market, MarketDataProvider, SessionDescriptor,
    SessionStatus,
};
use orchestrator_graph::{ExecutionMonitor, GraphOptions, MainGraph, ResultSynthesizer};
use uuid::Uuid;

use crate::event_stream::EventStreamRegistry;
use crate::repository::{PredictionRepository, SessionRepository};

/// Client-provided start request (§6 "Start session").
#[derive(Debug, Clone)]
pub struct StartSessionRequest {
    pub symbol: String,
    pub trade_date: NaiveDate,
    pub market: Option<Market>,
    pub selected_analysts: Option<Vec<AnalystKind>>,
    pub exclude_analysts: Option<Vec<AnalystKind>>,
    pub analysis_level: AnalysisLevel,
    pub use_planner: bool,
    pub max_debate_rounds: u32,
    pub max_risk_rounds: u32,
}

impl StartSessionRequest {
    fn resolved_market(&self) -> Market {
        self.market.unwrap_or(Market::US)
    }
}

#[derive(Debug, Clone)]
pub struct StartSessionResponse {
    pub session_id: Uuid,
    pub symbol: String,
    pub analysts: Vec<AnalystKind>,
}

struct RunningSession {
    cancel_flag: Arc<AtomicBool>,
}

/// C7 collaborator bundle: one instance shared by every route handler
/// (spec.md §9's "explicitly constructed services passed by reference through a
/// composition root").
pub struct SessionRunner {
    gateway: Arc<ModelGateway>,
    market_data: Arc<dyn MarketDataProvider>,
    monitor: Arc<ExecutionMonitor>,
    events: EventStreamRegistry,
    sessions: Arc<dyn SessionRepository>,
    predictions: Arc<dyn PredictionRepository>,
    fingerprints: Arc<DashMap<String, Uuid>>,
    running: Arc<DashMap<Uuid, RunningSession>>,
}

impl SessionRunner {
    pub fn new(
        gateway: Arc<ModelGateway>,
        market_data: Arc<PolygonMarketDataProvider>,
        events: EventStreamRegistry,
        sessions: Arc<dyn SessionRepository>,
        predictions: Arc<dyn PredictionRepository>,
    ) -> Self {
        Self {
            gateway,
            market_data,
            monitor: Arc::new(ExecutionMonitor::new()),
            events,
            sessions,
            predictions,
            fingerprints: Arc::new(DashMap::new()),
            running: Arc::new(DashMap::new()),
        }
    }

    pub fn events(&self) -> &EventStreamRegistry {
        &self.events
    }

    pub fn sessions(&self) -> &Arc<dyn SessionRepository> {
        &self.sessions
    }

    /// §4.7 `start`: at-most-one-per-fingerprint (§8 I5), returns immediately while
    /// the graph runs on a spawned task.
    ///
    /// The fingerprint reservation is a single atomic check-then-insert via
    /// `DashMap::entry`, which holds that shard's internal lock across the read and
    /// the write: two callers racing on the same fingerprint can never both observe
    /// it absent and both reserve a session_id (§5 "single shared table guarded by a
    /// mutex", §8 I5 "exactly one execution runs per fingerprint at a time"). The
    /// losing caller reuses the winner's session_id rather than minting its own, even
    /// if the winner's descriptor has not finished persisting yet — the completing
    /// task removes the fingerprint entry synchronously right after the run finishes
    /// (no `.await` in between), so by the time a fingerprint is absent here its prior
    /// session is already gone, not merely "about to be".
    pub async fn start(&self, request: StartSessionRequest) -> anyhow::Result<StartSessionResponse> {
        let market = request.resolved_market();
        let fingerprint = SessionDescriptor::fingerprint(&request.symbol, request.trade_date, market, request.analysis_level);

        let mut freshly_reserved = false;
        let reserved_id = *self.fingerprints.entry(fingerprint.clone()).or_insert_with(|| {
            freshly_reserved = true;
            Uuid::new_v4()
        });

        if !freshly_reserved {
            if let Ok(descriptor) = self.sessions.get(reserved_id).await {
                return Ok(StartSessionResponse {
                    session_id: reserved_id,
                    symbol: descriptor.symbol,
                    analysts: descriptor.selected_analysts,
                });
            }
        }

        let session_id = reserved_id;
        let mut selected: Vec<AnalystKind> = match &request.selected_analysts {
            Some(list) if !list.is_empty() => list.clone(),
            _ => AnalystKind::for_market(market),
        };
        if let Some(excluded) = &request.exclude_analysts {
            selected.retain(|k| !excluded.contains(k));
        }
        if request.analysis_level == AnalysisLevel::L1 {
            let quick = AnalystKind::quick_scan();
            selected.retain(|k| quick.contains(k));
            if selected.is_empty() {
                selected = quick;
            }
        }

        let descriptor = SessionDescriptor {
            session_id,
            symbol: request.symbol.clone(),
            trade_date: request.trade_date,
            market,
            level: request.analysis_level,
            selected_analysts: selected.clone(),
            status: SessionStatus::Running,
            fingerprint: fingerprint.clone(),
            created_at: Utc::now(),
            completed_at: None,
            result: None,
            diagnostic: None,
        };
        self.sessions.insert(&descriptor).await.map_err(|e| anyhow::anyhow!(e))?;

        let cancel_flag = Arc::new(AtomicBool::new(false));
        self.running.insert(session_id, RunningSession { cancel_flag: cancel_flag.clone() });

        let mut seed_state = AnalysisState::new(request.symbol.clone(), request.trade_date, market);
        seed_state.recommended_analysts = selected.iter().copied().collect();

        let options = GraphOptions {
            level: request.analysis_level,
            use_planner: request.use_planner,
            max_debate_rounds: request.max_debate_rounds.max(1),
            max_risk_rounds: request.max_risk_rounds.max(1),
        };

        let gateway = self.gateway.clone();
        let market_data = self.market_data.clone();
        let monitor = self.monitor.clone();
        let events = self.events.clone();
        let sessions = self.sessions.clone();
        let predictions = self.predictions.clone();
        let fingerprints = self.fingerprints.clone();
        let running = self.running.clone();
        let fingerprint_for_task = fingerprint.clone();

        tokio::spawn(async move {
            drive_session(
                session_id,
                seed_state,
                options,
                gateway,
                market_data,
                monitor,
                events,
                sessions,
                predictions,
                cancel_flag,
            )
            .await;
            fingerprints.remove(&fingerprint_for_task);
            running.remove(&session_id);
        });

        Ok(StartSessionResponse { session_id, symbol: request.symbol, analysts: selected })
    }

    /// §4.7 `cancel`: transitions the descriptor to `canceled` and signals the
    /// running task's cancel flag; any node in-flight observes it at the next stage
    /// boundary and stops writing further patches (§5).
    pub async fn cancel(&self, session_id: Uuid) -> anyhow::Result<bool> {
        if let Some(running) = self.running.get(&session_id) {
            running.cancel_flag.store(true, Ordering::SeqCst);
            Ok(true)
        } else {
            Ok(false)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::{SqlitePredictionRepository, SqliteSessionRepository};
    use model_gateway::UsageAggregator;

    async fn test_runner() -> SessionRunner {
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        SqliteSessionRepository::init_schema(&pool).await.unwrap();
        SqlitePredictionRepository::init_schema(&pool).await.unwrap();

        let sessions: Arc<dyn SessionRepository> = Arc::new(SqliteSessionRepository::new(pool.clone()));
        let predictions = Arc::new(SqlitePredictionRepository::new(pool));
        let gateway = Arc::new(ModelGateway::new([1u8; 32], Arc::new(UsageAggregator::new())));
        let market_data = Arc::new(PolygonMarketDataProvider::new("test-key".to_string()));
        let events = EventStreamRegistry::new();

        SessionRunner::new(gateway, market_data, events, sessions, predictions)
    }

    fn request(symbol: &str) -> StartSessionRequest {
        StartSessionRequest {
            symbol: symbol.to_string(),
            trade_date: NaiveDate::from_ymd_opt(2026, 1, 15).unwrap(),
            market: Some(Market::US),
            selected_analysts: Some(vec![AnalystKind::Market]),
            exclude_analysts: None,
            analysis_level: AnalysisLevel::L1,
            use_planner: false,
            max_debate_rounds: 1,
            max_risk_rounds: 1,
        }
    }

    #[tokio::test]
    async fn starting_the_same_fingerprint_twice_dedups_onto_one_session() {
        let runner = test_runner().await;

        let first = runner.start(request("AAPL")).await.unwrap();
        let second = runner.start(request("AAPL")).await.unwrap();

        assert_eq!(first.session_id, second.session_id);
        assert_eq!(second.analysts, vec![AnalystKind::Market]);
    }

    #[tokio::test]
    async fn different_symbols_get_distinct_sessions() {
        let runner = test_runner().await;

        let first = runner.start(request("AAPL")).await.unwrap();
        let second = runner.start(request("MSFT")).await.unwrap();

        assert_ne!(first.session_id, second.session_id);
    }

    #[tokio::test]
    async fn canceling_an_unknown_session_returns_false() {
        let runner = test_runner().await;
        let canceled = runner.cancel(Uuid::new_v4()).await.unwrap();
        assert!(!canceled);
    }
}

#[allow(clippy::too_many_arguments)]
async fn drive_session(
    session_id: Uuid,
    seed_state: AnalysisState,
    options: GraphOptions,
    gateway: Arc<ModelGateway>,
    market_data: Arc<dyn MarketDataProvider>,
    monitor: Arc<ExecutionMonitor>,
    events: EventStreamRegistry,
    sessions: Arc<dyn SessionRepository>,
    predictions: Arc<dyn PredictionRepository>,
    cancel_flag: Arc<AtomicBool>,
) {
    let graph = MainGraph::new(gateway.clone(), market_data, monitor, options);
    let events_for_stages = events.clone();

    let final_state = graph
        .run(seed_state, cancel_flag.clone(), move |stage, state| {
            publish_stage_event(&events_for_stages, session_id, stage, state);
        })
        .await;

    let descriptor = match sessions.get(session_id).await {
        Ok(d) => d,
        Err(e) => {
            tracing::error!("session {session_id} descriptor missing at completion: {e}");
            return;
        }
    };

    if cancel_flag.load(Ordering::SeqCst) {
        let mut descriptor = descriptor;
        descriptor.status = SessionStatus::Canceled;
        descriptor.completed_at = Some(Utc::now());
        let _ = sessions.update(&descriptor).await;
        events.publish(session_id, EventKind::Terminal).await;
        return;
    }

    let synthesizer = ResultSynthesizer::new(gateway);
    let verdict = synthesizer.synthesize(&final_state).await;
    let record = synthesizer.to_prediction_record(session_id, &final_state, &verdict);
    if let Err(e) = predictions.append(&record).await {
        tracing::warn!("failed to append prediction record for {session_id}: {e}");
    }

    let mut descriptor = descriptor;
    descriptor.status = SessionStatus::Completed;
    descriptor.completed_at = Some(Utc::now());
    if final_state.analyst_errors.len() == final_state.recommended_analysts.len()
        && !final_state.recommended_analysts.is_empty()
    {
        descriptor.diagnostic = Some("full degradation: every analyst fell back to a stub".to_string());
    }
    descriptor.result = Some(verdict.clone());
    let _ = sessions.update(&descriptor).await;

    events.publish(session_id, EventKind::Result { verdict }).await;
    events.publish(session_id, EventKind::Terminal).await;
}

/// Called synchronously from `MainGraph::run`'s `on_stage` callback — no
/// `tokio::spawn` here, since spawning would let the sequence number an event gets
/// depend on scheduler order rather than the order stages actually completed in
/// (§5 "events on one session's stream are totally ordered", §8 I2).
fn publish_stage_event(events: &EventStreamRegistry, session_id: Uuid, stage: &str, state: &AnalysisState) {
    let kind = if let Some(name) = stage.strip_prefix("stage_start:") {
        EventKind::StageStart { stage: name.to_string() }
    } else if let Some(name) = stage.strip_prefix("stage_completed:") {
        EventKind::StageCompleted { stage: name.to_string() }
    } else {
        EventKind::NodeUpdate { node: stage.to_string(), detail: format!("{} analysts completed", state.analyst_completed.len()) }
    };
    events.publish_sync(session_id, kind);
}
