//! C4.1: the Analyst subgraph (§4.4.1). Fans out one independent branch per
//! `recommended_analysts` entry, each bounded by a `ResilientNode`, and joins at a
//! `Sync` node that never blocks on a missing analyst.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use model_gateway::ModelGateway;
use orchestrator_core::{
    AnalysisState, AnalystKind, ChatMessage, MarketDataProvider, OrchestratorError, RoleKey,
    StatePatch,
};
use tokio::task::JoinSet;

use crate::conditional::{should_continue_analyst, AnalystNext};
use crate::monitor::ExecutionMonitor;
use crate::resilient::ResilientNode;

/// An analyst branch re-enters its own node after a tool call at most this many times
/// before being forced to finalize (§4.4.1: "The tool loop may cycle at most N times
/// per analyst"); the outer `ResilientNode` timeout remains authoritative regardless.
const MAX_TOOL_LOOPS: u32 = 3;

/// Messages kept after `ClearMessages_<kind>` prunes the branch's local buffer
/// (§4.4.1: "prunes all but the last three messages to bound state size").
const KEEP_LAST_MESSAGES: usize = 3;

pub struct AnalystSubgraph {
    gateway: Arc<ModelGateway>,
    market_data: Arc<dyn MarketDataProvider>,
    monitor: Arc<ExecutionMonitor>,
}

impl AnalystSubgraph {
    pub fn new(
        gateway: Arc<ModelGateway>,
        market_data: Arc<dyn MarketDataProvider>,
        monitor: Arc<ExecutionMonitor>,
    ) -> Self {
        Self { gateway, market_data, monitor }
    }

    /// Run the subgraph: Router seeds completion-tracking fields, each selected
    /// analyst runs as an independent `ResilientNode`-wrapped branch, Sync waits for
    /// every branch and emits a summary message (§4.4.1). `cancel` is shared with
    /// every branch's `ResilientNode` so a session canceled mid-fan-out stops
    /// retrying and degrades immediately rather than running its full timeout
    /// budget (§4.7/§5).
    pub async fn run(&self, mut state: AnalysisState, cancel: Arc<AtomicBool>) -> AnalysisState {
        // Router: seed _analyst_completed / _analyst_errors (already empty on a fresh
        // state, but an explicit reset keeps the contract visible at the call site).
        state.analyst_completed.clear();
        state.analyst_errors.clear();

        let selected: Vec<AnalystKind> = if state.recommended_analysts.is_empty() {
            AnalystKind::for_market(state.market)
        } else {
            state.recommended_analysts.iter().copied().collect()
        };

        let mut branches = JoinSet::new();
        for kind in selected.iter().copied() {
            let gateway = self.gateway.clone();
            let market_data = self.market_data.clone();
            let monitor = self.monitor.clone();
            let symbol = state.symbol.clone();
            let trade_date = state.trade_date;
            let cancel = cancel.clone();

            branches.spawn(async move {
                run_analyst_branch(kind, gateway, market_data, monitor, symbol, trade_date, cancel).await
            });
        }

        let mut patches = Vec::with_capacity(selected.len());
        while let Some(result) = branches.join_next().await {
            match result {
                Ok(patch) => patches.push(patch),
                Err(join_err) => {
                    tracing::error!("analyst branch task panicked: {join_err}");
                }
            }
        }

        for patch in patches {
            state.merge(patch);
        }

        // Sync: every requested analyst has a report, a stub, or an error entry
        // (§8 I1) before this node returns.
        let degraded: Vec<String> = selected
            .iter()
            .filter(|k| state.analyst_errors.contains_key(k))
            .map(|k| k.label().to_string())
            .collect();

        let summary = if degraded.is_empty() {
            "All analysts completed.".to_string()
        } else {
            format!("All analysts completed. Degraded: {}.", degraded.join(", "))
        };
        state.messages.push(ChatMessage::system(summary));

        state
    }
}

/// One analyst branch: `Aᵢ -> (tool_calls? -> tools_Aᵢ -> Aᵢ) ∨ ClearMessages_Aᵢ`,
/// wrapped in a `ResilientNode` so a timeout anywhere in the loop degrades cleanly.
async fn run_analyst_branch(
    kind: AnalystKind,
    gateway: Arc<ModelGateway>,
    market_data: Arc<dyn MarketDataProvider>,
    monitor: Arc<ExecutionMonitor>,
    symbol: String,
    trade_date: chrono::NaiveDate,
    cancel: Arc<AtomicBool>,
) -> StatePatch {
    let node = ResilientNode::new(kind, monitor).with_cancel(cancel);
    let node_name = kind.label().to_string();

    node.run(&node_name, move || {
        let gateway = gateway.clone();
        let market_data = market_data.clone();
        let symbol = symbol.clone();
        async move { analyst_turn(kind, &gateway, market_data.as_ref(), &symbol, trade_date).await }
    })
    .await
}

async fn analyst_turn(
    kind: AnalystKind,
    gateway: &ModelGateway,
    market_data: &dyn MarketDataProvider,
    symbol: &str,
    trade_date: chrono::NaiveDate,
) -> Result<StatePatch, OrchestratorError> {
    let model = gateway.resolve(RoleKey::QuickThink).await?;
    let system = format!(
        "You are the {} for {} on {}. Respond with TOOL_REQUEST: bars or TOOL_REQUEST: news \
         if you need more data, otherwise respond with your final report.",
        kind.label(),
        symbol,
        trade_date
    );

    let mut transcript: Vec<ChatMessage> = vec![ChatMessage::system(format!(
        "Analyze {} for trade date {}.",
        symbol, trade_date
    ))];
    let mut loops = 0u32;

    loop {
        let history: Vec<String> = transcript.iter().map(|m| m.content.clone()).collect();
        let (reply, _usage) = model.complete(&system, &history).await?;
        let wants_tool = reply.trim_start().starts_with("TOOL_REQUEST");
        transcript.push(ChatMessage::assistant(reply.clone(), wants_tool));

        match should_continue_analyst(&transcript) {
            AnalystNext::Tools if loops < MAX_TOOL_LOOPS => {
                loops += 1;
                let tool_result = run_tool(&reply, market_data, symbol).await;
                transcript.push(ChatMessage::tool(tool_result));
            }
            _ => break,
        }
    }

    // ClearMessages_<kind>: bound branch-local state to the last few messages.
    let kept: Vec<ChatMessage> = transcript
        .iter()
        .rev()
        .take(KEEP_LAST_MESSAGES)
        .rev()
        .cloned()
        .collect();

    let report = transcript
        .iter()
        .rev()
        .find(|m| m.role == "assistant" && !m.has_tool_calls)
        .map(|m| m.content.clone())
        .unwrap_or_else(|| format!("[{}] No conclusive report produced.", kind.label()));

    let mut patch = StatePatch::default();
    patch.messages = kept;
    patch.analyst_reports.insert(kind, report);
    patch.analyst_completed.insert(kind);
    Ok(patch)
}

async fn run_tool(request: &str, market_data: &dyn MarketDataProvider, symbol: &str) -> String {
    let wants_news = request.to_lowercase().contains("news");
    let outcome = if wants_news {
        market_data.get_news(symbol, 10).await.map(|items| format!("{} news items fetched", items.len()))
    } else {
        market_data.get_bars(symbol, 90).await.map(|bars| format!("{} bars fetched", bars.len()))
    };

    match outcome {
        Ok(summary) => summary,
        Err(err) => format!("tool error: {err}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use orchestrator_core::{Bar, Market, NewsItem, OrchestratorResult};

    struct StubMarketData;

    #[async_trait]
    impl MarketDataProvider for StubMarketData {
        async fn get_bars(&self, _symbol: &str, _days_back: i64) -> OrchestratorResult<Vec<Bar>> {
            Ok(vec![])
        }
        async fn get_news(&self, _symbol: &str, _limit: u32) -> OrchestratorResult<Vec<NewsItem>> {
            Ok(vec![])
        }
    }

    #[tokio::test]
    async fn sync_marks_every_selected_analyst_completed_or_errored() {
        let monitor = Arc::new(ExecutionMonitor::new());
        let gateway = Arc::new(ModelGateway::new([1u8; 32], Arc::new(model_gateway::UsageAggregator::new())));
        let market_data: Arc<dyn MarketDataProvider> = Arc::new(StubMarketData);
        let subgraph = AnalystSubgraph::new(gateway, market_data, monitor);

        let mut state = AnalysisState::new(
            "AAPL",
            chrono::NaiveDate::from_ymd_opt(2026, 1, 15).unwrap(),
            Market::US,
        );
        state.recommended_analysts = [AnalystKind::Market, AnalystKind::News].into_iter().collect();

        let result = subgraph.run(state, Arc::new(AtomicBool::new(false))).await;

        for kind in [AnalystKind::Market, AnalystKind::News] {
            let has_report = result.analyst_reports.contains_key(&kind);
            let has_error = result.analyst_errors.contains_key(&kind);
            assert!(has_report || has_error, "{kind:?} missing report/error");
        }
    }
}
