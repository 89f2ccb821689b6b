//! C5: Main Graph Assembler (§4.5). Composes the depth-profile pipeline:
//!
//! - L1 (quick scan): `Planner? -> Analyst(subset) -> Portfolio -> END`
//! - L2 (full):       `Planner? -> Analyst -> Debate -> Trader -> Risk -> Portfolio -> END`
//!
//! `Portfolio` sits outside the core per §1 ("feature subsystems built on top of the
//! core ... are not it"); it is represented here only as the pipeline's terminal
//! pass-through so the topology matches §4.5 exactly, with no portfolio analytics
//! implemented in this crate.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use model_gateway::ModelGateway;
use orchestrator_core::{AnalysisLevel, AnalysisState, AnalystKind, MarketDataProvider};

use crate::analyst_subgraph::AnalystSubgraph;
use crate::debate_subgraph::DebateSubgraph;
use crate::monitor::ExecutionMonitor;
use crate::planner::PlannerNode;
use crate::risk_subgraph::RiskSubgraph;
use crate::trader::TraderNode;

/// Upper bound on node visits per run, so a misbehaving tool loop cannot run forever
/// (§4.5: "the underlying graph executor is given an upper bound (default 100 node
/// visits)"). The fixed subgraph topologies here never approach this bound; it is
/// enforced as a sanity check rather than a real scheduler limit.
pub const DEFAULT_RECURSION_LIMIT: u32 = 100;

#[derive(Debug, Clone)]
pub struct GraphOptions {
    pub level: AnalysisLevel,
    pub use_planner: bool,
    pub max_debate_rounds: u32,
    pub max_risk_rounds: u32,
}

impl Default for GraphOptions {
    fn default() -> Self {
        Self { level: AnalysisLevel::L2, use_planner: true, max_debate_rounds: 1, max_risk_rounds: 1 }
    }
}

pub struct MainGraph {
    planner: PlannerNode,
    analyst: AnalystSubgraph,
    debate: DebateSubgraph,
    trader: TraderNode,
    risk: RiskSubgraph,
    options: GraphOptions,
}

impl MainGraph {
    pub fn new(
        gateway: Arc<ModelGateway>,
        market_data: Arc<dyn MarketDataProvider>,
        monitor: Arc<ExecutionMonitor>,
        options: GraphOptions,
    ) -> Self {
        Self {
            planner: PlannerNode::new(gateway.clone()),
            analyst: AnalystSubgraph::new(gateway.clone(), market_data, monitor),
            debate: DebateSubgraph::new(gateway.clone(), options.max_debate_rounds),
            trader: TraderNode::new(gateway.clone()),
            risk: RiskSubgraph::new(gateway, options.max_risk_rounds),
            options,
        }
    }

    /// Drive the full pipeline for `state`, emitting a stage callback after each
    /// major stage so the Session Runner (C7) can publish progress events
    /// (§4.5, §4.7 "for every node update, publish a typed event").
    ///
    /// `cancel` is checked before every remaining stage boundary and threaded into
    /// the analyst fan-out's `ResilientNode`s; once observed, the run returns the
    /// state as of the last completed stage instead of continuing through
    /// Debate/Trader/Risk (§4.7/§5 "immediately cancels all running node units" /
    /// "any node in-flight must not write further patches after the cancel signal is
    /// observed").
    pub async fn run<F>(&self, mut state: AnalysisState, cancel: Arc<AtomicBool>, mut on_stage: F) -> AnalysisState
    where
        F: FnMut(&str, &AnalysisState),
    {
        if cancel.load(Ordering::SeqCst) {
            return state;
        }

        if self.options.use_planner {
            on_stage("planner_start", &state);
            state = self.planner.run(state).await;
            on_stage("planner_completed", &state);
        } else if state.recommended_analysts.is_empty() {
            let set = match self.options.level {
                AnalysisLevel::L1 => AnalystKind::quick_scan(),
                AnalysisLevel::L2 => AnalystKind::for_market(state.market),
            };
            state.recommended_analysts = set.into_iter().collect();
        }

        if self.options.level == AnalysisLevel::L1 {
            let quick = AnalystKind::quick_scan();
            state.recommended_analysts.retain(|k| quick.contains(k));
            if state.recommended_analysts.is_empty() {
                state.recommended_analysts = quick.into_iter().collect();
            }
        }

        if cancel.load(Ordering::SeqCst) {
            return state;
        }

        on_stage("stage_start:analyst", &state);
        state = self.analyst.run(state, cancel.clone()).await;
        on_stage("stage_completed:analyst", &state);

        if self.options.level == AnalysisLevel::L2 {
            if cancel.load(Ordering::SeqCst) {
                return state;
            }

            on_stage("stage_start:debate", &state);
            state = self.debate.run(state).await;
            on_stage("stage_completed:debate", &state);

            if cancel.load(Ordering::SeqCst) {
                return state;
            }

            on_stage("stage_start:trader", &state);
            state = self.trader.run(state).await;
            on_stage("stage_completed:trader", &state);

            if cancel.load(Ordering::SeqCst) {
                return state;
            }

            on_stage("stage_start:risk", &state);
            state = self.risk.run(state).await;
            on_stage("stage_completed:risk", &state);
        }

        on_stage("stage_completed:portfolio", &state);
        state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orchestrator_core::Market;

    fn gateway() -> Arc<ModelGateway> {
        Arc::new(ModelGateway::new([9u8; 32], Arc::new(model_gateway::UsageAggregator::new())))
    }

    struct NoopMarketData;

    #[async_trait::async_trait]
    impl MarketDataProvider for NoopMarketData {
        async fn get_bars(
            &self,
            _symbol: &str,
            _days_back: i64,
        ) -> orchestrator_core::OrchestratorResult<Vec<orchestrator_core::Bar>> {
            Ok(vec![])
        }
        async fn get_news(
            &self,
            _symbol: &str,
            _limit: u32,
        ) -> orchestrator_core::OrchestratorResult<Vec<orchestrator_core::NewsItem>> {
            Ok(vec![])
        }
    }

    #[tokio::test]
    async fn l1_profile_skips_debate_and_risk() {
        let graph = MainGraph::new(
            gateway(),
            Arc::new(NoopMarketData),
            Arc::new(ExecutionMonitor::new()),
            GraphOptions { level: AnalysisLevel::L1, use_planner: false, ..Default::default() },
        );
        let state = AnalysisState::new(
            "TSLA",
            chrono::NaiveDate::from_ymd_opt(2026, 1, 15).unwrap(),
            Market::US,
        );

        let mut stages = Vec::new();
        let cancel = Arc::new(AtomicBool::new(false));
        let result = graph.run(state, cancel, |stage, _| stages.push(stage.to_string())).await;

        assert!(!stages.iter().any(|s| s.contains("debate") || s.contains("risk")));
        assert!(result.final_trade_decision.is_empty());
        assert!(result.recommended_analysts.iter().all(|k| AnalystKind::quick_scan().contains(k)));
    }

    #[tokio::test]
    async fn l2_profile_runs_every_stage_and_terminates_debate_and_risk() {
        let graph = MainGraph::new(
            gateway(),
            Arc::new(NoopMarketData),
            Arc::new(ExecutionMonitor::new()),
            GraphOptions { level: AnalysisLevel::L2, use_planner: false, max_debate_rounds: 1, max_risk_rounds: 1 },
        );
        let state = AnalysisState::new(
            "AAPL",
            chrono::NaiveDate::from_ymd_opt(2026, 1, 15).unwrap(),
            Market::US,
        );

        let cancel = Arc::new(AtomicBool::new(false));
        let result = graph.run(state, cancel, |_, _| {}).await;

        assert_eq!(result.investment_debate_state.count, 2);
        assert_eq!(result.risk_debate_state.count, 3);
        assert!(!result.final_trade_decision.is_empty());
    }

    #[tokio::test]
    async fn cancellation_observed_before_debate_skips_remaining_stages() {
        let graph = MainGraph::new(
            gateway(),
            Arc::new(NoopMarketData),
            Arc::new(ExecutionMonitor::new()),
            GraphOptions { level: AnalysisLevel::L2, use_planner: false, max_debate_rounds: 1, max_risk_rounds: 1 },
        );
        let state = AnalysisState::new(
            "AAPL",
            chrono::NaiveDate::from_ymd_opt(2026, 1, 15).unwrap(),
            Market::US,
        );

        let cancel = Arc::new(AtomicBool::new(false));
        let cancel_for_stage = cancel.clone();
        let mut stages = Vec::new();
        let result = graph
            .run(state, cancel, move |stage, _| {
                stages.push(stage.to_string());
                if stage == "stage_completed:analyst" {
                    cancel_for_stage.store(true, Ordering::SeqCst);
                }
            })
            .await;

        assert!(!stages.iter().any(|s| s.contains("debate") || s.contains("risk") || s.contains("trader")));
        assert!(result.investment_plan.is_empty());
        assert!(result.final_trade_decision.is_empty());
    }
}
