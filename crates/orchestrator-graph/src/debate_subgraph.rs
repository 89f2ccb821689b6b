//! C4.2: the Debate subgraph (§4.4.2). Bull and Bear alternate turns until
//! `count >= 2*max_debate_rounds`, then Manager writes the judge decision and the
//! investment plan. Strictly serial — no fan-out (§5: "Debate and risk turns are
//! strictly sequential").

use std::sync::Arc;

use model_gateway::ModelGateway;
use orchestrator_core::{AnalysisState, DebateStatePatch, OrchestratorResult, RoleKey, StatePatch};

use crate::conditional::{should_continue_debate, DebateNext};

pub struct DebateSubgraph {
    gateway: Arc<ModelGateway>,
    max_debate_rounds: u32,
}

impl DebateSubgraph {
    pub fn new(gateway: Arc<ModelGateway>, max_debate_rounds: u32) -> Self {
        Self { gateway, max_debate_rounds }
    }

    /// Drive Bull/Bear turns to termination, then Manager (§4.4.2). Any model
    /// failure degrades to a scripted turn rather than aborting the debate — a single
    /// LLM outage must not prevent `investment_plan` from being set (§8 I3).
    pub async fn run(&self, mut state: AnalysisState) -> AnalysisState {
        loop {
            match should_continue_debate(&state.investment_debate_state, self.max_debate_rounds) {
                DebateNext::Bull => {
                    let patch = self.bull_turn(&state).await;
                    state.merge(patch);
                }
                DebateNext::Bear => {
                    let patch = self.bear_turn(&state).await;
                    state.merge(patch);
                }
                DebateNext::Manager => break,
            }
        }

        let patch = self.manager_turn(&state).await;
        state.merge(patch);
        state
    }

    async fn bull_turn(&self, state: &AnalysisState) -> StatePatch {
        let reports = combined_reports(state);
        let prompt = format!(
            "Argue the bullish case for {} using these analyst reports:\n{}",
            state.symbol, reports
        );
        let text = self
            .speak(&prompt)
            .await
            .unwrap_or_else(|_| "Bull: insufficient model output, defaulting to cautious optimism.".to_string());
        let entry = ensure_prefix(&text, "Bull");

        StatePatch {
            investment_debate: Some(DebateStatePatch {
                bull_entry: Some(entry.clone()),
                history_entry: Some(entry.clone()),
                current_response: Some(entry),
                increment_count: true,
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    async fn bear_turn(&self, state: &AnalysisState) -> StatePatch {
        let reports = combined_reports(state);
        let prompt = format!(
            "Argue the bearish case for {} using these analyst reports, rebutting the bull's last point:\n{}\nBull said: {}",
            state.symbol, reports, state.investment_debate_state.current_response
        );
        let text = self
            .speak(&prompt)
            .await
            .unwrap_or_else(|_| "Bear: insufficient model output, defaulting to cautious skepticism.".to_string());
        let entry = ensure_prefix(&text, "Bear");

        StatePatch {
            investment_debate: Some(DebateStatePatch {
                bear_entry: Some(entry.clone()),
                history_entry: Some(entry.clone()),
                current_response: Some(entry),
                increment_count: true,
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    async fn manager_turn(&self, state: &AnalysisState) -> StatePatch {
        let transcript = state.investment_debate_state.history.join("\n");
        let prompt = format!(
            "You are the research manager. Weigh this bull/bear debate on {} and decide: \n{}",
            state.symbol, transcript
        );
        let decision = self
            .speak(&prompt)
            .await
            .unwrap_or_else(|_| "Manager: debate inconclusive, recommend a balanced position.".to_string());

        StatePatch {
            investment_debate: Some(DebateStatePatch {
                judge_decision: Some(decision.clone()),
                ..Default::default()
            }),
            investment_plan: Some(decision),
            ..Default::default()
        }
    }

    async fn speak(&self, prompt: &str) -> OrchestratorResult<String> {
        let model = self.gateway.resolve(RoleKey::DeepThink).await?;
        let (reply, _usage) = model.complete("Respond concisely.", &[prompt.to_string()]).await?;
        Ok(reply)
    }
}

fn combined_reports(state: &AnalysisState) -> String {
    if state.analyst_reports.is_empty() {
        return "(no analyst reports available)".to_string();
    }
    state
        .analyst_reports
        .iter()
        .map(|(kind, report)| format!("- {}: {}", kind.label(), report))
        .collect::<Vec<_>>()
        .join("\n")
}

fn ensure_prefix(text: &str, speaker: &str) -> String {
    if text.starts_with(speaker) {
        text.to_string()
    } else {
        format!("{speaker}: {text}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orchestrator_core::Market;

    #[tokio::test]
    async fn debate_terminates_with_exactly_2m_turns_and_writes_plan() {
        let gateway = Arc::new(ModelGateway::new([3u8; 32], Arc::new(model_gateway::UsageAggregator::new())));
        let subgraph = DebateSubgraph::new(gateway, 2);
        let state = AnalysisState::new(
            "AAPL",
            chrono::NaiveDate::from_ymd_opt(2026, 1, 15).unwrap(),
            Market::US,
        );

        let result = subgraph.run(state).await;

        assert_eq!(result.investment_debate_state.count, 4);
        assert_eq!(result.investment_debate_state.history.len(), 4);
        assert!(!result.investment_debate_state.judge_decision.is_empty());
        assert!(!result.investment_plan.is_empty());
    }
}
