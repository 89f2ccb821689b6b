//! C4.3: the Risk subgraph (§4.4.3). Risky/Safe/Neutral cycle until
//! `count >= 3*max_risk_rounds`, then Judge writes `final_trade_decision`. Strictly
//! serial (§5).

use std::sync::Arc;

use model_gateway::ModelGateway;
use orchestrator_core::{AnalysisState, OrchestratorResult, RiskDebateStatePatch, RoleKey, StatePatch};

use crate::conditional::{should_continue_risk, RiskNext};

pub struct RiskSubgraph {
    gateway: Arc<ModelGateway>,
    max_risk_rounds: u32,
}

impl RiskSubgraph {
    pub fn new(gateway: Arc<ModelGateway>, max_risk_rounds: u32) -> Self {
        Self { gateway, max_risk_rounds }
    }

    pub async fn run(&self, mut state: AnalysisState) -> AnalysisState {
        loop {
            match should_continue_risk(&state.risk_debate_state, self.max_risk_rounds) {
                RiskNext::Risky => state.merge(self.speaker_turn(&state, "Risky").await),
                RiskNext::Safe => state.merge(self.speaker_turn(&state, "Safe").await),
                RiskNext::Neutral => state.merge(self.speaker_turn(&state, "Neutral").await),
                RiskNext::Judge => break,
            }
        }

        let patch = self.judge_turn(&state).await;
        state.merge(patch);
        state
    }

    async fn speaker_turn(&self, state: &AnalysisState, speaker: &'static str) -> StatePatch {
        let prompt = format!(
            "You are the {} risk analyst reviewing this trade plan for {}:\n{}\nPrior risk discussion:\n{}",
            speaker,
            state.symbol,
            state.trader_investment_plan,
            state.risk_debate_state.history.join("\n")
        );
        let text = self
            .speak(&prompt)
            .await
            .unwrap_or_else(|_| format!("{speaker}: model unavailable, deferring to baseline risk posture."));
        let entry = if text.starts_with(speaker) { text } else { format!("{speaker}: {text}") };

        let mut patch = RiskDebateStatePatch {
            latest_speaker: Some(speaker.to_string()),
            history_entry: Some(entry.clone()),
            increment_count: true,
            ..Default::default()
        };
        match speaker {
            "Risky" => patch.risky_entry = Some(entry),
            "Safe" => patch.safe_entry = Some(entry),
            _ => patch.neutral_entry = Some(entry),
        }

        StatePatch { risk_debate: Some(patch), ..Default::default() }
    }

    async fn judge_turn(&self, state: &AnalysisState) -> StatePatch {
        let prompt = format!(
            "You are the risk judge. Given this risk discussion on {}, write the final trade decision:\n{}",
            state.symbol,
            state.risk_debate_state.history.join("\n")
        );
        let decision = self
            .speak(&prompt)
            .await
            .unwrap_or_else(|_| "Judge: risk discussion inconclusive, recommend Hold pending more data.".to_string());

        StatePatch {
            risk_debate: Some(RiskDebateStatePatch { judge_decision: Some(decision.clone()), ..Default::default() }),
            final_trade_decision: Some(decision),
            ..Default::default()
        }
    }

    async fn speak(&self, prompt: &str) -> OrchestratorResult<String> {
        let model = self.gateway.resolve(RoleKey::DeepThink).await?;
        let (reply, _usage) = model.complete("Respond concisely.", &[prompt.to_string()]).await?;
        Ok(reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orchestrator_core::Market;

    #[tokio::test]
    async fn risk_terminates_with_exactly_3r_turns_and_writes_decision() {
        let gateway = Arc::new(ModelGateway::new([5u8; 32], Arc::new(model_gateway::UsageAggregator::new())));
        let subgraph = RiskSubgraph::new(gateway, 1);
        let mut state = AnalysisState::new(
            "AAPL",
            chrono::NaiveDate::from_ymd_opt(2026, 1, 15).unwrap(),
            Market::US,
        );
        state.trader_investment_plan = "Buy 100 shares".to_string();

        let result = subgraph.run(state).await;

        assert_eq!(result.risk_debate_state.count, 3);
        assert_eq!(result.risk_debate_state.history.len(), 3);
        assert!(!result.final_trade_decision.is_empty());
    }
}
