//! Trader node: the L2 pipeline step between Debate and Risk (§4.5 "Planner? ->
//! Analyst -> Debate -> Trader -> Risk -> Portfolio"). Turns the research manager's
//! `investment_plan` into a concrete `trader_investment_plan`.

use std::sync::Arc;

use model_gateway::ModelGateway;
use orchestrator_core::{AnalysisState, OrchestratorResult, RoleKey, StatePatch};

pub struct TraderNode {
    gateway: Arc<ModelGateway>,
}

impl TraderNode {
    pub fn new(gateway: Arc<ModelGateway>) -> Self {
        Self { gateway }
    }

    pub async fn run(&self, mut state: AnalysisState) -> AnalysisState {
        let prompt = format!(
            "You are the trader. Convert this investment plan for {} into a concrete position sizing and entry plan:\n{}",
            state.symbol, state.investment_plan
        );
        let plan = self
            .speak(&prompt)
            .await
            .unwrap_or_else(|_| format!("Execute the manager's plan as written: {}", state.investment_plan));

        state.merge(StatePatch { trader_investment_plan: Some(plan), ..Default::default() });
        state
    }

    async fn speak(&self, prompt: &str) -> OrchestratorResult<String> {
        let model = self.gateway.resolve(RoleKey::QuickThink).await?;
        let (reply, _usage) = model.complete("Respond concisely.", &[prompt.to_string()]).await?;
        Ok(reply)
    }
}
