//! Planner node (§4.5): invoked only when `use_planner` is set, writes
//! `recommended_analysts` as a subset of the market profile's analyst set. Falls back
//! to the full market profile on any model failure — the Planner narrows the set, it
//! never blocks the pipeline.

use std::collections::HashSet;
use std::sync::Arc;

use model_gateway::ModelGateway;
use orchestrator_core::{AnalysisState, AnalystKind, OrchestratorResult, RoleKey, StatePatch};

pub struct PlannerNode {
    gateway: Arc<ModelGateway>,
}

impl PlannerNode {
    pub fn new(gateway: Arc<ModelGateway>) -> Self {
        Self { gateway }
    }

    pub async fn run(&self, mut state: AnalysisState) -> AnalysisState {
        let profile = AnalystKind::for_market(state.market);
        let selected = match self.ask_planner(&state.symbol, &profile).await {
            Ok(set) if !set.is_empty() => set,
            _ => profile.into_iter().collect(),
        };

        state.merge(StatePatch { recommended_analysts: Some(selected), ..Default::default() });
        state
    }

    async fn ask_planner(&self, symbol: &str, profile: &[AnalystKind]) -> OrchestratorResult<HashSet<AnalystKind>> {
        let model = self.gateway.resolve(RoleKey::QuickThink).await?;
        let labels: Vec<String> = profile.iter().map(|k| k.label().to_string()).collect();
        let prompt = format!(
            "Pick which of these analysts are worth running for {}: {}. Reply with a comma-separated subset.",
            symbol,
            labels.join(", ")
        );
        let (reply, _usage) = model.complete("Respond concisely.", &[prompt]).await?;

        let chosen: HashSet<AnalystKind> = profile
            .iter()
            .copied()
            .filter(|k| reply.to_lowercase().contains(&k.label().to_lowercase()))
            .collect();
        Ok(chosen)
    }
}
