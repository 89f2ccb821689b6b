//! C9: Result Synthesizer & Predictor Log (§4.9). Collapses the final `AnalysisState`
//! into a typed `Verdict`, retrying once with a stricter prompt on an unparseable
//! model response before falling back to a rule-based composition (§7
//! `SynthesizerParseError`).

use std::sync::Arc;

use model_gateway::ModelGateway;
use orchestrator_core::{
    AnalysisState, BullVsBear, OrchestratorError, PredictionRecord, RiskAssessment, RiskVerdict,
    RoleKey, Signal, TechnicalIndicators, Verdict,
};

pub struct ResultSynthesizer {
    gateway: Arc<ModelGateway>,
}

impl ResultSynthesizer {
    pub fn new(gateway: Arc<ModelGateway>) -> Self {
        Self { gateway }
    }

    /// Build the verdict from the final state. Tries the `synthesis` model once, then
    /// once more with a stricter instruction, then falls back to the deterministic
    /// rule-based composition (§4.9, §7 item 6).
    pub async fn synthesize(&self, state: &AnalysisState) -> Verdict {
        match self.try_model_synthesis(state, false).await {
            Ok(verdict) => return verdict,
            Err(err) => tracing::warn!("synthesizer first attempt failed: {err}"),
        }

        match self.try_model_synthesis(state, true).await {
            Ok(verdict) => return verdict,
            Err(err) => tracing::warn!("synthesizer retry failed, falling back to rule-based composition: {err}"),
        }

        self.rule_based_fallback(state)
    }

    async fn try_model_synthesis(&self, state: &AnalysisState, strict: bool) -> Result<Verdict, OrchestratorError> {
        let model = self.gateway.resolve(RoleKey::Synthesis).await?;
        let instruction = if strict {
            "Output ONLY a strict JSON object with fields: signal, confidence, reasoning. No prose, no markdown fences."
        } else {
            "Summarize the analysis into signal (StrongBuy/Buy/Hold/Sell/StrongSell), confidence (0-100), and reasoning."
        };
        let prompt = format!(
            "Symbol: {}\nFinal trade decision: {}\nInvestment plan: {}\nAnalyst reports: {:?}",
            state.symbol, state.final_trade_decision, state.investment_plan, state.analyst_reports
        );
        let (reply, _usage) = model.complete(instruction, &[prompt]).await?;

        let parsed: serde_json::Value = serde_json::from_str(reply.trim())
            .map_err(|e| OrchestratorError::SynthesizerParseError(e.to_string()))?;

        let signal_str = parsed
            .get("signal")
            .and_then(|v| v.as_str())
            .ok_or_else(|| OrchestratorError::SynthesizerParseError("missing signal field".to_string()))?;
        let signal = parse_signal(signal_str)
            .ok_or_else(|| OrchestratorError::SynthesizerParseError(format!("unrecognized signal {signal_str}")))?;
        let confidence = parsed
            .get("confidence")
            .and_then(|v| v.as_f64())
            .ok_or_else(|| OrchestratorError::SynthesizerParseError("missing confidence field".to_string()))?
            .clamp(0.0, 100.0);
        let reasoning = parsed
            .get("reasoning")
            .and_then(|v| v.as_str())
            .unwrap_or("(no reasoning provided)")
            .to_string();

        Ok(Verdict {
            signal,
            confidence,
            reasoning,
            bull_vs_bear: bull_vs_bear_from_state(state),
            risk_assessment: risk_assessment_from_state(state),
            trade_setup: None,
            technical_indicators: technical_indicators_from_state(state),
            news_items: Vec::new(),
            peers: Vec::new(),
        })
    }

    /// Deterministic composition from the raw reports (§4.9, scenario 5): used when
    /// every provider is down or the model output is never parseable.
    fn rule_based_fallback(&self, state: &AnalysisState) -> Verdict {
        let reasoning = if state.analyst_reports.is_empty() {
            "No analyst reports available; full degradation.".to_string()
        } else {
            state
                .analyst_reports
                .values()
                .cloned()
                .collect::<Vec<_>>()
                .join(" ")
        };

        Verdict {
            signal: Signal::Hold,
            confidence: 50.0,
            reasoning,
            bull_vs_bear: bull_vs_bear_from_state(state),
            risk_assessment: risk_assessment_from_state(state),
            trade_setup: None,
            technical_indicators: technical_indicators_from_state(state),
            news_items: Vec::new(),
            peers: Vec::new(),
        }
    }

    pub fn to_prediction_record(
        &self,
        session_id: uuid::Uuid,
        state: &AnalysisState,
        verdict: &Verdict,
    ) -> PredictionRecord {
        PredictionRecord {
            session_id,
            symbol: state.symbol.clone(),
            trade_date: state.trade_date,
            signal: verdict.signal,
            confidence: verdict.confidence,
            entry_price: verdict.trade_setup.as_ref().map(|t| t.entry_zone.0),
            target_price: verdict.trade_setup.as_ref().map(|t| t.target_price),
            stop_loss: verdict.trade_setup.as_ref().map(|t| t.stop_loss),
            agent_key: "orchestrator-core".to_string(),
            created_at: chrono::Utc::now(),
            outcome: None,
            actual_return: None,
        }
    }
}

fn parse_signal(raw: &str) -> Option<Signal> {
    let normalized = raw.trim().to_lowercase().replace(['_', ' ', '-'], "");
    match normalized.as_str() {
        "strongbuy" => Some(Signal::StrongBuy),
        "buy" => Some(Signal::Buy),
        "hold" => Some(Signal::Hold),
        "sell" => Some(Signal::Sell),
        "strongsell" => Some(Signal::StrongSell),
        _ => None,
    }
}

fn bull_vs_bear_from_state(state: &AnalysisState) -> BullVsBear {
    let debate = &state.investment_debate_state;
    let winner = if debate.judge_decision.to_lowercase().contains("bear") {
        "Bear"
    } else if debate.judge_decision.to_lowercase().contains("bull") {
        "Bull"
    } else {
        "Undecided"
    };

    BullVsBear {
        winner: winner.to_string(),
        conclusion: if debate.judge_decision.is_empty() {
            "No debate was conducted for this analysis level.".to_string()
        } else {
            debate.judge_decision.clone()
        },
        bullet_points: debate.history.iter().take(6).cloned().collect(),
    }
}

fn risk_assessment_from_state(state: &AnalysisState) -> RiskAssessment {
    if state.final_trade_decision.is_empty() {
        return RiskAssessment { score: 5.0, verdict: RiskVerdict::Caution };
    }

    let decision_lower = state.final_trade_decision.to_lowercase();
    let verdict = if decision_lower.contains("reject") {
        RiskVerdict::Rejected
    } else if decision_lower.contains("caution") {
        RiskVerdict::Caution
    } else {
        RiskVerdict::Approved
    };
    let score = match verdict {
        RiskVerdict::Approved => 3.0,
        RiskVerdict::Caution => 6.0,
        RiskVerdict::Rejected => 9.0,
    };

    RiskAssessment { score, verdict }
}

fn technical_indicators_from_state(state: &AnalysisState) -> TechnicalIndicators {
    if state.analyst_errors.contains_key(&orchestrator_core::AnalystKind::Market) {
        return TechnicalIndicators { rsi: None, macd: None, trend: None };
    }
    match state.analyst_reports.get(&orchestrator_core::AnalystKind::Market) {
        Some(_) => TechnicalIndicators { rsi: None, macd: None, trend: Some("see market_report".to_string()) },
        None => TechnicalIndicators { rsi: None, macd: None, trend: None },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orchestrator_core::Market;

    #[tokio::test]
    async fn full_degradation_falls_back_to_hold_with_confidence_50() {
        let gateway = Arc::new(ModelGateway::new([11u8; 32], Arc::new(model_gateway::UsageAggregator::new())));
        let synthesizer = ResultSynthesizer::new(gateway);
        let state = AnalysisState::new(
            "AAPL",
            chrono::NaiveDate::from_ymd_opt(2026, 1, 15).unwrap(),
            Market::US,
        );

        let verdict = synthesizer.synthesize(&state).await;

        assert!(matches!(verdict.signal, Signal::Hold));
        assert_eq!(verdict.confidence, 50.0);
    }

    #[test]
    fn parse_signal_is_tolerant_of_casing_and_separators() {
        assert!(matches!(parse_signal("Strong Buy"), Some(Signal::StrongBuy)));
        assert!(matches!(parse_signal("strong_sell"), Some(Signal::StrongSell)));
        assert!(parse_signal("garbage").is_none());
    }
}
