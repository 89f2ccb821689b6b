use std::collections::{HashMap, HashSet};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::types::{AnalystKind, ChatMessage, Market};

/// Bull-vs-bear debate progress (§3 `investment_debate_state`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DebateState {
    pub bull_history: Vec<String>,
    pub bear_history: Vec<String>,
    pub history: Vec<String>,
    pub current_response: String,
    pub count: u32,
    pub judge_decision: String,
}

/// Risky/Safe/Neutral risk debate progress (§3 `risk_debate_state`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RiskDebateState {
    pub risky_history: Vec<String>,
    pub safe_history: Vec<String>,
    pub neutral_history: Vec<String>,
    pub history: Vec<String>,
    pub latest_speaker: String,
    pub count: u32,
    pub judge_decision: String,
}

/// The shared, append-merge analysis state threaded through every node (C3, §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisState {
    pub symbol: String,
    pub trade_date: NaiveDate,
    pub market: Market,

    pub messages: Vec<ChatMessage>,
    pub recommended_analysts: HashSet<AnalystKind>,
    pub analyst_reports: HashMap<AnalystKind, String>,

    pub investment_debate_state: DebateState,
    pub risk_debate_state: RiskDebateState,

    pub investment_plan: String,
    pub trader_investment_plan: String,
    pub final_trade_decision: String,

    pub analyst_errors: HashMap<AnalystKind, String>,
    pub analyst_completed: HashSet<AnalystKind>,

    pub historical_reflection: Option<String>,
    pub market_regime: Option<String>,
}

impl AnalysisState {
    /// Construct the seed state for a new session (set once at construction, §3
    /// invariant: `symbol`/`trade_date`/`market` are immutable thereafter).
    pub fn new(symbol: impl Into<String>, trade_date: NaiveDate, market: Market) -> Self {
        Self {
            symbol: symbol.into(),
            trade_date,
            market,
            messages: Vec::new(),
            recommended_analysts: HashSet::new(),
            analyst_reports: HashMap::new(),
            investment_debate_state: DebateState::default(),
            risk_debate_state: RiskDebateState::default(),
            investment_plan: String::new(),
            trader_investment_plan: String::new(),
            final_trade_decision: String::new(),
            analyst_errors: HashMap::new(),
            analyst_completed: HashSet::new(),
            historical_reflection: None,
            market_regime: None,
        }
    }

    /// Back-compat mirror report field lookup (§3: "mirrors of the mapping for
    /// backward-compat consumers"). Kept as a lookup rather than N duplicate struct
    /// fields, per spec.md §9's guidance to keep dynamic-field-routing tables static
    /// and small rather than re-introducing per-kind struct fields.
    pub fn mirror_report_field(kind: AnalystKind) -> &'static str {
        match kind {
            AnalystKind::Market => "market_report",
            AnalystKind::News => "news_report",
            AnalystKind::Fundamentals => "fundamentals_report",
            AnalystKind::Sentiment => "sentiment_report",
            AnalystKind::Policy => "policy_report",
            AnalystKind::FundFlow => "fund_flow_report",
            AnalystKind::Macro => "macro_report",
            AnalystKind::Social => "social_report",
        }
    }

    /// Apply a patch per the fixed merge rule (§3, §4.3, §5): scalar fields overwrite,
    /// `messages` and `*_history` append, mappings/sets union with last-wins on key
    /// conflict. Parallel analyst branches write disjoint `analyst_reports` /
    /// `analyst_errors` keys, so the union here is commutative in practice even though
    /// the implementation is last-wins on conflict.
    pub fn merge(&mut self, patch: StatePatch) {
        self.messages.extend(patch.messages);

        if let Some(recommended) = patch.recommended_analysts {
            self.recommended_analysts = recommended;
        }

        for (kind, report) in patch.analyst_reports {
            self.analyst_reports.insert(kind, report);
        }
        for (kind, err) in patch.analyst_errors {
            self.analyst_errors.insert(kind, err);
        }
        for kind in patch.analyst_completed {
            self.analyst_completed.insert(kind);
        }

        if let Some(debate_patch) = patch.investment_debate {
            debate_patch.apply(&mut self.investment_debate_state);
        }
        if let Some(risk_patch) = patch.risk_debate {
            risk_patch.apply(&mut self.risk_debate_state);
        }

        if let Some(plan) = patch.investment_plan {
            self.investment_plan = plan;
        }
        if let Some(plan) = patch.trader_investment_plan {
            self.trader_investment_plan = plan;
        }
        if let Some(decision) = patch.final_trade_decision {
            self.final_trade_decision = decision;
        }
        if let Some(regime) = patch.market_regime {
            self.market_regime = Some(regime);
        }
    }
}

/// A structured merge for `investment_debate_state` (§3 invariant 3).
#[derive(Debug, Clone, Default)]
pub struct DebateStatePatch {
    pub bull_entry: Option<String>,
    pub bear_entry: Option<String>,
    pub history_entry: Option<String>,
    pub current_response: Option<String>,
    pub increment_count: bool,
    pub judge_decision: Option<String>,
}

impl DebateStatePatch {
    fn apply(self, state: &mut DebateState) {
        if let Some(entry) = self.bull_entry {
            state.bull_history.push(entry);
        }
        if let Some(entry) = self.bear_entry {
            state.bear_history.push(entry);
        }
        if let Some(entry) = self.history_entry {
            state.history.push(entry);
        }
        if let Some(response) = self.current_response {
            state.current_response = response;
        }
        if self.increment_count {
            state.count += 1;
        }
        if let Some(decision) = self.judge_decision {
            state.judge_decision = decision;
        }
    }
}

/// A structured merge for `risk_debate_state` (§3 invariant 4).
#[derive(Debug, Clone, Default)]
pub struct RiskDebateStatePatch {
    pub risky_entry: Option<String>,
    pub safe_entry: Option<String>,
    pub neutral_entry: Option<String>,
    pub history_entry: Option<String>,
    pub latest_speaker: Option<String>,
    pub increment_count: bool,
    pub judge_decision: Option<String>,
}

impl RiskDebateStatePatch {
    fn apply(self, state: &mut RiskDebateState) {
        if let Some(entry) = self.risky_entry {
            state.risky_history.push(entry);
        }
        if let Some(entry) = self.safe_entry {
            state.safe_history.push(entry);
        }
        if let Some(entry) = self.neutral_entry {
            state.neutral_history.push(entry);
        }
        if let Some(entry) = self.history_entry {
            state.history.push(entry);
        }
        if let Some(speaker) = self.latest_speaker {
            state.latest_speaker = speaker;
        }
        if self.increment_count {
            state.count += 1;
        }
        if let Some(decision) = self.judge_decision {
            state.judge_decision = decision;
        }
    }
}

/// The partial update a node returns (§3, §4.3, §9 glossary `StatePatch`). Everything
/// defaults to a no-op so a node only needs to populate the fields it actually wrote.
#[derive(Debug, Clone, Default)]
pub struct StatePatch {
    pub messages: Vec<ChatMessage>,
    pub recommended_analysts: Option<HashSet<AnalystKind>>,
    pub analyst_reports: HashMap<AnalystKind, String>,
    pub analyst_errors: HashMap<AnalystKind, String>,
    pub analyst_completed: HashSet<AnalystKind>,
    pub investment_debate: Option<DebateStatePatch>,
    pub risk_debate: Option<RiskDebateStatePatch>,
    pub investment_plan: Option<String>,
    pub trader_investment_plan: Option<String>,
    pub final_trade_decision: Option<String>,
    pub market_regime: Option<String>,
}

impl StatePatch {
    pub fn with_message(mut self, message: ChatMessage) -> Self {
        self.messages.push(message);
        self
    }

    /// Build the degradation-stub patch for an analyst per §4.2: sets the report
    /// entry, records the error, and appends a marker message. `analyst_reports[kind]`
    /// takes the kind-specific fallback text where one is defined, falling back to the
    /// generic `"[<Role>] Analysis unavailable due to <reason>"` template otherwise.
    pub fn degradation_stub(kind: AnalystKind, reason: &str) -> Self {
        let generic = format!(
            "[{}] Analysis unavailable due to {}. Proceeding with limited information.",
            kind.label(),
            reason
        );
        let report_text = kind.fallback_report_text().map(str::to_string).unwrap_or_else(|| generic.clone());
        let mut reports = HashMap::new();
        reports.insert(kind, report_text);
        let mut errors = HashMap::new();
        errors.insert(kind, reason.to_string());
        let mut completed = HashSet::new();
        completed.insert(kind);

        StatePatch {
            messages: vec![ChatMessage::system(format!(
                "{} degraded: {}",
                kind.label(),
                reason
            ))],
            analyst_reports: reports,
            analyst_errors: errors,
            analyst_completed: completed,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn seed() -> AnalysisState {
        AnalysisState::new("AAPL", NaiveDate::from_ymd_opt(2026, 1, 15).unwrap(), Market::US)
    }

    #[test]
    fn merge_appends_messages_and_unions_disjoint_reports() {
        let mut state = seed();
        let mut patch_a = StatePatch::default();
        patch_a
            .analyst_reports
            .insert(AnalystKind::Market, "market ok".to_string());
        patch_a.analyst_completed.insert(AnalystKind::Market);

        let mut patch_b = StatePatch::default();
        patch_b
            .analyst_reports
            .insert(AnalystKind::News, "news ok".to_string());
        patch_b.analyst_completed.insert(AnalystKind::News);

        // Order of application must not matter (R1: merge is commutative over disjoint fields).
        let mut state_reordered = state.clone();
        state.merge(patch_a.clone());
        state.merge(patch_b.clone());
        state_reordered.merge(patch_b);
        state_reordered.merge(patch_a);

        assert_eq!(state.analyst_reports, state_reordered.analyst_reports);
        assert_eq!(state.analyst_completed, state_reordered.analyst_completed);
        assert_eq!(state.analyst_reports.len(), 2);
    }

    #[test]
    fn degradation_stub_uses_kind_specific_fallback_text() {
        let patch = StatePatch::degradation_stub(AnalystKind::Market, "timeout");
        let report = &patch.analyst_reports[&AnalystKind::Market];
        assert!(report.starts_with("[Market Analyst] Analysis unavailable"));
        assert!(patch.analyst_errors.contains_key(&AnalystKind::Market));
        assert!(patch.analyst_completed.contains(&AnalystKind::Market));
    }

    #[test]
    fn degradation_stub_falls_back_to_generic_text_when_kind_has_none() {
        let patch = StatePatch::degradation_stub(AnalystKind::Macro, "timeout");
        let report = &patch.analyst_reports[&AnalystKind::Macro];
        assert!(report.starts_with("[Macro Analyst] Analysis unavailable"));
    }

    #[test]
    fn debate_patch_increments_and_appends() {
        let mut state = seed();
        let patch = StatePatch {
            investment_debate: Some(DebateStatePatch {
                bull_entry: Some("Bull: buy".to_string()),
                history_entry: Some("Bull: buy".to_string()),
                current_response: Some("Bull: buy".to_string()),
                increment_count: true,
                ..Default::default()
            }),
            ..Default::default()
        };
        state.merge(patch);
        assert_eq!(state.investment_debate_state.count, 1);
        assert_eq!(state.investment_debate_state.bull_history.len(), 1);
        assert!(state.investment_debate_state.current_response.starts_with("Bull"));
    }
}
