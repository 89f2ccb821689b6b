use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Market the symbol trades on. Drives which analysts are recommended by default
/// (see `AnalystKind::for_market`) and which tool wiring a concrete analyst node uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Market {
    US,
    HK,
    CN,
}

/// One of the analyst kinds the Analyst subgraph may fan out to. New markets add
/// analysts here; the set stays closed and small per the "dynamic field routing by
/// name" re-architecture note — this is a static enum, not a string-keyed map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalystKind {
    Market,
    Social,
    News,
    Fundamentals,
    Sentiment,
    Policy,
    FundFlow,
    Macro,
}

impl AnalystKind {
    /// Default timeout in seconds per §4.2.
    pub fn default_timeout_secs(&self) -> u64 {
        match self {
            AnalystKind::Market => 45,
            AnalystKind::News => 60,
            AnalystKind::Fundamentals => 60,
            AnalystKind::Sentiment => 45,
            AnalystKind::Policy => 45,
            AnalystKind::FundFlow => 45,
            AnalystKind::Macro => 60,
            AnalystKind::Social => 45,
        }
    }

    /// Display name used in node names, event payloads, and degradation stub text
    /// (e.g. `"Market Analyst"`).
    pub fn label(&self) -> &'static str {
        match self {
            AnalystKind::Market => "Market Analyst",
            AnalystKind::Social => "Social Analyst",
            AnalystKind::News => "News Analyst",
            AnalystKind::Fundamentals => "Fundamentals Analyst",
            AnalystKind::Sentiment => "Sentiment Analyst",
            AnalystKind::Policy => "Policy Analyst",
            AnalystKind::FundFlow => "Fund Flow Analyst",
            AnalystKind::Macro => "Macro Analyst",
        }
    }

    /// The exact per-kind degradation text for `analyst_reports[kind]` when C2 stubs a
    /// branch out (§3 invariant 2: stub starts with the literal prefix
    /// `"[<Role>] Analysis unavailable"`). Macro has no bespoke continuation upstream;
    /// it falls back to the generic template at the call site.
    pub fn fallback_report_text(&self) -> Option<&'static str> {
        match self {
            AnalystKind::Market => {
                Some("[Market Analyst] Analysis unavailable. Technical analysis unavailable. Using baseline market assumptions.")
            }
            AnalystKind::Social => {
                Some("[Social Analyst] Analysis unavailable. Social media sentiment analysis unavailable.")
            }
            AnalystKind::News => {
                Some("[News Analyst] Analysis unavailable. Proceeding without recent news context.")
            }
            AnalystKind::Fundamentals => Some(
                "[Fundamentals Analyst] Analysis unavailable. Using historical data assumptions.",
            ),
            AnalystKind::Sentiment => {
                Some("[Sentiment Analyst] Analysis unavailable. Retail sentiment data unavailable.")
            }
            AnalystKind::Policy => {
                Some("[Policy Analyst] Analysis unavailable. Assuming neutral regulatory stance.")
            }
            AnalystKind::FundFlow => {
                Some("[Fund Flow Analyst] Analysis unavailable. Assuming neutral capital flow.")
            }
            AnalystKind::Macro => None,
        }
    }

    /// The market profile from §4.5: US -> {market, social, news, fundamentals};
    /// HK -> US ∪ {sentiment}; CN -> US ∪ {sentiment, policy, fund_flow}.
    pub fn for_market(market: Market) -> Vec<AnalystKind> {
        let mut set = vec![
            AnalystKind::Market,
            AnalystKind::Social,
            AnalystKind::News,
            AnalystKind::Fundamentals,
        ];
        match market {
            Market::US => {}
            Market::HK => set.push(AnalystKind::Sentiment),
            Market::CN => {
                set.push(AnalystKind::Sentiment);
                set.push(AnalystKind::Policy);
                set.push(AnalystKind::FundFlow);
            }
        }
        set
    }

    /// The quick-scan subset used by the L1 depth profile (§4.5).
    pub fn quick_scan() -> Vec<AnalystKind> {
        vec![AnalystKind::Market, AnalystKind::News, AnalystKind::Macro]
    }
}

/// Depth profile selected per session (§4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AnalysisLevel {
    L1,
    L2,
}

impl Default for AnalysisLevel {
    fn default() -> Self {
        AnalysisLevel::L2
    }
}

/// A single chat turn recorded in `AnalysisState.messages`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
    #[serde(default)]
    pub has_tool_calls: bool,
    pub timestamp: DateTime<Utc>,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
            has_tool_calls: false,
            timestamp: Utc::now(),
        }
    }

    pub fn assistant(content: impl Into<String>, has_tool_calls: bool) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
            has_tool_calls,
            timestamp: Utc::now(),
        }
    }

    pub fn tool(content: impl Into<String>) -> Self {
        Self {
            role: "tool".to_string(),
            content: content.into(),
            has_tool_calls: false,
            timestamp: Utc::now(),
        }
    }
}

/// The three ChatModel roles C1 resolves (§4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoleKey {
    DeepThink,
    QuickThink,
    Synthesis,
}

impl RoleKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            RoleKey::DeepThink => "deep_think",
            RoleKey::QuickThink => "quick_think",
            RoleKey::Synthesis => "synthesis",
        }
    }
}

/// Token usage / latency telemetry emitted by every ChatModel invocation (§4.1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenUsage {
    pub role: RoleKey,
    pub provider: String,
    pub model: String,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub latency_ms: u64,
    pub success: bool,
    #[serde(default)]
    pub error_kind: Option<String>,
}

/// Final signal label (§4.9, §8 I7). Five enumerated values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Signal {
    StrongSell,
    Sell,
    Hold,
    Buy,
    StrongBuy,
}

impl Signal {
    pub fn label(&self) -> &'static str {
        match self {
            Signal::StrongBuy => "Strong Buy",
            Signal::Buy => "Buy",
            Signal::Hold => "Hold",
            Signal::Sell => "Sell",
            Signal::StrongSell => "Strong Sell",
        }
    }
}

/// Risk verdict tier (§4.9).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RiskVerdict {
    Approved,
    Caution,
    Rejected,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BullVsBear {
    pub winner: String,
    pub conclusion: String,
    pub bullet_points: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub score: f64, // 0..10
    pub verdict: RiskVerdict,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeSetup {
    pub entry_zone: (f64, f64),
    pub target_price: f64,
    pub stop_loss: f64,
    pub risk_reward: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TechnicalIndicators {
    pub rsi: Option<f64>,
    pub macd: Option<f64>,
    pub trend: Option<String>,
}

/// The typed verdict document produced by the Result Synthesizer (§4.9, §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Verdict {
    pub signal: Signal,
    pub confidence: f64, // 0..100
    pub reasoning: String,
    pub bull_vs_bear: BullVsBear,
    pub risk_assessment: RiskAssessment,
    pub trade_setup: Option<TradeSetup>,
    pub technical_indicators: TechnicalIndicators,
    pub news_items: Vec<String>,
    pub peers: Vec<String>,
}

/// One record per completed session, keyed by `(session_id, symbol, trade_date)` (§3, §4.9).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictionRecord {
    pub session_id: uuid::Uuid,
    pub symbol: String,
    pub trade_date: chrono::NaiveDate,
    pub signal: Signal,
    pub confidence: f64,
    pub entry_price: Option<f64>,
    pub target_price: Option<f64>,
    pub stop_loss: Option<f64>,
    pub agent_key: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub outcome: Option<String>,
    #[serde(default)]
    pub actual_return: Option<f64>,
}
