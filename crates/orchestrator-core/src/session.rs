use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{AnalysisLevel, AnalystKind, Market, Verdict};

/// Lifecycle status of a session (§3, §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Running,
    Completed,
    Failed,
    Canceled,
}

/// The durable record a client polls or looks up (§3 Session Descriptor, §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionDescriptor {
    pub session_id: Uuid,
    pub symbol: String,
    pub trade_date: NaiveDate,
    pub market: Market,
    pub level: AnalysisLevel,
    pub selected_analysts: Vec<AnalystKind>,
    pub status: SessionStatus,
    pub fingerprint: String,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub result: Option<Verdict>,
    pub diagnostic: Option<String>,
}

impl SessionDescriptor {
    /// Fingerprint a request per §4.7: sessions with the same symbol/trade_date/market
    /// and still `Running` dedup onto the same session_id rather than starting twice.
    pub fn fingerprint(symbol: &str, trade_date: NaiveDate, market: Market, level: AnalysisLevel) -> String {
        format!("{}:{}:{:?}:{:?}", symbol.to_uppercase(), trade_date, market, level)
    }

    /// §3 `elapsed_seconds`: computed from `created_at`/`completed_at` rather than
    /// stored redundantly; a still-`running` session reports elapsed time to now.
    pub fn elapsed_seconds(&self) -> i64 {
        let end = self.completed_at.unwrap_or_else(Utc::now);
        (end - self.created_at).num_seconds().max(0)
    }
}

/// The discriminated payload carried by an `Event` (§4.8, §6 stream route).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventKind {
    StageStart { stage: String },
    NodeUpdate { node: String, detail: String },
    NodeCompleted { node: String },
    NodeDegraded { node: String, reason: String },
    StageCompleted { stage: String },
    Result { verdict: Verdict },
    Error { message: String },
    /// Inserted by C8 when the ring buffer evicts events to stay within capacity
    /// (§4.8: "the oldest non-result/terminal events are dropped and a dropped
    /// marker event is inserted").
    Dropped { count: u64 },
    Terminal,
}

impl EventKind {
    /// Whether this event kind closes the stream per §4.8 ("the stream closes after
    /// the first terminal event and never emits past it") and §8 I2 ("the event
    /// stream's last event has type = terminal"). Only the literal `Terminal` kind
    /// closes the stream — `Result`/`Error` are always followed by one.
    pub fn is_terminal(&self) -> bool {
        matches!(self, EventKind::Terminal)
    }

    /// Whether the ring buffer must keep this event rather than evict it under
    /// pressure (§4.8: "the oldest non-`result`/`terminal` events are dropped").
    pub fn is_buffer_protected(&self) -> bool {
        matches!(self, EventKind::Result { .. } | EventKind::Error { .. } | EventKind::Terminal)
    }
}

/// A single sequenced, replayable stream event (§4.8).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub session_id: Uuid,
    pub sequence_no: u64,
    pub emitted_at: DateTime<Utc>,
    pub kind: EventKind,
}

/// Which analyst kinds ran and with what outcome, used by the result synthesizer and
/// exposed on the descriptor for diagnostics (§4.9).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalystOutcome {
    pub kind: AnalystKind,
    pub degraded: bool,
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_is_stable_across_symbol_case() {
        let date = NaiveDate::from_ymd_opt(2026, 1, 15).unwrap();
        let a = SessionDescriptor::fingerprint("aapl", date, Market::US, AnalysisLevel::L2);
        let b = SessionDescriptor::fingerprint("AAPL", date, Market::US, AnalysisLevel::L2);
        assert_eq!(a, b);
    }

    #[test]
    fn terminal_events_close_the_stream() {
        assert!(EventKind::Terminal.is_terminal());
        assert!(!EventKind::Error { message: "x".into() }.is_terminal());
        assert!(!EventKind::StageStart { stage: "analysts".into() }.is_terminal());
        assert!(EventKind::Error { message: "x".into() }.is_buffer_protected());
        assert!(EventKind::Terminal.is_buffer_protected());
    }
}
