//! C6: pure, side-effect-free branching decisions (§4.6). Each function is the sole
//! input to the corresponding subgraph's edge-selection step; none perform I/O.

use orchestrator_core::{ChatMessage, DebateState, RiskDebateState};

/// Destination for an analyst's tool-call loop (§4.4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnalystNext {
    Tools,
    ClearMessages,
}

/// `should_continue_<kind>`: examines the last message in the branch's local buffer.
/// If it carries tool calls, route to the tools node; otherwise the analyst is done.
pub fn should_continue_analyst(messages: &[ChatMessage]) -> AnalystNext {
    match messages.last() {
        Some(msg) if msg.role == "assistant" && msg.has_tool_calls => AnalystNext::Tools,
        _ => AnalystNext::ClearMessages,
    }
}

/// Destination in the debate subgraph (§4.4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebateNext {
    Bull,
    Bear,
    Manager,
}

/// `should_continue_debate`: debate ends once `count >= 2*max_debate_rounds`;
/// otherwise alternates on the last speaker recorded in `current_response`'s prefix
/// (§3 invariant 3, §4.4.2).
pub fn should_continue_debate(state: &DebateState, max_debate_rounds: u32) -> DebateNext {
    if state.count >= 2 * max_debate_rounds {
        return DebateNext::Manager;
    }
    if state.current_response.starts_with("Bull") {
        DebateNext::Bear
    } else {
        DebateNext::Bull
    }
}

/// Destination in the risk subgraph (§4.4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RiskNext {
    Risky,
    Safe,
    Neutral,
    Judge,
}

/// `should_continue_risk`: risk debate ends once `count >= 3*max_risk_rounds`;
/// otherwise cycles Risky -> Safe -> Neutral -> Risky on `latest_speaker`
/// (§3 invariant 4, §4.4.3).
pub fn should_continue_risk(state: &RiskDebateState, max_risk_rounds: u32) -> RiskNext {
    if state.count >= 3 * max_risk_rounds {
        return RiskNext::Judge;
    }
    match state.latest_speaker.as_str() {
        "Risky" => RiskNext::Safe,
        "Safe" => RiskNext::Neutral,
        "Neutral" => RiskNext::Risky,
        _ => RiskNext::Risky,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn analyst_routes_to_tools_only_when_last_message_has_tool_calls() {
        let with_tools = vec![ChatMessage::assistant("use tool", true)];
        assert_eq!(should_continue_analyst(&with_tools), AnalystNext::Tools);

        let without_tools = vec![ChatMessage::assistant("final answer", false)];
        assert_eq!(should_continue_analyst(&without_tools), AnalystNext::ClearMessages);

        assert_eq!(should_continue_analyst(&[]), AnalystNext::ClearMessages);
    }

    #[test]
    fn debate_terminates_at_2m_and_alternates_before_that() {
        let mut state = DebateState::default();
        assert_eq!(should_continue_debate(&state, 1), DebateNext::Bull);

        state.current_response = "Bull: buy".to_string();
        assert_eq!(should_continue_debate(&state, 1), DebateNext::Bear);

        state.current_response = "Bear: sell".to_string();
        state.count = 2;
        assert_eq!(should_continue_debate(&state, 1), DebateNext::Manager);
    }

    #[test]
    fn risk_cycles_and_terminates_at_3r() {
        let mut state = RiskDebateState::default();
        state.latest_speaker = "Risky".to_string();
        assert_eq!(should_continue_risk(&state, 1), RiskNext::Safe);

        state.latest_speaker = "Neutral".to_string();
        assert_eq!(should_continue_risk(&state, 1), RiskNext::Risky);

        state.count = 3;
        assert_eq!(should_continue_risk(&state, 1), RiskNext::Judge);
    }
}
