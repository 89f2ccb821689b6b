use std::sync::Mutex;

use orchestrator_core::TokenUsage;
use tokio::sync::broadcast;

/// Every invocation routed through the registry emits a `TokenUsage` record here
/// (§4.1). Grounded on the teacher's broadcast-based `WsBroadcast`: a bounded channel
/// for live subscribers (billing dashboards, admin UI) plus an append-only in-memory
/// ledger for anyone who asks after the fact.
pub struct UsageAggregator {
    sender: broadcast::Sender<TokenUsage>,
    ledger: Mutex<Vec<TokenUsage>>,
}

impl UsageAggregator {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(1024);
        Self { sender, ledger: Mutex::new(Vec::new()) }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TokenUsage> {
        self.sender.subscribe()
    }

    pub fn publish(&self, usage: TokenUsage) {
        self.ledger.lock().expect("usage ledger mutex poisoned").push(usage.clone());
        let _ = self.sender.send(usage);
    }

    pub fn total_calls(&self) -> usize {
        self.ledger.lock().expect("usage ledger mutex poisoned").len()
    }

    pub fn snapshot(&self) -> Vec<TokenUsage> {
        self.ledger.lock().expect("usage ledger mutex poisoned").clone()
    }
}

impl Default for UsageAggregator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orchestrator_core::RoleKey;

    fn sample() -> TokenUsage {
        TokenUsage {
            role: RoleKey::DeepThink,
            provider: "openai-primary".to_string(),
            model: "gpt-4o".to_string(),
            prompt_tokens: 100,
            completion_tokens: 50,
            latency_ms: 820,
            success: true,
            error_kind: None,
        }
    }

    #[test]
    fn publish_appends_to_ledger() {
        let agg = UsageAggregator::new();
        agg.publish(sample());
        agg.publish(sample());
        assert_eq!(agg.total_calls(), 2);
    }

    #[tokio::test]
    async fn subscribers_receive_published_usage() {
        let agg = UsageAggregator::new();
        let mut rx = agg.subscribe();
        agg.publish(sample());
        let received = rx.recv().await.unwrap();
        assert_eq!(received.model, "gpt-4o");
    }
}
