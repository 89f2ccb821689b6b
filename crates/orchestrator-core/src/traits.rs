use async_trait::async_trait;

use crate::error::OrchestratorResult;
use crate::types::TokenUsage;

/// An LLM-backed chat capability (§1, §4.1). Concrete providers (OpenAI-compatible,
/// Google, Anthropic) live outside the core — this trait is the seam the Resilient
/// Node and the subgraphs program against.
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Complete a chat turn. Returns the assistant's text and the usage telemetry for
    /// that call; the caller (the `ModelGateway`) is responsible for publishing usage
    /// to the aggregator.
    async fn complete(&self, system: &str, messages: &[String]) -> OrchestratorResult<(String, TokenUsage)>;

    /// Provider id this instance is bound to, for diagnostics.
    fn provider_id(&self) -> &str;

    /// Model name this instance is bound to, for diagnostics.
    fn model_name(&self) -> &str;
}

/// External market data capability (§1: "All market data vendors ... modeled as a
/// `MarketDataProvider` capability"). The orchestration engine only ever calls this
/// trait; a concrete vendor-backed implementation lives in the `market-data` crate.
#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    async fn get_bars(&self, symbol: &str, days_back: i64) -> OrchestratorResult<Vec<Bar>>;
    async fn get_news(&self, symbol: &str, limit: u32) -> OrchestratorResult<Vec<NewsItem>>;
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Bar {
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct NewsItem {
    pub title: String,
    pub url: String,
    pub published_at: chrono::DateTime<chrono::Utc>,
}
