use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use orchestrator_core::{Bar, MarketDataProvider, NewsItem, OrchestratorError, OrchestratorResult};
use reqwest::Client;
use serde::Deserialize;
use tokio::sync::Mutex;
use tokio::time::Instant;

const BASE_URL: &str = "https://api.polygon.io";

/// Sliding-window rate limiter: at most `max_requests` per `window` duration.
#[derive(Clone)]
struct RateLimiter {
    timestamps: Arc<Mutex<VecDeque<Instant>>>,
    max_requests: usize,
    window: Duration,
}

impl RateLimiter {
    fn new(max_requests: usize, window: Duration) -> Self {
        Self { timestamps: Arc::new(Mutex::new(VecDeque::new())), max_requests, window }
    }

    async fn acquire(&self) {
        loop {
            let mut ts = self.timestamps.lock().await;
            let now = Instant::now();

            while let Some(&front) = ts.front() {
                if now.duration_since(front) >= self.window {
                    ts.pop_front();
                } else {
                    break;
                }
            }

            if ts.len() < self.max_requests {
                ts.push_back(now);
                return;
            }

            let wait_until = ts.front().unwrap().checked_add(self.window).unwrap();
            let sleep_dur = wait_until.duration_since(now) + Duration::from_millis(50);
            drop(ts);
            tracing::debug!("rate limiter: waiting {:.1}s for a Polygon API slot", sleep_dur.as_secs_f64());
            tokio::time::sleep(sleep_dur).await;
        }
    }
}

#[derive(Deserialize)]
struct AggregateBar {
    t: i64,
    o: f64,
    h: f64,
    l: f64,
    c: f64,
    v: f64,
}

#[derive(Deserialize)]
struct AggregateResponse {
    #[serde(default)]
    results: Vec<AggregateBar>,
}

#[derive(Deserialize)]
struct NewsArticle {
    title: String,
    article_url: String,
    published_utc: DateTime<Utc>,
}

#[derive(Deserialize)]
struct NewsResponse {
    #[serde(default)]
    results: Vec<NewsArticle>,
}

/// A concrete `MarketDataProvider` (§1 "All market data vendors ... modeled as a
/// `MarketDataProvider` capability") backed by Polygon.io's REST API. Grounded
/// directly on the teacher's `PolygonClient`: same rate limiter, same 429 retry-with-
/// backoff `send_request` helper, trimmed to the two operations the orchestrator's
/// trait boundary actually needs.
#[derive(Clone)]
pub struct PolygonMarketDataProvider {
    api_key: String,
    client: Client,
    rate_limiter: RateLimiter,
}

impl PolygonMarketDataProvider {
    pub fn new(api_key: String) -> Self {
        let rate_limit: usize =
            std::env::var("POLYGON_RATE_LIMIT").ok().and_then(|v| v.parse().ok()).unwrap_or(500);

        let client = Client::builder()
            .timeout(Duration::from_secs(90))
            .build()
            .unwrap_or_else(|_| Client::new());

        Self { api_key, client, rate_limiter: RateLimiter::new(rate_limit, Duration::from_secs(60)) }
    }

    async fn send_request(&self, builder: reqwest::RequestBuilder) -> OrchestratorResult<reqwest::Response> {
        for attempt in 0..3 {
            self.rate_limiter.acquire().await;
            let request = builder
                .try_clone()
                .ok_or_else(|| OrchestratorError::ToolError("request body not cloneable for retry".to_string()))?
                .build()
                .map_err(|e| OrchestratorError::ToolError(e.to_string()))?;

            let response = self
                .client
                .execute(request)
                .await
                .map_err(|e| OrchestratorError::ProviderTransient(e.to_string()))?;

            if response.status().as_u16() != 429 {
                return Ok(response);
            }

            let wait_secs = 15u64;
            tracing::warn!("Polygon 429 rate limited, waiting {}s before retry {}/3", wait_secs, attempt + 1);
            tokio::time::sleep(Duration::from_secs(wait_secs)).await;
        }

        Err(OrchestratorError::ProviderTransient("rate limited by Polygon after 3 retries".to_string()))
    }
}

#[async_trait]
impl MarketDataProvider for PolygonMarketDataProvider {
    async fn get_bars(&self, symbol: &str, days_back: i64) -> OrchestratorResult<Vec<Bar>> {
        let to = Utc::now();
        let from = to - chrono::Duration::days(days_back);
        let url = format!(
            "{}/v2/aggs/ticker/{}/range/1/day/{}/{}",
            BASE_URL,
            symbol,
            from.format("%Y-%m-%d"),
            to.format("%Y-%m-%d")
        );

        let response = self
            .send_request(self.client.get(&url).query(&[("apiKey", &self.api_key), ("adjusted", &"true".to_string())]))
            .await?;

        if !response.status().is_success() {
            return Err(OrchestratorError::ProviderTransient(format!("polygon aggregates returned {}", response.status())));
        }

        let parsed: AggregateResponse =
            response.json().await.map_err(|e| OrchestratorError::InvalidState(e.to_string()))?;

        Ok(parsed
            .results
            .into_iter()
            .map(|bar| Bar {
                timestamp: DateTime::from_timestamp_millis(bar.t).unwrap_or_else(Utc::now),
                open: bar.o,
                high: bar.h,
                low: bar.l,
                close: bar.c,
                volume: bar.v,
            })
            .collect())
    }

    async fn get_news(&self, symbol: &str, limit: u32) -> OrchestratorResult<Vec<NewsItem>> {
        let url = format!("{}/v2/reference/news", BASE_URL);
        let response = self
            .send_request(self.client.get(&url).query(&[
                ("apiKey", self.api_key.clone()),
                ("ticker", symbol.to_string()),
                ("limit", limit.to_string()),
            ]))
            .await?;

        if !response.status().is_success() {
            return Err(OrchestratorError::ProviderTransient(format!("polygon news returned {}", response.status())));
        }

        let parsed: NewsResponse =
            response.json().await.map_err(|e| OrchestratorError::InvalidState(e.to_string()))?;

        Ok(parsed
            .results
            .into_iter()
            .map(|article| NewsItem {
                title: article.title,
                url: article.article_url,
                published_at: article.published_utc,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn rate_limiter_admits_up_to_its_budget_without_waiting() {
        let limiter = RateLimiter::new(2, Duration::from_secs(60));
        let start = Instant::now();
        limiter.acquire().await;
        limiter.acquire().await;
        assert!(start.elapsed() < Duration::from_millis(100));
    }
}
