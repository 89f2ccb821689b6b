use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use orchestrator_core::{AnalystKind, OrchestratorError, StatePatch};
use tokio::time::sleep;

use crate::monitor::{ExecutionMonitor, NodeExecutionMetrics};

/// Default retry count and delay for C2 (§4.2: "max_retries (default 1) with fixed
/// retry_delay (default 2s)").
pub const DEFAULT_MAX_RETRIES: u32 = 1;
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(2);

/// Wraps any analyst node future with a timeout, bounded retries, and a degradation
/// fallback (C2). Grounded on `original_source/.../graph/resilience.py`'s
/// `ResilientNodeWrapper`, adapted from its thread-pool-plus-future-timeout shape to
/// structured concurrency: the node runs as a `tokio::spawn` task raced against
/// `tokio::time::timeout`, per spec.md §9's re-architecture note.
///
/// `run` is not itself `async fn` returning a boxed future because the node closure
/// needs to be re-invoked per retry attempt; callers pass a factory so each attempt
/// gets a fresh future.
pub struct ResilientNode {
    pub kind: AnalystKind,
    pub timeout: Duration,
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub monitor: Arc<ExecutionMonitor>,
    pub cancel: Option<Arc<AtomicBool>>,
}

impl ResilientNode {
    pub fn new(kind: AnalystKind, monitor: Arc<ExecutionMonitor>) -> Self {
        Self {
            kind,
            timeout: Duration::from_secs(kind.default_timeout_secs()),
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay: DEFAULT_RETRY_DELAY,
            monitor,
            cancel: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Share a session's cancel flag so a retry loop in flight stops reattempting
    /// and degrades immediately once cancellation is observed, instead of running
    /// its full timeout-and-retry budget after the caller has already moved on
    /// (§4.7/§5 "any node in-flight must not write further patches after the cancel
    /// signal is observed").
    pub fn with_cancel(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Run `make_attempt()` up to `max_retries + 1` times, enforcing `timeout` per
    /// attempt. Non-retryable errors (`ProviderMissing`, `InvalidState`) stop retrying
    /// immediately (§4.2, §7). On exhaustion, returns the degradation stub — the
    /// caller never sees the underlying error or panic.
    pub async fn run<F, Fut>(&self, node_name: &str, mut make_attempt: F) -> StatePatch
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<StatePatch, OrchestratorError>> + Send + 'static,
    {
        let started = Instant::now();
        let mut last_error: Option<OrchestratorError> = None;
        let mut retries = 0u32;

        for attempt in 0..=self.max_retries {
            if self.cancel.as_ref().is_some_and(|c| c.load(Ordering::SeqCst)) {
                last_error = Some(OrchestratorError::SessionCanceled);
                break;
            }

            let attempt_future = make_attempt();
            let handle = tokio::spawn(attempt_future);

            let outcome = tokio::time::timeout(self.timeout, handle).await;

            match outcome {
                Ok(Ok(Ok(patch))) => {
                    self.monitor.record_execution(NodeExecutionMetrics {
                        node_name: node_name.to_string(),
                        duration_ms: started.elapsed().as_millis() as u64,
                        success: true,
                        error: None,
                        timeout: false,
                        retries,
                    });
                    return patch;
                }
                Ok(Ok(Err(err))) => {
                    let retryable = err.is_retryable();
                    last_error = Some(err);
                    if !retryable || attempt == self.max_retries {
                        break;
                    }
                }
                Ok(Err(join_err)) => {
                    // Task panicked or was canceled; not retryable information we can
                    // act on, treat as terminal for this attempt.
                    last_error = Some(OrchestratorError::InvalidState(format!(
                        "node task join error: {join_err}"
                    )));
                    break;
                }
                Err(_elapsed) => {
                    retries = attempt + 1;
                    last_error = Some(OrchestratorError::NodeTimeout {
                        node: node_name.to_string(),
                        timeout_secs: self.timeout.as_secs(),
                    });
                    if attempt == self.max_retries {
                        break;
                    }
                }
            }

            sleep(self.retry_delay).await;
        }

        let error = last_error.unwrap_or_else(|| OrchestratorError::InvalidState("unknown node failure".to_string()));
        self.monitor.record_execution(NodeExecutionMetrics {
            node_name: node_name.to_string(),
            duration_ms: started.elapsed().as_millis() as u64,
            success: false,
            error: Some(error.to_string()),
            timeout: matches!(error, OrchestratorError::NodeTimeout { .. }),
            retries,
        });

        StatePatch::degradation_stub(self.kind, &error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orchestrator_core::ChatMessage;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn successful_attempt_returns_patch_without_retry() {
        let monitor = Arc::new(ExecutionMonitor::new());
        let node = ResilientNode::new(AnalystKind::Market, monitor.clone());
        let calls = Arc::new(AtomicU32::new(0));

        let patch = node
            .run("Market Analyst", {
                let calls = calls.clone();
                move || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async move {
                        Ok(StatePatch::default().with_message(ChatMessage::system("ok")))
                    }
                }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(patch.analyst_reports.is_empty());
    }

    #[tokio::test]
    async fn timeout_degrades_with_stub_after_retry() {
        let monitor = Arc::new(ExecutionMonitor::new());
        let node = ResilientNode::new(AnalystKind::Market, monitor.clone())
            .with_timeout(Duration::from_millis(20));
        let node = ResilientNode { retry_delay: Duration::from_millis(5), ..node };

        let patch = node
            .run("Market Analyst", || async move {
                sleep(Duration::from_millis(200)).await;
                Ok(StatePatch::default())
            })
            .await;

        let report = &patch.analyst_reports[&AnalystKind::Market];
        assert!(report.starts_with("[Market Analyst] Analysis unavailable"));
        assert!(patch.analyst_errors.contains_key(&AnalystKind::Market));
    }

    #[tokio::test]
    async fn provider_missing_is_not_retried() {
        let monitor = Arc::new(ExecutionMonitor::new());
        let node = ResilientNode::new(AnalystKind::Macro, monitor.clone());
        let calls = Arc::new(AtomicU32::new(0));

        let patch = node
            .run("Macro Analyst", {
                let calls = calls.clone();
                move || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async move { Err(OrchestratorError::ProviderMissing("deep_think".to_string())) }
                }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(patch.analyst_errors.contains_key(&AnalystKind::Macro));
    }
}
