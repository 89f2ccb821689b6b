use std::collections::HashMap;
use std::sync::Mutex;

use serde::Serialize;

/// One invocation's metrics, published by the Resilient Node (§4.2: "`{node_name,
/// duration_ms, success, error, timeout, retries}` — published to an in-process
/// monitor").
#[derive(Debug, Clone, Serialize)]
pub struct NodeExecutionMetrics {
    pub node_name: String,
    pub duration_ms: u64,
    pub success: bool,
    pub error: Option<String>,
    pub timeout: bool,
    pub retries: u32,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct NodeSummary {
    pub total_executions: u64,
    pub successful: u64,
    pub failed: u64,
    pub total_duration_ms: u64,
    pub errors: Vec<String>,
}

/// In-process aggregation of per-node execution metrics, grounded on the teacher's
/// pattern of a shared concurrent map of running counters (the DashMap TTL caches in
/// the original orchestrator). One process-wide instance is expected to be shared via
/// `Arc` across every Resilient Node.
#[derive(Default)]
pub struct ExecutionMonitor {
    metrics: Mutex<HashMap<String, NodeSummary>>,
    failed_nodes: Mutex<Vec<(String, String)>>,
}

impl ExecutionMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_execution(&self, metrics: NodeExecutionMetrics) {
        let mut table = self.metrics.lock().expect("execution monitor mutex poisoned");
        let entry = table.entry(metrics.node_name.clone()).or_default();
        entry.total_executions += 1;
        entry.total_duration_ms += metrics.duration_ms;
        if metrics.success {
            entry.successful += 1;
        } else {
            entry.failed += 1;
            if let Some(error) = &metrics.error {
                entry.errors.push(error.clone());
                drop(table);
                self.failed_nodes
                    .lock()
                    .expect("execution monitor mutex poisoned")
                    .push((metrics.node_name.clone(), error.clone()));
            }
        }
    }

    pub fn summary(&self) -> HashMap<String, NodeSummary> {
        self.metrics.lock().expect("execution monitor mutex poisoned").clone()
    }

    pub fn failed_nodes(&self) -> Vec<(String, String)> {
        self.failed_nodes.lock().expect("execution monitor mutex poisoned").clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aggregates_success_and_failure_counts_per_node() {
        let monitor = ExecutionMonitor::new();
        monitor.record_execution(NodeExecutionMetrics {
            node_name: "Market Analyst".to_string(),
            duration_ms: 120,
            success: true,
            error: None,
            timeout: false,
            retries: 0,
        });
        monitor.record_execution(NodeExecutionMetrics {
            node_name: "Market Analyst".to_string(),
            duration_ms: 45_000,
            success: false,
            error: Some("node timeout".to_string()),
            timeout: true,
            retries: 1,
        });

        let summary = monitor.summary();
        let market = &summary["Market Analyst"];
        assert_eq!(market.total_executions, 2);
        assert_eq!(market.successful, 1);
        assert_eq!(market.failed, 1);
        assert_eq!(monitor.failed_nodes().len(), 1);
    }
}
