//! C2-C6, C9: the orchestration engine. Resilient node wrapper, the three subgraphs,
//! the conditional-logic predicates, the main graph assembler, and the result
//! synthesizer. `orchestrator-core` owns the data model and merge rule this crate
//! operates on; `model-gateway` supplies the `ChatModel` capability every node calls
//! through.

pub mod analyst_subgraph;
pub mod assembler;
pub mod conditional;
pub mod debate_subgraph;
pub mod monitor;
pub mod planner;
pub mod resilient;
pub mod risk_subgraph;
pub mod synthesizer;
pub mod trader;

pub use analyst_subgraph::AnalystSubgraph;
pub use assembler::{GraphOptions, MainGraph, DEFAULT_RECURSION_LIMIT};
pub use debate_subgraph::DebateSubgraph;
pub use monitor::{ExecutionMonitor, NodeExecutionMetrics, NodeSummary};
pub use planner::PlannerNode;
pub use resilient::ResilientNode;
pub use risk_subgraph::RiskSubgraph;
pub use synthesizer::ResultSynthesizer;
pub use trader::TraderNode;
