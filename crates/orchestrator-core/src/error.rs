use thiserror::Error;

/// Error kinds observable to the core (§7). `DuplicateFingerprint` is included for
/// completeness but the Session Runner never surfaces it to the caller as a failure —
/// it resolves to the existing session_id instead (§7 item 8).
#[derive(Error, Debug, Clone)]
pub enum OrchestratorError {
    #[error("no chat model resolvable for role {0}")]
    ProviderMissing(String),

    #[error("provider transient failure: {0}")]
    ProviderTransient(String),

    #[error("node {node} exceeded its {timeout_secs}s timeout")]
    NodeTimeout { node: String, timeout_secs: u64 },

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("tool invocation failed: {0}")]
    ToolError(String),

    #[error("synthesizer could not parse model output: {0}")]
    SynthesizerParseError(String),

    #[error("session canceled")]
    SessionCanceled,

    #[error("fingerprint {0} already running")]
    DuplicateFingerprint(String),
}

impl OrchestratorError {
    /// Whether C2 should retry this error once before degrading (§7: transient and
    /// timeout errors are retryable; `ProviderMissing`/`InvalidState` are not).
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            OrchestratorError::ProviderTransient(_) | OrchestratorError::NodeTimeout { .. }
        )
    }

    /// Short machine-readable kind string, used in telemetry and degradation
    /// diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            OrchestratorError::ProviderMissing(_) => "provider_missing",
            OrchestratorError::ProviderTransient(_) => "provider_transient",
            OrchestratorError::NodeTimeout { .. } => "node_timeout",
            OrchestratorError::InvalidState(_) => "invalid_state",
            OrchestratorError::ToolError(_) => "tool_error",
            OrchestratorError::SynthesizerParseError(_) => "synthesizer_parse_error",
            OrchestratorError::SessionCanceled => "session_canceled",
            OrchestratorError::DuplicateFingerprint(_) => "duplicate_fingerprint",
        }
    }
}

pub type OrchestratorResult<T> = Result<T, OrchestratorError>;
