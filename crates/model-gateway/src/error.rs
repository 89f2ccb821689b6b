use thiserror::Error;
use orchestrator_core::OrchestratorError;

/// Gateway-local error kinds, mapped onto `OrchestratorError` at the `ChatModel` seam
/// (§4.1, §7) so the orchestrator never has to know this crate exists.
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("HTTP request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),

    #[error("provider {0} unavailable")]
    ProviderUnavailable(String),

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("no credentials for provider {0}")]
    CredentialsMissing(String),

    #[error("request timed out")]
    Timeout,

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("other error: {0}")]
    Other(String),
}

pub type GatewayResult<T> = Result<T, GatewayError>;

impl From<GatewayError> for OrchestratorError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::CredentialsMissing(provider) => OrchestratorError::ProviderMissing(provider),
            GatewayError::RequestFailed(e) => OrchestratorError::ProviderTransient(e.to_string()),
            GatewayError::ProviderUnavailable(msg) => OrchestratorError::ProviderTransient(msg),
            GatewayError::Timeout => OrchestratorError::ProviderTransient("request timed out".to_string()),
            GatewayError::InvalidResponse(msg) => OrchestratorError::InvalidState(msg),
            GatewayError::Serialization(e) => OrchestratorError::InvalidState(e.to_string()),
            GatewayError::Other(msg) => OrchestratorError::ProviderTransient(msg),
        }
    }
}
