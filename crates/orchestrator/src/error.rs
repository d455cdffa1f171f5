use agent_runtime::RuntimeError;
use std::time::Duration;

/// Orchestration errors
#[derive(Debug, thiserror::Error)]
pub enum OrchestrationError {
    #[error("Orchestration result not available after {0:?}")]
    Timeout(Duration),

    #[error("Orchestration was cancelled")]
    Cancelled,

    #[error("Invalid orchestration state: {0}")]
    InvalidState(String),

    #[error("Orchestration failed: {0}")]
    Failed(String),

    #[error("Runtime error: {0}")]
    Runtime(#[from] RuntimeError),

    #[error("Invalid orchestration configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Transform failed: {0}")]
    Transform(String),
}

pub type OrchestrationResultOf<T> = Result<T, OrchestrationError>;
