use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// Error taxonomy shared by both runners. The kind strings are stable and
/// travel inside error response breadcrumbs, so remote consumers can branch
/// on them without parsing messages.
#[derive(Debug, Error)]
pub enum RcrtError {
    #[error("validation: {0}")]
    Validation(String),

    #[error("auth: {0}")]
    Auth(String),

    #[error("version conflict on {id}: expected {expected}")]
    Conflict { id: Uuid, expected: i32 },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("transport: {0}")]
    Transport(String),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("executor fault: {0}")]
    ExecutorFault(String),

    #[error("llm call timed out after {0:?}")]
    LlmTimeout(Duration),

    #[error("llm reply not parseable: {0}")]
    LlmParse(String),

    #[error("missing configuration: {0}")]
    ConfigMissing(String),

    #[error("fatal invariant: {0}")]
    Fatal(String),
}

impl RcrtError {
    pub fn kind(&self) -> &'static str {
        match self {
            RcrtError::Validation(_) => "validation",
            RcrtError::Auth(_) => "auth",
            RcrtError::Conflict { .. } => "conflict",
            RcrtError::NotFound(_) => "not-found",
            RcrtError::Transport(_) => "transport",
            RcrtError::Timeout(_) => "timeout",
            RcrtError::ExecutorFault(_) => "executor-fault",
            RcrtError::LlmTimeout(_) => "llm-timeout",
            RcrtError::LlmParse(_) => "llm-parse",
            RcrtError::ConfigMissing(_) => "config-missing",
            RcrtError::Fatal(_) => "fatal",
        }
    }

    /// Process exit code when the error escapes a runner's main loop.
    /// 0 clean, 1 config, 2 auth, 3 transport, 4 broken invariant.
    pub fn exit_code(&self) -> i32 {
        match self {
            RcrtError::Auth(_) => 2,
            RcrtError::Transport(_) | RcrtError::Timeout(_) => 3,
            RcrtError::Fatal(_) | RcrtError::Conflict { .. } => 4,
            _ => 1,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, RcrtError::Transport(_) | RcrtError::Timeout(_))
    }
}
