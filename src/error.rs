//! Crate-wide error taxonomy.

use std::time::Duration;

use thiserror::Error;

/// A stable error kind, independent of the `thiserror` variant that carries it.
///
/// Every [`CoreError`] maps to exactly one of these; callers that need to
/// branch on error category (rather than match the full enum) should use
/// [`CoreError::code`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    ValidationError,
    NotConnected,
    Timeout,
    RetryExhausted,
    CircuitOpen,
    NoAvailableAgent,
    BudgetExceeded,
    ProtocolError,
    Internal,
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorCode::ValidationError => "VALIDATION_ERROR",
            ErrorCode::NotConnected => "NOT_CONNECTED",
            ErrorCode::Timeout => "TIMEOUT",
            ErrorCode::RetryExhausted => "RETRY_EXHAUSTED",
            ErrorCode::CircuitOpen => "CIRCUIT_OPEN",
            ErrorCode::NoAvailableAgent => "NO_AVAILABLE_AGENT",
            ErrorCode::BudgetExceeded => "BUDGET_EXCEEDED",
            ErrorCode::ProtocolError => "PROTOCOL_ERROR",
            ErrorCode::Internal => "INTERNAL",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    Info,
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("validation failed: {message}")]
    Validation { message: String },

    #[error("transport not connected")]
    NotConnected,

    #[error("operation timed out after {duration_ms}ms")]
    Timeout { duration_ms: u64 },

    #[error("retry exhausted after {attempts} attempt(s): {source}")]
    RetryExhausted {
        attempts: u32,
        #[source]
        source: Box<CoreError>,
    },

    #[error("circuit '{name}' is open, retry after {retry_after_ms}ms")]
    CircuitOpen { name: String, retry_after_ms: u64 },

    #[error("no available agent of type '{agent_type}'")]
    NoAvailableAgent { agent_type: String },

    #[error("token budget '{budget_id}' exceeded ({used}/{max})")]
    BudgetExceeded {
        budget_id: String,
        used: u64,
        max: u64,
    },

    #[error("protocol error: {message}")]
    Protocol { message: String },

    #[error("internal error: {message}")]
    Internal { message: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl CoreError {
    pub fn validation(message: impl Into<String>) -> Self {
        CoreError::Validation {
            message: message.into(),
        }
    }

    pub fn timeout(duration: Duration) -> Self {
        CoreError::Timeout {
            duration_ms: duration.as_millis() as u64,
        }
    }

    pub fn retry_exhausted(attempts: u32, source: CoreError) -> Self {
        CoreError::RetryExhausted {
            attempts,
            source: Box::new(source),
        }
    }

    pub fn circuit_open(name: impl Into<String>, retry_after: Duration) -> Self {
        CoreError::CircuitOpen {
            name: name.into(),
            retry_after_ms: retry_after.as_millis() as u64,
        }
    }

    pub fn no_available_agent(agent_type: impl Into<String>) -> Self {
        CoreError::NoAvailableAgent {
            agent_type: agent_type.into(),
        }
    }

    pub fn budget_exceeded(budget_id: impl Into<String>, used: u64, max: u64) -> Self {
        CoreError::BudgetExceeded {
            budget_id: budget_id.into(),
            used,
            max,
        }
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        CoreError::Protocol {
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        CoreError::Internal {
            message: message.into(),
        }
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            CoreError::Validation { .. } => ErrorCode::ValidationError,
            CoreError::NotConnected => ErrorCode::NotConnected,
            CoreError::Timeout { .. } => ErrorCode::Timeout,
            CoreError::RetryExhausted { .. } => ErrorCode::RetryExhausted,
            CoreError::CircuitOpen { .. } => ErrorCode::CircuitOpen,
            CoreError::NoAvailableAgent { .. } => ErrorCode::NoAvailableAgent,
            CoreError::BudgetExceeded { .. } => ErrorCode::BudgetExceeded,
            CoreError::Protocol { .. } => ErrorCode::ProtocolError,
            CoreError::Internal { .. } | CoreError::Io(_) | CoreError::Json(_) => {
                ErrorCode::Internal
            }
        }
    }

    /// Whether a caller should retry this error under the default policy.
    /// Task-type specific policies may override this per §4.D.
    pub fn is_retryable(&self) -> bool {
        match self.code() {
            ErrorCode::NotConnected
            | ErrorCode::Timeout
            | ErrorCode::NoAvailableAgent => true,
            ErrorCode::ValidationError
            | ErrorCode::RetryExhausted
            | ErrorCode::CircuitOpen
            | ErrorCode::BudgetExceeded
            | ErrorCode::ProtocolError => false,
            ErrorCode::Internal => false,
        }
    }

    pub fn severity(&self) -> ErrorSeverity {
        match self.code() {
            ErrorCode::ValidationError | ErrorCode::ProtocolError => ErrorSeverity::Low,
            ErrorCode::NotConnected | ErrorCode::Timeout | ErrorCode::NoAvailableAgent => {
                ErrorSeverity::Medium
            }
            ErrorCode::CircuitOpen | ErrorCode::BudgetExceeded => ErrorSeverity::High,
            ErrorCode::RetryExhausted => ErrorSeverity::High,
            ErrorCode::Internal => ErrorSeverity::Critical,
        }
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;

/// Mirrors the teacher's `ErrorContext` trait: attach context to a foreign
/// result without losing the original error as `source`.
pub trait ErrorContext<T> {
    fn context_internal(self, message: impl Into<String>) -> Result<T>;
}

impl<T, E> ErrorContext<T> for std::result::Result<T, E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn context_internal(self, message: impl Into<String>) -> Result<T> {
        self.map_err(|e| CoreError::internal(format!("{}: {}", message.into(), e)))
    }
}
