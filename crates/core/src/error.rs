//! Error types for the Agentmux domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error enum; all of them fold into the
//! top-level `Error`.
//!
//! Note that configuration problems are deliberately *not* represented
//! here: the normalizer accumulates them as diagnostics and the registry
//! turns them into inactive agents with recorded reasons. Only resolution
//! and dispatch failures surface as errors to callers.

use thiserror::Error;

/// The top-level error type for all Agentmux operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Dispatch errors ---
    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    // --- Agent resolution errors ---
    #[error("Agent error: {0}")]
    Agent(#[from] AgentError),

    // --- Task execution errors ---
    #[error("Task error: {0}")]
    Task(#[from] TaskError),

    // --- Operator catalog errors ---
    #[error("Operator error: {0}")]
    Operator(#[from] OperatorError),

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

/// A failure during a single outbound provider call.
#[derive(Debug, Clone, Error)]
pub enum DispatchError {
    #[error("API request failed: {message} (status: {status_code})")]
    Api { status_code: u16, message: String },

    #[error("Provider returned an error envelope: {0}")]
    ErrorEnvelope(String),

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("No adapter registered for provider: {0}")]
    NoAdapter(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Request cancelled")]
    Cancelled,
}

impl DispatchError {
    /// Whether this error came from explicit cancellation rather than a
    /// provider or network fault.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, DispatchError::Cancelled)
    }
}

/// A failure to resolve an agent from the registry.
#[derive(Debug, Clone, Error)]
pub enum AgentError {
    #[error("No agents configured: no provider has a usable API key")]
    NoAgentsConfigured,

    #[error("Default agent not configured")]
    DefaultAgentNotConfigured,
}

/// A failure of a task-level state machine.
#[derive(Debug, Error)]
pub enum TaskError {
    #[error("Task failed after {attempts} attempt(s); last error: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },

    #[error("Review not approved after {iterations} iteration(s)")]
    ReviewIterationsExceeded { iterations: u32 },

    #[error("Human review cancelled by operator")]
    HumanReviewCancelled,

    #[error("Unparseable model reply: {0}")]
    UnparseableReply(String),

    #[error("All brainstorm generations failed; last error: {0}")]
    AllGenerationsFailed(String),

    #[error(transparent)]
    Agent(#[from] AgentError),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

/// A failure in the operator catalog.
#[derive(Debug, Clone, Error)]
pub enum OperatorError {
    #[error("Operator already registered: {0}")]
    Duplicate(String),

    #[error("Invalid operator name: {0:?} (must match [A-Za-z_][A-Za-z0-9_]*)")]
    InvalidName(String),

    #[error("Operator not found: {0}")]
    NotFound(String),

    #[error("Operator execution failed: {name}: {reason}")]
    ExecutionFailed { name: String, reason: String },
}
