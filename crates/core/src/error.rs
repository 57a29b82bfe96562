//! Error types for the BlackRoad gateway domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error enum.

use thiserror::Error;

/// The top-level error type for gateway operations.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Policy error: {0}")]
    Policy(#[from] PolicyError),

    #[error("Journal error: {0}")]
    Journal(#[from] JournalError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),
}

#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("Failed to read policy file {path}: {reason}")]
    Read { path: String, reason: String },

    #[error("Failed to parse policy file {path}: {reason}")]
    Parse { path: String, reason: String },

    #[error("Policy document has no agents")]
    MissingAgents,

    #[error("Agent not allowed")]
    AgentNotAllowed,

    #[error("Intent not allowed")]
    IntentNotAllowed,
}

#[derive(Debug, Error)]
pub enum JournalError {
    #[error("Journal storage error: {0}")]
    Storage(String),

    #[error("Journal serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Journal chain broken at line {line}: {reason}")]
    ChainBroken { line: usize, reason: String },
}
