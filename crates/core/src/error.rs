//! Error types for the taskloop domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error enum.
//!
//! Errors that happen inside a single cycle of the execution loop are also
//! flattened into a serializable [`StepError`] so they can be stored in the
//! trace and fed back to the model.

use serde::{Deserialize, Serialize};
use thiserror::Error;

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

#[derive(Debug, Clone, Error)]
pub enum MemoryError {
    /// The embedding service could not be reached or returned garbage.
    #[error("Memory unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Clone, Error)]
pub enum ActionError {
    /// The requested action name is not in the registry.
    #[error("Unknown action: {0}")]
    NotFound(String),

    #[error("Action execution failed: {action_name}: {reason}")]
    ExecutionFailed { action_name: String, reason: String },

    #[error("Action timed out: {action_name} after {timeout_ms}ms")]
    Timeout { action_name: String, timeout_ms: u64 },

    #[error("Invalid action arguments: {0}")]
    InvalidArguments(String),

    #[error("Duplicate action name: {0}")]
    DuplicateName(String),

    #[error("Action name is reserved: {0}")]
    ReservedName(String),

    #[error(transparent)]
    Memory(#[from] MemoryError),
}

impl ActionError {
    /// Shorthand for a handler failure.
    pub fn failed(action_name: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::ExecutionFailed {
            action_name: action_name.into(),
            reason: reason.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TemplateError {
    /// A `{{key}}` placeholder names a key missing from the context.
    #[error("Unresolved template variable `{0}`: it is not present in the context")]
    MissingKey(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("Response is not valid JSON: {0}")]
    InvalidJson(String),

    #[error("Response does not match the expected shape: {0}")]
    InvalidShape(String),

    #[error("Chosen action `{0}` is not one of the available actions")]
    UnknownAction(String),

    #[error("Completion failed: {0}")]
    Completion(String),
}

#[derive(Debug, Error)]
pub enum TraceError {
    /// A recorded action is not present in the registry supplied for replay.
    #[error("Replay schema mismatch: recorded action `{action}` (step {index}) is not registered")]
    SchemaMismatch { index: usize, action: String },

    #[error("Unsupported trace version {found} (this build reads up to {supported})")]
    UnsupportedVersion { found: u32, supported: u32 },

    #[error("Trace I/O failed at {path}: {reason}")]
    Io { path: String, reason: String },

    #[error("Trace serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Error)]
pub enum ClarifyError {
    #[error("No operator is attached to answer clarification requests")]
    NoOperator,

    #[error("Operator input closed before an answer was given")]
    InputClosed,

    #[error("Clarification timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
}

// --- Step-level error descriptor ---

/// The category of a failure recorded in a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepErrorKind {
    TemplateResolution,
    Parse,
    UnknownAction,
    ActionExecution,
    MemoryUnavailable,
    Timeout,
}

/// A serializable error attached to a [`crate::trace::StepRecord`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepError {
    pub kind: StepErrorKind,
    pub message: String,
}

impl StepError {
    pub fn new(kind: StepErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for StepError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

impl From<&ActionError> for StepError {
    fn from(err: &ActionError) -> Self {
        let kind = match err {
            ActionError::NotFound(_) => StepErrorKind::UnknownAction,
            ActionError::Timeout { .. } => StepErrorKind::Timeout,
            ActionError::Memory(MemoryError::Unavailable(_)) => StepErrorKind::MemoryUnavailable,
            _ => StepErrorKind::ActionExecution,
        };
        Self::new(kind, err.to_string())
    }
}

impl From<&TemplateError> for StepError {
    fn from(err: &TemplateError) -> Self {
        Self::new(StepErrorKind::TemplateResolution, err.to_string())
    }
}

impl From<&ParseError> for StepError {
    fn from(err: &ParseError) -> Self {
        let kind = match err {
            ParseError::UnknownAction(_) => StepErrorKind::UnknownAction,
            _ => StepErrorKind::Parse,
        };
        Self::new(kind, err.to_string())
    }
}

impl From<&ClarifyError> for StepError {
    fn from(err: &ClarifyError) -> Self {
        let kind = match err {
            ClarifyError::Timeout { .. } => StepErrorKind::Timeout,
            _ => StepErrorKind::ActionExecution,
        };
        Self::new(kind, err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_error_displays_correctly() {
        let err = ProviderError::ApiError {
            status_code: 429,
            message: "Too many requests".into(),
        };
        assert!(err.to_string().contains("429"));
        assert!(err.to_string().contains("Too many requests"));
    }

    #[test]
    fn missing_key_names_the_key() {
        let err = TemplateError::MissingKey("report".into());
        assert!(err.to_string().contains("`report`"));
    }

    #[test]
    fn action_errors_map_to_step_kinds() {
        let unknown = StepError::from(&ActionError::NotFound("fly".into()));
        assert_eq!(unknown.kind, StepErrorKind::UnknownAction);

        let timeout = StepError::from(&ActionError::Timeout {
            action_name: "http_get".into(),
            timeout_ms: 500,
        });
        assert_eq!(timeout.kind, StepErrorKind::Timeout);

        let memory = StepError::from(&ActionError::Memory(MemoryError::Unavailable(
            "embedding service down".into(),
        )));
        assert_eq!(memory.kind, StepErrorKind::MemoryUnavailable);

        let failed = StepError::from(&ActionError::failed("mkdir", "exists"));
        assert_eq!(failed.kind, StepErrorKind::ActionExecution);
        assert!(failed.message.contains("mkdir"));
    }

    #[test]
    fn step_error_serializes_snake_case() {
        let err = StepError::new(StepErrorKind::MemoryUnavailable, "down");
        let json = serde_json::to_string(&err).unwrap();
        assert!(json.contains("memory_unavailable"));
    }
}
