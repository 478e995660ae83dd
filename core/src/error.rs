use thiserror::Error;

/// Result type alias for orchestrator operations
pub type Result<T> = std::result::Result<T, CdeError>;

/// Comprehensive error types for the CDE orchestrator.
///
/// These errors cover all failure modes across the orchestrator, from prompt
/// validation to agent transport failures. Each variant carries a short
/// stable code (`E001`…) and a recoverability flag so callers can decide
/// between retry, fallback, and surfacing to the operator.
///
/// # Examples
///
/// ```rust
/// use cde_core::error::CdeError;
///
/// let not_found = CdeError::project_not_found("/tmp/missing");
/// assert!(not_found.is_not_found());
/// assert_eq!(not_found.code(), "E200");
/// assert!(!not_found.recoverable());
///
/// let corrupt = CdeError::CorruptState("trailing brace".to_string());
/// assert_eq!(corrupt.code(), "E201");
/// ```
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CdeError {
    /// Malformed input or parameter
    #[error("Validation error: {0}")]
    Validation(String),

    /// Prompt template contains an unresolved or non-whitelisted placeholder
    #[error("Prompt validation failed: {0}")]
    PromptValidation(String),

    /// A phase finished without producing a declared output artifact
    #[error("Artifact validation failed for phase '{phase}': missing {missing:?}")]
    ArtifactValidation { phase: String, missing: Vec<String> },

    /// Filesystem operation failed; the previous on-disk state is intact
    #[error("I/O failure: {0}")]
    Io(String),

    /// Project, feature, or recipe does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// State file exists but cannot be parsed even after migration
    #[error("Corrupt state: {0}")]
    CorruptState(String),

    /// Network failure, open circuit breaker, or missing agent binary
    #[error("Unavailable: {0}")]
    Unavailable(String),

    /// No eligible agent carries a required capability
    #[error("No available agent supports capability '{0}'")]
    CapabilityUnavailable(String),

    /// The caller or a timeout cancelled the operation
    #[error("Cancelled: {0}")]
    Cancelled(String),

    /// Agent execution failed after it started
    #[error("Transport failure from agent '{agent}': {message}")]
    Transport { agent: String, message: String },

    /// Every candidate in the fallback chain failed
    #[error("All {} fallback candidates failed", failures.len())]
    Exhausted { failures: Vec<AttemptFailure> },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Internal invariant violation
    #[error("Internal error: {0}")]
    Internal(String),
}

/// One failed attempt inside a fallback chain, in attempt order.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct AttemptFailure {
    /// Agent that was attempted
    pub agent_id: String,
    /// Stable error code of the failure
    pub code: String,
    /// Human-readable failure message
    pub message: String,
}

impl CdeError {
    /// Create a not found error for a project path
    pub fn project_not_found(path: impl std::fmt::Display) -> Self {
        Self::NotFound(format!("No project state at '{path}'"))
    }

    /// Create a not found error for a feature id
    pub fn feature_not_found(id: impl std::fmt::Display) -> Self {
        Self::NotFound(format!("Feature '{id}' not found"))
    }

    /// Create a not found error for a recipe id
    pub fn recipe_not_found(id: &str) -> Self {
        Self::NotFound(format!("Recipe '{id}' not found"))
    }

    /// Create a validation error for an empty field
    pub fn empty_field(field: &str) -> Self {
        Self::Validation(format!("Field '{field}' cannot be empty"))
    }

    /// Create a transport error for an agent
    pub fn transport(agent: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Transport {
            agent: agent.into(),
            message: message.into(),
        }
    }

    /// Wrap a `std::io::Error`, preserving the prior on-disk state guarantee
    pub fn io(err: &std::io::Error) -> Self {
        Self::Io(err.to_string())
    }

    /// Stable short code for wire payloads and logs
    pub fn code(&self) -> &'static str {
        match self {
            CdeError::Internal(_) => "E001",
            CdeError::Configuration(_) => "E002",
            CdeError::Validation(_) => "E100",
            CdeError::PromptValidation(_) => "E101",
            CdeError::ArtifactValidation { .. } => "E102",
            CdeError::Io(_) => "E110",
            CdeError::NotFound(_) => "E200",
            CdeError::CorruptState(_) => "E201",
            CdeError::Unavailable(_) => "E300",
            CdeError::CapabilityUnavailable(_) => "E301",
            CdeError::Cancelled(_) => "E400",
            CdeError::Transport { .. } => "E500",
            CdeError::Exhausted { .. } => "E501",
        }
    }

    /// Whether the caller may retry (or fall back) without operator action
    pub fn recoverable(&self) -> bool {
        matches!(
            self,
            CdeError::Validation(_)
                | CdeError::PromptValidation(_)
                | CdeError::ArtifactValidation { .. }
                | CdeError::Io(_)
                | CdeError::Unavailable(_)
                | CdeError::Transport { .. }
        )
    }

    /// Check if this error indicates a not found condition
    pub fn is_not_found(&self) -> bool {
        matches!(self, CdeError::NotFound(_))
    }

    /// Check if this error indicates a validation problem
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            CdeError::Validation(_)
                | CdeError::PromptValidation(_)
                | CdeError::ArtifactValidation { .. }
        )
    }

    /// Check if this error is a cancellation, distinct from failure
    pub fn is_cancelled(&self) -> bool {
        matches!(self, CdeError::Cancelled(_))
    }

    /// Check if this error should trigger agent fallback
    pub fn triggers_fallback(&self) -> bool {
        matches!(
            self,
            CdeError::Transport { .. } | CdeError::Unavailable(_) | CdeError::Cancelled(_)
        )
    }

    /// Serialise to the wire error object `{error, message, recoverable, code}`
    pub fn to_payload(&self) -> serde_json::Value {
        let mut payload = serde_json::json!({
            "error": true,
            "message": self.to_string(),
            "recoverable": self.recoverable(),
            "code": self.code(),
        });
        if let CdeError::Exhausted { failures } = self {
            payload["context"] = serde_json::json!({ "attempts": failures });
        }
        if let CdeError::ArtifactValidation { phase, missing } = self {
            payload["context"] = serde_json::json!({ "phase": phase, "missing": missing });
        }
        payload
    }
}
