//! Error kinds surfaced by the runtime core.
//!
//! Tool-level failures are captured into a `Result` and returned to the
//! caller; they never escape a dispatch boundary. Only invariant violations
//! propagate upward as `RunAborted`.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum AgentError {
    #[error("invalid input: {0:?}")]
    InvalidInput(Vec<String>),

    #[error("tool not found: {0}")]
    ToolNotFound(String),

    #[error("tool disabled by configuration: {0}")]
    ToolDisabled(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("approval denied: {0}")]
    ApprovalDenied(String),

    #[error("operation timed out after {0}ms")]
    Timeout(u64),

    #[error("scope violation: {0}")]
    ScopeViolation(String),

    #[error("skill not found: {0}")]
    SkillNotFound(String),

    #[error("tool not allowed for this skill: {0}")]
    ToolNotAllowed(String),

    #[error("invalid skill manifest: {0}")]
    SkillManifestInvalid(String),

    #[error("validator failed: {0}")]
    ValidatorFailed(String),

    #[error("tool execution failed: {0}")]
    ToolExecutionFailed(String),

    #[error("verification failed: {0}")]
    VerificationFailed(String),

    #[error("unmet dependencies: {0}")]
    UnmetDependencies(String),

    #[error("failed to parse plan: {0}")]
    PlanParseError(String),

    #[error("run aborted: {0}")]
    RunAborted(String),
}

pub type AgentResult<T> = Result<T, AgentError>;
