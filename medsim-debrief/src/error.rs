//! Debrief error types.

use thiserror::Error;

/// Errors raised while assembling an after-action review.
#[derive(Debug, Error)]
pub enum DebriefError {
    /// The session has not finished any scenario yet.
    #[error("No completed scenarios to review")]
    NoCompletedScenarios,

    /// The context could not be serialised.
    #[error("Failed to serialise debrief context: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Convenience alias for debrief results.
pub type Result<T> = std::result::Result<T, DebriefError>;
