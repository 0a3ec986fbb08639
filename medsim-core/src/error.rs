//! Error types for the medsim core library.
//!
//! Only blueprint/configuration loading can fail with an `Err`. Trainee input
//! problems are reported through [`crate::engine::ActionResult`] instead, so a
//! malformed request never stops a running scenario.

use thiserror::Error;

/// Top-level error type for all medsim core operations.
#[derive(Error, Debug)]
pub enum MedsimError {
    /// A scenario blueprint could not be parsed.
    #[error("Blueprint parse error ({format}): {message}")]
    BlueprintParse {
        /// Source format that failed ("json" or "toml").
        format: &'static str,
        /// Parser message.
        message: String,
    },

    /// A scenario blueprint is missing a required section or value.
    #[error("Invalid blueprint '{scenario_id}': {reason}")]
    InvalidBlueprint {
        /// Scenario the blueprint claims to describe.
        scenario_id: String,
        /// What is missing or malformed.
        reason: String,
    },

    /// Blueprint file has an extension we do not know how to read.
    #[error("Unsupported blueprint format: {0}")]
    UnsupportedFormat(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Generic I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience Result type alias.
pub type Result<T> = std::result::Result<T, MedsimError>;
