//! Session hosting errors.

use thiserror::Error;
use uuid::Uuid;

/// Errors from the session hosting layer.
#[derive(Debug, Error)]
pub enum SessionError {
    /// No session with this id is registered.
    #[error("Unknown session {0}")]
    UnknownSession(Uuid),

    /// The session has no running scenario.
    #[error("Session {0} has no active scenario")]
    NoActiveScenario(Uuid),

    /// The session already runs a scenario; finish it first.
    #[error("Session {0} already has an active scenario")]
    ScenarioAlreadyActive(Uuid),

    /// The scenario actor stopped before answering.
    #[error("Scenario actor for session {0} is gone")]
    ActorGone(Uuid),

    /// No blueprint matches the requested scenario.
    #[error("No blueprint matches '{0}'")]
    NoBlueprint(String),

    /// A blueprint failed to load.
    #[error(transparent)]
    Blueprint(#[from] medsim_core::MedsimError),

    /// The session debrief could not be built.
    #[error(transparent)]
    Debrief(#[from] medsim_debrief::DebriefError),
}

/// Convenience alias.
pub type Result<T> = std::result::Result<T, SessionError>;
