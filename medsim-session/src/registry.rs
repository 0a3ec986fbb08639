//! Explicit session registry.
//!
//! The host owns one [`SessionRegistry`]. Each session has at most one
//! running scenario actor plus the reports of every scenario it finished,
//! which feed the session debrief. Nothing here is global; two registries
//! are fully independent.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use medsim_core::blueprint::ScenarioBlueprint;
use medsim_core::config::{EngineConfig, MedsimConfig, SessionConfig};
use medsim_core::report::AarReport;
use medsim_debrief::{AarContextBuilder, CrossScenarioAarContext};
use parking_lot::RwLock;
use tracing::{info, warn};
use uuid::Uuid;

use crate::actor::{ScenarioHandle, spawn_scenario};
use crate::error::{Result, SessionError};

#[derive(Debug, Default)]
struct SessionEntry {
    active: Option<ScenarioHandle>,
    blueprints: Vec<Arc<ScenarioBlueprint>>,
    reports: Vec<AarReport>,
}

/// Live sessions keyed by id.
#[derive(Debug)]
pub struct SessionRegistry {
    engine_config: EngineConfig,
    session_config: SessionConfig,
    sessions: RwLock<HashMap<Uuid, SessionEntry>>,
}

impl SessionRegistry {
    /// A registry using the engine and session sections of `config`.
    #[must_use]
    pub fn new(config: &MedsimConfig) -> Self {
        Self {
            engine_config: config.engine.clone(),
            session_config: config.session.clone(),
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Open a new, empty session.
    #[must_use]
    pub fn create_session(&self) -> Uuid {
        let session_id = Uuid::new_v4();
        self.sessions.write().insert(session_id, SessionEntry::default());
        info!(session_id = %session_id, "Session created");
        session_id
    }

    /// Start `blueprint` in `session_id` and spawn its actor.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    /// Returns [`SessionError::UnknownSession`] or
    /// [`SessionError::ScenarioAlreadyActive`].
    pub fn start_scenario(
        &self,
        session_id: Uuid,
        blueprint: Arc<ScenarioBlueprint>,
    ) -> Result<ScenarioHandle> {
        let mut sessions = self.sessions.write();
        let entry = sessions
            .get_mut(&session_id)
            .ok_or(SessionError::UnknownSession(session_id))?;
        if entry.active.is_some() {
            return Err(SessionError::ScenarioAlreadyActive(session_id));
        }

        let handle = spawn_scenario(
            session_id,
            Arc::clone(&blueprint),
            self.engine_config.clone(),
            &self.session_config,
        );
        if !entry.blueprints.iter().any(|b| b.scenario_id == blueprint.scenario_id) {
            entry.blueprints.push(blueprint);
        }
        entry.active = Some(handle.clone());
        Ok(handle)
    }

    /// Handle of the running scenario.
    ///
    /// # Errors
    /// Returns [`SessionError::UnknownSession`] or
    /// [`SessionError::NoActiveScenario`].
    pub fn active(&self, session_id: Uuid) -> Result<ScenarioHandle> {
        let sessions = self.sessions.read();
        let entry = sessions
            .get(&session_id)
            .ok_or(SessionError::UnknownSession(session_id))?;
        entry.active.clone().ok_or(SessionError::NoActiveScenario(session_id))
    }

    /// Finish the running scenario, archive its report, and return it.
    ///
    /// # Errors
    /// Returns [`SessionError::UnknownSession`],
    /// [`SessionError::NoActiveScenario`] or [`SessionError::ActorGone`].
    pub async fn finish_scenario(&self, session_id: Uuid) -> Result<AarReport> {
        let handle = {
            let mut sessions = self.sessions.write();
            let entry = sessions
                .get_mut(&session_id)
                .ok_or(SessionError::UnknownSession(session_id))?;
            entry.active.take().ok_or(SessionError::NoActiveScenario(session_id))?
        };

        let report = handle.finish().await?;
        info!(
            session_id = %session_id,
            scenario_id = %report.scenario_id,
            overall = %report.competence_assessment.overall,
            "Scenario finished"
        );

        match self.sessions.write().get_mut(&session_id) {
            Some(entry) => entry.reports.push(report.clone()),
            None => warn!(
                session_id = %session_id,
                "Session closed while finishing, report not archived"
            ),
        }
        Ok(report)
    }

    /// Reports of every finished scenario, in completion order.
    ///
    /// # Errors
    /// Returns [`SessionError::UnknownSession`].
    pub fn reports(&self, session_id: Uuid) -> Result<Vec<AarReport>> {
        self.sessions
            .read()
            .get(&session_id)
            .map(|entry| entry.reports.clone())
            .ok_or(SessionError::UnknownSession(session_id))
    }

    /// Debrief context over every finished scenario in the session.
    ///
    /// # Errors
    /// Returns [`SessionError::UnknownSession`], or
    /// [`SessionError::Debrief`] when no scenario has been finished.
    pub fn debrief(
        &self,
        session_id: Uuid,
        completed_at: DateTime<Utc>,
    ) -> Result<CrossScenarioAarContext> {
        let (reports, builder) = {
            let sessions = self.sessions.read();
            let entry = sessions
                .get(&session_id)
                .ok_or(SessionError::UnknownSession(session_id))?;
            let builder = entry.blueprints.iter().fold(AarContextBuilder::new(), |b, blueprint| {
                b.with_blueprint(Arc::clone(blueprint))
            });
            (entry.reports.clone(), builder)
        };
        Ok(builder.build(&reports, completed_at)?)
    }

    /// Remove a session, stopping any running scenario, and return its
    /// archived reports.
    ///
    /// # Errors
    /// Returns [`SessionError::UnknownSession`].
    pub fn close_session(&self, session_id: Uuid) -> Result<Vec<AarReport>> {
        let entry = self
            .sessions
            .write()
            .remove(&session_id)
            .ok_or(SessionError::UnknownSession(session_id))?;
        if entry.active.is_some() {
            warn!(session_id = %session_id, "Session closed with a scenario still running");
        }
        info!(session_id = %session_id, reports = entry.reports.len(), "Session closed");
        Ok(entry.reports)
    }

    /// Registered sessions.
    #[must_use]
    pub fn session_count(&self) -> usize {
        self.sessions.read().len()
    }

    /// Sessions with a running scenario.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.sessions.read().values().filter(|e| e.active.is_some()).count()
    }
}
