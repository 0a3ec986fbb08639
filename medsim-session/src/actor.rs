//! One task per running scenario.
//!
//! A [`ScenarioEngine`] has a single writer. Trainee actions arrive through
//! the [`ScenarioHandle`] command queue; the deterioration tick comes from a
//! `tokio::time::interval` inside the same task. Both go through one
//! `select!`, so an action and a tick can never interleave.
//!
//! Simulation time is derived from `tokio::time::Instant` elapsed since the
//! actor started, which lets tests drive it with a paused clock.
//!
//! ```text
//! ScenarioHandle ──mpsc──► ┌──────────────────┐
//!                          │  ScenarioActor   │──► ScenarioEngine
//!        interval tick ──► └──────────────────┘
//! ```

use std::sync::Arc;
use std::time::Duration;

use medsim_core::action::Action;
use medsim_core::blueprint::ScenarioBlueprint;
use medsim_core::config::{EngineConfig, SessionConfig};
use medsim_core::engine::{ActionResult, EngineStatus, ProgressData, RuntimeContext, ScenarioEngine};
use medsim_core::report::{AarReport, EndReason};
use medsim_core::types::SimTimestamp;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{Result, SessionError};

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

enum Command {
    Action {
        action: Box<Action>,
        reply: oneshot::Sender<ActionResult>,
    },
    RuntimeContext {
        reply: oneshot::Sender<RuntimeContext>,
    },
    ShouldEnd {
        reply: oneshot::Sender<Option<EndReason>>,
    },
    Progress {
        reply: oneshot::Sender<ProgressData>,
    },
    Status {
        reply: oneshot::Sender<EngineStatus>,
    },
    Finish {
        reply: oneshot::Sender<AarReport>,
    },
}

// ---------------------------------------------------------------------------
// Handle
// ---------------------------------------------------------------------------

/// Cheap, cloneable front door to a scenario actor.
///
/// Dropping every handle closes the queue, which stops the actor and its tick.
#[derive(Debug, Clone)]
pub struct ScenarioHandle {
    session_id: Uuid,
    scenario_id: String,
    tx: mpsc::Sender<Command>,
}

impl ScenarioHandle {
    /// Session this scenario belongs to.
    #[must_use]
    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// Blueprint id.
    #[must_use]
    pub fn scenario_id(&self) -> &str {
        &self.scenario_id
    }

    /// Whether the actor has stopped.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    async fn request<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(make(reply))
            .await
            .map_err(|_| SessionError::ActorGone(self.session_id))?;
        rx.await.map_err(|_| SessionError::ActorGone(self.session_id))
    }

    /// Apply a trainee action at the current simulation time.
    ///
    /// # Errors
    /// Returns [`SessionError::ActorGone`] if the scenario has been finished.
    pub async fn process_action(&self, action: Action) -> Result<ActionResult> {
        self.request(|reply| Command::Action {
            action: Box::new(action),
            reply,
        })
        .await
    }

    /// Runtime context for the dialogue consumer.
    ///
    /// # Errors
    /// Returns [`SessionError::ActorGone`] if the scenario has been finished.
    pub async fn runtime_context(&self) -> Result<RuntimeContext> {
        self.request(|reply| Command::RuntimeContext { reply }).await
    }

    /// Whether an end condition holds right now.
    ///
    /// # Errors
    /// Returns [`SessionError::ActorGone`] if the scenario has been finished.
    pub async fn should_end(&self) -> Result<Option<EndReason>> {
        self.request(|reply| Command::ShouldEnd { reply }).await
    }

    /// Progress snapshot.
    ///
    /// # Errors
    /// Returns [`SessionError::ActorGone`] if the scenario has been finished.
    pub async fn progress(&self) -> Result<ProgressData> {
        self.request(|reply| Command::Progress { reply }).await
    }

    /// Engine lifecycle status.
    ///
    /// # Errors
    /// Returns [`SessionError::ActorGone`] if the scenario has been finished.
    pub async fn status(&self) -> Result<EngineStatus> {
        self.request(|reply| Command::Status { reply }).await
    }

    /// End the scenario, stop the actor, and return the report.
    ///
    /// # Errors
    /// Returns [`SessionError::ActorGone`] if the scenario was already finished.
    pub async fn finish(&self) -> Result<AarReport> {
        self.request(|reply| Command::Finish { reply }).await
    }
}

// ---------------------------------------------------------------------------
// Actor
// ---------------------------------------------------------------------------

/// Whether a tick at `now` should be skipped because an action was applied
/// less than `min_spacing` ago.
#[must_use]
pub fn tick_too_soon(last_action: Option<Instant>, now: Instant, min_spacing: Duration) -> bool {
    last_action.is_some_and(|at| now.saturating_duration_since(at) < min_spacing)
}

struct ScenarioActor {
    session_id: Uuid,
    engine: ScenarioEngine,
    started: Instant,
    last_action: Option<Instant>,
    min_tick_spacing: Duration,
    auto_end: bool,
}

impl ScenarioActor {
    fn now(&self) -> SimTimestamp {
        let millis = u64::try_from(self.started.elapsed().as_millis()).unwrap_or(u64::MAX);
        SimTimestamp::from_millis(millis)
    }

    /// End the scenario if auto-end is on and an end condition holds.
    /// Returns whether it ended.
    fn end_if_due(&mut self, now: SimTimestamp) -> bool {
        if !self.auto_end || !self.engine.is_running() {
            return false;
        }
        let Some(reason) = self.engine.should_scenario_end(now) else {
            return false;
        };
        self.engine.end(reason);
        info!(
            session_id = %self.session_id,
            reason = %reason,
            elapsed = %now,
            "Scenario auto-ended"
        );
        true
    }

    /// One deterioration tick. A recent action skips the time-based update
    /// but not the end check. Returns `false` once the scenario has ended
    /// and the tick should stop.
    fn tick(&mut self) -> bool {
        if !self.engine.is_running() {
            return false;
        }

        let now = self.now();
        if tick_too_soon(self.last_action, Instant::now(), self.min_tick_spacing) {
            debug!(session_id = %self.session_id, "Tick update skipped, recent action");
        } else if let Some(state) = self.engine.update_patient_state(now) {
            info!(
                session_id = %self.session_id,
                state = %state,
                elapsed = %now,
                "Tick advanced patient state"
            );
        }

        !self.end_if_due(now)
    }

    fn handle(&mut self, command: Command) {
        let now = self.now();
        // Receivers that gave up waiting are not an error.
        match command {
            Command::Action { action, reply } => {
                let result = self.engine.process_student_action(&action, now);
                self.last_action = Some(Instant::now());
                self.end_if_due(now);
                let _ = reply.send(result);
            }
            Command::RuntimeContext { reply } => {
                let _ = reply.send(self.engine.runtime_context(now));
            }
            Command::ShouldEnd { reply } => {
                let _ = reply.send(self.engine.should_scenario_end(now));
            }
            Command::Progress { reply } => {
                let _ = reply.send(self.engine.progress(now));
            }
            Command::Status { reply } => {
                let _ = reply.send(self.engine.status());
            }
            Command::Finish { reply } => {
                let _ = reply.send(self.engine.generate_performance_report(now));
            }
        }
    }

    async fn run(mut self, mut rx: mpsc::Receiver<Command>, tick_interval: Duration) {
        let mut ticker = tokio::time::interval_at(self.started + tick_interval, tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut ticking = true;

        loop {
            tokio::select! {
                command = rx.recv() => {
                    let Some(command) = command else {
                        debug!(session_id = %self.session_id, "All handles dropped");
                        break;
                    };
                    let finished = matches!(command, Command::Finish { .. });
                    self.handle(command);
                    if finished {
                        break;
                    }
                }
                _ = ticker.tick(), if ticking => {
                    ticking = self.tick();
                    if !ticking {
                        debug!(session_id = %self.session_id, "Tick stopped");
                    }
                }
            }
        }
        info!(
            session_id = %self.session_id,
            scenario_id = %self.engine.blueprint().scenario_id,
            "Scenario actor stopped"
        );
    }
}

/// Start a scenario and spawn its actor on the current tokio runtime.
///
/// # Panics
/// Panics if called outside a tokio runtime.
#[must_use]
pub fn spawn_scenario(
    session_id: Uuid,
    blueprint: Arc<ScenarioBlueprint>,
    engine_config: EngineConfig,
    session_config: &SessionConfig,
) -> ScenarioHandle {
    let scenario_id = blueprint.scenario_id.clone();
    let mut engine = ScenarioEngine::new(blueprint, engine_config);
    engine.start();

    let (tx, rx) = mpsc::channel(session_config.command_buffer.max(1));
    let actor = ScenarioActor {
        session_id,
        engine,
        started: Instant::now(),
        last_action: None,
        min_tick_spacing: Duration::from_secs(session_config.min_tick_spacing_secs),
        auto_end: session_config.auto_end,
    };
    let tick_interval = Duration::from_secs(session_config.tick_interval_secs.max(1));
    tokio::spawn(actor.run(rx, tick_interval));

    info!(session_id = %session_id, scenario_id = %scenario_id, "Scenario actor spawned");
    ScenarioHandle {
        session_id,
        scenario_id,
        tx,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tick_spacing() {
        let now = Instant::now();
        let spacing = Duration::from_secs(25);
        assert!(!tick_too_soon(None, now, spacing));
        assert!(tick_too_soon(Some(now), now + Duration::from_secs(10), spacing));
        assert!(!tick_too_soon(Some(now), now + Duration::from_secs(25), spacing));
    }
}
