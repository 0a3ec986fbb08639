//! The scenario engine: one running scenario for one trainee.
//!
//! [`ScenarioEngine`] composes the state tracker, vitals simulator,
//! treatment engine and performance tracker, and exposes the four
//! operations the hosting layer needs:
//!
//! - [`ScenarioEngine::runtime_context`]: read-only projection for the
//!   dialogue consumer
//! - [`ScenarioEngine::process_student_action`]: the single mutating entry
//!   point for trainee actions
//! - [`ScenarioEngine::should_scenario_end`]: pure end-condition check
//! - [`ScenarioEngine::generate_performance_report`]: the after-action report
//!
//! The engine is single-writer and synchronous. Callers serialise actions
//! and ticks and pass the current simulation time explicitly.

use crate::action::{Action, ActionType};
use crate::blueprint::{ScenarioBlueprint, UrgencyLevel};
use crate::config::EngineConfig;
use crate::milestone::CompletedMilestone;
use crate::performance::PerformanceTracker;
use crate::report::{AarReport, EndReason};
use crate::state::StateTracker;
use crate::treatment::{
    AvailableTreatment, TreatmentEffect, TreatmentEngine, TreatmentError, TreatmentWarning,
};
use crate::types::{PatientState, SimTimestamp, Vitals, round_minutes};
use crate::vitals::{
    FormattedVitals, PendingEffect, VitalsConcern, VitalsSimulator, concern_level, format_vitals,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

// ---------------------------------------------------------------------------
// Lifecycle
// ---------------------------------------------------------------------------

/// Lifecycle of a scenario.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum EngineStatus {
    /// Constructed, clock not running.
    NotStarted,
    /// Accepting actions and ticks.
    Running,
    /// Finished.
    Ended {
        /// Why.
        reason: EndReason,
    },
}

// ---------------------------------------------------------------------------
// Runtime context
// ---------------------------------------------------------------------------

/// Condensed patient profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatientContext {
    /// Name.
    pub name: String,
    /// Age in years.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub age: Option<u32>,
    /// How the patient talks and behaves.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub personality: Option<String>,
    /// Presenting complaint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chief_complaint: Option<String>,
    /// Known allergies.
    pub allergies: Vec<String>,
}

/// Scene and current presentation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneContext {
    /// Where the scenario takes place.
    pub description: String,
    /// How the patient looks in the current state.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub appearance: Option<String>,
    /// Clinical note for the current state.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clinical_note: Option<String>,
    /// Urgency of the current state.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub urgency_level: Option<UrgencyLevel>,
}

/// Light teaching hints for the dialogue consumer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeachingContext {
    /// Set once treatment is overdue.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub urgency_note: Option<String>,
    /// Set while the patient is critical.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub critical_note: Option<String>,
}

/// Everything the dialogue consumer gets for one turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeContext {
    /// Scenario id.
    pub scenario_id: String,
    /// Who the patient is.
    pub patient: PatientContext,
    /// Scene and presentation.
    pub scene: SceneContext,
    /// Current clinical state.
    pub current_state: PatientState,
    /// Current vitals.
    pub vitals: Vitals,
    /// Current vitals with units.
    pub formatted_vitals: FormattedVitals,
    /// Concern classification of the current vitals.
    pub vitals_concern: VitalsConcern,
    /// Findings an assessment would reveal right now.
    pub discoverable_findings: BTreeMap<String, String>,
    /// Medications the trainee may give.
    pub available_treatments: Vec<AvailableTreatment>,
    /// Minutes into the scenario.
    pub elapsed_minutes: f64,
    /// `MM:SS`.
    pub elapsed_formatted: String,
    /// Hints.
    pub teaching_context: TeachingContext,
}

// ---------------------------------------------------------------------------
// Action results
// ---------------------------------------------------------------------------

/// Structured error codes for rejected or questionable actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionErrorCode {
    /// Medication not in this scenario.
    UnknownMedication,
    /// Treatment named no medication.
    MissingMedication,
    /// An absolute contraindication is present.
    Contraindicated,
    /// Dose outside the safe band.
    IncorrectDose,
    /// Type not recognised.
    UnknownActionType,
    /// No type given.
    MissingActionType,
    /// The scenario is not running.
    ScenarioNotRunning,
}

/// Whether the action took effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionSeverity {
    /// Nothing happened.
    Error,
    /// The action took effect anyway.
    Warning,
}

/// Error detail of an [`ActionResult`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionError {
    /// Code.
    pub code: ActionErrorCode,
    /// Severity.
    pub severity: ActionSeverity,
    /// Explanation for the dialogue consumer to phrase.
    pub message: String,
    /// Standard dose for dose warnings.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggested_dose: Option<String>,
}

impl ActionError {
    fn rejected(code: ActionErrorCode, message: String) -> Self {
        Self {
            code,
            severity: ActionSeverity::Error,
            message,
            suggested_dose: None,
        }
    }
}

/// Handler-specific outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ActionOutcome {
    /// A medication was given.
    Treatment(TreatmentEffect),
    /// Something was examined.
    Assessment {
        /// Finding text, if the blueprint has one.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        finding: Option<String>,
        /// Current vitals, if requested.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        vitals: Option<FormattedVitals>,
    },
    /// Something was said.
    Communication {
        /// How the patient responds.
        patient_response: String,
        /// How well it landed.
        effectiveness: String,
    },
    /// Nothing to report.
    None,
}

/// Progress snapshot returned with every action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressData {
    /// Milestones completed so far.
    pub completed_milestones: Vec<CompletedMilestone>,
    /// Current clinical state.
    pub current_state: PatientState,
    /// Current vitals.
    pub current_vitals: Vitals,
    /// Minutes into the scenario.
    pub elapsed_minutes: f64,
    /// End condition that holds right now, while running.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub should_end: Option<EndReason>,
}

/// Result of [`ScenarioEngine::process_student_action`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionResult {
    /// `false` for errors and warnings.
    pub success: bool,
    /// Action type as given.
    #[serde(rename = "type")]
    pub action_type: Option<String>,
    /// Handler outcome.
    pub results: ActionOutcome,
    /// Error detail.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ActionError>,
    /// Progress snapshot.
    pub progress_data: ProgressData,
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// One running scenario.
#[derive(Debug, Clone)]
pub struct ScenarioEngine {
    blueprint: Arc<ScenarioBlueprint>,
    config: EngineConfig,
    status: EngineStatus,
    state: StateTracker,
    vitals: VitalsSimulator,
    treatments: TreatmentEngine,
    performance: PerformanceTracker,
}

impl ScenarioEngine {
    /// Create an engine for a blueprint. The scenario starts in
    /// [`EngineStatus::NotStarted`].
    #[must_use]
    pub fn new(blueprint: Arc<ScenarioBlueprint>, config: EngineConfig) -> Self {
        Self {
            state: StateTracker::new(&blueprint, &config),
            vitals: VitalsSimulator::new(&blueprint),
            treatments: TreatmentEngine::new(Arc::clone(&blueprint)),
            performance: PerformanceTracker::new(Arc::clone(&blueprint), &config),
            status: EngineStatus::NotStarted,
            blueprint,
            config,
        }
    }

    /// Start the clock. Returns `false` if already started or ended.
    pub fn start(&mut self) -> bool {
        if self.status != EngineStatus::NotStarted {
            return false;
        }
        self.status = EngineStatus::Running;
        info!(scenario_id = %self.blueprint.scenario_id, "Scenario started");
        true
    }

    /// Mark the scenario ended. Returns `false` if it already ended.
    pub fn end(&mut self, reason: EndReason) -> bool {
        if matches!(self.status, EngineStatus::Ended { .. }) {
            return false;
        }
        self.status = EngineStatus::Ended { reason };
        info!(scenario_id = %self.blueprint.scenario_id, %reason, "Scenario ended");
        true
    }

    /// Lifecycle status.
    #[must_use]
    pub fn status(&self) -> EngineStatus {
        self.status
    }

    /// Whether actions and ticks are accepted.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.status == EngineStatus::Running
    }

    /// The blueprint.
    #[must_use]
    pub fn blueprint(&self) -> &ScenarioBlueprint {
        &self.blueprint
    }

    /// State history.
    #[must_use]
    pub fn state_tracker(&self) -> &StateTracker {
        &self.state
    }

    /// Performance data.
    #[must_use]
    pub fn performance(&self) -> &PerformanceTracker {
        &self.performance
    }

    /// Bring the patient up to `now`: due treatment effects, then untreated
    /// deterioration and drift.
    fn advance(&mut self, now: SimTimestamp) -> Option<PatientState> {
        let applied = self.vitals.apply_due_effects(&mut self.state, now);
        if applied > 0 {
            debug!(applied, "Applied due treatment effects");
        }
        let transitioned = self.state.update_state_based_on_time(now);
        self.vitals.apply_time_degradation(&mut self.state, now);
        transitioned
    }

    /// Time-based update for the periodic tick. Returns the new state if the
    /// patient transitioned. Does nothing unless running.
    pub fn update_patient_state(&mut self, now: SimTimestamp) -> Option<PatientState> {
        if !self.is_running() {
            return None;
        }
        self.advance(now)
    }

    /// Read-only projection for the dialogue consumer.
    #[must_use]
    pub fn runtime_context(&self, now: SimTimestamp) -> RuntimeContext {
        let bp = &self.blueprint;
        let current = self.state.current_state();
        let vitals = self.state.current_vitals();
        let concern = concern_level(&vitals);
        let description = bp.state_description(current);
        let elapsed = now.minutes();

        let overdue = elapsed >= self.config.urgency_hint_after_minutes
            && !self.state.has_critical_treatment();
        let urgency_note = overdue
            .then(|| "Patient needs treatment urgently - time is critical".to_string());
        let critical_urgency = match description.and_then(|d| d.urgency_level) {
            Some(level) => level == UrgencyLevel::Critical,
            None => current == PatientState::Critical,
        };
        let critical_note = critical_urgency
            .then(|| "Life-threatening situation - immediate intervention required".to_string());

        RuntimeContext {
            scenario_id: bp.scenario_id.clone(),
            patient: PatientContext {
                name: bp.patient_profile.name.clone(),
                age: bp.patient_profile.age,
                personality: bp.patient_profile.personality.clone(),
                chief_complaint: bp.patient_profile.chief_complaint.clone(),
                allergies: bp.patient_profile.allergies.clone(),
            },
            scene: SceneContext {
                description: bp.scene_description.clone(),
                appearance: description.and_then(|d| d.appearance.clone()),
                clinical_note: description.and_then(|d| d.clinical_note.clone()),
                urgency_level: description.and_then(|d| d.urgency_level),
            },
            current_state: current,
            formatted_vitals: format_vitals(&vitals),
            vitals,
            vitals_concern: concern,
            discoverable_findings: bp
                .assessment_findings
                .iter()
                .map(|(key, finding)| (key.clone(), finding.text_for(current).to_string()))
                .collect(),
            available_treatments: self.treatments.available_treatments(),
            elapsed_minutes: round_minutes(elapsed),
            elapsed_formatted: now.to_string(),
            teaching_context: TeachingContext {
                urgency_note,
                critical_note,
            },
        }
    }

    /// Progress snapshot.
    #[must_use]
    pub fn progress(&self, now: SimTimestamp) -> ProgressData {
        ProgressData {
            completed_milestones: self.performance.milestones().completed_milestones(),
            current_state: self.state.current_state(),
            current_vitals: self.state.current_vitals(),
            elapsed_minutes: round_minutes(now.minutes()),
            should_end: if self.is_running() { self.should_scenario_end(now) } else { None },
        }
    }

    /// Record and handle one trainee action.
    ///
    /// Input problems (unknown medication, bad type) come back as a failed
    /// result, never as an error. Treatment warnings are reported but the
    /// treatment still takes effect.
    pub fn process_student_action(&mut self, action: &Action, now: SimTimestamp) -> ActionResult {
        let action_type = action.action_type.as_ref().map(ToString::to_string);
        if !self.is_running() {
            return self.failure(
                action_type,
                ActionErrorCode::ScenarioNotRunning,
                "Scenario is not running".to_string(),
                now,
            );
        }

        self.advance(now);
        self.performance.record_action(action, &self.state, now);

        let (results, error) = match &action.action_type {
            Some(ActionType::Treatment) => self.handle_treatment(action, now),
            Some(ActionType::Assessment) => (self.handle_assessment(action), None),
            Some(ActionType::Communication) => (
                ActionOutcome::Communication {
                    patient_response: "Patient acknowledges and cooperates".to_string(),
                    effectiveness: "good".to_string(),
                },
                None,
            ),
            Some(ActionType::Other(other)) => (
                ActionOutcome::None,
                Some(ActionError::rejected(
                    ActionErrorCode::UnknownActionType,
                    format!("Unknown action type: {other}"),
                )),
            ),
            None => (
                ActionOutcome::None,
                Some(ActionError::rejected(
                    ActionErrorCode::MissingActionType,
                    "Action has no type".to_string(),
                )),
            ),
        };

        self.advance(now);
        if let Some(error) = &error {
            debug!(code = ?error.code, message = %error.message, "Action not accepted cleanly");
        }
        ActionResult {
            success: error.is_none(),
            action_type,
            results,
            error,
            progress_data: self.progress(now),
        }
    }

    fn failure(
        &self,
        action_type: Option<String>,
        code: ActionErrorCode,
        message: String,
        now: SimTimestamp,
    ) -> ActionResult {
        ActionResult {
            success: false,
            action_type,
            results: ActionOutcome::None,
            error: Some(ActionError::rejected(code, message)),
            progress_data: self.progress(now),
        }
    }

    /// Validate, record and schedule a medication. A warning comes back
    /// alongside the applied effect.
    fn handle_treatment(
        &mut self,
        action: &Action,
        now: SimTimestamp,
    ) -> (ActionOutcome, Option<ActionError>) {
        let requested = action.drug.as_deref().unwrap_or(action.name.as_str()).trim();
        let vitals = self.state.current_vitals();
        let state_at_action = self.state.current_state();
        let validated = self
            .treatments
            .apply_treatment(Some(requested), action.dose.as_deref(), &vitals);
        let outcome = match validated {
            Ok(outcome) => outcome,
            Err(err) => {
                let code = match &err {
                    TreatmentError::UnknownMedication(name) => {
                        // The trainee still gave it; the safety gate must see it.
                        self.performance.record_medication(
                            name,
                            action.dose.as_deref(),
                            action.route.as_ref(),
                            action.volume_ml,
                            false,
                            &mut self.state,
                            now,
                        );
                        ActionErrorCode::UnknownMedication
                    }
                    TreatmentError::MissingMedication => ActionErrorCode::MissingMedication,
                };
                return (ActionOutcome::None, Some(ActionError::rejected(code, err.to_string())));
            }
        };

        let effect = outcome.effect().clone();
        self.performance.record_medication(
            requested,
            action.dose.as_deref(),
            action.route.as_ref(),
            action.volume_ml,
            effect.critical,
            &mut self.state,
            now,
        );
        self.vitals.schedule(
            PendingEffect {
                treatment: effect.drug.clone(),
                due: now.after_minutes(effect.time_to_effect_minutes),
                vital_changes: effect.vital_changes.clone(),
                state_change: effect.state_change,
            },
            &mut self.state,
            now,
        );

        if let Some(warning) = outcome.warning() {
            warn!(
                scenario_id = %self.blueprint.scenario_id,
                drug = %effect.drug,
                warning = warning.message(),
                "Treatment given despite warning"
            );
            self.performance.record_medication_warning(
                requested,
                action.dose.as_deref(),
                warning.clone(),
                state_at_action,
                now,
            );
            let (code, suggested_dose) = match warning {
                TreatmentWarning::Contraindicated { .. } => {
                    (ActionErrorCode::Contraindicated, None)
                }
                TreatmentWarning::IncorrectDose { suggested_dose, .. } => {
                    (ActionErrorCode::IncorrectDose, Some(suggested_dose.clone()))
                }
            };
            let error = ActionError {
                code,
                severity: ActionSeverity::Warning,
                message: warning.message().to_string(),
                suggested_dose,
            };
            return (ActionOutcome::Treatment(effect), Some(error));
        }

        (ActionOutcome::Treatment(effect), None)
    }

    fn handle_assessment(&self, action: &Action) -> ActionOutcome {
        let current = self.state.current_state();
        let finding = action
            .assessment_type
            .as_deref()
            .or(Some(action.name.as_str()))
            .and_then(|key| {
                let wanted = key.trim().to_lowercase();
                self.blueprint
                    .assessment_findings
                    .iter()
                    .find(|(k, _)| k.to_lowercase() == wanted)
            })
            .map(|(_, finding)| finding.text_for(current).to_string());
        ActionOutcome::Assessment {
            finding,
            vitals: action.includes_vitals.then(|| format_vitals(&self.state.current_vitals())),
        }
    }

    /// Pure end-condition check.
    #[must_use]
    pub fn should_scenario_end(&self, now: SimTimestamp) -> Option<EndReason> {
        let elapsed = now.minutes();
        let current = self.state.current_state();
        if elapsed >= self.config.time_limit_minutes {
            Some(EndReason::TimeLimit)
        } else if current == PatientState::Critical {
            Some(EndReason::PatientCritical)
        } else if current.is_recovering() && elapsed >= self.config.stabilization_minutes {
            Some(EndReason::PatientStabilized)
        } else {
            None
        }
    }

    /// Finish the scenario and compile its report. Runs the end-of-scenario
    /// omission checks and ends the scenario if it is still running.
    pub fn generate_performance_report(&mut self, now: SimTimestamp) -> AarReport {
        if self.is_running() {
            self.advance(now);
            let reason = self.should_scenario_end(now).unwrap_or(EndReason::Completed);
            self.end(reason);
        }
        let final_state = self.state.current_state();
        self.performance.finalize(final_state, now);
        let end_reason = match self.status {
            EngineStatus::Ended { reason } => Some(reason),
            EngineStatus::NotStarted | EngineStatus::Running => None,
        };
        self.performance
            .generate_aar_report(&self.state, end_reason, now, Utc::now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CompetenceLevel, Route};

    fn blueprint() -> Arc<ScenarioBlueprint> {
        Arc::new(
            ScenarioBlueprint::from_json_str(
                r#"{
                    "scenario_id": "ANAPHYLAXIS_001",
                    "metadata": { "title": "Bee sting at the park" },
                    "patient_profile": {
                        "name": "Mia", "age": 24, "allergies": ["bee venom", "penicillin"]
                    },
                    "scene_description": "Park bench, summer afternoon",
                    "initial_vitals": {
                        "HR": 125, "RR": 28, "SpO2": 91, "BP_systolic": 88, "BP_diastolic": 50
                    },
                    "simulation_config": { "deterioration_timing_minutes": [5, 10, 15] },
                    "scenario_states": {
                        "initial": { "appearance": "Flushed, anxious", "urgency_level": "high" },
                        "deteriorating": { "appearance": "Stridor", "urgency_level": "critical" },
                        "critical": {
                            "appearance": "Grey, barely responsive", "urgency_level": "critical"
                        }
                    },
                    "assessment_findings": {
                        "lung_sounds": {
                            "text": "Bilateral wheeze", "by_state": { "critical": "Silent chest" }
                        }
                    },
                    "critical_actions_checklist": [
                        { "id": "CA1", "action": "Give IM adrenaline", "importance": "critical" }
                    ],
                    "medications_available": {
                        "Adrenaline": { "dose_adult": "0.5 mg", "route": "IM", "onset_minutes": 2,
                                        "vital_effects": { "BP_systolic": "+20", "SpO2": "+4" },
                                        "critical": true, "state_change": "improving" },
                        "Aspirin": {
                            "dose_adult": "300 mg",
                            "contraindications_absolute": ["systolic_bp_below_90"]
                        }
                    }
                }"#,
            )
            .expect("valid"),
        )
    }

    fn running() -> ScenarioEngine {
        let mut engine = ScenarioEngine::new(blueprint(), EngineConfig::default());
        assert!(engine.start());
        engine
    }

    #[test]
    fn actions_before_start_are_rejected() {
        let mut engine = ScenarioEngine::new(blueprint(), EngineConfig::default());
        let hello = Action::communication("hello");
        let result = engine.process_student_action(&hello, SimTimestamp::START);
        assert!(!result.success);
        assert_eq!(result.error.map(|e| e.code), Some(ActionErrorCode::ScenarioNotRunning));
        assert!(engine.performance().timeline().is_empty());
    }

    #[test]
    fn treatment_effect_shows_after_onset() {
        let mut engine = running();
        let result = engine.process_student_action(
            &Action::treatment("adrenaline", Some("0.5 mg")).with_route(Route::Intramuscular),
            SimTimestamp::from_minutes(1.0),
        );
        assert!(result.success);
        assert!(matches!(result.results, ActionOutcome::Treatment(ref e) if e.critical));
        assert_eq!(result.progress_data.current_state, PatientState::Initial);

        engine.update_patient_state(SimTimestamp::from_minutes(3.0));
        assert_eq!(engine.state_tracker().current_state(), PatientState::Improving);
        assert_eq!(engine.state_tracker().current_vitals().bp_systolic, Some(108.0));

        // Critical treatment halts deterioration.
        engine.update_patient_state(SimTimestamp::from_minutes(16.0));
        assert_eq!(engine.state_tracker().current_state(), PatientState::Improving);
    }

    #[test]
    fn unknown_medication_is_a_failed_result() {
        let mut engine = running();
        let morphine = Action::treatment("Morphine", None);
        let result = engine.process_student_action(&morphine, SimTimestamp::from_secs(30));
        assert!(!result.success);
        let error = result.error.expect("error");
        assert_eq!(error.code, ActionErrorCode::UnknownMedication);
        assert_eq!(error.severity, ActionSeverity::Error);
        assert!(engine.is_running());
    }

    #[test]
    fn contraindication_warns_but_applies() {
        let mut engine = running();
        let aspirin = Action::treatment("Aspirin", None);
        let result = engine.process_student_action(&aspirin, SimTimestamp::from_secs(30));
        assert!(!result.success);
        let error = result.error.expect("warning");
        assert_eq!(error.code, ActionErrorCode::Contraindicated);
        assert_eq!(error.severity, ActionSeverity::Warning);
        assert!(matches!(result.results, ActionOutcome::Treatment(_)));
        assert_eq!(engine.state_tracker().treatments().len(), 1);
    }

    #[test]
    fn missing_and_unknown_types() {
        let mut engine = running();
        let missing = Action {
            name: "something".into(),
            ..Action::default()
        };
        let result = engine.process_student_action(&missing, SimTimestamp::from_secs(5));
        assert_eq!(result.error.map(|e| e.code), Some(ActionErrorCode::MissingActionType));
        let other = Action {
            action_type: Some(ActionType::Other("dance".into())),
            ..Action::default()
        };
        let result = engine.process_student_action(&other, SimTimestamp::from_secs(6));
        assert_eq!(result.error.map(|e| e.code), Some(ActionErrorCode::UnknownActionType));
    }

    #[test]
    fn assessment_reveals_state_dependent_finding() {
        let mut engine = running();
        let result = engine.process_student_action(
            &Action::assessment("listen to chest", Some("lung_sounds"), true),
            SimTimestamp::from_secs(20),
        );
        match result.results {
            ActionOutcome::Assessment { finding, vitals } => {
                assert_eq!(finding.as_deref(), Some("Bilateral wheeze"));
                assert_eq!(vitals.and_then(|v| v.heart_rate).as_deref(), Some("125 bpm"));
            }
            other => panic!("unexpected outcome {other:?}"),
        }

        engine.update_patient_state(SimTimestamp::from_minutes(16.0));
        let ctx = engine.runtime_context(SimTimestamp::from_minutes(16.0));
        assert_eq!(ctx.current_state, PatientState::Critical);
        assert_eq!(ctx.discoverable_findings["lung_sounds"], "Silent chest");
        assert_eq!(ctx.scene.appearance.as_deref(), Some("Grey, barely responsive"));
        assert!(ctx.teaching_context.urgency_note.is_some());
        assert!(ctx.teaching_context.critical_note.is_some());
    }

    #[test]
    fn runtime_context_is_condensed() {
        let engine = running();
        let ctx = engine.runtime_context(SimTimestamp::from_secs(90));
        assert_eq!(ctx.patient.name, "Mia");
        assert_eq!(ctx.elapsed_formatted, "01:30");
        assert_eq!(ctx.available_treatments.len(), 2);
        assert!(ctx.teaching_context.urgency_note.is_none());
        assert_eq!(ctx.scene.urgency_level, Some(UrgencyLevel::High));
    }

    #[test]
    fn critical_note_follows_state_urgency() {
        let mut engine = running();
        let early = engine.runtime_context(SimTimestamp::from_minutes(1.0));
        assert!(early.teaching_context.critical_note.is_none());

        let now = SimTimestamp::from_minutes(11.0);
        engine.update_patient_state(now);
        let ctx = engine.runtime_context(now);
        assert_eq!(ctx.current_state, PatientState::Deteriorating);
        assert!(ctx.teaching_context.critical_note.is_some());
    }

    #[test]
    fn progress_reports_pending_end() {
        let mut engine = running();
        let now = SimTimestamp::from_minutes(16.0);
        let result = engine.process_student_action(&Action::communication("hello"), now);
        assert_eq!(result.progress_data.should_end, Some(EndReason::PatientCritical));
        assert!(engine.is_running());

        engine.end(EndReason::PatientCritical);
        assert_eq!(engine.progress(now).should_end, None);
    }

    #[test]
    fn end_conditions() {
        let mut engine = running();
        assert_eq!(engine.should_scenario_end(SimTimestamp::from_minutes(4.0)), None);
        assert_eq!(
            engine.should_scenario_end(SimTimestamp::from_minutes(20.0)),
            Some(EndReason::TimeLimit)
        );
        engine.update_patient_state(SimTimestamp::from_minutes(15.5));
        assert_eq!(
            engine.should_scenario_end(SimTimestamp::from_minutes(15.5)),
            Some(EndReason::PatientCritical)
        );

        let mut treated = running();
        let adrenaline = Action::treatment("Adrenaline", None);
        treated.process_student_action(&adrenaline, SimTimestamp::from_minutes(1.0));
        treated.update_patient_state(SimTimestamp::from_minutes(4.0));
        assert_eq!(treated.should_scenario_end(SimTimestamp::from_minutes(8.0)), None);
        assert_eq!(
            treated.should_scenario_end(SimTimestamp::from_minutes(12.0)),
            Some(EndReason::PatientStabilized)
        );
    }

    #[test]
    fn report_ends_the_scenario() {
        let mut engine = running();
        engine.process_student_action(
            &Action::treatment("Adrenaline", Some("0.5 mg")).with_id("CA1"),
            SimTimestamp::from_minutes(1.0),
        );
        let report = engine.generate_performance_report(SimTimestamp::from_minutes(6.0));
        assert_eq!(engine.status(), EngineStatus::Ended { reason: EndReason::Completed });
        assert_eq!(report.end_reason, Some(EndReason::Completed));
        assert_eq!(report.competence_assessment.overall, CompetenceLevel::Exemplary);
        assert_eq!(report.scenario_title.as_deref(), Some("Bee sting at the park"));

        let hello = Action::communication("hello");
        let late = engine.process_student_action(&hello, SimTimestamp::from_minutes(7.0));
        assert_eq!(late.error.map(|e| e.code), Some(ActionErrorCode::ScenarioNotRunning));
    }
}
