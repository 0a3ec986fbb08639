//! Safety gate: silent detection of patient-harming failures.
//!
//! Three failure classes are watched:
//!   - Commission: a dangerous drug, route or volume, detected when the
//!     medication is recorded
//!   - Contraindication: a drug matching a patient allergy, detected when
//!     the medication is recorded
//!   - Omission: a life-saving action never happened, detected only at the
//!     end of the scenario and only if the failure's state requirement holds
//!
//! Nothing here is ever surfaced to the trainee during the scenario. Each
//! failure id is logged at most once.

use crate::blueprint::{
    DetectionRule, FailureDefinition, FailureType, ScenarioBlueprint, StateRequirement,
};
use crate::types::{PatientState, Route, SimTimestamp, round_minutes};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Diagnosis qualifiers that say nothing about the condition itself.
const CONDITION_QUALIFIERS: &[&str] =
    &["life", "threatening", "severe", "suspected", "acute", "confirmed"];

/// What triggered a failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureContext {
    /// A recorded medication.
    Medication {
        /// Medication as named by the trainee.
        medication: String,
        /// Route given.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        route: Option<Route>,
        /// Volume of this administration.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        volume_ml: Option<f64>,
        /// Cumulative volume of matching fluids.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        total_volume_ml: Option<f64>,
    },
    /// A medication matched a patient allergy.
    Allergy {
        /// Medication as named by the trainee.
        medication: String,
        /// The matching allergy.
        allergy: String,
    },
    /// End-of-scenario omission check.
    ScenarioEnd {
        /// State the patient ended in.
        final_state: PatientState,
    },
}

/// A logged failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SafetyFailure {
    /// Failure id from the blueprint.
    pub id: String,
    /// Failure class.
    #[serde(rename = "type")]
    pub failure_type: FailureType,
    /// What went wrong.
    pub description: String,
    /// What happened to the patient.
    pub patient_outcome: String,
    /// Debrief lesson.
    pub teaching_point: String,
    /// When it was detected.
    pub timestamp: SimTimestamp,
    /// Minutes into the scenario.
    pub timestamp_minutes: f64,
    /// Trigger details.
    pub context: FailureContext,
}

/// Safety-gate outcome for the report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SafetyGateSummary {
    /// Whether the gate was active.
    pub enabled: bool,
    /// `true` when no failure was logged.
    pub passed: bool,
    /// Number of failures.
    pub failure_count: usize,
    /// Failures in debrief order: omission, commission, contraindication.
    pub failures: Vec<SafetyFailure>,
}

#[derive(Debug, Clone)]
struct ActionEntry {
    id: Option<String>,
    name: String,
}

#[derive(Debug, Clone)]
struct MedicationEntry {
    name: String,
    volume_ml: Option<f64>,
}

/// Watches actions and medications for the blueprint's failure definitions.
#[derive(Debug, Clone)]
pub struct SafetyGateMonitor {
    enabled: bool,
    scenario_id: String,
    scenario_type: Option<String>,
    diagnosis: Option<String>,
    allergies: Vec<String>,
    initial_respiratory_rate: Option<f32>,
    definitions: Vec<FailureDefinition>,
    actions: Vec<ActionEntry>,
    medications: Vec<MedicationEntry>,
    failures: Vec<SafetyFailure>,
}

impl SafetyGateMonitor {
    /// Build from a blueprint. A missing or disabled `safety_gate` section
    /// yields a monitor that never logs anything and always passes.
    #[must_use]
    pub fn new(blueprint: &ScenarioBlueprint) -> Self {
        let gate = blueprint.safety_gate.as_ref().filter(|g| g.enabled);
        if let Some(gate) = gate {
            if gate.tracking_mode != "silent" {
                warn!(
                    scenario_id = %blueprint.scenario_id,
                    tracking_mode = %gate.tracking_mode,
                    "Unsupported safety tracking mode, tracking silently"
                );
            }
            debug!(
                scenario_id = %blueprint.scenario_id,
                definitions = gate.critical_failures.len(),
                "Safety gate armed"
            );
        }
        let profile = &blueprint.patient_profile;
        Self {
            enabled: gate.is_some(),
            scenario_id: blueprint.scenario_id.clone(),
            scenario_type: blueprint.metadata.scenario_type.clone(),
            diagnosis: profile.diagnosis.clone(),
            allergies: profile
                .allergies
                .iter()
                .map(|a| a.trim().to_lowercase())
                .filter(|a| !a.is_empty())
                .collect(),
            initial_respiratory_rate: blueprint.initial_vitals.respiratory_rate,
            definitions: gate.map(|g| g.critical_failures.clone()).unwrap_or_default(),
            actions: Vec::new(),
            medications: Vec::new(),
            failures: Vec::new(),
        }
    }

    /// Whether the gate is active.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Remember an action for end-of-scenario omission checks.
    pub fn record_action(&mut self, action_id: Option<&str>, name: &str) {
        if !self.enabled {
            return;
        }
        self.actions.push(ActionEntry {
            id: action_id.map(str::to_string),
            name: name.to_lowercase(),
        });
    }

    /// Record a medication and check it immediately for commission and
    /// contraindication failures. Returns how many new failures were logged.
    pub fn record_medication(
        &mut self,
        name: &str,
        route: Option<&Route>,
        volume_ml: Option<f64>,
        now: SimTimestamp,
    ) -> usize {
        if !self.enabled {
            return 0;
        }
        let lower = name.trim().to_lowercase();
        self.medications.push(MedicationEntry {
            name: lower.clone(),
            volume_ml,
        });

        let mut triggered = Vec::new();
        for definition in &self.definitions {
            let context = match &definition.detection_criteria.rule {
                DetectionRule::RouteMismatch {
                    medications,
                    forbidden_route,
                } => (mentions_any(&lower, medications) && route == Some(forbidden_route)).then(|| {
                    FailureContext::Medication {
                        medication: name.to_string(),
                        route: route.cloned(),
                        volume_ml,
                        total_volume_ml: None,
                    }
                }),
                DetectionRule::DrugBlacklist { medications } => {
                    mentions_any(&lower, medications).then(|| FailureContext::Medication {
                        medication: name.to_string(),
                        route: route.cloned(),
                        volume_ml,
                        total_volume_ml: None,
                    })
                }
                DetectionRule::VolumeThreshold { fluids, max_total_ml } => {
                    if mentions_any(&lower, fluids) {
                        let total = self.total_volume(fluids);
                        (total > *max_total_ml).then(|| FailureContext::Medication {
                            medication: name.to_string(),
                            route: route.cloned(),
                            volume_ml,
                            total_volume_ml: Some(total),
                        })
                    } else {
                        None
                    }
                }
                DetectionRule::AllergyMatch => self
                    .allergies
                    .iter()
                    .find(|allergy| {
                        lower.contains(allergy.as_str()) || allergy.contains(lower.as_str())
                    })
                    .map(|allergy| FailureContext::Allergy {
                        medication: name.to_string(),
                        allergy: allergy.clone(),
                    }),
                DetectionRule::MissingMedication { .. }
                | DetectionRule::MissingAction { .. }
                | DetectionRule::Inert { .. } => None,
            };
            if let Some(context) = context {
                triggered.push((definition.clone(), context));
            }
        }

        triggered
            .into_iter()
            .filter(|(definition, context)| self.log_failure(definition, context.clone(), now))
            .count()
    }

    /// Check every omission rule once the scenario is over. Returns how many
    /// new failures were logged.
    pub fn check_end_of_scenario_omissions(
        &mut self,
        final_state: PatientState,
        now: SimTimestamp,
    ) -> usize {
        if !self.enabled {
            return 0;
        }
        let omitted: Vec<FailureDefinition> = self
            .definitions
            .iter()
            .filter(|definition| {
                let criteria = &definition.detection_criteria;
                let missing = match &criteria.rule {
                    DetectionRule::MissingMedication { medications } => !self
                        .medications
                        .iter()
                        .any(|m| mentions_any(&m.name, medications)),
                    DetectionRule::MissingAction {
                        action_ids,
                        keywords,
                        min_count,
                    } => self.count_matching_actions(action_ids, keywords) < *min_count,
                    _ => false,
                };
                missing
                    && criteria
                        .patient_state_required
                        .as_ref()
                        .is_none_or(|req| self.requirement_holds(req))
            })
            .cloned()
            .collect();

        let context = FailureContext::ScenarioEnd { final_state };
        omitted
            .iter()
            .filter(|definition| self.log_failure(definition, context.clone(), now))
            .count()
    }

    fn total_volume(&self, fluids: &[String]) -> f64 {
        self.medications
            .iter()
            .filter(|m| mentions_any(&m.name, fluids))
            .filter_map(|m| m.volume_ml)
            .sum()
    }

    fn count_matching_actions(&self, action_ids: &[String], keywords: &[String]) -> usize {
        self.actions
            .iter()
            .filter(|a| {
                a.id.as_ref().is_some_and(|id| action_ids.contains(id))
                    || mentions_any(&a.name, keywords)
            })
            .count()
    }

    fn requirement_holds(&self, requirement: &StateRequirement) -> bool {
        match requirement {
            StateRequirement::Confirmed(condition) => {
                let condition = condition.to_lowercase();
                let mut segments: Vec<&str> = condition
                    .split('_')
                    .filter(|s| s.len() >= 4 && !CONDITION_QUALIFIERS.contains(s))
                    .collect();
                if segments.is_empty() {
                    segments.push(condition.as_str());
                }
                let haystacks = [
                    Some(self.scenario_id.to_lowercase()),
                    self.diagnosis.as_deref().map(str::to_lowercase),
                    self.scenario_type.as_deref().map(str::to_lowercase),
                ];
                haystacks
                    .iter()
                    .flatten()
                    .any(|h| segments.iter().any(|s| h.contains(s)))
            }
            StateRequirement::RespiratoryRateBelow(threshold) => {
                self.initial_respiratory_rate.is_some_and(|rr| rr < *threshold)
            }
            StateRequirement::Unrecognized(text) => {
                debug!(requirement = %text, "Unrecognised state requirement treated as satisfied");
                true
            }
        }
    }

    /// Append a failure unless its id was already logged.
    fn log_failure(
        &mut self,
        definition: &FailureDefinition,
        context: FailureContext,
        now: SimTimestamp,
    ) -> bool {
        if self.failures.iter().any(|f| f.id == definition.id) {
            debug!(failure_id = %definition.id, "Safety failure already logged");
            return false;
        }
        warn!(
            scenario_id = %self.scenario_id,
            failure_id = %definition.id,
            failure_type = %definition.failure_type,
            elapsed_min = round_minutes(now.minutes()),
            "Safety gate failure"
        );
        self.failures.push(SafetyFailure {
            id: definition.id.clone(),
            failure_type: definition.failure_type,
            description: definition.description.clone(),
            patient_outcome: definition.patient_outcome.clone(),
            teaching_point: definition.teaching_point.clone(),
            timestamp: now,
            timestamp_minutes: round_minutes(now.minutes()),
            context,
        });
        true
    }

    /// Whether no failure was logged.
    #[must_use]
    pub fn passed(&self) -> bool {
        self.failures.is_empty()
    }

    /// Failures in detection order.
    #[must_use]
    pub fn failures(&self) -> &[SafetyFailure] {
        &self.failures
    }

    /// Failures in debrief order (omission, commission, contraindication),
    /// detection order within a class.
    #[must_use]
    pub fn failures_for_aar(&self) -> Vec<SafetyFailure> {
        let mut ordered = self.failures.clone();
        ordered.sort_by_key(|f| f.failure_type.debrief_rank());
        ordered
    }

    /// Summary for the report.
    #[must_use]
    pub fn summary(&self) -> SafetyGateSummary {
        let summary = SafetyGateSummary {
            enabled: self.enabled,
            passed: self.passed(),
            failure_count: self.failures.len(),
            failures: self.failures_for_aar(),
        };
        if self.enabled {
            info!(
                scenario_id = %self.scenario_id,
                passed = summary.passed,
                failures = summary.failure_count,
                "Safety gate summary"
            );
        }
        summary
    }
}

/// Whether `name` contains any of the lower-cased `fragments`.
fn mentions_any(name: &str, fragments: &[String]) -> bool {
    fragments.iter().any(|f| !f.is_empty() && name.contains(f.as_str()))
}
