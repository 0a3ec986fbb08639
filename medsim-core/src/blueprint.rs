//! Scenario blueprints: the static, author-provided definition of one
//! training scenario.
//!
//! A blueprint is loaded once per scenario id (JSON or TOML) and never
//! mutated afterwards. Every runtime component borrows the pieces it needs:
//!
//! - [`crate::state::StateTracker`]: initial vitals, deterioration timing,
//!   no-treatment progression
//! - [`crate::treatment::TreatmentEngine`]: medication table
//! - [`crate::performance::PerformanceTracker`]: critical-actions checklist
//! - [`crate::milestone::MilestoneTracker`]: milestone mappings
//! - [`crate::safety::SafetyGateMonitor`]: failure definitions
//!
//! Validation is limited to presence checks; anything structurally odd that
//! can be tolerated is logged and ignored at runtime instead.

use crate::error::{MedsimError, Result};
use crate::types::{CompetenceLevel, PatientState, Route, VitalChanges, Vitals, leading_number};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use tracing::{debug, warn};

// ---------------------------------------------------------------------------
// Blueprint root
// ---------------------------------------------------------------------------

/// A complete scenario definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioBlueprint {
    /// Unique scenario id, e.g. `"ASTHMA_MVP_001"`.
    pub scenario_id: String,
    /// Descriptive metadata.
    #[serde(default)]
    pub metadata: ScenarioMetadata,
    /// Who the patient is.
    pub patient_profile: PatientProfile,
    /// Where the scenario takes place.
    #[serde(default)]
    pub scene_description: String,
    /// Vitals at scenario start.
    pub initial_vitals: Vitals,
    /// Timing parameters.
    #[serde(default)]
    pub simulation_config: SimulationConfig,
    /// Per-state presentation (appearance, clinical note, urgency).
    #[serde(default)]
    pub scenario_states: BTreeMap<PatientState, StateDescription>,
    /// Actions the trainee is expected to perform.
    #[serde(default)]
    pub critical_actions_checklist: Vec<ChecklistItem>,
    /// Debrief text per checklist id and competence level.
    #[serde(default)]
    pub consequence_feedback_templates: BTreeMap<String, FeedbackTemplates>,
    /// Universal progress milestones.
    #[serde(default)]
    pub progress_milestones: Option<MilestoneConfig>,
    /// Patient-harm failure definitions.
    #[serde(default)]
    pub safety_gate: Option<SafetyGateConfig>,
    /// Medications the trainee may give, keyed by name.
    #[serde(default)]
    pub medications_available: BTreeMap<String, Medication>,
    /// Untreated vitals drift, keyed `"<n>min"`.
    #[serde(default)]
    pub no_treatment_progression: NoTreatmentProgression,
    /// Findings revealed by assessments, keyed by assessment type.
    #[serde(default)]
    pub assessment_findings: BTreeMap<String, Finding>,
}

impl ScenarioBlueprint {
    /// Parse a blueprint from JSON.
    ///
    /// # Errors
    /// Returns `MedsimError::BlueprintParse` for malformed JSON and
    /// `MedsimError::InvalidBlueprint` when a required section is missing.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let blueprint: Self = serde_json::from_str(json).map_err(|e| MedsimError::BlueprintParse {
            format: "json",
            message: e.to_string(),
        })?;
        blueprint.validate()?;
        Ok(blueprint)
    }

    /// Parse a blueprint from TOML.
    ///
    /// # Errors
    /// Returns `MedsimError::BlueprintParse` for malformed TOML and
    /// `MedsimError::InvalidBlueprint` when a required section is missing.
    pub fn from_toml_str(toml_str: &str) -> Result<Self> {
        let blueprint: Self = toml::from_str(toml_str).map_err(|e| MedsimError::BlueprintParse {
            format: "toml",
            message: e.to_string(),
        })?;
        blueprint.validate()?;
        Ok(blueprint)
    }

    /// Load a blueprint from disk, choosing the parser by file extension.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read, has an unknown extension,
    /// or fails to parse.
    pub fn from_file(path: &Path) -> Result<Self> {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();
        let content = std::fs::read_to_string(path)?;
        let blueprint = match extension.as_str() {
            "json" => Self::from_json_str(&content)?,
            "toml" => Self::from_toml_str(&content)?,
            other => return Err(MedsimError::UnsupportedFormat(other.to_string())),
        };
        debug!(path = %path.display(), scenario_id = %blueprint.scenario_id, "Loaded blueprint");
        Ok(blueprint)
    }

    /// Presence checks on required sections.
    fn validate(&self) -> Result<()> {
        let invalid = |reason: &str| MedsimError::InvalidBlueprint {
            scenario_id: self.scenario_id.clone(),
            reason: reason.to_string(),
        };

        if self.scenario_id.trim().is_empty() {
            return Err(invalid("scenario_id is empty"));
        }
        if self.initial_vitals.is_empty() {
            return Err(invalid("initial_vitals has no values"));
        }
        if self.critical_actions_checklist.iter().any(|item| item.id.trim().is_empty()) {
            return Err(invalid("checklist item without an id"));
        }
        for (name, medication) in &self.medications_available {
            if let Some(state) = medication.state_change {
                if !state.is_recovering() {
                    return Err(invalid(&format!(
                        "medication '{name}' has state_change '{state}' \
                         (expected improving or stable)"
                    )));
                }
            }
        }
        Ok(())
    }

    /// Look up a medication by name: exact key first, then case-insensitive.
    #[must_use]
    pub fn medication(&self, name: &str) -> Option<(&str, &Medication)> {
        if let Some((key, med)) = self.medications_available.get_key_value(name) {
            return Some((key.as_str(), med));
        }
        let wanted = name.trim().to_lowercase();
        self.medications_available
            .iter()
            .find(|(key, _)| key.to_lowercase() == wanted)
            .map(|(key, med)| (key.as_str(), med))
    }

    /// Look up a checklist item by id.
    #[must_use]
    pub fn checklist_item(&self, id: &str) -> Option<&ChecklistItem> {
        self.critical_actions_checklist.iter().find(|item| item.id == id)
    }

    /// Presentation for a patient state, if the blueprint describes it.
    #[must_use]
    pub fn state_description(&self, state: PatientState) -> Option<&StateDescription> {
        self.scenario_states.get(&state)
    }

    /// Debrief template for a checklist item at a competence level,
    /// falling back to the `developing` template.
    #[must_use]
    pub fn feedback_template(
        &self,
        item_id: &str,
        level: CompetenceLevel,
    ) -> Option<&FeedbackTemplate> {
        let templates = self.consequence_feedback_templates.get(item_id)?;
        templates
            .get(&level)
            .or_else(|| templates.get(&CompetenceLevel::Developing))
    }
}

// ---------------------------------------------------------------------------
// Metadata, profile, scene
// ---------------------------------------------------------------------------

/// Descriptive scenario metadata.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScenarioMetadata {
    /// Human-readable title.
    #[serde(default)]
    pub title: Option<String>,
    /// Clinical category, e.g. "respiratory".
    #[serde(default)]
    pub scenario_type: Option<String>,
    /// Difficulty label.
    #[serde(default)]
    pub difficulty: Option<String>,
    /// Free-text description.
    #[serde(default)]
    pub description: Option<String>,
}

/// The simulated patient.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PatientProfile {
    /// Patient name.
    pub name: String,
    /// Age in years.
    #[serde(default)]
    pub age: Option<u32>,
    /// How the patient talks and behaves.
    #[serde(default)]
    pub personality: Option<String>,
    /// Presenting complaint.
    #[serde(default)]
    pub chief_complaint: Option<String>,
    /// Known allergies (free text, matched by substring).
    #[serde(default)]
    pub allergies: Vec<String>,
    /// Working diagnosis, used by state-requirement predicates.
    #[serde(default)]
    pub diagnosis: Option<String>,
    /// Whether the patient is actively bleeding.
    #[serde(default)]
    pub active_bleeding: bool,
}

/// Timing parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// Minutes at which untreated deterioration reaches early-deteriorating,
    /// deteriorating and critical.
    #[serde(default = "default_deterioration_timing")]
    pub deterioration_timing_minutes: [f64; 3],
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            deterioration_timing_minutes: default_deterioration_timing(),
        }
    }
}

fn default_deterioration_timing() -> [f64; 3] {
    [5.0, 9.0, 13.0]
}

/// How urgent a patient state looks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UrgencyLevel {
    /// Routine.
    Low,
    /// Needs attention soon.
    Moderate,
    /// Needs attention now.
    High,
    /// Life-threatening.
    Critical,
}

/// Presentation of one patient state.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StateDescription {
    /// What the patient looks like.
    #[serde(default)]
    pub appearance: Option<String>,
    /// Note for the dialogue consumer.
    #[serde(default)]
    pub clinical_note: Option<String>,
    /// Urgency of this state.
    #[serde(default)]
    pub urgency_level: Option<UrgencyLevel>,
}

/// A finding revealed by an assessment: plain text, or text that depends on
/// the patient's current state.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Finding {
    /// Same text in every state.
    Text(String),
    /// Default text plus per-state overrides.
    ByState {
        /// Fallback text.
        text: String,
        /// Overrides keyed by state.
        #[serde(default)]
        by_state: BTreeMap<PatientState, String>,
    },
}

impl Finding {
    /// The text revealed while the patient is in `state`.
    #[must_use]
    pub fn text_for(&self, state: PatientState) -> &str {
        match self {
            Self::Text(text) => text,
            Self::ByState { text, by_state } => by_state.get(&state).unwrap_or(text),
        }
    }
}

// ---------------------------------------------------------------------------
// Checklist
// ---------------------------------------------------------------------------

/// How important a checklist item is.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Importance {
    /// Life-saving.
    Critical,
    /// Expected of a competent clinician.
    Essential,
    /// Good practice.
    #[default]
    Standard,
}

impl From<String> for Importance {
    fn from(s: String) -> Self {
        match s.trim().to_lowercase().as_str() {
            "critical" => Self::Critical,
            "essential" | "high" | "important" => Self::Essential,
            _ => Self::Standard,
        }
    }
}

impl From<Importance> for String {
    fn from(importance: Importance) -> Self {
        importance.to_string()
    }
}

impl fmt::Display for Importance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Critical => "critical",
            Self::Essential => "essential",
            Self::Standard => "standard",
        })
    }
}

/// One expected trainee action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChecklistItem {
    /// Item id, e.g. `"CA1"`.
    pub id: String,
    /// Free-text description of the action.
    pub action: String,
    /// Importance tag.
    #[serde(default)]
    pub importance: Importance,
    /// Grouping for debrief (e.g. "assessment", "treatment").
    #[serde(default)]
    pub category: Option<String>,
    /// Clinical evidence behind the item.
    #[serde(default)]
    pub clinical_anchor: Option<String>,
    /// Why it matters.
    #[serde(default)]
    pub rationale: Option<String>,
    /// Explicit keyword matching configuration.
    #[serde(default)]
    pub matching: Option<MatchingConfig>,
    /// Outcome-based criteria keyed by level. Empty means the built-in rules.
    #[serde(default)]
    pub competence_criteria: BTreeMap<CompetenceLevel, CompetenceCriteria>,
}

/// Explicit keyword configuration for fuzzy checklist matching.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MatchingConfig {
    /// Primary keywords.
    #[serde(default)]
    pub keywords: Vec<String>,
    /// Alternative phrasings.
    #[serde(default)]
    pub synonyms: Vec<String>,
    /// Equipment/tool names that imply the action.
    #[serde(default)]
    pub tool_mappings: Vec<String>,
    /// Phrases that veto a match (negations). `None` uses the built-in list.
    #[serde(default)]
    pub exclusion_keywords: Option<Vec<String>>,
}

/// Allowed patient states before and after an action for one competence level.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompetenceCriteria {
    /// States allowed when the action happened (empty = any).
    #[serde(default)]
    pub patient_state_at_action: Vec<PatientState>,
    /// States allowed after the assessment window (empty = any).
    #[serde(default)]
    pub patient_state_after: Vec<PatientState>,
}

impl CompetenceCriteria {
    /// Whether both sampled states are allowed.
    #[must_use]
    pub fn matches(&self, at_action: PatientState, after: PatientState) -> bool {
        let allowed = |list: &[PatientState], state| list.is_empty() || list.contains(&state);
        allowed(&self.patient_state_at_action, at_action)
            && allowed(&self.patient_state_after, after)
    }
}

/// Templates for one checklist item, keyed by competence level.
pub type FeedbackTemplates = BTreeMap<CompetenceLevel, FeedbackTemplate>;

/// Debrief text for one checklist item at one competence level.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedbackTemplate {
    /// What happened to the patient as a consequence.
    #[serde(default)]
    pub consequence_text: String,
    /// Supporting clinical evidence.
    #[serde(default)]
    pub clinical_anchor: String,
    /// Lesson to draw.
    #[serde(default)]
    pub teaching_point: String,
}

// ---------------------------------------------------------------------------
// Milestones
// ---------------------------------------------------------------------------

/// Progress milestone section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MilestoneConfig {
    /// Whether milestone tracking is active.
    #[serde(default)]
    pub enabled: bool,
    /// Name/description overrides keyed by milestone id.
    #[serde(default)]
    pub milestone_definitions: BTreeMap<String, MilestoneDefinition>,
    /// Which checklist/action ids complete each milestone.
    #[serde(default)]
    pub milestone_mappings: BTreeMap<String, MilestoneMapping>,
}

/// Display text of one milestone.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MilestoneDefinition {
    /// Short name.
    pub name: String,
    /// Longer description.
    #[serde(default)]
    pub description: String,
}

/// Action ids that complete a milestone.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MilestoneMapping {
    /// Triggering action ids.
    #[serde(default)]
    pub trigger_actions: Vec<String>,
}

// ---------------------------------------------------------------------------
// Safety gate
// ---------------------------------------------------------------------------

/// Safety gate section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SafetyGateConfig {
    /// Whether failures are tracked at all.
    #[serde(default)]
    pub enabled: bool,
    /// Tracking mode label. Only `silent` exists; anything else is logged.
    #[serde(default = "default_tracking_mode")]
    pub tracking_mode: String,
    /// Failure definitions, in authoring order.
    #[serde(default)]
    pub critical_failures: Vec<FailureDefinition>,
}

fn default_tracking_mode() -> String {
    "silent".to_string()
}

/// The three classes of patient-harming failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureType {
    /// A life-saving action never happened.
    Omission,
    /// A dangerous action happened.
    Commission,
    /// A drug the patient is allergic to was given.
    Contraindication,
}

impl FailureType {
    /// Debrief ordering: omission first, contraindication last.
    #[must_use]
    pub fn debrief_rank(self) -> u8 {
        match self {
            Self::Omission => 1,
            Self::Commission => 2,
            Self::Contraindication => 3,
        }
    }
}

impl fmt::Display for FailureType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Omission => "omission",
            Self::Commission => "commission",
            Self::Contraindication => "contraindication",
        })
    }
}

/// A patient-harm failure the safety gate watches for.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "RawFailureDefinition")]
pub struct FailureDefinition {
    /// Failure id, e.g. `"SF1"`.
    pub id: String,
    /// Failure class.
    #[serde(rename = "type")]
    pub failure_type: FailureType,
    /// What went wrong.
    pub description: String,
    /// What happens to the patient.
    pub patient_outcome: String,
    /// Debrief lesson.
    pub teaching_point: String,
    /// How the failure is detected.
    pub detection_criteria: DetectionCriteria,
}

/// Detection rule plus an optional state-requirement predicate.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetectionCriteria {
    /// The rule to evaluate.
    #[serde(flatten)]
    pub rule: DetectionRule,
    /// Extra predicate gating omission failures.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub patient_state_required: Option<StateRequirement>,
}

/// Structured detection rules, one per detection pattern.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum DetectionRule {
    /// One of `medications` given by `forbidden_route`.
    RouteMismatch {
        /// Medication name fragments.
        medications: Vec<String>,
        /// Route that is dangerous for them.
        forbidden_route: Route,
    },
    /// Any of `medications` given at all.
    DrugBlacklist {
        /// Medication name fragments.
        medications: Vec<String>,
    },
    /// Cumulative volume of `fluids` exceeds `max_total_ml`.
    VolumeThreshold {
        /// Fluid name fragments.
        fluids: Vec<String>,
        /// Volume limit in millilitres.
        max_total_ml: f64,
    },
    /// A medication matches a patient allergy.
    AllergyMatch,
    /// None of `medications` was given by scenario end.
    MissingMedication {
        /// Medication name fragments.
        medications: Vec<String>,
    },
    /// Fewer than `min_count` matching actions by scenario end.
    MissingAction {
        /// Exact action ids that count.
        action_ids: Vec<String>,
        /// Name fragments that count.
        keywords: Vec<String>,
        /// How many matching actions are required.
        min_count: usize,
    },
    /// Criteria that could not be interpreted; never fires.
    Inert {
        /// The original text.
        condition: String,
    },
}

/// Predicate on the scenario/patient that gates an omission failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum StateRequirement {
    /// `<condition>_confirmed`: the scenario is about `condition`.
    Confirmed(String),
    /// `respiratory_rate_less_than_<n>`: initial RR below `n`.
    RespiratoryRateBelow(f32),
    /// Anything else; always satisfied.
    Unrecognized(String),
}

impl From<String> for StateRequirement {
    fn from(s: String) -> Self {
        let trimmed = s.trim();
        if let Some(rest) = trimmed.strip_prefix("respiratory_rate_less_than") {
            let threshold = leading_number(rest.trim_start_matches('_')).unwrap_or(8.0);
            return Self::RespiratoryRateBelow(threshold);
        }
        if let Some(condition) = trimmed.strip_suffix("_confirmed") {
            return Self::Confirmed(condition.to_string());
        }
        Self::Unrecognized(trimmed.to_string())
    }
}

impl From<StateRequirement> for String {
    fn from(req: StateRequirement) -> Self {
        match req {
            StateRequirement::Confirmed(condition) => format!("{condition}_confirmed"),
            StateRequirement::RespiratoryRateBelow(n) => format!("respiratory_rate_less_than_{n}"),
            StateRequirement::Unrecognized(s) => s,
        }
    }
}

/// Flat on-disk shape of a failure definition. Accepts both the structured
/// `rule` form and free-text `condition` strings from older blueprints.
#[derive(Deserialize)]
struct RawFailureDefinition {
    id: String,
    #[serde(rename = "type")]
    failure_type: FailureType,
    #[serde(default)]
    description: String,
    #[serde(default)]
    patient_outcome: String,
    #[serde(default, alias = "aar_teaching_point")]
    teaching_point: String,
    #[serde(default)]
    detection_criteria: RawDetectionCriteria,
}

#[derive(Default, Deserialize)]
struct RawDetectionCriteria {
    #[serde(default)]
    rule: Option<String>,
    #[serde(default)]
    medications: Vec<String>,
    #[serde(default)]
    forbidden_route: Option<Route>,
    #[serde(default)]
    fluids: Vec<String>,
    #[serde(default)]
    max_total_ml: Option<f64>,
    #[serde(default)]
    action_ids: Vec<String>,
    #[serde(default)]
    keywords: Vec<String>,
    #[serde(default)]
    min_count: Option<usize>,
    #[serde(default)]
    condition: Option<String>,
    #[serde(default)]
    exception: Option<String>,
    #[serde(default)]
    patient_state_required: Option<StateRequirement>,
}

impl TryFrom<RawFailureDefinition> for FailureDefinition {
    type Error = String;

    fn try_from(raw: RawFailureDefinition) -> std::result::Result<Self, Self::Error> {
        let criteria = raw.detection_criteria;
        let lower = |v: Vec<String>| v.into_iter().map(|s| s.to_lowercase()).collect::<Vec<_>>();

        let rule = match criteria.rule.as_deref() {
            Some("route_mismatch") => DetectionRule::RouteMismatch {
                medications: lower(criteria.medications),
                forbidden_route: criteria.forbidden_route.ok_or_else(|| {
                    format!("failure '{}': route_mismatch needs forbidden_route", raw.id)
                })?,
            },
            Some("drug_blacklist") => DetectionRule::DrugBlacklist {
                medications: lower(criteria.medications),
            },
            Some("volume_threshold") => DetectionRule::VolumeThreshold {
                fluids: lower(criteria.fluids),
                max_total_ml: criteria.max_total_ml.ok_or_else(|| {
                    format!("failure '{}': volume_threshold needs max_total_ml", raw.id)
                })?,
            },
            Some("allergy_match") => DetectionRule::AllergyMatch,
            Some("missing_medication") => DetectionRule::MissingMedication {
                medications: lower(criteria.medications),
            },
            Some("missing_action") => DetectionRule::MissingAction {
                action_ids: criteria.action_ids,
                keywords: lower(criteria.keywords),
                min_count: criteria.min_count.unwrap_or(1),
            },
            Some("inert") => DetectionRule::Inert {
                condition: criteria.condition.unwrap_or_default(),
            },
            Some(other) => return Err(format!("failure '{}': unknown rule '{other}'", raw.id)),
            None => translate_legacy_condition(
                &raw.id,
                raw.failure_type,
                &raw.description,
                criteria.condition.as_deref().unwrap_or_default(),
                criteria.exception.as_deref(),
            ),
        };

        Ok(Self {
            id: raw.id,
            failure_type: raw.failure_type,
            description: raw.description,
            patient_outcome: raw.patient_outcome,
            teaching_point: raw.teaching_point,
            detection_criteria: DetectionCriteria {
                rule,
                patient_state_required: criteria.patient_state_required,
            },
        })
    }
}

fn names(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| (*s).to_string()).collect()
}

/// Map a free-text legacy condition onto a structured rule.
///
/// These translations cover the scenario-specific conditions older
/// blueprints were authored with; they are not an exhaustive grammar.
fn translate_legacy_condition(
    id: &str,
    failure_type: FailureType,
    description: &str,
    condition: &str,
    exception: Option<&str>,
) -> DetectionRule {
    let description = description.to_lowercase();
    let missing_action = |keywords: &[&str], ids: &[&str], min_count| DetectionRule::MissingAction {
        action_ids: names(ids),
        keywords: names(keywords),
        min_count,
    };

    let rule = match failure_type {
        FailureType::Commission => {
            if condition.contains("epinephrine_route") && condition.contains("'IV'") {
                if exception.is_some() {
                    debug!(failure_id = id, "Ignoring legacy exception clause");
                }
                Some(DetectionRule::RouteMismatch {
                    medications: names(&["epinephrine", "adrenaline"]),
                    forbidden_route: Route::Intravenous,
                })
            } else if condition.contains("medication_given") {
                Some(DetectionRule::DrugBlacklist {
                    medications: quoted_names(condition),
                })
            } else if description.contains("beta-blocker") {
                Some(DetectionRule::DrugBlacklist {
                    medications: names(&["propranolol", "metoprolol", "atenolol", "labetalol"]),
                })
            } else if description.contains("excessive fluid") {
                Some(DetectionRule::VolumeThreshold {
                    fluids: names(&["saline", "fluid", "crystalloid"]),
                    max_total_ml: 2000.0,
                })
            } else {
                None
            }
        }
        FailureType::Contraindication => description
            .contains("allergy")
            .then_some(DetectionRule::AllergyMatch),
        FailureType::Omission => {
            if condition.contains("epinephrine_given == false") {
                Some(DetectionRule::MissingMedication {
                    medications: names(&["epinephrine", "adrenaline"]),
                })
            } else if condition.contains("salbutamol_given == false") {
                Some(DetectionRule::MissingMedication {
                    medications: names(&["salbutamol", "albuterol"]),
                })
            } else if condition.contains("naloxone_given == false") {
                Some(DetectionRule::MissingMedication {
                    medications: names(&["naloxone", "narcan"]),
                })
            } else if condition.contains("glucose_checked == false") {
                Some(missing_action(&["glucose", "blood sugar"], &["CA4"], 1))
            } else if condition.contains("bvm_ventilation_provided == false") {
                Some(missing_action(&["bvm", "ventilat"], &["CA4"], 1))
            } else if condition.contains("pelvic_binder_applied == false") {
                Some(missing_action(&["binder", "pelvic"], &["CA4"], 1))
            } else if condition.contains("c_spine_immobilized == false") {
                Some(missing_action(&["c-spine", "collar", "immobil"], &["CA2"], 1))
            } else if condition.contains("gcs_assessments_count") {
                Some(missing_action(&["gcs", "glasgow"], &["CA3", "CA7"], 2))
            } else {
                None
            }
        }
    };

    rule.unwrap_or_else(|| {
        warn!(failure_id = id, condition, "Unrecognised safety condition, rule kept inert");
        DetectionRule::Inert {
            condition: condition.to_string(),
        }
    })
}

/// Single-quoted names in a condition string, lower-cased:
/// `"medication_given IN ['Aspirin', 'ibuprofen']"` → `["aspirin", "ibuprofen"]`.
fn quoted_names(condition: &str) -> Vec<String> {
    condition
        .split('\'')
        .skip(1)
        .step_by(2)
        .filter(|s| !s.is_empty())
        .map(str::to_lowercase)
        .collect()
}

// ---------------------------------------------------------------------------
// Medications
// ---------------------------------------------------------------------------

/// An absolute contraindication for a medication.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Contraindication {
    /// `systolic_bp_below_<n>`.
    SystolicBpBelow(f32),
    /// `active_bleeding`.
    ActiveBleeding,
    /// Recognised by name only; not evaluated.
    Other(String),
}

impl From<String> for Contraindication {
    fn from(s: String) -> Self {
        let trimmed = s.trim();
        if let Some(rest) = trimmed.strip_prefix("systolic_bp_below_") {
            if let Some(threshold) = leading_number(rest) {
                return Self::SystolicBpBelow(threshold);
            }
        }
        if trimmed == "active_bleeding" {
            return Self::ActiveBleeding;
        }
        Self::Other(trimmed.to_string())
    }
}

impl From<Contraindication> for String {
    fn from(c: Contraindication) -> Self {
        match c {
            Contraindication::SystolicBpBelow(n) => format!("systolic_bp_below_{n}"),
            Contraindication::ActiveBleeding => "active_bleeding".to_string(),
            Contraindication::Other(s) => s,
        }
    }
}

/// One entry of the medication table.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Medication {
    /// Standard adult dose, e.g. `"0.5 mg"`.
    #[serde(default)]
    pub dose_adult: String,
    /// Maximum safe dose. Defaults to twice the standard dose.
    #[serde(default)]
    pub max_dose: Option<String>,
    /// Usual route.
    #[serde(default)]
    pub route: Option<Route>,
    /// What it treats.
    #[serde(default)]
    pub indication: Option<String>,
    /// Absolute contraindications.
    #[serde(default)]
    pub contraindications_absolute: Vec<Contraindication>,
    /// Minutes until the effect shows.
    #[serde(default)]
    pub onset_minutes: f64,
    /// Vital changes once the effect shows.
    #[serde(default)]
    pub vital_effects: VitalChanges,
    /// Side effects.
    #[serde(default)]
    pub side_effects: Vec<String>,
    /// What the patient feels right after administration.
    #[serde(default)]
    pub patient_experience: Option<String>,
    /// Note for the dialogue consumer.
    #[serde(default)]
    pub clinical_note: Option<String>,
    /// Life-saving: giving it halts automatic deterioration.
    #[serde(default)]
    pub critical: bool,
    /// State the patient moves to once the effect shows (improving/stable).
    #[serde(default)]
    pub state_change: Option<PatientState>,
}

// ---------------------------------------------------------------------------
// No-treatment progression
// ---------------------------------------------------------------------------

/// One step of untreated vitals drift.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProgressionStep {
    /// Partial vitals snapshot applied once this step is reached.
    #[serde(default)]
    pub vitals: Vitals,
    /// Optional narrative.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Untreated vitals drift, sorted by minute.
///
/// Authored as a map keyed `"<n>min"`; keys that do not parse are rejected.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(
    try_from = "BTreeMap<String, ProgressionStep>",
    into = "BTreeMap<String, ProgressionStep>"
)]
pub struct NoTreatmentProgression {
    steps: Vec<(f64, ProgressionStep)>,
}

impl NoTreatmentProgression {
    /// Build from `(minute, step)` pairs.
    #[must_use]
    pub fn new(mut steps: Vec<(f64, ProgressionStep)>) -> Self {
        steps.sort_by(|a, b| a.0.total_cmp(&b.0));
        Self { steps }
    }

    /// Steps in ascending minute order.
    #[must_use]
    pub fn steps(&self) -> &[(f64, ProgressionStep)] {
        &self.steps
    }

    /// Index of the latest step whose minute is at or before `elapsed_minutes`.
    #[must_use]
    pub fn bucket_at(&self, elapsed_minutes: f64) -> Option<usize> {
        self.steps
            .partition_point(|(minute, _)| *minute <= elapsed_minutes)
            .checked_sub(1)
    }

    /// Whether there are no steps.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

impl TryFrom<BTreeMap<String, ProgressionStep>> for NoTreatmentProgression {
    type Error = String;

    fn try_from(map: BTreeMap<String, ProgressionStep>) -> std::result::Result<Self, Self::Error> {
        let steps = map
            .into_iter()
            .map(|(key, step)| {
                let minute = key
                    .trim()
                    .strip_suffix("min")
                    .and_then(|n| n.trim().parse::<f64>().ok())
                    .ok_or_else(|| format!("progression key '{key}' is not of the form '<n>min'"))?;
                Ok((minute, step))
            })
            .collect::<std::result::Result<Vec<_>, String>>()?;
        Ok(Self::new(steps))
    }
}

impl From<NoTreatmentProgression> for BTreeMap<String, ProgressionStep> {
    fn from(progression: NoTreatmentProgression) -> Self {
        progression
            .steps
            .into_iter()
            .map(|(minute, step)| (format!("{minute}min"), step))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::VitalChange;
    use crate::types::VitalSign;

    fn minimal_json(extra: &str) -> String {
        format!(
            r#"{{
                "scenario_id": "TEST_001",
                "patient_profile": {{ "name": "Sam" }},
                "initial_vitals": {{ "HR": 110, "RR": 28, "SpO2": 91 }}
                {extra}
            }}"#
        )
    }

    #[test]
    fn minimal_blueprint_gets_defaults() {
        let bp = ScenarioBlueprint::from_json_str(&minimal_json("")).expect("valid");
        assert_eq!(bp.simulation_config.deterioration_timing_minutes, [5.0, 9.0, 13.0]);
        assert!(bp.progress_milestones.is_none());
        assert!(bp.safety_gate.is_none());
        assert!(bp.no_treatment_progression.is_empty());
    }

    #[test]
    fn missing_vitals_is_invalid() {
        let json =
            r#"{"scenario_id": "X", "patient_profile": {"name": "A"}, "initial_vitals": {}}"#;
        let err = ScenarioBlueprint::from_json_str(json).unwrap_err();
        assert!(matches!(err, MedsimError::InvalidBlueprint { .. }));
    }

    #[test]
    fn malformed_json_is_parse_error() {
        let err = ScenarioBlueprint::from_json_str("{ not json").unwrap_err();
        assert!(matches!(err, MedsimError::BlueprintParse { format: "json", .. }));
    }

    #[test]
    fn medication_contraindications_and_effects_parse() {
        let bp = ScenarioBlueprint::from_json_str(&minimal_json(
            r#", "medications_available": {
                "Aspirin": {
                    "dose_adult": "300 mg",
                    "contraindications_absolute": [
                        "active_bleeding", "systolic_bp_below_90", "pregnancy"
                    ],
                    "vital_effects": { "HR": "-10", "SpO2": 95 },
                    "critical": true,
                    "state_change": "improving"
                }
            }"#,
        ))
        .expect("valid");
        let (key, med) = bp.medication("aspirin").expect("case-insensitive lookup");
        assert_eq!(key, "Aspirin");
        assert_eq!(
            med.contraindications_absolute,
            vec![
                Contraindication::ActiveBleeding,
                Contraindication::SystolicBpBelow(90.0),
                Contraindication::Other("pregnancy".into()),
            ]
        );
        assert_eq!(med.vital_effects[&VitalSign::HeartRate], VitalChange::Shift(-10.0));
        assert_eq!(med.state_change, Some(PatientState::Improving));
    }

    #[test]
    fn medication_with_worsening_state_change_is_invalid() {
        let err = ScenarioBlueprint::from_json_str(&minimal_json(
            r#", "medications_available": {
                "X": { "dose_adult": "1 mg", "state_change": "critical" }
            }"#,
        ))
        .unwrap_err();
        assert!(matches!(err, MedsimError::InvalidBlueprint { .. }));
    }

    #[test]
    fn progression_keys_sort_by_minute() {
        let bp = ScenarioBlueprint::from_json_str(&minimal_json(
            r#", "no_treatment_progression": {
                "10min": { "vitals": { "SpO2": 86 } },
                "5min": { "vitals": { "SpO2": 89 } }
            }"#,
        ))
        .expect("valid");
        let steps = bp.no_treatment_progression.steps();
        let minutes: Vec<f64> = steps.iter().map(|(m, _)| *m).collect();
        assert_eq!(minutes, vec![5.0, 10.0]);
        assert_eq!(bp.no_treatment_progression.bucket_at(4.9), None);
        assert_eq!(bp.no_treatment_progression.bucket_at(7.0), Some(0));
        assert_eq!(bp.no_treatment_progression.bucket_at(12.0), Some(1));
    }

    #[test]
    fn bad_progression_key_is_parse_error() {
        let err = ScenarioBlueprint::from_json_str(&minimal_json(
            r#", "no_treatment_progression": { "soon": { "vitals": {} } }"#,
        ))
        .unwrap_err();
        assert!(matches!(err, MedsimError::BlueprintParse { .. }));
    }

    #[test]
    fn structured_safety_rules_parse() {
        let bp = ScenarioBlueprint::from_json_str(&minimal_json(
            r#", "safety_gate": { "enabled": true, "critical_failures": [
                { "id": "SF1", "type": "commission", "description": "IV adrenaline",
                  "detection_criteria": { "rule": "route_mismatch", "medications": ["Adrenaline"],
                                          "forbidden_route": "IV" } },
                { "id": "SF2", "type": "omission", "description": "No adrenaline",
                  "aar_teaching_point": "Give IM adrenaline early",
                  "detection_criteria": { "rule": "missing_medication",
                                          "medications": ["adrenaline"],
                                          "patient_state_required": "anaphylaxis_confirmed" } }
            ] }"#,
        ))
        .expect("valid");
        let gate = bp.safety_gate.expect("gate");
        assert_eq!(
            gate.critical_failures[0].detection_criteria.rule,
            DetectionRule::RouteMismatch {
                medications: vec!["adrenaline".into()],
                forbidden_route: Route::Intravenous,
            }
        );
        let omission = &gate.critical_failures[1];
        assert_eq!(omission.teaching_point, "Give IM adrenaline early");
        assert_eq!(
            omission.detection_criteria.patient_state_required,
            Some(StateRequirement::Confirmed("anaphylaxis".into()))
        );
    }

    #[test]
    fn legacy_conditions_translate() {
        let rule = translate_legacy_condition(
            "SF3",
            FailureType::Commission,
            "Gave contraindicated NSAID",
            "medication_given IN ['Ibuprofen', 'naproxen']",
            None,
        );
        assert_eq!(
            rule,
            DetectionRule::DrugBlacklist {
                medications: vec!["ibuprofen".into(), "naproxen".into()],
            }
        );

        let rule = translate_legacy_condition(
            "SF4",
            FailureType::Omission,
            "No GCS trending",
            "gcs_assessments_count < 2",
            None,
        );
        assert!(matches!(rule, DetectionRule::MissingAction { min_count: 2, .. }));

        let odd = "moon_phase == full";
        let rule = translate_legacy_condition("SF5", FailureType::Omission, "?", odd, None);
        assert!(matches!(rule, DetectionRule::Inert { .. }));
    }

    #[test]
    fn state_requirement_parses() {
        assert_eq!(
            StateRequirement::from("respiratory_rate_less_than_10".to_string()),
            StateRequirement::RespiratoryRateBelow(10.0)
        );
        assert_eq!(
            StateRequirement::from("opioid_toxidrome_confirmed".to_string()),
            StateRequirement::Confirmed("opioid_toxidrome".into())
        );
    }

    #[test]
    fn finding_text_depends_on_state() {
        let finding: Finding = serde_json::from_str(
            r#"{ "text": "Mild wheeze", "by_state": { "critical": "Silent chest" } }"#,
        )
        .expect("finding");
        assert_eq!(finding.text_for(PatientState::Initial), "Mild wheeze");
        assert_eq!(finding.text_for(PatientState::Critical), "Silent chest");
    }

    #[test]
    fn toml_blueprint_loads_from_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("chest_pain.toml");
        std::fs::write(
            &path,
            r#"
            scenario_id = "CHEST_PAIN_001"
            scene_description = "Living room"

            [patient_profile]
            name = "Pat"
            allergies = ["aspirin"]

            [initial_vitals]
            HR = 96
            BP_systolic = 150
            BP_diastolic = 90

            [[critical_actions_checklist]]
            id = "CA1"
            action = "12-lead ECG"
            importance = "critical"
            "#,
        )
        .expect("write");
        let bp = ScenarioBlueprint::from_file(&path).expect("load");
        assert_eq!(bp.scenario_id, "CHEST_PAIN_001");
        assert_eq!(bp.critical_actions_checklist[0].importance, Importance::Critical);

        let bad = dir.path().join("scenario.yaml");
        std::fs::write(&bad, "x: 1").expect("write");
        assert!(matches!(
            ScenarioBlueprint::from_file(&bad),
            Err(MedsimError::UnsupportedFormat(_))
        ));
    }
}
