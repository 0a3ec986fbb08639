//! After-action report types.
//!
//! An [`AarReport`] is the one structured output of a finished scenario.
//! It is plain serialisable data; [`crate::performance::PerformanceTracker`]
//! builds it and the debrief crate folds several of them together.

use crate::blueprint::{FeedbackTemplate, Importance};
use crate::checklist::MatchConfidence;
use crate::milestone::{CompletedMilestone, MilestoneSummary};
use crate::safety::SafetyGateSummary;
use crate::state::StateProgressionSummary;
use crate::types::{CompetenceLevel, PatientState, Vitals};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Why a scenario ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    /// The time limit elapsed.
    TimeLimit,
    /// The patient reached the critical state.
    PatientCritical,
    /// The patient has been improving or stable for long enough.
    PatientStabilized,
    /// The report was requested before any automatic end condition.
    Completed,
}

impl fmt::Display for EndReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::TimeLimit => "time_limit",
            Self::PatientCritical => "patient_critical",
            Self::PatientStabilized => "patient_stabilized",
            Self::Completed => "completed",
        })
    }
}

/// Headline numbers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportSummary {
    /// Scenario length in minutes.
    pub duration_minutes: f64,
    /// Actions recorded.
    pub total_actions: usize,
    /// Checklist items completed.
    pub checklist_completed: usize,
    /// Checklist items defined.
    pub checklist_total: usize,
    /// Critical checklist items completed.
    pub critical_completed: usize,
    /// Critical checklist items defined.
    pub critical_total: usize,
    /// State at the end.
    pub final_state: PatientState,
    /// Whether a life-saving treatment was given.
    pub critical_treatment_given: bool,
}

/// Count of completed checklist items per level.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompetenceDistribution {
    /// Exemplary actions.
    pub exemplary: usize,
    /// Competent actions.
    pub competent: usize,
    /// Developing actions.
    pub developing: usize,
    /// Novice actions.
    pub novice: usize,
}

impl CompetenceDistribution {
    /// Count one action.
    pub fn add(&mut self, level: CompetenceLevel) {
        match level {
            CompetenceLevel::Exemplary => self.exemplary += 1,
            CompetenceLevel::Competent => self.competent += 1,
            CompetenceLevel::Developing => self.developing += 1,
            CompetenceLevel::Novice => self.novice += 1,
        }
    }

    /// Total actions counted.
    #[must_use]
    pub fn total(&self) -> usize {
        self.exemplary + self.competent + self.developing + self.novice
    }
}

impl FromIterator<CompetenceLevel> for CompetenceDistribution {
    fn from_iter<I: IntoIterator<Item = CompetenceLevel>>(iter: I) -> Self {
        let mut distribution = Self::default();
        for level in iter {
            distribution.add(level);
        }
        distribution
    }
}

/// Competence detail for one completed checklist item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionCompetence {
    /// Checklist id.
    pub checklist_id: String,
    /// Checklist description.
    pub action: String,
    /// Importance tag.
    pub importance: Importance,
    /// Grouping.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    /// Minutes into the scenario.
    pub timestamp_minutes: f64,
    /// `MM:SS`.
    pub timestamp_formatted: String,
    /// Verdict.
    pub competence_level: CompetenceLevel,
    /// State when the action happened.
    pub patient_state_at_action: PatientState,
    /// State one assessment window later.
    pub patient_state_after: PatientState,
    /// Vitals when the action happened.
    pub vitals_at_action: Vitals,
    /// Vitals one assessment window later.
    pub vitals_after: Vitals,
    /// How the action was matched.
    pub match_confidence: MatchConfidence,
    /// Keyword that matched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub matched_keyword: Option<String>,
    /// Debrief text for this level.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feedback: Option<FeedbackTemplate>,
}

/// Overall and per-action competence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompetenceAssessment {
    /// Qualitative verdict for the whole scenario.
    pub overall: CompetenceLevel,
    /// Why.
    pub overall_reason: String,
    /// Level counts.
    pub distribution: CompetenceDistribution,
    /// Per-action detail in completion order.
    pub actions: Vec<ActionCompetence>,
}

/// Milestone section of the report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MilestoneReport {
    /// Aggregate progress.
    pub summary: MilestoneSummary,
    /// Completed milestones in milestone order.
    pub completed: Vec<CompletedMilestone>,
    /// Positive-only acknowledgement text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acknowledgement: Option<String>,
}

/// A checklist item that was never completed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MissedAction {
    /// Checklist id.
    pub checklist_id: String,
    /// Description.
    pub action: String,
    /// Importance tag.
    pub importance: Importance,
    /// Clinical evidence.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clinical_anchor: Option<String>,
    /// Why it matters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rationale: Option<String>,
}

/// A recorded treatment warning (contraindication or dose).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MedicationWarning {
    /// Medication as named by the trainee.
    pub drug: String,
    /// Dose as given.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dose: Option<String>,
    /// What was wrong.
    pub warning: crate::treatment::TreatmentWarning,
    /// Minutes into the scenario.
    pub timestamp_minutes: f64,
    /// State when it was given.
    pub patient_state_at_action: PatientState,
}

/// Priority of an improvement area.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImprovementPriority {
    /// Patient harm or a missed life-saving action.
    High,
    /// Late or imprecise care.
    Moderate,
}

/// One area for improvement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImprovementArea {
    /// Short heading.
    pub area: String,
    /// Detail.
    pub detail: String,
    /// Priority.
    pub priority: ImprovementPriority,
}

/// One entry of the report's action timeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelineEntry {
    /// Action type.
    pub action_type: String,
    /// Action name.
    pub name: String,
    /// Checklist id, explicit or matched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_id: Option<String>,
    /// Minutes into the scenario.
    pub minutes_mark: f64,
    /// `MM:SS`.
    pub timestamp_formatted: String,
}

/// The after-action report of one scenario.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AarReport {
    /// Scenario id.
    pub scenario_id: String,
    /// Scenario title, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scenario_title: Option<String>,
    /// Clinical category, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scenario_type: Option<String>,
    /// Wall-clock generation time.
    pub generated_at: DateTime<Utc>,
    /// Why the scenario ended.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_reason: Option<EndReason>,
    /// Headline numbers.
    pub summary: ReportSummary,
    /// Competence verdicts.
    pub competence_assessment: CompetenceAssessment,
    /// Safety-gate outcome.
    pub safety_gate: SafetyGateSummary,
    /// Milestone progress.
    pub progress_milestones: MilestoneReport,
    /// State history and worst state.
    pub patient_progression: StateProgressionSummary,
    /// Everything the trainee did.
    pub timeline: Vec<TimelineEntry>,
    /// Checklist items never completed.
    pub missed_actions: Vec<MissedAction>,
    /// Treatment warnings.
    pub medication_warnings: Vec<MedicationWarning>,
    /// What went well.
    pub strengths: Vec<String>,
    /// What to work on.
    pub areas_for_improvement: Vec<ImprovementArea>,
    /// Lessons, deduplicated.
    pub teaching_points: Vec<String>,
}

impl AarReport {
    /// Pretty-printed JSON.
    ///
    /// # Errors
    /// Returns an error if serialisation fails.
    pub fn to_json_pretty(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distribution_counts_levels() {
        let dist: CompetenceDistribution = [
            CompetenceLevel::Exemplary,
            CompetenceLevel::Exemplary,
            CompetenceLevel::Developing,
            CompetenceLevel::Novice,
        ]
        .into_iter()
        .collect();
        assert_eq!(dist.exemplary, 2);
        assert_eq!(dist.competent, 0);
        assert_eq!(dist.total(), 4);
    }

    #[test]
    fn end_reason_serialises_snake_case() {
        assert_eq!(
            serde_json::to_string(&EndReason::PatientStabilized).expect("json"),
            "\"patient_stabilized\""
        );
        assert_eq!(EndReason::TimeLimit.to_string(), "time_limit");
    }
}
