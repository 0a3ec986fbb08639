//! Per-scenario performance tracking and outcome-based competence.
//!
//! [`PerformanceTracker`] owns the action timeline, the completed checklist
//! items, the milestone tracker and the safety gate. Competence is judged by
//! what happened to the patient: the state when the action was performed and
//! the state one assessment window later, both read back from
//! [`StateTracker`]'s history.

use crate::action::Action;
use crate::blueprint::{ChecklistItem, Importance, ScenarioBlueprint};
use crate::checklist::{MatchConfidence, find_checklist_match};
use crate::config::EngineConfig;
use crate::milestone::{CompletedMilestone, MilestoneTracker};
use crate::report::{
    AarReport, ActionCompetence, CompetenceAssessment, CompetenceDistribution, EndReason,
    ImprovementArea, ImprovementPriority, MedicationWarning, MilestoneReport, MissedAction,
    ReportSummary, TimelineEntry,
};
use crate::safety::SafetyGateMonitor;
use crate::state::{AssessmentData, StateTracker};
use crate::treatment::TreatmentWarning;
use crate::types::{CompetenceLevel, PatientState, Route, SimTimestamp, Vitals, round_minutes};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

/// One entry of the action timeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionRecord {
    /// Action type as given.
    pub action_type: String,
    /// Action name.
    pub name: String,
    /// Checklist id, explicit or matched.
    pub action_id: Option<String>,
    /// Extra details from the consumer.
    pub details: serde_json::Value,
    /// Technique quality.
    pub technique: Option<String>,
    /// When it happened.
    pub timestamp: SimTimestamp,
    /// Minutes into the scenario.
    pub minutes_mark: f64,
}

/// A checklist item satisfied by an action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletedChecklistItem {
    /// Checklist id.
    pub checklist_id: String,
    /// Checklist description.
    pub action: String,
    /// Importance tag.
    pub importance: Importance,
    /// Grouping.
    pub category: Option<String>,
    /// How the action was matched.
    pub confidence: MatchConfidence,
    /// Keyword that matched.
    pub matched_keyword: Option<String>,
    /// When it happened.
    pub timestamp: SimTimestamp,
    /// Minutes into the scenario.
    pub minutes_mark: f64,
    /// Whether the technique was dangerous.
    pub dangerous_technique: bool,
    /// State when the action happened.
    pub patient_state_at_action: PatientState,
    /// State one assessment window later, as known at the time.
    pub patient_state_after: PatientState,
    /// Vitals when the action happened.
    pub vitals_at_action: Vitals,
    /// Vitals one assessment window later, as known at the time.
    pub vitals_after: Vitals,
    /// Verdict, as known at the time.
    pub competence_level: CompetenceLevel,
}

/// What recording an action produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ActionRecording {
    /// Checklist id completed by this action.
    pub completed_item: Option<String>,
    /// Milestone completed by this action.
    pub milestone: Option<CompletedMilestone>,
}

/// Evaluate competence for one completed item.
///
/// Dangerous technique is always novice. Authored criteria are checked best
/// level first; without authored criteria the built-in rules apply. The
/// fallback is developing.
#[must_use]
pub fn evaluate_competence(
    item: &ChecklistItem,
    data: &AssessmentData,
    dangerous: bool,
) -> CompetenceLevel {
    if dangerous {
        return CompetenceLevel::Novice;
    }
    let at = data.patient_state_at_action;
    let after = data.patient_state_after;

    if !item.competence_criteria.is_empty() {
        return CompetenceLevel::PRIORITY
            .into_iter()
            .find(|level| {
                item.competence_criteria
                    .get(level)
                    .is_some_and(|criteria| criteria.matches(at, after))
            })
            .unwrap_or(CompetenceLevel::Developing);
    }

    match (at, after.is_recovering()) {
        (PatientState::Initial, true) => CompetenceLevel::Exemplary,
        (PatientState::EarlyDeteriorating, true) => CompetenceLevel::Competent,
        _ => CompetenceLevel::Developing,
    }
}

/// Tracks everything the trainee did in one scenario.
#[derive(Debug, Clone)]
pub struct PerformanceTracker {
    blueprint: Arc<ScenarioBlueprint>,
    exemplary_strength_threshold: usize,
    timeline: Vec<ActionRecord>,
    completed: Vec<CompletedChecklistItem>,
    milestones: MilestoneTracker,
    safety: SafetyGateMonitor,
    medication_warnings: Vec<MedicationWarning>,
}

impl PerformanceTracker {
    /// Start tracking a scenario.
    #[must_use]
    pub fn new(blueprint: Arc<ScenarioBlueprint>, config: &EngineConfig) -> Self {
        Self {
            milestones: MilestoneTracker::new(&blueprint, config.systematic_milestone_threshold),
            safety: SafetyGateMonitor::new(&blueprint),
            exemplary_strength_threshold: config.exemplary_strength_threshold,
            timeline: Vec::new(),
            completed: Vec::new(),
            medication_warnings: Vec::new(),
            blueprint,
        }
    }

    /// Record an action: append it to the timeline, match it against the
    /// checklist, and forward the resolved id to the safety gate and the
    /// milestone tracker.
    pub fn record_action(
        &mut self,
        action: &Action,
        state: &StateTracker,
        now: SimTimestamp,
    ) -> ActionRecording {
        let blueprint = Arc::clone(&self.blueprint);
        let matched = find_checklist_match(
            action.action_id.as_deref(),
            action.match_text(),
            &blueprint.critical_actions_checklist,
            |id| self.is_completed(id),
        );

        let completed_item = matched.map(|m| {
            let data = state.assessment_data_for_action(&m.item.id, now);
            let dangerous = action.is_dangerous();
            let level = evaluate_competence(m.item, &data, dangerous);
            info!(
                scenario_id = %blueprint.scenario_id,
                checklist_id = %m.item.id,
                confidence = ?m.confidence,
                state_at_action = %data.patient_state_at_action,
                competence = %level,
                "Checklist item completed"
            );
            self.completed.push(CompletedChecklistItem {
                checklist_id: m.item.id.clone(),
                action: m.item.action.clone(),
                importance: m.item.importance,
                category: m.item.category.clone(),
                confidence: m.confidence,
                matched_keyword: m.matched_keyword,
                timestamp: now,
                minutes_mark: round_minutes(now.minutes()),
                dangerous_technique: dangerous,
                patient_state_at_action: data.patient_state_at_action,
                patient_state_after: data.patient_state_after,
                vitals_at_action: data.vitals_at_action,
                vitals_after: data.vitals_after,
                competence_level: level,
            });
            m.item.id.clone()
        });

        let known_id = action
            .action_id
            .as_deref()
            .filter(|id| blueprint.checklist_item(id).is_some())
            .map(str::to_string);
        let resolved_id = known_id.or_else(|| completed_item.clone());
        self.timeline.push(ActionRecord {
            action_type: action
                .action_type
                .as_ref()
                .map_or_else(|| "unknown".to_string(), ToString::to_string),
            name: action.name.clone(),
            action_id: resolved_id.clone(),
            details: action.details.clone(),
            technique: action.technique.clone(),
            timestamp: now,
            minutes_mark: round_minutes(now.minutes()),
        });

        self.safety.record_action(resolved_id.as_deref(), action.match_text());
        let milestone = resolved_id
            .as_deref()
            .and_then(|id| self.milestones.check_action(id, now));

        ActionRecording {
            completed_item,
            milestone,
        }
    }

    /// Record a medication: the safety gate checks it, and the state tracker
    /// records it (flagging life-saving treatments). Returns how many safety
    /// failures it triggered.
    #[allow(clippy::too_many_arguments)]
    pub fn record_medication(
        &mut self,
        name: &str,
        dose: Option<&str>,
        route: Option<&Route>,
        volume_ml: Option<f64>,
        is_critical: bool,
        state: &mut StateTracker,
        now: SimTimestamp,
    ) -> usize {
        let failures = self.safety.record_medication(name, route, volume_ml, now);
        state.record_treatment(name, dose, is_critical, now);
        failures
    }

    /// Keep a treatment warning for the debrief.
    pub fn record_medication_warning(
        &mut self,
        drug: &str,
        dose: Option<&str>,
        warning: TreatmentWarning,
        state_at_action: PatientState,
        now: SimTimestamp,
    ) {
        debug!(drug, warning = warning.message(), "Medication warning recorded");
        self.medication_warnings.push(MedicationWarning {
            drug: drug.to_string(),
            dose: dose.map(str::to_string),
            warning,
            timestamp_minutes: round_minutes(now.minutes()),
            patient_state_at_action: state_at_action,
        });
    }

    /// Run end-of-scenario omission checks. Returns how many failures were
    /// logged.
    pub fn finalize(&mut self, final_state: PatientState, now: SimTimestamp) -> usize {
        self.safety.check_end_of_scenario_omissions(final_state, now)
    }

    /// Whether a checklist item was completed.
    #[must_use]
    pub fn is_completed(&self, checklist_id: &str) -> bool {
        self.completed.iter().any(|c| c.checklist_id == checklist_id)
    }

    /// Action timeline, oldest first.
    #[must_use]
    pub fn timeline(&self) -> &[ActionRecord] {
        &self.timeline
    }

    /// Completed items as recorded at action time.
    #[must_use]
    pub fn completed_items(&self) -> &[CompletedChecklistItem] {
        &self.completed
    }

    /// Milestone tracker.
    #[must_use]
    pub fn milestones(&self) -> &MilestoneTracker {
        &self.milestones
    }

    /// Safety gate.
    #[must_use]
    pub fn safety_gate(&self) -> &SafetyGateMonitor {
        &self.safety
    }

    /// Completed items re-evaluated against the full state history, so the
    /// "after" sample reflects what actually happened.
    #[must_use]
    pub fn reassessed_items(&self, state: &StateTracker) -> Vec<CompletedChecklistItem> {
        self.completed
            .iter()
            .map(|item| {
                let data = state.assessment_data_for_action(&item.checklist_id, item.timestamp);
                let level = self
                    .blueprint
                    .checklist_item(&item.checklist_id)
                    .map_or(item.competence_level, |def| {
                        evaluate_competence(def, &data, item.dangerous_technique)
                    });
                CompletedChecklistItem {
                    patient_state_at_action: data.patient_state_at_action,
                    patient_state_after: data.patient_state_after,
                    vitals_at_action: data.vitals_at_action,
                    vitals_after: data.vitals_after,
                    competence_level: level,
                    ..item.clone()
                }
            })
            .collect()
    }

    /// Checklist items never completed.
    #[must_use]
    pub fn missed_actions(&self) -> Vec<MissedAction> {
        self.blueprint
            .critical_actions_checklist
            .iter()
            .filter(|item| !self.is_completed(&item.id))
            .map(|item| MissedAction {
                checklist_id: item.id.clone(),
                action: item.action.clone(),
                importance: item.importance,
                clinical_anchor: item.clinical_anchor.clone(),
                rationale: item.rationale.clone(),
            })
            .collect()
    }

    /// Overall qualitative verdict plus per-action detail.
    ///
    /// Any safety failure forces `novice`, whatever else happened.
    #[must_use]
    pub fn calculate_final_score(&self, state: &StateTracker) -> CompetenceAssessment {
        let items = self.reassessed_items(state);
        let distribution: CompetenceDistribution =
            items.iter().map(|i| i.competence_level).collect();
        let missed_critical = self
            .missed_actions()
            .iter()
            .any(|m| m.importance == Importance::Critical);

        let (overall, reason) =
            overall_verdict(self.safety.passed(), &distribution, missed_critical);

        let actions = items
            .iter()
            .map(|item| ActionCompetence {
                checklist_id: item.checklist_id.clone(),
                action: item.action.clone(),
                importance: item.importance,
                category: item.category.clone(),
                timestamp_minutes: item.minutes_mark,
                timestamp_formatted: item.timestamp.to_string(),
                competence_level: item.competence_level,
                patient_state_at_action: item.patient_state_at_action,
                patient_state_after: item.patient_state_after,
                vitals_at_action: item.vitals_at_action,
                vitals_after: item.vitals_after,
                match_confidence: item.confidence,
                matched_keyword: item.matched_keyword.clone(),
                feedback: self
                    .blueprint
                    .feedback_template(&item.checklist_id, item.competence_level)
                    .cloned(),
            })
            .collect();

        CompetenceAssessment {
            overall,
            overall_reason: reason.to_string(),
            distribution,
            actions,
        }
    }

    /// Compile the after-action report.
    #[must_use]
    pub fn generate_aar_report(
        &self,
        state: &StateTracker,
        end_reason: Option<EndReason>,
        now: SimTimestamp,
        generated_at: DateTime<Utc>,
    ) -> AarReport {
        let competence = self.calculate_final_score(state);
        let safety_gate = self.safety.summary();
        let milestone_summary = self.milestones.summary();
        let progression = state.summary(now);
        let missed = self.missed_actions();
        let checklist = &self.blueprint.critical_actions_checklist;
        let critical_total = checklist
            .iter()
            .filter(|i| i.importance == Importance::Critical)
            .count();
        let critical_missed = missed
            .iter()
            .filter(|m| m.importance == Importance::Critical)
            .count();

        // Strengths.
        let mut strengths = Vec::new();
        if competence.distribution.exemplary >= self.exemplary_strength_threshold {
            strengths.push(format!(
                "Prevented deterioration through early intervention on {} actions",
                competence.distribution.exemplary
            ));
        }
        if milestone_summary.systematic_approach {
            strengths.push(format!(
                "Systematic approach: completed {} of {} progress milestones",
                milestone_summary.completed, milestone_summary.total_milestones
            ));
        }
        if safety_gate.enabled && safety_gate.passed {
            strengths.push("No patient safety failures".to_string());
        }
        if critical_total > 0 && critical_missed == 0 {
            strengths.push("Completed every critical action".to_string());
        }
        if progression.final_state.is_recovering() {
            strengths.push(format!(
                "Patient was {} by the end of the scenario",
                progression.final_state
            ));
        }

        // Areas for improvement, most serious first.
        let mut areas = Vec::new();
        for failure in &safety_gate.failures {
            areas.push(ImprovementArea {
                area: format!("Patient safety: {}", failure.description),
                detail: failure.patient_outcome.clone(),
                priority: ImprovementPriority::High,
            });
        }
        for m in missed.iter().filter(|m| m.importance == Importance::Critical) {
            areas.push(ImprovementArea {
                area: format!("Missed critical action: {}", m.action),
                detail: m
                    .rationale
                    .clone()
                    .or_else(|| m.clinical_anchor.clone())
                    .unwrap_or_default(),
                priority: ImprovementPriority::High,
            });
        }
        for a in &competence.actions {
            match a.competence_level {
                CompetenceLevel::Novice => areas.push(ImprovementArea {
                    area: format!("Unsafe technique: {}", a.action),
                    detail: format!(
                        "Performed at {} with dangerous technique",
                        a.timestamp_formatted
                    ),
                    priority: ImprovementPriority::High,
                }),
                CompetenceLevel::Developing => areas.push(ImprovementArea {
                    area: format!("Earlier intervention: {}", a.action),
                    detail: format!(
                        "Performed at {} while the patient was {}",
                        a.timestamp_formatted, a.patient_state_at_action
                    ),
                    priority: ImprovementPriority::Moderate,
                }),
                CompetenceLevel::Exemplary | CompetenceLevel::Competent => {}
            }
        }
        for w in &self.medication_warnings {
            areas.push(ImprovementArea {
                area: format!("Medication safety: {}", w.drug),
                detail: w.warning.message().to_string(),
                priority: ImprovementPriority::Moderate,
            });
        }
        areas.sort_by_key(|a| a.priority);

        // Teaching points, deduplicated in order of appearance.
        let mut teaching_points: Vec<String> = Vec::new();
        let candidates = safety_gate
            .failures
            .iter()
            .map(|f| f.teaching_point.clone())
            .chain(
                competence
                    .actions
                    .iter()
                    .filter_map(|a| a.feedback.as_ref().map(|f| f.teaching_point.clone())),
            )
            .chain(
                missed
                    .iter()
                    .filter(|m| m.importance == Importance::Critical)
                    .filter_map(|m| m.clinical_anchor.clone()),
            );
        for point in candidates {
            if !point.trim().is_empty() && !teaching_points.contains(&point) {
                teaching_points.push(point);
            }
        }

        let report = AarReport {
            scenario_id: self.blueprint.scenario_id.clone(),
            scenario_title: self.blueprint.metadata.title.clone(),
            scenario_type: self.blueprint.metadata.scenario_type.clone(),
            generated_at,
            end_reason,
            summary: ReportSummary {
                duration_minutes: progression.duration_minutes,
                total_actions: self.timeline.len(),
                checklist_completed: self.completed.len(),
                checklist_total: checklist.len(),
                critical_completed: critical_total - critical_missed,
                critical_total,
                final_state: progression.final_state,
                critical_treatment_given: progression.critical_treatment_given,
            },
            progress_milestones: MilestoneReport {
                completed: self.milestones.completed_milestones(),
                acknowledgement: self.milestones.aar_description(),
                summary: milestone_summary,
            },
            timeline: self
                .timeline
                .iter()
                .map(|r| TimelineEntry {
                    action_type: r.action_type.clone(),
                    name: r.name.clone(),
                    action_id: r.action_id.clone(),
                    minutes_mark: r.minutes_mark,
                    timestamp_formatted: r.timestamp.to_string(),
                })
                .collect(),
            missed_actions: missed,
            medication_warnings: self.medication_warnings.clone(),
            strengths,
            areas_for_improvement: areas,
            teaching_points,
            competence_assessment: competence,
            safety_gate,
            patient_progression: progression,
        };
        info!(
            scenario_id = %report.scenario_id,
            overall = %report.competence_assessment.overall,
            safety_passed = report.safety_gate.passed,
            "AAR report generated"
        );
        report
    }
}

/// Qualitative overall verdict.
fn overall_verdict(
    safety_passed: bool,
    distribution: &CompetenceDistribution,
    missed_critical: bool,
) -> (CompetenceLevel, &'static str) {
    let total = distribution.total();
    if !safety_passed {
        return (CompetenceLevel::Novice, "Critical safety failures identified");
    }
    if total == 0 {
        return (CompetenceLevel::Novice, "No critical actions were completed");
    }
    if distribution.novice > 0 {
        return (CompetenceLevel::Developing, "At least one action used unsafe technique");
    }
    if missed_critical {
        return (CompetenceLevel::Developing, "One or more critical actions were missed");
    }
    if distribution.exemplary * 2 >= total && distribution.developing == 0 {
        return (
            CompetenceLevel::Exemplary,
            "Consistently intervened before the patient deteriorated",
        );
    }
    if (distribution.exemplary + distribution.competent) * 2 >= total {
        return (
            CompetenceLevel::Competent,
            "Stabilised the patient before major deterioration",
        );
    }
    (
        CompetenceLevel::Developing,
        "Most actions came after the patient had already deteriorated",
    )
}
