//! After-action review context across a session's scenarios.
//!
//! [`AarContextBuilder`] turns the reports of every completed scenario into a
//! single [`CrossScenarioAarContext`]: per-scenario performance, the detected
//! cross-scenario patterns, and session metadata. The context renders as
//! Markdown through [`fmt::Display`] for a human or conversational debriefer,
//! and as JSON for anything else.

use crate::error::{DebriefError, Result};
use crate::pattern::{PatternAnalysis, PatternAnalysisService};
use chrono::{DateTime, Utc};
use medsim_core::blueprint::ScenarioBlueprint;
use medsim_core::report::{AarReport, ImprovementPriority};
use medsim_core::types::{CompetenceLevel, PatientState};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::{self, Write as _};
use std::sync::Arc;
use tracing::{debug, info};

// ---------------------------------------------------------------------------
// Context types
// ---------------------------------------------------------------------------

/// Blueprint details worth repeating in a debrief.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatientSummary {
    /// Patient name.
    pub name: String,
    /// Age in years.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub age: Option<u32>,
    /// Presenting complaint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chief_complaint: Option<String>,
    /// Working diagnosis.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diagnosis: Option<String>,
    /// Known allergies.
    #[serde(default)]
    pub allergies: Vec<String>,
    /// Difficulty tag.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub difficulty: Option<String>,
}

impl From<&ScenarioBlueprint> for PatientSummary {
    fn from(blueprint: &ScenarioBlueprint) -> Self {
        let profile = &blueprint.patient_profile;
        Self {
            name: profile.name.clone(),
            age: profile.age,
            chief_complaint: profile.chief_complaint.clone(),
            diagnosis: profile.diagnosis.clone(),
            allergies: profile.allergies.clone(),
            difficulty: blueprint.metadata.difficulty.clone(),
        }
    }
}

/// Performance in one completed scenario.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioContext {
    /// Position in the session, starting at 1.
    pub index: usize,
    /// Scenario id.
    pub scenario_id: String,
    /// Title, or the id when untitled.
    pub title: String,
    /// Patient details, when the blueprint is known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patient: Option<PatientSummary>,
    /// Scenario length.
    pub duration_minutes: f64,
    /// Why it ended.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_reason: Option<String>,
    /// Qualitative verdict.
    pub overall_competence: CompetenceLevel,
    /// Why.
    pub overall_reason: String,
    /// Patient state at the end.
    pub final_state: PatientState,
    /// Worst state visited.
    pub worst_state: PatientState,
    /// `completed/total`.
    pub checklist: String,
    /// Completed checklist items as `id (LEVEL) at MM:SS`.
    pub completed_actions: Vec<String>,
    /// Missed checklist items with their importance.
    pub missed_actions: Vec<String>,
    /// Safety failures as `id type: description`.
    pub safety_failures: Vec<String>,
    /// Treatment warnings.
    pub medication_warnings: Vec<String>,
    /// Milestones reached, `completed/total`.
    pub milestones: String,
    /// What went well.
    pub strengths: Vec<String>,
    /// High-priority improvement areas.
    pub priority_improvements: Vec<String>,
    /// Teaching points.
    pub teaching_points: Vec<String>,
}

/// Session-level facts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionMetadata {
    /// Sum of scenario durations.
    pub total_duration_minutes: f64,
    /// When the session was closed.
    pub completed_at: DateTime<Utc>,
}

/// Everything a debriefer needs about a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrossScenarioAarContext {
    /// Completed scenarios.
    pub total_scenarios: usize,
    /// Per-scenario detail, in completion order.
    pub scenarios: Vec<ScenarioContext>,
    /// Cross-scenario patterns.
    pub cross_scenario_patterns: PatternAnalysis,
    /// Session facts.
    pub session_metadata: SessionMetadata,
}

impl CrossScenarioAarContext {
    /// Pretty-printed JSON.
    ///
    /// # Errors
    /// Returns [`DebriefError::Serialization`] if serialisation fails.
    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Builds a [`CrossScenarioAarContext`] from completed reports.
#[derive(Debug, Clone, Default)]
pub struct AarContextBuilder {
    patterns: PatternAnalysisService,
    blueprints: BTreeMap<String, Arc<ScenarioBlueprint>>,
}

impl AarContextBuilder {
    /// A builder with default pattern thresholds.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a specific pattern service.
    #[must_use]
    pub fn with_pattern_service(mut self, patterns: PatternAnalysisService) -> Self {
        self.patterns = patterns;
        self
    }

    /// Attach a blueprint so its scenario gets a patient summary.
    #[must_use]
    pub fn with_blueprint(mut self, blueprint: Arc<ScenarioBlueprint>) -> Self {
        self.blueprints.insert(blueprint.scenario_id.clone(), blueprint);
        self
    }

    /// Build the context.
    ///
    /// # Errors
    /// Returns [`DebriefError::NoCompletedScenarios`] if `reports` is empty.
    pub fn build(
        &self,
        reports: &[AarReport],
        completed_at: DateTime<Utc>,
    ) -> Result<CrossScenarioAarContext> {
        if reports.is_empty() {
            return Err(DebriefError::NoCompletedScenarios);
        }

        let scenarios: Vec<ScenarioContext> = reports
            .iter()
            .enumerate()
            .map(|(i, report)| self.scenario_context(i + 1, report))
            .collect();
        let total_duration_minutes =
            reports.iter().map(|r| r.summary.duration_minutes).sum::<f64>();
        let cross_scenario_patterns = self.patterns.analyze(reports);

        info!(
            scenarios = scenarios.len(),
            total_duration_minutes,
            patterns = cross_scenario_patterns.summary.patterns_detected,
            "Built cross-scenario AAR context"
        );

        Ok(CrossScenarioAarContext {
            total_scenarios: scenarios.len(),
            scenarios,
            cross_scenario_patterns,
            session_metadata: SessionMetadata {
                total_duration_minutes,
                completed_at,
            },
        })
    }

    fn scenario_context(&self, index: usize, report: &AarReport) -> ScenarioContext {
        let patient = self
            .blueprints
            .get(&report.scenario_id)
            .map(|b| PatientSummary::from(b.as_ref()));
        if patient.is_none() {
            debug!(
                scenario_id = %report.scenario_id,
                "No blueprint attached, patient summary omitted"
            );
        }
        let summary = &report.summary;
        let milestones = &report.progress_milestones.summary;

        ScenarioContext {
            index,
            scenario_id: report.scenario_id.clone(),
            title: report.scenario_title.clone().unwrap_or_else(|| report.scenario_id.clone()),
            patient,
            duration_minutes: summary.duration_minutes,
            end_reason: report.end_reason.map(|r| r.to_string()),
            overall_competence: report.competence_assessment.overall,
            overall_reason: report.competence_assessment.overall_reason.clone(),
            final_state: summary.final_state,
            worst_state: report.patient_progression.worst_state_reached,
            checklist: format!("{}/{}", summary.checklist_completed, summary.checklist_total),
            completed_actions: report
                .competence_assessment
                .actions
                .iter()
                .map(|a| {
                    format!(
                        "{} {} ({}) at {}",
                        a.checklist_id,
                        a.action,
                        a.competence_level.label(),
                        a.timestamp_formatted
                    )
                })
                .collect(),
            missed_actions: report
                .missed_actions
                .iter()
                .map(|m| format!("{} {} [{}]", m.checklist_id, m.action, m.importance))
                .collect(),
            safety_failures: report
                .safety_gate
                .failures
                .iter()
                .map(|f| format!("{} {}: {}", f.id, f.failure_type, f.description))
                .collect(),
            medication_warnings: report
                .medication_warnings
                .iter()
                .map(|w| format!("{}: {}", w.drug, w.warning.message()))
                .collect(),
            milestones: format!("{}/{}", milestones.completed, milestones.total_milestones),
            strengths: report.strengths.clone(),
            priority_improvements: report
                .areas_for_improvement
                .iter()
                .filter(|a| a.priority == ImprovementPriority::High)
                .map(|a| format!("{}: {}", a.area, a.detail))
                .collect(),
            teaching_points: report.teaching_points.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Markdown rendering
// ---------------------------------------------------------------------------

fn bullet_list(out: &mut fmt::Formatter<'_>, heading: &str, items: &[String]) -> fmt::Result {
    if items.is_empty() {
        return Ok(());
    }
    writeln!(out, "**{heading}:**")?;
    for item in items {
        writeln!(out, "- {item}")?;
    }
    Ok(())
}

impl fmt::Display for ScenarioContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "### Scenario {}: {}", self.index, self.title)?;
        if let Some(patient) = &self.patient {
            let mut line = format!("**Patient:** {}", patient.name);
            if let Some(age) = patient.age {
                let _ = write!(line, ", {age}");
            }
            if let Some(complaint) = &patient.chief_complaint {
                let _ = write!(line, ", {complaint}");
            }
            writeln!(f, "{line}")?;
            if !patient.allergies.is_empty() {
                writeln!(f, "**Allergies:** {}", patient.allergies.join(", "))?;
            }
        }
        writeln!(
            f,
            "**Duration:** {:.1} min | **Ended:** {} | **Final state:** {} | **Worst state:** {}",
            self.duration_minutes,
            self.end_reason.as_deref().unwrap_or("in progress"),
            self.final_state,
            self.worst_state
        )?;
        writeln!(
            f,
            "**Overall:** {} ({}) | **Checklist:** {} | **Milestones:** {}",
            self.overall_competence.label(),
            self.overall_reason,
            self.checklist,
            self.milestones
        )?;
        bullet_list(f, "Completed actions", &self.completed_actions)?;
        bullet_list(f, "Missed actions", &self.missed_actions)?;
        bullet_list(f, "Safety failures", &self.safety_failures)?;
        bullet_list(f, "Medication warnings", &self.medication_warnings)?;
        bullet_list(f, "Strengths", &self.strengths)?;
        bullet_list(f, "Priority improvements", &self.priority_improvements)?;
        bullet_list(f, "Teaching points", &self.teaching_points)
    }
}

impl fmt::Display for CrossScenarioAarContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "# After-Action Review")?;
        writeln!(
            f,
            "{} completed, {:.1} minutes total, closed {}",
            if self.total_scenarios == 1 {
                "1 scenario".to_string()
            } else {
                format!("{} scenarios", self.total_scenarios)
            },
            self.session_metadata.total_duration_minutes,
            self.session_metadata.completed_at.format("%Y-%m-%d %H:%M UTC")
        )?;
        writeln!(f)?;
        writeln!(f, "## Scenarios")?;
        for scenario in &self.scenarios {
            writeln!(f)?;
            write!(f, "{scenario}")?;
        }
        writeln!(f)?;

        let patterns = &self.cross_scenario_patterns;
        writeln!(f, "## Cross-Scenario Patterns")?;
        writeln!(f, "{}", patterns.summary.message)?;
        for pattern in patterns.detected() {
            writeln!(f)?;
            let tag = if pattern.is_strength {
                "STRENGTH".to_string()
            } else {
                pattern.severity.map_or_else(|| "CONCERN".to_string(), |s| s.to_string())
            };
            writeln!(f, "### {} [{tag}]", pattern.kind)?;
            if let Some(focus) = &pattern.educational_focus {
                writeln!(f, "*{focus}*")?;
            }
            for evidence in &pattern.evidence {
                writeln!(f, "- {evidence}")?;
            }
            if let Some(talking_point) = &pattern.talking_point {
                writeln!(f, "> {talking_point}")?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_session_is_an_error() {
        let err = AarContextBuilder::new().build(&[], Utc::now()).unwrap_err();
        assert!(matches!(err, DebriefError::NoCompletedScenarios));
    }
}
