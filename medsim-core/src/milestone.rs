//! Universal progress milestones.
//!
//! Six fixed milestones exist in every scenario; a blueprint only supplies
//! which action ids complete them (and may reword their names). Completion
//! is one-way and idempotent.
//!
//! Milestones are positive reinforcement only: the tracker exposes what was
//! completed and never an explicit "missed" signal.

use crate::blueprint::ScenarioBlueprint;
use crate::types::{SimTimestamp, round_minutes};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// The six universal milestones: `(id, name, description)`.
pub const UNIVERSAL_MILESTONES: [(&str, &str, &str); 6] = [
    ("UM1", "Scene Safety", "Confirmed the scene is safe and used appropriate protection"),
    ("UM2", "Recognition", "Recognised the primary clinical problem"),
    ("UM3", "Breathing Support", "Supported the airway and breathing"),
    ("UM4", "Critical Treatment", "Delivered the scenario's critical treatment"),
    ("UM5", "Assessment", "Completed a structured assessment"),
    ("UM6", "Monitoring", "Reassessed and monitored the response"),
];

#[derive(Debug, Clone)]
struct Milestone {
    id: String,
    name: String,
    description: String,
    completed_at: Option<SimTimestamp>,
}

/// A completed milestone, as exposed to consumers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletedMilestone {
    /// Milestone id, e.g. `"UM3"`.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Description.
    pub description: String,
    /// Minutes into the scenario.
    pub timestamp_minutes: f64,
    /// `MM:SS`.
    pub timestamp_formatted: String,
}

/// Status of one milestone, completed or not.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MilestoneStatus {
    /// Milestone id.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Description.
    pub description: String,
    /// Whether it is completed.
    pub completed: bool,
    /// Completion minute.
    pub timestamp_minutes: Option<f64>,
    /// Completion `MM:SS`.
    pub timestamp_formatted: Option<String>,
}

/// Aggregate milestone progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MilestoneSummary {
    /// Whether tracking is active for this scenario.
    pub enabled: bool,
    /// Number of milestones.
    pub total_milestones: usize,
    /// Number completed.
    pub completed: usize,
    /// `completed / total`, 0 when disabled.
    pub completion_rate: f64,
    /// Per-milestone status.
    pub milestones: Vec<MilestoneStatus>,
    /// Whether enough milestones were completed to call the approach
    /// systematic.
    pub systematic_approach: bool,
}

/// Tracks milestone completion for one scenario.
#[derive(Debug, Clone)]
pub struct MilestoneTracker {
    enabled: bool,
    milestones: Vec<Milestone>,
    mappings: Vec<(usize, Vec<String>)>,
    systematic_threshold: usize,
}

impl MilestoneTracker {
    /// Build from a blueprint. A missing or disabled `progress_milestones`
    /// section yields a tracker that answers every query with empty data.
    #[must_use]
    pub fn new(blueprint: &ScenarioBlueprint, systematic_threshold: usize) -> Self {
        let Some(config) = blueprint.progress_milestones.as_ref().filter(|c| c.enabled) else {
            return Self {
                enabled: false,
                milestones: Vec::new(),
                mappings: Vec::new(),
                systematic_threshold,
            };
        };

        let mut milestones: Vec<Milestone> = UNIVERSAL_MILESTONES
            .iter()
            .map(|(id, name, description)| Milestone {
                id: (*id).to_string(),
                name: (*name).to_string(),
                description: (*description).to_string(),
                completed_at: None,
            })
            .collect();

        for (id, definition) in &config.milestone_definitions {
            match milestones.iter_mut().find(|m| &m.id == id) {
                Some(milestone) => {
                    milestone.name.clone_from(&definition.name);
                    if !definition.description.is_empty() {
                        milestone.description.clone_from(&definition.description);
                    }
                }
                None => warn!(
                    scenario_id = %blueprint.scenario_id,
                    milestone_id = %id,
                    "Unknown milestone in definitions, ignored"
                ),
            }
        }

        let mut mappings = Vec::new();
        for (id, mapping) in &config.milestone_mappings {
            match milestones.iter().position(|m| &m.id == id) {
                Some(idx) => mappings.push((idx, mapping.trigger_actions.clone())),
                None => warn!(
                    scenario_id = %blueprint.scenario_id,
                    milestone_id = %id,
                    "Unknown milestone in mappings, ignored"
                ),
            }
        }
        mappings.sort_by_key(|(idx, _)| *idx);

        Self {
            enabled: true,
            milestones,
            mappings,
            systematic_threshold,
        }
    }

    /// Whether tracking is active.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Complete the first not-yet-completed milestone that `action_id`
    /// triggers. Returns it, or `None` if nothing new was completed.
    pub fn check_action(
        &mut self,
        action_id: &str,
        now: SimTimestamp,
    ) -> Option<CompletedMilestone> {
        if !self.enabled {
            return None;
        }
        let candidates: Vec<usize> = self
            .mappings
            .iter()
            .filter(|(_, triggers)| triggers.iter().any(|t| t == action_id))
            .map(|(idx, _)| *idx)
            .collect();
        candidates.into_iter().find_map(|idx| self.complete_index(idx, now))
    }

    /// Complete a milestone by id. Unknown ids are logged and ignored;
    /// already-completed milestones keep their original timestamp.
    pub fn complete_milestone(
        &mut self,
        milestone_id: &str,
        now: SimTimestamp,
    ) -> Option<CompletedMilestone> {
        if !self.enabled {
            return None;
        }
        let Some(idx) = self.milestones.iter().position(|m| m.id == milestone_id) else {
            warn!(milestone_id, "Unknown milestone id");
            return None;
        };
        self.complete_index(idx, now)
    }

    fn complete_index(&mut self, idx: usize, now: SimTimestamp) -> Option<CompletedMilestone> {
        let milestone = &mut self.milestones[idx];
        if milestone.completed_at.is_some() {
            return None;
        }
        milestone.completed_at = Some(now);
        info!(
            milestone_id = %milestone.id,
            name = %milestone.name,
            elapsed_min = round_minutes(now.minutes()),
            "Milestone completed"
        );
        Some(completed_view(milestone, now))
    }

    /// Completed milestones in milestone order.
    #[must_use]
    pub fn completed_milestones(&self) -> Vec<CompletedMilestone> {
        self.milestones
            .iter()
            .filter_map(|m| m.completed_at.map(|at| completed_view(m, at)))
            .collect()
    }

    /// Status of every milestone.
    #[must_use]
    pub fn all_milestones(&self) -> Vec<MilestoneStatus> {
        self.milestones
            .iter()
            .map(|m| MilestoneStatus {
                id: m.id.clone(),
                name: m.name.clone(),
                description: m.description.clone(),
                completed: m.completed_at.is_some(),
                timestamp_minutes: m.completed_at.map(|at| round_minutes(at.minutes())),
                timestamp_formatted: m.completed_at.map(|at| at.to_string()),
            })
            .collect()
    }

    /// Aggregate progress.
    #[must_use]
    pub fn summary(&self) -> MilestoneSummary {
        let total = self.milestones.len();
        let completed = self.milestones.iter().filter(|m| m.completed_at.is_some()).count();
        MilestoneSummary {
            enabled: self.enabled,
            total_milestones: total,
            completed,
            completion_rate: if total > 0 { completed as f64 / total as f64 } else { 0.0 },
            milestones: self.all_milestones(),
            systematic_approach: self.enabled && completed >= self.systematic_threshold,
        }
    }

    /// Positive-only debrief text acknowledging what was completed.
    /// `None` when disabled or nothing was completed.
    #[must_use]
    pub fn aar_description(&self) -> Option<String> {
        if !self.enabled {
            return None;
        }
        let completed = self.completed_milestones();
        if completed.is_empty() {
            return None;
        }
        if completed.len() == self.milestones.len() {
            return Some(
                "You followed a systematic approach throughout the scenario, completing all \
                 progress milestones: scene safety, recognition, breathing support, critical \
                 treatment, assessment, and monitoring. This structure will serve you well in \
                 chaotic real-world situations."
                    .to_string(),
            );
        }
        let names = |take: usize| {
            completed
                .iter()
                .take(take)
                .map(|m| m.name.to_lowercase())
                .collect::<Vec<_>>()
                .join(", ")
        };
        if completed.len() >= 4 {
            Some(format!(
                "I noticed you followed a systematic approach through several key stages: {}. \
                 This organized progression helps ensure nothing critical is missed.",
                names(completed.len())
            ))
        } else {
            Some(format!("You completed several important steps including {}.", names(3)))
        }
    }
}

fn completed_view(milestone: &Milestone, at: SimTimestamp) -> CompletedMilestone {
    CompletedMilestone {
        id: milestone.id.clone(),
        name: milestone.name.clone(),
        description: milestone.description.clone(),
        timestamp_minutes: round_minutes(at.minutes()),
        timestamp_formatted: at.to_string(),
    }
}
