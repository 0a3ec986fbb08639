//! Vital-sign simulation: delayed treatment effects, untreated drift, and
//! the concern/formatting views handed to the dialogue consumer.
//!
//! There is no physiological model here. Treatment effects come straight
//! from the blueprint's medication table after their onset delay, and
//! untreated drift comes from the `no_treatment_progression` table.
//! [`StateTracker`] stays the single owner of the vitals history; the
//! simulator only decides *when* to write to it.

use crate::blueprint::{NoTreatmentProgression, ScenarioBlueprint};
use crate::state::StateTracker;
use crate::types::{PatientState, SimTimestamp, VitalChanges, Vitals};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// A treatment effect waiting for its onset time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingEffect {
    /// Treatment that caused it.
    pub treatment: String,
    /// When the effect shows.
    pub due: SimTimestamp,
    /// Vital changes to apply.
    pub vital_changes: VitalChanges,
    /// Optional recovery state.
    pub state_change: Option<PatientState>,
}

/// Schedules treatment effects and applies untreated drift.
#[derive(Debug, Clone)]
pub struct VitalsSimulator {
    progression: NoTreatmentProgression,
    applied_buckets: usize,
    pending: Vec<PendingEffect>,
    applied: Vec<PendingEffect>,
}

impl VitalsSimulator {
    /// Create a simulator for a blueprint.
    #[must_use]
    pub fn new(blueprint: &ScenarioBlueprint) -> Self {
        Self {
            progression: blueprint.no_treatment_progression.clone(),
            applied_buckets: 0,
            pending: Vec::new(),
            applied: Vec::new(),
        }
    }

    /// Queue an effect, or apply it right away if it is already due.
    pub fn schedule(
        &mut self,
        effect: PendingEffect,
        tracker: &mut StateTracker,
        now: SimTimestamp,
    ) {
        if effect.due <= now {
            self.apply(effect, tracker);
        } else {
            debug!(treatment = %effect.treatment, due = %effect.due, "Treatment effect scheduled");
            self.pending.push(effect);
        }
    }

    /// Apply every pending effect due at or before `now`, in due order.
    /// Returns how many were applied.
    pub fn apply_due_effects(&mut self, tracker: &mut StateTracker, now: SimTimestamp) -> usize {
        let (mut due, waiting): (Vec<_>, Vec<_>) =
            self.pending.drain(..).partition(|e| e.due <= now);
        self.pending = waiting;
        due.sort_by_key(|e| e.due);
        let count = due.len();
        for effect in due {
            self.apply(effect, tracker);
        }
        count
    }

    fn apply(&mut self, effect: PendingEffect, tracker: &mut StateTracker) {
        tracker.apply_treatment_effect(&effect.vital_changes, effect.state_change, effect.due);
        debug!(treatment = %effect.treatment, "Treatment effect applied");
        self.applied.push(effect);
    }

    /// Untreated drift: overlay every progression step whose minute has been
    /// reached and was not applied yet. Does nothing once a critical
    /// treatment was given. Returns whether any step was applied.
    pub fn apply_time_degradation(
        &mut self,
        tracker: &mut StateTracker,
        now: SimTimestamp,
    ) -> bool {
        if tracker.has_critical_treatment() {
            return false;
        }
        let Some(latest) = self.progression.bucket_at(now.minutes()) else {
            return false;
        };
        if latest < self.applied_buckets {
            return false;
        }
        for (minute, step) in &self.progression.steps()[self.applied_buckets..=latest] {
            let reason = format!("No-treatment progression ({minute} min)");
            tracker.merge_vitals(&step.vitals, &reason, now);
        }
        self.applied_buckets = latest + 1;
        true
    }

    /// Effects still waiting for their onset.
    #[must_use]
    pub fn pending_effects(&self) -> &[PendingEffect] {
        &self.pending
    }

    /// Effects already applied, in application order.
    #[must_use]
    pub fn applied_effects(&self) -> &[PendingEffect] {
        &self.applied
    }
}

// ---------------------------------------------------------------------------
// Concern level
// ---------------------------------------------------------------------------

/// Overall concern about a vitals snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConcernLevel {
    /// Nothing abnormal.
    Normal,
    /// One abnormal finding.
    Mild,
    /// Two or more abnormal findings.
    Concerning,
    /// At least one critical finding.
    Critical,
}

/// Concern level plus the findings behind it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VitalsConcern {
    /// Overall level.
    pub level: ConcernLevel,
    /// Individual findings, e.g. "Tachycardia".
    pub concerns: Vec<String>,
}

/// Classify a vitals snapshot. Absent vitals raise no concern.
#[must_use]
pub fn concern_level(vitals: &Vitals) -> VitalsConcern {
    let mut concerns = Vec::new();
    let mut push = |finding: &str| concerns.push(finding.to_string());

    if let Some(spo2) = vitals.spo2 {
        if spo2 < 90.0 {
            push("Critical hypoxia");
        } else if spo2 < 94.0 {
            push("Moderate hypoxia");
        }
    }
    if let Some(hr) = vitals.heart_rate {
        if hr > 120.0 {
            push("Tachycardia");
        } else if hr < 50.0 {
            push("Bradycardia");
        }
    }
    if let Some(rr) = vitals.respiratory_rate {
        if rr > 30.0 {
            push("Tachypnea");
        } else if rr < 10.0 {
            push("Bradypnea - critical");
        }
    }
    if let Some(systolic) = vitals.bp_systolic {
        if systolic < 90.0 {
            push("Hypotension");
        } else if systolic > 180.0 {
            push("Hypertension");
        }
    }

    let level = if concerns.is_empty() {
        ConcernLevel::Normal
    } else if concerns.iter().any(|c| c.to_lowercase().contains("critical")) {
        ConcernLevel::Critical
    } else if concerns.len() >= 2 {
        ConcernLevel::Concerning
    } else {
        ConcernLevel::Mild
    };
    VitalsConcern { level, concerns }
}

// ---------------------------------------------------------------------------
// Formatting
// ---------------------------------------------------------------------------

/// Vitals rendered with units, for display and dialogue grounding.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormattedVitals {
    /// e.g. "96 bpm".
    #[serde(rename = "HR", skip_serializing_if = "Option::is_none")]
    pub heart_rate: Option<String>,
    /// e.g. "18 /min".
    #[serde(rename = "RR", skip_serializing_if = "Option::is_none")]
    pub respiratory_rate: Option<String>,
    /// e.g. "97%".
    #[serde(rename = "SpO2", skip_serializing_if = "Option::is_none")]
    pub spo2: Option<String>,
    /// e.g. "120/80 mmHg".
    #[serde(rename = "BP", skip_serializing_if = "Option::is_none")]
    pub blood_pressure: Option<String>,
    /// e.g. "37.2°C".
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<String>,
    /// e.g. "6/10".
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pain: Option<String>,
    /// e.g. "15".
    #[serde(rename = "GCS", skip_serializing_if = "Option::is_none")]
    pub gcs: Option<String>,
    /// e.g. "5.4 mmol/L".
    #[serde(skip_serializing_if = "Option::is_none")]
    pub glucose: Option<String>,
}

/// Whole numbers without a decimal point, everything else to one place.
fn number(value: f32) -> String {
    if value.fract() == 0.0 {
        format!("{value:.0}")
    } else {
        format!("{value:.1}")
    }
}

/// Render a vitals snapshot with units.
#[must_use]
pub fn format_vitals(vitals: &Vitals) -> FormattedVitals {
    let with = |v: Option<f32>, unit: &str| v.map(|v| format!("{}{unit}", number(v)));
    let blood_pressure = match (vitals.bp_systolic, vitals.bp_diastolic) {
        (Some(sys), Some(dia)) => Some(format!("{}/{} mmHg", number(sys), number(dia))),
        (Some(sys), None) => Some(format!("{} mmHg systolic", number(sys))),
        _ => None,
    };
    FormattedVitals {
        heart_rate: with(vitals.heart_rate, " bpm"),
        respiratory_rate: with(vitals.respiratory_rate, " /min"),
        spo2: with(vitals.spo2, "%"),
        blood_pressure,
        temperature: with(vitals.temperature, "°C"),
        pain: with(vitals.pain_score, "/10"),
        gcs: with(vitals.gcs, ""),
        glucose: with(vitals.glucose, " mmol/L"),
    }
}
