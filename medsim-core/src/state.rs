//! Patient state tracking.
//!
//! [`StateTracker`] owns the authoritative, append-only history of the
//! patient's clinical state and vital signs. Competence assessment asks it
//! retrospective questions ("what state was the patient in at minute 4.2,
//! and 2.5 minutes later?"), so every change is stamped with the
//! [`SimTimestamp`] it happened at.
//!
//! Histories are kept in a [`Timeline`], which answers "last entry at or
//! before `t`" with a binary search.

use crate::blueprint::ScenarioBlueprint;
use crate::config::EngineConfig;
use crate::types::{PatientState, SimTimestamp, VitalChanges, Vitals, round_minutes};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

// ---------------------------------------------------------------------------
// Timeline
// ---------------------------------------------------------------------------

/// Anything stamped with a simulation time.
pub trait Timestamped {
    /// When this entry happened.
    fn timestamp(&self) -> SimTimestamp;
}

/// Append-only, time-ordered history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Timeline<T> {
    entries: Vec<T>,
}

impl<T: Timestamped> Timeline<T> {
    /// A timeline seeded with its first entry.
    #[must_use]
    pub fn new(first: T) -> Self {
        Self { entries: vec![first] }
    }

    /// Append an entry. Entries older than the last one are stamped at the
    /// last entry's time by the caller; this only debug-asserts the order.
    pub fn push(&mut self, entry: T) {
        debug_assert!(
            self.entries
                .last()
                .is_none_or(|last| last.timestamp() <= entry.timestamp()),
            "timeline entries must be pushed in time order"
        );
        self.entries.push(entry);
    }

    /// The last entry at or before `t`, if any.
    #[must_use]
    pub fn at_or_before(&self, t: SimTimestamp) -> Option<&T> {
        let idx = self.entries.partition_point(|e| e.timestamp() <= t);
        idx.checked_sub(1).map(|i| &self.entries[i])
    }

    /// First entry.
    #[must_use]
    pub fn first(&self) -> Option<&T> {
        self.entries.first()
    }

    /// Latest entry.
    #[must_use]
    pub fn last(&self) -> Option<&T> {
        self.entries.last()
    }

    /// All entries, oldest first.
    #[must_use]
    pub fn entries(&self) -> &[T] {
        &self.entries
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the timeline is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// One state transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateRecord {
    /// State entered.
    pub state: PatientState,
    /// State left, absent for the initial entry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_state: Option<PatientState>,
    /// When it happened.
    pub timestamp: SimTimestamp,
    /// Elapsed minutes, rounded to two decimals.
    pub elapsed_minutes: f64,
    /// Why it happened.
    pub reason: String,
}

impl Timestamped for StateRecord {
    fn timestamp(&self) -> SimTimestamp {
        self.timestamp
    }
}

/// One vitals snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VitalsRecord {
    /// Full snapshot after the change.
    pub vitals: Vitals,
    /// When it happened.
    pub timestamp: SimTimestamp,
    /// Elapsed minutes, rounded to two decimals.
    pub elapsed_minutes: f64,
    /// What changed the vitals.
    pub reason: String,
}

impl Timestamped for VitalsRecord {
    fn timestamp(&self) -> SimTimestamp {
        self.timestamp
    }
}

/// One administered treatment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreatmentRecord {
    /// Treatment name.
    pub name: String,
    /// Dose as given.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dose: Option<String>,
    /// When it was given.
    pub timestamp: SimTimestamp,
    /// Elapsed minutes, rounded to two decimals.
    pub elapsed_minutes: f64,
    /// Whether it is a life-saving treatment.
    pub is_critical: bool,
}

/// Before/after evidence for judging one action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssessmentData {
    /// The action being judged.
    pub action_id: String,
    /// When the action happened.
    pub action_timestamp: SimTimestamp,
    /// Elapsed minutes at the action.
    pub action_minutes: f64,
    /// Patient state when the action happened.
    pub patient_state_at_action: PatientState,
    /// Patient state one assessment window later.
    pub patient_state_after: PatientState,
    /// Vitals when the action happened.
    pub vitals_at_action: Vitals,
    /// Vitals one assessment window later.
    pub vitals_after: Vitals,
}

/// State progression summary for the debrief report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateProgressionSummary {
    /// Scenario id.
    pub scenario_id: String,
    /// Scenario length so far.
    pub duration_minutes: f64,
    /// Always `initial`.
    pub initial_state: PatientState,
    /// State at report time.
    pub final_state: PatientState,
    /// Number of transitions after the initial entry.
    pub state_transitions: usize,
    /// Whether a life-saving treatment was given.
    pub critical_treatment_given: bool,
    /// Most severe state visited.
    pub worst_state_reached: PatientState,
    /// Full transition history.
    pub state_history: Vec<StateRecord>,
    /// Vitals at scenario start.
    pub initial_vitals: Vitals,
    /// Vitals at report time.
    pub final_vitals: Vitals,
}

// ---------------------------------------------------------------------------
// StateTracker
// ---------------------------------------------------------------------------

/// Time-indexed patient state and vitals.
#[derive(Debug, Clone)]
pub struct StateTracker {
    scenario_id: String,
    thresholds: [f64; 3],
    assessment_window_minutes: f64,
    current_state: PatientState,
    state_history: Timeline<StateRecord>,
    current_vitals: Vitals,
    vitals_history: Timeline<VitalsRecord>,
    critical_treatment_given: bool,
    treatments: Vec<TreatmentRecord>,
    last_update: SimTimestamp,
}

impl StateTracker {
    /// Start tracking a fresh scenario.
    #[must_use]
    pub fn new(blueprint: &ScenarioBlueprint, config: &EngineConfig) -> Self {
        let start = SimTimestamp::START;
        Self {
            scenario_id: blueprint.scenario_id.clone(),
            thresholds: blueprint.simulation_config.deterioration_timing_minutes,
            assessment_window_minutes: config.assessment_window_minutes,
            current_state: PatientState::Initial,
            state_history: Timeline::new(StateRecord {
                state: PatientState::Initial,
                previous_state: None,
                timestamp: start,
                elapsed_minutes: 0.0,
                reason: "Scenario start".to_string(),
            }),
            current_vitals: blueprint.initial_vitals,
            vitals_history: Timeline::new(VitalsRecord {
                vitals: blueprint.initial_vitals,
                timestamp: start,
                elapsed_minutes: 0.0,
                reason: "Initial vitals".to_string(),
            }),
            critical_treatment_given: false,
            treatments: Vec::new(),
            last_update: start,
        }
    }

    /// Histories are append-only, so a caller passing an older `now` is
    /// stamped at the latest known time instead.
    fn stamp(&mut self, now: SimTimestamp) -> SimTimestamp {
        let at = now.max(self.last_update);
        self.last_update = at;
        at
    }

    /// Current clinical state.
    #[must_use]
    pub fn current_state(&self) -> PatientState {
        self.current_state
    }

    /// Current vitals.
    #[must_use]
    pub fn current_vitals(&self) -> Vitals {
        self.current_vitals
    }

    /// Whether a life-saving treatment has been given.
    #[must_use]
    pub fn has_critical_treatment(&self) -> bool {
        self.critical_treatment_given
    }

    /// State at time `t`: the last transition at or before `t`.
    #[must_use]
    pub fn state_at(&self, t: SimTimestamp) -> PatientState {
        self.state_history
            .at_or_before(t)
            .map_or(PatientState::Initial, |r| r.state)
    }

    /// Vitals at time `t`: the last snapshot at or before `t`.
    #[must_use]
    pub fn vitals_at(&self, t: SimTimestamp) -> Vitals {
        self.vitals_history
            .at_or_before(t)
            .or_else(|| self.vitals_history.first())
            .map(|r| r.vitals)
            .unwrap_or_default()
    }

    /// Move to `new_state`. Returns `false` (and records nothing) if the
    /// patient is already in that state.
    pub fn transition_to(
        &mut self,
        new_state: PatientState,
        reason: &str,
        now: SimTimestamp,
    ) -> bool {
        if new_state == self.current_state {
            return false;
        }
        let at = self.stamp(now);
        let previous = self.current_state;
        self.current_state = new_state;
        self.state_history.push(StateRecord {
            state: new_state,
            previous_state: Some(previous),
            timestamp: at,
            elapsed_minutes: round_minutes(at.minutes()),
            reason: reason.to_string(),
        });
        info!(
            scenario_id = %self.scenario_id,
            from = %previous,
            to = %new_state,
            elapsed_min = round_minutes(at.minutes()),
            reason,
            "Patient state transition"
        );
        true
    }

    /// Record an administered treatment. A critical treatment permanently
    /// suspends automatic deterioration.
    pub fn record_treatment(
        &mut self,
        name: &str,
        dose: Option<&str>,
        is_critical: bool,
        now: SimTimestamp,
    ) {
        let at = self.stamp(now);
        self.treatments.push(TreatmentRecord {
            name: name.to_string(),
            dose: dose.map(str::to_string),
            timestamp: at,
            elapsed_minutes: round_minutes(at.minutes()),
            is_critical,
        });
        if is_critical && !self.critical_treatment_given {
            self.critical_treatment_given = true;
            info!(scenario_id = %self.scenario_id, treatment = name, "Critical treatment given");
        }
    }

    /// Apply a treatment's effect: vital changes, then an optional move to
    /// `improving` or `stable`.
    pub fn apply_treatment_effect(
        &mut self,
        vital_changes: &VitalChanges,
        state_change: Option<PatientState>,
        now: SimTimestamp,
    ) {
        if !vital_changes.is_empty() {
            self.update_vitals(vital_changes, "Treatment effect", now);
        }
        match state_change {
            Some(PatientState::Improving) => {
                self.transition_to(PatientState::Improving, "Response to treatment", now);
            }
            Some(PatientState::Stable) => {
                self.transition_to(PatientState::Stable, "Stabilized after treatment", now);
            }
            Some(other) => {
                debug!(state = %other, "Ignoring non-recovery state change from treatment");
            }
            None => {}
        }
    }

    /// Apply absolute/relative vital changes and snapshot the result.
    pub fn update_vitals(&mut self, changes: &VitalChanges, reason: &str, now: SimTimestamp) {
        let mut vitals = self.current_vitals;
        vitals.apply(changes);
        self.push_vitals(vitals, reason, now);
    }

    /// Overlay a partial snapshot and record the result.
    pub fn merge_vitals(&mut self, partial: &Vitals, reason: &str, now: SimTimestamp) {
        let mut vitals = self.current_vitals;
        vitals.merge(partial);
        self.push_vitals(vitals, reason, now);
    }

    fn push_vitals(&mut self, vitals: Vitals, reason: &str, now: SimTimestamp) {
        let at = self.stamp(now);
        self.current_vitals = vitals;
        self.vitals_history.push(VitalsRecord {
            vitals,
            timestamp: at,
            elapsed_minutes: round_minutes(at.minutes()),
            reason: reason.to_string(),
        });
        debug!(
            scenario_id = %self.scenario_id,
            elapsed_min = round_minutes(at.minutes()),
            reason,
            "Vitals updated"
        );
    }

    /// Untreated deterioration: move to the worst state whose threshold has
    /// been crossed, never regressing. No-op once a critical treatment was
    /// given. Returns the new state if a transition happened.
    pub fn update_state_based_on_time(&mut self, now: SimTimestamp) -> Option<PatientState> {
        if self.critical_treatment_given {
            return None;
        }
        let elapsed = now.minutes();
        let [early, deteriorating, critical] = self.thresholds;
        let current = self.current_state;

        let target = if elapsed >= critical && current != PatientState::Critical {
            PatientState::Critical
        } else if elapsed >= deteriorating
            && !matches!(current, PatientState::Deteriorating | PatientState::Critical)
        {
            PatientState::Deteriorating
        } else if elapsed >= early && current == PatientState::Initial {
            PatientState::EarlyDeteriorating
        } else {
            return None;
        };

        // Never step from a worse deterioration stage back to a milder one,
        // nor out of a treatment-driven recovery.
        if current.is_recovering() || target.severity() <= current.severity() {
            return None;
        }
        self.transition_to(target, "Time-based deterioration (no treatment)", now)
            .then_some(target)
    }

    /// Sample state and vitals at an action and one assessment window later.
    #[must_use]
    pub fn assessment_data_for_action(&self, action_id: &str, at: SimTimestamp) -> AssessmentData {
        let after = at.after_minutes(self.assessment_window_minutes);
        AssessmentData {
            action_id: action_id.to_string(),
            action_timestamp: at,
            action_minutes: round_minutes(at.minutes()),
            patient_state_at_action: self.state_at(at),
            patient_state_after: self.state_at(after),
            vitals_at_action: self.vitals_at(at),
            vitals_after: self.vitals_at(after),
        }
    }

    /// State transitions, oldest first.
    #[must_use]
    pub fn state_history(&self) -> &[StateRecord] {
        self.state_history.entries()
    }

    /// Vitals snapshots, oldest first.
    #[must_use]
    pub fn vitals_history(&self) -> &[VitalsRecord] {
        self.vitals_history.entries()
    }

    /// Treatments, oldest first.
    #[must_use]
    pub fn treatments(&self) -> &[TreatmentRecord] {
        &self.treatments
    }

    /// Most severe state ever visited. Earlier entries win ties.
    #[must_use]
    pub fn worst_state_reached(&self) -> PatientState {
        self.state_history
            .entries()
            .iter()
            .map(|r| r.state)
            .fold(PatientState::Initial, |worst, s| {
                if s.severity() > worst.severity() { s } else { worst }
            })
    }

    /// Progression summary for the report.
    #[must_use]
    pub fn summary(&self, now: SimTimestamp) -> StateProgressionSummary {
        StateProgressionSummary {
            scenario_id: self.scenario_id.clone(),
            duration_minutes: round_minutes(now.max(self.last_update).minutes()),
            initial_state: PatientState::Initial,
            final_state: self.current_state,
            state_transitions: self.state_history.len().saturating_sub(1),
            critical_treatment_given: self.critical_treatment_given,
            worst_state_reached: self.worst_state_reached(),
            state_history: self.state_history.entries().to_vec(),
            initial_vitals: self.vitals_history.first().map(|r| r.vitals).unwrap_or_default(),
            final_vitals: self.current_vitals,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{VitalChange, VitalSign};

    fn blueprint(thresholds: [f64; 3]) -> ScenarioBlueprint {
        let json = format!(
            r#"{{
                "scenario_id": "STATE_TEST",
                "patient_profile": {{ "name": "Alex" }},
                "initial_vitals": {{ "HR": 110, "SpO2": 92 }},
                "simulation_config": {{ "deterioration_timing_minutes": [{}, {}, {}] }}
            }}"#,
            thresholds[0], thresholds[1], thresholds[2]
        );
        ScenarioBlueprint::from_json_str(&json).expect("valid blueprint")
    }

    fn tracker(thresholds: [f64; 3]) -> StateTracker {
        StateTracker::new(&blueprint(thresholds), &EngineConfig::default())
    }

    #[test]
    fn deteriorates_through_thresholds() {
        let mut t = tracker([5.0, 10.0, 15.0]);
        t.update_state_based_on_time(SimTimestamp::from_minutes(6.0));
        assert_eq!(t.current_state(), PatientState::EarlyDeteriorating);
        t.update_state_based_on_time(SimTimestamp::from_minutes(11.0));
        assert_eq!(t.current_state(), PatientState::Deteriorating);
        t.update_state_based_on_time(SimTimestamp::from_minutes(16.0));
        assert_eq!(t.current_state(), PatientState::Critical);
        assert_eq!(t.state_history().len(), 4);
    }

    #[test]
    fn long_silence_jumps_straight_to_worst_state() {
        let mut t = tracker([5.0, 10.0, 15.0]);
        assert_eq!(
            t.update_state_based_on_time(SimTimestamp::from_minutes(17.0)),
            Some(PatientState::Critical)
        );
        assert_eq!(t.state_history().len(), 2);
    }

    #[test]
    fn critical_treatment_stops_deterioration() {
        let mut t = tracker([5.0, 10.0, 15.0]);
        t.record_treatment("adrenaline", Some("0.5 mg"), true, SimTimestamp::from_minutes(2.0));
        assert_eq!(t.update_state_based_on_time(SimTimestamp::from_minutes(16.0)), None);
        assert_eq!(t.current_state(), PatientState::Initial);
    }

    #[test]
    fn recovery_is_not_undone_by_time() {
        let mut t = tracker([5.0, 10.0, 15.0]);
        let at = SimTimestamp::from_minutes(3.0);
        t.apply_treatment_effect(&VitalChanges::new(), Some(PatientState::Improving), at);
        assert_eq!(t.update_state_based_on_time(SimTimestamp::from_minutes(11.0)), None);
        assert_eq!(t.current_state(), PatientState::Improving);
    }

    #[test]
    fn retrospective_lookups_use_last_entry_at_or_before() {
        let mut t = tracker([5.0, 10.0, 15.0]);
        t.update_state_based_on_time(SimTimestamp::from_minutes(6.0));
        t.update_state_based_on_time(SimTimestamp::from_minutes(11.0));

        assert_eq!(t.state_at(SimTimestamp::from_minutes(5.9)), PatientState::Initial);
        assert_eq!(t.state_at(SimTimestamp::from_minutes(6.0)), PatientState::EarlyDeteriorating);
        assert_eq!(t.state_at(SimTimestamp::from_minutes(10.0)), PatientState::EarlyDeteriorating);
        assert_eq!(t.state_at(SimTimestamp::from_minutes(30.0)), PatientState::Deteriorating);
    }

    #[test]
    fn vitals_history_tracks_changes() {
        let mut t = tracker([5.0, 10.0, 15.0]);
        let mut changes = VitalChanges::new();
        changes.insert(VitalSign::HeartRate, VitalChange::Shift(-20.0));
        changes.insert(VitalSign::SpO2, VitalChange::Set(97.0));
        t.update_vitals(&changes, "Treatment effect", SimTimestamp::from_minutes(4.0));

        assert_eq!(t.vitals_at(SimTimestamp::from_minutes(3.0)).heart_rate, Some(110.0));
        let after = t.vitals_at(SimTimestamp::from_minutes(4.0));
        assert_eq!(after.heart_rate, Some(90.0));
        assert_eq!(after.spo2, Some(97.0));
    }

    #[test]
    fn assessment_data_samples_after_window() {
        let mut t = tracker([5.0, 10.0, 15.0]);
        let at = SimTimestamp::from_minutes(3.0);
        t.apply_treatment_effect(&VitalChanges::new(), Some(PatientState::Improving), at);
        let data = t.assessment_data_for_action("CA1", SimTimestamp::from_minutes(1.0));
        assert_eq!(data.patient_state_at_action, PatientState::Initial);
        assert_eq!(data.patient_state_after, PatientState::Improving);
    }

    #[test]
    fn stale_timestamps_keep_history_ordered() {
        let mut t = tracker([5.0, 10.0, 15.0]);
        t.transition_to(PatientState::Deteriorating, "manual", SimTimestamp::from_minutes(8.0));
        t.transition_to(PatientState::Critical, "manual", SimTimestamp::from_minutes(7.0));
        let stamps: Vec<_> = t.state_history().iter().map(|r| r.timestamp).collect();
        assert!(stamps.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn summary_reports_worst_state() {
        let mut t = tracker([5.0, 10.0, 15.0]);
        t.update_state_based_on_time(SimTimestamp::from_minutes(11.0));
        let at = SimTimestamp::from_minutes(12.0);
        t.apply_treatment_effect(&VitalChanges::new(), Some(PatientState::Stable), at);
        let summary = t.summary(SimTimestamp::from_minutes(14.0));
        assert_eq!(summary.worst_state_reached, PatientState::Deteriorating);
        assert_eq!(summary.final_state, PatientState::Stable);
        assert_eq!(summary.state_transitions, 2);
        assert!((summary.duration_minutes - 14.0).abs() < 1e-9);
    }
}
