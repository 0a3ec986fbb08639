//! Treatment validation.
//!
//! [`TreatmentEngine`] checks a requested medication against the blueprint's
//! medication table: unknown drugs are rejected, contraindications and
//! off-range doses produce a warning, and everything else returns the
//! effect payload from the table unchanged.
//!
//! Warnings never block the treatment. The caller still records the drug and
//! schedules its effect; the warning is only reported back.

use crate::blueprint::{Contraindication, Medication, ScenarioBlueprint};
use crate::types::{PatientState, Route, VitalChanges, Vitals, leading_number};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// Hard failures: the treatment cannot be applied at all.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TreatmentError {
    /// The medication is not in this scenario's table.
    #[error("Medication \"{0}\" not available in this scenario")]
    UnknownMedication(String),
    /// The action named no medication.
    #[error("No medication specified for treatment")]
    MissingMedication,
}

/// Soft failures: reported, but the treatment still goes ahead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TreatmentWarning {
    /// An absolute contraindication is present.
    Contraindicated {
        /// Explanation.
        message: String,
    },
    /// Dose outside the safe band, or unreadable.
    IncorrectDose {
        /// Explanation.
        message: String,
        /// The standard adult dose.
        suggested_dose: String,
    },
}

impl TreatmentWarning {
    /// Human-readable explanation.
    #[must_use]
    pub fn message(&self) -> &str {
        match self {
            Self::Contraindicated { message } | Self::IncorrectDose { message, .. } => message,
        }
    }
}

/// Effect payload of an accepted treatment, straight from the blueprint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreatmentEffect {
    /// Medication key as named in the blueprint.
    pub drug: String,
    /// Dose as given, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dose: Option<String>,
    /// What the patient feels right away.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub immediate_effect: Option<String>,
    /// Minutes until vital changes show.
    pub time_to_effect_minutes: f64,
    /// Vital changes once the effect shows.
    pub vital_changes: VitalChanges,
    /// Side effects.
    pub side_effects: Vec<String>,
    /// Note for the dialogue consumer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clinical_note: Option<String>,
    /// Recovery state once the effect shows.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_change: Option<PatientState>,
    /// Whether this is a life-saving treatment.
    pub critical: bool,
}

/// Outcome of a treatment that was not rejected outright.
#[derive(Debug, Clone, PartialEq)]
pub enum TreatmentOutcome {
    /// Clean.
    Accepted(TreatmentEffect),
    /// Applied, with a warning to report.
    Warned {
        /// What was wrong.
        warning: TreatmentWarning,
        /// The effect, applied anyway.
        effect: TreatmentEffect,
    },
}

impl TreatmentOutcome {
    /// The effect payload.
    #[must_use]
    pub fn effect(&self) -> &TreatmentEffect {
        match self {
            Self::Accepted(effect) | Self::Warned { effect, .. } => effect,
        }
    }

    /// The warning, if any.
    #[must_use]
    pub fn warning(&self) -> Option<&TreatmentWarning> {
        match self {
            Self::Accepted(_) => None,
            Self::Warned { warning, .. } => Some(warning),
        }
    }
}

/// A medication offered to the dialogue consumer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AvailableTreatment {
    /// Medication name.
    pub name: String,
    /// Standard adult dose.
    pub dose: String,
    /// What it treats.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub indication: Option<String>,
    /// Usual route.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub route: Option<Route>,
}

/// Validates treatments against one blueprint's medication table.
#[derive(Debug, Clone)]
pub struct TreatmentEngine {
    blueprint: Arc<ScenarioBlueprint>,
}

impl TreatmentEngine {
    /// Create an engine for a blueprint.
    #[must_use]
    pub fn new(blueprint: Arc<ScenarioBlueprint>) -> Self {
        Self { blueprint }
    }

    /// Validate a treatment and return its effect.
    ///
    /// # Errors
    /// Returns [`TreatmentError`] when no drug is named or the drug is not in
    /// the medication table. Contraindications and dose problems are not
    /// errors; they come back as [`TreatmentOutcome::Warned`].
    pub fn apply_treatment(
        &self,
        drug: Option<&str>,
        dose: Option<&str>,
        vitals: &Vitals,
    ) -> Result<TreatmentOutcome, TreatmentError> {
        let drug = drug
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .ok_or(TreatmentError::MissingMedication)?;
        let (key, medication) = self
            .blueprint
            .medication(drug)
            .ok_or_else(|| TreatmentError::UnknownMedication(drug.to_string()))?;

        let effect = TreatmentEffect {
            drug: key.to_string(),
            dose: dose.map(str::to_string),
            immediate_effect: medication.patient_experience.clone(),
            time_to_effect_minutes: medication.onset_minutes.max(0.0),
            vital_changes: medication.vital_effects.clone(),
            side_effects: medication.side_effects.clone(),
            clinical_note: medication.clinical_note.clone(),
            state_change: medication.state_change,
            critical: medication.critical,
        };

        let warning = self
            .check_contraindications(medication, vitals)
            .or_else(|| dose.and_then(|d| validate_dose(medication, d)));

        Ok(match warning {
            Some(warning) => {
                debug!(drug = key, warning = warning.message(), "Treatment accepted with warning");
                TreatmentOutcome::Warned { warning, effect }
            }
            None => TreatmentOutcome::Accepted(effect),
        })
    }

    fn check_contraindications(
        &self,
        medication: &Medication,
        vitals: &Vitals,
    ) -> Option<TreatmentWarning> {
        let bleeding = self.blueprint.patient_profile.active_bleeding;
        medication
            .contraindications_absolute
            .iter()
            .find_map(|c| match c {
                Contraindication::SystolicBpBelow(threshold) => match vitals.bp_systolic {
                    Some(systolic) if systolic < *threshold => Some(format!(
                        "CONTRAINDICATION: Systolic BP is {systolic} mmHg. \
                         This medication requires BP ≥ {threshold} mmHg."
                    )),
                    _ => None,
                },
                Contraindication::ActiveBleeding => bleeding.then(|| {
                    "CONTRAINDICATION: Patient has active bleeding. \
                     This medication increases bleeding risk."
                        .to_string()
                }),
                Contraindication::Other(_) => None,
            })
            .map(|message| TreatmentWarning::Contraindicated { message })
    }

    /// Every medication in the table, for the dialogue consumer.
    #[must_use]
    pub fn available_treatments(&self) -> Vec<AvailableTreatment> {
        self.blueprint
            .medications_available
            .iter()
            .map(|(name, med)| AvailableTreatment {
                name: name.clone(),
                dose: med.dose_adult.clone(),
                indication: med.indication.clone(),
                route: med.route.clone(),
            })
            .collect()
    }

    /// Full table entry for a medication.
    #[must_use]
    pub fn medication_info(&self, drug: &str) -> Option<&Medication> {
        self.blueprint.medication(drug).map(|(_, med)| med)
    }
}

/// Dose check: the standard dose string is always fine; otherwise the
/// leading number must sit between half the standard dose and the maximum
/// (twice the standard when no maximum is given).
fn validate_dose(medication: &Medication, given: &str) -> Option<TreatmentWarning> {
    let standard = medication.dose_adult.as_str();
    if given.trim() == standard.trim() {
        return None;
    }
    let incorrect = |message: String| {
        Some(TreatmentWarning::IncorrectDose {
            message,
            suggested_dose: standard.to_string(),
        })
    };

    let Some(given_value) = leading_number(given) else {
        return incorrect(format!("Could not parse dose \"{given}\". Standard dose is {standard}."));
    };
    let Some(standard_value) = leading_number(standard) else {
        debug!(standard, "Standard dose has no numeric value, dose accepted");
        return None;
    };
    let max_value = medication
        .max_dose
        .as_deref()
        .and_then(leading_number)
        .unwrap_or(standard_value * 2.0);
    let max_label = medication
        .max_dose
        .clone()
        .unwrap_or_else(|| format!("{max_value}"));

    if given_value > max_value {
        return incorrect(format!(
            "DOSE TOO HIGH: {given} exceeds maximum safe dose of {max_label}. \
             Risk of serious side effects."
        ));
    }
    if given_value < standard_value * 0.5 {
        return incorrect(format!(
            "DOSE TOO LOW: {given} is below therapeutic range. Standard dose is {standard}."
        ));
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine(active_bleeding: bool) -> TreatmentEngine {
        let json = format!(
            r#"{{
                "scenario_id": "TX_TEST",
                "patient_profile": {{ "name": "Kim", "active_bleeding": {active_bleeding} }},
                "initial_vitals": {{ "HR": 100, "BP_systolic": 120 }},
                "medications_available": {{
                    "GTN": {{
                        "dose_adult": "400 mcg",
                        "route": "SL",
                        "contraindications_absolute": ["systolic_bp_below_90"],
                        "onset_minutes": 2,
                        "vital_effects": {{ "BP_systolic": "-15" }}
                    }},
                    "aspirin": {{
                        "dose_adult": "300 mg",
                        "max_dose": "325 mg",
                        "contraindications_absolute": ["active_bleeding"],
                        "critical": true
                    }}
                }}
            }}"#
        );
        TreatmentEngine::new(Arc::new(ScenarioBlueprint::from_json_str(&json).expect("valid")))
    }

    fn vitals(systolic: f32) -> Vitals {
        Vitals {
            bp_systolic: Some(systolic),
            ..Vitals::default()
        }
    }

    #[test]
    fn unknown_medication_is_an_error() {
        let err = engine(false)
            .apply_treatment(Some("morphine"), None, &vitals(120.0))
            .unwrap_err();
        assert_eq!(err, TreatmentError::UnknownMedication("morphine".into()));
    }

    #[test]
    fn missing_medication_is_an_error() {
        let err = engine(false).apply_treatment(Some("  "), None, &vitals(120.0)).unwrap_err();
        assert_eq!(err, TreatmentError::MissingMedication);
    }

    #[test]
    fn standard_dose_is_accepted_with_effect() {
        let outcome = engine(false)
            .apply_treatment(Some("gtn"), Some("400 mcg"), &vitals(120.0))
            .expect("known drug");
        let TreatmentOutcome::Accepted(effect) = outcome else {
            panic!("expected clean acceptance");
        };
        assert_eq!(effect.drug, "GTN");
        assert!((effect.time_to_effect_minutes - 2.0).abs() < f64::EPSILON);
        assert!(!effect.vital_changes.is_empty());
    }

    #[test]
    fn low_blood_pressure_warns_but_keeps_effect() {
        let outcome = engine(false)
            .apply_treatment(Some("GTN"), Some("400 mcg"), &vitals(85.0))
            .expect("known drug");
        assert!(matches!(outcome.warning(), Some(TreatmentWarning::Contraindicated { .. })));
        assert_eq!(outcome.effect().drug, "GTN");
    }

    #[test]
    fn active_bleeding_warns() {
        let outcome = engine(true)
            .apply_treatment(Some("aspirin"), Some("300 mg"), &vitals(120.0))
            .expect("known drug");
        let warning = outcome.warning().expect("warning");
        assert!(warning.message().contains("active bleeding"));
    }

    #[test]
    fn dose_band_is_enforced() {
        let e = engine(false);
        let high = e
            .apply_treatment(Some("aspirin"), Some("600mg"), &vitals(120.0))
            .expect("known");
        match high.warning() {
            Some(TreatmentWarning::IncorrectDose { message, suggested_dose }) => {
                assert!(message.contains("TOO HIGH"));
                assert!(message.contains("325 mg"));
                assert_eq!(suggested_dose, "300 mg");
            }
            other => panic!("unexpected {other:?}"),
        }

        let low = e.apply_treatment(Some("aspirin"), Some("75 mg"), &vitals(120.0)).expect("known");
        assert!(low.warning().is_some_and(|w| w.message().contains("TOO LOW")));

        let garbled = e
            .apply_treatment(Some("aspirin"), Some("a bit"), &vitals(120.0))
            .expect("known");
        assert!(garbled.warning().is_some_and(|w| w.message().contains("Could not parse")));

        let fine = e
            .apply_treatment(Some("aspirin"), Some("250 mg"), &vitals(120.0))
            .expect("known");
        assert!(fine.warning().is_none());
    }

    #[test]
    fn missing_dose_counts_as_standard() {
        let outcome = engine(false)
            .apply_treatment(Some("aspirin"), None, &vitals(120.0))
            .expect("known");
        assert!(outcome.warning().is_none());
    }

    #[test]
    fn available_treatments_lists_table() {
        let list = engine(false).available_treatments();
        let names: Vec<_> = list.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["GTN", "aspirin"]);
        assert_eq!(list[0].route, Some(Route::Sublingual));
    }
}
