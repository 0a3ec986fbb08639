//! Core type definitions for the simulation engine.
//!
//! All types are serializable so hosts can hand them to a dialogue consumer,
//! archive them, or ship them over whatever transport they like.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

// ---------------------------------------------------------------------------
// Time
// ---------------------------------------------------------------------------

/// Simulation time: milliseconds elapsed since the scenario started.
///
/// Every engine operation takes an explicit `SimTimestamp` instead of reading
/// a wall clock, which keeps histories deterministic and replayable.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct SimTimestamp(pub u64);

impl SimTimestamp {
    /// The instant the scenario starts.
    pub const START: Self = Self(0);

    /// Timestamp from milliseconds since scenario start.
    #[must_use]
    pub const fn from_millis(millis: u64) -> Self {
        Self(millis)
    }

    /// Timestamp from whole seconds since scenario start.
    #[must_use]
    pub const fn from_secs(secs: u64) -> Self {
        Self(secs * 1_000)
    }

    /// Timestamp from (fractional) minutes since scenario start.
    /// Negative and non-finite inputs collapse to the start.
    #[must_use]
    pub fn from_minutes(minutes: f64) -> Self {
        if !minutes.is_finite() || minutes <= 0.0 {
            return Self::START;
        }
        Self((minutes * 60_000.0).round() as u64)
    }

    /// Raw milliseconds.
    #[must_use]
    pub const fn millis(self) -> u64 {
        self.0
    }

    /// Elapsed minutes as a float.
    #[must_use]
    pub fn minutes(self) -> f64 {
        self.0 as f64 / 60_000.0
    }

    /// This timestamp shifted forward by `duration`.
    #[must_use]
    pub fn after(self, duration: Duration) -> Self {
        let add = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
        Self(self.0.saturating_add(add))
    }

    /// This timestamp shifted forward by fractional minutes.
    #[must_use]
    pub fn after_minutes(self, minutes: f64) -> Self {
        Self(self.0.saturating_add(Self::from_minutes(minutes).0))
    }
}

impl fmt::Display for SimTimestamp {
    /// Formats as `MM:SS`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let total_secs = self.0 / 1_000;
        write!(f, "{:02}:{:02}", total_secs / 60, total_secs % 60)
    }
}

/// Round minutes to two decimals for reporting.
#[must_use]
pub fn round_minutes(minutes: f64) -> f64 {
    (minutes * 100.0).round() / 100.0
}

// ---------------------------------------------------------------------------
// Patient state
// ---------------------------------------------------------------------------

/// Clinical trajectory of the simulated patient.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatientState {
    /// Presenting symptoms, stable enough for assessment.
    Initial,
    /// First signs of worsening.
    EarlyDeteriorating,
    /// Clear worsening, needs immediate intervention.
    Deteriorating,
    /// Life-threatening, imminent arrest.
    Critical,
    /// Responding to treatment.
    Improving,
    /// Stabilised after treatment.
    Stable,
}

impl PatientState {
    /// Deterioration stages in order of increasing severity.
    pub const DETERIORATION_ORDER: [Self; 4] = [
        Self::Initial,
        Self::EarlyDeteriorating,
        Self::Deteriorating,
        Self::Critical,
    ];

    /// Severity rank: higher is worse. Treatment states rank below `Initial`.
    #[must_use]
    pub fn severity(self) -> i8 {
        match self {
            Self::Stable => -2,
            Self::Improving => -1,
            Self::Initial => 0,
            Self::EarlyDeteriorating => 1,
            Self::Deteriorating => 2,
            Self::Critical => 3,
        }
    }

    /// Whether the patient is responding to treatment.
    #[must_use]
    pub fn is_recovering(self) -> bool {
        matches!(self, Self::Improving | Self::Stable)
    }

    /// Snake-case name, as used in blueprints.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Initial => "initial",
            Self::EarlyDeteriorating => "early_deteriorating",
            Self::Deteriorating => "deteriorating",
            Self::Critical => "critical",
            Self::Improving => "improving",
            Self::Stable => "stable",
        }
    }
}

impl fmt::Display for PatientState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Vital signs
// ---------------------------------------------------------------------------

/// One measurable vital sign. Serialized names match blueprint keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum VitalSign {
    /// Heart rate (bpm).
    #[serde(rename = "HR")]
    HeartRate,
    /// Respiratory rate (/min).
    #[serde(rename = "RR")]
    RespiratoryRate,
    /// Oxygen saturation (%).
    #[serde(rename = "SpO2")]
    SpO2,
    /// Systolic blood pressure (mmHg).
    #[serde(rename = "BP_systolic")]
    BpSystolic,
    /// Diastolic blood pressure (mmHg).
    #[serde(rename = "BP_diastolic")]
    BpDiastolic,
    /// Body temperature (°C).
    #[serde(rename = "temperature")]
    Temperature,
    /// Pain score (0–10).
    #[serde(rename = "pain_score")]
    PainScore,
    /// Glasgow Coma Scale (3–15).
    #[serde(rename = "GCS")]
    Gcs,
    /// Blood glucose (mmol/L).
    #[serde(rename = "glucose")]
    Glucose,
}

/// A (possibly partial) snapshot of the patient's vital signs.
///
/// Absent fields mean "not part of this scenario" in a full snapshot and
/// "unchanged" in a partial one (e.g. a no-treatment progression step).
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Vitals {
    /// Heart rate (bpm).
    #[serde(rename = "HR", default, skip_serializing_if = "Option::is_none")]
    pub heart_rate: Option<f32>,
    /// Respiratory rate (/min).
    #[serde(rename = "RR", default, skip_serializing_if = "Option::is_none")]
    pub respiratory_rate: Option<f32>,
    /// Oxygen saturation (%).
    #[serde(rename = "SpO2", default, skip_serializing_if = "Option::is_none")]
    pub spo2: Option<f32>,
    /// Systolic blood pressure (mmHg).
    #[serde(rename = "BP_systolic", default, skip_serializing_if = "Option::is_none")]
    pub bp_systolic: Option<f32>,
    /// Diastolic blood pressure (mmHg).
    #[serde(rename = "BP_diastolic", default, skip_serializing_if = "Option::is_none")]
    pub bp_diastolic: Option<f32>,
    /// Body temperature (°C).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    /// Pain score (0–10).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pain_score: Option<f32>,
    /// Glasgow Coma Scale.
    #[serde(rename = "GCS", default, skip_serializing_if = "Option::is_none")]
    pub gcs: Option<f32>,
    /// Blood glucose (mmol/L).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub glucose: Option<f32>,
}

impl Vitals {
    /// Read one vital sign.
    #[must_use]
    pub fn get(&self, sign: VitalSign) -> Option<f32> {
        match sign {
            VitalSign::HeartRate => self.heart_rate,
            VitalSign::RespiratoryRate => self.respiratory_rate,
            VitalSign::SpO2 => self.spo2,
            VitalSign::BpSystolic => self.bp_systolic,
            VitalSign::BpDiastolic => self.bp_diastolic,
            VitalSign::Temperature => self.temperature,
            VitalSign::PainScore => self.pain_score,
            VitalSign::Gcs => self.gcs,
            VitalSign::Glucose => self.glucose,
        }
    }

    fn slot(&mut self, sign: VitalSign) -> &mut Option<f32> {
        match sign {
            VitalSign::HeartRate => &mut self.heart_rate,
            VitalSign::RespiratoryRate => &mut self.respiratory_rate,
            VitalSign::SpO2 => &mut self.spo2,
            VitalSign::BpSystolic => &mut self.bp_systolic,
            VitalSign::BpDiastolic => &mut self.bp_diastolic,
            VitalSign::Temperature => &mut self.temperature,
            VitalSign::PainScore => &mut self.pain_score,
            VitalSign::Gcs => &mut self.gcs,
            VitalSign::Glucose => &mut self.glucose,
        }
    }

    /// Overwrite one vital sign.
    pub fn set(&mut self, sign: VitalSign, value: f32) {
        *self.slot(sign) = Some(value);
    }

    /// Overlay every field present in `partial` onto `self`.
    pub fn merge(&mut self, partial: &Vitals) {
        for sign in ALL_VITAL_SIGNS {
            if let Some(value) = partial.get(sign) {
                self.set(sign, value);
            }
        }
    }

    /// Apply a set of absolute/relative changes.
    ///
    /// Relative shifts only touch vitals that already have a value.
    pub fn apply(&mut self, changes: &VitalChanges) {
        for (&sign, change) in changes {
            match *change {
                VitalChange::Set(value) => self.set(sign, value),
                VitalChange::Shift(delta) => {
                    if let Some(current) = self.slot(sign).as_mut() {
                        *current += delta;
                    }
                }
            }
        }
    }

    /// Whether no vital sign is present.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        ALL_VITAL_SIGNS.iter().all(|&s| self.get(s).is_none())
    }
}

/// Every vital sign, in display order.
pub const ALL_VITAL_SIGNS: [VitalSign; 9] = [
    VitalSign::HeartRate,
    VitalSign::RespiratoryRate,
    VitalSign::SpO2,
    VitalSign::BpSystolic,
    VitalSign::BpDiastolic,
    VitalSign::Temperature,
    VitalSign::PainScore,
    VitalSign::Gcs,
    VitalSign::Glucose,
];

/// A change to one vital sign.
///
/// Blueprints write absolute values as numbers (`"HR": 96`) and relative
/// shifts as signed strings (`"HR": "+10"`, `"SpO2": "-3"`).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawVitalChange", into = "RawVitalChange")]
pub enum VitalChange {
    /// Set the vital to this value.
    Set(f32),
    /// Add this (signed) amount to the current value.
    Shift(f32),
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum RawVitalChange {
    Absolute(f32),
    Relative(String),
}

impl TryFrom<RawVitalChange> for VitalChange {
    type Error = String;

    fn try_from(raw: RawVitalChange) -> std::result::Result<Self, Self::Error> {
        match raw {
            RawVitalChange::Absolute(v) => Ok(Self::Set(v)),
            RawVitalChange::Relative(s) => {
                let trimmed = s.trim();
                let numeric = leading_number(trimmed)
                    .ok_or_else(|| format!("unparseable vital change '{s}'"))?;
                if trimmed.starts_with('+') || trimmed.starts_with('-') {
                    Ok(Self::Shift(numeric))
                } else {
                    Ok(Self::Set(numeric))
                }
            }
        }
    }
}

impl From<VitalChange> for RawVitalChange {
    fn from(change: VitalChange) -> Self {
        match change {
            VitalChange::Set(v) => Self::Absolute(v),
            VitalChange::Shift(d) if d >= 0.0 => Self::Relative(format!("+{d}")),
            VitalChange::Shift(d) => Self::Relative(format!("{d}")),
        }
    }
}

/// Changes keyed by vital sign.
pub type VitalChanges = BTreeMap<VitalSign, VitalChange>;

/// Parse the leading (optionally signed) decimal number of a string,
/// e.g. `"0.5 mg"` → `0.5`, `"+10-15"` → `10`.
#[must_use]
pub fn leading_number(s: &str) -> Option<f32> {
    let s = s.trim_start();
    let mut end = 0;
    let mut seen_digit = false;
    let mut seen_dot = false;
    for (i, c) in s.char_indices() {
        match c {
            '+' | '-' if i == 0 => {}
            '0'..='9' => seen_digit = true,
            '.' if !seen_dot => seen_dot = true,
            _ => break,
        }
        end = i + c.len_utf8();
    }
    if !seen_digit {
        return None;
    }
    s[..end].trim_end_matches('.').parse().ok()
}

// ---------------------------------------------------------------------------
// Routes
// ---------------------------------------------------------------------------

/// Route of administration.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Route {
    /// IV.
    Intravenous,
    /// IM.
    Intramuscular,
    /// IO.
    Intraosseous,
    /// SC.
    Subcutaneous,
    /// PO.
    Oral,
    /// Nebulised / inhaled.
    Inhaled,
    /// IN.
    Intranasal,
    /// SL.
    Sublingual,
    /// Anything else, kept verbatim (upper-cased).
    Other(String),
}

impl FromStr for Route {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let upper = s.trim().to_ascii_uppercase();
        Ok(match upper.as_str() {
            "IV" | "INTRAVENOUS" => Self::Intravenous,
            "IM" | "INTRAMUSCULAR" => Self::Intramuscular,
            "IO" | "INTRAOSSEOUS" => Self::Intraosseous,
            "SC" | "SQ" | "SUBCUT" | "SUBCUTANEOUS" => Self::Subcutaneous,
            "PO" | "ORAL" => Self::Oral,
            "INH" | "INHALED" | "NEB" | "NEBULISED" | "NEBULIZED" => Self::Inhaled,
            "IN" | "INTRANASAL" => Self::Intranasal,
            "SL" | "SUBLINGUAL" => Self::Sublingual,
            _ => Self::Other(upper),
        })
    }
}

impl From<String> for Route {
    fn from(s: String) -> Self {
        match s.parse() {
            Ok(route) => route,
            Err(never) => match never {},
        }
    }
}

impl From<Route> for String {
    fn from(route: Route) -> Self {
        route.to_string()
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Intravenous => "IV",
            Self::Intramuscular => "IM",
            Self::Intraosseous => "IO",
            Self::Subcutaneous => "SC",
            Self::Oral => "PO",
            Self::Inhaled => "INH",
            Self::Intranasal => "IN",
            Self::Sublingual => "SL",
            Self::Other(other) => other.as_str(),
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// Competence
// ---------------------------------------------------------------------------

/// Outcome-based competence verdict for an action or a whole scenario.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompetenceLevel {
    /// Prevented deterioration entirely.
    Exemplary,
    /// Stabilised before major deterioration.
    Competent,
    /// Acted, but only once the patient was in a high-risk state.
    Developing,
    /// Unsafe or ineffective.
    Novice,
}

impl CompetenceLevel {
    /// Evaluation order: best verdict first.
    pub const PRIORITY: [Self; 4] = [
        Self::Exemplary,
        Self::Competent,
        Self::Developing,
        Self::Novice,
    ];

    /// Upper-case label for debrief text.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Exemplary => "EXEMPLARY",
            Self::Competent => "COMPETENT",
            Self::Developing => "DEVELOPING",
            Self::Novice => "NOVICE",
        }
    }

    /// Whether this level counts as "competent or better".
    #[must_use]
    pub fn is_proficient(self) -> bool {
        matches!(self, Self::Exemplary | Self::Competent)
    }
}

impl fmt::Display for CompetenceLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}
