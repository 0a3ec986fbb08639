//! Cross-scenario pattern analysis.
//!
//! [`PatternAnalysisService`] looks at every [`AarReport`] a trainee produced
//! in one session and looks for behaviour that recurs across scenarios:
//!
//! - **Assessment-to-treatment gap**: how long after the first early
//!   assessment the first treatment came
//! - **Strength / weakness domains**: clinical domains where completed
//!   checklist items were consistently proficient or consistently poor
//! - **Systematic assessment**: whether early actions followed A, B, C order
//! - **Medication errors**: treatment warnings and medication safety failures,
//!   grouped by kind
//! - **Deterioration prevention**: how often the patient was kept out of the
//!   critical state
//!
//! Every pattern is computed from report data alone; nothing here reads a
//! blueprint or a clock.

use medsim_core::report::AarReport;
use medsim_core::safety::{FailureContext, SafetyFailure};
use medsim_core::treatment::TreatmentWarning;
use medsim_core::types::{CompetenceLevel, PatientState};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use tracing::{debug, info};

// ---------------------------------------------------------------------------
// Pattern data model
// ---------------------------------------------------------------------------

/// Which recurring behaviour a pattern describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternKind {
    /// Delay between recognising a problem and treating it.
    AssessmentToTreatmentGap,
    /// A clinical domain done well across scenarios.
    ConsistentStrength,
    /// A clinical domain done poorly across scenarios.
    ConsistentWeakness,
    /// ABC-ordered early assessment.
    SystematicAssessment,
    /// Recurring kind of medication error.
    MedicationErrorType,
    /// Keeping the patient out of the critical state.
    DeteriorationPrevention,
}

impl PatternKind {
    /// Heading used in debrief text.
    #[must_use]
    pub fn title(self) -> &'static str {
        match self {
            Self::AssessmentToTreatmentGap => "Assessment-to-Treatment Gap",
            Self::ConsistentStrength => "Consistent Strength Domain",
            Self::ConsistentWeakness => "Consistent Weakness Domain",
            Self::SystematicAssessment => "Systematic vs. Chaotic Assessment",
            Self::MedicationErrorType => "Medication Error Type",
            Self::DeteriorationPrevention => "Deterioration Prevention",
        }
    }
}

impl fmt::Display for PatternKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.title())
    }
}

/// How much a pattern matters for patient outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternSeverity {
    /// Worth mentioning.
    Low,
    /// Needs discussion.
    Moderate,
    /// Needs discussion first.
    High,
}

impl fmt::Display for PatternSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Low => "LOW",
            Self::Moderate => "MODERATE",
            Self::High => "HIGH",
        })
    }
}

/// Debrief ordering bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum PatternPriority {
    /// Raise in the debrief.
    P1,
    /// Raise if time allows.
    P2,
}

impl fmt::Display for PatternPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::P1 => "P1",
            Self::P2 => "P2",
        })
    }
}

/// One analysed pattern.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pattern {
    /// What the pattern describes.
    pub kind: PatternKind,
    /// Whether the pattern is present.
    pub detected: bool,
    /// Whether it is something to praise rather than correct.
    #[serde(default)]
    pub is_strength: bool,
    /// Outcome impact.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<PatternSeverity>,
    /// Debrief ordering.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<PatternPriority>,
    /// One line per supporting observation.
    #[serde(default)]
    pub evidence: Vec<String>,
    /// What the educator should focus on.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub educational_focus: Option<String>,
    /// Suggested opening line for the debrief.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub talking_point: Option<String>,
}

impl Pattern {
    /// A pattern that could not be established, with the reason as evidence.
    #[must_use]
    pub fn not_detected(kind: PatternKind, reason: &str) -> Self {
        Self {
            kind,
            detected: false,
            is_strength: false,
            severity: None,
            priority: None,
            evidence: vec![reason.to_string()],
            educational_focus: None,
            talking_point: None,
        }
    }

    /// Detected and not a strength.
    #[must_use]
    pub fn is_concern(&self) -> bool {
        self.detected && !self.is_strength
    }
}

/// Counts over all analysed patterns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatternSummary {
    /// Scenarios analysed.
    pub scenarios_analysed: usize,
    /// Patterns with `detected == true`.
    pub patterns_detected: usize,
    /// Detected strengths.
    pub strengths: usize,
    /// Detected concerns.
    pub concerns: usize,
    /// Whether there was anything to analyse.
    pub ready_for_analysis: bool,
    /// One-line description.
    pub message: String,
}

/// Result of one analysis pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternAnalysis {
    /// Recognition-to-treatment delay.
    pub assessment_to_treatment_gap: Pattern,
    /// Best domain.
    pub consistent_strength: Pattern,
    /// Worst domain.
    pub consistent_weakness: Pattern,
    /// ABC ordering.
    pub systematic_assessment: Pattern,
    /// Medication errors.
    pub medication_errors: Pattern,
    /// Patient outcomes.
    pub deterioration_prevention: Pattern,
    /// Aggregate counts.
    pub summary: PatternSummary,
}

impl PatternAnalysis {
    /// All patterns in debrief order.
    #[must_use]
    pub fn patterns(&self) -> [&Pattern; 6] {
        [
            &self.assessment_to_treatment_gap,
            &self.consistent_strength,
            &self.consistent_weakness,
            &self.systematic_assessment,
            &self.medication_errors,
            &self.deterioration_prevention,
        ]
    }

    /// Detected patterns only, concerns before strengths, then by severity.
    #[must_use]
    pub fn detected(&self) -> Vec<&Pattern> {
        let mut detected: Vec<&Pattern> =
            self.patterns().into_iter().filter(|p| p.detected).collect();
        detected.sort_by_key(|p| (p.is_strength, std::cmp::Reverse(p.severity)));
        detected
    }
}

// ---------------------------------------------------------------------------
// Thresholds
// ---------------------------------------------------------------------------

/// Tunable thresholds for pattern detection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PatternThresholds {
    /// Assessments later than this are not "early".
    pub early_window_minutes: f64,
    /// Early actions considered for ABC ordering.
    pub initial_actions: usize,
    /// Average gap above which hesitation is flagged.
    pub gap_significant_minutes: f64,
    /// Average gap above which hesitation is high severity.
    pub gap_high_minutes: f64,
    /// Occurrences needed before anything counts as a pattern.
    pub min_occurrences: usize,
    /// Proficient share needed for a strength domain.
    pub strength_rate: f64,
    /// Poor share needed for a weakness domain.
    pub weakness_rate: f64,
}

impl Default for PatternThresholds {
    fn default() -> Self {
        Self {
            early_window_minutes: 5.0,
            initial_actions: 8,
            gap_significant_minutes: 3.0,
            gap_high_minutes: 5.0,
            min_occurrences: 2,
            strength_rate: 0.67,
            weakness_rate: 0.5,
        }
    }
}

// ---------------------------------------------------------------------------
// Categorisation helpers
// ---------------------------------------------------------------------------

/// Clinical domain keywords, first match wins.
const DOMAIN_KEYWORDS: &[(&str, &[&str])] = &[
    (
        "assessment",
        &[
            "assess",
            "abcde",
            "primary survey",
            "history",
            "examine",
            "scene",
            "recognis",
            "recogniz",
        ],
    ),
    ("airway", &["airway", "intubat", "suction", "jaw thrust", "bvm"]),
    (
        "breathing",
        &[
            "oxygen",
            "bronchodilator",
            "salbutamol",
            "nebul",
            "respiratory",
            "breathing",
            "ventilat",
        ],
    ),
    (
        "circulation",
        &["iv access", "cannula", "fluid", "saline", "cardiac", "circulation", "ecg"],
    ),
    (
        "medication",
        &["medication", "drug", "adrenaline", "epinephrine", "naloxone", "aspirin", "steroid"],
    ),
    ("monitoring", &["monitor", "reassess", "recheck", "vital"]),
];

/// Clinical domain of a checklist item: its authored category, else a keyword
/// match on the description, else `"other"`.
#[must_use]
pub fn clinical_domain(category: Option<&str>, action: &str) -> String {
    if let Some(category) = category.map(str::trim).filter(|c| !c.is_empty()) {
        return category.to_lowercase();
    }
    let lower = action.to_lowercase();
    DOMAIN_KEYWORDS
        .iter()
        .find(|(_, keywords)| keywords.iter().any(|kw| lower.contains(kw)))
        .map_or_else(|| "other".to_string(), |(domain, _)| (*domain).to_string())
}

/// ABCDE step an action name addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AbcStep {
    /// Airway.
    A,
    /// Breathing.
    B,
    /// Circulation.
    C,
    /// Disability.
    D,
    /// Anything else.
    Other,
}

/// Classify an action name into an ABCDE step.
#[must_use]
pub fn abc_step(action: &str) -> AbcStep {
    let lower = action.to_lowercase();
    let has = |words: &[&str]| words.iter().any(|w| contains_word_or_phrase(&lower, w));
    if has(&["airway", "mouth", "obstruction", "jaw", "stridor"]) {
        AbcStep::A
    } else if has(&["breath", "lung", "respiratory", "spo2", "oxygen", "chest", "wheeze"]) {
        AbcStep::B
    } else if has(&[
        "pulse",
        "bp",
        "blood pressure",
        "circulation",
        "heart",
        "perfusion",
        "shock",
        "capillary",
    ]) {
        AbcStep::C
    } else if has(&["disability", "gcs", "conscious", "neuro", "pupil", "glucose"]) {
        AbcStep::D
    } else {
        AbcStep::Other
    }
}

/// Short tokens must be whole words; longer ones match as substrings.
fn contains_word_or_phrase(haystack: &str, needle: &str) -> bool {
    if needle.len() <= 3 {
        haystack
            .split(|c: char| !c.is_ascii_alphanumeric())
            .any(|token| token == needle)
    } else {
        haystack.contains(needle)
    }
}

/// Whether A, B and C each appear and first appear in that order.
#[must_use]
pub fn follows_abc_order(steps: &[AbcStep]) -> bool {
    let first = |step| steps.iter().position(|s| *s == step);
    match (first(AbcStep::A), first(AbcStep::B), first(AbcStep::C)) {
        (Some(a), Some(b), Some(c)) => a < b && b < c,
        _ => false,
    }
}

/// Kind of medication error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MedicationErrorKind {
    /// Allergy or absolute contraindication.
    Contraindication,
    /// Wrong dose or excessive volume.
    Dosing,
    /// Dangerous route.
    Route,
    /// Dangerous drug for this patient.
    WrongDrug,
}

impl fmt::Display for MedicationErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Contraindication => "contraindication",
            Self::Dosing => "dosing",
            Self::Route => "route",
            Self::WrongDrug => "wrong drug",
        })
    }
}

/// One medication error found in a report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MedicationError {
    /// Scenario it happened in.
    pub scenario_id: String,
    /// Kind.
    pub kind: MedicationErrorKind,
    /// Drug involved.
    pub medication: String,
    /// Minutes into the scenario.
    pub minutes: f64,
}

fn warning_kind(warning: &TreatmentWarning) -> MedicationErrorKind {
    match warning {
        TreatmentWarning::Contraindicated { .. } => MedicationErrorKind::Contraindication,
        TreatmentWarning::IncorrectDose { .. } => MedicationErrorKind::Dosing,
    }
}

/// Medication safety failures only; omissions are not medication errors.
fn failure_kind(failure: &SafetyFailure) -> Option<(MedicationErrorKind, String)> {
    match &failure.context {
        FailureContext::Allergy { medication, .. } => {
            Some((MedicationErrorKind::Contraindication, medication.clone()))
        }
        FailureContext::Medication {
            medication,
            total_volume_ml: Some(_),
            ..
        } => Some((MedicationErrorKind::Dosing, medication.clone())),
        FailureContext::Medication { medication, route, .. } => {
            let description = failure.description.to_lowercase();
            let route_error =
                route.is_some() && (description.contains("route") || description.contains(" iv"));
            let kind = if route_error {
                MedicationErrorKind::Route
            } else if description.contains("dose") || description.contains("overdose") {
                MedicationErrorKind::Dosing
            } else {
                MedicationErrorKind::WrongDrug
            };
            Some((kind, medication.clone()))
        }
        FailureContext::ScenarioEnd { .. } => None,
    }
}

/// Every medication error in one report, in time order.
#[must_use]
pub fn medication_errors(report: &AarReport) -> Vec<MedicationError> {
    let warnings = report.medication_warnings.iter().map(|w| MedicationError {
        scenario_id: report.scenario_id.clone(),
        kind: warning_kind(&w.warning),
        medication: w.drug.clone(),
        minutes: w.timestamp_minutes,
    });
    let failures = report.safety_gate.failures.iter().filter_map(|f| {
        failure_kind(f).map(|(kind, medication)| MedicationError {
            scenario_id: report.scenario_id.clone(),
            kind,
            medication,
            minutes: f.timestamp_minutes,
        })
    });
    let mut errors: Vec<MedicationError> = warnings.chain(failures).collect();
    errors.sort_by(|a, b| a.minutes.total_cmp(&b.minutes));
    errors
}

fn plural(count: usize, word: &str) -> String {
    if count == 1 {
        format!("{count} {word}")
    } else {
        format!("{count} {word}s")
    }
}

// ---------------------------------------------------------------------------
// Service
// ---------------------------------------------------------------------------

/// Computes cross-scenario patterns.
#[derive(Debug, Clone, Default)]
pub struct PatternAnalysisService {
    thresholds: PatternThresholds,
}

impl PatternAnalysisService {
    /// A service with custom thresholds.
    #[must_use]
    pub fn new(thresholds: PatternThresholds) -> Self {
        Self { thresholds }
    }

    /// Thresholds in use.
    #[must_use]
    pub fn thresholds(&self) -> &PatternThresholds {
        &self.thresholds
    }

    /// Run every analysis. With no reports every pattern is undetected and
    /// the summary says so.
    #[must_use]
    pub fn analyze(&self, reports: &[AarReport]) -> PatternAnalysis {
        if reports.is_empty() {
            debug!("Pattern analysis skipped, no reports");
            return Self::empty();
        }

        let mut analysis = PatternAnalysis {
            assessment_to_treatment_gap: self.assessment_to_treatment_gap(reports),
            consistent_strength: self.consistent_strength(reports),
            consistent_weakness: self.consistent_weakness(reports),
            systematic_assessment: self.systematic_assessment(reports),
            medication_errors: self.medication_error_type(reports),
            deterioration_prevention: self.deterioration_prevention(reports),
            summary: PatternSummary {
                scenarios_analysed: reports.len(),
                patterns_detected: 0,
                strengths: 0,
                concerns: 0,
                ready_for_analysis: true,
                message: String::new(),
            },
        };

        let patterns = analysis.patterns();
        let detected = patterns.iter().filter(|p| p.detected).count();
        let strengths = patterns.iter().filter(|p| p.detected && p.is_strength).count();
        let concerns = patterns.iter().filter(|p| p.is_concern()).count();
        analysis.summary.patterns_detected = detected;
        analysis.summary.strengths = strengths;
        analysis.summary.concerns = concerns;
        analysis.summary.message = format!(
            "{} across {}: {} to reinforce, {} to address",
            plural(detected, "pattern"),
            plural(reports.len(), "scenario"),
            strengths,
            concerns
        );
        info!(
            scenarios = reports.len(),
            detected, strengths, concerns, "Cross-scenario pattern analysis complete"
        );
        analysis
    }

    fn empty() -> PatternAnalysis {
        let reason = "No completed scenarios";
        PatternAnalysis {
            assessment_to_treatment_gap: Pattern::not_detected(
                PatternKind::AssessmentToTreatmentGap,
                reason,
            ),
            consistent_strength: Pattern::not_detected(PatternKind::ConsistentStrength, reason),
            consistent_weakness: Pattern::not_detected(PatternKind::ConsistentWeakness, reason),
            systematic_assessment: Pattern::not_detected(PatternKind::SystematicAssessment, reason),
            medication_errors: Pattern::not_detected(PatternKind::MedicationErrorType, reason),
            deterioration_prevention: Pattern::not_detected(
                PatternKind::DeteriorationPrevention,
                reason,
            ),
            summary: PatternSummary {
                scenarios_analysed: 0,
                patterns_detected: 0,
                strengths: 0,
                concerns: 0,
                ready_for_analysis: false,
                message: "Insufficient data for pattern analysis".to_string(),
            },
        }
    }

    /// `count` of `total` is both frequent and consistent enough.
    fn consistent(&self, count: usize, total: usize, rate: f64) -> bool {
        total > 0 && count >= self.thresholds.min_occurrences && count as f64 / total as f64 >= rate
    }

    // -- Temporal -----------------------------------------------------------

    /// Average delay between the first early assessment and the first
    /// treatment that follows it.
    #[must_use]
    pub fn assessment_to_treatment_gap(&self, reports: &[AarReport]) -> Pattern {
        let kind = PatternKind::AssessmentToTreatmentGap;
        let gaps: Vec<(&AarReport, f64, f64, &str, &str)> = reports
            .iter()
            .filter_map(|report| {
                let assessment = report
                    .timeline
                    .iter()
                    .find(|e| {
                        e.action_type == "assessment"
                            && e.minutes_mark < self.thresholds.early_window_minutes
                    })?;
                let treatment = report
                    .timeline
                    .iter()
                    .find(|e| {
                        e.action_type == "treatment" && e.minutes_mark >= assessment.minutes_mark
                    })?;
                Some((
                    report,
                    assessment.minutes_mark,
                    treatment.minutes_mark,
                    assessment.name.as_str(),
                    treatment.name.as_str(),
                ))
            })
            .collect();

        if gaps.is_empty() {
            return Pattern::not_detected(
                kind,
                "No scenario had both an early assessment and a later treatment",
            );
        }

        let average = gaps.iter().map(|(_, a, t, _, _)| t - a).sum::<f64>() / gaps.len() as f64;
        let significant = average > self.thresholds.gap_significant_minutes;
        let severity = if average > self.thresholds.gap_high_minutes {
            PatternSeverity::High
        } else if significant {
            PatternSeverity::Moderate
        } else {
            PatternSeverity::Low
        };
        let evidence = gaps
            .iter()
            .map(|(report, a, t, assessment, treatment)| {
                format!(
                    "{}: \"{assessment}\" at {a:.1} min, \"{treatment}\" at {t:.1} min \
                     (gap {:.1} min)",
                    report.scenario_id,
                    t - a
                )
            })
            .collect();

        let (first, first_assessment, first_treatment, _, _) = gaps[0];
        Pattern {
            kind,
            detected: significant,
            is_strength: !significant,
            severity: Some(severity),
            priority: Some(PatternPriority::P1),
            evidence,
            educational_focus: Some(if significant {
                "Recognises problems but hesitates to act: separate a confidence gap from a \
                 knowledge gap"
                    .to_string()
            } else {
                "Acts promptly once a problem is recognised".to_string()
            }),
            talking_point: Some(if significant {
                format!(
                    "Across your scenarios you spotted the critical findings early, but treatment \
                     followed on average {average:.1} minutes later. In {} you assessed at \
                     {first_assessment:.0} minutes and treated at {first_treatment:.0}. What was \
                     going through your mind in that gap?",
                    first.scenario_id
                )
            } else {
                format!(
                    "You moved from recognition to treatment quickly, {average:.1} minutes on \
                     average. That is exactly the decisiveness these patients need."
                )
            }),
        }
    }

    // -- Decision quality ---------------------------------------------------

    /// Completed checklist items grouped by domain: `(domain, levels, actions)`.
    fn by_domain(
        reports: &[AarReport],
    ) -> BTreeMap<String, Vec<(CompetenceLevel, String, String)>> {
        let mut domains: BTreeMap<String, Vec<(CompetenceLevel, String, String)>> = BTreeMap::new();
        for report in reports {
            for action in &report.competence_assessment.actions {
                domains
                    .entry(clinical_domain(action.category.as_deref(), &action.action))
                    .or_default()
                    .push((
                        action.competence_level,
                        action.action.clone(),
                        report.scenario_id.clone(),
                    ));
            }
        }
        domains
    }

    /// Domain with the highest share of exemplary or competent actions.
    #[must_use]
    pub fn consistent_strength(&self, reports: &[AarReport]) -> Pattern {
        let kind = PatternKind::ConsistentStrength;
        let mut strengths: Vec<(String, usize, usize, Vec<String>)> = Self::by_domain(reports)
            .into_iter()
            .filter_map(|(domain, actions)| {
                let good: Vec<String> = actions
                    .iter()
                    .filter(|(level, _, _)| level.is_proficient())
                    .map(|(level, action, scenario)| {
                        format!("{scenario}: {action} ({})", level.label())
                    })
                    .collect();
                self.consistent(good.len(), actions.len(), self.thresholds.strength_rate)
                    .then(|| (domain, good.len(), actions.len(), good))
            })
            .collect();

        if strengths.is_empty() {
            return Pattern::not_detected(
                kind,
                "No domain was consistently proficient across scenarios",
            );
        }
        strengths.sort_by(|a, b| {
            let rate = |s: &(String, usize, usize, Vec<String>)| s.1 as f64 / s.2 as f64;
            rate(b).total_cmp(&rate(a)).then(b.1.cmp(&a.1))
        });
        let (domain, good, total, evidence) = strengths.swap_remove(0);
        let percent = good * 100 / total;

        Pattern {
            kind,
            detected: true,
            is_strength: true,
            severity: None,
            priority: Some(PatternPriority::P1),
            evidence,
            educational_focus: Some(format!("Reliable {domain} performance to build on")),
            talking_point: Some(format!(
                "Your {domain} was consistently strong: {good} of {total} {domain} actions \
                 ({percent}%) were exemplary or competent. That is a solid foundation."
            )),
        }
    }

    /// Domain with the highest share of developing or novice actions.
    #[must_use]
    pub fn consistent_weakness(&self, reports: &[AarReport]) -> Pattern {
        let kind = PatternKind::ConsistentWeakness;
        let mut weaknesses: Vec<_> = Self::by_domain(reports)
            .into_iter()
            .filter_map(|(domain, actions)| {
                let poor: Vec<String> = actions
                    .iter()
                    .filter(|(level, _, _)| !level.is_proficient())
                    .map(|(level, action, scenario)| {
                        format!("{scenario}: {action} ({})", level.label())
                    })
                    .collect();
                let novice = actions
                    .iter()
                    .filter(|(level, _, _)| *level == CompetenceLevel::Novice)
                    .count();
                self.consistent(poor.len(), actions.len(), self.thresholds.weakness_rate)
                    .then(|| (domain, poor.len(), novice, actions.len(), poor))
            })
            .collect();

        if weaknesses.is_empty() {
            return Pattern::not_detected(kind, "No domain was consistently weak across scenarios");
        }
        // Unsafe technique first, then the poorest share.
        weaknesses.sort_by(|a, b| {
            let rate = |w: &(String, usize, usize, usize, Vec<String>)| w.1 as f64 / w.3 as f64;
            b.2.cmp(&a.2).then(rate(b).total_cmp(&rate(a)))
        });
        let (domain, poor, novice, total, evidence) = weaknesses.swap_remove(0);

        Pattern {
            kind,
            detected: true,
            is_strength: false,
            severity: Some(if novice > 0 {
                PatternSeverity::High
            } else {
                PatternSeverity::Moderate
            }),
            priority: Some(PatternPriority::P1),
            evidence,
            educational_focus: Some(format!(
                "Recurring difficulty with {domain}: targeted remediation"
            )),
            talking_point: Some(if novice > 0 {
                format!(
                    "I want to look at {domain} together. {poor} of {total} {domain} actions were \
                     late or unsafe, including {}. What makes these decisions hard for you?",
                    plural(novice, "unsafe action")
                )
            } else {
                format!(
                    "{poor} of {total} {domain} actions came only once the patient had already \
                     deteriorated. Let's talk about what would help you get there sooner."
                )
            }),
        }
    }

    // -- Clinical reasoning -------------------------------------------------

    /// Whether early actions follow Airway, Breathing, Circulation order.
    #[must_use]
    pub fn systematic_assessment(&self, reports: &[AarReport]) -> Pattern {
        let sequences: Vec<(&AarReport, Vec<AbcStep>, bool)> = reports
            .iter()
            .map(|report| {
                let steps: Vec<AbcStep> = report
                    .timeline
                    .iter()
                    .filter(|e| e.minutes_mark < self.thresholds.early_window_minutes)
                    .take(self.thresholds.initial_actions)
                    .map(|e| abc_step(&e.name))
                    .collect();
                let systematic = follows_abc_order(&steps);
                (report, steps, systematic)
            })
            .collect();
        let systematic = sequences.iter().filter(|(_, _, s)| *s).count();
        let total = sequences.len();
        let is_strength = self.consistent(systematic, total, self.thresholds.strength_rate);

        let evidence = sequences
            .iter()
            .map(|(report, steps, s)| {
                format!(
                    "{}: {:?} ({})",
                    report.scenario_id,
                    steps,
                    if *s { "systematic" } else { "unstructured" }
                )
            })
            .collect();

        Pattern {
            kind: PatternKind::SystematicAssessment,
            detected: true,
            is_strength,
            severity: (!is_strength).then_some(PatternSeverity::Moderate),
            priority: Some(PatternPriority::P1),
            evidence,
            educational_focus: Some(if is_strength {
                "Consistent ABC structure in the opening minutes".to_string()
            } else {
                "Opening assessment needs a fixed framework".to_string()
            }),
            talking_point: Some(if is_strength {
                format!(
                    "Your opening assessment followed Airway, Breathing, Circulation in \
                     {systematic} of {total} scenarios. Keeping that structure under pressure is \
                     what makes you reliable."
                )
            } else {
                format!(
                    "Your opening assessment followed ABC order in {systematic} of {total} \
                     scenarios. Working Airway, then Breathing, then Circulation every time makes \
                     it much harder to miss a critical finding."
                )
            }),
        }
    }

    // -- Errors -------------------------------------------------------------

    /// Most common kind of medication error.
    #[must_use]
    pub fn medication_error_type(&self, reports: &[AarReport]) -> Pattern {
        let kind = PatternKind::MedicationErrorType;
        let errors: Vec<MedicationError> = reports.iter().flat_map(medication_errors).collect();
        if errors.is_empty() {
            return Pattern::not_detected(kind, "No medication errors: clean safety profile");
        }

        let mut counts: BTreeMap<MedicationErrorKind, usize> = BTreeMap::new();
        for error in &errors {
            *counts.entry(error.kind).or_default() += 1;
        }
        // Ties go to the kind listed first.
        let (most_common, count) = counts
            .iter()
            .fold((MedicationErrorKind::Contraindication, 0), |best, (k, c)| {
                if *c > best.1 { (*k, *c) } else { best }
            });

        Pattern {
            kind,
            detected: true,
            is_strength: false,
            severity: Some(if count >= self.thresholds.min_occurrences {
                PatternSeverity::High
            } else {
                PatternSeverity::Moderate
            }),
            priority: Some(PatternPriority::P1),
            evidence: errors
                .iter()
                .map(|e| {
                    format!(
                        "{}: {} ({}) at {:.1} min",
                        e.scenario_id, e.medication, e.kind, e.minutes
                    )
                })
                .collect(),
            educational_focus: Some(format!("Recurring {most_common} errors: pharmacology review")),
            talking_point: Some(format!(
                "You made {} across the scenarios, and {count} of {} involved {most_common}. These \
                 are the errors that hurt patients immediately, so let's go through why each one \
                 mattered.",
                plural(errors.len(), "medication error"),
                errors.len()
            )),
        }
    }

    // -- Patient awareness --------------------------------------------------

    /// How often the patient was kept out of the critical state.
    #[must_use]
    pub fn deterioration_prevention(&self, reports: &[AarReport]) -> Pattern {
        let outcomes: Vec<(&AarReport, bool, bool)> = reports
            .iter()
            .map(|report| {
                let history = &report.patient_progression.state_history;
                let reached_critical = history.iter().any(|r| r.state == PatientState::Critical);
                let final_state = report.patient_progression.final_state;
                let prevented = final_state.is_recovering()
                    || (final_state == PatientState::Initial && !reached_critical);
                (report, reached_critical, prevented)
            })
            .collect();
        let total = outcomes.len();
        let prevented = outcomes.iter().filter(|(_, _, p)| *p).count();
        let critical = outcomes.iter().filter(|(_, c, _)| *c).count();
        let is_strength = self.consistent(prevented, total, self.thresholds.strength_rate);
        let severity = match critical {
            0 => PatternSeverity::Low,
            1 => PatternSeverity::Moderate,
            _ => PatternSeverity::High,
        };

        let evidence = outcomes
            .iter()
            .map(|(report, reached_critical, p)| {
                format!(
                    "{}: final state {}{}{}",
                    report.scenario_id,
                    report.patient_progression.final_state,
                    if *reached_critical { ", reached critical" } else { "" },
                    if *p { ", deterioration prevented" } else { "" }
                )
            })
            .collect();

        let critical_scenarios: Vec<&str> = outcomes
            .iter()
            .filter(|(_, c, _)| *c)
            .map(|(r, _, _)| r.scenario_id.as_str())
            .collect();

        Pattern {
            kind: PatternKind::DeteriorationPrevention,
            detected: true,
            is_strength,
            severity: Some(severity),
            priority: Some(PatternPriority::P1),
            evidence,
            educational_focus: Some(if critical == 0 {
                "Proactive care: patients kept out of the critical state".to_string()
            } else {
                "Reactive care: patients reached high-risk states before treatment".to_string()
            }),
            talking_point: Some(if critical >= self.thresholds.min_occurrences {
                format!(
                    "The patient reached the critical state in {} ({}). Let's look at where \
                     earlier, more aggressive treatment could have changed that.",
                    plural(critical, "scenario"),
                    critical_scenarios.join(", ")
                )
            } else if prevented > 0 {
                format!(
                    "You kept the patient stable or improving in {prevented} of {total} scenarios. \
                     That proactive approach is exactly what we want."
                )
            } else {
                "None of the patients ended the scenario improving. Let's find the moment where \
                 treatment could have turned things around."
                    .to_string()
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domain_prefers_authored_category() {
        assert_eq!(clinical_domain(Some("Treatment"), "Give IM adrenaline"), "treatment");
        assert_eq!(clinical_domain(None, "Apply high-flow oxygen"), "breathing");
        assert_eq!(clinical_domain(None, "ABCDE systematic assessment"), "assessment");
        assert_eq!(clinical_domain(Some("  "), "Sing a song"), "other");
    }

    #[test]
    fn abc_classification_and_order() {
        assert_eq!(abc_step("Check airway patency"), AbcStep::A);
        assert_eq!(abc_step("Listen to lung sounds"), AbcStep::B);
        assert_eq!(abc_step("Check BP"), AbcStep::C);
        assert_eq!(abc_step("Check GCS"), AbcStep::D);
        assert_eq!(abc_step("Ask about symptoms"), AbcStep::Other);

        use AbcStep::{A, B, C, Other};
        assert!(follows_abc_order(&[Other, A, Other, B, C]));
        assert!(!follows_abc_order(&[B, A, C]));
        assert!(!follows_abc_order(&[A, B]));
        assert!(follows_abc_order(&[A, B, A, C, B]));
    }

    #[test]
    fn empty_input_is_not_ready() {
        let analysis = PatternAnalysisService::default().analyze(&[]);
        assert!(!analysis.summary.ready_for_analysis);
        assert_eq!(analysis.summary.patterns_detected, 0);
        assert!(analysis.detected().is_empty());
    }

    #[test]
    fn consistency_needs_minimum_occurrences() {
        let service = PatternAnalysisService::default();
        assert!(!service.consistent(1, 1, 0.67));
        assert!(service.consistent(2, 3, 0.67));
        assert!(!service.consistent(2, 4, 0.67));
        assert!(!service.consistent(0, 0, 0.5));
    }
}
