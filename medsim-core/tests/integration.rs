//! Integration tests for the scenario engine.
//!
//! These drive a [`ScenarioEngine`] end to end through the sample scenarios
//! shipped in `scenarios/`: untreated deterioration, treatment response,
//! silent safety tracking, milestones, and the after-action report.

use std::path::Path;
use std::sync::Arc;

use medsim_core::action::Action;
use medsim_core::blueprint::{FailureType, ScenarioBlueprint};
use medsim_core::config::EngineConfig;
use medsim_core::engine::{
    ActionErrorCode, ActionOutcome, ActionSeverity, EngineStatus, ScenarioEngine,
};
use medsim_core::report::{EndReason, ImprovementPriority};
use medsim_core::types::{CompetenceLevel, PatientState, Route, SimTimestamp};

const ANAPHYLAXIS: &str = include_str!("../../scenarios/anaphylaxis.json");

fn at(minutes: f64) -> SimTimestamp {
    SimTimestamp::from_minutes(minutes)
}

fn anaphylaxis() -> Arc<ScenarioBlueprint> {
    Arc::new(ScenarioBlueprint::from_json_str(ANAPHYLAXIS).expect("sample blueprint parses"))
}

fn running(blueprint: Arc<ScenarioBlueprint>) -> ScenarioEngine {
    let mut engine = ScenarioEngine::new(blueprint, EngineConfig::default());
    assert!(engine.start());
    engine
}

fn adrenaline_im() -> Action {
    Action::treatment("Adrenaline", Some("0.5 mg"))
        .with_id("CA4")
        .with_route(Route::Intramuscular)
}

// ---------------------------------------------------------------------------
// Deterioration
// ---------------------------------------------------------------------------

#[test]
fn untreated_patient_deteriorates_on_schedule() {
    let blueprint = ScenarioBlueprint::from_json_str(
        r#"{
            "scenario_id": "DETERIORATION_001",
            "patient_profile": { "name": "Lee" },
            "initial_vitals": { "HR": 110, "SpO2": 92 },
            "simulation_config": { "deterioration_timing_minutes": [5, 10, 15] }
        }"#,
    )
    .expect("valid");
    let mut engine = running(Arc::new(blueprint));

    assert_eq!(engine.update_patient_state(at(4.0)), None);
    assert_eq!(engine.update_patient_state(at(6.0)), Some(PatientState::EarlyDeteriorating));
    assert_eq!(engine.update_patient_state(at(11.0)), Some(PatientState::Deteriorating));
    assert_eq!(engine.update_patient_state(at(16.0)), Some(PatientState::Critical));
    assert_eq!(engine.update_patient_state(at(17.0)), None);

    let states: Vec<PatientState> = engine
        .state_tracker()
        .state_history()
        .iter()
        .map(|r| r.state)
        .collect();
    assert_eq!(
        states,
        vec![
            PatientState::Initial,
            PatientState::EarlyDeteriorating,
            PatientState::Deteriorating,
            PatientState::Critical,
        ]
    );
    assert_eq!(engine.should_scenario_end(at(16.0)), Some(EndReason::PatientCritical));
}

#[test]
fn no_treatment_progression_overlays_vitals() {
    let mut engine = running(anaphylaxis());
    engine.update_patient_state(at(9.5));

    let vitals = engine.state_tracker().current_vitals();
    assert_eq!(vitals.heart_rate, Some(142.0));
    assert_eq!(vitals.spo2, Some(86.0));
    // Untouched by any progression step.
    assert_eq!(vitals.bp_diastolic, Some(58.0));
    assert_eq!(engine.state_tracker().current_state(), PatientState::Deteriorating);
}

#[test]
fn critical_treatment_halts_deterioration_and_improves_after_onset() {
    let mut engine = running(anaphylaxis());

    let result = engine.process_student_action(&adrenaline_im(), at(2.0));
    assert!(result.success, "{:?}", result.error);
    assert!(matches!(result.results, ActionOutcome::Treatment(ref effect) if effect.critical));
    assert_eq!(result.progress_data.current_state, PatientState::Initial);

    assert_eq!(engine.update_patient_state(at(3.0)), None);
    assert_eq!(engine.state_tracker().current_state(), PatientState::Initial);

    engine.update_patient_state(at(4.0));
    assert_eq!(engine.state_tracker().current_state(), PatientState::Improving);
    assert_eq!(engine.state_tracker().current_vitals().spo2, Some(97.0));

    // Long past every deterioration threshold.
    engine.update_patient_state(at(14.0));
    assert_eq!(engine.state_tracker().current_state(), PatientState::Improving);
    assert_eq!(engine.state_tracker().worst_state_reached(), PatientState::Initial);
}

// ---------------------------------------------------------------------------
// Safety gate
// ---------------------------------------------------------------------------

#[test]
fn allergen_is_one_silent_contraindication() {
    let mut engine = running(anaphylaxis());
    let vitals_before = engine.state_tracker().current_vitals();

    let penicillin = Action::treatment("Penicillin", Some("1 g"));
    let result = engine.process_student_action(&penicillin, at(1.0));
    assert!(!result.success);
    let error = result.error.expect("unknown medication");
    assert_eq!(error.code, ActionErrorCode::UnknownMedication);

    // Giving it again does not log a second failure.
    engine.process_student_action(&Action::treatment("Penicillin", Some("1 g")), at(1.5));

    let failures = engine.performance().safety_gate().failures();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].id, "SF3");
    assert_eq!(failures[0].failure_type, FailureType::Contraindication);

    assert_eq!(engine.state_tracker().current_state(), PatientState::Initial);
    assert_eq!(engine.state_tracker().current_vitals(), vitals_before);
}

#[test]
fn iv_adrenaline_is_commission_but_still_works() {
    let mut engine = running(anaphylaxis());
    let action = Action::treatment("Adrenaline", Some("0.5 mg")).with_route(Route::Intravenous);

    let result = engine.process_student_action(&action, at(1.0));
    assert!(result.success, "the engine never blocks the trainee");

    let gate = engine.performance().safety_gate();
    assert_eq!(gate.failures().len(), 1);
    assert_eq!(gate.failures()[0].id, "SF2");
    assert_eq!(gate.failures()[0].failure_type, FailureType::Commission);

    engine.update_patient_state(at(3.5));
    assert_eq!(engine.state_tracker().current_state(), PatientState::Improving);
}

#[test]
fn cumulative_fluid_volume_crosses_threshold_once() {
    let mut engine = running(anaphylaxis());
    let bolus = || Action::treatment("Normal Saline", Some("500 ml")).with_volume(500.0);

    for minute in 1..=4 {
        engine.process_student_action(&bolus(), at(f64::from(minute)));
    }
    assert!(engine.performance().safety_gate().passed(), "2000 ml is the limit, not a breach");

    engine.process_student_action(&bolus(), at(5.0));
    engine.process_student_action(&bolus(), at(5.5));
    let failures = engine.performance().safety_gate().failures();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].id, "SF4");
}

#[test]
fn overdose_warns_but_still_applies() {
    let mut engine = running(anaphylaxis());
    let overdose = Action::treatment("Adrenaline", Some("5 mg"));
    let result = engine.process_student_action(&overdose, at(1.0));

    assert!(!result.success);
    let error = result.error.expect("dose warning");
    assert_eq!(error.code, ActionErrorCode::IncorrectDose);
    assert_eq!(error.severity, ActionSeverity::Warning);
    assert!(matches!(result.results, ActionOutcome::Treatment(_)));
    assert!(engine.state_tracker().has_critical_treatment());
}

#[test]
fn missing_adrenaline_is_reported_as_omission() {
    let mut engine = running(anaphylaxis());
    let scene = Action::communication("Ensure scene safety").with_id("CA1");
    engine.process_student_action(&scene, at(0.5));

    let report = engine.generate_performance_report(at(14.0));
    assert_eq!(report.end_reason, Some(EndReason::PatientCritical));
    assert!(!report.safety_gate.passed);
    assert_eq!(report.safety_gate.failures[0].id, "SF1");
    assert_eq!(report.safety_gate.failures[0].failure_type, FailureType::Omission);
    assert_eq!(report.competence_assessment.overall, CompetenceLevel::Novice);
    assert_eq!(report.competence_assessment.overall_reason, "Critical safety failures identified");
    assert!(
        report
            .areas_for_improvement
            .first()
            .is_some_and(|area| area.priority == ImprovementPriority::High)
    );
    assert!(
        report
            .teaching_points
            .iter()
            .any(|t| t == "Adrenaline is the only drug that reverses anaphylaxis")
    );
}

// ---------------------------------------------------------------------------
// Milestones and the full report
// ---------------------------------------------------------------------------

fn systematic_run(engine: &mut ScenarioEngine) {
    let steps = [
        (0.5, Action::communication("Ensure scene safety").with_id("CA1")),
        (1.0, Action::assessment("This looks like anaphylaxis", None, false).with_id("CA2")),
        (1.5, Action::communication("Apply high-flow oxygen").with_id("CA3")),
        (2.0, adrenaline_im()),
        (3.0, Action::assessment("ABCDE assessment", Some("airway"), false).with_id("CA5")),
        (6.0, Action::assessment("Reassess vital signs", None, true).with_id("CA6")),
    ];
    for (minute, action) in steps {
        let result = engine.process_student_action(&action, at(minute));
        assert!(result.success, "{} failed: {:?}", action.name, result.error);
    }
}

#[test]
fn all_six_milestones_mark_a_systematic_approach() {
    let mut engine = running(anaphylaxis());
    systematic_run(&mut engine);
    // Repeating an action does not complete anything twice.
    let scene = Action::communication("Ensure scene safety").with_id("CA1");
    engine.process_student_action(&scene, at(7.0));

    let summary = engine.performance().milestones().summary();
    assert_eq!(summary.completed, 6);
    assert_eq!(summary.total_milestones, 6);
    assert!(summary.systematic_approach);
    assert!((summary.completion_rate - 1.0).abs() < f64::EPSILON);
    assert_eq!(summary.milestones[1].name, "Recognition");
    assert_eq!(summary.milestones[1].description, "Recognised anaphylaxis");
}

#[test]
fn assessment_reveals_state_dependent_findings_and_vitals() {
    let mut engine = running(anaphylaxis());
    let airway = Action::assessment("check airway", Some("airway"), true);
    let result = engine.process_student_action(&airway, at(1.0));
    let ActionOutcome::Assessment { finding, vitals } = result.results else {
        panic!("expected an assessment outcome");
    };
    assert_eq!(finding.as_deref(), Some("Lip swelling, voice hoarse"));
    assert_eq!(vitals.expect("vitals requested").heart_rate.as_deref(), Some("124 bpm"));

    let again = Action::assessment("airway again", Some("Airway"), false);
    let later = engine.process_student_action(&again, at(10.0));
    let ActionOutcome::Assessment { finding, vitals } = later.results else {
        panic!("expected an assessment outcome");
    };
    assert_eq!(finding.as_deref(), Some("Inspiratory stridor"));
    assert!(vitals.is_none());
}

#[test]
fn full_report_after_a_stabilised_run() {
    let mut engine = running(anaphylaxis());
    systematic_run(&mut engine);

    let report = engine.generate_performance_report(at(12.5));
    assert_eq!(engine.status(), EngineStatus::Ended {
        reason: EndReason::PatientStabilized
    });
    assert_eq!(report.end_reason, Some(EndReason::PatientStabilized));
    assert_eq!(report.scenario_id, "ANAPHYLAXIS_MVP_001");
    assert_eq!(report.scenario_title.as_deref(), Some("Bee sting at the allotment"));

    assert_eq!(report.summary.checklist_completed, 6);
    assert_eq!(report.summary.checklist_total, 6);
    assert_eq!(report.summary.critical_completed, 2);
    assert_eq!(report.summary.critical_total, 2);
    assert_eq!(report.summary.final_state, PatientState::Improving);
    assert!(report.summary.critical_treatment_given);
    assert!(report.missed_actions.is_empty());

    assert!(report.safety_gate.enabled);
    assert!(report.safety_gate.passed);
    assert_eq!(report.progress_milestones.summary.completed, 6);
    assert!(report.progress_milestones.acknowledgement.is_some());

    let adrenaline = report
        .competence_assessment
        .actions
        .iter()
        .find(|a| a.checklist_id == "CA4")
        .expect("CA4 assessed");
    assert_eq!(adrenaline.competence_level, CompetenceLevel::Exemplary);
    assert_eq!(adrenaline.patient_state_at_action, PatientState::Initial);
    assert_eq!(adrenaline.patient_state_after, PatientState::Improving);
    assert_eq!(adrenaline.timestamp_formatted, "02:00");
    assert_eq!(
        adrenaline.feedback.as_ref().map(|f| f.teaching_point.as_str()),
        Some("Early IM adrenaline stops anaphylaxis progressing")
    );

    assert_eq!(report.timeline.len(), 6);
    assert_eq!(report.patient_progression.worst_state_reached, PatientState::Initial);
    assert!(report.strengths.iter().any(|s| s.contains("afety")));

    let json = report.to_json_pretty().expect("serialises");
    assert!(json.contains("\"end_reason\": \"patient_stabilized\""));
}

#[test]
fn actions_after_the_report_are_rejected() {
    let mut engine = running(anaphylaxis());
    engine.generate_performance_report(at(1.0));
    assert_eq!(engine.status(), EngineStatus::Ended {
        reason: EndReason::Completed
    });

    let result = engine.process_student_action(&adrenaline_im(), at(2.0));
    assert!(!result.success);
    assert_eq!(result.error.map(|e| e.code), Some(ActionErrorCode::ScenarioNotRunning));
    assert!(!engine.state_tracker().has_critical_treatment());
}

// ---------------------------------------------------------------------------
// TOML blueprint
// ---------------------------------------------------------------------------

#[test]
fn toml_scenario_runs_with_legacy_safety_rules() {
    let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("../scenarios/asthma.toml");
    let blueprint = ScenarioBlueprint::from_file(&path).expect("sample TOML blueprint loads");
    let mut engine = running(Arc::new(blueprint));

    // NSAID blacklist from a free-text legacy condition.
    engine.process_student_action(&Action::treatment("Ibuprofen", Some("400 mg")), at(1.0));
    let failures = engine.performance().safety_gate().failures();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].id, "SF2");

    let report = engine.generate_performance_report(at(8.0));
    let ids: Vec<&str> = report.safety_gate.failures.iter().map(|f| f.id.as_str()).collect();
    // Omissions are listed before commissions.
    assert_eq!(ids, vec!["SF1", "SF2"]);
    assert_eq!(report.summary.final_state, PatientState::EarlyDeteriorating);
    assert_eq!(report.missed_actions.len(), 3);
}
