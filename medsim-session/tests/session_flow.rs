//! Session hosting tests on a paused tokio clock.
//!
//! The actor derives simulation time from `tokio::time::Instant`, so sleeping
//! in a `start_paused` test advances the scenario deterministically and lets
//! the background tick fire on schedule.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use medsim_core::action::Action;
use medsim_core::blueprint::ScenarioBlueprint;
use medsim_core::config::MedsimConfig;
use medsim_core::engine::{ActionErrorCode, EngineStatus};
use medsim_core::report::EndReason;
use medsim_core::types::{PatientState, Route};
use medsim_session::{BlueprintCatalog, SessionError, SessionRegistry};

fn scenarios_dir() -> std::path::PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("../scenarios")
}

fn anaphylaxis() -> Arc<ScenarioBlueprint> {
    BlueprintCatalog::load_dir(&scenarios_dir())
        .expect("sample scenarios load")
        .resolve("anaphylaxis")
        .expect("anaphylaxis sample present")
}

fn minutes(m: u64) -> Duration {
    Duration::from_secs(m * 60)
}

fn adrenaline_im() -> Action {
    Action::treatment("Adrenaline", Some("0.5 mg"))
        .with_id("CA4")
        .with_route(Route::Intramuscular)
}

#[test]
fn sample_catalog_has_both_formats() {
    let catalog = BlueprintCatalog::load_dir(&scenarios_dir()).expect("sample scenarios load");
    let ids: Vec<&str> = catalog.ids().collect();
    assert_eq!(ids, vec!["ANAPHYLAXIS_MVP_001", "ASTHMA_MVP_001"]);
}

#[tokio::test(start_paused = true)]
async fn tick_deteriorates_a_silent_patient() {
    let registry = SessionRegistry::new(&MedsimConfig::default());
    let session = registry.create_session();
    let handle = registry.start_scenario(session, anaphylaxis()).expect("starts");

    tokio::time::sleep(minutes(4)).await;
    assert_eq!(handle.progress().await.expect("alive").current_state, PatientState::Initial);

    // Thresholds at 5 and 9 minutes; the 30 s tick has run by 6.5 minutes.
    tokio::time::sleep(Duration::from_secs(150)).await;
    let progress = handle.progress().await.expect("alive");
    assert_eq!(progress.current_state, PatientState::EarlyDeteriorating);
    assert!(progress.elapsed_minutes >= 6.5);
}

#[tokio::test(start_paused = true)]
async fn early_adrenaline_keeps_the_patient_improving() {
    let registry = SessionRegistry::new(&MedsimConfig::default());
    let session = registry.create_session();
    let handle = registry.start_scenario(session, anaphylaxis()).expect("starts");

    tokio::time::sleep(minutes(1)).await;
    let result = handle.process_action(adrenaline_im()).await.expect("alive");
    assert!(result.success, "{:?}", result.error);

    tokio::time::sleep(minutes(10)).await;
    assert_eq!(handle.progress().await.expect("alive").current_state, PatientState::Improving);
    assert_eq!(handle.status().await.expect("alive"), EngineStatus::Running);
}

#[tokio::test(start_paused = true)]
async fn critical_patient_auto_ends_and_stops_accepting_actions() {
    let registry = SessionRegistry::new(&MedsimConfig::default());
    let session = registry.create_session();
    let handle = registry.start_scenario(session, anaphylaxis()).expect("starts");

    // Critical at 13 minutes; the next tick ends the scenario.
    tokio::time::sleep(minutes(14)).await;
    assert_eq!(handle.status().await.expect("alive"), EngineStatus::Ended {
        reason: EndReason::PatientCritical
    });

    let late = handle.process_action(adrenaline_im()).await.expect("alive");
    assert!(!late.success);
    assert_eq!(late.error.map(|e| e.code), Some(ActionErrorCode::ScenarioNotRunning));

    let report = registry.finish_scenario(session).await.expect("report");
    assert_eq!(report.end_reason, Some(EndReason::PatientCritical));
    assert!(report.safety_gate.failures.iter().any(|f| f.id == "SF1"));
    assert!(handle.progress().await.is_err(), "finished actors stop");
}

#[tokio::test(start_paused = true)]
async fn steady_actions_do_not_hold_off_auto_end() {
    let registry = SessionRegistry::new(&MedsimConfig::default());
    let session = registry.create_session();
    let handle = registry.start_scenario(session, anaphylaxis()).expect("starts");

    // An action every 20 s is inside the tick spacing for the whole run.
    for _ in 0..45 {
        tokio::time::sleep(Duration::from_secs(20)).await;
        handle
            .process_action(Action::communication("Keep talking to her"))
            .await
            .expect("alive");
    }

    assert_eq!(handle.status().await.expect("alive"), EngineStatus::Ended {
        reason: EndReason::PatientCritical
    });
    let late = handle
        .process_action(Action::communication("Still here"))
        .await
        .expect("alive");
    assert_eq!(late.error.map(|e| e.code), Some(ActionErrorCode::ScenarioNotRunning));
}

#[tokio::test(start_paused = true)]
async fn without_auto_end_the_scenario_keeps_running() {
    let config = MedsimConfig::from_toml("[session]\nauto_end = false\n").expect("valid");
    let registry = SessionRegistry::new(&config);
    let session = registry.create_session();
    let handle = registry.start_scenario(session, anaphylaxis()).expect("starts");

    tokio::time::sleep(minutes(14)).await;
    assert_eq!(handle.status().await.expect("alive"), EngineStatus::Running);
    assert_eq!(handle.should_end().await.expect("alive"), Some(EndReason::PatientCritical));
    assert_eq!(handle.progress().await.expect("alive").current_state, PatientState::Critical);
}

#[tokio::test(start_paused = true)]
async fn one_scenario_at_a_time_per_session() {
    let registry = SessionRegistry::new(&MedsimConfig::default());
    let session = registry.create_session();
    registry.start_scenario(session, anaphylaxis()).expect("starts");

    assert!(matches!(
        registry.start_scenario(session, anaphylaxis()),
        Err(SessionError::ScenarioAlreadyActive(id)) if id == session
    ));
    assert_eq!(registry.active_count(), 1);

    let stranger = uuid::Uuid::new_v4();
    assert!(matches!(registry.active(stranger), Err(SessionError::UnknownSession(_))));
    assert!(matches!(
        registry.finish_scenario(stranger).await,
        Err(SessionError::UnknownSession(_))
    ));
}

#[tokio::test(start_paused = true)]
async fn session_debrief_spans_finished_scenarios() {
    let registry = SessionRegistry::new(&MedsimConfig::default());
    let session = registry.create_session();

    assert!(matches!(
        registry.debrief(session, Utc::now()),
        Err(SessionError::Debrief(_))
    ));

    let first = registry.start_scenario(session, anaphylaxis()).expect("starts");
    tokio::time::sleep(minutes(1)).await;
    first.process_action(adrenaline_im()).await.expect("alive");
    tokio::time::sleep(minutes(2)).await;
    registry.finish_scenario(session).await.expect("first report");
    assert!(matches!(registry.active(session), Err(SessionError::NoActiveScenario(_))));

    registry.start_scenario(session, anaphylaxis()).expect("second starts");
    tokio::time::sleep(minutes(14)).await;
    registry.finish_scenario(session).await.expect("second report");

    assert_eq!(registry.reports(session).expect("known").len(), 2);
    let context = registry.debrief(session, Utc::now()).expect("two reports");
    assert_eq!(context.total_scenarios, 2);
    let markdown = context.to_string();
    assert!(markdown.contains("**Patient:** Mia Novak"));
    assert!(markdown.contains("patient_critical"));

    let archived = registry.close_session(session).expect("known");
    assert_eq!(archived.len(), 2);
    assert_eq!(registry.session_count(), 0);
}
