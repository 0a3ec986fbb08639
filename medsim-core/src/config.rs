//! Configuration for the simulation engine and its host.
//!
//! Maps directly to `medsim.toml`. Every field has a default, so an empty
//! file (or no file at all) yields a working configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level configuration, loadable from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MedsimConfig {
    /// General settings.
    #[serde(default)]
    pub general: GeneralConfig,
    /// Scenario engine tuning.
    #[serde(default)]
    pub engine: EngineConfig,
    /// Session hosting settings.
    #[serde(default)]
    pub session: SessionConfig,
}

impl MedsimConfig {
    /// Load configuration from a TOML string.
    ///
    /// # Errors
    /// Returns `MedsimError::Config` if the TOML is invalid.
    pub fn from_toml(toml_str: &str) -> crate::error::Result<Self> {
        toml::from_str(toml_str).map_err(|e| crate::MedsimError::Config(e.to_string()))
    }

    /// Load configuration from a TOML file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> crate::error::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }
}

// ---------------------------------------------------------------------------
// Sub-configs
// ---------------------------------------------------------------------------

/// General settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Log level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Emit logs as JSON lines instead of human-readable text.
    #[serde(default)]
    pub json_logs: bool,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
        }
    }
}

/// Scenario engine thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Hard scenario time limit.
    #[serde(default = "default_time_limit")]
    pub time_limit_minutes: f64,
    /// Minutes of `improving` needed before the scenario counts as stabilised.
    #[serde(default = "default_stabilization")]
    pub stabilization_minutes: f64,
    /// How long after an action its outcome is sampled for competence.
    #[serde(default = "default_assessment_window")]
    pub assessment_window_minutes: f64,
    /// Elapsed minutes without treatment before the urgency hint appears.
    #[serde(default = "default_urgency_hint")]
    pub urgency_hint_after_minutes: f64,
    /// Completed milestones required to call the approach systematic.
    #[serde(default = "default_systematic_threshold")]
    pub systematic_milestone_threshold: usize,
    /// Exemplary actions required to name it as a strength.
    #[serde(default = "default_exemplary_threshold")]
    pub exemplary_strength_threshold: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            time_limit_minutes: 20.0,
            stabilization_minutes: 12.0,
            assessment_window_minutes: 2.5,
            urgency_hint_after_minutes: 5.0,
            systematic_milestone_threshold: 5,
            exemplary_strength_threshold: 4,
        }
    }
}

/// Session hosting settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Background deterioration tick interval.
    #[serde(default = "default_tick_interval")]
    pub tick_interval_secs: u64,
    /// Skip a tick if an action was processed more recently than this.
    #[serde(default = "default_min_tick_spacing")]
    pub min_tick_spacing_secs: u64,
    /// End the scenario automatically when an end condition is reached.
    #[serde(default = "default_true")]
    pub auto_end: bool,
    /// Capacity of each session's command queue.
    #[serde(default = "default_command_buffer")]
    pub command_buffer: usize,
    /// Directory holding scenario blueprints.
    #[serde(default)]
    pub blueprint_dir: Option<PathBuf>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: 30,
            min_tick_spacing_secs: 25,
            auto_end: true,
            command_buffer: 32,
            blueprint_dir: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Serde default helpers
// ---------------------------------------------------------------------------

fn default_true() -> bool { true }
fn default_log_level() -> String { "info".to_string() }
fn default_time_limit() -> f64 { 20.0 }
fn default_stabilization() -> f64 { 12.0 }
fn default_assessment_window() -> f64 { 2.5 }
fn default_urgency_hint() -> f64 { 5.0 }
fn default_systematic_threshold() -> usize { 5 }
fn default_exemplary_threshold() -> usize { 4 }
fn default_tick_interval() -> u64 { 30 }
fn default_min_tick_spacing() -> u64 { 25 }
fn default_command_buffer() -> usize { 32 }

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_yields_defaults() {
        let cfg = MedsimConfig::from_toml("").expect("empty config parses");
        assert_eq!(cfg.general.log_level, "info");
        assert!((cfg.engine.time_limit_minutes - 20.0).abs() < f64::EPSILON);
        assert_eq!(cfg.session.tick_interval_secs, 30);
        assert!(cfg.session.auto_end);
        assert!(cfg.session.blueprint_dir.is_none());
    }

    #[test]
    fn partial_sections_override_only_named_fields() {
        let cfg = MedsimConfig::from_toml(
            r#"
            [engine]
            time_limit_minutes = 15.0

            [session]
            auto_end = false
            blueprint_dir = "scenarios"
            "#,
        )
        .expect("valid config");
        assert!((cfg.engine.time_limit_minutes - 15.0).abs() < f64::EPSILON);
        assert!((cfg.engine.assessment_window_minutes - 2.5).abs() < f64::EPSILON);
        assert!(!cfg.session.auto_end);
        assert_eq!(cfg.session.blueprint_dir, Some(PathBuf::from("scenarios")));
    }

    #[test]
    fn invalid_toml_is_a_config_error() {
        let err = MedsimConfig::from_toml("[engine\n").unwrap_err();
        assert!(matches!(err, crate::MedsimError::Config(_)));
    }

    #[test]
    fn from_file_reads_disk() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("medsim.toml");
        std::fs::write(&path, "[general]\njson_logs = true\n").expect("write");
        let cfg = MedsimConfig::from_file(&path).expect("load");
        assert!(cfg.general.json_logs);
    }
}
