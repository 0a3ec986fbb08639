//! Inbound trainee actions.
//!
//! The dialogue consumer turns free text into an [`Action`]; the engine
//! dispatches on its type. Everything except the name is optional.

use crate::types::Route;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of trainee action.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ActionType {
    /// Giving a medication.
    Treatment,
    /// Examining or measuring something.
    Assessment,
    /// Talking to the patient or team.
    Communication,
    /// Anything else, kept verbatim.
    Other(String),
}

impl From<String> for ActionType {
    fn from(s: String) -> Self {
        match s.trim().to_lowercase().as_str() {
            "treatment" | "medication" => Self::Treatment,
            "assessment" => Self::Assessment,
            "communication" => Self::Communication,
            _ => Self::Other(s),
        }
    }
}

impl From<ActionType> for String {
    fn from(t: ActionType) -> Self {
        t.to_string()
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Treatment => f.write_str("treatment"),
            Self::Assessment => f.write_str("assessment"),
            Self::Communication => f.write_str("communication"),
            Self::Other(other) => f.write_str(other),
        }
    }
}

/// One trainee action.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Action {
    /// Dispatch type. Missing types are rejected by the engine.
    #[serde(rename = "type", default)]
    pub action_type: Option<ActionType>,
    /// Free-text description.
    #[serde(default)]
    pub name: String,
    /// Checklist id, when the consumer already resolved it.
    #[serde(default, alias = "actionId", skip_serializing_if = "Option::is_none")]
    pub action_id: Option<String>,
    /// Medication name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub drug: Option<String>,
    /// Dose as stated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dose: Option<String>,
    /// Route of administration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub route: Option<Route>,
    /// Volume for fluids.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume_ml: Option<f64>,
    /// Assessment key into the blueprint's findings.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assessment_type: Option<String>,
    /// Whether the assessment reveals current vitals.
    #[serde(default)]
    pub includes_vitals: bool,
    /// Technique quality, e.g. `"dangerous"`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub technique: Option<String>,
    /// Anything else the consumer attached.
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub details: serde_json::Value,
}

impl Action {
    /// A medication action.
    #[must_use]
    pub fn treatment(drug: &str, dose: Option<&str>) -> Self {
        Self {
            action_type: Some(ActionType::Treatment),
            name: drug.to_string(),
            drug: Some(drug.to_string()),
            dose: dose.map(str::to_string),
            ..Self::default()
        }
    }

    /// An assessment action.
    #[must_use]
    pub fn assessment(name: &str, assessment_type: Option<&str>, includes_vitals: bool) -> Self {
        Self {
            action_type: Some(ActionType::Assessment),
            name: name.to_string(),
            assessment_type: assessment_type.map(str::to_string),
            includes_vitals,
            ..Self::default()
        }
    }

    /// A communication action.
    #[must_use]
    pub fn communication(name: &str) -> Self {
        Self {
            action_type: Some(ActionType::Communication),
            name: name.to_string(),
            ..Self::default()
        }
    }

    /// Attach a checklist id.
    #[must_use]
    pub fn with_id(mut self, action_id: &str) -> Self {
        self.action_id = Some(action_id.to_string());
        self
    }

    /// Attach a route.
    #[must_use]
    pub fn with_route(mut self, route: Route) -> Self {
        self.route = Some(route);
        self
    }

    /// Attach a fluid volume.
    #[must_use]
    pub fn with_volume(mut self, volume_ml: f64) -> Self {
        self.volume_ml = Some(volume_ml);
        self
    }

    /// Attach a technique quality.
    #[must_use]
    pub fn with_technique(mut self, technique: &str) -> Self {
        self.technique = Some(technique.to_string());
        self
    }

    /// Text used for checklist matching: the name, else the drug, else the
    /// assessment type.
    #[must_use]
    pub fn match_text(&self) -> &str {
        [Some(self.name.as_str()), self.drug.as_deref(), self.assessment_type.as_deref()]
            .into_iter()
            .flatten()
            .find(|s| !s.trim().is_empty())
            .unwrap_or_default()
    }

    /// Whether the action was performed with dangerous technique.
    #[must_use]
    pub fn is_dangerous(&self) -> bool {
        self.technique
            .as_deref()
            .is_some_and(|t| t.trim().eq_ignore_ascii_case("dangerous"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_consumer_json() {
        let action: Action = serde_json::from_str(
            r#"{ "type": "treatment", "name": "give epi", "actionId": "CA3",
                 "drug": "Adrenaline", "dose": "0.5 mg", "route": "im" }"#,
        )
        .expect("action");
        assert_eq!(action.action_type, Some(ActionType::Treatment));
        assert_eq!(action.action_id.as_deref(), Some("CA3"));
        assert_eq!(action.route, Some(Route::Intramuscular));
        assert!(action.details.is_null());
    }

    #[test]
    fn unknown_type_is_kept() {
        let action: Action =
            serde_json::from_str(r#"{ "type": "dance", "name": "x" }"#).expect("action");
        assert_eq!(action.action_type, Some(ActionType::Other("dance".into())));
        let missing: Action = serde_json::from_str(r#"{ "name": "x" }"#).expect("action");
        assert_eq!(missing.action_type, None);
    }

    #[test]
    fn match_text_falls_back() {
        let mut action = Action::treatment("Salbutamol", None);
        action.name.clear();
        assert_eq!(action.match_text(), "Salbutamol");
        let assess = Action {
            assessment_type: Some("lung_sounds".into()),
            ..Action::default()
        };
        assert_eq!(assess.match_text(), "lung_sounds");
        assert_eq!(Action::default().match_text(), "");
    }

    #[test]
    fn dangerous_technique_is_detected() {
        assert!(Action::communication("x").with_technique("Dangerous").is_dangerous());
        assert!(!Action::communication("x").with_technique("good").is_dangerous());
    }
}
