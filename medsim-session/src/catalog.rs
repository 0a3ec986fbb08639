//! Scenario blueprint catalog.
//!
//! Loads every `.json` / `.toml` blueprint in a directory once, keyed by
//! scenario id. Lookups accept the exact id or, failing that, a
//! case-insensitive fragment of it ("anaphylaxis" finds
//! `ANAPHYLAXIS_MVP_001`).

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use medsim_core::blueprint::ScenarioBlueprint;
use tracing::{info, warn};

use crate::error::{Result, SessionError};

/// Blueprints available to a host.
#[derive(Debug, Clone, Default)]
pub struct BlueprintCatalog {
    blueprints: BTreeMap<String, Arc<ScenarioBlueprint>>,
}

impl BlueprintCatalog {
    /// An empty catalog.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Load every blueprint file in `dir`, non-recursively.
    ///
    /// Files that fail to parse are logged and skipped. Files with other
    /// extensions are ignored.
    ///
    /// # Errors
    /// Returns an error if the directory cannot be read.
    pub fn load_dir(dir: &Path) -> Result<Self> {
        let mut catalog = Self::new();
        let entries = std::fs::read_dir(dir).map_err(medsim_core::MedsimError::from)?;

        for entry in entries {
            let path = entry.map_err(medsim_core::MedsimError::from)?.path();
            let supported = path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| e.eq_ignore_ascii_case("json") || e.eq_ignore_ascii_case("toml"));
            if !supported {
                continue;
            }
            match ScenarioBlueprint::from_file(&path) {
                Ok(blueprint) => {
                    catalog.insert(blueprint);
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Skipping unreadable blueprint");
                }
            }
        }

        info!(dir = %dir.display(), count = catalog.len(), "Blueprint catalog loaded");
        Ok(catalog)
    }

    /// Add or replace a blueprint.
    pub fn insert(&mut self, blueprint: ScenarioBlueprint) -> Arc<ScenarioBlueprint> {
        let blueprint = Arc::new(blueprint);
        if self
            .blueprints
            .insert(blueprint.scenario_id.clone(), Arc::clone(&blueprint))
            .is_some()
        {
            warn!(
                scenario_id = %blueprint.scenario_id,
                "Duplicate scenario id, keeping the later blueprint"
            );
        }
        blueprint
    }

    /// Exact lookup.
    #[must_use]
    pub fn get(&self, scenario_id: &str) -> Option<Arc<ScenarioBlueprint>> {
        self.blueprints.get(scenario_id).cloned()
    }

    /// Exact id first, then the first id (in sorted order) containing
    /// `query` case-insensitively.
    ///
    /// # Errors
    /// Returns [`SessionError::NoBlueprint`] if nothing matches.
    pub fn resolve(&self, query: &str) -> Result<Arc<ScenarioBlueprint>> {
        if let Some(blueprint) = self.get(query) {
            return Ok(blueprint);
        }
        let needle = query.trim().to_lowercase();
        if needle.is_empty() {
            return Err(SessionError::NoBlueprint(query.to_string()));
        }
        self.blueprints
            .iter()
            .find(|(id, _)| id.to_lowercase().contains(&needle))
            .map(|(_, blueprint)| Arc::clone(blueprint))
            .ok_or_else(|| SessionError::NoBlueprint(query.to_string()))
    }

    /// Scenario ids in sorted order.
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.blueprints.keys().map(String::as_str)
    }

    /// Number of blueprints.
    #[must_use]
    pub fn len(&self) -> usize {
        self.blueprints.len()
    }

    /// Whether the catalog is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.blueprints.is_empty()
    }
}
