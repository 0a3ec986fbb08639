//! # medsim-session
//!
//! Hosting layer for [`medsim_core::ScenarioEngine`].
//!
//! The engine is synchronous and single-writer. This crate gives each running
//! scenario its own tokio task, drives the background deterioration tick,
//! and keeps per-session history for the debrief:
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │                SessionRegistry                │
//! │  session ─► ScenarioHandle ─► ScenarioActor   │
//! │         └─► archived AarReports ─► debrief    │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - `actor`: per-scenario task, command queue, interval tick
//! - `registry`: explicit session map
//! - `catalog`: blueprints loaded from a directory
//! - `telemetry`: tracing subscriber setup

#![deny(clippy::unwrap_used)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_precision_loss)]

pub mod actor;
pub mod catalog;
pub mod error;
pub mod registry;
pub mod telemetry;

pub use actor::{ScenarioHandle, spawn_scenario};
pub use catalog::BlueprintCatalog;
pub use error::{Result, SessionError};
pub use registry::SessionRegistry;
pub use telemetry::init_tracing;
