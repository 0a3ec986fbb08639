//! # MedSim Core Library
//!
//! Scenario simulation engine for clinical-training exercises.
//!
//! A [`ScenarioEngine`] runs one scenario for one trainee. It tracks the
//! simulated patient over time and interprets the trainee's actions against
//! a [`ScenarioBlueprint`]:
//!
//! - **State** ([`state`]): time-indexed patient state and vitals history
//! - **Vitals** ([`vitals`]): delayed treatment effects and untreated drift
//! - **Treatment** ([`treatment`]): medication validation against the blueprint
//! - **Checklist** ([`checklist`]): free-text action matching
//! - **Milestones** ([`milestone`]): six positive-only progress markers
//! - **Safety gate** ([`safety`]): silent omission/commission/contraindication detection
//! - **Performance** ([`performance`]): outcome-based competence and the after-action report
//!
//! ## Simulation time
//!
//! Nothing in this crate reads a clock for simulation purposes. Every
//! mutating operation takes a [`SimTimestamp`] (milliseconds since scenario
//! start), so histories are deterministic and replayable.
//!
//! ## Silence
//!
//! The engine never blocks or corrects the trainee. Safety failures and
//! missed actions only surface in the [`AarReport`].

#![deny(clippy::unwrap_used)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_precision_loss)]

pub mod action;
pub mod blueprint;
pub mod checklist;
pub mod config;
pub mod engine;
pub mod error;
pub mod milestone;
pub mod performance;
pub mod report;
pub mod safety;
pub mod state;
pub mod treatment;
pub mod types;
pub mod vitals;

pub use action::{Action, ActionType};
pub use blueprint::ScenarioBlueprint;
pub use config::{EngineConfig, MedsimConfig};
pub use engine::{ActionResult, EngineStatus, RuntimeContext, ScenarioEngine};
pub use error::{MedsimError, Result};
pub use report::{AarReport, EndReason};
pub use types::*;
