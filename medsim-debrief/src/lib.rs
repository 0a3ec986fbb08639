//! # medsim-debrief
//!
//! Session-level after-action review on top of per-scenario reports.
//!
//! A trainee usually runs several scenarios in one session. Each produces an
//! [`AarReport`](medsim_core::AarReport); this crate reads them together:
//!
//! - [`pattern`]: behaviour that recurs across scenarios (hesitation,
//!   strength and weakness domains, ABC ordering, medication errors,
//!   deterioration prevention)
//! - [`context`]: one debrief context per session, rendered as Markdown or
//!   JSON
//!
//! ```text
//! AarReport ─┐
//! AarReport ─┼─► PatternAnalysisService ─► PatternAnalysis ─┐
//! AarReport ─┘                                              ├─► CrossScenarioAarContext
//!            └──────────────► AarContextBuilder ────────────┘
//! ```

#![deny(clippy::unwrap_used)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_precision_loss)]

pub mod context;
pub mod error;
pub mod pattern;

pub use context::{AarContextBuilder, CrossScenarioAarContext, ScenarioContext};
pub use error::{DebriefError, Result};
pub use pattern::{
    Pattern, PatternAnalysis, PatternAnalysisService, PatternKind, PatternSeverity,
    PatternThresholds,
};
