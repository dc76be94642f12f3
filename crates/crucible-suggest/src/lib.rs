//! Crucible diagnostic suggestion engine.
//!
//! Turns pipeline (and analysis) diagnostics into ranked [`FixCandidate`]s
//! and applies them to source revisions:
//!
//! - [`SuggestionEngine::suggest`]: table-driven candidates from diagnostic hints
//! - [`SuggestionEngine::suggest_with`]: plus anchored drafts from a [`FixGenerator`]
//! - [`apply()`]: transactional, all-or-nothing application of one candidate
//! - [`apply_all`]: ranked batch application with per-candidate outcomes
//!
//! [`FixCandidate`]: crucible_core::FixCandidate

pub mod apply;
pub mod engine;
pub mod error;
pub mod generator;
pub mod strategy;

pub use apply::{apply, apply_all, BatchApplication, CandidateOutcome, FixOutcome};
pub use engine::SuggestionEngine;
pub use error::{ApplyError, Result};
pub use generator::{anchor_draft, FixCandidateDraft, FixGenerator, GeneratorError, Snippet};
pub use strategy::{strategy_for, Strategy};
