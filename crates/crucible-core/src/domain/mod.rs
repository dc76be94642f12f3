//! Domain models for Crucible.
//!
//! Canonical definitions shared by every component:
//! - `SourceUnit`: immutable source snapshot at a revision
//! - `Diagnostic`: stage-attributed compile-time finding
//! - `StageResult` / `PipelineRun`: outputs of the compilation pipeline
//! - `FixCandidate` / `TextEdit`: patches proposed by the suggestion engine
//! - `ResourceLimits` / `SessionState`: execution session values

pub mod diagnostic;
pub mod error;
pub mod execution;
pub mod fix;
pub mod run;
pub mod source;

pub use diagnostic::{
    sort_source_order, Category, Diagnostic, DiagnosticCode, DiagnosticHint, Location, Severity,
    Span, StageName, DIAGNOSTIC_TABLE_VERSION,
};
pub use error::{CoreError, Result};
pub use execution::{
    FailureReason, LimitedResource, ResourceLimits, ResourceUsage, SessionId, SessionState,
};
pub use fix::{FixCandidate, FixId, TextEdit};
pub use run::{PipelineRun, RunOutcome, StageResult, StageStatus};
pub use source::SourceUnit;
