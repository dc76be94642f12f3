//! Crucible Core Library
//!
//! Shared value types for the compilation pipeline, suggestion engine and
//! execution manager, plus the ambient stack every crate uses: error types,
//! tracing initialisation, observability hooks, counters and configuration.

pub mod config;
pub mod digest;
pub mod domain;
pub mod metrics;
pub mod obs;
pub mod telemetry;

pub use config::{CrucibleConfig, ExecutionConfig, SuggestConfig};
pub use domain::{
    sort_source_order, Category, CoreError, Diagnostic, DiagnosticCode, DiagnosticHint,
    FailureReason, FixCandidate, FixId, LimitedResource, Location, PipelineRun, ResourceLimits,
    ResourceUsage, Result, RunOutcome, SessionId, SessionState, Severity, SourceUnit, Span,
    StageName, StageResult, StageStatus, TextEdit, DIAGNOSTIC_TABLE_VERSION,
};
pub use metrics::METRICS;
pub use obs::RunSpan;
pub use telemetry::init_tracing;

/// Crucible version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
