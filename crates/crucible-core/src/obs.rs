//! Structured observability hooks for pipeline, suggestion and execution events.
//!
//! Every helper emits one `tracing` event with a stable `event` field so log
//! pipelines can filter on it. Set `RUST_LOG` to control verbosity.

use tracing::info;

use crate::domain::{SessionId, SessionState, StageName};

/// RAII guard that enters a span tagged with the source revision being compiled.
pub struct RunSpan {
    _span: tracing::span::EnteredSpan,
}

impl RunSpan {
    pub fn enter(source_name: &str, revision: u64) -> Self {
        let span = tracing::info_span!("crucible.pipeline", source = %source_name, revision = revision);
        Self {
            _span: span.entered(),
        }
    }
}

/// Emit event: pipeline started for a source revision.
pub fn emit_pipeline_started(source_name: &str, revision: u64) {
    info!(event = "pipeline.started", source = %source_name, revision = revision);
}

/// Emit event: a stage produced its result.
pub fn emit_stage_finished(stage: StageName, passed: bool, diagnostics: usize, duration_ms: u64) {
    info!(
        event = "pipeline.stage_finished",
        stage = %stage,
        passed = passed,
        diagnostics = diagnostics,
        duration_ms = duration_ms,
    );
}

/// Emit event: pipeline reached a terminal state.
pub fn emit_pipeline_finished(revision: u64, succeeded: bool, duration_ms: u64) {
    info!(
        event = "pipeline.finished",
        revision = revision,
        succeeded = succeeded,
        duration_ms = duration_ms,
    );
}

/// Emit event: suggestions computed for a revision.
pub fn emit_suggestions(revision: u64, diagnostics: usize, candidates: usize) {
    info!(
        event = "suggest.computed",
        revision = revision,
        diagnostics = diagnostics,
        candidates = candidates,
    );
}

/// Emit event: a fix was applied, producing a new revision.
pub fn emit_fix_applied(fix_id: &str, from_revision: u64, to_revision: u64) {
    info!(
        event = "suggest.fix_applied",
        fix_id = %fix_id,
        from_revision = from_revision,
        to_revision = to_revision,
    );
}

/// Emit event: a fix was rejected (warning level).
pub fn emit_fix_rejected(fix_id: &str, reason: &dyn std::fmt::Display) {
    tracing::warn!(event = "suggest.fix_rejected", fix_id = %fix_id, reason = %reason);
}

/// Emit event: an execution session changed state.
pub fn emit_session_transition(session: SessionId, from: SessionState, to: SessionState) {
    info!(
        event = "exec.transition",
        session = %session,
        from = %from,
        to = %to,
    );
}

/// Emit event: runner cleanup failed (warning level).
pub fn emit_runner_error(session: SessionId, error: &dyn std::fmt::Display) {
    tracing::warn!(event = "exec.runner_error", session = %session, error = %error);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_span_create() {
        let _span = RunSpan::enter("main.c", 1);
        emit_pipeline_started("main.c", 1);
    }
}
