//! Pipeline orchestration: runs stages in order and stops at the first failure.

use std::panic::{self, AssertUnwindSafe};
use std::time::Instant;

use crucible_core::{obs, Diagnostic, DiagnosticCode, SourceUnit, Span, StageName, METRICS};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::stage::{Artifact, PipelineRun, Stage, StageResult};

/// Compilation pipeline orchestrator.
#[derive(Debug, Clone, Copy, Default)]
pub struct Pipeline;

impl Pipeline {
    pub fn new() -> Self {
        Pipeline
    }

    /// Compile one source revision.
    ///
    /// Never panics: a panicking stage becomes an internal diagnostic on a
    /// failed stage result.
    pub fn run(&self, source: &SourceUnit) -> PipelineRun {
        self.run_with(source, |_| {})
    }

    /// Like [`Pipeline::run`], calling `on_stage` as each stage result is finalized.
    pub fn run_with(&self, source: &SourceUnit, mut on_stage: impl FnMut(&StageResult)) -> PipelineRun {
        let _span = obs::RunSpan::enter(source.name(), source.revision());
        obs::emit_pipeline_started(source.name(), source.revision());
        METRICS.inc_pipelines_run();

        let mut stages = Vec::with_capacity(Stage::ALL.len());
        let mut prev: Option<Artifact> = None;
        for stage in Stage::ALL {
            let started = Instant::now();
            let result = guarded(stage.name(), source, || stage.run(prev.as_ref(), source))
                .with_duration(started.elapsed().as_millis() as u64);

            obs::emit_stage_finished(
                result.stage,
                result.passed(),
                result.diagnostics.len(),
                result.duration_ms,
            );
            on_stage(&result);

            let passed = result.passed();
            prev = result.artifact.clone();
            stages.push(result);
            if !passed {
                METRICS.inc_stages_failed();
                debug!(stage = %stage.name(), "stopping pipeline after failed stage");
                break;
            }
        }

        let run = PipelineRun::from_stages(source, stages);
        obs::emit_pipeline_finished(run.revision, run.succeeded(), run.total_duration_ms());
        run
    }

    /// Compile on a blocking task, streaming each stage result as it completes.
    ///
    /// The receiver yields every executed stage before the handle resolves.
    pub fn spawn(&self, source: SourceUnit) -> (mpsc::UnboundedReceiver<StageResult>, JoinHandle<PipelineRun>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let pipeline = *self;
        let handle = tokio::task::spawn_blocking(move || {
            pipeline.run_with(&source, |result| {
                // A dropped receiver only loses progress updates.
                let _ = tx.send(result.clone());
            })
        });
        (rx, handle)
    }
}

/// Run a stage body, converting a panic into a failed result.
fn guarded(stage: StageName, source: &SourceUnit, body: impl FnOnce() -> StageResult) -> StageResult {
    match panic::catch_unwind(AssertUnwindSafe(body)) {
        Ok(result) => result,
        Err(payload) => {
            let detail = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic payload".to_string());
            warn!(stage = %stage, detail = %detail, "stage panicked");
            let diag = Diagnostic::new(
                DiagnosticCode::StagePanicked,
                format!("internal compiler error: stage '{stage}' panicked: {detail}"),
                stage,
                source.revision(),
            )
            .at(source.locate(Span::default()));
            StageResult::failed(stage, vec![diag])
        }
    }
}
