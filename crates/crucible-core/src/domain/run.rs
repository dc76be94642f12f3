//! Stage results and pipeline runs.
//!
//! Both are generic over the artifact type so this crate stays independent of
//! the compiler's intermediate representations.

use serde::{Deserialize, Serialize};

use super::diagnostic::{Diagnostic, StageName};
use super::source::SourceUnit;
use crate::digest::json_digest;

/// Outcome of a single stage.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Ok,
    Failed,
}

/// Result of running one pipeline stage.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StageResult<A> {
    pub stage: StageName,

    pub status: StageStatus,

    /// Output artifact; `None` when the stage failed.
    pub artifact: Option<A>,

    /// Diagnostics in source order.
    pub diagnostics: Vec<Diagnostic>,

    /// Wall time spent in the stage. Excluded from [`StageResult::content_digest`].
    pub duration_ms: u64,
}

impl<A> StageResult<A> {
    /// A successful stage with its artifact.
    pub fn ok(stage: StageName, artifact: A, diagnostics: Vec<Diagnostic>) -> Self {
        Self {
            stage,
            status: StageStatus::Ok,
            artifact: Some(artifact),
            diagnostics,
            duration_ms: 0,
        }
    }

    /// A failed stage. Callers must supply at least one error diagnostic.
    pub fn failed(stage: StageName, diagnostics: Vec<Diagnostic>) -> Self {
        debug_assert!(diagnostics.iter().any(Diagnostic::is_error));
        Self {
            stage,
            status: StageStatus::Failed,
            artifact: None,
            diagnostics,
            duration_ms: 0,
        }
    }

    pub fn with_duration(mut self, duration_ms: u64) -> Self {
        self.duration_ms = duration_ms;
        self
    }

    pub fn passed(&self) -> bool {
        self.status == StageStatus::Ok
    }

    pub fn errors(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics.iter().filter(|d| d.is_error())
    }
}

impl<A: Serialize> StageResult<A> {
    /// Digest over everything except timing; equal inputs give equal digests.
    pub fn content_digest(&self) -> crate::Result<String> {
        json_digest(&(&self.stage, &self.status, &self.artifact, &self.diagnostics))
    }
}

/// Terminal state of a pipeline run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RunOutcome {
    Succeeded,
    Failed { stage: StageName },
}

/// All stage results for one source revision.
///
/// Immutable once built; a later compile of a new revision produces a new run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PipelineRun<A> {
    pub source_name: String,

    pub revision: u64,

    pub source_digest: String,

    /// Executed stages, a prefix of the declared order.
    pub stages: Vec<StageResult<A>>,

    pub outcome: RunOutcome,
}

impl<A> PipelineRun<A> {
    /// Build a run from executed stages, deriving the outcome.
    pub fn from_stages(source: &SourceUnit, stages: Vec<StageResult<A>>) -> Self {
        let outcome = stages
            .iter()
            .find(|s| !s.passed())
            .map(|s| RunOutcome::Failed { stage: s.stage })
            .unwrap_or(RunOutcome::Succeeded);
        Self {
            source_name: source.name().to_string(),
            revision: source.revision(),
            source_digest: source.digest().to_string(),
            stages,
            outcome,
        }
    }

    pub fn succeeded(&self) -> bool {
        self.outcome == RunOutcome::Succeeded
    }

    /// Stage that failed, if any.
    pub fn failed_stage(&self) -> Option<StageName> {
        match self.outcome {
            RunOutcome::Failed { stage } => Some(stage),
            RunOutcome::Succeeded => None,
        }
    }

    /// Final artifact of a successful run.
    pub fn artifact(&self) -> Option<&A> {
        if !self.succeeded() {
            return None;
        }
        self.stages.last().and_then(|s| s.artifact.as_ref())
    }

    /// All diagnostics in stage order, source order within a stage.
    pub fn diagnostics(&self) -> impl Iterator<Item = &Diagnostic> {
        self.stages.iter().flat_map(|s| s.diagnostics.iter())
    }

    pub fn stage_names(&self) -> Vec<StageName> {
        self.stages.iter().map(|s| s.stage).collect()
    }

    /// Whether any diagnostic signals a compiler bug.
    pub fn has_internal_fault(&self) -> bool {
        self.diagnostics().any(Diagnostic::is_internal)
    }

    pub fn total_duration_ms(&self) -> u64 {
        self.stages.iter().map(|s| s.duration_ms).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::diagnostic::DiagnosticCode;

    fn error(stage: StageName) -> Diagnostic {
        Diagnostic::new(DiagnosticCode::UndeclaredIdentifier, "use of undeclared identifier 'x'", stage, 1)
    }

    #[test]
    fn test_run_succeeds_when_all_stages_pass() {
        let source = SourceUnit::new("a.c", "int main(){return 0;}");
        let run = PipelineRun::from_stages(
            &source,
            vec![
                StageResult::ok(StageName::Parse, 1u32, vec![]),
                StageResult::ok(StageName::Lower, 2u32, vec![]),
            ],
        );
        assert!(run.succeeded());
        assert_eq!(run.artifact(), Some(&2));
        assert_eq!(run.failed_stage(), None);
    }

    #[test]
    fn test_run_records_failed_stage() {
        let source = SourceUnit::new("a.c", "x");
        let run = PipelineRun::from_stages(
            &source,
            vec![
                StageResult::ok(StageName::Parse, 1u32, vec![]),
                StageResult::failed(StageName::Lower, vec![error(StageName::Lower)]),
            ],
        );
        assert!(!run.succeeded());
        assert_eq!(run.failed_stage(), Some(StageName::Lower));
        assert_eq!(run.artifact(), None);
        assert_eq!(run.diagnostics().count(), 1);
    }

    #[test]
    fn test_content_digest_ignores_duration() {
        let a = StageResult::ok(StageName::Parse, 7u32, vec![]).with_duration(1);
        let b = StageResult::ok(StageName::Parse, 7u32, vec![]).with_duration(99);
        assert_eq!(a.content_digest().unwrap(), b.content_digest().unwrap());
    }
}
