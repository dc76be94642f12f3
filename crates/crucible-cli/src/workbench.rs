//! Caller-facing facade over compile, suggest, fix and run.
//!
//! A [`Workbench`] tracks one source file through its revisions. Compiling a
//! new revision drops the cached run and fix table, so fixes and artifacts
//! from an older revision can never be applied or executed by accident.

use std::sync::Arc;

use crucible_core::{
    CrucibleConfig, Diagnostic, FixCandidate, FixId, ResourceLimits, SessionId, SourceUnit,
};
use crucible_pipeline::{find_leaks, Artifact, Pipeline, PipelineRun, Program};
use crucible_sandbox::{EventCursor, ExecutionManager, ExecutionSession, IsolatedRunner, SessionHandle};
use crucible_suggest::{apply, apply_all, BatchApplication, SuggestionEngine};
use tracing::{debug, info};

use crate::error::{Result, WorkbenchError};

struct Current {
    source: SourceUnit,
    run: PipelineRun,
    /// Fix table for `source`; `None` until suggested.
    fixes: Option<Vec<FixCandidate>>,
}

/// One source file, its latest compile and its executions.
pub struct Workbench {
    pipeline: Pipeline,
    engine: SuggestionEngine,
    manager: ExecutionManager,
    current: Option<Current>,
}

impl Workbench {
    /// Workbench running programs on the in-process interpreter.
    pub fn new(config: CrucibleConfig) -> Self {
        let manager = ExecutionManager::with_vm(config.execution.clone());
        Self::with_manager(config, manager)
    }

    pub fn with_runner(config: CrucibleConfig, runner: Arc<dyn IsolatedRunner>) -> Self {
        let manager = ExecutionManager::new(runner, config.execution.clone());
        Self::with_manager(config, manager)
    }

    fn with_manager(config: CrucibleConfig, manager: ExecutionManager) -> Self {
        Self {
            pipeline: Pipeline::new(),
            engine: SuggestionEngine::new(config.suggest),
            manager,
            current: None,
        }
    }

    pub fn manager(&self) -> &ExecutionManager {
        &self.manager
    }

    pub fn source(&self) -> Option<&SourceUnit> {
        self.current.as_ref().map(|c| &c.source)
    }

    pub fn last_run(&self) -> Option<&PipelineRun> {
        self.current.as_ref().map(|c| &c.run)
    }

    fn current(&self) -> Result<&Current> {
        self.current.as_ref().ok_or(WorkbenchError::NothingCompiled)
    }

    /// Compile `text`. The same `name` continues the revision sequence; a
    /// different name starts over at revision 1.
    pub fn compile(&mut self, name: &str, text: &str) -> &PipelineRun {
        let source = match &self.current {
            Some(current) if current.source.name() == name => current.source.next_revision(text),
            _ => SourceUnit::new(name, text),
        };
        self.install(source)
    }

    /// Run the pipeline on `source` and make it current, dropping cached fixes.
    fn install(&mut self, source: SourceUnit) -> &PipelineRun {
        let run = self.pipeline.run(&source);
        info!(
            source = %source.name(),
            revision = source.revision(),
            succeeded = run.succeeded(),
            "compiled"
        );
        &self
            .current
            .insert(Current {
                source,
                run,
                fixes: None,
            })
            .run
    }

    /// Diagnostics of the latest compile, plus leak findings when asked for.
    pub fn diagnostics(&self, leaks: bool) -> Result<Vec<Diagnostic>> {
        let current = self.current()?;
        let mut diagnostics: Vec<Diagnostic> = current.run.diagnostics().cloned().collect();
        if leaks {
            let ast = current.run.stages.first().and_then(|stage| match &stage.artifact {
                Some(Artifact::Ast(unit)) => Some(Arc::clone(unit)),
                _ => None,
            });
            if let Some(unit) = ast {
                diagnostics.extend(find_leaks(&unit, &current.source));
            }
        }
        Ok(diagnostics)
    }

    /// Rank fixes for the latest compile and remember them for
    /// [`Workbench::apply_fix`] and [`Workbench::apply_all`].
    pub fn suggest(&mut self, leaks: bool) -> Result<&[FixCandidate]> {
        let diagnostics = self.diagnostics(leaks)?;
        let current = self.current.as_mut().ok_or(WorkbenchError::NothingCompiled)?;
        let fixes = self.engine.suggest(&diagnostics, &current.source);
        debug!(candidates = fixes.len(), revision = current.source.revision(), "fix table updated");
        Ok(current.fixes.insert(fixes).as_slice())
    }

    /// Fix table of the current revision, if suggested.
    pub fn fixes(&self) -> Option<&[FixCandidate]> {
        self.current.as_ref().and_then(|c| c.fixes.as_deref())
    }

    /// Apply one suggested fix and recompile the resulting revision.
    pub fn apply_fix(&mut self, fix_id: &FixId) -> Result<&PipelineRun> {
        let current = self.current()?;
        let fix = current
            .fixes
            .as_deref()
            .unwrap_or_default()
            .iter()
            .find(|f| &f.id == fix_id)
            .ok_or_else(|| WorkbenchError::UnknownFix(fix_id.clone()))?;
        let next = apply(&current.source, fix)?;
        Ok(self.install(next))
    }

    /// Apply every suggested fix that does not conflict, then recompile if
    /// anything changed.
    pub fn apply_all(&mut self) -> Result<BatchApplication> {
        let current = self.current()?;
        let fixes = current.fixes.as_deref().unwrap_or_default();
        let batch = apply_all(&current.source, fixes);
        if batch.applied() > 0 {
            self.install(batch.source.clone());
        }
        Ok(batch)
    }

    /// Execute the latest successful compile.
    pub async fn run(&self, limits: Option<ResourceLimits>) -> Result<SessionHandle> {
        let revision = self.current()?.source.revision();
        self.run_revision(revision, limits).await
    }

    /// Execute the artifact of `revision`, which must still be current.
    pub async fn run_revision(&self, revision: u64, limits: Option<ResourceLimits>) -> Result<SessionHandle> {
        let current = self.current()?;
        if revision != current.source.revision() {
            return Err(WorkbenchError::StaleArtifact {
                requested: revision,
                current: current.source.revision(),
            });
        }
        let program = executable(&current.run)?;
        Ok(self.manager.start(program, limits).await?)
    }

    pub async fn stop(&self, session: SessionId) -> Result<ExecutionSession> {
        Ok(self.manager.stop(session).await?)
    }

    pub fn subscribe(&self, session: SessionId) -> Result<EventCursor> {
        Ok(self.manager.subscribe(session)?)
    }

    pub fn session(&self, session: SessionId) -> Result<ExecutionSession> {
        Ok(self.manager.session(session)?)
    }
}

fn executable(run: &PipelineRun) -> Result<Arc<Program>> {
    if let Some(stage) = run.failed_stage() {
        return Err(WorkbenchError::CompileFailed { stage });
    }
    run.artifact()
        .and_then(Artifact::as_executable)
        .cloned()
        .ok_or(WorkbenchError::NothingCompiled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crucible_core::{DiagnosticCode, SessionState, StageName};

    const LEAKY: &str = "int main(){int*p=malloc(20);return 0;}";

    #[test]
    fn test_compile_advances_revision_per_name() {
        let mut bench = Workbench::new(CrucibleConfig::default());
        assert_eq!(bench.compile("a.c", "int main() { return 0; }").revision, 1);
        assert_eq!(bench.compile("a.c", "int main() { return 1; }").revision, 2);
        assert_eq!(bench.compile("b.c", "int main() { return 1; }").revision, 1);
    }

    #[test]
    fn test_recompile_drops_fix_table() {
        let mut bench = Workbench::new(CrucibleConfig::default());
        bench.compile("leak.c", LEAKY);
        let fix = bench.suggest(false).unwrap()[0].clone();
        bench.compile("leak.c", LEAKY);
        assert!(bench.fixes().is_none());
        assert!(matches!(bench.apply_fix(&fix.id), Err(WorkbenchError::UnknownFix(_))));
    }

    #[test]
    fn test_apply_fix_recompiles() {
        let mut bench = Workbench::new(CrucibleConfig::default());
        bench.compile("leak.c", LEAKY);
        let fixes = bench.suggest(false).unwrap();
        assert_eq!(fixes[0].diagnostic_code, DiagnosticCode::ImplicitLibraryDeclaration);
        let id = fixes[0].id.clone();
        let run = bench.apply_fix(&id).unwrap();
        assert!(run.succeeded());
        assert_eq!(run.revision, 2);
        assert_eq!(run.diagnostics().count(), 0);
    }

    #[test]
    fn test_leak_findings_are_opt_in() {
        let mut bench = Workbench::new(CrucibleConfig::default());
        bench.compile("leak.c", "#include <stdlib.h>\nint main() {\n  int *p = malloc(8);\n  return 0;\n}\n");
        assert!(bench.diagnostics(false).unwrap().is_empty());
        let leaks = bench.diagnostics(true).unwrap();
        assert_eq!(leaks.len(), 1);
        assert_eq!(leaks[0].code, DiagnosticCode::PossibleLeak);
    }

    #[tokio::test]
    async fn test_run_requires_current_successful_compile() {
        let mut bench = Workbench::new(CrucibleConfig::default());
        assert!(matches!(bench.run(None).await, Err(WorkbenchError::NothingCompiled)));

        bench.compile("a.c", "int main() { return 0 }");
        assert!(matches!(
            bench.run(None).await,
            Err(WorkbenchError::CompileFailed { stage: StageName::Parse })
        ));

        bench.compile("a.c", "int main() { return 0; }");
        assert!(matches!(
            bench.run_revision(1, None).await,
            Err(WorkbenchError::StaleArtifact { requested: 1, current: 2 })
        ));
        let session = bench.run_revision(2, None).await.unwrap().wait().await;
        assert_eq!(session.state, SessionState::Completed);
        assert_eq!(bench.session(session.id).unwrap(), session);
    }
}
