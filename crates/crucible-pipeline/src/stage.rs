//! Pipeline stages and the artifacts passed between them.

use std::sync::Arc;

use crucible_core::{Diagnostic, DiagnosticCode, SourceUnit, Span, StageName};
use serde::Serialize;

use crate::codegen::{self, Program};
use crate::frontend::{self, TranslationUnit};
use crate::ir::Module;
use crate::lower::lower;
use crate::optimize::optimize;

/// Output of a stage. Shared, never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Artifact {
    Ast(Arc<TranslationUnit>),
    Ir(Arc<Module>),
    Executable(Arc<Program>),
}

impl Artifact {
    pub fn kind(&self) -> &'static str {
        match self {
            Artifact::Ast(_) => "syntax tree",
            Artifact::Ir(_) => "IR module",
            Artifact::Executable(_) => "executable",
        }
    }

    pub fn as_executable(&self) -> Option<&Arc<Program>> {
        match self {
            Artifact::Executable(program) => Some(program),
            _ => None,
        }
    }
}

pub type StageResult = crucible_core::StageResult<Artifact>;
pub type PipelineRun = crucible_core::PipelineRun<Artifact>;

/// The four compilation stages, in declared order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Parse,
    Lower,
    Optimize,
    Generate,
}

impl Stage {
    pub const ALL: [Stage; 4] = [Stage::Parse, Stage::Lower, Stage::Optimize, Stage::Generate];

    pub fn name(&self) -> StageName {
        match self {
            Stage::Parse => StageName::Parse,
            Stage::Lower => StageName::Lower,
            Stage::Optimize => StageName::Optimize,
            Stage::Generate => StageName::Generate,
        }
    }

    /// Run this stage on the previous stage's artifact. Pure and deterministic.
    pub fn run(&self, prev: Option<&Artifact>, source: &SourceUnit) -> StageResult {
        let stage = self.name();
        match (self, prev) {
            (Stage::Parse, _) => parse(source),
            (Stage::Lower, Some(Artifact::Ast(unit))) => {
                let out = lower(unit, source);
                match out.module {
                    Some(module) => StageResult::ok(stage, Artifact::Ir(Arc::new(module)), out.diagnostics),
                    None => StageResult::failed(stage, out.diagnostics),
                }
            }
            (Stage::Optimize, Some(Artifact::Ir(module))) => {
                let out = optimize(module, source);
                StageResult::ok(stage, Artifact::Ir(Arc::new(out.module)), out.diagnostics)
            }
            (Stage::Generate, Some(Artifact::Ir(module))) => match codegen::generate(module, source) {
                Ok(program) => StageResult::ok(stage, Artifact::Executable(Arc::new(program)), Vec::new()),
                Err(faults) => StageResult::failed(stage, faults),
            },
            (_, prev) => {
                let found = prev.map(Artifact::kind).unwrap_or("nothing");
                StageResult::failed(
                    stage,
                    vec![Diagnostic::new(
                        DiagnosticCode::ArtifactMismatch,
                        format!("internal compiler error: stage '{stage}' received {found}"),
                        stage,
                        source.revision(),
                    )
                    .at(source.locate(Span::default()))],
                )
            }
        }
    }
}

fn parse(source: &SourceUnit) -> StageResult {
    if source.is_blank() {
        let diag = Diagnostic::new(
            DiagnosticCode::EmptyTranslationUnit,
            "empty translation unit",
            StageName::Parse,
            source.revision(),
        )
        .at(source.locate(Span::new(0, source.text().len())));
        return StageResult::failed(StageName::Parse, vec![diag]);
    }
    match frontend::parse_text(source.text()) {
        Ok(unit) => StageResult::ok(StageName::Parse, Artifact::Ast(Arc::new(unit)), Vec::new()),
        Err(err) => {
            let mut diag = Diagnostic::new(err.code, err.message, StageName::Parse, source.revision())
                .at(source.locate(err.span));
            if let Some(hint) = err.hint {
                diag = diag.with_hint(hint);
            }
            StageResult::failed(StageName::Parse, vec![diag])
        }
    }
}
