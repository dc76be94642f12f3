//! IR to IR: constant folding, dead code removal, loop notes. Never fatal.

use std::collections::{HashMap, HashSet};

use crucible_core::{sort_source_order, Diagnostic, DiagnosticCode, DiagnosticHint, SourceUnit, Span, StageName};

use crate::ir::{Inst, Label, Module};

#[derive(Debug)]
pub struct OptimizeOutput {
    pub module: Module,
    pub diagnostics: Vec<Diagnostic>,
}

pub fn optimize(module: &Module, source: &SourceUnit) -> OptimizeOutput {
    let mut diagnostics = Vec::new();
    let mut out = module.clone();
    let mut surviving = HashSet::new();

    for function in &mut out.functions {
        let mut body = std::mem::take(&mut function.body);
        loop {
            let (folded, changed) = fold_pass(&body);
            body = folded;
            if !changed {
                break;
            }
        }

        let live = reachable(&body);
        for span in unreachable_statements(&body, &live) {
            diagnostics.push(
                Diagnostic::new(
                    DiagnosticCode::UnreachableCode,
                    "code will never be executed",
                    StageName::Optimize,
                    source.revision(),
                )
                .at(source.locate(span))
                .with_hint(DiagnosticHint::Remove {
                    start: span.start,
                    end: span.end,
                }),
            );
        }
        body = body
            .into_iter()
            .zip(live)
            .filter_map(|(inst, keep)| keep.then_some(inst))
            .collect();

        surviving.extend(body.iter().filter_map(|inst| match inst {
            Inst::Stmt(span) => Some(*span),
            _ => None,
        }));
        function.body = body;
    }

    for info in out.loops.iter().filter(|l| l.vectorizable && surviving.contains(&l.span)) {
        diagnostics.push(
            Diagnostic::new(
                DiagnosticCode::VectorizableLoop,
                format!("loop in '{}' could be vectorized", info.function),
                StageName::Optimize,
                source.revision(),
            )
            .at(source.locate(info.span)),
        );
    }

    sort_source_order(&mut diagnostics);
    OptimizeOutput {
        module: out,
        diagnostics,
    }
}

/// One peephole pass over straight-line constant sequences.
fn fold_pass(body: &[Inst]) -> (Vec<Inst>, bool) {
    let mut out: Vec<Inst> = Vec::with_capacity(body.len());
    let mut changed = false;
    for inst in body {
        let n = out.len();
        match (inst, out.as_slice()) {
            (Inst::Binary(op), [.., Inst::Const(a), Inst::Const(b)]) => {
                // Division by zero is left for the runtime to trap.
                if let Some(v) = op.eval(*a, *b) {
                    out.truncate(n - 2);
                    out.push(Inst::Const(v));
                    changed = true;
                    continue;
                }
            }
            (Inst::Unary(op), [.., Inst::Const(a)]) => {
                let v = op.eval(*a);
                out[n - 1] = Inst::Const(v);
                changed = true;
                continue;
            }
            (Inst::JumpIfZero(target), [.., Inst::Const(c)]) => {
                let taken = *c == 0;
                out.truncate(n - 1);
                if taken {
                    out.push(Inst::Jump(*target));
                }
                changed = true;
                continue;
            }
            (Inst::JumpIfNotZero(target), [.., Inst::Const(c)]) => {
                let taken = *c != 0;
                out.truncate(n - 1);
                if taken {
                    out.push(Inst::Jump(*target));
                }
                changed = true;
                continue;
            }
            (Inst::Pop, [.., Inst::Const(_)]) => {
                out.truncate(n - 1);
                changed = true;
                continue;
            }
            _ => {}
        }
        out.push(inst.clone());
    }
    (out, changed)
}

/// Reachability from the function entry.
pub(crate) fn reachable(body: &[Inst]) -> Vec<bool> {
    let labels: HashMap<Label, usize> = body
        .iter()
        .enumerate()
        .filter_map(|(i, inst)| match inst {
            Inst::Label(l) => Some((*l, i)),
            _ => None,
        })
        .collect();

    let mut live = vec![false; body.len()];
    let mut work = vec![0usize];
    while let Some(i) = work.pop() {
        if i >= body.len() || live[i] {
            continue;
        }
        live[i] = true;
        match &body[i] {
            Inst::Jump(l) => work.extend(labels.get(l)),
            Inst::JumpIfZero(l) | Inst::JumpIfNotZero(l) => {
                work.push(i + 1);
                work.extend(labels.get(l));
            }
            Inst::Ret | Inst::RetVoid => {}
            _ => work.push(i + 1),
        }
    }
    live
}

/// Source spans of maximal unreachable runs that contain user statements.
fn unreachable_statements(body: &[Inst], live: &[bool]) -> Vec<Span> {
    let mut spans = Vec::new();
    let mut current: Option<Span> = None;
    for (inst, &is_live) in body.iter().zip(live) {
        if is_live {
            spans.extend(current.take());
            continue;
        }
        if let Inst::Stmt(span) = inst {
            current = Some(match current {
                Some(run) => run.to(*span),
                None => *span,
            });
        }
    }
    spans.extend(current);
    spans
}
