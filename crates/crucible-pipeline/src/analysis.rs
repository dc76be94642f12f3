//! Best-effort leak analysis over the syntax tree.
//!
//! Runs outside the pipeline: stage results never contain these findings.
//! A local pointer initialized from `malloc`/`calloc` is flagged when it is
//! never passed to `free` and never escapes (returned, stored elsewhere, or
//! handed to a user function).

use crucible_core::{Diagnostic, DiagnosticCode, DiagnosticHint, SourceUnit, StageName};

use crate::frontend::ast::*;

pub fn find_leaks(unit: &TranslationUnit, source: &SourceUnit) -> Vec<Diagnostic> {
    let mut diagnostics = Vec::new();
    for item in &unit.items {
        let Item::Function(function) = item else {
            continue;
        };
        let Some(body) = &function.body else {
            continue;
        };

        let mut allocations = Vec::new();
        visit_stmts(&body.stmts, &mut |stmt| {
            if let StmtKind::Decl(decls) = &stmt.kind {
                for decl in decls {
                    if decl.ty.is_pointer() && decl.init.as_ref().is_some_and(is_allocation) {
                        allocations.push(decl);
                    }
                }
            }
        });

        for decl in allocations {
            let mut usage = Usage::default();
            visit_stmts(&body.stmts, &mut |stmt| usage.scan_stmt(stmt, &decl.name));
            if usage.freed || usage.escaped {
                continue;
            }

            let mut offsets = Vec::new();
            visit_stmts(&body.stmts, &mut |stmt| {
                if matches!(stmt.kind, StmtKind::Return(_)) && stmt.span.start > decl.span.end {
                    offsets.push(stmt.span.start);
                }
            });
            if offsets.is_empty() {
                // Before the closing brace.
                offsets.push(body.span.end.saturating_sub(1));
            }
            offsets.sort_unstable();
            offsets.dedup();

            diagnostics.push(
                Diagnostic::new(
                    DiagnosticCode::PossibleLeak,
                    format!("memory allocated to '{}' is never freed", decl.name),
                    StageName::Analysis,
                    source.revision(),
                )
                .at(source.locate(decl.name_span))
                .with_hint(DiagnosticHint::InsertBefore {
                    offsets,
                    text: format!("free({});", decl.name),
                }),
            );
        }
    }
    diagnostics
}

fn is_allocation(e: &Expr) -> bool {
    match &e.kind {
        ExprKind::Call { callee, .. } => callee == "malloc" || callee == "calloc",
        ExprKind::Cast { operand, .. } => is_allocation(operand),
        _ => false,
    }
}

/// Pre-order walk over statements, including nested ones.
fn visit_stmts<'a>(stmts: &'a [Stmt], f: &mut impl FnMut(&'a Stmt)) {
    for stmt in stmts {
        visit_stmt(stmt, f);
    }
}

fn visit_stmt<'a>(stmt: &'a Stmt, f: &mut impl FnMut(&'a Stmt)) {
    f(stmt);
    match &stmt.kind {
        StmtKind::If { then, otherwise, .. } => {
            visit_stmt(then, f);
            if let Some(otherwise) = otherwise {
                visit_stmt(otherwise, f);
            }
        }
        StmtKind::While { body, .. } => visit_stmt(body, f),
        StmtKind::For { init, body, .. } => {
            if let Some(init) = init {
                visit_stmt(init, f);
            }
            visit_stmt(body, f);
        }
        StmtKind::Block(block) => visit_stmts(&block.stmts, f),
        _ => {}
    }
}

#[derive(Default)]
struct Usage {
    freed: bool,
    escaped: bool,
}

impl Usage {
    fn scan_stmt(&mut self, stmt: &Stmt, name: &str) {
        match &stmt.kind {
            StmtKind::Return(Some(value)) => {
                if mentions(value, name) {
                    self.escaped = true;
                }
                self.scan_expr(value, name);
            }
            StmtKind::Decl(decls) => {
                for init in decls.iter().filter_map(|d| d.init.as_ref()) {
                    if is_ident(init, name) {
                        self.escaped = true;
                    }
                    self.scan_expr(init, name);
                }
            }
            StmtKind::Expr(e) => self.scan_expr(e, name),
            StmtKind::If { cond, .. } | StmtKind::While { cond, .. } => self.scan_expr(cond, name),
            StmtKind::For { cond, step, .. } => {
                for e in cond.iter().chain(step.iter()) {
                    self.scan_expr(e, name);
                }
            }
            _ => {}
        }
    }

    fn scan_expr(&mut self, e: &Expr, name: &str) {
        match &e.kind {
            ExprKind::Call { callee, args, .. } => {
                if callee == "free" && args.first().is_some_and(|a| is_ident(a, name)) {
                    self.freed = true;
                } else if crate::library::function(callee).is_none() && args.iter().any(|a| mentions(a, name)) {
                    self.escaped = true;
                }
                for arg in args {
                    self.scan_expr(arg, name);
                }
            }
            ExprKind::Assign { target, value, .. } => {
                if is_ident(value, name) && !is_ident(target, name) {
                    self.escaped = true;
                }
                // Reassigning the pointer itself loses track of the allocation.
                if is_ident(target, name) {
                    self.escaped = true;
                }
                self.scan_expr(target, name);
                self.scan_expr(value, name);
            }
            ExprKind::Unary { operand, .. }
            | ExprKind::Cast { operand, .. }
            | ExprKind::SizeofExpr(operand) => self.scan_expr(operand, name),
            ExprKind::IncDec { target, .. } => self.scan_expr(target, name),
            ExprKind::Binary { lhs, rhs, .. } => {
                self.scan_expr(lhs, name);
                self.scan_expr(rhs, name);
            }
            ExprKind::Index { base, index } => {
                self.scan_expr(base, name);
                self.scan_expr(index, name);
            }
            ExprKind::Int(_) | ExprKind::Str(_) | ExprKind::Ident(_) | ExprKind::SizeofType(_) => {}
        }
    }
}

fn is_ident(e: &Expr, name: &str) -> bool {
    match &e.kind {
        ExprKind::Ident(n) => n == name,
        ExprKind::Cast { operand, .. } => is_ident(operand, name),
        _ => false,
    }
}

fn mentions(e: &Expr, name: &str) -> bool {
    match &e.kind {
        ExprKind::Ident(n) => n == name,
        ExprKind::Int(_) | ExprKind::Str(_) | ExprKind::SizeofType(_) => false,
        ExprKind::Unary { operand, .. } | ExprKind::Cast { operand, .. } | ExprKind::SizeofExpr(operand) => {
            mentions(operand, name)
        }
        ExprKind::IncDec { target, .. } => mentions(target, name),
        ExprKind::Binary { lhs, rhs, .. } => mentions(lhs, name) || mentions(rhs, name),
        ExprKind::Assign { target, value, .. } => mentions(target, name) || mentions(value, name),
        ExprKind::Call { args, .. } => args.iter().any(|a| mentions(a, name)),
        ExprKind::Index { base, index } => mentions(base, name) || mentions(index, name),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::parse_text;

    fn leaks(src: &str) -> Vec<Diagnostic> {
        let source = SourceUnit::new("t.c", src);
        find_leaks(&parse_text(src).unwrap(), &source)
    }

    #[test]
    fn test_unfreed_allocation_is_flagged() {
        let src = "#include <stdlib.h>\nint main(){int*p=malloc(20);return 0;}";
        let found = leaks(src);
        assert_eq!(found.len(), 1);
        let diag = &found[0];
        assert_eq!(diag.code, DiagnosticCode::PossibleLeak);
        assert_eq!(diag.stage, StageName::Analysis);
        assert_eq!(
            diag.hint,
            Some(DiagnosticHint::InsertBefore {
                offsets: vec![src.find("return").unwrap()],
                text: "free(p);".into()
            })
        );
    }

    #[test]
    fn test_freed_allocation_is_clean() {
        assert!(leaks("int main(){ char *s = malloc(4); free(s); return 0; }").is_empty());
    }

    #[test]
    fn test_returned_allocation_escapes() {
        assert!(leaks("int *make(){ int *p = (int*)calloc(4, 4); return p; }").is_empty());
    }

    #[test]
    fn test_passed_to_user_function_escapes() {
        assert!(leaks("void keep(int *p); int main(){ int *p = malloc(4); keep(p); return 0; }").is_empty());
    }

    #[test]
    fn test_every_later_return_gets_an_offset() {
        let src = "int main(int c){ int *p = malloc(8); if (c) { return 1; } return 0; }";
        let found = leaks(src);
        let Some(DiagnosticHint::InsertBefore { offsets, .. }) = &found[0].hint else {
            panic!("expected insert_before hint");
        };
        assert_eq!(offsets.len(), 2);
    }

    #[test]
    fn test_no_return_inserts_before_closing_brace() {
        let src = "void f(){ long *p = malloc(8); *p = 1; }";
        let found = leaks(src);
        let Some(DiagnosticHint::InsertBefore { offsets, .. }) = &found[0].hint else {
            panic!("expected insert_before hint");
        };
        assert_eq!(offsets, &vec![src.len() - 1]);
    }
}
