//! IR to executable: label resolution and structural verification.
//!
//! Any violation found here means an earlier stage produced bad IR, so every
//! problem is reported as an internal compiler fault rather than a user error.

mod program;

use std::collections::HashMap;

use crucible_core::{Diagnostic, DiagnosticCode, SourceUnit, Span, StageName};

use crate::ir::{Inst, IrFunction, Module};

pub use program::{CodeFunction, ImageError, Op, Program, IMAGE_FORMAT};

/// Generated program, or the internal faults that prevented it.
pub fn generate(module: &Module, source: &SourceUnit) -> Result<Program, Vec<Diagnostic>> {
    let ice = |message: String, span: Span| {
        Diagnostic::new(
            DiagnosticCode::CodegenInvariant,
            format!("internal compiler error: {message}"),
            StageName::Generate,
            source.revision(),
        )
        .at(source.locate(span))
    };

    let mut faults = Vec::new();
    let mut functions = Vec::with_capacity(module.functions.len());
    for function in &module.functions {
        match resolve(function) {
            Ok(code) => functions.push(code),
            Err(message) => faults.push(ice(message, function.span)),
        }
    }
    if !faults.is_empty() {
        return Err(faults);
    }

    let program = Program::new(functions, module.strings.clone(), module.globals.clone(), module.entry)
        .map_err(|err| vec![ice(format!("cannot digest program: {err}"), Span::default())])?;

    let faults: Vec<Diagnostic> = verify(&program)
        .into_iter()
        .map(|(index, message)| {
            let span = module
                .functions
                .get(index)
                .map(|f| f.span)
                .unwrap_or_default();
            ice(message, span)
        })
        .collect();
    if faults.is_empty() {
        Ok(program)
    } else {
        Err(faults)
    }
}

fn resolve(function: &IrFunction) -> Result<CodeFunction, String> {
    let mut targets = HashMap::new();
    let mut next = 0u32;
    for inst in &function.body {
        match inst {
            Inst::Label(label) => {
                if targets.insert(*label, next).is_some() {
                    return Err(format!("label {label} defined twice in '{}'", function.name));
                }
            }
            Inst::Stmt(_) => {}
            _ => next += 1,
        }
    }

    let target = |label: &u32| {
        targets
            .get(label)
            .copied()
            .ok_or_else(|| format!("jump to undefined label {label} in '{}'", function.name))
    };

    let mut code = Vec::with_capacity(next as usize);
    for inst in &function.body {
        code.push(match inst {
            Inst::Label(_) | Inst::Stmt(_) => continue,
            Inst::Const(v) => Op::Const(*v),
            Inst::Str(i) => Op::Str(*i),
            Inst::LoadLocal(s) => Op::LoadLocal(*s),
            Inst::StoreLocal(s) => Op::StoreLocal(*s),
            Inst::GlobalAddr(g) => Op::GlobalAddr(*g),
            Inst::Load(w) => Op::Load(*w),
            Inst::Store(w) => Op::Store(*w),
            Inst::Binary(op) => Op::Binary(*op),
            Inst::Unary(op) => Op::Unary(*op),
            Inst::Pop => Op::Pop,
            Inst::Dup => Op::Dup,
            Inst::Swap => Op::Swap,
            Inst::Jump(l) => Op::Jump(target(l)?),
            Inst::JumpIfZero(l) => Op::JumpIfZero(target(l)?),
            Inst::JumpIfNotZero(l) => Op::JumpIfNotZero(target(l)?),
            Inst::Call { func, argc } => Op::Call {
                func: *func,
                argc: *argc,
            },
            Inst::CallBuiltin { builtin, argc } => Op::CallBuiltin {
                builtin: *builtin,
                argc: *argc,
            },
            Inst::Alloca(n) => Op::Alloca(*n),
            Inst::Ret => Op::Ret,
            Inst::RetVoid => Op::RetVoid,
        });
    }

    Ok(CodeFunction {
        name: function.name.clone(),
        params: function.params,
        locals: function.locals,
        code,
    })
}

/// Check operand indices and stack discipline. Returns `(function index, message)` per violation.
pub fn verify(program: &Program) -> Vec<(usize, String)> {
    let mut violations = Vec::new();
    if let Some(entry) = program.entry {
        if entry as usize >= program.functions.len() {
            violations.push((0, format!("entry point {entry} out of range")));
        }
    }
    for (index, function) in program.functions.iter().enumerate() {
        if let Err(message) = verify_function(program, function) {
            violations.push((index, format!("{} in '{}'", message, function.name)));
        }
    }
    violations
}

fn verify_function(program: &Program, function: &CodeFunction) -> Result<(), String> {
    let code = &function.code;
    if code.is_empty() {
        return Err("empty function body".to_string());
    }
    if function.params > function.locals {
        return Err("more parameters than local slots".to_string());
    }

    let len = code.len() as u32;
    for (pc, op) in code.iter().enumerate() {
        match op {
            Op::LoadLocal(slot) | Op::StoreLocal(slot) if *slot >= function.locals => {
                return Err(format!("local slot {slot} out of range at {pc}"));
            }
            Op::Str(i) if *i as usize >= program.strings.len() => {
                return Err(format!("string {i} out of range at {pc}"));
            }
            Op::GlobalAddr(g) if *g as usize >= program.globals.len() => {
                return Err(format!("global {g} out of range at {pc}"));
            }
            Op::Jump(t) | Op::JumpIfZero(t) | Op::JumpIfNotZero(t) if *t >= len => {
                return Err(format!("jump target {t} out of range at {pc}"));
            }
            Op::Call { func, argc } => match program.functions.get(*func as usize) {
                None => return Err(format!("call to function {func} out of range at {pc}")),
                Some(callee) if callee.params != *argc => {
                    return Err(format!(
                        "call to '{}' passes {argc} arguments, expects {} at {pc}",
                        callee.name, callee.params
                    ))
                }
                Some(_) => {}
            },
            _ => {}
        }
    }

    // Stack depth must be path-independent and never underflow.
    let mut depth: Vec<Option<u32>> = vec![None; code.len()];
    let mut work = vec![(0usize, 0u32)];
    while let Some((pc, d)) = work.pop() {
        let Some(op) = code.get(pc) else {
            return Err("control falls off the end of the function".to_string());
        };
        match depth[pc] {
            Some(known) if known == d => continue,
            Some(known) => return Err(format!("inconsistent stack depth at {pc}: {known} vs {d}")),
            None => depth[pc] = Some(d),
        }
        let (pops, pushes) = op.stack_effect();
        let after = d
            .checked_sub(pops)
            .ok_or_else(|| format!("stack underflow at {pc}"))?
            + pushes;
        match op {
            Op::Jump(t) => work.push((*t as usize, after)),
            Op::JumpIfZero(t) | Op::JumpIfNotZero(t) => {
                work.push((*t as usize, after));
                work.push((pc + 1, after));
            }
            Op::Ret | Op::RetVoid => {}
            _ => work.push((pc + 1, after)),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::BinOp;

    fn module_with(body: Vec<Inst>) -> Module {
        Module {
            functions: vec![IrFunction {
                name: "main".into(),
                params: 0,
                locals: 1,
                body,
                span: Span::new(0, 4),
            }],
            strings: vec![],
            globals: vec![],
            entry: Some(0),
            loops: vec![],
        }
    }

    #[test]
    fn test_labels_resolve_to_absolute_targets() {
        let module = module_with(vec![
            Inst::Stmt(Span::new(0, 1)),
            Inst::Label(7),
            Inst::Const(0),
            Inst::JumpIfZero(9),
            Inst::Jump(7),
            Inst::Label(9),
            Inst::Const(1),
            Inst::Ret,
        ]);
        let program = generate(&module, &SourceUnit::new("t.c", "main")).unwrap();
        assert_eq!(
            program.functions[0].code,
            vec![Op::Const(0), Op::JumpIfZero(3), Op::Jump(0), Op::Const(1), Op::Ret]
        );
        assert_eq!(program.digest.len(), 64);
    }

    #[test]
    fn test_undefined_label_is_internal_fault() {
        let module = module_with(vec![Inst::Jump(3)]);
        let diags = generate(&module, &SourceUnit::new("t.c", "main")).unwrap_err();
        assert_eq!(diags[0].code, DiagnosticCode::CodegenInvariant);
        assert!(diags[0].is_internal());
    }

    #[test]
    fn test_stack_underflow_is_internal_fault() {
        let module = module_with(vec![Inst::Binary(BinOp::Add), Inst::Ret]);
        let diags = generate(&module, &SourceUnit::new("t.c", "main")).unwrap_err();
        assert!(diags[0].message.contains("stack underflow"));
    }

    #[test]
    fn test_inconsistent_join_is_internal_fault() {
        let module = module_with(vec![
            Inst::Const(1),
            Inst::JumpIfZero(0),
            Inst::Const(5),
            Inst::Label(0),
            Inst::RetVoid,
        ]);
        let diags = generate(&module, &SourceUnit::new("t.c", "main")).unwrap_err();
        assert!(diags[0].message.contains("inconsistent stack depth"));
    }

    #[test]
    fn test_fall_through_end_is_internal_fault() {
        let module = module_with(vec![Inst::Const(1), Inst::Pop]);
        let diags = generate(&module, &SourceUnit::new("t.c", "main")).unwrap_err();
        assert!(diags[0].message.contains("falls off"));
    }

    #[test]
    fn test_bad_slot_is_internal_fault() {
        let module = module_with(vec![Inst::LoadLocal(4), Inst::Ret]);
        assert!(generate(&module, &SourceUnit::new("t.c", "main")).is_err());
    }
}
