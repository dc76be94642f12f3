//! AST to IR lowering with name resolution and semantic checks.
//!
//! Errors are collected across the whole unit (in source order) rather than
//! stopping at the first one; a unit with any error produces no module.

use std::collections::{HashMap, HashSet};

use crucible_core::{sort_source_order, Diagnostic, DiagnosticCode, DiagnosticHint, SourceUnit, Span, StageName};

use crate::frontend::ast::*;
use crate::ir::{BinOp, Global, GlobalInit, Inst, IrFunction, Label, LoopInfo, Module, UnOp, Width};
use crate::library;

/// Lowered module (absent when any error was reported) plus every diagnostic.
#[derive(Debug)]
pub struct LowerOutput {
    pub module: Option<Module>,
    pub diagnostics: Vec<Diagnostic>,
}

pub fn lower(unit: &TranslationUnit, source: &SourceUnit) -> LowerOutput {
    let mut cx = ModuleCx::new(source);
    cx.check_includes(&unit.includes);
    for item in &unit.items {
        match item {
            Item::Function(f) => cx.declare_function(f),
            Item::Global(g) => cx.declare_global(g),
        }
    }

    let mut functions = Vec::new();
    let mut lowered = HashSet::new();
    for item in &unit.items {
        if let Item::Function(f) = item {
            if let Some(body) = &f.body {
                if lowered.insert(f.name.clone()) {
                    functions.push(FnCx::new(&mut cx, f).finish(f, body));
                }
            }
        }
    }

    let entry = cx.functions.get("main").and_then(|sig| sig.index);
    if entry.is_none() {
        let diag = cx.diag(
            DiagnosticCode::MissingMain,
            "no 'main' function defined; the program has no entry point",
            Span::new(0, 0),
        );
        cx.diagnostics.push(diag);
    }

    let ModuleCx {
        mut diagnostics,
        globals,
        strings,
        loops,
        ..
    } = cx;
    sort_source_order(&mut diagnostics);
    let module = if diagnostics.iter().any(Diagnostic::is_error) {
        None
    } else {
        Some(Module {
            functions,
            strings,
            globals,
            entry,
            loops,
        })
    };
    LowerOutput {
        module,
        diagnostics,
    }
}

/// An error was already pushed to the diagnostics list.
struct Reported;

type Lr<T> = Result<T, Reported>;

#[derive(Debug, Clone)]
struct FnSig {
    /// Set once a body is seen.
    index: Option<u32>,
    params: Vec<Type>,
    returns: Type,
}

#[derive(Debug, Clone)]
struct GlobalVar {
    index: u32,
    ty: Type,
    array_len: Option<u32>,
}

#[derive(Debug, Clone)]
struct LocalVar {
    slot: u32,
    /// Element type for arrays.
    ty: Type,
    array_len: Option<u32>,
}

struct ModuleCx<'a> {
    source: &'a SourceUnit,
    diagnostics: Vec<Diagnostic>,
    headers: HashSet<String>,
    functions: HashMap<String, FnSig>,
    defined: u32,
    global_vars: HashMap<String, GlobalVar>,
    globals: Vec<Global>,
    strings: Vec<Vec<u8>>,
    loops: Vec<LoopInfo>,
    implicit_warned: HashSet<String>,
}

impl<'a> ModuleCx<'a> {
    fn new(source: &'a SourceUnit) -> Self {
        Self {
            source,
            diagnostics: Vec::new(),
            headers: HashSet::new(),
            functions: HashMap::new(),
            defined: 0,
            global_vars: HashMap::new(),
            globals: Vec::new(),
            strings: Vec::new(),
            loops: Vec::new(),
            implicit_warned: HashSet::new(),
        }
    }

    fn diag(&self, code: DiagnosticCode, message: impl Into<String>, span: Span) -> Diagnostic {
        Diagnostic::new(code, message, StageName::Lower, self.source.revision()).at(self.source.locate(span))
    }

    fn error(&mut self, code: DiagnosticCode, message: impl Into<String>, span: Span) -> Reported {
        let diag = self.diag(code, message, span);
        self.diagnostics.push(diag);
        Reported
    }

    fn intern(&mut self, bytes: &[u8]) -> u32 {
        if let Some(pos) = self.strings.iter().position(|s| s == bytes) {
            return pos as u32;
        }
        self.strings.push(bytes.to_vec());
        (self.strings.len() - 1) as u32
    }

    fn check_includes(&mut self, includes: &[Include]) {
        for include in includes {
            if !library::is_known_header(&include.header) {
                let diag = self.diag(
                    DiagnosticCode::UnknownHeader,
                    format!("unknown header '{}'; nothing is declared from it", include.header),
                    include.span,
                );
                self.diagnostics.push(diag);
            }
            self.headers.insert(include.header.clone());
        }
    }

    fn declare_function(&mut self, f: &Function) {
        if self.global_vars.contains_key(&f.name) {
            self.error(
                DiagnosticCode::Redefinition,
                format!("'{}' redeclared as a different kind of symbol", f.name),
                f.name_span,
            );
            return;
        }
        let params: Vec<Type> = f.params.iter().map(|p| p.ty.clone()).collect();
        let mut seen = HashSet::new();
        for p in &f.params {
            if !seen.insert(p.name.as_str()) {
                self.error(
                    DiagnosticCode::Redefinition,
                    format!("redefinition of parameter '{}'", p.name),
                    p.span,
                );
            }
        }
        match self.functions.get(&f.name).cloned() {
            Some(existing) => {
                if existing.params != params || existing.returns != f.return_type {
                    self.error(
                        DiagnosticCode::Redefinition,
                        format!("conflicting types for '{}'", f.name),
                        f.name_span,
                    );
                } else if existing.index.is_some() && f.body.is_some() {
                    self.error(
                        DiagnosticCode::Redefinition,
                        format!("redefinition of '{}'", f.name),
                        f.name_span,
                    );
                } else if f.body.is_some() {
                    let index = self.next_function_index();
                    if let Some(sig) = self.functions.get_mut(&f.name) {
                        sig.index = Some(index);
                    }
                }
            }
            None => {
                let index = f.body.is_some().then(|| self.next_function_index());
                self.functions.insert(
                    f.name.clone(),
                    FnSig {
                        index,
                        params,
                        returns: f.return_type.clone(),
                    },
                );
            }
        }
    }

    fn next_function_index(&mut self) -> u32 {
        self.defined += 1;
        self.defined - 1
    }

    fn declare_global(&mut self, g: &VarDecl) {
        if self.global_vars.contains_key(&g.name) || self.functions.contains_key(&g.name) {
            self.error(
                DiagnosticCode::Redefinition,
                format!("redefinition of '{}'", g.name),
                g.name_span,
            );
            return;
        }
        if g.ty == Type::Void {
            self.error(
                DiagnosticCode::InvalidAssignTarget,
                format!("variable '{}' declared void", g.name),
                g.name_span,
            );
            return;
        }

        let elem_size = g.ty.size();
        let Some(size) = elem_size.checked_mul(g.array_len.unwrap_or(1)) else {
            self.error(
                DiagnosticCode::ArrayTooLarge,
                format!("array '{}' is too large", g.name),
                g.name_span,
            );
            return;
        };
        let init = match (&g.array_len, &g.init) {
            (_, None) => GlobalInit::Zero,
            (Some(len), Some(Expr { kind: ExprKind::Str(bytes), .. }))
                if g.ty == Type::Char && bytes.len() as u32 <= *len =>
            {
                GlobalInit::Bytes(bytes.clone())
            }
            (Some(_), Some(init)) => {
                self.error(
                    DiagnosticCode::NonConstantInitializer,
                    format!("array '{}' can only be initialized from a string literal that fits", g.name),
                    init.span,
                );
                return;
            }
            (None, Some(Expr { kind: ExprKind::Str(bytes), .. })) if g.ty.is_pointer() => {
                GlobalInit::Str(self.intern(bytes))
            }
            (None, Some(init)) => match const_eval(init) {
                Some(value) => GlobalInit::Value(narrow_value(value, &g.ty)),
                None => {
                    self.error(
                        DiagnosticCode::NonConstantInitializer,
                        "initializer element is not a compile-time constant",
                        init.span,
                    );
                    return;
                }
            },
        };

        let index = self.globals.len() as u32;
        self.globals.push(Global {
            name: g.name.clone(),
            size,
            width: Width::for_size(elem_size),
            init,
        });
        self.global_vars.insert(
            g.name.clone(),
            GlobalVar {
                index,
                ty: g.ty.clone(),
                array_len: g.array_len,
            },
        );
    }
}

fn const_eval(e: &Expr) -> Option<i64> {
    match &e.kind {
        ExprKind::Int(v) => Some(*v),
        ExprKind::Unary { op, operand } => {
            let v = const_eval(operand)?;
            match op {
                UnaryOp::Neg => Some(UnOp::Neg.eval(v)),
                UnaryOp::Not => Some(UnOp::Not.eval(v)),
                UnaryOp::BitNot => Some(UnOp::BitNot.eval(v)),
                UnaryOp::Deref | UnaryOp::AddrOf => None,
            }
        }
        ExprKind::Binary { op, lhs, rhs } => {
            let a = const_eval(lhs)?;
            match op {
                BinaryOp::LogicalAnd => Some((a != 0 && const_eval(rhs)? != 0) as i64),
                BinaryOp::LogicalOr => Some((a != 0 || const_eval(rhs)? != 0) as i64),
                _ => arith_op(*op)?.eval(a, const_eval(rhs)?),
            }
        }
        ExprKind::Cast { ty, operand } => Some(narrow_value(const_eval(operand)?, ty)),
        ExprKind::SizeofType(ty) => Some(ty.size() as i64),
        _ => None,
    }
}

fn arith_op(op: BinaryOp) -> Option<BinOp> {
    Some(match op {
        BinaryOp::Add => BinOp::Add,
        BinaryOp::Sub => BinOp::Sub,
        BinaryOp::Mul => BinOp::Mul,
        BinaryOp::Div => BinOp::Div,
        BinaryOp::Rem => BinOp::Rem,
        BinaryOp::Shl => BinOp::Shl,
        BinaryOp::Shr => BinOp::Shr,
        BinaryOp::BitAnd => BinOp::And,
        BinaryOp::BitOr => BinOp::Or,
        BinaryOp::BitXor => BinOp::Xor,
        BinaryOp::Eq => BinOp::Eq,
        BinaryOp::Ne => BinOp::Ne,
        BinaryOp::Lt => BinOp::Lt,
        BinaryOp::Le => BinOp::Le,
        BinaryOp::Gt => BinOp::Gt,
        BinaryOp::Ge => BinOp::Ge,
        BinaryOp::LogicalAnd | BinaryOp::LogicalOr => return None,
    })
}

fn narrow_op(ty: &Type) -> Option<UnOp> {
    match ty {
        Type::Char => Some(UnOp::Sext8),
        Type::Int => Some(UnOp::Sext32),
        _ => None,
    }
}

fn narrow_value(value: i64, ty: &Type) -> i64 {
    narrow_op(ty).map(|op| op.eval(value)).unwrap_or(value)
}

fn width_of(ty: &Type) -> Width {
    Width::for_size(ty.size())
}

/// Levenshtein distance over bytes.
fn edit_distance(a: &str, b: &str) -> usize {
    let b = b.as_bytes();
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    for (i, ca) in a.bytes().enumerate() {
        let mut cur = vec![i + 1; b.len() + 1];
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != *cb);
            cur[j + 1] = (prev[j] + cost).min(prev[j + 1] + 1).min(cur[j] + 1);
        }
        prev = cur;
    }
    prev[b.len()]
}

/// Up to three names within edit distance 2, closest first.
fn did_you_mean<'n>(name: &str, pool: impl IntoIterator<Item = &'n str>) -> Vec<String> {
    let mut scored: Vec<(usize, &str)> = pool
        .into_iter()
        .filter(|candidate| *candidate != name)
        .map(|candidate| (edit_distance(name, candidate), candidate))
        .filter(|(d, _)| *d <= 2 && *d < name.len())
        .collect();
    scored.sort();
    scored.dedup();
    scored.into_iter().take(3).map(|(_, n)| n.to_string()).collect()
}

/// Where an assignment writes.
enum Place {
    Local { slot: u32, ty: Type },
    /// Address is on the stack.
    Memory { ty: Type },
}

impl Place {
    fn ty(&self) -> &Type {
        match self {
            Place::Local { ty, .. } | Place::Memory { ty } => ty,
        }
    }
}

struct FnCx<'m, 'a> {
    m: &'m mut ModuleCx<'a>,
    name: String,
    returns: Type,
    code: Vec<Inst>,
    scopes: Vec<HashMap<String, LocalVar>>,
    next_slot: u32,
    next_label: Label,
    /// (break target, continue target) per enclosing loop.
    loop_targets: Vec<(Label, Label)>,
}

impl<'m, 'a> FnCx<'m, 'a> {
    fn new(m: &'m mut ModuleCx<'a>, f: &Function) -> Self {
        let mut params = HashMap::new();
        for (slot, p) in f.params.iter().enumerate() {
            params.entry(p.name.clone()).or_insert(LocalVar {
                slot: slot as u32,
                ty: p.ty.clone(),
                array_len: None,
            });
        }
        Self {
            m,
            name: f.name.clone(),
            returns: f.return_type.clone(),
            code: Vec::new(),
            scopes: vec![params],
            next_slot: f.params.len() as u32,
            next_label: 0,
            loop_targets: Vec::new(),
        }
    }

    fn finish(mut self, f: &Function, body: &Block) -> IrFunction {
        self.block(body);
        if self.returns == Type::Void {
            self.emit(Inst::RetVoid);
        } else {
            self.emit(Inst::Const(0));
            self.emit(Inst::Ret);
        }
        IrFunction {
            name: self.name,
            params: f.params.len() as u32,
            locals: self.next_slot,
            body: self.code,
            span: f.span,
        }
    }

    fn emit(&mut self, inst: Inst) {
        self.code.push(inst);
    }

    fn label(&mut self) -> Label {
        self.next_label += 1;
        self.next_label - 1
    }

    fn narrow(&mut self, ty: &Type) {
        if let Some(op) = narrow_op(ty) {
            self.emit(Inst::Unary(op));
        }
    }

    fn lookup(&self, name: &str) -> Option<LocalVar> {
        self.scopes.iter().rev().find_map(|s| s.get(name)).cloned()
    }

    fn visible_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .scopes
            .iter()
            .flat_map(|s| s.keys().cloned())
            .chain(self.m.global_vars.keys().cloned())
            .collect();
        names.sort();
        names.dedup();
        names
    }

    fn block(&mut self, block: &Block) {
        self.scopes.push(HashMap::new());
        for stmt in &block.stmts {
            self.stmt(stmt);
        }
        self.scopes.pop();
    }

    fn stmt(&mut self, stmt: &Stmt) {
        self.emit(Inst::Stmt(stmt.span));
        // Errors are already recorded; keep lowering the next statement.
        let _ = self.stmt_inner(stmt);
    }

    fn stmt_inner(&mut self, stmt: &Stmt) -> Lr<()> {
        match &stmt.kind {
            StmtKind::Decl(decls) => {
                for decl in decls {
                    self.local_decl(decl)?;
                }
            }
            StmtKind::Expr(e) => {
                self.expr(e)?;
                self.emit(Inst::Pop);
            }
            StmtKind::If {
                cond,
                then,
                otherwise,
            } => {
                let else_label = self.label();
                self.expr(cond)?;
                self.emit(Inst::JumpIfZero(else_label));
                self.stmt(then);
                match otherwise {
                    Some(otherwise) => {
                        let end = self.label();
                        self.emit(Inst::Jump(end));
                        self.emit(Inst::Label(else_label));
                        self.stmt(otherwise);
                        self.emit(Inst::Label(end));
                    }
                    None => self.emit(Inst::Label(else_label)),
                }
            }
            StmtKind::While { cond, body } => {
                let top = self.label();
                let end = self.label();
                self.emit(Inst::Label(top));
                self.expr(cond)?;
                self.emit(Inst::JumpIfZero(end));
                self.loop_body(body, end, top);
                self.emit(Inst::Jump(top));
                self.emit(Inst::Label(end));
            }
            StmtKind::For {
                init,
                cond,
                step,
                body,
            } => {
                self.m.loops.push(LoopInfo {
                    function: self.name.clone(),
                    span: stmt.span,
                    vectorizable: is_vectorizable(init.as_deref(), cond.as_ref(), step.as_ref(), body),
                });
                self.scopes.push(HashMap::new());
                let result = self.for_loop(init.as_deref(), cond.as_ref(), step.as_ref(), body);
                self.scopes.pop();
                result?;
            }
            StmtKind::Return(value) => match (value, self.returns == Type::Void) {
                (Some(value), true) => {
                    self.expr(value)?;
                    self.emit(Inst::Pop);
                    self.emit(Inst::RetVoid);
                }
                (Some(value), false) => {
                    self.expr(value)?;
                    let returns = self.returns.clone();
                    self.narrow(&returns);
                    self.emit(Inst::Ret);
                }
                (None, true) => self.emit(Inst::RetVoid),
                (None, false) => {
                    self.emit(Inst::Const(0));
                    self.emit(Inst::Ret);
                }
            },
            StmtKind::Break | StmtKind::Continue => {
                let is_break = matches!(stmt.kind, StmtKind::Break);
                let Some(&(brk, cont)) = self.loop_targets.last() else {
                    let word = if is_break { "break" } else { "continue" };
                    return Err(self.m.error(
                        DiagnosticCode::JumpOutsideLoop,
                        format!("'{word}' statement not in loop"),
                        stmt.span,
                    ));
                };
                self.emit(Inst::Jump(if is_break { brk } else { cont }));
            }
            StmtKind::Block(block) => self.block(block),
            StmtKind::Empty => {}
        }
        Ok(())
    }

    fn loop_body(&mut self, body: &Stmt, brk: Label, cont: Label) {
        self.loop_targets.push((brk, cont));
        self.stmt(body);
        self.loop_targets.pop();
    }

    fn for_loop(&mut self, init: Option<&Stmt>, cond: Option<&Expr>, step: Option<&Expr>, body: &Stmt) -> Lr<()> {
        if let Some(init) = init {
            self.stmt(init);
        }
        let top = self.label();
        let next = self.label();
        let end = self.label();
        self.emit(Inst::Label(top));
        if let Some(cond) = cond {
            self.expr(cond)?;
            self.emit(Inst::JumpIfZero(end));
        }
        self.loop_body(body, end, next);
        self.emit(Inst::Label(next));
        if let Some(step) = step {
            self.expr(step)?;
            self.emit(Inst::Pop);
        }
        self.emit(Inst::Jump(top));
        self.emit(Inst::Label(end));
        Ok(())
    }

    fn local_decl(&mut self, decl: &VarDecl) -> Lr<()> {
        if decl.ty == Type::Void {
            return Err(self.m.error(
                DiagnosticCode::InvalidAssignTarget,
                format!("variable '{}' declared void", decl.name),
                decl.name_span,
            ));
        }
        if self.scopes.last().is_some_and(|s| s.contains_key(&decl.name)) {
            return Err(self.m.error(
                DiagnosticCode::Redefinition,
                format!("redefinition of '{}'", decl.name),
                decl.name_span,
            ));
        }

        match decl.array_len {
            Some(len) => {
                if let Some(init) = &decl.init {
                    return Err(self.m.error(
                        DiagnosticCode::InvalidAssignTarget,
                        format!("local array '{}' cannot have an initializer", decl.name),
                        init.span,
                    ));
                }
                let Some(size) = len.checked_mul(decl.ty.size()) else {
                    return Err(self.m.error(
                        DiagnosticCode::ArrayTooLarge,
                        format!("array '{}' is too large", decl.name),
                        decl.name_span,
                    ));
                };
                self.emit(Inst::Alloca(size));
            }
            None => match &decl.init {
                Some(init) => {
                    self.expr(init)?;
                    self.narrow(&decl.ty);
                }
                None => self.emit(Inst::Const(0)),
            },
        }

        let slot = self.next_slot;
        self.next_slot += 1;
        self.emit(Inst::StoreLocal(slot));
        self.emit(Inst::Pop);
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(
                decl.name.clone(),
                LocalVar {
                    slot,
                    ty: decl.ty.clone(),
                    array_len: decl.array_len,
                },
            );
        }
        Ok(())
    }

    fn expr(&mut self, e: &Expr) -> Lr<Type> {
        match &e.kind {
            ExprKind::Int(v) => {
                self.emit(Inst::Const(*v));
                Ok(if i32::try_from(*v).is_ok() { Type::Int } else { Type::Long })
            }
            ExprKind::Str(bytes) => {
                let index = self.m.intern(bytes);
                self.emit(Inst::Str(index));
                Ok(Type::Char.pointer_to())
            }
            ExprKind::Ident(name) => self.ident(name, e.span),
            ExprKind::Unary { op, operand } => self.unary(*op, operand, e.span),
            ExprKind::Binary { op, lhs, rhs } => self.binary(*op, lhs, rhs, e.span),
            ExprKind::Assign { op, target, value } => self.assign(*op, target, value, e.span),
            ExprKind::Call {
                callee,
                callee_span,
                args,
            } => self.call(callee, *callee_span, args),
            ExprKind::Index { base, index } => {
                let elem = self.index_addr(base, index)?;
                self.emit(Inst::Load(width_of(&elem)));
                Ok(elem)
            }
            ExprKind::Cast { ty, operand } => {
                self.expr(operand)?;
                self.narrow(ty);
                Ok(ty.clone())
            }
            ExprKind::SizeofType(ty) => {
                self.emit(Inst::Const(ty.size() as i64));
                Ok(Type::Long)
            }
            ExprKind::SizeofExpr(operand) => {
                let size = self.sizeof_expr(operand)?;
                self.emit(Inst::Const(size as i64));
                Ok(Type::Long)
            }
            ExprKind::IncDec {
                increment,
                prefix,
                target,
            } => self.inc_dec(*increment, *prefix, target),
        }
    }

    fn sizeof_expr(&mut self, operand: &Expr) -> Lr<u32> {
        if let ExprKind::Ident(name) = &operand.kind {
            if let Some(LocalVar {
                ty,
                array_len: Some(len),
                ..
            }) = self.lookup(name)
            {
                return Ok(ty.size() * len);
            }
            if self.lookup(name).is_none() {
                if let Some(GlobalVar {
                    ty,
                    array_len: Some(len),
                    ..
                }) = self.m.global_vars.get(name).cloned()
                {
                    return Ok(ty.size() * len);
                }
            }
        }
        // Only the type is needed; the operand is not evaluated.
        let mark = self.code.len();
        let ty = self.expr(operand)?;
        self.code.truncate(mark);
        Ok(ty.size())
    }

    fn ident(&mut self, name: &str, span: Span) -> Lr<Type> {
        if let Some(local) = self.lookup(name) {
            self.emit(Inst::LoadLocal(local.slot));
            return Ok(match local.array_len {
                Some(_) => local.ty.pointer_to(),
                None => local.ty,
            });
        }
        if let Some(global) = self.m.global_vars.get(name).cloned() {
            self.emit(Inst::GlobalAddr(global.index));
            return Ok(match global.array_len {
                Some(_) => global.ty.pointer_to(),
                None => {
                    self.emit(Inst::Load(width_of(&global.ty)));
                    global.ty
                }
            });
        }
        if let Some(constant) = library::constant(name) {
            if self.m.headers.contains(constant.header) {
                self.emit(Inst::Const(constant.value));
                return Ok(Type::Int);
            }
            let diag = self
                .m
                .diag(
                    DiagnosticCode::UndeclaredIdentifier,
                    format!("use of undeclared identifier '{name}'; it is declared in <{}>", constant.header),
                    span,
                )
                .with_hint(DiagnosticHint::MissingInclude {
                    header: constant.header.to_string(),
                });
            self.m.diagnostics.push(diag);
            return Err(Reported);
        }
        if self.m.functions.contains_key(name) || library::function(name).is_some() {
            return Err(self.m.error(
                DiagnosticCode::AddressOfUnsupported,
                format!("function '{name}' cannot be used as a value"),
                span,
            ));
        }

        let names = self.visible_names();
        let mut pool: Vec<&str> = names.iter().map(String::as_str).collect();
        for lib_name in library::names_in(&library::KNOWN_HEADERS) {
            if library::constant(lib_name).is_some() {
                pool.push(lib_name);
            }
        }
        let candidates = did_you_mean(name, pool);
        let mut diag = self.m.diag(
            DiagnosticCode::UndeclaredIdentifier,
            format!("use of undeclared identifier '{name}'"),
            span,
        );
        if !candidates.is_empty() {
            diag = diag.with_hint(DiagnosticHint::DidYouMean { candidates });
        }
        self.m.diagnostics.push(diag);
        Err(Reported)
    }

    fn unary(&mut self, op: UnaryOp, operand: &Expr, span: Span) -> Lr<Type> {
        match op {
            UnaryOp::Neg | UnaryOp::BitNot => {
                let ty = self.expr(operand)?;
                self.emit(Inst::Unary(if op == UnaryOp::Neg { UnOp::Neg } else { UnOp::BitNot }));
                Ok(ty)
            }
            UnaryOp::Not => {
                self.expr(operand)?;
                self.emit(Inst::Unary(UnOp::Not));
                Ok(Type::Int)
            }
            UnaryOp::Deref => {
                let ty = self.deref_target(operand, span)?;
                self.emit(Inst::Load(width_of(&ty)));
                Ok(ty)
            }
            UnaryOp::AddrOf => match &operand.kind {
                ExprKind::Index { base, index } => Ok(self.index_addr(base, index)?.pointer_to()),
                ExprKind::Unary {
                    op: UnaryOp::Deref,
                    operand: inner,
                } => Ok(self.deref_target(inner, span)?.pointer_to()),
                ExprKind::Ident(name) if self.lookup(name).is_none() && self.m.global_vars.contains_key(name) => {
                    let global = self.m.global_vars[name].clone();
                    self.emit(Inst::GlobalAddr(global.index));
                    Ok(global.ty.pointer_to())
                }
                ExprKind::Ident(name) if self.lookup(name).is_some() => Err(self.m.error(
                    DiagnosticCode::AddressOfUnsupported,
                    format!("cannot take the address of local variable '{name}'"),
                    span,
                )),
                _ => Err(self.m.error(
                    DiagnosticCode::AddressOfUnsupported,
                    "cannot take the address of this expression",
                    span,
                )),
            },
        }
    }

    /// Evaluate a pointer operand and return its pointee type.
    fn deref_target(&mut self, operand: &Expr, span: Span) -> Lr<Type> {
        let ty = self.expr(operand)?;
        match ty.pointee() {
            Some(Type::Void) | None => Err(self.m.error(
                DiagnosticCode::DerefNonPointer,
                "indirection requires a pointer to a complete type",
                span,
            )),
            Some(inner) => Ok(inner.clone()),
        }
    }

    /// Push `base + index * sizeof(elem)` and return the element type.
    fn index_addr(&mut self, base: &Expr, index: &Expr) -> Lr<Type> {
        let base_ty = self.expr(base)?;
        let elem = match base_ty.pointee() {
            Some(Type::Void) | None => {
                return Err(self.m.error(
                    DiagnosticCode::DerefNonPointer,
                    "subscripted value is not an array or pointer",
                    base.span,
                ))
            }
            Some(inner) => inner.clone(),
        };
        self.expr(index)?;
        self.scale(&elem);
        self.emit(Inst::Binary(BinOp::Add));
        Ok(elem)
    }

    fn scale(&mut self, elem: &Type) {
        let size = elem.size().max(1);
        if size != 1 {
            self.emit(Inst::Const(size as i64));
            self.emit(Inst::Binary(BinOp::Mul));
        }
    }

    fn binary(&mut self, op: BinaryOp, lhs: &Expr, rhs: &Expr, _span: Span) -> Lr<Type> {
        if matches!(op, BinaryOp::LogicalAnd | BinaryOp::LogicalOr) {
            let short = self.label();
            let end = self.label();
            let (jump, short_value) = if op == BinaryOp::LogicalAnd {
                (Inst::JumpIfZero(short), 0)
            } else {
                (Inst::JumpIfNotZero(short), 1)
            };
            self.expr(lhs)?;
            self.emit(jump.clone());
            self.expr(rhs)?;
            self.emit(jump);
            self.emit(Inst::Const(1 - short_value));
            self.emit(Inst::Jump(end));
            self.emit(Inst::Label(short));
            self.emit(Inst::Const(short_value));
            self.emit(Inst::Label(end));
            return Ok(Type::Int);
        }
        let lt = self.expr(lhs)?;
        let rt = self.expr(rhs)?;
        Ok(self.arith(op, &lt, &rt))
    }

    /// Emit `lhs op rhs` for operands already on the stack, scaling pointer arithmetic.
    fn arith(&mut self, op: BinaryOp, lt: &Type, rt: &Type) -> Type {
        let Some(bin) = arith_op(op) else {
            return Type::Int;
        };
        match (op, lt.pointee().cloned(), rt.pointee().cloned()) {
            (BinaryOp::Add | BinaryOp::Sub, Some(elem), None) => {
                self.scale(&elem);
                self.emit(Inst::Binary(bin));
                lt.clone()
            }
            (BinaryOp::Add, None, Some(elem)) => {
                self.emit(Inst::Swap);
                self.scale(&elem);
                self.emit(Inst::Binary(bin));
                rt.clone()
            }
            (BinaryOp::Sub, Some(elem), Some(_)) => {
                self.emit(Inst::Binary(BinOp::Sub));
                let size = elem.size().max(1);
                if size != 1 {
                    self.emit(Inst::Const(size as i64));
                    self.emit(Inst::Binary(BinOp::Div));
                }
                Type::Long
            }
            _ => {
                self.emit(Inst::Binary(bin));
                match bin {
                    BinOp::Eq | BinOp::Ne | BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => Type::Int,
                    _ if *lt == Type::Long || *rt == Type::Long || lt.is_pointer() || rt.is_pointer() => {
                        Type::Long
                    }
                    _ => Type::Int,
                }
            }
        }
    }

    fn place(&mut self, target: &Expr) -> Lr<Place> {
        match &target.kind {
            ExprKind::Ident(name) => {
                if let Some(local) = self.lookup(name) {
                    if local.array_len.is_some() {
                        return Err(self.m.error(
                            DiagnosticCode::InvalidAssignTarget,
                            format!("array '{name}' is not assignable"),
                            target.span,
                        ));
                    }
                    return Ok(Place::Local {
                        slot: local.slot,
                        ty: local.ty,
                    });
                }
                if let Some(global) = self.m.global_vars.get(name).cloned() {
                    if global.array_len.is_some() {
                        return Err(self.m.error(
                            DiagnosticCode::InvalidAssignTarget,
                            format!("array '{name}' is not assignable"),
                            target.span,
                        ));
                    }
                    self.emit(Inst::GlobalAddr(global.index));
                    return Ok(Place::Memory { ty: global.ty });
                }
                // Reports the undeclared name.
                self.ident(name, target.span)?;
                Err(self.m.error(
                    DiagnosticCode::InvalidAssignTarget,
                    "expression is not assignable",
                    target.span,
                ))
            }
            ExprKind::Unary {
                op: UnaryOp::Deref,
                operand,
            } => Ok(Place::Memory {
                ty: self.deref_target(operand, target.span)?,
            }),
            ExprKind::Index { base, index } => Ok(Place::Memory {
                ty: self.index_addr(base, index)?,
            }),
            _ => Err(self.m.error(
                DiagnosticCode::InvalidAssignTarget,
                "expression is not assignable",
                target.span,
            )),
        }
    }

    fn load_place(&mut self, place: &Place) {
        match place {
            Place::Local { slot, .. } => self.emit(Inst::LoadLocal(*slot)),
            Place::Memory { ty } => {
                self.emit(Inst::Dup);
                self.emit(Inst::Load(width_of(ty)));
            }
        }
    }

    fn store_place(&mut self, place: &Place) {
        match place {
            Place::Local { slot, ty } => {
                self.narrow(ty);
                self.emit(Inst::StoreLocal(*slot));
            }
            Place::Memory { ty } => self.emit(Inst::Store(width_of(ty))),
        }
    }

    fn assign(&mut self, op: Option<BinaryOp>, target: &Expr, value: &Expr, _span: Span) -> Lr<Type> {
        let place = self.place(target)?;
        let ty = place.ty().clone();
        match op {
            Some(op) => {
                self.load_place(&place);
                let vt = self.expr(value)?;
                self.arith(op, &ty, &vt);
            }
            None => {
                self.expr(value)?;
            }
        }
        self.store_place(&place);
        Ok(ty)
    }

    fn inc_dec(&mut self, increment: bool, prefix: bool, target: &Expr) -> Lr<Type> {
        let place = self.place(target)?;
        let ty = place.ty().clone();
        let step = ty.pointee().map(|t| t.size().max(1) as i64).unwrap_or(1);
        let (forward, back) = if increment {
            (BinOp::Add, BinOp::Sub)
        } else {
            (BinOp::Sub, BinOp::Add)
        };
        self.load_place(&place);
        self.emit(Inst::Const(step));
        self.emit(Inst::Binary(forward));
        self.store_place(&place);
        if !prefix {
            self.emit(Inst::Const(step));
            self.emit(Inst::Binary(back));
        }
        Ok(ty)
    }

    fn call(&mut self, callee: &str, span: Span, args: &[Expr]) -> Lr<Type> {
        if self.lookup(callee).is_some() || self.m.global_vars.contains_key(callee) {
            return Err(self.m.error(
                DiagnosticCode::UndeclaredFunction,
                format!("called object '{callee}' is not a function"),
                span,
            ));
        }

        if let Some(sig) = self.m.functions.get(callee).cloned() {
            if args.len() != sig.params.len() {
                return Err(self.arity_error(callee, sig.params.len(), args.len(), span));
            }
            let Some(func) = sig.index else {
                return Err(self.m.error(
                    DiagnosticCode::UndeclaredFunction,
                    format!("function '{callee}' is declared but never defined"),
                    span,
                ));
            };
            for (arg, param) in args.iter().zip(&sig.params) {
                self.expr(arg)?;
                self.narrow(param);
            }
            self.emit(Inst::Call {
                func,
                argc: args.len() as u32,
            });
            return Ok(sig.returns);
        }

        if let Some(lib) = library::function(callee) {
            if !self.m.headers.contains(lib.header) && self.m.implicit_warned.insert(callee.to_string()) {
                let diag = self
                    .m
                    .diag(
                        DiagnosticCode::ImplicitLibraryDeclaration,
                        format!("implicit declaration of library function '{callee}'; include <{}>", lib.header),
                        span,
                    )
                    .with_hint(DiagnosticHint::MissingInclude {
                        header: lib.header.to_string(),
                    });
                self.m.diagnostics.push(diag);
            }
            if !lib.accepts(args.len()) {
                return Err(self.arity_error(callee, lib.arity, args.len(), span));
            }
            for arg in args {
                self.expr(arg)?;
            }
            self.emit(Inst::CallBuiltin {
                builtin: lib.builtin,
                argc: args.len() as u32,
            });
            return Ok((lib.returns)());
        }

        let mut pool: Vec<&str> = self.m.functions.keys().map(String::as_str).collect();
        for lib_name in library::names_in(&library::KNOWN_HEADERS) {
            if library::function(lib_name).is_some() {
                pool.push(lib_name);
            }
        }
        let candidates = did_you_mean(callee, pool);
        let mut diag = self.m.diag(
            DiagnosticCode::UndeclaredFunction,
            format!("call to undeclared function '{callee}'"),
            span,
        );
        if !candidates.is_empty() {
            diag = diag.with_hint(DiagnosticHint::DidYouMean { candidates });
        }
        self.m.diagnostics.push(diag);
        Err(Reported)
    }

    fn arity_error(&mut self, callee: &str, expected: usize, found: usize, span: Span) -> Reported {
        let which = if found > expected { "many" } else { "few" };
        self.m.error(
            DiagnosticCode::ArgumentCountMismatch,
            format!("too {which} arguments to function '{callee}': expected {expected}, have {found}"),
            span,
        )
    }
}

/// A counted loop whose body only stores side-effect-free values into an
/// array indexed by the induction variable.
fn is_vectorizable(init: Option<&Stmt>, cond: Option<&Expr>, step: Option<&Expr>, body: &Stmt) -> bool {
    let var = match init.map(|s| &s.kind) {
        Some(StmtKind::Decl(decls)) if decls.len() == 1 && decls[0].array_len.is_none() && decls[0].init.is_some() => {
            decls[0].name.as_str()
        }
        Some(StmtKind::Expr(Expr {
            kind: ExprKind::Assign { op: None, target, .. },
            ..
        })) => match &target.kind {
            ExprKind::Ident(name) => name.as_str(),
            _ => return false,
        },
        _ => return false,
    };

    let cond_ok = matches!(cond, Some(Expr {
        kind: ExprKind::Binary { op: BinaryOp::Lt | BinaryOp::Le | BinaryOp::Ne, lhs, rhs },
        ..
    }) if is_ident(lhs, var) && is_pure(rhs));
    let step_ok = match step.map(|e| &e.kind) {
        Some(ExprKind::IncDec {
            increment: true,
            target,
            ..
        }) => is_ident(target, var),
        Some(ExprKind::Assign {
            op: Some(BinaryOp::Add),
            target,
            value,
        }) => is_ident(target, var) && value.kind == ExprKind::Int(1),
        _ => false,
    };
    if !cond_ok || !step_ok {
        return false;
    }

    let single = match &body.kind {
        StmtKind::Block(block) if block.stmts.len() == 1 => &block.stmts[0],
        _ => body,
    };
    match &single.kind {
        StmtKind::Expr(Expr {
            kind: ExprKind::Assign { target, value, .. },
            ..
        }) => match &target.kind {
            ExprKind::Index { base, index } => {
                matches!(&base.kind, ExprKind::Ident(a) if a != var) && is_ident(index, var) && is_pure(value)
            }
            _ => false,
        },
        _ => false,
    }
}

fn is_ident(e: &Expr, name: &str) -> bool {
    matches!(&e.kind, ExprKind::Ident(n) if n == name)
}

fn is_pure(e: &Expr) -> bool {
    match &e.kind {
        ExprKind::Int(_) | ExprKind::Str(_) | ExprKind::Ident(_) | ExprKind::SizeofType(_) => true,
        ExprKind::SizeofExpr(_) => true,
        ExprKind::Unary { operand, .. } | ExprKind::Cast { operand, .. } => is_pure(operand),
        ExprKind::Binary { lhs, rhs, .. } => is_pure(lhs) && is_pure(rhs),
        ExprKind::Index { base, index } => is_pure(base) && is_pure(index),
        ExprKind::Assign { .. } | ExprKind::Call { .. } | ExprKind::IncDec { .. } => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::parse_text;

    fn lower_src(src: &str) -> (LowerOutput, SourceUnit) {
        let source = SourceUnit::new("t.c", src);
        let unit = parse_text(src).expect("parse");
        (lower(&unit, &source), source)
    }

    fn codes(out: &LowerOutput) -> Vec<DiagnosticCode> {
        out.diagnostics.iter().map(|d| d.code).collect()
    }

    #[test]
    fn test_clean_program_lowers() {
        let (out, _) = lower_src("#include <stdio.h>\nint main(void) { printf(\"hi\\n\"); return 0; }");
        assert!(out.diagnostics.is_empty(), "{:?}", out.diagnostics);
        let module = out.module.unwrap();
        assert_eq!(module.entry, Some(0));
        assert_eq!(module.strings, vec![b"hi\n".to_vec()]);
    }

    #[test]
    fn test_implicit_malloc_warns_once_with_header_hint() {
        let src = "int main(){int*p=malloc(20);int*q=malloc(4);return 0;}";
        let (out, _) = lower_src(src);
        assert_eq!(codes(&out), vec![DiagnosticCode::ImplicitLibraryDeclaration]);
        let diag = &out.diagnostics[0];
        assert_eq!(diag.location.span.start, src.find("malloc").unwrap());
        assert_eq!(
            diag.hint,
            Some(DiagnosticHint::MissingInclude {
                header: "stdlib.h".into()
            })
        );
        assert!(out.module.is_some());
    }

    #[test]
    fn test_undeclared_identifier_did_you_mean() {
        let (out, _) = lower_src("int main(){ int count = 0; return cout; }");
        assert_eq!(codes(&out), vec![DiagnosticCode::UndeclaredIdentifier]);
        assert_eq!(
            out.diagnostics[0].hint,
            Some(DiagnosticHint::DidYouMean {
                candidates: vec!["count".into()]
            })
        );
        assert!(out.module.is_none());
    }

    #[test]
    fn test_undeclared_function_suggests_library_name() {
        let (out, _) = lower_src("#include <stdio.h>\nint main(){ prinft(\"x\"); return 0; }");
        assert_eq!(codes(&out), vec![DiagnosticCode::UndeclaredFunction]);
        assert_eq!(
            out.diagnostics[0].hint,
            Some(DiagnosticHint::DidYouMean {
                candidates: vec!["printf".into()]
            })
        );
    }

    #[test]
    fn test_errors_are_collected_in_source_order() {
        let (out, _) = lower_src("int main(){ x = 1; break; return f(1); }");
        assert_eq!(
            codes(&out),
            vec![
                DiagnosticCode::UndeclaredIdentifier,
                DiagnosticCode::JumpOutsideLoop,
                DiagnosticCode::UndeclaredFunction,
            ]
        );
    }

    #[test]
    fn test_argument_count_mismatch() {
        let (out, _) = lower_src("int add(int a, int b) { return a + b; }\nint main(){ return add(1); }");
        assert_eq!(codes(&out), vec![DiagnosticCode::ArgumentCountMismatch]);
        assert!(out.diagnostics[0].message.contains("too few"));
    }

    #[test]
    fn test_redefinition() {
        let (out, _) = lower_src("int f(){return 1;}\nint f(){return 2;}\nint main(){ int a; int a; return 0; }");
        assert_eq!(codes(&out), vec![DiagnosticCode::Redefinition, DiagnosticCode::Redefinition]);
    }

    #[test]
    fn test_missing_main_is_a_warning() {
        let (out, _) = lower_src("int helper(void) { return 1; }");
        assert_eq!(codes(&out), vec![DiagnosticCode::MissingMain]);
        assert_eq!(out.module.unwrap().entry, None);
    }

    #[test]
    fn test_deref_and_address_checks() {
        let (out, _) = lower_src("int main(){ int x = 1; int y = *x; int *p = &x; return 0; }");
        assert_eq!(
            codes(&out),
            vec![DiagnosticCode::DerefNonPointer, DiagnosticCode::AddressOfUnsupported]
        );
    }

    #[test]
    fn test_invalid_assign_target() {
        let (out, _) = lower_src("int main(){ 3 = 4; return 0; }");
        assert_eq!(codes(&out), vec![DiagnosticCode::InvalidAssignTarget]);
    }

    #[test]
    fn test_global_initializers() {
        let (out, _) = lower_src("int n = 2 * 3 + 1;\nchar msg[8] = \"hey\";\nint main(){ return n; }");
        assert!(out.diagnostics.is_empty(), "{:?}", out.diagnostics);
        let module = out.module.unwrap();
        assert_eq!(module.globals[0].init, GlobalInit::Value(7));
        assert_eq!(module.globals[1].init, GlobalInit::Bytes(b"hey".to_vec()));
        assert_eq!(module.globals[1].size, 8);

        let (out, _) = lower_src("int a = 1;\nint b = a;\nint main(){ return b; }");
        assert_eq!(codes(&out), vec![DiagnosticCode::NonConstantInitializer]);
    }

    #[test]
    fn test_constant_without_header() {
        let (out, _) = lower_src("int main(){ fprintf(stderr, \"x\"); return 0; }");
        assert_eq!(
            codes(&out),
            vec![DiagnosticCode::ImplicitLibraryDeclaration, DiagnosticCode::UndeclaredIdentifier]
        );
        assert_eq!(
            out.diagnostics[1].hint,
            Some(DiagnosticHint::MissingInclude {
                header: "stdio.h".into()
            })
        );
    }

    #[test]
    fn test_unknown_header_warns() {
        let (out, _) = lower_src("#include <math.h>\nint main(){ return 0; }");
        assert_eq!(codes(&out), vec![DiagnosticCode::UnknownHeader]);
    }

    #[test]
    fn test_vectorizable_loop_recorded() {
        let (out, _) = lower_src("int main(){ int a[16]; for (int i = 0; i < 16; i++) a[i] = i * 2; return a[3]; }");
        let module = out.module.unwrap();
        assert_eq!(module.loops.len(), 1);
        assert!(module.loops[0].vectorizable);

        let (out, _) = lower_src(
            "#include <stdio.h>\nint main(){ int a[4]; for (int i = 0; i < 4; i++) { a[i] = i; printf(\"%d\", i); } return 0; }",
        );
        assert!(!out.module.unwrap().loops[0].vectorizable);
    }

    #[test]
    fn test_pointer_arithmetic_scales() {
        let (out, _) = lower_src("int main(){ int a[4]; int *p = a + 2; return *p; }");
        let module = out.module.unwrap();
        let body = &module.functions[0].body;
        let pos = body
            .iter()
            .position(|i| *i == Inst::Const(2))
            .expect("index constant");
        assert_eq!(body[pos + 1], Inst::Const(4));
        assert_eq!(body[pos + 2], Inst::Binary(BinOp::Mul));
    }

    #[test]
    fn test_oversized_arrays_are_rejected() {
        let (out, _) = lower_src("long a[1000000000];\nint main(){ return 0; }");
        assert_eq!(codes(&out), vec![DiagnosticCode::ArrayTooLarge]);
        assert!(out.module.is_none());

        let (out, _) = lower_src("int main(){ long a[1000000000]; return 0; }");
        assert_eq!(codes(&out), vec![DiagnosticCode::ArrayTooLarge]);

        let (out, _) = lower_src("char big[1500000000];\nint main(){ return 0; }");
        assert!(out.diagnostics.is_empty(), "{:?}", out.diagnostics);
        assert_eq!(out.module.unwrap().globals[0].size, 1_500_000_000);
    }

    #[test]
    fn test_edit_distance() {
        assert_eq!(edit_distance("cout", "count"), 1);
        assert_eq!(edit_distance("prinft", "printf"), 2);
        assert_eq!(edit_distance("", "abc"), 3);
    }
}
