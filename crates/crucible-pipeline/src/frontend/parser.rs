//! Recursive-descent parser. Stops at the first syntax error.

use crucible_core::{DiagnosticCode, DiagnosticHint, Span};

use super::ast::*;
use super::lexer::{Keyword, LexError, Punct, Token, TokenKind};

/// A syntax error with an optional mechanical repair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    pub code: DiagnosticCode,
    pub message: String,
    pub span: Span,
    pub hint: Option<DiagnosticHint>,
}

impl ParseError {
    fn new(code: DiagnosticCode, message: impl Into<String>, span: Span) -> Self {
        Self {
            code,
            message: message.into(),
            span,
            hint: None,
        }
    }
}

impl From<LexError> for ParseError {
    fn from(err: LexError) -> Self {
        ParseError::new(err.code, err.message, err.span)
    }
}

type PResult<T> = Result<T, ParseError>;

/// Deepest statement or expression nesting accepted. Every later pass walks
/// the tree recursively, so this also bounds their stack use.
pub const MAX_NESTING: usize = 256;

/// Parse a token stream (terminated by `Eof`) into a translation unit.
pub fn parse(tokens: Vec<Token>) -> PResult<TranslationUnit> {
    Parser {
        tokens,
        pos: 0,
        depth: 0,
    }
    .translation_unit()
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> &Token {
        let last = self.tokens.len().saturating_sub(1);
        &self.tokens[self.pos.min(last)]
    }

    fn peek_at(&self, ahead: usize) -> &TokenKind {
        let last = self.tokens.len().saturating_sub(1);
        &self.tokens[(self.pos + ahead).min(last)].kind
    }

    fn bump(&mut self) -> Token {
        let tok = self.peek().clone();
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
        tok
    }

    fn prev_end(&self) -> usize {
        self.pos
            .checked_sub(1)
            .and_then(|i| self.tokens.get(i))
            .map(|t| t.span.end)
            .unwrap_or(0)
    }

    fn at_punct(&self, punct: Punct) -> bool {
        self.peek().kind == TokenKind::Punct(punct)
    }

    fn at_keyword(&self, kw: Keyword) -> bool {
        self.peek().kind == TokenKind::Keyword(kw)
    }

    fn eat_punct(&mut self, punct: Punct) -> bool {
        if self.at_punct(punct) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    /// Run `parse` one nesting level deeper, failing past [`MAX_NESTING`].
    fn nested<T>(&mut self, parse: impl FnOnce(&mut Self) -> PResult<T>) -> PResult<T> {
        if self.depth >= MAX_NESTING {
            return Err(ParseError::new(
                DiagnosticCode::NestingTooDeep,
                format!("nesting exceeds {MAX_NESTING} levels"),
                self.peek().span,
            ));
        }
        self.depth += 1;
        let parsed = parse(self);
        self.depth -= 1;
        parsed
    }

    fn unexpected(&self, expected: &str) -> ParseError {
        let tok = self.peek();
        if tok.kind == TokenKind::Eof {
            ParseError::new(
                DiagnosticCode::UnexpectedEof,
                format!("expected {expected} before end of input"),
                tok.span,
            )
        } else {
            ParseError::new(
                DiagnosticCode::UnexpectedToken,
                format!("expected {expected}, found {}", tok.kind.describe()),
                tok.span,
            )
        }
    }

    fn expect_punct(&mut self, punct: Punct) -> PResult<Span> {
        if self.at_punct(punct) {
            Ok(self.bump().span)
        } else {
            Err(self.unexpected(&format!("'{}'", punct.as_str())))
        }
    }

    /// A missing `;` is repaired by inserting one after the previous token.
    fn expect_semi(&mut self, after: &str) -> PResult<Span> {
        if self.at_punct(Punct::Semi) {
            return Ok(self.bump().span);
        }
        let offset = self.prev_end();
        let tok = self.peek();
        let code = if tok.kind == TokenKind::Eof {
            DiagnosticCode::UnexpectedEof
        } else {
            DiagnosticCode::UnexpectedToken
        };
        let mut err = ParseError::new(code, format!("expected ';' after {after}"), tok.span);
        err.hint = Some(DiagnosticHint::Insert {
            offset,
            text: ";".to_string(),
        });
        Err(err)
    }

    fn expect_ident(&mut self) -> PResult<(String, Span)> {
        match self.peek().kind.clone() {
            TokenKind::Ident(name) => {
                let span = self.bump().span;
                Ok((name, span))
            }
            _ => Err(self.unexpected("identifier")),
        }
    }

    fn translation_unit(mut self) -> PResult<TranslationUnit> {
        let mut includes = Vec::new();
        let mut items = Vec::new();
        loop {
            match self.peek().kind.clone() {
                TokenKind::Eof => break,
                TokenKind::Include { header, system } => {
                    let span = self.bump().span;
                    includes.push(Include {
                        header,
                        system,
                        span,
                    });
                }
                _ => items.extend(self.item()?),
            }
        }
        Ok(TranslationUnit { includes, items })
    }

    fn at_type_start(&self) -> bool {
        matches!(&self.peek().kind, TokenKind::Keyword(kw) if kw.is_type())
    }

    /// `const`? base-type `const`?, with `long int` / `long long` folded to `long`.
    fn type_spec(&mut self) -> PResult<Type> {
        while self.at_keyword(Keyword::Const) {
            self.bump();
        }
        let ty = match self.peek().kind {
            TokenKind::Keyword(Keyword::Int) => Type::Int,
            TokenKind::Keyword(Keyword::Char) => Type::Char,
            TokenKind::Keyword(Keyword::Void) => Type::Void,
            TokenKind::Keyword(Keyword::Long) => {
                self.bump();
                while self.at_keyword(Keyword::Long) || self.at_keyword(Keyword::Int) {
                    self.bump();
                }
                while self.at_keyword(Keyword::Const) {
                    self.bump();
                }
                return Ok(Type::Long);
            }
            _ => return Err(self.unexpected("type name")),
        };
        self.bump();
        while self.at_keyword(Keyword::Const) {
            self.bump();
        }
        Ok(ty)
    }

    fn pointers(&mut self, mut ty: Type) -> Type {
        while self.eat_punct(Punct::Star) {
            ty = ty.pointer_to();
            while self.at_keyword(Keyword::Const) {
                self.bump();
            }
        }
        ty
    }

    fn item(&mut self) -> PResult<Vec<Item>> {
        let start = self.peek().span.start;
        let base = self.type_spec()?;
        let ty = self.pointers(base.clone());
        let (name, name_span) = self.expect_ident()?;

        if self.at_punct(Punct::LParen) {
            return Ok(vec![Item::Function(self.function(start, ty, name, name_span)?)]);
        }

        let mut decls = vec![self.declarator_rest(start, ty, name, name_span)?];
        while self.eat_punct(Punct::Comma) {
            let decl_start = self.peek().span.start;
            let ty = self.pointers(base.clone());
            let (name, name_span) = self.expect_ident()?;
            decls.push(self.declarator_rest(decl_start, ty, name, name_span)?);
        }
        let end = self.expect_semi("declaration")?.end;
        Ok(decls
            .into_iter()
            .map(|mut d| {
                d.span = Span::new(d.span.start, end);
                Item::Global(d)
            })
            .collect())
    }

    fn function(&mut self, start: usize, return_type: Type, name: String, name_span: Span) -> PResult<Function> {
        self.expect_punct(Punct::LParen)?;
        let mut params = Vec::new();
        if self.at_keyword(Keyword::Void) && *self.peek_at(1) == TokenKind::Punct(Punct::RParen) {
            self.bump();
        } else if !self.at_punct(Punct::RParen) {
            loop {
                let pstart = self.peek().span.start;
                let base = self.type_spec()?;
                let mut ty = self.pointers(base);
                let (pname, pspan) = self.expect_ident()?;
                // `T name[]` decays to a pointer.
                if self.eat_punct(Punct::LBracket) {
                    if let TokenKind::Int(_) = self.peek().kind {
                        self.bump();
                    }
                    self.expect_punct(Punct::RBracket)?;
                    ty = ty.pointer_to();
                }
                params.push(Param {
                    name: pname,
                    ty,
                    span: Span::new(pstart, pspan.end),
                });
                if !self.eat_punct(Punct::Comma) {
                    break;
                }
            }
        }
        self.expect_punct(Punct::RParen)?;

        let body = if self.at_punct(Punct::LBrace) {
            Some(self.block()?)
        } else {
            self.expect_semi("function declaration")?;
            None
        };
        Ok(Function {
            name,
            return_type,
            params,
            body,
            name_span,
            span: Span::new(start, self.prev_end()),
        })
    }

    fn declarator_rest(&mut self, start: usize, ty: Type, name: String, name_span: Span) -> PResult<VarDecl> {
        let mut array_len = None;
        if self.eat_punct(Punct::LBracket) {
            match self.peek().kind {
                TokenKind::Int(n) if n > 0 && n <= u32::MAX as i64 => {
                    self.bump();
                    array_len = Some(n as u32);
                }
                _ => return Err(self.unexpected("positive array length")),
            }
            self.expect_punct(Punct::RBracket)?;
        }
        let init = if self.eat_punct(Punct::Assign) {
            Some(self.assignment()?)
        } else {
            None
        };
        Ok(VarDecl {
            name,
            ty,
            array_len,
            init,
            name_span,
            span: Span::new(start, self.prev_end()),
        })
    }

    fn block(&mut self) -> PResult<Block> {
        let start = self.expect_punct(Punct::LBrace)?.start;
        let mut stmts = Vec::new();
        while !self.at_punct(Punct::RBrace) {
            if self.peek().kind == TokenKind::Eof {
                return Err(self.unexpected("'}'"));
            }
            stmts.push(self.statement()?);
        }
        let end = self.bump().span.end;
        Ok(Block {
            stmts,
            span: Span::new(start, end),
        })
    }

    fn local_decl(&mut self) -> PResult<Stmt> {
        let start = self.peek().span.start;
        let base = self.type_spec()?;
        let mut decls = Vec::new();
        loop {
            let decl_start = self.peek().span.start;
            let ty = self.pointers(base.clone());
            let (name, name_span) = self.expect_ident()?;
            decls.push(self.declarator_rest(decl_start, ty, name, name_span)?);
            if !self.eat_punct(Punct::Comma) {
                break;
            }
        }
        let end = self.expect_semi("declaration")?.end;
        Ok(Stmt {
            kind: StmtKind::Decl(decls),
            span: Span::new(start, end),
        })
    }

    fn statement(&mut self) -> PResult<Stmt> {
        self.nested(Self::statement_inner)
    }

    fn statement_inner(&mut self) -> PResult<Stmt> {
        let start = self.peek().span.start;
        let kind = match self.peek().kind.clone() {
            TokenKind::Punct(Punct::LBrace) => StmtKind::Block(self.block()?),
            TokenKind::Punct(Punct::Semi) => {
                self.bump();
                StmtKind::Empty
            }
            TokenKind::Keyword(kw) if kw.is_type() => return self.local_decl(),
            TokenKind::Keyword(Keyword::If) => {
                self.bump();
                self.expect_punct(Punct::LParen)?;
                let cond = self.expression()?;
                self.expect_punct(Punct::RParen)?;
                let then = Box::new(self.statement()?);
                let otherwise = if self.at_keyword(Keyword::Else) {
                    self.bump();
                    Some(Box::new(self.statement()?))
                } else {
                    None
                };
                StmtKind::If {
                    cond,
                    then,
                    otherwise,
                }
            }
            TokenKind::Keyword(Keyword::While) => {
                self.bump();
                self.expect_punct(Punct::LParen)?;
                let cond = self.expression()?;
                self.expect_punct(Punct::RParen)?;
                StmtKind::While {
                    cond,
                    body: Box::new(self.statement()?),
                }
            }
            TokenKind::Keyword(Keyword::For) => {
                self.bump();
                self.expect_punct(Punct::LParen)?;
                let init = if self.at_punct(Punct::Semi) {
                    self.bump();
                    None
                } else if self.at_type_start() {
                    Some(Box::new(self.local_decl()?))
                } else {
                    let istart = self.peek().span.start;
                    let expr = self.expression()?;
                    let end = self.expect_semi("for-loop initializer")?.end;
                    Some(Box::new(Stmt {
                        kind: StmtKind::Expr(expr),
                        span: Span::new(istart, end),
                    }))
                };
                let cond = if self.at_punct(Punct::Semi) {
                    None
                } else {
                    Some(self.expression()?)
                };
                self.expect_semi("for-loop condition")?;
                let step = if self.at_punct(Punct::RParen) {
                    None
                } else {
                    Some(self.expression()?)
                };
                self.expect_punct(Punct::RParen)?;
                StmtKind::For {
                    init,
                    cond,
                    step,
                    body: Box::new(self.statement()?),
                }
            }
            TokenKind::Keyword(Keyword::Return) => {
                self.bump();
                let value = if self.at_punct(Punct::Semi) {
                    None
                } else {
                    Some(self.expression()?)
                };
                self.expect_semi("return statement")?;
                StmtKind::Return(value)
            }
            TokenKind::Keyword(Keyword::Break) => {
                self.bump();
                self.expect_semi("'break'")?;
                StmtKind::Break
            }
            TokenKind::Keyword(Keyword::Continue) => {
                self.bump();
                self.expect_semi("'continue'")?;
                StmtKind::Continue
            }
            _ => {
                let expr = self.expression()?;
                self.expect_semi("expression")?;
                StmtKind::Expr(expr)
            }
        };
        Ok(Stmt {
            kind,
            span: Span::new(start, self.prev_end()),
        })
    }

    fn expression(&mut self) -> PResult<Expr> {
        self.assignment()
    }

    fn assignment(&mut self) -> PResult<Expr> {
        self.nested(Self::assignment_inner)
    }

    fn assignment_inner(&mut self) -> PResult<Expr> {
        let lhs = self.binary(0)?;
        let op = match self.peek().kind {
            TokenKind::Punct(Punct::Assign) => None,
            TokenKind::Punct(Punct::PlusAssign) => Some(BinaryOp::Add),
            TokenKind::Punct(Punct::MinusAssign) => Some(BinaryOp::Sub),
            TokenKind::Punct(Punct::StarAssign) => Some(BinaryOp::Mul),
            TokenKind::Punct(Punct::SlashAssign) => Some(BinaryOp::Div),
            _ => return Ok(lhs),
        };
        self.bump();
        let value = self.assignment()?;
        let span = lhs.span.to(value.span);
        Ok(Expr::new(
            ExprKind::Assign {
                op,
                target: Box::new(lhs),
                value: Box::new(value),
            },
            span,
        ))
    }

    fn binary_op(&self) -> Option<(BinaryOp, u8)> {
        let TokenKind::Punct(p) = self.peek().kind else {
            return None;
        };
        Some(match p {
            Punct::OrOr => (BinaryOp::LogicalOr, 1),
            Punct::AndAnd => (BinaryOp::LogicalAnd, 2),
            Punct::Pipe => (BinaryOp::BitOr, 3),
            Punct::Caret => (BinaryOp::BitXor, 4),
            Punct::Amp => (BinaryOp::BitAnd, 5),
            Punct::EqEq => (BinaryOp::Eq, 6),
            Punct::NotEq => (BinaryOp::Ne, 6),
            Punct::Lt => (BinaryOp::Lt, 7),
            Punct::Le => (BinaryOp::Le, 7),
            Punct::Gt => (BinaryOp::Gt, 7),
            Punct::Ge => (BinaryOp::Ge, 7),
            Punct::Shl => (BinaryOp::Shl, 8),
            Punct::Shr => (BinaryOp::Shr, 8),
            Punct::Plus => (BinaryOp::Add, 9),
            Punct::Minus => (BinaryOp::Sub, 9),
            Punct::Star => (BinaryOp::Mul, 10),
            Punct::Slash => (BinaryOp::Div, 10),
            Punct::Percent => (BinaryOp::Rem, 10),
            _ => return None,
        })
    }

    /// Precedence climbing over left-associative binary operators.
    fn binary(&mut self, min_prec: u8) -> PResult<Expr> {
        let mut lhs = self.unary()?;
        while let Some((op, prec)) = self.binary_op() {
            if prec <= min_prec {
                break;
            }
            self.bump();
            let rhs = self.binary(prec)?;
            let span = lhs.span.to(rhs.span);
            lhs = Expr::new(
                ExprKind::Binary {
                    op,
                    lhs: Box::new(lhs),
                    rhs: Box::new(rhs),
                },
                span,
            );
        }
        Ok(lhs)
    }

    fn is_cast(&self) -> bool {
        self.at_punct(Punct::LParen)
            && matches!(self.peek_at(1), TokenKind::Keyword(kw) if kw.is_type())
    }

    fn unary(&mut self) -> PResult<Expr> {
        self.nested(Self::unary_inner)
    }

    fn unary_inner(&mut self) -> PResult<Expr> {
        let start = self.peek().span.start;
        let op = match self.peek().kind {
            TokenKind::Punct(Punct::Minus) => Some(UnaryOp::Neg),
            TokenKind::Punct(Punct::Bang) => Some(UnaryOp::Not),
            TokenKind::Punct(Punct::Tilde) => Some(UnaryOp::BitNot),
            TokenKind::Punct(Punct::Star) => Some(UnaryOp::Deref),
            TokenKind::Punct(Punct::Amp) => Some(UnaryOp::AddrOf),
            _ => None,
        };
        if let Some(op) = op {
            self.bump();
            let operand = self.unary()?;
            let span = Span::new(start, operand.span.end);
            return Ok(Expr::new(
                ExprKind::Unary {
                    op,
                    operand: Box::new(operand),
                },
                span,
            ));
        }
        if self.at_punct(Punct::Plus) {
            self.bump();
            return self.unary();
        }
        if self.at_punct(Punct::PlusPlus) || self.at_punct(Punct::MinusMinus) {
            let increment = self.at_punct(Punct::PlusPlus);
            self.bump();
            let target = self.unary()?;
            let span = Span::new(start, target.span.end);
            return Ok(Expr::new(
                ExprKind::IncDec {
                    increment,
                    prefix: true,
                    target: Box::new(target),
                },
                span,
            ));
        }
        if self.at_keyword(Keyword::Sizeof) {
            self.bump();
            if self.is_cast() {
                self.bump();
                let base = self.type_spec()?;
                let ty = self.pointers(base);
                let end = self.expect_punct(Punct::RParen)?.end;
                return Ok(Expr::new(ExprKind::SizeofType(ty), Span::new(start, end)));
            }
            let operand = self.unary()?;
            let span = Span::new(start, operand.span.end);
            return Ok(Expr::new(ExprKind::SizeofExpr(Box::new(operand)), span));
        }
        if self.is_cast() {
            self.bump();
            let base = self.type_spec()?;
            let ty = self.pointers(base);
            self.expect_punct(Punct::RParen)?;
            let operand = self.unary()?;
            let span = Span::new(start, operand.span.end);
            return Ok(Expr::new(
                ExprKind::Cast {
                    ty,
                    operand: Box::new(operand),
                },
                span,
            ));
        }
        self.postfix()
    }

    fn postfix(&mut self) -> PResult<Expr> {
        let mut expr = self.primary()?;
        loop {
            if self.at_punct(Punct::LParen) {
                let ExprKind::Ident(callee) = &expr.kind else {
                    return Err(self.unexpected("';'"));
                };
                let callee = callee.clone();
                let callee_span = expr.span;
                self.bump();
                let mut args = Vec::new();
                if !self.at_punct(Punct::RParen) {
                    loop {
                        args.push(self.assignment()?);
                        if !self.eat_punct(Punct::Comma) {
                            break;
                        }
                    }
                }
                let end = self.expect_punct(Punct::RParen)?.end;
                expr = Expr::new(
                    ExprKind::Call {
                        callee,
                        callee_span,
                        args,
                    },
                    Span::new(callee_span.start, end),
                );
            } else if self.eat_punct(Punct::LBracket) {
                let index = self.expression()?;
                let end = self.expect_punct(Punct::RBracket)?.end;
                let span = Span::new(expr.span.start, end);
                expr = Expr::new(
                    ExprKind::Index {
                        base: Box::new(expr),
                        index: Box::new(index),
                    },
                    span,
                );
            } else if self.at_punct(Punct::PlusPlus) || self.at_punct(Punct::MinusMinus) {
                let increment = self.at_punct(Punct::PlusPlus);
                let end = self.bump().span.end;
                let span = Span::new(expr.span.start, end);
                expr = Expr::new(
                    ExprKind::IncDec {
                        increment,
                        prefix: false,
                        target: Box::new(expr),
                    },
                    span,
                );
            } else {
                return Ok(expr);
            }
        }
    }

    fn primary(&mut self) -> PResult<Expr> {
        let tok = self.peek().clone();
        match tok.kind {
            TokenKind::Int(v) => {
                self.bump();
                Ok(Expr::new(ExprKind::Int(v), tok.span))
            }
            TokenKind::Char(c) => {
                self.bump();
                Ok(Expr::new(ExprKind::Int(c as i64), tok.span))
            }
            TokenKind::Str(mut bytes) => {
                self.bump();
                let mut span = tok.span;
                // Adjacent literals concatenate.
                while let TokenKind::Str(more) = &self.peek().kind {
                    bytes.extend_from_slice(more);
                    span = span.to(self.bump().span);
                }
                Ok(Expr::new(ExprKind::Str(bytes), span))
            }
            TokenKind::Ident(name) => {
                self.bump();
                Ok(Expr::new(ExprKind::Ident(name), tok.span))
            }
            TokenKind::Punct(Punct::LParen) => {
                self.bump();
                let mut inner = self.expression()?;
                let end = self.expect_punct(Punct::RParen)?.end;
                inner.span = Span::new(tok.span.start, end);
                Ok(inner)
            }
            _ => Err(self.unexpected("expression")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::lexer::tokenize;

    fn parse_src(src: &str) -> PResult<TranslationUnit> {
        parse(tokenize(src)?)
    }

    #[test]
    fn test_parse_main_with_includes() {
        let unit = parse_src("#include <stdio.h>\nint main(void) { return 0; }\n").unwrap();
        assert_eq!(unit.includes.len(), 1);
        assert_eq!(unit.includes[0].header, "stdio.h");
        let Item::Function(f) = &unit.items[0] else {
            panic!("expected function");
        };
        assert_eq!(f.name, "main");
        assert!(f.params.is_empty());
        assert_eq!(f.body.as_ref().unwrap().stmts.len(), 1);
    }

    #[test]
    fn test_precedence() {
        let unit = parse_src("int x = 1 + 2 * 3;").unwrap();
        let Item::Global(decl) = &unit.items[0] else {
            panic!("expected global");
        };
        let Some(Expr {
            kind: ExprKind::Binary { op, rhs, .. },
            ..
        }) = &decl.init
        else {
            panic!("expected binary");
        };
        assert_eq!(*op, BinaryOp::Add);
        assert!(matches!(rhs.kind, ExprKind::Binary { op: BinaryOp::Mul, .. }));
    }

    #[test]
    fn test_pointer_and_array_declarations() {
        let unit = parse_src("int main(){ int *p, a[4]; char **q; return 0; }").unwrap();
        let Item::Function(f) = &unit.items[0] else {
            panic!()
        };
        let body = f.body.as_ref().unwrap();
        let StmtKind::Decl(decls) = &body.stmts[0].kind else {
            panic!()
        };
        assert_eq!(decls[0].ty, Type::Int.pointer_to());
        assert_eq!(decls[1].array_len, Some(4));
        let StmtKind::Decl(decls) = &body.stmts[1].kind else {
            panic!()
        };
        assert_eq!(decls[0].ty, Type::Char.pointer_to().pointer_to());
    }

    #[test]
    fn test_missing_semicolon_hint() {
        let src = "int main(){ int x = 1\n return x; }";
        let err = parse_src(src).unwrap_err();
        assert_eq!(err.code, DiagnosticCode::UnexpectedToken);
        assert_eq!(
            err.hint,
            Some(DiagnosticHint::Insert {
                offset: src.find('1').unwrap() + 1,
                text: ";".into()
            })
        );
    }

    #[test]
    fn test_unexpected_eof() {
        let err = parse_src("int main() {").unwrap_err();
        assert_eq!(err.code, DiagnosticCode::UnexpectedEof);
    }

    #[test]
    fn test_for_loop_and_postfix() {
        let unit = parse_src("int main(){ for (int i = 0; i < 3; i++) {} return 0; }").unwrap();
        let Item::Function(f) = &unit.items[0] else {
            panic!()
        };
        let StmtKind::For { init, cond, step, .. } = &f.body.as_ref().unwrap().stmts[0].kind else {
            panic!("expected for");
        };
        assert!(init.is_some() && cond.is_some());
        assert!(matches!(
            step.as_ref().unwrap().kind,
            ExprKind::IncDec {
                increment: true,
                prefix: false,
                ..
            }
        ));
    }

    #[test]
    fn test_cast_and_sizeof() {
        let unit = parse_src("int main(){ long n = sizeof(int) + (long)sizeof n; return 0; }");
        assert!(unit.is_ok());
    }

    #[test]
    fn test_prototype_then_definition() {
        let unit = parse_src("int add(int a, int b);\nint add(int a, int b) { return a + b; }").unwrap();
        assert_eq!(unit.items.len(), 2);
        let Item::Function(proto) = &unit.items[0] else {
            panic!()
        };
        assert!(proto.body.is_none());
    }

    #[test]
    fn test_call_on_non_identifier_rejected() {
        let err = parse_src("int main(){ (1)(2); }").unwrap_err();
        assert_eq!(err.code, DiagnosticCode::UnexpectedToken);
    }

    #[test]
    fn test_string_concatenation() {
        let unit = parse_src("char *s = \"ab\" \"cd\";").unwrap();
        let Item::Global(decl) = &unit.items[0] else {
            panic!()
        };
        assert_eq!(decl.init.as_ref().unwrap().kind, ExprKind::Str(b"abcd".to_vec()));
    }

    #[test]
    fn test_deep_nesting_is_a_syntax_error() {
        let parens = format!("int main(){{return {}0{};}}", "(".repeat(2000), ")".repeat(2000));
        let err = parse_src(&parens).unwrap_err();
        assert_eq!(err.code, DiagnosticCode::NestingTooDeep);

        let blocks = format!("int main(){}{}", "{".repeat(5000), "}".repeat(5000));
        assert_eq!(parse_src(&blocks).unwrap_err().code, DiagnosticCode::NestingTooDeep);

        let negations = format!("int x = {}1;", "-".repeat(5000));
        assert_eq!(parse_src(&negations).unwrap_err().code, DiagnosticCode::NestingTooDeep);
    }

    #[test]
    fn test_moderate_nesting_parses() {
        let src = format!("int main(){{return {}0{};}}", "(".repeat(60), ")".repeat(60));
        assert!(parse_src(&src).is_ok());
    }

    #[test]
    fn test_tree_serializes() {
        let unit = parse_src("int main(){int*p=malloc(20);return 0;}").unwrap();
        let json = serde_json::to_value(&unit).unwrap();
        let body = &json["items"][0]["value"]["body"]["stmts"];
        assert_eq!(body[0]["kind"]["stmt"], "decl");
        assert_eq!(body[1]["kind"]["stmt"], "return");
        assert_eq!(body[1]["kind"]["value"]["kind"]["expr"], "int");
    }
}
