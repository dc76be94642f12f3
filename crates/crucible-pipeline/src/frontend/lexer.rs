//! Tokenizer for the C subset, including `#include` directives.

use crucible_core::{DiagnosticCode, Span};
use serde::Serialize;

/// Reserved words.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Keyword {
    Int,
    Char,
    Long,
    Void,
    Const,
    If,
    Else,
    While,
    For,
    Return,
    Break,
    Continue,
    Sizeof,
}

impl Keyword {
    fn lookup(word: &str) -> Option<Self> {
        Some(match word {
            "int" => Keyword::Int,
            "char" => Keyword::Char,
            "long" => Keyword::Long,
            "void" => Keyword::Void,
            "const" => Keyword::Const,
            "if" => Keyword::If,
            "else" => Keyword::Else,
            "while" => Keyword::While,
            "for" => Keyword::For,
            "return" => Keyword::Return,
            "break" => Keyword::Break,
            "continue" => Keyword::Continue,
            "sizeof" => Keyword::Sizeof,
            _ => return None,
        })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Keyword::Int => "int",
            Keyword::Char => "char",
            Keyword::Long => "long",
            Keyword::Void => "void",
            Keyword::Const => "const",
            Keyword::If => "if",
            Keyword::Else => "else",
            Keyword::While => "while",
            Keyword::For => "for",
            Keyword::Return => "return",
            Keyword::Break => "break",
            Keyword::Continue => "continue",
            Keyword::Sizeof => "sizeof",
        }
    }

    /// Keywords that start a type name.
    pub fn is_type(&self) -> bool {
        matches!(
            self,
            Keyword::Int | Keyword::Char | Keyword::Long | Keyword::Void | Keyword::Const
        )
    }
}

/// Punctuators, longest match first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Punct {
    LParen,
    RParen,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    Semi,
    Comma,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    PlusPlus,
    MinusMinus,
    Assign,
    PlusAssign,
    MinusAssign,
    StarAssign,
    SlashAssign,
    EqEq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
    AndAnd,
    OrOr,
    Bang,
    Tilde,
    Amp,
    Pipe,
    Caret,
    Shl,
    Shr,
}

const PUNCTS: &[(&str, Punct)] = &[
    ("++", Punct::PlusPlus),
    ("--", Punct::MinusMinus),
    ("+=", Punct::PlusAssign),
    ("-=", Punct::MinusAssign),
    ("*=", Punct::StarAssign),
    ("/=", Punct::SlashAssign),
    ("==", Punct::EqEq),
    ("!=", Punct::NotEq),
    ("<=", Punct::Le),
    (">=", Punct::Ge),
    ("&&", Punct::AndAnd),
    ("||", Punct::OrOr),
    ("<<", Punct::Shl),
    (">>", Punct::Shr),
    ("(", Punct::LParen),
    (")", Punct::RParen),
    ("{", Punct::LBrace),
    ("}", Punct::RBrace),
    ("[", Punct::LBracket),
    ("]", Punct::RBracket),
    (";", Punct::Semi),
    (",", Punct::Comma),
    ("+", Punct::Plus),
    ("-", Punct::Minus),
    ("*", Punct::Star),
    ("/", Punct::Slash),
    ("%", Punct::Percent),
    ("=", Punct::Assign),
    ("<", Punct::Lt),
    (">", Punct::Gt),
    ("!", Punct::Bang),
    ("~", Punct::Tilde),
    ("&", Punct::Amp),
    ("|", Punct::Pipe),
    ("^", Punct::Caret),
];

impl Punct {
    pub fn as_str(&self) -> &'static str {
        PUNCTS
            .iter()
            .find(|(_, p)| p == self)
            .map(|(s, _)| *s)
            .unwrap_or("?")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenKind {
    Ident(String),
    Int(i64),
    /// Character literal, already decoded.
    Char(u8),
    /// String literal bytes, escapes decoded, without the terminator.
    Str(Vec<u8>),
    Keyword(Keyword),
    Punct(Punct),
    Include { header: String, system: bool },
    Eof,
}

impl TokenKind {
    pub fn describe(&self) -> String {
        match self {
            TokenKind::Ident(name) => format!("identifier '{name}'"),
            TokenKind::Int(v) => format!("integer literal {v}"),
            TokenKind::Char(_) => "character literal".to_string(),
            TokenKind::Str(_) => "string literal".to_string(),
            TokenKind::Keyword(k) => format!("keyword '{}'", k.as_str()),
            TokenKind::Punct(p) => format!("'{}'", p.as_str()),
            TokenKind::Include { .. } => "#include directive".to_string(),
            TokenKind::Eof => "end of input".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
}

/// A tokenization failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LexError {
    pub code: DiagnosticCode,
    pub message: String,
    pub span: Span,
}

impl LexError {
    fn new(code: DiagnosticCode, message: impl Into<String>, span: Span) -> Self {
        Self {
            code,
            message: message.into(),
            span,
        }
    }
}

/// Tokenize the whole input. Stops at the first error.
pub fn tokenize(text: &str) -> Result<Vec<Token>, LexError> {
    Lexer::new(text).run()
}

struct Lexer<'a> {
    text: &'a str,
    bytes: &'a [u8],
    pos: usize,
    /// Only whitespace seen since the last newline.
    at_line_start: bool,
}

impl<'a> Lexer<'a> {
    fn new(text: &'a str) -> Self {
        Self {
            text,
            bytes: text.as_bytes(),
            pos: 0,
            at_line_start: true,
        }
    }

    fn peek(&self, ahead: usize) -> Option<u8> {
        self.bytes.get(self.pos + ahead).copied()
    }

    fn run(mut self) -> Result<Vec<Token>, LexError> {
        let mut tokens = Vec::new();
        loop {
            self.skip_trivia()?;
            let Some(c) = self.peek(0) else {
                tokens.push(Token {
                    kind: TokenKind::Eof,
                    span: Span::new(self.pos, self.pos),
                });
                return Ok(tokens);
            };
            let start = self.pos;
            let kind = if c == b'#' {
                if !self.at_line_start {
                    return Err(LexError::new(
                        DiagnosticCode::InvalidCharacter,
                        "'#' must begin a preprocessor line",
                        Span::new(start, start + 1),
                    ));
                }
                self.directive()?
            } else if c.is_ascii_alphabetic() || c == b'_' {
                let word = self.take_while(|b| b.is_ascii_alphanumeric() || b == b'_');
                match Keyword::lookup(word) {
                    Some(kw) => TokenKind::Keyword(kw),
                    None => TokenKind::Ident(word.to_string()),
                }
            } else if c.is_ascii_digit() {
                self.number()?
            } else if c == b'"' {
                TokenKind::Str(self.quoted(b'"')?)
            } else if c == b'\'' {
                let bytes = self.quoted(b'\'')?;
                if bytes.len() != 1 {
                    return Err(LexError::new(
                        DiagnosticCode::InvalidCharacter,
                        "character literal must contain exactly one character",
                        Span::new(start, self.pos),
                    ));
                }
                TokenKind::Char(bytes[0])
            } else if let Some((s, p)) = PUNCTS
                .iter()
                .find(|(s, _)| self.text[self.pos..].starts_with(s))
            {
                self.pos += s.len();
                TokenKind::Punct(*p)
            } else {
                let ch = self.text[self.pos..].chars().next().unwrap_or('?');
                return Err(LexError::new(
                    DiagnosticCode::InvalidCharacter,
                    format!("invalid character '{ch}' in source"),
                    Span::new(start, start + ch.len_utf8()),
                ));
            };
            self.at_line_start = false;
            tokens.push(Token {
                kind,
                span: Span::new(start, self.pos),
            });
        }
    }

    fn take_while(&mut self, pred: impl Fn(u8) -> bool) -> &'a str {
        let start = self.pos;
        while self.peek(0).is_some_and(&pred) {
            self.pos += 1;
        }
        &self.text[start..self.pos]
    }

    fn skip_trivia(&mut self) -> Result<(), LexError> {
        loop {
            match (self.peek(0), self.peek(1)) {
                (Some(b'\n'), _) => {
                    self.pos += 1;
                    self.at_line_start = true;
                }
                (Some(c), _) if c.is_ascii_whitespace() => self.pos += 1,
                (Some(b'/'), Some(b'/')) => {
                    while self.peek(0).is_some_and(|b| b != b'\n') {
                        self.pos += 1;
                    }
                }
                (Some(b'/'), Some(b'*')) => {
                    let start = self.pos;
                    match self.text[self.pos + 2..].find("*/") {
                        Some(end) => self.pos += end + 4,
                        None => {
                            return Err(LexError::new(
                                DiagnosticCode::UnterminatedLiteral,
                                "unterminated comment",
                                Span::new(start, self.text.len()),
                            ))
                        }
                    }
                }
                _ => return Ok(()),
            }
        }
    }

    fn number(&mut self) -> Result<TokenKind, LexError> {
        let start = self.pos;
        let (digits, radix) = if self.peek(0) == Some(b'0') && matches!(self.peek(1), Some(b'x' | b'X')) {
            self.pos += 2;
            (self.take_while(|b| b.is_ascii_hexdigit()), 16)
        } else {
            (self.take_while(|b| b.is_ascii_digit()), 10)
        };
        // Integer suffixes carry no meaning here.
        self.take_while(|b| matches!(b, b'l' | b'L' | b'u' | b'U'));
        if self.peek(0).is_some_and(|b| b.is_ascii_alphabetic() || b == b'_') {
            let end = self.pos + 1;
            return Err(LexError::new(
                DiagnosticCode::InvalidCharacter,
                "invalid suffix on integer literal",
                Span::new(start, end),
            ));
        }
        i64::from_str_radix(digits, radix)
            .map(TokenKind::Int)
            .map_err(|_| {
                LexError::new(
                    DiagnosticCode::InvalidCharacter,
                    "integer literal is too large",
                    Span::new(start, self.pos),
                )
            })
    }

    fn quoted(&mut self, quote: u8) -> Result<Vec<u8>, LexError> {
        let start = self.pos;
        self.pos += 1;
        let mut out = Vec::new();
        loop {
            match self.peek(0) {
                None | Some(b'\n') => {
                    return Err(LexError::new(
                        DiagnosticCode::UnterminatedLiteral,
                        if quote == b'"' {
                            "missing terminating '\"' character"
                        } else {
                            "missing terminating ' character"
                        },
                        Span::new(start, self.pos),
                    ))
                }
                Some(c) if c == quote => {
                    self.pos += 1;
                    return Ok(out);
                }
                Some(b'\\') => {
                    let escaped = match self.peek(1) {
                        Some(b'n') => b'\n',
                        Some(b't') => b'\t',
                        Some(b'r') => b'\r',
                        Some(b'0') => 0,
                        Some(b'\\') => b'\\',
                        Some(b'\'') => b'\'',
                        Some(b'"') => b'"',
                        _ => {
                            return Err(LexError::new(
                                DiagnosticCode::InvalidCharacter,
                                "unknown escape sequence",
                                Span::new(self.pos, (self.pos + 2).min(self.text.len())),
                            ))
                        }
                    };
                    out.push(escaped);
                    self.pos += 2;
                }
                Some(c) => {
                    out.push(c);
                    self.pos += 1;
                }
            }
        }
    }

    fn directive(&mut self) -> Result<TokenKind, LexError> {
        let start = self.pos;
        let line_end = self.text[start..]
            .find('\n')
            .map(|i| start + i)
            .unwrap_or(self.text.len());
        let line = &self.text[start + 1..line_end];
        self.pos = line_end;
        let span = Span::new(start, line_end);

        let trimmed = line.trim_start();
        let name: String = trimmed
            .chars()
            .take_while(|c| c.is_ascii_alphabetic())
            .collect();
        if name != "include" {
            return Err(LexError::new(
                DiagnosticCode::UnsupportedDirective,
                format!("unsupported preprocessor directive '#{name}'"),
                span,
            ));
        }

        let rest = trimmed[name.len()..].trim();
        let rest = rest.split("//").next().unwrap_or("").trim();
        let (open, close, system) = match rest.chars().next() {
            Some('<') => ('<', '>', true),
            Some('"') => ('"', '"', false),
            _ => {
                return Err(LexError::new(
                    DiagnosticCode::MalformedInclude,
                    "#include expects \"FILENAME\" or <FILENAME>",
                    span,
                ))
            }
        };
        let inner = &rest[open.len_utf8()..];
        match inner.find(close) {
            Some(end) if end > 0 && inner[end + 1..].trim().is_empty() => Ok(TokenKind::Include {
                header: inner[..end].to_string(),
                system,
            }),
            _ => Err(LexError::new(
                DiagnosticCode::MalformedInclude,
                "#include expects \"FILENAME\" or <FILENAME>",
                span,
            )),
        }
    }
}
