//! Normalized compiler diagnostics.
//!
//! Codes are stable across pipeline revisions: the suggestion engine keys its
//! strategy table on [`DiagnosticCode`], so a code is never reused for a
//! different condition. Bump [`DIAGNOSTIC_TABLE_VERSION`] when codes are added.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Version of the diagnostic code table.
pub const DIAGNOSTIC_TABLE_VERSION: u32 = 2;

/// Severity level for a diagnostic.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Note,
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Note => write!(f, "note"),
            Severity::Warning => write!(f, "warning"),
            Severity::Error => write!(f, "error"),
        }
    }
}

/// Broad class of a diagnostic.
///
/// `Internal` separates "the compiler is broken" from "your code is wrong".
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Syntax,
    Semantic,
    Optimization,
    Internal,
    Analysis,
}

/// Pipeline stage (or analysis layer) a diagnostic is attributed to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum StageName {
    Parse,
    Lower,
    Optimize,
    Generate,
    /// Best-effort analysis that runs outside the pipeline.
    Analysis,
}

impl StageName {
    /// Declared pipeline order.
    pub const PIPELINE: [StageName; 4] = [
        StageName::Parse,
        StageName::Lower,
        StageName::Optimize,
        StageName::Generate,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StageName::Parse => "parse",
            StageName::Lower => "lower",
            StageName::Optimize => "optimize",
            StageName::Generate => "generate",
            StageName::Analysis => "analysis",
        }
    }
}

impl fmt::Display for StageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stable diagnostic codes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DiagnosticCode {
    #[serde(rename = "E0001")]
    EmptyTranslationUnit,
    #[serde(rename = "E0002")]
    UnexpectedToken,
    #[serde(rename = "E0003")]
    UnterminatedLiteral,
    #[serde(rename = "E0004")]
    InvalidCharacter,
    #[serde(rename = "E0005")]
    UnexpectedEof,
    #[serde(rename = "E0006")]
    MalformedInclude,
    #[serde(rename = "E0007")]
    UnsupportedDirective,
    #[serde(rename = "E0008")]
    NestingTooDeep,

    #[serde(rename = "E0101")]
    UndeclaredIdentifier,
    #[serde(rename = "E0102")]
    UndeclaredFunction,
    #[serde(rename = "E0103")]
    ArgumentCountMismatch,
    #[serde(rename = "E0104")]
    Redefinition,
    #[serde(rename = "E0105")]
    JumpOutsideLoop,
    #[serde(rename = "E0106")]
    InvalidAssignTarget,
    #[serde(rename = "E0107")]
    AddressOfUnsupported,
    #[serde(rename = "E0108")]
    DerefNonPointer,
    #[serde(rename = "E0109")]
    NonConstantInitializer,
    #[serde(rename = "E0110")]
    ArrayTooLarge,
    #[serde(rename = "W0201")]
    ImplicitLibraryDeclaration,
    #[serde(rename = "W0202")]
    MissingMain,
    #[serde(rename = "W0205")]
    UnknownHeader,

    #[serde(rename = "N0301")]
    VectorizableLoop,
    #[serde(rename = "W0302")]
    UnreachableCode,

    #[serde(rename = "ICE0001")]
    CodegenInvariant,
    #[serde(rename = "ICE0002")]
    StagePanicked,
    #[serde(rename = "ICE0003")]
    ArtifactMismatch,

    #[serde(rename = "A0401")]
    PossibleLeak,
}

impl DiagnosticCode {
    pub const ALL: [DiagnosticCode; 27] = [
        DiagnosticCode::EmptyTranslationUnit,
        DiagnosticCode::UnexpectedToken,
        DiagnosticCode::UnterminatedLiteral,
        DiagnosticCode::InvalidCharacter,
        DiagnosticCode::UnexpectedEof,
        DiagnosticCode::MalformedInclude,
        DiagnosticCode::UnsupportedDirective,
        DiagnosticCode::NestingTooDeep,
        DiagnosticCode::UndeclaredIdentifier,
        DiagnosticCode::UndeclaredFunction,
        DiagnosticCode::ArgumentCountMismatch,
        DiagnosticCode::Redefinition,
        DiagnosticCode::JumpOutsideLoop,
        DiagnosticCode::InvalidAssignTarget,
        DiagnosticCode::AddressOfUnsupported,
        DiagnosticCode::DerefNonPointer,
        DiagnosticCode::NonConstantInitializer,
        DiagnosticCode::ArrayTooLarge,
        DiagnosticCode::ImplicitLibraryDeclaration,
        DiagnosticCode::MissingMain,
        DiagnosticCode::UnknownHeader,
        DiagnosticCode::VectorizableLoop,
        DiagnosticCode::UnreachableCode,
        DiagnosticCode::CodegenInvariant,
        DiagnosticCode::StagePanicked,
        DiagnosticCode::ArtifactMismatch,
        DiagnosticCode::PossibleLeak,
    ];

    /// Rendered code, e.g. `"W0201"`.
    pub fn as_str(&self) -> &'static str {
        match self {
            DiagnosticCode::EmptyTranslationUnit => "E0001",
            DiagnosticCode::UnexpectedToken => "E0002",
            DiagnosticCode::UnterminatedLiteral => "E0003",
            DiagnosticCode::InvalidCharacter => "E0004",
            DiagnosticCode::UnexpectedEof => "E0005",
            DiagnosticCode::MalformedInclude => "E0006",
            DiagnosticCode::UnsupportedDirective => "E0007",
            DiagnosticCode::NestingTooDeep => "E0008",
            DiagnosticCode::UndeclaredIdentifier => "E0101",
            DiagnosticCode::UndeclaredFunction => "E0102",
            DiagnosticCode::ArgumentCountMismatch => "E0103",
            DiagnosticCode::Redefinition => "E0104",
            DiagnosticCode::JumpOutsideLoop => "E0105",
            DiagnosticCode::InvalidAssignTarget => "E0106",
            DiagnosticCode::AddressOfUnsupported => "E0107",
            DiagnosticCode::DerefNonPointer => "E0108",
            DiagnosticCode::NonConstantInitializer => "E0109",
            DiagnosticCode::ArrayTooLarge => "E0110",
            DiagnosticCode::ImplicitLibraryDeclaration => "W0201",
            DiagnosticCode::MissingMain => "W0202",
            DiagnosticCode::UnknownHeader => "W0205",
            DiagnosticCode::VectorizableLoop => "N0301",
            DiagnosticCode::UnreachableCode => "W0302",
            DiagnosticCode::CodegenInvariant => "ICE0001",
            DiagnosticCode::StagePanicked => "ICE0002",
            DiagnosticCode::ArtifactMismatch => "ICE0003",
            DiagnosticCode::PossibleLeak => "A0401",
        }
    }

    /// Parse a rendered code.
    pub fn parse(code: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|c| c.as_str() == code)
    }

    pub fn severity(&self) -> Severity {
        match self.as_str().as_bytes()[0] {
            b'W' => Severity::Warning,
            b'N' | b'A' => Severity::Note,
            _ => Severity::Error,
        }
    }

    pub fn category(&self) -> Category {
        match self.stage() {
            StageName::Parse => Category::Syntax,
            StageName::Lower => Category::Semantic,
            StageName::Optimize => Category::Optimization,
            StageName::Generate => Category::Internal,
            StageName::Analysis => Category::Analysis,
        }
    }

    /// Stage that owns this code.
    ///
    /// `StagePanicked` and `ArtifactMismatch` are reported by whichever stage
    /// hit them, so their owner here is nominal.
    pub fn stage(&self) -> StageName {
        use DiagnosticCode::*;
        match self {
            EmptyTranslationUnit | UnexpectedToken | UnterminatedLiteral | InvalidCharacter
            | UnexpectedEof | MalformedInclude | UnsupportedDirective | NestingTooDeep => StageName::Parse,
            UndeclaredIdentifier | UndeclaredFunction | ArgumentCountMismatch | Redefinition
            | JumpOutsideLoop | InvalidAssignTarget | AddressOfUnsupported | DerefNonPointer
            | NonConstantInitializer | ArrayTooLarge | ImplicitLibraryDeclaration | MissingMain | UnknownHeader => StageName::Lower,
            VectorizableLoop | UnreachableCode => StageName::Optimize,
            CodegenInvariant | StagePanicked | ArtifactMismatch => StageName::Generate,
            PossibleLeak => StageName::Analysis,
        }
    }
}

impl fmt::Display for DiagnosticCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Half-open byte range `[start, end)` into a source revision.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Smallest span covering both.
    pub fn to(&self, other: Span) -> Span {
        Span::new(self.start.min(other.start), self.end.max(other.end))
    }
}

/// Human-facing position plus the byte span it came from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
pub struct Location {
    /// Line number (1-indexed).
    pub line: u32,

    /// Column number (1-indexed, in characters).
    pub column: u32,

    pub span: Span,
}

impl Location {
    pub fn new(line: u32, column: u32, span: Span) -> Self {
        Self { line, column, span }
    }
}

/// Structured data a stage attaches so fixes can be built without re-analysis.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DiagnosticHint {
    /// A library declaration lives in `header`.
    MissingInclude { header: String },

    /// Names in scope close to the offending one, best first.
    DidYouMean { candidates: Vec<String> },

    /// Inserting `text` at `offset` resolves the diagnostic.
    Insert { offset: usize, text: String },

    /// Removing `[start, end)` resolves the diagnostic.
    Remove { start: usize, end: usize },

    /// Inserting `text` before each offset resolves the diagnostic.
    InsertBefore { offsets: Vec<usize>, text: String },
}

/// A single compile-time (or analysis) finding.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Diagnostic {
    pub code: DiagnosticCode,

    pub severity: Severity,

    pub category: Category,

    /// Human-readable message.
    pub message: String,

    pub location: Location,

    /// Stage that produced this diagnostic.
    pub stage: StageName,

    /// Source revision the location refers to.
    pub revision: u64,

    pub hint: Option<DiagnosticHint>,
}

impl Diagnostic {
    /// Create a diagnostic with the code's default severity and category.
    pub fn new(code: DiagnosticCode, message: impl Into<String>, stage: StageName, revision: u64) -> Self {
        Self {
            code,
            severity: code.severity(),
            category: code.category(),
            message: message.into(),
            location: Location::default(),
            stage,
            revision,
            hint: None,
        }
    }

    /// Set location.
    pub fn at(mut self, location: Location) -> Self {
        self.location = location;
        self
    }

    /// Attach a fix hint.
    pub fn with_hint(mut self, hint: DiagnosticHint) -> Self {
        self.hint = Some(hint);
        self
    }

    /// Override the default severity.
    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }

    /// Whether this signals a compiler bug rather than a user error.
    pub fn is_internal(&self) -> bool {
        self.category == Category::Internal
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}: {}[{}]: {}",
            self.location.line, self.location.column, self.severity, self.code, self.message
        )
    }
}

/// Sort diagnostics into source order, keeping generation order for ties.
pub fn sort_source_order(diagnostics: &mut [Diagnostic]) {
    diagnostics.sort_by_key(|d| d.location.span.start);
}
