//! External fix generators and draft anchoring.
//!
//! A generator (for example a language model behind an API) only sees the
//! diagnostic and a window of source text. Its drafts carry no offsets, so
//! each one is anchored by finding its `original` text in that window.

use async_trait::async_trait;
use crucible_core::{Diagnostic, FixCandidate, SourceUnit, TextEdit};
use serde::{Deserialize, Serialize};

/// An unanchored fix proposal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixCandidateDraft {
    pub description: String,

    /// Exact text to replace; must occur once in the snippet window.
    pub original: String,

    pub replacement: String,

    pub confidence: f32,
}

/// Generator failures. Logged and skipped by the engine.
#[derive(Debug, thiserror::Error)]
pub enum GeneratorError {
    #[error("generator unavailable: {0}")]
    Unavailable(String),

    #[error("malformed generator response: {0}")]
    Malformed(String),
}

/// Source of fix drafts outside the built-in strategy table.
#[async_trait]
pub trait FixGenerator: Send + Sync {
    async fn propose(
        &self,
        diagnostic: &Diagnostic,
        snippet: &str,
    ) -> std::result::Result<Vec<FixCandidateDraft>, GeneratorError>;
}

/// A source window handed to a generator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Snippet<'a> {
    /// Byte offset of `text` within the source.
    pub start: usize,
    pub text: &'a str,
}

impl<'a> Snippet<'a> {
    /// Lines around the diagnostic's line.
    pub fn around(source: &'a SourceUnit, diagnostic: &Diagnostic, radius: u32) -> Self {
        let (start, text) = source.snippet(diagnostic.location.line, radius);
        Self { start, text }
    }
}

/// Turn a draft into a candidate, or `None` when it cannot be anchored.
pub fn anchor_draft(
    draft: &FixCandidateDraft,
    diagnostic: &Diagnostic,
    source: &SourceUnit,
    snippet: Snippet<'_>,
) -> Option<FixCandidate> {
    if draft.original.is_empty() || draft.original == draft.replacement || !draft.confidence.is_finite() {
        return None;
    }
    let mut matches = snippet.text.match_indices(draft.original.as_str());
    let (at, _) = matches.next()?;
    if matches.next().is_some() {
        return None;
    }
    let start = snippet.start + at;
    Some(FixCandidate::new(
        diagnostic.code,
        draft.description.clone(),
        vec![TextEdit::replace(start, start + draft.original.len(), draft.replacement.clone())],
        draft.confidence,
        source.revision(),
        diagnostic.location,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crucible_core::{DiagnosticCode, Span, StageName};

    fn setup() -> (SourceUnit, Diagnostic) {
        let text = "int main() {\n  int total = 0;\n  return totl;\n}\n";
        let source = SourceUnit::new("a.c", text);
        let at = text.find("totl").unwrap();
        let diag = Diagnostic::new(DiagnosticCode::UndeclaredIdentifier, "undeclared", StageName::Lower, 1)
            .at(source.locate(Span::new(at, at + 4)));
        (source, diag)
    }

    fn draft(original: &str, replacement: &str) -> FixCandidateDraft {
        FixCandidateDraft {
            description: "fix".into(),
            original: original.into(),
            replacement: replacement.into(),
            confidence: 0.8,
        }
    }

    #[test]
    fn test_unique_match_is_anchored() {
        let (source, diag) = setup();
        let snippet = Snippet::around(&source, &diag, 0);
        assert_eq!(snippet.text, "  return totl;");
        let fix = anchor_draft(&draft("totl", "total"), &diag, &source, snippet).unwrap();
        let at = source.text().find("totl").unwrap();
        assert_eq!(fix.edits, vec![TextEdit::replace(at, at + 4, "total")]);
        assert_eq!(fix.revision, 1);
    }

    #[test]
    fn test_ambiguous_or_missing_match_is_dropped() {
        let (source, diag) = setup();
        let snippet = Snippet::around(&source, &diag, 1);
        assert!(anchor_draft(&draft("t", "x"), &diag, &source, snippet).is_none());
        assert!(anchor_draft(&draft("nowhere", "x"), &diag, &source, snippet).is_none());
        assert!(anchor_draft(&draft("", "x"), &diag, &source, snippet).is_none());
    }

    #[test]
    fn test_text_outside_window_is_not_anchored() {
        let (source, diag) = setup();
        let snippet = Snippet::around(&source, &diag, 0);
        assert!(anchor_draft(&draft("int main", "long main"), &diag, &source, snippet).is_none());
    }
}
