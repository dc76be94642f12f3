//! Suggestion engine: diagnostics in, ranked fix candidates out.

use std::collections::HashSet;

use crucible_core::{obs, Diagnostic, FixCandidate, SourceUnit, SuggestConfig};
use tracing::{debug, warn};

use crate::apply;
use crate::generator::{anchor_draft, FixGenerator, Snippet};
use crate::strategy;

/// Stateless engine; the source revision is always passed in.
#[derive(Debug, Clone, Default)]
pub struct SuggestionEngine {
    config: SuggestConfig,
}

impl SuggestionEngine {
    pub fn new(config: SuggestConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SuggestConfig {
        &self.config
    }

    /// Fix candidates from the built-in strategy table.
    ///
    /// Ranked by confidence descending, then by diagnostic position. Diagnostics
    /// for a revision other than `source`'s are ignored.
    pub fn suggest(&self, diagnostics: &[Diagnostic], source: &SourceUnit) -> Vec<FixCandidate> {
        let mut candidates = Vec::new();
        for diagnostic in self.current(diagnostics, source) {
            candidates.extend(self.limit(strategy::propose(diagnostic, source)));
        }
        self.finish(candidates, diagnostics.len(), source)
    }

    /// Like [`SuggestionEngine::suggest`], adding anchored drafts from `generator`.
    ///
    /// A generator error for one diagnostic is logged and that diagnostic gets
    /// only built-in candidates.
    pub async fn suggest_with<G>(
        &self,
        generator: &G,
        diagnostics: &[Diagnostic],
        source: &SourceUnit,
    ) -> Vec<FixCandidate>
    where
        G: FixGenerator + ?Sized,
    {
        let mut candidates = Vec::new();
        for diagnostic in self.current(diagnostics, source) {
            let mut proposed = strategy::propose(diagnostic, source);
            let snippet = Snippet::around(source, diagnostic, self.config.snippet_radius);
            match generator.propose(diagnostic, snippet.text).await {
                Ok(drafts) => {
                    let before = proposed.len();
                    proposed.extend(
                        drafts
                            .iter()
                            .filter_map(|draft| anchor_draft(draft, diagnostic, source, snippet)),
                    );
                    debug!(
                        code = %diagnostic.code,
                        drafts = drafts.len(),
                        anchored = proposed.len() - before,
                        "generator drafts anchored"
                    );
                }
                Err(err) => warn!(code = %diagnostic.code, error = %err, "fix generator failed"),
            }
            proposed.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
            candidates.extend(self.limit(proposed));
        }
        self.finish(candidates, diagnostics.len(), source)
    }

    fn current<'a>(
        &self,
        diagnostics: &'a [Diagnostic],
        source: &'a SourceUnit,
    ) -> impl Iterator<Item = &'a Diagnostic> + 'a {
        diagnostics.iter().filter(move |d| {
            let current = d.revision == source.revision();
            if !current {
                debug!(code = %d.code, revision = d.revision, "ignoring diagnostic for another revision");
            }
            current
        })
    }

    fn limit(&self, mut proposed: Vec<FixCandidate>) -> Vec<FixCandidate> {
        proposed.retain(|c| c.confidence >= self.config.min_confidence);
        proposed.truncate(self.config.max_per_diagnostic);
        proposed
    }

    /// Drop duplicates and unapplicable candidates, then rank.
    fn finish(&self, candidates: Vec<FixCandidate>, diagnostics: usize, source: &SourceUnit) -> Vec<FixCandidate> {
        let mut seen = HashSet::new();
        let mut ranked: Vec<FixCandidate> = candidates
            .into_iter()
            .filter(|c| seen.insert(c.id.clone()))
            .filter(|c| match apply::check(source, c) {
                Ok(()) => true,
                Err(err) => {
                    debug!(fix_id = %c.id, error = %err, "dropping candidate that cannot apply");
                    false
                }
            })
            .collect();
        ranked.sort_by(|a, b| {
            b.confidence
                .total_cmp(&a.confidence)
                .then(a.anchor.span.start.cmp(&b.anchor.span.start))
        });
        obs::emit_suggestions(source.revision(), diagnostics, ranked.len());
        ranked
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generator::{FixCandidateDraft, GeneratorError};
    use async_trait::async_trait;
    use crucible_core::{DiagnosticCode, DiagnosticHint, Span, StageName, TextEdit};

    fn missing_include(source: &SourceUnit, at: usize, header: &str) -> Diagnostic {
        Diagnostic::new(
            DiagnosticCode::ImplicitLibraryDeclaration,
            "implicit declaration",
            StageName::Lower,
            source.revision(),
        )
        .at(source.locate(Span::new(at, at + 1)))
        .with_hint(DiagnosticHint::MissingInclude { header: header.into() })
    }

    #[test]
    fn test_ranked_by_confidence_then_position() {
        let text = "int main(){ return 0 }";
        let source = SourceUnit::new("a.c", text);
        let semi = Diagnostic::new(DiagnosticCode::UnexpectedToken, "expected ';'", StageName::Parse, 1)
            .at(source.locate(Span::new(21, 22)))
            .with_hint(DiagnosticHint::Insert {
                offset: 20,
                text: ";".into(),
            });
        let include = missing_include(&source, 12, "stdio.h");
        let fixes = SuggestionEngine::default().suggest(&[semi, include], &source);
        assert_eq!(fixes.len(), 2);
        assert_eq!(fixes[0].diagnostic_code, DiagnosticCode::ImplicitLibraryDeclaration);
        assert_eq!(fixes[1].diagnostic_code, DiagnosticCode::UnexpectedToken);
    }

    #[test]
    fn test_equal_confidence_ties_break_by_location() {
        let source = SourceUnit::new("a.c", "int main(){ a(); b(); }");
        let later = missing_include(&source, 17, "stdlib.h");
        let earlier = missing_include(&source, 12, "string.h");
        let fixes = SuggestionEngine::default().suggest(&[later, earlier], &source);
        assert_eq!(fixes[0].anchor.span.start, 12);
        assert_eq!(fixes[1].anchor.span.start, 17);
    }

    #[test]
    fn test_duplicate_fixes_are_merged() {
        let source = SourceUnit::new("a.c", "int main(){ malloc(1); free(0); }");
        let a = missing_include(&source, 12, "stdlib.h");
        let b = missing_include(&source, 23, "stdlib.h");
        assert_eq!(SuggestionEngine::default().suggest(&[a, b], &source).len(), 1);
    }

    #[test]
    fn test_other_revision_is_ignored() {
        let source = SourceUnit::new("a.c", "x").next_revision("int main(){}");
        let old = missing_include(&SourceUnit::new("a.c", "x"), 0, "stdio.h");
        assert!(SuggestionEngine::default().suggest(&[old], &source).is_empty());
    }

    #[test]
    fn test_min_confidence_filters() {
        let text = "int main(){ return 0;\n x; }";
        let source = SourceUnit::new("a.c", text);
        let dead = Diagnostic::new(DiagnosticCode::UnreachableCode, "dead", StageName::Optimize, 1)
            .at(source.locate(Span::new(23, 25)))
            .with_hint(DiagnosticHint::Remove { start: 23, end: 25 });
        let strict = SuggestionEngine::new(SuggestConfig {
            min_confidence: 0.5,
            ..SuggestConfig::default()
        });
        assert!(strict.suggest(std::slice::from_ref(&dead), &source).is_empty());
        assert_eq!(SuggestionEngine::default().suggest(&[dead], &source).len(), 1);
    }

    #[test]
    fn test_unapplicable_candidate_is_dropped() {
        let source = SourceUnit::new("a.c", "int x");
        let bogus = Diagnostic::new(DiagnosticCode::UnexpectedEof, "eof", StageName::Parse, 1).with_hint(
            DiagnosticHint::Insert {
                offset: 500,
                text: ";".into(),
            },
        );
        assert!(SuggestionEngine::default().suggest(&[bogus], &source).is_empty());
    }

    struct FixedGenerator(Vec<FixCandidateDraft>);

    #[async_trait]
    impl FixGenerator for FixedGenerator {
        async fn propose(&self, _: &Diagnostic, _: &str) -> Result<Vec<FixCandidateDraft>, GeneratorError> {
            Ok(self.0.clone())
        }
    }

    struct DownGenerator;

    #[async_trait]
    impl FixGenerator for DownGenerator {
        async fn propose(&self, _: &Diagnostic, _: &str) -> Result<Vec<FixCandidateDraft>, GeneratorError> {
            Err(GeneratorError::Unavailable("connection refused".into()))
        }
    }

    fn arity_diag(source: &SourceUnit) -> Diagnostic {
        let at = source.text().find("abs(").unwrap_or(0);
        Diagnostic::new(DiagnosticCode::ArgumentCountMismatch, "too many", StageName::Lower, 1)
            .at(source.locate(Span::new(at, at + 3)))
    }

    #[tokio::test]
    async fn test_generator_drafts_are_anchored() {
        let source = SourceUnit::new("a.c", "int main(){ return abs(1, 2); }");
        let generator = FixedGenerator(vec![
            FixCandidateDraft {
                description: "drop extra argument".into(),
                original: "abs(1, 2)".into(),
                replacement: "abs(1)".into(),
                confidence: 0.5,
            },
            FixCandidateDraft {
                description: "unanchorable".into(),
                original: "printf".into(),
                replacement: "puts".into(),
                confidence: 0.9,
            },
        ]);
        let fixes = SuggestionEngine::default()
            .suggest_with(&generator, &[arity_diag(&source)], &source)
            .await;
        assert_eq!(fixes.len(), 1);
        assert_eq!(fixes[0].edits, vec![TextEdit::replace(19, 28, "abs(1)")]);
        assert_eq!(fixes[0].diagnostic_code, DiagnosticCode::ArgumentCountMismatch);
    }

    #[tokio::test]
    async fn test_generator_failure_keeps_builtin_candidates() {
        let source = SourceUnit::new("a.c", "int main(){ return abs(1, 2); }");
        let include = missing_include(&source, 19, "stdlib.h");
        let fixes = SuggestionEngine::default()
            .suggest_with(&DownGenerator, &[include, arity_diag(&source)], &source)
            .await;
        assert_eq!(fixes.len(), 1);
        assert_eq!(fixes[0].diagnostic_code, DiagnosticCode::ImplicitLibraryDeclaration);
    }
}
