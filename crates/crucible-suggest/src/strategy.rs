//! Table-driven fix strategies keyed on diagnostic code.
//!
//! Every code maps to a [`Strategy`]; codes with nothing sensible to offer map
//! to [`Strategy::NoFix`] and yield zero candidates. Strategies read the
//! structured hint a stage attached and never re-analyse the source.

use crucible_core::{Diagnostic, DiagnosticCode, DiagnosticHint, FixCandidate, SourceUnit, TextEdit};

/// Confidence assigned to each strategy's first candidate.
pub const ADD_INCLUDE_CONFIDENCE: f32 = 0.95;
pub const INSERT_HINTED_CONFIDENCE: f32 = 0.85;
pub const RENAME_CONFIDENCE: f32 = 0.70;
pub const RENAME_STEP: f32 = 0.10;
pub const INSERT_FREE_CONFIDENCE: f32 = 0.60;
pub const REMOVE_SPAN_CONFIDENCE: f32 = 0.40;

/// How a diagnostic code is answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Strategy {
    /// Insert the `#include` named by a `missing_include` hint.
    AddInclude,
    /// Insert the text carried by an `insert` hint.
    InsertHinted,
    /// Rename to each `did_you_mean` candidate, or add the missing include.
    ResolveName,
    /// Delete the span carried by a `remove` hint.
    RemoveSpan,
    /// Insert a `free` call before each offset of an `insert_before` hint.
    InsertFree,
    NoFix,
}

/// Strategy table. Exhaustive over [`DiagnosticCode`].
pub fn strategy_for(code: DiagnosticCode) -> Strategy {
    use DiagnosticCode::*;
    match code {
        ImplicitLibraryDeclaration => Strategy::AddInclude,
        UnexpectedToken | UnexpectedEof => Strategy::InsertHinted,
        UndeclaredIdentifier | UndeclaredFunction => Strategy::ResolveName,
        UnreachableCode => Strategy::RemoveSpan,
        PossibleLeak => Strategy::InsertFree,
        EmptyTranslationUnit | UnterminatedLiteral | InvalidCharacter | MalformedInclude
        | UnsupportedDirective | NestingTooDeep | ArgumentCountMismatch | Redefinition | JumpOutsideLoop
        | InvalidAssignTarget | AddressOfUnsupported | DerefNonPointer | NonConstantInitializer
        | ArrayTooLarge | MissingMain | UnknownHeader | VectorizableLoop | CodegenInvariant | StagePanicked
        | ArtifactMismatch => Strategy::NoFix,
    }
}

/// Candidates for one diagnostic, in the strategy's own preference order.
pub fn propose(diagnostic: &Diagnostic, source: &SourceUnit) -> Vec<FixCandidate> {
    let text = source.text();
    let hint = diagnostic.hint.as_ref();
    let candidate = |description: String, edits: Vec<TextEdit>, confidence: f32| {
        FixCandidate::new(
            diagnostic.code,
            description,
            edits,
            confidence,
            source.revision(),
            diagnostic.location,
        )
    };

    match (strategy_for(diagnostic.code), hint) {
        (Strategy::AddInclude | Strategy::ResolveName, Some(DiagnosticHint::MissingInclude { header })) => {
            vec![candidate(
                format!("include <{header}>"),
                vec![include_edit(text, header)],
                ADD_INCLUDE_CONFIDENCE,
            )]
        }
        (Strategy::InsertHinted, Some(DiagnosticHint::Insert { offset, text: insert })) => {
            vec![candidate(
                format!("insert '{}'", insert.trim()),
                vec![TextEdit::insert(*offset, insert.clone())],
                INSERT_HINTED_CONFIDENCE,
            )]
        }
        (Strategy::ResolveName, Some(DiagnosticHint::DidYouMean { candidates })) => {
            let span = diagnostic.location.span;
            let Some(current) = text.get(span.start..span.end).filter(|s| is_identifier(s)) else {
                return Vec::new();
            };
            candidates
                .iter()
                .filter(|name| name.as_str() != current)
                .enumerate()
                .map(|(rank, name)| {
                    candidate(
                        format!("rename '{current}' to '{name}'"),
                        vec![TextEdit::replace(span.start, span.end, name.clone())],
                        RENAME_CONFIDENCE - RENAME_STEP * rank as f32,
                    )
                })
                .collect()
        }
        (Strategy::RemoveSpan, Some(DiagnosticHint::Remove { start, end })) => {
            let (start, end) = widen_to_lines(text, *start, *end);
            vec![candidate(
                "remove unreachable code".to_string(),
                vec![TextEdit::delete(start, end)],
                REMOVE_SPAN_CONFIDENCE,
            )]
        }
        (Strategy::InsertFree, Some(DiagnosticHint::InsertBefore { offsets, text: call })) => {
            let edits = offsets
                .iter()
                .map(|&offset| TextEdit::insert(offset, statement_before(text, offset, call)))
                .collect();
            vec![candidate(format!("insert '{call}'"), edits, INSERT_FREE_CONFIDENCE)]
        }
        _ => Vec::new(),
    }
}

/// Insert `#include <header>` after the last include line, or at the top.
pub fn include_edit(text: &str, header: &str) -> TextEdit {
    let directive = format!("#include <{header}>");
    let mut offset = 0;
    let mut last = None;
    for line in text.split_inclusive('\n') {
        offset += line.len();
        if line.trim_start().starts_with("#include") {
            last = Some((offset, line.ends_with('\n')));
        }
    }
    match last {
        Some((end, true)) => TextEdit::insert(end, format!("{directive}\n")),
        Some((end, false)) => TextEdit::insert(end, format!("\n{directive}")),
        None => TextEdit::insert(0, format!("{directive}\n")),
    }
}

/// Statement text to insert at `offset`, keeping the line's indentation.
fn statement_before(text: &str, offset: usize, statement: &str) -> String {
    let offset = offset.min(text.len());
    let line_start = text[..offset].rfind('\n').map(|i| i + 1).unwrap_or(0);
    let indent = &text[line_start..offset];
    if !indent.is_empty() && indent.chars().all(|c| c == ' ' || c == '\t') {
        format!("{statement}\n{indent}")
    } else {
        format!("{statement} ")
    }
}

/// Grow `[start, end)` to whole lines when nothing else shares them.
fn widen_to_lines(text: &str, start: usize, end: usize) -> (usize, usize) {
    if start > end || end > text.len() || !text.is_char_boundary(start) || !text.is_char_boundary(end) {
        return (start, end);
    }
    let line_start = text[..start].rfind('\n').map(|i| i + 1).unwrap_or(0);
    let line_end = text[end..].find('\n').map(|i| end + i).unwrap_or(text.len());
    let blank = |s: &str| s.chars().all(char::is_whitespace);
    if blank(&text[line_start..start]) && blank(&text[end..line_end]) {
        let line_end = if line_end < text.len() { line_end + 1 } else { line_end };
        (line_start, line_end)
    } else {
        (start, end)
    }
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    matches!(chars.next(), Some(c) if c == '_' || c.is_ascii_alphabetic())
        && chars.all(|c| c == '_' || c.is_ascii_alphanumeric())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crucible_core::{Span, StageName};

    fn diag(source: &SourceUnit, code: DiagnosticCode, span: Span, hint: DiagnosticHint) -> Diagnostic {
        Diagnostic::new(code, "test", code.stage(), source.revision())
            .at(source.locate(span))
            .with_hint(hint)
    }

    #[test]
    fn test_table_is_total() {
        for code in DiagnosticCode::ALL {
            let _ = strategy_for(code);
        }
        assert_eq!(strategy_for(DiagnosticCode::MissingMain), Strategy::NoFix);
        assert_eq!(strategy_for(DiagnosticCode::ImplicitLibraryDeclaration), Strategy::AddInclude);
    }

    #[test]
    fn test_include_goes_after_last_include() {
        let text = "#include <stdio.h>\n#include <string.h>\nint main(){}";
        let edit = include_edit(text, "stdlib.h");
        assert_eq!(edit, TextEdit::insert(39, "#include <stdlib.h>\n"));
        assert_eq!(&text[..39], "#include <stdio.h>\n#include <string.h>\n");
    }

    #[test]
    fn test_include_at_top_without_includes() {
        assert_eq!(include_edit("int x;", "stdio.h"), TextEdit::insert(0, "#include <stdio.h>\n"));
    }

    #[test]
    fn test_include_after_unterminated_last_line() {
        let text = "#include <stdio.h>";
        assert_eq!(include_edit(text, "stdlib.h"), TextEdit::insert(text.len(), "\n#include <stdlib.h>"));
    }

    #[test]
    fn test_rename_candidates_decrease_in_confidence() {
        let text = "int main(){ int count = 0; return cout; }";
        let source = SourceUnit::new("a.c", text);
        let start = text.find("cout").unwrap();
        let d = diag(
            &source,
            DiagnosticCode::UndeclaredIdentifier,
            Span::new(start, start + 4),
            DiagnosticHint::DidYouMean {
                candidates: vec!["count".into(), "main".into()],
            },
        );
        let fixes = propose(&d, &source);
        assert_eq!(fixes.len(), 2);
        assert_eq!(fixes[0].edits, vec![TextEdit::replace(start, start + 4, "count")]);
        assert!(fixes[0].confidence > fixes[1].confidence);
        assert!((fixes[0].confidence - RENAME_CONFIDENCE).abs() < f32::EPSILON);
    }

    #[test]
    fn test_rename_skipped_when_span_is_not_a_name() {
        let source = SourceUnit::new("a.c", "int main(){ return 1 + ; }");
        let d = diag(
            &source,
            DiagnosticCode::UndeclaredIdentifier,
            Span::new(19, 22),
            DiagnosticHint::DidYouMean {
                candidates: vec!["x".into()],
            },
        );
        assert!(propose(&d, &source).is_empty());
    }

    #[test]
    fn test_undeclared_constant_adds_include() {
        let source = SourceUnit::new("a.c", "int main(){ fprintf(stderr, \"x\"); return 0; }");
        let d = diag(
            &source,
            DiagnosticCode::UndeclaredIdentifier,
            Span::new(20, 26),
            DiagnosticHint::MissingInclude {
                header: "stdio.h".into(),
            },
        );
        let fixes = propose(&d, &source);
        assert_eq!(fixes.len(), 1);
        assert_eq!(fixes[0].edits, vec![TextEdit::insert(0, "#include <stdio.h>\n")]);
    }

    #[test]
    fn test_remove_widens_to_whole_line() {
        let text = "int main() {\n  return 0;\n  x = 1;\n}\n";
        let source = SourceUnit::new("a.c", text);
        let start = text.find("x = 1").unwrap();
        let d = diag(
            &source,
            DiagnosticCode::UnreachableCode,
            Span::new(start, start + 6),
            DiagnosticHint::Remove {
                start,
                end: start + 6,
            },
        );
        let fixes = propose(&d, &source);
        let edit = &fixes[0].edits[0];
        assert_eq!(&text[edit.start..edit.end], "  x = 1;\n");
    }

    #[test]
    fn test_remove_keeps_span_when_line_is_shared() {
        let text = "int main(){ return 0; f(); }";
        let start = text.find("f();").unwrap();
        assert_eq!(widen_to_lines(text, start, start + 4), (start, start + 4));
    }

    #[test]
    fn test_free_insertion_keeps_indentation() {
        let text = "int main() {\n    int *p = malloc(4);\n    return 0;\n}\n";
        let source = SourceUnit::new("a.c", text);
        let ret = text.find("return").unwrap();
        let d = Diagnostic::new(DiagnosticCode::PossibleLeak, "leak", StageName::Analysis, 1)
            .at(source.locate(Span::new(22, 23)))
            .with_hint(DiagnosticHint::InsertBefore {
                offsets: vec![ret],
                text: "free(p);".into(),
            });
        let fixes = propose(&d, &source);
        assert_eq!(fixes[0].edits, vec![TextEdit::insert(ret, "free(p);\n    ")]);
    }

    #[test]
    fn test_free_insertion_inline() {
        let text = "int main(){int*p=malloc(20);return 0;}";
        let ret = text.find("return").unwrap();
        assert_eq!(statement_before(text, ret, "free(p);"), "free(p); ");
    }

    #[test]
    fn test_hintless_diagnostic_yields_nothing() {
        let source = SourceUnit::new("a.c", "int main(){ return 0 }");
        let d = Diagnostic::new(DiagnosticCode::UnexpectedToken, "expected ';'", StageName::Parse, 1);
        assert!(propose(&d, &source).is_empty());
    }
}
