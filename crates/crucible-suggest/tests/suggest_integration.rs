//! Integration tests: pipeline diagnostics through the suggestion engine and back.

use crucible_core::{DiagnosticCode, SourceUnit, TextEdit};
use crucible_pipeline::{find_leaks, frontend, Pipeline};
use crucible_suggest::{apply, apply_all, ApplyError, CandidateOutcome, SuggestionEngine};

fn diagnostics(source: &SourceUnit) -> Vec<crucible_core::Diagnostic> {
    Pipeline::new().run(source).diagnostics().cloned().collect()
}

/// Test: missing include scenario compiles clean after the suggested fix
#[test]
fn test_missing_include_roundtrip() {
    let source = SourceUnit::new("leak.c", "int main(){int*p=malloc(20);return 0;}");
    let diags = diagnostics(&source);
    assert_eq!(diags.len(), 1);

    let fixes = SuggestionEngine::default().suggest(&diags, &source);
    assert_eq!(fixes.len(), 1);
    assert_eq!(fixes[0].diagnostic_code, DiagnosticCode::ImplicitLibraryDeclaration);
    assert_eq!(fixes[0].edits, vec![TextEdit::insert(0, "#include <stdlib.h>\n")]);

    let fixed = apply(&source, &fixes[0]).expect("fix applies");
    assert_eq!(fixed.revision(), 2);
    assert!(fixed.text().starts_with("#include <stdlib.h>\n"));
    let run = Pipeline::new().run(&fixed);
    assert!(run.succeeded());
    assert_eq!(run.diagnostics().count(), 0);
}

/// Test: fixes for revision R fail with StalePatch on any other revision
#[test]
fn test_fixes_are_revision_bound() {
    let source = SourceUnit::new("semi.c", "int main() {\n  int x = 1\n  return x;\n}\n");
    let fixes = SuggestionEngine::default().suggest(&diagnostics(&source), &source);
    assert_eq!(fixes.len(), 1);

    let next = apply(&source, &fixes[0]).unwrap();
    assert!(Pipeline::new().run(&next).succeeded());

    for other in [next.clone(), next.next_revision(next.text())] {
        let err = apply(&other, &fixes[0]).unwrap_err();
        assert!(matches!(err, ApplyError::StalePatch { expected: 1, .. }));
    }
}

/// Test: overlapping rename suggestions apply the first and skip the second
#[test]
fn test_apply_all_keeps_first_overlap() {
    let text = "int main() {\n  int cnt1 = 2;\n  int cnt2 = 3;\n  return cnt;\n}\n";
    let source = SourceUnit::new("rename.c", text);
    let diags = diagnostics(&source);
    assert_eq!(diags[0].code, DiagnosticCode::UndeclaredIdentifier);

    let fixes = SuggestionEngine::default().suggest(&diags, &source);
    assert!(fixes.len() >= 2, "expected several rename candidates, got {fixes:?}");
    let batch = apply_all(&source, &fixes);
    assert_eq!(batch.outcomes[0].outcome, CandidateOutcome::Applied { revision: 2 });
    for later in &batch.outcomes[1..] {
        assert!(matches!(later.outcome, CandidateOutcome::SkippedConflict { .. }));
    }
    assert!(batch.source.text().contains("return cnt1;"));
    assert!(Pipeline::new().run(&batch.source).succeeded());
}

/// Test: leak findings feed the engine and the patched source still compiles
#[test]
fn test_leak_fix_inserts_free() {
    let text = "#include <stdlib.h>\nint main() {\n    int *p = malloc(20);\n    return 0;\n}\n";
    let source = SourceUnit::new("leak.c", text);
    let unit = frontend::parse_text(text).unwrap();
    let leaks = find_leaks(&unit, &source);

    let fixes = SuggestionEngine::default().suggest(&leaks, &source);
    assert_eq!(fixes.len(), 1);
    let fixed = apply(&source, &fixes[0]).unwrap();
    assert!(fixed.text().contains("    free(p);\n    return 0;"));

    let run = Pipeline::new().run(&fixed);
    assert!(run.succeeded());
    let unit = frontend::parse_text(fixed.text()).unwrap();
    assert!(find_leaks(&unit, &fixed).is_empty());
}

/// Test: a batch over several diagnostics reaches a clean compile
#[test]
fn test_apply_all_across_diagnostics() {
    let text = "int main() {\n  int *p = malloc(4);\n  printf(\"%d\\n\", 1);\n  free(p);\n  return 0;\n}\n";
    let source = SourceUnit::new("multi.c", text);
    let diags = diagnostics(&source);
    assert_eq!(
        diags.iter().filter(|d| d.code == DiagnosticCode::ImplicitLibraryDeclaration).count(),
        3,
        "malloc, printf and free are each reported once"
    );

    let fixes = SuggestionEngine::default().suggest(&diags, &source);
    let batch = apply_all(&source, &fixes);
    assert_eq!(batch.applied(), 1, "both includes insert at offset 0: {batch:?}");
    assert!(matches!(batch.outcomes[1].outcome, CandidateOutcome::SkippedConflict { .. }));

    let rest = SuggestionEngine::default().suggest(&diagnostics(&batch.source), &batch.source);
    let batch = apply_all(&batch.source, &rest);
    let run = Pipeline::new().run(&batch.source);
    assert!(run.succeeded());
    assert_eq!(run.diagnostics().count(), 0);
}
