//! Integration tests: configuration files and the shared diagnostics model.

use std::io::Write;

use crucible_core::{
    CoreError, CrucibleConfig, Diagnostic, DiagnosticCode, PipelineRun, Severity, SourceUnit,
    StageName, StageResult,
};
use tempfile::NamedTempFile;

/// Test: a partial config file keeps defaults for everything it omits
#[test]
fn test_partial_config_file() {
    let mut file = NamedTempFile::new().unwrap();
    write!(file, r#"{{"execution": {{"max_sessions": 2}}, "suggest": {{"min_confidence": 0.5}}}}"#).unwrap();

    let config = CrucibleConfig::from_file(file.path()).unwrap();
    assert_eq!(config.execution.max_sessions, 2);
    assert_eq!(config.execution.stop_grace_ms, 2_000);
    assert_eq!(config.suggest.min_confidence, 0.5);
    assert_eq!(config.suggest.max_per_diagnostic, 3);
}

/// Test: overrides win over file values and invalid values are rejected
#[test]
fn test_overrides_then_validate() {
    let mut config = CrucibleConfig::default();
    config
        .apply_overrides(|key| match key {
            "CRUCIBLE_DEFAULT_WALL_MS" => Some("1500".into()),
            "CRUCIBLE_MAX_SESSIONS" => Some("0".into()),
            _ => None,
        })
        .unwrap();
    assert_eq!(config.execution.default_limits.wall_clock_ms, 1_500);
    assert!(matches!(config.validate(), Err(CoreError::InvalidConfig(_))));

    let err = CrucibleConfig::default()
        .apply_overrides(|key| (key == "CRUCIBLE_STOP_GRACE_MS").then(|| "soon".to_string()))
        .unwrap_err();
    assert!(err.to_string().contains("CRUCIBLE_STOP_GRACE_MS"));
}

/// Test: malformed config files surface as errors, not defaults
#[test]
fn test_malformed_config_file() {
    let mut file = NamedTempFile::new().unwrap();
    write!(file, "{{ not json").unwrap();
    assert!(CrucibleConfig::load(Some(file.path())).is_err());
}

/// Test: every code in the table renders, parses back and agrees on severity
#[test]
fn test_code_table_is_consistent() {
    for code in DiagnosticCode::ALL {
        assert_eq!(DiagnosticCode::parse(code.as_str()), Some(code));
        let diag = Diagnostic::new(code, "x", code.stage(), 1);
        assert_eq!(diag.severity, code.severity());
    }
    assert_eq!(DiagnosticCode::ImplicitLibraryDeclaration.severity(), Severity::Warning);
    assert_eq!(DiagnosticCode::PossibleLeak.as_str(), "A0401");
}

/// Test: revisions advance by one and never touch the predecessor
#[test]
fn test_revision_chain() {
    let first = SourceUnit::new("a.c", "int main() { return 0; }");
    let second = first.next_revision("int main() { return 1; }");
    assert_eq!(first.revision(), 1);
    assert_eq!(first.text(), "int main() { return 0; }");
    assert_eq!(second.revision(), 2);
    assert_eq!(second.name(), "a.c");
    assert_ne!(first.digest(), second.digest());
}

/// Test: a run stops at its failed stage and survives a JSON round trip
#[test]
fn test_failed_run_serializes() {
    let source = SourceUnit::new("a.c", "int main() { return y; }");
    let undeclared = Diagnostic::new(DiagnosticCode::UndeclaredIdentifier, "use of undeclared identifier 'y'", StageName::Lower, 1);
    let run: PipelineRun<String> = PipelineRun::from_stages(
        &source,
        vec![
            StageResult::ok(StageName::Parse, "ast".to_string(), vec![]).with_duration(3),
            StageResult::failed(StageName::Lower, vec![undeclared]),
        ],
    );
    assert_eq!(run.failed_stage(), Some(StageName::Lower));
    assert!(run.artifact().is_none());

    let json = serde_json::to_string(&run).unwrap();
    let back: PipelineRun<String> = serde_json::from_str(&json).unwrap();
    assert_eq!(back, run);

    let retimed = run.stages[0].clone().with_duration(99);
    assert_eq!(retimed.content_digest().unwrap(), run.stages[0].content_digest().unwrap());
}
