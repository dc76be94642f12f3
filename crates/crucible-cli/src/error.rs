//! Workbench errors.

use crucible_core::{FixId, StageName};
use crucible_sandbox::ExecError;
use crucible_suggest::ApplyError;

#[derive(Debug, thiserror::Error)]
pub enum WorkbenchError {
    #[error("nothing has been compiled yet")]
    NothingCompiled,

    #[error("compilation failed at the {stage} stage")]
    CompileFailed { stage: StageName },

    #[error("artifact for revision {requested} is stale (current revision is {current})")]
    StaleArtifact { requested: u64, current: u64 },

    #[error("no suggested fix with id {0}")]
    UnknownFix(FixId),

    #[error(transparent)]
    Apply(#[from] ApplyError),

    #[error(transparent)]
    Exec(#[from] ExecError),
}

/// Result type for workbench operations.
pub type Result<T> = std::result::Result<T, WorkbenchError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = WorkbenchError::StaleArtifact {
            requested: 1,
            current: 3,
        };
        assert_eq!(
            err.to_string(),
            "artifact for revision 1 is stale (current revision is 3)"
        );
        let err: WorkbenchError = ApplyError::StalePatch {
            expected: 1,
            actual: 2,
        }
        .into();
        assert!(matches!(err, WorkbenchError::Apply(_)));
    }
}
