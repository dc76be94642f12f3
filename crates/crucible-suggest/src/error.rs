//! Patch application errors.

use serde::{Deserialize, Serialize};

/// Why a fix candidate could not be applied. The source is left untouched.
///
/// Edit indices refer to the candidate's own edit list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "error", rename_all = "snake_case")]
pub enum ApplyError {
    #[error("stale patch: computed against revision {expected}, source is at revision {actual}")]
    StalePatch { expected: u64, actual: u64 },

    #[error("edit {index} overlaps edit {previous}")]
    OverlappingEdit { index: usize, previous: usize },

    #[error("edit {index} does not fit the source text")]
    InvalidSpan { index: usize },
}

/// Result type for patch application.
pub type Result<T> = std::result::Result<T, ApplyError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_error_display() {
        let err = ApplyError::StalePatch { expected: 1, actual: 3 };
        assert!(err.to_string().contains("revision 1"));
        assert!(err.to_string().contains("revision 3"));

        let err = ApplyError::OverlappingEdit { index: 2, previous: 0 };
        assert_eq!(err.to_string(), "edit 2 overlaps edit 0");
    }

    #[test]
    fn test_apply_error_serde() {
        let err = ApplyError::InvalidSpan { index: 1 };
        let json = serde_json::to_string(&err).unwrap();
        assert!(json.contains("invalid_span"));
        let back: ApplyError = serde_json::from_str(&json).unwrap();
        assert_eq!(back, err);
    }
}
