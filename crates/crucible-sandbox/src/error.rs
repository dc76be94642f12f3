//! Error types for the execution manager and its runners.

use crucible_core::SessionId;
use crucible_pipeline::ImageError;

/// Runner-level failures while launching or controlling an execution.
#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    #[error("failed to encode program image: {0}")]
    Image(#[from] ImageError),

    #[error("failed to spawn runner: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("invalid runner command: {0}")]
    InvalidCommand(String),
}

/// Synchronous `start`/`stop` failures. Everything that happens after a
/// successful start is reported through the session's terminal state instead.
#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    #[error("artifact {artifact} already has running session {session}")]
    SessionConflict { artifact: String, session: SessionId },

    #[error("invalid resource limits: {0}")]
    InvalidLimits(String),

    #[error("program has no entry point")]
    NoEntryPoint,

    #[error("session capacity exceeded ({limit} running)")]
    CapacityExceeded { limit: usize },

    #[error("unknown session {0}")]
    UnknownSession(SessionId),

    #[error("launch failed: {0}")]
    Launch(#[from] RunnerError),
}

/// Result type for execution manager operations.
pub type Result<T> = std::result::Result<T, ExecError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exec_error_display() {
        let err = ExecError::CapacityExceeded { limit: 4 };
        assert_eq!(err.to_string(), "session capacity exceeded (4 running)");

        let err: ExecError = RunnerError::InvalidCommand("empty".into()).into();
        assert!(err.to_string().contains("launch failed"));
        assert!(err.to_string().contains("empty"));
    }
}
