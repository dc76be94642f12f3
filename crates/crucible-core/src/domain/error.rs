//! Domain-level error taxonomy for Crucible.

/// Crucible core errors.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_core_error_display() {
        let err = CoreError::InvalidConfig("max_sessions must be positive".to_string());
        assert!(err.to_string().contains("invalid configuration"));
        assert!(err.to_string().contains("max_sessions"));
    }

    #[test]
    fn test_serialization_error_converts() {
        let bad: std::result::Result<u32, _> = serde_json::from_str("nope");
        let err: CoreError = bad.unwrap_err().into();
        assert!(err.to_string().contains("serialization error"));
    }
}
