//! Runtime configuration.
//!
//! Defaults are usable as-is. A JSON file may override any subset of fields,
//! and `CRUCIBLE_*` environment variables override the file.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::domain::{CoreError, ResourceLimits, Result};

/// Execution manager settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Maximum sessions running at once across all callers.
    pub max_sessions: usize,

    /// Cadence of metric samples (milliseconds).
    pub sample_interval_ms: u64,

    /// Grace period between cooperative terminate and forced kill (milliseconds).
    pub stop_grace_ms: u64,

    /// Limits used when a caller does not supply any.
    pub default_limits: ResourceLimits,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            max_sessions: 16,
            sample_interval_ms: 250,
            stop_grace_ms: 2_000,
            default_limits: ResourceLimits::default(),
        }
    }
}

/// Suggestion engine settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SuggestConfig {
    /// Candidates below this confidence are dropped.
    pub min_confidence: f32,

    /// Upper bound on candidates proposed for a single diagnostic.
    pub max_per_diagnostic: usize,

    /// Lines of context around a diagnostic sent to an external generator.
    pub snippet_radius: u32,
}

impl Default for SuggestConfig {
    fn default() -> Self {
        Self {
            min_confidence: 0.1,
            max_per_diagnostic: 3,
            snippet_radius: 2,
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CrucibleConfig {
    pub execution: ExecutionConfig,
    pub suggest: SuggestConfig,
}

impl CrucibleConfig {
    /// Load from a JSON file, then apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a JSON config file. Missing fields take their defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Apply overrides from a key lookup (normally the process environment).
    ///
    /// Reads:
    /// - CRUCIBLE_MAX_SESSIONS
    /// - CRUCIBLE_SAMPLE_INTERVAL_MS
    /// - CRUCIBLE_STOP_GRACE_MS
    /// - CRUCIBLE_DEFAULT_CPU_MS
    /// - CRUCIBLE_DEFAULT_MEMORY_BYTES
    /// - CRUCIBLE_DEFAULT_WALL_MS
    /// - CRUCIBLE_MIN_CONFIDENCE
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        fn parse<T: std::str::FromStr>(key: &str, raw: String) -> Result<T> {
            raw.trim()
                .parse()
                .map_err(|_| CoreError::InvalidConfig(format!("{key}: cannot parse '{raw}'")))
        }

        if let Some(v) = lookup("CRUCIBLE_MAX_SESSIONS") {
            self.execution.max_sessions = parse("CRUCIBLE_MAX_SESSIONS", v)?;
        }
        if let Some(v) = lookup("CRUCIBLE_SAMPLE_INTERVAL_MS") {
            self.execution.sample_interval_ms = parse("CRUCIBLE_SAMPLE_INTERVAL_MS", v)?;
        }
        if let Some(v) = lookup("CRUCIBLE_STOP_GRACE_MS") {
            self.execution.stop_grace_ms = parse("CRUCIBLE_STOP_GRACE_MS", v)?;
        }
        if let Some(v) = lookup("CRUCIBLE_DEFAULT_CPU_MS") {
            self.execution.default_limits.cpu_millis = parse("CRUCIBLE_DEFAULT_CPU_MS", v)?;
        }
        if let Some(v) = lookup("CRUCIBLE_DEFAULT_MEMORY_BYTES") {
            self.execution.default_limits.memory_bytes = parse("CRUCIBLE_DEFAULT_MEMORY_BYTES", v)?;
        }
        if let Some(v) = lookup("CRUCIBLE_DEFAULT_WALL_MS") {
            self.execution.default_limits.wall_clock_ms = parse("CRUCIBLE_DEFAULT_WALL_MS", v)?;
        }
        if let Some(v) = lookup("CRUCIBLE_MIN_CONFIDENCE") {
            self.suggest.min_confidence = parse("CRUCIBLE_MIN_CONFIDENCE", v)?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.execution.max_sessions == 0 {
            return Err(CoreError::InvalidConfig("max_sessions must be positive".into()));
        }
        if self.execution.sample_interval_ms == 0 {
            return Err(CoreError::InvalidConfig("sample_interval_ms must be positive".into()));
        }
        self.execution
            .default_limits
            .validate()
            .map_err(CoreError::InvalidConfig)?;
        if !(0.0..=1.0).contains(&self.suggest.min_confidence) {
            return Err(CoreError::InvalidConfig("min_confidence must be within [0, 1]".into()));
        }
        Ok(())
    }
}
