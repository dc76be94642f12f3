//! Execution session value types shared by the manager and its callers.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Unique execution session identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub Uuid);

impl SessionId {
    pub fn new() -> Self {
        SessionId(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Resource bounds for one execution.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResourceLimits {
    /// CPU time budget (milliseconds).
    pub cpu_millis: u64,

    /// Memory cap (bytes).
    pub memory_bytes: u64,

    /// Wall-clock budget (milliseconds).
    pub wall_clock_ms: u64,
}

impl ResourceLimits {
    pub fn new(cpu_millis: u64, memory_bytes: u64, wall_clock_ms: u64) -> Self {
        Self {
            cpu_millis,
            memory_bytes,
            wall_clock_ms,
        }
    }

    /// Reject zero budgets.
    pub fn validate(&self) -> Result<(), String> {
        if self.cpu_millis == 0 {
            return Err("cpu_millis must be greater than zero".to_string());
        }
        if self.memory_bytes == 0 {
            return Err("memory_bytes must be greater than zero".to_string());
        }
        if self.wall_clock_ms == 0 {
            return Err("wall_clock_ms must be greater than zero".to_string());
        }
        Ok(())
    }
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            cpu_millis: 2_000,
            memory_bytes: 64 * 1024 * 1024,
            wall_clock_ms: 5_000,
        }
    }
}

/// Resources consumed by an execution so far (or in total once terminal).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct ResourceUsage {
    pub cpu_millis_used: u64,
    pub peak_memory_bytes: u64,
    pub elapsed_ms: u64,
}

/// Lifecycle state of an execution session.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
    TimedOut,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionState::Completed
                | SessionState::Failed
                | SessionState::Cancelled
                | SessionState::TimedOut
        )
    }

    pub fn as_u8(&self) -> u8 {
        match self {
            SessionState::Pending => 0,
            SessionState::Running => 1,
            SessionState::Completed => 2,
            SessionState::Failed => 3,
            SessionState::Cancelled => 4,
            SessionState::TimedOut => 5,
        }
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(SessionState::Pending),
            1 => Some(SessionState::Running),
            2 => Some(SessionState::Completed),
            3 => Some(SessionState::Failed),
            4 => Some(SessionState::Cancelled),
            5 => Some(SessionState::TimedOut),
            _ => None,
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionState::Pending => "pending",
            SessionState::Running => "running",
            SessionState::Completed => "completed",
            SessionState::Failed => "failed",
            SessionState::Cancelled => "cancelled",
            SessionState::TimedOut => "timed_out",
        };
        f.write_str(s)
    }
}

/// Which bounded resource was exhausted.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum LimitedResource {
    Cpu,
    Memory,
}

impl fmt::Display for LimitedResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LimitedResource::Cpu => write!(f, "cpu"),
            LimitedResource::Memory => write!(f, "memory"),
        }
    }
}

/// Why a session ended in [`SessionState::Failed`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum FailureReason {
    NonZeroExit { code: i32 },
    ResourceLimitExceeded { resource: LimitedResource },
    RunnerFault { message: String },
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::NonZeroExit { code } => write!(f, "exited with code {code}"),
            FailureReason::ResourceLimitExceeded { resource } => {
                write!(f, "{resource} limit exceeded")
            }
            FailureReason::RunnerFault { message } => write!(f, "runner fault: {message}"),
        }
    }
}
