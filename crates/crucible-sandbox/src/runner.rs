//! Isolated runner contract.
//!
//! The manager depends only on these traits, never on a specific isolation
//! technology. [`crate::VmRunner`] interprets programs in-process;
//! [`crate::ProcessRunner`] hands a program image to an external command.

use std::sync::Arc;

use async_trait::async_trait;
use crucible_core::{LimitedResource, ResourceLimits};
use crucible_pipeline::Program;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::RunnerError;

/// A chunk of program output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunnerOutput {
    Stdout(String),
    Stderr(String),
}

/// Instantaneous resource reading.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunnerSample {
    /// CPU time consumed so far.
    pub cpu_millis: u64,
    /// Memory in use right now.
    pub memory_bytes: u64,
    pub peak_memory_bytes: u64,
}

/// How the runner's execution ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ExitStatus {
    /// The program ended on its own.
    Exited { code: i32 },
    /// The runner enforced a limit itself.
    LimitExceeded { resource: LimitedResource },
    /// Ended by `terminate` or `kill`.
    Killed,
    /// The runner could not continue.
    Fault { message: String },
}

/// Final status plus the resources consumed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunnerExit {
    pub status: ExitStatus,
    pub sample: RunnerSample,
}

/// Launches executions.
#[async_trait]
pub trait IsolatedRunner: Send + Sync {
    async fn launch(
        &self,
        program: Arc<Program>,
        limits: ResourceLimits,
    ) -> std::result::Result<Box<dyn RunnerHandle>, RunnerError>;
}

/// Control surface of one launched execution.
///
/// `wait` may be awaited concurrently with `terminate`/`kill`; it resolves
/// once the execution has ended and its resources are released.
#[async_trait]
pub trait RunnerHandle: Send + Sync {
    /// Output stream. Yields `Some` once; the channel closes when output ends.
    fn events(&mut self) -> Option<mpsc::UnboundedReceiver<RunnerOutput>>;

    fn sample(&self) -> RunnerSample;

    /// Ask the execution to stop.
    async fn terminate(&self);

    /// Stop the execution without cooperation.
    async fn kill(&self);

    async fn wait(&self) -> RunnerExit;
}
