//! Crucible sandboxed execution.
//!
//! [`ExecutionManager`] admits compiled programs into sessions, supervises
//! them under CPU, memory and wall-clock limits, and records everything a
//! session emits in a replayable [`EventLog`]. The isolation mechanism sits
//! behind [`IsolatedRunner`]:
//!
//! - [`VmRunner`]: in-process bytecode interpreter (default)
//! - [`ProcessRunner`]: external command fed a program image file

pub mod error;
pub mod events;
pub mod manager;
pub mod process;
pub mod runner;
pub mod session;
pub mod vm;

pub use error::{ExecError, Result, RunnerError};
pub use events::{EventCursor, EventKind, EventLog, ExecEvent};
pub use manager::ExecutionManager;
pub use process::ProcessRunner;
pub use runner::{ExitStatus, IsolatedRunner, RunnerExit, RunnerHandle, RunnerOutput, RunnerSample};
pub use session::{ExecutionSession, SessionHandle};
pub use vm::{run_program, OutputSink, VmRunner};
