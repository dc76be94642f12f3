//! Crucible caller-facing API.
//!
//! [`Workbench`] ties the compilation pipeline, the suggestion engine and the
//! execution manager together around one evolving source file. The
//! `crucible` binary is a thin command-line layer over it.

pub mod error;
pub mod workbench;

pub use error::{Result, WorkbenchError};
pub use workbench::Workbench;
