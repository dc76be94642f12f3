//! Crucible compilation pipeline.
//!
//! Four stages run in declared order, each a pure function of the previous
//! stage's artifact and the source revision:
//!
//! - Parse: source text to syntax tree
//! - Lower: syntax tree to IR, with name resolution and semantic checks
//! - Optimize: constant folding, dead code removal, loop notes
//! - Generate: IR to an executable [`Program`]
//!
//! The first failing stage ends the run. Leak analysis lives in [`analysis`]
//! and is never part of a [`PipelineRun`].

pub mod analysis;
pub mod codegen;
pub mod frontend;
pub mod ir;
pub mod library;
pub mod lower;
pub mod optimize;
pub mod pipeline;
pub mod stage;

pub use analysis::find_leaks;
pub use codegen::{CodeFunction, ImageError, Op, Program, IMAGE_FORMAT};
pub use library::Builtin;
pub use pipeline::Pipeline;
pub use stage::{Artifact, PipelineRun, Stage, StageResult};
