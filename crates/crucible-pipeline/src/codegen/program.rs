//! Executable program format and its serialized image.

use crucible_core::{digest::json_digest, CoreError};
use serde::{Deserialize, Serialize};

use crate::ir::{BinOp, Global, UnOp, Width};
use crate::library::Builtin;

/// Image format version. Bump on any change to [`Op`] or [`Program`].
pub const IMAGE_FORMAT: u32 = 1;

/// Resolved instruction. Jump targets are absolute indices into the function's code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", content = "arg", rename_all = "snake_case")]
pub enum Op {
    Const(i64),
    Str(u32),
    LoadLocal(u32),
    StoreLocal(u32),
    GlobalAddr(u32),
    Load(Width),
    Store(Width),
    Binary(BinOp),
    Unary(UnOp),
    Pop,
    Dup,
    Swap,
    Jump(u32),
    JumpIfZero(u32),
    JumpIfNotZero(u32),
    Call { func: u32, argc: u32 },
    CallBuiltin { builtin: Builtin, argc: u32 },
    Alloca(u32),
    Ret,
    RetVoid,
}

impl Op {
    /// Values popped and pushed.
    pub fn stack_effect(&self) -> (u32, u32) {
        match self {
            Op::Const(_) | Op::Str(_) | Op::LoadLocal(_) | Op::GlobalAddr(_) | Op::Alloca(_) => (0, 1),
            Op::StoreLocal(_) | Op::Load(_) | Op::Unary(_) => (1, 1),
            Op::Store(_) | Op::Binary(_) => (2, 1),
            Op::Pop => (1, 0),
            Op::Dup => (1, 2),
            Op::Swap => (2, 2),
            Op::Jump(_) | Op::RetVoid => (0, 0),
            Op::JumpIfZero(_) | Op::JumpIfNotZero(_) | Op::Ret => (1, 0),
            Op::Call { argc, .. } | Op::CallBuiltin { argc, .. } => (*argc, 1),
        }
    }

    /// Control does not fall through to the next instruction.
    pub fn is_terminator(&self) -> bool {
        matches!(self, Op::Jump(_) | Op::Ret | Op::RetVoid)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeFunction {
    pub name: String,
    pub params: u32,
    pub locals: u32,
    pub code: Vec<Op>,
}

/// A compiled translation unit, ready for a runner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Program {
    pub functions: Vec<CodeFunction>,
    pub strings: Vec<Vec<u8>>,
    pub globals: Vec<Global>,
    /// Index of `main`, if defined.
    pub entry: Option<u32>,
    /// SHA-256 over everything above; identifies the artifact.
    pub digest: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ImageError {
    #[error("malformed image: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("unsupported image format {found} (expected {IMAGE_FORMAT})")]
    UnsupportedFormat { found: u32 },

    #[error("image digest mismatch: recorded {recorded}, computed {computed}")]
    DigestMismatch { recorded: String, computed: String },

    #[error("image failed verification: {0}")]
    Invalid(String),

    #[error(transparent)]
    Core(#[from] CoreError),
}

#[derive(Serialize, Deserialize)]
struct Image {
    format: u32,
    program: Program,
}

impl Program {
    pub fn new(
        functions: Vec<CodeFunction>,
        strings: Vec<Vec<u8>>,
        globals: Vec<Global>,
        entry: Option<u32>,
    ) -> crucible_core::Result<Self> {
        let digest = json_digest(&(&functions, &strings, &globals, &entry))?;
        Ok(Self {
            functions,
            strings,
            globals,
            entry,
            digest,
        })
    }

    fn computed_digest(&self) -> crucible_core::Result<String> {
        json_digest(&(&self.functions, &self.strings, &self.globals, &self.entry))
    }

    pub fn entry_function(&self) -> Option<&CodeFunction> {
        self.entry.and_then(|i| self.functions.get(i as usize))
    }

    pub fn to_image(&self) -> Result<String, ImageError> {
        Ok(serde_json::to_string(&Image {
            format: IMAGE_FORMAT,
            program: self.clone(),
        })?)
    }

    /// Decode an image, checking format, digest and code invariants.
    pub fn from_image(image: &str) -> Result<Program, ImageError> {
        let Image { format, program } = serde_json::from_str(image)?;
        if format != IMAGE_FORMAT {
            return Err(ImageError::UnsupportedFormat { found: format });
        }
        let computed = program.computed_digest()?;
        if computed != program.digest {
            return Err(ImageError::DigestMismatch {
                recorded: program.digest,
                computed,
            });
        }
        if let Some((index, message)) = super::verify(&program).into_iter().next() {
            return Err(ImageError::Invalid(format!("function {index}: {message}")));
        }
        Ok(program)
    }
}
