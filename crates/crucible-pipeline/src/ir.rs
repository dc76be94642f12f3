//! Stack-based intermediate representation shared by lower, optimize and generate.
//!
//! Every value is an `i64`. Stores leave the stored value on the stack so
//! assignments can be used as expressions; statements pop what they leave.

use crucible_core::Span;
use serde::{Deserialize, Serialize};

use crate::library::Builtin;

/// Memory access width.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Width {
    Byte,
    Word,
    Quad,
}

impl Width {
    pub fn bytes(&self) -> u64 {
        match self {
            Width::Byte => 1,
            Width::Word => 4,
            Width::Quad => 8,
        }
    }

    pub fn for_size(size: u32) -> Width {
        match size {
            1 => Width::Byte,
            4 => Width::Word,
            _ => Width::Quad,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Shl,
    Shr,
    And,
    Or,
    Xor,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl BinOp {
    /// Evaluate; `None` on division by zero.
    pub fn eval(&self, a: i64, b: i64) -> Option<i64> {
        Some(match self {
            BinOp::Add => a.wrapping_add(b),
            BinOp::Sub => a.wrapping_sub(b),
            BinOp::Mul => a.wrapping_mul(b),
            BinOp::Div => {
                if b == 0 {
                    return None;
                }
                a.wrapping_div(b)
            }
            BinOp::Rem => {
                if b == 0 {
                    return None;
                }
                a.wrapping_rem(b)
            }
            BinOp::Shl => a.wrapping_shl(b as u32),
            BinOp::Shr => a.wrapping_shr(b as u32),
            BinOp::And => a & b,
            BinOp::Or => a | b,
            BinOp::Xor => a ^ b,
            BinOp::Eq => (a == b) as i64,
            BinOp::Ne => (a != b) as i64,
            BinOp::Lt => (a < b) as i64,
            BinOp::Le => (a <= b) as i64,
            BinOp::Gt => (a > b) as i64,
            BinOp::Ge => (a >= b) as i64,
        })
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum UnOp {
    Neg,
    Not,
    BitNot,
    /// Truncate to 8 bits and sign-extend.
    Sext8,
    /// Truncate to 32 bits and sign-extend.
    Sext32,
}

impl UnOp {
    pub fn eval(&self, a: i64) -> i64 {
        match self {
            UnOp::Neg => a.wrapping_neg(),
            UnOp::Not => (a == 0) as i64,
            UnOp::BitNot => !a,
            UnOp::Sext8 => a as i8 as i64,
            UnOp::Sext32 => a as i32 as i64,
        }
    }
}

pub type Label = u32;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "op", content = "arg", rename_all = "snake_case")]
pub enum Inst {
    Const(i64),
    /// Push the address of string literal `n`.
    Str(u32),
    LoadLocal(u32),
    StoreLocal(u32),
    /// Push the address of global `n`.
    GlobalAddr(u32),
    /// Pop an address, push the sign-extended value there.
    Load(Width),
    /// Pop value and address, store, push the value.
    Store(Width),
    Binary(BinOp),
    Unary(UnOp),
    Pop,
    Dup,
    /// Exchange the top two values.
    Swap,
    Label(Label),
    Jump(Label),
    JumpIfZero(Label),
    JumpIfNotZero(Label),
    /// Pop `argc` arguments (last on top), push the return value.
    Call { func: u32, argc: u32 },
    CallBuiltin { builtin: Builtin, argc: u32 },
    /// Push the address of `n` fresh bytes in the current frame.
    Alloca(u32),
    Ret,
    /// Return 0 to the caller.
    RetVoid,
    /// Marks the start of the statement covering `Span`. No runtime effect.
    Stmt(Span),
}

/// Initial contents of a global.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum GlobalInit {
    Zero,
    Value(i64),
    /// Address of a string literal.
    Str(u32),
    Bytes(Vec<u8>),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Global {
    pub name: String,
    pub size: u32,
    /// Width of scalar initializers.
    pub width: Width,
    pub init: GlobalInit,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IrFunction {
    pub name: String,
    pub params: u32,
    /// Slot count including parameters.
    pub locals: u32,
    pub body: Vec<Inst>,
    pub span: Span,
}

/// A counted loop recorded by lowering for the optimizer's notes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoopInfo {
    pub function: String,
    pub span: Span,
    pub vectorizable: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Module {
    pub functions: Vec<IrFunction>,
    pub strings: Vec<Vec<u8>>,
    pub globals: Vec<Global>,
    /// Index of `main`.
    pub entry: Option<u32>,
    pub loops: Vec<LoopInfo>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_binop_eval() {
        assert_eq!(BinOp::Add.eval(2, 3), Some(5));
        assert_eq!(BinOp::Lt.eval(2, 3), Some(1));
        assert_eq!(BinOp::Div.eval(7, 0), None);
        assert_eq!(BinOp::Rem.eval(7, 3), Some(1));
        assert_eq!(BinOp::Div.eval(i64::MIN, -1), Some(i64::MIN));
    }

    #[test]
    fn test_unop_eval() {
        assert_eq!(UnOp::Not.eval(0), 1);
        assert_eq!(UnOp::Sext8.eval(255), -1);
        assert_eq!(UnOp::Sext32.eval(0xFFFF_FFFF), -1);
    }

    #[test]
    fn test_width_for_size() {
        assert_eq!(Width::for_size(1), Width::Byte);
        assert_eq!(Width::for_size(4), Width::Word);
        assert_eq!(Width::for_size(8), Width::Quad);
        assert_eq!(Width::Word.bytes(), 4);
    }
}
