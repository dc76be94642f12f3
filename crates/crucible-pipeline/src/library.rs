//! The small C library the runtime provides, keyed by the header declaring it.

use serde::{Deserialize, Serialize};

use crate::frontend::ast::Type;

/// Runtime-provided functions. The VM dispatches on this tag.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Builtin {
    Printf,
    Puts,
    Putchar,
    Fprintf,
    Malloc,
    Calloc,
    Free,
    Exit,
    Abs,
    Strlen,
    Memset,
}

#[derive(Debug, Clone, Copy)]
pub struct LibraryFunction {
    pub builtin: Builtin,
    pub name: &'static str,
    pub header: &'static str,
    /// Fixed argument count; variadic functions accept more.
    pub arity: usize,
    pub variadic: bool,
    pub returns: fn() -> Type,
}

#[derive(Debug, Clone, Copy)]
pub struct LibraryConstant {
    pub name: &'static str,
    pub header: &'static str,
    pub value: i64,
}

fn int() -> Type {
    Type::Int
}

fn long() -> Type {
    Type::Long
}

fn void() -> Type {
    Type::Void
}

fn void_ptr() -> Type {
    Type::Char.pointer_to()
}

pub const KNOWN_HEADERS: [&str; 3] = ["stdio.h", "stdlib.h", "string.h"];

const FUNCTIONS: &[LibraryFunction] = &[
    LibraryFunction { builtin: Builtin::Printf, name: "printf", header: "stdio.h", arity: 1, variadic: true, returns: int },
    LibraryFunction { builtin: Builtin::Puts, name: "puts", header: "stdio.h", arity: 1, variadic: false, returns: int },
    LibraryFunction { builtin: Builtin::Putchar, name: "putchar", header: "stdio.h", arity: 1, variadic: false, returns: int },
    LibraryFunction { builtin: Builtin::Fprintf, name: "fprintf", header: "stdio.h", arity: 2, variadic: true, returns: int },
    LibraryFunction { builtin: Builtin::Malloc, name: "malloc", header: "stdlib.h", arity: 1, variadic: false, returns: void_ptr },
    LibraryFunction { builtin: Builtin::Calloc, name: "calloc", header: "stdlib.h", arity: 2, variadic: false, returns: void_ptr },
    LibraryFunction { builtin: Builtin::Free, name: "free", header: "stdlib.h", arity: 1, variadic: false, returns: void },
    LibraryFunction { builtin: Builtin::Exit, name: "exit", header: "stdlib.h", arity: 1, variadic: false, returns: void },
    LibraryFunction { builtin: Builtin::Abs, name: "abs", header: "stdlib.h", arity: 1, variadic: false, returns: int },
    LibraryFunction { builtin: Builtin::Strlen, name: "strlen", header: "string.h", arity: 1, variadic: false, returns: long },
    LibraryFunction { builtin: Builtin::Memset, name: "memset", header: "string.h", arity: 3, variadic: false, returns: void_ptr },
];

const CONSTANTS: &[LibraryConstant] = &[
    LibraryConstant { name: "stdout", header: "stdio.h", value: 1 },
    LibraryConstant { name: "stderr", header: "stdio.h", value: 2 },
];

pub fn function(name: &str) -> Option<&'static LibraryFunction> {
    FUNCTIONS.iter().find(|f| f.name == name)
}

pub fn constant(name: &str) -> Option<&'static LibraryConstant> {
    CONSTANTS.iter().find(|c| c.name == name)
}

pub fn is_known_header(header: &str) -> bool {
    KNOWN_HEADERS.contains(&header)
}

/// Every name a header declares, for "did you mean" lookups.
pub fn names_in(headers: &[&str]) -> Vec<&'static str> {
    FUNCTIONS
        .iter()
        .map(|f| (f.name, f.header))
        .chain(CONSTANTS.iter().map(|c| (c.name, c.header)))
        .filter(|(_, h)| headers.contains(h))
        .map(|(n, _)| n)
        .collect()
}

impl LibraryFunction {
    pub fn accepts(&self, argc: usize) -> bool {
        if self.variadic {
            argc >= self.arity
        } else {
            argc == self.arity
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_by_name() {
        let malloc = function("malloc").unwrap();
        assert_eq!(malloc.header, "stdlib.h");
        assert!(malloc.accepts(1));
        assert!(!malloc.accepts(2));
        assert!(function("printf").unwrap().accepts(4));
        assert!(function("gets").is_none());
        assert_eq!(constant("stderr").map(|c| c.value), Some(2));
    }

    #[test]
    fn test_names_in_header() {
        let names = names_in(&["string.h"]);
        assert_eq!(names, vec!["strlen", "memset"]);
    }

    #[test]
    fn test_every_entry_has_known_header() {
        for f in FUNCTIONS {
            assert!(is_known_header(f.header), "{}", f.name);
        }
        for c in CONSTANTS {
            assert!(is_known_header(c.header), "{}", c.name);
        }
    }
}
