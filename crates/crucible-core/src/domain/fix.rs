//! Fix candidates and the text edits they carry.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::diagnostic::{DiagnosticCode, Location};
use crate::digest::sha256_hex;

/// Replace bytes `[start, end)` of a specific revision with `replacement`.
///
/// `start == end` is a pure insertion.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct TextEdit {
    pub start: usize,
    pub end: usize,
    pub replacement: String,
}

impl TextEdit {
    pub fn replace(start: usize, end: usize, replacement: impl Into<String>) -> Self {
        Self {
            start,
            end,
            replacement: replacement.into(),
        }
    }

    pub fn insert(offset: usize, text: impl Into<String>) -> Self {
        Self::replace(offset, offset, text)
    }

    pub fn delete(start: usize, end: usize) -> Self {
        Self::replace(start, end, "")
    }

    pub fn is_insertion(&self) -> bool {
        self.start == self.end
    }

    /// Two edits conflict when their ranges intersect, or when both insert
    /// at the same offset (the resulting order would be ambiguous).
    pub fn conflicts_with(&self, other: &TextEdit) -> bool {
        if self.is_insertion() && other.is_insertion() {
            return self.start == other.start;
        }
        if self.is_insertion() {
            return other.start < self.start && self.start < other.end;
        }
        if other.is_insertion() {
            return self.start < other.start && other.start < self.end;
        }
        self.start < other.end && other.start < self.end
    }

    /// Net change in text length once applied.
    pub fn delta(&self) -> isize {
        self.replacement.len() as isize - (self.end - self.start) as isize
    }
}

/// Deterministic identifier of a fix candidate.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FixId(pub String);

impl FixId {
    /// Derive an id from the candidate's identity-bearing fields.
    pub fn derive(revision: u64, code: DiagnosticCode, edits: &[TextEdit]) -> Self {
        let mut material = format!("{revision}\0{code}\0");
        for edit in edits {
            material.push_str(&format!("{}:{}:{}\0", edit.start, edit.end, edit.replacement));
        }
        FixId(sha256_hex(material.as_bytes())[..16].to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FixId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A validated, applicable patch proposed for one diagnostic.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FixCandidate {
    pub id: FixId,

    pub diagnostic_code: DiagnosticCode,

    pub description: String,

    /// Edits over `revision`, in the order they were proposed.
    pub edits: Vec<TextEdit>,

    /// Confidence in `[0.0, 1.0]`.
    pub confidence: f32,

    /// Revision the edits were computed against.
    pub revision: u64,

    /// Location of the diagnostic this fix answers; used for tie-breaking.
    pub anchor: Location,
}

impl FixCandidate {
    pub fn new(
        diagnostic_code: DiagnosticCode,
        description: impl Into<String>,
        edits: Vec<TextEdit>,
        confidence: f32,
        revision: u64,
        anchor: Location,
    ) -> Self {
        Self {
            id: FixId::derive(revision, diagnostic_code, &edits),
            diagnostic_code,
            description: description.into(),
            edits,
            confidence: confidence.clamp(0.0, 1.0),
            revision,
            anchor,
        }
    }
}
