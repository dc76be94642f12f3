//! Immutable source snapshots.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::diagnostic::{Location, Span};
use crate::digest::sha256_hex;

/// An immutable snapshot of user source text at a specific revision.
///
/// Cloning is cheap (the text is shared). A new revision is only produced by
/// [`SourceUnit::next_revision`], which the suggestion engine calls when a
/// patch applies cleanly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceUnit {
    name: String,
    text: Arc<str>,
    revision: u64,
    digest: String,
}

impl SourceUnit {
    /// First revision of a translation unit.
    pub fn new(name: impl Into<String>, text: impl Into<String>) -> Self {
        Self::with_revision(name, text, 1)
    }

    fn with_revision(name: impl Into<String>, text: impl Into<String>, revision: u64) -> Self {
        let text: String = text.into();
        let digest = sha256_hex(text.as_bytes());
        Self {
            name: name.into(),
            text: Arc::from(text),
            revision,
            digest,
        }
    }

    /// Derive the successor revision carrying `text`.
    pub fn next_revision(&self, text: impl Into<String>) -> Self {
        Self::with_revision(self.name.clone(), text, self.revision + 1)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// SHA-256 hex digest of the text.
    pub fn digest(&self) -> &str {
        &self.digest
    }

    /// `true` when the text is empty or whitespace only.
    pub fn is_blank(&self) -> bool {
        self.text.trim().is_empty()
    }

    /// 1-indexed (line, column) of a byte offset. Columns count characters.
    pub fn line_col(&self, offset: usize) -> (u32, u32) {
        let offset = offset.min(self.text.len());
        let before = &self.text[..floor_char_boundary(&self.text, offset)];
        let line = before.matches('\n').count() as u32 + 1;
        let line_start = before.rfind('\n').map(|i| i + 1).unwrap_or(0);
        let column = before[line_start..].chars().count() as u32 + 1;
        (line, column)
    }

    /// Location of a span's start.
    pub fn locate(&self, span: Span) -> Location {
        let (line, column) = self.line_col(span.start);
        Location::new(line, column, span)
    }

    /// Byte range of the given 1-indexed line, excluding the newline.
    pub fn line_span(&self, line: u32) -> Option<(usize, usize)> {
        let mut start = 0usize;
        for (idx, segment) in self.text.split('\n').enumerate() {
            if idx as u32 + 1 == line {
                return Some((start, start + segment.len()));
            }
            start += segment.len() + 1;
        }
        None
    }

    /// Text of lines `[line - radius, line + radius]`, with its starting byte offset.
    pub fn snippet(&self, line: u32, radius: u32) -> (usize, &str) {
        let first = line.saturating_sub(radius).max(1);
        let last = line.saturating_add(radius);
        let start = self.line_span(first).map(|(s, _)| s).unwrap_or(0);
        let end = (first..=last)
            .rev()
            .find_map(|l| self.line_span(l).map(|(_, e)| e))
            .unwrap_or(self.text.len());
        (start, &self.text[start..end.max(start)])
    }
}

fn floor_char_boundary(text: &str, mut offset: usize) -> usize {
    while offset > 0 && !text.is_char_boundary(offset) {
        offset -= 1;
    }
    offset
}
