//! Transactional patch application.
//!
//! A candidate's edits are validated in full against the source before any
//! text changes; a rejected candidate leaves the source untouched.

use crucible_core::{metrics::METRICS, obs, FixCandidate, FixId, SourceUnit, TextEdit};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{ApplyError, Result};

/// Apply one candidate, producing the next revision.
pub fn apply(source: &SourceUnit, fix: &FixCandidate) -> Result<SourceUnit> {
    let outcome = check_revision(source, fix)
        .and_then(|()| validate(source.text(), &fix.edits))
        .map(|ordered| source.next_revision(splice(source.text(), &ordered)));
    match &outcome {
        Ok(next) => {
            METRICS.inc_fixes_applied();
            obs::emit_fix_applied(fix.id.as_str(), source.revision(), next.revision());
        }
        Err(err) => obs::emit_fix_rejected(fix.id.as_str(), err),
    }
    outcome
}

/// Check that `fix` would apply to `source`, without applying it.
pub fn check(source: &SourceUnit, fix: &FixCandidate) -> Result<()> {
    check_revision(source, fix)?;
    validate(source.text(), &fix.edits).map(|_| ())
}

fn check_revision(source: &SourceUnit, fix: &FixCandidate) -> Result<()> {
    if fix.revision != source.revision() {
        return Err(ApplyError::StalePatch {
            expected: fix.revision,
            actual: source.revision(),
        });
    }
    Ok(())
}

/// Validate edits against `text` and return them sorted by start.
fn validate<'a>(text: &str, edits: &'a [TextEdit]) -> Result<Vec<(usize, &'a TextEdit)>> {
    for (index, edit) in edits.iter().enumerate() {
        let fits = edit.start <= edit.end
            && edit.end <= text.len()
            && text.is_char_boundary(edit.start)
            && text.is_char_boundary(edit.end);
        if !fits {
            return Err(ApplyError::InvalidSpan { index });
        }
    }

    let mut ordered: Vec<_> = edits.iter().enumerate().collect();
    ordered.sort_by_key(|(index, edit)| (edit.start, edit.end, *index));
    for (pos, (index, edit)) in ordered.iter().enumerate() {
        if let Some((previous, _)) = ordered[..pos].iter().find(|(_, earlier)| earlier.conflicts_with(edit)) {
            return Err(ApplyError::OverlappingEdit {
                index: *index,
                previous: *previous,
            });
        }
    }
    Ok(ordered)
}

/// Replace every edit's range in one pass. `ordered` must be validated.
fn splice(text: &str, ordered: &[(usize, &TextEdit)]) -> String {
    let grow: isize = ordered.iter().map(|(_, e)| e.delta()).sum();
    let mut out = String::with_capacity((text.len() as isize + grow).max(0) as usize);
    let mut cursor = 0;
    for (_, edit) in ordered {
        out.push_str(&text[cursor..edit.start]);
        out.push_str(&edit.replacement);
        cursor = edit.end;
    }
    out.push_str(&text[cursor..]);
    out
}

// ---------------------------------------------------------------------------
// Batch application
// ---------------------------------------------------------------------------

/// What happened to one candidate of a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CandidateOutcome {
    /// Applied, producing `revision`.
    Applied { revision: u64 },

    /// Overlaps a candidate applied earlier in the batch.
    SkippedConflict { with: FixId },

    /// Computed against a revision other than the batch base.
    SkippedStale { expected: u64, actual: u64 },

    /// Edits do not fit the base text or overlap each other.
    SkippedInvalid { reason: ApplyError },
}

impl CandidateOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, CandidateOutcome::Applied { .. })
    }
}

/// Per-candidate outcome, in input order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixOutcome {
    pub fix_id: FixId,
    pub outcome: CandidateOutcome,
}

/// Result of [`apply_all`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchApplication {
    /// Final source; the base itself when nothing applied.
    pub source: SourceUnit,

    pub outcomes: Vec<FixOutcome>,
}

impl BatchApplication {
    pub fn applied(&self) -> usize {
        self.outcomes.iter().filter(|o| o.outcome.is_applied()).count()
    }
}

/// Apply candidates in the given (ranked) order, skipping those that cannot apply.
///
/// All candidates are expected to target `base`. Accepted edits are tracked in
/// base coordinates, so later candidates are checked against everything
/// already applied and then shifted onto the current text. Each application
/// advances the revision by one.
pub fn apply_all(base: &SourceUnit, fixes: &[FixCandidate]) -> BatchApplication {
    let mut current = base.clone();
    let mut accepted: Vec<(&FixId, &TextEdit)> = Vec::new();
    let mut outcomes = Vec::with_capacity(fixes.len());

    for fix in fixes {
        let outcome = match batch_step(base, &current, &accepted, fix) {
            Ok(next) => {
                METRICS.inc_fixes_applied();
                obs::emit_fix_applied(fix.id.as_str(), current.revision(), next.revision());
                let revision = next.revision();
                current = next;
                accepted.extend(fix.edits.iter().map(|edit| (&fix.id, edit)));
                CandidateOutcome::Applied { revision }
            }
            Err(skipped) => {
                debug!(fix_id = %fix.id, outcome = ?skipped, "batch candidate skipped");
                skipped
            }
        };
        outcomes.push(FixOutcome {
            fix_id: fix.id.clone(),
            outcome,
        });
    }

    BatchApplication {
        source: current,
        outcomes,
    }
}

fn batch_step(
    base: &SourceUnit,
    current: &SourceUnit,
    accepted: &[(&FixId, &TextEdit)],
    fix: &FixCandidate,
) -> std::result::Result<SourceUnit, CandidateOutcome> {
    if fix.revision != base.revision() {
        return Err(CandidateOutcome::SkippedStale {
            expected: fix.revision,
            actual: base.revision(),
        });
    }
    let ordered = validate(base.text(), &fix.edits).map_err(|reason| CandidateOutcome::SkippedInvalid { reason })?;

    for (_, edit) in &ordered {
        if let Some((owner, _)) = accepted.iter().find(|(_, prior)| prior.conflicts_with(edit)) {
            return Err(CandidateOutcome::SkippedConflict { with: (*owner).clone() });
        }
    }

    let shifted: Vec<TextEdit> = ordered
        .iter()
        .map(|(_, edit)| {
            let shift: isize = accepted
                .iter()
                .filter(|(_, prior)| prior.end <= edit.start)
                .map(|(_, prior)| prior.delta())
                .sum();
            let at = |offset: usize| (offset as isize + shift) as usize;
            TextEdit::replace(at(edit.start), at(edit.end), edit.replacement.clone())
        })
        .collect();
    let ordered: Vec<_> = shifted.iter().enumerate().collect();
    Ok(current.next_revision(splice(current.text(), &ordered)))
}
