// The diff engine compares the live document against the last confirmed
// snapshot and produces the minimal ordered operation list that brings the
// remote sheet up to date.
//
// Every range in the output is computed from the FINAL target layout, never
// incrementally: if an early section grows or shrinks, every later section's
// range already reflects the shift before any operation is emitted. Applying
// the operations in order therefore never depends on a not-yet-applied
// upstream write.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::layout::{allocate, Range};
use super::model::{CellValue, Document, SectionKind};

/// One unit of remote change. Ephemeral: lives only for the duration of a
/// single sync call.
#[derive(Debug, Clone, PartialEq)]
pub struct WriteOp {
    pub section: SectionKind,
    pub kind: OpKind,
    pub range: Range,
    /// Payload cells for `Write`; empty for `Clear`.
    pub rows: Vec<Vec<CellValue>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpKind {
    Write,
    Clear,
}

impl WriteOp {
    fn write(section: SectionKind, range: Range, rows: Vec<Vec<CellValue>>) -> Self {
        Self {
            section,
            kind: OpKind::Write,
            range,
            rows,
        }
    }

    fn clear(section: SectionKind, range: Range) -> Self {
        Self {
            section,
            kind: OpKind::Clear,
            range,
            rows: Vec::new(),
        }
    }

    pub fn row_count(&self) -> u32 {
        match self.kind {
            OpKind::Write => self.rows.len() as u32,
            OpKind::Clear => self.range.row_count(),
        }
    }
}

/// What the remote sheet held for one section after the last confirmed
/// operations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectionState {
    pub rows: Vec<Vec<CellValue>>,
    pub range: Range,
    /// Rows still occupied remotely below `range.end_row`: a confirmed write
    /// whose paired clear never got confirmed leaves a stale tail behind,
    /// and the next diff must re-emit only that clear.
    #[serde(default)]
    pub stale_rows: u32,
}

impl SectionState {
    /// Last remote row this section still occupies, stale tail included.
    fn occupied_end(&self) -> u32 {
        if self.range.is_empty() && self.stale_rows == 0 {
            0
        } else {
            self.range.end_row + self.stale_rows
        }
    }
}

/// The last externally-confirmed document state, keyed by section identity.
/// An independent copy - never shares storage with the live document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(default)]
    pub sections: BTreeMap<SectionKind, SectionState>,
}

/// Compare the document against the snapshot and emit write/clear operations
/// in document section order, writes before clears within a section.
///
/// Per section:
/// - unchanged content, unchanged range, no stale tail -> nothing;
/// - changed content or moved range -> one write. When only rows were
///   appended (same start, same width, unchanged prefix) the write covers
///   just the changed row window instead of the whole section;
/// - previously occupied rows past the new end -> one clear for the
///   leftover, wide enough to cover the old width too.
pub fn diff(document: &Document, snapshot: &Snapshot) -> Vec<WriteOp> {
    let mut ops = Vec::new();

    for (kind, target) in allocate(document) {
        let rows = document.section_rows(kind);
        let prev = snapshot.sections.get(&kind);

        let changed = match prev {
            Some(state) => state.rows != rows || state.range != target,
            None => !rows.is_empty(),
        };

        if changed && !rows.is_empty() {
            let op = prev
                .and_then(|state| window_write(kind, state, &rows, target))
                .unwrap_or_else(|| full_write(kind, prev, &rows, target));
            ops.push(op);
        }

        let occupied_end = prev.map(SectionState::occupied_end).unwrap_or(0);
        if occupied_end > target.end_row {
            let old_width = prev.map(|state| state.range.end_col).unwrap_or(1);
            let leftover = Range {
                start_row: target.end_row + 1,
                end_row: occupied_end,
                start_col: 1,
                end_col: target.end_col.max(old_width),
            };
            ops.push(WriteOp::clear(kind, leftover));
        }
    }

    ops
}

/// Rewrite the whole section at its target range. When the document got
/// narrower since the last sync, the payload is padded out to the old width
/// so the now-unused trailing columns are blanked instead of left stale.
fn full_write(
    kind: SectionKind,
    prev: Option<&SectionState>,
    rows: &[Vec<CellValue>],
    target: Range,
) -> WriteOp {
    let old_width = prev.map(|state| state.range.end_col).unwrap_or(0);
    if old_width <= target.end_col {
        return WriteOp::write(kind, target, rows.to_vec());
    }

    let mut padded = rows.to_vec();
    for row in &mut padded {
        row.resize(old_width as usize, CellValue::Empty);
    }
    WriteOp::write(
        kind,
        Range {
            end_col: old_width,
            ..target
        },
        padded,
    )
}

/// Narrow a grow-or-edit to the span of rows that actually changed.
///
/// Only applies when the section kept its start row and width and the new
/// content is at least as long as the old: a shrink always rewrites the full
/// new range (the caller pairs it with a clear for the leftover), and a
/// moved section has no stable rows to skip.
fn window_write(
    kind: SectionKind,
    prev: &SectionState,
    rows: &[Vec<CellValue>],
    target: Range,
) -> Option<WriteOp> {
    if prev.range.start_row != target.start_row
        || prev.range.start_col != target.start_col
        || prev.range.end_col != target.end_col
        || rows.len() < prev.rows.len()
    {
        return None;
    }

    let first = rows
        .iter()
        .zip(prev.rows.iter())
        .position(|(new, old)| new != old)
        .unwrap_or(prev.rows.len());
    let last = if rows.len() > prev.rows.len() {
        rows.len() - 1
    } else {
        rows.iter()
            .zip(prev.rows.iter())
            .rposition(|(new, old)| new != old)?
    };

    let window = Range {
        start_row: target.start_row + first as u32,
        end_row: target.start_row + last as u32,
        start_col: target.start_col,
        end_col: target.end_col,
    };
    Some(WriteOp::write(kind, window, rows[first..=last].to_vec()))
}

/// Fold the confirmed prefix of an operation list into the snapshot.
///
/// Called after the external API reported outcomes: only the leading run of
/// confirmed operations advances the snapshot, so a failed or cancelled
/// batch leaves it describing exactly what the remote sheet acknowledged.
pub fn advance_snapshot(
    snapshot: &mut Snapshot,
    document: &Document,
    ops: &[WriteOp],
    confirmed: usize,
) {
    let layout: BTreeMap<SectionKind, Range> = allocate(document).into_iter().collect();

    for op in &ops[..confirmed.min(ops.len())] {
        match op.kind {
            OpKind::Write => {
                // A confirmed write means the remote section now matches the
                // document; anything it previously occupied past the new end
                // is a stale tail until the paired clear is confirmed.
                let target = layout[&op.section];
                let old_occupied = snapshot
                    .sections
                    .get(&op.section)
                    .map(SectionState::occupied_end)
                    .unwrap_or(0);
                snapshot.sections.insert(
                    op.section,
                    SectionState {
                        rows: document.section_rows(op.section),
                        range: target,
                        stale_rows: old_occupied.saturating_sub(target.end_row),
                    },
                );
            }
            OpKind::Clear => {
                let Some(state) = snapshot.sections.get_mut(&op.section) else {
                    continue;
                };
                let old_occupied = state.occupied_end();

                // The clear may reach into the section's own confirmed range
                // (a section that emptied out entirely); truncate the
                // recorded content to the rows that survive.
                if op.range.start_row <= state.range.end_row {
                    let keep = op.range.start_row.saturating_sub(state.range.start_row);
                    state.rows.truncate(keep as usize);
                    state.range.end_row = op.range.start_row - 1;
                }
                // Occupied rows that survive the clear: the gap between the
                // confirmed range and the clear's start, plus anything past
                // the clear's end.
                state.stale_rows = (op.range.start_row - 1)
                    .saturating_sub(state.range.end_row)
                    + old_occupied.saturating_sub(op.range.end_row);

                if state.rows.is_empty() && state.stale_rows == 0 {
                    snapshot.sections.remove(&op.section);
                }
            }
        }
    }
}
