// In-memory implementation of the SpreadsheetApi port.
//
// **Why have this at all?**
// - Lets the whole engine run end-to-end in tests without credentials
// - Gives the failure-injection hook the partial-sync tests need
// - Still follows the same patterns as the real HTTP implementation

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use dashmap::DashMap;
use rand::Rng;

use crate::core::sheet::{ApiError, CellValue, OpKind, OpOutcome, SpreadsheetApi, WriteOp};

/// A fake remote spreadsheet: one flat grid of cells keyed by (row, col).
///
/// DashMap keeps it safe to share across async tasks without a lock around
/// the whole grid.
pub struct InMemorySheetApi {
    cells: DashMap<(u32, u32), CellValue>,
    ops_applied: AtomicUsize,
    /// When set, the operation at this index of the next `apply` call fails
    /// and everything after it is skipped. Consumed by that call.
    fail_at: Mutex<Option<usize>>,
}

impl InMemorySheetApi {
    pub fn new() -> Self {
        Self {
            cells: DashMap::new(),
            ops_applied: AtomicUsize::new(0),
            fail_at: Mutex::new(None),
        }
    }

    /// Make the operation at `index` of the next `apply` call fail.
    pub fn fail_op(&self, index: usize) {
        *self.fail_at.lock().expect("fail_at lock poisoned") = Some(index);
    }

    /// Cell content, `Empty` where nothing was ever written.
    pub fn value_at(&self, row: u32, col: u32) -> CellValue {
        self.cells
            .get(&(row, col))
            .map(|entry| entry.value().clone())
            .unwrap_or(CellValue::Empty)
    }

    /// Total operations confirmed over the backend's lifetime.
    pub fn ops_applied(&self) -> usize {
        self.ops_applied.load(Ordering::SeqCst)
    }

    fn apply_op(&self, op: &WriteOp) {
        match op.kind {
            OpKind::Write => {
                for (row_offset, row) in op.rows.iter().enumerate() {
                    let row_num = op.range.start_row + row_offset as u32;
                    for (col_offset, value) in row.iter().enumerate() {
                        let col_num = op.range.start_col + col_offset as u32;
                        if value.is_empty() {
                            // Writing an empty cell blanks it, same as the
                            // real API writing "".
                            self.cells.remove(&(row_num, col_num));
                        } else {
                            self.cells.insert((row_num, col_num), value.clone());
                        }
                    }
                }
            }
            OpKind::Clear => {
                for row in op.range.start_row..=op.range.end_row {
                    for col in op.range.start_col..=op.range.end_col {
                        self.cells.remove(&(row, col));
                    }
                }
            }
        }
        self.ops_applied.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl SpreadsheetApi for InMemorySheetApi {
    async fn create_spreadsheet(&self, _title: &str) -> Result<String, ApiError> {
        let id: u32 = rand::thread_rng().gen();
        Ok(format!("mem-{:08x}", id))
    }

    async fn apply(
        &self,
        _spreadsheet_id: &str,
        _worksheet: &str,
        ops: &[WriteOp],
    ) -> Result<Vec<OpOutcome>, ApiError> {
        let fail_at = self
            .fail_at
            .lock()
            .expect("fail_at lock poisoned")
            .take();

        let mut outcomes = Vec::with_capacity(ops.len());
        for (index, op) in ops.iter().enumerate() {
            if fail_at == Some(index) {
                outcomes.push(OpOutcome::Failed("injected failure".to_string()));
                outcomes.extend(
                    std::iter::repeat(OpOutcome::Skipped).take(ops.len() - index - 1),
                );
                return Ok(outcomes);
            }
            self.apply_op(op);
            outcomes.push(OpOutcome::Confirmed);
        }
        Ok(outcomes)
    }
}

impl Default for InMemorySheetApi {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::sheet::Range;

    fn write_op(start_row: u32, rows: Vec<Vec<CellValue>>) -> WriteOp {
        let cols = rows.first().map(|r| r.len() as u32).unwrap_or(1);
        WriteOp {
            section: crate::core::sheet::SectionKind::Data,
            kind: OpKind::Write,
            range: Range::rows(start_row, rows.len() as u32, cols),
            rows,
        }
    }

    #[tokio::test]
    async fn writes_land_on_the_grid() {
        let api = InMemorySheetApi::new();
        let op = write_op(
            2,
            vec![vec![CellValue::Text("A".to_string()), CellValue::Int(5)]],
        );

        let outcomes = api.apply("sheet", "Sheet1", &[op]).await.unwrap();
        assert_eq!(outcomes, vec![OpOutcome::Confirmed]);
        assert_eq!(api.value_at(2, 1), CellValue::Text("A".to_string()));
        assert_eq!(api.value_at(2, 2), CellValue::Int(5));
    }

    #[tokio::test]
    async fn clear_removes_the_whole_range() {
        let api = InMemorySheetApi::new();
        let write = write_op(
            1,
            vec![
                vec![CellValue::Int(1), CellValue::Int(2)],
                vec![CellValue::Int(3), CellValue::Int(4)],
            ],
        );
        api.apply("sheet", "Sheet1", &[write]).await.unwrap();

        let clear = WriteOp {
            section: crate::core::sheet::SectionKind::Data,
            kind: OpKind::Clear,
            range: Range::rows(2, 1, 2),
            rows: Vec::new(),
        };
        api.apply("sheet", "Sheet1", &[clear]).await.unwrap();

        assert_eq!(api.value_at(1, 1), CellValue::Int(1));
        assert_eq!(api.value_at(2, 1), CellValue::Empty);
        assert_eq!(api.value_at(2, 2), CellValue::Empty);
    }

    #[tokio::test]
    async fn injected_failure_reports_positional_outcomes() {
        let api = InMemorySheetApi::new();
        let ops = vec![
            write_op(1, vec![vec![CellValue::Int(1)]]),
            write_op(2, vec![vec![CellValue::Int(2)]]),
            write_op(3, vec![vec![CellValue::Int(3)]]),
        ];

        api.fail_op(1);
        let outcomes = api.apply("sheet", "Sheet1", &ops).await.unwrap();
        assert_eq!(outcomes[0], OpOutcome::Confirmed);
        assert!(matches!(outcomes[1], OpOutcome::Failed(_)));
        assert_eq!(outcomes[2], OpOutcome::Skipped);

        // Row 1 landed, rows 2-3 did not.
        assert_eq!(api.value_at(1, 1), CellValue::Int(1));
        assert_eq!(api.value_at(2, 1), CellValue::Empty);

        // The injection is consumed: the next apply succeeds.
        let outcomes = api.apply("sheet", "Sheet1", &ops[1..]).await.unwrap();
        assert_eq!(outcomes, vec![OpOutcome::Confirmed, OpOutcome::Confirmed]);
    }

    #[tokio::test]
    async fn created_ids_are_distinct() {
        let api = InMemorySheetApi::new();
        let a = api.create_spreadsheet("one").await.unwrap();
        let b = api.create_spreadsheet("two").await.unwrap();
        assert!(a.starts_with("mem-"));
        assert_ne!(a, b);
    }
}
