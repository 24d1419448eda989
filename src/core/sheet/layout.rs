// Grid allocation: turning the ordered section stack into absolute cell
// ranges. This is a pure function of the document content - identical
// content always produces identical ranges, which is what lets the diff
// engine detect a no-op sync.

use serde::{Deserialize, Serialize};

use super::model::{Document, SectionKind};

/// An absolute rectangular span of cells, 1-based and inclusive.
///
/// An empty range (a section with no content yet) is encoded as
/// `end_row = start_row - 1`: it holds its position in the stack without
/// reserving any rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Range {
    pub start_row: u32,
    pub end_row: u32,
    pub start_col: u32,
    pub end_col: u32,
}

impl Range {
    pub fn rows(start_row: u32, row_count: u32, col_count: u32) -> Self {
        Self {
            start_row,
            end_row: start_row + row_count.saturating_sub(1),
            start_col: 1,
            end_col: col_count.max(1),
        }
    }

    fn empty_at(start_row: u32, col_count: u32) -> Self {
        Self {
            start_row,
            end_row: start_row - 1,
            start_col: 1,
            end_col: col_count.max(1),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.end_row < self.start_row
    }

    pub fn row_count(&self) -> u32 {
        if self.is_empty() {
            0
        } else {
            self.end_row - self.start_row + 1
        }
    }

    /// A1-notation without a sheet prefix, e.g. `A2:C5`.
    pub fn a1(&self) -> String {
        format!(
            "{}{}:{}{}",
            col_letter(self.start_col),
            self.start_row,
            col_letter(self.end_col),
            self.end_row.max(self.start_row)
        )
    }
}

/// Column number to letter: 1 = A, 26 = Z, 27 = AA.
pub fn col_letter(mut col: u32) -> String {
    let mut letters = Vec::new();
    while col > 0 {
        col -= 1;
        letters.push(b'A' + (col % 26) as u8);
        col /= 26;
    }
    letters.reverse();
    String::from_utf8(letters).unwrap_or_default()
}

/// Assign every section its range in declared order, top to bottom.
///
/// Invariants: ranges never overlap and never leave gaps - each section
/// starts on the row after the previous one ends, and an empty section
/// contributes zero rows, so the next section starts where the empty one
/// would have.
pub fn allocate(document: &Document) -> Vec<(SectionKind, Range)> {
    let span = document.column_span();
    let mut next_row = 1u32;
    let mut ranges = Vec::with_capacity(SectionKind::ORDER.len());

    for kind in SectionKind::ORDER {
        let rows = document.section_row_count(kind) as u32;
        let range = if rows == 0 {
            Range::empty_at(next_row, span)
        } else {
            Range::rows(next_row, rows, span)
        };
        next_row += rows;
        ranges.push((kind, range));
    }

    ranges
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::sheet::model::{CellValue, FormatKind};

    fn sample_document() -> Document {
        let mut doc = Document::new();
        doc.set_title("REPORT");
        doc.add_summary_row("Total", CellValue::Int(100), FormatKind::Currency);
        doc.add_summary_row("Margin", CellValue::Number(40.0), FormatKind::Percentage);
        doc.set_header(["sku", "qty"]).unwrap();
        for i in 0..3i64 {
            let mut row = std::collections::BTreeMap::new();
            row.insert("sku".to_string(), CellValue::Text(format!("S{}", i)));
            row.insert("qty".to_string(), CellValue::Int(i));
            doc.add_data_row(row).unwrap();
        }
        doc.add_footer_line("generated by sheetsync");
        doc
    }

    #[test]
    fn sections_stack_without_gaps_or_overlap() {
        let doc = sample_document();
        let ranges = allocate(&doc);

        // title 1, summary 2-3, header 4, data 5-7, footer 8
        let expected = [(1, 1), (2, 3), (4, 4), (5, 7), (8, 8)];
        for ((_, range), (start, end)) in ranges.iter().zip(expected) {
            assert_eq!(range.start_row, start);
            assert_eq!(range.end_row, end);
        }

        for pair in ranges.windows(2) {
            let (_, a) = pair[0];
            let (_, b) = pair[1];
            assert_eq!(b.start_row, a.end_row + 1);
        }
    }

    #[test]
    fn empty_sections_reserve_zero_rows() {
        let mut doc = Document::new();
        doc.set_header(["sku"]).unwrap();

        let ranges = allocate(&doc);
        let title = ranges[0].1;
        let summary = ranges[1].1;
        let header = ranges[2].1;

        assert!(title.is_empty());
        assert!(summary.is_empty());
        assert_eq!(summary.start_row, 1);
        // The first non-empty section starts where the empty ones sit.
        assert_eq!(header.start_row, 1);
        assert_eq!(header.end_row, 1);
    }

    #[test]
    fn allocation_is_deterministic() {
        let doc = sample_document();
        assert_eq!(allocate(&doc), allocate(&doc));
    }

    #[test]
    fn column_letters() {
        assert_eq!(col_letter(1), "A");
        assert_eq!(col_letter(2), "B");
        assert_eq!(col_letter(26), "Z");
        assert_eq!(col_letter(27), "AA");
        assert_eq!(col_letter(52), "AZ");
    }

    #[test]
    fn a1_notation() {
        let range = Range::rows(5, 3, 4);
        assert_eq!(range.a1(), "A5:D7");
    }
}
