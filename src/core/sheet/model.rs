// This is the section model - it contains the in-memory representation of a
// synced spreadsheet. Notice how this module has NO HTTP and NO filesystem
// code: it works with plain values so it can be driven by the CLI, by tests,
// or by any other frontend.
//
// A document is an ordered stack of logical sections (Title, Summary, Header,
// Data, Footer). Content lives here; WHERE a section lands on the remote grid
// is derived on demand by the layout allocator.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Version tag written into every state file.
pub const STATE_FORMAT_VERSION: &str = "2.0.0";

const DEFAULT_WORKSHEET: &str = "Sheet1";
const DEFAULT_TITLE_STYLE: &str = "banner";

// ============================================================================
// DOMAIN MODELS
// ============================================================================

/// The five logical section kinds, in their fixed top-to-bottom order.
///
/// The derived `Ord` follows declaration order, which is exactly the layout
/// order - the allocator and the diff engine both rely on this.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum SectionKind {
    Title,
    Summary,
    Header,
    Data,
    Footer,
}

impl SectionKind {
    /// Declared document order. Sections are always laid out in this order.
    pub const ORDER: [SectionKind; 5] = [
        SectionKind::Title,
        SectionKind::Summary,
        SectionKind::Header,
        SectionKind::Data,
        SectionKind::Footer,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            SectionKind::Title => "title",
            SectionKind::Summary => "summary",
            SectionKind::Header => "header",
            SectionKind::Data => "data",
            SectionKind::Footer => "footer",
        }
    }
}

/// A single spreadsheet cell value.
///
/// Untagged so state files and API payloads read naturally:
/// `"Widget"`, `10`, `8.3`, `true`, `null`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CellValue {
    Bool(bool),
    Int(i64),
    Number(f64),
    Text(String),
    Empty,
}

impl CellValue {
    pub fn is_empty(&self) -> bool {
        matches!(self, CellValue::Empty) || matches!(self, CellValue::Text(t) if t.is_empty())
    }

    /// Best-effort scalar inference for free-form input (CLI `key=value`
    /// tokens). Ints win over floats, bools over text.
    pub fn infer(raw: &str) -> CellValue {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return CellValue::Empty;
        }
        if let Ok(b) = trimmed.parse::<bool>() {
            return CellValue::Bool(b);
        }
        if let Ok(i) = trimmed.parse::<i64>() {
            return CellValue::Int(i);
        }
        if let Ok(f) = trimmed.parse::<f64>() {
            return CellValue::Number(f);
        }
        CellValue::Text(trimmed.to_string())
    }

    fn as_f64(&self) -> Option<f64> {
        match self {
            CellValue::Int(i) => Some(*i as f64),
            CellValue::Number(f) => Some(*f),
            CellValue::Text(t) => t.trim().parse::<f64>().ok(),
            _ => None,
        }
    }
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CellValue::Bool(b) => write!(f, "{}", b),
            CellValue::Int(i) => write!(f, "{}", i),
            CellValue::Number(n) => write!(f, "{}", n),
            CellValue::Text(t) => write!(f, "{}", t),
            CellValue::Empty => Ok(()),
        }
    }
}

impl From<&str> for CellValue {
    fn from(value: &str) -> Self {
        CellValue::Text(value.to_string())
    }
}

impl From<String> for CellValue {
    fn from(value: String) -> Self {
        CellValue::Text(value)
    }
}

impl From<i64> for CellValue {
    fn from(value: i64) -> Self {
        CellValue::Int(value)
    }
}

impl From<f64> for CellValue {
    fn from(value: f64) -> Self {
        CellValue::Number(value)
    }
}

impl From<bool> for CellValue {
    fn from(value: bool) -> Self {
        CellValue::Bool(value)
    }
}

/// How a summary value or data column renders on the remote sheet.
///
/// `Unknown` absorbs format kinds added by newer engine versions so that old
/// binaries can still load newer state files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FormatKind {
    Plain,
    Currency,
    Percentage,
    #[serde(other)]
    Unknown,
}

impl FormatKind {
    /// Resolve a raw value into the cell actually written remotely.
    ///
    /// Percentages are stored as decimals (42.5 -> 0.425) because that is
    /// what the remote percent format expects. Non-numeric input passes
    /// through untouched.
    pub fn render(&self, value: &CellValue) -> CellValue {
        if value.is_empty() {
            return CellValue::Empty;
        }
        match self {
            FormatKind::Currency => value
                .as_f64()
                .map(CellValue::Number)
                .unwrap_or_else(|| value.clone()),
            FormatKind::Percentage => value
                .as_f64()
                .map(|f| CellValue::Number(f / 100.0))
                .unwrap_or_else(|| value.clone()),
            FormatKind::Plain | FormatKind::Unknown => value.clone(),
        }
    }
}

/// One `label: value` line in the summary section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryRow {
    pub label: String,
    pub value: CellValue,
    pub format: FormatKind,
}

/// The single merged title line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TitleBlock {
    pub text: String,
    /// Display style tag, resolved by the presentation layer ("banner").
    #[serde(default = "default_title_style")]
    pub style: String,
}

fn default_title_style() -> String {
    DEFAULT_TITLE_STYLE.to_string()
}

/// One declared data column: the display name shown in the header row and
/// the format applied to that column's data cells.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnSpec {
    pub name: String,
    #[serde(default = "default_format")]
    pub format: FormatKind,
}

fn default_format() -> FormatKind {
    FormatKind::Plain
}

/// The header row. `frozen` is a presentation flag for the remote API, not a
/// layout concern.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeaderBlock {
    pub columns: Vec<ColumnSpec>,
    #[serde(default = "default_frozen")]
    pub frozen: bool,
}

fn default_frozen() -> bool {
    true
}

/// A data record: column key -> scalar value. Keys are the lower-cased
/// header names so `set_header(["Qty"])` pairs with `qty=5`.
pub type DataRow = BTreeMap<String, CellValue>;

/// Document bookkeeping carried in the state file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentMeta {
    pub version: String,
    pub spreadsheet_id: Option<String>,
    pub worksheet: String,
    pub created_at: DateTime<Utc>,
    pub last_synced: Option<DateTime<Utc>>,
}

/// Simple counts for the CLI `show` output.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DocumentStats {
    pub sections: usize,
    pub total_rows: usize,
    pub data_rows: usize,
}

// ============================================================================
// ERRORS
// ============================================================================
// Mutation failures are synchronous and leave the document untouched.
// The first three variants are validation failures (bad input), the last two
// are lifecycle failures (legal input at the wrong time).

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ModelError {
    #[error("unknown column '{0}'")]
    UnknownColumn(String),

    #[error("header needs at least one column")]
    EmptyHeader,

    #[error("duplicate column '{0}' in header")]
    DuplicateColumn(String),

    #[error("a header must be declared before data rows are added")]
    HeaderNotSet,

    #[error("the header cannot be redeclared while data rows exist; clear the data section first")]
    HeaderLocked,
}

// ============================================================================
// DOCUMENT
// ============================================================================

/// The root aggregate: five sections in fixed order plus metadata.
///
/// Fields are private because the header and the data rows must stay
/// consistent - data rows only ever carry keys the header declared.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    meta: DocumentMeta,
    #[serde(default)]
    title: Option<TitleBlock>,
    #[serde(default)]
    summary: Vec<SummaryRow>,
    #[serde(default)]
    header: Option<HeaderBlock>,
    #[serde(default)]
    data: Vec<DataRow>,
    #[serde(default)]
    footer: Vec<String>,
}

/// Lower-cased lookup key for a column display name.
pub fn column_key(name: &str) -> String {
    name.trim().to_lowercase()
}

impl Document {
    pub fn new() -> Self {
        Self {
            meta: DocumentMeta {
                version: STATE_FORMAT_VERSION.to_string(),
                spreadsheet_id: None,
                worksheet: DEFAULT_WORKSHEET.to_string(),
                created_at: Utc::now(),
                last_synced: None,
            },
            title: None,
            summary: Vec::new(),
            header: None,
            data: Vec::new(),
            footer: Vec::new(),
        }
    }

    pub fn meta(&self) -> &DocumentMeta {
        &self.meta
    }

    pub fn spreadsheet_id(&self) -> Option<&str> {
        self.meta.spreadsheet_id.as_deref()
    }

    pub fn set_spreadsheet_id(&mut self, id: impl Into<String>) {
        self.meta.spreadsheet_id = Some(id.into());
    }

    pub fn worksheet(&self) -> &str {
        &self.meta.worksheet
    }

    pub(crate) fn mark_synced(&mut self, at: DateTime<Utc>) {
        self.meta.last_synced = Some(at);
    }

    /// Browser URL of the remote spreadsheet, once one exists.
    pub fn url(&self) -> Option<String> {
        self.meta
            .spreadsheet_id
            .as_ref()
            .map(|id| format!("https://docs.google.com/spreadsheets/d/{}", id))
    }

    // ------------------------------------------------------------------
    // Mutations. All synchronous, all local; syncing is a separate step.
    // ------------------------------------------------------------------

    /// Set the title line with the default "banner" style.
    pub fn set_title(&mut self, text: impl Into<String>) {
        self.set_title_with_style(text, DEFAULT_TITLE_STYLE);
    }

    pub fn set_title_with_style(&mut self, text: impl Into<String>, style: impl Into<String>) {
        self.title = Some(TitleBlock {
            text: text.into(),
            style: style.into(),
        });
    }

    pub fn add_summary_row(
        &mut self,
        label: impl Into<String>,
        value: impl Into<CellValue>,
        format: FormatKind,
    ) {
        self.summary.push(SummaryRow {
            label: label.into(),
            value: value.into(),
            format,
        });
    }

    /// Declare the data columns, all rendered plain.
    pub fn set_header<I, T>(&mut self, columns: I) -> Result<(), ModelError>
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        let specs: Vec<ColumnSpec> = columns
            .into_iter()
            .map(|name| ColumnSpec {
                name: name.into(),
                format: FormatKind::Plain,
            })
            .collect();
        self.set_header_columns(specs)
    }

    /// Declare the data columns with per-column formats.
    ///
    /// The column set must be fixed before data accumulates, so this fails
    /// with `HeaderLocked` once any data row exists; call `clear_data` first
    /// to re-declare.
    pub fn set_header_columns(&mut self, columns: Vec<ColumnSpec>) -> Result<(), ModelError> {
        if !self.data.is_empty() {
            return Err(ModelError::HeaderLocked);
        }
        if columns.is_empty() {
            return Err(ModelError::EmptyHeader);
        }
        let mut seen = BTreeSet::new();
        for spec in &columns {
            if !seen.insert(column_key(&spec.name)) {
                return Err(ModelError::DuplicateColumn(spec.name.clone()));
            }
        }
        self.header = Some(HeaderBlock {
            columns,
            frozen: true,
        });
        Ok(())
    }

    /// Append one record. Every key must match a declared column
    /// (case-insensitively); missing columns render as empty cells.
    pub fn add_data_row(&mut self, record: DataRow) -> Result<(), ModelError> {
        let normalized = self.normalize_record(record)?;
        self.data.push(normalized);
        Ok(())
    }

    /// Update every row matched by `matcher` with the values in `updates`.
    /// Returns the number of rows touched.
    pub fn update_data_rows(
        &mut self,
        matcher: &DataRow,
        updates: DataRow,
    ) -> Result<usize, ModelError> {
        let updates = self.normalize_record(updates)?;
        let matcher = normalize_keys(matcher);

        let mut count = 0;
        for row in &mut self.data {
            if matches_criteria(row, &matcher) {
                for (key, value) in &updates {
                    row.insert(key.clone(), value.clone());
                }
                count += 1;
            }
        }
        Ok(count)
    }

    pub fn add_footer_line(&mut self, text: impl Into<String>) {
        self.footer.push(text.into());
    }

    /// Drop all data rows. Required before re-declaring the header.
    pub fn clear_data(&mut self) {
        self.data.clear();
    }

    // ------------------------------------------------------------------
    // Queries. Purely in-memory; never an error, never a remote call.
    // ------------------------------------------------------------------

    /// All data rows matching the predicate, in insertion order. An empty
    /// predicate matches everything.
    pub fn find_data_rows(&self, predicate: &DataRow) -> Vec<DataRow> {
        let predicate = normalize_keys(predicate);
        self.data
            .iter()
            .filter(|row| matches_criteria(row, &predicate))
            .cloned()
            .collect()
    }

    pub fn data_rows(&self) -> &[DataRow] {
        &self.data
    }

    pub fn title(&self) -> Option<&TitleBlock> {
        self.title.as_ref()
    }

    pub fn summary_rows(&self) -> &[SummaryRow] {
        &self.summary
    }

    pub fn header(&self) -> Option<&HeaderBlock> {
        self.header.as_ref()
    }

    pub fn footer_lines(&self) -> &[String] {
        &self.footer
    }

    pub fn stats(&self) -> DocumentStats {
        let total_rows: usize = SectionKind::ORDER
            .iter()
            .map(|kind| self.section_row_count(*kind))
            .sum();
        let sections = SectionKind::ORDER
            .iter()
            .filter(|kind| self.section_row_count(**kind) > 0)
            .count();
        DocumentStats {
            sections,
            total_rows,
            data_rows: self.data.len(),
        }
    }

    // ------------------------------------------------------------------
    // Rendering. The grid the remote sheet should show, section by section.
    // ------------------------------------------------------------------

    /// The document's column span: the widest section's natural width.
    /// Every rendered row is padded to this width so section ranges line up.
    pub fn column_span(&self) -> u32 {
        let mut span: usize = 1;
        if !self.summary.is_empty() {
            span = span.max(2);
        }
        if let Some(header) = &self.header {
            span = span.max(header.columns.len());
        }
        span as u32
    }

    pub fn section_row_count(&self, kind: SectionKind) -> usize {
        match kind {
            SectionKind::Title => usize::from(self.title.is_some()),
            SectionKind::Summary => self.summary.len(),
            SectionKind::Header => usize::from(self.header.is_some()),
            SectionKind::Data => self.data.len(),
            SectionKind::Footer => self.footer.len(),
        }
    }

    /// Rendered cell rows for one section, padded to `column_span`.
    /// Formats are resolved here, so the diff engine compares exactly what
    /// would be written.
    pub fn section_rows(&self, kind: SectionKind) -> Vec<Vec<CellValue>> {
        let span = self.column_span() as usize;
        let rows: Vec<Vec<CellValue>> = match kind {
            SectionKind::Title => self
                .title
                .iter()
                .map(|t| vec![CellValue::Text(t.text.clone())])
                .collect(),
            SectionKind::Summary => self
                .summary
                .iter()
                .map(|row| {
                    vec![
                        CellValue::Text(row.label.clone()),
                        row.format.render(&row.value),
                    ]
                })
                .collect(),
            SectionKind::Header => self
                .header
                .iter()
                .map(|h| {
                    h.columns
                        .iter()
                        .map(|c| CellValue::Text(c.name.clone()))
                        .collect()
                })
                .collect(),
            SectionKind::Data => {
                let Some(header) = &self.header else {
                    return Vec::new();
                };
                self.data
                    .iter()
                    .map(|record| {
                        header
                            .columns
                            .iter()
                            .map(|col| {
                                let value = record
                                    .get(&column_key(&col.name))
                                    .cloned()
                                    .unwrap_or(CellValue::Empty);
                                col.format.render(&value)
                            })
                            .collect()
                    })
                    .collect()
            }
            SectionKind::Footer => self
                .footer
                .iter()
                .map(|line| vec![CellValue::Text(line.clone())])
                .collect(),
        };

        rows.into_iter()
            .map(|mut row| {
                row.resize(span, CellValue::Empty);
                row
            })
            .collect()
    }

    /// Validate a record against the header and lower-case its keys.
    /// Fails without touching the document.
    fn normalize_record(&self, record: DataRow) -> Result<DataRow, ModelError> {
        let Some(header) = &self.header else {
            return Err(ModelError::HeaderNotSet);
        };
        let declared: BTreeSet<String> = header
            .columns
            .iter()
            .map(|c| column_key(&c.name))
            .collect();

        let mut normalized = DataRow::new();
        for (key, value) in record {
            let key = column_key(&key);
            if !declared.contains(&key) {
                return Err(ModelError::UnknownColumn(key));
            }
            normalized.insert(key, value);
        }
        Ok(normalized)
    }
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

fn normalize_keys(record: &DataRow) -> DataRow {
    record
        .iter()
        .map(|(k, v)| (column_key(k), v.clone()))
        .collect()
}

fn matches_criteria(row: &DataRow, criteria: &DataRow) -> bool {
    criteria
        .iter()
        .all(|(key, expected)| row.get(key) == Some(expected))
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn record(fields: &[(&str, CellValue)]) -> DataRow {
        fields
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn data_row_requires_header() {
        let mut doc = Document::new();
        let err = doc
            .add_data_row(record(&[("sku", "X".into()), ("price", 9i64.into())]))
            .unwrap_err();
        assert_eq!(err, ModelError::HeaderNotSet);
        assert!(doc.data_rows().is_empty());
    }

    #[test]
    fn data_row_rejects_unknown_column() {
        let mut doc = Document::new();
        doc.set_header(["sku", "qty"]).unwrap();
        let err = doc
            .add_data_row(record(&[("sku", "A".into()), ("color", "red".into())]))
            .unwrap_err();
        assert_eq!(err, ModelError::UnknownColumn("color".to_string()));
        // Rejected mutations must not leave a partial row behind.
        assert!(doc.data_rows().is_empty());
    }

    #[test]
    fn header_locked_once_data_exists() {
        let mut doc = Document::new();
        doc.set_header(["sku"]).unwrap();
        doc.add_data_row(record(&[("sku", "A".into())])).unwrap();

        assert_eq!(doc.set_header(["sku", "qty"]), Err(ModelError::HeaderLocked));

        doc.clear_data();
        doc.set_header(["sku", "qty"]).unwrap();
        assert_eq!(doc.header().unwrap().columns.len(), 2);
    }

    #[test]
    fn header_columns_match_case_insensitively() {
        let mut doc = Document::new();
        doc.set_header(["Priority", "Qty"]).unwrap();
        doc.add_data_row(record(&[("priority", "P0".into()), ("qty", 10i64.into())]))
            .unwrap();

        let rows = doc.section_rows(SectionKind::Data);
        assert_eq!(rows[0][0], CellValue::Text("P0".to_string()));
        assert_eq!(rows[0][1], CellValue::Int(10));
    }

    #[test]
    fn duplicate_header_columns_rejected() {
        let mut doc = Document::new();
        let err = doc.set_header(["Qty", "qty"]).unwrap_err();
        assert_eq!(err, ModelError::DuplicateColumn("qty".to_string()));
    }

    #[test]
    fn find_data_rows_preserves_order_and_never_errors() {
        let mut doc = Document::new();
        doc.set_header(["sku", "priority"]).unwrap();
        for (sku, priority) in [("A", "P0"), ("B", "P1"), ("C", "P0")] {
            doc.add_data_row(record(&[("sku", sku.into()), ("priority", priority.into())]))
                .unwrap();
        }

        let hits = doc.find_data_rows(&record(&[("priority", "P0".into())]));
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].get("sku"), Some(&CellValue::Text("A".to_string())));
        assert_eq!(hits[1].get("sku"), Some(&CellValue::Text("C".to_string())));

        let none = doc.find_data_rows(&record(&[("priority", "P9".into())]));
        assert!(none.is_empty());
    }

    #[test]
    fn update_data_rows_counts_matches() {
        let mut doc = Document::new();
        doc.set_header(["product", "qty"]).unwrap();
        doc.add_data_row(record(&[("product", "Widget".into()), ("qty", 10i64.into())]))
            .unwrap();
        doc.add_data_row(record(&[("product", "Gadget".into()), ("qty", 3i64.into())]))
            .unwrap();

        let touched = doc
            .update_data_rows(
                &record(&[("product", "Widget".into())]),
                record(&[("qty", 20i64.into())]),
            )
            .unwrap();
        assert_eq!(touched, 1);
        assert_eq!(
            doc.data_rows()[0].get("qty"),
            Some(&CellValue::Int(20))
        );
    }

    #[test]
    fn percentage_renders_as_decimal() {
        assert_eq!(
            FormatKind::Percentage.render(&CellValue::Number(42.5)),
            CellValue::Number(0.425)
        );
        assert_eq!(
            FormatKind::Currency.render(&CellValue::Int(5)),
            CellValue::Number(5.0)
        );
        // Non-numeric values pass through untouched.
        assert_eq!(
            FormatKind::Currency.render(&CellValue::Text("n/a".to_string())),
            CellValue::Text("n/a".to_string())
        );
    }

    #[test]
    fn unknown_format_kind_is_forward_readable() {
        let kind: FormatKind = serde_json::from_str("\"scientific\"").unwrap();
        assert_eq!(kind, FormatKind::Unknown);
        assert_eq!(
            kind.render(&CellValue::Int(7)),
            CellValue::Int(7)
        );
    }

    #[test]
    fn cell_value_inference() {
        assert_eq!(CellValue::infer("10"), CellValue::Int(10));
        assert_eq!(CellValue::infer("8.3"), CellValue::Number(8.3));
        assert_eq!(CellValue::infer("true"), CellValue::Bool(true));
        assert_eq!(CellValue::infer("Widget"), CellValue::Text("Widget".to_string()));
        assert_eq!(CellValue::infer(""), CellValue::Empty);
    }

    #[test]
    fn rendered_rows_are_padded_to_span() {
        let mut doc = Document::new();
        doc.set_title("PURCHASE ORDER");
        doc.add_summary_row("Total", CellValue::Number(1791.22), FormatKind::Currency);
        doc.set_header(["sku", "product", "qty"]).unwrap();

        assert_eq!(doc.column_span(), 3);
        let title = doc.section_rows(SectionKind::Title);
        assert_eq!(title[0].len(), 3);
        assert_eq!(title[0][1], CellValue::Empty);
        let summary = doc.section_rows(SectionKind::Summary);
        assert_eq!(summary[0].len(), 3);
    }
}
