// The sync executor. Orchestrates diffing, the remote API call, snapshot
// advancement and state persistence - the only place in the engine that
// suspends on I/O.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use thiserror::Error;

use super::diff::{advance_snapshot, diff, OpKind, Snapshot, WriteOp};
use super::model::{
    CellValue, DataRow, Document, DocumentStats, FormatKind, ModelError, SectionKind,
};
use super::state_store::{PersistedState, StateStore, StoreError};

// ============================================================================
// SPREADSHEET API PORT
// ============================================================================

/// Transport-level failure of a whole API call. Individual operation
/// failures are reported positionally through `OpOutcome` instead.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("authentication failed: {0}")]
    Auth(String),
    #[error("spreadsheet API error: {0}")]
    Http(String),
}

/// Per-operation result, in submission order. `Skipped` marks operations the
/// backend never attempted because an earlier one failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpOutcome {
    Confirmed,
    Failed(String),
    Skipped,
}

/// The remote spreadsheet, as narrow as the engine needs it: operations are
/// applied in the order submitted and each outcome is individually reported.
#[async_trait]
pub trait SpreadsheetApi: Send + Sync {
    /// Create an empty spreadsheet and return its id.
    async fn create_spreadsheet(&self, title: &str) -> Result<String, ApiError>;

    /// Apply the operations in order, batching however the backend allows,
    /// and report one outcome per operation.
    async fn apply(
        &self,
        spreadsheet_id: &str,
        worksheet: &str,
        ops: &[WriteOp],
    ) -> Result<Vec<OpOutcome>, ApiError>;
}

// ============================================================================
// STATS & ERRORS
// ============================================================================

/// What one sync call wrote, summarized per section name.
///
/// `rows_updated` counts data records pushed; presentational sections
/// (title, summary, header, footer) report their row counts in
/// `rows_by_section` only.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SyncStats {
    pub rows_updated: u32,
    pub sections_synced: Vec<String>,
    pub rows_by_section: BTreeMap<String, u32>,
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("no spreadsheet exists yet; create one before syncing")]
    NotCreated,

    #[error(transparent)]
    Api(#[from] ApiError),

    /// The remote API confirmed only part of the batch. The in-memory
    /// snapshot reflects the confirmed prefix, so re-running `sync` emits
    /// only what is still missing.
    #[error("remote sync incomplete: {confirmed} of {attempted} operations confirmed ({message})")]
    Partial {
        confirmed: usize,
        attempted: usize,
        message: String,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}

// ============================================================================
// SHEET SERVICE
// ============================================================================

/// Owns one document and its last-confirmed snapshot, generic over the
/// persistence backend. The spreadsheet API is threaded into the calls that
/// need it rather than held as ambient state.
///
/// Single-writer by construction: every mutation and `sync` itself take
/// `&mut self`, so the borrow checker rules out mutating the document while
/// a sync is in flight. Sharing one state file between processes is
/// unsupported - the last writer wins.
pub struct SheetService<S: StateStore> {
    store: S,
    document: Document,
    snapshot: Snapshot,
}

impl<S: StateStore> SheetService<S> {
    /// Create a fresh remote spreadsheet and persist the initial (empty)
    /// state.
    pub async fn create_new<A: SpreadsheetApi>(
        api: &A,
        store: S,
        title: &str,
    ) -> Result<Self, SyncError> {
        let id = api.create_spreadsheet(title).await?;
        tracing::info!(spreadsheet_id = %id, title, "created spreadsheet");

        let mut document = Document::new();
        document.set_spreadsheet_id(id);

        let service = Self {
            store,
            document,
            snapshot: Snapshot::default(),
        };
        service.save().await?;
        Ok(service)
    }

    /// Resume from a persisted state file.
    pub async fn open(store: S) -> Result<Self, StoreError> {
        let state = store.load().await?;
        Ok(Self {
            store,
            document: state.document,
            snapshot: state.snapshot,
        })
    }

    /// Assemble from already-loaded parts (tests, tooling).
    pub fn from_parts(store: S, document: Document, snapshot: Snapshot) -> Self {
        Self {
            store,
            document,
            snapshot,
        }
    }

    pub fn document(&self) -> &Document {
        &self.document
    }

    pub fn snapshot(&self) -> &Snapshot {
        &self.snapshot
    }

    // ------------------------------------------------------------------
    // Mutation and query pass-throughs (see model.rs for the rules).
    // ------------------------------------------------------------------

    pub fn set_title(&mut self, text: impl Into<String>) {
        self.document.set_title(text);
    }

    pub fn set_title_with_style(&mut self, text: impl Into<String>, style: impl Into<String>) {
        self.document.set_title_with_style(text, style);
    }

    pub fn add_summary_row(
        &mut self,
        label: impl Into<String>,
        value: impl Into<CellValue>,
        format: FormatKind,
    ) {
        self.document.add_summary_row(label, value, format);
    }

    pub fn set_header<I, T>(&mut self, columns: I) -> Result<(), ModelError>
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.document.set_header(columns)
    }

    pub fn add_data_row(&mut self, record: DataRow) -> Result<(), ModelError> {
        self.document.add_data_row(record)
    }

    pub fn update_data_rows(
        &mut self,
        matcher: &DataRow,
        updates: DataRow,
    ) -> Result<usize, ModelError> {
        self.document.update_data_rows(matcher, updates)
    }

    pub fn add_footer_line(&mut self, text: impl Into<String>) {
        self.document.add_footer_line(text);
    }

    pub fn clear_data(&mut self) {
        self.document.clear_data();
    }

    pub fn find_data_rows(&self, predicate: &DataRow) -> Vec<DataRow> {
        self.document.find_data_rows(predicate)
    }

    pub fn stats(&self) -> DocumentStats {
        self.document.stats()
    }

    pub fn url(&self) -> Option<String> {
        self.document.url()
    }

    /// The operations the next `sync` would send, without sending them.
    pub fn pending_ops(&self) -> Vec<WriteOp> {
        diff(&self.document, &self.snapshot)
    }

    // ------------------------------------------------------------------
    // Sync
    // ------------------------------------------------------------------

    /// Push local changes to the remote sheet.
    ///
    /// An empty diff returns zero stats without touching the API, so calling
    /// `sync` twice in a row is a no-op the second time. On full success the
    /// snapshot catches up to the document, `last_synced` is stamped and the
    /// state store persists the pair. On partial success the snapshot
    /// advances only through the confirmed prefix, nothing is persisted, and
    /// the caller may simply retry.
    ///
    /// Remote edits made by someone else since the last sync are not
    /// detected; this engine is last-writer-wins.
    pub async fn sync<A: SpreadsheetApi>(&mut self, api: &A) -> Result<SyncStats, SyncError> {
        let spreadsheet_id = self
            .document
            .spreadsheet_id()
            .ok_or(SyncError::NotCreated)?
            .to_string();

        let ops = diff(&self.document, &self.snapshot);
        if ops.is_empty() {
            tracing::debug!(spreadsheet_id = %spreadsheet_id, "document unchanged, skipping sync");
            return Ok(SyncStats::default());
        }

        tracing::debug!(
            spreadsheet_id = %spreadsheet_id,
            operations = ops.len(),
            "applying sync operations"
        );
        let outcomes = api
            .apply(&spreadsheet_id, self.document.worksheet(), &ops)
            .await?;

        // Advance only through the leading run of confirmed outcomes. If a
        // cancelled or half-applied batch reported later successes too, the
        // conservative prefix is still safe: rewriting a confirmed operation
        // is idempotent.
        let confirmed = outcomes
            .iter()
            .take_while(|outcome| matches!(outcome, OpOutcome::Confirmed))
            .count();
        advance_snapshot(&mut self.snapshot, &self.document, &ops, confirmed);

        if confirmed < ops.len() {
            let message = outcomes
                .iter()
                .find_map(|outcome| match outcome {
                    OpOutcome::Failed(message) => Some(message.clone()),
                    _ => None,
                })
                .unwrap_or_else(|| "operation not confirmed".to_string());
            tracing::warn!(
                spreadsheet_id = %spreadsheet_id,
                confirmed,
                attempted = ops.len(),
                "partial sync"
            );
            return Err(SyncError::Partial {
                confirmed,
                attempted: ops.len(),
                message,
            });
        }

        self.document.mark_synced(Utc::now());
        self.save().await?;

        let stats = stats_for(&ops);
        tracing::info!(
            spreadsheet_id = %spreadsheet_id,
            rows_updated = stats.rows_updated,
            sections = ?stats.sections_synced,
            "sync complete"
        );
        Ok(stats)
    }

    /// Persist the current document + snapshot pair.
    pub async fn save(&self) -> Result<(), StoreError> {
        self.store
            .save(&PersistedState {
                document: self.document.clone(),
                snapshot: self.snapshot.clone(),
            })
            .await
    }
}

fn stats_for(ops: &[WriteOp]) -> SyncStats {
    let mut stats = SyncStats::default();
    for op in ops {
        let name = op.section.name().to_string();
        if !stats.sections_synced.contains(&name) {
            stats.sections_synced.push(name.clone());
        }
        if op.kind == OpKind::Write {
            *stats.rows_by_section.entry(name).or_insert(0) += op.rows.len() as u32;
            if op.section == SectionKind::Data {
                stats.rows_updated += op.rows.len() as u32;
            }
        }
    }
    stats
}

// ============================================================================
// TESTS
// ============================================================================
// The executor is tested against the in-memory backend from the infra layer
// plus a scratch store, so these are full engine round trips without any
// network.

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::sheets::InMemorySheetApi;
    use tokio::sync::Mutex;

    /// Scratch store: keeps the last saved state and counts saves.
    #[derive(Default)]
    struct MemoryStateStore {
        state: Mutex<Option<PersistedState>>,
    }

    #[async_trait]
    impl StateStore for MemoryStateStore {
        async fn load(&self) -> Result<PersistedState, StoreError> {
            self.state
                .lock()
                .await
                .clone()
                .ok_or_else(|| StoreError::Corrupt("no state saved".to_string()))
        }

        async fn save(&self, state: &PersistedState) -> Result<(), StoreError> {
            *self.state.lock().await = Some(state.clone());
            Ok(())
        }
    }

    fn record(fields: &[(&str, CellValue)]) -> DataRow {
        fields
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    async fn service_with_sheet(
        api: &InMemorySheetApi,
    ) -> SheetService<MemoryStateStore> {
        SheetService::create_new(api, MemoryStateStore::default(), "Test Sheet")
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn header_and_rows_then_incremental_append() {
        let api = InMemorySheetApi::new();
        let mut service = service_with_sheet(&api).await;

        service.set_header(["sku", "qty"]).unwrap();
        service
            .add_data_row(record(&[("sku", "A".into()), ("qty", 5i64.into())]))
            .unwrap();
        service
            .add_data_row(record(&[("sku", "B".into()), ("qty", 3i64.into())]))
            .unwrap();

        let stats = service.sync(&api).await.unwrap();
        assert_eq!(stats.rows_updated, 2);
        assert!(stats.sections_synced.contains(&"header".to_string()));
        assert!(stats.sections_synced.contains(&"data".to_string()));

        // Remote grid: header on row 1, records on rows 2-3.
        assert_eq!(api.value_at(1, 1), CellValue::Text("sku".to_string()));
        assert_eq!(api.value_at(2, 1), CellValue::Text("A".to_string()));
        assert_eq!(api.value_at(3, 2), CellValue::Int(3));

        // Append one record: only that row is written, header untouched.
        service
            .add_data_row(record(&[("sku", "C".into()), ("qty", 1i64.into())]))
            .unwrap();
        let stats = service.sync(&api).await.unwrap();
        assert_eq!(stats.rows_updated, 1);
        assert_eq!(stats.sections_synced, vec!["data".to_string()]);
        assert_eq!(api.value_at(4, 1), CellValue::Text("C".to_string()));
    }

    #[tokio::test]
    async fn resync_without_mutations_is_a_no_op() {
        let api = InMemorySheetApi::new();
        let mut service = service_with_sheet(&api).await;

        service.set_header(["sku"]).unwrap();
        service
            .add_data_row(record(&[("sku", "A".into())]))
            .unwrap();
        service.sync(&api).await.unwrap();

        let ops_before = api.ops_applied();
        let stats = service.sync(&api).await.unwrap();
        assert_eq!(stats.rows_updated, 0);
        assert!(stats.sections_synced.is_empty());
        // The API was never called the second time.
        assert_eq!(api.ops_applied(), ops_before);
    }

    #[tokio::test]
    async fn shrinking_data_clears_the_leftover_rows() {
        let api = InMemorySheetApi::new();
        let mut service = service_with_sheet(&api).await;

        service.set_header(["sku"]).unwrap();
        for sku in ["A", "B", "C", "D"] {
            service.add_data_row(record(&[("sku", sku.into())])).unwrap();
        }
        service.sync(&api).await.unwrap();
        assert_eq!(api.value_at(5, 1), CellValue::Text("D".to_string()));

        service.clear_data();
        service.add_data_row(record(&[("sku", "A".into())])).unwrap();
        service.add_data_row(record(&[("sku", "B".into())])).unwrap();
        service.sync(&api).await.unwrap();

        // Rows 4-5 of the old range are gone, not just overwritten.
        assert_eq!(api.value_at(4, 1), CellValue::Empty);
        assert_eq!(api.value_at(5, 1), CellValue::Empty);
        assert_eq!(api.value_at(3, 1), CellValue::Text("B".to_string()));
    }

    #[tokio::test]
    async fn sync_without_spreadsheet_fails_fast() {
        let api = InMemorySheetApi::new();
        let mut service = SheetService::from_parts(
            MemoryStateStore::default(),
            Document::new(),
            Snapshot::default(),
        );
        service.set_header(["sku"]).unwrap();

        let err = service.sync(&api).await.unwrap_err();
        assert!(matches!(err, SyncError::NotCreated));
    }

    #[tokio::test]
    async fn partial_failure_advances_snapshot_only_to_confirmed_prefix() {
        let api = InMemorySheetApi::new();
        let mut service = service_with_sheet(&api).await;

        service.set_title("ORDERS");
        service.set_header(["sku"]).unwrap();
        service.add_data_row(record(&[("sku", "A".into())])).unwrap();

        // Three writes pending (title, header, data); fail the third.
        api.fail_op(2);
        let err = service.sync(&api).await.unwrap_err();
        match err {
            SyncError::Partial {
                confirmed,
                attempted,
                ..
            } => {
                assert_eq!(confirmed, 2);
                assert_eq!(attempted, 3);
            }
            other => panic!("expected partial sync error, got {other}"),
        }

        // The retry re-emits only the unconfirmed data write.
        let pending = service.pending_ops();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].section, SectionKind::Data);

        let stats = service.sync(&api).await.unwrap();
        assert_eq!(stats.rows_updated, 1);
        assert_eq!(api.value_at(3, 1), CellValue::Text("A".to_string()));
    }

    #[tokio::test]
    async fn successful_sync_persists_state() {
        let api = InMemorySheetApi::new();
        let mut service = service_with_sheet(&api).await;
        service.set_header(["sku"]).unwrap();
        service.add_data_row(record(&[("sku", "A".into())])).unwrap();
        service.sync(&api).await.unwrap();

        let saved = service.store.load().await.unwrap();
        assert_eq!(&saved.document, service.document());
        assert_eq!(&saved.snapshot, service.snapshot());
        assert!(saved.document.meta().last_synced.is_some());
    }

    #[tokio::test]
    async fn summary_formats_reach_the_remote_grid() {
        let api = InMemorySheetApi::new();
        let mut service = service_with_sheet(&api).await;

        service.add_summary_row("Total", CellValue::Number(1791.22), FormatKind::Currency);
        service.add_summary_row("Margin", CellValue::Number(42.5), FormatKind::Percentage);
        service.sync(&api).await.unwrap();

        assert_eq!(api.value_at(1, 1), CellValue::Text("Total".to_string()));
        assert_eq!(api.value_at(1, 2), CellValue::Number(1791.22));
        // Percentages land as decimals for the remote percent format.
        assert_eq!(api.value_at(2, 2), CellValue::Number(0.425));
    }

    #[tokio::test]
    async fn reopen_restores_document_and_snapshot() {
        let api = InMemorySheetApi::new();
        let mut service = service_with_sheet(&api).await;
        service.set_header(["sku", "priority"]).unwrap();
        service
            .add_data_row(record(&[("sku", "A".into()), ("priority", "P0".into())]))
            .unwrap();
        service.sync(&api).await.unwrap();

        let saved = service.store.load().await.unwrap();
        let reopened = SheetService::open(MemoryStateStore {
            state: Mutex::new(Some(saved)),
        })
        .await
        .unwrap();

        // Queries work on the reloaded document...
        let hits = reopened.find_data_rows(&record(&[("priority", "P0".into())]));
        assert_eq!(hits.len(), 1);
        // ...and the snapshot came back too, so nothing is pending.
        assert!(reopened.pending_ops().is_empty());
        assert_eq!(reopened.url(), service.url());
    }
}
