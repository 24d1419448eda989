pub mod diff;
pub mod layout;
pub mod model;
pub mod state_store;
pub mod sync_service;

pub use diff::{diff, OpKind, Snapshot, WriteOp};
pub use layout::{allocate, Range};
pub use model::{
    CellValue, ColumnSpec, DataRow, Document, DocumentStats, FormatKind, ModelError, SectionKind,
};
pub use state_store::{PersistedState, StateStore, StoreError};
pub use sync_service::{ApiError, OpOutcome, SheetService, SpreadsheetApi, SyncError, SyncStats};
