// Persistence port for the document + snapshot pair. The core defines WHAT
// it needs persisted; the infra layer decides where the bytes go.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::diff::Snapshot;
use super::model::Document;

/// Everything a later process run needs to resume incremental syncing:
/// the full section content plus each section's last confirmed range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedState {
    pub document: Document,
    #[serde(default)]
    pub snapshot: Snapshot,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("state file is corrupt: {0}")]
    Corrupt(String),
}

/// Local persistence boundary. Implementations never talk to the remote
/// spreadsheet API.
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn load(&self) -> Result<PersistedState, StoreError>;
    async fn save(&self, state: &PersistedState) -> Result<(), StoreError>;
}
