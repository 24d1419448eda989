// JSON file implementation of the StateStore port. One state file holds the
// whole document plus its last confirmed snapshot, pretty-printed so humans
// can read it.
//
// Sharing one state file between concurrent processes is unsupported: the
// last writer wins.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;

use crate::core::sheet::{PersistedState, StateStore, StoreError};

pub struct JsonStateStore {
    path: PathBuf,
}

impl JsonStateStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }
}

#[async_trait]
impl StateStore for JsonStateStore {
    async fn load(&self) -> Result<PersistedState, StoreError> {
        let text = fs::read_to_string(&self.path).await?;

        let state: PersistedState =
            serde_json::from_str(&text).map_err(|e| StoreError::Corrupt(e.to_string()))?;
        Ok(state)
    }

    async fn save(&self, state: &PersistedState) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }

        let text = serde_json::to_string_pretty(state)
            .map_err(|e| StoreError::Corrupt(e.to_string()))?;
        fs::write(&self.path, text).await?;
        Ok(())
    }
}
