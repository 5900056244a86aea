//! Process-wide last-folder / last-file record.
//!
//! Passed around as an explicit handle so tests get isolated instances.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use super::record::{read_record, write_record};
use crate::error::PersistenceWarning;

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(default)]
pub struct GlobalState {
    pub last_folder: Option<PathBuf>,
    pub last_file: Option<String>,
}

impl GlobalState {
    fn parse(text: &str) -> Result<Self, String> {
        let mut state: GlobalState = serde_json::from_str(text).map_err(|e| e.to_string())?;
        // Older records store "" for "none"
        state.last_folder = state.last_folder.filter(|p| !p.as_os_str().is_empty());
        state.last_file = state.last_file.filter(|f| !f.is_empty());
        Ok(state)
    }
}

/// Owner of the global record and where it lives
#[derive(Debug)]
pub struct GlobalStateHandle {
    /// None keeps the record in memory only
    path: Option<PathBuf>,
    state: GlobalState,
    dirty: bool,
}

impl GlobalStateHandle {
    /// Load the record at `path`. Absent, truncated or malformed records load as empty.
    pub fn open(path: Option<PathBuf>) -> (Self, Option<PersistenceWarning>) {
        let mut warning = None;
        let state = match path.as_deref().map(|p| read_record(p, GlobalState::parse)) {
            Some(Ok(Some(state))) => state,
            Some(Ok(None)) | None => GlobalState::default(),
            Some(Err(w)) => {
                warn!("⚠️  {}; starting without a last folder", w);
                warning = Some(w);
                GlobalState::default()
            }
        };
        debug!("Global state: {:?}", state);

        (
            Self {
                path,
                state,
                dirty: false,
            },
            warning,
        )
    }

    pub fn in_memory() -> Self {
        Self {
            path: None,
            state: GlobalState::default(),
            dirty: false,
        }
    }

    pub fn get(&self) -> &GlobalState {
        &self.state
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Record the active folder and file; written on the next `persist`
    pub fn update(&mut self, folder: Option<&Path>, file: Option<&str>) {
        let next = GlobalState {
            last_folder: folder.map(Path::to_path_buf),
            last_file: file.map(str::to_string),
        };
        if next != self.state {
            self.state = next;
            self.dirty = true;
        }
    }

    /// Write the record if it changed
    pub fn persist(&mut self) -> Result<(), PersistenceWarning> {
        if !self.dirty {
            return Ok(());
        }
        let Some(path) = &self.path else {
            self.dirty = false;
            return Ok(());
        };
        write_record(path, &self.state)?;
        self.dirty = false;
        debug!("💾 Global state saved to {}", path.display());
        Ok(())
    }
}
