//! Runtime configuration.
//!
//! Read from `<config_dir>/cullspeed/config.json`. Every field has a default,
//! unknown fields are ignored, and a missing or malformed file falls back to
//! defaults.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

const APP_DIR: &str = "cullspeed";
const CONFIG_FILE_NAME: &str = "config.json";
const GLOBAL_STATE_FILE_NAME: &str = "global_state.json";
const CATALOG_FILE_NAME: &str = "previews.db";

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Decode workers; None means one per available core
    pub worker_threads: Option<usize>,
    /// In-memory thumbnail budget in bytes
    pub memory_budget_bytes: usize,
    /// In-memory thumbnail budget in entries
    pub max_cached_entries: usize,
    /// Per-decode wall-clock limit
    pub decode_timeout_ms: u64,
    /// Delay before a mark change is written to disk
    pub session_debounce_ms: u64,
    /// Accept an embedded RAW preview whose long edge reaches this fraction of the request
    pub embedded_preview_tolerance: f32,
    /// Persist RAW previews across sessions
    pub disk_cache_enabled: bool,
    /// Byte budget of the persistent preview tier
    pub disk_cache_budget_bytes: u64,
    /// Override for the preview file directory
    pub cache_dir: Option<PathBuf>,
    /// Override for the preview catalog database
    pub catalog_path: Option<PathBuf>,
    /// Override for the global last-folder record
    pub global_state_path: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            worker_threads: None,
            memory_budget_bytes: 512 * 1024 * 1024,
            max_cached_entries: 4096,
            decode_timeout_ms: 30_000,
            session_debounce_ms: 400,
            embedded_preview_tolerance: 0.75,
            disk_cache_enabled: true,
            disk_cache_budget_bytes: 1024 * 1024 * 1024,
            cache_dir: None,
            catalog_path: None,
            global_state_path: None,
        }
    }
}

impl Config {
    /// Load from the standard config location
    pub fn load() -> Self {
        match dirs::config_dir() {
            Some(dir) => Self::load_from(&dir.join(APP_DIR).join(CONFIG_FILE_NAME)),
            None => {
                warn!("⚠️  No config directory found, using defaults");
                Self::default()
            }
        }
    }

    /// Load from an explicit path; never fails
    pub fn load_from(path: &Path) -> Self {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                debug!("No config at {}, using defaults", path.display());
                return Self::default();
            }
            Err(err) => {
                warn!("⚠️  Could not read config {}: {}", path.display(), err);
                return Self::default();
            }
        };
        match serde_json::from_str(&content) {
            Ok(config) => config,
            Err(err) => {
                warn!("⚠️  Malformed config {}: {}, using defaults", path.display(), err);
                Self::default()
            }
        }
    }

    /// Keep every piece of state under `base` (used by tests and portable installs)
    pub fn rooted_at(base: &Path) -> Self {
        Self {
            cache_dir: Some(base.join("previews")),
            catalog_path: Some(base.join(CATALOG_FILE_NAME)),
            global_state_path: Some(base.join(GLOBAL_STATE_FILE_NAME)),
            ..Self::default()
        }
    }

    pub fn workers(&self) -> usize {
        self.worker_threads
            .filter(|&n| n > 0)
            .unwrap_or_else(|| {
                std::thread::available_parallelism()
                    .map(|n| n.get())
                    .unwrap_or(4)
            })
    }

    pub fn decode_timeout(&self) -> Duration {
        Duration::from_millis(self.decode_timeout_ms.max(1))
    }

    pub fn session_debounce(&self) -> Duration {
        Duration::from_millis(self.session_debounce_ms)
    }

    /// Directory holding persisted preview JPEGs.
    /// Returns ~/.cache/cullspeed/previews on Linux
    pub fn preview_cache_dir(&self) -> Option<PathBuf> {
        self.cache_dir.clone().or_else(|| {
            dirs_next::cache_dir()
                .or_else(dirs_next::home_dir)
                .map(|dir| dir.join(APP_DIR).join("previews"))
        })
    }

    /// Catalog database of the persistent tier.
    /// - Linux: ~/.local/share/cullspeed/previews.db
    /// - macOS: ~/Library/Application Support/cullspeed/previews.db
    pub fn catalog_path(&self) -> Option<PathBuf> {
        self.catalog_path.clone().or_else(|| {
            dirs::data_dir()
                .or_else(dirs::home_dir)
                .map(|dir| dir.join(APP_DIR).join(CATALOG_FILE_NAME))
        })
    }

    /// Well-known location of the global last-folder record
    pub fn global_state_path(&self) -> Option<PathBuf> {
        self.global_state_path.clone().or_else(|| {
            dirs::config_dir()
                .or_else(dirs::home_dir)
                .map(|dir| dir.join(APP_DIR).join(GLOBAL_STATE_FILE_NAME))
        })
    }
}
