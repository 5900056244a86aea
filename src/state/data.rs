//! Shared data structures for triage state
//!
//! These structs are the join keys between the resolver, the mark store,
//! the thumbnail cache and the triage executor.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use crate::raw::FormatClass;

/// Subfolder receiving files marked Keep
pub const KEEPS_DIR: &str = "_KEEPS";
/// Subfolder receiving files marked Reject
pub const REJECTS_DIR: &str = "_REJECTS";

/// Triage decision attached to a file
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum Mark {
    #[default]
    Unmarked,
    Keep,
    Reject,
}

/// Where a file currently lives relative to the opened folder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Location {
    Root,
    Keeps,
    Rejects,
}

impl Location {
    /// All locations in enumeration order
    pub const ALL: [Location; 3] = [Location::Root, Location::Keeps, Location::Rejects];

    /// The mark a file has when nobody recorded one: its location already says it
    pub fn implied_mark(self) -> Mark {
        match self {
            Location::Root => Mark::Unmarked,
            Location::Keeps => Mark::Keep,
            Location::Rejects => Mark::Reject,
        }
    }

    /// The location a mark asks for
    pub fn for_mark(mark: Mark) -> Self {
        match mark {
            Mark::Unmarked => Location::Root,
            Mark::Keep => Location::Keeps,
            Mark::Reject => Location::Rejects,
        }
    }

    /// Subdirectory name, or None for the folder root
    pub fn dir_name(self) -> Option<&'static str> {
        match self {
            Location::Root => None,
            Location::Keeps => Some(KEEPS_DIR),
            Location::Rejects => Some(REJECTS_DIR),
        }
    }

    /// Absolute directory of this location inside `folder`
    pub fn dir_in(self, folder: &Path) -> PathBuf {
        match self.dir_name() {
            Some(name) => folder.join(name),
            None => folder.to_path_buf(),
        }
    }
}

/// Content-change fingerprint. A different fingerprint means different bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint {
    /// File size in bytes
    pub len: u64,
    /// Modification time in nanoseconds since the Unix epoch (0 if unavailable)
    pub modified_ns: i64,
}

impl Fingerprint {
    pub fn from_metadata(metadata: &fs::Metadata) -> Self {
        let modified_ns = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_nanos().min(i64::MAX as u128) as i64)
            .unwrap_or(0);
        Self {
            len: metadata.len(),
            modified_ns,
        }
    }
}

/// Stable identity of an image inside the opened folder
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FileIdentity {
    /// Path relative to the opened folder, `/`-separated (e.g. "a.jpg", "_KEEPS/a.jpg")
    pub key: String,
    /// Filename only
    pub name: String,
    pub location: Location,
    pub fingerprint: Fingerprint,
    pub format: FormatClass,
}

impl FileIdentity {
    pub fn new(name: &str, location: Location, fingerprint: Fingerprint, format: FormatClass) -> Self {
        Self {
            key: relative_key(name, location),
            name: name.to_string(),
            location,
            fingerprint,
            format,
        }
    }

    /// Absolute path of the file inside `folder`
    pub fn path_in(&self, folder: &Path) -> PathBuf {
        self.location.dir_in(folder).join(&self.name)
    }
}

/// Build the identity key for a file name at a location
pub fn relative_key(name: &str, location: Location) -> String {
    match location.dir_name() {
        Some(dir) => format!("{}/{}", dir, name),
        None => name.to_string(),
    }
}
