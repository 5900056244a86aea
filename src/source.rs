//! Image Source Resolver
//!
//! Enumerates the supported images of a folder (root, `_KEEPS/`, `_REJECTS/`)
//! in a deterministic order and diffs successive listings so callers can
//! reconcile marks and cached previews without a full reset.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::error::EnumerationWarning;
use crate::raw::FormatClass;
use crate::state::data::{FileIdentity, Fingerprint, Location};

/// Ordered snapshot of the images in a folder
#[derive(Debug, Clone, Default)]
pub struct Listing {
    folder: PathBuf,
    files: Vec<FileIdentity>,
    warnings: Vec<EnumerationWarning>,
}

/// Difference between two listings of the same folder.
/// A rename shows up as one removal plus one addition.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListingDiff {
    pub added: Vec<FileIdentity>,
    pub removed: Vec<FileIdentity>,
    /// Same key, different fingerprint: (previous, current)
    pub modified: Vec<(FileIdentity, FileIdentity)>,
}

impl ListingDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.modified.is_empty()
    }
}

/// Enumerate the supported images of `folder`.
///
/// Never fails as a whole: unreadable entries (and an unreadable folder)
/// become warnings and are left out of the listing.
pub fn list_images(folder: &Path) -> Listing {
    let mut files = Vec::new();
    let mut warnings = Vec::new();

    if !folder.is_dir() {
        warn!("⚠️  {} is not a readable folder", folder.display());
        warnings.push(EnumerationWarning {
            path: folder.to_path_buf(),
            reason: "not a readable directory".to_string(),
        });
        return Listing {
            folder: folder.to_path_buf(),
            files,
            warnings,
        };
    }

    for location in Location::ALL {
        let dir = location.dir_in(folder);
        if location != Location::Root && !dir.is_dir() {
            continue;
        }
        scan_dir(&dir, location, &mut files, &mut warnings);
    }

    files.sort_by(|a, b| a.name.cmp(&b.name).then(a.location.cmp(&b.location)));

    debug!(
        "🔍 Listed {} images in {} ({} warnings)",
        files.len(),
        folder.display(),
        warnings.len()
    );

    Listing {
        folder: folder.to_path_buf(),
        files,
        warnings,
    }
}

/// Collect the direct children of `dir` that are supported images
fn scan_dir(
    dir: &Path,
    location: Location,
    files: &mut Vec<FileIdentity>,
    warnings: &mut Vec<EnumerationWarning>,
) {
    for entry in WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .follow_links(true)
        .sort_by_file_name()
    {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                let path = err.path().map(Path::to_path_buf).unwrap_or_else(|| dir.to_path_buf());
                warn!("⚠️  Skipping {}: {}", path.display(), err);
                warnings.push(EnumerationWarning {
                    path,
                    reason: err.to_string(),
                });
                continue;
            }
        };

        if !entry.file_type().is_file() {
            continue;
        }

        // Unsupported extensions are excluded silently
        let Some(format) = FormatClass::from_path(entry.path()) else {
            continue;
        };

        let Some(name) = entry.file_name().to_str() else {
            warnings.push(EnumerationWarning {
                path: entry.path().to_path_buf(),
                reason: "file name is not valid UTF-8".to_string(),
            });
            continue;
        };

        match entry.metadata() {
            Ok(metadata) => {
                let fingerprint = Fingerprint::from_metadata(&metadata);
                files.push(FileIdentity::new(name, location, fingerprint, format));
            }
            Err(err) => {
                warn!("⚠️  Skipping {}: {}", entry.path().display(), err);
                warnings.push(EnumerationWarning {
                    path: entry.path().to_path_buf(),
                    reason: err.to_string(),
                });
            }
        }
    }
}

impl Listing {
    /// Build a listing from already-known identities (sorted the same way `list_images` sorts)
    pub fn from_files(folder: &Path, mut files: Vec<FileIdentity>) -> Self {
        files.sort_by(|a, b| a.name.cmp(&b.name).then(a.location.cmp(&b.location)));
        Self {
            folder: folder.to_path_buf(),
            files,
            warnings: Vec::new(),
        }
    }

    pub fn folder(&self) -> &Path {
        &self.folder
    }

    pub fn files(&self) -> &[FileIdentity] {
        &self.files
    }

    pub fn warnings(&self) -> &[EnumerationWarning] {
        &self.warnings
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&FileIdentity> {
        self.files.iter().find(|f| f.key == key)
    }

    pub fn index_of(&self, key: &str) -> Option<usize> {
        self.files.iter().position(|f| f.key == key)
    }

    /// Compare against a newer listing of the same folder
    pub fn diff(&self, newer: &Listing) -> ListingDiff {
        let before: HashMap<&str, &FileIdentity> =
            self.files.iter().map(|f| (f.key.as_str(), f)).collect();
        let after: HashMap<&str, &FileIdentity> =
            newer.files.iter().map(|f| (f.key.as_str(), f)).collect();

        let mut diff = ListingDiff::default();
        for file in &newer.files {
            match before.get(file.key.as_str()) {
                None => diff.added.push(file.clone()),
                Some(old) if old.fingerprint != file.fingerprint => {
                    diff.modified.push(((*old).clone(), file.clone()))
                }
                Some(_) => {}
            }
        }
        for file in &self.files {
            if !after.contains_key(file.key.as_str()) {
                diff.removed.push(file.clone());
            }
        }
        diff
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_lists_supported_files_in_name_order() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("c.jpg"), b"c").unwrap();
        fs::write(dir.path().join("a.NEF"), b"a").unwrap();
        fs::write(dir.path().join("b.png"), b"b").unwrap();
        fs::write(dir.path().join("notes.txt"), b"x").unwrap();
        fs::create_dir(dir.path().join("nested")).unwrap();
        fs::write(dir.path().join("nested").join("deep.jpg"), b"d").unwrap();

        let listing = list_images(dir.path());
        let keys: Vec<_> = listing.files().iter().map(|f| f.key.as_str()).collect();
        assert_eq!(keys, vec!["a.NEF", "b.png", "c.jpg"]);
        assert!(listing.warnings().is_empty());
    }

    #[test]
    fn test_includes_triage_subfolders_sorted_by_name() {
        let dir = tempdir().unwrap();
        fs::create_dir(dir.path().join("_KEEPS")).unwrap();
        fs::create_dir(dir.path().join("_REJECTS")).unwrap();
        fs::write(dir.path().join("b.jpg"), b"b").unwrap();
        fs::write(dir.path().join("_KEEPS").join("a.jpg"), b"a").unwrap();
        fs::write(dir.path().join("_REJECTS").join("c.jpg"), b"c").unwrap();
        fs::write(dir.path().join("_KEEPS").join("b.jpg"), b"b2").unwrap();

        let listing = list_images(dir.path());
        let keys: Vec<_> = listing.files().iter().map(|f| f.key.as_str()).collect();
        assert_eq!(keys, vec!["_KEEPS/a.jpg", "b.jpg", "_KEEPS/b.jpg", "_REJECTS/c.jpg"]);
        assert_eq!(listing.get("_REJECTS/c.jpg").unwrap().location, Location::Rejects);
    }

    #[test]
    fn test_missing_folder_is_empty_with_warning() {
        let dir = tempdir().unwrap();
        let listing = list_images(&dir.path().join("does-not-exist"));
        assert!(listing.is_empty());
        assert_eq!(listing.warnings().len(), 1);
    }

    #[test]
    fn test_diff_reports_added_removed_and_modified() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("keep.jpg"), b"same").unwrap();
        fs::write(dir.path().join("gone.jpg"), b"gone").unwrap();
        fs::write(dir.path().join("edit.jpg"), b"short").unwrap();
        let first = list_images(dir.path());

        fs::remove_file(dir.path().join("gone.jpg")).unwrap();
        fs::write(dir.path().join("new.jpg"), b"new").unwrap();
        fs::write(dir.path().join("edit.jpg"), b"much longer content").unwrap();
        let second = list_images(dir.path());

        let diff = first.diff(&second);
        assert_eq!(diff.added.len(), 1);
        assert_eq!(diff.added[0].key, "new.jpg");
        assert_eq!(diff.removed.len(), 1);
        assert_eq!(diff.removed[0].key, "gone.jpg");
        assert_eq!(diff.modified.len(), 1);
        assert_eq!(diff.modified[0].1.key, "edit.jpg");

        assert!(second.diff(&second).is_empty());
    }
}
