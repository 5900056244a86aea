//! Mark Store / Session State
//!
//! One `MarkStore` per open folder. It owns the in-memory `SessionState`
//! (authoritative while the folder is open) and projects it to
//! `<folder>/.cullspeed_session.json`, either right away or through a
//! debounced background writer.
//!
//! Only explicit marks are stored. A file without an entry has the mark its
//! location implies (Keep inside `_KEEPS/`, Reject inside `_REJECTS/`,
//! Unmarked at the root), so a record never repeats what the filesystem
//! already says.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::data::{relative_key, FileIdentity, Location, Mark};
use super::record::{read_record, write_record};
use crate::error::PersistenceWarning;
use crate::source::Listing;

/// Per-folder record file name
pub const SESSION_FILE_NAME: &str = ".cullspeed_session.json";

/// On-disk projection of a session
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(default)]
pub struct SessionRecord {
    pub marks: BTreeMap<String, Mark>,
    pub last_viewed: Option<String>,
}

/// Parse a record, accepting the older flat `{"name": "keep"}` layout.
/// The flag is true when the flat layout was read.
fn parse_session(text: &str) -> Result<(SessionRecord, bool), String> {
    let value: Value = serde_json::from_str(text).map_err(|e| e.to_string())?;
    let Value::Object(map) = value else {
        return Err("expected a JSON object".to_string());
    };

    if map.contains_key("marks") || map.contains_key("last_viewed") {
        let record = serde_json::from_value(Value::Object(map)).map_err(|e| e.to_string())?;
        return Ok((record, false));
    }

    let marks = map
        .into_iter()
        .filter_map(|(name, value)| serde_json::from_value::<Mark>(value).ok().map(|m| (name, m)))
        .collect();
    Ok((
        SessionRecord {
            marks,
            last_viewed: None,
        },
        true,
    ))
}

/// Three-way merge: keys this process did not touch since `base` take the on-disk value
fn merge_records(base: &SessionRecord, mine: &SessionRecord, theirs: &SessionRecord) -> SessionRecord {
    let keys: BTreeSet<&String> = base
        .marks
        .keys()
        .chain(mine.marks.keys())
        .chain(theirs.marks.keys())
        .collect();

    let mut marks = BTreeMap::new();
    for key in keys {
        let b = base.marks.get(key);
        let m = mine.marks.get(key);
        let t = theirs.marks.get(key);
        let chosen = if m == b && t != b { t } else { m };
        if let Some(mark) = chosen {
            marks.insert(key.clone(), *mark);
        }
    }

    let last_viewed = if mine.last_viewed == base.last_viewed {
        theirs.last_viewed.clone()
    } else {
        mine.last_viewed.clone()
    };

    SessionRecord { marks, last_viewed }
}

/// Keep / reject / unmarked tallies over a listing
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MarkCounts {
    pub keep: usize,
    pub reject: usize,
    pub unmarked: usize,
}

/// In-memory marks of one folder
#[derive(Debug, Clone, Default)]
pub struct SessionState {
    folder: PathBuf,
    /// Explicit marks only; each differs from its file's implied mark
    marks: HashMap<String, Mark>,
    last_viewed: Option<String>,
    /// Bumped on every mark change
    revision: u64,
}

impl SessionState {
    pub fn empty(folder: &Path) -> Self {
        Self {
            folder: folder.to_path_buf(),
            ..Self::default()
        }
    }

    /// Build from a record, keeping only entries for files in `listing`.
    /// Returns the state, the dropped keys, and whether any entry was normalized away.
    ///
    /// Flat records name files by bare file name wherever they live, so a
    /// `legacy` entry is looked up at the root first, then in the triage
    /// subfolders, and kept under the key it resolved to.
    fn from_record(
        folder: &Path,
        record: &SessionRecord,
        listing: &Listing,
        legacy: bool,
    ) -> (Self, Vec<String>, bool) {
        let mut state = Self::empty(folder);
        let mut dropped = Vec::new();
        let mut normalized = false;

        for (key, mark) in &record.marks {
            let found = listing.get(key).or_else(|| {
                if !legacy {
                    return None;
                }
                Location::ALL
                    .iter()
                    .find_map(|loc| listing.get(&relative_key(key, *loc)))
            });
            match found {
                None => dropped.push(key.clone()),
                Some(identity) if *mark == identity.location.implied_mark() => normalized = true,
                Some(identity) => {
                    normalized |= identity.key != *key;
                    state.marks.insert(identity.key.clone(), *mark);
                }
            }
        }

        state.last_viewed = record.last_viewed.clone().filter(|key| listing.get(key).is_some());
        normalized |= state.last_viewed != record.last_viewed;
        (state, dropped, normalized)
    }

    pub fn folder(&self) -> &Path {
        &self.folder
    }

    /// Effective mark: the explicit one, or what the location implies
    pub fn mark_of(&self, identity: &FileIdentity) -> Mark {
        self.marks
            .get(&identity.key)
            .copied()
            .unwrap_or_else(|| identity.location.implied_mark())
    }

    pub fn explicit_mark(&self, key: &str) -> Option<Mark> {
        self.marks.get(key).copied()
    }

    pub fn explicit_count(&self) -> usize {
        self.marks.len()
    }

    pub fn last_viewed(&self) -> Option<&str> {
        self.last_viewed.as_deref()
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn counts(&self, listing: &Listing) -> MarkCounts {
        let mut counts = MarkCounts::default();
        for identity in listing.files() {
            match self.mark_of(identity) {
                Mark::Keep => counts.keep += 1,
                Mark::Reject => counts.reject += 1,
                Mark::Unmarked => counts.unmarked += 1,
            }
        }
        counts
    }

    /// Returns true if the effective mark changed
    fn set(&mut self, identity: &FileIdentity, mark: Mark) -> bool {
        let changed = if mark == identity.location.implied_mark() {
            self.marks.remove(&identity.key).is_some()
        } else {
            self.marks.insert(identity.key.clone(), mark) != Some(mark)
        };
        if changed {
            self.revision += 1;
        }
        changed
    }

    /// Drop explicit marks of keys no longer in `listing`
    fn retain_present(&mut self, listing: &Listing) -> Vec<String> {
        let mut dropped: Vec<String> = self
            .marks
            .keys()
            .filter(|key| listing.get(key).is_none())
            .cloned()
            .collect();
        dropped.sort();
        for key in &dropped {
            self.marks.remove(key);
        }
        if self.last_viewed.as_deref().is_some_and(|key| listing.get(key).is_none()) {
            self.last_viewed = None;
        }
        if !dropped.is_empty() {
            self.revision += 1;
        }
        dropped
    }

    fn to_record(&self) -> SessionRecord {
        SessionRecord {
            marks: self.marks.iter().map(|(k, v)| (k.clone(), *v)).collect(),
            last_viewed: self.last_viewed.clone(),
        }
    }

    /// Take on entries another writer changed on disk, unless we changed them since
    fn adopt_external(&mut self, mine: &SessionRecord, merged: &SessionRecord) {
        let keys: BTreeSet<&String> = mine.marks.keys().chain(merged.marks.keys()).collect();
        for key in keys {
            let ours = mine.marks.get(key);
            let agreed = merged.marks.get(key);
            if ours == agreed || self.marks.get(key.as_str()) != ours {
                continue;
            }
            match agreed {
                Some(mark) => self.marks.insert(key.clone(), *mark),
                None => self.marks.remove(key.as_str()),
            };
        }
        if mine.last_viewed != merged.last_viewed && self.last_viewed == mine.last_viewed {
            self.last_viewed = merged.last_viewed.clone();
        }
    }
}

/// When mark changes reach the disk
#[derive(Debug, Clone)]
pub enum WriteMode {
    /// Every change is written before `set_mark` returns
    Immediate,
    /// Changes are coalesced and written `interval` after the first one
    Debounced { runtime: Handle, interval: Duration },
}

struct StoreInner {
    state: SessionState,
    /// Record as last read from or written to disk
    base: SessionRecord,
    /// Mutation counter (marks and last-viewed)
    changes: u64,
    /// Value of `changes` at the last successful write
    written: u64,
    warnings: Vec<PersistenceWarning>,
}

struct StoreShared {
    path: PathBuf,
    inner: Mutex<StoreInner>,
    /// Serializes snapshot-merge-write cycles
    write_lock: Mutex<()>,
}

impl StoreShared {
    fn lock(&self) -> MutexGuard<'_, StoreInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Write if anything changed since the last write. Returns whether a write happened.
    fn write(&self) -> Result<bool, PersistenceWarning> {
        let _serial = self.write_lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        let (mine, base, changes) = {
            let inner = self.lock();
            if inner.changes == inner.written {
                return Ok(false);
            }
            (inner.state.to_record(), inner.base.clone(), inner.changes)
        };

        let theirs = match read_record(&self.path, parse_session) {
            Ok(Some((record, _))) => record,
            Ok(None) => SessionRecord::default(),
            Err(warning) => {
                debug!("Overwriting unusable session record: {}", warning);
                base.clone()
            }
        };
        let merged = merge_records(&base, &mine, &theirs);
        let result = write_record(&self.path, &merged);

        let mut inner = self.lock();
        match result {
            Ok(()) => {
                inner.state.adopt_external(&mine, &merged);
                inner.base = merged;
                inner.written = changes;
                Ok(true)
            }
            Err(warning) => {
                warn!("⚠️  Could not save session: {}", warning);
                inner.warnings.push(warning.clone());
                Err(warning)
            }
        }
    }
}

/// Owner of a folder's marks and their durable record
pub struct MarkStore {
    shared: Arc<StoreShared>,
    writer: Option<mpsc::UnboundedSender<()>>,
}

impl MarkStore {
    /// Load the folder's record and reconcile it with the current listing.
    ///
    /// Never fails: an unreadable or malformed record yields an empty session
    /// and a warning (see `warnings`).
    pub fn open(folder: &Path, listing: &Listing, mode: WriteMode) -> Self {
        let path = folder.join(SESSION_FILE_NAME);
        let mut warnings = Vec::new();

        let (record, legacy) = match read_record(&path, parse_session) {
            Ok(Some(parsed)) => parsed,
            Ok(None) => {
                debug!("No session record in {}", folder.display());
                (SessionRecord::default(), false)
            }
            Err(warning) => {
                warn!("⚠️  {}; all marks reset", warning);
                warnings.push(warning);
                (SessionRecord::default(), false)
            }
        };

        let (state, dropped, normalized) = SessionState::from_record(folder, &record, listing, legacy);
        if !dropped.is_empty() {
            warn!(
                "⚠️  Dropped marks for {} files no longer in {}",
                dropped.len(),
                folder.display()
            );
        }
        if legacy {
            info!("🔄 Converting session record of {} to the current format", folder.display());
        }
        info!(
            "📂 Session loaded for {} ({} explicit marks)",
            folder.display(),
            state.explicit_count()
        );

        let needs_rewrite = legacy || normalized || !dropped.is_empty();
        let shared = Arc::new(StoreShared {
            path,
            inner: Mutex::new(StoreInner {
                state,
                base: record,
                changes: u64::from(needs_rewrite),
                written: 0,
                warnings,
            }),
            write_lock: Mutex::new(()),
        });

        let writer = match mode {
            WriteMode::Immediate => None,
            WriteMode::Debounced { runtime, interval } => {
                let (tx, rx) = mpsc::unbounded_channel();
                runtime.spawn(debounce_writes(Arc::clone(&shared), rx, interval));
                Some(tx)
            }
        };

        Self { shared, writer }
    }

    pub fn session_path(&self) -> &Path {
        &self.shared.path
    }

    /// Copy of the current in-memory state
    pub fn snapshot(&self) -> SessionState {
        self.shared.lock().state.clone()
    }

    pub fn mark_of(&self, identity: &FileIdentity) -> Mark {
        self.shared.lock().state.mark_of(identity)
    }

    pub fn revision(&self) -> u64 {
        self.shared.lock().state.revision()
    }

    /// Record a mark in memory and schedule a durable write.
    /// Returns false when the effective mark was already `mark`.
    pub fn set_mark(&self, identity: &FileIdentity, mark: Mark) -> bool {
        let changed = {
            let mut inner = self.shared.lock();
            let changed = inner.state.set(identity, mark);
            if changed {
                inner.changes += 1;
            }
            changed
        };
        if changed {
            debug!("Marked {} as {:?}", identity.key, mark);
            self.schedule_write();
        }
        changed
    }

    pub fn set_last_viewed(&self, key: Option<&str>) {
        {
            let mut inner = self.shared.lock();
            if inner.state.last_viewed.as_deref() == key {
                return;
            }
            inner.state.last_viewed = key.map(str::to_string);
            inner.changes += 1;
        }
        self.schedule_write();
    }

    /// Forget explicit marks for these keys (their intent is now recorded by location)
    pub fn clear_marks<'a, I>(&self, keys: I) -> usize
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut inner = self.shared.lock();
        let mut cleared = 0;
        for key in keys {
            if inner.state.marks.remove(key).is_some() {
                cleared += 1;
            }
        }
        if cleared > 0 {
            inner.state.revision += 1;
            inner.changes += 1;
        }
        cleared
    }

    /// Drop marks of files that disappeared from the folder
    pub fn reconcile(&self, listing: &Listing) -> Vec<String> {
        let dropped = {
            let mut inner = self.shared.lock();
            let dropped = inner.state.retain_present(listing);
            if !dropped.is_empty() {
                inner.changes += 1;
            }
            dropped
        };
        if !dropped.is_empty() {
            warn!("⚠️  Dropped marks for {} vanished files", dropped.len());
            self.schedule_write();
        }
        dropped
    }

    /// Write any pending change now
    pub fn flush(&self) -> Result<bool, PersistenceWarning> {
        self.shared.write()
    }

    pub fn warnings(&self) -> Vec<PersistenceWarning> {
        self.shared.lock().warnings.clone()
    }

    fn schedule_write(&self) {
        match &self.writer {
            Some(tx) => {
                if tx.send(()).is_err() {
                    let _ = self.shared.write();
                }
            }
            None => {
                let _ = self.shared.write();
            }
        }
    }
}

impl Drop for MarkStore {
    fn drop(&mut self) {
        let _ = self.shared.write();
    }
}

impl std::fmt::Debug for MarkStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MarkStore")
            .field("path", &self.shared.path)
            .field("debounced", &self.writer.is_some())
            .finish()
    }
}

async fn debounce_writes(
    shared: Arc<StoreShared>,
    mut rx: mpsc::UnboundedReceiver<()>,
    interval: Duration,
) {
    while rx.recv().await.is_some() {
        tokio::time::sleep(interval).await;
        while rx.try_recv().is_ok() {}

        let shared = Arc::clone(&shared);
        match tokio::task::spawn_blocking(move || shared.write()).await {
            Ok(Ok(true)) => debug!("💾 Session saved"),
            Ok(_) => {}
            Err(err) => warn!("⚠️  Session writer failed: {}", err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::list_images;
    use std::fs;
    use tempfile::{tempdir, TempDir};

    fn folder_with(names: &[&str]) -> (TempDir, Listing) {
        let dir = tempdir().unwrap();
        for name in names {
            let path = dir.path().join(name);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).unwrap();
            }
            fs::write(path, name.as_bytes()).unwrap();
        }
        let listing = list_images(dir.path());
        (dir, listing)
    }

    fn read_json(dir: &TempDir) -> Value {
        let text = fs::read_to_string(dir.path().join(SESSION_FILE_NAME)).unwrap();
        serde_json::from_str(&text).unwrap()
    }

    #[test]
    fn test_marks_survive_reopen() {
        let (dir, listing) = folder_with(&["a.jpg", "b.jpg", "c.jpg"]);
        {
            let store = MarkStore::open(dir.path(), &listing, WriteMode::Immediate);
            store.set_mark(listing.get("a.jpg").unwrap(), Mark::Keep);
            store.set_mark(listing.get("b.jpg").unwrap(), Mark::Reject);
            store.set_last_viewed(Some("b.jpg"));
        }

        let store = MarkStore::open(dir.path(), &listing, WriteMode::Immediate);
        let state = store.snapshot();
        assert_eq!(state.mark_of(listing.get("a.jpg").unwrap()), Mark::Keep);
        assert_eq!(state.mark_of(listing.get("b.jpg").unwrap()), Mark::Reject);
        assert_eq!(state.mark_of(listing.get("c.jpg").unwrap()), Mark::Unmarked);
        assert_eq!(state.last_viewed(), Some("b.jpg"));
        assert!(store.warnings().is_empty());
    }

    #[test]
    fn test_last_call_wins_per_file() {
        let (dir, listing) = folder_with(&["a.jpg", "b.jpg"]);
        let store = MarkStore::open(dir.path(), &listing, WriteMode::Immediate);
        let a = listing.get("a.jpg").unwrap();
        let b = listing.get("b.jpg").unwrap();

        store.set_mark(a, Mark::Keep);
        store.set_mark(b, Mark::Keep);
        store.set_mark(a, Mark::Reject);
        store.set_mark(b, Mark::Unmarked);
        store.set_mark(a, Mark::Keep);

        assert_eq!(store.mark_of(a), Mark::Keep);
        assert_eq!(store.mark_of(b), Mark::Unmarked);
        assert_eq!(read_json(&dir)["marks"], serde_json::json!({ "a.jpg": "keep" }));
    }

    #[test]
    fn test_corrupt_record_opens_empty() {
        let (dir, listing) = folder_with(&["a.jpg"]);
        fs::write(dir.path().join(SESSION_FILE_NAME), "{\"marks\": {\"a.jpg\": ").unwrap();

        let store = MarkStore::open(dir.path(), &listing, WriteMode::Immediate);
        assert_eq!(store.mark_of(listing.get("a.jpg").unwrap()), Mark::Unmarked);
        assert!(matches!(store.warnings()[0], PersistenceWarning::Malformed { .. }));

        // The next change replaces the broken record
        store.set_mark(listing.get("a.jpg").unwrap(), Mark::Reject);
        assert_eq!(read_json(&dir)["marks"]["a.jpg"], "reject");
    }

    #[test]
    fn test_flat_record_is_read_and_rewritten() {
        let (dir, listing) = folder_with(&["a.jpg", "b.jpg"]);
        fs::write(
            dir.path().join(SESSION_FILE_NAME),
            r#"{ "a.jpg": "keep", "b.jpg": "reject", "gone.jpg": "keep" }"#,
        )
        .unwrap();

        let store = MarkStore::open(dir.path(), &listing, WriteMode::Immediate);
        assert_eq!(store.mark_of(listing.get("a.jpg").unwrap()), Mark::Keep);
        assert_eq!(store.mark_of(listing.get("b.jpg").unwrap()), Mark::Reject);

        assert!(store.flush().unwrap());
        let json = read_json(&dir);
        assert_eq!(json["marks"], serde_json::json!({ "a.jpg": "keep", "b.jpg": "reject" }));
        assert!(json["last_viewed"].is_null());
    }

    #[test]
    fn test_flat_record_finds_files_in_triage_subfolders() {
        let (dir, listing) = folder_with(&["_KEEPS/a.jpg", "_REJECTS/b.jpg", "c.jpg"]);
        fs::write(
            dir.path().join(SESSION_FILE_NAME),
            r#"{ "a.jpg": "reject", "b.jpg": "reject", "c.jpg": "keep" }"#,
        )
        .unwrap();

        let store = MarkStore::open(dir.path(), &listing, WriteMode::Immediate);
        assert_eq!(store.mark_of(listing.get("_KEEPS/a.jpg").unwrap()), Mark::Reject);
        assert_eq!(store.mark_of(listing.get("_REJECTS/b.jpg").unwrap()), Mark::Reject);
        assert_eq!(store.mark_of(listing.get("c.jpg").unwrap()), Mark::Keep);

        assert!(store.flush().unwrap());
        assert_eq!(
            read_json(&dir)["marks"],
            serde_json::json!({ "_KEEPS/a.jpg": "reject", "c.jpg": "keep" })
        );
    }

    #[test]
    fn test_current_record_is_not_resolved_by_file_name() {
        let (dir, listing) = folder_with(&["_KEEPS/a.jpg"]);
        fs::write(
            dir.path().join(SESSION_FILE_NAME),
            r#"{ "marks": { "a.jpg": "reject" }, "last_viewed": null }"#,
        )
        .unwrap();

        let store = MarkStore::open(dir.path(), &listing, WriteMode::Immediate);
        assert_eq!(store.mark_of(listing.get("_KEEPS/a.jpg").unwrap()), Mark::Keep);
    }

    #[test]
    fn test_unknown_fields_are_ignored() {
        let (dir, listing) = folder_with(&["a.jpg"]);
        fs::write(
            dir.path().join(SESSION_FILE_NAME),
            r#"{ "marks": { "a.jpg": "keep" }, "last_viewed": null, "zoom": 2 }"#,
        )
        .unwrap();

        let store = MarkStore::open(dir.path(), &listing, WriteMode::Immediate);
        assert_eq!(store.mark_of(listing.get("a.jpg").unwrap()), Mark::Keep);
        assert!(store.warnings().is_empty());
    }

    #[test]
    fn test_location_implied_mark_is_not_stored() {
        let (dir, listing) = folder_with(&["_KEEPS/a.jpg", "_REJECTS/b.jpg"]);
        let store = MarkStore::open(dir.path(), &listing, WriteMode::Immediate);
        let kept = listing.get("_KEEPS/a.jpg").unwrap();

        assert_eq!(store.mark_of(kept), Mark::Keep);
        assert!(!store.set_mark(kept, Mark::Keep));
        assert!(store.set_mark(kept, Mark::Unmarked));
        assert_eq!(store.snapshot().explicit_mark("_KEEPS/a.jpg"), Some(Mark::Unmarked));

        assert!(store.set_mark(kept, Mark::Keep));
        assert_eq!(store.snapshot().explicit_count(), 0);
        assert_eq!(store.snapshot().counts(&listing), MarkCounts { keep: 1, reject: 1, unmarked: 0 });
    }

    #[test]
    fn test_flush_keeps_entries_edited_elsewhere() {
        let (dir, listing) = folder_with(&["a.jpg", "b.jpg"]);
        let store = MarkStore::open(dir.path(), &listing, WriteMode::Immediate);
        store.set_mark(listing.get("a.jpg").unwrap(), Mark::Keep);

        // Another writer marks b.jpg
        fs::write(
            dir.path().join(SESSION_FILE_NAME),
            r#"{ "marks": { "a.jpg": "keep", "b.jpg": "reject" } }"#,
        )
        .unwrap();

        store.set_mark(listing.get("a.jpg").unwrap(), Mark::Reject);
        let json = read_json(&dir);
        assert_eq!(json["marks"], serde_json::json!({ "a.jpg": "reject", "b.jpg": "reject" }));
        assert_eq!(store.mark_of(listing.get("b.jpg").unwrap()), Mark::Reject);
    }

    #[test]
    fn test_merge_prefers_local_changes() {
        let base = SessionRecord {
            marks: [("a".to_string(), Mark::Keep), ("b".to_string(), Mark::Keep)].into_iter().collect(),
            last_viewed: None,
        };
        let mine = SessionRecord {
            marks: [("a".to_string(), Mark::Reject), ("b".to_string(), Mark::Keep)].into_iter().collect(),
            last_viewed: Some("a".to_string()),
        };
        let theirs = SessionRecord {
            marks: [("a".to_string(), Mark::Keep), ("c".to_string(), Mark::Reject)].into_iter().collect(),
            last_viewed: Some("c".to_string()),
        };

        let merged = merge_records(&base, &mine, &theirs);
        assert_eq!(merged.marks.get("a"), Some(&Mark::Reject));
        assert_eq!(merged.marks.get("b"), None);
        assert_eq!(merged.marks.get("c"), Some(&Mark::Reject));
        assert_eq!(merged.last_viewed.as_deref(), Some("a"));
    }

    #[test]
    fn test_reconcile_drops_vanished_files() {
        let (dir, listing) = folder_with(&["a.jpg", "b.jpg"]);
        let store = MarkStore::open(dir.path(), &listing, WriteMode::Immediate);
        store.set_mark(listing.get("a.jpg").unwrap(), Mark::Keep);
        store.set_mark(listing.get("b.jpg").unwrap(), Mark::Keep);

        fs::remove_file(dir.path().join("a.jpg")).unwrap();
        let dropped = store.reconcile(&list_images(dir.path()));
        assert_eq!(dropped, vec!["a.jpg".to_string()]);
        assert_eq!(read_json(&dir)["marks"], serde_json::json!({ "b.jpg": "keep" }));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_debounced_writes_are_coalesced() {
        let (dir, listing) = folder_with(&["a.jpg", "b.jpg"]);
        let store = MarkStore::open(
            dir.path(),
            &listing,
            WriteMode::Debounced {
                runtime: Handle::current(),
                interval: Duration::from_millis(50),
            },
        );

        store.set_mark(listing.get("a.jpg").unwrap(), Mark::Keep);
        store.set_mark(listing.get("b.jpg").unwrap(), Mark::Reject);
        assert!(!dir.path().join(SESSION_FILE_NAME).exists());

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(
            read_json(&dir)["marks"],
            serde_json::json!({ "a.jpg": "keep", "b.jpg": "reject" })
        );
        assert!(!store.flush().unwrap());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_flush_does_not_wait_for_debounce() {
        let (dir, listing) = folder_with(&["a.jpg"]);
        let store = MarkStore::open(
            dir.path(),
            &listing,
            WriteMode::Debounced {
                runtime: Handle::current(),
                interval: Duration::from_secs(60),
            },
        );
        store.set_mark(listing.get("a.jpg").unwrap(), Mark::Reject);
        assert!(store.flush().unwrap());
        assert_eq!(read_json(&dir)["marks"]["a.jpg"], "reject");
    }
}
