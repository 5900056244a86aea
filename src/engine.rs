//! Boundary operations for the orchestrator (UI or headless driver).
//!
//! The engine ties one open folder's listing, mark store and batch state to
//! the shared thumbnail cache and the global last-folder record.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::oneshot;
use tracing::{info, warn};

use crate::cache::{CacheStats, SizeClass, ThumbnailCache, ThumbnailOutcome, ThumbnailStatus};
use crate::cancel::CancelToken;
use crate::config::Config;
use crate::error::{EngineError, EngineResult, EnumerationWarning, PersistenceWarning};
use crate::raw::preview::{Decode, PreviewDecoder};
use crate::source::{list_images, Listing};
use crate::state::data::{relative_key, FileIdentity, Location, Mark};
use crate::state::global::GlobalStateHandle;
use crate::state::session::{MarkCounts, MarkStore, WriteMode};
use crate::triage::{
    execute, BatchTriage, ConfirmedPlan, ExecutionReport, MoveOutcome, MovePlanSummary, Progress,
    TriageState,
};

/// Snapshot of the open folder for the orchestrator
#[derive(Debug, Clone)]
pub struct FolderSummary {
    pub folder: PathBuf,
    pub files: usize,
    pub counts: MarkCounts,
    /// Index of the last viewed file, if it is still present
    pub last_viewed: Option<usize>,
    pub enumeration_warnings: Vec<EnumerationWarning>,
    pub persistence_warnings: Vec<PersistenceWarning>,
}

/// What a finished batch hands back: the report, the folder as it is now,
/// and old key -> new key for everything that moved
struct BatchDone {
    report: ExecutionReport,
    listing: Listing,
    renames: HashMap<String, String>,
}

struct OpenFolder {
    listing: Listing,
    store: Arc<MarkStore>,
    triage: BatchTriage,
    focus: Option<String>,
    /// Result of a batch that is running or finished but not yet collected
    batch: Option<oneshot::Receiver<BatchDone>>,
}

impl OpenFolder {
    fn summary(&self, global_warning: Option<&PersistenceWarning>) -> FolderSummary {
        let session = self.store.snapshot();
        let mut persistence_warnings = self.store.warnings();
        persistence_warnings.extend(global_warning.cloned());
        FolderSummary {
            folder: self.listing.folder().to_path_buf(),
            files: self.listing.len(),
            counts: session.counts(&self.listing),
            last_viewed: session.last_viewed().and_then(|key| self.listing.index_of(key)),
            enumeration_warnings: self.listing.warnings().to_vec(),
            persistence_warnings,
        }
    }

    fn identity(&self, key: &str) -> EngineResult<&FileIdentity> {
        self.listing
            .get(key)
            .ok_or_else(|| EngineError::UnknownFile(key.to_string()))
    }

    /// File name of the focused file, as kept in the global record
    fn focus_name(&self) -> Option<&str> {
        let key = self.focus.as_deref()?;
        self.listing.get(key).map(|identity| identity.name.as_str())
    }
}

pub struct Engine {
    config: Config,
    runtime: Handle,
    cache: ThumbnailCache,
    global: GlobalStateHandle,
    global_warning: Option<PersistenceWarning>,
    folder: Option<OpenFolder>,
}

impl Engine {
    /// Engine with the default preview decoder
    pub fn new(config: Config, runtime: Handle) -> Self {
        let decoder = Arc::new(PreviewDecoder::new(config.embedded_preview_tolerance));
        Self::with_decoder(config, decoder, runtime)
    }

    pub fn with_decoder(config: Config, decoder: Arc<dyn Decode>, runtime: Handle) -> Self {
        let cache = ThumbnailCache::new(&config, decoder, runtime.clone());
        let (global, global_warning) = GlobalStateHandle::open(config.global_state_path());
        Self {
            config,
            runtime,
            cache,
            global,
            global_warning,
            folder: None,
        }
    }

    pub fn global(&self) -> &GlobalStateHandle {
        &self.global
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Enumerate `path`, load its session and start serving its thumbnails.
    ///
    /// Never fails: an unreadable folder opens empty and the problems are
    /// listed in the returned summary.
    pub fn open_folder(&mut self, path: &Path) -> FolderSummary {
        self.close_folder();

        let listing = list_images(path);
        self.cache.open_folder(path);
        let mode = if self.config.session_debounce_ms == 0 {
            WriteMode::Immediate
        } else {
            WriteMode::Debounced {
                runtime: self.runtime.clone(),
                interval: self.config.session_debounce(),
            }
        };
        let store = MarkStore::open(path, &listing, mode);
        let focus = store.snapshot().last_viewed().map(str::to_string);

        let open = OpenFolder {
            listing,
            store: Arc::new(store),
            triage: BatchTriage::new(),
            focus,
            batch: None,
        };
        self.global.update(Some(path), open.focus_name());
        if let Err(warning) = self.global.persist() {
            warn!("⚠️  {}", warning);
        }

        let summary = open.summary(self.global_warning.as_ref());
        info!(
            "📂 Opened {}: {} images ({} keep, {} reject)",
            path.display(),
            summary.files,
            summary.counts.keep,
            summary.counts.reject
        );
        self.folder = Some(open);
        if let Some(key) = self.folder.as_ref().and_then(|f| f.focus.clone()) {
            self.pin_around(&key);
        }
        summary
    }

    /// Flush marks, drop cached previews and remember where the user was.
    ///
    /// A batch still running keeps going and records its own results.
    pub fn close_folder(&mut self) {
        self.collect_batch();
        let Some(open) = self.folder.take() else {
            return;
        };
        if open.batch.is_some() {
            info!("Batch in {} still running; it will save its own results", open.listing.folder().display());
        }
        if let Err(warning) = open.store.flush() {
            warn!("⚠️  {}", warning);
        }
        self.cache.close_folder();
        self.global.update(Some(open.listing.folder()), open.focus_name());
        if let Err(warning) = self.global.persist() {
            warn!("⚠️  {}", warning);
        }
        info!("Closed {}", open.listing.folder().display());
    }

    pub fn is_open(&self) -> bool {
        self.folder.is_some()
    }

    fn open(&self) -> EngineResult<&OpenFolder> {
        self.folder.as_ref().ok_or(EngineError::NoFolderOpen)
    }

    fn open_mut(&mut self) -> EngineResult<&mut OpenFolder> {
        self.folder.as_mut().ok_or(EngineError::NoFolderOpen)
    }

    pub fn summary(&self) -> EngineResult<FolderSummary> {
        Ok(self.open()?.summary(self.global_warning.as_ref()))
    }

    pub fn files(&self) -> EngineResult<&[FileIdentity]> {
        Ok(self.open()?.listing.files())
    }

    pub fn identity(&self, key: &str) -> EngineResult<&FileIdentity> {
        self.open()?.identity(key)
    }

    pub fn mark_of(&self, key: &str) -> EngineResult<Mark> {
        let open = self.open()?;
        Ok(open.store.mark_of(open.identity(key)?))
    }

    /// Ready, pending (await or drop the handle) or failed placeholder
    pub fn request_thumbnail(&self, identity: &FileIdentity, size: SizeClass) -> ThumbnailStatus {
        self.cache.get_or_request(identity, size)
    }

    /// Request and wait
    pub async fn thumbnail(&self, identity: &FileIdentity, size: SizeClass) -> ThumbnailOutcome {
        match self.request_thumbnail(identity, size) {
            ThumbnailStatus::Ready(thumbnail) => ThumbnailOutcome::Ready(thumbnail),
            ThumbnailStatus::Failed(err) => ThumbnailOutcome::Failed(err),
            ThumbnailStatus::Pending(pending) => pending.wait().await,
        }
    }

    /// Returns false if the file already had that mark
    pub fn set_mark(&self, key: &str, mark: Mark) -> EngineResult<bool> {
        let open = self.open()?;
        Ok(open.store.set_mark(open.identity(key)?, mark))
    }

    /// The user is looking at `key`: remember it and keep its neighbors cached
    pub fn set_focus(&mut self, key: &str) -> EngineResult<()> {
        self.collect_batch();
        let open = self.open_mut()?;
        open.identity(key)?;
        open.focus = Some(key.to_string());
        open.store.set_last_viewed(Some(key));
        let folder = open.listing.folder().to_path_buf();
        let name = open.focus_name().map(str::to_string);
        self.global.update(Some(&folder), name.as_deref());
        self.pin_around(key);
        Ok(())
    }

    fn pin_around(&self, key: &str) {
        let Some(open) = self.folder.as_ref() else {
            return;
        };
        let Some(index) = open.listing.index_of(key) else {
            return;
        };
        let files = open.listing.files();
        let neighbors = index.saturating_sub(1)..=(index + 1).min(files.len().saturating_sub(1));
        self.cache
            .set_pinned(files[neighbors].iter().map(|f| f.key.clone()));
    }

    /// Re-list the folder after changes made by other programs.
    ///
    /// Previews of removed or modified files are dropped, marks of vanished
    /// files are forgotten and a previewed plan has to be requested again.
    pub fn refresh(&mut self) -> EngineResult<FolderSummary> {
        self.collect_batch();
        let open = self.folder.as_mut().ok_or(EngineError::NoFolderOpen)?;
        if open.batch.is_some() {
            return Err(EngineError::BatchRunning);
        }

        let rescanned = list_images(open.listing.folder());
        let diff = open.listing.diff(&rescanned);
        if !diff.is_empty() {
            info!(
                "🔄 {} changed: {} added, {} removed, {} modified",
                rescanned.folder().display(),
                diff.added.len(),
                diff.removed.len(),
                diff.modified.len()
            );
            open.triage.reset();
        }
        self.cache.apply_diff(&diff);
        open.store.reconcile(&rescanned);
        open.listing = rescanned;
        if open.focus.as_deref().is_some_and(|key| open.listing.get(key).is_none()) {
            open.focus = None;
        }

        let summary = open.summary(self.global_warning.as_ref());
        if let Some(key) = open.focus.clone() {
            self.pin_around(&key);
        }
        Ok(summary)
    }

    /// Compute the move plan and hold it for confirmation
    pub fn get_plan_preview(&mut self) -> EngineResult<MovePlanSummary> {
        self.collect_batch();
        let open = self.open_mut()?;
        let session = open.store.snapshot();
        open.triage.prepare(&open.listing, &session)
    }

    pub fn triage_state(&mut self) -> EngineResult<TriageState> {
        self.collect_batch();
        Ok(self.open()?.triage.state())
    }

    /// Drop the previewed plan without running it
    pub fn decline_plan(&mut self) -> EngineResult<()> {
        self.open_mut()?.triage.reset();
        Ok(())
    }

    /// Run the previewed plan.
    ///
    /// Marks are flushed first. The moves and everything that follows them
    /// (clearing fulfilled marks, rescanning, dropping stale previews,
    /// flushing) run on a blocking worker, so they complete even if this
    /// future is dropped; the engine picks the result up on its next call.
    /// `cancel` stops new moves and `progress` receives one message per item.
    pub async fn confirm_and_execute_plan(
        &mut self,
        cancel: CancelToken,
        progress: Option<UnboundedSender<Progress>>,
    ) -> EngineResult<ExecutionReport> {
        self.collect_batch();
        let open = self.folder.as_mut().ok_or(EngineError::NoFolderOpen)?;
        let confirmed = open.triage.confirm(open.store.revision())?;
        if let Err(warning) = open.store.flush() {
            warn!("⚠️  Running batch without a durable record: {}", warning);
        }

        let (tx, rx) = oneshot::channel();
        let store = Arc::clone(&open.store);
        let cache = self.cache.clone();
        let previous = open.listing.clone();
        tokio::task::spawn_blocking(move || {
            let done = run_batch(confirmed, &cancel, progress, &store, &cache, &previous);
            // Nobody is waiting if the folder was closed meanwhile
            let _ = tx.send(done);
        });
        open.batch = Some(rx);

        let received = match self.folder.as_mut().and_then(|open| open.batch.as_mut()) {
            Some(rx) => rx.await.ok(),
            None => return Err(EngineError::NoFolderOpen),
        };
        self.finish_batch(received)
    }

    /// Take the result of a batch whose caller stopped waiting, if it is ready
    fn collect_batch(&mut self) {
        let received = match self.folder.as_mut().and_then(|open| open.batch.as_mut()) {
            Some(rx) => match rx.try_recv() {
                Ok(done) => Some(done),
                Err(oneshot::error::TryRecvError::Empty) => return,
                Err(oneshot::error::TryRecvError::Closed) => None,
            },
            None => return,
        };
        if let Err(err) = self.finish_batch(received) {
            warn!("⚠️  {}", err);
        }
    }

    /// Adopt a finished batch: new listing, remapped focus, final state
    fn finish_batch(&mut self, received: Option<BatchDone>) -> EngineResult<ExecutionReport> {
        let open = self.folder.as_mut().ok_or(EngineError::NoFolderOpen)?;
        open.batch = None;
        let Some(done) = received else {
            open.triage.abort();
            return Err(EngineError::BatchLost);
        };

        open.listing = done.listing;
        if let Some(new_key) = open.focus.as_ref().and_then(|key| done.renames.get(key)) {
            open.focus = Some(new_key.clone());
        }
        let state = open.triage.finish(&done.report);
        info!("Batch finished as {:?}", state);

        if let Some(key) = open.focus.clone() {
            self.pin_around(&key);
        }
        Ok(done.report)
    }

    /// Reopen the last folder, if it still exists.
    /// Returns the summary and the index of the file to show first.
    pub fn resume(&mut self) -> Option<(FolderSummary, usize)> {
        let last = self.global.get().clone();
        let folder = last.last_folder.filter(|p| p.is_dir())?;
        let summary = self.open_folder(&folder);

        // Prefer the session's own last-viewed key; the global record only has a name
        let index = summary
            .last_viewed
            .or_else(|| {
                let name = last.last_file.as_deref()?;
                let open = self.folder.as_ref()?;
                Location::ALL
                    .iter()
                    .find_map(|loc| open.listing.index_of(&relative_key(name, *loc)))
            })
            .unwrap_or(0);

        if let Some(key) = self.files().ok().and_then(|files| files.get(index)).map(|f| f.key.clone()) {
            let _ = self.set_focus(&key);
        }
        Some((summary, index))
    }
}

/// Body of a batch run: moves, then the bookkeeping that records them
fn run_batch(
    plan: ConfirmedPlan,
    cancel: &CancelToken,
    progress: Option<UnboundedSender<Progress>>,
    store: &MarkStore,
    cache: &ThumbnailCache,
    previous: &Listing,
) -> BatchDone {
    let report = execute(plan, cancel, |p| {
        if let Some(tx) = &progress {
            let _ = tx.send(p.clone());
        }
    });

    let renames: HashMap<String, String> = report
        .moved()
        .filter_map(|r| match &r.outcome {
            MoveOutcome::Moved { destination, .. } => {
                let name = destination.file_name()?.to_str()?;
                Some((r.item.identity.key.clone(), relative_key(name, r.item.destination)))
            }
            _ => None,
        })
        .collect();

    // Fulfilled intent is now recorded by location
    store.clear_marks(renames.keys().map(String::as_str));
    for old_key in renames.keys() {
        cache.invalidate(old_key);
    }
    let last_viewed = store.snapshot().last_viewed().and_then(|key| renames.get(key)).cloned();
    if let Some(new_key) = last_viewed {
        store.set_last_viewed(Some(new_key.as_str()));
    }

    let listing = list_images(previous.folder());
    cache.apply_diff(&previous.diff(&listing));
    store.reconcile(&listing);
    if let Err(warning) = store.flush() {
        warn!("⚠️  {}", warning);
    }

    BatchDone {
        report,
        listing,
        renames,
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.close_folder();
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("folder", &self.folder.as_ref().map(|o| o.listing.folder().to_path_buf()))
            .field("cache", &self.cache)
            .finish()
    }
}
