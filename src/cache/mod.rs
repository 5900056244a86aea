//! Thumbnail Cache
//!
//! Serves decoded previews from memory, and turns misses into decode jobs on
//! a bounded worker pool. Each request gets back a `ThumbnailStatus`; a
//! pending request carries a handle that resolves when the job completes,
//! and dropping that handle withdraws the request.

pub mod disk;
mod memory;
mod pool;

use image::RgbaImage;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{DecodeError, DecodeErrorKind};
use crate::raw::preview::{Decode, PreviewOrigin};
use crate::source::ListingDiff;
use crate::state::data::{FileIdentity, Fingerprint};
use disk::DiskCache;
use memory::MemoryCache;
use pool::Job;

pub use pool::PendingThumbnail;

/// Requested resolution bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SizeClass {
    /// Grid and filmstrip
    Thumbnail,
    /// Focused view
    Display,
}

impl SizeClass {
    /// Long edge of the bitmap, in pixels
    pub fn long_edge(self) -> u32 {
        match self {
            SizeClass::Thumbnail => 256,
            SizeClass::Display => 3000,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SizeClass::Thumbnail => "thumbnail",
            SizeClass::Display => "display",
        }
    }
}

/// Cache entry key. Same file key with a different fingerprint is a different entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub key: String,
    pub fingerprint: Fingerprint,
    pub size: SizeClass,
}

impl CacheKey {
    pub fn new(identity: &FileIdentity, size: SizeClass) -> Self {
        Self {
            key: identity.key.clone(),
            fingerprint: identity.fingerprint,
            size,
        }
    }
}

/// An immutable decoded bitmap plus its memory cost
#[derive(Debug, Clone)]
pub struct Thumbnail {
    pub image: Arc<RgbaImage>,
    pub origin: PreviewOrigin,
    /// Approximate resident size in bytes
    pub cost: usize,
}

impl Thumbnail {
    pub fn new(image: Arc<RgbaImage>, origin: PreviewOrigin) -> Self {
        let cost = image.as_raw().len();
        Self {
            image,
            origin,
            cost,
        }
    }
}

/// Immediate answer to `get_or_request`
#[derive(Debug)]
pub enum ThumbnailStatus {
    Ready(Thumbnail),
    Pending(PendingThumbnail),
    /// Shown as a failed-state placeholder
    Failed(DecodeError),
}

/// Final answer of a pending request
#[derive(Debug, Clone)]
pub enum ThumbnailOutcome {
    Ready(Thumbnail),
    Failed(DecodeError),
    /// The request was withdrawn or its entry invalidated before completion
    Cancelled,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub memory_entries: usize,
    pub memory_bytes: usize,
    pub failed: usize,
    pub in_flight: usize,
    pub disk_entries: Option<usize>,
}

/// Mutable index shared by the control thread and the decode workers
struct CacheIndex {
    memory: MemoryCache,
    failures: HashMap<CacheKey, DecodeError>,
    inflight: HashMap<CacheKey, Job>,
    folder: Option<PathBuf>,
    next_id: u64,
}

impl CacheIndex {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn clear(&mut self) {
        self.memory.clear();
        self.failures.clear();
        // Dropping the jobs closes their channels; waiters see Cancelled
        self.inflight.clear();
    }
}

struct Shared {
    index: Mutex<CacheIndex>,
    decoder: Arc<dyn Decode>,
    disk: Option<Arc<DiskCache>>,
    semaphore: Arc<Semaphore>,
    runtime: Handle,
    decode_timeout: Duration,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, CacheIndex> {
        self.index.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Bounded, coalescing thumbnail cache
#[derive(Clone)]
pub struct ThumbnailCache {
    shared: Arc<Shared>,
}

impl ThumbnailCache {
    /// Build a cache whose decode jobs run on `runtime`.
    ///
    /// The persistent tier is opened according to `config`; if it cannot be
    /// opened the cache runs memory-only.
    pub fn new(config: &Config, decoder: Arc<dyn Decode>, runtime: Handle) -> Self {
        let disk = if config.disk_cache_enabled {
            open_disk_tier(config).map(Arc::new)
        } else {
            None
        };
        let workers = config.workers();
        info!("🚀 Thumbnail cache: {} decode workers", workers);

        Self {
            shared: Arc::new(Shared {
                index: Mutex::new(CacheIndex {
                    memory: MemoryCache::new(config.memory_budget_bytes, config.max_cached_entries),
                    failures: HashMap::new(),
                    inflight: HashMap::new(),
                    folder: None,
                    next_id: 0,
                }),
                decoder,
                disk,
                semaphore: Arc::new(Semaphore::new(workers)),
                runtime,
                decode_timeout: config.decode_timeout(),
            }),
        }
    }

    /// Start serving files of `folder`, dropping everything cached for the previous one
    pub fn open_folder(&self, folder: &Path) {
        let mut index = self.shared.lock();
        index.clear();
        index.folder = Some(folder.to_path_buf());
    }

    pub fn close_folder(&self) {
        let mut index = self.shared.lock();
        index.clear();
        index.folder = None;
        debug!("Thumbnail cache cleared");
    }

    /// Serve from memory, report a known failure, or enqueue (or join) a decode job
    pub fn get_or_request(&self, identity: &FileIdentity, size: SizeClass) -> ThumbnailStatus {
        let key = CacheKey::new(identity, size);
        let mut index = self.shared.lock();

        if let Some(thumbnail) = index.memory.get(&key) {
            return ThumbnailStatus::Ready(thumbnail);
        }
        if let Some(err) = index.failures.get(&key) {
            return ThumbnailStatus::Failed(err.clone());
        }
        let Some(folder) = index.folder.clone() else {
            return ThumbnailStatus::Failed(DecodeError::new(
                DecodeErrorKind::IoFailure,
                "no folder is open",
            ));
        };

        let waiter_id = index.next_id();
        let (tx, rx) = tokio::sync::oneshot::channel();

        let spawn = match index.inflight.get_mut(&key) {
            Some(job) => {
                job.waiters.push((waiter_id, tx));
                None
            }
            None => {
                let job_id = index.next_id();
                index.inflight.insert(key.clone(), Job::new(job_id, waiter_id, tx));
                Some(job_id)
            }
        };
        drop(index);

        if let Some(job_id) = spawn {
            pool::spawn_job(
                Arc::clone(&self.shared),
                key.clone(),
                job_id,
                identity.clone(),
                identity.path_in(&folder),
            );
        }

        ThumbnailStatus::Pending(PendingThumbnail::new(key, waiter_id, rx, Arc::clone(&self.shared)))
    }

    /// Exempt these identity keys (focused item and neighbors) from eviction
    pub fn set_pinned<I>(&self, keys: I)
    where
        I: IntoIterator<Item = String>,
    {
        let pinned: HashSet<String> = keys.into_iter().collect();
        self.shared.lock().memory.set_pinned(pinned);
    }

    /// Drop every entry, failure and queued job for an identity key
    pub fn invalidate(&self, identity_key: &str) -> usize {
        let mut index = self.shared.lock();
        let mut dropped = index.memory.remove_identity(identity_key);

        let before = index.failures.len() + index.inflight.len();
        index.failures.retain(|k, _| k.key != identity_key);
        index.inflight.retain(|k, _| k.key != identity_key);
        dropped += before - (index.failures.len() + index.inflight.len());

        if dropped > 0 {
            debug!("Invalidated {} cache entries for {}", dropped, identity_key);
        }
        dropped
    }

    /// Invalidate identities that were removed or changed between two listings
    pub fn apply_diff(&self, diff: &ListingDiff) {
        for removed in &diff.removed {
            self.invalidate(&removed.key);
        }
        for (previous, _) in &diff.modified {
            self.invalidate(&previous.key);
        }
    }

    pub fn stats(&self) -> CacheStats {
        let disk_entries = self.shared.disk.as_ref().and_then(|disk| disk.entry_count().ok());
        let index = self.shared.lock();
        CacheStats {
            memory_entries: index.memory.len(),
            memory_bytes: index.memory.bytes(),
            failed: index.failures.len(),
            in_flight: index.inflight.len(),
            disk_entries,
        }
    }
}

impl std::fmt::Debug for ThumbnailCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThumbnailCache")
            .field("stats", &self.stats())
            .finish()
    }
}

fn open_disk_tier(config: &Config) -> Option<DiskCache> {
    let (Some(catalog), Some(dir)) = (config.catalog_path(), config.preview_cache_dir()) else {
        warn!("⚠️  No cache directory available, persistent previews disabled");
        return None;
    };
    match DiskCache::open(&catalog, &dir, config.disk_cache_budget_bytes) {
        Ok(disk) => Some(disk),
        Err(err) => {
            warn!("⚠️  Persistent preview tier unavailable: {}", err);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raw::preview::DecodedPreview;
    use crate::raw::{FormatClass, RasterKind, RawKind};
    use crate::state::data::Location;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::{tempdir, TempDir};

    struct CountingDecoder {
        calls: AtomicUsize,
        delay: Duration,
        fail: bool,
    }

    impl CountingDecoder {
        fn new(delay_ms: u64) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                delay: Duration::from_millis(delay_ms),
                fail: false,
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                delay: Duration::ZERO,
                fail: true,
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl Decode for CountingDecoder {
        fn decode(
            &self,
            _path: &Path,
            _format: FormatClass,
            _target_long_edge: u32,
        ) -> Result<DecodedPreview, DecodeError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(self.delay);
            if self.fail {
                return Err(DecodeError::corrupt("bad bytes"));
            }
            Ok(DecodedPreview {
                image: RgbaImage::new(8, 8),
                origin: PreviewOrigin::EmbeddedPreview,
            })
        }
    }

    fn jpeg(name: &str, modified_ns: i64) -> FileIdentity {
        FileIdentity::new(
            name,
            Location::Root,
            Fingerprint { len: 100, modified_ns },
            FormatClass::StandardRaster(RasterKind::Jpeg),
        )
    }

    fn cache_with(decoder: Arc<CountingDecoder>, workers: usize, timeout_ms: u64) -> (ThumbnailCache, TempDir) {
        let dir = tempdir().unwrap();
        let config = Config {
            worker_threads: Some(workers),
            decode_timeout_ms: timeout_ms,
            ..Config::rooted_at(dir.path())
        };
        let cache = ThumbnailCache::new(&config, decoder, Handle::current());
        cache.open_folder(dir.path());
        (cache, dir)
    }

    async fn resolve(status: ThumbnailStatus) -> ThumbnailOutcome {
        match status {
            ThumbnailStatus::Ready(t) => ThumbnailOutcome::Ready(t),
            ThumbnailStatus::Failed(e) => ThumbnailOutcome::Failed(e),
            ThumbnailStatus::Pending(pending) => pending.wait().await,
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_requests_share_one_decode() {
        let decoder = CountingDecoder::new(50);
        let (cache, _dir) = cache_with(decoder.clone(), 2, 5_000);
        let a = jpeg("a.jpg", 1);

        let first = cache.get_or_request(&a, SizeClass::Thumbnail);
        let second = cache.get_or_request(&a, SizeClass::Thumbnail);
        assert!(matches!(first, ThumbnailStatus::Pending(_)));
        assert!(matches!(second, ThumbnailStatus::Pending(_)));

        assert!(matches!(resolve(first).await, ThumbnailOutcome::Ready(_)));
        assert!(matches!(resolve(second).await, ThumbnailOutcome::Ready(_)));
        assert_eq!(decoder.calls(), 1);

        assert!(matches!(
            cache.get_or_request(&a, SizeClass::Thumbnail),
            ThumbnailStatus::Ready(_)
        ));
        assert_eq!(decoder.calls(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_size_classes_are_separate_entries() {
        let decoder = CountingDecoder::new(0);
        let (cache, _dir) = cache_with(decoder.clone(), 2, 5_000);
        let a = jpeg("a.jpg", 1);

        resolve(cache.get_or_request(&a, SizeClass::Thumbnail)).await;
        resolve(cache.get_or_request(&a, SizeClass::Display)).await;
        assert_eq!(decoder.calls(), 2);
        assert_eq!(cache.stats().memory_entries, 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_withdrawn_request_never_decodes() {
        let decoder = CountingDecoder::new(150);
        let (cache, _dir) = cache_with(decoder.clone(), 1, 5_000);

        // Occupies the only worker slot
        let busy = cache.get_or_request(&jpeg("a.jpg", 1), SizeClass::Thumbnail);
        tokio::time::sleep(Duration::from_millis(30)).await;

        let scrolled_away = cache.get_or_request(&jpeg("b.jpg", 1), SizeClass::Thumbnail);
        drop(scrolled_away);
        assert_eq!(cache.stats().in_flight, 1);

        assert!(matches!(resolve(busy).await, ThumbnailOutcome::Ready(_)));
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(decoder.calls(), 1);
        assert_eq!(cache.stats().in_flight, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_one_withdrawn_waiter_keeps_the_job_alive() {
        let decoder = CountingDecoder::new(50);
        let (cache, _dir) = cache_with(decoder.clone(), 1, 5_000);
        let a = jpeg("a.jpg", 1);

        let kept = cache.get_or_request(&a, SizeClass::Thumbnail);
        drop(cache.get_or_request(&a, SizeClass::Thumbnail));

        assert!(matches!(resolve(kept).await, ThumbnailOutcome::Ready(_)));
        assert_eq!(decoder.calls(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_fingerprint_change_invalidates_only_that_identity() {
        let decoder = CountingDecoder::new(0);
        let (cache, dir) = cache_with(decoder.clone(), 2, 5_000);
        let a = jpeg("a.jpg", 1);
        let b = jpeg("b.jpg", 1);
        resolve(cache.get_or_request(&a, SizeClass::Thumbnail)).await;
        resolve(cache.get_or_request(&b, SizeClass::Thumbnail)).await;

        let edited_a = jpeg("a.jpg", 2);
        let before = crate::source::Listing::from_files(dir.path(), vec![a.clone(), b.clone()]);
        let after = crate::source::Listing::from_files(dir.path(), vec![edited_a.clone(), b.clone()]);
        cache.apply_diff(&before.diff(&after));

        assert_eq!(cache.stats().memory_entries, 1);
        assert!(matches!(
            cache.get_or_request(&b, SizeClass::Thumbnail),
            ThumbnailStatus::Ready(_)
        ));
        assert!(matches!(
            cache.get_or_request(&edited_a, SizeClass::Thumbnail),
            ThumbnailStatus::Pending(_)
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_failure_is_remembered_as_placeholder() {
        let decoder = CountingDecoder::failing();
        let (cache, _dir) = cache_with(decoder.clone(), 2, 5_000);
        let a = jpeg("a.jpg", 1);

        match resolve(cache.get_or_request(&a, SizeClass::Thumbnail)).await {
            ThumbnailOutcome::Failed(err) => assert_eq!(err.kind(), DecodeErrorKind::Corrupt),
            other => panic!("expected failure, got {:?}", other),
        }
        assert!(matches!(
            cache.get_or_request(&a, SizeClass::Thumbnail),
            ThumbnailStatus::Failed(_)
        ));
        assert_eq!(decoder.calls(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_slow_decode_times_out() {
        let decoder = CountingDecoder::new(400);
        let (cache, _dir) = cache_with(decoder, 1, 50);
        let slow = jpeg("slow.jpg", 1);

        match resolve(cache.get_or_request(&slow, SizeClass::Display)).await {
            ThumbnailOutcome::Failed(err) => assert_eq!(err.kind(), DecodeErrorKind::Timeout),
            other => panic!("expected timeout, got {:?}", other),
        }

        // Not remembered: the next request tries again
        assert!(matches!(
            cache.get_or_request(&slow, SizeClass::Display),
            ThumbnailStatus::Pending(_)
        ));
        assert_eq!(cache.stats().failed, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_close_folder_cancels_waiters_and_clears_entries() {
        let decoder = CountingDecoder::new(100);
        let (cache, _dir) = cache_with(decoder, 1, 5_000);
        resolve(cache.get_or_request(&jpeg("a.jpg", 1), SizeClass::Thumbnail)).await;

        let pending = cache.get_or_request(&jpeg("b.jpg", 1), SizeClass::Thumbnail);
        cache.close_folder();

        assert!(matches!(resolve(pending).await, ThumbnailOutcome::Cancelled));
        let stats = cache.stats();
        assert_eq!(stats.memory_entries, 0);
        assert_eq!(stats.in_flight, 0);
        assert!(matches!(
            cache.get_or_request(&jpeg("a.jpg", 1), SizeClass::Thumbnail),
            ThumbnailStatus::Failed(_)
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_raw_previews_survive_a_restart_through_disk_tier() {
        let dir = tempdir().unwrap();
        let config = Config::rooted_at(dir.path());
        let raw = FileIdentity::new(
            "IMG_0001.ARW",
            Location::Root,
            Fingerprint { len: 2048, modified_ns: 7 },
            FormatClass::RawContainer(RawKind::Arw),
        );

        let first = CountingDecoder::new(0);
        let cache = ThumbnailCache::new(&config, first.clone(), Handle::current());
        cache.open_folder(dir.path());
        resolve(cache.get_or_request(&raw, SizeClass::Thumbnail)).await;
        assert_eq!(first.calls(), 1);
        assert_eq!(cache.stats().disk_entries, Some(1));
        drop(cache);

        let second = CountingDecoder::new(0);
        let cache = ThumbnailCache::new(&config, second.clone(), Handle::current());
        cache.open_folder(dir.path());
        match resolve(cache.get_or_request(&raw, SizeClass::Thumbnail)).await {
            ThumbnailOutcome::Ready(t) => assert_eq!(t.origin, PreviewOrigin::EmbeddedPreview),
            other => panic!("expected ready, got {:?}", other),
        }
        assert_eq!(second.calls(), 0);
    }
}
