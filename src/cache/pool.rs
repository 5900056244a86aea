//! Decode jobs.
//!
//! One job per (identity, size class); later requests join it as extra
//! waiters. A job waits for a worker permit, then re-checks that someone
//! still wants it before doing any work.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use super::disk::{DiskCache, DiskKey};
use super::{CacheKey, Shared, SizeClass, Thumbnail, ThumbnailOutcome};
use crate::error::{DecodeError, DecodeErrorKind};
use crate::raw::preview::{Decode, DecodedPreview};
use crate::raw::FormatClass;
use crate::state::data::FileIdentity;

type Waiter = (u64, oneshot::Sender<ThumbnailOutcome>);

pub(super) struct Job {
    id: u64,
    pub(super) waiters: Vec<Waiter>,
    started: bool,
}

impl Job {
    pub(super) fn new(id: u64, waiter_id: u64, tx: oneshot::Sender<ThumbnailOutcome>) -> Self {
        Self {
            id,
            waiters: vec![(waiter_id, tx)],
            started: false,
        }
    }
}

pub(super) fn spawn_job(
    shared: Arc<Shared>,
    key: CacheKey,
    job_id: u64,
    identity: FileIdentity,
    path: PathBuf,
) {
    let runtime = shared.runtime.clone();
    runtime.spawn(run_job(shared, key, job_id, identity, path));
}

async fn run_job(shared: Arc<Shared>, key: CacheKey, job_id: u64, identity: FileIdentity, path: PathBuf) {
    let Ok(permit) = Arc::clone(&shared.semaphore).acquire_owned().await else {
        return;
    };

    // Skip without decoding if every waiter left or the entry was invalidated
    {
        let mut index = shared.lock();
        let wanted = match index.inflight.get_mut(&key) {
            Some(job) if job.id == job_id => {
                job.started = !job.waiters.is_empty();
                job.started
            }
            _ => return,
        };
        if !wanted {
            index.inflight.remove(&key);
            debug!("Skipped decode of {}: no longer requested", key.key);
            return;
        }
    }

    let decoder = Arc::clone(&shared.decoder);
    let disk = shared.disk.clone();
    let disk_key = DiskKey {
        name: identity.name.clone(),
        len: identity.fingerprint.len,
        modified_ns: identity.fingerprint.modified_ns,
        size: key.size,
    };
    let format = identity.format;
    let size = key.size;

    let work = tokio::task::spawn_blocking(move || {
        // Slot stays taken until the decode really finishes, even past a timeout
        let _permit = permit;
        decode_through_disk(decoder.as_ref(), disk.as_deref(), &path, format, size, &disk_key)
    });

    let outcome = match tokio::time::timeout(shared.decode_timeout, work).await {
        Ok(Ok(Ok(preview))) => {
            ThumbnailOutcome::Ready(Thumbnail::new(Arc::new(preview.image), preview.origin))
        }
        Ok(Ok(Err(err))) => {
            warn!("⚠️  Could not decode {}: {}", key.key, err);
            ThumbnailOutcome::Failed(err)
        }
        Ok(Err(join_err)) => {
            warn!("⚠️  Decoder crashed on {}: {}", key.key, join_err);
            ThumbnailOutcome::Failed(DecodeError::corrupt(format!("decoder crashed: {}", join_err)))
        }
        Err(_) => {
            warn!("⚠️  Decode of {} exceeded {:?}", key.key, shared.decode_timeout);
            ThumbnailOutcome::Failed(DecodeError::timeout(format!(
                "no result after {:?}",
                shared.decode_timeout
            )))
        }
    };

    complete(&shared, &key, job_id, outcome);
}

/// RAW previews go through the persistent tier; rasters decode directly
fn decode_through_disk(
    decoder: &dyn Decode,
    disk: Option<&DiskCache>,
    path: &Path,
    format: FormatClass,
    size: SizeClass,
    disk_key: &DiskKey,
) -> Result<DecodedPreview, DecodeError> {
    let disk = disk.filter(|_| format.is_raw());

    if let Some(disk) = disk {
        match disk.load(disk_key) {
            Ok(Some((image, origin))) => {
                debug!("💾 Persisted preview hit for {}", disk_key.name);
                return Ok(DecodedPreview { image, origin });
            }
            Ok(None) => {}
            Err(err) => warn!("⚠️  Persisted preview lookup failed for {}: {}", disk_key.name, err),
        }
    }

    let preview = decoder.decode(path, format, size.long_edge())?;

    if let Some(disk) = disk {
        if let Err(err) = disk.store(disk_key, &preview) {
            warn!("⚠️  Could not persist preview for {}: {}", disk_key.name, err);
        }
    }
    Ok(preview)
}

/// Land the result in the index (unless the job was invalidated) and wake every waiter
fn complete(shared: &Shared, key: &CacheKey, job_id: u64, outcome: ThumbnailOutcome) {
    let job = {
        let mut index = shared.lock();
        if !matches!(index.inflight.get(key), Some(job) if job.id == job_id) {
            debug!("Dropped result for invalidated {}", key.key);
            return;
        }
        let Some(job) = index.inflight.remove(key) else {
            return;
        };
        match &outcome {
            ThumbnailOutcome::Ready(thumbnail) => index.memory.insert(key.clone(), thumbnail.clone()),
            // A timeout may pass under lighter load; only lasting failures are kept
            ThumbnailOutcome::Failed(err) if err.kind() == DecodeErrorKind::Timeout => {}
            ThumbnailOutcome::Failed(err) => {
                index.failures.insert(key.clone(), err.clone());
            }
            ThumbnailOutcome::Cancelled => {}
        }
        job
    };

    for (_, tx) in job.waiters {
        // Receiver may already be gone
        let _ = tx.send(outcome.clone());
    }
}

/// Handle to an outstanding thumbnail request.
///
/// Dropping it withdraws the request; if no other waiter remains and no
/// worker has picked the job up yet, the decode never runs.
pub struct PendingThumbnail {
    key: CacheKey,
    waiter_id: u64,
    rx: Option<oneshot::Receiver<ThumbnailOutcome>>,
    shared: Arc<Shared>,
}

impl PendingThumbnail {
    pub(super) fn new(
        key: CacheKey,
        waiter_id: u64,
        rx: oneshot::Receiver<ThumbnailOutcome>,
        shared: Arc<Shared>,
    ) -> Self {
        Self {
            key,
            waiter_id,
            rx: Some(rx),
            shared,
        }
    }

    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    /// Wait for the decode to finish
    pub async fn wait(mut self) -> ThumbnailOutcome {
        let Some(rx) = self.rx.as_mut() else {
            return ThumbnailOutcome::Cancelled;
        };
        let outcome = rx.await.unwrap_or(ThumbnailOutcome::Cancelled);
        self.rx = None;
        outcome
    }

    /// Non-blocking poll for a control loop; `None` while still pending
    pub fn try_outcome(&mut self) -> Option<ThumbnailOutcome> {
        let rx = self.rx.as_mut()?;
        let outcome = match rx.try_recv() {
            Ok(outcome) => outcome,
            Err(oneshot::error::TryRecvError::Empty) => return None,
            Err(oneshot::error::TryRecvError::Closed) => ThumbnailOutcome::Cancelled,
        };
        self.rx = None;
        Some(outcome)
    }
}

impl Drop for PendingThumbnail {
    fn drop(&mut self) {
        if self.rx.is_none() {
            return;
        }
        let mut index = self.shared.lock();
        let Some(job) = index.inflight.get_mut(&self.key) else {
            return;
        };
        job.waiters.retain(|(id, _)| *id != self.waiter_id);
        let abandoned = job.waiters.is_empty() && !job.started;
        if abandoned {
            index.inflight.remove(&self.key);
            debug!("Withdrew queued decode of {}", self.key.key);
        }
    }
}

impl std::fmt::Debug for PendingThumbnail {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingThumbnail")
            .field("key", &self.key)
            .field("waiter_id", &self.waiter_id)
            .finish()
    }
}
