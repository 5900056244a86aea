//! Batch move execution.
//!
//! Moves run one at a time in plan order. Every item is attempted unless the
//! batch is cancelled; a failure is recorded against its item and the batch
//! goes on.

use std::collections::HashSet;
use std::fs;
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use super::plan::{ConfirmedPlan, MovePlanItem};
use crate::cancel::CancelToken;
use crate::error::MoveFailure;
use crate::state::data::Location;

/// Highest numeric suffix tried when the destination name is taken
pub const MAX_RENAME_ATTEMPTS: u32 = 999;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MoveOutcome {
    Moved {
        destination: PathBuf,
        /// The file had to take a suffixed name
        renamed: bool,
    },
    Failed(MoveFailure),
    /// Batch was cancelled before this item
    NotAttempted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemResult {
    pub item: MovePlanItem,
    pub outcome: MoveOutcome,
}

/// Per-item progress, reported after each attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Progress {
    pub done: usize,
    pub total: usize,
    pub key: String,
    pub succeeded: bool,
}

/// Result of a batch run; lists every failed item with its reason
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionReport {
    pub results: Vec<ItemResult>,
    /// Files that needed no move
    pub unchanged: usize,
    pub cancelled: bool,
}

impl ExecutionReport {
    pub fn moved(&self) -> impl Iterator<Item = &ItemResult> {
        self.results
            .iter()
            .filter(|r| matches!(r.outcome, MoveOutcome::Moved { .. }))
    }

    pub fn failed(&self) -> impl Iterator<Item = (&MovePlanItem, &MoveFailure)> {
        self.results.iter().filter_map(|r| match &r.outcome {
            MoveOutcome::Failed(failure) => Some((&r.item, failure)),
            _ => None,
        })
    }

    pub fn moved_count(&self) -> usize {
        self.moved().count()
    }

    pub fn failed_count(&self) -> usize {
        self.failed().count()
    }

    pub fn not_attempted_count(&self) -> usize {
        self.results
            .iter()
            .filter(|r| r.outcome == MoveOutcome::NotAttempted)
            .count()
    }

    /// True when nothing failed and nothing was left out
    pub fn is_success(&self) -> bool {
        self.failed_count() == 0 && !self.cancelled
    }
}

/// Run a confirmed plan
pub fn execute<F>(plan: ConfirmedPlan, cancel: &CancelToken, mut on_progress: F) -> ExecutionReport
where
    F: FnMut(&Progress),
{
    let total = plan.items.len();
    let mut report = ExecutionReport {
        results: Vec::with_capacity(total),
        unchanged: plan.unchanged,
        cancelled: false,
    };
    if total == 0 {
        debug!("Nothing to move in {}", plan.folder.display());
        return report;
    }

    info!("🚀 Moving {} files in {}", total, plan.folder.display());
    let mut ready_dirs: HashSet<Location> = HashSet::new();

    for (index, item) in plan.items.into_iter().enumerate() {
        if report.cancelled || cancel.is_cancelled() {
            if !report.cancelled {
                info!("Batch cancelled after {} of {} moves", index, total);
                report.cancelled = true;
            }
            report.results.push(ItemResult {
                item,
                outcome: MoveOutcome::NotAttempted,
            });
            continue;
        }

        let outcome = match move_item(&plan.folder, &item, &mut ready_dirs) {
            Ok((destination, renamed)) => {
                debug!("Moved {} -> {}", item.identity.key, destination.display());
                MoveOutcome::Moved { destination, renamed }
            }
            Err(failure) => {
                warn!("⚠️  Could not move {}: {}", item.identity.key, failure);
                MoveOutcome::Failed(failure)
            }
        };

        on_progress(&Progress {
            done: index + 1,
            total,
            key: item.identity.key.clone(),
            succeeded: matches!(outcome, MoveOutcome::Moved { .. }),
        });
        report.results.push(ItemResult { item, outcome });
    }

    info!(
        "✅ Batch done: {} moved, {} failed, {} not attempted",
        report.moved_count(),
        report.failed_count(),
        report.not_attempted_count()
    );
    report
}

fn move_item(
    folder: &Path,
    item: &MovePlanItem,
    ready_dirs: &mut HashSet<Location>,
) -> Result<(PathBuf, bool), MoveFailure> {
    if let Err(err) = fs::symlink_metadata(&item.source) {
        return Err(MoveFailure::from_io(&err));
    }

    // Subfolders are only created once something actually goes there
    let dir = item.destination_dir(folder);
    if !ready_dirs.contains(&item.destination) {
        fs::create_dir_all(&dir).map_err(|err| match err.kind() {
            ErrorKind::PermissionDenied => MoveFailure::Permission(err.to_string()),
            _ => MoveFailure::Io(err.to_string()),
        })?;
        ready_dirs.insert(item.destination);
    }

    for (target, renamed) in candidates(&dir, &item.identity.name) {
        if place(&item.source, &target)? {
            return Ok((target, renamed));
        }
    }
    Err(MoveFailure::NameCollisionUnresolved {
        attempts: MAX_RENAME_ATTEMPTS,
    })
}

/// `name`, then `stem_1.ext`, `stem_2.ext`, ... up to `MAX_RENAME_ATTEMPTS`.
/// The flag is true for the renamed candidates.
fn candidates<'a>(dir: &'a Path, name: &'a str) -> impl Iterator<Item = (PathBuf, bool)> + 'a {
    let original = Path::new(name);
    let stem = original.file_stem().and_then(|s| s.to_str()).unwrap_or(name);
    let extension = original.extension().and_then(|e| e.to_str());

    let renamed = (1..=MAX_RENAME_ATTEMPTS).map(move |n| {
        let candidate = match extension {
            Some(ext) => dir.join(format!("{}_{}.{}", stem, n, ext)),
            None => dir.join(format!("{}_{}", stem, n)),
        };
        (candidate, true)
    });
    std::iter::once((dir.join(name), false)).chain(renamed)
}

/// Move `source` to `target` unless `target` exists.
///
/// Returns false when the name is taken. A hard link never replaces an
/// existing entry, so a file created there by another program in the
/// meantime is left alone.
fn place(source: &Path, target: &Path) -> Result<bool, MoveFailure> {
    match fs::hard_link(source, target) {
        Ok(()) => {
            if let Err(err) = fs::remove_file(source) {
                let _ = fs::remove_file(target);
                return Err(MoveFailure::from_io(&err));
            }
            Ok(true)
        }
        Err(err) if err.kind() == ErrorKind::AlreadyExists => Ok(false),
        Err(err) if err.kind() == ErrorKind::CrossesDevices => copy_across(source, target),
        // No hard links here (FAT, exFAT) or not allowed to make one
        Err(_) => rename_if_free(source, target),
    }
}

fn rename_if_free(source: &Path, target: &Path) -> Result<bool, MoveFailure> {
    if fs::symlink_metadata(target).is_ok() {
        return Ok(false);
    }
    match fs::rename(source, target) {
        Ok(()) => Ok(true),
        Err(err) if err.kind() == ErrorKind::CrossesDevices => copy_across(source, target),
        Err(err) => Err(MoveFailure::from_io(&err)),
    }
}

fn copy_across(source: &Path, target: &Path) -> Result<bool, MoveFailure> {
    match copy_then_remove(source, target) {
        Ok(()) => Ok(true),
        Err(err) if err.kind() == ErrorKind::AlreadyExists => Ok(false),
        Err(err) if err.kind() == ErrorKind::NotFound => Err(MoveFailure::VanishedSource),
        Err(err) => Err(MoveFailure::CrossDevice(err.to_string())),
    }
}

/// Copy into a newly created `target`, then remove `source`
fn copy_then_remove(source: &Path, target: &Path) -> io::Result<()> {
    let mut from = fs::File::open(source)?;
    let mut to = fs::OpenOptions::new().write(true).create_new(true).open(target)?;

    let copied = io::copy(&mut from, &mut to).and_then(|_| to.sync_all());
    drop(to);
    if let Err(err) = copied {
        let _ = fs::remove_file(target);
        return Err(err);
    }
    if let Ok(metadata) = from.metadata() {
        let _ = fs::set_permissions(target, metadata.permissions());
    }

    if let Err(err) = fs::remove_file(source) {
        // Leave the source as the only copy
        let _ = fs::remove_file(target);
        return Err(err);
    }
    Ok(())
}
