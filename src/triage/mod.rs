//! Batch Triage Executor
//!
//! `Idle -> Planning -> AwaitingConfirmation -> Executing -> {Completed, PartiallyFailed}`

pub mod executor;
pub mod plan;

pub use executor::{execute, ExecutionReport, ItemResult, MoveOutcome, Progress};
pub use plan::{plan, ConfirmedPlan, MovePlanItem, MovePlanSummary, PendingPlan};

use tracing::debug;

use crate::error::{EngineError, EngineResult};
use crate::source::Listing;
use crate::state::session::SessionState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriageState {
    Idle,
    Planning,
    AwaitingConfirmation,
    Executing,
    Completed,
    PartiallyFailed,
}

/// Tracks where a folder's batch run is in its lifecycle
#[derive(Debug)]
pub struct BatchTriage {
    state: TriageState,
    pending: Option<PendingPlan>,
}

impl Default for BatchTriage {
    fn default() -> Self {
        Self::new()
    }
}

impl BatchTriage {
    pub fn new() -> Self {
        Self {
            state: TriageState::Idle,
            pending: None,
        }
    }

    pub fn state(&self) -> TriageState {
        self.state
    }

    /// Compute a fresh plan and wait for confirmation. Replaces any earlier pending plan.
    pub fn prepare(&mut self, listing: &Listing, session: &SessionState) -> EngineResult<MovePlanSummary> {
        if self.state == TriageState::Executing {
            return Err(EngineError::BatchRunning);
        }
        self.state = TriageState::Planning;
        let pending = plan(listing, session);
        let summary = pending.summary();
        debug!(
            "Plan: {} to _KEEPS, {} to _REJECTS, {} to root, {} unchanged",
            summary.to_keeps, summary.to_rejects, summary.to_root, summary.unchanged
        );
        self.pending = Some(pending);
        self.state = TriageState::AwaitingConfirmation;
        Ok(summary)
    }

    /// Confirm the pending plan, provided marks are still at `current_revision`
    pub fn confirm(&mut self, current_revision: u64) -> EngineResult<ConfirmedPlan> {
        if self.state != TriageState::AwaitingConfirmation {
            return Err(EngineError::NoPendingPlan);
        }
        let pending = self.pending.take().ok_or(EngineError::NoPendingPlan)?;
        if pending.revision() != current_revision {
            self.state = TriageState::Idle;
            return Err(EngineError::PlanOutdated);
        }
        self.state = TriageState::Executing;
        Ok(pending.confirm())
    }

    /// Record how the run ended
    pub fn finish(&mut self, report: &ExecutionReport) -> TriageState {
        self.state = if report.is_success() {
            TriageState::Completed
        } else {
            TriageState::PartiallyFailed
        };
        self.state
    }

    /// The run never produced a report
    pub fn abort(&mut self) {
        self.pending = None;
        self.state = TriageState::Idle;
    }

    /// Drop any pending plan (folder closed, or the caller declined)
    pub fn reset(&mut self) {
        if self.state != TriageState::Executing {
            self.pending = None;
            self.state = TriageState::Idle;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::CancelToken;
    use crate::source::list_images;
    use crate::state::data::{Location, Mark};
    use crate::state::session::{MarkStore, WriteMode};
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_execution_requires_confirmation_of_a_prepared_plan() {
        let mut triage = BatchTriage::new();
        assert!(matches!(triage.confirm(0), Err(EngineError::NoPendingPlan)));
        assert_eq!(triage.state(), TriageState::Idle);
    }

    #[test]
    fn test_marks_changed_after_preview_outdate_the_plan() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.jpg"), b"a").unwrap();
        let listing = list_images(dir.path());
        let store = MarkStore::open(dir.path(), &listing, WriteMode::Immediate);

        let mut triage = BatchTriage::new();
        triage.prepare(&listing, &store.snapshot()).unwrap();
        store.set_mark(listing.get("a.jpg").unwrap(), Mark::Keep);

        assert!(matches!(triage.confirm(store.revision()), Err(EngineError::PlanOutdated)));
        assert_eq!(triage.state(), TriageState::Idle);
    }

    /// a.jpg Keep, b.jpg Reject, c.jpg Unmarked, run twice
    #[test]
    fn test_full_cycle_then_second_run_is_empty() {
        let dir = tempdir().unwrap();
        for name in ["a.jpg", "b.jpg", "c.jpg"] {
            fs::write(dir.path().join(name), name).unwrap();
        }
        let listing = list_images(dir.path());
        let store = MarkStore::open(dir.path(), &listing, WriteMode::Immediate);
        store.set_mark(listing.get("a.jpg").unwrap(), Mark::Keep);
        store.set_mark(listing.get("b.jpg").unwrap(), Mark::Reject);

        let mut triage = BatchTriage::new();
        let summary = triage.prepare(&listing, &store.snapshot()).unwrap();
        assert_eq!(summary.total_moves(), 2);
        assert_eq!(triage.state(), TriageState::AwaitingConfirmation);

        let confirmed = triage.confirm(store.revision()).unwrap();
        assert_eq!(triage.state(), TriageState::Executing);
        let report = execute(confirmed, &CancelToken::new(), |_| {});
        assert_eq!(triage.finish(&report), TriageState::Completed);

        let moved: Vec<&str> = report.moved().map(|r| r.item.identity.key.as_str()).collect();
        store.clear_marks(moved);
        let rescanned = list_images(dir.path());
        store.reconcile(&rescanned);
        let session = store.snapshot();

        assert_eq!(session.explicit_mark("a.jpg"), None);
        assert_eq!(session.explicit_mark("b.jpg"), None);
        assert_eq!(session.mark_of(rescanned.get("c.jpg").unwrap()), Mark::Unmarked);
        assert_eq!(rescanned.get("_KEEPS/a.jpg").unwrap().location, Location::Keeps);

        let again = triage.prepare(&rescanned, &session).unwrap();
        assert!(again.is_empty());
        let report = execute(triage.confirm(store.revision()).unwrap(), &CancelToken::new(), |_| {});
        assert!(report.results.is_empty());
    }
}
