//! Move planning.
//!
//! A plan is computed from the listing and the effective marks, handed out
//! as a `PendingPlan`, and can only be executed after `confirm` turns it
//! into a `ConfirmedPlan`.

use std::path::{Path, PathBuf};

use crate::source::Listing;
use crate::state::data::{FileIdentity, Location, Mark};
use crate::state::session::SessionState;

/// One planned relocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MovePlanItem {
    pub identity: FileIdentity,
    pub source: PathBuf,
    pub destination: Location,
    /// The mark driving the move
    pub mark: Mark,
}

impl MovePlanItem {
    pub fn from(&self) -> Location {
        self.identity.location
    }

    /// Destination directory inside `folder`
    pub fn destination_dir(&self, folder: &Path) -> PathBuf {
        self.destination.dir_in(folder)
    }
}

/// What the caller is shown before confirming
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MovePlanSummary {
    pub to_keeps: usize,
    pub to_rejects: usize,
    pub to_root: usize,
    /// Files already where their mark puts them
    pub unchanged: usize,
    pub items: Vec<MovePlanItem>,
}

impl MovePlanSummary {
    pub fn total_moves(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// A computed plan awaiting confirmation
#[derive(Debug, Clone)]
pub struct PendingPlan {
    folder: PathBuf,
    items: Vec<MovePlanItem>,
    unchanged: usize,
    /// Session revision the plan was computed against
    revision: u64,
}

/// A plan the caller explicitly confirmed; the only input the executor accepts
#[derive(Debug)]
pub struct ConfirmedPlan {
    pub(super) folder: PathBuf,
    pub(super) items: Vec<MovePlanItem>,
    pub(super) unchanged: usize,
}

/// Plan every file whose effective mark asks for a different location.
/// Items follow the listing order.
pub fn plan(listing: &Listing, session: &SessionState) -> PendingPlan {
    let folder = listing.folder();
    let mut items = Vec::new();
    let mut unchanged = 0;

    for identity in listing.files() {
        let mark = session.mark_of(identity);
        let destination = Location::for_mark(mark);
        if destination == identity.location {
            unchanged += 1;
            continue;
        }
        items.push(MovePlanItem {
            identity: identity.clone(),
            source: identity.path_in(folder),
            destination,
            mark,
        });
    }

    PendingPlan {
        folder: folder.to_path_buf(),
        items,
        unchanged,
        revision: session.revision(),
    }
}

impl PendingPlan {
    pub fn summary(&self) -> MovePlanSummary {
        let count = |location: Location| self.items.iter().filter(|i| i.destination == location).count();
        MovePlanSummary {
            to_keeps: count(Location::Keeps),
            to_rejects: count(Location::Rejects),
            to_root: count(Location::Root),
            unchanged: self.unchanged,
            items: self.items.clone(),
        }
    }

    pub fn folder(&self) -> &Path {
        &self.folder
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn confirm(self) -> ConfirmedPlan {
        ConfirmedPlan {
            folder: self.folder,
            items: self.items,
            unchanged: self.unchanged,
        }
    }
}

impl ConfirmedPlan {
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
