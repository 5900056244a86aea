//! Error and warning types.
//!
//! Per-file and per-item problems are collected and reported in aggregate;
//! only misuse of the boundary operations surfaces as `EngineError`.

use std::path::PathBuf;
use thiserror::Error;

/// Why a preview could not be produced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DecodeErrorKind {
    /// Format not handled by any decoder available for this file
    Unsupported,
    /// Bytes were read but could not be decoded
    Corrupt,
    /// The file could not be opened or read
    IoFailure,
    /// Decode exceeded the configured time budget
    Timeout,
}

/// A failed decode, surfaced to the UI as a failed-state placeholder
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{kind:?}: {message}")]
pub struct DecodeError {
    pub kind: DecodeErrorKind,
    pub message: String,
}

impl DecodeError {
    pub fn new(kind: DecodeErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::new(DecodeErrorKind::Unsupported, message)
    }

    pub fn corrupt(message: impl Into<String>) -> Self {
        Self::new(DecodeErrorKind::Corrupt, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(DecodeErrorKind::Timeout, message)
    }

    pub fn kind(&self) -> DecodeErrorKind {
        self.kind
    }
}

impl From<std::io::Error> for DecodeError {
    fn from(err: std::io::Error) -> Self {
        Self::new(DecodeErrorKind::IoFailure, err.to_string())
    }
}

impl From<image::ImageError> for DecodeError {
    fn from(err: image::ImageError) -> Self {
        match err {
            image::ImageError::IoError(io) => io.into(),
            image::ImageError::Unsupported(e) => Self::unsupported(e.to_string()),
            other => Self::corrupt(other.to_string()),
        }
    }
}

/// A directory entry skipped during enumeration
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("skipped {}: {reason}", path.display())]
pub struct EnumerationWarning {
    pub path: PathBuf,
    pub reason: String,
}

/// A state record that could not be used; the caller continues with an empty record
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PersistenceWarning {
    #[error("state file {} is malformed: {reason}", path.display())]
    Malformed { path: PathBuf, reason: String },

    #[error("state file {} could not be read: {reason}", path.display())]
    Unreadable { path: PathBuf, reason: String },

    #[error("state file {} could not be written: {reason}", path.display())]
    Unwritable { path: PathBuf, reason: String },
}

/// Why a single planned move did not happen
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MoveFailure {
    #[error("permission denied: {0}")]
    Permission(String),

    #[error("destination is on another device and copying failed: {0}")]
    CrossDevice(String),

    #[error("source file vanished before it could be moved")]
    VanishedSource,

    #[error("no free destination name after {attempts} attempts")]
    NameCollisionUnresolved { attempts: u32 },

    #[error("I/O error: {0}")]
    Io(String),
}

impl MoveFailure {
    /// Map an I/O error from rename/copy into the failure taxonomy
    pub fn from_io(err: &std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => MoveFailure::VanishedSource,
            std::io::ErrorKind::PermissionDenied => MoveFailure::Permission(err.to_string()),
            std::io::ErrorKind::CrossesDevices => MoveFailure::CrossDevice(err.to_string()),
            _ => MoveFailure::Io(err.to_string()),
        }
    }
}

/// Errors from the persistent preview tier. Always treated as a cache miss.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("catalog error: {0}")]
    Catalog(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),
}

/// Misuse of the boundary operations
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("no folder is open")]
    NoFolderOpen,

    #[error("no plan is awaiting confirmation; request a plan preview first")]
    NoPendingPlan,

    #[error("marks changed since the plan was previewed; request a new preview")]
    PlanOutdated,

    #[error("a batch move is already running")]
    BatchRunning,

    #[error("{0} planned moves failed")]
    PartialFailure(usize),

    #[error("unknown file: {0}")]
    UnknownFile(String),

    #[error("batch worker stopped without a report; rescan the folder")]
    BatchLost,
}

pub type EngineResult<T> = Result<T, EngineError>;
