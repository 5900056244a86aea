//! CullSpeed: fast keep/reject triage for large folders of RAW and raster photos.
//!
//! - `source` lists a folder's images (root, `_KEEPS/`, `_REJECTS/`)
//! - `raw` classifies formats and decodes previews, embedded RAW previews first
//! - `cache` serves decoded thumbnails from a bounded, coalescing cache
//! - `state` holds marks, their per-folder record and the global record
//! - `triage` plans and performs the moves implied by the marks
//! - `engine` exposes all of the above as boundary operations

pub mod cache;
pub mod cancel;
pub mod config;
pub mod engine;
pub mod error;
pub mod logging;
pub mod raw;
pub mod source;
pub mod state;
pub mod triage;

pub use cache::{SizeClass, ThumbnailOutcome, ThumbnailStatus};
pub use cancel::CancelToken;
pub use config::Config;
pub use engine::{Engine, FolderSummary};
pub use error::{EngineError, EngineResult};
pub use state::data::{FileIdentity, Location, Mark};
