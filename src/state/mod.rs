//! State management module
//!
//! This module handles all triage state, including:
//! - Shared data structures (data.rs)
//! - Per-folder marks and their debounced persistence (session.rs)
//! - The last-folder / last-file record (global.rs)
//! - Atomic JSON record files (record.rs)

pub mod data;
pub mod global;
mod record;
pub mod session;
