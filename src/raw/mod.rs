//! Image decoding module
//!
//! This module handles:
//! - Classifying files into standard raster vs. RAW containers
//! - Extracting embedded JPEG previews from RAW files
//! - Full sensor decode when no usable preview exists
//! - The preview decoder that picks between them

pub mod thumbnail;
pub mod loader;
pub mod preview;

use std::path::Path;

/// Standard raster formats decoded directly by the `image` crate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RasterKind {
    Jpeg,
    Png,
    WebP,
}

/// RAW container families with an embedded preview
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RawKind {
    /// Sony
    Arw,
    /// Canon (TIFF-based)
    Cr2,
    /// Canon (ISO-BMFF based)
    Cr3,
    /// Nikon
    Nef,
    /// Adobe digital negative
    Dng,
    /// Olympus / OM System
    Orf,
    /// Fujifilm
    Raf,
    /// Panasonic
    Rw2,
}

impl RawKind {
    /// Whether rawloader can decode sensor data for this container.
    /// CR3 is not supported by rawloader 0.37, so only the embedded preview is usable.
    pub fn supports_full_decode(self) -> bool {
        !matches!(self, RawKind::Cr3)
    }
}

/// Closed set of decode strategies, chosen once per file at enumeration time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FormatClass {
    StandardRaster(RasterKind),
    RawContainer(RawKind),
}

impl FormatClass {
    /// Classify a lowercase extension (without the dot).
    /// Returns None for anything outside the allow-list.
    pub fn from_extension(ext: &str) -> Option<Self> {
        let class = match ext {
            "jpg" | "jpeg" => FormatClass::StandardRaster(RasterKind::Jpeg),
            "png" => FormatClass::StandardRaster(RasterKind::Png),
            "webp" => FormatClass::StandardRaster(RasterKind::WebP),
            "arw" => FormatClass::RawContainer(RawKind::Arw),
            "cr2" => FormatClass::RawContainer(RawKind::Cr2),
            "cr3" => FormatClass::RawContainer(RawKind::Cr3),
            "nef" => FormatClass::RawContainer(RawKind::Nef),
            "dng" => FormatClass::RawContainer(RawKind::Dng),
            "orf" => FormatClass::RawContainer(RawKind::Orf),
            "raf" => FormatClass::RawContainer(RawKind::Raf),
            "rw2" => FormatClass::RawContainer(RawKind::Rw2),
            _ => return None,
        };
        Some(class)
    }

    /// Classify a path by its extension, case-insensitively
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_string_lossy().to_lowercase();
        Self::from_extension(&ext)
    }

    pub fn is_raw(self) -> bool {
        matches!(self, FormatClass::RawContainer(_))
    }
}
