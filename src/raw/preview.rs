//! Preview decoder
//!
//! Turns a file path plus its format class into a display-ready bitmap no
//! larger than the requested size. For RAW containers the embedded preview
//! is preferred even when it is somewhat smaller than requested; sensor
//! decode only runs when no preview comes close.

use image::{DynamicImage, ImageReader, RgbaImage};
use std::path::Path;
use tracing::{debug, warn};

use super::{loader, thumbnail, FormatClass, RasterKind, RawKind};
use crate::error::DecodeError;

/// How a preview was produced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreviewOrigin {
    /// Standard raster decoded directly
    Raster,
    /// JPEG embedded in a RAW container
    EmbeddedPreview,
    /// Full sensor decode of a RAW container
    SensorDecode,
}

/// A decoded, downscaled bitmap
#[derive(Debug, Clone)]
pub struct DecodedPreview {
    pub image: RgbaImage,
    pub origin: PreviewOrigin,
}

/// Decode strategy used by the thumbnail cache workers.
///
/// Implementations must be pure with respect to the cache: same inputs,
/// same bitmap (or same failure).
pub trait Decode: Send + Sync + 'static {
    fn decode(
        &self,
        path: &Path,
        format: FormatClass,
        target_long_edge: u32,
    ) -> Result<DecodedPreview, DecodeError>;
}

/// Default decoder backed by the `image` crate and `rawloader`
#[derive(Debug, Clone, Copy)]
pub struct PreviewDecoder {
    /// Accept an embedded preview whose long edge is at least this fraction of the target
    tolerance: f32,
}

impl Default for PreviewDecoder {
    fn default() -> Self {
        Self { tolerance: 0.75 }
    }
}

impl PreviewDecoder {
    pub fn new(tolerance: f32) -> Self {
        Self {
            tolerance: tolerance.clamp(0.05, 1.0),
        }
    }

    /// Smallest embedded preview long edge accepted for a target size
    pub fn min_embedded_edge(&self, target_long_edge: u32) -> u32 {
        ((target_long_edge as f32) * self.tolerance).ceil() as u32
    }

    fn decode_raster(
        &self,
        path: &Path,
        kind: RasterKind,
        target_long_edge: u32,
    ) -> Result<DecodedPreview, DecodeError> {
        let img = ImageReader::open(path)?.with_guessed_format()?.decode()?;
        debug!(
            "🖼️  Decoded {:?} {}x{} from {:?}",
            kind,
            img.width(),
            img.height(),
            path.file_name().unwrap_or_default()
        );
        Ok(fit(img, target_long_edge, PreviewOrigin::Raster))
    }

    fn decode_raw(
        &self,
        path: &Path,
        kind: RawKind,
        target_long_edge: u32,
    ) -> Result<DecodedPreview, DecodeError> {
        let min_edge = self.min_embedded_edge(target_long_edge);

        // Tier 1: embedded preview (cheap)
        let embedded = match thumbnail::extract_embedded_preview(path, min_edge)? {
            Some(img) if thumbnail::long_edge(&img) >= min_edge => {
                return Ok(fit(img, target_long_edge, PreviewOrigin::EmbeddedPreview));
            }
            other => other,
        };

        if !kind.supports_full_decode() {
            return embedded
                .map(|img| fit(img, target_long_edge, PreviewOrigin::EmbeddedPreview))
                .ok_or_else(|| {
                    DecodeError::unsupported(format!("{:?} has no embedded preview", kind))
                });
        }

        // Tier 2: sensor decode (expensive)
        match loader::decode_sensor(path) {
            Ok(img) => Ok(fit(img, target_long_edge, PreviewOrigin::SensorDecode)),
            Err(err) => match embedded {
                Some(img) => {
                    warn!(
                        "⚠️  Sensor decode failed for {:?} ({}), using small embedded preview",
                        path.file_name().unwrap_or_default(),
                        err
                    );
                    Ok(fit(img, target_long_edge, PreviewOrigin::EmbeddedPreview))
                }
                None => Err(err),
            },
        }
    }
}

impl Decode for PreviewDecoder {
    fn decode(
        &self,
        path: &Path,
        format: FormatClass,
        target_long_edge: u32,
    ) -> Result<DecodedPreview, DecodeError> {
        match format {
            FormatClass::StandardRaster(kind) => self.decode_raster(path, kind, target_long_edge),
            FormatClass::RawContainer(kind) => self.decode_raw(path, kind, target_long_edge),
        }
    }
}

/// Downscale (never upscale) to fit within `target_long_edge`, keeping aspect ratio
fn fit(img: DynamicImage, target_long_edge: u32, origin: PreviewOrigin) -> DecodedPreview {
    let target = target_long_edge.max(1);
    let img = if thumbnail::long_edge(&img) > target {
        img.thumbnail(target, target)
    } else {
        img
    };
    DecodedPreview {
        image: img.to_rgba8(),
        origin,
    }
}
