//! RAW sensor data loader
//!
//! This module decodes the actual sensor data from RAW files (not embedded JPEGs).
//! It is the slow fallback used only when a container carries no preview
//! large enough for the requested size.

use image::{DynamicImage, RgbImage};
use std::path::Path;
use tracing::debug;

use crate::error::DecodeError;

/// Display gamma applied to linear sensor values
const GAMMA: f32 = 1.0 / 2.2;

/// Decode sensor data into a half-resolution RGB image.
///
/// Bayer data is binned 2x2 (one output pixel per CFA block), which is
/// plenty for a display preview and avoids a full demosaic. White balance
/// uses the as-shot coefficients; no color matrix is applied.
pub fn decode_sensor(path: &Path) -> Result<DynamicImage, DecodeError> {
    // Surface a missing/unreadable file as an I/O failure rather than a decoder error
    std::fs::metadata(path)?;

    // rawloader can panic on malformed containers; treat that as corruption
    let raw = std::panic::catch_unwind(|| rawloader::decode_file(path))
        .map_err(|_| DecodeError::corrupt("RAW decoder panicked"))?
        .map_err(|e| DecodeError::corrupt(format!("Failed to decode RAW: {:?}", e)))?;

    let values: Vec<f32> = match &raw.data {
        rawloader::RawImageData::Integer(values) => values.iter().map(|&v| v as f32).collect(),
        // Float data is normalized to 0.0-1.0, scale to the integer range
        rawloader::RawImageData::Float(values) => values.iter().map(|&v| v * 65535.0).collect(),
    };

    let width = raw.width;
    let height = raw.height;
    if width == 0 || height == 0 || values.len() < width * height * raw.cpp {
        return Err(DecodeError::corrupt("sensor data is truncated"));
    }

    let wb = normalized_white_balance(&raw.wb_coeffs);
    let black: [f32; 4] = raw.blacklevels.map(|b| b as f32);
    let white: [f32; 4] = raw.whitelevels.map(|w| w as f32);
    let normalize = |v: f32, c: usize| -> f32 {
        let range = (white[c] - black[c]).max(1.0);
        (((v - black[c]) / range) * wb[c]).clamp(0.0, 1.0)
    };

    // crops are [top, right, bottom, left]
    let [top, right, bottom, left] = raw.crops;
    let x0 = left.min(width);
    let y0 = top.min(height);
    let x1 = width.saturating_sub(right).max(x0);
    let y1 = height.saturating_sub(bottom).max(y0);

    let img = if raw.cpp == 3 {
        let out_w = ((x1 - x0) / 2).max(1);
        let out_h = ((y1 - y0) / 2).max(1);
        let mut out = RgbImage::new(out_w as u32, out_h as u32);
        for (ox, oy, px) in out.enumerate_pixels_mut() {
            let x = (x0 + ox as usize * 2).min(width - 1);
            let y = (y0 + oy as usize * 2).min(height - 1);
            let base = (y * width + x) * 3;
            for c in 0..3 {
                px[c] = to_display(normalize(values[base + c], c));
            }
        }
        out
    } else {
        // Keep block alignment on even CFA offsets
        let x0 = x0 & !1;
        let y0 = y0 & !1;
        let out_w = ((x1 - x0) / 2).max(1);
        let out_h = ((y1 - y0) / 2).max(1);
        let mut out = RgbImage::new(out_w as u32, out_h as u32);
        for (ox, oy, px) in out.enumerate_pixels_mut() {
            let bx = x0 + ox as usize * 2;
            let by = y0 + oy as usize * 2;
            let mut sums = [0.0f32; 3];
            let mut counts = [0u32; 3];
            for dy in 0..2 {
                for dx in 0..2 {
                    let x = (bx + dx).min(width - 1);
                    let y = (by + dy).min(height - 1);
                    // Color index 3 is the second green (or emerald) site
                    let cfa = raw.cfa.color_at(y, x);
                    let channel = if cfa == 3 { 1 } else { cfa.min(2) };
                    sums[channel] += normalize(values[y * width + x], cfa.min(3));
                    counts[channel] += 1;
                }
            }
            for c in 0..3 {
                let v = if counts[c] > 0 { sums[c] / counts[c] as f32 } else { 0.0 };
                px[c] = to_display(v);
            }
        }
        out
    };

    debug!(
        "📷 Decoded sensor data {}x{} -> {}x{} for {:?}",
        width,
        height,
        img.width(),
        img.height(),
        path.file_name().unwrap_or_default()
    );

    Ok(DynamicImage::ImageRgb8(img))
}

/// White balance multipliers normalized so green is 1.0.
/// Missing or invalid coefficients fall back to neutral.
fn normalized_white_balance(coeffs: &[f32; 4]) -> [f32; 4] {
    let valid = |v: f32| v.is_finite() && v > 0.0;
    if !valid(coeffs[0]) || !valid(coeffs[1]) || !valid(coeffs[2]) {
        return [1.0, 1.0, 1.0, 1.0];
    }
    let g = coeffs[1];
    let g2 = if valid(coeffs[3]) { coeffs[3] } else { coeffs[1] };
    [coeffs[0] / g, 1.0, coeffs[2] / g, g2 / g]
}

fn to_display(linear: f32) -> u8 {
    (linear.powf(GAMMA) * 255.0).round().clamp(0.0, 255.0) as u8
}
