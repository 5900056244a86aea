//! Embedded preview extraction for RAW containers.
//!
//! Most RAW formats carry one or more pre-rendered JPEGs (EXIF thumbnail,
//! medium preview, full-size preview). Pulling one of those out is one to
//! two orders of magnitude cheaper than decoding sensor data, so it is
//! always tried first.

use image::{DynamicImage, ImageFormat, ImageReader};
use std::fs::File;
use std::io::{Cursor, Read};
use std::path::Path;
use tracing::debug;

use crate::error::DecodeError;

/// Bytes scanned in the fast pass. Small previews usually sit near the start of the file.
const FAST_SCAN_BYTES: u64 = 512 * 1024;

/// JPEG Start Of Image followed by the first marker prefix
const JPEG_START: [u8; 3] = [0xFF, 0xD8, 0xFF];

/// Stop looking after this many candidate headers (sensor data can contain stray markers)
const MAX_CANDIDATES: usize = 32;

/// An embedded JPEG whose header parsed successfully
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JpegCandidate {
    /// Offset of the SOI marker in the buffer
    pub offset: usize,
    pub width: u32,
    pub height: u32,
}

impl JpegCandidate {
    fn pixels(&self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

/// Long edge of a decoded image
pub fn long_edge(img: &DynamicImage) -> u32 {
    img.width().max(img.height())
}

/// Extract the best embedded preview from a RAW file.
///
/// Tier 1 scans only the first 512KB; if that yields a preview whose long
/// edge reaches `min_long_edge` it is returned immediately. Otherwise the
/// whole file is read and the largest decodable JPEG wins. Returns
/// `Ok(None)` when the container has no usable embedded JPEG at all.
pub fn extract_embedded_preview(
    raw_path: &Path,
    min_long_edge: u32,
) -> Result<Option<DynamicImage>, DecodeError> {
    let file = File::open(raw_path)?;
    let file_len = file.metadata()?.len();

    // Tier 1: fast prefix scan
    let mut prefix = Vec::with_capacity(FAST_SCAN_BYTES.min(file_len) as usize);
    file.take(FAST_SCAN_BYTES).read_to_end(&mut prefix)?;
    let fast = decode_largest_jpeg(&prefix);
    if let Some(img) = &fast {
        if long_edge(img) >= min_long_edge || file_len <= FAST_SCAN_BYTES {
            debug!(
                "📸 Embedded preview {}x{} from fast scan of {:?}",
                img.width(),
                img.height(),
                raw_path.file_name().unwrap_or_default()
            );
            return Ok(fast);
        }
    } else if file_len <= FAST_SCAN_BYTES {
        return Ok(None);
    }

    // Tier 2: whole file
    let data = std::fs::read(raw_path)?;
    let full = decode_largest_jpeg(&data);

    let best = match (fast, full) {
        (Some(a), Some(b)) => Some(if long_edge(&b) >= long_edge(&a) { b } else { a }),
        (a, b) => b.or(a),
    };
    if let Some(img) = &best {
        debug!(
            "📸 Embedded preview {}x{} from full scan of {:?}",
            img.width(),
            img.height(),
            raw_path.file_name().unwrap_or_default()
        );
    }
    Ok(best)
}

/// Find embedded JPEG headers in `data`, largest first
pub fn find_jpeg_candidates(data: &[u8]) -> Vec<JpegCandidate> {
    let mut candidates = Vec::new();
    let mut pos = 0;

    while pos + JPEG_START.len() <= data.len() && candidates.len() < MAX_CANDIDATES {
        let Some(found) = data[pos..]
            .windows(JPEG_START.len())
            .position(|window| window == JPEG_START)
        else {
            break;
        };
        let offset = pos + found;

        let reader = ImageReader::with_format(Cursor::new(&data[offset..]), ImageFormat::Jpeg);
        if let Ok((width, height)) = reader.into_dimensions() {
            if width > 0 && height > 0 {
                candidates.push(JpegCandidate { offset, width, height });
            }
        }
        pos = offset + JPEG_START.len();
    }

    candidates.sort_by(|a, b| b.pixels().cmp(&a.pixels()).then(a.offset.cmp(&b.offset)));
    candidates
}

/// Decode the largest embedded JPEG that actually decodes
pub fn decode_largest_jpeg(data: &[u8]) -> Option<DynamicImage> {
    for candidate in find_jpeg_candidates(data) {
        let reader =
            ImageReader::with_format(Cursor::new(&data[candidate.offset..]), ImageFormat::Jpeg);
        if let Ok(img) = reader.decode() {
            return Some(img);
        }
    }
    None
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use image::codecs::jpeg::JpegEncoder;
    use image::{Rgb, RgbImage};
    use std::fs;
    use tempfile::tempdir;

    /// Encode a solid-color JPEG of the given size
    pub(crate) fn jpeg_bytes(width: u32, height: u32) -> Vec<u8> {
        let img = RgbImage::from_pixel(width, height, Rgb([200, 40, 90]));
        let mut out = Vec::new();
        JpegEncoder::new_with_quality(&mut out, 80)
            .encode_image(&img)
            .unwrap();
        out
    }

    /// A fake RAW container: filler bytes with JPEGs embedded at the given sizes
    pub(crate) fn fake_raw(previews: &[(u32, u32)]) -> Vec<u8> {
        let mut data = b"II*\0".to_vec();
        data.extend(std::iter::repeat(0x11u8).take(4096));
        for &(w, h) in previews {
            data.extend(jpeg_bytes(w, h));
            data.extend(std::iter::repeat(0x22u8).take(1024));
        }
        data
    }

    #[test]
    fn test_finds_largest_candidate_first() {
        let data = fake_raw(&[(160, 120), (640, 480)]);
        let candidates = find_jpeg_candidates(&data);
        assert_eq!(candidates.len(), 2);
        assert_eq!((candidates[0].width, candidates[0].height), (640, 480));
    }

    #[test]
    fn test_no_jpeg_means_no_candidates() {
        let data = vec![0x42u8; 10_000];
        assert!(find_jpeg_candidates(&data).is_empty());
        assert!(decode_largest_jpeg(&data).is_none());
    }

    #[test]
    fn test_extracts_preview_from_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("DSC_0001.NEF");
        fs::write(&path, fake_raw(&[(160, 120), (800, 600)])).unwrap();

        let img = extract_embedded_preview(&path, 256).unwrap().unwrap();
        assert_eq!((img.width(), img.height()), (800, 600));
    }

    #[test]
    fn test_returns_small_preview_when_nothing_larger_exists() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("small.arw");
        fs::write(&path, fake_raw(&[(160, 120)])).unwrap();

        let img = extract_embedded_preview(&path, 3000).unwrap().unwrap();
        assert_eq!(long_edge(&img), 160);
    }

    #[test]
    fn test_missing_file_is_io_failure() {
        let dir = tempdir().unwrap();
        let err = extract_embedded_preview(&dir.path().join("nope.nef"), 256).unwrap_err();
        assert_eq!(err.kind(), crate::error::DecodeErrorKind::IoFailure);
    }
}
