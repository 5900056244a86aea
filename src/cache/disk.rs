use chrono::Utc;
use image::{DynamicImage, ImageFormat, RgbaImage};
use rusqlite::{params, Connection, OptionalExtension};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, info, warn};

use super::SizeClass;
use crate::error::CacheError;
use crate::raw::preview::{DecodedPreview, PreviewOrigin};

/// Identity of a persisted preview.
///
/// Uses the file name rather than the folder-relative key so entries survive
/// a move into `_KEEPS/` or `_REJECTS/` (a rename keeps size and mtime).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiskKey {
    pub name: String,
    pub len: u64,
    pub modified_ns: i64,
    pub size: SizeClass,
}

/// The persistent preview tier: a SQLite catalog plus one JPEG per entry.
///
/// A pure optimization. Every failure here is reported to the caller as a
/// `CacheError` and treated as a miss.
pub struct DiskCache {
    conn: Mutex<Connection>,
    dir: PathBuf,
    budget_bytes: u64,
}

impl DiskCache {
    /// Open (or create) the catalog at `catalog_path`, storing preview files in `dir`
    pub fn open(catalog_path: &Path, dir: &Path, budget_bytes: u64) -> Result<Self, CacheError> {
        if let Some(parent) = catalog_path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::create_dir_all(dir)?;

        let conn = Connection::open(catalog_path)?;
        let cache = DiskCache {
            conn: Mutex::new(conn),
            dir: dir.to_path_buf(),
            budget_bytes,
        };
        cache.init_schema()?;

        let pruned = cache.prune_missing()?;
        if pruned > 0 {
            info!("🔄 Dropped {} catalog rows whose preview files are gone", pruned);
        }
        debug!("📁 Preview catalog at {}", catalog_path.display());
        Ok(cache)
    }

    fn conn(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Create tables and indexes if they don't exist
    fn init_schema(&self) -> Result<(), CacheError> {
        let conn = self.conn();
        conn.execute(
            "CREATE TABLE IF NOT EXISTS previews (
                id              INTEGER PRIMARY KEY AUTOINCREMENT,
                file_name       TEXT NOT NULL,
                file_len        INTEGER NOT NULL,
                modified_ns     INTEGER NOT NULL,
                size_class      TEXT NOT NULL,
                origin          TEXT NOT NULL,
                bytes           INTEGER NOT NULL,
                created_at      INTEGER NOT NULL,
                last_used       INTEGER NOT NULL,
                UNIQUE(file_name, file_len, modified_ns, size_class)
            )",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_previews_last_used
             ON previews(last_used)",
            [],
        )?;
        Ok(())
    }

    fn file_path(&self, id: i64) -> PathBuf {
        self.dir.join(format!("{}.jpg", id))
    }

    /// Load a persisted preview. Missing or unreadable files drop their row and count as a miss.
    pub fn load(&self, key: &DiskKey) -> Result<Option<(RgbaImage, PreviewOrigin)>, CacheError> {
        let row: Option<(i64, String)> = self
            .conn()
            .query_row(
                "SELECT id, origin FROM previews
                 WHERE file_name = ?1 AND file_len = ?2 AND modified_ns = ?3 AND size_class = ?4",
                params![key.name, key.len as i64, key.modified_ns, key.size.as_str()],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let Some((id, origin)) = row else {
            return Ok(None);
        };

        let path = self.file_path(id);
        match image::open(&path) {
            Ok(img) => {
                self.conn().execute(
                    "UPDATE previews SET last_used = ?1 WHERE id = ?2",
                    params![Utc::now().timestamp_millis(), id],
                )?;
                Ok(Some((img.to_rgba8(), origin_from_str(&origin))))
            }
            Err(err) => {
                warn!("⚠️  Discarding unreadable cached preview {}: {}", path.display(), err);
                self.remove_row(id)?;
                Ok(None)
            }
        }
    }

    /// Persist a decoded preview, replacing any previous entry for the same key
    pub fn store(&self, key: &DiskKey, preview: &DecodedPreview) -> Result<(), CacheError> {
        let rgb = DynamicImage::ImageRgba8(preview.image.clone()).to_rgb8();
        let now = Utc::now().timestamp_millis();

        let id = {
            let conn = self.conn();
            let existing: Option<i64> = conn
                .query_row(
                    "SELECT id FROM previews
                     WHERE file_name = ?1 AND file_len = ?2 AND modified_ns = ?3 AND size_class = ?4",
                    params![key.name, key.len as i64, key.modified_ns, key.size.as_str()],
                    |row| row.get(0),
                )
                .optional()?;
            match existing {
                Some(id) => id,
                None => {
                    conn.execute(
                        "INSERT INTO previews
                         (file_name, file_len, modified_ns, size_class, origin, bytes, created_at, last_used)
                         VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6, ?6)",
                        params![
                            key.name,
                            key.len as i64,
                            key.modified_ns,
                            key.size.as_str(),
                            origin_as_str(preview.origin),
                            now
                        ],
                    )?;
                    conn.last_insert_rowid()
                }
            }
        };

        // Write next to the target and rename into place
        let path = self.file_path(id);
        let tmp = path.with_extension("jpg.tmp");
        let written = rgb
            .save_with_format(&tmp, ImageFormat::Jpeg)
            .map_err(CacheError::from)
            .and_then(|_| fs::rename(&tmp, &path).map_err(CacheError::from));
        if let Err(err) = written {
            let _ = fs::remove_file(&tmp);
            self.remove_row(id)?;
            return Err(err);
        }

        let bytes = fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
        self.conn().execute(
            "UPDATE previews SET bytes = ?1, origin = ?2, last_used = ?3 WHERE id = ?4",
            params![bytes as i64, origin_as_str(preview.origin), now, id],
        )?;

        self.enforce_budget()?;
        Ok(())
    }

    fn remove_row(&self, id: i64) -> Result<(), CacheError> {
        self.conn()
            .execute("DELETE FROM previews WHERE id = ?1", params![id])?;
        let _ = fs::remove_file(self.file_path(id));
        Ok(())
    }

    /// Verify cached previews actually exist on disk; drop rows whose file is missing
    pub fn prune_missing(&self) -> Result<usize, CacheError> {
        let ids: Vec<i64> = {
            let conn = self.conn();
            let mut stmt = conn.prepare("SELECT id FROM previews")?;
            let rows = stmt.query_map([], |row| row.get(0))?;
            rows.filter_map(|r| r.ok()).collect()
        };

        let mut removed = 0;
        for id in ids {
            if !self.file_path(id).exists() {
                self.remove_row(id)?;
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Evict least-recently-used previews until the tier fits its byte budget
    pub fn enforce_budget(&self) -> Result<usize, CacheError> {
        let mut total = self.total_bytes()?;
        if total <= self.budget_bytes {
            return Ok(0);
        }

        let oldest: Vec<(i64, u64)> = {
            let conn = self.conn();
            let mut stmt = conn.prepare("SELECT id, bytes FROM previews ORDER BY last_used ASC")?;
            let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get::<_, i64>(1)? as u64)))?;
            rows.filter_map(|r| r.ok()).collect()
        };

        let mut evicted = 0;
        for (id, bytes) in oldest {
            if total <= self.budget_bytes {
                break;
            }
            self.remove_row(id)?;
            total = total.saturating_sub(bytes);
            evicted += 1;
        }
        debug!("Evicted {} persisted previews to fit budget", evicted);
        Ok(evicted)
    }

    pub fn total_bytes(&self) -> Result<u64, CacheError> {
        let total: i64 = self.conn().query_row(
            "SELECT COALESCE(SUM(bytes), 0) FROM previews",
            [],
            |row| row.get(0),
        )?;
        Ok(total.max(0) as u64)
    }

    pub fn entry_count(&self) -> Result<usize, CacheError> {
        let count: i64 = self
            .conn()
            .query_row("SELECT COUNT(*) FROM previews", [], |row| row.get(0))?;
        Ok(count.max(0) as usize)
    }
}

// Implement Debug for better error messages
impl std::fmt::Debug for DiskCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiskCache")
            .field("dir", &self.dir)
            .field("budget_bytes", &self.budget_bytes)
            .finish()
    }
}

fn origin_as_str(origin: PreviewOrigin) -> &'static str {
    match origin {
        PreviewOrigin::Raster => "raster",
        PreviewOrigin::EmbeddedPreview => "embedded",
        PreviewOrigin::SensorDecode => "sensor",
    }
}

fn origin_from_str(s: &str) -> PreviewOrigin {
    match s {
        "raster" => PreviewOrigin::Raster,
        "sensor" => PreviewOrigin::SensorDecode,
        _ => PreviewOrigin::EmbeddedPreview,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;
    use tempfile::tempdir;

    fn key(name: &str) -> DiskKey {
        DiskKey {
            name: name.to_string(),
            len: 1234,
            modified_ns: 99,
            size: SizeClass::Thumbnail,
        }
    }

    fn preview(w: u32, h: u32) -> DecodedPreview {
        DecodedPreview {
            image: RgbaImage::from_pixel(w, h, Rgba([10, 200, 30, 255])),
            origin: PreviewOrigin::EmbeddedPreview,
        }
    }

    #[test]
    fn test_store_then_load() {
        let dir = tempdir().unwrap();
        let cache = DiskCache::open(&dir.path().join("c.db"), &dir.path().join("p"), u64::MAX).unwrap();

        assert!(cache.load(&key("a.nef")).unwrap().is_none());
        cache.store(&key("a.nef"), &preview(64, 48)).unwrap();

        let (img, origin) = cache.load(&key("a.nef")).unwrap().unwrap();
        assert_eq!((img.width(), img.height()), (64, 48));
        assert_eq!(origin, PreviewOrigin::EmbeddedPreview);
        assert_eq!(cache.entry_count().unwrap(), 1);
    }

    #[test]
    fn test_different_fingerprint_is_a_miss() {
        let dir = tempdir().unwrap();
        let cache = DiskCache::open(&dir.path().join("c.db"), &dir.path().join("p"), u64::MAX).unwrap();
        cache.store(&key("a.nef"), &preview(16, 16)).unwrap();

        let mut edited = key("a.nef");
        edited.modified_ns = 100;
        assert!(cache.load(&edited).unwrap().is_none());
    }

    #[test]
    fn test_corrupt_preview_file_is_a_miss() {
        let dir = tempdir().unwrap();
        let files = dir.path().join("p");
        let cache = DiskCache::open(&dir.path().join("c.db"), &files, u64::MAX).unwrap();
        cache.store(&key("a.nef"), &preview(16, 16)).unwrap();

        for entry in fs::read_dir(&files).unwrap() {
            fs::write(entry.unwrap().path(), b"garbage").unwrap();
        }
        assert!(cache.load(&key("a.nef")).unwrap().is_none());
        assert_eq!(cache.entry_count().unwrap(), 0);
    }

    #[test]
    fn test_reopen_prunes_missing_files() {
        let dir = tempdir().unwrap();
        let files = dir.path().join("p");
        {
            let cache = DiskCache::open(&dir.path().join("c.db"), &files, u64::MAX).unwrap();
            cache.store(&key("a.nef"), &preview(16, 16)).unwrap();
        }
        fs::remove_dir_all(&files).unwrap();

        let cache = DiskCache::open(&dir.path().join("c.db"), &files, u64::MAX).unwrap();
        assert_eq!(cache.entry_count().unwrap(), 0);
    }

    #[test]
    fn test_budget_evicts_oldest() {
        let dir = tempdir().unwrap();
        let cache = DiskCache::open(&dir.path().join("c.db"), &dir.path().join("p"), 1).unwrap();
        cache.store(&key("a.nef"), &preview(32, 32)).unwrap();
        // Budget of one byte cannot hold any preview
        assert_eq!(cache.entry_count().unwrap(), 0);
        assert_eq!(cache.total_bytes().unwrap(), 0);
    }
}
