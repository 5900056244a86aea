//! JSON state records on disk.
//!
//! Reads never fail the caller: a missing file is `Ok(None)`, anything else
//! that goes wrong comes back as a `PersistenceWarning`. Writes go to a
//! temporary file first and are renamed into place.

use serde::Serialize;
use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use crate::error::PersistenceWarning;

/// Read and parse a record. `parse` receives the raw file text.
pub(crate) fn read_record<T, F>(path: &Path, parse: F) -> Result<Option<T>, PersistenceWarning>
where
    F: FnOnce(&str) -> Result<T, String>,
{
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
        Err(err) => {
            return Err(PersistenceWarning::Unreadable {
                path: path.to_path_buf(),
                reason: err.to_string(),
            })
        }
    };

    parse(&text).map(Some).map_err(|reason| PersistenceWarning::Malformed {
        path: path.to_path_buf(),
        reason,
    })
}

/// Serialize `value` as pretty JSON and atomically replace `path`
pub(crate) fn write_record<T: Serialize>(path: &Path, value: &T) -> Result<(), PersistenceWarning> {
    let unwritable = |reason: String| PersistenceWarning::Unwritable {
        path: path.to_path_buf(),
        reason,
    };

    let bytes = serde_json::to_vec_pretty(value).map_err(|e| unwritable(e.to_string()))?;

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| unwritable(e.to_string()))?;
    }

    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, &bytes).map_err(|e| unwritable(e.to_string()))?;

    // On Windows the target has to go first
    #[cfg(windows)]
    {
        if path.exists() {
            fs::remove_file(path).map_err(|e| unwritable(e.to_string()))?;
        }
    }

    fs::rename(&tmp, path).map_err(|e| {
        let _ = fs::remove_file(&tmp);
        unwritable(e.to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use tempfile::tempdir;

    fn parse_map(text: &str) -> Result<BTreeMap<String, u32>, String> {
        serde_json::from_str(text).map_err(|e| e.to_string())
    }

    #[test]
    fn test_missing_record_is_none() {
        let dir = tempdir().unwrap();
        assert_eq!(read_record(&dir.path().join("x.json"), parse_map).unwrap(), None);
    }

    #[test]
    fn test_write_then_read() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("x.json");
        let value: BTreeMap<String, u32> = [("a".to_string(), 1)].into_iter().collect();

        write_record(&path, &value).unwrap();
        assert_eq!(read_record(&path, parse_map).unwrap(), Some(value));
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn test_truncated_record_is_malformed() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("x.json");
        fs::write(&path, "{\"a\": 1").unwrap();
        assert!(matches!(
            read_record(&path, parse_map),
            Err(PersistenceWarning::Malformed { .. })
        ));
    }
}
