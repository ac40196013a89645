//! File-based preference backend for persistent storage.

use crate::backend::PrefsBackend;
use crate::error::{StorageError, StorageResult};
use fs2::FileExt;
use parking_lot::RwLock;
use serde_json::{Map, Value};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

/// A preference backend persisted as a single JSON object on disk.
///
/// Every mutation rewrites the document with a write-then-rename so a crash
/// leaves either the old or the new file, never a torn one. A sibling
/// `.lock` file is held exclusively for the lifetime of the backend so two
/// processes cannot interleave writes.
///
/// # Example
///
/// ```no_run
/// use recsync_storage::{FilePrefs, PrefsBackend};
/// use serde_json::json;
/// use std::path::Path;
///
/// let prefs = FilePrefs::open(Path::new("prefs.json")).unwrap();
/// prefs.set("client.name", json!("laptop")).unwrap();
/// ```
#[derive(Debug)]
pub struct FilePrefs {
    path: PathBuf,
    values: RwLock<Map<String, Value>>,
    _lock_file: File,
}

impl FilePrefs {
    /// Opens or creates a preference file at the given path.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Locked`] if another process holds the file,
    /// [`StorageError::Corrupted`] if the existing file is not a JSON object,
    /// or an I/O error.
    pub fn open(path: &Path) -> StorageResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(lock_path(path))?;
        if lock_file.try_lock_exclusive().is_err() {
            return Err(StorageError::Locked);
        }

        let values = if path.exists() {
            let bytes = fs::read(path)?;
            if bytes.is_empty() {
                Map::new()
            } else {
                serde_json::from_slice::<Map<String, Value>>(&bytes)?
            }
        } else {
            Map::new()
        };

        tracing::debug!(path = %path.display(), entries = values.len(), "opened preference file");

        Ok(Self {
            path: path.to_path_buf(),
            values: RwLock::new(values),
            _lock_file: lock_file,
        })
    }

    /// Returns the path to the preference document.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, values: &Map<String, Value>) -> StorageResult<()> {
        let temp_path = self.path.with_extension("json.tmp");
        let bytes = serde_json::to_vec_pretty(values)?;
        {
            let mut temp = File::create(&temp_path)?;
            temp.write_all(&bytes)?;
            temp.sync_all()?;
        }
        fs::rename(&temp_path, &self.path)?;
        Ok(())
    }
}

fn lock_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".lock");
    PathBuf::from(name)
}

impl PrefsBackend for FilePrefs {
    fn get(&self, key: &str) -> StorageResult<Option<Value>> {
        Ok(self.values.read().get(key).cloned())
    }

    fn set(&self, key: &str, value: Value) -> StorageResult<()> {
        let mut values = self.values.write();
        values.insert(key.to_string(), value);
        self.persist(&values)
    }

    fn reset(&self, key: &str) -> StorageResult<()> {
        let mut values = self.values.write();
        if values.remove(key).is_some() {
            self.persist(&values)?;
        }
        Ok(())
    }

    fn keys(&self) -> StorageResult<Vec<String>> {
        let mut keys: Vec<String> = self.values.read().keys().cloned().collect();
        keys.sort();
        Ok(keys)
    }

    fn flush(&self) -> StorageResult<()> {
        let values = self.values.read();
        self.persist(&values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    #[test]
    fn file_values_survive_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("prefs.json");

        {
            let prefs = FilePrefs::open(&path).unwrap();
            prefs.set("history.lastSync", json!("1300000000.25")).unwrap();
            prefs.set("client.type", json!("mobile")).unwrap();
        }

        let prefs = FilePrefs::open(&path).unwrap();
        assert_eq!(
            prefs.get("history.lastSync").unwrap(),
            Some(json!("1300000000.25"))
        );
        assert_eq!(prefs.keys().unwrap(), vec!["client.type", "history.lastSync"]);
    }

    #[test]
    fn file_reset_is_persisted() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("prefs.json");

        {
            let prefs = FilePrefs::open(&path).unwrap();
            prefs.set("a", json!(1)).unwrap();
            prefs.reset("a").unwrap();
        }

        let prefs = FilePrefs::open(&path).unwrap();
        assert_eq!(prefs.get("a").unwrap(), None);
    }

    #[test]
    fn file_second_open_is_locked() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("prefs.json");

        let _first = FilePrefs::open(&path).unwrap();
        assert!(matches!(FilePrefs::open(&path), Err(StorageError::Locked)));
    }

    #[test]
    fn file_rejects_non_object_document() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("prefs.json");
        fs::write(&path, b"[1, 2, 3]").unwrap();

        assert!(matches!(
            FilePrefs::open(&path),
            Err(StorageError::Corrupted(_))
        ));
    }
}
