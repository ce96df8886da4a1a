//! Line-oriented disk store.
//!
//! Each record occupies one line, `key,value`. Keys must not contain a
//! comma; values may. The file is rewritten in full on mutation, which
//! keeps the format trivially recoverable and is adequate at the data
//! volumes a single partition holds.

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use tessera_ring::{key_digest, HashRange};
use tracing::debug;

use crate::StoreError;

/// Disk-backed key-value records for one node.
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    /// Opens the store at `path`, creating an empty file if none exists.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() {
                fs::create_dir_all(dir)?;
            }
        }
        if !path.exists() {
            File::create(&path)?;
        }
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<Vec<(String, String)>, StoreError> {
        let file = File::open(&self.path)?;
        let reader = BufReader::new(file);
        let mut records = Vec::new();
        for (idx, line) in reader.lines().enumerate() {
            let line = line?;
            if line.is_empty() {
                continue;
            }
            let (key, value) = line.split_once(',').ok_or(StoreError::MalformedRecord {
                line: idx + 1,
                text: line.clone(),
            })?;
            records.push((key.to_string(), value.to_string()));
        }
        Ok(records)
    }

    fn save(&self, records: &[(String, String)]) -> Result<(), StoreError> {
        let tmp = self.path.with_extension("tmp");
        {
            let file = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&tmp)?;
            let mut writer = BufWriter::new(file);
            for (key, value) in records {
                writeln!(writer, "{key},{value}")?;
            }
            writer.flush()?;
        }
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    /// Looks up a key. `None` if absent.
    pub fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self
            .load()?
            .into_iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v))
    }

    /// Inserts or replaces a record. Returns true if the key already
    /// existed (an update rather than an insert).
    pub fn put(&self, key: &str, value: &str) -> Result<bool, StoreError> {
        if key.contains(',') {
            return Err(StoreError::InvalidKey(key.to_string()));
        }
        let mut records = self.load()?;
        let existing = records.iter_mut().find(|(k, _)| k == key);
        let updated = match existing {
            Some(slot) => {
                slot.1 = value.to_string();
                true
            }
            None => {
                records.push((key.to_string(), value.to_string()));
                false
            }
        };
        self.save(&records)?;
        Ok(updated)
    }

    /// Removes a record. Returns true if the key was present.
    pub fn remove(&self, key: &str) -> Result<bool, StoreError> {
        let mut records = self.load()?;
        let before = records.len();
        records.retain(|(k, _)| k != key);
        let removed = records.len() != before;
        if removed {
            self.save(&records)?;
        }
        Ok(removed)
    }

    /// Records whose key digest falls inside `range`.
    pub fn scan_range(&self, range: HashRange) -> Result<Vec<(String, String)>, StoreError> {
        Ok(self
            .load()?
            .into_iter()
            .filter(|(k, _)| range.contains(key_digest(k)))
            .collect())
    }

    /// Removes and returns the records whose key digest falls inside
    /// `range`. Used when a partition is handed to another node.
    pub fn take_range(&self, range: HashRange) -> Result<Vec<(String, String)>, StoreError> {
        let records = self.load()?;
        let (taken, kept): (Vec<_>, Vec<_>) = records
            .into_iter()
            .partition(|(k, _)| range.contains(key_digest(k)));
        if !taken.is_empty() {
            self.save(&kept)?;
            debug!(moved = taken.len(), "handed off key range");
        }
        Ok(taken)
    }

    /// Every record in the store.
    pub fn dump_all(&self) -> Result<Vec<(String, String)>, StoreError> {
        self.load()
    }

    /// Upserts a batch of records. Idempotent: loading the same batch
    /// twice leaves the store unchanged.
    pub fn bulk_load(&self, entries: &[(String, String)]) -> Result<(), StoreError> {
        if entries.is_empty() {
            return Ok(());
        }
        let mut records = self.load()?;
        for (key, value) in entries {
            match records.iter_mut().find(|(k, _)| k == key) {
                Some(slot) => slot.1 = value.clone(),
                None => records.push((key.clone(), value.clone())),
            }
        }
        self.save(&records)
    }

    /// Drops every record.
    pub fn clear(&self) -> Result<(), StoreError> {
        self.save(&[])
    }

    pub fn len(&self) -> Result<usize, StoreError> {
        Ok(self.load()?.len())
    }

    pub fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.load()?.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_ring::Digest;

    fn store() -> (tempfile::TempDir, FileStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path().join("data.store")).unwrap();
        (dir, store)
    }

    #[test]
    fn put_get_remove() {
        let (_dir, store) = store();
        assert!(!store.put("alpha", "1").unwrap());
        assert!(store.put("alpha", "2").unwrap()); // update
        assert_eq!(store.get("alpha").unwrap().as_deref(), Some("2"));
        assert!(store.remove("alpha").unwrap());
        assert!(!store.remove("alpha").unwrap());
        assert_eq!(store.get("alpha").unwrap(), None);
    }

    #[test]
    fn values_may_contain_commas() {
        let (_dir, store) = store();
        store.put("k", "a,b,c").unwrap();
        assert_eq!(store.get("k").unwrap().as_deref(), Some("a,b,c"));
    }

    #[test]
    fn keys_with_commas_rejected() {
        let (_dir, store) = store();
        assert!(matches!(
            store.put("a,b", "v"),
            Err(StoreError::InvalidKey(_))
        ));
    }

    #[test]
    fn survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.store");
        {
            let store = FileStore::open(&path).unwrap();
            store.put("k", "v").unwrap();
        }
        let store = FileStore::open(&path).unwrap();
        assert_eq!(store.get("k").unwrap().as_deref(), Some("v"));
    }

    #[test]
    fn range_scan_and_take() {
        let (_dir, store) = store();
        for key in ["a", "b", "c", "d"] {
            store.put(key, key).unwrap();
        }
        let full = HashRange {
            start: Digest::MIN,
            end: Digest::MAX,
        };
        assert_eq!(store.scan_range(full).unwrap().len(), 4);

        // carve a range that holds exactly "a" and check hand-off
        let a = key_digest("a");
        let mut just_below = a.0;
        just_below[15] = just_below[15].wrapping_sub(1);
        let narrow = HashRange {
            start: Digest(just_below),
            end: a,
        };
        let taken = store.take_range(narrow).unwrap();
        assert_eq!(taken, vec![("a".to_string(), "a".to_string())]);
        assert_eq!(store.len().unwrap(), 3);
        assert_eq!(store.get("a").unwrap(), None);
    }

    #[test]
    fn bulk_load_is_idempotent() {
        let (_dir, store) = store();
        let batch = vec![
            ("x".to_string(), "1".to_string()),
            ("y".to_string(), "2".to_string()),
        ];
        store.bulk_load(&batch).unwrap();
        store.bulk_load(&batch).unwrap();
        assert_eq!(store.len().unwrap(), 2);
        assert_eq!(store.get("y").unwrap().as_deref(), Some("2"));
    }

    #[test]
    fn clear_empties_store() {
        let (_dir, store) = store();
        store.put("k", "v").unwrap();
        store.clear().unwrap();
        assert!(store.is_empty().unwrap());
    }
}
