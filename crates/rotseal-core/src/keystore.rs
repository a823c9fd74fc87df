//! Persistent storage for device key blobs, addressed by integer id.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use thiserror::Error;
use zeroize::{Zeroize, Zeroizing};

use crate::security;

/// Upper bound on a single stored blob. A 4096-bit RSA PKCS#8 key fits with
/// room to spare.
pub const MAX_KEY_LEN: usize = 4096;

/// Total key material the software keystores hold across all ids. A key
/// within [`MAX_KEY_LEN`] can still be refused when the store is full.
pub const MAX_STORAGE: usize = 16 * 1024;

#[derive(Debug, Error)]
pub enum KeystoreError {
    #[error("no key stored for id {0}")]
    NoKey(u32),
    #[error("stored key for id {0} is not valid")]
    BadKey(u32),
    #[error("failed to save key: {0}")]
    SaveFailed(String),
    #[error("failed to load key: {0}")]
    LoadFailed(String),
    #[error("failed to erase key: {0}")]
    EraseFailed(String),
    #[error("key id {0} is not supported by this keystore")]
    UnsupportedId(u32),
    #[error("key data too long ({len} > {max} bytes)")]
    KeyTooLong { len: usize, max: usize },
    #[error("insufficient storage for key data")]
    InsufficientStorage,
}

/// Opaque key-blob storage. The core never interprets the blobs it stores
/// here; callers own the encoding.
pub trait Keystore {
    fn save_key(&mut self, id: u32, key: &[u8]) -> Result<(), KeystoreError>;

    /// Load a stored blob. The returned buffer is wiped on drop.
    fn load_key(&self, id: u32) -> Result<Zeroizing<Vec<u8>>, KeystoreError>;

    /// Erase a stored blob. Erasing an empty slot succeeds.
    fn erase_key(&mut self, id: u32) -> Result<(), KeystoreError>;
}

/// Volatile keystore with a fixed number of slots.
pub struct MemoryKeystore {
    slots: Vec<Option<Zeroizing<Vec<u8>>>>,
}

impl MemoryKeystore {
    pub fn new(slot_count: usize) -> Self {
        Self {
            slots: (0..slot_count).map(|_| None).collect(),
        }
    }
}

impl Keystore for MemoryKeystore {
    fn save_key(&mut self, id: u32, key: &[u8]) -> Result<(), KeystoreError> {
        if key.len() > MAX_KEY_LEN {
            return Err(KeystoreError::KeyTooLong {
                len: key.len(),
                max: MAX_KEY_LEN,
            });
        }
        if id as usize >= self.slots.len() {
            return Err(KeystoreError::UnsupportedId(id));
        }
        // the slot being written does not count against the budget
        let used: usize = self
            .slots
            .iter()
            .enumerate()
            .filter(|&(slot, _)| slot != id as usize)
            .filter_map(|(_, blob)| blob.as_ref().map(|b| b.len()))
            .sum();
        if used + key.len() > MAX_STORAGE {
            return Err(KeystoreError::InsufficientStorage);
        }
        self.slots[id as usize] = Some(Zeroizing::new(key.to_vec()));
        Ok(())
    }

    fn load_key(&self, id: u32) -> Result<Zeroizing<Vec<u8>>, KeystoreError> {
        let slot = self
            .slots
            .get(id as usize)
            .ok_or(KeystoreError::UnsupportedId(id))?;
        match slot {
            Some(key) => Ok(Zeroizing::new(key.to_vec())),
            None => Err(KeystoreError::NoKey(id)),
        }
    }

    fn erase_key(&mut self, id: u32) -> Result<(), KeystoreError> {
        let slot = self
            .slots
            .get_mut(id as usize)
            .ok_or(KeystoreError::UnsupportedId(id))?;
        *slot = None;
        Ok(())
    }
}

#[derive(Serialize, Deserialize, Default)]
struct Records {
    entries: BTreeMap<u32, Vec<u8>>,
}

impl Drop for Records {
    fn drop(&mut self) {
        for blob in self.entries.values_mut() {
            blob.zeroize();
        }
    }
}

/// File-backed keystore. Records are a postcard blob replaced atomically on
/// every mutation; the file is held at mode 0600.
pub struct FileKeystore {
    path: PathBuf,
    records: Records,
}

impl FileKeystore {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, KeystoreError> {
        let path = path.into();
        let records = if path.exists() {
            let bytes = std::fs::read(&path)
                .map_err(|e| KeystoreError::LoadFailed(e.to_string()))?;
            postcard::from_bytes(&bytes)
                .map_err(|e| KeystoreError::LoadFailed(e.to_string()))?
        } else {
            Records::default()
        };
        Ok(Self { path, records })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self) -> Result<(), KeystoreError> {
        let dir = self.path.parent().unwrap_or(Path::new("."));
        let mut tmp = NamedTempFile::new_in(dir)
            .map_err(|e| KeystoreError::SaveFailed(e.to_string()))?;
        security::set_secure_permissions(tmp.path()).ok();

        let bytes = postcard::to_allocvec(&self.records)
            .map_err(|e| KeystoreError::SaveFailed(e.to_string()))?;
        tmp.write_all(&bytes)
            .and_then(|_| tmp.as_file_mut().sync_all())
            .map_err(|e| KeystoreError::SaveFailed(e.to_string()))?;

        tmp.persist(&self.path)
            .map_err(|e| KeystoreError::SaveFailed(e.to_string()))?;
        Ok(())
    }
}

impl Keystore for FileKeystore {
    fn save_key(&mut self, id: u32, key: &[u8]) -> Result<(), KeystoreError> {
        if key.len() > MAX_KEY_LEN {
            return Err(KeystoreError::KeyTooLong {
                len: key.len(),
                max: MAX_KEY_LEN,
            });
        }
        let used: usize = self
            .records
            .entries
            .iter()
            .filter(|&(&entry, _)| entry != id)
            .map(|(_, blob)| blob.len())
            .sum();
        if used + key.len() > MAX_STORAGE {
            return Err(KeystoreError::InsufficientStorage);
        }
        let previous = self.records.entries.insert(id, key.to_vec());
        if let Err(e) = self.persist() {
            // roll back so memory matches the file, wiping the blob that
            // never reached disk
            let discarded = match previous {
                Some(old) => self.records.entries.insert(id, old),
                None => self.records.entries.remove(&id),
            };
            if let Some(mut blob) = discarded {
                blob.zeroize();
            }
            return Err(e);
        }
        if let Some(mut old) = previous {
            old.zeroize();
        }
        Ok(())
    }

    fn load_key(&self, id: u32) -> Result<Zeroizing<Vec<u8>>, KeystoreError> {
        match self.records.entries.get(&id) {
            Some(blob) if blob.is_empty() => Err(KeystoreError::BadKey(id)),
            Some(blob) => Ok(Zeroizing::new(blob.clone())),
            None => Err(KeystoreError::NoKey(id)),
        }
    }

    fn erase_key(&mut self, id: u32) -> Result<(), KeystoreError> {
        match self.records.entries.remove(&id) {
            Some(mut blob) => {
                if let Err(e) = self.persist() {
                    self.records.entries.insert(id, blob);
                    return Err(KeystoreError::EraseFailed(e.to_string()));
                }
                blob.zeroize();
                Ok(())
            }
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_roundtrip() {
        let mut store = MemoryKeystore::new(2);
        store.save_key(0, b"blob-a").unwrap();
        store.save_key(1, b"blob-b").unwrap();
        assert_eq!(store.load_key(0).unwrap().as_slice(), b"blob-a");
        assert_eq!(store.load_key(1).unwrap().as_slice(), b"blob-b");
    }

    #[test]
    fn memory_missing_and_unsupported() {
        let mut store = MemoryKeystore::new(1);
        assert!(matches!(store.load_key(0), Err(KeystoreError::NoKey(0))));
        assert!(matches!(
            store.save_key(7, b"x"),
            Err(KeystoreError::UnsupportedId(7))
        ));
        assert!(matches!(
            store.load_key(7),
            Err(KeystoreError::UnsupportedId(7))
        ));
    }

    #[test]
    fn memory_key_too_long() {
        let mut store = MemoryKeystore::new(1);
        let huge = vec![0u8; MAX_KEY_LEN + 1];
        assert!(matches!(
            store.save_key(0, &huge),
            Err(KeystoreError::KeyTooLong { .. })
        ));
    }

    #[test]
    fn memory_insufficient_storage() {
        let mut store = MemoryKeystore::new(8);
        let blob = vec![0xa5u8; MAX_KEY_LEN];
        for id in 0..4 {
            store.save_key(id, &blob).unwrap();
        }
        assert!(matches!(
            store.save_key(4, &blob),
            Err(KeystoreError::InsufficientStorage)
        ));
        // overwriting an existing slot stays within the budget
        store.save_key(3, &blob).unwrap();
        // freeing a slot makes room again
        store.erase_key(0).unwrap();
        store.save_key(4, &blob).unwrap();
    }

    #[test]
    fn memory_erase_is_idempotent() {
        let mut store = MemoryKeystore::new(1);
        store.erase_key(0).unwrap();
        store.save_key(0, b"blob").unwrap();
        store.erase_key(0).unwrap();
        store.erase_key(0).unwrap();
        assert!(matches!(store.load_key(0), Err(KeystoreError::NoKey(0))));
    }

    #[test]
    fn file_roundtrip_and_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keys.bin");
        {
            let mut store = FileKeystore::open(&path).unwrap();
            store.save_key(1, b"persisted blob").unwrap();
        }
        let store = FileKeystore::open(&path).unwrap();
        assert_eq!(store.load_key(1).unwrap().as_slice(), b"persisted blob");
        assert!(matches!(store.load_key(2), Err(KeystoreError::NoKey(2))));
    }

    #[test]
    fn file_erase_removes_record() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keys.bin");
        let mut store = FileKeystore::open(&path).unwrap();
        store.save_key(1, b"blob").unwrap();
        store.erase_key(1).unwrap();
        store.erase_key(1).unwrap();

        let store = FileKeystore::open(&path).unwrap();
        assert!(matches!(store.load_key(1), Err(KeystoreError::NoKey(1))));
    }

    #[test]
    fn file_overwrite_replaces_blob() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keys.bin");
        let mut store = FileKeystore::open(&path).unwrap();
        store.save_key(1, b"old").unwrap();
        store.save_key(1, b"new").unwrap();
        assert_eq!(store.load_key(1).unwrap().as_slice(), b"new");
    }

    #[test]
    fn file_insufficient_storage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keys.bin");
        let mut store = FileKeystore::open(&path).unwrap();
        let blob = vec![0xa5u8; MAX_KEY_LEN];
        for id in 0..4 {
            store.save_key(id, &blob).unwrap();
        }
        assert!(matches!(
            store.save_key(4, &blob),
            Err(KeystoreError::InsufficientStorage)
        ));
        store.save_key(3, &blob).unwrap();
    }
}
