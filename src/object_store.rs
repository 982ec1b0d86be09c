// 🪣 Object Store - durable key/value storage for batches and evidence
//
// Keys are '/'-separated. Folder-like prefixes partition the store:
//   project/   incoming batch files
//   archives/  batch files after their run committed
//   inserts/   insert evidence
//   updates/   update evidence

use crate::error::{ReconcileError, Result};
use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

pub trait ObjectStore: Send + Sync {
    /// Keys starting with `prefix`, in lexicographic order
    fn list(&self, prefix: &str) -> Result<Vec<String>>;

    fn read(&self, key: &str) -> Result<Vec<u8>>;

    /// Create or replace the object at `key`
    fn write(&self, key: &str, bytes: &[u8]) -> Result<()>;

    /// Create the object at `key`. Fails without touching it if `key` exists.
    fn create(&self, key: &str, bytes: &[u8]) -> Result<()>;

    fn copy(&self, src_key: &str, dst_key: &str) -> Result<()>;

    fn delete(&self, key: &str) -> Result<()>;

    fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.list(key)?.iter().any(|k| k == key))
    }
}

fn transport(action: &str, key: &str, err: impl std::fmt::Display) -> ReconcileError {
    ReconcileError::TransportFailure(format!("{} '{}': {}", action, key, err))
}

// ============================================================================
// LOCAL FILESYSTEM STORE
// ============================================================================

/// Object store rooted at a local directory. Key `a/b.csv` is file `<root>/a/b.csv`.
pub struct LocalObjectStore {
    root: PathBuf,
}

impl LocalObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        LocalObjectStore { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        if key.is_empty() || key.split('/').any(|part| part == ".." || part == ".") {
            return Err(transport("invalid key", key, "relative segments are not allowed"));
        }
        Ok(self.root.join(key.trim_start_matches('/')))
    }

    fn collect_keys(&self, dir: &Path, keys: &mut Vec<String>) -> Result<()> {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(transport("list", &dir.display().to_string(), e)),
        };

        for entry in entries {
            let entry = entry.map_err(|e| transport("list", &dir.display().to_string(), e))?;
            let path = entry.path();

            if path.is_dir() {
                self.collect_keys(&path, keys)?;
            } else if let Ok(relative) = path.strip_prefix(&self.root) {
                let key = relative
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy().into_owned())
                    .collect::<Vec<_>>()
                    .join("/");
                keys.push(key);
            }
        }

        Ok(())
    }
}

impl ObjectStore for LocalObjectStore {
    fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        self.collect_keys(&self.root, &mut keys)?;

        let mut matching: Vec<String> = keys
            .into_iter()
            .filter(|key| key.starts_with(prefix))
            .collect();
        matching.sort();

        Ok(matching)
    }

    fn read(&self, key: &str) -> Result<Vec<u8>> {
        let path = self.path_for(key)?;
        fs::read(&path).map_err(|e| transport("read", key, e))
    }

    fn write(&self, key: &str, bytes: &[u8]) -> Result<()> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| transport("write", key, e))?;
        }
        fs::write(&path, bytes).map_err(|e| transport("write", key, e))
    }

    fn create(&self, key: &str, bytes: &[u8]) -> Result<()> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| transport("create", key, e))?;
        }

        // create_new makes the existence check and the create one filesystem operation
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|e| transport("create", key, e))?;
        file.write_all(bytes)
            .and_then(|_| file.sync_all())
            .map_err(|e| transport("create", key, e))
    }

    fn copy(&self, src_key: &str, dst_key: &str) -> Result<()> {
        let src = self.path_for(src_key)?;
        let dst = self.path_for(dst_key)?;
        if let Some(parent) = dst.parent() {
            fs::create_dir_all(parent).map_err(|e| transport("copy to", dst_key, e))?;
        }
        fs::copy(&src, &dst)
            .map(|_| ())
            .map_err(|e| transport("copy", src_key, e))
    }

    fn delete(&self, key: &str) -> Result<()> {
        let path = self.path_for(key)?;
        fs::remove_file(&path).map_err(|e| transport("delete", key, e))
    }

    fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.path_for(key)?.is_file())
    }
}

// ============================================================================
// IN-MEMORY STORE
// ============================================================================

#[derive(Default)]
pub struct MemoryObjectStore {
    objects: Mutex<BTreeMap<String, Vec<u8>>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_object(self, key: &str, bytes: impl Into<Vec<u8>>) -> Self {
        self.objects
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(key.to_string(), bytes.into());
        self
    }

    fn objects(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, Vec<u8>>> {
        self.objects
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl ObjectStore for MemoryObjectStore {
    fn list(&self, prefix: &str) -> Result<Vec<String>> {
        Ok(self
            .objects()
            .keys()
            .filter(|key| key.starts_with(prefix))
            .cloned()
            .collect())
    }

    fn read(&self, key: &str) -> Result<Vec<u8>> {
        self.objects()
            .get(key)
            .cloned()
            .ok_or_else(|| transport("read", key, "no such key"))
    }

    fn write(&self, key: &str, bytes: &[u8]) -> Result<()> {
        self.objects().insert(key.to_string(), bytes.to_vec());
        Ok(())
    }

    fn create(&self, key: &str, bytes: &[u8]) -> Result<()> {
        match self.objects().entry(key.to_string()) {
            Entry::Occupied(_) => Err(transport("create", key, "already exists")),
            Entry::Vacant(slot) => {
                slot.insert(bytes.to_vec());
                Ok(())
            }
        }
    }

    fn copy(&self, src_key: &str, dst_key: &str) -> Result<()> {
        let mut objects = self.objects();
        let bytes = objects
            .get(src_key)
            .cloned()
            .ok_or_else(|| transport("copy", src_key, "no such key"))?;
        objects.insert(dst_key.to_string(), bytes);
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.objects()
            .remove(key)
            .map(|_| ())
            .ok_or_else(|| transport("delete", key, "no such key"))
    }

    fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.objects().contains_key(key))
    }
}
