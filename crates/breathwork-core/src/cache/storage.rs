//! Cache storage trait with in-memory and on-disk implementations.
//!
//! A store holds any number of named generations; each generation maps a
//! request key (see [`super::Request::cache_key`]) to a captured response.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::types::Response;
use crate::error::CacheError;

const INDEX_FILE: &str = "entries.json";

/// A stored response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub response: Response,
    pub cached_at: DateTime<Utc>,
}

impl CacheEntry {
    pub fn new(response: Response) -> Self {
        Self {
            response,
            cached_at: Utc::now(),
        }
    }
}

type Generation = BTreeMap<String, CacheEntry>;

/// Trait for cache storage backends.
pub trait CacheStorage: Send + Sync {
    /// Names of all generations present.
    fn generations(&self) -> Result<Vec<String>, CacheError>;

    fn has_generation(&self, generation: &str) -> Result<bool, CacheError> {
        Ok(self.generations()?.iter().any(|g| g == generation))
    }

    /// Create the generation if it does not exist.
    fn open(&self, generation: &str) -> Result<(), CacheError>;

    /// Remove a generation. Returns false if it did not exist.
    fn delete(&self, generation: &str) -> Result<bool, CacheError>;

    fn get(&self, generation: &str, key: &str) -> Result<Option<CacheEntry>, CacheError>;

    /// Store one response, creating the generation if needed.
    fn put(&self, generation: &str, key: &str, response: &Response) -> Result<(), CacheError>;

    /// Store a batch in one step: either every entry lands or none does.
    fn put_all(&self, generation: &str, entries: Vec<(String, Response)>) -> Result<(), CacheError>;

    fn keys(&self, generation: &str) -> Result<Vec<String>, CacheError>;
}

pub(super) fn lock_error<T>(_: std::sync::PoisonError<T>) -> CacheError {
    CacheError::Storage("cache lock poisoned".into())
}

/// Process-local storage.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    generations: Mutex<BTreeMap<String, Generation>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CacheStorage for MemoryStorage {
    fn generations(&self) -> Result<Vec<String>, CacheError> {
        let map = self.generations.lock().map_err(lock_error)?;
        Ok(map.keys().cloned().collect())
    }

    fn open(&self, generation: &str) -> Result<(), CacheError> {
        let mut map = self.generations.lock().map_err(lock_error)?;
        map.entry(generation.to_string()).or_default();
        Ok(())
    }

    fn delete(&self, generation: &str) -> Result<bool, CacheError> {
        let mut map = self.generations.lock().map_err(lock_error)?;
        Ok(map.remove(generation).is_some())
    }

    fn get(&self, generation: &str, key: &str) -> Result<Option<CacheEntry>, CacheError> {
        let map = self.generations.lock().map_err(lock_error)?;
        Ok(map.get(generation).and_then(|g| g.get(key)).cloned())
    }

    fn put(&self, generation: &str, key: &str, response: &Response) -> Result<(), CacheError> {
        let mut map = self.generations.lock().map_err(lock_error)?;
        map.entry(generation.to_string())
            .or_default()
            .insert(key.to_string(), CacheEntry::new(response.clone()));
        Ok(())
    }

    fn put_all(
        &self,
        generation: &str,
        entries: Vec<(String, Response)>,
    ) -> Result<(), CacheError> {
        let mut map = self.generations.lock().map_err(lock_error)?;
        let store = map.entry(generation.to_string()).or_default();
        store.extend(
            entries
                .into_iter()
                .map(|(key, response)| (key, CacheEntry::new(response))),
        );
        Ok(())
    }

    fn keys(&self, generation: &str) -> Result<Vec<String>, CacheError> {
        let map = self.generations.lock().map_err(lock_error)?;
        Ok(map
            .get(generation)
            .map(|g| g.keys().cloned().collect())
            .unwrap_or_default())
    }
}

/// Directory-backed storage: one sub-directory per generation holding a JSON
/// index with base64 bodies.
#[derive(Debug)]
pub struct FsStorage {
    root: PathBuf,
    write_lock: Mutex<()>,
}

impl FsStorage {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, CacheError> {
        let root = root.into();
        std::fs::create_dir_all(&root).map_err(|e| io_error(&root, e))?;
        Ok(Self {
            root,
            write_lock: Mutex::new(()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn generation_dir(&self, generation: &str) -> PathBuf {
        self.root.join(&*urlencoding::encode(generation))
    }

    fn read(&self, generation: &str) -> Result<Option<Generation>, CacheError> {
        let path = self.generation_dir(generation).join(INDEX_FILE);
        match std::fs::read_to_string(&path) {
            Ok(content) => serde_json::from_str(&content)
                .map(Some)
                .map_err(|e| CacheError::Storage(format!("{}: {e}", path.display()))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_error(&path, e)),
        }
    }

    /// Write the index through a temporary file so readers never see a
    /// partial batch.
    fn write(&self, generation: &str, entries: &Generation) -> Result<(), CacheError> {
        let dir = self.generation_dir(generation);
        std::fs::create_dir_all(&dir).map_err(|e| io_error(&dir, e))?;
        let content = serde_json::to_string(entries)
            .map_err(|e| CacheError::Storage(e.to_string()))?;
        let tmp = dir.join(format!("{INDEX_FILE}.tmp"));
        std::fs::write(&tmp, content).map_err(|e| io_error(&tmp, e))?;
        let path = dir.join(INDEX_FILE);
        std::fs::rename(&tmp, &path).map_err(|e| io_error(&path, e))
    }
}

fn io_error(path: &Path, err: std::io::Error) -> CacheError {
    CacheError::Storage(format!("{}: {err}", path.display()))
}

impl CacheStorage for FsStorage {
    fn generations(&self) -> Result<Vec<String>, CacheError> {
        let mut names = Vec::new();
        let dir = std::fs::read_dir(&self.root).map_err(|e| io_error(&self.root, e))?;
        for entry in dir {
            let entry = entry.map_err(|e| io_error(&self.root, e))?;
            if !entry.path().join(INDEX_FILE).is_file() {
                continue;
            }
            let raw = entry.file_name();
            let raw = raw.to_string_lossy();
            match urlencoding::decode(&raw) {
                Ok(name) => names.push(name.into_owned()),
                Err(e) => {
                    tracing::warn!(dir = %raw, error = %e, "skipping unreadable cache directory")
                }
            }
        }
        names.sort();
        Ok(names)
    }

    fn open(&self, generation: &str) -> Result<(), CacheError> {
        let _guard = self.write_lock.lock().map_err(lock_error)?;
        if self.read(generation)?.is_none() {
            self.write(generation, &Generation::new())?;
        }
        Ok(())
    }

    fn delete(&self, generation: &str) -> Result<bool, CacheError> {
        let _guard = self.write_lock.lock().map_err(lock_error)?;
        let dir = self.generation_dir(generation);
        match std::fs::remove_dir_all(&dir) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(io_error(&dir, e)),
        }
    }

    fn get(&self, generation: &str, key: &str) -> Result<Option<CacheEntry>, CacheError> {
        Ok(self.read(generation)?.and_then(|mut g| g.remove(key)))
    }

    fn put(&self, generation: &str, key: &str, response: &Response) -> Result<(), CacheError> {
        let _guard = self.write_lock.lock().map_err(lock_error)?;
        let mut entries = self.read(generation)?.unwrap_or_default();
        entries.insert(key.to_string(), CacheEntry::new(response.clone()));
        self.write(generation, &entries)
    }

    fn put_all(
        &self,
        generation: &str,
        batch: Vec<(String, Response)>,
    ) -> Result<(), CacheError> {
        let _guard = self.write_lock.lock().map_err(lock_error)?;
        let mut entries = self.read(generation)?.unwrap_or_default();
        entries.extend(
            batch
                .into_iter()
                .map(|(key, response)| (key, CacheEntry::new(response))),
        );
        self.write(generation, &entries)
    }

    fn keys(&self, generation: &str) -> Result<Vec<String>, CacheError> {
        Ok(self
            .read(generation)?
            .map(|g| g.into_keys().collect())
            .unwrap_or_default())
    }
}
