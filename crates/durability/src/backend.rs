//! Synchronous key/value backends behind the worker channel
//!
//! Backends are blocking by design; [`WorkerChannel`](crate::WorkerChannel)
//! runs them off the caller's thread.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use timeline_core::Result;

/// Blocking byte store keyed by record key
pub trait Backend: Send + Sync + 'static {
    /// Store bytes under a key, replacing any previous value
    fn put(&self, key: &str, bytes: &[u8]) -> Result<()>;

    /// Load bytes for a key
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Human-readable name for logging
    fn name(&self) -> &'static str;
}

/// Map-backed backend
#[derive(Debug, Default)]
pub struct MemoryBackend {
    entries: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryBackend {
    /// Empty backend
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// True if nothing has been stored
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl Backend for MemoryBackend {
    fn put(&self, key: &str, bytes: &[u8]) -> Result<()> {
        self.entries.lock().insert(key.to_string(), bytes.to_vec());
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.entries.lock().get(key).cloned())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

/// One file per key in a directory
///
/// Writes follow the write-fsync-rename pattern:
/// 1. Write to a temporary file (`.<key>.tmp`)
/// 2. fsync the temporary file
/// 3. Atomic rename to `<key>.rec`
/// 4. fsync the parent directory
///
/// A reader therefore sees either the previous value or the new one, never a
/// partial write.
#[derive(Debug, Clone)]
pub struct DirectoryBackend {
    dir: PathBuf,
}

impl DirectoryBackend {
    /// Open (creating if needed) a directory backend
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    /// Root directory
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.rec", key))
    }
}

impl Backend for DirectoryBackend {
    fn put(&self, key: &str, bytes: &[u8]) -> Result<()> {
        let final_path = self.path_for(key);
        let temp_path = self.dir.join(format!(".{}.tmp", key));

        let mut file = OpenOptions::new()
            .create(true)
            .truncate(true)
            .write(true)
            .open(&temp_path)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        drop(file);

        std::fs::rename(&temp_path, &final_path)?;

        let dir = File::open(&self.dir)?;
        dir.sync_all()?;
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        match std::fs::read(self.path_for(key)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn name(&self) -> &'static str {
        "directory"
    }
}
