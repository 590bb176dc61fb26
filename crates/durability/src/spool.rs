//! Fallback spool for best-effort local flushes
//!
//! When the persistence channel rejects a record (or acknowledges the wrong
//! one), the engine makes one attempt to write the record somewhere local so
//! the edit is not lost if the process dies before the channel recovers.
//! Spool writes are best effort: failures are logged by the caller, never
//! surfaced in place of the original durability error.

use crate::record::PersistRecord;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use timeline_core::Result;

/// Local store used after a durability failure
pub trait FallbackStore: Send + Sync {
    /// Write one record
    fn flush(&self, record: &PersistRecord) -> Result<()>;

    /// Human-readable name for logging
    fn name(&self) -> &'static str;
}

/// One spooled record with the time it was written
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpoolEntry {
    /// Wall-clock time of the flush
    pub spooled_at: DateTime<Utc>,
    /// The record that could not be persisted
    pub record: PersistRecord,
}

/// Spool kept in memory
#[derive(Debug, Default)]
pub struct MemorySpool {
    entries: Mutex<Vec<SpoolEntry>>,
}

impl MemorySpool {
    /// Empty spool
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of every spooled entry, oldest first
    pub fn entries(&self) -> Vec<SpoolEntry> {
        self.entries.lock().clone()
    }

    /// Number of spooled entries
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// True if nothing has been spooled
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl FallbackStore for MemorySpool {
    fn flush(&self, record: &PersistRecord) -> Result<()> {
        self.entries.lock().push(SpoolEntry {
            spooled_at: Utc::now(),
            record: record.clone(),
        });
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

/// Append-only JSON-lines spool file
///
/// Each flush appends one line and syncs the file's data before returning.
#[derive(Debug)]
pub struct FileSpool {
    path: PathBuf,
    file: Mutex<File>,
}

impl FileSpool {
    /// File name used inside a spool directory
    pub const FILE_NAME: &'static str = "history-spool.jsonl";

    /// Open (creating if needed) `history-spool.jsonl` inside `dir`
    pub fn open_dir(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        Self::open(dir.join(Self::FILE_NAME))
    }

    /// Open (creating if needed) a spool file, appending to existing content
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    /// Path of the spool file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read every entry from a spool file
    ///
    /// Blank lines are skipped; a malformed line is a serialization error.
    pub fn read_all(path: &Path) -> Result<Vec<SpoolEntry>> {
        let reader = BufReader::new(File::open(path)?);
        let mut entries = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            entries.push(serde_json::from_str(&line)?);
        }
        Ok(entries)
    }
}

impl FallbackStore for FileSpool {
    fn flush(&self, record: &PersistRecord) -> Result<()> {
        let entry = SpoolEntry {
            spooled_at: Utc::now(),
            record: record.clone(),
        };
        let mut line = serde_json::to_vec(&entry)?;
        line.push(b'\n');

        let mut file = self.file.lock();
        file.write_all(&line)?;
        file.sync_data()?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "file"
    }
}
