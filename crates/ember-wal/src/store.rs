//! Durable append-only log storage.

use bytes::Bytes;
use ember_common::{EmberError, Result};
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Physical log writer consumed by the log manager.
///
/// `append` must either make the whole byte run durable (as far as the
/// implementation promises durability) or return an error.
pub trait LogStore: Send + Sync {
    /// Appends `data` at the end of the log.
    fn append(&self, data: &[u8]) -> Result<()>;

    /// Returns the full contents of the log.
    fn read_all(&self) -> Result<Bytes>;

    /// Cuts the log back to its first `len` bytes.
    fn truncate(&self, len: u64) -> Result<()>;
}

/// Single-file log store.
///
/// Bytes are appended at the end of the file. With `fsync` enabled every
/// append is followed by `sync_data`.
pub struct LogFile {
    /// Path to the log file.
    path: PathBuf,
    /// File handle.
    file: Mutex<File>,
    /// Sync after every append.
    fsync: bool,
}

impl LogFile {
    /// Opens the log file, creating it if it does not exist.
    pub fn open(path: &Path, fsync: bool) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(path)?;

        Ok(Self {
            path: path.to_path_buf(),
            file: Mutex::new(file),
            fsync,
        })
    }

    /// Returns the path to this log file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the current file size in bytes.
    pub fn len(&self) -> Result<u64> {
        Ok(self.file.lock().metadata()?.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

impl LogStore for LogFile {
    fn append(&self, data: &[u8]) -> Result<()> {
        let mut file = self.file.lock();

        file.seek(SeekFrom::End(0))
            .and_then(|_| file.write_all(data))
            .map_err(|e| EmberError::WalWriteFailed(format!("{}: {}", self.path.display(), e)))?;

        if self.fsync {
            file.sync_data()
                .map_err(|e| EmberError::WalWriteFailed(format!("{}: {}", self.path.display(), e)))?;
        }
        Ok(())
    }

    fn read_all(&self) -> Result<Bytes> {
        let mut file = self.file.lock();
        let mut data = Vec::new();
        file.seek(SeekFrom::Start(0))?;
        file.read_to_end(&mut data)?;
        Ok(Bytes::from(data))
    }

    fn truncate(&self, len: u64) -> Result<()> {
        let file = self.file.lock();
        file.set_len(len)
            .and_then(|_| if self.fsync { file.sync_all() } else { Ok(()) })
            .map_err(|e| EmberError::WalWriteFailed(format!("{}: {}", self.path.display(), e)))
    }
}

/// Log store kept in memory.
///
/// Nothing survives the process; useful for tests and throwaway engines.
/// Every append is recorded separately so callers can inspect flush batching.
#[derive(Default)]
pub struct MemoryLogStore {
    appends: Mutex<Vec<Bytes>>,
}

impl MemoryLogStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of `append` calls so far.
    pub fn append_count(&self) -> usize {
        self.appends.lock().len()
    }

    /// Returns each appended byte run in order.
    pub fn appends(&self) -> Vec<Bytes> {
        self.appends.lock().clone()
    }
}

impl LogStore for MemoryLogStore {
    fn append(&self, data: &[u8]) -> Result<()> {
        self.appends.lock().push(Bytes::copy_from_slice(data));
        Ok(())
    }

    fn read_all(&self) -> Result<Bytes> {
        Ok(self.appends.lock().concat().into())
    }

    fn truncate(&self, len: u64) -> Result<()> {
        let mut appends = self.appends.lock();
        let mut kept = 0u64;
        let mut cut = Vec::with_capacity(appends.len());
        for run in appends.iter() {
            if kept >= len {
                break;
            }
            let take = (len - kept).min(run.len() as u64) as usize;
            cut.push(run.slice(..take));
            kept += take as u64;
        }
        *appends = cut;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_log_file_append_and_read() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ember.log");

        let store = LogFile::open(&path, true).unwrap();
        assert!(store.is_empty().unwrap());

        store.append(b"hello ").unwrap();
        store.append(b"world").unwrap();

        assert_eq!(store.len().unwrap(), 11);
        assert_eq!(&store.read_all().unwrap()[..], b"hello world");
        assert_eq!(store.path(), path.as_path());
    }

    #[test]
    fn test_log_file_reopen_appends() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("wal").join("ember.log");

        {
            let store = LogFile::open(&path, false).unwrap();
            store.append(b"abc").unwrap();
        }

        let store = LogFile::open(&path, false).unwrap();
        // Reading does not move the append position
        assert_eq!(&store.read_all().unwrap()[..], b"abc");
        store.append(b"def").unwrap();
        assert_eq!(&store.read_all().unwrap()[..], b"abcdef");
    }

    #[test]
    fn test_log_file_truncate() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ember.log");

        let store = LogFile::open(&path, true).unwrap();
        store.append(b"keep-torn").unwrap();
        store.truncate(4).unwrap();
        store.append(b"!").unwrap();

        assert_eq!(&store.read_all().unwrap()[..], b"keep!");
    }

    #[test]
    fn test_memory_log_store_truncate() {
        let store = MemoryLogStore::new();
        store.append(b"one").unwrap();
        store.append(b"two").unwrap();

        store.truncate(4).unwrap();
        assert_eq!(store.append_count(), 2);
        assert_eq!(&store.read_all().unwrap()[..], b"onet");

        store.truncate(0).unwrap();
        assert_eq!(store.append_count(), 0);
    }

    #[test]
    fn test_memory_log_store() {
        let store = MemoryLogStore::new();
        store.append(b"one").unwrap();
        store.append(b"two").unwrap();

        assert_eq!(store.append_count(), 2);
        assert_eq!(&store.appends()[1][..], b"two");
        assert_eq!(&store.read_all().unwrap()[..], b"onetwo");
    }
}
