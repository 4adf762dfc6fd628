//! Page files on disk.
//!
//! One file per `file_id`, named `{file_id:08}.dat`, made of whole pages.
//! Page `n` lives at byte offset `n * PAGE_SIZE`.

use ember_common::page::{PageId, PAGE_SIZE};
use ember_common::{EmberError, Result, StorageConfig};
use parking_lot::Mutex;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{trace, warn};

#[derive(Debug, Clone)]
pub struct DiskManagerConfig {
    /// Directory holding the page files.
    pub data_dir: PathBuf,
    /// Sync every page write and allocation.
    pub fsync_enabled: bool,
}

impl Default for DiskManagerConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            fsync_enabled: true,
        }
    }
}

impl From<&StorageConfig> for DiskManagerConfig {
    fn from(config: &StorageConfig) -> Self {
        Self {
            data_dir: config.data_dir.clone(),
            fsync_enabled: config.fsync_enabled,
        }
    }
}

/// Reads, writes and extends page files.
///
/// Files are opened lazily and kept open until the manager is dropped. Index
/// files keep their header in page 0.
pub struct DiskManager {
    config: DiskManagerConfig,
    files: Mutex<HashMap<u32, PageFile>>,
}

struct PageFile {
    file: File,
    /// Pages currently in the file.
    len: u32,
}

impl PageFile {
    fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        let len = (file.metadata()?.len() / PAGE_SIZE as u64) as u32;
        Ok(Self { file, len })
    }

    fn write_at(&mut self, page_num: u32, data: &[u8], fsync: bool) -> Result<()> {
        self.file
            .seek(SeekFrom::Start(page_num as u64 * PAGE_SIZE as u64))?;
        self.file.write_all(data)?;
        if fsync {
            self.file.sync_data()?;
        }
        self.len = self.len.max(page_num + 1);
        Ok(())
    }
}

impl DiskManager {
    /// Creates the data directory if needed.
    pub fn new(config: DiskManagerConfig) -> Result<Self> {
        std::fs::create_dir_all(&config.data_dir)?;
        Ok(Self {
            config,
            files: Mutex::new(HashMap::new()),
        })
    }

    pub fn data_dir(&self) -> &Path {
        &self.config.data_dir
    }

    fn path_of(&self, file_id: u32) -> PathBuf {
        self.config.data_dir.join(format!("{:08}.dat", file_id))
    }

    fn with_file<T>(&self, file_id: u32, f: impl FnOnce(&mut PageFile) -> Result<T>) -> Result<T> {
        let mut files = self.files.lock();
        let file = match files.entry(file_id) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => entry.insert(PageFile::open(&self.path_of(file_id))?),
        };
        f(file)
    }

    /// Reads one page. Fails with `PageNotFound` past the end of the file.
    pub fn read_page(&self, page_id: PageId) -> Result<Box<[u8; PAGE_SIZE]>> {
        self.with_file(page_id.file_id, |pf| {
            if page_id.page_num >= pf.len {
                return Err(EmberError::PageNotFound {
                    page_id: page_id.as_u64(),
                });
            }
            let mut page = Box::new([0u8; PAGE_SIZE]);
            pf.file
                .seek(SeekFrom::Start(page_id.page_num as u64 * PAGE_SIZE as u64))?;
            pf.file.read_exact(&mut page[..])?;
            Ok(page)
        })
    }

    /// Writes one full page, growing the file if it lies past the end.
    pub fn write_page(&self, page_id: PageId, data: &[u8]) -> Result<()> {
        if data.len() != PAGE_SIZE {
            return Err(EmberError::Internal(format!(
                "page write of {} bytes, expected {}",
                data.len(),
                PAGE_SIZE
            )));
        }
        let fsync = self.config.fsync_enabled;
        self.with_file(page_id.file_id, |pf| pf.write_at(page_id.page_num, data, fsync))?;
        trace!(page_id = %page_id, "wrote page");
        Ok(())
    }

    /// Appends a zero-filled page to `file_id` and returns its id.
    pub fn allocate_page(&self, file_id: u32) -> Result<PageId> {
        let fsync = self.config.fsync_enabled;
        self.with_file(file_id, |pf| {
            let page_num = pf.len;
            pf.write_at(page_num, &[0u8; PAGE_SIZE], fsync)?;
            Ok(PageId::new(file_id, page_num))
        })
    }

    /// Number of pages in `file_id`; 0 for a file that does not exist yet.
    pub fn num_pages(&self, file_id: u32) -> Result<u32> {
        self.with_file(file_id, |pf| Ok(pf.len))
    }

    /// Syncs every open file.
    pub fn flush(&self) -> Result<()> {
        for pf in self.files.lock().values() {
            pf.file.sync_all()?;
        }
        Ok(())
    }
}

impl Drop for DiskManager {
    fn drop(&mut self) {
        if let Err(e) = self.flush() {
            warn!(error = %e, "failed to sync page files on close");
        }
    }
}
