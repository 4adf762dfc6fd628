//! Buffer pool backed by the disk manager.

use crate::disk::{DiskManager, DiskManagerConfig};
use ember_buffer::{BufferPool, BufferPoolStats, PinnedPage};
use ember_common::page::{PageHeader, PageId, PageType};
use ember_common::{Result, StorageConfig};
use ember_wal::{LogManager, Lsn};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::debug;

/// Pairs the in-memory buffer pool with on-disk pages.
///
/// Misses are read from disk. A dirty page chosen for eviction is written back
/// before its frame is reused; if that write fails the page stays in the pool,
/// still dirty, and the error is returned. With a log manager attached, no
/// page reaches disk before the log record named by its page LSN is durable.
pub struct BufferPoolManager {
    pool: Arc<BufferPool>,
    disk: Arc<DiskManager>,
    wal: Option<Arc<LogManager>>,
    /// Serializes disk loads and page allocation so a page is read at most
    /// once and an evicted page is written back before anyone rereads it.
    load_latch: Mutex<()>,
}

impl BufferPoolManager {
    /// Creates a manager without write-ahead enforcement.
    pub fn new(pool: Arc<BufferPool>, disk: Arc<DiskManager>) -> Self {
        Self {
            pool,
            disk,
            wal: None,
            load_latch: Mutex::new(()),
        }
    }

    /// Attaches the log manager consulted before every page write-back.
    pub fn with_log_manager(mut self, wal: Arc<LogManager>) -> Self {
        self.wal = Some(wal);
        self
    }

    /// Builds the pool and disk manager described by `config`.
    pub fn from_config(config: &StorageConfig) -> Result<Self> {
        config.validate()?;
        let disk = DiskManager::new(DiskManagerConfig::from(config))?;
        Ok(Self::new(
            Arc::new(BufferPool::from_config(config)),
            Arc::new(disk),
        ))
    }

    /// Returns the buffer pool.
    pub fn pool(&self) -> &BufferPool {
        &self.pool
    }

    /// Returns the disk manager.
    pub fn disk(&self) -> &DiskManager {
        &self.disk
    }

    /// Returns the attached log manager, if any.
    pub fn log_manager(&self) -> Option<&Arc<LogManager>> {
        self.wal.as_ref()
    }

    /// Fetches a page, reading it from disk on a miss, and pins it.
    pub fn fetch_page(&self, page_id: PageId) -> Result<PinnedPage<'_>> {
        if let Some(page) = self.pool.fetch_page(page_id) {
            return Ok(page);
        }

        let _latch = self.load_latch.lock();
        // Another thread may have loaded it while we waited
        if let Some(page) = self.pool.fetch_page(page_id) {
            return Ok(page);
        }

        let data = self.disk.read_page(page_id)?;
        self.pool
            .load_page(page_id, &data[..], |pid, bytes| self.write_back(pid, bytes))
    }

    /// Allocates a new zero-filled page at the end of `file_id` and pins it.
    ///
    /// The returned guard is already marked dirty.
    pub fn new_page(&self, file_id: u32) -> Result<PinnedPage<'_>> {
        let _latch = self.load_latch.lock();

        let page_id = self.disk.allocate_page(file_id)?;
        let mut page = self
            .pool
            .new_page(page_id, |pid, bytes| self.write_back(pid, bytes))?;

        page.mark_dirty();
        Ok(page)
    }

    /// Releases a pin taken with `PinnedPage::keep_pinned`.
    pub fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> bool {
        self.pool.unpin_page(page_id, is_dirty)
    }

    /// Writes one page back if it is dirty. Returns true if it was written.
    pub fn flush_page(&self, page_id: PageId) -> Result<bool> {
        self.pool
            .flush_page(page_id, |pid, data| self.write_back(pid, data))
    }

    /// Writes every dirty page back and syncs the data files.
    pub fn flush_all(&self) -> Result<usize> {
        let flushed = self
            .pool
            .flush_all(|pid, data| self.write_back(pid, data))?;
        self.disk.flush()?;
        debug!(flushed, "flushed buffer pool");
        Ok(flushed)
    }

    /// Returns buffer pool statistics.
    pub fn stats(&self) -> BufferPoolStats {
        self.pool.stats()
    }

    /// Writes a page to disk after forcing the log up to its page LSN.
    fn write_back(&self, page_id: PageId, data: &[u8]) -> Result<()> {
        if let Some(wal) = &self.wal {
            // Unformatted pages carry no LSN
            let header = PageHeader::from_bytes(&data[..PageHeader::SIZE]);
            let page_lsn = header.lsn;
            if header.page_type != PageType::Free
                && page_lsn != PageHeader::NO_LSN
                && !wal.is_durable(Lsn(page_lsn))
            {
                debug!(page_id = %page_id, page_lsn, "forcing log before page write");
                wal.flush_to(Lsn(page_lsn))?;
            }
        }
        self.disk.write_page(page_id, data)
    }
}
