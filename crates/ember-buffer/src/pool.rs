//! Buffer pool manager.

use crate::frame::{BufferFrame, FrameId};
use crate::page_table::PageTable;
use crate::replacer::{ClockReplacer, Replacer};
use ember_common::page::{PageId, PAGE_SIZE};
use ember_common::{EmberError, Result, StorageConfig};
use parking_lot::{Mutex, RwLockReadGuard, RwLockWriteGuard};
use std::sync::atomic::{AtomicU64, Ordering};
use sysinfo::System;
use tracing::{debug, trace};

/// Configuration for the buffer pool.
#[derive(Debug, Clone)]
pub struct BufferPoolConfig {
    /// Number of frames in the pool.
    pub num_frames: usize,
}

impl Default for BufferPoolConfig {
    fn default() -> Self {
        Self { num_frames: 1024 }
    }
}

impl From<&StorageConfig> for BufferPoolConfig {
    fn from(config: &StorageConfig) -> Self {
        Self {
            num_frames: config.buffer_pool_pages,
        }
    }
}

/// Buffer pool manager.
///
/// Manages a fixed-size pool of page frames with:
/// - Page ID to frame ID mapping (lock-free lookups)
/// - Free frame list for new pages
/// - Clock replacement for eviction
/// - Pin counting for concurrent access
///
/// A frame with a positive pin count is never chosen for eviction. Pins are
/// handed out as [`PinnedPage`] guards that unpin on drop.
pub struct BufferPool {
    /// Configuration.
    config: BufferPoolConfig,
    /// Array of buffer frames.
    frames: Vec<BufferFrame>,
    /// Page ID to frame ID mapping.
    page_table: PageTable,
    /// List of free frame IDs. Its lock also serializes frame allocation,
    /// eviction and page table updates.
    free_list: Mutex<Vec<FrameId>>,
    /// Page replacement policy.
    replacer: ClockReplacer,
    /// Pins handed out since creation.
    fetches: AtomicU64,
    /// Pins released since creation.
    unpins: AtomicU64,
}

impl BufferPool {
    /// Creates a new buffer pool.
    pub fn new(config: BufferPoolConfig) -> Self {
        let num_frames = config.num_frames;

        let frames: Vec<_> = (0..num_frames)
            .map(|i| BufferFrame::new(FrameId(i as u32)))
            .collect();

        // All frames start in free list, popped from the back
        let free_list: Vec<_> = (0..num_frames).rev().map(|i| FrameId(i as u32)).collect();

        Self {
            config,
            frames,
            page_table: PageTable::new(num_frames),
            free_list: Mutex::new(free_list),
            replacer: ClockReplacer::new(num_frames),
            fetches: AtomicU64::new(0),
            unpins: AtomicU64::new(0),
        }
    }

    /// Creates a buffer pool sized to 25% of available system RAM.
    ///
    /// Minimum 1,000 frames to ensure useful caching even on low-memory systems.
    pub fn auto_sized() -> Self {
        let mut sys = System::new();
        sys.refresh_memory();

        let available_bytes = sys.available_memory() as usize;
        let target_bytes = available_bytes / 4;
        let num_frames = (target_bytes / PAGE_SIZE).max(1_000);
        debug!(num_frames, available_bytes, "sizing buffer pool from available memory");

        Self::new(BufferPoolConfig { num_frames })
    }

    /// Creates a buffer pool from the storage configuration.
    ///
    /// A `buffer_pool_pages` of 0 sizes the pool from available memory.
    pub fn from_config(config: &StorageConfig) -> Self {
        if config.buffer_pool_pages == 0 {
            Self::auto_sized()
        } else {
            Self::new(BufferPoolConfig::from(config))
        }
    }

    /// Returns the number of frames in the pool.
    pub fn num_frames(&self) -> usize {
        self.config.num_frames
    }

    /// Returns the number of free frames.
    pub fn free_count(&self) -> usize {
        self.free_list.lock().len()
    }

    /// Returns the number of pages currently in the pool.
    pub fn page_count(&self) -> usize {
        self.page_table.len()
    }

    /// Checks if a page is in the buffer pool.
    pub fn contains(&self, page_id: PageId) -> bool {
        self.page_table.contains(page_id)
    }

    /// Returns the pin count of a resident page, or None if it is not resident.
    pub fn pin_count(&self, page_id: PageId) -> Option<u32> {
        let frame_id = self.page_table.get(page_id)?;
        let frame = &self.frames[frame_id.0 as usize];
        (frame.page_id() == Some(page_id)).then(|| frame.pin_count())
    }

    /// Pins the frame if it still holds `page_id`.
    fn pin_frame(&self, frame_id: FrameId, page_id: PageId) -> bool {
        let frame = &self.frames[frame_id.0 as usize];
        if !frame.try_pin() {
            return false;
        }
        if frame.page_id() != Some(page_id) {
            // Frame was recycled between lookup and pin
            frame.unpin();
            return false;
        }
        self.replacer.record_access(frame_id);
        self.fetches.fetch_add(1, Ordering::Relaxed);
        true
    }

    fn guard(&self, frame_id: FrameId, page_id: PageId) -> PinnedPage<'_> {
        PinnedPage {
            pool: self,
            frame: &self.frames[frame_id.0 as usize],
            page_id,
            dirty: false,
        }
    }

    /// Fetches a resident page and pins it.
    ///
    /// Returns None if the page is not in the pool. Reading it from disk is
    /// the caller's job (see `load_page`).
    #[inline]
    pub fn fetch_page(&self, page_id: PageId) -> Option<PinnedPage<'_>> {
        let frame_id = self.page_table.get(page_id)?;
        if self.pin_frame(frame_id, page_id) {
            Some(self.guard(frame_id, page_id))
        } else {
            None
        }
    }

    /// Picks a frame for a new page. Must be called with the free list locked.
    ///
    /// A dirty victim is handed to `write_back` while its frame is still
    /// claimed and mapped. If that fails the victim stays resident, dirty and
    /// unpinned, and the error is returned.
    fn allocate_frame<W>(&self, free_list: &mut Vec<FrameId>, write_back: &mut W) -> Result<FrameId>
    where
        W: FnMut(PageId, &[u8]) -> Result<()>,
    {
        if let Some(frame_id) = free_list.pop() {
            return Ok(frame_id);
        }

        // Only frames whose pin count is zero can be claimed
        let victim_id = self
            .replacer
            .victim(&mut |fid| self.frames[fid.0 as usize].try_claim())
            .ok_or(EmberError::BufferPoolFull)?;

        let frame = &self.frames[victim_id.0 as usize];
        let Some(old) = frame.page_id() else {
            return Ok(victim_id);
        };

        let dirty = frame.is_dirty();
        if dirty {
            let result = write_back(old, &**frame.read_data());
            if let Err(e) = result {
                frame.release_claim();
                self.replacer.record_access(victim_id);
                debug!(page_id = %old, frame = %victim_id, error = %e, "write-back of victim failed");
                return Err(e);
            }
        }

        self.page_table.remove(old);
        trace!(page_id = %old, frame = %victim_id, dirty, "evicted page");
        Ok(victim_id)
    }

    /// Returns a frame that never became visible to the free list.
    fn discard_frame(&self, free_list: &mut Vec<FrameId>, frame_id: FrameId) {
        self.frames[frame_id.0 as usize].reset();
        free_list.push(frame_id);
    }

    /// Installs a page in a frame, initializing its bytes with `init`.
    ///
    /// If the page is already resident the existing frame is pinned and `init`
    /// is not run.
    fn install<F, W>(&self, page_id: PageId, init: F, mut write_back: W) -> Result<PinnedPage<'_>>
    where
        F: FnOnce(&BufferFrame),
        W: FnMut(PageId, &[u8]) -> Result<()>,
    {
        let mut free_list = self.free_list.lock();

        // Claims only happen under this lock, so a resident page is pinnable
        if let Some(frame_id) = self.page_table.get(page_id) {
            if self.pin_frame(frame_id, page_id) {
                return Ok(self.guard(frame_id, page_id));
            }
            return Err(EmberError::Internal(format!(
                "page {page_id} is mapped to {frame_id} but could not be pinned"
            )));
        }

        let frame_id = self.allocate_frame(&mut free_list, &mut write_back)?;

        let frame = &self.frames[frame_id.0 as usize];
        frame.reset();
        init(frame);
        frame.set_page_id(Some(page_id));

        if !self.page_table.insert(page_id, frame_id) {
            self.discard_frame(&mut free_list, frame_id);
            return Err(EmberError::Internal("page table is full".to_string()));
        }
        if !self.pin_frame(frame_id, page_id) {
            self.page_table.remove(page_id);
            self.discard_frame(&mut free_list, frame_id);
            return Err(EmberError::Internal(format!(
                "freshly installed {frame_id} could not be pinned"
            )));
        }

        drop(free_list);
        Ok(self.guard(frame_id, page_id))
    }

    /// Inserts a new zero-filled page into the buffer pool and pins it.
    ///
    /// If the page already exists, returns the existing frame. A dirty page
    /// evicted to make room goes through `write_back` first.
    pub fn new_page<W>(&self, page_id: PageId, write_back: W) -> Result<PinnedPage<'_>>
    where
        W: FnMut(PageId, &[u8]) -> Result<()>,
    {
        self.install(page_id, |_| {}, write_back)
    }

    /// Loads page data read from disk into the buffer pool.
    ///
    /// If another caller installed the page first, its frame is pinned and
    /// `data` is ignored. Eviction works as in [`BufferPool::new_page`].
    pub fn load_page<W>(&self, page_id: PageId, data: &[u8], write_back: W) -> Result<PinnedPage<'_>>
    where
        W: FnMut(PageId, &[u8]) -> Result<()>,
    {
        self.install(page_id, |frame| frame.copy_from(data), write_back)
    }

    /// Unpins a page in the buffer pool.
    ///
    /// Returns false if the page is not resident or is not pinned. Marking
    /// dirty is sticky: an unpin with `is_dirty = false` never cleans a page.
    #[inline]
    pub fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> bool {
        let Some(frame_id) = self.page_table.get(page_id) else {
            return false;
        };
        let frame = &self.frames[frame_id.0 as usize];
        if frame.page_id() != Some(page_id) || !frame.is_pinned() {
            return false;
        }

        if is_dirty {
            frame.set_dirty(true);
        }
        frame.unpin();
        self.unpins.fetch_add(1, Ordering::Relaxed);
        true
    }

    /// Flushes a page to the provided callback.
    ///
    /// The callback receives the page data if the page is dirty.
    /// Returns true if the page was flushed.
    pub fn flush_page<F>(&self, page_id: PageId, mut flush_fn: F) -> Result<bool>
    where
        F: FnMut(PageId, &[u8]) -> Result<()>,
    {
        let Some(page) = self.fetch_page(page_id) else {
            return Ok(false);
        };
        if !page.frame.is_dirty() {
            return Ok(false);
        }

        let data = page.frame.read_data();
        flush_fn(page_id, &**data)?;
        page.frame.set_dirty(false);
        Ok(true)
    }

    /// Flushes all dirty pages.
    ///
    /// Returns the number of pages flushed. Stops at the first callback error.
    pub fn flush_all<F>(&self, mut flush_fn: F) -> Result<usize>
    where
        F: FnMut(PageId, &[u8]) -> Result<()>,
    {
        let mut resident = Vec::new();
        self.page_table.for_each(|page_id, _| {
            resident.push(page_id);
            true
        });

        let mut flushed = 0;
        for page_id in resident {
            if self.flush_page(page_id, &mut flush_fn)? {
                flushed += 1;
            }
        }
        Ok(flushed)
    }

    /// Returns statistics about the buffer pool.
    pub fn stats(&self) -> BufferPoolStats {
        let mut pinned_count = 0;
        let mut dirty_count = 0;

        self.page_table.for_each(|_, frame_id| {
            let frame = &self.frames[frame_id.0 as usize];
            if frame.is_pinned() {
                pinned_count += 1;
            }
            if frame.is_dirty() {
                dirty_count += 1;
            }
            true
        });

        BufferPoolStats {
            total_frames: self.config.num_frames,
            free_frames: self.free_count(),
            used_frames: self.page_table.len(),
            pinned_frames: pinned_count,
            dirty_frames: dirty_count,
            fetches: self.fetches.load(Ordering::Relaxed),
            unpins: self.unpins.load(Ordering::Relaxed),
        }
    }
}

/// Statistics about the buffer pool.
#[derive(Debug, Clone)]
pub struct BufferPoolStats {
    /// Total number of frames.
    pub total_frames: usize,
    /// Number of free frames.
    pub free_frames: usize,
    /// Number of frames with pages.
    pub used_frames: usize,
    /// Number of pinned frames.
    pub pinned_frames: usize,
    /// Number of dirty frames.
    pub dirty_frames: usize,
    /// Pins handed out since the pool was created.
    pub fetches: u64,
    /// Pins released since the pool was created.
    pub unpins: u64,
}

impl BufferPoolStats {
    /// Pins currently outstanding according to the cumulative counters.
    pub fn outstanding_pins(&self) -> u64 {
        self.fetches.saturating_sub(self.unpins)
    }
}

/// Scoped pin on one buffer pool page.
///
/// Dropping the guard unpins the page exactly once, passing the dirty flag
/// set through [`PinnedPage::mark_dirty`].
pub struct PinnedPage<'a> {
    pool: &'a BufferPool,
    frame: &'a BufferFrame,
    page_id: PageId,
    dirty: bool,
}

impl<'a> PinnedPage<'a> {
    /// Returns the page ID.
    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    /// Returns the page data.
    pub fn data(&self) -> RwLockReadGuard<'_, Box<[u8; PAGE_SIZE]>> {
        self.frame.read_data()
    }

    /// Returns mutable access to page data. Call `mark_dirty` to keep changes.
    pub fn data_mut(&self) -> RwLockWriteGuard<'_, Box<[u8; PAGE_SIZE]>> {
        self.frame.write_data()
    }

    /// Marks the page dirty; the flag is handed to the pool on release.
    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    /// Returns true if this guard will release the page as dirty.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Returns the owning pool.
    pub fn pool(&self) -> &'a BufferPool {
        self.pool
    }

    /// Consumes the guard without releasing the pin.
    ///
    /// The caller takes over the pin and must release it with
    /// `BufferPool::unpin_page`. A dirty mark already set on the guard is
    /// applied to the frame here.
    pub fn keep_pinned(self) -> PageId {
        let page_id = self.page_id;
        if self.dirty {
            self.frame.set_dirty(true);
        }
        std::mem::forget(self);
        page_id
    }
}

impl std::fmt::Debug for PinnedPage<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PinnedPage")
            .field("page_id", &self.page_id)
            .field("frame", &self.frame.frame_id())
            .field("dirty", &self.dirty)
            .finish()
    }
}

impl Drop for PinnedPage<'_> {
    fn drop(&mut self) {
        self.pool.unpin_page(self.page_id, self.dirty);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_pool(num_frames: usize) -> BufferPool {
        BufferPool::new(BufferPoolConfig { num_frames })
    }

    /// Write-back callback for tests that never evict a dirty page.
    fn no_write_back(page_id: PageId, _data: &[u8]) -> Result<()> {
        panic!("unexpected write-back of {page_id}")
    }

    #[test]
    fn test_buffer_pool_new() {
        let pool = create_test_pool(10);

        assert_eq!(pool.num_frames(), 10);
        assert_eq!(pool.free_count(), 10);
        assert_eq!(pool.page_count(), 0);
    }

    #[test]
    fn test_buffer_pool_from_config() {
        let config = StorageConfig {
            buffer_pool_pages: 16,
            ..Default::default()
        };
        assert_eq!(BufferPool::from_config(&config).num_frames(), 16);
    }

    #[test]
    fn test_buffer_pool_new_page() {
        let pool = create_test_pool(10);
        let page_id = PageId::new(0, 1);

        let page = pool.new_page(page_id, no_write_back).unwrap();

        assert_eq!(page.page_id(), page_id);
        assert_eq!(pool.pin_count(page_id), Some(1));
        assert_eq!(pool.free_count(), 9);
        assert_eq!(pool.page_count(), 1);
        assert!(pool.contains(page_id));
    }

    #[test]
    fn test_guard_releases_pin() {
        let pool = create_test_pool(10);
        let page_id = PageId::new(0, 1);

        {
            let _page = pool.new_page(page_id, no_write_back).unwrap();
            assert_eq!(pool.pin_count(page_id), Some(1));
        }
        assert_eq!(pool.pin_count(page_id), Some(0));

        let stats = pool.stats();
        assert_eq!(stats.fetches, 1);
        assert_eq!(stats.unpins, 1);
        assert_eq!(stats.outstanding_pins(), 0);
        assert_eq!(stats.pinned_frames, 0);
    }

    #[test]
    fn test_buffer_pool_fetch_existing() {
        let pool = create_test_pool(10);
        let page_id = PageId::new(0, 1);

        drop(pool.new_page(page_id, no_write_back).unwrap());

        let page = pool.fetch_page(page_id).unwrap();
        assert_eq!(page.page_id(), page_id);
        assert_eq!(pool.pin_count(page_id), Some(1));

        let second = pool.fetch_page(page_id).unwrap();
        assert_eq!(pool.pin_count(page_id), Some(2));
        drop(second);
        drop(page);
        assert_eq!(pool.pin_count(page_id), Some(0));
    }

    #[test]
    fn test_keep_pinned_then_manual_unpin() {
        let pool = create_test_pool(10);
        let page_id = PageId::new(0, 1);

        let held = pool.new_page(page_id, no_write_back).unwrap().keep_pinned();
        assert_eq!(held, page_id);
        assert_eq!(pool.pin_count(page_id), Some(1));

        assert!(pool.unpin_page(page_id, true));
        assert_eq!(pool.pin_count(page_id), Some(0));
        assert_eq!(pool.stats().dirty_frames, 1);
        assert_eq!(pool.stats().outstanding_pins(), 0);
    }

    #[test]
    fn test_buffer_pool_fetch_nonexistent() {
        let pool = create_test_pool(10);
        assert!(pool.fetch_page(PageId::new(0, 1)).is_none());
        assert_eq!(pool.stats().fetches, 0);
    }

    #[test]
    fn test_unpin_unknown_or_unpinned() {
        let pool = create_test_pool(10);
        let page_id = PageId::new(0, 1);

        assert!(!pool.unpin_page(page_id, false));

        drop(pool.new_page(page_id, no_write_back).unwrap());
        // Already released by the guard
        assert!(!pool.unpin_page(page_id, false));
        assert_eq!(pool.stats().unpins, 1);
    }

    #[test]
    fn test_buffer_pool_dirty_tracking() {
        let pool = create_test_pool(10);
        let page_id = PageId::new(0, 1);

        {
            let mut page = pool.new_page(page_id, no_write_back).unwrap();
            page.data_mut()[0] = 7;
            page.mark_dirty();
        }
        // A clean release later does not clear the flag
        drop(pool.fetch_page(page_id).unwrap());

        assert_eq!(pool.stats().dirty_frames, 1);
    }

    #[test]
    fn test_buffer_pool_eviction() {
        let pool = create_test_pool(3);

        for i in 0..3 {
            drop(pool.new_page(PageId::new(0, i), no_write_back).unwrap());
        }

        assert_eq!(pool.free_count(), 0);
        assert_eq!(pool.page_count(), 3);

        let new_page_id = PageId::new(0, 99);
        // Victims are clean, so nothing is written back
        let _page = pool.new_page(new_page_id, no_write_back).unwrap();

        assert_eq!(pool.page_count(), 3);
        assert!(pool.contains(new_page_id));
    }

    #[test]
    fn test_buffer_pool_eviction_dirty() {
        let pool = create_test_pool(1);
        let page_id1 = PageId::new(0, 1);

        {
            let mut page = pool.new_page(page_id1, no_write_back).unwrap();
            page.data_mut()[0] = 0xAB;
            page.mark_dirty();
        }

        let page_id2 = PageId::new(0, 2);
        let mut written = Vec::new();
        let _page = pool
            .new_page(page_id2, |pid, data| {
                written.push((pid, data[0]));
                Ok(())
            })
            .unwrap();

        assert_eq!(written, vec![(page_id1, 0xAB)]);
        assert!(!pool.contains(page_id1));
    }

    #[test]
    fn test_pinned_page_is_never_evicted() {
        let pool = create_test_pool(2);
        let pinned_id = PageId::new(0, 1);

        let _pinned = pool.new_page(pinned_id, no_write_back).unwrap();
        for i in 10..20 {
            drop(pool.new_page(PageId::new(0, i), no_write_back).unwrap());
            assert!(pool.contains(pinned_id));
        }
    }

    #[test]
    fn test_buffer_pool_full_all_pinned() {
        let pool = create_test_pool(2);

        let _a = pool.new_page(PageId::new(0, 1), no_write_back).unwrap();
        let _b = pool.new_page(PageId::new(0, 2), no_write_back).unwrap();

        let result = pool.new_page(PageId::new(0, 3), no_write_back);
        assert!(matches!(result, Err(EmberError::BufferPoolFull)));
    }

    #[test]
    fn test_failed_write_back_keeps_victim() {
        let pool = create_test_pool(1);
        let page_id1 = PageId::new(0, 1);

        {
            let mut page = pool.new_page(page_id1, no_write_back).unwrap();
            page.data_mut()[200] = 0xAB;
            page.mark_dirty();
        }

        let result = pool.new_page(PageId::new(0, 2), |_, _| {
            Err(EmberError::IoError("disk gone".into()))
        });
        assert!(matches!(result, Err(EmberError::IoError(_))));

        // Still resident, dirty and unpinned; the frame is not lost
        assert!(!pool.contains(PageId::new(0, 2)));
        assert_eq!(pool.pin_count(page_id1), Some(0));
        assert_eq!(pool.stats().dirty_frames, 1);
        assert_eq!(pool.fetch_page(page_id1).unwrap().data()[200], 0xAB);

        let mut written = None;
        let page = pool
            .new_page(PageId::new(0, 2), |pid, data| {
                written = Some((pid, data[200]));
                Ok(())
            })
            .unwrap();
        assert_eq!(written, Some((page_id1, 0xAB)));
        assert_eq!(page.page_id(), PageId::new(0, 2));
        assert!(!pool.contains(page_id1));
    }

    #[test]
    fn test_buffer_pool_load_page() {
        let pool = create_test_pool(10);
        let page_id = PageId::new(0, 1);
        let data = [0xABu8; PAGE_SIZE];

        let page = pool.load_page(page_id, &data, no_write_back).unwrap();
        assert_eq!(page.data()[0], 0xAB);
        assert_eq!(page.data()[100], 0xAB);
    }

    #[test]
    fn test_load_page_keeps_resident_copy() {
        let pool = create_test_pool(10);
        let page_id = PageId::new(0, 1);

        {
            let mut page = pool.new_page(page_id, no_write_back).unwrap();
            page.data_mut()[0] = 1;
            page.mark_dirty();
        }

        let page = pool.load_page(page_id, &[9u8; PAGE_SIZE], no_write_back).unwrap();
        assert_eq!(page.data()[0], 1);
        assert_eq!(pool.page_count(), 1);
    }

    #[test]
    fn test_buffer_pool_flush_page() {
        let pool = create_test_pool(10);
        let page_id = PageId::new(0, 1);

        pool.new_page(page_id, no_write_back).unwrap().mark_dirty();

        let mut flushed_pages = vec![];
        let result = pool.flush_page(page_id, |pid, _data| {
            flushed_pages.push(pid);
            Ok(())
        });

        assert!(result.unwrap());
        assert_eq!(flushed_pages, vec![page_id]);
        assert_eq!(pool.stats().dirty_frames, 0);

        // Clean page is not flushed again
        assert!(!pool.flush_page(page_id, |_, _| Ok(())).unwrap());
        assert_eq!(pool.pin_count(page_id), Some(0));
    }

    #[test]
    fn test_flush_page_error_keeps_dirty() {
        let pool = create_test_pool(10);
        let page_id = PageId::new(0, 1);
        pool.new_page(page_id, no_write_back).unwrap().mark_dirty();

        let result = pool.flush_page(page_id, |_, _| Err(EmberError::IoError("disk gone".into())));
        assert!(result.is_err());
        assert_eq!(pool.stats().dirty_frames, 1);
        assert_eq!(pool.pin_count(page_id), Some(0));
    }

    #[test]
    fn test_buffer_pool_flush_all() {
        let pool = create_test_pool(10);

        for i in 0..5 {
            let mut page = pool.new_page(PageId::new(0, i), no_write_back).unwrap();
            if i != 2 {
                page.mark_dirty();
            }
        }

        let mut flushed_count = 0;
        let result = pool.flush_all(|_pid, _data| {
            flushed_count += 1;
            Ok(())
        });

        assert_eq!(result.unwrap(), 4);
        assert_eq!(flushed_count, 4);
        assert_eq!(pool.stats().outstanding_pins(), 0);
    }

    #[test]
    fn test_buffer_pool_stats() {
        let pool = create_test_pool(10);
        let mut held = Vec::new();

        for i in 0..5 {
            let mut page = pool.new_page(PageId::new(0, i), no_write_back).unwrap();
            if i % 2 == 0 {
                page.mark_dirty();
            } else {
                // Odd pages remain pinned
                held.push(page);
            }
        }

        let stats = pool.stats();
        assert_eq!(stats.total_frames, 10);
        assert_eq!(stats.free_frames, 5);
        assert_eq!(stats.used_frames, 5);
        assert_eq!(stats.pinned_frames, 2); // Pages 1, 3
        assert_eq!(stats.dirty_frames, 3); // Pages 0, 2, 4
        assert_eq!(stats.outstanding_pins(), 2);
    }

    #[test]
    fn test_buffer_pool_duplicate_new_page() {
        let pool = create_test_pool(10);
        let page_id = PageId::new(0, 1);

        drop(pool.new_page(page_id, no_write_back).unwrap());

        let page = pool.new_page(page_id, no_write_back).unwrap();
        assert_eq!(page.page_id(), page_id);
        assert_eq!(pool.page_count(), 1);
    }

    #[test]
    fn test_concurrent_fetch_and_evict() {
        use std::sync::Arc;
        use std::thread;

        let pool = Arc::new(create_test_pool(4));
        let mut handles = Vec::new();

        for t in 0..4u32 {
            let pool = Arc::clone(&pool);
            handles.push(thread::spawn(move || {
                for i in 0..200u32 {
                    let page_id = PageId::new(t, i % 8);
                    match pool.fetch_page(page_id) {
                        Some(page) => assert_eq!(page.page_id(), page_id),
                        None => match pool.new_page(page_id, no_write_back) {
                            Ok(page) => assert_eq!(page.page_id(), page_id),
                            Err(EmberError::BufferPoolFull) => {}
                            Err(e) => panic!("unexpected error: {e}"),
                        },
                    }
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        let stats = pool.stats();
        assert_eq!(stats.pinned_frames, 0);
        assert_eq!(stats.fetches, stats.unpins);
    }
}
