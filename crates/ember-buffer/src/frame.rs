//! Frames: the fixed slots a buffer pool caches pages in.
//!
//! A frame's pin count doubles as its eviction latch. Pins are taken with a
//! CAS loop that refuses a claimed frame, and the pool claims a frame only
//! when the count is exactly zero, so a pinned page can never be evicted.

use ember_common::page::{PageId, PAGE_SIZE};
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

type PageBuf = Box<[u8; PAGE_SIZE]>;

/// Packed page id of an empty frame.
const EMPTY: u64 = u64::MAX;

/// Pin count of a frame claimed for eviction.
const CLAIMED: u32 = u32::MAX;

/// Index of a frame in the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameId(pub u32);

impl std::fmt::Display for FrameId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "frame:{}", self.0)
    }
}

/// One cached page plus the state a pin holder needs.
///
/// Replacement order is the replacer's business, not the frame's.
pub struct BufferFrame {
    frame_id: FrameId,
    page_id: AtomicU64,
    data: RwLock<PageBuf>,
    /// Pin holders, or CLAIMED while the pool recycles the frame.
    pin_count: AtomicU32,
    /// Modified since last written back.
    is_dirty: AtomicBool,
}

impl BufferFrame {
    pub fn new(frame_id: FrameId) -> Self {
        Self {
            frame_id,
            page_id: AtomicU64::new(EMPTY),
            data: RwLock::new(Box::new([0u8; PAGE_SIZE])),
            pin_count: AtomicU32::new(0),
            is_dirty: AtomicBool::new(false),
        }
    }

    #[inline]
    pub fn frame_id(&self) -> FrameId {
        self.frame_id
    }

    /// Page held by this frame, if any.
    #[inline]
    pub fn page_id(&self) -> Option<PageId> {
        match self.page_id.load(Ordering::Acquire) {
            EMPTY => None,
            packed => Some(PageId::from_u64(packed)),
        }
    }

    #[inline]
    pub fn set_page_id(&self, page_id: Option<PageId>) {
        self.page_id
            .store(page_id.map_or(EMPTY, |pid| pid.as_u64()), Ordering::Release);
    }

    /// Current pin holders. A claimed frame reports 0.
    #[inline]
    pub fn pin_count(&self) -> u32 {
        match self.pin_count.load(Ordering::Acquire) {
            CLAIMED => 0,
            n => n,
        }
    }

    /// Applies `step` to the pin count if `accept` allows its current value.
    /// Returns the new count.
    #[inline]
    fn update_pins(&self, accept: impl Fn(u32) -> bool, step: impl Fn(u32) -> u32) -> Option<u32> {
        self.pin_count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                accept(n).then(|| step(n))
            })
            .ok()
            .map(step)
    }

    /// Adds a pin. Returns false if the frame is claimed; the caller must not
    /// touch it then.
    #[inline]
    pub fn try_pin(&self) -> bool {
        self.update_pins(|n| n != CLAIMED, |n| n + 1).is_some()
    }

    /// Drops a pin and returns the remaining count. No-op on an unpinned or
    /// claimed frame.
    #[inline]
    pub fn unpin(&self) -> u32 {
        self.update_pins(|n| n != 0 && n != CLAIMED, |n| n - 1)
            .unwrap_or(0)
    }

    /// Claims the frame for eviction if nobody holds a pin. A claimed frame
    /// refuses pins until `reset` or `release_claim`.
    #[inline]
    pub fn try_claim(&self) -> bool {
        self.pin_count
            .compare_exchange(0, CLAIMED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Gives up a claim, leaving the frame unpinned with its page intact.
    #[inline]
    pub fn release_claim(&self) {
        let _ = self
            .pin_count
            .compare_exchange(CLAIMED, 0, Ordering::AcqRel, Ordering::Acquire);
    }

    #[inline]
    pub fn is_pinned(&self) -> bool {
        self.pin_count() > 0
    }

    #[inline]
    pub fn is_dirty(&self) -> bool {
        self.is_dirty.load(Ordering::Acquire)
    }

    #[inline]
    pub fn set_dirty(&self, dirty: bool) {
        self.is_dirty.store(dirty, Ordering::Release);
    }

    #[inline]
    pub fn read_data(&self) -> RwLockReadGuard<'_, PageBuf> {
        self.data.read()
    }

    #[inline]
    pub fn write_data(&self) -> RwLockWriteGuard<'_, PageBuf> {
        self.data.write()
    }

    /// Overwrites the start of the page with `src`, up to one page.
    pub fn copy_from(&self, src: &[u8]) {
        let len = src.len().min(PAGE_SIZE);
        self.data.write()[..len].copy_from_slice(&src[..len]);
    }

    /// Empties the frame: no page, clean, zeroed and unpinned.
    pub fn reset(&self) {
        self.set_page_id(None);
        self.set_dirty(false);
        self.data.write().fill(0);
        self.pin_count.store(0, Ordering::Release);
    }
}

impl std::fmt::Debug for BufferFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferFrame")
            .field("frame_id", &self.frame_id)
            .field("page_id", &self.page_id())
            .field("pin_count", &self.pin_count())
            .field("is_dirty", &self.is_dirty())
            .finish()
    }
}
