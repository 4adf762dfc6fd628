//! Page table for buffer pool page ID to frame ID mapping.

use crate::frame::FrameId;
use ember_common::page::PageId;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

/// Sentinel value for empty value slots.
const EMPTY_FRAME: u32 = u32::MAX;

/// Sentinel value for empty key slots.
const EMPTY_KEY: u64 = u64::MAX;

/// Sentinel value for deleted key slots (tombstone).
const TOMBSTONE_KEY: u64 = u64::MAX - 1;

/// Page table mapping PageId to FrameId.
///
/// Open-addressing hash table with linear probing. Lookups take no lock.
/// Mutations (`insert`, `remove`) must be serialized by the caller; the
/// buffer pool does this under its allocation latch.
pub struct PageTable {
    /// Hash table keys (packed PageId).
    keys: Box<[AtomicU64]>,
    /// Hash table values (frame_id).
    values: Box<[AtomicU32]>,
    /// Bitmask for table indexing (size - 1).
    mask: usize,
}

impl PageTable {
    /// Creates a new page table with capacity for the given number of frames.
    pub fn new(capacity: usize) -> Self {
        // 2x capacity keeps the load factor at or below 50%
        let size = (capacity * 2).next_power_of_two().max(64);

        let keys: Box<[AtomicU64]> = (0..size).map(|_| AtomicU64::new(EMPTY_KEY)).collect();
        let values: Box<[AtomicU32]> = (0..size).map(|_| AtomicU32::new(EMPTY_FRAME)).collect();

        Self {
            keys,
            values,
            mask: size - 1,
        }
    }

    /// Looks up a page ID and returns its frame ID if present.
    #[inline]
    pub fn get(&self, page_id: PageId) -> Option<FrameId> {
        let key = page_id.as_u64();
        let mut idx = self.index(key);

        for _ in 0..self.keys.len() {
            let stored = self.keys[idx].load(Ordering::Acquire);
            if stored == EMPTY_KEY {
                return None;
            }
            if stored == key {
                return Some(FrameId(self.values[idx].load(Ordering::Acquire)));
            }
            idx = (idx + 1) & self.mask;
        }
        None
    }

    /// Inserts or updates a page ID to frame ID mapping.
    ///
    /// Returns false if the table has no free slot.
    pub fn insert(&self, page_id: PageId, frame_id: FrameId) -> bool {
        let key = page_id.as_u64();
        let mut idx = self.index(key);
        let mut first_free: Option<usize> = None;

        for _ in 0..self.keys.len() {
            let stored = self.keys[idx].load(Ordering::Acquire);
            if stored == key {
                self.values[idx].store(frame_id.0, Ordering::Release);
                return true;
            }
            if stored == TOMBSTONE_KEY && first_free.is_none() {
                first_free = Some(idx);
            }
            if stored == EMPTY_KEY {
                first_free.get_or_insert(idx);
                break;
            }
            idx = (idx + 1) & self.mask;
        }

        match first_free {
            Some(slot) => {
                // Value before key so a reader that sees the key sees the frame
                self.values[slot].store(frame_id.0, Ordering::Release);
                self.keys[slot].store(key, Ordering::Release);
                true
            }
            None => false,
        }
    }

    /// Removes a page ID mapping. Returns the frame ID if it was present.
    pub fn remove(&self, page_id: PageId) -> Option<FrameId> {
        let key = page_id.as_u64();
        let mut idx = self.index(key);

        for _ in 0..self.keys.len() {
            let stored = self.keys[idx].load(Ordering::Acquire);
            if stored == EMPTY_KEY {
                return None;
            }
            if stored == key {
                let frame_id = self.values[idx].load(Ordering::Acquire);
                self.keys[idx].store(TOMBSTONE_KEY, Ordering::Release);
                return Some(FrameId(frame_id));
            }
            idx = (idx + 1) & self.mask;
        }
        None
    }

    #[inline(always)]
    fn index(&self, key: u64) -> usize {
        // FxHash-style multiply for distribution
        let hash = key.wrapping_mul(0x517cc1b727220a95);
        (hash as usize) & self.mask
    }

    /// Returns true if the page ID is in the table.
    pub fn contains(&self, page_id: PageId) -> bool {
        self.get(page_id).is_some()
    }

    /// Returns the number of entries in the table.
    pub fn len(&self) -> usize {
        self.keys
            .iter()
            .filter(|slot| {
                let key = slot.load(Ordering::Relaxed);
                key != EMPTY_KEY && key != TOMBSTONE_KEY
            })
            .count()
    }

    /// Returns true if the table is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Iterates over all entries, calling the provided function for each.
    /// Returns early if the function returns false.
    pub fn for_each<F>(&self, mut f: F)
    where
        F: FnMut(PageId, FrameId) -> bool,
    {
        for (idx, key_slot) in self.keys.iter().enumerate() {
            let key = key_slot.load(Ordering::Acquire);
            if key != EMPTY_KEY && key != TOMBSTONE_KEY {
                let frame_id = self.values[idx].load(Ordering::Acquire);
                if !f(PageId::from_u64(key), FrameId(frame_id)) {
                    return;
                }
            }
        }
    }
}
