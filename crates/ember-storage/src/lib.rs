//! Storage engine for EmberDB.
//!
//! This crate provides:
//! - Disk manager for page-level file I/O
//! - Buffer pool manager that loads pages on a miss and enforces the
//!   write-ahead rule on write-back
//! - B+Tree index handle, node view and leaf scan cursor

mod buffer_manager;
mod disk;
mod index;

pub use buffer_manager::BufferPoolManager;
pub use disk::{DiskManager, DiskManagerConfig};
pub use index::{
    compare_keys, internal_capacity, leaf_capacity, IndexFileHeader, IndexHandle, Iid,
    LeafEntries, LeafScan, NodeGuard, NodeHeader, NodeView, Rid, ENTRIES_OFFSET, NO_PAGE,
};
