//! Buffer pool management for EmberDB.
//!
//! This crate provides in-memory page caching with:
//! - Fixed-size buffer pool with configurable page count
//! - Clock eviction policy that never evicts a pinned frame
//! - Scoped pins through the [`PinnedPage`] guard
//! - Dirty page tracking for write-back

mod frame;
mod page_table;
mod pool;
mod replacer;

pub use frame::{BufferFrame, FrameId};
pub use pool::{BufferPool, BufferPoolConfig, BufferPoolStats, PinnedPage};
pub use replacer::{ClockReplacer, Replacer};
