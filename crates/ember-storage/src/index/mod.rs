//! Disk-resident B+Tree index read through the buffer pool.
//!
//! An index file holds a header page (page 0) followed by node pages. Leaves
//! form a doubly linked chain ordered by key, bounded by the header's
//! `first_leaf` and `last_leaf`. Trees are built with
//! [`IndexHandle::bulk_load`] and read with point lookups, bound searches and
//! [`LeafScan`] cursors.

mod handle;
mod header;
mod node;
mod scan;
mod types;

pub use handle::IndexHandle;
pub use header::IndexFileHeader;
pub use node::{
    internal_capacity, leaf_capacity, NodeGuard, NodeHeader, NodeView, ENTRIES_OFFSET,
};
pub use scan::{LeafEntries, LeafScan};
pub use types::{compare_keys, Iid, Rid, NO_PAGE};
