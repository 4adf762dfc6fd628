//! B+Tree node pages.
//!
//! Page layout:
//! ```text
//! +------------------------+ 0
//! | Page Header (32 bytes) |
//! +------------------------+ 32
//! | Node Header (16 bytes) |
//! +------------------------+ 48 (ENTRIES_OFFSET)
//! | entry 0                |
//! | entry 1                |  leaf:     key + rid (8 bytes)
//! | ...                    |  internal: key + child page_no (4 bytes)
//! +------------------------+
//! ```
//!
//! Entries are fixed width and sorted by key. Each internal entry carries the
//! smallest key of its child's subtree.

use super::types::{compare_keys, Rid, NO_PAGE};
use ember_buffer::PinnedPage;
use ember_common::page::{PageHeader, PageId, PageType, PAGE_SIZE};

/// Offset of the first entry in a node page.
pub const ENTRIES_OFFSET: usize = PageHeader::SIZE + NodeHeader::SIZE;

/// Size of a child pointer in an internal entry.
const CHILD_SIZE: usize = 4;

/// Node header stored right after the common page header.
///
/// Layout (16 bytes):
/// - num_keys: 2 bytes
/// - key_len: 2 bytes
/// - prev_leaf: 4 bytes (page_no, -1 for none)
/// - next_leaf: 4 bytes (page_no, -1 for none)
/// - level: 2 bytes (0 for leaves)
/// - reserved: 2 bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeHeader {
    pub num_keys: u16,
    pub key_len: u16,
    pub prev_leaf: i32,
    pub next_leaf: i32,
    pub level: u16,
}

impl NodeHeader {
    /// Size of the node header in bytes.
    pub const SIZE: usize = 16;

    /// Offset of the node header in the page.
    pub const OFFSET: usize = PageHeader::SIZE;

    /// Creates an empty header with no siblings.
    pub fn new(key_len: u16, level: u16) -> Self {
        Self {
            num_keys: 0,
            key_len,
            prev_leaf: NO_PAGE,
            next_leaf: NO_PAGE,
            level,
        }
    }

    /// Serializes to bytes.
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0..2].copy_from_slice(&self.num_keys.to_le_bytes());
        buf[2..4].copy_from_slice(&self.key_len.to_le_bytes());
        buf[4..8].copy_from_slice(&self.prev_leaf.to_le_bytes());
        buf[8..12].copy_from_slice(&self.next_leaf.to_le_bytes());
        buf[12..14].copy_from_slice(&self.level.to_le_bytes());
        buf
    }

    /// Deserializes from bytes.
    pub fn from_bytes(buf: &[u8]) -> Self {
        Self {
            num_keys: u16::from_le_bytes([buf[0], buf[1]]),
            key_len: u16::from_le_bytes([buf[2], buf[3]]),
            prev_leaf: i32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]),
            next_leaf: i32::from_le_bytes([buf[8], buf[9], buf[10], buf[11]]),
            level: u16::from_le_bytes([buf[12], buf[13]]),
        }
    }

    /// Reads the node header out of a page.
    pub fn read(page: &[u8]) -> Self {
        Self::from_bytes(&page[Self::OFFSET..Self::OFFSET + Self::SIZE])
    }

    /// Writes the node header into a page.
    pub fn write(&self, page: &mut [u8]) {
        page[Self::OFFSET..Self::OFFSET + Self::SIZE].copy_from_slice(&self.to_bytes());
    }
}

/// Number of leaf entries that fit in one page.
pub fn leaf_capacity(key_len: usize) -> usize {
    (PAGE_SIZE - ENTRIES_OFFSET) / (key_len + Rid::SIZE)
}

/// Number of internal entries that fit in one page.
pub fn internal_capacity(key_len: usize) -> usize {
    (PAGE_SIZE - ENTRIES_OFFSET) / (key_len + CHILD_SIZE)
}

/// Formats `page` as an empty node.
pub fn init_node(page: &mut [u8], page_id: PageId, page_type: PageType, header: &NodeHeader) {
    page.fill(0);
    let page_header = PageHeader::new(page_id, page_type);
    page[..PageHeader::SIZE].copy_from_slice(&page_header.to_bytes());
    header.write(page);
}

/// Writes leaf entry `slot`. Does not touch `num_keys`.
pub fn write_leaf_entry(page: &mut [u8], key_len: usize, slot: usize, key: &[u8], rid: Rid) {
    let off = ENTRIES_OFFSET + slot * (key_len + Rid::SIZE);
    page[off..off + key_len].copy_from_slice(key);
    page[off + key_len..off + key_len + Rid::SIZE].copy_from_slice(&rid.to_bytes());
}

/// Writes internal entry `slot`. Does not touch `num_keys`.
pub fn write_internal_entry(page: &mut [u8], key_len: usize, slot: usize, key: &[u8], child: i32) {
    let off = ENTRIES_OFFSET + slot * (key_len + CHILD_SIZE);
    page[off..off + key_len].copy_from_slice(key);
    page[off + key_len..off + key_len + CHILD_SIZE].copy_from_slice(&child.to_le_bytes());
}

/// Read-only view of a node page.
#[derive(Clone, Copy)]
pub struct NodeView<'d> {
    data: &'d [u8],
    header: NodeHeader,
    page_type: PageType,
}

impl<'d> NodeView<'d> {
    pub fn new(data: &'d [u8]) -> Self {
        Self {
            data,
            header: NodeHeader::read(data),
            page_type: PageHeader::from_bytes(&data[..PageHeader::SIZE]).page_type,
        }
    }

    pub fn header(&self) -> NodeHeader {
        self.header
    }

    pub fn page_type(&self) -> PageType {
        self.page_type
    }

    pub fn is_leaf(&self) -> bool {
        self.page_type == PageType::BTreeLeaf
    }

    /// Number of occupied slots.
    pub fn size(&self) -> usize {
        self.header.num_keys as usize
    }

    pub fn key_len(&self) -> usize {
        self.header.key_len as usize
    }

    fn entry_size(&self) -> usize {
        self.key_len() + if self.is_leaf() { Rid::SIZE } else { CHILD_SIZE }
    }

    fn entry_offset(&self, slot: usize) -> usize {
        assert!(
            slot < self.size(),
            "slot {} out of bounds for node of size {}",
            slot,
            self.size()
        );
        ENTRIES_OFFSET + slot * self.entry_size()
    }

    /// Key stored at `slot`.
    pub fn key_at(&self, slot: usize) -> &'d [u8] {
        let off = self.entry_offset(slot);
        &self.data[off..off + self.key_len()]
    }

    /// Record pointer stored at leaf `slot`.
    pub fn rid_at(&self, slot: usize) -> Rid {
        debug_assert!(self.is_leaf());
        let off = self.entry_offset(slot) + self.key_len();
        Rid::from_bytes(&self.data[off..off + Rid::SIZE])
    }

    /// Child page number stored at internal `slot`.
    pub fn child_at(&self, slot: usize) -> i32 {
        debug_assert!(!self.is_leaf());
        let off = self.entry_offset(slot) + self.key_len();
        let d = &self.data[off..off + CHILD_SIZE];
        i32::from_le_bytes([d[0], d[1], d[2], d[3]])
    }

    /// First slot whose key is not less than `key`.
    pub fn lower_slot(&self, key: &[u8]) -> usize {
        self.partition_point(|k| compare_keys(k, key).is_lt())
    }

    /// First slot whose key is greater than `key`.
    pub fn upper_slot(&self, key: &[u8]) -> usize {
        self.partition_point(|k| compare_keys(k, key).is_le())
    }

    /// Binary search for the first slot where `pred` turns false.
    fn partition_point<P>(&self, pred: P) -> usize
    where
        P: Fn(&[u8]) -> bool,
    {
        let mut low = 0usize;
        let mut high = self.size();
        while low < high {
            let mid = low + (high - low) / 2;
            if pred(self.key_at(mid)) {
                low = mid + 1;
            } else {
                high = mid;
            }
        }
        low
    }

    /// Child to descend into for the first key `>= key`.
    pub fn lower_child(&self, key: &[u8]) -> i32 {
        self.child_at(self.lower_slot(key).saturating_sub(1))
    }

    /// Child to descend into for the first key `> key`.
    pub fn upper_child(&self, key: &[u8]) -> i32 {
        self.child_at(self.upper_slot(key).saturating_sub(1))
    }
}

/// A pinned node page. The pin is released when the guard is dropped.
///
/// Header fields are captured at fetch time; nodes are never modified through
/// this guard.
pub struct NodeGuard<'a> {
    page: PinnedPage<'a>,
    page_no: i32,
    header: NodeHeader,
    page_type: PageType,
}

impl<'a> NodeGuard<'a> {
    pub(crate) fn new(page: PinnedPage<'a>, page_no: i32) -> Self {
        let (header, page_type) = {
            let data = page.data();
            let view = NodeView::new(&data[..]);
            (view.header(), view.page_type())
        };
        Self {
            page,
            page_no,
            header,
            page_type,
        }
    }

    pub fn page_no(&self) -> i32 {
        self.page_no
    }

    pub fn page_id(&self) -> PageId {
        self.page.page_id()
    }

    pub fn page_type(&self) -> PageType {
        self.page_type
    }

    pub fn is_leaf(&self) -> bool {
        self.page_type == PageType::BTreeLeaf
    }

    pub fn size(&self) -> usize {
        self.header.num_keys as usize
    }

    pub fn prev_leaf(&self) -> i32 {
        self.header.prev_leaf
    }

    pub fn next_leaf(&self) -> i32 {
        self.header.next_leaf
    }

    /// Runs `f` over a read view of the node's bytes.
    pub fn with_view<R>(&self, f: impl FnOnce(NodeView<'_>) -> R) -> R {
        let data = self.page.data();
        f(NodeView::new(&data[..]))
    }
}

impl std::fmt::Debug for NodeGuard<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeGuard")
            .field("page_no", &self.page_no)
            .field("page_type", &self.page_type)
            .field("header", &self.header)
            .finish()
    }
}
