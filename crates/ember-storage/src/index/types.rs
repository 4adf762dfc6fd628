//! Positions and record pointers used by the B+ tree index.

use std::cmp::Ordering;

/// Page number meaning "no page" (no sibling, no predecessor).
pub const NO_PAGE: i32 = -1;

/// Logical position `{page_no, slot_no}` within the leaf chain.
///
/// `{-1, -1}` is the sentinel for "no such position".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Iid {
    pub page_no: i32,
    pub slot_no: i32,
}

impl Iid {
    /// The "no such position" sentinel.
    pub const NONE: Iid = Iid {
        page_no: NO_PAGE,
        slot_no: -1,
    };

    pub fn new(page_no: i32, slot_no: i32) -> Self {
        Self { page_no, slot_no }
    }

    /// Returns true unless this is the sentinel.
    pub fn is_valid(&self) -> bool {
        *self != Self::NONE
    }
}

impl std::fmt::Display for Iid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{{{}, {}}}", self.page_no, self.slot_no)
    }
}

/// Physical location `{page_no, slot_no}` of a tuple in heap storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Rid {
    pub page_no: i32,
    pub slot_no: i32,
}

impl Rid {
    /// Encoded size in bytes.
    pub const SIZE: usize = 8;

    pub fn new(page_no: i32, slot_no: i32) -> Self {
        Self { page_no, slot_no }
    }

    /// Serializes to bytes.
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0..4].copy_from_slice(&self.page_no.to_le_bytes());
        buf[4..8].copy_from_slice(&self.slot_no.to_le_bytes());
        buf
    }

    /// Deserializes from bytes.
    pub fn from_bytes(buf: &[u8]) -> Self {
        Self {
            page_no: i32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]),
            slot_no: i32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]),
        }
    }
}

impl std::fmt::Display for Rid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {})", self.page_no, self.slot_no)
    }
}

/// Key comparison using a u64 prefix for 8+ byte keys.
///
/// Keys compare as unsigned byte strings, so big-endian integers sort
/// numerically.
#[inline(always)]
pub fn compare_keys(a: &[u8], b: &[u8]) -> Ordering {
    if a.len() >= 8 && b.len() >= 8 {
        let a_prefix = u64::from_be_bytes([a[0], a[1], a[2], a[3], a[4], a[5], a[6], a[7]]);
        let b_prefix = u64::from_be_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]);
        if a_prefix != b_prefix {
            return a_prefix.cmp(&b_prefix);
        }
    }
    a.cmp(b)
}
