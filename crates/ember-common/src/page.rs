//! Page identity and the header every formatted page starts with.

use serde::{Deserialize, Serialize};

/// Bytes per page.
pub const PAGE_SIZE: usize = 4 * 1024;

/// A page, addressed by data file and position in that file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PageId {
    pub file_id: u32,
    /// 0-based page number within the file.
    pub page_num: u32,
}

impl PageId {
    pub fn new(file_id: u32, page_num: u32) -> Self {
        Self { file_id, page_num }
    }

    /// Packs the id into one word, file id in the high half. Used as the
    /// buffer pool's page table key.
    pub fn as_u64(&self) -> u64 {
        (u64::from(self.file_id) << 32) | u64::from(self.page_num)
    }

    pub fn from_u64(value: u64) -> Self {
        Self::new((value >> 32) as u32, value as u32)
    }
}

impl std::fmt::Display for PageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.file_id, self.page_num)
    }
}

/// What a page holds, stored in byte 16 of its header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum PageType {
    /// Never formatted; a freshly allocated page reads as this.
    Free = 0,
    /// Page 0 of an index file.
    IndexHeader = 1,
    BTreeLeaf = 2,
    BTreeInternal = 3,
}

impl PageType {
    /// Unknown values decode as `Free`.
    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => PageType::IndexHeader,
            2 => PageType::BTreeLeaf,
            3 => PageType::BTreeInternal,
            _ => PageType::Free,
        }
    }
}

/// Common page header.
///
/// ```text
/// 0       8       16   17          32
/// | page_id | lsn | type | reserved |
/// ```
/// All integers little-endian.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PageHeader {
    pub page_id: PageId,
    /// LSN of the last logged change applied to the page, or `NO_LSN`.
    pub lsn: u64,
    pub page_type: PageType,
}

impl PageHeader {
    pub const SIZE: usize = 32;

    /// Page LSN of a page no logged change has touched.
    pub const NO_LSN: u64 = u64::MAX;

    const LSN: std::ops::Range<usize> = 8..16;
    const TYPE: usize = 16;

    pub fn new(page_id: PageId, page_type: PageType) -> Self {
        Self {
            page_id,
            lsn: Self::NO_LSN,
            page_type,
        }
    }

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0..4].copy_from_slice(&self.page_id.file_id.to_le_bytes());
        buf[4..8].copy_from_slice(&self.page_id.page_num.to_le_bytes());
        buf[Self::LSN].copy_from_slice(&self.lsn.to_le_bytes());
        buf[Self::TYPE] = self.page_type as u8;
        buf
    }

    /// Decodes the first `SIZE` bytes of `buf`.
    pub fn from_bytes(buf: &[u8]) -> Self {
        let word = |at: usize| u32::from_le_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]]);
        Self {
            page_id: PageId::new(word(0), word(4)),
            lsn: Self::read_lsn(buf),
            page_type: PageType::from_u8(buf[Self::TYPE]),
        }
    }

    /// Page LSN of raw page bytes.
    #[inline]
    pub fn read_lsn(page: &[u8]) -> u64 {
        let mut lsn = [0u8; 8];
        lsn.copy_from_slice(&page[Self::LSN]);
        u64::from_le_bytes(lsn)
    }

    /// Stamps the page LSN into raw page bytes.
    #[inline]
    pub fn write_lsn(page: &mut [u8], lsn: u64) {
        page[Self::LSN].copy_from_slice(&lsn.to_le_bytes());
    }
}
