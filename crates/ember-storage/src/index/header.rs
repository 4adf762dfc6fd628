//! Index file header, stored in page 0 of every index file.

use super::types::NO_PAGE;
use ember_common::page::{PageHeader, PageId, PageType};
use ember_common::{EmberError, Result};

/// Index file header.
///
/// Layout after the common page header:
/// - magic: 4 bytes
/// - key_len: 2 bytes
/// - height: 2 bytes
/// - root_page: 4 bytes
/// - first_leaf: 4 bytes
/// - last_leaf: 4 bytes
/// - num_pages: 4 bytes
/// - num_entries: 8 bytes
/// - checksum: 4 bytes (CRC32 of the fields above)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexFileHeader {
    pub key_len: u16,
    /// Number of levels, 1 when the root is a leaf.
    pub height: u16,
    pub root_page: i32,
    pub first_leaf: i32,
    pub last_leaf: i32,
    /// Pages in the file, including this header page.
    pub num_pages: u32,
    pub num_entries: u64,
}

impl IndexFileHeader {
    /// Identifies an index file ("EMBX").
    pub const MAGIC: u32 = 0x454D_4258;

    /// Page number of the header page.
    pub const PAGE_NO: i32 = 0;

    const OFFSET: usize = PageHeader::SIZE;
    const BODY_SIZE: usize = 32;

    /// Header of an index with no pages besides the header.
    pub fn empty(key_len: u16) -> Self {
        Self {
            key_len,
            height: 0,
            root_page: NO_PAGE,
            first_leaf: NO_PAGE,
            last_leaf: NO_PAGE,
            num_pages: 1,
            num_entries: 0,
        }
    }

    /// Writes the header into a full page.
    pub fn write_to(&self, page: &mut [u8], page_id: PageId) {
        page.fill(0);
        let page_header = PageHeader::new(page_id, PageType::IndexHeader);
        page[..PageHeader::SIZE].copy_from_slice(&page_header.to_bytes());

        let body = &mut page[Self::OFFSET..Self::OFFSET + Self::BODY_SIZE + 4];
        body[0..4].copy_from_slice(&Self::MAGIC.to_le_bytes());
        body[4..6].copy_from_slice(&self.key_len.to_le_bytes());
        body[6..8].copy_from_slice(&self.height.to_le_bytes());
        body[8..12].copy_from_slice(&self.root_page.to_le_bytes());
        body[12..16].copy_from_slice(&self.first_leaf.to_le_bytes());
        body[16..20].copy_from_slice(&self.last_leaf.to_le_bytes());
        body[20..24].copy_from_slice(&self.num_pages.to_le_bytes());
        body[24..32].copy_from_slice(&self.num_entries.to_le_bytes());

        let checksum = crc32fast::hash(&body[..Self::BODY_SIZE]);
        body[32..36].copy_from_slice(&checksum.to_le_bytes());
    }

    /// Parses and validates the header page.
    pub fn read_from(page: &[u8]) -> Result<Self> {
        let page_type = PageHeader::from_bytes(&page[..PageHeader::SIZE]).page_type;
        if page_type != PageType::IndexHeader {
            return Err(EmberError::IndexCorrupted(format!(
                "header page has type {:?}",
                page_type
            )));
        }

        let body = &page[Self::OFFSET..Self::OFFSET + Self::BODY_SIZE + 4];
        let magic = u32::from_le_bytes([body[0], body[1], body[2], body[3]]);
        if magic != Self::MAGIC {
            return Err(EmberError::IndexCorrupted(format!(
                "bad magic {:#010x}",
                magic
            )));
        }

        let stored = u32::from_le_bytes([body[32], body[33], body[34], body[35]]);
        let computed = crc32fast::hash(&body[..Self::BODY_SIZE]);
        if stored != computed {
            return Err(EmberError::IndexCorrupted(format!(
                "header checksum mismatch: stored {:#010x}, computed {:#010x}",
                stored, computed
            )));
        }

        let i32_at = |o: usize| i32::from_le_bytes([body[o], body[o + 1], body[o + 2], body[o + 3]]);
        Ok(Self {
            key_len: u16::from_le_bytes([body[4], body[5]]),
            height: u16::from_le_bytes([body[6], body[7]]),
            root_page: i32_at(8),
            first_leaf: i32_at(12),
            last_leaf: i32_at(16),
            num_pages: u32::from_le_bytes([body[20], body[21], body[22], body[23]]),
            num_entries: u64::from_le_bytes([
                body[24], body[25], body[26], body[27], body[28], body[29], body[30], body[31],
            ]),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ember_common::PAGE_SIZE;

    fn sample() -> IndexFileHeader {
        IndexFileHeader {
            key_len: 8,
            height: 2,
            root_page: 5,
            first_leaf: 1,
            last_leaf: 4,
            num_pages: 6,
            num_entries: 900,
        }
    }

    #[test]
    fn test_header_write_read() {
        let mut page = [0u8; PAGE_SIZE];
        sample().write_to(&mut page, PageId::new(7, 0));
        assert_eq!(IndexFileHeader::read_from(&page).unwrap(), sample());
    }

    #[test]
    fn test_empty_header() {
        let header = IndexFileHeader::empty(16);
        assert_eq!(header.first_leaf, NO_PAGE);
        assert_eq!(header.num_pages, 1);
    }

    #[test]
    fn test_corrupted_checksum() {
        let mut page = [0u8; PAGE_SIZE];
        sample().write_to(&mut page, PageId::new(7, 0));
        page[PageHeader::SIZE + 10] ^= 0xFF;

        let err = IndexFileHeader::read_from(&page).unwrap_err();
        assert!(matches!(err, EmberError::IndexCorrupted(_)));
        assert!(err.to_string().contains("checksum"));
    }

    #[test]
    fn test_rejects_non_header_page() {
        let page = [0u8; PAGE_SIZE];
        assert!(matches!(
            IndexFileHeader::read_from(&page),
            Err(EmberError::IndexCorrupted(_))
        ));
    }

    #[test]
    fn test_rejects_bad_magic() {
        let mut page = [0u8; PAGE_SIZE];
        sample().write_to(&mut page, PageId::new(7, 0));
        page[PageHeader::SIZE] = 0;
        let err = IndexFileHeader::read_from(&page).unwrap_err();
        assert!(err.to_string().contains("magic"));
    }
}
