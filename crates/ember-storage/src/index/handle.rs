//! Handle to an on-disk B+Tree index.

use super::header::IndexFileHeader;
use super::node::{
    init_node, internal_capacity, leaf_capacity, write_internal_entry, write_leaf_entry,
    NodeGuard, NodeHeader,
};
use super::scan::LeafScan;
use super::types::{compare_keys, Iid, Rid, NO_PAGE};
use crate::buffer_manager::BufferPoolManager;
use bytes::Bytes;
use ember_buffer::PinnedPage;
use ember_common::page::{PageId, PageType};
use ember_common::{EmberError, Result};
use std::sync::Arc;
use tracing::{debug, info};

/// An open B+Tree index file.
///
/// Node pages are read through the buffer pool manager; every method that
/// fetches a node releases its pin before returning.
pub struct IndexHandle {
    bpm: Arc<BufferPoolManager>,
    file_id: u32,
    header: IndexFileHeader,
}

impl IndexHandle {
    /// Opens an existing index by reading and validating its header page.
    pub fn open(bpm: Arc<BufferPoolManager>, file_id: u32) -> Result<Self> {
        let header = {
            let page = bpm.fetch_page(PageId::new(file_id, IndexFileHeader::PAGE_NO as u32))?;
            let data = page.data();
            IndexFileHeader::read_from(&data[..])?
        };

        info!(
            file_id,
            height = header.height,
            entries = header.num_entries,
            "opened index"
        );
        Ok(Self {
            bpm,
            file_id,
            header,
        })
    }

    /// Builds a new index in an empty file from key-sorted entries.
    ///
    /// Leaves are packed `leaf_fill` entries each and linked in both
    /// directions; internal levels are packed full. An empty entry list
    /// produces a single empty leaf.
    pub fn bulk_load<K: AsRef<[u8]>>(
        bpm: Arc<BufferPoolManager>,
        file_id: u32,
        key_len: u16,
        entries: &[(K, Rid)],
        leaf_fill: usize,
    ) -> Result<Self> {
        let klen = key_len as usize;
        if klen == 0 {
            return Err(EmberError::ConfigError("index key length must be non-zero".into()));
        }
        let max_fill = leaf_capacity(klen);
        if leaf_fill == 0 || leaf_fill > max_fill {
            return Err(EmberError::ConfigError(format!(
                "leaf fill {} outside 1..={}",
                leaf_fill, max_fill
            )));
        }
        if bpm.disk().num_pages(file_id)? != 0 {
            return Err(EmberError::ConfigError(format!(
                "index file {} is not empty",
                file_id
            )));
        }
        for (i, (key, _)) in entries.iter().enumerate() {
            let key = key.as_ref();
            if key.len() != klen {
                return Err(EmberError::KeySizeMismatch {
                    expected: klen,
                    actual: key.len(),
                });
            }
            if i > 0 && compare_keys(entries[i - 1].0.as_ref(), key).is_gt() {
                return Err(EmberError::IndexCorrupted(format!(
                    "bulk load entries not sorted at position {}",
                    i
                )));
            }
        }

        let mut header_page = bpm.new_page(file_id)?;
        let mut header = IndexFileHeader::empty(key_len);

        // Leaf level, each leaf's first key kept for the level above
        let mut level: Vec<(Vec<u8>, i32)> = Vec::new();
        let mut prev: Option<PinnedPage<'_>> = None;
        let chunks: Vec<&[(K, Rid)]> = if entries.is_empty() {
            vec![&entries[..0]]
        } else {
            entries.chunks(leaf_fill).collect()
        };

        for chunk in chunks {
            let page = bpm.new_page(file_id)?;
            let page_no = page.page_id().page_num as i32;

            let mut node = NodeHeader::new(key_len, 0);
            node.num_keys = chunk.len() as u16;
            node.prev_leaf = prev.as_ref().map_or(NO_PAGE, |p| p.page_id().page_num as i32);
            {
                let mut data = page.data_mut();
                init_node(&mut data[..], page.page_id(), PageType::BTreeLeaf, &node);
                for (slot, (key, rid)) in chunk.iter().enumerate() {
                    write_leaf_entry(&mut data[..], klen, slot, key.as_ref(), *rid);
                }
            }

            if let Some(prev_page) = prev.take() {
                let mut data = prev_page.data_mut();
                let mut prev_node = NodeHeader::read(&data[..]);
                prev_node.next_leaf = page_no;
                prev_node.write(&mut data[..]);
            } else {
                header.first_leaf = page_no;
            }
            header.last_leaf = page_no;

            let min_key = chunk.first().map_or_else(|| vec![0u8; klen], |(k, _)| k.as_ref().to_vec());
            level.push((min_key, page_no));
            prev = Some(page);
        }
        drop(prev);

        let mut height = 1u16;
        let fanout = internal_capacity(klen);
        while level.len() > 1 {
            let mut parents = Vec::with_capacity(level.len() / fanout + 1);
            for chunk in level.chunks(fanout) {
                let page = bpm.new_page(file_id)?;
                let mut node = NodeHeader::new(key_len, height);
                node.num_keys = chunk.len() as u16;
                {
                    let mut data = page.data_mut();
                    init_node(&mut data[..], page.page_id(), PageType::BTreeInternal, &node);
                    for (slot, (key, child)) in chunk.iter().enumerate() {
                        write_internal_entry(&mut data[..], klen, slot, key, *child);
                    }
                }
                parents.push((chunk[0].0.clone(), page.page_id().page_num as i32));
            }
            level = parents;
            height += 1;
        }

        header.root_page = level.first().map_or(NO_PAGE, |(_, page_no)| *page_no);
        header.height = height;
        header.num_entries = entries.len() as u64;
        header.num_pages = bpm.disk().num_pages(file_id)?;
        {
            let page_id = header_page.page_id();
            header.write_to(&mut header_page.data_mut()[..], page_id);
        }
        header_page.mark_dirty();
        drop(header_page);

        info!(
            file_id,
            entries = entries.len(),
            height,
            pages = header.num_pages,
            "bulk loaded index"
        );
        Ok(Self {
            bpm,
            file_id,
            header,
        })
    }

    pub fn file_id(&self) -> u32 {
        self.file_id
    }

    pub fn header(&self) -> &IndexFileHeader {
        &self.header
    }

    pub fn buffer_pool_manager(&self) -> &Arc<BufferPoolManager> {
        &self.bpm
    }

    pub fn first_leaf(&self) -> i32 {
        self.header.first_leaf
    }

    pub fn last_leaf(&self) -> i32 {
        self.header.last_leaf
    }

    pub fn root_page(&self) -> i32 {
        self.header.root_page
    }

    pub fn key_len(&self) -> usize {
        self.header.key_len as usize
    }

    pub fn height(&self) -> u16 {
        self.header.height
    }

    pub fn num_entries(&self) -> u64 {
        self.header.num_entries
    }

    /// Fetches and pins a node page. The pin is released with the guard.
    pub fn fetch_node(&self, page_no: i32) -> Result<NodeGuard<'_>> {
        if page_no <= IndexFileHeader::PAGE_NO {
            return Err(EmberError::InvalidNodeType { page_no });
        }
        let page = self.bpm.fetch_page(PageId::new(self.file_id, page_no as u32))?;
        let node = NodeGuard::new(page, page_no);
        match node.page_type() {
            PageType::BTreeLeaf | PageType::BTreeInternal => Ok(node),
            _ => Err(EmberError::InvalidNodeType { page_no }),
        }
    }

    /// Fetches the leaf holding `iid` and checks the slot is occupied.
    fn fetch_entry(&self, iid: Iid) -> Result<NodeGuard<'_>> {
        let node = self.fetch_node(iid.page_no)?;
        if !node.is_leaf() {
            return Err(EmberError::InvalidNodeType {
                page_no: iid.page_no,
            });
        }
        if iid.slot_no < 0 || iid.slot_no as usize >= node.size() {
            return Err(EmberError::IndexEntryNotFound {
                page_no: iid.page_no,
                slot_no: iid.slot_no,
            });
        }
        Ok(node)
    }

    /// Record pointer stored at `iid`.
    pub fn get_rid(&self, iid: Iid) -> Result<Rid> {
        let node = self.fetch_entry(iid)?;
        Ok(node.with_view(|view| view.rid_at(iid.slot_no as usize)))
    }

    /// Key stored at `iid`.
    pub fn get_key(&self, iid: Iid) -> Result<Bytes> {
        let node = self.fetch_entry(iid)?;
        Ok(node.with_view(|view| Bytes::copy_from_slice(view.key_at(iid.slot_no as usize))))
    }

    /// Key and record pointer stored at `iid`, read under a single pin.
    pub fn get_entry(&self, iid: Iid) -> Result<(Bytes, Rid)> {
        let node = self.fetch_entry(iid)?;
        let slot = iid.slot_no as usize;
        Ok(node.with_view(|view| (Bytes::copy_from_slice(view.key_at(slot)), view.rid_at(slot))))
    }

    /// Position of the first entry.
    pub fn leaf_begin(&self) -> Iid {
        Iid::new(self.header.first_leaf, 0)
    }

    /// Position one past the last entry.
    pub fn leaf_end(&self) -> Result<Iid> {
        let node = self.fetch_node(self.header.last_leaf)?;
        Ok(Iid::new(node.page_no(), node.size() as i32))
    }

    fn check_key(&self, key: &[u8]) -> Result<()> {
        if key.len() != self.key_len() {
            return Err(EmberError::KeySizeMismatch {
                expected: self.key_len(),
                actual: key.len(),
            });
        }
        Ok(())
    }

    /// Descends from the root to the leaf where a bound search for `key`
    /// starts. Holds at most one pin at a time.
    fn find_leaf(&self, key: &[u8], upper: bool) -> Result<i32> {
        let mut page_no = self.header.root_page;
        loop {
            let node = self.fetch_node(page_no)?;
            if node.is_leaf() {
                return Ok(page_no);
            }
            page_no = node.with_view(|view| {
                if upper {
                    view.upper_child(key)
                } else {
                    view.lower_child(key)
                }
            });
        }
    }

    fn bound(&self, key: &[u8], upper: bool) -> Result<Iid> {
        self.check_key(key)?;
        let page_no = self.find_leaf(key, upper)?;
        let node = self.fetch_node(page_no)?;
        let slot = node.with_view(|view| {
            if upper {
                view.upper_slot(key)
            } else {
                view.lower_slot(key)
            }
        });

        if slot == node.size() && page_no != self.header.last_leaf {
            return Ok(Iid::new(node.next_leaf(), 0));
        }
        Ok(Iid::new(page_no, slot as i32))
    }

    /// Position of the first entry whose key is `>= key`.
    pub fn lower_bound(&self, key: &[u8]) -> Result<Iid> {
        self.bound(key, false)
    }

    /// Position of the first entry whose key is `> key`.
    pub fn upper_bound(&self, key: &[u8]) -> Result<Iid> {
        self.bound(key, true)
    }

    /// Point lookup. With duplicate keys, returns the first match.
    pub fn get_value(&self, key: &[u8]) -> Result<Option<Rid>> {
        let iid = self.lower_bound(key)?;
        if iid == self.leaf_end()? {
            return Ok(None);
        }
        let (found, rid) = self.get_entry(iid)?;
        Ok(compare_keys(&found, key).is_eq().then_some(rid))
    }

    /// Scan over `[lower, upper)`.
    pub fn scan(&self, lower: Iid, upper: Iid) -> LeafScan<'_> {
        debug!(file_id = self.file_id, %lower, %upper, "starting leaf scan");
        LeafScan::new(self, lower, upper)
    }

    /// Scan over every entry.
    pub fn scan_all(&self) -> Result<LeafScan<'_>> {
        Ok(self.scan(self.leaf_begin(), self.leaf_end()?))
    }

    /// Scan over the entries with `low <= key <= high`.
    pub fn scan_keys(&self, low: &[u8], high: &[u8]) -> Result<LeafScan<'_>> {
        let upper = self.upper_bound(high)?;
        if compare_keys(low, high).is_gt() {
            return Ok(self.scan(upper, upper));
        }
        Ok(self.scan(self.lower_bound(low)?, upper))
    }
}

impl std::fmt::Debug for IndexHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexHandle")
            .field("file_id", &self.file_id)
            .field("header", &self.header)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disk::{DiskManager, DiskManagerConfig};
    use ember_buffer::{BufferPool, BufferPoolConfig};
    use tempfile::tempdir;

    fn create_bpm(num_frames: usize) -> (Arc<BufferPoolManager>, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let disk = DiskManager::new(DiskManagerConfig {
            data_dir: dir.path().to_path_buf(),
            fsync_enabled: false,
        })
        .unwrap();
        let pool = BufferPool::new(BufferPoolConfig { num_frames });
        (
            Arc::new(BufferPoolManager::new(Arc::new(pool), Arc::new(disk))),
            dir,
        )
    }

    fn entries(keys: impl IntoIterator<Item = u64>) -> Vec<([u8; 8], Rid)> {
        keys.into_iter()
            .map(|k| (k.to_be_bytes(), Rid::new(k as i32, 0)))
            .collect()
    }

    #[test]
    fn test_bulk_load_single_leaf() {
        let (bpm, _dir) = create_bpm(16);
        let index = IndexHandle::bulk_load(bpm.clone(), 1, 8, &entries([1, 2, 3]), 10).unwrap();

        assert_eq!(index.height(), 1);
        assert_eq!(index.first_leaf(), index.last_leaf());
        assert_eq!(index.root_page(), index.first_leaf());
        assert_eq!(index.leaf_end().unwrap(), Iid::new(index.last_leaf(), 3));
        assert_eq!(index.get_rid(Iid::new(index.first_leaf(), 2)).unwrap(), Rid::new(3, 0));
        assert_eq!(bpm.stats().pinned_frames, 0);
    }

    #[test]
    fn test_bulk_load_builds_internal_levels() {
        let (bpm, _dir) = create_bpm(64);
        let index = IndexHandle::bulk_load(bpm.clone(), 1, 8, &entries(0..2000), 4).unwrap();

        // 500 leaves exceed one internal node's fanout
        assert_eq!(index.height(), 3);
        assert_eq!(index.num_entries(), 2000);
        for k in [0u64, 1, 777, 1999] {
            assert_eq!(index.get_value(&k.to_be_bytes()).unwrap(), Some(Rid::new(k as i32, 0)));
        }
        assert_eq!(index.get_value(&5000u64.to_be_bytes()).unwrap(), None);
        assert_eq!(bpm.stats().pinned_frames, 0);
    }

    #[test]
    fn test_open_reads_header() {
        let (bpm, _dir) = create_bpm(16);
        let built = IndexHandle::bulk_load(bpm.clone(), 2, 8, &entries(0..50), 8).unwrap();
        bpm.flush_all().unwrap();

        let opened = IndexHandle::open(bpm, 2).unwrap();
        assert_eq!(opened.header(), built.header());
        assert_eq!(opened.get_key(opened.leaf_begin()).unwrap().as_ref(), &0u64.to_be_bytes());
    }

    #[test]
    fn test_open_rejects_non_index_file() {
        let (bpm, _dir) = create_bpm(4);
        bpm.new_page(3).unwrap();
        assert!(matches!(
            IndexHandle::open(bpm, 3),
            Err(EmberError::IndexCorrupted(_))
        ));
    }

    #[test]
    fn test_bulk_load_rejects_bad_input() {
        let (bpm, _dir) = create_bpm(16);

        let unsorted = entries([3, 1]);
        assert!(matches!(
            IndexHandle::bulk_load(bpm.clone(), 1, 8, &unsorted, 4),
            Err(EmberError::IndexCorrupted(_))
        ));

        let short = vec![(vec![1u8, 2], Rid::new(0, 0))];
        assert!(matches!(
            IndexHandle::bulk_load(bpm.clone(), 2, 8, &short, 4),
            Err(EmberError::KeySizeMismatch { expected: 8, actual: 2 })
        ));

        assert!(matches!(
            IndexHandle::bulk_load(bpm.clone(), 3, 8, &entries([1]), 0),
            Err(EmberError::ConfigError(_))
        ));
    }

    #[test]
    fn test_get_rid_errors() {
        let (bpm, _dir) = create_bpm(16);
        let index = IndexHandle::bulk_load(bpm.clone(), 1, 8, &entries([1, 2]), 4).unwrap();
        let leaf = index.first_leaf();

        assert!(matches!(
            index.get_rid(Iid::new(leaf, 2)),
            Err(EmberError::IndexEntryNotFound { slot_no: 2, .. })
        ));
        assert!(matches!(
            index.get_key(Iid::NONE),
            Err(EmberError::InvalidNodeType { page_no: -1 })
        ));
        assert_eq!(bpm.stats().pinned_frames, 0);
    }

    #[test]
    fn test_bounds_cross_leaf_boundary() {
        let (bpm, _dir) = create_bpm(16);
        // leaves: [10 20] [30 40] [50]
        let index = IndexHandle::bulk_load(bpm, 1, 8, &entries([10, 20, 30, 40, 50]), 2).unwrap();
        let first = index.first_leaf();

        let lb = index.lower_bound(&25u64.to_be_bytes()).unwrap();
        assert_eq!(index.get_key(lb).unwrap().as_ref(), &30u64.to_be_bytes());
        assert_eq!(lb.slot_no, 0);
        assert_ne!(lb.page_no, first);

        let ub = index.upper_bound(&50u64.to_be_bytes()).unwrap();
        assert_eq!(ub, index.leaf_end().unwrap());

        assert_eq!(index.lower_bound(&0u64.to_be_bytes()).unwrap(), index.leaf_begin());
        assert!(matches!(
            index.lower_bound(b"short"),
            Err(EmberError::KeySizeMismatch { .. })
        ));
    }

    #[test]
    fn test_empty_index() {
        let (bpm, _dir) = create_bpm(8);
        let none: Vec<([u8; 8], Rid)> = Vec::new();
        let index = IndexHandle::bulk_load(bpm, 1, 8, &none, 4).unwrap();

        assert_eq!(index.leaf_begin(), index.leaf_end().unwrap());
        assert!(index.scan_all().unwrap().is_end());
        assert_eq!(index.get_value(&1u64.to_be_bytes()).unwrap(), None);
    }
}
