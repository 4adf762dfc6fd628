//! Cursor over the B+Tree leaf chain.

use super::handle::IndexHandle;
use super::types::{Iid, Rid};
use bytes::Bytes;
use ember_common::Result;

/// A cursor over leaf positions in `[begin, end)`.
///
/// The cursor holds no pins between calls: every node fetched by a method is
/// released before that method returns, on error and panic paths too.
///
/// # Concurrency
///
/// Leaf contents are read without a latch. The leaf chain must not be
/// structurally modified (split, merge, entry shift) by another writer while
/// a scan is in progress, unless the caller provides isolation through its
/// own locking or snapshot protocol. Positions saved from a scan are only
/// meaningful against the same tree shape.
pub struct LeafScan<'a> {
    index: &'a IndexHandle,
    iid: Iid,
    end: Iid,
}

impl<'a> LeafScan<'a> {
    pub(crate) fn new(index: &'a IndexHandle, begin: Iid, end: Iid) -> Self {
        Self {
            index,
            iid: begin,
            end,
        }
    }

    /// Resumes a scan from a saved position.
    pub fn resume(index: &'a IndexHandle, iid: Iid, end: Iid) -> Self {
        Self::new(index, iid, end)
    }

    /// Current position.
    pub fn iid(&self) -> Iid {
        self.iid
    }

    /// Position at which the scan stops.
    pub fn end(&self) -> Iid {
        self.end
    }

    pub fn is_end(&self) -> bool {
        self.iid == self.end
    }

    /// Advances to the next position.
    ///
    /// After the last slot of a leaf the cursor moves to slot 0 of the next
    /// leaf, except on the last leaf where it stays one past the last slot.
    ///
    /// # Panics
    ///
    /// Panics if the scan is already at its end, if the current page is not
    /// a leaf, or if the current slot is out of bounds.
    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self) -> Result<()> {
        assert!(
            !self.is_end(),
            "next() called on a scan already at its end {}",
            self.end
        );

        let node = self.index.fetch_node(self.iid.page_no)?;
        assert!(node.is_leaf(), "scan position {} is not on a leaf", self.iid);
        assert!(
            self.iid.slot_no >= 0 && (self.iid.slot_no as usize) < node.size(),
            "scan position {} out of bounds for leaf of size {}",
            self.iid,
            node.size()
        );

        self.iid.slot_no += 1;
        if self.iid.slot_no as usize == node.size() && self.iid.page_no != self.index.last_leaf()
        {
            self.iid = Iid::new(node.next_leaf(), 0);
        }
        Ok(())
    }

    /// Record pointer at the current position.
    pub fn rid(&self) -> Result<Rid> {
        self.index.get_rid(self.iid)
    }

    /// Key at the current position.
    pub fn get_key(&self) -> Result<Bytes> {
        self.index.get_key(self.iid)
    }

    /// Position before the current one, without moving the cursor.
    pub fn prev_iid(&self) -> Result<Iid> {
        self.prev_iid_of(self.iid)
    }

    /// Position before `iid`, or [`Iid::NONE`] at the first slot of the first
    /// leaf.
    ///
    /// Preceding an empty leaf yields `{page_no, -1}`, which is not a valid
    /// entry; the chain built by bulk loading has no empty leaves besides the
    /// lone leaf of an empty index.
    pub fn prev_iid_of(&self, iid: Iid) -> Result<Iid> {
        if iid.slot_no > 0 {
            return Ok(Iid::new(iid.page_no, iid.slot_no - 1));
        }

        let node = self.index.fetch_node(iid.page_no)?;
        assert!(node.is_leaf(), "position {} is not on a leaf", iid);
        if node.page_no() == self.index.first_leaf() {
            return Ok(Iid::NONE);
        }

        let prev = self.index.fetch_node(node.prev_leaf())?;
        Ok(Iid::new(prev.page_no(), prev.size() as i32 - 1))
    }

    /// Turns the cursor into an iterator over `(key, rid)` pairs.
    pub fn entries(self) -> LeafEntries<'a> {
        LeafEntries {
            scan: self,
            failed: false,
        }
    }
}

impl std::fmt::Debug for LeafScan<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LeafScan")
            .field("file_id", &self.index.file_id())
            .field("iid", &self.iid)
            .field("end", &self.end)
            .finish()
    }
}

/// Iterator over the remaining entries of a [`LeafScan`].
///
/// Stops after the first error.
pub struct LeafEntries<'a> {
    scan: LeafScan<'a>,
    failed: bool,
}

impl LeafEntries<'_> {
    /// Position of the next entry to be yielded.
    pub fn iid(&self) -> Iid {
        self.scan.iid()
    }
}

impl Iterator for LeafEntries<'_> {
    type Item = Result<(Bytes, Rid)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.scan.is_end() {
            return None;
        }
        let result = self
            .scan
            .index
            .get_entry(self.scan.iid)
            .and_then(|entry| self.scan.next().map(|()| entry));
        if result.is_err() {
            self.failed = true;
        }
        Some(result)
    }
}
