//! Fixed-capacity in-memory log buffer.

use crate::record::LogEntry;
use bytes::BytesMut;

/// Byte region that accumulates encoded log records between flushes.
///
/// The occupied length is the write offset. Records are appended back to
/// back in the order they are admitted.
#[derive(Debug)]
pub struct LogBuffer {
    data: BytesMut,
    capacity: usize,
}

impl LogBuffer {
    /// Creates an empty buffer holding at most `capacity` bytes.
    pub fn new(capacity: usize) -> Self {
        Self {
            data: BytesMut::with_capacity(capacity),
            capacity,
        }
    }

    /// Maximum number of bytes the buffer holds.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Current write offset.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Bytes left before the buffer is full.
    pub fn remaining(&self) -> usize {
        self.capacity - self.data.len()
    }

    /// Returns true if a record of `len` bytes fits at the current offset.
    pub fn fits(&self, len: usize) -> bool {
        len <= self.remaining()
    }

    /// Encodes `entry` at the current offset.
    ///
    /// The caller must have checked `fits(entry.log_tot_len())`.
    pub fn append<E: LogEntry + ?Sized>(&mut self, entry: &E) {
        let start = self.data.len();
        entry.encode_into(&mut self.data);
        debug_assert_eq!(self.data.len() - start, entry.log_tot_len());
    }

    /// The occupied bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Resets the write offset to 0.
    pub fn clear(&mut self) {
        self.data.clear();
    }
}
