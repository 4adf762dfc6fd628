//! WAL reader for log inspection and recovery.

use crate::record::{LogRecord, LogRecordType, Lsn};
use crate::store::LogStore;
use bytes::Bytes;
use ember_common::{EmberError, Result};

/// Sequential reader over the records of a log.
///
/// Yields records in the order they were appended. A torn or corrupt record
/// yields one `WalCorrupted` error and ends the iteration; the offset stays at
/// the start of the bad record.
pub struct LogReader {
    /// Entire log contents.
    data: Bytes,
    /// Offset of the next record.
    offset: usize,
    /// Set once an error has been returned.
    failed: bool,
}

impl LogReader {
    /// Creates a reader over raw log bytes.
    pub fn new(data: Bytes) -> Self {
        Self {
            data,
            offset: 0,
            failed: false,
        }
    }

    /// Creates a reader over everything currently in `store`.
    pub fn from_store(store: &dyn LogStore) -> Result<Self> {
        Ok(Self::new(store.read_all()?))
    }

    /// Byte offset of the next record.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Reads the next record, or None at the end of the log.
    pub fn next_record(&mut self) -> Result<Option<LogRecord>> {
        let rest = &self.data[self.offset..];
        if rest.is_empty() {
            return Ok(None);
        }

        let Some(len) = LogRecord::peek_len(rest) else {
            return Err(EmberError::WalCorrupted {
                lsn: Lsn::INVALID.0,
                reason: format!("torn record header at offset {}", self.offset),
            });
        };

        let record = LogRecord::deserialize(rest)?;
        self.offset += len;
        Ok(Some(record))
    }

    /// True if the bytes at the current offset are an incomplete record that
    /// runs to the end of the log, as left by a crash during an append.
    pub fn at_torn_tail(&self) -> bool {
        let rest = &self.data[self.offset..];
        match LogRecord::peek_len(rest) {
            None => !rest.is_empty(),
            Some(len) => len >= rest.len(),
        }
    }

    /// Reads all remaining records.
    pub fn read_all(store: &dyn LogStore) -> Result<Vec<LogRecord>> {
        Self::from_store(store)?.collect()
    }

    /// Returns the records of one transaction, oldest first.
    pub fn records_for_txn(store: &dyn LogStore, txn_id: u32) -> Result<Vec<LogRecord>> {
        let mut records = Self::read_all(store)?;
        records.retain(|r| r.txn_id == txn_id && r.record_type != LogRecordType::Checkpoint);
        Ok(records)
    }

    /// Finds the last checkpoint record in the log.
    pub fn last_checkpoint(store: &dyn LogStore) -> Result<Option<LogRecord>> {
        let mut last = None;
        for record in Self::from_store(store)? {
            let record = record?;
            if record.record_type == LogRecordType::Checkpoint {
                last = Some(record);
            }
        }
        Ok(last)
    }
}

impl Iterator for LogReader {
    type Item = Result<LogRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        match self.next_record() {
            Ok(record) => record.map(Ok),
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}
