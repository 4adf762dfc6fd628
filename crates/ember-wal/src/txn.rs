//! Per-transaction log handle.

use crate::manager::LogManager;
use crate::record::{DataPayload, LogRecord, LogRecordType, Lsn};
use bytes::Bytes;
use ember_common::Result;
use std::sync::Arc;

/// Writes one transaction's records, chaining each to the previous one.
pub struct TxnLogHandle {
    manager: Arc<LogManager>,
    txn_id: u32,
    last_lsn: Lsn,
}

impl TxnLogHandle {
    /// Starts a transaction by logging its begin record.
    pub fn begin(manager: Arc<LogManager>, txn_id: u32) -> Result<Self> {
        let last_lsn = manager.add_log_to_buffer(&mut LogRecord::begin(txn_id))?;
        Ok(Self {
            manager,
            txn_id,
            last_lsn,
        })
    }

    /// Returns the transaction ID.
    pub fn txn_id(&self) -> u32 {
        self.txn_id
    }

    /// Returns the LSN of the last record written by this transaction.
    pub fn last_lsn(&self) -> Lsn {
        self.last_lsn
    }

    fn log(&mut self, record_type: LogRecordType, payload: Bytes) -> Result<Lsn> {
        let mut record = LogRecord::new(self.last_lsn, self.txn_id, record_type, payload);
        self.last_lsn = self.manager.add_log_to_buffer(&mut record)?;
        Ok(self.last_lsn)
    }

    /// Logs an insert operation.
    pub fn log_insert(&mut self, payload: &DataPayload) -> Result<Lsn> {
        self.log(LogRecordType::Insert, payload.serialize())
    }

    /// Logs an update operation.
    pub fn log_update(&mut self, payload: &DataPayload) -> Result<Lsn> {
        self.log(LogRecordType::Update, payload.serialize())
    }

    /// Logs a delete operation.
    pub fn log_delete(&mut self, payload: &DataPayload) -> Result<Lsn> {
        self.log(LogRecordType::Delete, payload.serialize())
    }

    /// Logs the commit record and waits until it is durable.
    pub fn commit(mut self) -> Result<Lsn> {
        let lsn = self.log(LogRecordType::Commit, Bytes::new())?;
        self.manager.flush_to(lsn)?;
        Ok(lsn)
    }

    /// Logs the abort record. Aborts are not forced to disk.
    pub fn abort(mut self) -> Result<Lsn> {
        self.log(LogRecordType::Abort, Bytes::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manager::LogManagerConfig;
    use crate::reader::LogReader;
    use crate::store::MemoryLogStore;
    use ember_common::PageId;

    fn payload(slot: u16) -> DataPayload {
        DataPayload {
            page_id: PageId::new(1, 4),
            slot,
            old_data: None,
            new_data: Some(Bytes::from_static(b"tuple")),
        }
    }

    #[test]
    fn test_commit_chains_and_flushes() {
        let store = Arc::new(MemoryLogStore::new());
        let manager = Arc::new(LogManager::new(LogManagerConfig::default(), store.clone()).unwrap());

        let mut txn = TxnLogHandle::begin(manager.clone(), 9).unwrap();
        assert_eq!(txn.txn_id(), 9);
        let begin = txn.last_lsn();

        txn.log_insert(&payload(0)).unwrap();
        txn.log_update(&payload(0)).unwrap();
        txn.log_delete(&payload(0)).unwrap();
        let commit = txn.commit().unwrap();

        assert!(manager.is_durable(commit));
        let records = LogReader::records_for_txn(store.as_ref(), 9).unwrap();
        let types: Vec<_> = records.iter().map(|r| r.record_type).collect();
        assert_eq!(
            types,
            vec![
                LogRecordType::Begin,
                LogRecordType::Insert,
                LogRecordType::Update,
                LogRecordType::Delete,
                LogRecordType::Commit,
            ]
        );

        assert_eq!(records[0].lsn, begin);
        assert_eq!(records[0].prev_lsn, Lsn::INVALID);
        for pair in records.windows(2) {
            assert_eq!(pair[1].prev_lsn, pair[0].lsn);
        }

        let insert = DataPayload::deserialize(&records[1].payload).unwrap();
        assert_eq!(insert.page_id, PageId::new(1, 4));
    }

    #[test]
    fn test_abort_is_not_forced() {
        let store = Arc::new(MemoryLogStore::new());
        let manager = Arc::new(LogManager::new(LogManagerConfig::default(), store.clone()).unwrap());

        let mut txn = TxnLogHandle::begin(manager.clone(), 3).unwrap();
        txn.log_insert(&payload(1)).unwrap();
        let abort = txn.abort().unwrap();

        assert!(!manager.is_durable(abort));
        assert_eq!(store.append_count(), 0);
    }
}
