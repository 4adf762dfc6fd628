//! WAL log record format.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use ember_common::{EmberError, PageId, Result};
use serde::{Deserialize, Serialize};

/// Log Sequence Number - unique identifier for each log record.
///
/// LSNs are dense: the log manager hands out 0, 1, 2, ... in issuance order
/// and never reuses one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Lsn(pub u64);

impl Lsn {
    /// Marks "no record", e.g. the `prev_lsn` of a transaction's first record.
    pub const INVALID: Lsn = Lsn(u64::MAX);

    /// Returns true if this is a valid LSN.
    pub fn is_valid(&self) -> bool {
        *self != Self::INVALID
    }
}

impl Default for Lsn {
    fn default() -> Self {
        Self::INVALID
    }
}

impl std::fmt::Display for Lsn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_valid() {
            write!(f, "{}", self.0)
        } else {
            write!(f, "invalid")
        }
    }
}

/// Anything the log manager can buffer.
///
/// The manager only needs the serialized length up front, a place to stamp
/// the assigned LSN, and a way to write the bytes.
pub trait LogEntry {
    /// Total serialized length in bytes.
    fn log_tot_len(&self) -> usize;

    /// Rejects an entry that could not be read back once written.
    ///
    /// Called before an LSN is assigned.
    fn validate(&self) -> Result<()> {
        Ok(())
    }

    /// Stamps the LSN assigned by the log manager.
    fn set_lsn(&mut self, lsn: Lsn);

    /// Appends exactly `log_tot_len()` bytes to `buf`.
    fn encode_into(&self, buf: &mut BytesMut);
}

/// Types of log records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum LogRecordType {
    /// Transaction begin.
    Begin = 1,
    /// Transaction commit.
    Commit = 2,
    /// Transaction abort/rollback.
    Abort = 3,
    /// Tuple insert.
    Insert = 10,
    /// Tuple delete.
    Delete = 11,
    /// Tuple update.
    Update = 12,
    /// Checkpoint marker.
    Checkpoint = 30,
}

impl TryFrom<u8> for LogRecordType {
    type Error = EmberError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            1 => Ok(LogRecordType::Begin),
            2 => Ok(LogRecordType::Commit),
            3 => Ok(LogRecordType::Abort),
            10 => Ok(LogRecordType::Insert),
            11 => Ok(LogRecordType::Delete),
            12 => Ok(LogRecordType::Update),
            30 => Ok(LogRecordType::Checkpoint),
            _ => Err(EmberError::WalCorrupted {
                lsn: Lsn::INVALID.0,
                reason: format!("invalid record type: {}", value),
            }),
        }
    }
}

/// A single log record in the WAL.
///
/// Record format on disk (little-endian):
/// - header (28 bytes):
///   - lsn: 8 bytes
///   - prev_lsn: 8 bytes (for transaction chaining)
///   - log_tot_len: 4 bytes (header + payload + checksum)
///   - txn_id: 4 bytes
///   - record_type: 1 byte
///   - flags: 1 byte
///   - reserved: 2 bytes
/// - payload: variable length
/// - checksum: 4 bytes (CRC32 of header + payload)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogRecord {
    /// LSN of this record, assigned when buffered.
    pub lsn: Lsn,
    /// LSN of the previous record in this transaction.
    pub prev_lsn: Lsn,
    /// Transaction ID.
    pub txn_id: u32,
    /// Type of this record.
    pub record_type: LogRecordType,
    /// Record flags.
    pub flags: u8,
    /// Record payload.
    pub payload: Bytes,
}

impl LogRecord {
    /// Size of the record header in bytes.
    pub const HEADER_SIZE: usize = 28;
    /// Size of the checksum in bytes.
    pub const CHECKSUM_SIZE: usize = 4;
    /// Maximum payload size (64 KB).
    pub const MAX_PAYLOAD_SIZE: usize = 64 * 1024;

    /// Creates a new log record. The LSN is assigned when it is buffered.
    pub fn new(prev_lsn: Lsn, txn_id: u32, record_type: LogRecordType, payload: Bytes) -> Self {
        Self {
            lsn: Lsn::INVALID,
            prev_lsn,
            txn_id,
            record_type,
            flags: 0,
            payload,
        }
    }

    /// Creates a transaction begin record.
    pub fn begin(txn_id: u32) -> Self {
        Self::new(Lsn::INVALID, txn_id, LogRecordType::Begin, Bytes::new())
    }

    /// Creates a transaction commit record.
    pub fn commit(prev_lsn: Lsn, txn_id: u32) -> Self {
        Self::new(prev_lsn, txn_id, LogRecordType::Commit, Bytes::new())
    }

    /// Creates a transaction abort record.
    pub fn abort(prev_lsn: Lsn, txn_id: u32) -> Self {
        Self::new(prev_lsn, txn_id, LogRecordType::Abort, Bytes::new())
    }

    /// Creates a checkpoint record carrying an opaque payload.
    pub fn checkpoint(payload: Bytes) -> Self {
        Self::new(Lsn::INVALID, 0, LogRecordType::Checkpoint, payload)
    }

    /// Returns the total size of this record on disk.
    pub fn size_on_disk(&self) -> usize {
        Self::HEADER_SIZE + self.payload.len() + Self::CHECKSUM_SIZE
    }

    /// Serializes this record to bytes.
    pub fn serialize(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.size_on_disk());
        self.encode_into(&mut buf);
        buf.freeze()
    }

    /// Reads the total length field from the start of an encoded record.
    pub fn peek_len(data: &[u8]) -> Option<usize> {
        if data.len() < Self::HEADER_SIZE {
            return None;
        }
        let mut field = &data[16..20];
        Some(field.get_u32_le() as usize)
    }

    /// Deserializes one record from the start of `data`.
    ///
    /// Trailing bytes after the record are ignored.
    pub fn deserialize(data: &[u8]) -> Result<Self> {
        if data.len() < Self::HEADER_SIZE + Self::CHECKSUM_SIZE {
            return Err(EmberError::WalCorrupted {
                lsn: Lsn::INVALID.0,
                reason: "record too short".to_string(),
            });
        }

        let mut header = &data[..Self::HEADER_SIZE];
        let lsn = Lsn(header.get_u64_le());
        let prev_lsn = Lsn(header.get_u64_le());
        let tot_len = header.get_u32_le() as usize;
        let txn_id = header.get_u32_le();
        let type_byte = header.get_u8();
        let flags = header.get_u8();

        let min_len = Self::HEADER_SIZE + Self::CHECKSUM_SIZE;
        if tot_len < min_len || tot_len - min_len > Self::MAX_PAYLOAD_SIZE {
            return Err(EmberError::WalCorrupted {
                lsn: lsn.0,
                reason: format!("invalid record length: {}", tot_len),
            });
        }
        if data.len() < tot_len {
            return Err(EmberError::WalCorrupted {
                lsn: lsn.0,
                reason: "truncated record".to_string(),
            });
        }

        let body_end = tot_len - Self::CHECKSUM_SIZE;
        let stored_checksum = (&data[body_end..tot_len]).get_u32_le();
        let computed_checksum = crc32fast::hash(&data[..body_end]);
        if stored_checksum != computed_checksum {
            return Err(EmberError::WalCorrupted {
                lsn: lsn.0,
                reason: format!(
                    "checksum mismatch: stored={}, computed={}",
                    stored_checksum, computed_checksum
                ),
            });
        }

        let record_type = LogRecordType::try_from(type_byte).map_err(|_| EmberError::WalCorrupted {
            lsn: lsn.0,
            reason: format!("invalid record type: {}", type_byte),
        })?;

        Ok(Self {
            lsn,
            prev_lsn,
            txn_id,
            record_type,
            flags,
            payload: Bytes::copy_from_slice(&data[Self::HEADER_SIZE..body_end]),
        })
    }
}

impl LogEntry for LogRecord {
    fn log_tot_len(&self) -> usize {
        self.size_on_disk()
    }

    fn validate(&self) -> Result<()> {
        if self.payload.len() > Self::MAX_PAYLOAD_SIZE {
            return Err(EmberError::LogRecordTooLarge {
                size: self.size_on_disk(),
                limit: Self::HEADER_SIZE + Self::MAX_PAYLOAD_SIZE + Self::CHECKSUM_SIZE,
            });
        }
        Ok(())
    }

    fn set_lsn(&mut self, lsn: Lsn) {
        self.lsn = lsn;
    }

    fn encode_into(&self, buf: &mut BytesMut) {
        let start = buf.len();

        buf.put_u64_le(self.lsn.0);
        buf.put_u64_le(self.prev_lsn.0);
        buf.put_u32_le(self.size_on_disk() as u32);
        buf.put_u32_le(self.txn_id);
        buf.put_u8(self.record_type as u8);
        buf.put_u8(self.flags);
        buf.put_u16_le(0);

        buf.put_slice(&self.payload);

        let checksum = crc32fast::hash(&buf[start..]);
        buf.put_u32_le(checksum);
    }
}

/// Payload for insert/update/delete operations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataPayload {
    /// Page being modified.
    pub page_id: PageId,
    /// Slot number within the page.
    pub slot: u16,
    /// Old data (for update/delete, used in undo).
    pub old_data: Option<Bytes>,
    /// New data (for insert/update, used in redo).
    pub new_data: Option<Bytes>,
}

impl DataPayload {
    /// Serializes the payload to bytes.
    pub fn serialize(&self) -> Bytes {
        let mut buf = BytesMut::new();

        buf.put_u32_le(self.page_id.file_id);
        buf.put_u32_le(self.page_id.page_num);
        buf.put_u16_le(self.slot);

        for image in [&self.old_data, &self.new_data] {
            match image {
                Some(bytes) => {
                    buf.put_u32_le(bytes.len() as u32);
                    buf.put_slice(bytes);
                }
                None => buf.put_u32_le(0),
            }
        }

        buf.freeze()
    }

    /// Deserializes the payload from bytes.
    pub fn deserialize(mut data: &[u8]) -> Result<Self> {
        if data.len() < 18 {
            return Err(EmberError::WalCorrupted {
                lsn: Lsn::INVALID.0,
                reason: "data payload too short".to_string(),
            });
        }

        let file_id = data.get_u32_le();
        let page_num = data.get_u32_le();
        let slot = data.get_u16_le();

        let old_data = Self::read_image(&mut data, "old")?;
        if data.len() < 4 {
            return Err(EmberError::WalCorrupted {
                lsn: Lsn::INVALID.0,
                reason: "truncated new data".to_string(),
            });
        }
        let new_data = Self::read_image(&mut data, "new")?;

        Ok(Self {
            page_id: PageId::new(file_id, page_num),
            slot,
            old_data,
            new_data,
        })
    }

    fn read_image(data: &mut &[u8], which: &str) -> Result<Option<Bytes>> {
        let len = data.get_u32_le() as usize;
        if len == 0 {
            return Ok(None);
        }
        if data.len() < len {
            return Err(EmberError::WalCorrupted {
                lsn: Lsn::INVALID.0,
                reason: format!("truncated {} data", which),
            });
        }
        let image = Bytes::copy_from_slice(&data[..len]);
        data.advance(len);
        Ok(Some(image))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lsn_validity() {
        assert!(!Lsn::INVALID.is_valid());
        assert!(Lsn(0).is_valid());
        assert_eq!(Lsn::default(), Lsn::INVALID);
    }

    #[test]
    fn test_lsn_display() {
        assert_eq!(Lsn(1024).to_string(), "1024");
        assert_eq!(Lsn::INVALID.to_string(), "invalid");
    }

    #[test]
    fn test_log_record_type_conversion() {
        assert_eq!(LogRecordType::try_from(1).unwrap(), LogRecordType::Begin);
        assert_eq!(LogRecordType::try_from(2).unwrap(), LogRecordType::Commit);
        assert_eq!(LogRecordType::try_from(10).unwrap(), LogRecordType::Insert);
        assert_eq!(LogRecordType::try_from(30).unwrap(), LogRecordType::Checkpoint);
        assert!(LogRecordType::try_from(0).is_err());
        assert!(LogRecordType::try_from(255).is_err());
    }

    #[test]
    fn test_log_record_serialization() {
        let mut record = LogRecord::new(
            Lsn(3),
            42,
            LogRecordType::Insert,
            Bytes::from_static(b"test payload"),
        );
        record.set_lsn(Lsn(7));

        let serialized = record.serialize();
        assert_eq!(serialized.len(), record.log_tot_len());
        assert_eq!(LogRecord::peek_len(&serialized), Some(record.log_tot_len()));

        let deserialized = LogRecord::deserialize(&serialized).unwrap();
        assert_eq!(deserialized.lsn, Lsn(7));
        assert_eq!(deserialized.prev_lsn, Lsn(3));
        assert_eq!(deserialized.txn_id, 42);
        assert_eq!(deserialized.record_type, LogRecordType::Insert);
        assert_eq!(deserialized.payload, record.payload);
    }

    #[test]
    fn test_log_record_size() {
        let record = LogRecord::new(Lsn::INVALID, 1, LogRecordType::Update, Bytes::from_static(b"hello"));
        assert_eq!(record.size_on_disk(), 28 + 5 + 4);
        assert_eq!(LogRecord::begin(1).log_tot_len(), 32);
    }

    #[test]
    fn test_begin_commit_abort_records() {
        let begin = LogRecord::begin(100);
        assert_eq!(begin.record_type, LogRecordType::Begin);
        assert_eq!(begin.prev_lsn, Lsn::INVALID);
        assert_eq!(begin.txn_id, 100);

        let commit = LogRecord::commit(Lsn(0), 100);
        assert_eq!(commit.record_type, LogRecordType::Commit);
        assert_eq!(commit.prev_lsn, Lsn(0));

        let abort = LogRecord::abort(Lsn(1), 100);
        assert_eq!(abort.record_type, LogRecordType::Abort);
    }

    #[test]
    fn test_deserialize_ignores_trailing_bytes() {
        let mut first = LogRecord::begin(1);
        first.set_lsn(Lsn(0));
        let mut second = LogRecord::commit(Lsn(0), 1);
        second.set_lsn(Lsn(1));

        let mut buf = BytesMut::new();
        first.encode_into(&mut buf);
        second.encode_into(&mut buf);

        let decoded = LogRecord::deserialize(&buf).unwrap();
        assert_eq!(decoded.lsn, Lsn(0));
        assert_eq!(decoded.record_type, LogRecordType::Begin);
    }

    #[test]
    fn test_corrupted_record_detection() {
        let mut record = LogRecord::new(Lsn::INVALID, 1, LogRecordType::Insert, Bytes::from_static(b"abc"));
        record.set_lsn(Lsn(9));
        let mut serialized = record.serialize().to_vec();

        // Flip a payload byte
        serialized[LogRecord::HEADER_SIZE] ^= 0xFF;

        let result = LogRecord::deserialize(&serialized);
        assert!(matches!(result, Err(EmberError::WalCorrupted { lsn: 9, .. })));
    }

    #[test]
    fn test_truncated_record_detection() {
        let serialized = LogRecord::checkpoint(Bytes::from_static(b"state")).serialize();
        let result = LogRecord::deserialize(&serialized[..serialized.len() - 1]);
        assert!(result.is_err());
    }

    #[test]
    fn test_payload_size_limit() {
        let at_limit = LogRecord::checkpoint(Bytes::from(vec![1u8; LogRecord::MAX_PAYLOAD_SIZE]));
        assert!(at_limit.validate().is_ok());

        let over = LogRecord::checkpoint(Bytes::from(vec![1u8; LogRecord::MAX_PAYLOAD_SIZE + 1]));
        assert!(matches!(
            over.validate(),
            Err(EmberError::LogRecordTooLarge { size, limit })
                if size == over.size_on_disk() && limit == at_limit.size_on_disk()
        ));
    }

    #[test]
    fn test_data_payload_serialization() {
        let payload = DataPayload {
            page_id: PageId::new(1, 42),
            slot: 5,
            old_data: Some(Bytes::from_static(b"old")),
            new_data: Some(Bytes::from_static(b"new value")),
        };

        let deserialized = DataPayload::deserialize(&payload.serialize()).unwrap();

        assert_eq!(deserialized.page_id, payload.page_id);
        assert_eq!(deserialized.slot, payload.slot);
        assert_eq!(deserialized.old_data, payload.old_data);
        assert_eq!(deserialized.new_data, payload.new_data);
    }

    #[test]
    fn test_data_payload_no_old_data() {
        let payload = DataPayload {
            page_id: PageId::new(0, 0),
            slot: 0,
            old_data: None,
            new_data: Some(Bytes::from_static(b"inserted")),
        };

        let deserialized = DataPayload::deserialize(&payload.serialize()).unwrap();

        assert!(deserialized.old_data.is_none());
        assert_eq!(deserialized.new_data.as_deref(), Some(&b"inserted"[..]));
    }

    #[test]
    fn test_data_payload_truncated() {
        let payload = DataPayload {
            page_id: PageId::new(0, 0),
            slot: 0,
            old_data: Some(Bytes::from_static(b"gone")),
            new_data: None,
        };
        let bytes = payload.serialize();
        assert!(DataPayload::deserialize(&bytes[..bytes.len() - 6]).is_err());
    }
}
