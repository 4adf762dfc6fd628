//! Write-Ahead Log (WAL) for EmberDB.
//!
//! Provides durability by logging all modifications before they are applied.
//! The [`LogManager`] hands out dense LSNs, batches records in a bounded
//! buffer and tracks the durability watermark (`persist_lsn`) that the buffer
//! pool consults before writing a dirty page back.

pub mod buffer;
pub mod manager;
pub mod reader;
pub mod record;
pub mod store;
pub mod txn;

pub use buffer::LogBuffer;
pub use manager::{LogManager, LogManagerConfig};
pub use reader::LogReader;
pub use record::{DataPayload, LogEntry, LogRecord, LogRecordType, Lsn};
pub use store::{LogFile, LogStore, MemoryLogStore};
pub use txn::TxnLogHandle;
