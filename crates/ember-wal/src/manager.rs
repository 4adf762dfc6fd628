//! Log buffer manager.

use crate::buffer::LogBuffer;
use crate::reader::LogReader;
use crate::record::{LogEntry, Lsn};
use crate::store::LogStore;
use ember_common::{EmberError, Result, StorageConfig};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Configuration for the log manager.
#[derive(Debug, Clone)]
pub struct LogManagerConfig {
    /// Capacity of the in-memory log buffer in bytes.
    pub buffer_size: usize,
}

impl Default for LogManagerConfig {
    fn default() -> Self {
        Self {
            buffer_size: 1024 * 1024,
        }
    }
}

impl LogManagerConfig {
    /// Validates the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.buffer_size == 0 {
            return Err(EmberError::ConfigError(
                "log buffer size must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

impl From<&StorageConfig> for LogManagerConfig {
    fn from(config: &StorageConfig) -> Self {
        Self {
            buffer_size: config.log_buffer_size,
        }
    }
}

/// State guarded by the manager's single lock.
struct LogState {
    /// Next LSN to assign.
    global_lsn: u64,
    /// Highest LSN known to be durable. None until the first flush.
    persist_lsn: Option<Lsn>,
    /// Records admitted since the last flush.
    buffer: LogBuffer,
}

/// Assigns LSNs to log records and batches them into a bounded buffer.
///
/// One instance exists per storage engine. LSN assignment, the buffer and the
/// durability watermark all sit behind one mutex, so the bytes in the buffer
/// are always in LSN order. Flushing is synchronous and happens either when a
/// record does not fit or when a caller asks for it (commit, write-back of a
/// dirty page, checkpoint).
pub struct LogManager {
    state: Mutex<LogState>,
    store: Arc<dyn LogStore>,
}

impl LogManager {
    /// Creates a manager over an empty log. Numbering starts at 0.
    pub fn new(config: LogManagerConfig, store: Arc<dyn LogStore>) -> Result<Self> {
        Self::with_start(config, store, 0, None)
    }

    /// Opens a manager over an existing log, continuing after its last record.
    ///
    /// Everything already in the store is durable, so the watermark starts
    /// at the highest LSN found. A record cut short at the end of the log is
    /// what a crash during an append leaves behind; it is truncated away.
    /// Damage anywhere else fails the open.
    pub fn open(config: LogManagerConfig, store: Arc<dyn LogStore>) -> Result<Self> {
        config.validate()?;
        let mut reader = LogReader::from_store(store.as_ref())?;
        let mut max_lsn = None::<Lsn>;
        loop {
            match reader.next_record() {
                Ok(Some(record)) => max_lsn = max_lsn.max(Some(record.lsn)),
                Ok(None) => break,
                Err(e) if reader.at_torn_tail() => {
                    warn!(offset = reader.offset(), error = %e, "truncating torn log tail");
                    store.truncate(reader.offset() as u64)?;
                    break;
                }
                Err(e) => return Err(e),
            }
        }

        let global_lsn = max_lsn.map(|lsn| lsn.0 + 1).unwrap_or(0);
        debug!(global_lsn, persist_lsn = ?max_lsn, "opened log");

        Self::with_start(config, store, global_lsn, max_lsn)
    }

    fn with_start(
        config: LogManagerConfig,
        store: Arc<dyn LogStore>,
        global_lsn: u64,
        persist_lsn: Option<Lsn>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            state: Mutex::new(LogState {
                global_lsn,
                persist_lsn,
                buffer: LogBuffer::new(config.buffer_size),
            }),
            store,
        })
    }

    /// Assigns the next LSN to `entry` and copies it into the log buffer.
    ///
    /// If the buffer cannot hold the entry, the lock is released, the buffer
    /// is flushed and admission is retried. Returns the assigned LSN.
    pub fn add_log_to_buffer<E: LogEntry + ?Sized>(&self, entry: &mut E) -> Result<Lsn> {
        entry.validate()?;
        let len = entry.log_tot_len();
        let mut state = self.state.lock();

        if len > state.buffer.capacity() {
            return Err(EmberError::LogRecordTooLarge {
                size: len,
                limit: state.buffer.capacity(),
            });
        }

        while !state.buffer.fits(len) {
            let buffered = state.buffer.len();
            drop(state);
            debug!(buffered, incoming = len, "log buffer full, flushing");
            self.flush_log_to_disk()?;
            state = self.state.lock();
        }

        let lsn = Lsn(state.global_lsn);
        state.global_lsn += 1;
        entry.set_lsn(lsn);
        state.buffer.append(&*entry);

        trace!(lsn = lsn.0, len, "buffered log record");
        Ok(lsn)
    }

    /// Writes the buffered records to the store as one append.
    ///
    /// No-op when the buffer is empty. On success every record with an LSN up
    /// to the last assigned one is durable. On failure the buffer and the
    /// watermark are left as they were.
    pub fn flush_log_to_disk(&self) -> Result<()> {
        let mut state = self.state.lock();
        if state.buffer.is_empty() {
            return Ok(());
        }

        self.store.append(state.buffer.as_bytes())?;

        let bytes = state.buffer.len();
        state.buffer.clear();
        // Buffer was non-empty, so at least one LSN was assigned
        let persist = Lsn(state.global_lsn - 1);
        state.persist_lsn = Some(persist);

        debug!(bytes, persist_lsn = persist.0, "flushed log buffer");
        Ok(())
    }

    /// Makes sure the record with `lsn` is durable, flushing if it is not.
    ///
    /// Fails with `LsnNotAssigned` if no record with `lsn` exists yet, since
    /// no flush can make it durable.
    pub fn flush_to(&self, lsn: Lsn) -> Result<()> {
        if !lsn.is_valid() || self.is_durable(lsn) {
            return Ok(());
        }
        trace!(lsn = lsn.0, "forcing log flush");
        self.flush_log_to_disk()?;

        if !self.is_durable(lsn) {
            return Err(EmberError::LsnNotAssigned {
                lsn: lsn.0,
                next: self.global_lsn().0,
            });
        }
        Ok(())
    }

    /// Returns true if the record with `lsn` has reached the store.
    pub fn is_durable(&self, lsn: Lsn) -> bool {
        matches!(self.persist_lsn(), Some(persist) if persist >= lsn)
    }

    /// Next LSN to be assigned.
    pub fn global_lsn(&self) -> Lsn {
        Lsn(self.state.lock().global_lsn)
    }

    /// Highest durable LSN, or None if nothing has been flushed yet.
    pub fn persist_lsn(&self) -> Option<Lsn> {
        self.state.lock().persist_lsn
    }

    /// Bytes admitted but not yet flushed.
    pub fn buffered_bytes(&self) -> usize {
        self.state.lock().buffer.len()
    }

    /// Capacity of the log buffer.
    pub fn buffer_capacity(&self) -> usize {
        self.state.lock().buffer.capacity()
    }

    /// Returns the underlying store.
    pub fn store(&self) -> &Arc<dyn LogStore> {
        &self.store
    }
}

impl std::fmt::Debug for LogManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("LogManager")
            .field("global_lsn", &state.global_lsn)
            .field("persist_lsn", &state.persist_lsn)
            .field("buffered_bytes", &state.buffer.len())
            .finish()
    }
}
