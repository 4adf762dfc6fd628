//! Configuration structures for EmberDB.

use crate::error::{EmberError, Result};
use crate::page::PAGE_SIZE;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Storage configuration for the database engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory for data and index files.
    pub data_dir: PathBuf,
    /// File name of the write-ahead log inside `data_dir`.
    pub log_file_name: String,
    /// Buffer pool size in number of pages (0 = size from available RAM).
    pub buffer_pool_pages: usize,
    /// Capacity of the in-memory log buffer in bytes.
    pub log_buffer_size: usize,
    /// Enable fsync for durability.
    pub fsync_enabled: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            log_file_name: "ember.log".to_string(),
            buffer_pool_pages: 8192, // 32 MB with 4 KB pages
            log_buffer_size: 1024 * 1024,
            fsync_enabled: true,
        }
    }
}

impl StorageConfig {
    /// Returns the total buffer pool size in bytes.
    pub fn buffer_pool_size_bytes(&self) -> usize {
        self.buffer_pool_pages * PAGE_SIZE
    }

    /// Returns the full path of the write-ahead log file.
    pub fn log_path(&self) -> PathBuf {
        self.data_dir.join(&self.log_file_name)
    }

    /// Checks the configuration for values the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.log_buffer_size == 0 {
            return Err(EmberError::ConfigError(
                "log_buffer_size must be non-zero".to_string(),
            ));
        }
        if self.log_file_name.is_empty() {
            return Err(EmberError::ConfigError(
                "log_file_name must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}
