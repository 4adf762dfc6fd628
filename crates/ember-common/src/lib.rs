//! EmberDB common types, errors, and configuration.
//!
//! This crate provides shared definitions used across all EmberDB components.

pub mod config;
pub mod error;
pub mod page;

pub use config::StorageConfig;
pub use error::{EmberError, Result};
pub use page::{PageHeader, PageId, PageType, PAGE_SIZE};
