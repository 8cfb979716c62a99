//! KiteDB common types, errors, and utilities.
//!
//! This crate provides shared definitions used across all KiteDB
//! components.

pub mod config;
pub mod error;
pub mod page;

pub use config::StorageConfig;
pub use error::{KiteError, Result};
pub use page::{PageNum, RecordId, INVALID_PAGE_NUM, PAGE_SIZE};
