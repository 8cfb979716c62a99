//! Page caching for KiteDB.
//!
//! This crate provides disk-backed page management:
//! - Single-file disk manager with page-granular I/O
//! - Fixed-size buffer pool with a configurable frame count
//! - Clock eviction policy with dirty-page write-back
//! - Pin counting and per-frame latches for concurrent access

mod disk;
mod frame;
mod pool;
mod replacer;

pub use disk::DiskManager;
pub use frame::{Frame, FrameId};
pub use pool::{BufferPool, BufferPoolConfig, BufferPoolStats};
pub use replacer::ClockReplacer;
