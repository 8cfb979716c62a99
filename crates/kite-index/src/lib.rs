//! Disk-based B+ tree index for KiteDB.
//!
//! This crate provides the index engine proper:
//! - Composite keys: attribute bytes plus record identifier, so
//!   duplicate attribute values stay distinguishable and ordered
//! - Fixed-capacity leaf and internal nodes over 16 KiB pages
//! - Latch-crabbing traversals for concurrent reads and writes
//! - Split, merge, and redistribution rebalancing with root maintenance
//! - A range scanner over the leaf chain, plus debug printing and a
//!   structural validator

mod header;
mod key;
mod latch;
mod node;
mod scanner;
mod tree;

pub use header::IndexFileHeader;
pub use key::{AttrType, KeyComparator};
pub use scanner::BPlusTreeScanner;
pub use tree::{BPlusTree, IndexOptions};

pub use kite_common::page::RecordId;
