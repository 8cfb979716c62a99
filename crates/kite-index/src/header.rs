//! Persisted tree metadata.

use crate::key::AttrType;
use crate::node::{INTERNAL_HEADER_SIZE, LEAF_HEADER_SIZE};
use kite_common::page::{PageNum, RecordId, INVALID_PAGE_NUM, PAGE_SIZE};
use kite_common::{KiteError, Result};

/// Page number of the metadata page.
pub const HEADER_PAGE_NUM: PageNum = 0;

/// Magic tag identifying a KiteDB index file.
const INDEX_MAGIC: u32 = 0x4B49_4458; // "KIDX"

/// Size of a child pointer in an internal node.
pub const CHILD_PTR_SIZE: usize = 4;

/// Metadata describing one index file, persisted at page 0.
///
/// Layout (28 bytes):
/// - magic: 4 bytes
/// - root_page: 4 bytes (INVALID_PAGE_NUM = empty tree)
/// - internal_max_size: 4 bytes
/// - leaf_max_size: 4 bytes
/// - attr_length: 4 bytes
/// - key_length: 4 bytes
/// - attr_type: 1 byte
/// - reserved: 3 bytes
///
/// Only `root_page` mutates after creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexFileHeader {
    /// Root page number, or INVALID_PAGE_NUM when the tree is empty.
    pub root_page: PageNum,
    /// Maximum entry count for internal nodes.
    pub internal_max_size: u32,
    /// Maximum entry count for leaf nodes.
    pub leaf_max_size: u32,
    /// Indexed attribute type.
    pub attr_type: AttrType,
    /// Attribute byte length.
    pub attr_length: u32,
    /// Composite key byte length (attribute + record identifier).
    pub key_length: u32,
}

impl IndexFileHeader {
    /// Serialized size in bytes.
    pub const SIZE: usize = 28;

    /// Largest number of composite keys a leaf page can hold.
    pub fn leaf_page_capacity(key_length: usize) -> usize {
        (PAGE_SIZE - LEAF_HEADER_SIZE) / (key_length + RecordId::SIZE)
    }

    /// Largest number of composite keys an internal page can hold.
    pub fn internal_page_capacity(key_length: usize) -> usize {
        (PAGE_SIZE - INTERNAL_HEADER_SIZE) / (key_length + CHILD_PTR_SIZE)
    }

    /// Creates a header for a new, empty index.
    pub fn new(
        attr_type: AttrType,
        attr_length: usize,
        internal_max_size: usize,
        leaf_max_size: usize,
    ) -> Self {
        Self {
            root_page: INVALID_PAGE_NUM,
            internal_max_size: internal_max_size as u32,
            leaf_max_size: leaf_max_size as u32,
            attr_type,
            attr_length: attr_length as u32,
            key_length: (attr_length + RecordId::SIZE) as u32,
        }
    }

    /// Serializes to bytes.
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0..4].copy_from_slice(&INDEX_MAGIC.to_le_bytes());
        buf[4..8].copy_from_slice(&self.root_page.to_le_bytes());
        buf[8..12].copy_from_slice(&self.internal_max_size.to_le_bytes());
        buf[12..16].copy_from_slice(&self.leaf_max_size.to_le_bytes());
        buf[16..20].copy_from_slice(&self.attr_length.to_le_bytes());
        buf[20..24].copy_from_slice(&self.key_length.to_le_bytes());
        buf[24] = self.attr_type.as_u8();
        buf
    }

    /// Deserializes from bytes, validating the magic tag and internal
    /// consistency.
    pub fn from_bytes(buf: &[u8]) -> Result<Self> {
        let magic = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);
        if magic != INDEX_MAGIC {
            return Err(KiteError::InvalidState(
                "not a KiteDB index file (bad magic)".to_string(),
            ));
        }

        let header = Self {
            root_page: u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]),
            internal_max_size: u32::from_le_bytes([buf[8], buf[9], buf[10], buf[11]]),
            leaf_max_size: u32::from_le_bytes([buf[12], buf[13], buf[14], buf[15]]),
            attr_length: u32::from_le_bytes([buf[16], buf[17], buf[18], buf[19]]),
            key_length: u32::from_le_bytes([buf[20], buf[21], buf[22], buf[23]]),
            attr_type: AttrType::from_u8(buf[24])?,
        };

        if header.key_length != header.attr_length + RecordId::SIZE as u32 {
            return Err(KiteError::InvalidState(format!(
                "header key length {} disagrees with attribute length {}",
                header.key_length, header.attr_length
            )));
        }
        Ok(header)
    }
}

impl std::fmt::Display for IndexFileHeader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "root={} internal_max={} leaf_max={} attr={}({}) key_len={}",
            self.root_page,
            self.internal_max_size,
            self.leaf_max_size,
            self.attr_type,
            self.attr_length,
            self.key_length
        )
    }
}
