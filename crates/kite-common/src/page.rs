//! Page constants and record identifiers.

use serde::{Deserialize, Serialize};

/// Size of a page in bytes (16 KB).
pub const PAGE_SIZE: usize = 16 * 1024;

/// Page number within an index file.
pub type PageNum = u32;

/// Sentinel for "no page": empty tree root, missing parent, end of the
/// leaf chain.
pub const INVALID_PAGE_NUM: PageNum = u32::MAX;

/// Identifies a stored record: the page holding it and the slot within
/// that page.
///
/// Record identifiers participate in composite-key ordering, so the
/// derived `Ord` (page number first, then slot) is part of the on-disk
/// key order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RecordId {
    /// Page number of the record.
    pub page_num: PageNum,
    /// Slot number within the page.
    pub slot_num: u32,
}

impl RecordId {
    /// Serialized size in bytes.
    pub const SIZE: usize = 8;

    /// Smallest possible record identifier.
    pub const MIN: RecordId = RecordId {
        page_num: 0,
        slot_num: 0,
    };

    /// Largest possible record identifier.
    pub const MAX: RecordId = RecordId {
        page_num: u32::MAX,
        slot_num: u32::MAX,
    };

    /// Creates a new record identifier.
    pub fn new(page_num: PageNum, slot_num: u32) -> Self {
        Self { page_num, slot_num }
    }

    /// Serializes to bytes. Big-endian, so the byte order matches the
    /// derived `Ord` and record identifiers can be compared as raw bytes
    /// inside composite keys.
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0..4].copy_from_slice(&self.page_num.to_be_bytes());
        buf[4..8].copy_from_slice(&self.slot_num.to_be_bytes());
        buf
    }

    /// Deserializes from bytes.
    pub fn from_bytes(buf: &[u8]) -> Self {
        Self {
            page_num: u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]),
            slot_num: u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]),
        }
    }
}

impl std::fmt::Display for RecordId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.page_num, self.slot_num)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_id_roundtrip() {
        let rid = RecordId::new(42, 7);
        let bytes = rid.to_bytes();
        let recovered = RecordId::from_bytes(&bytes);
        assert_eq!(rid, recovered);
    }

    #[test]
    fn test_record_id_ordering() {
        let a = RecordId::new(1, 5);
        let b = RecordId::new(1, 6);
        let c = RecordId::new(2, 0);

        assert!(a < b);
        assert!(b < c);
        assert!(RecordId::MIN < a);
        assert!(c < RecordId::MAX);
    }

    #[test]
    fn test_record_id_byte_order_matches_ord() {
        // The byte encoding must sort the same way as the derived Ord.
        let ids = [
            RecordId::MIN,
            RecordId::new(0, 1),
            RecordId::new(1, 0),
            RecordId::new(1, u32::MAX),
            RecordId::new(2, 0),
            RecordId::MAX,
        ];

        for pair in ids.windows(2) {
            assert!(pair[0] < pair[1]);
            assert!(pair[0].to_bytes() < pair[1].to_bytes());
        }
    }

    #[test]
    fn test_record_id_display() {
        let rid = RecordId::new(3, 14);
        assert_eq!(rid.to_string(), "3:14");
    }

    #[test]
    fn test_record_id_serde_roundtrip() {
        let rid = RecordId::new(100, 200);
        let serialized = serde_json::to_string(&rid).unwrap();
        let deserialized: RecordId = serde_json::from_str(&serialized).unwrap();
        assert_eq!(rid, deserialized);
    }

    #[test]
    fn test_invalid_page_num() {
        assert_eq!(INVALID_PAGE_NUM, u32::MAX);
    }

    #[test]
    fn test_page_size() {
        assert_eq!(PAGE_SIZE, 16384);
    }
}
