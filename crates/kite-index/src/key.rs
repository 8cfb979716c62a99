//! Composite key ordering and presentation.
//!
//! A composite key is the indexed attribute's bytes followed by the
//! record identifier that owns the entry. The attribute part is compared
//! type-aware (signed integers, IEEE floats, raw byte strings); ties are
//! broken by the record identifier, so composite keys are unique even
//! when the indexed attribute holds duplicate values.

use bytes::{BufMut, Bytes, BytesMut};
use kite_common::page::RecordId;
use kite_common::{KiteError, Result};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Type of the indexed attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttrType {
    /// Signed 32-bit integer.
    Int,
    /// IEEE 754 32-bit float.
    Float,
    /// Fixed-length byte string.
    Char,
    /// Date, stored as a signed 32-bit integer (yyyymmdd).
    Date,
}

impl AttrType {
    /// Encodes the type tag for the metadata header.
    pub fn as_u8(self) -> u8 {
        match self {
            AttrType::Int => 1,
            AttrType::Float => 2,
            AttrType::Char => 3,
            AttrType::Date => 4,
        }
    }

    /// Decodes a type tag from the metadata header.
    pub fn from_u8(tag: u8) -> Result<Self> {
        match tag {
            1 => Ok(AttrType::Int),
            2 => Ok(AttrType::Float),
            3 => Ok(AttrType::Char),
            4 => Ok(AttrType::Date),
            _ => Err(KiteError::InvalidState(format!(
                "unknown attribute type tag {tag}"
            ))),
        }
    }

    /// Returns the natural byte length for fixed-width types, or None
    /// for char (caller-chosen length).
    pub fn fixed_length(self) -> Option<usize> {
        match self {
            AttrType::Int | AttrType::Float | AttrType::Date => Some(4),
            AttrType::Char => None,
        }
    }
}

impl std::fmt::Display for AttrType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            AttrType::Int => "int",
            AttrType::Float => "float",
            AttrType::Char => "char",
            AttrType::Date => "date",
        };
        write!(f, "{name}")
    }
}

/// Total order over composite keys for one index.
#[derive(Debug, Clone, Copy)]
pub struct KeyComparator {
    attr_type: AttrType,
    attr_length: usize,
}

impl KeyComparator {
    /// Creates a comparator for the given attribute type and length.
    pub fn new(attr_type: AttrType, attr_length: usize) -> Self {
        Self {
            attr_type,
            attr_length,
        }
    }

    /// Returns the attribute type.
    pub fn attr_type(&self) -> AttrType {
        self.attr_type
    }

    /// Returns the attribute byte length.
    pub fn attr_length(&self) -> usize {
        self.attr_length
    }

    /// Total composite key length (attribute + record identifier).
    pub fn key_length(&self) -> usize {
        self.attr_length + RecordId::SIZE
    }

    /// Compares two attribute-byte slices (no record identifier part).
    pub fn compare_attr(&self, a: &[u8], b: &[u8]) -> Ordering {
        debug_assert_eq!(a.len(), self.attr_length);
        debug_assert_eq!(b.len(), self.attr_length);
        match self.attr_type {
            AttrType::Int | AttrType::Date => {
                let av = i32::from_le_bytes([a[0], a[1], a[2], a[3]]);
                let bv = i32::from_le_bytes([b[0], b[1], b[2], b[3]]);
                av.cmp(&bv)
            }
            AttrType::Float => {
                let av = f32::from_le_bytes([a[0], a[1], a[2], a[3]]);
                let bv = f32::from_le_bytes([b[0], b[1], b[2], b[3]]);
                av.total_cmp(&bv)
            }
            AttrType::Char => a.cmp(b),
        }
    }

    /// Compares two full composite keys: attribute bytes first, record
    /// identifier as tiebreak.
    pub fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        debug_assert_eq!(a.len(), self.key_length());
        debug_assert_eq!(b.len(), self.key_length());
        self.compare_attr(&a[..self.attr_length], &b[..self.attr_length])
            // RecordId bytes are big-endian, so raw byte order is rid order.
            .then_with(|| a[self.attr_length..].cmp(&b[self.attr_length..]))
    }

    /// Pads user-supplied attribute bytes to the attribute length.
    ///
    /// Char attributes may be shorter than the declared length and are
    /// filled with `fill`; other types must match exactly.
    pub fn fix_attr(&self, attr: &[u8], fill: u8) -> Result<Vec<u8>> {
        if attr.len() == self.attr_length {
            return Ok(attr.to_vec());
        }
        if self.attr_type == AttrType::Char && attr.len() < self.attr_length {
            let mut fixed = vec![fill; self.attr_length];
            fixed[..attr.len()].copy_from_slice(attr);
            return Ok(fixed);
        }
        Err(KiteError::InvalidArgument(format!(
            "attribute is {} bytes, expected {}",
            attr.len(),
            self.attr_length
        )))
    }

    /// Builds a composite key from attribute bytes and a record
    /// identifier. Short char attributes are zero-padded.
    pub fn compose(&self, attr: &[u8], rid: RecordId) -> Result<Bytes> {
        let fixed = self.fix_attr(attr, 0)?;
        let mut key = BytesMut::with_capacity(self.key_length());
        key.put_slice(&fixed);
        key.put_slice(&rid.to_bytes());
        Ok(key.freeze())
    }

    /// Splits a composite key into its record identifier.
    pub fn rid_of(&self, key: &[u8]) -> RecordId {
        RecordId::from_bytes(&key[self.attr_length..])
    }

    /// Renders a composite key for diagnostics.
    pub fn format_key(&self, key: &[u8]) -> String {
        let attr = &key[..self.attr_length];
        let rid = self.rid_of(key);
        let value = match self.attr_type {
            AttrType::Int | AttrType::Date => {
                i32::from_le_bytes([attr[0], attr[1], attr[2], attr[3]]).to_string()
            }
            AttrType::Float => {
                f32::from_le_bytes([attr[0], attr[1], attr[2], attr[3]]).to_string()
            }
            AttrType::Char => String::from_utf8_lossy(attr)
                .trim_end_matches('\0')
                .to_string(),
        };
        format!("{value}@{rid}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn int_key(value: i32, rid: RecordId) -> Bytes {
        KeyComparator::new(AttrType::Int, 4)
            .compose(&value.to_le_bytes(), rid)
            .unwrap()
    }

    #[test]
    fn test_attr_type_tag_roundtrip() {
        for t in [AttrType::Int, AttrType::Float, AttrType::Char, AttrType::Date] {
            assert_eq!(AttrType::from_u8(t.as_u8()).unwrap(), t);
        }
        assert!(AttrType::from_u8(0).is_err());
        assert!(AttrType::from_u8(99).is_err());
    }

    #[test]
    fn test_int_ordering() {
        let cmp = KeyComparator::new(AttrType::Int, 4);
        let rid = RecordId::new(0, 0);

        let a = int_key(-5, rid);
        let b = int_key(3, rid);
        let c = int_key(100, rid);

        assert_eq!(cmp.compare(&a, &b), Ordering::Less);
        assert_eq!(cmp.compare(&b, &c), Ordering::Less);
        assert_eq!(cmp.compare(&c, &a), Ordering::Greater);
        assert_eq!(cmp.compare(&b, &b), Ordering::Equal);
    }

    #[test]
    fn test_rid_tiebreak() {
        let cmp = KeyComparator::new(AttrType::Int, 4);

        let a = int_key(7, RecordId::new(1, 2));
        let b = int_key(7, RecordId::new(1, 3));
        let c = int_key(7, RecordId::new(2, 0));

        assert_eq!(cmp.compare(&a, &b), Ordering::Less);
        assert_eq!(cmp.compare(&b, &c), Ordering::Less);
        assert_eq!(cmp.compare(&a, &a), Ordering::Equal);
    }

    #[test]
    fn test_float_ordering() {
        let cmp = KeyComparator::new(AttrType::Float, 4);
        let rid = RecordId::new(0, 0);

        let a = cmp.compose(&(-1.5f32).to_le_bytes(), rid).unwrap();
        let b = cmp.compose(&0.0f32.to_le_bytes(), rid).unwrap();
        let c = cmp.compose(&2.25f32.to_le_bytes(), rid).unwrap();

        assert_eq!(cmp.compare(&a, &b), Ordering::Less);
        assert_eq!(cmp.compare(&b, &c), Ordering::Less);
    }

    #[test]
    fn test_char_ordering_and_padding() {
        let cmp = KeyComparator::new(AttrType::Char, 8);
        let rid = RecordId::new(0, 0);

        let a = cmp.compose(b"apple", rid).unwrap();
        let b = cmp.compose(b"banana", rid).unwrap();

        assert_eq!(a.len(), 8 + RecordId::SIZE);
        assert_eq!(cmp.compare(&a, &b), Ordering::Less);

        // "app" zero-padded sorts before "apple".
        let short = cmp.compose(b"app", rid).unwrap();
        assert_eq!(cmp.compare(&short, &a), Ordering::Less);
    }

    #[test]
    fn test_compose_length_mismatch() {
        let cmp = KeyComparator::new(AttrType::Int, 4);
        let rid = RecordId::new(0, 0);

        assert!(cmp.compose(&[1, 2], rid).is_err());
        assert!(cmp.compose(&[1, 2, 3, 4, 5], rid).is_err());
    }

    #[test]
    fn test_fix_attr_fill() {
        let cmp = KeyComparator::new(AttrType::Char, 4);

        let lower = cmp.fix_attr(b"ab", 0x00).unwrap();
        assert_eq!(lower, vec![b'a', b'b', 0x00, 0x00]);

        let upper = cmp.fix_attr(b"ab", 0xFF).unwrap();
        assert_eq!(upper, vec![b'a', b'b', 0xFF, 0xFF]);

        assert!(cmp.fix_attr(b"abcde", 0x00).is_err());
    }

    #[test]
    fn test_rid_of() {
        let cmp = KeyComparator::new(AttrType::Int, 4);
        let rid = RecordId::new(9, 4);
        let key = int_key(1, rid);
        assert_eq!(cmp.rid_of(&key), rid);
    }

    #[test]
    fn test_format_key() {
        let cmp = KeyComparator::new(AttrType::Int, 4);
        let key = int_key(42, RecordId::new(3, 1));
        assert_eq!(cmp.format_key(&key), "42@3:1");

        let ccmp = KeyComparator::new(AttrType::Char, 6);
        let ckey = ccmp.compose(b"hi", RecordId::new(0, 0)).unwrap();
        assert_eq!(ccmp.format_key(&ckey), "hi@0:0");
    }

    #[test]
    fn test_key_length() {
        let cmp = KeyComparator::new(AttrType::Char, 16);
        assert_eq!(cmp.key_length(), 16 + RecordId::SIZE);
    }
}
