//! Range scanner over the leaf chain.
//!
//! Bound inclusivity is folded into the composite key: a lower bound
//! composes with `RecordId::MIN` when inclusive (every entry carrying
//! that attribute qualifies) and `RecordId::MAX` when exclusive; upper
//! bounds mirror that. One composite comparison then decides both the
//! starting position and the stop condition. Short char bounds are
//! padded so that the padded value brackets every extension of the
//! user's prefix.

use crate::key::AttrType;
use crate::latch::{LatchMemo, LatchMode};
use crate::node::LeafView;
use crate::tree::{BPlusTree, SeekTarget};
use bytes::Bytes;
use kite_common::page::{PageNum, RecordId, INVALID_PAGE_NUM};
use kite_common::{KiteError, Result};
use std::cmp::Ordering;

#[derive(Debug, Clone, Copy)]
enum ScanState {
    Closed,
    Open { leaf: PageNum, index: usize },
    Exhausted,
}

/// Iterates record identifiers for composite keys inside a bound range.
///
/// Holds at most one leaf latch at a time; the latch is released before
/// following the next-leaf link.
pub struct BPlusTreeScanner<'a> {
    tree: &'a BPlusTree,
    memo: LatchMemo,
    state: ScanState,
    end_key: Option<Bytes>,
    end_inclusive: bool,
}

impl<'a> BPlusTreeScanner<'a> {
    pub(crate) fn new(tree: &'a BPlusTree) -> Self {
        Self {
            tree,
            memo: LatchMemo::new(tree.pool().clone()),
            state: ScanState::Closed,
            end_key: None,
            end_inclusive: false,
        }
    }

    /// Positions the scanner on the first qualifying entry.
    ///
    /// `None` bounds are unbounded on that side. Char bounds shorter
    /// than the attribute length are padded (lower with 0x00; upper with
    /// 0xFF when inclusive, 0x00 when exclusive). An empty or inverted
    /// range is an invalid argument.
    pub fn open(
        &mut self,
        left: Option<&[u8]>,
        left_inclusive: bool,
        right: Option<&[u8]>,
        right_inclusive: bool,
    ) -> Result<()> {
        if !matches!(self.state, ScanState::Closed) {
            return Err(KiteError::InvalidState("scanner is already open".to_string()));
        }

        let cmp = self.tree.comparator();

        let start_key = match left {
            Some(attr) => {
                let fixed = cmp.fix_attr(attr, 0x00)?;
                let rid = if left_inclusive {
                    RecordId::MIN
                } else {
                    RecordId::MAX
                };
                Some(cmp.compose(&fixed, rid)?)
            }
            None => None,
        };
        let end_key = match right {
            Some(attr) => {
                let fill = if right_inclusive && cmp.attr_type() == AttrType::Char {
                    0xFF
                } else {
                    0x00
                };
                let fixed = cmp.fix_attr(attr, fill)?;
                let rid = if right_inclusive {
                    RecordId::MAX
                } else {
                    RecordId::MIN
                };
                Some(cmp.compose(&fixed, rid)?)
            }
            None => None,
        };

        if let (Some(start), Some(end)) = (&start_key, &end_key) {
            if cmp.compare(start, end) != Ordering::Less {
                return Err(KiteError::InvalidArgument(
                    "scan range is empty or inverted".to_string(),
                ));
            }
        }

        let target = match &start_key {
            Some(key) => SeekTarget::Key(key),
            None => SeekTarget::Leftmost,
        };
        let leaf = match self.tree.find_leaf_shared(&mut self.memo, target)? {
            Some(page) => page,
            None => {
                self.end_key = end_key;
                self.end_inclusive = right_inclusive;
                self.state = ScanState::Exhausted;
                return Ok(());
            }
        };

        let index = match &start_key {
            Some(key) => {
                let frame = self.memo.frame(leaf).ok_or_else(|| {
                    KiteError::Internal("starting leaf not latched".to_string())
                })?;
                // Safety: the memo holds this leaf's shared latch.
                let buf = unsafe { frame.data() };
                let view = LeafView::new(&buf[..], self.tree.scheme());
                let (pos, found) = view.lookup(cmp, key);
                // An exact hit on an exclusive bound sentinel is itself
                // excluded.
                if found && !left_inclusive {
                    pos + 1
                } else {
                    pos
                }
            }
            None => 0,
        };

        self.end_key = end_key;
        self.end_inclusive = right_inclusive;
        self.state = ScanState::Open { leaf, index };
        Ok(())
    }

    /// Yields the next qualifying record identifier, or None when the
    /// range is exhausted.
    pub fn next_entry(&mut self) -> Result<Option<RecordId>> {
        loop {
            let ScanState::Open { leaf, index } = self.state else {
                return Ok(None);
            };

            let frame = self
                .memo
                .frame(leaf)
                .ok_or_else(|| KiteError::Internal("scan leaf not latched".to_string()))?;
            // Safety: the memo holds this leaf's shared latch.
            let buf = unsafe { frame.data() };
            let view = LeafView::new(&buf[..], self.tree.scheme());

            if index < view.size() {
                let key = view.key_at(index);
                if let Some(end) = &self.end_key {
                    let ord = self.tree.comparator().compare(key, end);
                    if ord == Ordering::Greater || (ord == Ordering::Equal && !self.end_inclusive)
                    {
                        self.memo.release_all();
                        self.state = ScanState::Exhausted;
                        return Ok(None);
                    }
                }
                let rid = view.rid_at(index);
                self.state = ScanState::Open {
                    leaf,
                    index: index + 1,
                };
                return Ok(Some(rid));
            }

            // End of leaf: release before stepping so at most one leaf
            // latch is ever held.
            let next = view.next();
            self.memo.release_all();
            if next == INVALID_PAGE_NUM {
                self.state = ScanState::Exhausted;
                return Ok(None);
            }
            self.memo.acquire(next, LatchMode::Shared)?;
            self.state = ScanState::Open {
                leaf: next,
                index: 0,
            };
        }
    }

    /// Releases all latches and returns the scanner to the closed
    /// state. Idempotent; implied by drop.
    pub fn close(&mut self) {
        self.memo.release_all();
        self.state = ScanState::Closed;
        self.end_key = None;
    }
}

impl Drop for BPlusTreeScanner<'_> {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::IndexOptions;
    use tempfile::tempdir;

    fn rid(n: u32) -> RecordId {
        RecordId::new(2, n)
    }

    fn int_tree(dir: &tempfile::TempDir, values: &[i32]) -> BPlusTree {
        let tree = BPlusTree::create(
            dir.path().join("scan.kite"),
            AttrType::Int,
            4,
            IndexOptions {
                leaf_max_size: Some(4),
                internal_max_size: Some(4),
                pool_frames: Some(32),
            },
        )
        .unwrap();
        for &v in values {
            tree.insert_entry(&v.to_le_bytes(), rid(v as u32)).unwrap();
        }
        tree
    }

    fn collect(
        tree: &BPlusTree,
        left: Option<i32>,
        left_inclusive: bool,
        right: Option<i32>,
        right_inclusive: bool,
    ) -> Vec<u32> {
        let left_bytes = left.map(|v| v.to_le_bytes());
        let right_bytes = right.map(|v| v.to_le_bytes());
        let mut scanner = tree.scanner();
        scanner
            .open(
                left_bytes.as_ref().map(|b| &b[..]),
                left_inclusive,
                right_bytes.as_ref().map(|b| &b[..]),
                right_inclusive,
            )
            .unwrap();
        let mut out = Vec::new();
        while let Some(r) = scanner.next_entry().unwrap() {
            out.push(r.slot_num);
        }
        out
    }

    #[test]
    fn test_full_scan_in_order() {
        let dir = tempdir().unwrap();
        let tree = int_tree(&dir, &[9, 2, 7, 1, 8, 3, 6, 4, 5, 10]);

        assert_eq!(
            collect(&tree, None, true, None, true),
            (1..=10).collect::<Vec<_>>()
        );
    }

    #[test]
    fn test_bounded_scans() {
        let dir = tempdir().unwrap();
        let tree = int_tree(&dir, &(1..=10).collect::<Vec<_>>());

        assert_eq!(collect(&tree, Some(3), true, Some(7), true), vec![3, 4, 5, 6, 7]);
        assert_eq!(collect(&tree, Some(3), false, Some(7), true), vec![4, 5, 6, 7]);
        assert_eq!(collect(&tree, Some(3), true, Some(7), false), vec![3, 4, 5, 6]);
        assert_eq!(collect(&tree, Some(3), false, Some(7), false), vec![4, 5, 6]);
    }

    #[test]
    fn test_half_open_scans() {
        let dir = tempdir().unwrap();
        let tree = int_tree(&dir, &(1..=10).collect::<Vec<_>>());

        assert_eq!(
            collect(&tree, Some(8), true, None, true),
            vec![8, 9, 10]
        );
        assert_eq!(collect(&tree, None, true, Some(3), true), vec![1, 2, 3]);
    }

    #[test]
    fn test_point_scan() {
        let dir = tempdir().unwrap();
        let tree = int_tree(&dir, &(1..=10).collect::<Vec<_>>());

        assert_eq!(collect(&tree, Some(5), true, Some(5), true), vec![5]);
    }

    #[test]
    fn test_scan_outside_data() {
        let dir = tempdir().unwrap();
        let tree = int_tree(&dir, &(5..=8).collect::<Vec<_>>());

        assert!(collect(&tree, Some(20), true, Some(30), true).is_empty());
        assert!(collect(&tree, Some(1), true, Some(4), true).is_empty());
    }

    #[test]
    fn test_inverted_range_rejected() {
        let dir = tempdir().unwrap();
        let tree = int_tree(&dir, &[1, 2, 3]);

        let mut scanner = tree.scanner();
        let result = scanner.open(
            Some(&7i32.to_le_bytes()),
            true,
            Some(&3i32.to_le_bytes()),
            true,
        );
        assert!(matches!(result, Err(KiteError::InvalidArgument(_))));

        // Equal bounds with an exclusive side are an empty range.
        let mut scanner = tree.scanner();
        let result = scanner.open(
            Some(&2i32.to_le_bytes()),
            false,
            Some(&2i32.to_le_bytes()),
            true,
        );
        assert!(matches!(result, Err(KiteError::InvalidArgument(_))));
    }

    #[test]
    fn test_scan_empty_tree() {
        let dir = tempdir().unwrap();
        let tree = int_tree(&dir, &[]);

        let mut scanner = tree.scanner();
        scanner.open(None, true, None, true).unwrap();
        assert!(scanner.next_entry().unwrap().is_none());
    }

    #[test]
    fn test_reopen_after_close() {
        let dir = tempdir().unwrap();
        let tree = int_tree(&dir, &[1, 2, 3]);

        let mut scanner = tree.scanner();
        scanner.open(None, true, None, true).unwrap();
        assert!(scanner.next_entry().unwrap().is_some());

        assert!(matches!(
            scanner.open(None, true, None, true),
            Err(KiteError::InvalidState(_))
        ));

        scanner.close();
        scanner.close();
        scanner.open(None, true, None, true).unwrap();
        assert_eq!(scanner.next_entry().unwrap(), Some(rid(1)));
    }

    #[test]
    fn test_char_prefix_bounds() {
        let dir = tempdir().unwrap();
        let tree = BPlusTree::create(
            dir.path().join("char.kite"),
            AttrType::Char,
            8,
            IndexOptions {
                leaf_max_size: Some(4),
                internal_max_size: Some(4),
                ..Default::default()
            },
        )
        .unwrap();

        for (i, name) in ["apple", "apricot", "banana", "cherry"].iter().enumerate() {
            tree.insert_entry(name.as_bytes(), rid(i as u32)).unwrap();
        }

        // Inclusive short upper bound pads with 0xFF, covering every
        // word extending the prefix.
        let mut scanner = tree.scanner();
        scanner.open(Some(b"ap"), true, Some(b"ap"), true).unwrap();
        let mut hits = Vec::new();
        while let Some(r) = scanner.next_entry().unwrap() {
            hits.push(r.slot_num);
        }
        assert_eq!(hits, vec![0, 1]);
    }

    #[test]
    fn test_duplicates_scan_in_rid_order() {
        let dir = tempdir().unwrap();
        let tree = int_tree(&dir, &[]);

        for slot in [5u32, 1, 3] {
            tree.insert_entry(&7i32.to_le_bytes(), rid(slot)).unwrap();
        }

        assert_eq!(collect(&tree, Some(7), true, Some(7), true), vec![1, 3, 5]);
    }
}
