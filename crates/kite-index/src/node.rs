//! Node byte layout and typed views.
//!
//! Every data page starts with a common header (kind tag, entry count,
//! parent page number); leaf pages add the next-leaf link. The remainder
//! is a packed array of fixed-size entries: (composite key, record id)
//! for leaves, (composite key, child page number) for internal nodes.
//!
//! Views interpret a latched page's bytes through explicit offsets —
//! the buffer is never aliased as a typed structure. `LeafView` and
//! `InternalView` are generic over the buffer so the same accessors work
//! for shared (`&[u8]`) and exclusive (`&mut [u8]`) access.
//!
//! Views assume the caller holds the right latch and has checked
//! capacity; violated preconditions are protocol bugs and assert.

use crate::header::CHILD_PTR_SIZE;
use crate::key::KeyComparator;
use kite_common::page::{PageNum, RecordId, INVALID_PAGE_NUM};
use kite_common::{KiteError, Result};
use std::cmp::Ordering;

/// Node kind tag for leaf pages.
pub const NODE_KIND_LEAF: u8 = 1;
/// Node kind tag for internal pages.
pub const NODE_KIND_INTERNAL: u8 = 2;

/// Common header: kind (1) + reserved (1) + size (2) + parent (4).
pub const INTERNAL_HEADER_SIZE: usize = 8;
/// Leaf header: common header + next-leaf link (4).
pub const LEAF_HEADER_SIZE: usize = 12;

const KIND_OFFSET: usize = 0;
const SIZE_OFFSET: usize = 2;
const PARENT_OFFSET: usize = 4;
const NEXT_OFFSET: usize = 8;

/// Tree operation kind, driving latch modes and safety checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TreeOp {
    Read,
    Insert,
    Delete,
}

/// Per-index node sizing shared by all views.
#[derive(Debug, Clone, Copy)]
pub struct NodeScheme {
    /// Composite key length in bytes.
    pub key_length: usize,
    /// Maximum entries in a leaf node.
    pub leaf_max_size: usize,
    /// Maximum entries in an internal node.
    pub internal_max_size: usize,
}

impl NodeScheme {
    /// Minimum occupancy for a non-root leaf.
    pub fn leaf_min_size(&self) -> usize {
        self.leaf_max_size / 2
    }

    /// Minimum occupancy for a non-root internal node.
    pub fn internal_min_size(&self) -> usize {
        self.internal_max_size / 2
    }
}

/// Reads the kind tag of a node page.
pub fn node_kind(buf: &[u8]) -> u8 {
    buf[KIND_OFFSET]
}

fn read_u16(buf: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([buf[offset], buf[offset + 1]])
}

fn write_u16(buf: &mut [u8], offset: usize, value: u16) {
    buf[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
}

fn read_u32(buf: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        buf[offset],
        buf[offset + 1],
        buf[offset + 2],
        buf[offset + 3],
    ])
}

fn write_u32(buf: &mut [u8], offset: usize, value: u32) {
    buf[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

// ---------------------------------------------------------------------------
// Leaf nodes
// ---------------------------------------------------------------------------

/// Typed view over a leaf page.
pub struct LeafView<B> {
    buf: B,
    scheme: NodeScheme,
}

impl<B: AsRef<[u8]>> LeafView<B> {
    /// Attaches a view to a leaf page's bytes.
    pub fn new(buf: B, scheme: NodeScheme) -> Self {
        debug_assert_eq!(node_kind(buf.as_ref()), NODE_KIND_LEAF);
        Self { buf, scheme }
    }

    fn entry_size(&self) -> usize {
        self.scheme.key_length + RecordId::SIZE
    }

    fn entry_offset(&self, index: usize) -> usize {
        LEAF_HEADER_SIZE + index * self.entry_size()
    }

    /// Number of entries.
    pub fn size(&self) -> usize {
        read_u16(self.buf.as_ref(), SIZE_OFFSET) as usize
    }

    /// Maximum entry count.
    pub fn max_size(&self) -> usize {
        self.scheme.leaf_max_size
    }

    /// Minimum entry count for non-root nodes.
    pub fn min_size(&self) -> usize {
        self.scheme.leaf_min_size()
    }

    /// Parent page number (INVALID_PAGE_NUM for the root).
    pub fn parent(&self) -> PageNum {
        read_u32(self.buf.as_ref(), PARENT_OFFSET)
    }

    /// Next leaf in key order (INVALID_PAGE_NUM at the chain end).
    pub fn next(&self) -> PageNum {
        read_u32(self.buf.as_ref(), NEXT_OFFSET)
    }

    /// Composite key at the given slot.
    pub fn key_at(&self, index: usize) -> &[u8] {
        debug_assert!(index < self.size());
        let off = self.entry_offset(index);
        &self.buf.as_ref()[off..off + self.scheme.key_length]
    }

    /// Record identifier at the given slot.
    pub fn rid_at(&self, index: usize) -> RecordId {
        debug_assert!(index < self.size());
        let off = self.entry_offset(index) + self.scheme.key_length;
        RecordId::from_bytes(&self.buf.as_ref()[off..off + RecordId::SIZE])
    }

    /// Whether the pending operation can no longer propagate a
    /// structural change above this node.
    pub fn is_safe(&self, op: TreeOp, is_root: bool) -> bool {
        match op {
            TreeOp::Read => true,
            TreeOp::Insert => self.size() < self.max_size(),
            TreeOp::Delete => {
                if is_root {
                    // An emptied leaf root changes the root page.
                    self.size() > 1
                } else {
                    self.size() > self.min_size()
                }
            }
        }
    }

    /// Finds the insert position for `key`: the first slot whose key is
    /// not less than `key`, and whether it is an exact match.
    pub fn lookup(&self, cmp: &KeyComparator, key: &[u8]) -> (usize, bool) {
        let size = self.size();
        let mut lo = 0;
        let mut hi = size;
        while lo < hi {
            let mid = (lo + hi) / 2;
            if cmp.compare(self.key_at(mid), key) == Ordering::Less {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        let found = lo < size && cmp.compare(self.key_at(lo), key) == Ordering::Equal;
        (lo, found)
    }
}

impl<B: AsRef<[u8]> + AsMut<[u8]>> LeafView<B> {
    /// Formats raw bytes as an empty leaf and attaches a view.
    pub fn init(mut buf: B, scheme: NodeScheme, parent: PageNum) -> Self {
        let b = buf.as_mut();
        b[KIND_OFFSET] = NODE_KIND_LEAF;
        b[KIND_OFFSET + 1] = 0;
        write_u16(b, SIZE_OFFSET, 0);
        write_u32(b, PARENT_OFFSET, parent);
        write_u32(b, NEXT_OFFSET, INVALID_PAGE_NUM);
        Self { buf, scheme }
    }

    fn set_size(&mut self, size: usize) {
        write_u16(self.buf.as_mut(), SIZE_OFFSET, size as u16);
    }

    /// Sets the parent page number.
    pub fn set_parent(&mut self, parent: PageNum) {
        write_u32(self.buf.as_mut(), PARENT_OFFSET, parent);
    }

    /// Sets the next-leaf link.
    pub fn set_next(&mut self, next: PageNum) {
        write_u32(self.buf.as_mut(), NEXT_OFFSET, next);
    }

    /// Inserts an entry at the given slot, shifting later entries right.
    pub fn insert_at(&mut self, index: usize, key: &[u8], rid: RecordId) {
        let size = self.size();
        assert!(size < self.max_size(), "insert into full leaf");
        assert!(index <= size, "leaf insert position out of bounds");
        assert_eq!(key.len(), self.scheme.key_length);

        let es = self.entry_size();
        let start = self.entry_offset(index);
        let end = self.entry_offset(size);
        let buf = self.buf.as_mut();
        buf.copy_within(start..end, start + es);
        buf[start..start + key.len()].copy_from_slice(key);
        buf[start + key.len()..start + es].copy_from_slice(&rid.to_bytes());
        self.set_size(size + 1);
    }

    /// Removes the entry at the given slot, shifting later entries left.
    pub fn remove_at(&mut self, index: usize) {
        let size = self.size();
        assert!(index < size, "leaf remove position out of bounds");

        let es = self.entry_size();
        let start = self.entry_offset(index);
        let end = self.entry_offset(size);
        self.buf.as_mut().copy_within(start + es..end, start);
        self.set_size(size - 1);
    }

    /// Moves the upper half of entries into an empty right sibling.
    /// Chain links are the caller's responsibility.
    pub fn move_half_to<B2>(&mut self, other: &mut LeafView<B2>)
    where
        B2: AsRef<[u8]> + AsMut<[u8]>,
    {
        let size = self.size();
        let split = size / 2;
        debug_assert_eq!(other.size(), 0);

        let es = self.entry_size();
        let src = self.entry_offset(split);
        let len = (size - split) * es;
        other.buf.as_mut()[LEAF_HEADER_SIZE..LEAF_HEADER_SIZE + len]
            .copy_from_slice(&self.buf.as_ref()[src..src + len]);
        other.set_size(size - split);
        self.set_size(split);
    }

    /// Appends all entries to the left sibling, emptying this node.
    pub fn move_to<B2>(&mut self, other: &mut LeafView<B2>)
    where
        B2: AsRef<[u8]> + AsMut<[u8]>,
    {
        let size = self.size();
        let other_size = other.size();
        assert!(other_size + size <= other.max_size(), "leaf merge overflow");

        let es = self.entry_size();
        let dst = other.entry_offset(other_size);
        let len = size * es;
        other.buf.as_mut()[dst..dst + len]
            .copy_from_slice(&self.buf.as_ref()[LEAF_HEADER_SIZE..LEAF_HEADER_SIZE + len]);
        other.set_size(other_size + size);
        self.set_size(0);
    }

    /// Moves this node's first entry to the end of the left sibling.
    pub fn move_first_to_end<B2>(&mut self, other: &mut LeafView<B2>)
    where
        B2: AsRef<[u8]> + AsMut<[u8]>,
    {
        let key = self.key_at(0).to_vec();
        let rid = self.rid_at(0);
        other.insert_at(other.size(), &key, rid);
        self.remove_at(0);
    }

    /// Moves this node's last entry to the front of the right sibling.
    pub fn move_last_to_front<B2>(&mut self, other: &mut LeafView<B2>)
    where
        B2: AsRef<[u8]> + AsMut<[u8]>,
    {
        let last = self.size() - 1;
        let key = self.key_at(last).to_vec();
        let rid = self.rid_at(last);
        other.insert_at(0, &key, rid);
        self.remove_at(last);
    }
}

// ---------------------------------------------------------------------------
// Internal nodes
// ---------------------------------------------------------------------------

/// Typed view over an internal page.
///
/// The entry count equals the child count; slot 0's key is a structural
/// placeholder that is never compared. Child i covers keys in
/// [key_i, key_{i+1}).
pub struct InternalView<B> {
    buf: B,
    scheme: NodeScheme,
}

impl<B: AsRef<[u8]>> InternalView<B> {
    /// Attaches a view to an internal page's bytes.
    pub fn new(buf: B, scheme: NodeScheme) -> Self {
        debug_assert_eq!(node_kind(buf.as_ref()), NODE_KIND_INTERNAL);
        Self { buf, scheme }
    }

    fn entry_size(&self) -> usize {
        self.scheme.key_length + CHILD_PTR_SIZE
    }

    fn entry_offset(&self, index: usize) -> usize {
        INTERNAL_HEADER_SIZE + index * self.entry_size()
    }

    /// Number of entries (= number of children).
    pub fn size(&self) -> usize {
        read_u16(self.buf.as_ref(), SIZE_OFFSET) as usize
    }

    /// Maximum entry count.
    pub fn max_size(&self) -> usize {
        self.scheme.internal_max_size
    }

    /// Minimum entry count for non-root nodes.
    pub fn min_size(&self) -> usize {
        self.scheme.internal_min_size()
    }

    /// Parent page number (INVALID_PAGE_NUM for the root).
    pub fn parent(&self) -> PageNum {
        read_u32(self.buf.as_ref(), PARENT_OFFSET)
    }

    /// Separator key at the given slot (slot 0 is the placeholder).
    pub fn key_at(&self, index: usize) -> &[u8] {
        debug_assert!(index < self.size());
        let off = self.entry_offset(index);
        &self.buf.as_ref()[off..off + self.scheme.key_length]
    }

    /// Child page number at the given slot.
    pub fn child_at(&self, index: usize) -> PageNum {
        debug_assert!(index < self.size());
        let off = self.entry_offset(index) + self.scheme.key_length;
        read_u32(self.buf.as_ref(), off)
    }

    /// Whether the pending operation can no longer propagate a
    /// structural change above this node.
    pub fn is_safe(&self, op: TreeOp, is_root: bool) -> bool {
        match op {
            TreeOp::Read => true,
            TreeOp::Insert => self.size() < self.max_size(),
            TreeOp::Delete => {
                if is_root {
                    // A one-child internal root changes the root page.
                    self.size() > 2
                } else {
                    self.size() > self.min_size()
                }
            }
        }
    }

    /// Returns the slot index of the child to descend into for `key`.
    pub fn lookup_child(&self, cmp: &KeyComparator, key: &[u8]) -> usize {
        let size = self.size();
        debug_assert!(size >= 1);
        // First slot in [1, size) whose key is greater than `key`; the
        // child before it covers the key. Slot 0 is never compared.
        let mut lo = 1;
        let mut hi = size;
        while lo < hi {
            let mid = (lo + hi) / 2;
            if cmp.compare(self.key_at(mid), key) == Ordering::Greater {
                hi = mid;
            } else {
                lo = mid + 1;
            }
        }
        lo - 1
    }

    /// Returns the slot whose child pointer equals `page_num`.
    pub fn value_index(&self, page_num: PageNum) -> Option<usize> {
        (0..self.size()).find(|&i| self.child_at(i) == page_num)
    }

    /// Collects all child page numbers.
    pub fn children(&self) -> Vec<PageNum> {
        (0..self.size()).map(|i| self.child_at(i)).collect()
    }
}

impl<B: AsRef<[u8]> + AsMut<[u8]>> InternalView<B> {
    /// Formats raw bytes as an empty internal node and attaches a view.
    pub fn init(mut buf: B, scheme: NodeScheme, parent: PageNum) -> Self {
        let b = buf.as_mut();
        b[KIND_OFFSET] = NODE_KIND_INTERNAL;
        b[KIND_OFFSET + 1] = 0;
        write_u16(b, SIZE_OFFSET, 0);
        write_u32(b, PARENT_OFFSET, parent);
        Self { buf, scheme }
    }

    fn set_size(&mut self, size: usize) {
        write_u16(self.buf.as_mut(), SIZE_OFFSET, size as u16);
    }

    /// Sets the parent page number.
    pub fn set_parent(&mut self, parent: PageNum) {
        write_u32(self.buf.as_mut(), PARENT_OFFSET, parent);
    }

    /// Overwrites the separator key at the given slot.
    pub fn set_key_at(&mut self, index: usize, key: &[u8]) {
        debug_assert!(index < self.size());
        assert_eq!(key.len(), self.scheme.key_length);
        let off = self.entry_offset(index);
        self.buf.as_mut()[off..off + key.len()].copy_from_slice(key);
    }

    /// Populates an empty node as the root over a freshly split pair.
    pub fn init_new_root(&mut self, left: PageNum, separator: &[u8], right: PageNum) {
        assert_eq!(self.size(), 0, "new root must be empty");
        let key_len = self.scheme.key_length;
        let es = self.entry_size();
        self.set_size(2);

        let buf = self.buf.as_mut();
        let e0 = INTERNAL_HEADER_SIZE;
        // Slot 0: placeholder key (zeroed) + left child.
        buf[e0..e0 + key_len].fill(0);
        write_u32(buf, e0 + key_len, left);
        let e1 = e0 + es;
        buf[e1..e1 + key_len].copy_from_slice(separator);
        write_u32(buf, e1 + key_len, right);
    }

    /// Inserts a (key, child) entry at the given slot.
    pub fn insert_at(&mut self, index: usize, key: &[u8], child: PageNum) {
        let size = self.size();
        assert!(size < self.max_size(), "insert into full internal node");
        assert!(index <= size, "internal insert position out of bounds");
        assert_eq!(key.len(), self.scheme.key_length);

        let es = self.entry_size();
        let start = self.entry_offset(index);
        let end = self.entry_offset(size);
        let buf = self.buf.as_mut();
        buf.copy_within(start..end, start + es);
        buf[start..start + key.len()].copy_from_slice(key);
        write_u32(buf, start + key.len(), child);
        self.set_size(size + 1);
    }

    /// Removes the entry at the given slot.
    pub fn remove_at(&mut self, index: usize) {
        let size = self.size();
        assert!(index < size, "internal remove position out of bounds");

        let es = self.entry_size();
        let start = self.entry_offset(index);
        let end = self.entry_offset(size);
        self.buf.as_mut().copy_within(start + es..end, start);
        self.set_size(size - 1);
    }

    /// Moves the upper half of entries into an empty right sibling.
    ///
    /// The new sibling's slot-0 key carries the separator to push up;
    /// the caller reparents the moved children.
    pub fn move_half_to<B2>(&mut self, other: &mut InternalView<B2>)
    where
        B2: AsRef<[u8]> + AsMut<[u8]>,
    {
        let size = self.size();
        let split = size / 2;
        debug_assert_eq!(other.size(), 0);

        let es = self.entry_size();
        let src = self.entry_offset(split);
        let len = (size - split) * es;
        other.buf.as_mut()[INTERNAL_HEADER_SIZE..INTERNAL_HEADER_SIZE + len]
            .copy_from_slice(&self.buf.as_ref()[src..src + len]);
        other.set_size(size - split);
        self.set_size(split);
    }

    /// Appends all entries to the left sibling, emptying this node.
    ///
    /// The caller must first materialize the parent separator into this
    /// node's slot-0 placeholder, and afterwards reparent the moved
    /// children.
    pub fn move_to<B2>(&mut self, other: &mut InternalView<B2>)
    where
        B2: AsRef<[u8]> + AsMut<[u8]>,
    {
        let size = self.size();
        let other_size = other.size();
        assert!(
            other_size + size <= other.max_size(),
            "internal merge overflow"
        );

        let es = self.entry_size();
        let dst = other.entry_offset(other_size);
        let len = size * es;
        other.buf.as_mut()[dst..dst + len]
            .copy_from_slice(&self.buf.as_ref()[INTERNAL_HEADER_SIZE..INTERNAL_HEADER_SIZE + len]);
        other.set_size(other_size + size);
        self.set_size(0);
    }

    /// Moves this node's first entry to the end of the left sibling.
    /// The caller materializes the separator into slot 0 first and
    /// reparents the moved child.
    pub fn move_first_to_end<B2>(&mut self, other: &mut InternalView<B2>)
    where
        B2: AsRef<[u8]> + AsMut<[u8]>,
    {
        let key = self.key_at(0).to_vec();
        let child = self.child_at(0);
        other.insert_at(other.size(), &key, child);
        self.remove_at(0);
    }

    /// Moves this node's last entry to the front of the right sibling.
    /// The caller writes the separator into the sibling's old slot-0 key
    /// beforehand and reparents the moved child.
    pub fn move_last_to_front<B2>(&mut self, other: &mut InternalView<B2>)
    where
        B2: AsRef<[u8]> + AsMut<[u8]>,
    {
        let last = self.size() - 1;
        let key = self.key_at(last).to_vec();
        let child = self.child_at(last);
        other.insert_at(0, &key, child);
        self.remove_at(last);
    }
}

// ---------------------------------------------------------------------------
// Shared capability surface
// ---------------------------------------------------------------------------

/// Mutable node view selected by the stored kind tag.
///
/// The rebalancing code paths are written against this closed
/// two-variant surface, matching on the tag where a pinned page is
/// interpreted rather than dispatching virtually.
pub enum NodeMut<'a> {
    Leaf(LeafView<&'a mut [u8]>),
    Internal(InternalView<&'a mut [u8]>),
}

impl<'a> NodeMut<'a> {
    /// Interprets a page's bytes according to its kind tag.
    pub fn attach(buf: &'a mut [u8], scheme: NodeScheme, page_num: PageNum) -> Result<Self> {
        match node_kind(buf) {
            NODE_KIND_LEAF => Ok(NodeMut::Leaf(LeafView::new(buf, scheme))),
            NODE_KIND_INTERNAL => Ok(NodeMut::Internal(InternalView::new(buf, scheme))),
            tag => Err(KiteError::PageCorrupted {
                page_num,
                reason: format!("unknown node kind tag {tag}"),
            }),
        }
    }

    /// Returns true for leaf nodes.
    pub fn is_leaf(&self) -> bool {
        matches!(self, NodeMut::Leaf(_))
    }

    /// Number of entries.
    pub fn size(&self) -> usize {
        match self {
            NodeMut::Leaf(v) => v.size(),
            NodeMut::Internal(v) => v.size(),
        }
    }

    /// Maximum entry count for this node kind.
    pub fn max_size(&self) -> usize {
        match self {
            NodeMut::Leaf(v) => v.max_size(),
            NodeMut::Internal(v) => v.max_size(),
        }
    }

    /// Minimum entry count for non-root nodes of this kind.
    pub fn min_size(&self) -> usize {
        match self {
            NodeMut::Leaf(v) => v.min_size(),
            NodeMut::Internal(v) => v.min_size(),
        }
    }

    /// Parent page number.
    pub fn parent(&self) -> PageNum {
        match self {
            NodeMut::Leaf(v) => v.parent(),
            NodeMut::Internal(v) => v.parent(),
        }
    }

    /// Sets the parent page number.
    pub fn set_parent(&mut self, parent: PageNum) {
        match self {
            NodeMut::Leaf(v) => v.set_parent(parent),
            NodeMut::Internal(v) => v.set_parent(parent),
        }
    }

    /// Whether the pending operation can no longer propagate a
    /// structural change above this node, allowing ancestor latches to
    /// be released.
    pub fn is_safe(&self, op: TreeOp, is_root: bool) -> bool {
        match self {
            NodeMut::Leaf(v) => v.is_safe(op, is_root),
            NodeMut::Internal(v) => v.is_safe(op, is_root),
        }
    }
}
