//! Disk-based B+ tree index.
//!
//! Entries are composite keys (attribute bytes plus record identifier)
//! stored in fixed-capacity leaf and internal pages. Concurrent
//! operations use latch crabbing: latches are taken top-down and
//! ancestors are released as soon as a child is known to absorb the
//! operation without structural changes above it. The root page number
//! has its own reader/writer lock, ordered before any page latch.

use crate::header::{IndexFileHeader, HEADER_PAGE_NUM};
use crate::key::{AttrType, KeyComparator};
use crate::latch::{LatchMemo, LatchMode};
use crate::node::{
    node_kind, InternalView, LeafView, NodeMut, NodeScheme, TreeOp, NODE_KIND_INTERNAL,
    NODE_KIND_LEAF,
};
use crate::scanner::BPlusTreeScanner;
use kite_buffer::{BufferPool, BufferPoolConfig, DiskManager};
use kite_common::page::{PageNum, RecordId, INVALID_PAGE_NUM, PAGE_SIZE};
use kite_common::{KiteError, Result};
use parking_lot::{RwLock, RwLockWriteGuard};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// Optional overrides for index creation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IndexOptions {
    /// Maximum entries per leaf node; defaults to page capacity.
    pub leaf_max_size: Option<usize>,
    /// Maximum entries per internal node; defaults to page capacity.
    pub internal_max_size: Option<usize>,
    /// Buffer pool frame count; defaults to the pool default.
    pub pool_frames: Option<usize>,
}

/// Where a traversal should land.
#[derive(Debug, Clone, Copy)]
pub(crate) enum SeekTarget<'a> {
    /// Descend toward the leaf covering this composite key.
    Key(&'a [u8]),
    /// Descend along the first child at every level.
    Leftmost,
}

type RootGuard<'a> = Option<RwLockWriteGuard<'a, PageNum>>;

/// A disk-based B+ tree mapping composite keys to record identifiers.
pub struct BPlusTree {
    pool: Arc<BufferPool>,
    comparator: KeyComparator,
    scheme: NodeScheme,
    meta: IndexFileHeader,
    /// Current root page number; INVALID_PAGE_NUM means the tree is
    /// empty. Guarded separately because root changes invalidate every
    /// in-flight descent.
    root: RwLock<PageNum>,
}

impl BPlusTree {
    /// Creates a new index file and returns the tree over it.
    ///
    /// Fails if the file already exists, the attribute length does not
    /// match the type, or the capacity overrides do not fit a page.
    pub fn create(
        path: impl AsRef<Path>,
        attr_type: AttrType,
        attr_length: usize,
        options: IndexOptions,
    ) -> Result<Self> {
        match attr_type.fixed_length() {
            Some(fixed) if attr_length != fixed => {
                return Err(KiteError::InvalidArgument(format!(
                    "{attr_type} attributes are {fixed} bytes, got {attr_length}"
                )));
            }
            None if attr_length == 0 => {
                return Err(KiteError::InvalidArgument(
                    "char attribute length must be positive".to_string(),
                ));
            }
            _ => {}
        }

        let key_length = attr_length + RecordId::SIZE;
        let leaf_cap = IndexFileHeader::leaf_page_capacity(key_length);
        let internal_cap = IndexFileHeader::internal_page_capacity(key_length);

        let leaf_max = options.leaf_max_size.unwrap_or(leaf_cap);
        if leaf_max < 2 || leaf_max > leaf_cap {
            return Err(KiteError::InvalidArgument(format!(
                "leaf capacity {leaf_max} outside [2, {leaf_cap}]"
            )));
        }
        let internal_max = options.internal_max_size.unwrap_or(internal_cap);
        if internal_max < 3 || internal_max > internal_cap {
            return Err(KiteError::InvalidArgument(format!(
                "internal capacity {internal_max} outside [3, {internal_cap}]"
            )));
        }

        let disk = Arc::new(DiskManager::create(&path)?);
        let header_page = disk.allocate_page()?;
        if header_page != HEADER_PAGE_NUM {
            return Err(KiteError::Internal(format!(
                "metadata page allocated at {header_page}"
            )));
        }

        let meta = IndexFileHeader::new(attr_type, attr_length, internal_max, leaf_max);
        let mut page = Box::new([0u8; PAGE_SIZE]);
        page[..IndexFileHeader::SIZE].copy_from_slice(&meta.to_bytes());
        disk.write_page(HEADER_PAGE_NUM, &page)?;

        let pool_frames = options
            .pool_frames
            .unwrap_or_else(|| BufferPoolConfig::default().num_frames);
        let pool = Arc::new(BufferPool::new(
            disk,
            BufferPoolConfig {
                num_frames: pool_frames,
            },
        ));

        debug!(path = %path.as_ref().display(), %meta, "created index");

        Ok(Self {
            pool,
            comparator: KeyComparator::new(attr_type, attr_length),
            scheme: NodeScheme {
                key_length,
                leaf_max_size: leaf_max,
                internal_max_size: internal_max,
            },
            meta,
            root: RwLock::new(INVALID_PAGE_NUM),
        })
    }

    /// Opens an existing index file.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let disk = Arc::new(DiskManager::open(&path)?);
        if disk.num_pages() == 0 {
            return Err(KiteError::InvalidState(format!(
                "index file {} has no metadata page",
                path.as_ref().display()
            )));
        }

        let mut buf = Box::new([0u8; PAGE_SIZE]);
        disk.read_page(HEADER_PAGE_NUM, &mut buf)?;
        let meta = IndexFileHeader::from_bytes(&buf[..IndexFileHeader::SIZE])?;

        let pool = Arc::new(BufferPool::new(disk, BufferPoolConfig::default()));

        debug!(path = %path.as_ref().display(), %meta, "opened index");

        Ok(Self {
            pool,
            comparator: KeyComparator::new(meta.attr_type, meta.attr_length as usize),
            scheme: NodeScheme {
                key_length: meta.key_length as usize,
                leaf_max_size: meta.leaf_max_size as usize,
                internal_max_size: meta.internal_max_size as usize,
            },
            meta,
            root: RwLock::new(meta.root_page),
        })
    }

    /// Writes all cached state to disk.
    pub fn sync(&self) -> Result<()> {
        self.pool.flush_all()?;
        self.pool.disk().flush()
    }

    /// Syncs and consumes the tree.
    pub fn close(self) -> Result<()> {
        self.sync()
    }

    /// Returns true if the tree holds no entries.
    pub fn is_empty(&self) -> bool {
        *self.root.read() == INVALID_PAGE_NUM
    }

    /// Returns a closed range scanner over this tree.
    pub fn scanner(&self) -> BPlusTreeScanner<'_> {
        BPlusTreeScanner::new(self)
    }

    pub(crate) fn pool(&self) -> &Arc<BufferPool> {
        &self.pool
    }

    pub(crate) fn comparator(&self) -> &KeyComparator {
        &self.comparator
    }

    pub(crate) fn scheme(&self) -> NodeScheme {
        self.scheme
    }

    /// Inserts one (attribute, record identifier) entry.
    ///
    /// Returns `DuplicateKey` if the exact pair is already present.
    pub fn insert_entry(&self, attr: &[u8], rid: RecordId) -> Result<()> {
        let key = self.comparator.compose(attr, rid)?;

        let mut guard: RootGuard<'_> = Some(self.root.write());

        if self.current_root(&guard)? == INVALID_PAGE_NUM {
            return self.start_new_tree(&mut guard, &key, rid);
        }

        let mut memo = LatchMemo::new(self.pool.clone());
        let leaf_page = self.descend_exclusive(&mut memo, &mut guard, TreeOp::Insert, &key)?;

        let leaf_frame = memo
            .frame(leaf_page)
            .ok_or_else(|| KiteError::Internal("leaf frame lost during insert".to_string()))?;

        // Safety: the memo holds this leaf's exclusive latch.
        let buf = unsafe { leaf_frame.data_mut() };
        let mut leaf = LeafView::new(&mut buf[..], self.scheme);

        let (pos, found) = leaf.lookup(&self.comparator, &key);
        if found {
            return Err(KiteError::DuplicateKey);
        }

        if leaf.size() < leaf.max_size() {
            leaf.insert_at(pos, &key, rid);
            return Ok(());
        }

        // Full leaf: split first, then insert into the covering half.
        let new_page = self.pool.disk().allocate_page()?;
        let new_frame = memo.acquire_new(new_page)?;
        // Safety: acquire_new latched the fresh frame exclusively.
        let nbuf = unsafe { new_frame.data_mut() };
        let mut new_leaf = LeafView::init(&mut nbuf[..], self.scheme, leaf.parent());

        leaf.move_half_to(&mut new_leaf);
        new_leaf.set_next(leaf.next());
        leaf.set_next(new_page);

        let separator = new_leaf.key_at(0).to_vec();
        if self.comparator.compare(&key, &separator) == Ordering::Less {
            let (pos, _) = leaf.lookup(&self.comparator, &key);
            leaf.insert_at(pos, &key, rid);
        } else {
            let (pos, _) = new_leaf.lookup(&self.comparator, &key);
            new_leaf.insert_at(pos, &key, rid);
        }

        debug!(left = leaf_page, right = new_page, "split leaf");
        self.insert_into_parent(&mut memo, &mut guard, leaf_page, separator, new_page)
    }

    /// Deletes one (attribute, record identifier) entry.
    ///
    /// Returns `KeyNotFound` if the exact pair is absent.
    pub fn delete_entry(&self, attr: &[u8], rid: RecordId) -> Result<()> {
        let key = self.comparator.compose(attr, rid)?;

        let mut guard: RootGuard<'_> = Some(self.root.write());
        if self.current_root(&guard)? == INVALID_PAGE_NUM {
            return Err(KiteError::KeyNotFound);
        }

        let mut memo = LatchMemo::new(self.pool.clone());
        let leaf_page = self.descend_exclusive(&mut memo, &mut guard, TreeOp::Delete, &key)?;

        {
            let frame = memo
                .frame(leaf_page)
                .ok_or_else(|| KiteError::Internal("leaf frame lost during delete".to_string()))?;
            // Safety: the memo holds this leaf's exclusive latch.
            let buf = unsafe { frame.data_mut() };
            let mut leaf = LeafView::new(&mut buf[..], self.scheme);

            let (pos, found) = leaf.lookup(&self.comparator, &key);
            if !found {
                return Err(KiteError::KeyNotFound);
            }
            leaf.remove_at(pos);
        }

        self.rebalance(&mut memo, &mut guard, leaf_page)
    }

    /// Returns every record identifier stored under the given attribute
    /// value, in record-identifier order.
    pub fn get_entry(&self, attr: &[u8]) -> Result<Vec<RecordId>> {
        let mut scanner = self.scanner();
        scanner.open(Some(attr), true, Some(attr), true)?;
        let mut out = Vec::new();
        while let Some(rid) = scanner.next_entry()? {
            out.push(rid);
        }
        Ok(out)
    }

    fn current_root(&self, guard: &RootGuard<'_>) -> Result<PageNum> {
        match guard.as_deref() {
            Some(&root) => Ok(root),
            None => Err(KiteError::Internal("root lock released too early".to_string())),
        }
    }

    /// Persists the metadata page with the given root.
    fn persist_root(&self, new_root: PageNum) -> Result<()> {
        let header = IndexFileHeader {
            root_page: new_root,
            ..self.meta
        };
        let frame = self.pool.fetch_page(HEADER_PAGE_NUM)?;
        frame.copy_from(&header.to_bytes());
        self.pool.unpin_page(HEADER_PAGE_NUM, true);
        Ok(())
    }

    fn start_new_tree(&self, guard: &mut RootGuard<'_>, key: &[u8], rid: RecordId) -> Result<()> {
        let leaf_page = self.pool.disk().allocate_page()?;
        let mut memo = LatchMemo::new(self.pool.clone());
        let frame = memo.acquire_new(leaf_page)?;
        // Safety: acquire_new latched the fresh frame exclusively.
        let buf = unsafe { frame.data_mut() };
        let mut leaf = LeafView::init(&mut buf[..], self.scheme, INVALID_PAGE_NUM);
        leaf.insert_at(0, key, rid);

        if let Some(g) = guard.as_mut() {
            **g = leaf_page;
        }
        self.persist_root(leaf_page)?;
        debug!(root = leaf_page, "started new tree");
        Ok(())
    }

    /// Latches pages from the root down to the covering leaf in
    /// exclusive mode, releasing ancestors (and the root lock) whenever
    /// the just-latched node is safe for the operation.
    fn descend_exclusive(
        &self,
        memo: &mut LatchMemo,
        guard: &mut RootGuard<'_>,
        op: TreeOp,
        key: &[u8],
    ) -> Result<PageNum> {
        let mut current = self.current_root(guard)?;
        loop {
            let frame = memo.acquire(current, LatchMode::Exclusive)?;
            // Safety: the memo holds this page's exclusive latch.
            let buf = unsafe { frame.data_mut() };
            let node = NodeMut::attach(&mut buf[..], self.scheme, current)?;

            let is_root = node.parent() == INVALID_PAGE_NUM;
            if node.is_safe(op, is_root) {
                let held = memo.len();
                memo.release_front(held - 1);
                *guard = None;
            }

            match &node {
                NodeMut::Leaf(_) => return Ok(current),
                NodeMut::Internal(v) => {
                    current = v.child_at(v.lookup_child(&self.comparator, key));
                }
            }
        }
    }

    /// Latches shared down to the covering leaf, holding at most two
    /// levels at a time. Returns None for an empty tree.
    pub(crate) fn find_leaf_shared(
        &self,
        memo: &mut LatchMemo,
        target: SeekTarget<'_>,
    ) -> Result<Option<PageNum>> {
        let mut current = {
            let guard = self.root.read();
            let root = *guard;
            if root == INVALID_PAGE_NUM {
                return Ok(None);
            }
            // Latch the root page before the root lock drops so a
            // concurrent root change cannot slip in between.
            memo.acquire(root, LatchMode::Shared)?;
            root
        };

        loop {
            let frame = memo
                .frame(current)
                .ok_or_else(|| KiteError::Internal("page released mid-descent".to_string()))?;
            // Safety: the memo holds this page's shared latch.
            let buf = unsafe { frame.data() };
            if node_kind(&buf[..]) == NODE_KIND_LEAF {
                return Ok(Some(current));
            }

            let view = InternalView::new(&buf[..], self.scheme);
            let child = match target {
                SeekTarget::Key(key) => view.child_at(view.lookup_child(&self.comparator, key)),
                SeekTarget::Leftmost => view.child_at(0),
            };
            let child_frame = memo.acquire(child, LatchMode::Shared)?;
            // Safety: the memo holds the child's shared latch.
            let safe = {
                let cbuf = unsafe { child_frame.data() };
                match node_kind(&cbuf[..]) {
                    NODE_KIND_LEAF => {
                        LeafView::new(&cbuf[..], self.scheme).is_safe(TreeOp::Read, false)
                    }
                    _ => InternalView::new(&cbuf[..], self.scheme).is_safe(TreeOp::Read, false),
                }
            };
            if safe {
                memo.release_all_except(child);
            }
            current = child;
        }
    }

    /// Rewrites a child's parent pointer, latching it if this traversal
    /// has not already.
    fn reparent(&self, memo: &mut LatchMemo, child: PageNum, parent: PageNum) -> Result<()> {
        let frame = match memo.frame(child) {
            Some(frame) => frame,
            None => memo.acquire(child, LatchMode::Exclusive)?,
        };
        // Safety: the memo holds this page's exclusive latch.
        let buf = unsafe { frame.data_mut() };
        let mut node = NodeMut::attach(&mut buf[..], self.scheme, child)?;
        node.set_parent(parent);
        Ok(())
    }

    /// Registers a freshly split right node with its parent, splitting
    /// upward as needed.
    fn insert_into_parent(
        &self,
        memo: &mut LatchMemo,
        guard: &mut RootGuard<'_>,
        left_page: PageNum,
        separator: Vec<u8>,
        right_page: PageNum,
    ) -> Result<()> {
        let parent_page = {
            let frame = memo
                .frame(left_page)
                .ok_or_else(|| KiteError::Internal("split node not latched".to_string()))?;
            // Safety: the memo holds this page's exclusive latch.
            let buf = unsafe { frame.data_mut() };
            NodeMut::attach(&mut buf[..], self.scheme, left_page)?.parent()
        };

        if parent_page == INVALID_PAGE_NUM {
            // Root split: both halves go under a fresh internal root.
            let new_root = self.pool.disk().allocate_page()?;
            let frame = memo.acquire_new(new_root)?;
            // Safety: acquire_new latched the fresh frame exclusively.
            let buf = unsafe { frame.data_mut() };
            let mut root_node = InternalView::init(&mut buf[..], self.scheme, INVALID_PAGE_NUM);
            root_node.init_new_root(left_page, &separator, right_page);

            self.reparent(memo, left_page, new_root)?;
            self.reparent(memo, right_page, new_root)?;

            match guard.as_mut() {
                Some(g) => **g = new_root,
                None => {
                    return Err(KiteError::Internal(
                        "root lock released before root split".to_string(),
                    ))
                }
            }
            self.persist_root(new_root)?;
            debug!(root = new_root, left = left_page, right = right_page, "grew new root");
            return Ok(());
        }

        let parent_frame = memo
            .frame(parent_page)
            .ok_or_else(|| KiteError::Internal("parent not latched for split".to_string()))?;
        // Safety: the memo holds the parent's exclusive latch.
        let pbuf = unsafe { parent_frame.data_mut() };
        let mut parent = InternalView::new(&mut pbuf[..], self.scheme);

        if parent.size() < parent.max_size() {
            let index = parent
                .value_index(left_page)
                .ok_or_else(|| KiteError::Internal("split node missing from parent".to_string()))?;
            parent.insert_at(index + 1, &separator, right_page);
            self.reparent(memo, right_page, parent_page)?;
            return Ok(());
        }

        // Parent full: split it first, then place the new entry in the
        // half that holds the left node.
        let new_page = self.pool.disk().allocate_page()?;
        let new_frame = memo.acquire_new(new_page)?;
        // Safety: acquire_new latched the fresh frame exclusively.
        let nbuf = unsafe { new_frame.data_mut() };
        let mut new_node = InternalView::init(&mut nbuf[..], self.scheme, parent.parent());

        parent.move_half_to(&mut new_node);
        let promoted = new_node.key_at(0).to_vec();
        for child in new_node.children() {
            self.reparent(memo, child, new_page)?;
        }

        if let Some(index) = parent.value_index(left_page) {
            parent.insert_at(index + 1, &separator, right_page);
            self.reparent(memo, right_page, parent_page)?;
        } else if let Some(index) = new_node.value_index(left_page) {
            new_node.insert_at(index + 1, &separator, right_page);
            self.reparent(memo, right_page, new_page)?;
        } else {
            return Err(KiteError::Internal(
                "split node missing from both halves".to_string(),
            ));
        }

        debug!(left = parent_page, right = new_page, "split internal node");
        self.insert_into_parent(memo, guard, parent_page, promoted, new_page)
    }

    /// Restores occupancy invariants after a removal, merging or
    /// borrowing from a sibling and recursing upward when a merge
    /// removes a parent entry.
    fn rebalance(&self, memo: &mut LatchMemo, guard: &mut RootGuard<'_>, page: PageNum) -> Result<()> {
        let (parent_page, size, min_size, is_leaf) = {
            let frame = memo
                .frame(page)
                .ok_or_else(|| KiteError::Internal("node not latched for rebalance".to_string()))?;
            // Safety: the memo holds this page's exclusive latch.
            let buf = unsafe { frame.data_mut() };
            let node = NodeMut::attach(&mut buf[..], self.scheme, page)?;
            (node.parent(), node.size(), node.min_size(), node.is_leaf())
        };

        if parent_page == INVALID_PAGE_NUM {
            return self.adjust_root(memo, guard, page);
        }
        if size >= min_size {
            return Ok(());
        }

        let parent_frame = memo
            .frame(parent_page)
            .ok_or_else(|| KiteError::Internal("parent not latched for rebalance".to_string()))?;
        // Safety: the memo holds the parent's exclusive latch.
        let pbuf = unsafe { parent_frame.data_mut() };
        let mut parent = InternalView::new(&mut pbuf[..], self.scheme);

        let index = parent
            .value_index(page)
            .ok_or_else(|| KiteError::Internal("node missing from parent".to_string()))?;
        let sibling_is_left = index > 0;
        let sibling_page = if sibling_is_left {
            parent.child_at(index - 1)
        } else {
            if parent.size() < 2 {
                return Err(KiteError::Internal("non-root parent with one child".to_string()));
            }
            parent.child_at(index + 1)
        };

        let sibling_frame = memo.acquire(sibling_page, LatchMode::Exclusive)?;
        let node_frame = memo
            .frame(page)
            .ok_or_else(|| KiteError::Internal("node not latched for rebalance".to_string()))?;

        // Safety: both latches are held exclusively by the memo.
        let nbuf = unsafe { node_frame.data_mut() };
        let sbuf = unsafe { sibling_frame.data_mut() };

        let sibling_spare = {
            let sibling = NodeMut::attach(&mut sbuf[..], self.scheme, sibling_page)?;
            sibling.size() > sibling.min_size()
        };

        if sibling_spare {
            if is_leaf {
                let mut node = LeafView::new(&mut nbuf[..], self.scheme);
                let mut sibling = LeafView::new(&mut sbuf[..], self.scheme);
                if sibling_is_left {
                    sibling.move_last_to_front(&mut node);
                    let sep = node.key_at(0).to_vec();
                    parent.set_key_at(index, &sep);
                } else {
                    sibling.move_first_to_end(&mut node);
                    let sep = sibling.key_at(0).to_vec();
                    parent.set_key_at(index + 1, &sep);
                }
            } else {
                let mut node = InternalView::new(&mut nbuf[..], self.scheme);
                let mut sibling = InternalView::new(&mut sbuf[..], self.scheme);
                if sibling_is_left {
                    // Materialize the separator into the placeholder
                    // before it shifts out of slot 0.
                    let sep = parent.key_at(index).to_vec();
                    node.set_key_at(0, &sep);
                    sibling.move_last_to_front(&mut node);
                    let new_sep = node.key_at(0).to_vec();
                    parent.set_key_at(index, &new_sep);
                    let moved = node.child_at(0);
                    self.reparent(memo, moved, page)?;
                } else {
                    let sep = parent.key_at(index + 1).to_vec();
                    sibling.set_key_at(0, &sep);
                    let moved = sibling.child_at(0);
                    sibling.move_first_to_end(&mut node);
                    let new_sep = sibling.key_at(0).to_vec();
                    parent.set_key_at(index + 1, &new_sep);
                    self.reparent(memo, moved, page)?;
                }
            }
            debug!(page, sibling = sibling_page, "redistributed entries");
            return Ok(());
        }

        // Coalesce: the right node of the pair merges into the left.
        let (left_page, right_page, right_index) = if sibling_is_left {
            (sibling_page, page, index)
        } else {
            (page, sibling_page, index + 1)
        };
        let (lbuf, rbuf) = if sibling_is_left {
            (sbuf, nbuf)
        } else {
            (nbuf, sbuf)
        };

        if is_leaf {
            let mut left = LeafView::new(&mut lbuf[..], self.scheme);
            let mut right = LeafView::new(&mut rbuf[..], self.scheme);
            left.set_next(right.next());
            right.move_to(&mut left);
        } else {
            let mut left = InternalView::new(&mut lbuf[..], self.scheme);
            let mut right = InternalView::new(&mut rbuf[..], self.scheme);
            let sep = parent.key_at(right_index).to_vec();
            right.set_key_at(0, &sep);
            let moved = right.children();
            right.move_to(&mut left);
            for child in moved {
                self.reparent(memo, child, left_page)?;
            }
        }

        parent.remove_at(right_index);
        memo.dispose(right_page);
        debug!(left = left_page, right = right_page, "coalesced nodes");

        self.rebalance(memo, guard, parent_page)
    }

    /// Shrinks the tree when the root collapses: an internal root left
    /// with one child hands the root to that child; an emptied leaf root
    /// empties the tree.
    fn adjust_root(&self, memo: &mut LatchMemo, guard: &mut RootGuard<'_>, root_page: PageNum) -> Result<()> {
        let (kind, size, first_child) = {
            let frame = memo
                .frame(root_page)
                .ok_or_else(|| KiteError::Internal("root not latched for adjust".to_string()))?;
            // Safety: the memo holds the root's exclusive latch.
            let buf = unsafe { frame.data() };
            match node_kind(&buf[..]) {
                NODE_KIND_INTERNAL => {
                    let view = InternalView::new(&buf[..], self.scheme);
                    (NODE_KIND_INTERNAL, view.size(), view.child_at(0))
                }
                _ => {
                    let view = LeafView::new(&buf[..], self.scheme);
                    (NODE_KIND_LEAF, view.size(), INVALID_PAGE_NUM)
                }
            }
        };

        let new_root = match (kind, size) {
            (NODE_KIND_INTERNAL, 1) => first_child,
            (NODE_KIND_LEAF, 0) => INVALID_PAGE_NUM,
            _ => return Ok(()),
        };

        if new_root != INVALID_PAGE_NUM {
            self.reparent(memo, new_root, INVALID_PAGE_NUM)?;
        }

        match guard.as_mut() {
            Some(g) => **g = new_root,
            None => {
                return Err(KiteError::Internal(
                    "root lock released before root collapse".to_string(),
                ))
            }
        }
        self.persist_root(new_root)?;
        memo.dispose(root_page);
        debug!(old = root_page, new = new_root, "collapsed root");
        Ok(())
    }

    /// Reads one page into an owned buffer, for diagnostics only.
    fn read_node(&self, page: PageNum) -> Result<Vec<u8>> {
        let frame = self.pool.fetch_page(page)?;
        let mut buf = vec![0u8; PAGE_SIZE];
        frame.copy_to(&mut buf);
        self.pool.unpin_page(page, false);
        Ok(buf)
    }

    /// Renders every node level by level. Not concurrency-safe.
    pub fn print_tree(&self) -> Result<String> {
        let root = *self.root.read();
        let mut out = format!("{}\n", self.meta_line(root));
        if root == INVALID_PAGE_NUM {
            out.push_str("<empty>\n");
            return Ok(out);
        }

        let mut level = vec![root];
        let mut depth = 0;
        while !level.is_empty() {
            let mut next_level = Vec::new();
            out.push_str(&format!("level {depth}:\n"));
            for &page in &level {
                let buf = self.read_node(page)?;
                if node_kind(&buf) == NODE_KIND_LEAF {
                    out.push_str(&self.render_leaf(page, &buf));
                } else {
                    let view = InternalView::new(&buf[..], self.scheme);
                    let keys: Vec<String> = (0..view.size())
                        .map(|i| {
                            if i == 0 {
                                "*".to_string()
                            } else {
                                self.comparator.format_key(view.key_at(i))
                            }
                        })
                        .collect();
                    out.push_str(&format!(
                        "  page {page} internal parent={} children={:?} keys=[{}]\n",
                        view.parent(),
                        view.children(),
                        keys.join(", ")
                    ));
                    next_level.extend(view.children());
                }
            }
            level = next_level;
            depth += 1;
        }
        Ok(out)
    }

    /// Renders the leaf chain left to right. Not concurrency-safe.
    pub fn print_leafs(&self) -> Result<String> {
        let root = *self.root.read();
        if root == INVALID_PAGE_NUM {
            return Ok("<empty>\n".to_string());
        }

        let mut page = root;
        loop {
            let buf = self.read_node(page)?;
            if node_kind(&buf) == NODE_KIND_LEAF {
                break;
            }
            page = InternalView::new(&buf[..], self.scheme).child_at(0);
        }

        let mut out = String::new();
        while page != INVALID_PAGE_NUM {
            let buf = self.read_node(page)?;
            out.push_str(&self.render_leaf(page, &buf));
            page = LeafView::new(&buf[..], self.scheme).next();
        }
        Ok(out)
    }

    fn meta_line(&self, root: PageNum) -> String {
        format!(
            "index root={root} leaf_max={} internal_max={} attr={}({})",
            self.scheme.leaf_max_size,
            self.scheme.internal_max_size,
            self.comparator.attr_type(),
            self.comparator.attr_length()
        )
    }

    fn render_leaf(&self, page: PageNum, buf: &[u8]) -> String {
        let view = LeafView::new(buf, self.scheme);
        let keys: Vec<String> = (0..view.size())
            .map(|i| self.comparator.format_key(view.key_at(i)))
            .collect();
        format!(
            "  page {page} leaf parent={} next={} keys=[{}]\n",
            view.parent(),
            view.next(),
            keys.join(", ")
        )
    }

    /// Checks structural invariants over the whole tree: key ordering,
    /// parent pointers, separator containment, size bounds, and leaf
    /// chain integrity. Not concurrency-safe; reports without repairing.
    pub fn validate(&self) -> Result<()> {
        let root = *self.root.read();
        if root == INVALID_PAGE_NUM {
            return Ok(());
        }

        let mut issues = Vec::new();
        let mut leaves = Vec::new();
        self.validate_node(root, INVALID_PAGE_NUM, None, None, true, &mut leaves, &mut issues)?;

        // The leaf chain must visit exactly the leaves in key order.
        let mut chained = Vec::new();
        if let Some(&first) = leaves.first() {
            let mut page = first;
            while page != INVALID_PAGE_NUM {
                chained.push(page);
                let buf = self.read_node(page)?;
                if node_kind(&buf) != NODE_KIND_LEAF {
                    issues.push(format!("leaf chain reaches non-leaf page {page}"));
                    break;
                }
                page = LeafView::new(&buf[..], self.scheme).next();
            }
            if chained != leaves {
                issues.push(format!(
                    "leaf chain {chained:?} disagrees with tree order {leaves:?}"
                ));
            }
        }

        // Concatenated leaf keys strictly increase.
        let mut prev: Option<Vec<u8>> = None;
        for &page in &chained {
            let buf = self.read_node(page)?;
            let view = LeafView::new(&buf[..], self.scheme);
            for i in 0..view.size() {
                let key = view.key_at(i);
                if let Some(p) = &prev {
                    if self.comparator.compare(p, key) != Ordering::Less {
                        issues.push(format!(
                            "leaf chain not increasing at page {page} slot {i}"
                        ));
                    }
                }
                prev = Some(key.to_vec());
            }
        }

        if issues.is_empty() {
            Ok(())
        } else {
            Err(KiteError::InvalidState(issues.join("; ")))
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn validate_node(
        &self,
        page: PageNum,
        expected_parent: PageNum,
        lower: Option<&[u8]>,
        upper: Option<&[u8]>,
        is_root: bool,
        leaves: &mut Vec<PageNum>,
        issues: &mut Vec<String>,
    ) -> Result<()> {
        let buf = self.read_node(page)?;

        if node_kind(&buf) == NODE_KIND_LEAF {
            let view = LeafView::new(&buf[..], self.scheme);
            if view.parent() != expected_parent {
                issues.push(format!(
                    "leaf {page} parent={} expected {expected_parent}",
                    view.parent()
                ));
            }
            let min = if is_root { 1 } else { view.min_size() };
            if view.size() < min || view.size() > view.max_size() {
                issues.push(format!("leaf {page} size {} outside bounds", view.size()));
            }
            for i in 0..view.size() {
                let key = view.key_at(i);
                if i > 0 && self.comparator.compare(view.key_at(i - 1), key) != Ordering::Less {
                    issues.push(format!("leaf {page} keys not increasing at slot {i}"));
                }
                if let Some(lo) = lower {
                    if self.comparator.compare(key, lo) == Ordering::Less {
                        issues.push(format!("leaf {page} slot {i} below separator"));
                    }
                }
                if let Some(hi) = upper {
                    if self.comparator.compare(key, hi) != Ordering::Less {
                        issues.push(format!("leaf {page} slot {i} above separator"));
                    }
                }
            }
            leaves.push(page);
            return Ok(());
        }

        let view = InternalView::new(&buf[..], self.scheme);
        if view.parent() != expected_parent {
            issues.push(format!(
                "internal {page} parent={} expected {expected_parent}",
                view.parent()
            ));
        }
        let min = if is_root { 2 } else { view.min_size() };
        if view.size() < min || view.size() > view.max_size() {
            issues.push(format!(
                "internal {page} size {} outside bounds",
                view.size()
            ));
        }
        for i in 1..view.size() {
            let key = view.key_at(i);
            if i > 1 && self.comparator.compare(view.key_at(i - 1), key) != Ordering::Less {
                issues.push(format!("internal {page} keys not increasing at slot {i}"));
            }
            if let Some(lo) = lower {
                if self.comparator.compare(key, lo) == Ordering::Less {
                    issues.push(format!("internal {page} slot {i} below separator"));
                }
            }
            if let Some(hi) = upper {
                if self.comparator.compare(key, hi) != Ordering::Less {
                    issues.push(format!("internal {page} slot {i} above separator"));
                }
            }
        }

        for i in 0..view.size() {
            let child_lower = if i == 0 { lower } else { Some(view.key_at(i)) };
            let child_upper = if i + 1 == view.size() {
                upper
            } else {
                Some(view.key_at(i + 1))
            };
            self.validate_node(
                view.child_at(i),
                page,
                child_lower,
                child_upper,
                false,
                leaves,
                issues,
            )?;
        }
        Ok(())
    }
}
