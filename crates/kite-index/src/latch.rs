//! Latch bookkeeping for tree traversals.
//!
//! A traversal latches pages top-down and releases ancestors as soon as
//! a child is known to absorb the operation. `LatchMemo` records every
//! latched frame in acquisition order so the release discipline is
//! explicit: release a prefix (safe child found), release everything
//! (operation done), or release all but one page (leaf-chain stepping).
//!
//! Pages emptied by rebalancing cannot be returned to the pool while
//! their latches are held, so the memo queues them and disposes on drop,
//! after all latches and pins are gone.

use kite_buffer::{BufferPool, Frame};
use kite_common::page::PageNum;
use kite_common::Result;
use std::sync::Arc;

/// Latch acquisition mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LatchMode {
    Shared,
    Exclusive,
}

struct HeldLatch {
    page_num: PageNum,
    frame: Arc<Frame>,
    mode: LatchMode,
}

/// Ordered record of latched pages for one tree operation.
pub struct LatchMemo {
    pool: Arc<BufferPool>,
    held: Vec<HeldLatch>,
    disposed: Vec<PageNum>,
}

impl LatchMemo {
    /// Creates an empty memo over the given pool.
    pub fn new(pool: Arc<BufferPool>) -> Self {
        Self {
            pool,
            held: Vec::new(),
            disposed: Vec::new(),
        }
    }

    /// Number of latches currently held.
    pub fn len(&self) -> usize {
        self.held.len()
    }

    /// Returns true if no latches are held.
    pub fn is_empty(&self) -> bool {
        self.held.is_empty()
    }

    /// Fetches and latches a page, recording it in the memo.
    ///
    /// The frame stays pinned and latched until released through the
    /// memo.
    pub fn acquire(&mut self, page_num: PageNum, mode: LatchMode) -> Result<Arc<Frame>> {
        let frame = self.pool.fetch_page(page_num)?;
        match mode {
            LatchMode::Shared => frame.latch_shared(),
            LatchMode::Exclusive => frame.latch_exclusive(),
        }
        self.held.push(HeldLatch {
            page_num,
            frame: frame.clone(),
            mode,
        });
        Ok(frame)
    }

    /// Allocates a pool frame for a brand-new page (no disk read) and
    /// latches it exclusively.
    pub fn acquire_new(&mut self, page_num: PageNum) -> Result<Arc<Frame>> {
        let frame = self.pool.new_page(page_num)?;
        frame.latch_exclusive();
        self.held.push(HeldLatch {
            page_num,
            frame: frame.clone(),
            mode: LatchMode::Exclusive,
        });
        Ok(frame)
    }

    /// Returns the held frame for a page, if this memo latched it.
    pub fn frame(&self, page_num: PageNum) -> Option<Arc<Frame>> {
        self.held
            .iter()
            .find(|h| h.page_num == page_num)
            .map(|h| h.frame.clone())
    }

    fn release_one(&self, held: &HeldLatch) {
        let dirty = match held.mode {
            LatchMode::Shared => false,
            LatchMode::Exclusive => true,
        };
        match held.mode {
            // Safety: the memo acquired this latch in the stored mode and
            // nothing else releases it.
            LatchMode::Shared => unsafe { held.frame.unlatch_shared() },
            LatchMode::Exclusive => unsafe { held.frame.unlatch_exclusive() },
        }
        self.pool.unpin_page(held.page_num, dirty);
    }

    /// Releases the oldest `count` latches (the highest ancestors).
    pub fn release_front(&mut self, count: usize) {
        let count = count.min(self.held.len());
        for held in self.held.drain(..count).collect::<Vec<_>>() {
            self.release_one(&held);
        }
    }

    /// Releases every held latch.
    pub fn release_all(&mut self) {
        let drained: Vec<_> = self.held.drain(..).collect();
        for held in &drained {
            self.release_one(held);
        }
    }

    /// Releases every held latch except the one on `page_num`.
    pub fn release_all_except(&mut self, page_num: PageNum) {
        let (keep, drop): (Vec<_>, Vec<_>) = self
            .held
            .drain(..)
            .partition(|h| h.page_num == page_num);
        for held in &drop {
            self.release_one(held);
        }
        self.held = keep;
    }

    /// Queues a page for removal from the pool once all latches are
    /// released.
    pub fn dispose(&mut self, page_num: PageNum) {
        self.disposed.push(page_num);
    }
}

impl Drop for LatchMemo {
    fn drop(&mut self) {
        if !self.is_empty() {
            self.release_all();
        }
        for page_num in self.disposed.drain(..) {
            self.pool.delete_page(page_num);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kite_buffer::{BufferPoolConfig, DiskManager};
    use tempfile::tempdir;

    fn create_test_pool() -> (tempfile::TempDir, Arc<BufferPool>) {
        let dir = tempdir().unwrap();
        let disk = Arc::new(DiskManager::create(dir.path().join("latch.kite")).unwrap());
        let pool = Arc::new(BufferPool::new(disk, BufferPoolConfig { num_frames: 8 }));
        (dir, pool)
    }

    #[test]
    fn test_acquire_and_release_all() {
        let (_dir, pool) = create_test_pool();
        let p1 = pool.disk().allocate_page().unwrap();
        let p2 = pool.disk().allocate_page().unwrap();

        let mut memo = LatchMemo::new(pool.clone());
        let f1 = memo.acquire(p1, LatchMode::Shared).unwrap();
        let f2 = memo.acquire(p2, LatchMode::Exclusive).unwrap();

        assert_eq!(memo.len(), 2);
        assert!(f1.is_pinned());
        assert!(f2.is_pinned());

        memo.release_all();
        assert!(memo.is_empty());
        assert!(!f1.is_pinned());
        assert!(!f2.is_pinned());
        // Exclusive release marks the page dirty.
        assert!(f2.is_dirty());
        assert!(!f1.is_dirty());
    }

    #[test]
    fn test_release_front_keeps_descendants() {
        let (_dir, pool) = create_test_pool();
        let pages: Vec<_> = (0..3)
            .map(|_| pool.disk().allocate_page().unwrap())
            .collect();

        let mut memo = LatchMemo::new(pool.clone());
        for &p in &pages {
            memo.acquire(p, LatchMode::Exclusive).unwrap();
        }

        memo.release_front(2);
        assert_eq!(memo.len(), 1);
        assert!(memo.frame(pages[2]).is_some());
        assert!(memo.frame(pages[0]).is_none());

        // Released ancestors can be relatched.
        let f0 = pool.fetch_page(pages[0]).unwrap();
        f0.latch_exclusive();
        unsafe { f0.unlatch_exclusive() };
        pool.unpin_page(pages[0], false);
    }

    #[test]
    fn test_release_all_except() {
        let (_dir, pool) = create_test_pool();
        let p1 = pool.disk().allocate_page().unwrap();
        let p2 = pool.disk().allocate_page().unwrap();

        let mut memo = LatchMemo::new(pool.clone());
        memo.acquire(p1, LatchMode::Shared).unwrap();
        let f2 = memo.acquire(p2, LatchMode::Shared).unwrap();

        memo.release_all_except(p2);
        assert_eq!(memo.len(), 1);
        assert!(f2.is_pinned());
        assert!(memo.frame(p1).is_none());
    }

    #[test]
    fn test_drop_releases_latches() {
        let (_dir, pool) = create_test_pool();
        let p1 = pool.disk().allocate_page().unwrap();

        let frame = {
            let mut memo = LatchMemo::new(pool.clone());
            memo.acquire(p1, LatchMode::Exclusive).unwrap()
        };

        assert!(!frame.is_pinned());
        // Latch must be free again.
        frame.latch_exclusive();
        unsafe { frame.unlatch_exclusive() };
    }

    #[test]
    fn test_dispose_deferred_until_drop() {
        let (_dir, pool) = create_test_pool();
        let p1 = pool.disk().allocate_page().unwrap();

        {
            let mut memo = LatchMemo::new(pool.clone());
            memo.acquire(p1, LatchMode::Exclusive).unwrap();
            memo.dispose(p1);
            // Still resident while the latch is held.
            assert!(pool.contains(p1));
        }

        assert!(!pool.contains(p1));
    }

    #[test]
    fn test_acquire_new_page() {
        let (_dir, pool) = create_test_pool();
        let p1 = pool.disk().allocate_page().unwrap();

        let mut memo = LatchMemo::new(pool.clone());
        let frame = memo.acquire_new(p1).unwrap();
        assert_eq!(frame.page_num(), Some(p1));
        assert!(frame.is_pinned());
        memo.release_all();
        assert!(frame.is_dirty());
    }
}
