//! Buffer pool manager.

use crate::disk::DiskManager;
use crate::frame::{Frame, FrameId};
use crate::replacer::ClockReplacer;
use kite_common::page::{PageNum, PAGE_SIZE};
use kite_common::{KiteError, Result, StorageConfig};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Configuration for the buffer pool.
#[derive(Debug, Clone)]
pub struct BufferPoolConfig {
    /// Number of frames in the pool.
    pub num_frames: usize,
}

impl Default for BufferPoolConfig {
    fn default() -> Self {
        Self { num_frames: 1024 }
    }
}

impl BufferPoolConfig {
    /// Derives a pool configuration from the storage configuration.
    pub fn from_storage(config: &StorageConfig) -> Self {
        Self {
            num_frames: config.buffer_pool_frames,
        }
    }
}

/// Buffer pool manager.
///
/// Manages a fixed-size pool of page frames over one disk manager:
/// - Page number to frame ID mapping
/// - Free frame list for new pages
/// - Clock replacement for eviction, with write-back of dirty victims
/// - Pin counting for concurrent access
pub struct BufferPool {
    /// Configuration.
    config: BufferPoolConfig,
    /// Backing file.
    disk: Arc<DiskManager>,
    /// Array of buffer frames.
    frames: Vec<Arc<Frame>>,
    /// Page table and free list, guarded together.
    inner: Mutex<PoolInner>,
    /// Page replacement policy.
    replacer: ClockReplacer,
}

struct PoolInner {
    /// Page number to frame ID mapping.
    page_table: HashMap<PageNum, FrameId>,
    /// List of free frame IDs.
    free_list: Vec<FrameId>,
}

impl BufferPool {
    /// Creates a new buffer pool over the given disk manager.
    pub fn new(disk: Arc<DiskManager>, config: BufferPoolConfig) -> Self {
        let num_frames = config.num_frames;

        let frames: Vec<_> = (0..num_frames)
            .map(|i| Arc::new(Frame::new(FrameId(i as u32))))
            .collect();

        // All frames start in the free list.
        let free_list: Vec<_> = (0..num_frames).map(|i| FrameId(i as u32)).collect();

        Self {
            config,
            disk,
            frames,
            inner: Mutex::new(PoolInner {
                page_table: HashMap::with_capacity(num_frames),
                free_list,
            }),
            replacer: ClockReplacer::new(num_frames),
        }
    }

    /// Returns the underlying disk manager.
    pub fn disk(&self) -> &Arc<DiskManager> {
        &self.disk
    }

    /// Returns the number of frames in the pool.
    pub fn num_frames(&self) -> usize {
        self.config.num_frames
    }

    /// Returns the number of free frames.
    pub fn free_count(&self) -> usize {
        self.inner.lock().free_list.len()
    }

    /// Returns the number of pages currently in the pool.
    pub fn page_count(&self) -> usize {
        self.inner.lock().page_table.len()
    }

    /// Checks if a page is in the buffer pool.
    pub fn contains(&self, page_num: PageNum) -> bool {
        self.inner.lock().page_table.contains_key(&page_num)
    }

    /// Fetches a page, reading it from disk on a miss.
    ///
    /// The returned frame is pinned; callers release it via `unpin_page`.
    pub fn fetch_page(&self, page_num: PageNum) -> Result<Arc<Frame>> {
        let mut inner = self.inner.lock();

        if let Some(&frame_id) = inner.page_table.get(&page_num) {
            let frame = &self.frames[frame_id.0 as usize];
            frame.pin();
            self.replacer.record_access(frame_id);
            return Ok(frame.clone());
        }

        if page_num >= self.disk.num_pages() {
            return Err(KiteError::PageNotFound { page_num });
        }

        let frame_id = self.allocate_frame(&mut inner)?;
        let frame = &self.frames[frame_id.0 as usize];

        let mut buf = Box::new([0u8; PAGE_SIZE]);
        if let Err(e) = self.disk.read_page(page_num, &mut buf) {
            inner.free_list.push(frame_id);
            return Err(e);
        }

        frame.set_page_num(Some(page_num));
        frame.pin();
        frame.copy_from(&buf[..]);
        inner.page_table.insert(page_num, frame_id);
        self.replacer.record_access(frame_id);

        Ok(frame.clone())
    }

    /// Inserts a freshly allocated page into the pool without a disk read.
    ///
    /// If the page is already resident, returns the existing frame.
    /// The returned frame is pinned and zeroed.
    pub fn new_page(&self, page_num: PageNum) -> Result<Arc<Frame>> {
        let mut inner = self.inner.lock();

        if let Some(&frame_id) = inner.page_table.get(&page_num) {
            let frame = &self.frames[frame_id.0 as usize];
            frame.pin();
            self.replacer.record_access(frame_id);
            return Ok(frame.clone());
        }

        let frame_id = self.allocate_frame(&mut inner)?;
        let frame = &self.frames[frame_id.0 as usize];

        frame.set_page_num(Some(page_num));
        frame.pin();
        inner.page_table.insert(page_num, frame_id);
        self.replacer.record_access(frame_id);

        Ok(frame.clone())
    }

    /// Allocates a frame from the free list, evicting if necessary.
    ///
    /// Dirty victims are written back to disk before reuse. The returned
    /// frame is reset (empty, unpinned, zeroed).
    fn allocate_frame(&self, inner: &mut PoolInner) -> Result<FrameId> {
        if let Some(frame_id) = inner.free_list.pop() {
            return Ok(frame_id);
        }

        let victim_id = self
            .replacer
            .evict(|fid| {
                let frame = &self.frames[fid.0 as usize];
                !frame.is_empty() && frame.pin_count() == 0
            })
            .ok_or(KiteError::BufferPoolFull)?;

        let frame = &self.frames[victim_id.0 as usize];
        let old_page = frame.page_num();

        if frame.is_dirty() {
            if let Some(page_num) = old_page {
                let mut buf = Box::new([0u8; PAGE_SIZE]);
                frame.copy_to(&mut buf[..]);
                self.disk.write_page(page_num, &buf)?;
                debug!(page_num, victim = %victim_id, "wrote back dirty page on eviction");
            }
        }

        if let Some(old_page) = old_page {
            inner.page_table.remove(&old_page);
        }
        frame.reset();

        Ok(victim_id)
    }

    /// Unpins a page, optionally marking it dirty.
    ///
    /// Returns false if the page is not resident.
    pub fn unpin_page(&self, page_num: PageNum, is_dirty: bool) -> bool {
        let inner = self.inner.lock();
        if let Some(&frame_id) = inner.page_table.get(&page_num) {
            let frame = &self.frames[frame_id.0 as usize];
            if is_dirty {
                frame.set_dirty(true);
            }
            frame.unpin();
            return true;
        }
        false
    }

    /// Writes a resident dirty page to disk.
    ///
    /// Returns true if the page was written.
    pub fn flush_page(&self, page_num: PageNum) -> Result<bool> {
        let inner = self.inner.lock();
        if let Some(&frame_id) = inner.page_table.get(&page_num) {
            let frame = &self.frames[frame_id.0 as usize];
            if frame.is_dirty() {
                let mut buf = Box::new([0u8; PAGE_SIZE]);
                frame.copy_to(&mut buf[..]);
                self.disk.write_page(page_num, &buf)?;
                frame.set_dirty(false);
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Writes all resident dirty pages to disk.
    ///
    /// Returns the number of pages written.
    pub fn flush_all(&self) -> Result<usize> {
        let resident: Vec<(PageNum, FrameId)> = {
            let inner = self.inner.lock();
            inner.page_table.iter().map(|(&p, &f)| (p, f)).collect()
        };

        let mut flushed = 0;
        for (page_num, frame_id) in resident {
            let frame = &self.frames[frame_id.0 as usize];
            if frame.is_dirty() {
                let mut buf = Box::new([0u8; PAGE_SIZE]);
                frame.copy_to(&mut buf[..]);
                self.disk.write_page(page_num, &buf)?;
                frame.set_dirty(false);
                flushed += 1;
            }
        }
        Ok(flushed)
    }

    /// Drops a page from the buffer pool without writing it back.
    ///
    /// Returns false if the page is pinned or not resident.
    pub fn delete_page(&self, page_num: PageNum) -> bool {
        let mut inner = self.inner.lock();
        if let Some(&frame_id) = inner.page_table.get(&page_num) {
            let frame = &self.frames[frame_id.0 as usize];
            if frame.is_pinned() {
                return false;
            }

            inner.page_table.remove(&page_num);
            self.replacer.remove(frame_id);
            frame.reset();
            inner.free_list.push(frame_id);
            return true;
        }
        false
    }

    /// Returns statistics about the buffer pool.
    pub fn stats(&self) -> BufferPoolStats {
        let inner = self.inner.lock();
        let mut pinned_count = 0;
        let mut dirty_count = 0;

        for &frame_id in inner.page_table.values() {
            let frame = &self.frames[frame_id.0 as usize];
            if frame.is_pinned() {
                pinned_count += 1;
            }
            if frame.is_dirty() {
                dirty_count += 1;
            }
        }

        BufferPoolStats {
            total_frames: self.config.num_frames,
            free_frames: inner.free_list.len(),
            used_frames: inner.page_table.len(),
            pinned_frames: pinned_count,
            dirty_frames: dirty_count,
        }
    }
}

/// Statistics about the buffer pool.
#[derive(Debug, Clone)]
pub struct BufferPoolStats {
    /// Total number of frames.
    pub total_frames: usize,
    /// Number of free frames.
    pub free_frames: usize,
    /// Number of frames with pages.
    pub used_frames: usize,
    /// Number of pinned frames.
    pub pinned_frames: usize,
    /// Number of dirty frames.
    pub dirty_frames: usize,
}
