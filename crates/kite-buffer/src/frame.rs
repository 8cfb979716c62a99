//! Buffer frame management.

use kite_common::page::{PageNum, INVALID_PAGE_NUM, PAGE_SIZE};
use parking_lot::lock_api::RawRwLock as _;
use parking_lot::RawRwLock;
use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

/// Unique identifier for a frame in the buffer pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameId(pub u32);

impl FrameId {
    /// Invalid frame ID.
    pub const INVALID: FrameId = FrameId(u32::MAX);

    /// Returns true if this is a valid frame ID.
    pub fn is_valid(&self) -> bool {
        *self != Self::INVALID
    }
}

impl std::fmt::Display for FrameId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "frame:{}", self.0)
    }
}

/// A frame in the buffer pool holding a single page.
///
/// Each frame contains:
/// - The page data (PAGE_SIZE bytes) behind a raw reader/writer latch
/// - Metadata for buffer management (pin count, dirty flag, etc.)
///
/// The latch is a raw lock rather than an RwLock guard pair because
/// traversals hold latches across function boundaries and release them
/// out of lexical scope; callers access the data through the unsafe
/// `data`/`data_mut` accessors while the latch is held.
pub struct Frame {
    /// Frame identifier.
    frame_id: FrameId,
    /// The page currently stored in this frame (INVALID_PAGE_NUM = none).
    page_num: AtomicU32,
    /// Number of users currently accessing this page.
    pin_count: AtomicU32,
    /// Whether the page has been modified.
    is_dirty: AtomicBool,
    /// Reference bit for clock replacement.
    reference_bit: AtomicBool,
    /// Per-page latch guarding `data`.
    latch: RawRwLock,
    /// Page data buffer.
    data: UnsafeCell<Box<[u8; PAGE_SIZE]>>,
}

// Data access is guarded by `latch`; metadata is atomic.
unsafe impl Send for Frame {}
unsafe impl Sync for Frame {}

impl Frame {
    /// Creates a new empty frame.
    pub fn new(frame_id: FrameId) -> Self {
        Self {
            frame_id,
            page_num: AtomicU32::new(INVALID_PAGE_NUM),
            pin_count: AtomicU32::new(0),
            is_dirty: AtomicBool::new(false),
            reference_bit: AtomicBool::new(false),
            latch: RawRwLock::INIT,
            data: UnsafeCell::new(Box::new([0u8; PAGE_SIZE])),
        }
    }

    /// Returns the frame ID.
    #[inline]
    pub fn frame_id(&self) -> FrameId {
        self.frame_id
    }

    /// Returns the page number currently stored in this frame.
    #[inline]
    pub fn page_num(&self) -> Option<PageNum> {
        let pn = self.page_num.load(Ordering::Acquire);
        if pn == INVALID_PAGE_NUM {
            None
        } else {
            Some(pn)
        }
    }

    /// Sets the page number for this frame.
    #[inline]
    pub fn set_page_num(&self, page_num: Option<PageNum>) {
        self.page_num
            .store(page_num.unwrap_or(INVALID_PAGE_NUM), Ordering::Release);
    }

    /// Returns the current pin count.
    #[inline]
    pub fn pin_count(&self) -> u32 {
        self.pin_count.load(Ordering::Acquire)
    }

    /// Increments the pin count and returns the previous pin count.
    #[inline]
    pub fn pin(&self) -> u32 {
        let prev = self.pin_count.fetch_add(1, Ordering::AcqRel);
        self.reference_bit.store(true, Ordering::Relaxed);
        prev
    }

    /// Decrements the pin count.
    ///
    /// Returns the new pin count.
    #[inline]
    pub fn unpin(&self) -> u32 {
        let prev = self.pin_count.fetch_sub(1, Ordering::AcqRel);
        if prev == 0 {
            // Underflow protection: restore to 0
            self.pin_count.store(0, Ordering::Release);
            return 0;
        }
        prev - 1
    }

    /// Returns true if this frame is pinned.
    #[inline]
    pub fn is_pinned(&self) -> bool {
        self.pin_count.load(Ordering::Acquire) > 0
    }

    /// Returns true if this frame is dirty.
    #[inline]
    pub fn is_dirty(&self) -> bool {
        self.is_dirty.load(Ordering::Acquire)
    }

    /// Marks this frame as dirty.
    #[inline]
    pub fn set_dirty(&self, dirty: bool) {
        self.is_dirty.store(dirty, Ordering::Release);
    }

    /// Returns the reference bit value.
    #[inline]
    pub fn reference_bit(&self) -> bool {
        self.reference_bit.load(Ordering::Relaxed)
    }

    /// Sets the reference bit.
    #[inline]
    pub fn set_reference_bit(&self, value: bool) {
        self.reference_bit.store(value, Ordering::Relaxed);
    }

    /// Returns true if this frame is empty (no page loaded).
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.page_num.load(Ordering::Acquire) == INVALID_PAGE_NUM
    }

    /// Acquires the page latch in shared mode, blocking.
    #[inline]
    pub fn latch_shared(&self) {
        self.latch.lock_shared();
    }

    /// Acquires the page latch in exclusive mode, blocking.
    #[inline]
    pub fn latch_exclusive(&self) {
        self.latch.lock_exclusive();
    }

    /// Releases a shared latch.
    ///
    /// # Safety
    /// The caller must hold the latch in shared mode.
    #[inline]
    pub unsafe fn unlatch_shared(&self) {
        unsafe { self.latch.unlock_shared() }
    }

    /// Releases an exclusive latch.
    ///
    /// # Safety
    /// The caller must hold the latch in exclusive mode.
    #[inline]
    pub unsafe fn unlatch_exclusive(&self) {
        unsafe { self.latch.unlock_exclusive() }
    }

    /// Returns a shared view of the page data.
    ///
    /// # Safety
    /// The caller must hold the latch (either mode) for the duration of
    /// the returned borrow and keep the frame pinned.
    #[inline]
    pub unsafe fn data(&self) -> &[u8; PAGE_SIZE] {
        unsafe { &*self.data.get() }
    }

    /// Returns a mutable view of the page data.
    ///
    /// # Safety
    /// The caller must hold the latch in exclusive mode for the duration
    /// of the returned borrow and keep the frame pinned.
    #[allow(clippy::mut_from_ref)]
    #[inline]
    pub unsafe fn data_mut(&self) -> &mut [u8; PAGE_SIZE] {
        unsafe { &mut *self.data.get() }
    }

    /// Copies data into the frame, taking the latch internally.
    #[inline]
    pub fn copy_from(&self, src: &[u8]) {
        self.latch_exclusive();
        let len = src.len().min(PAGE_SIZE);
        unsafe {
            self.data_mut()[..len].copy_from_slice(&src[..len]);
            self.unlatch_exclusive();
        }
    }

    /// Copies data out of the frame, taking the latch internally.
    #[inline]
    pub fn copy_to(&self, dst: &mut [u8]) {
        self.latch_shared();
        let len = dst.len().min(PAGE_SIZE);
        unsafe {
            dst[..len].copy_from_slice(&self.data()[..len]);
            self.unlatch_shared();
        }
    }

    /// Resets the frame to empty state.
    pub fn reset(&self) {
        self.page_num.store(INVALID_PAGE_NUM, Ordering::Release);
        self.pin_count.store(0, Ordering::Release);
        self.is_dirty.store(false, Ordering::Release);
        self.reference_bit.store(false, Ordering::Relaxed);
        self.latch_exclusive();
        unsafe {
            self.data_mut().fill(0);
            self.unlatch_exclusive();
        }
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("frame_id", &self.frame_id)
            .field("page_num", &self.page_num())
            .field("pin_count", &self.pin_count())
            .field("is_dirty", &self.is_dirty())
            .field("reference_bit", &self.reference_bit())
            .finish()
    }
}
