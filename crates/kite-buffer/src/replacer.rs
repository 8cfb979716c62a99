//! Page replacement policy for the buffer pool.

use crate::frame::FrameId;
use parking_lot::Mutex;

/// Clock replacement algorithm.
///
/// Maintains one reference bit per frame. When selecting a victim:
/// 1. If the frame under the hand is evictable and its reference bit is
///    clear, select it.
/// 2. Otherwise clear the bit and advance the hand.
/// 3. Give up after two full rotations.
///
/// Whether a frame is evictable is decided by the caller (via the
/// predicate), since pin counts live on the frames themselves.
pub struct ClockReplacer {
    inner: Mutex<ClockInner>,
}

struct ClockInner {
    /// Total number of frames.
    num_frames: usize,
    /// Reference bits for each frame.
    reference_bits: Vec<bool>,
    /// Current clock hand position.
    clock_hand: usize,
}

impl ClockReplacer {
    /// Creates a new clock replacer with the given number of frames.
    pub fn new(num_frames: usize) -> Self {
        Self {
            inner: Mutex::new(ClockInner {
                num_frames,
                reference_bits: vec![false; num_frames],
                clock_hand: 0,
            }),
        }
    }

    /// Returns the total capacity.
    pub fn capacity(&self) -> usize {
        self.inner.lock().num_frames
    }

    /// Records that the given frame was accessed.
    pub fn record_access(&self, frame_id: FrameId) {
        let mut inner = self.inner.lock();
        if (frame_id.0 as usize) < inner.num_frames {
            inner.reference_bits[frame_id.0 as usize] = true;
        }
    }

    /// Selects a victim frame for eviction.
    ///
    /// `can_evict` decides whether a frame is a candidate at all
    /// (typically: holds a page and has pin count 0). Returns None if no
    /// candidate is found within two full rotations.
    pub fn evict<F>(&self, can_evict: F) -> Option<FrameId>
    where
        F: Fn(FrameId) -> bool,
    {
        let mut inner = self.inner.lock();
        let num_frames = inner.num_frames;
        if num_frames == 0 {
            return None;
        }

        // Two rotations: the first clears reference bits, the second
        // finds a frame whose bit was cleared.
        for _ in 0..(2 * num_frames) {
            let hand = inner.clock_hand;
            let frame_id = FrameId(hand as u32);
            inner.clock_hand = (hand + 1) % num_frames;

            if can_evict(frame_id) {
                if inner.reference_bits[hand] {
                    inner.reference_bits[hand] = false;
                } else {
                    return Some(frame_id);
                }
            }
        }

        None
    }

    /// Removes a frame from consideration (clears its reference bit).
    pub fn remove(&self, frame_id: FrameId) {
        let mut inner = self.inner.lock();
        if (frame_id.0 as usize) < inner.num_frames {
            inner.reference_bits[frame_id.0 as usize] = false;
        }
    }
}
