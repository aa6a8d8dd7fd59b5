use std::cell::UnsafeCell;
use std::slice;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use crate::frame::{Frame, FrameRange};

#[derive(Debug, PartialEq, Eq)]
pub struct FrameBufferOverflow;

/// Append-only arena of frames shared by all call traces of a session.
///
/// Only the cursor advance is contended; a reserved region belongs to the
/// reserving context until it publishes the range.
#[derive(Debug)]
pub struct FrameBuffer {
    slots: Box<[UnsafeCell<Frame>]>,
    cursor: AtomicUsize,
    overflow: AtomicBool,
}

unsafe impl Sync for FrameBuffer {}
unsafe impl Send for FrameBuffer {}

impl FrameBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: (0..capacity)
                .map(|_| UnsafeCell::new(Frame::default()))
                .collect(),
            cursor: AtomicUsize::new(0),
            overflow: AtomicBool::new(false),
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn used(&self) -> usize {
        self.cursor.load(Ordering::Relaxed)
    }

    /// Sticky until the next [`FrameBuffer::reset`].
    pub fn overflowed(&self) -> bool {
        self.overflow.load(Ordering::Relaxed)
    }

    // async-signal-safe
    pub fn reserve(&self, n: usize) -> Result<usize, FrameBufferOverflow> {
        let capacity = self.capacity();
        let reserved = self
            .cursor
            .fetch_update(Ordering::AcqRel, Ordering::Relaxed, |cursor| {
                cursor.checked_add(n).filter(|end| *end <= capacity)
            });
        match reserved {
            Ok(offset) => Ok(offset),
            Err(_) => {
                self.overflow.store(true, Ordering::Relaxed);
                Err(FrameBufferOverflow)
            }
        }
    }

    /// # Safety
    ///
    /// `offset..offset + frames.len()` must lie inside a region obtained from
    /// [`FrameBuffer::reserve`] by the caller and not yet published.
    pub unsafe fn write(&self, offset: usize, frames: &[Frame]) {
        for (slot, frame) in self.slots[offset..offset + frames.len()].iter().zip(frames) {
            unsafe { *slot.get() = *frame };
        }
    }

    // async-signal-safe
    pub fn push(&self, frames: &[Frame]) -> Option<FrameRange> {
        let offset = self.reserve(frames.len()).ok()?;
        unsafe { self.write(offset, frames) };
        Some(FrameRange {
            offset: offset as u32,
            len: frames.len() as u32,
        })
    }

    pub fn frames(&self, range: FrameRange) -> &[Frame] {
        let start = range.offset as usize;
        let end = start + range.len as usize;
        let region = &self.slots[start..end];
        // UnsafeCell<Frame> has the same layout as Frame
        unsafe { slice::from_raw_parts(region.as_ptr() as *const Frame, region.len()) }
    }

    pub fn reset(&self) {
        self.cursor.store(0, Ordering::Release);
        self.overflow.store(false, Ordering::Relaxed);
    }
}
