//! Frame buffers and the slot rotation between them.
//!
//! Buffers are allocated once, sized from the byte count the device reports for one
//! frame, and live as long as the component: they survive stop/start cycles and are
//! freed when the pool is released or dropped.
//!
//! # Slot discipline
//!
//! At most one slot is queued to the device at any time. With two slots, the slot that
//! was just published stays untouched for one full grab cycle while the other slot is
//! filled, which is the read window the downstream consumer gets before reuse.

use crate::traits::{FrameInfo, FrameStatus, PixelFormat};

/// Number of buffers the component rotates through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BufferDepth {
    /// One buffer, re-queued every cycle.
    Single,
    /// Two buffers used alternately.
    #[default]
    Double,
}

impl BufferDepth {
    /// Number of slots for this depth.
    #[must_use]
    pub const fn slots(self) -> usize {
        match self {
            Self::Single => 1,
            Self::Double => 2,
        }
    }
}

/// One frame buffer plus the metadata of the frame it last received.
#[derive(Debug)]
pub struct FrameDescriptor {
    buffer: Box<[u8]>,
    populated: usize,
    width: u32,
    height: u32,
    format: Option<PixelFormat>,
    frame_count: u64,
    status: FrameStatus,
}

impl FrameDescriptor {
    /// Allocate a zeroed buffer of exactly `byte_size` bytes.
    #[must_use]
    pub fn allocate(byte_size: usize) -> Self {
        Self {
            buffer: vec![0u8; byte_size].into_boxed_slice(),
            populated: 0,
            width: 0,
            height: 0,
            format: None,
            frame_count: 0,
            status: FrameStatus::Pending,
        }
    }

    /// Free the buffer.
    pub fn release(self) {
        tracing::trace!(capacity = self.capacity(), "releasing frame buffer");
    }

    /// Buffer capacity in bytes.
    #[inline]
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }

    /// Bytes written by the last completed frame.
    #[inline]
    #[must_use]
    pub const fn populated(&self) -> usize {
        self.populated
    }

    /// The populated part of the buffer.
    #[must_use]
    pub fn data(&self) -> &[u8] {
        self.buffer.get(..self.populated).unwrap_or(&self.buffer)
    }

    /// Frame width in pixels.
    #[must_use]
    pub const fn width(&self) -> u32 {
        self.width
    }

    /// Frame height in pixels.
    #[must_use]
    pub const fn height(&self) -> u32 {
        self.height
    }

    /// Pixel format of the last completed frame.
    #[must_use]
    pub const fn format(&self) -> Option<PixelFormat> {
        self.format
    }

    /// Device frame counter of the last completed frame.
    #[must_use]
    pub const fn frame_count(&self) -> u64 {
        self.frame_count
    }

    /// Completion status of the last frame.
    #[must_use]
    pub const fn status(&self) -> FrameStatus {
        self.status
    }

    /// Forget the previous frame before the buffer is queued again.
    pub(crate) fn reset(&mut self) {
        self.populated = 0;
        self.status = FrameStatus::Pending;
    }

    pub(crate) fn buffer_mut(&mut self) -> &mut [u8] {
        &mut self.buffer
    }

    /// Record what the device reported for the frame it wrote.
    pub(crate) fn record(&mut self, info: &FrameInfo) {
        self.populated = info.populated.min(self.buffer.len());
        self.width = info.width;
        self.height = info.height;
        self.format = Some(info.format);
        self.frame_count = info.frame_count;
        self.status = info.status;
    }
}

/// Fixed set of frame buffers with in-flight tracking.
#[derive(Debug)]
pub struct BufferPool {
    slots: Vec<FrameDescriptor>,
    active: usize,
    in_flight: Option<usize>,
    published: Option<usize>,
}

impl BufferPool {
    /// Allocate `depth` buffers of `byte_size` bytes each.
    #[must_use]
    pub fn allocate(depth: BufferDepth, byte_size: usize) -> Self {
        tracing::info!(
            slots = depth.slots(),
            byte_size,
            total_bytes = depth.slots() * byte_size,
            "allocating frame buffers"
        );

        Self {
            slots: (0..depth.slots())
                .map(|_| FrameDescriptor::allocate(byte_size))
                .collect(),
            active: 0,
            in_flight: None,
            published: None,
        }
    }

    /// Free every buffer.
    pub fn release(self) {
        for slot in self.slots {
            slot.release();
        }
    }

    /// Number of slots.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.slots.len()
    }

    /// Capacity of each buffer in bytes.
    #[must_use]
    pub fn byte_size(&self) -> usize {
        self.slots.first().map_or(0, FrameDescriptor::capacity)
    }

    /// Slot the next grab will queue.
    #[must_use]
    pub const fn active(&self) -> usize {
        self.active
    }

    /// Slot currently queued to the device, if any.
    #[must_use]
    pub const fn in_flight(&self) -> Option<usize> {
        self.in_flight
    }

    /// Descriptor of the given slot.
    #[must_use]
    pub fn slot(&self, index: usize) -> Option<&FrameDescriptor> {
        self.slots.get(index)
    }

    pub(crate) fn slot_mut(&mut self, index: usize) -> Option<&mut FrameDescriptor> {
        self.slots.get_mut(index)
    }

    /// The most recently published frame, as long as its slot has not been re-queued.
    #[must_use]
    pub fn last_published(&self) -> Option<&FrameDescriptor> {
        self.published.and_then(|index| self.slots.get(index))
    }

    /// Claim the active slot for queuing to the device.
    ///
    /// Returns `None` if a slot is already in flight.
    pub(crate) fn begin_queue(&mut self) -> Option<usize> {
        if self.in_flight.is_some() {
            return None;
        }

        let index = self.active;
        if self.published == Some(index) {
            self.published = None;
        }
        if let Some(slot) = self.slots.get_mut(index) {
            slot.reset();
        }
        self.in_flight = Some(index);
        Some(index)
    }

    /// The in-flight slot is back from the device, successfully or not.
    pub(crate) fn end_queue(&mut self) {
        self.in_flight = None;
    }

    /// Mark the active slot as published and move on to the other slot.
    pub(crate) fn publish_and_toggle(&mut self) {
        self.published = Some(self.active);
        self.active = (self.active + 1) % self.slots.len().max(1);
    }
}
