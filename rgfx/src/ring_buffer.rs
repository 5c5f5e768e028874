//! Per-frame transient uniform storage.
//!
//! A [`RingBuffer`] is one persistently mapped buffer carved up by a bump
//! cursor. Everything written since the last frame mark is live; the cursor
//! wraps to the start when an allocation does not fit before the end, and a
//! write that would run into live data is refused. Marking a frame finished
//! releases everything written before the mark.

use std::sync::Arc;

use ash::vk;
use bytemuck::Pod;

use crate::buffer::{Buffer, BufferDesc, BufferHandle, BufferType, CreateBufferError};
use crate::device::Device;
use crate::sync::{Fence, WaitFenceError};

/// Smallest allocation granule, regardless of device limits.
pub const MIN_ALIGNMENT: u64 = 256;

/// Cursor arithmetic for a ring of `capacity` bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RingCursor {
    capacity: u64,
    alignment: u64,
    write_head: u64,
    frame_start: u64,
    /// Bytes consumed since the last frame mark, skipped tails included.
    used: u64,
}

impl RingCursor {
    /// `alignment` is raised to [`MIN_ALIGNMENT`].
    pub fn new(capacity: u64, alignment: u64) -> Self {
        Self {
            capacity,
            alignment: alignment.max(MIN_ALIGNMENT),
            write_head: 0,
            frame_start: 0,
            used: 0,
        }
    }

    /// Reserve `size` bytes and return their offset, or `None` when `size`
    /// is zero or the reservation would overtake `frame_start`.
    pub fn allocate(&mut self, size: u64) -> Option<u64> {
        if size == 0 {
            return None;
        }
        let aligned = size.checked_next_multiple_of(self.alignment)?;
        if aligned > self.capacity {
            return None;
        }

        let (head, mut skipped) = if self.write_head + aligned > self.capacity {
            (0, self.capacity - self.write_head)
        } else {
            (self.write_head, 0)
        };
        if self.used == 0 {
            self.frame_start = head;
            skipped = 0;
        }
        if skipped + aligned > self.capacity - self.used {
            return None;
        }

        self.write_head = head + aligned;
        self.used += skipped + aligned;
        Some(head)
    }

    /// Release everything allocated before this call.
    pub fn mark_finished_frame(&mut self) {
        self.frame_start = self.write_head;
        self.used = 0;
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    pub fn alignment(&self) -> u64 {
        self.alignment
    }

    pub fn write_head(&self) -> u64 {
        self.write_head
    }

    pub fn frame_start(&self) -> u64 {
        self.frame_start
    }

    pub fn used(&self) -> u64 {
        self.used
    }
}

/// A host-visible uniform buffer handed out in aligned slices.
///
/// Only the thread that records frames writes to it.
#[derive(Debug)]
pub struct RingBuffer {
    buffer: Buffer,
    cursor: RingCursor,
}

impl RingBuffer {
    pub fn new(
        device: &Arc<Device>,
        size: vk::DeviceSize,
        name: Option<&str>,
    ) -> Result<Self, CreateBufferError> {
        let buffer = Buffer::new(
            device,
            &BufferDesc::empty(
                BufferType::Dynamic,
                vk::BufferUsageFlags::TRANSFER_SRC
                    | vk::BufferUsageFlags::TRANSFER_DST
                    | vk::BufferUsageFlags::UNIFORM_BUFFER,
                size,
            ),
            name,
        )?;
        let alignment = device.min_uniform_buffer_offset_alignment();
        Ok(Self {
            buffer,
            cursor: RingCursor::new(size, alignment),
        })
    }

    /// Copy `data` into the ring and return its offset, or `None` when the
    /// ring is full, `data` is empty or the copy fails. A refused write
    /// consumes no space.
    pub fn write(&mut self, data: &[u8]) -> Option<u32> {
        if data.is_empty() {
            tracing::warn!("Ignoring empty ring buffer write");
            return None;
        }
        let before = self.cursor.clone();
        let Some(offset) = self.cursor.allocate(data.len() as u64) else {
            tracing::warn!(
                "Ring buffer full: {} bytes requested, {} of {} in use",
                data.len(),
                self.cursor.used(),
                self.cursor.capacity()
            );
            return None;
        };
        let Ok(dynamic_offset) = u32::try_from(offset) else {
            tracing::warn!("Ring buffer offset {offset} does not fit a dynamic offset");
            self.cursor = before;
            return None;
        };
        if let Err(e) = self.buffer.write(data, offset) {
            tracing::warn!("Ring buffer write of {} bytes at {offset} failed: {e}", data.len());
            self.cursor = before;
            return None;
        }
        Some(dynamic_offset)
    }

    pub fn write_pod<T: Pod>(&mut self, value: &T) -> Option<u32> {
        self.write(bytemuck::bytes_of(value))
    }

    /// Wait for `fence`, which guards the last frame's submission, then
    /// release that frame's allocations.
    pub fn mark_finished_frame(&mut self, fence: &Fence) -> Result<(), WaitFenceError> {
        {
            let _span = tracing::debug_span!("ring_buffer_frame_wait").entered();
            fence.wait(u64::MAX)?;
        }
        self.mark_finished_frame_unchecked();
        Ok(())
    }

    /// Release the last frame's allocations without waiting. The caller
    /// must already know the GPU is done with them.
    pub fn mark_finished_frame_unchecked(&mut self) {
        self.cursor.mark_finished_frame();
    }

    pub fn buffer(&self) -> &Buffer {
        &self.buffer
    }

    pub fn cursor(&self) -> &RingCursor {
        &self.cursor
    }
}

impl BufferHandle for RingBuffer {
    fn raw_buffer(&self) -> vk::Buffer {
        self.buffer.raw_buffer()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fills_then_refuses_until_frame_is_marked() {
        let mut ring = RingCursor::new(1024, 64);
        assert_eq!(ring.alignment(), 256);

        let offsets: Vec<_> = (0..4).map(|_| ring.allocate(100)).collect();
        assert_eq!(offsets, [Some(0), Some(256), Some(512), Some(768)]);
        assert_eq!(ring.allocate(1), None);

        ring.mark_finished_frame();
        assert_eq!(ring.allocate(1), Some(0));
    }

    #[test]
    fn wrap_never_overtakes_frame_start() {
        let mut ring = RingCursor::new(1024, 256);
        assert_eq!(ring.allocate(256), Some(0));
        ring.mark_finished_frame();
        assert_eq!(ring.frame_start(), 256);

        assert_eq!(ring.allocate(512), Some(256));
        // Wrapping would overlap [256, 512) of the live frame.
        assert_eq!(ring.allocate(512), None);
        assert_eq!(ring.allocate(256), Some(768));
        assert_eq!(ring.allocate(256), Some(0));
        assert_eq!(ring.allocate(256), None);
        assert_eq!(ring.used(), 1024);
    }

    #[test]
    fn head_at_the_end_wraps_without_skipping() {
        let mut ring = RingCursor::new(1024, 256);
        assert_eq!(ring.allocate(768), Some(0));
        ring.mark_finished_frame();
        assert_eq!(ring.allocate(256), Some(768));

        assert_eq!(ring.allocate(512), Some(0));
        assert_eq!(ring.used(), 768);
        assert_eq!(ring.allocate(512), None);
        assert_eq!(ring.allocate(256), Some(512));
    }

    #[test]
    fn empty_ring_accepts_full_capacity_from_any_head() {
        let mut ring = RingCursor::new(1024, 256);
        assert_eq!(ring.allocate(768), Some(0));
        ring.mark_finished_frame();

        assert_eq!(ring.allocate(1024), Some(0));
        assert_eq!(ring.frame_start(), 0);
        assert_eq!(ring.allocate(1), None);
    }

    #[test]
    fn offsets_do_not_decrease_until_wrap() {
        let mut ring = RingCursor::new(4096, 256);
        let mut last = 0;
        while let Some(offset) = ring.allocate(300) {
            assert!(offset >= last);
            assert!(offset.is_multiple_of(256));
            last = offset;
        }
        // 300 rounds to 512, so eight allocations fill 4096.
        assert_eq!(last, 3584);
    }

    #[test]
    fn zero_size_allocation_is_refused_and_does_not_alias() {
        let mut ring = RingCursor::new(1024, 256);
        assert_eq!(ring.allocate(0), None);
        assert_eq!(ring.used(), 0);
        assert_eq!(ring.allocate(16), Some(0));
        assert_eq!(ring.allocate(0), None);
        assert_eq!(ring.allocate(16), Some(256));
    }

    #[test]
    fn restored_cursor_gives_space_back() {
        let mut ring = RingCursor::new(1024, 256);
        assert_eq!(ring.allocate(256), Some(0));
        let before = ring.clone();
        assert_eq!(ring.allocate(512), Some(256));
        ring = before;
        assert_eq!(ring.used(), 256);
        assert_eq!(ring.allocate(768), Some(256));
    }

    #[test]
    fn oversized_requests_are_refused() {
        let mut ring = RingCursor::new(1024, 256);
        assert_eq!(ring.allocate(1025), None);
        assert_eq!(ring.allocate(u64::MAX), None);
        assert_eq!(ring.used(), 0);
    }
}
