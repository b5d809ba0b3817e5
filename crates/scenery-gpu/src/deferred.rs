//! Deferred resource release for multi-frame-in-flight rendering.
//!
//! A buffer or image retired during frame N may still be read by the GPU
//! until frame N + frames_in_flight completes. The queue holds the last
//! reference until then; dropping it frees through the allocator.

use crate::memory::{Buffer, Image};
use std::collections::VecDeque;
use tracing::trace;

/// A resource waiting for the GPU to finish with it.
#[derive(Debug)]
pub enum RetiredResource {
    Buffer(Buffer),
    Image(Image),
}

impl RetiredResource {
    /// Bytes held by the resource.
    pub fn size(&self) -> u64 {
        match self {
            Self::Buffer(buffer) => buffer.size(),
            Self::Image(image) => image.allocated_size(),
        }
    }
}

#[derive(Debug)]
struct PendingRelease {
    resource: RetiredResource,
    frame_retired: u64,
}

/// Queue of resources released once enough frames have completed.
#[derive(Debug)]
pub struct ResourceReleaseQueue {
    pending: VecDeque<PendingRelease>,
    frames_in_flight: usize,
}

impl ResourceReleaseQueue {
    pub fn new(frames_in_flight: usize) -> Self {
        Self {
            pending: VecDeque::new(),
            frames_in_flight,
        }
    }

    /// Retire a resource at `frame_number`.
    pub fn retire(&mut self, resource: RetiredResource, frame_number: u64) {
        self.pending.push_back(PendingRelease {
            resource,
            frame_retired: frame_number,
        });
    }

    pub fn retire_buffer(&mut self, buffer: Buffer, frame_number: u64) {
        self.retire(RetiredResource::Buffer(buffer), frame_number);
    }

    pub fn retire_image(&mut self, image: Image, frame_number: u64) {
        self.retire(RetiredResource::Image(image), frame_number);
    }

    /// Release resources retired more than `frames_in_flight` frames ago.
    ///
    /// Returns the number of resources released.
    pub fn process(&mut self, current_frame_number: u64) -> usize {
        let cutoff = current_frame_number.saturating_sub(self.frames_in_flight as u64);

        // Frame numbers are non-decreasing, so only the front can mature.
        let mut released = 0;
        let mut bytes = 0;
        while self
            .pending
            .front()
            .is_some_and(|pending| pending.frame_retired < cutoff)
        {
            if let Some(pending) = self.pending.pop_front() {
                bytes += pending.resource.size();
                released += 1;
            }
        }
        if released > 0 {
            trace!(released, bytes, current_frame_number, "Released retired resources");
        }
        released
    }

    /// Release everything immediately.
    ///
    /// Only valid once the device is idle.
    pub fn flush(&mut self) -> usize {
        let released = self.pending.len();
        self.pending.clear();
        released
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Bytes held by resources waiting for release.
    pub fn pending_bytes(&self) -> u64 {
        self.pending.iter().map(|pending| pending.resource.size()).sum()
    }

    pub fn frames_in_flight(&self) -> usize {
        self.frames_in_flight
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headless::HeadlessMemoryBackend;
    use crate::memory::{create_buffer, AllocatorConfig, BufferDesc, MemoryAllocator};
    use ash::vk;
    use gpu_allocator::MemoryLocation;
    use std::sync::Arc;

    fn allocator() -> Arc<MemoryAllocator> {
        Arc::new(MemoryAllocator::new(
            Box::new(HeadlessMemoryBackend::new()),
            AllocatorConfig::default().with_strict_handle_checks(false),
        ))
    }

    fn buffer(allocator: &Arc<MemoryAllocator>) -> Buffer {
        create_buffer(
            allocator,
            &BufferDesc::new(1024, vk::BufferUsageFlags::VERTEX_BUFFER, MemoryLocation::GpuOnly),
        )
        .unwrap()
    }

    #[test]
    fn resources_mature_after_frames_in_flight() {
        let allocator = allocator();
        let mut queue = ResourceReleaseQueue::new(2);

        queue.retire_buffer(buffer(&allocator), 10);
        queue.retire_buffer(buffer(&allocator), 11);
        assert_eq!(allocator.live_allocations().len(), 2);
        assert_eq!(queue.pending_bytes(), 2048);

        assert_eq!(queue.process(11), 0);
        assert_eq!(queue.process(12), 0);
        assert_eq!(queue.process(13), 1);
        assert_eq!(allocator.live_allocations().len(), 1);
        assert_eq!(queue.pending_bytes(), 1024);
        assert_eq!(queue.process(14), 1);
        assert!(allocator.live_allocations().is_empty());
        assert_eq!(queue.pending_count(), 0);
        assert_eq!(queue.pending_bytes(), 0);
    }

    #[test]
    fn shared_resources_outlive_the_queue_entry() {
        let allocator = allocator();
        let mut queue = ResourceReleaseQueue::new(1);
        let kept = buffer(&allocator);

        queue.retire_buffer(kept.clone(), 0);
        queue.process(5);
        assert!(kept.is_valid());
        assert_eq!(allocator.live_allocations().len(), 1);

        drop(kept);
        assert!(allocator.live_allocations().is_empty());
    }

    #[test]
    fn flush_releases_everything() {
        let allocator = allocator();
        let mut queue = ResourceReleaseQueue::new(3);
        queue.retire_buffer(buffer(&allocator), 100);
        queue.retire(RetiredResource::Buffer(buffer(&allocator)), 101);

        assert_eq!(queue.flush(), 2);
        assert!(allocator.live_allocations().is_empty());
    }
}
