//! The seam between the tracking allocator and a native memory allocator.
//!
//! [`MemoryAllocator`](super::MemoryAllocator) owns the bookkeeping (tracking
//! map, pools, statistics); a [`MemoryBackend`] owns the native memory and the
//! resources bound to it.

use crate::error::Result;
use ash::vk;
use gpu_allocator::MemoryLocation;
use std::fmt;
use std::num::NonZeroU64;
use std::ptr::NonNull;

/// Handle identifying one tracked allocation.
///
/// Handles are never reused by the allocator that issued them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AllocationHandle(NonZeroU64);

impl AllocationHandle {
    pub(crate) fn from_raw(raw: NonZeroU64) -> Self {
        Self(raw)
    }

    /// Raw numeric value of the handle.
    pub fn raw(self) -> u64 {
        self.0.get()
    }
}

impl fmt::Display for AllocationHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Placement decisions made by the allocator before the backend binds memory.
#[derive(Debug, Clone, Copy)]
pub struct AllocationRequest<'a> {
    /// Debug name of the resource.
    pub name: &'a str,
    /// Memory location hint.
    pub location: MemoryLocation,
    /// Resources whose memory requirement exceeds this get a dedicated memory object.
    pub dedicated_threshold: Option<u64>,
    /// Lower bound for the alignment of the bound memory.
    pub min_alignment: u64,
}

impl AllocationRequest<'_> {
    /// Whether a resource with the given requirement size should be dedicated.
    pub fn wants_dedicated(&self, size: u64) -> bool {
        self.dedicated_threshold.is_some_and(|threshold| size > threshold)
    }
}

/// Memory bound to a freshly created resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundMemory {
    /// Bytes reserved for the resource (may exceed the requested size).
    pub size: u64,
    /// Alignment of the bound range.
    pub alignment: u64,
    /// Memory type the range was taken from.
    pub memory_type_index: u32,
    /// Whether the resource owns its memory object.
    pub dedicated: bool,
    /// Whether the memory is persistently mapped for host access.
    pub host_visible: bool,
}

/// Snapshot of the backend's block usage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BackendReport {
    /// Bytes reserved in native memory blocks.
    pub reserved_bytes: u64,
    /// Number of native memory blocks.
    pub block_count: usize,
}

/// Budget and usage of one memory heap.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeapBudget {
    pub budget: u64,
    pub usage: u64,
}

/// Device limits that bound the block size of a memory pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryLimits {
    /// Largest single memory object the device can allocate.
    pub max_allocation_size: u64,
    /// Size of the largest memory heap.
    pub largest_heap: u64,
    /// Block sizes must be a multiple of this (storage buffer offset alignment).
    pub block_alignment: u64,
}

impl MemoryLimits {
    /// Why `size` cannot serve as a pool block size, or `None` if it can.
    pub fn block_size_violation(&self, size: u64) -> Option<String> {
        if size == 0 {
            Some("block size must be non-zero".to_string())
        } else if size > self.max_allocation_size {
            Some(format!(
                "{size} bytes exceeds the device allocation limit of {} bytes",
                self.max_allocation_size
            ))
        } else if size > self.largest_heap {
            Some(format!(
                "{size} bytes exceeds the largest heap of {} bytes",
                self.largest_heap
            ))
        } else if self.block_alignment > 1 && size % self.block_alignment != 0 {
            Some(format!(
                "{size} bytes is not a multiple of the {} byte alignment",
                self.block_alignment
            ))
        } else {
            None
        }
    }
}

/// Outcome of a defragmentation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DefragmentationStats {
    pub allocations_moved: u32,
    pub bytes_moved: u64,
    pub blocks_freed: u32,
    pub bytes_freed: u64,
}

/// Native memory allocator used by [`MemoryAllocator`](super::MemoryAllocator).
///
/// Implementations keep their native allocation objects keyed by the
/// [`AllocationHandle`] supplied at creation time.
pub trait MemoryBackend: Send {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Create a buffer and bind memory to it.
    fn create_buffer(
        &mut self,
        handle: AllocationHandle,
        info: &vk::BufferCreateInfo<'_>,
        request: &AllocationRequest<'_>,
    ) -> Result<(vk::Buffer, BoundMemory)>;

    /// Create an image and bind memory to it.
    fn create_image(
        &mut self,
        handle: AllocationHandle,
        info: &vk::ImageCreateInfo<'_>,
        request: &AllocationRequest<'_>,
    ) -> Result<(vk::Image, BoundMemory)>;

    /// Destroy a buffer and release its memory.
    fn destroy_buffer(&mut self, handle: AllocationHandle, buffer: vk::Buffer) -> Result<()>;

    /// Destroy an image and release its memory.
    fn destroy_image(&mut self, handle: AllocationHandle, image: vk::Image) -> Result<()>;

    /// Host pointer for a host-visible allocation.
    fn mapped_ptr(&self, handle: AllocationHandle) -> Option<NonNull<u8>>;

    /// Current block usage.
    fn report(&self) -> BackendReport;

    /// Budget and usage per memory heap.
    fn heap_budgets(&self) -> Vec<HeapBudget>;

    /// Device limits on memory object size.
    fn limits(&self) -> MemoryLimits;

    /// Try to relocate the given allocations into fewer blocks.
    ///
    /// Backends that cannot move bound resources report nothing moved.
    fn defragment(&mut self, candidates: &[AllocationHandle]) -> DefragmentationStats {
        let _ = candidates;
        DefragmentationStats::default()
    }

    /// Release every remaining native allocation and the allocator itself.
    fn shutdown(&mut self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dedicated_threshold() {
        let request = AllocationRequest {
            name: "test",
            location: MemoryLocation::GpuOnly,
            dedicated_threshold: Some(1024),
            min_alignment: 1,
        };
        assert!(!request.wants_dedicated(1024));
        assert!(request.wants_dedicated(1025));

        let pooled = AllocationRequest {
            dedicated_threshold: None,
            ..request
        };
        assert!(!pooled.wants_dedicated(u64::MAX));
    }

    #[test]
    fn block_size_limits() {
        let limits = MemoryLimits {
            max_allocation_size: 1 << 30,
            largest_heap: 512 << 20,
            block_alignment: 256,
        };
        assert!(limits.block_size_violation(64 << 20).is_none());
        assert!(limits.block_size_violation(512 << 20).is_none());
        assert!(limits.block_size_violation(0).is_some());
        assert!(limits.block_size_violation(768 << 20).unwrap().contains("largest heap"));
        assert!(limits.block_size_violation(2 << 30).unwrap().contains("allocation limit"));
        assert!(limits.block_size_violation((64 << 20) + 100).unwrap().contains("alignment"));
    }

    #[test]
    fn handle_display() {
        let handle = AllocationHandle::from_raw(NonZeroU64::new(7).unwrap());
        assert_eq!(handle.to_string(), "#7");
        assert_eq!(handle.raw(), 7);
    }
}
