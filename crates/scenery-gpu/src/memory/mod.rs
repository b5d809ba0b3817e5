//! GPU memory management.
//!
//! [`MemoryAllocator`] tracks every allocation by handle, groups them into
//! size-class pools for reporting, and delegates the native work to a
//! [`MemoryBackend`]. [`Buffer`] and [`Image`] are the reference-counted
//! resource types most code should use.

mod allocator;
mod backend;
mod config;
mod pool;
mod resource;
mod stats;
mod vulkan;

pub use allocator::{
    AllocInfo, BatchBufferAllocation, BufferAllocation, ImageAllocation, MemoryAllocator,
    TrackedResource,
};
pub use backend::{
    AllocationHandle, AllocationRequest, BackendReport, BoundMemory, DefragmentationStats,
    HeapBudget, MemoryBackend, MemoryLimits,
};
pub use config::{AllocationStrategy, AllocatorConfig, DefragmentationFlags};
pub use pool::{
    AllocationKind, MemoryPool, PoolKey, SizeClass, DEFAULT_CUSTOM_POOL_SIZE, LARGE_BUFFER_SIZE,
    MEDIUM_BUFFER_SIZE, SMALL_BUFFER_SIZE,
};
pub use resource::{
    create_buffer, create_image, Buffer, BufferDesc, BufferResource, Image, ImageDesc,
    ImageResource, MappedPtr,
};
pub use stats::{
    AllocationStats, MemoryBudget, MemoryTypeStats, DEFAULT_BUDGET_WARNING_THRESHOLD,
};
pub use vulkan::VulkanMemoryBackend;

pub use gpu_allocator::MemoryLocation;
