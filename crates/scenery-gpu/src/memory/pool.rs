//! Size-class memory pools.

use super::backend::BoundMemory;
use gpu_allocator::MemoryLocation;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Upper bound of the small size class.
pub const SMALL_BUFFER_SIZE: u64 = 256 * 1024;
/// Upper bound of the medium size class.
pub const MEDIUM_BUFFER_SIZE: u64 = 1024 * 1024;
/// Upper bound of the large size class.
pub const LARGE_BUFFER_SIZE: u64 = 16 * 1024 * 1024;
/// Default block size of dedicated pools, adjustable through
/// [`MemoryAllocator::set_custom_pool_size`](super::MemoryAllocator::set_custom_pool_size).
pub const DEFAULT_CUSTOM_POOL_SIZE: u64 = 16 * 1024 * 1024;

/// Size class an allocation is grouped into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SizeClass {
    Small,
    Medium,
    Large,
    /// Resource owns its memory object.
    Dedicated,
}

impl SizeClass {
    /// Classify a sub-allocated range by size.
    pub fn for_size(size: u64) -> Self {
        if size <= SMALL_BUFFER_SIZE {
            Self::Small
        } else if size <= MEDIUM_BUFFER_SIZE {
            Self::Medium
        } else if size <= LARGE_BUFFER_SIZE {
            Self::Large
        } else {
            Self::Dedicated
        }
    }

    /// Classify bound memory, honouring dedicated placement.
    pub fn for_bound(bound: &BoundMemory) -> Self {
        if bound.dedicated {
            Self::Dedicated
        } else {
            Self::for_size(bound.size)
        }
    }

    /// Block size used for pools of this class.
    pub fn block_size(self) -> u64 {
        match self {
            Self::Small => SMALL_BUFFER_SIZE,
            Self::Medium => MEDIUM_BUFFER_SIZE,
            Self::Large => LARGE_BUFFER_SIZE,
            Self::Dedicated => DEFAULT_CUSTOM_POOL_SIZE,
        }
    }
}

/// Kind of resource an allocation backs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AllocationKind {
    Buffer,
    Image,
}

/// Identifies a pool: resource kind, size class and memory location.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolKey {
    pub kind: AllocationKind,
    pub class: SizeClass,
    pub location: MemoryLocation,
}

impl PoolKey {
    pub fn new(kind: AllocationKind, class: SizeClass, location: MemoryLocation) -> Self {
        Self {
            kind,
            class,
            location,
        }
    }
}

// MemoryLocation has no Hash impl.
impl Hash for PoolKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.kind.hash(state);
        self.class.hash(state);
        location_index(self.location).hash(state);
    }
}

impl fmt::Display for PoolKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}/{:?}/{:?}", self.kind, self.class, self.location)
    }
}

fn location_index(location: MemoryLocation) -> u8 {
    match location {
        MemoryLocation::Unknown => 0,
        MemoryLocation::GpuOnly => 1,
        MemoryLocation::CpuToGpu => 2,
        MemoryLocation::GpuToCpu => 3,
    }
}

/// Bookkeeping for one size-class pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryPool {
    key: PoolKey,
    block_size: u64,
    min_alignment: u64,
    memory_type_index: Option<u32>,
    allocation_count: usize,
    used_bytes: u64,
    peak_bytes: u64,
}

impl MemoryPool {
    pub(crate) fn new(key: PoolKey) -> Self {
        Self {
            key,
            block_size: key.class.block_size(),
            min_alignment: 1,
            memory_type_index: None,
            allocation_count: 0,
            used_bytes: 0,
            peak_bytes: 0,
        }
    }

    pub(crate) fn with_block_size(mut self, block_size: u64) -> Self {
        self.block_size = block_size;
        self
    }

    pub(crate) fn set_block_size(&mut self, block_size: u64) {
        self.block_size = block_size;
    }

    pub(crate) fn record_allocation(&mut self, bound: &BoundMemory) {
        self.min_alignment = self.min_alignment.max(bound.alignment);
        self.memory_type_index.get_or_insert(bound.memory_type_index);
        self.allocation_count += 1;
        self.used_bytes += bound.size;
        self.peak_bytes = self.peak_bytes.max(self.used_bytes);
    }

    pub(crate) fn record_free(&mut self, size: u64) {
        self.allocation_count = self.allocation_count.saturating_sub(1);
        self.used_bytes = self.used_bytes.saturating_sub(size);
    }

    pub(crate) fn reset_peak(&mut self) {
        self.peak_bytes = self.used_bytes;
    }

    pub fn key(&self) -> PoolKey {
        self.key
    }

    pub fn block_size(&self) -> u64 {
        self.block_size
    }

    /// Largest alignment any allocation in this pool has required.
    pub fn min_alignment(&self) -> u64 {
        self.min_alignment
    }

    /// Memory type of the first allocation placed in the pool.
    pub fn memory_type_index(&self) -> Option<u32> {
        self.memory_type_index
    }

    pub fn allocation_count(&self) -> usize {
        self.allocation_count
    }

    pub fn used_bytes(&self) -> u64 {
        self.used_bytes
    }

    pub fn peak_bytes(&self) -> u64 {
        self.peak_bytes
    }
}
