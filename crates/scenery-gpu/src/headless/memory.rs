use crate::error::{GpuError, Result};
use crate::memory::{
    AllocationHandle, AllocationRequest, BackendReport, BoundMemory, DefragmentationStats,
    HeapBudget, MemoryBackend, MemoryLimits,
};
use ash::vk::{self, Handle};
use gpu_allocator::MemoryLocation;
use std::collections::HashMap;
use std::ptr::NonNull;
use tracing::debug;

const BUFFER_ALIGNMENT: u64 = 256;
const IMAGE_ALIGNMENT: u64 = 4096;
/// Heap size reported when no capacity limit is set.
const DEFAULT_HEAP_SIZE: u64 = 4 * 1024 * 1024 * 1024;
/// Reported `maxMemoryAllocationSize`.
const MAX_ALLOCATION_SIZE: u64 = 1024 * 1024 * 1024;

#[derive(Debug)]
struct Block {
    id: u64,
    size: u64,
    used: u64,
    memory_type_index: u32,
    dedicated: bool,
    members: Vec<AllocationHandle>,
}

impl Block {
    fn free(&self) -> u64 {
        self.size - self.used
    }
}

/// Host memory standing in for a persistently mapped range.
#[derive(Debug)]
struct HostMemory {
    _storage: Box<[u64]>,
    ptr: NonNull<u8>,
}

// `ptr` points into `_storage`, which this struct owns.
unsafe impl Send for HostMemory {}

impl HostMemory {
    fn new(size: u64) -> Self {
        let mut storage = vec![0u64; size.div_ceil(8) as usize].into_boxed_slice();
        let ptr = NonNull::new(storage.as_mut_ptr().cast::<u8>()).unwrap_or(NonNull::dangling());
        Self {
            _storage: storage,
            ptr,
        }
    }
}

#[derive(Debug)]
struct Entry {
    block: u64,
    size: u64,
    resource: u64,
    host: Option<HostMemory>,
}

/// A [`MemoryBackend`] that sub-allocates host memory in simulated blocks.
#[derive(Debug)]
pub struct HeadlessMemoryBackend {
    block_size: u64,
    capacity: Option<u64>,
    blocks: Vec<Block>,
    entries: HashMap<AllocationHandle, Entry>,
    next_id: u64,
}

impl Default for HeadlessMemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl HeadlessMemoryBackend {
    /// Block size used for sub-allocation.
    pub const DEFAULT_BLOCK_SIZE: u64 = 64 * 1024 * 1024;

    pub fn new() -> Self {
        Self {
            block_size: Self::DEFAULT_BLOCK_SIZE,
            capacity: None,
            blocks: Vec::new(),
            entries: HashMap::new(),
            next_id: 0,
        }
    }

    /// Limit reserved memory; allocations beyond it fail with out-of-memory.
    pub fn with_capacity(capacity: u64) -> Self {
        Self {
            block_size: Self::DEFAULT_BLOCK_SIZE.min(capacity),
            capacity: Some(capacity),
            ..Self::new()
        }
    }

    pub fn with_block_size(mut self, block_size: u64) -> Self {
        self.block_size = block_size;
        self
    }

    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn reserved(&self) -> u64 {
        self.blocks.iter().map(|block| block.size).sum()
    }

    fn new_block(&mut self, size: u64, memory_type_index: u32, dedicated: bool) -> Result<u64> {
        if let Some(capacity) = self.capacity {
            if self.reserved() + size > capacity {
                return Err(GpuError::OutOfMemory(format!(
                    "{size} bytes requested, {} of {capacity} bytes reserved",
                    self.reserved()
                )));
            }
        }
        let id = self.next_id();
        self.blocks.push(Block {
            id,
            size,
            used: 0,
            memory_type_index,
            dedicated,
            members: Vec::new(),
        });
        Ok(id)
    }

    fn place(
        &mut self,
        handle: AllocationHandle,
        size: u64,
        dedicated: bool,
        memory_type_index: u32,
    ) -> Result<u64> {
        let existing = if dedicated {
            None
        } else {
            self.blocks
                .iter()
                .find(|b| !b.dedicated && b.memory_type_index == memory_type_index && b.free() >= size)
                .map(|b| b.id)
        };
        let id = match existing {
            Some(id) => id,
            None if dedicated => self.new_block(size, memory_type_index, true)?,
            None => self.new_block(size.max(self.block_size), memory_type_index, false)?,
        };
        if let Some(block) = self.blocks.iter_mut().find(|b| b.id == id) {
            block.used += size;
            block.members.push(handle);
        }
        Ok(id)
    }

    fn allocate(
        &mut self,
        handle: AllocationHandle,
        requirement: u64,
        alignment: u64,
        request: &AllocationRequest<'_>,
    ) -> Result<(u64, BoundMemory)> {
        let alignment = alignment.max(request.min_alignment).max(1);
        let size = requirement.div_ceil(alignment) * alignment;
        let dedicated = request.wants_dedicated(size);
        let memory_type_index = memory_type_for(request.location);
        let host_visible = is_host_visible(request.location);

        let block = self.place(handle, size, dedicated, memory_type_index)?;
        let resource = self.next_id();
        self.entries.insert(
            handle,
            Entry {
                block,
                size,
                resource,
                host: host_visible.then(|| HostMemory::new(size)),
            },
        );

        Ok((
            resource,
            BoundMemory {
                size,
                alignment,
                memory_type_index,
                dedicated,
                host_visible,
            },
        ))
    }

    fn release(&mut self, handle: AllocationHandle, resource: u64) -> Result<()> {
        let entry = self
            .entries
            .remove(&handle)
            .ok_or(GpuError::UnknownAllocation(handle.raw()))?;
        if entry.resource != resource {
            debug!(%handle, "Released resource does not match the allocation");
        }
        if let Some(index) = self.blocks.iter().position(|b| b.id == entry.block) {
            let block = &mut self.blocks[index];
            block.used -= entry.size;
            block.members.retain(|&member| member != handle);
            if block.members.is_empty() {
                self.blocks.remove(index);
            }
        }
        Ok(())
    }
}

fn memory_type_for(location: MemoryLocation) -> u32 {
    match location {
        MemoryLocation::Unknown | MemoryLocation::GpuOnly => 0,
        MemoryLocation::CpuToGpu => 1,
        MemoryLocation::GpuToCpu => 2,
    }
}

fn is_host_visible(location: MemoryLocation) -> bool {
    matches!(location, MemoryLocation::CpuToGpu | MemoryLocation::GpuToCpu)
}

fn bytes_per_texel(format: vk::Format) -> u64 {
    match format {
        vk::Format::R8_UNORM | vk::Format::S8_UINT => 1,
        vk::Format::R16G16B16A16_SFLOAT | vk::Format::D32_SFLOAT_S8_UINT => 8,
        vk::Format::R32G32B32A32_SFLOAT => 16,
        _ => 4,
    }
}

fn image_requirement(info: &vk::ImageCreateInfo<'_>) -> u64 {
    let texel = bytes_per_texel(info.format);
    let layers = u64::from(info.array_layers.max(1));
    (0..info.mip_levels.max(1))
        .map(|level| {
            let w = u64::from((info.extent.width >> level).max(1));
            let h = u64::from((info.extent.height >> level).max(1));
            let d = u64::from((info.extent.depth >> level).max(1));
            w * h * d * texel
        })
        .sum::<u64>()
        * layers
}

impl MemoryBackend for HeadlessMemoryBackend {
    fn name(&self) -> &'static str {
        "headless"
    }

    fn create_buffer(
        &mut self,
        handle: AllocationHandle,
        info: &vk::BufferCreateInfo<'_>,
        request: &AllocationRequest<'_>,
    ) -> Result<(vk::Buffer, BoundMemory)> {
        if info.size == 0 {
            return Err(GpuError::AllocationFailed("zero-sized buffer".to_string()));
        }
        let (raw, bound) = self.allocate(handle, info.size, BUFFER_ALIGNMENT, request)?;
        Ok((vk::Buffer::from_raw(raw), bound))
    }

    fn create_image(
        &mut self,
        handle: AllocationHandle,
        info: &vk::ImageCreateInfo<'_>,
        request: &AllocationRequest<'_>,
    ) -> Result<(vk::Image, BoundMemory)> {
        let requirement = image_requirement(info);
        if requirement == 0 {
            return Err(GpuError::AllocationFailed("zero-sized image".to_string()));
        }
        let (raw, bound) = self.allocate(handle, requirement, IMAGE_ALIGNMENT, request)?;
        Ok((vk::Image::from_raw(raw), bound))
    }

    fn destroy_buffer(&mut self, handle: AllocationHandle, buffer: vk::Buffer) -> Result<()> {
        self.release(handle, buffer.as_raw())
    }

    fn destroy_image(&mut self, handle: AllocationHandle, image: vk::Image) -> Result<()> {
        self.release(handle, image.as_raw())
    }

    fn mapped_ptr(&self, handle: AllocationHandle) -> Option<NonNull<u8>> {
        self.entries
            .get(&handle)
            .and_then(|entry| entry.host.as_ref())
            .map(|host| host.ptr)
    }

    fn report(&self) -> BackendReport {
        BackendReport {
            reserved_bytes: self.reserved(),
            block_count: self.blocks.len(),
        }
    }

    fn limits(&self) -> MemoryLimits {
        MemoryLimits {
            max_allocation_size: MAX_ALLOCATION_SIZE,
            largest_heap: self.capacity.unwrap_or(DEFAULT_HEAP_SIZE),
            block_alignment: BUFFER_ALIGNMENT,
        }
    }

    fn heap_budgets(&self) -> Vec<HeapBudget> {
        vec![HeapBudget {
            budget: self.capacity.unwrap_or(DEFAULT_HEAP_SIZE),
            usage: self.reserved(),
        }]
    }

    fn defragment(&mut self, candidates: &[AllocationHandle]) -> DefragmentationStats {
        let mut stats = DefragmentationStats::default();

        for &handle in candidates {
            let Some(entry) = self.entries.get(&handle) else {
                continue;
            };
            let (size, from) = (entry.size, entry.block);
            let Some(from_index) = self.blocks.iter().position(|b| b.id == from) else {
                continue;
            };
            if self.blocks[from_index].dedicated {
                continue;
            }
            let memory_type_index = self.blocks[from_index].memory_type_index;
            let Some(to_index) = self.blocks[..from_index]
                .iter()
                .position(|b| !b.dedicated && b.memory_type_index == memory_type_index && b.free() >= size)
            else {
                continue;
            };

            let source = &mut self.blocks[from_index];
            source.used -= size;
            source.members.retain(|&member| member != handle);
            let target = &mut self.blocks[to_index];
            target.used += size;
            target.members.push(handle);
            let target_id = target.id;
            if let Some(entry) = self.entries.get_mut(&handle) {
                entry.block = target_id;
            }

            stats.allocations_moved += 1;
            stats.bytes_moved += size;
        }

        let before = self.blocks.len();
        let freed: u64 = self
            .blocks
            .iter()
            .filter(|b| b.members.is_empty())
            .map(|b| b.size)
            .sum();
        self.blocks.retain(|b| !b.members.is_empty());
        stats.blocks_freed = (before - self.blocks.len()) as u32;
        stats.bytes_freed = freed;
        stats
    }

    fn shutdown(&mut self) {
        debug!(
            blocks = self.blocks.len(),
            allocations = self.entries.len(),
            "Headless memory backend shut down"
        );
        self.entries.clear();
        self.blocks.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::num::NonZeroU64;

    fn handle(raw: u64) -> AllocationHandle {
        AllocationHandle::from_raw(NonZeroU64::new(raw).unwrap())
    }

    fn request(location: MemoryLocation) -> AllocationRequest<'static> {
        AllocationRequest {
            name: "test",
            location,
            dedicated_threshold: None,
            min_alignment: 1,
        }
    }

    fn buffer(size: u64) -> vk::BufferCreateInfo<'static> {
        vk::BufferCreateInfo::default().size(size)
    }

    #[test]
    fn sub_allocates_until_block_is_full() {
        let mut backend = HeadlessMemoryBackend::new().with_block_size(1024);
        let gpu = request(MemoryLocation::GpuOnly);

        backend.create_buffer(handle(1), &buffer(512), &gpu).unwrap();
        backend.create_buffer(handle(2), &buffer(512), &gpu).unwrap();
        assert_eq!(backend.report().block_count, 1);

        backend.create_buffer(handle(3), &buffer(100), &gpu).unwrap();
        assert_eq!(backend.report().block_count, 2);
        assert_eq!(backend.report().reserved_bytes, 2048);
    }

    #[test]
    fn host_visible_memory_is_mapped() {
        let mut backend = HeadlessMemoryBackend::new();
        let (_, bound) = backend
            .create_buffer(handle(1), &buffer(100), &request(MemoryLocation::CpuToGpu))
            .unwrap();
        assert!(bound.host_visible);
        assert_eq!(bound.size, 256);
        assert!(backend.mapped_ptr(handle(1)).is_some());

        let (_, bound) = backend
            .create_buffer(handle(2), &buffer(100), &request(MemoryLocation::GpuOnly))
            .unwrap();
        assert!(!bound.host_visible);
        assert!(backend.mapped_ptr(handle(2)).is_none());
    }

    #[test]
    fn capacity_limit_reports_out_of_memory() {
        let mut backend = HeadlessMemoryBackend::with_capacity(4096);
        let result = backend.create_buffer(handle(1), &buffer(8192), &request(MemoryLocation::GpuOnly));
        assert!(matches!(result, Err(GpuError::OutOfMemory(_))));
        assert_eq!(backend.report(), BackendReport::default());
    }

    #[test]
    fn releasing_last_member_drops_block() {
        let mut backend = HeadlessMemoryBackend::new();
        let (buffer_handle, _) = backend
            .create_buffer(handle(1), &buffer(64), &request(MemoryLocation::GpuOnly))
            .unwrap();
        backend.destroy_buffer(handle(1), buffer_handle).unwrap();
        assert_eq!(backend.report().block_count, 0);
        assert!(backend.destroy_buffer(handle(1), buffer_handle).is_err());
    }
}
