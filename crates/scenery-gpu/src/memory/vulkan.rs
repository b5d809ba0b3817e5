//! [`MemoryBackend`] on top of `gpu-allocator`.

use super::backend::{
    AllocationHandle, AllocationRequest, BackendReport, BoundMemory, HeapBudget, MemoryBackend,
    MemoryLimits,
};
use crate::context::VulkanDevice;
use crate::error::{GpuError, Result};
use ash::vk;
use gpu_allocator::vulkan::{
    Allocation, AllocationCreateDesc, AllocationScheme, Allocator, AllocatorCreateDesc,
};
use gpu_allocator::{AllocationError, AllocatorDebugSettings};
use std::collections::HashMap;
use std::ptr::NonNull;
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug)]
struct Tracked {
    allocation: Allocation,
    memory_type_index: u32,
}

/// Sub-allocates device memory with `gpu-allocator`.
///
/// Holds an `Arc` to the device so the device outlives every allocation.
pub struct VulkanMemoryBackend {
    allocator: Option<Allocator>,
    device: Arc<VulkanDevice>,
    allocations: HashMap<AllocationHandle, Tracked>,
    memory_properties: vk::PhysicalDeviceMemoryProperties,
    limits: MemoryLimits,
}

impl std::fmt::Debug for VulkanMemoryBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VulkanMemoryBackend")
            .field("allocations", &self.allocations.len())
            .field("shut_down", &self.allocator.is_none())
            .finish_non_exhaustive()
    }
}

impl VulkanMemoryBackend {
    /// Create the native allocator for a device.
    pub fn new(device: &Arc<VulkanDevice>, debug_settings: AllocatorDebugSettings) -> Result<Self> {
        let allocator = Allocator::new(&AllocatorCreateDesc {
            instance: device.instance().clone(),
            device: device.device().clone(),
            physical_device: device.physical_device(),
            debug_settings,
            buffer_device_address: false,
            allocation_sizes: Default::default(),
        })
        .map_err(|e| GpuError::AllocationFailed(e.to_string()))?;

        debug!("gpu-allocator initialised");

        let memory_properties = device.memory_properties();
        let limits = query_limits(device, &memory_properties);
        debug!(?limits, "Device memory limits");

        Ok(Self {
            allocator: Some(allocator),
            memory_properties,
            limits,
            device: Arc::clone(device),
            allocations: HashMap::new(),
        })
    }

    fn allocator(&mut self) -> Result<&mut Allocator> {
        self.allocator
            .as_mut()
            .ok_or_else(|| GpuError::InvalidState("Allocator not initialized".to_string()))
    }

    fn allocate(
        &mut self,
        requirements: vk::MemoryRequirements,
        request: &AllocationRequest<'_>,
        linear: bool,
        dedicated: AllocationScheme,
    ) -> Result<(Allocation, BoundMemory)> {
        let alignment = requirements.alignment.max(request.min_alignment);
        let requirements = vk::MemoryRequirements {
            alignment,
            ..requirements
        };
        let wants_dedicated = request.wants_dedicated(requirements.size);
        let allocation_scheme = if wants_dedicated {
            dedicated
        } else {
            AllocationScheme::GpuAllocatorManaged
        };

        let allocation = self
            .allocator()?
            .allocate(&AllocationCreateDesc {
                name: request.name,
                requirements,
                location: request.location,
                linear,
                allocation_scheme,
            })
            .map_err(|e| map_allocation_error(e, request.name))?;

        let bound = BoundMemory {
            size: allocation.size(),
            alignment,
            memory_type_index: allocation.memory_type_index() as u32,
            dedicated: allocation.is_dedicated(),
            host_visible: allocation.mapped_ptr().is_some(),
        };
        Ok((allocation, bound))
    }

    fn release(&mut self, handle: AllocationHandle) -> Result<()> {
        let tracked = self
            .allocations
            .remove(&handle)
            .ok_or(GpuError::UnknownAllocation(handle.raw()))?;
        self.allocator()?
            .free(tracked.allocation)
            .map_err(|e| GpuError::AllocationFailed(e.to_string()))
    }

    fn heap_of(&self, memory_type_index: u32) -> Option<usize> {
        self.memory_properties
            .memory_types
            .get(memory_type_index as usize)
            .map(|memory_type| memory_type.heap_index as usize)
    }
}

fn map_allocation_error(error: AllocationError, name: &str) -> GpuError {
    match error {
        AllocationError::OutOfMemory => GpuError::OutOfMemory(name.to_string()),
        other => GpuError::AllocationFailed(format!("{name}: {other}")),
    }
}

impl MemoryBackend for VulkanMemoryBackend {
    fn name(&self) -> &'static str {
        "gpu-allocator"
    }

    fn create_buffer(
        &mut self,
        handle: AllocationHandle,
        info: &vk::BufferCreateInfo<'_>,
        request: &AllocationRequest<'_>,
    ) -> Result<(vk::Buffer, BoundMemory)> {
        let device = Arc::clone(&self.device);
        let raw = device.device();
        let buffer = unsafe { raw.create_buffer(info, None)? };
        let requirements = unsafe { raw.get_buffer_memory_requirements(buffer) };

        let (allocation, bound) =
            match self.allocate(requirements, request, true, AllocationScheme::DedicatedBuffer(buffer)) {
                Ok(allocated) => allocated,
                Err(e) => {
                    unsafe { raw.destroy_buffer(buffer, None) };
                    return Err(e);
                }
            };

        if let Err(e) = unsafe { raw.bind_buffer_memory(buffer, allocation.memory(), allocation.offset()) } {
            if let Some(allocator) = self.allocator.as_mut() {
                let _ = allocator.free(allocation);
            }
            unsafe { raw.destroy_buffer(buffer, None) };
            return Err(e.into());
        }

        self.allocations.insert(
            handle,
            Tracked {
                allocation,
                memory_type_index: bound.memory_type_index,
            },
        );
        Ok((buffer, bound))
    }

    fn create_image(
        &mut self,
        handle: AllocationHandle,
        info: &vk::ImageCreateInfo<'_>,
        request: &AllocationRequest<'_>,
    ) -> Result<(vk::Image, BoundMemory)> {
        let device = Arc::clone(&self.device);
        let raw = device.device();
        let image = unsafe { raw.create_image(info, None)? };
        let requirements = unsafe { raw.get_image_memory_requirements(image) };
        let linear = info.tiling == vk::ImageTiling::LINEAR;

        let (allocation, bound) =
            match self.allocate(requirements, request, linear, AllocationScheme::DedicatedImage(image)) {
                Ok(allocated) => allocated,
                Err(e) => {
                    unsafe { raw.destroy_image(image, None) };
                    return Err(e);
                }
            };

        if let Err(e) = unsafe { raw.bind_image_memory(image, allocation.memory(), allocation.offset()) } {
            if let Some(allocator) = self.allocator.as_mut() {
                let _ = allocator.free(allocation);
            }
            unsafe { raw.destroy_image(image, None) };
            return Err(e.into());
        }

        self.allocations.insert(
            handle,
            Tracked {
                allocation,
                memory_type_index: bound.memory_type_index,
            },
        );
        Ok((image, bound))
    }

    fn destroy_buffer(&mut self, handle: AllocationHandle, buffer: vk::Buffer) -> Result<()> {
        if buffer != vk::Buffer::null() {
            unsafe { self.device.device().destroy_buffer(buffer, None) };
        }
        self.release(handle)
    }

    fn destroy_image(&mut self, handle: AllocationHandle, image: vk::Image) -> Result<()> {
        if image != vk::Image::null() {
            unsafe { self.device.device().destroy_image(image, None) };
        }
        self.release(handle)
    }

    fn mapped_ptr(&self, handle: AllocationHandle) -> Option<NonNull<u8>> {
        self.allocations
            .get(&handle)
            .and_then(|tracked| tracked.allocation.mapped_ptr())
            .map(|ptr| ptr.cast::<u8>())
    }

    fn report(&self) -> BackendReport {
        self.allocator
            .as_ref()
            .map(|allocator| {
                let report = allocator.generate_report();
                BackendReport {
                    reserved_bytes: report.total_reserved_bytes,
                    block_count: report.blocks.len(),
                }
            })
            .unwrap_or_default()
    }

    fn limits(&self) -> MemoryLimits {
        self.limits
    }

    fn heap_budgets(&self) -> Vec<HeapBudget> {
        let heap_count = self.memory_properties.memory_heap_count as usize;

        if self.device.capabilities().supports_memory_budget {
            let mut budget = vk::PhysicalDeviceMemoryBudgetPropertiesEXT::default();
            let mut properties = vk::PhysicalDeviceMemoryProperties2::default().push_next(&mut budget);
            unsafe {
                self.device
                    .instance()
                    .get_physical_device_memory_properties2(self.device.physical_device(), &mut properties)
            };
            return (0..heap_count)
                .map(|heap| HeapBudget {
                    budget: budget.heap_budget[heap],
                    usage: budget.heap_usage[heap],
                })
                .collect();
        }

        // Without VK_EXT_memory_budget: heap size as budget, own allocations as usage.
        let mut budgets: Vec<HeapBudget> = self.memory_properties.memory_heaps[..heap_count]
            .iter()
            .map(|heap| HeapBudget {
                budget: heap.size,
                usage: 0,
            })
            .collect();
        for tracked in self.allocations.values() {
            if let Some(budget) = self
                .heap_of(tracked.memory_type_index)
                .and_then(|heap| budgets.get_mut(heap))
            {
                budget.usage += tracked.allocation.size();
            }
        }
        budgets
    }

    fn shutdown(&mut self) {
        let Some(mut allocator) = self.allocator.take() else {
            return;
        };
        if !self.allocations.is_empty() {
            warn!(
                count = self.allocations.len(),
                "Releasing native allocations still held at shutdown"
            );
        }
        for (_, tracked) in self.allocations.drain() {
            if let Err(e) = allocator.free(tracked.allocation) {
                warn!("Failed to free allocation at shutdown: {e}");
            }
        }
        // Dropping the allocator releases its memory blocks.
        drop(allocator);
        debug!("gpu-allocator shut down");
    }
}

impl Drop for VulkanMemoryBackend {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn query_limits(device: &VulkanDevice, memory_properties: &vk::PhysicalDeviceMemoryProperties) -> MemoryLimits {
    let mut maintenance3 = vk::PhysicalDeviceMaintenance3Properties::default();
    let mut properties = vk::PhysicalDeviceProperties2::default().push_next(&mut maintenance3);
    unsafe {
        device
            .instance()
            .get_physical_device_properties2(device.physical_device(), &mut properties);
    }
    let block_alignment = properties.properties.limits.min_storage_buffer_offset_alignment;

    let largest_heap = memory_properties.memory_heaps[..memory_properties.memory_heap_count as usize]
        .iter()
        .map(|heap| heap.size)
        .max()
        .unwrap_or(0);

    MemoryLimits {
        max_allocation_size: maintenance3.max_memory_allocation_size,
        largest_heap,
        block_alignment,
    }
}
