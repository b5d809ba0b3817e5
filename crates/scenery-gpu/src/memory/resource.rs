//! Reference-counted buffer and image resources.

use super::allocator::MemoryAllocator;
use super::backend::AllocationHandle;
use crate::error::{GpuError, Result};
use ash::vk;
use gpu_allocator::MemoryLocation;
use std::ptr::NonNull;
use std::sync::Arc;
use tracing::warn;

/// Persistent host pointer into a mapped allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MappedPtr(NonNull<u8>);

// The pointer targets memory owned by the allocator and stays valid until the
// owning resource is destroyed. Access synchronisation is the caller's concern.
unsafe impl Send for MappedPtr {}
unsafe impl Sync for MappedPtr {}

impl MappedPtr {
    pub fn as_ptr(self) -> *mut u8 {
        self.0.as_ptr()
    }
}

/// Owns a buffer and its allocation; destroys both on drop.
#[derive(Debug)]
pub struct BufferResource {
    buffer: vk::Buffer,
    allocation: AllocationHandle,
    allocator: Arc<MemoryAllocator>,
}

impl BufferResource {
    pub fn buffer(&self) -> vk::Buffer {
        self.buffer
    }

    pub fn allocation(&self) -> AllocationHandle {
        self.allocation
    }
}

impl Drop for BufferResource {
    fn drop(&mut self) {
        if let Err(e) = self.allocator.destroy_buffer(self.buffer, self.allocation) {
            warn!(handle = %self.allocation, "Failed to destroy buffer: {e}");
        }
    }
}

/// Description of a buffer to create.
#[derive(Debug, Clone)]
pub struct BufferDesc {
    pub size: u64,
    pub usage: vk::BufferUsageFlags,
    pub location: MemoryLocation,
    pub name: String,
}

impl BufferDesc {
    pub fn new(size: u64, usage: vk::BufferUsageFlags, location: MemoryLocation) -> Self {
        Self {
            size,
            usage,
            location,
            name: String::from("buffer"),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

/// A GPU buffer. Clones share the underlying resource.
#[derive(Debug, Clone)]
pub struct Buffer {
    resource: Option<Arc<BufferResource>>,
    size: u64,
    alignment: u64,
    usage: vk::BufferUsageFlags,
    location: MemoryLocation,
    mapped: Option<MappedPtr>,
}

impl Default for Buffer {
    fn default() -> Self {
        Self {
            resource: None,
            size: 0,
            alignment: 0,
            usage: vk::BufferUsageFlags::empty(),
            location: MemoryLocation::Unknown,
            mapped: None,
        }
    }
}

/// Create a buffer through the allocator.
pub fn create_buffer(allocator: &Arc<MemoryAllocator>, desc: &BufferDesc) -> Result<Buffer> {
    if desc.size == 0 {
        return Err(GpuError::AllocationFailed(format!(
            "buffer '{}' has zero size",
            desc.name
        )));
    }

    let info = vk::BufferCreateInfo::default()
        .size(desc.size)
        .usage(desc.usage)
        .sharing_mode(vk::SharingMode::EXCLUSIVE);
    let allocation = allocator.allocate_buffer(&info, desc.location, &desc.name)?;
    let mapped = allocator.mapped_ptr(allocation.handle).map(MappedPtr);

    Ok(Buffer {
        resource: Some(Arc::new(BufferResource {
            buffer: allocation.buffer,
            allocation: allocation.handle,
            allocator: Arc::clone(allocator),
        })),
        size: desc.size,
        alignment: allocation.alignment,
        usage: desc.usage,
        location: desc.location,
        mapped,
    })
}

impl Buffer {
    pub fn is_valid(&self) -> bool {
        self.resource.is_some()
    }

    pub fn handle(&self) -> vk::Buffer {
        self.resource
            .as_ref()
            .map_or(vk::Buffer::null(), |resource| resource.buffer)
    }

    pub fn allocation(&self) -> Option<AllocationHandle> {
        self.resource.as_ref().map(|resource| resource.allocation)
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn alignment(&self) -> u64 {
        self.alignment
    }

    pub fn usage(&self) -> vk::BufferUsageFlags {
        self.usage
    }

    pub fn location(&self) -> MemoryLocation {
        self.location
    }

    /// Host pointer, if the buffer lives in host-visible memory.
    pub fn mapped_ptr(&self) -> Option<*mut u8> {
        self.mapped.map(MappedPtr::as_ptr)
    }

    fn checked_range(&self, offset: u64, len: usize) -> Result<*mut u8> {
        let ptr = self
            .mapped_ptr()
            .ok_or_else(|| GpuError::InvalidState("Buffer not mapped".to_string()))?;
        let end = offset
            .checked_add(len as u64)
            .ok_or_else(|| GpuError::InvalidState("Offset overflow".to_string()))?;
        if end > self.size {
            return Err(GpuError::InvalidState(
                "Data range too large for buffer".to_string(),
            ));
        }
        Ok(ptr)
    }

    /// Write typed data at the start of the buffer.
    pub fn write<T: bytemuck::Pod>(&self, data: &[T]) -> Result<()> {
        self.write_bytes(0, bytemuck::cast_slice(data))
    }

    /// Write raw bytes at `offset`.
    pub fn write_bytes(&self, offset: u64, data: &[u8]) -> Result<()> {
        let ptr = self.checked_range(offset, data.len())?;
        unsafe {
            std::ptr::copy_nonoverlapping(data.as_ptr(), ptr.add(offset as usize), data.len());
        }
        Ok(())
    }

    /// Read `out.len()` bytes starting at `offset`.
    pub fn read_bytes(&self, offset: u64, out: &mut [u8]) -> Result<()> {
        let ptr = self.checked_range(offset, out.len())?;
        unsafe {
            std::ptr::copy_nonoverlapping(ptr.add(offset as usize), out.as_mut_ptr(), out.len());
        }
        Ok(())
    }
}

/// Owns an image and its allocation; destroys both on drop.
#[derive(Debug)]
pub struct ImageResource {
    image: vk::Image,
    allocation: AllocationHandle,
    allocator: Arc<MemoryAllocator>,
}

impl ImageResource {
    pub fn image(&self) -> vk::Image {
        self.image
    }

    pub fn allocation(&self) -> AllocationHandle {
        self.allocation
    }
}

impl Drop for ImageResource {
    fn drop(&mut self) {
        if let Err(e) = self.allocator.destroy_image(self.image, self.allocation) {
            warn!(handle = %self.allocation, "Failed to destroy image: {e}");
        }
    }
}

/// Description of a 2D image to create.
#[derive(Debug, Clone)]
pub struct ImageDesc {
    pub format: vk::Format,
    pub extent: vk::Extent3D,
    pub mip_levels: u32,
    pub usage: vk::ImageUsageFlags,
    pub location: MemoryLocation,
    pub name: String,
}

impl ImageDesc {
    pub fn new_2d(format: vk::Format, width: u32, height: u32, usage: vk::ImageUsageFlags) -> Self {
        Self {
            format,
            extent: vk::Extent3D {
                width,
                height,
                depth: 1,
            },
            mip_levels: 1,
            usage,
            location: MemoryLocation::GpuOnly,
            name: String::from("image"),
        }
    }

    pub fn with_mip_levels(mut self, mip_levels: u32) -> Self {
        self.mip_levels = mip_levels.max(1);
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

/// A GPU image. Clones share the underlying resource.
#[derive(Debug, Clone)]
pub struct Image {
    resource: Option<Arc<ImageResource>>,
    format: vk::Format,
    extent: vk::Extent3D,
    mip_levels: u32,
    usage: vk::ImageUsageFlags,
    allocated_size: u64,
}

impl Default for Image {
    fn default() -> Self {
        Self {
            resource: None,
            format: vk::Format::UNDEFINED,
            extent: vk::Extent3D::default(),
            mip_levels: 1,
            usage: vk::ImageUsageFlags::empty(),
            allocated_size: 0,
        }
    }
}

/// Create an optimal-tiling 2D image through the allocator.
pub fn create_image(allocator: &Arc<MemoryAllocator>, desc: &ImageDesc) -> Result<Image> {
    let info = vk::ImageCreateInfo::default()
        .image_type(vk::ImageType::TYPE_2D)
        .format(desc.format)
        .extent(desc.extent)
        .mip_levels(desc.mip_levels)
        .array_layers(1)
        .samples(vk::SampleCountFlags::TYPE_1)
        .tiling(vk::ImageTiling::OPTIMAL)
        .usage(desc.usage)
        .sharing_mode(vk::SharingMode::EXCLUSIVE)
        .initial_layout(vk::ImageLayout::UNDEFINED);
    let allocation = allocator.allocate_image(&info, desc.location, &desc.name)?;

    Ok(Image {
        resource: Some(Arc::new(ImageResource {
            image: allocation.image,
            allocation: allocation.handle,
            allocator: Arc::clone(allocator),
        })),
        format: desc.format,
        extent: desc.extent,
        mip_levels: desc.mip_levels,
        usage: desc.usage,
        allocated_size: allocation.allocated_size,
    })
}

impl Image {
    pub fn is_valid(&self) -> bool {
        self.resource.is_some()
    }

    pub fn handle(&self) -> vk::Image {
        self.resource
            .as_ref()
            .map_or(vk::Image::null(), |resource| resource.image)
    }

    pub fn allocation(&self) -> Option<AllocationHandle> {
        self.resource.as_ref().map(|resource| resource.allocation)
    }

    pub fn format(&self) -> vk::Format {
        self.format
    }

    pub fn extent(&self) -> vk::Extent3D {
        self.extent
    }

    pub fn mip_levels(&self) -> u32 {
        self.mip_levels
    }

    pub fn usage(&self) -> vk::ImageUsageFlags {
        self.usage
    }

    pub fn allocated_size(&self) -> u64 {
        self.allocated_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headless::HeadlessMemoryBackend;
    use crate::memory::AllocatorConfig;

    fn allocator() -> Arc<MemoryAllocator> {
        Arc::new(MemoryAllocator::new(
            Box::new(HeadlessMemoryBackend::new()),
            AllocatorConfig::default().with_strict_handle_checks(false),
        ))
    }

    #[test]
    fn default_buffer_is_invalid() {
        let buffer = Buffer::default();
        assert!(!buffer.is_valid());
        assert_eq!(buffer.handle(), vk::Buffer::null());
        assert_eq!(buffer.location(), MemoryLocation::Unknown);
        assert!(buffer.write_bytes(0, &[1]).is_err());
    }

    #[test]
    fn getters_return_creation_flags() {
        let allocator = allocator();
        let usage = vk::BufferUsageFlags::VERTEX_BUFFER | vk::BufferUsageFlags::TRANSFER_DST;
        let buffer = create_buffer(
            &allocator,
            &BufferDesc::new(4096, usage, MemoryLocation::GpuOnly).with_name("vertices"),
        )
        .unwrap();

        assert!(buffer.is_valid());
        assert_eq!(buffer.size(), 4096);
        assert_eq!(buffer.usage(), usage);
        assert_eq!(buffer.location(), MemoryLocation::GpuOnly);
        assert!(buffer.alignment() > 0);
        assert!(buffer.mapped_ptr().is_none());
    }

    #[test]
    fn last_clone_frees_allocation() {
        let allocator = allocator();
        let buffer = create_buffer(
            &allocator,
            &BufferDesc::new(1024, vk::BufferUsageFlags::UNIFORM_BUFFER, MemoryLocation::CpuToGpu),
        )
        .unwrap();
        let clone = buffer.clone();
        drop(buffer);
        assert_eq!(allocator.live_allocations().len(), 1);
        drop(clone);
        assert!(allocator.live_allocations().is_empty());
    }

    #[test]
    fn host_visible_write_and_read() {
        let allocator = allocator();
        let buffer = create_buffer(
            &allocator,
            &BufferDesc::new(64, vk::BufferUsageFlags::UNIFORM_BUFFER, MemoryLocation::CpuToGpu),
        )
        .unwrap();

        buffer.write(&[1.0f32, 2.0, 3.0, 4.0]).unwrap();
        buffer.write_bytes(16, &[9, 8, 7]).unwrap();

        let mut out = [0u8; 4];
        buffer.read_bytes(0, &mut out).unwrap();
        assert_eq!(out, 1.0f32.to_ne_bytes());
        let mut tail = [0u8; 3];
        buffer.read_bytes(16, &mut tail).unwrap();
        assert_eq!(tail, [9, 8, 7]);

        assert!(buffer.write_bytes(60, &[0; 8]).is_err());
        assert!(buffer.write_bytes(u64::MAX, &[0]).is_err());
    }

    #[test]
    fn zero_sized_buffer_is_rejected() {
        let allocator = allocator();
        let result = create_buffer(
            &allocator,
            &BufferDesc::new(0, vk::BufferUsageFlags::UNIFORM_BUFFER, MemoryLocation::CpuToGpu),
        );
        assert!(result.is_err());
        assert!(allocator.live_allocations().is_empty());
    }

    #[test]
    fn image_records_description() {
        let allocator = allocator();
        let image = create_image(
            &allocator,
            &ImageDesc::new_2d(
                vk::Format::D32_SFLOAT,
                640,
                480,
                vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
            )
            .with_mip_levels(1)
            .with_name("depth"),
        )
        .unwrap();

        assert!(image.is_valid());
        assert_eq!(image.format(), vk::Format::D32_SFLOAT);
        assert_eq!(image.extent().width, 640);
        assert_eq!(image.mip_levels(), 1);
        assert!(image.allocated_size() >= 640 * 480 * 4);

        drop(image);
        assert!(allocator.live_allocations().is_empty());
        assert!(!Image::default().is_valid());
    }
}
