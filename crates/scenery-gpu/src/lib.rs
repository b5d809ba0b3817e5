//! GPU memory, swapchain and frame lifecycle for the Scenery Editor renderer.
//!
//! This crate provides:
//! - Memory allocation with per-handle tracking, size-class pools and budgets
//! - Reference-counted buffers and images
//! - Swapchain creation, recreation and presentation
//! - Per-frame command recording with GPU timing
//! - A Vulkan device behind the [`RenderDevice`] trait
//!
//! Enable the `headless` feature for GPU-less implementations of the device,
//! memory and window seams.

pub mod capabilities;
pub mod command;
pub mod context;
pub mod deferred;
pub mod device;
pub mod error;
#[cfg(any(test, feature = "headless"))]
pub mod headless;
pub mod instance;
pub mod memory;
pub mod render_data;
pub mod surface;
pub mod swapchain;
pub mod sync;

pub use capabilities::{GpuCapabilities, GpuVendor};
pub use command::{CommandConfig, CommandManager, PipelineStatistics, SubmitInfo};
pub use context::{VulkanDevice, VulkanDeviceBuilder};
pub use deferred::{ResourceReleaseQueue, RetiredResource};
pub use device::{
    AcquireOutcome, PresentOutcome, QueryKind, QueueFamilies, QueueKind, QueueSubmit,
    RenderDevice, RenderPassDesc, SwapchainDesc,
};
pub use error::{GpuError, Result};
pub use memory::{
    create_buffer, create_image, AllocationHandle, AllocationStats, AllocationStrategy,
    AllocatorConfig, Buffer, BufferDesc, DefragmentationFlags, Image, ImageDesc, MemoryAllocator,
    MemoryBackend, MemoryBudget, MemoryLocation, VulkanMemoryBackend,
};
pub use render_data::{RenderData, SharedRenderData};
pub use surface::{PlatformWindow, SurfaceSupport};
pub use swapchain::{SwapChain, SwapChainConfig, SwapChainImage, SwapChainState};
pub use sync::{FrameSync, FrameSyncManager};

pub use ash::vk;
