//! Device abstraction used by the swapchain and frame coordination.
//!
//! [`RenderDevice`] covers exactly the Vulkan entry points the swapchain,
//! command manager and frame sync need. [`VulkanDevice`](crate::VulkanDevice)
//! implements it with ash; the headless device implements it for tests.
//!
//! Methods that release a handle are `unsafe`: the caller guarantees the
//! handle came from the same device and is no longer in use by the GPU.

use crate::error::Result;
use crate::surface::SurfaceSupport;
use ash::vk;
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};

/// Queue a command buffer is recorded for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum QueueKind {
    Graphics,
    Compute,
    Transfer,
}

impl QueueKind {
    pub const ALL: [Self; 3] = [Self::Graphics, Self::Compute, Self::Transfer];

    pub fn index(self) -> usize {
        self as usize
    }
}

/// Queue family indices selected for the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFamilies {
    pub graphics: u32,
    pub present: u32,
    pub compute: u32,
    pub transfer: u32,
}

impl QueueFamilies {
    pub fn family(&self, queue: QueueKind) -> u32 {
        match queue {
            QueueKind::Graphics => self.graphics,
            QueueKind::Compute => self.compute,
            QueueKind::Transfer => self.transfer,
        }
    }
}

/// Result of acquiring a swapchain image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireOutcome {
    /// An image is held; `suboptimal` asks for recreation after present.
    Acquired { index: u32, suboptimal: bool },
    /// The swapchain no longer matches the surface.
    OutOfDate,
}

/// Result of presenting a swapchain image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentOutcome {
    Presented,
    Suboptimal,
    OutOfDate,
}

impl PresentOutcome {
    pub fn needs_recreation(self) -> bool {
        !matches!(self, Self::Presented)
    }
}

/// Parameters for swapchain creation.
#[derive(Debug, Clone, Copy)]
pub struct SwapchainDesc {
    pub surface: vk::SurfaceKHR,
    pub min_image_count: u32,
    pub format: vk::SurfaceFormatKHR,
    pub extent: vk::Extent2D,
    pub pre_transform: vk::SurfaceTransformFlagsKHR,
    pub present_mode: vk::PresentModeKHR,
    pub old_swapchain: vk::SwapchainKHR,
}

/// Single-subpass render pass with one color and an optional depth attachment.
#[derive(Debug, Clone, Copy)]
pub struct RenderPassDesc {
    pub color_format: vk::Format,
    pub depth_format: Option<vk::Format>,
}

/// Semaphores and command buffers for one queue submission.
#[derive(Debug, Clone, Copy, Default)]
pub struct QueueSubmit<'a> {
    pub command_buffers: &'a [vk::CommandBuffer],
    pub wait_semaphores: &'a [vk::Semaphore],
    pub wait_stages: &'a [vk::PipelineStageFlags],
    pub signal_semaphores: &'a [vk::Semaphore],
}

/// Kind of query pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryKind {
    Timestamp,
    /// The seven graphics pipeline statistics counters.
    PipelineStatistics,
}

/// Number of counters in a pipeline statistics query.
pub const PIPELINE_STATISTICS_COUNTERS: usize = 7;

/// The pipeline statistics counters enabled on statistics query pools.
pub fn pipeline_statistics_flags() -> vk::QueryPipelineStatisticFlags {
    vk::QueryPipelineStatisticFlags::INPUT_ASSEMBLY_VERTICES
        | vk::QueryPipelineStatisticFlags::INPUT_ASSEMBLY_PRIMITIVES
        | vk::QueryPipelineStatisticFlags::VERTEX_SHADER_INVOCATIONS
        | vk::QueryPipelineStatisticFlags::CLIPPING_INVOCATIONS
        | vk::QueryPipelineStatisticFlags::CLIPPING_PRIMITIVES
        | vk::QueryPipelineStatisticFlags::FRAGMENT_SHADER_INVOCATIONS
        | vk::QueryPipelineStatisticFlags::COMPUTE_SHADER_INVOCATIONS
}

/// Device and instance operations needed by the frame lifecycle.
pub trait RenderDevice: Send + Sync {
    /// Name of the physical device.
    fn name(&self) -> &str;
    fn queue_families(&self) -> QueueFamilies;
    /// Nanoseconds per timestamp tick.
    fn timestamp_period(&self) -> f32;
    fn supports_pipeline_statistics(&self) -> bool;
    /// Whether `format` can be an optimal-tiling depth attachment.
    fn supports_depth_format(&self, format: vk::Format) -> bool;

    fn create_surface(
        &self,
        display: RawDisplayHandle,
        window: RawWindowHandle,
    ) -> Result<vk::SurfaceKHR>;
    fn surface_support(&self, surface: vk::SurfaceKHR) -> Result<SurfaceSupport>;
    unsafe fn destroy_surface(&self, surface: vk::SurfaceKHR);

    fn create_swapchain(&self, desc: &SwapchainDesc) -> Result<vk::SwapchainKHR>;
    fn swapchain_images(&self, swapchain: vk::SwapchainKHR) -> Result<Vec<vk::Image>>;
    fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        signal: vk::Semaphore,
    ) -> Result<AcquireOutcome>;
    fn queue_present(
        &self,
        swapchain: vk::SwapchainKHR,
        image_index: u32,
        wait: &[vk::Semaphore],
    ) -> Result<PresentOutcome>;
    unsafe fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR);

    fn create_image_view(
        &self,
        image: vk::Image,
        format: vk::Format,
        aspect: vk::ImageAspectFlags,
    ) -> Result<vk::ImageView>;
    unsafe fn destroy_image_view(&self, view: vk::ImageView);

    fn create_render_pass(&self, desc: &RenderPassDesc) -> Result<vk::RenderPass>;
    unsafe fn destroy_render_pass(&self, render_pass: vk::RenderPass);

    fn create_framebuffer(
        &self,
        render_pass: vk::RenderPass,
        attachments: &[vk::ImageView],
        extent: vk::Extent2D,
    ) -> Result<vk::Framebuffer>;
    unsafe fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer);

    fn create_fence(&self, signaled: bool) -> Result<vk::Fence>;
    fn wait_for_fences(&self, fences: &[vk::Fence], timeout_ns: u64) -> Result<()>;
    fn reset_fences(&self, fences: &[vk::Fence]) -> Result<()>;
    fn fence_signaled(&self, fence: vk::Fence) -> Result<bool>;
    unsafe fn destroy_fence(&self, fence: vk::Fence);

    fn create_semaphore(&self) -> Result<vk::Semaphore>;
    unsafe fn destroy_semaphore(&self, semaphore: vk::Semaphore);

    fn create_command_pool(&self, queue: QueueKind) -> Result<vk::CommandPool>;
    fn allocate_command_buffer(&self, pool: vk::CommandPool) -> Result<vk::CommandBuffer>;
    fn reset_command_pool(&self, pool: vk::CommandPool) -> Result<()>;
    fn begin_command_buffer(&self, command_buffer: vk::CommandBuffer) -> Result<()>;
    fn end_command_buffer(&self, command_buffer: vk::CommandBuffer) -> Result<()>;
    unsafe fn destroy_command_pool(&self, pool: vk::CommandPool);

    /// Submit work to a queue, signalling `fence` on completion.
    fn queue_submit(&self, queue: QueueKind, submit: &QueueSubmit<'_>, fence: vk::Fence)
        -> Result<()>;

    fn create_query_pool(&self, kind: QueryKind, count: u32) -> Result<vk::QueryPool>;
    fn cmd_reset_query_pool(
        &self,
        command_buffer: vk::CommandBuffer,
        pool: vk::QueryPool,
        first: u32,
        count: u32,
    );
    fn cmd_write_timestamp(
        &self,
        command_buffer: vk::CommandBuffer,
        stage: vk::PipelineStageFlags,
        pool: vk::QueryPool,
        query: u32,
    );
    fn cmd_begin_query(&self, command_buffer: vk::CommandBuffer, pool: vk::QueryPool, query: u32);
    fn cmd_end_query(&self, command_buffer: vk::CommandBuffer, pool: vk::QueryPool, query: u32);
    /// 64-bit timestamp results of `count` queries starting at `first`.
    fn timestamp_results(&self, pool: vk::QueryPool, first: u32, count: u32) -> Result<Vec<u64>>;
    /// Counters of the first query in a pipeline statistics pool.
    fn pipeline_statistics_results(
        &self,
        pool: vk::QueryPool,
    ) -> Result<[u64; PIPELINE_STATISTICS_COUNTERS]>;
    unsafe fn destroy_query_pool(&self, pool: vk::QueryPool);

    fn cmd_begin_render_pass(
        &self,
        command_buffer: vk::CommandBuffer,
        render_pass: vk::RenderPass,
        framebuffer: vk::Framebuffer,
        extent: vk::Extent2D,
        clear_values: &[vk::ClearValue],
    );
    fn cmd_end_render_pass(&self, command_buffer: vk::CommandBuffer);

    fn wait_idle(&self) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_indices_are_dense() {
        for (i, queue) in QueueKind::ALL.iter().enumerate() {
            assert_eq!(queue.index(), i);
        }
    }

    #[test]
    fn queue_family_lookup() {
        let families = QueueFamilies {
            graphics: 0,
            present: 0,
            compute: 1,
            transfer: 2,
        };
        assert_eq!(families.family(QueueKind::Compute), 1);
        assert_eq!(families.family(QueueKind::Transfer), 2);
    }

    #[test]
    fn statistics_flags_cover_all_counters() {
        assert_eq!(
            pipeline_statistics_flags().as_raw().count_ones() as usize,
            PIPELINE_STATISTICS_COUNTERS
        );
        assert!(!PresentOutcome::Presented.needs_recreation());
        assert!(PresentOutcome::Suboptimal.needs_recreation());
    }
}
