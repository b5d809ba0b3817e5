//! Per-frame context for rendering.

use ash::vk;

/// Everything needed to record the current frame.
///
/// Returned by [`GraphicsEngine::begin_frame`](crate::GraphicsEngine::begin_frame)
/// and handed back to [`GraphicsEngine::end_frame`](crate::GraphicsEngine::end_frame).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameContext {
    /// Graphics command buffer, already in the recording state.
    pub command_buffer: vk::CommandBuffer,
    /// Index of the acquired swapchain image.
    pub image_index: u32,
    /// Frame slot, in `0..frames_in_flight`.
    pub frame_slot: usize,
    /// Framebuffer of the acquired image.
    pub framebuffer: vk::Framebuffer,
    pub render_pass: vk::RenderPass,
    pub extent: vk::Extent2D,
    /// Frames presented before this one.
    pub frame_number: u64,
}
