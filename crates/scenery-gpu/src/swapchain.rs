//! Swapchain management.
//!
//! [`SwapChain`] owns everything whose lifetime follows the presentation
//! surface: the surface itself, the swapchain images and views, a depth
//! attachment, the render pass, one framebuffer per image, and the per-slot
//! frame synchronisation objects.

use crate::device::{
    AcquireOutcome, PresentOutcome, QueueKind, QueueSubmit, RenderDevice, RenderPassDesc, SwapchainDesc,
};
use crate::error::{GpuError, Result};
use crate::memory::{create_image, Image, ImageDesc, MemoryAllocator};
use crate::surface::{PlatformWindow, SurfaceSupport};
use crate::sync::{FrameSync, FrameSyncManager};
use ash::vk;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Depth formats tried in order of preference.
pub const DEPTH_FORMAT_CANDIDATES: [vk::Format; 3] = [
    vk::Format::D32_SFLOAT,
    vk::Format::D32_SFLOAT_S8_UINT,
    vk::Format::D24_UNORM_S8_UINT,
];

/// Default number of frames the CPU may record ahead of the GPU.
pub const DEFAULT_FRAMES_IN_FLIGHT: usize = 2;

/// Surface format used unless configured otherwise.
pub const DEFAULT_SURFACE_FORMAT: vk::SurfaceFormatKHR = vk::SurfaceFormatKHR {
    format: vk::Format::B8G8R8A8_SRGB,
    color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
};

/// Swapchain configuration.
#[derive(Debug, Clone, Copy)]
pub struct SwapChainConfig {
    /// Frame slots; fixed for the lifetime of the swapchain.
    pub frames_in_flight: usize,
    pub preferred_format: vk::SurfaceFormatKHR,
    pub depth_buffer: bool,
}

impl Default for SwapChainConfig {
    fn default() -> Self {
        Self {
            frames_in_flight: DEFAULT_FRAMES_IN_FLIGHT,
            preferred_format: DEFAULT_SURFACE_FORMAT,
            depth_buffer: true,
        }
    }
}

impl SwapChainConfig {
    pub fn with_frames_in_flight(mut self, frames: usize) -> Self {
        self.frames_in_flight = frames.max(1);
        self
    }

    pub fn with_preferred_format(mut self, format: vk::SurfaceFormatKHR) -> Self {
        self.preferred_format = format;
        self
    }

    pub fn with_depth_buffer(mut self, enabled: bool) -> Self {
        self.depth_buffer = enabled;
        self
    }
}

/// Lifecycle state of a [`SwapChain`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwapChainState {
    Uninitialized,
    SurfaceBound,
    Ready,
    Recreating,
}

/// One presentable image with its view and framebuffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapChainImage {
    pub image: vk::Image,
    pub view: vk::ImageView,
    pub framebuffer: vk::Framebuffer,
}

#[derive(Debug)]
struct DepthAttachment {
    image: Image,
    view: vk::ImageView,
}

/// Objects rebuilt on every recreation.
#[derive(Debug, Default)]
struct Targets {
    swapchain: vk::SwapchainKHR,
    images: Vec<SwapChainImage>,
    depth: Option<DepthAttachment>,
    render_pass: vk::RenderPass,
}

impl Targets {
    /// Destroy everything but the swapchain handle.
    unsafe fn destroy_views(&mut self, device: &dyn RenderDevice) {
        for image in self.images.drain(..) {
            if image.framebuffer != vk::Framebuffer::null() {
                device.destroy_framebuffer(image.framebuffer);
            }
            device.destroy_image_view(image.view);
        }
        if let Some(depth) = self.depth.take() {
            device.destroy_image_view(depth.view);
            // Dropping the image frees it through the allocator.
            drop(depth.image);
        }
        if self.render_pass != vk::RenderPass::null() {
            device.destroy_render_pass(self.render_pass);
            self.render_pass = vk::RenderPass::null();
        }
    }

    unsafe fn destroy(&mut self, device: &dyn RenderDevice) {
        self.destroy_views(device);
        if self.swapchain != vk::SwapchainKHR::null() {
            device.destroy_swapchain(self.swapchain);
            self.swapchain = vk::SwapchainKHR::null();
        }
    }
}

/// Presentation swapchain and its per-frame resources.
pub struct SwapChain {
    config: SwapChainConfig,
    state: SwapChainState,
    device: Option<Arc<dyn RenderDevice>>,
    allocator: Option<Arc<MemoryAllocator>>,
    surface: vk::SurfaceKHR,
    targets: Targets,
    surface_format: vk::SurfaceFormatKHR,
    depth_format: vk::Format,
    present_mode: vk::PresentModeKHR,
    extent: vk::Extent2D,
    width: u32,
    height: u32,
    vsync: bool,
    sync: FrameSyncManager,
    pending_resize: Option<(u32, u32)>,
    needs_recreation: bool,
    /// Image acquired but not yet presented; its `image_available` signal is
    /// still pending.
    acquired: Option<u32>,
}

impl std::fmt::Debug for SwapChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SwapChain")
            .field("state", &self.state)
            .field("extent", &self.extent)
            .field("images", &self.targets.images.len())
            .field("present_mode", &self.present_mode)
            .finish_non_exhaustive()
    }
}

impl SwapChain {
    pub fn new(config: SwapChainConfig) -> Self {
        Self {
            config: SwapChainConfig {
                frames_in_flight: config.frames_in_flight.max(1),
                ..config
            },
            state: SwapChainState::Uninitialized,
            device: None,
            allocator: None,
            surface: vk::SurfaceKHR::null(),
            targets: Targets::default(),
            surface_format: vk::SurfaceFormatKHR::default(),
            depth_format: vk::Format::UNDEFINED,
            present_mode: vk::PresentModeKHR::FIFO,
            extent: vk::Extent2D::default(),
            width: 0,
            height: 0,
            vsync: true,
            sync: FrameSyncManager::default(),
            pending_resize: None,
            needs_recreation: false,
            acquired: None,
        }
    }

    /// Bind the swapchain to a device and allocator.
    pub fn init(&mut self, device: Arc<dyn RenderDevice>, allocator: Arc<MemoryAllocator>) -> Result<()> {
        if self.state != SwapChainState::Uninitialized {
            return Err(GpuError::InvalidState(format!(
                "SwapChain::init called in state {:?}",
                self.state
            )));
        }
        self.device = Some(device);
        self.allocator = Some(allocator);
        Ok(())
    }

    fn device(&self) -> Result<Arc<dyn RenderDevice>> {
        self.device
            .clone()
            .ok_or_else(|| GpuError::InvalidState("SwapChain is not bound to a device".to_string()))
    }

    /// Create the presentation surface for a window.
    pub fn init_surface(&mut self, window: &dyn PlatformWindow) -> Result<()> {
        if self.state != SwapChainState::Uninitialized {
            return Err(GpuError::InvalidState(format!(
                "SwapChain::init_surface called in state {:?}",
                self.state
            )));
        }
        let device = self.device()?;
        let (display, window_handle) = window.raw_handles()?;
        self.surface = device.create_surface(display, window_handle)?;
        self.state = SwapChainState::SurfaceBound;
        debug!("Presentation surface created");
        Ok(())
    }

    /// Create the swapchain and everything that depends on it.
    pub fn create(&mut self, width: u32, height: u32, vsync: bool) -> Result<()> {
        if self.state != SwapChainState::SurfaceBound {
            return Err(GpuError::InvalidState(format!(
                "SwapChain::create called in state {:?}",
                self.state
            )));
        }
        let device = self.device()?;

        if self.sync.is_empty() {
            self.sync = FrameSyncManager::new(device.as_ref(), self.config.frames_in_flight)?;
        }

        self.width = width;
        self.height = height;
        self.vsync = vsync;

        match self.build(device.as_ref(), vk::SwapchainKHR::null()) {
            Ok(targets) => {
                self.targets = targets;
                self.state = SwapChainState::Ready;
                Ok(())
            }
            Err(e) => {
                error!("Failed to create swapchain: {e}");
                Err(as_creation_error(e))
            }
        }
    }

    fn build(&mut self, device: &dyn RenderDevice, old_swapchain: vk::SwapchainKHR) -> Result<Targets> {
        let support = device.surface_support(self.surface)?;
        let surface_format = choose_swap_surface_format(&support.formats, self.config.preferred_format)?;
        let present_mode = support.recommended_present_mode(self.vsync);
        let extent = choose_swap_extent(&support.capabilities, self.width, self.height);
        let depth_format = if self.config.depth_buffer {
            find_depth_format(device)?
        } else {
            vk::Format::UNDEFINED
        };

        let mut targets = Targets::default();
        let result = self.fill_targets(
            device,
            &mut targets,
            &support,
            SwapchainDesc {
                surface: self.surface,
                min_image_count: support.image_count(),
                format: surface_format,
                extent,
                pre_transform: support.capabilities.current_transform,
                present_mode,
                old_swapchain,
            },
            depth_format,
        );
        if let Err(e) = result {
            unsafe { targets.destroy(device) };
            return Err(e);
        }

        self.surface_format = surface_format;
        self.present_mode = present_mode;
        self.extent = extent;
        self.depth_format = depth_format;

        info!(
            width = extent.width,
            height = extent.height,
            images = targets.images.len(),
            format = ?surface_format.format,
            present_mode = ?present_mode,
            "Swapchain created"
        );
        Ok(targets)
    }

    fn fill_targets(
        &self,
        device: &dyn RenderDevice,
        targets: &mut Targets,
        support: &SurfaceSupport,
        desc: SwapchainDesc,
        depth_format: vk::Format,
    ) -> Result<()> {
        debug!(
            min = support.capabilities.min_image_count,
            max = support.capabilities.max_image_count,
            requested = desc.min_image_count,
            "Swapchain image count"
        );
        targets.swapchain = device.create_swapchain(&desc)?;

        for image in device.swapchain_images(targets.swapchain)? {
            let view = device.create_image_view(image, desc.format.format, vk::ImageAspectFlags::COLOR)?;
            targets.images.push(SwapChainImage {
                image,
                view,
                framebuffer: vk::Framebuffer::null(),
            });
        }

        if depth_format != vk::Format::UNDEFINED {
            let allocator = self
                .allocator
                .as_ref()
                .ok_or_else(|| GpuError::InvalidState("SwapChain has no allocator".to_string()))?;
            let image = create_image(
                allocator,
                &ImageDesc::new_2d(
                    depth_format,
                    desc.extent.width,
                    desc.extent.height,
                    vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
                )
                .with_name("Swapchain depth"),
            )?;
            let view = match device.create_image_view(image.handle(), depth_format, depth_aspect(depth_format)) {
                Ok(view) => view,
                Err(e) => {
                    drop(image);
                    return Err(e);
                }
            };
            targets.depth = Some(DepthAttachment { image, view });
        }

        targets.render_pass = device.create_render_pass(&RenderPassDesc {
            color_format: desc.format.format,
            depth_format: (depth_format != vk::Format::UNDEFINED).then_some(depth_format),
        })?;

        let depth_view = targets.depth.as_ref().map(|depth| depth.view);
        for image in &mut targets.images {
            let mut attachments = vec![image.view];
            attachments.extend(depth_view);
            image.framebuffer = device.create_framebuffer(targets.render_pass, &attachments, desc.extent)?;
        }

        Ok(())
    }

    fn recreate(&mut self) -> Result<()> {
        let device = self.device()?;
        if self.acquired.take().is_some() {
            self.consume_image_available(device.as_ref())?;
        }
        device.wait_idle()?;
        self.state = SwapChainState::Recreating;

        let old_swapchain = self.targets.swapchain;
        unsafe { self.targets.destroy_views(device.as_ref()) };

        let result = self.build(device.as_ref(), old_swapchain);
        unsafe { device.destroy_swapchain(old_swapchain) };
        self.targets.swapchain = vk::SwapchainKHR::null();

        match result {
            Ok(targets) => {
                self.targets = targets;
                self.state = SwapChainState::Ready;
                self.needs_recreation = false;
                Ok(())
            }
            Err(e) => {
                error!("Failed to recreate swapchain: {e}");
                self.state = SwapChainState::SurfaceBound;
                Err(as_creation_error(e))
            }
        }
    }

    /// Handle a framebuffer resize.
    ///
    /// A zero dimension (minimized window) is remembered and nothing is
    /// rebuilt; returns whether the swapchain was recreated.
    pub fn on_resize(&mut self, width: u32, height: u32) -> Result<bool> {
        if width == 0 || height == 0 {
            debug!(width, height, "Deferring swapchain resize while minimized");
            self.pending_resize = Some((width, height));
            return Ok(false);
        }
        if self.state != SwapChainState::Ready {
            return Err(GpuError::InvalidState(format!(
                "SwapChain::on_resize called in state {:?}",
                self.state
            )));
        }

        self.pending_resize = None;
        self.width = width;
        self.height = height;
        self.recreate()?;
        Ok(true)
    }

    /// Drain the pending `image_available` signal of an image that is dropped
    /// without being presented.
    fn consume_image_available(&self, device: &dyn RenderDevice) -> Result<()> {
        let sync = self.sync.current();
        device.queue_submit(
            QueueKind::Graphics,
            &QueueSubmit {
                wait_semaphores: &[sync.image_available],
                wait_stages: &[vk::PipelineStageFlags::ALL_COMMANDS],
                ..Default::default()
            },
            vk::Fence::null(),
        )
    }

    /// Wait for the current slot and acquire the next image.
    ///
    /// Returns `None` when the frame must be skipped: a resize to zero is
    /// pending, or the swapchain was out of date and has been rebuilt. An
    /// image acquired earlier and never presented is handed out again.
    ///
    /// The slot's in-flight fence is left signalled; the frame submit resets it.
    #[cfg_attr(feature = "profiling-tracy", tracing::instrument(level = "trace", skip_all))]
    pub fn acquire_next_image(&mut self) -> Result<Option<u32>> {
        if self.state != SwapChainState::Ready {
            return Err(GpuError::InvalidState(format!(
                "SwapChain::acquire_next_image called in state {:?}",
                self.state
            )));
        }
        if self.pending_resize.is_some() {
            return Ok(None);
        }

        if let Some(index) = self.acquired {
            return Ok(Some(index));
        }

        let device = self.device()?;
        let sync = *self.sync.current();
        sync.wait(device.as_ref())?;

        let outcome = match device.acquire_next_image(self.targets.swapchain, sync.image_available) {
            Ok(outcome) => outcome,
            Err(e) if e.is_out_of_date() => AcquireOutcome::OutOfDate,
            Err(e) => return Err(e),
        };

        match outcome {
            AcquireOutcome::Acquired { index, suboptimal } => {
                if suboptimal {
                    self.needs_recreation = true;
                }
                self.acquired = Some(index);
                Ok(Some(index))
            }
            AcquireOutcome::OutOfDate => {
                warn!("Swapchain out of date on acquire, recreating");
                self.recreate()?;
                Ok(None)
            }
        }
    }

    /// Present an image and advance to the next frame slot.
    #[cfg_attr(feature = "profiling-tracy", tracing::instrument(level = "trace", skip_all))]
    pub fn present(&mut self, image_index: u32) -> Result<()> {
        if self.state != SwapChainState::Ready {
            return Err(GpuError::InvalidState(format!(
                "SwapChain::present called in state {:?}",
                self.state
            )));
        }
        let device = self.device()?;
        let sync = *self.sync.current();
        self.acquired = None;

        let outcome = match device.queue_present(self.targets.swapchain, image_index, &[sync.render_finished]) {
            Ok(outcome) => outcome,
            Err(e) if e.is_out_of_date() => PresentOutcome::OutOfDate,
            Err(e) => return Err(e),
        };

        if outcome.needs_recreation() || self.needs_recreation {
            debug!(?outcome, "Recreating swapchain after present");
            self.recreate()?;
        }

        self.sync.advance();
        Ok(())
    }

    /// Destroy every owned object, device objects first, then the surface.
    pub fn destroy(&mut self) -> Result<()> {
        if !matches!(self.state, SwapChainState::Ready | SwapChainState::SurfaceBound) {
            return Err(GpuError::InvalidState(format!(
                "SwapChain::destroy called in state {:?}",
                self.state
            )));
        }
        let device = self.device()?;
        let waited = if self.state == SwapChainState::Ready {
            device.wait_idle()
        } else {
            Ok(())
        };
        if let Err(e) = &waited {
            warn!("Destroying swapchain without idle device: {e}");
        }

        unsafe {
            self.targets.destroy(device.as_ref());
            self.sync.destroy(device.as_ref());
            device.destroy_surface(self.surface);
        }
        self.surface = vk::SurfaceKHR::null();
        self.pending_resize = None;
        self.needs_recreation = false;
        self.acquired = None;
        self.device = None;
        self.allocator = None;
        self.state = SwapChainState::Uninitialized;
        debug!("Swapchain destroyed");
        waited
    }

    pub fn state(&self) -> SwapChainState {
        self.state
    }

    pub fn render_pass(&self) -> vk::RenderPass {
        self.targets.render_pass
    }

    pub fn swap_extent(&self) -> vk::Extent2D {
        self.extent
    }

    pub fn color_format(&self) -> vk::Format {
        self.surface_format.format
    }

    pub fn surface_format(&self) -> vk::SurfaceFormatKHR {
        self.surface_format
    }

    pub fn depth_format(&self) -> vk::Format {
        self.depth_format
    }

    /// Requested width.
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Requested height.
    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn vsync(&self) -> bool {
        self.vsync
    }

    pub fn image_count(&self) -> usize {
        self.targets.images.len()
    }

    pub fn images(&self) -> &[SwapChainImage] {
        &self.targets.images
    }

    pub fn frames_in_flight(&self) -> usize {
        self.config.frames_in_flight
    }

    pub fn current_frame(&self) -> usize {
        self.sync.current_frame()
    }

    pub fn framebuffer(&self, image_index: u32) -> Option<vk::Framebuffer> {
        self.targets
            .images
            .get(image_index as usize)
            .map(|image| image.framebuffer)
    }

    /// Sync objects of the current frame slot.
    pub fn frame_sync(&self) -> Option<&FrameSync> {
        self.sync.all().get(self.sync.current_frame())
    }

    pub fn present_mode(&self) -> vk::PresentModeKHR {
        self.present_mode
    }

    /// Whether a zero-size resize is waiting for a usable size.
    pub fn resize_pending(&self) -> bool {
        self.pending_resize.is_some()
    }
}

impl Drop for SwapChain {
    fn drop(&mut self) {
        if matches!(self.state, SwapChainState::Ready | SwapChainState::SurfaceBound) {
            if let Err(e) = self.destroy() {
                warn!("Failed to destroy swapchain on drop: {e}");
            }
        }
    }
}

fn as_creation_error(e: GpuError) -> GpuError {
    match e {
        GpuError::SwapchainCreation(_) => e,
        other => GpuError::SwapchainCreation(other.to_string()),
    }
}

fn depth_aspect(format: vk::Format) -> vk::ImageAspectFlags {
    match format {
        vk::Format::D32_SFLOAT_S8_UINT | vk::Format::D24_UNORM_S8_UINT => {
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        }
        _ => vk::ImageAspectFlags::DEPTH,
    }
}

/// First depth format the device supports as an optimal-tiling attachment.
pub fn find_depth_format(device: &dyn RenderDevice) -> Result<vk::Format> {
    DEPTH_FORMAT_CANDIDATES
        .into_iter()
        .find(|&format| device.supports_depth_format(format))
        .ok_or_else(|| GpuError::SwapchainCreation("no supported depth format".to_string()))
}

/// Select the surface format: `preferred` if offered, otherwise the first one.
pub fn choose_swap_surface_format(
    available: &[vk::SurfaceFormatKHR],
    preferred: vk::SurfaceFormatKHR,
) -> Result<vk::SurfaceFormatKHR> {
    available
        .iter()
        .find(|&&format| format == preferred)
        .or_else(|| available.first())
        .copied()
        .ok_or_else(|| GpuError::SwapchainCreation("surface reports no formats".to_string()))
}

/// Select the present mode: mailbox if offered, otherwise FIFO.
pub fn choose_swap_present_mode(available: &[vk::PresentModeKHR]) -> vk::PresentModeKHR {
    if available.contains(&vk::PresentModeKHR::MAILBOX) {
        vk::PresentModeKHR::MAILBOX
    } else {
        vk::PresentModeKHR::FIFO
    }
}

/// Calculate swapchain extent.
pub fn choose_swap_extent(
    capabilities: &vk::SurfaceCapabilitiesKHR,
    desired_width: u32,
    desired_height: u32,
) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        capabilities.current_extent
    } else {
        vk::Extent2D {
            width: desired_width.clamp(
                capabilities.min_image_extent.width,
                capabilities.max_image_extent.width,
            ),
            height: desired_height.clamp(
                capabilities.min_image_extent.height,
                capabilities.max_image_extent.height,
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headless::{HeadlessDevice, HeadlessMemoryBackend, HeadlessWindow, ObjectKind};
    use crate::memory::AllocatorConfig;

    fn fmt(format: vk::Format, color_space: vk::ColorSpaceKHR) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR {
            format,
            color_space,
        }
    }

    fn setup(device: &Arc<HeadlessDevice>) -> (SwapChain, Arc<MemoryAllocator>) {
        let allocator = Arc::new(MemoryAllocator::new(
            Box::new(HeadlessMemoryBackend::new()),
            AllocatorConfig::default().with_strict_handle_checks(false),
        ));
        let mut swapchain = SwapChain::new(SwapChainConfig::default());
        swapchain
            .init(device.clone(), allocator.clone())
            .unwrap();
        (swapchain, allocator)
    }

    fn ready(device: &Arc<HeadlessDevice>) -> (SwapChain, Arc<MemoryAllocator>) {
        let (mut swapchain, allocator) = setup(device);
        swapchain.init_surface(&HeadlessWindow::new(800, 600)).unwrap();
        swapchain.create(800, 600, false).unwrap();
        (swapchain, allocator)
    }

    #[test]
    fn surface_format_prefers_srgb_bgra() {
        let preferred = fmt(vk::Format::B8G8R8A8_SRGB, vk::ColorSpaceKHR::SRGB_NONLINEAR);
        let available = [
            fmt(vk::Format::R8G8B8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            preferred,
        ];
        assert_eq!(choose_swap_surface_format(&available, DEFAULT_SURFACE_FORMAT).unwrap(), preferred);
    }

    #[test]
    fn surface_format_falls_back_to_first() {
        let available = [
            fmt(vk::Format::R8G8B8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            // Right format, wrong color space.
            fmt(vk::Format::B8G8R8A8_SRGB, vk::ColorSpaceKHR::DISPLAY_P3_NONLINEAR_EXT),
        ];
        assert_eq!(choose_swap_surface_format(&available, DEFAULT_SURFACE_FORMAT).unwrap(), available[0]);
        assert!(choose_swap_surface_format(&[], DEFAULT_SURFACE_FORMAT).is_err());
    }

    #[test]
    fn unoffered_preference_takes_first_format() {
        let hdr = fmt(vk::Format::R16G16B16A16_SFLOAT, vk::ColorSpaceKHR::EXTENDED_SRGB_LINEAR_EXT);
        let available = [
            fmt(vk::Format::R8G8B8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            DEFAULT_SURFACE_FORMAT,
        ];
        assert_eq!(choose_swap_surface_format(&available, hdr).unwrap(), available[0]);
        assert_eq!(
            choose_swap_surface_format(&available, available[0]).unwrap(),
            available[0]
        );
    }

    #[test]
    fn present_mode_fallback() {
        assert_eq!(
            choose_swap_present_mode(&[vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX]),
            vk::PresentModeKHR::MAILBOX
        );
        assert_eq!(
            choose_swap_present_mode(&[vk::PresentModeKHR::IMMEDIATE, vk::PresentModeKHR::FIFO]),
            vk::PresentModeKHR::FIFO
        );
        assert_eq!(choose_swap_present_mode(&[]), vk::PresentModeKHR::FIFO);
    }

    #[test]
    fn extent_clamps_only_with_sentinel() {
        let mut caps = vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D {
                width: 1024,
                height: 768,
            },
            min_image_extent: vk::Extent2D {
                width: 100,
                height: 100,
            },
            max_image_extent: vk::Extent2D {
                width: 2000,
                height: 2000,
            },
            ..Default::default()
        };
        assert_eq!(
            choose_swap_extent(&caps, 50, 5000),
            vk::Extent2D {
                width: 1024,
                height: 768
            }
        );

        caps.current_extent.width = u32::MAX;
        assert_eq!(
            choose_swap_extent(&caps, 50, 5000),
            vk::Extent2D {
                width: 100,
                height: 2000
            }
        );
    }

    #[test]
    fn extent_within_bounds_is_kept_and_outside_is_clamped() {
        let caps = vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D {
                width: u32::MAX,
                height: u32::MAX,
            },
            min_image_extent: vk::Extent2D {
                width: 100,
                height: 100,
            },
            max_image_extent: vk::Extent2D {
                width: 4000,
                height: 4000,
            },
            ..Default::default()
        };
        let extent = |width, height| vk::Extent2D { width, height };

        assert_eq!(choose_swap_extent(&caps, 800, 600), extent(800, 600));
        assert_eq!(choose_swap_extent(&caps, 50, 50), extent(100, 100));
        assert_eq!(choose_swap_extent(&caps, 5000, 5000), extent(4000, 4000));
        assert_eq!(choose_swap_extent(&caps, 100, 4000), extent(100, 4000));
    }

    #[test]
    fn cold_start_creates_sync_per_slot() {
        let device = Arc::new(HeadlessDevice::new());
        let (swapchain, allocator) = ready(&device);

        assert_eq!(swapchain.state(), SwapChainState::Ready);
        assert_eq!(device.live_objects(ObjectKind::Fence), 2);
        assert_eq!(device.live_objects(ObjectKind::Semaphore), 4);
        assert_eq!(swapchain.image_count(), 3);
        assert_eq!(device.live_objects(ObjectKind::Framebuffer), 3);
        assert_eq!(swapchain.color_format(), vk::Format::B8G8R8A8_SRGB);
        assert_eq!(swapchain.depth_format(), vk::Format::D32_SFLOAT);
        assert_eq!(swapchain.present_mode(), vk::PresentModeKHR::MAILBOX);
        assert_eq!(
            swapchain.swap_extent(),
            vk::Extent2D {
                width: 800,
                height: 600
            }
        );
        // The depth attachment comes from the allocator.
        assert_eq!(allocator.live_allocations().len(), 1);
    }

    #[test]
    fn cold_start_with_vsync_at_requested_size() {
        let device = Arc::new(HeadlessDevice::new());
        let (mut swapchain, _allocator) = setup(&device);
        swapchain.init_surface(&HeadlessWindow::new(1280, 720)).unwrap();
        swapchain.create(1280, 720, true).unwrap();

        assert_eq!(swapchain.state(), SwapChainState::Ready);
        assert_eq!(swapchain.width(), 1280);
        assert_eq!(swapchain.height(), 720);
        assert!(swapchain.vsync());
        assert_eq!(
            swapchain.swap_extent(),
            vk::Extent2D {
                width: 1280,
                height: 720
            }
        );
        assert_eq!(swapchain.present_mode(), vk::PresentModeKHR::FIFO);
        assert_eq!(swapchain.frames_in_flight(), DEFAULT_FRAMES_IN_FLIGHT);
        assert_eq!(device.live_objects(ObjectKind::Fence), DEFAULT_FRAMES_IN_FLIGHT);
        assert_eq!(device.live_objects(ObjectKind::Semaphore), 2 * DEFAULT_FRAMES_IN_FLIGHT);
        assert!(device.fence_signaled(swapchain.frame_sync().unwrap().in_flight).unwrap());
    }

    #[test]
    fn configured_format_falls_back_to_first_offered() {
        let device = Arc::new(HeadlessDevice::new());
        let mut support = SurfaceSupport {
            formats: vec![
                fmt(vk::Format::R8G8B8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
                DEFAULT_SURFACE_FORMAT,
            ],
            ..device.surface_support(vk::SurfaceKHR::null()).unwrap()
        };
        device.set_surface_support(support.clone());

        let allocator = Arc::new(MemoryAllocator::new(
            Box::new(HeadlessMemoryBackend::new()),
            AllocatorConfig::default().with_strict_handle_checks(false),
        ));
        let config = SwapChainConfig::default().with_preferred_format(fmt(
            vk::Format::A2B10G10R10_UNORM_PACK32,
            vk::ColorSpaceKHR::HDR10_ST2084_EXT,
        ));
        let mut swapchain = SwapChain::new(config);
        swapchain.init(device.clone(), allocator).unwrap();
        swapchain.init_surface(&HeadlessWindow::new(800, 600)).unwrap();
        swapchain.create(800, 600, false).unwrap();
        assert_eq!(swapchain.color_format(), vk::Format::R8G8B8A8_UNORM);

        // Once offered, the configured format wins over the list order.
        support.formats.push(config.preferred_format);
        device.set_surface_support(support);
        swapchain.on_resize(640, 480).unwrap();
        assert_eq!(swapchain.surface_format(), config.preferred_format);
    }

    #[test]
    fn vsync_forces_fifo() {
        let device = Arc::new(HeadlessDevice::new());
        let (mut swapchain, _allocator) = setup(&device);
        swapchain.init_surface(&HeadlessWindow::new(800, 600)).unwrap();
        swapchain.create(800, 600, true).unwrap();
        assert_eq!(swapchain.present_mode(), vk::PresentModeKHR::FIFO);
        assert_eq!(
            device.last_swapchain_desc().unwrap().present_mode,
            vk::PresentModeKHR::FIFO
        );
    }

    #[test]
    fn depth_format_falls_through_candidates() {
        let device = Arc::new(HeadlessDevice::new());
        device.set_depth_formats(vec![vk::Format::D24_UNORM_S8_UINT]);
        let (swapchain, _allocator) = ready(&device);
        assert_eq!(swapchain.depth_format(), vk::Format::D24_UNORM_S8_UINT);

        device.set_depth_formats(Vec::new());
        assert!(find_depth_format(device.as_ref()).is_err());
    }

    #[test]
    fn zero_resize_is_deferred() {
        let device = Arc::new(HeadlessDevice::new());
        let (mut swapchain, _allocator) = ready(&device);
        let creations = device.swapchain_creations();
        let idles = device.wait_idle_calls();

        assert!(!swapchain.on_resize(0, 600).unwrap());
        assert!(swapchain.resize_pending());
        assert_eq!(swapchain.acquire_next_image().unwrap(), None);
        assert_eq!(device.swapchain_creations(), creations);
        assert_eq!(device.wait_idle_calls(), idles);

        assert!(swapchain.on_resize(1024, 768).unwrap());
        assert!(!swapchain.resize_pending());
        assert_eq!(device.swapchain_creations(), creations + 1);
        assert_eq!(swapchain.swap_extent().width, 1024);
        assert_eq!(swapchain.acquire_next_image().unwrap(), Some(0));
    }

    #[test]
    fn recreation_does_not_leak() {
        let device = Arc::new(HeadlessDevice::new());
        let (mut swapchain, allocator) = ready(&device);
        let live = device.total_live_objects();

        for size in [640, 1280, 320] {
            swapchain.on_resize(size, size).unwrap();
        }
        assert_eq!(device.total_live_objects(), live);
        assert_eq!(device.live_objects(ObjectKind::Swapchain), 1);
        assert_eq!(allocator.live_allocations().len(), 1);
    }

    #[test]
    fn out_of_date_acquire_recreates_and_skips() {
        let device = Arc::new(HeadlessDevice::new());
        let (mut swapchain, _allocator) = ready(&device);
        let creations = device.swapchain_creations();

        device.script_acquire(AcquireOutcome::OutOfDate);
        assert_eq!(swapchain.acquire_next_image().unwrap(), None);
        assert_eq!(device.swapchain_creations(), creations + 1);
        assert_eq!(swapchain.state(), SwapChainState::Ready);

        // The fence was never reset, so the next acquire does not block.
        assert!(swapchain.acquire_next_image().unwrap().is_some());
    }

    #[test]
    fn unpresented_image_is_handed_out_again() {
        let device = Arc::new(HeadlessDevice::new());
        let (mut swapchain, _allocator) = ready(&device);

        let image = swapchain.acquire_next_image().unwrap();
        assert!(image.is_some());
        // Frame abandoned before submit: the image and its semaphore signal
        // are still pending, so no second acquire reaches the device.
        assert_eq!(swapchain.acquire_next_image().unwrap(), image);
        assert_eq!(device.acquire_count(), 1);
        assert!(device.fence_signaled(swapchain.frame_sync().unwrap().in_flight).unwrap());

        swapchain.present(image.unwrap()).unwrap();
        swapchain.acquire_next_image().unwrap();
        assert_eq!(device.acquire_count(), 2);
    }

    #[test]
    fn resize_drains_unpresented_image() {
        let device = Arc::new(HeadlessDevice::new());
        let (mut swapchain, _allocator) = ready(&device);

        swapchain.acquire_next_image().unwrap();
        let submits = device.submit_count(QueueKind::Graphics);
        swapchain.on_resize(1024, 768).unwrap();
        assert_eq!(device.submit_count(QueueKind::Graphics), submits + 1);

        // The rebuilt swapchain acquires afresh.
        assert_eq!(swapchain.acquire_next_image().unwrap(), Some(0));
        assert_eq!(device.acquire_count(), 2);
    }

    #[test]
    fn failed_idle_wait_keeps_swapchain_destroyable() {
        let device = Arc::new(HeadlessDevice::new());
        let (mut swapchain, allocator) = ready(&device);

        device.fail_next_wait_idle();
        assert!(matches!(
            swapchain.on_resize(1024, 768),
            Err(GpuError::Vulkan(vk::Result::ERROR_DEVICE_LOST))
        ));
        assert_eq!(swapchain.state(), SwapChainState::Ready);

        device.fail_next_wait_idle();
        assert!(swapchain.destroy().is_err());
        assert_eq!(swapchain.state(), SwapChainState::Uninitialized);
        assert_eq!(device.total_live_objects(), 0);
        assert!(allocator.live_allocations().is_empty());
    }

    #[test]
    fn suboptimal_acquire_recreates_after_present() {
        let device = Arc::new(HeadlessDevice::new());
        let (mut swapchain, _allocator) = ready(&device);
        let creations = device.swapchain_creations();

        device.script_acquire(AcquireOutcome::Acquired {
            index: 1,
            suboptimal: true,
        });
        assert_eq!(swapchain.acquire_next_image().unwrap(), Some(1));
        assert_eq!(device.swapchain_creations(), creations);

        swapchain.present(1).unwrap();
        assert_eq!(device.swapchain_creations(), creations + 1);
        assert_eq!(swapchain.current_frame(), 1);
    }

    #[test]
    fn out_of_date_present_recreates() {
        let device = Arc::new(HeadlessDevice::new());
        let (mut swapchain, _allocator) = ready(&device);
        let creations = device.swapchain_creations();

        device.script_present(PresentOutcome::OutOfDate);
        let image = swapchain.acquire_next_image().unwrap().unwrap();
        swapchain.present(image).unwrap();
        assert_eq!(device.swapchain_creations(), creations + 1);
    }

    #[test]
    fn failed_create_stays_surface_bound() {
        let device = Arc::new(HeadlessDevice::new());
        let (mut swapchain, allocator) = setup(&device);
        swapchain.init_surface(&HeadlessWindow::new(800, 600)).unwrap();

        device.fail_next_swapchain_creation();
        assert!(matches!(
            swapchain.create(800, 600, false),
            Err(GpuError::SwapchainCreation(_))
        ));
        assert_eq!(swapchain.state(), SwapChainState::SurfaceBound);
        assert_eq!(device.live_objects(ObjectKind::ImageView), 0);
        assert!(allocator.live_allocations().is_empty());

        swapchain.create(800, 600, false).unwrap();
        assert_eq!(swapchain.state(), SwapChainState::Ready);
    }

    #[test]
    fn state_machine_guards() {
        let device = Arc::new(HeadlessDevice::new());
        let (mut swapchain, _allocator) = setup(&device);

        assert!(swapchain.destroy().is_err());
        assert!(swapchain.create(800, 600, false).is_err());
        assert!(swapchain.acquire_next_image().is_err());

        swapchain.init_surface(&HeadlessWindow::new(800, 600)).unwrap();
        assert!(swapchain.present(0).is_err());
        // Destroy from SurfaceBound is allowed.
        swapchain.destroy().unwrap();
        assert_eq!(swapchain.state(), SwapChainState::Uninitialized);
        assert_eq!(device.live_objects(ObjectKind::Surface), 0);
        assert!(swapchain.destroy().is_err());
    }

    #[test]
    fn destroy_releases_everything() {
        let device = Arc::new(HeadlessDevice::new());
        let (mut swapchain, allocator) = ready(&device);
        swapchain.destroy().unwrap();
        assert_eq!(device.total_live_objects(), 0);
        assert!(allocator.live_allocations().is_empty());
    }
}
