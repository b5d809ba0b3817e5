//! The graphics engine composition root.
//!
//! [`GraphicsEngine`] owns the device, memory allocator, swapchain, command
//! manager, shared render data and deferred release queue, and drives the
//! per-frame acquire, record, submit and present sequence.

use crate::frame::FrameContext;
use crate::thread::ThreadingPolicy;
use scenery_gpu::device::{QueueKind, RenderDevice};
use scenery_gpu::memory::{AllocatorConfig, Buffer, Image, MemoryAllocator, MemoryBackend};
use scenery_gpu::{
    vk, CommandConfig, CommandManager, GpuError, PlatformWindow, RenderData, ResourceReleaseQueue,
    Result, SharedRenderData, SubmitInfo, SwapChain, SwapChainConfig, SwapChainState, VulkanDeviceBuilder,
    VulkanMemoryBackend,
};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Window title, also reported to the driver as the application name.
    pub title: String,
    /// Initial window width.
    pub width: u32,
    /// Initial window height.
    pub height: u32,
    /// Enable vsync.
    pub vsync: bool,
    /// Enable Vulkan validation layers (default: debug builds only).
    pub validation: bool,
    /// Frames the CPU may record ahead of the GPU.
    pub frames_in_flight: usize,
    /// Create a depth attachment alongside the swapchain images.
    pub depth_buffer: bool,
    pub threading: ThreadingPolicy,
    pub allocator: AllocatorConfig,
    pub commands: CommandConfig,
    /// Target frames per second (None for unlimited).
    pub target_fps: Option<u32>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            title: "Scenery Editor X".to_string(),
            width: 1280,
            height: 720,
            vsync: false,
            validation: cfg!(debug_assertions),
            frames_in_flight: scenery_gpu::swapchain::DEFAULT_FRAMES_IN_FLIGHT,
            depth_buffer: true,
            threading: ThreadingPolicy::default(),
            allocator: AllocatorConfig::default(),
            commands: CommandConfig::default(),
            target_fps: None,
        }
    }
}

impl EngineConfig {
    /// Create a new config with the given title.
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Default::default()
        }
    }

    /// Set the window dimensions.
    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    pub fn with_vsync(mut self, vsync: bool) -> Self {
        self.vsync = vsync;
        self
    }

    pub fn with_validation(mut self, validation: bool) -> Self {
        self.validation = validation;
        self
    }

    pub fn with_frames_in_flight(mut self, frames: usize) -> Self {
        self.frames_in_flight = frames.max(1);
        self
    }

    pub fn with_depth_buffer(mut self, enabled: bool) -> Self {
        self.depth_buffer = enabled;
        self
    }

    pub fn with_threading(mut self, threading: ThreadingPolicy) -> Self {
        self.threading = threading;
        self
    }

    pub fn with_allocator(mut self, allocator: AllocatorConfig) -> Self {
        self.allocator = allocator;
        self
    }

    pub fn with_commands(mut self, commands: CommandConfig) -> Self {
        self.commands = commands;
        self
    }

    /// Set the target FPS.
    pub fn with_target_fps(mut self, fps: u32) -> Self {
        self.target_fps = Some(fps);
        self
    }
}

/// Owns the GPU subsystems and runs the frame loop.
pub struct GraphicsEngine {
    config: EngineConfig,
    device: Arc<dyn RenderDevice>,
    allocator: Arc<MemoryAllocator>,
    swapchain: SwapChain,
    commands: CommandManager,
    render_data: SharedRenderData,
    release_queue: ResourceReleaseQueue,
    frame_number: u64,
    frame_active: bool,
    shut_down: bool,
}

impl std::fmt::Debug for GraphicsEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphicsEngine")
            .field("device", &self.device.name())
            .field("swapchain", &self.swapchain)
            .field("frame_number", &self.frame_number)
            .field("shut_down", &self.shut_down)
            .finish_non_exhaustive()
    }
}

impl GraphicsEngine {
    /// Assemble the engine over a device and a native memory backend.
    ///
    /// The swapchain is bound but has no surface yet; follow with
    /// [`init_surface`](Self::init_surface) and [`create`](Self::create).
    pub fn new(
        device: Arc<dyn RenderDevice>,
        backend: Box<dyn MemoryBackend>,
        config: EngineConfig,
    ) -> Result<Self> {
        let allocator = Arc::new(MemoryAllocator::new(backend, config.allocator.clone()));

        let mut swapchain = SwapChain::new(
            SwapChainConfig::default()
                .with_frames_in_flight(config.frames_in_flight)
                .with_depth_buffer(config.depth_buffer),
        );
        swapchain.init(Arc::clone(&device), Arc::clone(&allocator))?;
        let frames_in_flight = swapchain.frames_in_flight();

        let commands = CommandManager::new(Arc::clone(&device), config.commands, frames_in_flight)?;

        let render_data = SharedRenderData::new(RenderData {
            width: config.width,
            height: config.height,
            vsync: config.vsync,
            ..RenderData::new(frames_in_flight)
        });

        info!(
            device = device.name(),
            frames_in_flight,
            threading = ?config.threading,
            "Graphics engine initialized"
        );

        Ok(Self {
            config,
            device,
            allocator,
            swapchain,
            commands,
            render_data,
            release_queue: ResourceReleaseQueue::new(frames_in_flight),
            frame_number: 0,
            frame_active: false,
            shut_down: false,
        })
    }

    /// Bring up a Vulkan device, surface and swapchain for `window`.
    pub fn vulkan(window: &dyn PlatformWindow, config: EngineConfig) -> Result<Self> {
        let vulkan = Arc::new(
            VulkanDeviceBuilder::new()
                .app_name(&config.title)
                .validation(config.validation)
                .build()?,
        );
        info!("GPU: {}", vulkan.capabilities().summary());

        let backend = VulkanMemoryBackend::new(&vulkan, config.allocator.debug_settings)?;
        let device: Arc<dyn RenderDevice> = vulkan;
        let mut engine = Self::new(device, Box::new(backend), config)?;

        engine.attach_window(window)?;
        Ok(engine)
    }

    /// Create the surface and swapchain for `window`.
    ///
    /// Never blocks on the window. A minimized window gets a swapchain at the
    /// configured size with a resize pending, so frames are skipped until the
    /// first non-zero resize arrives through the event loop.
    pub fn attach_window(&mut self, window: &dyn PlatformWindow) -> Result<()> {
        self.init_surface(window)?;
        let (width, height) = window.framebuffer_size();
        if width == 0 || height == 0 {
            debug!("Window minimized at startup, deferring swapchain size");
            self.create(self.config.width, self.config.height)?;
            self.on_resize(width, height)?;
        } else {
            self.create(width, height)?;
        }
        Ok(())
    }

    fn ensure_running(&self) -> Result<()> {
        if self.shut_down {
            Err(GpuError::InvalidState("GraphicsEngine has been shut down".to_string()))
        } else {
            Ok(())
        }
    }

    pub fn init_surface(&mut self, window: &dyn PlatformWindow) -> Result<()> {
        self.ensure_running()?;
        self.swapchain.init_surface(window)
    }

    /// Create the swapchain with the configured vsync mode.
    pub fn create(&mut self, width: u32, height: u32) -> Result<()> {
        self.ensure_running()?;
        self.swapchain.create(width, height, self.config.vsync)?;
        self.sync_extent();
        Ok(())
    }

    fn sync_extent(&self) {
        let extent = self.swapchain.swap_extent();
        let vsync = self.swapchain.vsync();
        self.render_data.update(|data| {
            data.width = extent.width;
            data.height = extent.height;
            data.vsync = vsync;
        });
    }

    /// Start a frame.
    ///
    /// Returns `None` when the frame must be skipped, for example while the
    /// window is minimized or after the swapchain was rebuilt.
    #[cfg_attr(feature = "profiling-tracy", tracing::instrument(level = "trace", skip_all))]
    pub fn begin_frame(&mut self) -> Result<Option<FrameContext>> {
        self.ensure_running()?;
        if self.frame_active {
            return Err(GpuError::InvalidState(
                "begin_frame called before the previous frame ended".to_string(),
            ));
        }

        self.release_queue.process(self.frame_number);

        let Some(image_index) = self.swapchain.acquire_next_image()? else {
            self.sync_extent();
            return Ok(None);
        };

        let frame_slot = self.swapchain.current_frame();
        let extent = self.swapchain.swap_extent();
        let framebuffer = self.swapchain.framebuffer(image_index).ok_or_else(|| {
            GpuError::InvalidState(format!("No framebuffer for swapchain image {image_index}"))
        })?;

        // On failure the acquired image stays with the swapchain and the
        // next begin_frame picks it up again.
        let command_buffer = self.commands.begin(QueueKind::Graphics, frame_slot)?;
        self.frame_active = true;

        let frame_number = self.frame_number;
        let vsync = self.swapchain.vsync();
        self.render_data.update(|data| {
            data.width = extent.width;
            data.height = extent.height;
            data.image_index = image_index;
            data.swap_chain_current_frame = frame_slot;
            data.vsync = vsync;
            data.frame_number = frame_number;
        });

        Ok(Some(FrameContext {
            command_buffer,
            image_index,
            frame_slot,
            framebuffer,
            render_pass: self.swapchain.render_pass(),
            extent,
            frame_number,
        }))
    }

    /// Submit the recorded frame and present it.
    #[cfg_attr(feature = "profiling-tracy", tracing::instrument(level = "trace", skip_all))]
    pub fn end_frame(&mut self, frame: FrameContext) -> Result<()> {
        self.ensure_running()?;
        if !self.frame_active {
            return Err(GpuError::InvalidState("end_frame called without begin_frame".to_string()));
        }
        self.frame_active = false;

        let sync = *self
            .swapchain
            .frame_sync()
            .ok_or_else(|| GpuError::InvalidState("Swapchain has no frame sync".to_string()))?;

        let wait_semaphores = [sync.image_available];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let signal_semaphores = [sync.render_finished];
        self.commands.end(&SubmitInfo {
            wait_semaphores: &wait_semaphores,
            wait_stages: &wait_stages,
            signal_semaphores: &signal_semaphores,
            frame_fence: Some(sync.in_flight),
        })?;

        self.swapchain.present(frame.image_index)?;
        self.frame_number += 1;
        Ok(())
    }

    /// Resize the swapchain. Returns `false` when the resize was deferred
    /// because a dimension is zero.
    pub fn on_resize(&mut self, width: u32, height: u32) -> Result<bool> {
        self.ensure_running()?;
        let resized = self.swapchain.on_resize(width, height)?;
        if resized {
            self.sync_extent();
        }
        Ok(resized)
    }

    /// Block on window events until the framebuffer has a non-zero size,
    /// then resize to it.
    ///
    /// The window's events must be pumped elsewhere; from inside an event
    /// loop callback use [`Self::on_resize`] instead.
    pub fn wait_for_valid_extent(&mut self, window: &dyn PlatformWindow) -> Result<()> {
        let (mut width, mut height) = window.framebuffer_size();
        while width == 0 || height == 0 {
            window.wait_events();
            (width, height) = window.framebuffer_size();
        }
        self.on_resize(width, height)?;
        Ok(())
    }

    /// Release `buffer` once the frames currently in flight have finished.
    pub fn retire_buffer(&mut self, buffer: Buffer) {
        self.release_queue.retire_buffer(buffer, self.frame_number);
    }

    /// Release `image` once the frames currently in flight have finished.
    pub fn retire_image(&mut self, image: Image) {
        self.release_queue.retire_image(image, self.frame_number);
    }

    pub fn device(&self) -> &Arc<dyn RenderDevice> {
        &self.device
    }

    pub fn allocator(&self) -> &Arc<MemoryAllocator> {
        &self.allocator
    }

    pub fn swapchain(&self) -> &SwapChain {
        &self.swapchain
    }

    pub fn commands(&self) -> &CommandManager {
        &self.commands
    }

    /// Mutable access for timestamp queries while a frame is recording.
    pub fn commands_mut(&mut self) -> &mut CommandManager {
        &mut self.commands
    }

    pub fn render_data(&self) -> &SharedRenderData {
        &self.render_data
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Frames presented so far.
    pub fn frame_number(&self) -> u64 {
        self.frame_number
    }

    /// Resources waiting in the release queue.
    pub fn pending_releases(&self) -> usize {
        self.release_queue.pending_count()
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down
    }

    /// Tear everything down in dependency order.
    ///
    /// Every step runs even if an earlier one fails; the first error is
    /// returned. Calling this again is a no-op.
    pub fn shutdown(&mut self) -> Result<()> {
        if self.shut_down {
            return Ok(());
        }
        self.shut_down = true;
        self.frame_active = false;

        let mut first_error = None;
        let mut record = |step: &str, result: Result<()>| {
            if let Err(e) = result {
                error!("Shutdown: {step} failed: {e}");
                first_error.get_or_insert(e);
            }
        };

        record("wait idle", self.device.wait_idle());

        let released = self.release_queue.flush();
        if released > 0 {
            info!(released, "Flushed release queue");
        }

        record("command manager", self.commands.destroy());
        if matches!(
            self.swapchain.state(),
            SwapChainState::Ready | SwapChainState::SurfaceBound
        ) {
            record("swapchain", self.swapchain.destroy());
        }

        let leaked = self.allocator.stats().allocation_count;
        if leaked > 0 {
            warn!(leaked, "Allocations still live at engine shutdown");
        }
        self.allocator.shutdown();

        info!(frames = self.frame_number, "Graphics engine shut down");
        first_error.map_or(Ok(()), Err)
    }
}

impl Drop for GraphicsEngine {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            error!("Graphics engine shutdown failed: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scenery_gpu::device::AcquireOutcome;
    use scenery_gpu::headless::{HeadlessDevice, HeadlessMemoryBackend, HeadlessWindow, ObjectKind};
    use scenery_gpu::{create_buffer, BufferDesc, MemoryLocation};

    fn engine_with(device: &Arc<HeadlessDevice>, config: EngineConfig) -> GraphicsEngine {
        let config = config.with_allocator(AllocatorConfig::default().with_strict_handle_checks(false));
        let mut engine = GraphicsEngine::new(
            Arc::clone(device) as Arc<dyn RenderDevice>,
            Box::new(HeadlessMemoryBackend::new()),
            config,
        )
        .unwrap();
        engine.attach_window(&HeadlessWindow::new(800, 600)).unwrap();
        engine
    }

    fn engine(device: &Arc<HeadlessDevice>) -> GraphicsEngine {
        engine_with(device, EngineConfig::default())
    }

    fn run_frame(engine: &mut GraphicsEngine) -> bool {
        match engine.begin_frame().unwrap() {
            Some(frame) => {
                engine.end_frame(frame).unwrap();
                true
            }
            None => false,
        }
    }

    #[test]
    fn frame_loop_submits_and_presents() {
        let device = Arc::new(HeadlessDevice::new());
        let mut engine = engine(&device);

        for _ in 0..5 {
            assert!(run_frame(&mut engine));
        }

        assert_eq!(engine.frame_number(), 5);
        assert_eq!(device.present_count(), 5);
        // Command buffer submit plus the frame fence follow-up.
        assert_eq!(device.submit_count(QueueKind::Graphics), 10);

        let data = engine.render_data().snapshot();
        assert_eq!((data.width, data.height), (800, 600));
        assert_eq!(data.frame_number, 4);
        assert_eq!(data.frames_in_flight, 2);
        assert_eq!(data.swap_chain_current_frame, 0);
    }

    #[test]
    fn frame_context_matches_swapchain() {
        let device = Arc::new(HeadlessDevice::new());
        let mut engine = engine(&device);

        let frame = engine.begin_frame().unwrap().unwrap();
        assert_eq!(frame.frame_slot, 0);
        assert_eq!(frame.frame_number, 0);
        assert_eq!(frame.render_pass, engine.swapchain().render_pass());
        assert_eq!(frame.extent, engine.swapchain().swap_extent());
        assert_eq!(Some(frame.framebuffer), engine.swapchain().framebuffer(frame.image_index));
        assert_eq!(engine.commands().active_queue(), Some(QueueKind::Graphics));
        engine.end_frame(frame).unwrap();

        let frame = engine.begin_frame().unwrap().unwrap();
        assert_eq!(frame.frame_slot, 1);
        assert_eq!(frame.frame_number, 1);
        engine.end_frame(frame).unwrap();
    }

    #[test]
    fn frames_must_alternate_begin_and_end() {
        let device = Arc::new(HeadlessDevice::new());
        let mut engine = engine(&device);

        let frame = engine.begin_frame().unwrap().unwrap();
        assert!(matches!(engine.begin_frame(), Err(GpuError::InvalidState(_))));
        engine.end_frame(frame).unwrap();
        assert!(matches!(engine.end_frame(frame), Err(GpuError::InvalidState(_))));
    }

    #[test]
    fn busy_queue_does_not_stall_next_frame() {
        let device = Arc::new(HeadlessDevice::new());
        let mut engine = engine_with(
            &device,
            EngineConfig::default().with_commands(CommandConfig::default().with_strict_queue_checks(false)),
        );

        engine.commands_mut().begin(QueueKind::Transfer, 0).unwrap();
        assert!(matches!(engine.begin_frame(), Err(GpuError::QueueBusy(_))));
        engine.commands_mut().end(&SubmitInfo::default()).unwrap();

        // Same image, same slot, and the in-flight fence was never reset.
        let frame = engine.begin_frame().unwrap().unwrap();
        assert_eq!(frame.image_index, 0);
        assert_eq!(frame.frame_slot, 0);
        assert_eq!(device.acquire_count(), 1);
        engine.end_frame(frame).unwrap();

        for _ in 0..4 {
            assert!(run_frame(&mut engine));
        }
        assert_eq!(engine.frame_number(), 5);
    }

    #[test]
    fn failed_submit_does_not_stall_next_frame() {
        let device = Arc::new(HeadlessDevice::new());
        let mut engine = engine(&device);

        let frame = engine.begin_frame().unwrap().unwrap();
        device.fail_next_submit();
        assert!(engine.end_frame(frame).is_err());
        assert_eq!(device.present_count(), 0);
        assert_eq!(engine.frame_number(), 0);

        let frame = engine.begin_frame().unwrap().unwrap();
        assert_eq!(frame.frame_slot, 0);
        engine.end_frame(frame).unwrap();
        assert!(run_frame(&mut engine));
        assert!(run_frame(&mut engine));
        assert_eq!(device.present_count(), 3);
    }

    #[test]
    fn minimized_startup_defers_to_first_resize() {
        let device = Arc::new(HeadlessDevice::new());
        let mut engine = GraphicsEngine::new(
            Arc::clone(&device) as Arc<dyn RenderDevice>,
            Box::new(HeadlessMemoryBackend::new()),
            EngineConfig::default()
                .with_size(1280, 720)
                .with_allocator(AllocatorConfig::default().with_strict_handle_checks(false)),
        )
        .unwrap();

        let window = HeadlessWindow::new(0, 0);
        engine.attach_window(&window).unwrap();
        assert_eq!(window.wait_count(), 0);
        assert!(engine.swapchain().resize_pending());
        assert_eq!(engine.swapchain().swap_extent().width, 1280);
        assert!(engine.begin_frame().unwrap().is_none());

        // Restored through the event loop.
        assert!(engine.on_resize(1024, 768).unwrap());
        let frame = engine.begin_frame().unwrap().unwrap();
        assert_eq!(
            frame.extent,
            vk::Extent2D {
                width: 1024,
                height: 768
            }
        );
        engine.end_frame(frame).unwrap();
    }

    #[test]
    fn minimized_window_skips_frames_until_restored() {
        let device = Arc::new(HeadlessDevice::new());
        let mut engine = engine(&device);
        let creations = device.swapchain_creations();

        assert!(!engine.on_resize(0, 0).unwrap());
        assert!(engine.begin_frame().unwrap().is_none());
        assert_eq!(device.swapchain_creations(), creations);

        let window = HeadlessWindow::new(0, 0);
        window.push_size(0, 0);
        window.push_size(1024, 768);
        engine.wait_for_valid_extent(&window).unwrap();

        assert_eq!(window.wait_count(), 2);
        assert_eq!(device.swapchain_creations(), creations + 1);
        assert_eq!(engine.swapchain().swap_extent().width, 1024);
        assert_eq!(engine.render_data().snapshot().height, 768);
        assert!(run_frame(&mut engine));
    }

    #[test]
    fn out_of_date_acquire_skips_one_frame() {
        let device = Arc::new(HeadlessDevice::new());
        let mut engine = engine(&device);
        let creations = device.swapchain_creations();

        device.script_acquire(AcquireOutcome::OutOfDate);
        assert!(!run_frame(&mut engine));
        assert_eq!(device.swapchain_creations(), creations + 1);
        assert_eq!(engine.frame_number(), 0);

        assert!(run_frame(&mut engine));
        assert_eq!(engine.frame_number(), 1);
    }

    #[test]
    fn retired_buffers_are_released_after_frames_in_flight() {
        let device = Arc::new(HeadlessDevice::new());
        let mut engine = engine(&device);
        let baseline = engine.allocator().stats().allocation_count;

        let buffer = create_buffer(
            engine.allocator(),
            &BufferDesc::new(4096, vk::BufferUsageFlags::UNIFORM_BUFFER, MemoryLocation::CpuToGpu)
                .with_name("per-frame uniforms"),
        )
        .unwrap();
        engine.retire_buffer(buffer);
        assert_eq!(engine.pending_releases(), 1);

        // Retired at frame 0; matures once frame 3 begins.
        for _ in 0..3 {
            assert!(run_frame(&mut engine));
            assert_eq!(engine.allocator().stats().allocation_count, baseline + 1);
        }
        assert!(run_frame(&mut engine));
        assert_eq!(engine.pending_releases(), 0);
        assert_eq!(engine.allocator().stats().allocation_count, baseline);
    }

    #[test]
    fn shutdown_releases_everything() {
        let device = Arc::new(HeadlessDevice::new());
        let mut engine = engine(&device);
        for _ in 0..3 {
            run_frame(&mut engine);
        }
        let image_buffer = create_buffer(
            engine.allocator(),
            &BufferDesc::new(1024, vk::BufferUsageFlags::TRANSFER_SRC, MemoryLocation::CpuToGpu),
        )
        .unwrap();
        engine.retire_buffer(image_buffer);

        engine.shutdown().unwrap();

        assert!(engine.is_shut_down());
        assert_eq!(device.total_live_objects(), 0);
        assert_eq!(device.live_objects(ObjectKind::Surface), 0);
        assert_eq!(engine.allocator().stats().allocation_count, 0);
        assert!(engine.allocator().is_shut_down());
        assert_eq!(engine.swapchain().state(), SwapChainState::Uninitialized);

        // Idempotent, and the frame loop is closed.
        engine.shutdown().unwrap();
        assert!(matches!(engine.begin_frame(), Err(GpuError::InvalidState(_))));
    }

    #[test]
    fn drop_shuts_down() {
        let device = Arc::new(HeadlessDevice::new());
        {
            let mut engine = engine(&device);
            run_frame(&mut engine);
        }
        assert_eq!(device.total_live_objects(), 0);
    }

    #[test]
    fn shutdown_before_surface_is_clean() {
        let device = Arc::new(HeadlessDevice::new());
        let mut engine = GraphicsEngine::new(
            Arc::clone(&device) as Arc<dyn RenderDevice>,
            Box::new(HeadlessMemoryBackend::new()),
            EngineConfig::default(),
        )
        .unwrap();
        engine.shutdown().unwrap();
        assert_eq!(device.total_live_objects(), 0);
    }

    #[test]
    fn frames_in_flight_follows_config() {
        let device = Arc::new(HeadlessDevice::new());
        let mut engine = engine_with(&device, EngineConfig::default().with_frames_in_flight(3));

        assert_eq!(engine.swapchain().frames_in_flight(), 3);
        assert_eq!(engine.commands().frames_in_flight(), 3);
        assert_eq!(device.live_objects(ObjectKind::Semaphore), 6);

        let slots: Vec<_> = (0..4)
            .map(|_| {
                let frame = engine.begin_frame().unwrap().unwrap();
                engine.end_frame(frame).unwrap();
                frame.frame_slot
            })
            .collect();
        assert_eq!(slots, [0, 1, 2, 0]);
    }

    #[test]
    fn vsync_config_selects_fifo() {
        let device = Arc::new(HeadlessDevice::new());
        let engine = engine_with(&device, EngineConfig::default().with_vsync(true));
        assert_eq!(engine.swapchain().present_mode(), vk::PresentModeKHR::FIFO);
        assert!(engine.render_data().snapshot().vsync);
    }
}
