use crate::device::{
    AcquireOutcome, PresentOutcome, QueryKind, QueueFamilies, QueueKind, QueueSubmit,
    RenderDevice, RenderPassDesc, SwapchainDesc, PIPELINE_STATISTICS_COUNTERS,
};
use crate::error::{GpuError, Result};
use crate::surface::SurfaceSupport;
use ash::vk::{self, Handle};
use parking_lot::Mutex;
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};
use std::collections::{HashMap, HashSet, VecDeque};
use std::time::{Duration, Instant};

/// Object categories counted by [`HeadlessDevice::live_objects`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    Surface,
    Swapchain,
    ImageView,
    RenderPass,
    Framebuffer,
    Fence,
    Semaphore,
    CommandPool,
    CommandBuffer,
    QueryPool,
}

/// Ticks added to the timestamp counter by every timestamp write.
const TIMESTAMP_STEP: u64 = 1000;

/// Counter values reported by headless pipeline statistics queries.
const PIPELINE_STATISTICS: [u64; PIPELINE_STATISTICS_COUNTERS] = [3, 1, 3, 1, 1, 100, 0];

#[derive(Debug, Default)]
struct FenceState {
    signaled: bool,
    signal_at: Option<Instant>,
}

impl FenceState {
    fn is_signaled(&self, now: Instant) -> bool {
        self.signaled || self.signal_at.is_some_and(|at| at <= now)
    }
}

#[derive(Debug)]
struct SwapchainState {
    images: Vec<vk::Image>,
    next_image: u32,
}

#[derive(Debug)]
struct QueryPoolState {
    kind: QueryKind,
    values: Vec<Option<u64>>,
    statistics: Option<[u64; PIPELINE_STATISTICS_COUNTERS]>,
}

#[derive(Debug)]
struct State {
    next_handle: u64,
    live: HashMap<ObjectKind, usize>,
    fences: HashMap<u64, FenceState>,
    swapchains: HashMap<u64, SwapchainState>,
    command_pools: HashMap<u64, Vec<u64>>,
    recording: HashSet<u64>,
    query_pools: HashMap<u64, QueryPoolState>,
    surface_support: SurfaceSupport,
    depth_formats: Vec<vk::Format>,
    acquire_script: VecDeque<AcquireOutcome>,
    present_script: VecDeque<PresentOutcome>,
    fail_swapchain_creation: bool,
    fail_submit: bool,
    fail_wait_idle: bool,
    last_swapchain: Option<SwapchainDesc>,
    swapchain_creations: usize,
    presents: usize,
    acquires: usize,
    wait_idle_calls: usize,
    submits: HashMap<QueueKind, usize>,
    timestamp: u64,
}

impl State {
    fn handle(&mut self) -> u64 {
        self.next_handle += 1;
        self.next_handle
    }

    fn created(&mut self, kind: ObjectKind) -> u64 {
        *self.live.entry(kind).or_default() += 1;
        self.handle()
    }

    fn destroyed(&mut self, kind: ObjectKind) {
        if let Some(count) = self.live.get_mut(&kind) {
            *count = count.saturating_sub(1);
        }
    }
}

fn default_surface_support() -> SurfaceSupport {
    SurfaceSupport {
        capabilities: vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 8,
            // The window decides the extent.
            current_extent: vk::Extent2D {
                width: u32::MAX,
                height: u32::MAX,
            },
            min_image_extent: vk::Extent2D {
                width: 1,
                height: 1,
            },
            max_image_extent: vk::Extent2D {
                width: 4096,
                height: 4096,
            },
            max_image_array_layers: 1,
            supported_transforms: vk::SurfaceTransformFlagsKHR::IDENTITY,
            current_transform: vk::SurfaceTransformFlagsKHR::IDENTITY,
            supported_composite_alpha: vk::CompositeAlphaFlagsKHR::OPAQUE,
            supported_usage_flags: vk::ImageUsageFlags::COLOR_ATTACHMENT,
        },
        formats: vec![vk::SurfaceFormatKHR {
            format: vk::Format::B8G8R8A8_SRGB,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        }],
        present_modes: vec![vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX],
    }
}

/// A [`RenderDevice`] with no GPU behind it.
#[derive(Debug)]
pub struct HeadlessDevice {
    state: Mutex<State>,
    latency: Duration,
    pipeline_statistics: bool,
}

impl Default for HeadlessDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl HeadlessDevice {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                next_handle: 0,
                live: HashMap::new(),
                fences: HashMap::new(),
                swapchains: HashMap::new(),
                command_pools: HashMap::new(),
                recording: HashSet::new(),
                query_pools: HashMap::new(),
                surface_support: default_surface_support(),
                depth_formats: vec![vk::Format::D32_SFLOAT, vk::Format::D24_UNORM_S8_UINT],
                acquire_script: VecDeque::new(),
                present_script: VecDeque::new(),
                fail_swapchain_creation: false,
                fail_submit: false,
                fail_wait_idle: false,
                last_swapchain: None,
                swapchain_creations: 0,
                presents: 0,
                acquires: 0,
                wait_idle_calls: 0,
                submits: HashMap::new(),
                timestamp: 0,
            }),
            latency: Duration::ZERO,
            pipeline_statistics: true,
        }
    }

    /// Simulated time between a submit and its fence signalling.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn with_pipeline_statistics(mut self, supported: bool) -> Self {
        self.pipeline_statistics = supported;
        self
    }

    pub fn set_surface_support(&self, support: SurfaceSupport) {
        self.state.lock().surface_support = support;
    }

    pub fn set_depth_formats(&self, formats: Vec<vk::Format>) {
        self.state.lock().depth_formats = formats;
    }

    /// Queue the outcome of a future acquire. Unscripted acquires cycle images.
    pub fn script_acquire(&self, outcome: AcquireOutcome) {
        self.state.lock().acquire_script.push_back(outcome);
    }

    /// Queue the outcome of a future present. Unscripted presents succeed.
    pub fn script_present(&self, outcome: PresentOutcome) {
        self.state.lock().present_script.push_back(outcome);
    }

    /// Make the next swapchain creation fail.
    pub fn fail_next_swapchain_creation(&self) {
        self.state.lock().fail_swapchain_creation = true;
    }

    /// Make the next queue submit fail with `ERROR_OUT_OF_DEVICE_MEMORY`.
    pub fn fail_next_submit(&self) {
        self.state.lock().fail_submit = true;
    }

    /// Make the next `wait_idle` fail with `ERROR_DEVICE_LOST`.
    pub fn fail_next_wait_idle(&self) {
        self.state.lock().fail_wait_idle = true;
    }

    pub fn live_objects(&self, kind: ObjectKind) -> usize {
        self.state.lock().live.get(&kind).copied().unwrap_or(0)
    }

    /// Total live objects of every kind.
    pub fn total_live_objects(&self) -> usize {
        self.state.lock().live.values().sum()
    }

    pub fn swapchain_creations(&self) -> usize {
        self.state.lock().swapchain_creations
    }

    pub fn last_swapchain_desc(&self) -> Option<SwapchainDesc> {
        self.state.lock().last_swapchain
    }

    pub fn present_count(&self) -> usize {
        self.state.lock().presents
    }

    /// Acquires that reached the device, scripted ones included.
    pub fn acquire_count(&self) -> usize {
        self.state.lock().acquires
    }

    pub fn wait_idle_calls(&self) -> usize {
        self.state.lock().wait_idle_calls
    }

    pub fn submit_count(&self, queue: QueueKind) -> usize {
        self.state.lock().submits.get(&queue).copied().unwrap_or(0)
    }
}

impl RenderDevice for HeadlessDevice {
    fn name(&self) -> &str {
        "Headless Device"
    }

    fn queue_families(&self) -> QueueFamilies {
        QueueFamilies {
            graphics: 0,
            present: 0,
            compute: 1,
            transfer: 2,
        }
    }

    fn timestamp_period(&self) -> f32 {
        1.0
    }

    fn supports_pipeline_statistics(&self) -> bool {
        self.pipeline_statistics
    }

    fn supports_depth_format(&self, format: vk::Format) -> bool {
        self.state.lock().depth_formats.contains(&format)
    }

    fn create_surface(
        &self,
        _display: RawDisplayHandle,
        _window: RawWindowHandle,
    ) -> Result<vk::SurfaceKHR> {
        let raw = self.state.lock().created(ObjectKind::Surface);
        Ok(vk::SurfaceKHR::from_raw(raw))
    }

    fn surface_support(&self, _surface: vk::SurfaceKHR) -> Result<SurfaceSupport> {
        Ok(self.state.lock().surface_support.clone())
    }

    unsafe fn destroy_surface(&self, _surface: vk::SurfaceKHR) {
        self.state.lock().destroyed(ObjectKind::Surface);
    }

    fn create_swapchain(&self, desc: &SwapchainDesc) -> Result<vk::SwapchainKHR> {
        let mut state = self.state.lock();
        if std::mem::take(&mut state.fail_swapchain_creation) {
            return Err(GpuError::Vulkan(vk::Result::ERROR_INITIALIZATION_FAILED));
        }
        let raw = state.created(ObjectKind::Swapchain);
        let images = (0..desc.min_image_count)
            .map(|_| vk::Image::from_raw(state.handle()))
            .collect();
        state.swapchains.insert(
            raw,
            SwapchainState {
                images,
                next_image: 0,
            },
        );
        state.swapchain_creations += 1;
        state.last_swapchain = Some(*desc);
        Ok(vk::SwapchainKHR::from_raw(raw))
    }

    fn swapchain_images(&self, swapchain: vk::SwapchainKHR) -> Result<Vec<vk::Image>> {
        self.state
            .lock()
            .swapchains
            .get(&swapchain.as_raw())
            .map(|sc| sc.images.clone())
            .ok_or(GpuError::Vulkan(vk::Result::ERROR_SURFACE_LOST_KHR))
    }

    fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        _signal: vk::Semaphore,
    ) -> Result<AcquireOutcome> {
        let mut state = self.state.lock();
        state.acquires += 1;
        let scripted = state.acquire_script.pop_front();
        let sc = state
            .swapchains
            .get_mut(&swapchain.as_raw())
            .ok_or(GpuError::Vulkan(vk::Result::ERROR_SURFACE_LOST_KHR))?;
        if let Some(outcome) = scripted {
            return Ok(outcome);
        }
        let index = sc.next_image;
        sc.next_image = (sc.next_image + 1) % (sc.images.len().max(1) as u32);
        Ok(AcquireOutcome::Acquired {
            index,
            suboptimal: false,
        })
    }

    fn queue_present(
        &self,
        swapchain: vk::SwapchainKHR,
        _image_index: u32,
        _wait: &[vk::Semaphore],
    ) -> Result<PresentOutcome> {
        let mut state = self.state.lock();
        if !state.swapchains.contains_key(&swapchain.as_raw()) {
            return Err(GpuError::Vulkan(vk::Result::ERROR_SURFACE_LOST_KHR));
        }
        state.presents += 1;
        Ok(state
            .present_script
            .pop_front()
            .unwrap_or(PresentOutcome::Presented))
    }

    unsafe fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR) {
        let mut state = self.state.lock();
        if state.swapchains.remove(&swapchain.as_raw()).is_some() {
            state.destroyed(ObjectKind::Swapchain);
        }
    }

    fn create_image_view(
        &self,
        _image: vk::Image,
        _format: vk::Format,
        _aspect: vk::ImageAspectFlags,
    ) -> Result<vk::ImageView> {
        let raw = self.state.lock().created(ObjectKind::ImageView);
        Ok(vk::ImageView::from_raw(raw))
    }

    unsafe fn destroy_image_view(&self, _view: vk::ImageView) {
        self.state.lock().destroyed(ObjectKind::ImageView);
    }

    fn create_render_pass(&self, _desc: &RenderPassDesc) -> Result<vk::RenderPass> {
        let raw = self.state.lock().created(ObjectKind::RenderPass);
        Ok(vk::RenderPass::from_raw(raw))
    }

    unsafe fn destroy_render_pass(&self, _render_pass: vk::RenderPass) {
        self.state.lock().destroyed(ObjectKind::RenderPass);
    }

    fn create_framebuffer(
        &self,
        _render_pass: vk::RenderPass,
        _attachments: &[vk::ImageView],
        _extent: vk::Extent2D,
    ) -> Result<vk::Framebuffer> {
        let raw = self.state.lock().created(ObjectKind::Framebuffer);
        Ok(vk::Framebuffer::from_raw(raw))
    }

    unsafe fn destroy_framebuffer(&self, _framebuffer: vk::Framebuffer) {
        self.state.lock().destroyed(ObjectKind::Framebuffer);
    }

    fn create_fence(&self, signaled: bool) -> Result<vk::Fence> {
        let mut state = self.state.lock();
        let raw = state.created(ObjectKind::Fence);
        state.fences.insert(
            raw,
            FenceState {
                signaled,
                signal_at: None,
            },
        );
        Ok(vk::Fence::from_raw(raw))
    }

    fn wait_for_fences(&self, fences: &[vk::Fence], _timeout_ns: u64) -> Result<()> {
        let deadline = {
            let state = self.state.lock();
            let now = Instant::now();
            let mut deadline: Option<Instant> = None;
            for fence in fences {
                let fence_state = state
                    .fences
                    .get(&fence.as_raw())
                    .ok_or(GpuError::Vulkan(vk::Result::ERROR_DEVICE_LOST))?;
                if fence_state.is_signaled(now) {
                    continue;
                }
                // Never submitted: a real device would block forever.
                let at = fence_state
                    .signal_at
                    .ok_or(GpuError::Vulkan(vk::Result::TIMEOUT))?;
                deadline = Some(deadline.map_or(at, |d| d.max(at)));
            }
            deadline
        };

        if let Some(deadline) = deadline {
            std::thread::sleep(deadline.saturating_duration_since(Instant::now()));
        }

        let mut state = self.state.lock();
        for fence in fences {
            if let Some(fence_state) = state.fences.get_mut(&fence.as_raw()) {
                fence_state.signaled = true;
            }
        }
        Ok(())
    }

    fn reset_fences(&self, fences: &[vk::Fence]) -> Result<()> {
        let mut state = self.state.lock();
        for fence in fences {
            let fence_state = state
                .fences
                .get_mut(&fence.as_raw())
                .ok_or(GpuError::Vulkan(vk::Result::ERROR_DEVICE_LOST))?;
            *fence_state = FenceState::default();
        }
        Ok(())
    }

    fn fence_signaled(&self, fence: vk::Fence) -> Result<bool> {
        self.state
            .lock()
            .fences
            .get(&fence.as_raw())
            .map(|f| f.is_signaled(Instant::now()))
            .ok_or(GpuError::Vulkan(vk::Result::ERROR_DEVICE_LOST))
    }

    unsafe fn destroy_fence(&self, fence: vk::Fence) {
        let mut state = self.state.lock();
        if state.fences.remove(&fence.as_raw()).is_some() {
            state.destroyed(ObjectKind::Fence);
        }
    }

    fn create_semaphore(&self) -> Result<vk::Semaphore> {
        let raw = self.state.lock().created(ObjectKind::Semaphore);
        Ok(vk::Semaphore::from_raw(raw))
    }

    unsafe fn destroy_semaphore(&self, _semaphore: vk::Semaphore) {
        self.state.lock().destroyed(ObjectKind::Semaphore);
    }

    fn create_command_pool(&self, _queue: QueueKind) -> Result<vk::CommandPool> {
        let mut state = self.state.lock();
        let raw = state.created(ObjectKind::CommandPool);
        state.command_pools.insert(raw, Vec::new());
        Ok(vk::CommandPool::from_raw(raw))
    }

    fn allocate_command_buffer(&self, pool: vk::CommandPool) -> Result<vk::CommandBuffer> {
        let mut state = self.state.lock();
        if !state.command_pools.contains_key(&pool.as_raw()) {
            return Err(GpuError::InvalidState("unknown command pool".to_string()));
        }
        let raw = state.created(ObjectKind::CommandBuffer);
        if let Some(buffers) = state.command_pools.get_mut(&pool.as_raw()) {
            buffers.push(raw);
        }
        Ok(vk::CommandBuffer::from_raw(raw))
    }

    fn reset_command_pool(&self, pool: vk::CommandPool) -> Result<()> {
        let mut state = self.state.lock();
        let buffers = state
            .command_pools
            .get(&pool.as_raw())
            .cloned()
            .ok_or_else(|| GpuError::InvalidState("unknown command pool".to_string()))?;
        for buffer in buffers {
            state.recording.remove(&buffer);
        }
        Ok(())
    }

    fn begin_command_buffer(&self, command_buffer: vk::CommandBuffer) -> Result<()> {
        if !self.state.lock().recording.insert(command_buffer.as_raw()) {
            return Err(GpuError::InvalidState(
                "command buffer is already recording".to_string(),
            ));
        }
        Ok(())
    }

    fn end_command_buffer(&self, command_buffer: vk::CommandBuffer) -> Result<()> {
        if !self.state.lock().recording.remove(&command_buffer.as_raw()) {
            return Err(GpuError::InvalidState(
                "command buffer is not recording".to_string(),
            ));
        }
        Ok(())
    }

    unsafe fn destroy_command_pool(&self, pool: vk::CommandPool) {
        let mut state = self.state.lock();
        if let Some(buffers) = state.command_pools.remove(&pool.as_raw()) {
            for buffer in buffers {
                state.recording.remove(&buffer);
                state.destroyed(ObjectKind::CommandBuffer);
            }
            state.destroyed(ObjectKind::CommandPool);
        }
    }

    fn queue_submit(
        &self,
        queue: QueueKind,
        submit: &QueueSubmit<'_>,
        fence: vk::Fence,
    ) -> Result<()> {
        let mut state = self.state.lock();
        if std::mem::take(&mut state.fail_submit) {
            return Err(GpuError::Vulkan(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY));
        }
        if submit
            .command_buffers
            .iter()
            .any(|cb| state.recording.contains(&cb.as_raw()))
        {
            return Err(GpuError::InvalidState(
                "submitted command buffer is still recording".to_string(),
            ));
        }
        if fence != vk::Fence::null() {
            let fence_state = state
                .fences
                .get_mut(&fence.as_raw())
                .ok_or(GpuError::Vulkan(vk::Result::ERROR_DEVICE_LOST))?;
            if fence_state.is_signaled(Instant::now()) {
                return Err(GpuError::InvalidState(
                    "submitted fence is already signaled".to_string(),
                ));
            }
            fence_state.signal_at = Some(Instant::now() + self.latency);
        }
        *state.submits.entry(queue).or_default() += 1;
        Ok(())
    }

    fn create_query_pool(&self, kind: QueryKind, count: u32) -> Result<vk::QueryPool> {
        if kind == QueryKind::PipelineStatistics && !self.pipeline_statistics {
            return Err(GpuError::ExtensionNotSupported(
                "pipelineStatisticsQuery".to_string(),
            ));
        }
        let mut state = self.state.lock();
        let raw = state.created(ObjectKind::QueryPool);
        state.query_pools.insert(
            raw,
            QueryPoolState {
                kind,
                values: vec![None; count as usize],
                statistics: None,
            },
        );
        Ok(vk::QueryPool::from_raw(raw))
    }

    fn cmd_reset_query_pool(
        &self,
        _command_buffer: vk::CommandBuffer,
        pool: vk::QueryPool,
        first: u32,
        count: u32,
    ) {
        if let Some(pool) = self.state.lock().query_pools.get_mut(&pool.as_raw()) {
            for value in pool.values.iter_mut().skip(first as usize).take(count as usize) {
                *value = None;
            }
            pool.statistics = None;
        }
    }

    fn cmd_write_timestamp(
        &self,
        _command_buffer: vk::CommandBuffer,
        _stage: vk::PipelineStageFlags,
        pool: vk::QueryPool,
        query: u32,
    ) {
        let mut state = self.state.lock();
        state.timestamp += TIMESTAMP_STEP;
        let timestamp = state.timestamp;
        if let Some(slot) = state
            .query_pools
            .get_mut(&pool.as_raw())
            .and_then(|pool| pool.values.get_mut(query as usize))
        {
            *slot = Some(timestamp);
        }
    }

    fn cmd_begin_query(&self, _command_buffer: vk::CommandBuffer, _pool: vk::QueryPool, _query: u32) {}

    fn cmd_end_query(&self, _command_buffer: vk::CommandBuffer, pool: vk::QueryPool, _query: u32) {
        if let Some(pool) = self.state.lock().query_pools.get_mut(&pool.as_raw()) {
            if pool.kind == QueryKind::PipelineStatistics {
                pool.statistics = Some(PIPELINE_STATISTICS);
            }
        }
    }

    fn timestamp_results(&self, pool: vk::QueryPool, first: u32, count: u32) -> Result<Vec<u64>> {
        let state = self.state.lock();
        let pool = state
            .query_pools
            .get(&pool.as_raw())
            .ok_or(GpuError::Vulkan(vk::Result::ERROR_DEVICE_LOST))?;
        pool.values
            .iter()
            .skip(first as usize)
            .take(count as usize)
            .map(|value| value.ok_or(GpuError::Vulkan(vk::Result::NOT_READY)))
            .collect()
    }

    fn pipeline_statistics_results(
        &self,
        pool: vk::QueryPool,
    ) -> Result<[u64; PIPELINE_STATISTICS_COUNTERS]> {
        self.state
            .lock()
            .query_pools
            .get(&pool.as_raw())
            .and_then(|pool| pool.statistics)
            .ok_or(GpuError::Vulkan(vk::Result::NOT_READY))
    }

    unsafe fn destroy_query_pool(&self, pool: vk::QueryPool) {
        let mut state = self.state.lock();
        if state.query_pools.remove(&pool.as_raw()).is_some() {
            state.destroyed(ObjectKind::QueryPool);
        }
    }

    fn cmd_begin_render_pass(
        &self,
        _command_buffer: vk::CommandBuffer,
        _render_pass: vk::RenderPass,
        _framebuffer: vk::Framebuffer,
        _extent: vk::Extent2D,
        _clear_values: &[vk::ClearValue],
    ) {
    }

    fn cmd_end_render_pass(&self, _command_buffer: vk::CommandBuffer) {}

    fn wait_idle(&self) -> Result<()> {
        let deadline = {
            let mut state = self.state.lock();
            state.wait_idle_calls += 1;
            if std::mem::take(&mut state.fail_wait_idle) {
                return Err(GpuError::Vulkan(vk::Result::ERROR_DEVICE_LOST));
            }
            state.fences.values().filter_map(|f| f.signal_at).max()
        };
        if let Some(deadline) = deadline {
            std::thread::sleep(deadline.saturating_duration_since(Instant::now()));
        }
        let mut state = self.state.lock();
        for fence in state.fences.values_mut() {
            if fence.signal_at.is_some() {
                fence.signaled = true;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fence_signals_after_latency() {
        let device = HeadlessDevice::new().with_latency(Duration::from_millis(20));
        let fence = device.create_fence(false).unwrap();
        assert!(matches!(
            device.wait_for_fences(&[fence], u64::MAX),
            Err(GpuError::Vulkan(vk::Result::TIMEOUT))
        ));

        device
            .queue_submit(QueueKind::Graphics, &QueueSubmit::default(), fence)
            .unwrap();
        assert!(!device.fence_signaled(fence).unwrap());

        let start = Instant::now();
        device.wait_for_fences(&[fence], u64::MAX).unwrap();
        assert!(start.elapsed() >= Duration::from_millis(15));
        assert!(device.fence_signaled(fence).unwrap());
    }

    #[test]
    fn command_pool_owns_its_buffers() {
        let device = HeadlessDevice::new();
        let pool = device.create_command_pool(QueueKind::Graphics).unwrap();
        let cb = device.allocate_command_buffer(pool).unwrap();
        device.begin_command_buffer(cb).unwrap();
        assert!(device.begin_command_buffer(cb).is_err());
        device.end_command_buffer(cb).unwrap();
        assert_eq!(device.live_objects(ObjectKind::CommandBuffer), 1);

        unsafe { device.destroy_command_pool(pool) };
        assert_eq!(device.total_live_objects(), 0);
    }

    #[test]
    fn scripted_acquire_overrides_cycle() {
        let device = HeadlessDevice::new();
        let surface = vk::SurfaceKHR::from_raw(1);
        let swapchain = device
            .create_swapchain(&SwapchainDesc {
                surface,
                min_image_count: 2,
                format: vk::SurfaceFormatKHR::default(),
                extent: vk::Extent2D::default(),
                pre_transform: vk::SurfaceTransformFlagsKHR::IDENTITY,
                present_mode: vk::PresentModeKHR::FIFO,
                old_swapchain: vk::SwapchainKHR::null(),
            })
            .unwrap();
        let semaphore = vk::Semaphore::null();

        device.script_acquire(AcquireOutcome::OutOfDate);
        assert_eq!(
            device.acquire_next_image(swapchain, semaphore).unwrap(),
            AcquireOutcome::OutOfDate
        );
        for expected in [0, 1, 0] {
            assert_eq!(
                device.acquire_next_image(swapchain, semaphore).unwrap(),
                AcquireOutcome::Acquired {
                    index: expected,
                    suboptimal: false
                }
            );
        }
    }
}
