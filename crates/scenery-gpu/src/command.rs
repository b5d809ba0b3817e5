//! Command buffer management and per-frame GPU timing.
//!
//! [`CommandManager`] owns one command pool, primary command buffer, fence
//! and timestamp query pool for every queue kind and frame slot. Only one
//! queue records at a time. Query results of a slot are read back the next
//! time that slot begins, after its fence has been waited on, so timings lag
//! `frames_in_flight` frames behind recording.

use crate::device::{QueryKind, QueueKind, QueueSubmit, RenderDevice, PIPELINE_STATISTICS_COUNTERS};
use crate::error::{GpuError, Result};
use ash::vk;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, trace, warn};

/// Queries reserved for the frame begin/end timestamps.
const FRAME_QUERIES: u32 = 2;

/// Command manager configuration.
#[derive(Debug, Clone, Copy)]
pub struct CommandConfig {
    /// Named timestamp regions allowed per recorded frame.
    pub max_user_queries: u32,
    /// Record pipeline statistics on the graphics queue when supported.
    pub pipeline_statistics: bool,
    /// Fire a debug assertion when `begin` is called while a queue records.
    pub strict_queue_checks: bool,
}

impl Default for CommandConfig {
    fn default() -> Self {
        Self {
            max_user_queries: 16,
            pipeline_statistics: true,
            strict_queue_checks: cfg!(debug_assertions),
        }
    }
}

impl CommandConfig {
    pub fn with_max_user_queries(mut self, count: u32) -> Self {
        self.max_user_queries = count;
        self
    }

    pub fn with_pipeline_statistics(mut self, enabled: bool) -> Self {
        self.pipeline_statistics = enabled;
        self
    }

    pub fn with_strict_queue_checks(mut self, strict: bool) -> Self {
        self.strict_queue_checks = strict;
        self
    }

    fn timestamp_query_count(&self) -> u32 {
        FRAME_QUERIES + 2 * self.max_user_queries
    }
}

/// Synchronisation for [`CommandManager::end`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SubmitInfo<'a> {
    pub wait_semaphores: &'a [vk::Semaphore],
    pub wait_stages: &'a [vk::PipelineStageFlags],
    pub signal_semaphores: &'a [vk::Semaphore],
    /// Extra fence signalled once the submitted work completes.
    pub frame_fence: Option<vk::Fence>,
}

/// Graphics pipeline statistics of one frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStatistics {
    pub input_assembly_vertices: u64,
    pub input_assembly_primitives: u64,
    pub vertex_shader_invocations: u64,
    pub clipping_invocations: u64,
    pub clipping_primitives: u64,
    pub fragment_shader_invocations: u64,
    pub compute_shader_invocations: u64,
}

impl From<[u64; PIPELINE_STATISTICS_COUNTERS]> for PipelineStatistics {
    fn from(counters: [u64; PIPELINE_STATISTICS_COUNTERS]) -> Self {
        let [input_assembly_vertices, input_assembly_primitives, vertex_shader_invocations, clipping_invocations, clipping_primitives, fragment_shader_invocations, compute_shader_invocations] =
            counters;
        Self {
            input_assembly_vertices,
            input_assembly_primitives,
            vertex_shader_invocations,
            clipping_invocations,
            clipping_primitives,
            fragment_shader_invocations,
            compute_shader_invocations,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlotState {
    Idle,
    Recording,
    Submitted,
}

#[derive(Debug)]
struct Region {
    name: String,
    ended: bool,
}

#[derive(Debug)]
struct Slot {
    pool: vk::CommandPool,
    command_buffer: vk::CommandBuffer,
    fence: vk::Fence,
    timestamps: vk::QueryPool,
    statistics: Option<vk::QueryPool>,
    state: SlotState,
    regions: Vec<Region>,
}

impl Slot {
    unsafe fn destroy(&self, device: &dyn RenderDevice) {
        if let Some(pool) = self.statistics {
            device.destroy_query_pool(pool);
        }
        if self.timestamps != vk::QueryPool::null() {
            device.destroy_query_pool(self.timestamps);
        }
        if self.pool != vk::CommandPool::null() {
            device.destroy_command_pool(self.pool);
        }
        if self.fence != vk::Fence::null() {
            device.destroy_fence(self.fence);
        }
    }
}

#[derive(Debug, Default)]
struct QueueResults {
    frame_time_ms: Option<f32>,
    regions: HashMap<String, f32>,
    statistics: Option<PipelineStatistics>,
}

#[derive(Debug)]
struct QueueResources {
    slots: Vec<Slot>,
    results: QueueResults,
}

#[derive(Debug, Clone, Copy)]
struct Active {
    queue: QueueKind,
    slot: usize,
}

/// Per-queue, per-frame command recording with GPU timing.
pub struct CommandManager {
    device: Arc<dyn RenderDevice>,
    config: CommandConfig,
    queues: Vec<QueueResources>,
    active: Option<Active>,
    timestamp_period: f32,
    destroyed: bool,
}

impl std::fmt::Debug for CommandManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandManager")
            .field("config", &self.config)
            .field("frames_in_flight", &self.frames_in_flight())
            .field("active", &self.active)
            .finish_non_exhaustive()
    }
}

impl CommandManager {
    /// Create command resources for every queue kind and frame slot.
    pub fn new(device: Arc<dyn RenderDevice>, config: CommandConfig, frames_in_flight: usize) -> Result<Self> {
        let statistics = config.pipeline_statistics && device.supports_pipeline_statistics();
        if config.pipeline_statistics && !statistics {
            debug!("Pipeline statistics queries not supported, disabling");
        }
        let config = CommandConfig {
            pipeline_statistics: statistics,
            ..config
        };

        let mut manager = Self {
            timestamp_period: device.timestamp_period(),
            device,
            config,
            queues: Vec::with_capacity(QueueKind::ALL.len()),
            active: None,
            destroyed: false,
        };

        for queue in QueueKind::ALL {
            let mut resources = QueueResources {
                slots: Vec::with_capacity(frames_in_flight),
                results: QueueResults::default(),
            };
            for _ in 0..frames_in_flight.max(1) {
                // On failure, drop of `manager` releases what was created so far.
                let slot = manager.create_slot(queue, &mut resources)?;
                resources.slots.push(slot);
            }
            manager.queues.push(resources);
        }

        debug!(
            frames_in_flight,
            max_user_queries = config.max_user_queries,
            pipeline_statistics = statistics,
            "Command manager created"
        );
        Ok(manager)
    }

    fn create_slot(&self, queue: QueueKind, resources: &mut QueueResources) -> Result<Slot> {
        let device = self.device.as_ref();
        let mut slot = Slot {
            pool: vk::CommandPool::null(),
            command_buffer: vk::CommandBuffer::null(),
            fence: vk::Fence::null(),
            timestamps: vk::QueryPool::null(),
            statistics: None,
            state: SlotState::Idle,
            regions: Vec::new(),
        };

        let result = (|| -> Result<()> {
            slot.fence = device.create_fence(true)?;
            slot.pool = device.create_command_pool(queue)?;
            slot.command_buffer = device.allocate_command_buffer(slot.pool)?;
            slot.timestamps =
                device.create_query_pool(QueryKind::Timestamp, self.config.timestamp_query_count())?;
            if queue == QueueKind::Graphics && self.config.pipeline_statistics {
                slot.statistics = Some(device.create_query_pool(QueryKind::PipelineStatistics, 1)?);
            }
            Ok(())
        })();

        if let Err(e) = result {
            unsafe {
                slot.destroy(device);
                for slot in resources.slots.drain(..) {
                    slot.destroy(device);
                }
            }
            return Err(e);
        }
        Ok(slot)
    }

    fn slot_mut(&mut self, queue: QueueKind, slot: usize) -> Result<&mut Slot> {
        self.queues
            .get_mut(queue.index())
            .and_then(|resources| resources.slots.get_mut(slot))
            .ok_or_else(|| GpuError::InvalidState(format!("no command slot {slot} for {queue:?}")))
    }

    /// Begin recording on `queue` for `frame_slot`.
    ///
    /// Waits for the slot's previous submission, collects its query results,
    /// and returns the reset command buffer in the recording state.
    #[cfg_attr(feature = "profiling-tracy", tracing::instrument(level = "trace", skip_all))]
    pub fn begin(&mut self, queue: QueueKind, frame_slot: usize) -> Result<vk::CommandBuffer> {
        if self.destroyed {
            return Err(GpuError::InvalidState("command manager destroyed".to_string()));
        }
        if let Some(active) = self.active {
            error!(
                active = ?active.queue,
                requested = ?queue,
                "Command buffer begin while another queue is recording"
            );
            debug_assert!(
                !self.config.strict_queue_checks,
                "begin({queue:?}) while {:?} is recording",
                active.queue
            );
            return Err(GpuError::QueueBusy(format!("{:?} is recording", active.queue)));
        }

        // The fence stays signalled until `end` submits, so a failure
        // anywhere before that leaves the slot usable.
        let device = Arc::clone(&self.device);
        let slot = self.slot_mut(queue, frame_slot)?;
        device.wait_for_fences(&[slot.fence], u64::MAX)?;

        if slot.state == SlotState::Submitted {
            self.collect_results(queue, frame_slot)?;
        }

        let max_user_queries = self.config.max_user_queries;
        let slot = self.slot_mut(queue, frame_slot)?;
        slot.state = SlotState::Idle;
        slot.regions.clear();
        device.reset_command_pool(slot.pool)?;
        device.begin_command_buffer(slot.command_buffer)?;
        device.cmd_reset_query_pool(
            slot.command_buffer,
            slot.timestamps,
            0,
            FRAME_QUERIES + 2 * max_user_queries,
        );
        if let Some(statistics) = slot.statistics {
            device.cmd_reset_query_pool(slot.command_buffer, statistics, 0, 1);
        }
        device.cmd_write_timestamp(
            slot.command_buffer,
            vk::PipelineStageFlags::TOP_OF_PIPE,
            slot.timestamps,
            0,
        );
        if let Some(statistics) = slot.statistics {
            device.cmd_begin_query(slot.command_buffer, statistics, 0);
        }
        slot.state = SlotState::Recording;
        let command_buffer = slot.command_buffer;

        self.active = Some(Active {
            queue,
            slot: frame_slot,
        });
        trace!(?queue, frame_slot, "Command buffer begin");
        Ok(command_buffer)
    }

    fn collect_results(&mut self, queue: QueueKind, frame_slot: usize) -> Result<()> {
        let period_ms = self.timestamp_period as f64 / 1_000_000.0;
        let device = Arc::clone(&self.device);
        let resources = &mut self.queues[queue.index()];
        let slot = &resources.slots[frame_slot];

        let elapsed = |first: u32| -> Option<f32> {
            match device.timestamp_results(slot.timestamps, first, 2) {
                Ok(values) if values.len() == 2 => {
                    Some((values[1].saturating_sub(values[0]) as f64 * period_ms) as f32)
                }
                Ok(_) => None,
                Err(e) => {
                    debug!(?queue, first, "Timestamp results unavailable: {e}");
                    None
                }
            }
        };

        resources.results.frame_time_ms = elapsed(0);
        for (id, region) in slot.regions.iter().enumerate() {
            if !region.ended {
                continue;
            }
            if let Some(ms) = elapsed(FRAME_QUERIES + 2 * id as u32) {
                resources.results.regions.insert(region.name.clone(), ms);
            }
        }

        if let Some(statistics) = slot.statistics {
            match device.pipeline_statistics_results(statistics) {
                Ok(counters) => resources.results.statistics = Some(counters.into()),
                Err(e) => debug!("Pipeline statistics unavailable: {e}"),
            }
        }
        Ok(())
    }

    fn active_slot(&mut self) -> Result<&mut Slot> {
        let active = self
            .active
            .ok_or_else(|| GpuError::InvalidState("no command buffer is recording".to_string()))?;
        self.slot_mut(active.queue, active.slot)
    }

    /// Start a named timestamp region in the recording command buffer.
    pub fn begin_timestamp_query(&mut self, name: &str) -> Result<u32> {
        let max = self.config.max_user_queries;
        let device = Arc::clone(&self.device);
        let slot = self.active_slot()?;
        if slot.regions.len() as u32 >= max {
            warn!(name, max, "Too many timestamp regions in one frame");
            return Err(GpuError::InvalidState(format!(
                "more than {max} timestamp regions in one frame"
            )));
        }

        let id = slot.regions.len() as u32;
        device.cmd_write_timestamp(
            slot.command_buffer,
            vk::PipelineStageFlags::TOP_OF_PIPE,
            slot.timestamps,
            FRAME_QUERIES + 2 * id,
        );
        slot.regions.push(Region {
            name: name.to_string(),
            ended: false,
        });
        Ok(id)
    }

    /// End the timestamp region returned by [`Self::begin_timestamp_query`].
    pub fn end_timestamp_query(&mut self, id: u32) -> Result<()> {
        let device = Arc::clone(&self.device);
        let slot = self.active_slot()?;
        let region = slot
            .regions
            .get_mut(id as usize)
            .ok_or_else(|| GpuError::InvalidState(format!("unknown timestamp region {id}")))?;
        if region.ended {
            return Err(GpuError::InvalidState(format!(
                "timestamp region {} already ended",
                region.name
            )));
        }
        region.ended = true;
        device.cmd_write_timestamp(
            slot.command_buffer,
            vk::PipelineStageFlags::BOTTOM_OF_PIPE,
            slot.timestamps,
            FRAME_QUERIES + 2 * id + 1,
        );
        Ok(())
    }

    /// Finish recording and submit the active command buffer.
    #[cfg_attr(feature = "profiling-tracy", tracing::instrument(level = "trace", skip_all))]
    pub fn end(&mut self, submit: &SubmitInfo<'_>) -> Result<()> {
        let active = self
            .active
            .take()
            .ok_or_else(|| GpuError::InvalidState("end without begin".to_string()))?;
        let device = Arc::clone(&self.device);
        let slot = self.slot_mut(active.queue, active.slot)?;

        device.cmd_write_timestamp(
            slot.command_buffer,
            vk::PipelineStageFlags::BOTTOM_OF_PIPE,
            slot.timestamps,
            1,
        );
        if let Some(statistics) = slot.statistics {
            device.cmd_end_query(slot.command_buffer, statistics, 0);
        }
        device.end_command_buffer(slot.command_buffer)?;

        let command_buffer = slot.command_buffer;
        let mut fences = vec![slot.fence];
        fences.extend(submit.frame_fence);

        if let Err(e) = device.reset_fences(&fences) {
            self.restore_fences(active.queue, &fences);
            return Err(e);
        }

        let command_buffers = [command_buffer];
        let submitted = device.queue_submit(
            active.queue,
            &QueueSubmit {
                command_buffers: &command_buffers,
                wait_semaphores: submit.wait_semaphores,
                wait_stages: submit.wait_stages,
                signal_semaphores: submit.signal_semaphores,
            },
            fences[0],
        );
        if let Err(e) = submitted {
            error!(queue = ?active.queue, "Command buffer submit failed: {e}");
            self.restore_fences(active.queue, &fences);
            return Err(e);
        }
        self.slot_mut(active.queue, active.slot)?.state = SlotState::Submitted;

        if let Some(&frame_fence) = fences.get(1) {
            if let Err(e) = device.queue_submit(active.queue, &QueueSubmit::default(), frame_fence) {
                self.restore_fences(active.queue, &[frame_fence]);
                return Err(e);
            }
        }

        trace!(queue = ?active.queue, slot = active.slot, "Command buffer submitted");
        Ok(())
    }

    /// Bring fences reset for a submit that never happened back to the
    /// signalled state, so the next wait on them returns.
    fn restore_fences(&self, queue: QueueKind, fences: &[vk::Fence]) {
        for &fence in fences {
            if !matches!(self.device.fence_signaled(fence), Ok(false)) {
                continue;
            }
            if let Err(e) = self.device.queue_submit(queue, &QueueSubmit::default(), fence) {
                error!(?queue, "Failed to re-signal fence: {e}");
            }
        }
    }

    /// GPU time in milliseconds of a named region, from the last collected frame.
    pub fn gpu_execution_time(&self, queue: QueueKind, name: &str) -> Option<f32> {
        self.queues
            .get(queue.index())
            .and_then(|resources| resources.results.regions.get(name).copied())
    }

    /// GPU time in milliseconds of the last collected frame.
    pub fn frame_gpu_time(&self, queue: QueueKind) -> Option<f32> {
        self.queues
            .get(queue.index())
            .and_then(|resources| resources.results.frame_time_ms)
    }

    pub fn pipeline_statistics(&self, queue: QueueKind) -> Option<PipelineStatistics> {
        self.queues
            .get(queue.index())
            .and_then(|resources| resources.results.statistics)
    }

    /// Queue currently recording, if any.
    pub fn active_queue(&self) -> Option<QueueKind> {
        self.active.map(|active| active.queue)
    }

    pub fn command_buffer(&self, queue: QueueKind, frame_slot: usize) -> Option<vk::CommandBuffer> {
        self.queues
            .get(queue.index())
            .and_then(|resources| resources.slots.get(frame_slot))
            .map(|slot| slot.command_buffer)
    }

    pub fn frames_in_flight(&self) -> usize {
        self.queues.first().map_or(0, |resources| resources.slots.len())
    }

    pub fn pipeline_statistics_enabled(&self) -> bool {
        self.config.pipeline_statistics
    }

    /// Wait for all submitted work and release every resource.
    pub fn destroy(&mut self) -> Result<()> {
        if self.destroyed {
            return Ok(());
        }
        if let Some(active) = self.active.take() {
            warn!(queue = ?active.queue, "Destroying command manager while recording");
        }

        let pending: Vec<vk::Fence> = self
            .queues
            .iter()
            .flat_map(|resources| resources.slots.iter())
            .filter(|slot| slot.state == SlotState::Submitted)
            .map(|slot| slot.fence)
            .collect();
        let waited = if pending.is_empty() {
            Ok(())
        } else {
            self.device.wait_for_fences(&pending, u64::MAX)
        };

        self.release();
        waited
    }

    fn release(&mut self) {
        let device = self.device.as_ref();
        for resources in self.queues.drain(..) {
            for slot in &resources.slots {
                unsafe { slot.destroy(device) };
            }
        }
        self.destroyed = true;
        debug!("Command manager destroyed");
    }
}

impl Drop for CommandManager {
    fn drop(&mut self) {
        if !self.destroyed {
            if let Err(e) = self.destroy() {
                warn!("Failed to wait for command buffers on drop: {e}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headless::{HeadlessDevice, ObjectKind};
    use approx::assert_relative_eq;
    use std::time::{Duration, Instant};

    fn manager(device: &Arc<HeadlessDevice>, frames: usize) -> CommandManager {
        CommandManager::new(
            device.clone(),
            CommandConfig::default().with_strict_queue_checks(false),
            frames,
        )
        .unwrap()
    }

    #[test]
    fn creates_resources_per_queue_and_slot() {
        let device = Arc::new(HeadlessDevice::new().with_pipeline_statistics(true));
        let mut commands = manager(&device, 2);

        assert_eq!(device.live_objects(ObjectKind::CommandPool), 6);
        assert_eq!(device.live_objects(ObjectKind::CommandBuffer), 6);
        assert_eq!(device.live_objects(ObjectKind::Fence), 6);
        // Six timestamp pools plus one statistics pool per graphics slot.
        assert_eq!(device.live_objects(ObjectKind::QueryPool), 8);
        assert!(commands.pipeline_statistics_enabled());

        commands.destroy().unwrap();
        assert_eq!(device.total_live_objects(), 0);
    }

    #[test]
    fn statistics_disabled_without_device_support() {
        let device = Arc::new(HeadlessDevice::new().with_pipeline_statistics(false));
        let commands = manager(&device, 2);
        assert!(!commands.pipeline_statistics_enabled());
        assert_eq!(device.live_objects(ObjectKind::QueryPool), 6);
    }

    #[test]
    fn begin_while_recording_is_queue_busy() {
        let device = Arc::new(HeadlessDevice::new());
        let mut commands = manager(&device, 2);

        commands.begin(QueueKind::Graphics, 0).unwrap();
        assert_eq!(commands.active_queue(), Some(QueueKind::Graphics));
        assert!(matches!(
            commands.begin(QueueKind::Compute, 0),
            Err(GpuError::QueueBusy(_))
        ));

        commands.end(&SubmitInfo::default()).unwrap();
        assert_eq!(commands.active_queue(), None);
        commands.begin(QueueKind::Compute, 0).unwrap();
        commands.end(&SubmitInfo::default()).unwrap();
        assert_eq!(device.submit_count(QueueKind::Compute), 1);
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "while Graphics is recording")]
    fn strict_queue_checks_assert() {
        let device = Arc::new(HeadlessDevice::new());
        let mut commands = CommandManager::new(
            device.clone(),
            CommandConfig::default().with_strict_queue_checks(true),
            1,
        )
        .unwrap();
        commands.begin(QueueKind::Graphics, 0).unwrap();
        let _ = commands.begin(QueueKind::Transfer, 0);
    }

    #[test]
    fn end_without_begin_fails() {
        let device = Arc::new(HeadlessDevice::new());
        let mut commands = manager(&device, 1);
        assert!(commands.end(&SubmitInfo::default()).is_err());
        assert!(commands.begin_timestamp_query("shadows").is_err());
    }

    #[test]
    fn timestamps_lag_by_frames_in_flight() {
        let device = Arc::new(HeadlessDevice::new().with_pipeline_statistics(true));
        let mut commands = manager(&device, 2);

        for frame in 0..2 {
            commands.begin(QueueKind::Graphics, frame).unwrap();
            let id = commands.begin_timestamp_query("geometry").unwrap();
            commands.end_timestamp_query(id).unwrap();
            commands.end(&SubmitInfo::default()).unwrap();
            assert_eq!(commands.frame_gpu_time(QueueKind::Graphics), None);
            assert_eq!(commands.gpu_execution_time(QueueKind::Graphics, "geometry"), None);
        }

        // Slot 0 comes around again; its results are now read back.
        commands.begin(QueueKind::Graphics, 0).unwrap();
        let frame_ms = commands.frame_gpu_time(QueueKind::Graphics).unwrap();
        let region_ms = commands
            .gpu_execution_time(QueueKind::Graphics, "geometry")
            .unwrap();
        // Each headless timestamp write advances 1000 ns.
        assert_relative_eq!(frame_ms, 0.003, epsilon = 1e-6);
        assert_relative_eq!(region_ms, 0.001, epsilon = 1e-6);
        assert_eq!(
            commands.pipeline_statistics(QueueKind::Graphics),
            Some(PipelineStatistics::from([3, 1, 3, 1, 1, 100, 0]))
        );
        assert_eq!(commands.frame_gpu_time(QueueKind::Compute), None);
        commands.end(&SubmitInfo::default()).unwrap();
    }

    #[test]
    fn region_limit_is_enforced() {
        let device = Arc::new(HeadlessDevice::new());
        let mut commands = CommandManager::new(
            device.clone(),
            CommandConfig::default()
                .with_max_user_queries(2)
                .with_strict_queue_checks(false),
            1,
        )
        .unwrap();

        commands.begin(QueueKind::Graphics, 0).unwrap();
        assert_eq!(commands.begin_timestamp_query("a").unwrap(), 0);
        assert_eq!(commands.begin_timestamp_query("b").unwrap(), 1);
        assert!(commands.begin_timestamp_query("c").is_err());
        commands.end_timestamp_query(1).unwrap();
        assert!(commands.end_timestamp_query(1).is_err());
        assert!(commands.end_timestamp_query(7).is_err());
        commands.end(&SubmitInfo::default()).unwrap();
    }

    #[test]
    fn fence_backpressure_blocks_reuse_of_slot() {
        let latency = Duration::from_millis(50);
        let device = Arc::new(HeadlessDevice::new().with_latency(latency));
        let mut commands = manager(&device, 2);

        let start = Instant::now();
        commands.begin(QueueKind::Graphics, 0).unwrap();
        commands.end(&SubmitInfo::default()).unwrap();
        commands.begin(QueueKind::Graphics, 1).unwrap();
        commands.end(&SubmitInfo::default()).unwrap();
        // Neither slot has waited on in-flight work yet.
        assert!(start.elapsed() < latency);

        commands.begin(QueueKind::Graphics, 0).unwrap();
        assert!(start.elapsed() >= latency);
        commands.end(&SubmitInfo::default()).unwrap();
    }

    #[test]
    fn frame_fence_gets_follow_up_submit() {
        let device = Arc::new(HeadlessDevice::new());
        let mut commands = manager(&device, 1);
        let frame_fence = device.create_fence(false).unwrap();

        commands.begin(QueueKind::Graphics, 0).unwrap();
        commands
            .end(&SubmitInfo {
                frame_fence: Some(frame_fence),
                ..Default::default()
            })
            .unwrap();

        assert_eq!(device.submit_count(QueueKind::Graphics), 2);
        device.wait_for_fences(&[frame_fence], u64::MAX).unwrap();
        unsafe { device.destroy_fence(frame_fence) };
    }

    #[test]
    fn recording_keeps_slot_fence_signaled() {
        let device = Arc::new(HeadlessDevice::new());
        let mut commands = manager(&device, 1);

        commands.begin(QueueKind::Graphics, 0).unwrap();
        let fence = commands.queues[QueueKind::Graphics.index()].slots[0].fence;
        // Only the submit in `end` resets it.
        assert!(device.fence_signaled(fence).unwrap());

        commands.end(&SubmitInfo::default()).unwrap();
        commands.begin(QueueKind::Graphics, 0).unwrap();
        assert!(device.fence_signaled(fence).unwrap());
        commands.end(&SubmitInfo::default()).unwrap();
    }

    #[test]
    fn failed_submit_re_signals_fences() {
        let device = Arc::new(HeadlessDevice::new());
        let mut commands = manager(&device, 1);
        let frame_fence = device.create_fence(true).unwrap();
        let submit = SubmitInfo {
            frame_fence: Some(frame_fence),
            ..Default::default()
        };

        commands.begin(QueueKind::Graphics, 0).unwrap();
        device.fail_next_submit();
        assert!(matches!(
            commands.end(&submit),
            Err(GpuError::Vulkan(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY))
        ));
        assert_eq!(commands.active_queue(), None);

        // Both fences were reset for the failed submit and must signal again.
        device.wait_for_fences(&[frame_fence], u64::MAX).unwrap();
        commands.begin(QueueKind::Graphics, 0).unwrap();
        commands.end(&submit).unwrap();
        device.wait_for_fences(&[frame_fence], u64::MAX).unwrap();

        commands.destroy().unwrap();
        unsafe { device.destroy_fence(frame_fence) };
    }

    #[test]
    fn destroy_is_idempotent() {
        let device = Arc::new(HeadlessDevice::new());
        let mut commands = manager(&device, 2);
        commands.begin(QueueKind::Transfer, 1).unwrap();
        commands.end(&SubmitInfo::default()).unwrap();

        commands.destroy().unwrap();
        commands.destroy().unwrap();
        assert_eq!(device.total_live_objects(), 0);
        assert!(commands.begin(QueueKind::Graphics, 0).is_err());
    }
}
