//! Clear-screen viewer.

use bytemuck::{Pod, Zeroable};
use scenery_engine::{vk, EditorApp, FrameContext, GraphicsEngine};
use scenery_gpu::device::QueueKind;
use scenery_gpu::{create_buffer, Buffer, BufferDesc, MemoryLocation};
use tracing::{debug, info};

/// Frames between timing and memory reports.
const REPORT_INTERVAL: u64 = 600;

/// Timestamp region around the clear pass.
const CLEAR_REGION: &str = "clear";

/// Per-frame parameters uploaded to a host-visible buffer.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct FrameUniforms {
    clear_color: [f32; 4],
    resolution: [f32; 2],
    time: f32,
    frame: u32,
}

pub struct Viewer {
    elapsed: f32,
    /// One uniform buffer per frame slot.
    uniforms: Vec<Buffer>,
    /// Host copy of the framebuffer, rebuilt on resize.
    readback: Buffer,
}

impl Viewer {
    fn clear_color(&self) -> [f32; 4] {
        let t = self.elapsed * 0.5;
        [
            0.5 + 0.5 * t.sin(),
            0.5 + 0.5 * (t + 2.094).sin(),
            0.5 + 0.5 * (t + 4.189).sin(),
            1.0,
        ]
    }

    fn create_readback(engine: &GraphicsEngine) -> anyhow::Result<Buffer> {
        let extent = engine.swapchain().swap_extent();
        let size = u64::from(extent.width.max(1)) * u64::from(extent.height.max(1)) * 4;
        let buffer = create_buffer(
            engine.allocator(),
            &BufferDesc::new(size, vk::BufferUsageFlags::TRANSFER_DST, MemoryLocation::GpuToCpu)
                .with_name("framebuffer readback"),
        )?;
        Ok(buffer)
    }
}

impl EditorApp for Viewer {
    fn init(engine: &mut GraphicsEngine) -> anyhow::Result<Self> {
        let size = std::mem::size_of::<FrameUniforms>() as u64;
        let uniforms = (0..engine.swapchain().frames_in_flight())
            .map(|slot| {
                create_buffer(
                    engine.allocator(),
                    &BufferDesc::new(size, vk::BufferUsageFlags::UNIFORM_BUFFER, MemoryLocation::CpuToGpu)
                        .with_name(format!("frame uniforms {slot}")),
                )
            })
            .collect::<Result<Vec<_>, _>>()?;

        let readback = Self::create_readback(engine)?;

        info!(
            extent = ?engine.swapchain().swap_extent(),
            format = ?engine.swapchain().color_format(),
            present_mode = ?engine.swapchain().present_mode(),
            "Viewer initialized"
        );

        Ok(Self {
            elapsed: 0.0,
            uniforms,
            readback,
        })
    }

    fn update(&mut self, dt: f32) {
        self.elapsed += dt;
    }

    fn render(&mut self, engine: &mut GraphicsEngine, frame: &FrameContext) -> anyhow::Result<()> {
        let clear_color = self.clear_color();
        let uniforms = FrameUniforms {
            clear_color,
            resolution: [frame.extent.width as f32, frame.extent.height as f32],
            time: self.elapsed,
            frame: frame.frame_number as u32,
        };
        if let Some(buffer) = self.uniforms.get(frame.frame_slot) {
            buffer.write(&[uniforms])?;
        }

        let mut clear_values = vec![vk::ClearValue {
            color: vk::ClearColorValue { float32: clear_color },
        }];
        if engine.swapchain().depth_format() != vk::Format::UNDEFINED {
            clear_values.push(vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue { depth: 1.0, stencil: 0 },
            });
        }

        let region = engine.commands_mut().begin_timestamp_query(CLEAR_REGION)?;
        let device = engine.device();
        device.cmd_begin_render_pass(
            frame.command_buffer,
            frame.render_pass,
            frame.framebuffer,
            frame.extent,
            &clear_values,
        );
        device.cmd_end_render_pass(frame.command_buffer);
        engine.commands_mut().end_timestamp_query(region)?;

        if frame.frame_number > 0 && frame.frame_number % REPORT_INTERVAL == 0 {
            let commands = engine.commands();
            debug!(
                frame = frame.frame_number,
                frame_ms = commands.frame_gpu_time(QueueKind::Graphics),
                clear_ms = commands.gpu_execution_time(QueueKind::Graphics, CLEAR_REGION),
                "GPU timings"
            );
            if let Some(statistics) = commands.pipeline_statistics(QueueKind::Graphics) {
                debug!(?statistics, "Pipeline statistics");
            }
            let stats = engine.allocator().stats();
            debug!(
                allocations = stats.allocation_count,
                used_bytes = stats.used_bytes,
                "Memory usage"
            );
        }
        Ok(())
    }

    fn on_resize(&mut self, engine: &mut GraphicsEngine, width: u32, height: u32) -> anyhow::Result<()> {
        let readback = Self::create_readback(engine)?;
        // The old buffer may still be referenced by frames in flight.
        engine.retire_buffer(std::mem::replace(&mut self.readback, readback));
        debug!(width, height, size = self.readback.size(), "Readback buffer resized");
        Ok(())
    }

    fn cleanup(&mut self, _engine: &mut GraphicsEngine) {
        self.uniforms.clear();
        self.readback = Buffer::default();
    }
}
