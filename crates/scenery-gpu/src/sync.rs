//! Synchronization primitives.

use crate::device::RenderDevice;
use crate::error::Result;
use ash::vk;

/// Frame synchronization resources.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameSync {
    /// Semaphore signaled when image is available
    pub image_available: vk::Semaphore,
    /// Semaphore signaled when rendering is complete
    pub render_finished: vk::Semaphore,
    /// Fence to wait for frame completion
    pub in_flight: vk::Fence,
}

impl FrameSync {
    /// Create frame synchronization resources. The fence starts signaled.
    pub fn new(device: &dyn RenderDevice) -> Result<Self> {
        let image_available = device.create_semaphore()?;
        let render_finished = match device.create_semaphore() {
            Ok(semaphore) => semaphore,
            Err(e) => {
                unsafe { device.destroy_semaphore(image_available) };
                return Err(e);
            }
        };
        let in_flight = match device.create_fence(true) {
            Ok(fence) => fence,
            Err(e) => {
                unsafe {
                    device.destroy_semaphore(image_available);
                    device.destroy_semaphore(render_finished);
                }
                return Err(e);
            }
        };

        Ok(Self {
            image_available,
            render_finished,
            in_flight,
        })
    }

    /// Wait for this frame to be available.
    #[cfg_attr(feature = "profiling-tracy", tracing::instrument(level = "trace", skip_all))]
    pub fn wait(&self, device: &dyn RenderDevice) -> Result<()> {
        device.wait_for_fences(&[self.in_flight], u64::MAX)
    }

    /// Destroy synchronization resources.
    ///
    /// # Safety
    /// The resources must not be in use.
    pub unsafe fn destroy(&self, device: &dyn RenderDevice) {
        device.destroy_semaphore(self.image_available);
        device.destroy_semaphore(self.render_finished);
        device.destroy_fence(self.in_flight);
    }
}

/// Manages synchronization for multiple frames in flight.
#[derive(Debug, Default)]
pub struct FrameSyncManager {
    frame_syncs: Vec<FrameSync>,
    current_frame: usize,
}

impl FrameSyncManager {
    /// Create a sync manager for the given number of frames in flight.
    pub fn new(device: &dyn RenderDevice, frames_in_flight: usize) -> Result<Self> {
        let mut frame_syncs = Vec::with_capacity(frames_in_flight);
        for _ in 0..frames_in_flight {
            match FrameSync::new(device) {
                Ok(sync) => frame_syncs.push(sync),
                Err(e) => {
                    for sync in &frame_syncs {
                        unsafe { sync.destroy(device) };
                    }
                    return Err(e);
                }
            }
        }

        Ok(Self {
            frame_syncs,
            current_frame: 0,
        })
    }

    /// Get the current frame's sync resources.
    pub fn current(&self) -> &FrameSync {
        &self.frame_syncs[self.current_frame]
    }

    /// Sync resources of every frame slot.
    pub fn all(&self) -> &[FrameSync] {
        &self.frame_syncs
    }

    /// Advance to the next frame.
    pub fn advance(&mut self) {
        self.current_frame = (self.current_frame + 1) % self.frame_syncs.len().max(1);
    }

    /// Get the current frame index.
    pub fn current_frame(&self) -> usize {
        self.current_frame
    }

    pub fn frames_in_flight(&self) -> usize {
        self.frame_syncs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frame_syncs.is_empty()
    }

    /// Destroy all resources.
    ///
    /// # Safety
    /// The resources must not be in use.
    pub unsafe fn destroy(&mut self, device: &dyn RenderDevice) {
        for sync in self.frame_syncs.drain(..) {
            sync.destroy(device);
        }
        self.current_frame = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headless::{HeadlessDevice, ObjectKind};

    #[test]
    fn manager_creates_one_set_per_frame() {
        let device = HeadlessDevice::new();
        let mut manager = FrameSyncManager::new(&device, 3).unwrap();
        assert_eq!(device.live_objects(ObjectKind::Fence), 3);
        assert_eq!(device.live_objects(ObjectKind::Semaphore), 6);

        assert_eq!(manager.current_frame(), 0);
        manager.advance();
        manager.advance();
        manager.advance();
        assert_eq!(manager.current_frame(), 0);

        unsafe { manager.destroy(&device) };
        assert!(manager.is_empty());
        assert_eq!(device.live_objects(ObjectKind::Fence), 0);
        assert_eq!(device.live_objects(ObjectKind::Semaphore), 0);
    }

    #[test]
    fn fresh_fence_does_not_block() {
        let device = HeadlessDevice::new();
        let sync = FrameSync::new(&device).unwrap();
        sync.wait(&device).unwrap();
        assert!(device.fence_signaled(sync.in_flight).unwrap());
        unsafe { sync.destroy(&device) };
    }
}
